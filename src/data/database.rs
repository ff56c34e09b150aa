//! SQLite database operations
//!
//! All database access goes through this module. This is the persistence
//! Store behind policy resolution (policies, resolutions) and the delivery
//! pipeline (local actor keys, delivery attempts, failed-attempt pages).

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;
use crate::policy::{Policy, Resolution};

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

type PolicyRow = (
    String,
    Option<String>,
    String,
    String,
    String,
    DateTime<Utc>,
);

fn policy_from_row(row: PolicyRow) -> Result<Policy, AppError> {
    let (id, owner_actor_iri, name, description, matchers, created_at) = row;
    let matchers = serde_json::from_str(&matchers).map_err(|e| {
        AppError::Consistency(format!("policy {} has corrupt matcher column: {}", id, e))
    })?;

    Ok(Policy {
        id,
        owner_actor_iri,
        name,
        description,
        matchers,
        created_at,
    })
}

type ResolutionRow = (String, String, String, bool, String, DateTime<Utc>);

fn resolution_from_row(row: ResolutionRow) -> Result<Resolution, AppError> {
    let (id, policy_id, activity_iri, matched, match_log, created_at) = row;
    let match_log = serde_json::from_str(&match_log).map_err(|e| {
        AppError::Consistency(format!("resolution {} has corrupt log column: {}", id, e))
    })?;

    Ok(Resolution {
        id,
        policy_id,
        activity_iri,
        matched,
        match_log,
        created_at,
    })
}

impl Database {
    /// Connect to SQLite database and run migrations.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Local actors (key provider)
    // =========================================================================

    /// Create or update a local actor row.
    pub async fn upsert_local_actor(&self, actor: &LocalActor) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO local_actors (
                iri, preferred_username, inbox_iri, private_key_pem, public_key_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&actor.iri)
        .bind(&actor.preferred_username)
        .bind(&actor.inbox_iri)
        .bind(&actor.private_key_pem)
        .bind(&actor.public_key_id)
        .bind(actor.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up a local actor (and its signing key) by IRI.
    pub async fn get_local_actor(&self, iri: &str) -> Result<Option<LocalActor>, AppError> {
        let actor = sqlx::query_as::<_, LocalActor>(
            "SELECT iri, preferred_username, inbox_iri, private_key_pem, public_key_id, created_at
             FROM local_actors WHERE iri = ?",
        )
        .bind(iri)
        .fetch_optional(&self.pool)
        .await?;

        Ok(actor)
    }

    // =========================================================================
    // Policies
    // =========================================================================

    /// Insert a policy after validating it.
    ///
    /// Malformed policies are rejected here so resolution never sees one.
    pub async fn insert_policy(&self, policy: &Policy) -> Result<(), AppError> {
        policy.validate()?;

        let matchers = serde_json::to_string(&policy.matchers)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("serialize matchers: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO policies (id, owner_actor_iri, name, description, matchers, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&policy.id)
        .bind(&policy.owner_actor_iri)
        .bind(&policy.name)
        .bind(&policy.description)
        .bind(&matchers)
        .bind(policy.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get instance-wide policies in creation order.
    pub async fn get_instance_policies(&self) -> Result<Vec<Policy>, AppError> {
        let rows = sqlx::query_as::<_, PolicyRow>(
            "SELECT id, owner_actor_iri, name, description, matchers, created_at
             FROM policies WHERE owner_actor_iri IS NULL ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(policy_from_row).collect()
    }

    /// Get one local actor's policies in creation order.
    pub async fn get_actor_policies(&self, actor_iri: &str) -> Result<Vec<Policy>, AppError> {
        let rows = sqlx::query_as::<_, PolicyRow>(
            "SELECT id, owner_actor_iri, name, description, matchers, created_at
             FROM policies WHERE owner_actor_iri = ? ORDER BY id ASC",
        )
        .bind(actor_iri)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(policy_from_row).collect()
    }

    /// Get a single policy by ID.
    pub async fn get_policy(&self, id: &str) -> Result<Option<Policy>, AppError> {
        let row = sqlx::query_as::<_, PolicyRow>(
            "SELECT id, owner_actor_iri, name, description, matchers, created_at
             FROM policies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(policy_from_row).transpose()
    }

    /// Delete a policy.
    ///
    /// # Returns
    /// `true` if a row was deleted.
    pub async fn delete_policy(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM policies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Resolutions (append-only audit log)
    // =========================================================================

    /// Persist a resolution. Resolutions are never updated after insert.
    pub async fn insert_resolution(&self, resolution: &Resolution) -> Result<(), AppError> {
        let match_log = serde_json::to_string(&resolution.match_log)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("serialize match log: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO resolutions (id, policy_id, activity_iri, matched, match_log, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&resolution.id)
        .bind(&resolution.policy_id)
        .bind(&resolution.activity_iri)
        .bind(resolution.matched)
        .bind(&match_log)
        .bind(resolution.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Audit trail for one policy, newest first.
    pub async fn get_resolutions_for_policy(
        &self,
        policy_id: &str,
        limit: u32,
    ) -> Result<Vec<Resolution>, AppError> {
        let rows = sqlx::query_as::<_, ResolutionRow>(
            "SELECT id, policy_id, activity_iri, matched, match_log, created_at
             FROM resolutions WHERE policy_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(policy_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(resolution_from_row).collect()
    }

    /// Audit trail for one activity, in evaluation order.
    pub async fn get_resolutions_for_activity(
        &self,
        activity_iri: &str,
    ) -> Result<Vec<Resolution>, AppError> {
        let rows = sqlx::query_as::<_, ResolutionRow>(
            "SELECT id, policy_id, activity_iri, matched, match_log, created_at
             FROM resolutions WHERE activity_iri = ? ORDER BY id ASC",
        )
        .bind(activity_iri)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(resolution_from_row).collect()
    }

    // =========================================================================
    // Delivery attempts
    // =========================================================================

    /// Persist a new delivery attempt. Always happens before the network send.
    pub async fn insert_delivery_attempt(
        &self,
        attempt: &DeliveryAttempt,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO delivery_attempts (id, from_actor_iri, to_actor_iri, payload, state, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.id)
        .bind(&attempt.from_actor_iri)
        .bind(&attempt.to_actor_iri)
        .bind(&attempt.payload)
        .bind(&attempt.state)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a delivery attempt by ID.
    pub async fn get_delivery_attempt(
        &self,
        id: &str,
    ) -> Result<Option<DeliveryAttempt>, AppError> {
        let attempt = sqlx::query_as::<_, DeliveryAttempt>(
            "SELECT id, from_actor_iri, to_actor_iri, payload, state, created_at
             FROM delivery_attempts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }

    /// Atomic single-row state transition.
    ///
    /// Only `new` and `failed` attempts may move; `success` and `abandoned`
    /// are terminal. Anything other than exactly one affected row means the
    /// attempt is missing, already terminal, or duplicated, and is reported
    /// as a consistency error rather than ignored.
    async fn transition_attempt(&self, id: &str, to: DeliveryState) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE delivery_attempts SET state = ? WHERE id = ? AND state IN ('new', 'failed')",
        )
        .bind(to.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(AppError::Consistency(format!(
                "delivery attempt {} transition to {} affected {} rows",
                id,
                to.as_str(),
                result.rows_affected()
            )));
        }

        Ok(())
    }

    /// Mark an attempt delivered.
    pub async fn mark_attempt_succeeded(&self, id: &str) -> Result<(), AppError> {
        self.transition_attempt(id, DeliveryState::Success).await
    }

    /// Mark an attempt failed; it stays visible to the retry scanner.
    pub async fn mark_attempt_failed(&self, id: &str) -> Result<(), AppError> {
        self.transition_attempt(id, DeliveryState::Failed).await
    }

    /// Mark an attempt abandoned (terminal). Set by an external retry-budget
    /// policy, not by the pipeline itself.
    pub async fn mark_attempt_abandoned(&self, id: &str) -> Result<(), AppError> {
        self.transition_attempt(id, DeliveryState::Abandoned).await
    }

    /// First page of failed attempts at or before `cutoff`, ordered by ID.
    ///
    /// The cutoff is captured once per sweep and held fixed across pages so
    /// the sweep sees a consistent snapshot: failures inserted while the
    /// sweep runs stay invisible until the next sweep instead of being
    /// skipped or double-processed.
    pub async fn first_page_failed_attempts(
        &self,
        cutoff: DateTime<Utc>,
        n: u32,
    ) -> Result<Vec<DeliveryAttempt>, AppError> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(
            "SELECT id, from_actor_iri, to_actor_iri, payload, state, created_at
             FROM delivery_attempts
             WHERE state = 'failed' AND created_at <= ?
             ORDER BY id ASC LIMIT ?",
        )
        .bind(cutoff)
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    /// Continue a failed-attempt scan strictly after `previous_id`, using the
    /// same cutoff captured at the start of the sweep.
    pub async fn next_page_failed_attempts(
        &self,
        previous_id: &str,
        cutoff: DateTime<Utc>,
        n: u32,
    ) -> Result<Vec<DeliveryAttempt>, AppError> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(
            "SELECT id, from_actor_iri, to_actor_iri, payload, state, created_at
             FROM delivery_attempts
             WHERE state = 'failed' AND created_at <= ? AND id > ?
             ORDER BY id ASC LIMIT ?",
        )
        .bind(cutoff)
        .bind(previous_id)
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    /// Rewrite an attempt's creation time. Test helper for exercising the
    /// snapshot cutoff without sleeping.
    pub async fn set_attempt_created_at_for_test(
        &self,
        id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE delivery_attempts SET created_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
