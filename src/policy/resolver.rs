//! Interaction gating
//!
//! Combines instance-wide and actor-owned policies into a single admit/deny
//! decision for one inbound interaction, persisting one resolution per
//! policy evaluated.

use std::sync::Arc;

use crate::clock::Clock;
use crate::data::Database;
use crate::error::AppError;

use super::{Policy, Resolution};

/// How matches across the instance and actor scopes combine into a decision.
///
/// The combination semantics are an unconfirmed product decision; the rule is
/// pluggable so hosts can swap it without touching the resolver.
pub trait CombinationRule: Send + Sync {
    fn is_blocked(&self, instance_matches: &[bool], actor_matches: &[bool]) -> bool;
}

/// Default rule: any matching policy at either level denies.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyMatchDenies;

impl CombinationRule for AnyMatchDenies {
    fn is_blocked(&self, instance_matches: &[bool], actor_matches: &[bool]) -> bool {
        instance_matches.iter().chain(actor_matches).any(|m| *m)
    }
}

/// Resolves whether a remote interaction is permitted to reach a local actor.
pub struct PolicyResolver {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    rule: Arc<dyn CombinationRule>,
}

impl PolicyResolver {
    /// Build a resolver with the default any-match-denies combination rule.
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self::with_rule(db, clock, Arc::new(AnyMatchDenies))
    }

    pub fn with_rule(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        rule: Arc<dyn CombinationRule>,
    ) -> Self {
        Self { db, clock, rule }
    }

    /// Decide whether the interaction is blocked for `target_actor_iri`.
    ///
    /// Instance policies evaluate first, then the target actor's policies, in
    /// that fixed order, against a document assembled from the inbound
    /// activity's actor list, IRI and type. Every policy evaluated persists a
    /// resolution regardless of outcome. Evaluation errors accumulate and are
    /// returned only after every policy has been evaluated and audited;
    /// callers should fail closed on an error.
    pub async fn is_blocked(
        &self,
        target_actor_iri: &str,
        remote_actor_iris: &[String],
        activity_iri: &str,
        activity_type: &str,
    ) -> Result<bool, AppError> {
        let document = serde_json::json!({
            "actor": remote_actor_iris,
            "id": activity_iri,
            "type": activity_type,
        });

        let instance_policies = self.db.get_instance_policies().await?;
        let actor_policies = self.db.get_actor_policies(target_actor_iri).await?;

        let mut errors: Vec<String> = Vec::new();
        let instance_matches = self
            .evaluate_policies(&instance_policies, &document, activity_iri, &mut errors)
            .await?;
        let actor_matches = self
            .evaluate_policies(&actor_policies, &document, activity_iri, &mut errors)
            .await?;

        let blocked = self.rule.is_blocked(&instance_matches, &actor_matches);

        tracing::debug!(
            target = %target_actor_iri,
            activity = %activity_iri,
            blocked,
            instance_policies = instance_matches.len(),
            actor_policies = actor_matches.len(),
            "Interaction policy decision"
        );

        if errors.is_empty() {
            Ok(blocked)
        } else {
            Err(AppError::Evaluation(errors.join("; ")))
        }
    }

    /// Evaluate a policy list in order, persisting one resolution each.
    async fn evaluate_policies(
        &self,
        policies: &[Policy],
        document: &serde_json::Value,
        activity_iri: &str,
        errors: &mut Vec<String>,
    ) -> Result<Vec<bool>, AppError> {
        let mut matches = Vec::with_capacity(policies.len());

        for policy in policies {
            let mut resolution = Resolution::new(&policy.id, activity_iri, self.clock.now());

            if let Err(e) = policy.validate() {
                // The store rejects invalid policies at insert, so reaching
                // one here means it was corrupted or written out of band.
                resolution.log(format!("policy invalid, not evaluated: {}", e));
                errors.push(format!("policy {:?}: {}", policy.name, e));
            } else if let Err(e) = policy.resolve(document, &mut resolution) {
                errors.push(format!("policy {:?}: {}", policy.name, e));
            }

            let outcome = if resolution.matched { "matched" } else { "unmatched" };
            crate::metrics::POLICY_RESOLUTIONS_TOTAL
                .with_label_values(&[outcome])
                .inc();

            matches.push(resolution.matched);
            self.db.insert_resolution(&resolution).await?;
        }

        Ok(matches)
    }
}
