//! Federation policy engine
//!
//! Policies decide, per incoming interaction, whether a remote actor may
//! federate with a local one. A policy is an ordered matcher list evaluated
//! against a JSON document; every application produces a persisted
//! [`Resolution`] audit record.

mod matcher;
mod resolver;

pub use matcher::{BinaryMatcher, KVMatcher, UnaryMatcher, ValueMatcher};
pub use resolver::{AnyMatchDenies, CombinationRule, PolicyResolver};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::EntityId;
use crate::error::AppError;

/// An ordered matcher list owned by the instance or by one local actor.
///
/// Read-only at resolution time; invalid policies are rejected at creation
/// and never reach evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    /// None for instance-wide policies
    pub owner_actor_iri: Option<String>,
    pub name: String,
    pub description: String,
    pub matchers: Vec<KVMatcher>,
    pub created_at: DateTime<Utc>,
}

impl Policy {
    /// Build a new policy owned by the instance or an actor.
    pub fn new(
        owner_actor_iri: Option<String>,
        name: &str,
        description: &str,
        matchers: Vec<KVMatcher>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntityId::new().0,
            owner_actor_iri,
            name: name.to_string(),
            description: description.to_string(),
            matchers,
            created_at,
        }
    }

    /// Validate the policy and every matcher in it, recursively.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation(
                "policy name must not be empty".to_string(),
            ));
        }

        for (index, matcher) in self.matchers.iter().enumerate() {
            matcher.validate().map_err(|e| {
                AppError::Validation(format!("policy {:?} matcher {}: {}", self.name, index, e))
            })?;
        }

        Ok(())
    }

    /// Evaluate the matcher list in order against `document`.
    ///
    /// Once a matcher has matched, later matchers are skipped but still
    /// logged as skipped, so the audit trail shows which matchers were
    /// attempted and which were bypassed. Matcher errors accumulate into one
    /// combined error instead of aborting the loop; the partial log written
    /// so far stays intact.
    pub fn resolve(
        &self,
        document: &serde_json::Value,
        resolution: &mut Resolution,
    ) -> Result<(), AppError> {
        let mut errors: Vec<String> = Vec::new();

        for (index, matcher) in self.matchers.iter().enumerate() {
            if resolution.matched {
                resolution.log(format!(
                    "matcher {} ({}) skipped: policy already matched",
                    index, matcher.key_path_query
                ));
                continue;
            }

            match matcher.evaluate(document, resolution) {
                Ok(true) => {
                    resolution.matched = true;
                    resolution.log(format!(
                        "matcher {} ({}) matched",
                        index, matcher.key_path_query
                    ));
                }
                Ok(false) => {
                    resolution.log(format!(
                        "matcher {} ({}) did not match",
                        index, matcher.key_path_query
                    ));
                }
                Err(e) => {
                    resolution.log(format!("matcher {} errored: {}", index, e));
                    errors.push(format!("matcher {}: {}", index, e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Evaluation(errors.join("; ")))
        }
    }
}

/// Audit record of one policy application against one document.
///
/// Created once per application and never mutated after it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub id: String,
    pub policy_id: String,
    pub activity_iri: String,
    pub matched: bool,
    /// Ordered trace of every branch evaluated, skipped, or errored.
    pub match_log: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Resolution {
    pub fn new(policy_id: &str, activity_iri: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: EntityId::new().0,
            policy_id: policy_id.to_string(),
            activity_iri: activity_iri.to_string(),
            matched: false,
            match_log: Vec::new(),
            created_at,
        }
    }

    pub(crate) fn log(&mut self, line: impl Into<String>) {
        self.match_log.push(line.into());
    }
}
