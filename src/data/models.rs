//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// ULIDs sort lexicographically in creation order, which makes them the
/// stable key for keyset pagination over delivery attempts.
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Local actors (the Key Provider backing store)
// =============================================================================

/// A local actor able to sign outbound requests.
///
/// The retry scanner looks actors up by IRI to rebuild a signing transport
/// for redelivery; the private key never leaves this row except into a
/// transport's signing context.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LocalActor {
    /// ActivityPub actor IRI (globally unique)
    pub iri: String,
    pub preferred_username: String,
    /// Inbox IRI advertised to peers
    pub inbox_iri: String,
    /// RSA private key (PEM format)
    pub private_key_pem: String,
    /// Public key identifier, usually "<actor iri>#main-key"
    pub public_key_id: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Delivery attempts
// =============================================================================

/// State of a delivery attempt.
///
/// `new -> success` and `new -> failed` happen exactly once per attempt;
/// `failed` is the only state the retry scanner picks up; `success` and
/// `abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    New,
    Success,
    Failed,
    Abandoned,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

/// One outbound delivery of one payload to one recipient.
///
/// Persisted before the network attempt so a crash between send and record
/// never silently loses the attempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryAttempt {
    pub id: String,
    /// Sending local actor IRI
    pub from_actor_iri: String,
    /// Recipient inbox IRI
    pub to_actor_iri: String,
    /// Raw activity bytes, re-sent verbatim on retry
    pub payload: Vec<u8>,
    /// new | success | failed | abandoned
    pub state: String,
    pub created_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    /// Build a fresh attempt in the `new` state.
    pub fn new(
        from_actor_iri: &str,
        to_actor_iri: &str,
        payload: &[u8],
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntityId::new().0,
            from_actor_iri: from_actor_iri.to_string(),
            to_actor_iri: to_actor_iri.to_string(),
            payload: payload.to_vec(),
            state: DeliveryState::New.as_str().to_string(),
            created_at,
        }
    }

    pub fn delivery_state(&self) -> Option<DeliveryState> {
        DeliveryState::parse(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn new_attempt_starts_in_new_state() {
        let attempt = DeliveryAttempt::new(
            "https://local.example/users/alice",
            "https://remote.example/inbox",
            b"{}",
            Utc::now(),
        );
        assert_eq!(attempt.delivery_state(), Some(DeliveryState::New));
        assert_eq!(attempt.id.len(), 26);
    }

    #[test]
    fn delivery_state_round_trips_through_strings() {
        for state in [
            DeliveryState::New,
            DeliveryState::Success,
            DeliveryState::Failed,
            DeliveryState::Abandoned,
        ] {
            assert_eq!(DeliveryState::parse(state.as_str()), Some(state));
        }
        assert_eq!(DeliveryState::parse("pending"), None);
    }
}
