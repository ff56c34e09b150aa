//! Outbound federation
//!
//! Signed HTTP delivery to remote ActivityPub servers. The controller
//! mints per-actor transports over a shared rate limiter; every delivery
//! is persisted before it goes on the wire, and the retry scanner replays
//! failures in the background.

pub mod controller;
pub mod http;
pub mod rate_limit;
pub mod retry;
pub mod signature;
pub mod transport;

pub use controller::TransportController;
pub use http::{HttpTransport, OutgoingRequest, TransportResponse};
pub use rate_limit::DeliveryLimiter;
pub use retry::{RetryScanner, SweepOutcome};
pub use signature::{
    RequestSigner, generate_digest, http_date, key_id_matches_actor, parse_signature_header,
    verify_signature,
};
pub use transport::SigningTransport;
