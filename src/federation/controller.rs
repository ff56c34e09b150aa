//! Transport construction and shared delivery state
//!
//! The controller owns the pieces every transport shares (HTTP client,
//! database, clock, rate limiter) and mints per-actor transports on
//! demand. Private keys are parsed fresh on each `get` and never cached;
//! a transport holds its parsed key only for its own lifetime.

use std::sync::Arc;

use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use tracing::debug;

use crate::clock::Clock;
use crate::config::TransportConfig;
use crate::data::database::Database;
use crate::data::models::LocalActor;
use crate::error::AppError;
use crate::federation::http::HttpTransport;
use crate::federation::rate_limit::DeliveryLimiter;
use crate::federation::signature::RequestSigner;
use crate::federation::transport::SigningTransport;

pub struct TransportController {
    config: TransportConfig,
    http: Arc<dyn HttpTransport>,
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    limiter: Arc<DeliveryLimiter>,
}

impl TransportController {
    /// Validate the transport configuration and build the shared limiter.
    pub fn new(
        config: TransportConfig,
        http: Arc<dyn HttpTransport>,
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let limiter = Arc::new(DeliveryLimiter::new(
            config.rate_limit_per_sec,
            config.rate_limit_burst,
        )?);
        Ok(Self {
            config,
            http,
            db,
            clock,
            limiter,
        })
    }

    /// Mint a transport signing as `from_actor_iri`.
    ///
    /// Fails up front if the key does not parse, so a bad key surfaces
    /// here rather than on the first delivery.
    pub fn get(
        &self,
        from_actor_iri: &str,
        private_key_pem: &str,
        public_key_id: &str,
    ) -> Result<SigningTransport, AppError> {
        let private_key = parse_private_key(private_key_pem)?;

        // Advertise the first configured algorithm; verification accepts all.
        let algorithm = self
            .config
            .signature_algorithms
            .first()
            .ok_or_else(|| {
                AppError::Validation("no signature algorithms configured".to_string())
            })?;

        let get_signer = RequestSigner::new(
            private_key.clone(),
            public_key_id,
            algorithm,
            &self.config.get_headers,
        )?;
        let post_signer = RequestSigner::new(
            private_key,
            public_key_id,
            algorithm,
            &self.config.post_headers,
        )?;

        debug!(actor = %from_actor_iri, key_id = %public_key_id, "built signing transport");

        Ok(SigningTransport::new(
            self.http.clone(),
            self.db.clone(),
            self.clock.clone(),
            self.limiter.clone(),
            self.config.user_agent(),
            from_actor_iri.to_string(),
            get_signer,
            post_signer,
            self.config.max_parallel_deliveries,
        ))
    }

    /// Mint a transport for a stored local actor.
    pub fn for_actor(&self, actor: &LocalActor) -> Result<SigningTransport, AppError> {
        self.get(&actor.iri, &actor.private_key_pem, &actor.public_key_id)
    }
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, AppError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| AppError::Validation(format!("invalid RSA private key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::TransportConfig;
    use crate::federation::http::{OutgoingRequest, TransportResponse};
    use futures::future::BoxFuture;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    struct NoopTransport;

    impl HttpTransport for NoopTransport {
        fn execute(
            &self,
            _request: OutgoingRequest,
        ) -> BoxFuture<'_, Result<TransportResponse, AppError>> {
            Box::pin(async {
                Ok(TransportResponse {
                    status: 200,
                    body: Vec::new(),
                })
            })
        }
    }

    async fn test_controller(config: TransportConfig) -> Result<TransportController, AppError> {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(&dir.path().join("test.db")).await.unwrap();
        TransportController::new(
            config,
            Arc::new(NoopTransport),
            Arc::new(db),
            Arc::new(SystemClock),
        )
    }

    fn test_key_pem() -> String {
        let mut rng = rand::thread_rng();
        let key = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()
    }

    #[tokio::test]
    async fn new_rejects_invalid_config() {
        let mut config = TransportConfig::default();
        config.rate_limit_per_sec = 0.0;
        assert!(test_controller(config).await.is_err());
    }

    #[tokio::test]
    async fn get_rejects_garbage_private_key() {
        let controller = test_controller(TransportConfig::default()).await.unwrap();
        let result = controller.get(
            "https://local.example/users/alice",
            "not a pem",
            "https://local.example/users/alice#main-key",
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn get_builds_transport_for_valid_key() {
        let controller = test_controller(TransportConfig::default()).await.unwrap();
        let transport = controller
            .get(
                "https://local.example/users/alice",
                &test_key_pem(),
                "https://local.example/users/alice#main-key",
            )
            .unwrap();
        assert_eq!(transport.actor_iri(), "https://local.example/users/alice");
    }
}
