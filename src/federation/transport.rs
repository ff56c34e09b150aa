//! Signed federation transport
//!
//! One transport instance acts for one local actor: every request it sends
//! carries that actor's HTTP Signature. Deliveries are persisted before the
//! request leaves the process, so a crash mid-send leaves an auditable
//! attempt row instead of a silent gap.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::data::database::Database;
use crate::data::models::DeliveryAttempt;
use crate::error::AppError;
use crate::federation::http::{HttpTransport, OutgoingRequest, TransportResponse};
use crate::federation::rate_limit::DeliveryLimiter;
use crate::federation::signature::{RequestSigner, generate_digest, http_date};

const ACTIVITY_CONTENT_TYPE: &str = "application/activity+json";

/// Response codes inboxes are allowed to answer a delivery with.
const DELIVERY_SUCCESS_CODES: &[u16] = &[200, 201, 202];

/// A transport bound to one local actor's signing key.
///
/// Cheap to clone; all shared pieces live behind `Arc` and the signers are
/// immutable, so clones can sign concurrently without coordination.
#[derive(Clone)]
pub struct SigningTransport {
    http: Arc<dyn HttpTransport>,
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    limiter: Arc<DeliveryLimiter>,
    user_agent: String,
    from_actor_iri: String,
    get_signer: RequestSigner,
    post_signer: RequestSigner,
    max_parallel_deliveries: usize,
}

impl SigningTransport {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        http: Arc<dyn HttpTransport>,
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        limiter: Arc<DeliveryLimiter>,
        user_agent: String,
        from_actor_iri: String,
        get_signer: RequestSigner,
        post_signer: RequestSigner,
        max_parallel_deliveries: usize,
    ) -> Self {
        Self {
            http,
            db,
            clock,
            limiter,
            user_agent,
            from_actor_iri,
            get_signer,
            post_signer,
            max_parallel_deliveries,
        }
    }

    /// The local actor this transport signs for.
    pub fn actor_iri(&self) -> &str {
        &self.from_actor_iri
    }

    /// Fetch a remote ActivityStreams document with a signed GET.
    ///
    /// Only a 200 response yields a body; anything else is a federation
    /// error naming the IRI and status.
    pub async fn dereference(&self, iri: &str) -> Result<Vec<u8>, AppError> {
        self.limiter.wait().await;

        let date = http_date(self.clock.now());
        let signature = self.get_signer.sign("GET", iri, &date, None)?;

        let request = OutgoingRequest {
            method: http::Method::GET,
            url: iri.to_string(),
            headers: vec![
                ("Accept".to_string(), ACTIVITY_CONTENT_TYPE.to_string()),
                ("Date".to_string(), date),
                ("User-Agent".to_string(), self.user_agent.clone()),
                ("Signature".to_string(), signature),
            ],
            body: None,
        };

        let response = self.http.execute(request).await?;
        crate::metrics::FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["outbound", &response.status.to_string()])
            .inc();

        if response.status != 200 {
            return Err(AppError::Federation(format!(
                "dereference of {} returned status {}",
                iri, response.status
            )));
        }

        debug!(iri = %iri, bytes = response.body.len(), "dereferenced remote document");
        Ok(response.body)
    }

    /// Deliver a payload to one recipient, recording the attempt first.
    ///
    /// The attempt row is written before the limiter is consulted, so even
    /// a delivery that never reaches the wire is accounted for. On a
    /// non-success response the attempt moves to failed and the error is
    /// returned; the retry scanner will pick it up later.
    pub async fn deliver(&self, payload: &[u8], to_actor_iri: &str) -> Result<(), AppError> {
        let attempt = DeliveryAttempt::new(
            &self.from_actor_iri,
            to_actor_iri,
            payload,
            self.clock.now(),
        );
        self.db.insert_delivery_attempt(&attempt).await?;

        match self.send_signed_post(payload, to_actor_iri).await {
            Ok(status) => {
                self.db.mark_attempt_succeeded(&attempt.id).await?;
                crate::metrics::DELIVERY_ATTEMPTS_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                info!(
                    to = %to_actor_iri,
                    attempt_id = %attempt.id,
                    status = status,
                    "delivered activity"
                );
                Ok(())
            }
            Err(e) => {
                self.db.mark_attempt_failed(&attempt.id).await?;
                crate::metrics::DELIVERY_ATTEMPTS_TOTAL
                    .with_label_values(&["failed"])
                    .inc();
                warn!(
                    to = %to_actor_iri,
                    attempt_id = %attempt.id,
                    error = %e,
                    "delivery failed"
                );
                Err(e)
            }
        }
    }

    /// Fan a payload out to many recipients with bounded parallelism.
    ///
    /// Recipients are deduplicated first so one inbox never receives the
    /// same payload twice from a single call. Individual failures are
    /// logged and recorded on their attempt rows; they do not abort the
    /// rest of the batch.
    pub async fn batch_deliver(&self, payload: &[u8], recipients: &[String]) {
        let targets = unique_recipients(recipients);
        if targets.is_empty() {
            return;
        }

        info!(
            recipients = targets.len(),
            from = %self.from_actor_iri,
            "delivering activity batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel_deliveries));
        let payload: Arc<[u8]> = Arc::from(payload);
        let mut handles = Vec::with_capacity(targets.len());

        for recipient in targets {
            let transport = self.clone();
            let payload = payload.clone();
            let semaphore = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                // deliver() already logs and records the failure
                let _ = transport.deliver(&payload, &recipient).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "delivery task panicked");
            }
        }
    }

    /// Re-send a previously failed attempt, keeping its original row.
    ///
    /// The original payload and recipient are replayed as-is; success moves
    /// the row to its terminal state, failure leaves it failed for the next
    /// sweep.
    pub(crate) async fn redeliver(&self, attempt: &DeliveryAttempt) -> Result<(), AppError> {
        match self
            .send_signed_post(&attempt.payload, &attempt.to_actor_iri)
            .await
        {
            Ok(status) => {
                self.db.mark_attempt_succeeded(&attempt.id).await?;
                crate::metrics::DELIVERY_ATTEMPTS_TOTAL
                    .with_label_values(&["retried_success"])
                    .inc();
                info!(
                    to = %attempt.to_actor_iri,
                    attempt_id = %attempt.id,
                    status = status,
                    "redelivered activity"
                );
                Ok(())
            }
            Err(e) => {
                crate::metrics::DELIVERY_ATTEMPTS_TOTAL
                    .with_label_values(&["retried_failed"])
                    .inc();
                warn!(
                    to = %attempt.to_actor_iri,
                    attempt_id = %attempt.id,
                    error = %e,
                    "redelivery failed"
                );
                Err(e)
            }
        }
    }

    async fn send_signed_post(&self, payload: &[u8], inbox_iri: &str) -> Result<u16, AppError> {
        self.limiter.wait().await;

        let date = http_date(self.clock.now());
        let digest = generate_digest(payload);
        let signature = self
            .post_signer
            .sign("POST", inbox_iri, &date, Some(&digest))?;

        let request = OutgoingRequest {
            method: http::Method::POST,
            url: inbox_iri.to_string(),
            headers: vec![
                ("Content-Type".to_string(), ACTIVITY_CONTENT_TYPE.to_string()),
                ("Date".to_string(), date),
                ("Digest".to_string(), digest),
                ("User-Agent".to_string(), self.user_agent.clone()),
                ("Signature".to_string(), signature),
            ],
            body: Some(payload.to_vec()),
        };

        let TransportResponse { status, .. } = self.http.execute(request).await?;
        crate::metrics::FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["outbound", &status.to_string()])
            .inc();

        if DELIVERY_SUCCESS_CODES.contains(&status) {
            Ok(status)
        } else {
            Err(AppError::Federation(format!(
                "inbox {} rejected delivery with status {}",
                inbox_iri, status
            )))
        }
    }
}

/// Deduplicate recipient IRIs, preserving first-seen order.
fn unique_recipients(recipients: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    recipients
        .iter()
        .filter(|r| seen.insert(r.as_str()))
        .cloned()
        .collect()
}
