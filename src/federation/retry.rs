//! Failed-delivery retry sweeps
//!
//! A sweep walks every attempt that was already failed when the sweep
//! started and replays it through a fresh transport for its sending actor.
//! Attempts that fail during the sweep stay failed and are picked up next
//! time; attempts created after the sweep's cutoff are never touched, so a
//! sweep always terminates even while new failures pour in.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::data::database::Database;
use crate::error::AppError;
use crate::federation::controller::TransportController;

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Failed attempts examined
    pub scanned: usize,
    /// Attempts moved to success
    pub redelivered: usize,
    /// Attempts that failed again or could not be retried
    pub still_failed: usize,
}

pub struct RetryScanner {
    db: Arc<Database>,
    controller: Arc<TransportController>,
    clock: Arc<dyn Clock>,
    page_size: u32,
}

impl RetryScanner {
    pub fn new(
        db: Arc<Database>,
        controller: Arc<TransportController>,
        clock: Arc<dyn Clock>,
        page_size: u32,
    ) -> Self {
        Self {
            db,
            controller,
            clock,
            page_size,
        }
    }

    /// Run one full sweep over the failed attempts visible at its start.
    ///
    /// Pagination is keyed on the attempt id, which sorts in creation
    /// order, with the creation cutoff fixed once up front. An attempt
    /// whose sending actor no longer exists is logged and skipped rather
    /// than failing the sweep.
    pub async fn sweep(&self) -> Result<SweepOutcome, AppError> {
        let cutoff = self.clock.now();
        let mut outcome = SweepOutcome::default();
        let mut last_id: Option<String> = None;

        loop {
            let page = match &last_id {
                None => {
                    self.db
                        .first_page_failed_attempts(cutoff, self.page_size)
                        .await?
                }
                Some(id) => {
                    self.db
                        .next_page_failed_attempts(id, cutoff, self.page_size)
                        .await?
                }
            };

            if page.is_empty() {
                break;
            }
            last_id = Some(page.last().map(|a| a.id.clone()).unwrap_or_default());

            for attempt in &page {
                outcome.scanned += 1;

                let actor = match self.db.get_local_actor(&attempt.from_actor_iri).await? {
                    Some(actor) => actor,
                    None => {
                        warn!(
                            attempt_id = %attempt.id,
                            actor = %attempt.from_actor_iri,
                            "skipping retry, sending actor no longer exists"
                        );
                        outcome.still_failed += 1;
                        continue;
                    }
                };

                let transport = match self.controller.for_actor(&actor) {
                    Ok(transport) => transport,
                    Err(e) => {
                        warn!(
                            attempt_id = %attempt.id,
                            actor = %actor.iri,
                            error = %e,
                            "skipping retry, cannot build transport for actor"
                        );
                        outcome.still_failed += 1;
                        continue;
                    }
                };

                match transport.redeliver(attempt).await {
                    Ok(()) => outcome.redelivered += 1,
                    Err(_) => outcome.still_failed += 1,
                }
            }
        }

        crate::metrics::RETRY_SWEEPS_TOTAL.inc();
        info!(
            scanned = outcome.scanned,
            redelivered = outcome.redelivered,
            still_failed = outcome.still_failed,
            "retry sweep finished"
        );
        Ok(outcome)
    }
}
