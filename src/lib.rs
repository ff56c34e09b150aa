//! fedgate - policy gating and signed delivery for ActivityPub servers
//!
//! This crate is the federation core an ActivityPub server embeds: it
//! decides which inbound activities to block and carries outbound
//! activities to remote inboxes with HTTP Signatures.
//!
//! # Architecture
//! - `policy`: declarative matcher trees over raw activity JSON, resolved
//!   against instance-wide and per-actor policy lists with an append-only
//!   audit trail
//! - `federation`: signing transports minted per local actor, a shared
//!   outbound rate limiter, persisted delivery attempts, and a retry
//!   scanner that replays failures
//! - `data`: SQLite persistence for actors, policies, resolutions, and
//!   delivery attempts
//!
//! # Usage
//! Build a [`FederationState`] from an [`AppConfig`], then use
//! [`FederationState::resolver`] to gate inbound activities and
//! [`FederationState::controller`] to mint transports for outbound
//! delivery. [`spawn_retry_task`] runs the retry scanner on an interval.

pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod policy;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::data::database::Database;
use crate::error::AppError;
use crate::federation::{RetryScanner, TransportController};
use crate::policy::PolicyResolver;

/// Everything an embedding server needs to federate.
#[derive(Clone)]
pub struct FederationState {
    pub config: Arc<AppConfig>,
    pub db: Arc<Database>,
    pub controller: Arc<TransportController>,
    pub resolver: Arc<PolicyResolver>,
    clock: Arc<dyn Clock>,
}

impl FederationState {
    /// Connect the database, run migrations, and wire up the controller
    /// and resolver against the real clock and a shared HTTP client.
    pub async fn new(config: AppConfig) -> Result<Self, AppError> {
        metrics::init_metrics();

        let db = Arc::new(Database::connect(&config.database.path).await?);
        info!(path = %config.database.path.display(), "database ready");

        let http_client = reqwest::Client::builder()
            .user_agent(config.transport.user_agent())
            .timeout(Duration::from_secs(config.transport.request_timeout_seconds))
            .build()?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let controller = Arc::new(TransportController::new(
            config.transport.clone(),
            Arc::new(http_client),
            db.clone(),
            clock.clone(),
        )?);
        let resolver = Arc::new(PolicyResolver::new(db.clone(), clock.clone()));

        Ok(Self {
            config: Arc::new(config),
            db,
            controller,
            resolver,
            clock,
        })
    }

    pub fn controller(&self) -> Arc<TransportController> {
        self.controller.clone()
    }

    pub fn resolver(&self) -> Arc<PolicyResolver> {
        self.resolver.clone()
    }
}

/// Spawn the periodic failed-delivery sweep.
///
/// Runs forever on the configured interval; a failed sweep is logged and
/// the next tick tries again.
pub fn spawn_retry_task(state: FederationState) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(state.config.retry.interval_seconds);
    let scanner = RetryScanner::new(
        state.db.clone(),
        state.controller.clone(),
        state.clock.clone(),
        state.config.retry.page_size,
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so a fresh process does not
        // sweep before the embedding server finishes starting.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = scanner.sweep().await {
                error!(error = %e, "retry sweep failed");
            }
        }
    })
}
