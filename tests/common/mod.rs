//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use tempfile::TempDir;

use fedgate::clock::FixedClock;
use fedgate::data::database::Database;
use fedgate::data::models::LocalActor;
use fedgate::error::AppError;
use fedgate::federation::{HttpTransport, OutgoingRequest, TransportResponse};

/// Records every request and replays queued statuses.
///
/// When the queue runs dry the default status is returned, so a test only
/// queues the responses it cares about.
pub struct StubTransport {
    default_status: u16,
    queued: Mutex<VecDeque<u16>>,
    requests: Mutex<Vec<OutgoingRequest>>,
}

impl StubTransport {
    pub fn new(default_status: u16) -> Arc<Self> {
        Arc::new(Self {
            default_status,
            queued: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn queue_status(&self, status: u16) {
        self.queued.lock().unwrap().push_back(status);
    }

    pub fn requests(&self) -> Vec<OutgoingRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for StubTransport {
    fn execute(
        &self,
        request: OutgoingRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, AppError>> {
        self.requests.lock().unwrap().push(request);
        let status = self
            .queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_status);
        Box::pin(async move {
            Ok(TransportResponse {
                status,
                body: Vec::new(),
            })
        })
    }
}

pub async fn test_db() -> (Arc<Database>, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let db = Database::connect(&dir.path().join("test.db"))
        .await
        .expect("connect test db");
    (Arc::new(db), dir)
}

pub fn test_private_key_pem() -> String {
    let mut rng = rand::thread_rng();
    let key = rsa::RsaPrivateKey::new(&mut rng, 1024).expect("generate test key");
    key.to_pkcs8_pem(LineEnding::LF)
        .expect("encode test key")
        .to_string()
}

pub fn local_actor(iri: &str) -> LocalActor {
    LocalActor {
        iri: iri.to_string(),
        preferred_username: "alice".to_string(),
        inbox_iri: format!("{}/inbox", iri),
        private_key_pem: test_private_key_pem(),
        public_key_id: format!("{}#main-key", iri),
        created_at: Utc::now(),
    }
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(
        "2026-01-15T12:00:00Z".parse().expect("valid timestamp"),
    ))
}

/// Find a header on a recorded request, case-insensitively.
pub fn header<'a>(request: &'a OutgoingRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
