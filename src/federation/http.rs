//! Pluggable HTTP transport
//!
//! The signing transport builds fully signed requests and hands them to an
//! [`HttpTransport`] for the actual network call. Production uses
//! `reqwest::Client`; tests substitute a stub that records requests and
//! replays canned responses.

use futures::future::BoxFuture;

use crate::error::AppError;

/// A fully prepared outbound request.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: http::Method,
    pub url: String,
    /// Header name/value pairs, already ordered and signed.
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Response surface the pipeline needs: status plus raw body bytes.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Underlying HTTP client used for the actual network call.
pub trait HttpTransport: Send + Sync {
    fn execute(
        &self,
        request: OutgoingRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, AppError>>;
}

impl HttpTransport for reqwest::Client {
    fn execute(
        &self,
        request: OutgoingRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, AppError>> {
        Box::pin(async move {
            let url = request.url.clone();
            let mut builder = self.request(request.method, &request.url);

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| AppError::Federation(format!("request to {} failed: {}", url, e)))?;

            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| {
                    AppError::Federation(format!("reading response from {} failed: {}", url, e))
                })?
                .to_vec();

            Ok(TransportResponse { status, body })
        })
    }
}
