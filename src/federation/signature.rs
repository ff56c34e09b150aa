//! HTTP Signatures for ActivityPub
//!
//! Outbound signing over a configurable header set, plus verification of
//! inbound signatures per:
//! https://docs.joinmastodon.org/spec/security/

use crate::error::AppError;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::{RsaPublicKey, pkcs1v15::Signature as Pkcs1v15Signature};
use sha2::{Digest, Sha256};

/// Header names a signer knows how to produce.
const SIGNABLE_HEADERS: &[&str] = &["(request-target)", "host", "date", "digest"];

/// Signs one HTTP method's header set with one actor's key.
///
/// A transport holds two of these, one configured with the GET header set
/// and one with the POST set, because different methods sign different
/// header subsets. A signer is immutable after construction, so concurrent
/// requests on clones of the same transport never share mutable state.
#[derive(Clone)]
pub struct RequestSigner {
    signing_key: rsa::pkcs1v15::SigningKey<Sha256>,
    key_id: String,
    algorithm: String,
    headers: Vec<String>,
}

impl RequestSigner {
    /// Build a signer over `headers` (lowercased on entry).
    ///
    /// Rejects an empty set and names the signer cannot produce; the
    /// controller additionally enforces the per-method required headers.
    pub fn new(
        private_key: rsa::RsaPrivateKey,
        key_id: &str,
        algorithm: &str,
        headers: &[String],
    ) -> Result<Self, AppError> {
        if headers.is_empty() {
            return Err(AppError::Validation(
                "signed header set must not be empty".to_string(),
            ));
        }

        let headers: Vec<String> = headers.iter().map(|h| h.to_ascii_lowercase()).collect();
        for name in &headers {
            if !SIGNABLE_HEADERS.contains(&name.as_str()) {
                return Err(AppError::Validation(format!(
                    "unsupported header in signed set: {}",
                    name
                )));
            }
        }

        Ok(Self {
            signing_key: rsa::pkcs1v15::SigningKey::<Sha256>::new_unprefixed(private_key),
            key_id: key_id.to_string(),
            algorithm: algorithm.to_string(),
            headers,
        })
    }

    /// Sign a request, returning the full `Signature` header value.
    ///
    /// # Arguments
    /// * `method` - HTTP method (e.g., "POST")
    /// * `url` - Full URL being requested
    /// * `date` - Date header value already placed on the request
    /// * `digest` - Digest header value, required when the set signs digest
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        date: &str,
        digest: Option<&str>,
    ) -> Result<String, AppError> {
        let parsed_url = url::Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        let host = parsed_url
            .host_str()
            .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;

        let path = parsed_url.path();
        let path_and_query = if let Some(query) = parsed_url.query() {
            format!("{}?{}", path, query)
        } else {
            path.to_string()
        };

        let request_target = format!("{} {}", method.to_lowercase(), path_and_query);

        let mut signing_parts = Vec::with_capacity(self.headers.len());
        for name in &self.headers {
            let value = match name.as_str() {
                "(request-target)" => request_target.clone(),
                "host" => host.to_string(),
                "date" => date.to_string(),
                "digest" => digest
                    .ok_or_else(|| {
                        AppError::Validation(
                            "digest is in the signed set but no digest was provided".to_string(),
                        )
                    })?
                    .to_string(),
                _ => unreachable!("header set validated at construction"),
            };
            signing_parts.push(format!("{}: {}", name, value));
        }

        let signing_string = signing_parts.join("\n");

        use rsa::signature::{RandomizedSigner, SignatureEncoding};

        let mut rng = rand::thread_rng();
        let signature = self
            .signing_key
            .sign_with_rng(&mut rng, signing_string.as_bytes());
        let signature_b64 = BASE64.encode(signature.to_bytes());

        Ok(format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            self.algorithm,
            self.headers.join(" "),
            signature_b64
        ))
    }
}

/// Verify an inbound HTTP request signature
///
/// # Arguments
/// * `method` - HTTP method
/// * `path` - Request path
/// * `headers` - All request headers
/// * `body` - Request body (for digest verification)
/// * `public_key_pem` - RSA public key in PEM format
/// * `now` - Current time, injected for deterministic Date-freshness checks
///
/// # Returns
/// Ok if signature is valid
pub fn verify_signature(
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: Option<&[u8]>,
    public_key_pem: &str,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    // 1. Parse Signature header
    let signature_header = headers
        .get("signature")
        .ok_or_else(|| AppError::Validation("Missing Signature header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Validation("Invalid Signature header".to_string()))?;

    let parsed = parse_signature_header(signature_header)?;

    // 2. Validate algorithm and required signed headers.
    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(AppError::Validation(format!(
            "Unsupported signature algorithm: {}",
            parsed.algorithm
        )));
    }

    for required in ["(request-target)", "host", "date"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(AppError::Validation(format!(
                "Signed headers must include: {}",
                required
            )));
        }
    }

    if body.is_some() && !parsed.headers.iter().any(|h| h == "digest") {
        return Err(AppError::Validation(
            "Signed headers must include: digest".to_string(),
        ));
    }

    // 3. Verify Date is recent (within 5 minutes).
    let date_header = headers
        .get("date")
        .ok_or_else(|| AppError::Validation("Missing Date header".to_string()))?;
    let date_str = date_header
        .to_str()
        .map_err(|_| AppError::Validation("Invalid Date header".to_string()))?;

    let date = DateTime::parse_from_rfc2822(date_str)
        .map_err(|_| AppError::Validation("Invalid Date format".to_string()))?;

    let diff = (now.timestamp() - date.timestamp()).abs();
    if diff > 300 {
        return Err(AppError::Validation(
            "Date header too old or in future".to_string(),
        ));
    }

    // 4. If body present, verify Digest.
    if let Some(body_data) = body {
        let digest_header = headers
            .get("digest")
            .ok_or_else(|| AppError::Validation("Missing Digest header".to_string()))?;
        let digest_str = digest_header
            .to_str()
            .map_err(|_| AppError::Validation("Invalid Digest header".to_string()))?;

        let expected_digest = generate_digest(body_data);
        if digest_str != expected_digest {
            return Err(AppError::Validation("Digest mismatch".to_string()));
        }
    }

    // 5. Reconstruct signing string.
    let mut signing_parts = Vec::new();

    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path),
            "host" | "date" | "digest" => headers
                .get(header_name.as_str())
                .ok_or_else(|| {
                    AppError::Validation(format!("Missing {} header", header_name))
                })?
                .to_str()
                .map_err(|_| AppError::Validation(format!("Invalid {} header", header_name)))?
                .to_string(),
            _ => {
                return Err(AppError::Validation(format!(
                    "Unsupported header in signature: {}",
                    header_name
                )));
            }
        };

        signing_parts.push(format!("{}: {}", header_name, value));
    }

    let signing_string = signing_parts.join("\n");

    // 6. Verify RSA signature.
    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| AppError::Validation("Invalid signature encoding".to_string()))?;

    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| AppError::Validation(format!("Invalid public key: {}", e)))?;

    // Use new_unprefixed for compatibility with common fediverse stacks.
    let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new_unprefixed(public_key);

    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| AppError::Validation(format!("Invalid signature format: {}", e)))?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| AppError::Validation("Signature verification failed".to_string()))?;

    Ok(())
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {} // Ignore unknown fields
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| AppError::Validation("Missing keyId".to_string()))?,
        algorithm: algorithm
            .ok_or_else(|| AppError::Validation("Missing algorithm".to_string()))?,
        headers: headers.ok_or_else(|| AppError::Validation("Missing headers".to_string()))?,
        signature: signature
            .ok_or_else(|| AppError::Validation("Missing signature".to_string()))?,
    })
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Format a timestamp as an RFC 2822 HTTP Date header value.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    fn generate_test_keypair() -> (RsaPrivateKey, String) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work");
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .expect("public key pem");
        (private_key, public_key_pem)
    }

    fn post_header_set() -> Vec<String> {
        ["(request-target)", "host", "date", "digest"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn build_signed_header_map(
        method: &str,
        url: &str,
        body: &[u8],
        private_key: RsaPrivateKey,
    ) -> (HeaderMap, String) {
        let key_id = "https://remote.example/users/alice#main-key";
        let signer =
            RequestSigner::new(private_key, key_id, "rsa-sha256", &post_header_set()).unwrap();

        let date = http_date(Utc::now());
        let digest = generate_digest(body);
        let signature = signer.sign(method, url, &date, Some(&digest)).unwrap();

        let parsed_url = url::Url::parse(url).expect("valid test url");
        let host = parsed_url.host_str().expect("host");
        let path = parsed_url.path();
        let path_and_query = if let Some(query) = parsed_url.query() {
            format!("{}?{}", path, query)
        } else {
            path.to_string()
        };

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(host).expect("host header"));
        headers.insert("date", HeaderValue::from_str(&date).expect("date header"));
        headers.insert(
            "digest",
            HeaderValue::from_str(&digest).expect("digest header"),
        );
        headers.insert(
            "signature",
            HeaderValue::from_str(&signature).expect("signature header"),
        );

        (headers, path_and_query)
    }

    #[test]
    fn digest_is_pure_and_prefixed() {
        let payload = br#"{"type":"Create"}"#;
        let digest = generate_digest(payload);
        assert!(digest.starts_with("SHA-256="));
        assert_eq!(digest, generate_digest(payload));

        use base64::Engine;
        let expected = base64::engine::general_purpose::STANDARD
            .encode(sha2::Sha256::digest(payload));
        assert_eq!(digest, format!("SHA-256={}", expected));
    }

    #[test]
    fn signer_rejects_empty_header_set() {
        let (private_key, _) = generate_test_keypair();
        assert!(RequestSigner::new(private_key, "key", "rsa-sha256", &[]).is_err());
    }

    #[test]
    fn signer_rejects_unknown_header_name() {
        let (private_key, _) = generate_test_keypair();
        let headers = vec!["(request-target)".to_string(), "x-custom".to_string()];
        assert!(RequestSigner::new(private_key, "key", "rsa-sha256", &headers).is_err());
    }

    #[test]
    fn sign_without_digest_fails_when_set_requires_it() {
        let (private_key, _) = generate_test_keypair();
        let signer =
            RequestSigner::new(private_key, "key", "rsa-sha256", &post_header_set()).unwrap();
        let result = signer.sign("POST", "https://remote.example/inbox", "Mon, 01 Jan 2024 00:00:00 GMT", None);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn signature_header_carries_key_id_algorithm_and_headers() {
        let (private_key, _) = generate_test_keypair();
        let signer = RequestSigner::new(
            private_key,
            "https://local.example/users/alice#main-key",
            "rsa-sha256",
            &post_header_set(),
        )
        .unwrap();

        let date = http_date(Utc::now());
        let header = signer
            .sign("POST", "https://remote.example/inbox", &date, Some("SHA-256=x"))
            .unwrap();

        let parsed = parse_signature_header(&header).unwrap();
        assert_eq!(parsed.key_id, "https://local.example/users/alice#main-key");
        assert_eq!(parsed.algorithm, "rsa-sha256");
        assert_eq!(
            parsed.headers,
            vec!["(request-target)", "host", "date", "digest"]
        );
    }

    #[test]
    fn verify_signature_accepts_valid_signed_request() {
        let (private_key, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://remote.example/inbox?foo=bar",
            body,
            private_key,
        );

        let result = verify_signature(
            "POST",
            &path,
            &headers,
            Some(body),
            &public_key_pem,
            Utc::now(),
        );
        assert!(result.is_ok(), "valid signature should verify: {result:?}");
    }

    #[test]
    fn verify_signature_rejects_tampered_body() {
        let (private_key, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", body, private_key);

        let result = verify_signature(
            "POST",
            &path,
            &headers,
            Some(br#"{"type":"Block"}"#),
            &public_key_pem,
            Utc::now(),
        );
        match result {
            Err(AppError::Validation(msg)) => assert!(msg.contains("Digest mismatch")),
            other => panic!("expected digest mismatch, got: {other:?}"),
        }
    }

    #[test]
    fn verify_signature_rejects_stale_date() {
        let (private_key, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) =
            build_signed_header_map("POST", "https://remote.example/inbox", body, private_key);

        let future = Utc::now() + chrono::Duration::minutes(10);
        let result = verify_signature("POST", &path, &headers, Some(body), &public_key_pem, future);
        match result {
            Err(AppError::Validation(msg)) => assert!(msg.contains("Date header")),
            other => panic!("expected stale date error, got: {other:?}"),
        }
    }

    #[test]
    fn key_id_matches_actor_accepts_same_actor() {
        assert!(key_id_matches_actor(
            "https://remote.example/users/alice#main-key",
            "https://remote.example/users/alice",
        ));
        assert!(!key_id_matches_actor(
            "https://remote.example/users/bob#main-key",
            "https://remote.example/users/alice",
        ));
    }
}
