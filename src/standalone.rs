//! Client for self-hosted companion apps
//!
//! Protocol:
//! - `GET  /api/v1/health`           -> `{status, publicKey?}`
//! - `POST /api/v1/revenue`          -> `{data: [RevenueDataPoint]}`
//! - `POST /api/v1/revenue/signed`   -> `{data, signature, publicKey, timestamp}`
//!
//! All requests carry the shared API key in `X-API-Key`. The signed path is
//! the default for syncing: it fails hard on a bad signature and never
//! returns unverified data. A stale signature only logs, lag is not forgery.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

use crate::crypto;
use crate::models::RevenueDataPoint;
use crate::provider::{Interval, SourceError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueRequest {
    pub start_date: String,
    pub end_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlainRevenueResponse {
    data: Vec<RevenueDataPoint>,
}

/// Signed envelope returned by the signed revenue endpoint. `data` is the
/// exact JSON string the signature covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedEnvelope {
    pub data: String,
    pub signature: String,
    pub public_key: String,
    /// Epoch milliseconds at signing time.
    pub timestamp: i64,
}

/// Signed-fetch result: the parsed points plus the key that verified them,
/// so first-contact keys can be pinned on the connection.
#[derive(Debug, Clone)]
pub struct VerifiedRevenue {
    pub points: Vec<RevenueDataPoint>,
    pub public_key: String,
}

pub struct StandaloneClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Public key pinned on the connection, preferred over the envelope's.
    stored_public_key: Option<String>,
    freshness: Duration,
}

impl StandaloneClient {
    pub fn new(
        endpoint_url: &str,
        api_key: String,
        stored_public_key: Option<String>,
        freshness_minutes: i64,
        request_timeout_secs: u64,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(StdDuration::from_secs(request_timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: endpoint_url.trim_end_matches('/').to_string(),
            api_key,
            stored_public_key,
            freshness: Duration::minutes(freshness_minutes),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Health probe: anything except an explicit "unhealthy" counts as
    /// reachable. Network failure counts as unreachable.
    pub async fn validate_connection(&self) -> bool {
        let response = self
            .client
            .get(self.url("/api/v1/health"))
            .header("X-API-Key", &self.api_key)
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => match r.json::<HealthResponse>().await {
                Ok(health) => health.status != "unhealthy",
                Err(e) => {
                    debug!("Malformed health response from {}: {}", self.base_url, e);
                    false
                }
            },
            Ok(r) => {
                debug!("Health check on {} returned {}", self.base_url, r.status());
                false
            }
            Err(e) => {
                debug!("Health check on {} failed: {}", self.base_url, e);
                false
            }
        }
    }

    /// Plain fetch, authenticated only by the shared API key header.
    pub async fn fetch_revenue(
        &self,
        request: &RevenueRequest,
    ) -> Result<Vec<RevenueDataPoint>, SourceError> {
        let response = self
            .client
            .post(self.url("/api/v1/revenue"))
            .header("X-API-Key", &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Protocol(format!(
                "revenue request failed with {}",
                response.status()
            )));
        }

        let body: PlainRevenueResponse = response.json().await?;
        Ok(body.data)
    }

    /// Signed fetch: verifies the envelope before parsing any data.
    pub async fn fetch_signed_revenue(
        &self,
        request: &RevenueRequest,
    ) -> Result<VerifiedRevenue, SourceError> {
        let response = self
            .client
            .post(self.url("/api/v1/revenue/signed"))
            .header("X-API-Key", &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Protocol(format!(
                "signed revenue request failed with {}",
                response.status()
            )));
        }

        let envelope: SignedEnvelope = response.json().await?;
        verify_envelope(&envelope, self.stored_public_key.as_deref(), self.freshness)
    }
}

/// Verify a signed envelope and parse its payload. The stored key wins when
/// present; an envelope-embedded key is accepted on first contact only.
pub fn verify_envelope(
    envelope: &SignedEnvelope,
    stored_public_key: Option<&str>,
    freshness: Duration,
) -> Result<VerifiedRevenue, SourceError> {
    let key = stored_public_key.unwrap_or(&envelope.public_key);

    if !crypto::verify_signature(envelope.data.as_bytes(), &envelope.signature, key) {
        return Err(SourceError::SignatureVerification(
            "envelope signature does not match".to_string(),
        ));
    }

    if let Some(signed_at) = DateTime::<Utc>::from_timestamp_millis(envelope.timestamp) {
        if crypto::is_stale(signed_at, freshness) {
            warn!(
                "Signed payload is stale (signed at {}, window {} min)",
                signed_at,
                freshness.num_minutes()
            );
        }
    } else {
        warn!("Signed payload carries invalid timestamp {}", envelope.timestamp);
    }

    let points: Vec<RevenueDataPoint> = serde_json::from_str(&envelope.data)
        .map_err(|e| SourceError::Protocol(format!("invalid signed payload: {e}")))?;

    Ok(VerifiedRevenue {
        points,
        public_key: key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use ed25519_dalek::{Signer, SigningKey};

    fn signed_envelope(key: &SigningKey, data: &str, age: Duration) -> SignedEnvelope {
        SignedEnvelope {
            data: data.to_string(),
            signature: BASE64.encode(key.sign(data.as_bytes()).to_bytes()),
            public_key: BASE64.encode(key.verifying_key().as_bytes()),
            timestamp: (Utc::now() - age).timestamp_millis(),
        }
    }

    const PAYLOAD: &str = r#"[{"date":"2026-05-01","revenue":1200.5,"mrr":1200.5,"currency":"usd"}]"#;

    #[test]
    fn valid_envelope_parses_unchanged() {
        let key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let envelope = signed_envelope(&key, PAYLOAD, Duration::zero());

        let verified = verify_envelope(&envelope, None, Duration::minutes(10)).unwrap();
        assert_eq!(verified.points.len(), 1);
        assert_eq!(verified.points[0].revenue, 1200.5);
        assert_eq!(verified.public_key, envelope.public_key);
    }

    #[test]
    fn tampered_signature_fails_closed() {
        let key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let mut envelope = signed_envelope(&key, PAYLOAD, Duration::zero());

        // Flip one bit of the signature
        let mut sig = BASE64.decode(&envelope.signature).unwrap();
        sig[0] ^= 0x01;
        envelope.signature = BASE64.encode(sig);

        let result = verify_envelope(&envelope, None, Duration::minutes(10));
        assert!(matches!(
            result,
            Err(SourceError::SignatureVerification(_))
        ));
    }

    #[test]
    fn tampered_data_fails_closed() {
        let key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let mut envelope = signed_envelope(&key, PAYLOAD, Duration::zero());
        envelope.data = envelope.data.replace("1200.5", "9200.5");

        assert!(verify_envelope(&envelope, None, Duration::minutes(10)).is_err());
    }

    #[test]
    fn stored_key_overrides_embedded_key() {
        let real_key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let attacker_key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());

        // Attacker signs with their own key and embeds their public key
        let envelope = signed_envelope(&attacker_key, PAYLOAD, Duration::zero());
        let stored = BASE64.encode(real_key.verifying_key().as_bytes());

        let result = verify_envelope(&envelope, Some(&stored), Duration::minutes(10));
        assert!(result.is_err());
    }

    #[test]
    fn stale_envelope_still_verifies() {
        let key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let envelope = signed_envelope(&key, PAYLOAD, Duration::minutes(45));

        // Staleness warns, it does not reject
        assert!(verify_envelope(&envelope, None, Duration::minutes(10)).is_ok());
    }

    #[test]
    fn base_url_is_normalized() {
        let client = StandaloneClient::new("https://app.example.com/", "key".to_string(), None, 10, 30);
        assert_eq!(client.url("/api/v1/health"), "https://app.example.com/api/v1/health");
    }
}
