use axum::body::Bytes;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::{limits, AppConfig};
use crate::error::{AppError, Result};
use crate::models::{now, VerifiedWebhookData};
use crate::rate_limiter::RateLimiter;
use crate::secrets::SecretRegistry;

type HmacSha256 = Hmac<Sha256>;

/// Everything needed to admit or reject an inbound webhook delivery before
/// it is ever handed to the dispatcher: secret resolution, header
/// presence, timestamp freshness, IP allowlisting, rate limiting, and
/// HMAC signature verification.
pub struct Gatekeeper {
    secrets: SecretRegistry,
    rate_limiter: RateLimiter,
    config: AppConfig,
}

impl Gatekeeper {
    pub fn new(secrets: SecretRegistry, config: AppConfig) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit_per_minute);
        Self {
            secrets,
            rate_limiter,
            config,
        }
    }

    /// Runs the full admission check and, on success, returns the verified
    /// body alongside the signature and timestamp that will be stored on
    /// the resulting `WebhookEvent`.
    pub fn verify(
        &self,
        provider: &str,
        headers: &HeaderMap,
        client_ip: &str,
        body: &Bytes,
    ) -> Result<VerifiedWebhookData> {
        let key_id = header_str(headers, "x-webhook-key-id");
        let candidates = self.secrets.candidates(provider, key_id);
        if candidates.is_empty() {
            return Err(AppError::Unauthorized("unknown webhook provider".to_string()));
        }

        let timestamp_header = header_str(headers, "x-webhook-timestamp")
            .ok_or_else(|| AppError::Unauthorized("missing webhook signature headers".to_string()))?;
        let signature = header_str(headers, "x-webhook-signature")
            .ok_or_else(|| AppError::Unauthorized("missing webhook signature headers".to_string()))?;

        let timestamp: i64 = timestamp_header
            .parse()
            .map_err(|_| AppError::Unauthorized("invalid webhook timestamp".to_string()))?;

        let now_ts = now().and_utc().timestamp();
        if (now_ts - timestamp).abs() > limits::MAX_TIMESTAMP_SKEW_SECONDS {
            return Err(AppError::Unauthorized(
                "webhook timestamp outside allowed window".to_string(),
            ));
        }

        if !self.config.ip_allowlist.is_empty() && !self.config.ip_allowlist.contains(client_ip) {
            return Err(AppError::Forbidden("ip not allowed".to_string()));
        }

        let rate_key = format!("{provider}:{client_ip}");
        if !self.rate_limiter.check(&rate_key, now_ts) {
            return Err(AppError::RateLimited);
        }

        let signed_payload = signed_payload(timestamp, body);
        let signature_ok = candidates
            .iter()
            .any(|secret| constant_time_matches(secret, &signed_payload, signature));
        if !signature_ok {
            return Err(AppError::Forbidden("invalid webhook signature".to_string()));
        }

        let raw_body = String::from_utf8(body.to_vec()).map_err(|_| AppError::BadEncoding)?;

        Ok(VerifiedWebhookData {
            raw_body,
            signature: signature.to_string(),
            timestamp,
        })
    }
}

fn signed_payload(timestamp: i64, body: &Bytes) -> Vec<u8> {
    let mut out = format!("{timestamp}.").into_bytes();
    out.extend_from_slice(body);
    out
}

fn constant_time_matches(secret: &str, signed_payload: &[u8], signature: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed_payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    secure_compare(&expected, signature)
}

/// Constant-time comparison: bails early only on length mismatch, which
/// leaks no information about where bytes differ.
fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
