//! Webhook signature verification and event parsing.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex hmac>`, where
//! the HMAC-SHA256 is taken over `"{t}.{payload}"` with the shared secret.

use super::PaymentEvent;
use crate::config::WebhookConfig;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl AsRef<[u8]>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            tolerance_secs,
        }
    }

    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(config.secret.as_bytes(), config.tolerance_secs)
    }

    fn mac(&self, payload: &[u8], timestamp: i64) -> AppResult<HmacSha256> {
        if self.secret.is_empty() {
            return Err(AppError::InvalidWebhook(
                "webhook secret is not configured".to_string(),
            ));
        }
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Config(format!("HMAC key error: {}", e)))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Build the signature header a processor would send for `payload`
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> AppResult<String> {
        let digest = self.mac(payload, timestamp)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
    }

    /// Check the header's signature and timestamp window
    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> AppResult<()> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| AppError::InvalidWebhook("missing signature timestamp".to_string()))?;
        if (now.timestamp() - timestamp).abs() > self.tolerance_secs {
            return Err(AppError::InvalidWebhook(
                "signature timestamp outside tolerance".to_string(),
            ));
        }

        for signature in signatures {
            let Ok(expected) = hex::decode(signature) else {
                continue;
            };
            if self.mac(payload, timestamp)?.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }

        Err(AppError::InvalidWebhook("signature mismatch".to_string()))
    }

    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> AppResult<PaymentEvent> {
        self.verify(payload, header, now)?;
        parse_event(payload)
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Debug, Deserialize)]
struct RawData {
    object: RawObject,
}

#[derive(Debug, Deserialize)]
struct RawObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    failure_message: Option<String>,
    last_payment_error: Option<RawPaymentError>,
}

#[derive(Debug, Deserialize)]
struct RawPaymentError {
    message: Option<String>,
}

fn metadata_uuid(metadata: &HashMap<String, String>, key: &str) -> AppResult<Option<Uuid>> {
    match metadata.get(key) {
        Some(value) => Uuid::parse_str(value).map(Some).map_err(|_| {
            AppError::InvalidWebhook(format!("invalid {} in metadata: {}", key, value))
        }),
        None => Ok(None),
    }
}

/// Parse a processor event body into a [`PaymentEvent`]
pub fn parse_event(payload: &[u8]) -> AppResult<PaymentEvent> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| AppError::InvalidWebhook(format!("malformed event: {}", e)))?;

    let account_id = metadata_uuid(&raw.data.object.metadata, "account_id")?;
    let record_id = metadata_uuid(&raw.data.object.metadata, "record_id")?;
    let object = raw.data.object;

    let event = match raw.event_type.as_str() {
        "payment_intent.succeeded" => PaymentEvent::ChargeSucceeded {
            event_id: raw.id,
            intent_id: object.id,
            account_id,
        },
        "payment_intent.payment_failed" => PaymentEvent::ChargeFailed {
            event_id: raw.id,
            intent_id: object.id,
            account_id,
            reason: object
                .last_payment_error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "payment failed".to_string()),
        },
        "payout.paid" => PaymentEvent::PayoutPaid {
            event_id: raw.id,
            payout_id: object.id,
            account_id,
            record_id,
        },
        "payout.failed" => PaymentEvent::PayoutFailed {
            event_id: raw.id,
            payout_id: object.id,
            account_id,
            record_id,
            reason: object
                .failure_message
                .unwrap_or_else(|| "payout failed".to_string()),
        },
        _ => PaymentEvent::Unhandled {
            event_id: raw.id,
            event_type: raw.event_type.clone(),
        },
    };

    Ok(event)
}
