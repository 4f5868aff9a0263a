//! Verification and parsing of gateway outcome notifications.
//!
//! Signatures use the `t=<unix ts>,v1=<hex hmac>` header scheme, where the
//! HMAC-SHA256 is taken over `"<t>.<raw body>"` with the endpoint secret.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum WebhookError {
    #[error("signature header is malformed")]
    MalformedHeader,
    #[error("signature timestamp is outside the tolerance window")]
    StaleTimestamp,
    #[error("no signature matched the payload")]
    SignatureMismatch,
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
    #[error("webhook secret is unusable")]
    InvalidSecret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    PaymentSucceeded { intent_id: String },
    PaymentFailed { intent_id: String, reason: Option<String> },
    Ignored { event_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub kind: WebhookEventKind,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: RawObject,
}

#[derive(Deserialize)]
struct RawObject {
    id: String,
    last_payment_error: Option<RawPaymentError>,
}

#[derive(Deserialize)]
struct RawPaymentError {
    message: Option<String>,
}

fn mac_for(secret: &str, timestamp: &str, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Builds a header value for `payload`, as the gateway would send it.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, WebhookError> {
    let timestamp = timestamp.to_string();
    let signature = hex::encode(mac_for(secret, &timestamp, payload)?.finalize().into_bytes());
    Ok(format!("t={},v1={}", timestamp, signature))
}

pub fn verify_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    let signed_at: i64 = timestamp.parse().map_err(|_| WebhookError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }
    let age = now.checked_sub(signed_at).map(i64::unsigned_abs);
    match age {
        Some(age) if age <= tolerance_secs.unsigned_abs() => {}
        _ => return Err(WebhookError::StaleTimestamp),
    }

    let mut matched = false;
    for candidate in candidates {
        if let Ok(bytes) = hex::decode(candidate) {
            if mac_for(secret, timestamp, payload)?.verify_slice(&bytes).is_ok() {
                matched = true;
                break;
            }
        }
    }
    if matched {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let raw: RawEvent =
        serde_json::from_slice(payload).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    let kind = match raw.event_type.as_str() {
        "payment_intent.succeeded" => WebhookEventKind::PaymentSucceeded {
            intent_id: raw.data.object.id,
        },
        "payment_intent.payment_failed" => WebhookEventKind::PaymentFailed {
            intent_id: raw.data.object.id,
            reason: raw.data.object.last_payment_error.and_then(|e| e.message),
        },
        other => WebhookEventKind::Ignored {
            event_type: other.to_string(),
        },
    };

    Ok(WebhookEvent {
        id: raw.id,
        event_type: raw.event_type,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let header = sign(BODY, SECRET, 1_700_000_000).unwrap();
        assert_eq!(verify_signature(&header, BODY, SECRET, 300, 1_700_000_100), Ok(()));
    }

    #[test]
    fn rejects_tampered_payload() {
        let header = sign(BODY, SECRET, 1_700_000_000).unwrap();
        let tampered = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_2"}}}"#;
        assert_eq!(
            verify_signature(&header, tampered, SECRET, 300, 1_700_000_000),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign(BODY, SECRET, 1_700_000_000).unwrap();
        assert_eq!(
            verify_signature(&header, BODY, SECRET, 300, 1_700_000_301),
            Err(WebhookError::StaleTimestamp)
        );
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        assert_eq!(
            verify_signature("t=-9223372036854775808,v1=00", BODY, SECRET, 300, 1_700_000_000),
            Err(WebhookError::StaleTimestamp)
        );
        assert_eq!(
            verify_signature("t=9223372036854775807,v1=00", BODY, SECRET, 300, -1_700_000_000),
            Err(WebhookError::StaleTimestamp)
        );
    }

    #[test]
    fn any_matching_v1_entry_is_enough() {
        let valid = sign(BODY, SECRET, 1_700_000_000).unwrap();
        let signature = valid.split_once(",v1=").unwrap().1;
        let header = format!("t=1700000000,v1=deadbeef,v1={}", signature);
        assert_eq!(verify_signature(&header, BODY, SECRET, 300, 1_700_000_000), Ok(()));
    }

    #[test]
    fn malformed_headers() {
        assert_eq!(
            verify_signature("v1=abc", BODY, SECRET, 300, 0),
            Err(WebhookError::MalformedHeader)
        );
        assert_eq!(
            verify_signature("t=12", BODY, SECRET, 300, 12),
            Err(WebhookError::MalformedHeader)
        );
    }

    #[test]
    fn parses_outcome_events() {
        let event = parse_event(BODY).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(
            event.kind,
            WebhookEventKind::PaymentSucceeded {
                intent_id: "pi_1".to_string()
            }
        );

        let failed = parse_event(
            br#"{"id":"evt_2","type":"payment_intent.payment_failed","data":{"object":{"id":"pi_9","last_payment_error":{"message":"Your card was declined."}}}}"#,
        )
        .unwrap();
        assert_eq!(
            failed.kind,
            WebhookEventKind::PaymentFailed {
                intent_id: "pi_9".to_string(),
                reason: Some("Your card was declined.".to_string()),
            }
        );
    }

    #[test]
    fn other_events_are_ignored() {
        let event = parse_event(
            br#"{"id":"evt_3","type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#,
        )
        .unwrap();
        assert_eq!(
            event.kind,
            WebhookEventKind::Ignored {
                event_type: "charge.refunded".to_string()
            }
        );
        assert!(matches!(parse_event(b"not json"), Err(WebhookError::InvalidPayload(_))));
    }
}
