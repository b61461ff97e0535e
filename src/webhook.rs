//! Tolerant webhook payload parsing and verification.
//!
//! The `/webhook` endpoint accepts three payload shapes, tried in order:
//!
//! 1. simple: `{"chat": "...", "language": "..."}`
//! 2. relay:  `{"payload": {"text": "..."}, "language": "..."}`
//! 3. WhatsApp-style nested:
//!    `{"entry":[{"changes":[{"value":{"messages":[{"text":{"body":"..."}}]}}]}]}`
//!
//! All three extract the same message text for equivalent content. GET
//! verification echoes `hub.challenge` when `hub.verify_token` matches the
//! configured token; POST bodies can additionally be authenticated with an
//! `X-Hub-Signature-256` HMAC when an app secret is configured.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A message recovered from any of the tolerated payload shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub text: String,
    pub language: String,
}

/// Extract the message text and language from a webhook payload.
///
/// Returns `None` when no shape matches or the message text is empty.
pub fn parse_payload(payload: &Value) -> Option<IncomingMessage> {
    let text = simple_shape(payload)
        .or_else(|| relay_shape(payload))
        .or_else(|| whatsapp_shape(payload))?;

    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let language = payload
        .get("language")
        .and_then(|l| l.as_str())
        .unwrap_or("english")
        .to_string();

    Some(IncomingMessage {
        text: text.to_string(),
        language,
    })
}

fn simple_shape(payload: &Value) -> Option<String> {
    payload
        .get("chat")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}

fn relay_shape(payload: &Value) -> Option<String> {
    payload
        .get("payload")
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
}

fn whatsapp_shape(payload: &Value) -> Option<String> {
    payload
        .get("entry")?
        .get(0)?
        .get("changes")?
        .get(0)?
        .get("value")?
        .get("messages")?
        .get(0)?
        .get("text")?
        .get("body")?
        .as_str()
        .map(|s| s.to_string())
}

/// Verify an `X-Hub-Signature-256` header (`sha256=<hex>`) against the body.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
