//! API request/response types.
//!
//! These are the JSON shapes exchanged with HTTP clients. Vendor wire types
//! live in [`crate::gemini`]; everything here is the gateway's own surface.

use serde::{Deserialize, Serialize};

fn default_language() -> String {
    "english".to_string()
}

/// Body of `POST /ask`.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default = "default_language")]
    pub language: String,
}

/// Response of `POST /ask`. `infographic_url` is only present when the
/// fallback chain produced an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub response: String,
    pub response_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infographic_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infographic_reason: Option<String>,
}

impl AskResponse {
    pub fn text(response: String) -> Self {
        Self {
            response,
            response_format: "text".to_string(),
            infographic_url: None,
            infographic_reason: None,
        }
    }
}

/// Crop-health diagnosis returned by `POST /scan-image`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Diagnosis {
    #[serde(default)]
    pub healthy: Option<bool>,
    #[serde(default)]
    pub disease: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub treatment: Option<String>,
    #[serde(default)]
    pub prevention: Option<String>,
    /// Raw model text, kept when the reply could not be parsed as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Diagnosis {
    /// Degraded result when the vendor call failed outright.
    pub fn unavailable() -> Self {
        Self {
            notes: Some("image analysis unavailable".to_string()),
            ..Default::default()
        }
    }

    /// Degraded result wrapping an unparseable model reply.
    pub fn from_raw(text: String) -> Self {
        Self {
            notes: Some(text),
            ..Default::default()
        }
    }
}

/// Sugarcane-vs-weed classification returned by `POST /classify-plant`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub classification: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub plant_type: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub characteristics: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

impl Classification {
    pub fn unknown(details: impl Into<String>) -> Self {
        Self {
            classification: "unknown".to_string(),
            confidence: 0.0,
            plant_type: None,
            details: Some(details.into()),
            characteristics: None,
            recommendation: None,
        }
    }
}

/// Model decision on whether an answer deserves an accompanying infographic.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InfographicDecision {
    #[serde(default)]
    pub needed: bool,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response of `POST /upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub file: String,
    /// True when identical content was already in the store and no remote
    /// upload was performed.
    pub deduplicated: bool,
    /// False when the vendor ingestion failed; the file is kept locally and
    /// the request still succeeds.
    pub indexed: bool,
}

/// Response of `POST /webhook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookReply {
    pub reply: String,
}
