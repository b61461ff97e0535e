//! Ask / scan-image / classify-plant pipelines.
//!
//! Each pipeline is a prompt-shaping routine around one vendor call plus a
//! permissive parse of the reply. Vendor failures bubble up as errors; the
//! HTTP layer maps them to degraded 200-responses per the gateway's failure
//! policy.

use anyhow::Result;

use crate::config::Config;
use crate::extract::{extract_as, extract_json};
use crate::gemini::ModelClient;
use crate::infographic;
use crate::models::{Classification, Diagnosis};
use crate::store::StoreSync;

/// Languages the UI offers. Anything else falls back to english.
pub const SUPPORTED_LANGUAGES: [&str; 7] = [
    "english", "hindi", "marathi", "tamil", "telugu", "kannada", "punjabi",
];

pub fn normalize_language(language: &str) -> &'static str {
    let lowered = language.trim().to_lowercase();
    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| **l == lowered)
        .copied()
        .unwrap_or("english")
}

/// Result of the full `/ask` pipeline.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub response: String,
    /// `(relative_url, reason)` when the infographic chain produced an image.
    pub infographic: Option<(String, String)>,
}

/// Grounded advisory answer plus the infographic fallback chain.
///
/// Grounding is skipped (not fatal) when the store is unavailable. An
/// infographic failure never blocks the text answer.
pub async fn ask(
    config: &Config,
    model: &dyn ModelClient,
    store: &StoreSync,
    question: &str,
    language: &str,
) -> Result<AskOutcome> {
    let language = normalize_language(language);
    let prompt = format!(
        "You are an experienced sugarcane farming advisor. Ground your answer \
         in the indexed knowledge documents where relevant, and keep it \
         practical for a smallholder farmer. Answer in {}.\n\nQuestion: {}",
        language, question
    );

    let store_name = store.store_if_available().await;
    let response = model.generate(&prompt, store_name.as_deref()).await?;

    let infographic = infographic::maybe_generate(model, config, question, &response).await;

    Ok(AskOutcome {
        response,
        infographic,
    })
}

/// Crop-health diagnosis over an uploaded field photo.
///
/// `hint` is an optional caller-supplied prompt to steer the analysis
/// (e.g. "Is this showing red rot?").
pub async fn scan_image(
    model: &dyn ModelClient,
    language: &str,
    hint: Option<&str>,
    mime_type: &str,
    image: &[u8],
) -> Result<Diagnosis> {
    let language = normalize_language(language);
    let mut prompt = format!(
        "You are a sugarcane crop-health expert. Examine this field photo and \
         reply with strict JSON only:\n\
         {{\"healthy\": true|false, \"disease\": \"<name or null>\", \
         \"confidence\": 0.0-1.0, \"symptoms\": [\"...\"], \
         \"treatment\": \"...\", \"prevention\": \"...\"}}\n\
         Write all free-text values in {}.",
        language
    );
    if let Some(hint) = hint {
        prompt.push_str(&format!("\nThe farmer asks: {}", hint));
    }

    let text = model.generate_vision(&prompt, mime_type, image).await?;
    Ok(parse_diagnosis(&text))
}

fn parse_diagnosis(text: &str) -> Diagnosis {
    match extract_json(text).and_then(|v| serde_json::from_value::<Diagnosis>(v).ok()) {
        Some(diagnosis) => diagnosis,
        None => {
            tracing::debug!("diagnosis reply was not parseable JSON, returning raw text");
            Diagnosis::from_raw(text.to_string())
        }
    }
}

/// Sugarcane-vs-weed classification over an uploaded photo.
pub async fn classify_plant(
    model: &dyn ModelClient,
    language: &str,
    mime_type: &str,
    image: &[u8],
) -> Result<Classification> {
    let language = normalize_language(language);
    let prompt = format!(
        "Classify the plant in this photo as sugarcane or weed. Reply with \
         strict JSON only:\n\
         {{\"classification\": \"sugarcane\"|\"weed\"|\"unknown\", \
         \"confidence\": 0.0-1.0, \"plant_type\": \"...\", \"details\": \"...\", \
         \"characteristics\": \"...\", \"recommendation\": \"...\"}}\n\
         Write all free-text values in {}.",
        language
    );

    let text = model.generate_vision(&prompt, mime_type, image).await?;
    Ok(parse_classification(&text))
}

fn parse_classification(text: &str) -> Classification {
    match extract_as::<Classification>(text) {
        Some(classification) => classification,
        None => {
            tracing::debug!("classification reply was not parseable JSON");
            Classification::unknown(text.to_string())
        }
    }
}
