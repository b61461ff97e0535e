//! Infographic decision and generation.
//!
//! A two-model fallback chain: first check the exchange against a fixed list
//! of showcase trigger phrases (those always generate, regardless of model
//! judgment), otherwise ask the text model for a structured yes/no/style
//! decision, and only then call the image model. Any stage failing degrades
//! to "no infographic" — the primary text answer is never blocked.

use std::path::Path;
use uuid::Uuid;

use crate::config::Config;
use crate::extract::extract_as;
use crate::gemini::ModelClient;
use crate::models::InfographicDecision;

/// Showcase trigger phrases. A question or answer containing any of these
/// forces infographic generation.
pub const SHOWCASE_TRIGGERS: [&str; 5] = [
    "sugarcane growth stages",
    "fertilizer schedule",
    "irrigation methods",
    "disease identification",
    "sugarcane varieties",
];

/// Subdirectory of the upload dir where generated images land.
pub const INFOGRAPHIC_DIR: &str = "infographics";

/// Case-insensitive trigger match over the combined exchange text.
pub fn matched_trigger(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    SHOWCASE_TRIGGERS
        .iter()
        .find(|phrase| lowered.contains(*phrase))
        .copied()
}

/// Decide whether this exchange deserves an infographic.
///
/// Trigger phrases short-circuit the model entirely; otherwise the text model
/// is asked for a strict-JSON decision, parsed permissively. A failed or
/// unparseable decision means "not needed".
pub async fn decide(
    model: &dyn ModelClient,
    question: &str,
    answer: &str,
) -> InfographicDecision {
    let combined = format!("{} {}", question, answer);
    if let Some(phrase) = matched_trigger(&combined) {
        return InfographicDecision {
            needed: true,
            style: Some("labeled step-by-step diagram".to_string()),
            reason: Some(format!("showcase topic: {}", phrase)),
        };
    }

    let prompt = format!(
        "A farmer asked: \"{}\"\n\nThe advisory answer was:\n{}\n\n\
         Would a single infographic image meaningfully help this farmer? \
         Reply with strict JSON only, no prose:\n\
         {{\"needed\": true|false, \"style\": \"<short visual style>\", \"reason\": \"<one sentence>\"}}",
        question, answer
    );

    match model.generate(&prompt, None).await {
        Ok(text) => extract_as::<InfographicDecision>(&text).unwrap_or_else(|| {
            tracing::debug!("infographic decision reply was not parseable JSON");
            InfographicDecision::default()
        }),
        Err(e) => {
            tracing::warn!(error = %e, "infographic decision call failed");
            InfographicDecision::default()
        }
    }
}

/// Run the full chain: decide, generate, persist. Returns the relative URL
/// and the reason, or `None` on any failure or a negative decision.
pub async fn maybe_generate(
    model: &dyn ModelClient,
    config: &Config,
    question: &str,
    answer: &str,
) -> Option<(String, String)> {
    let decision = decide(model, question, answer).await;
    if !decision.needed {
        return None;
    }

    let style = decision
        .style
        .unwrap_or_else(|| "clean agricultural infographic".to_string());
    let reason = decision
        .reason
        .unwrap_or_else(|| "visual summary of the advice".to_string());

    let prompt = format!(
        "Create a single {} infographic for sugarcane farmers summarizing the \
         following advice. Use clear labels and minimal text.\n\nQuestion: {}\n\nAdvice:\n{}",
        style, question, answer
    );

    let image = match model.generate_image(&prompt).await {
        Ok(image) => image,
        Err(e) => {
            tracing::warn!(error = %e, "infographic generation failed");
            return None;
        }
    };

    match persist(&config.server.upload_dir, &image.bytes) {
        Ok(url) => Some((url, reason)),
        Err(e) => {
            tracing::warn!(error = %e, "could not persist infographic");
            None
        }
    }
}

/// Write the image under `<upload_dir>/infographics/` and return the URL path
/// it will be served from.
fn persist(upload_dir: &Path, bytes: &[u8]) -> anyhow::Result<String> {
    let dir = upload_dir.join(INFOGRAPHIC_DIR);
    std::fs::create_dir_all(&dir)?;
    let file_name = format!("infographic-{}.png", Uuid::new_v4());
    std::fs::write(dir.join(&file_name), bytes)?;
    Ok(format!("/uploads/{}/{}", INFOGRAPHIC_DIR, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::{GeneratedImage, Operation};
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    /// Fake that always answers "no" (or errors) on the decision call.
    struct Reluctant {
        error_on_generate: bool,
    }

    #[async_trait]
    impl ModelClient for Reluctant {
        async fn generate(&self, _prompt: &str, _store: Option<&str>) -> Result<String> {
            if self.error_on_generate {
                bail!("model down");
            }
            Ok("{\"needed\": false}".to_string())
        }
        async fn generate_vision(&self, _p: &str, _m: &str, _i: &[u8]) -> Result<String> {
            bail!("unused")
        }
        async fn generate_image(&self, _prompt: &str) -> Result<GeneratedImage> {
            Ok(GeneratedImage {
                mime_type: "image/png".to_string(),
                bytes: vec![0x89, 0x50, 0x4e, 0x47],
            })
        }
        async fn create_store(&self, _d: &str) -> Result<String> {
            bail!("unused")
        }
        async fn upload_to_store(
            &self,
            _s: &str,
            _f: &str,
            _m: &str,
            _b: Vec<u8>,
        ) -> Result<Operation> {
            bail!("unused")
        }
        async fn get_operation(&self, _n: &str) -> Result<Operation> {
            bail!("unused")
        }
    }

    #[test]
    fn trigger_match_is_case_insensitive() {
        assert_eq!(
            matched_trigger("Tell me about SUGARCANE GROWTH STAGES please"),
            Some("sugarcane growth stages")
        );
        assert_eq!(matched_trigger("how do I plant rice"), None);
    }

    #[tokio::test]
    async fn trigger_forces_decision_over_model_no() {
        let model = Reluctant {
            error_on_generate: false,
        };
        for phrase in SHOWCASE_TRIGGERS {
            let decision = decide(&model, &format!("about {}", phrase), "answer").await;
            assert!(decision.needed, "trigger '{}' must force generation", phrase);
        }
    }

    #[tokio::test]
    async fn trigger_forces_decision_even_when_model_errors() {
        let model = Reluctant {
            error_on_generate: true,
        };
        let decision = decide(&model, "what is the fertilizer schedule?", "answer").await;
        assert!(decision.needed);
    }

    #[tokio::test]
    async fn trigger_in_answer_also_counts() {
        let model = Reluctant {
            error_on_generate: false,
        };
        let decision = decide(&model, "help me", "consider these irrigation methods").await;
        assert!(decision.needed);
    }

    #[tokio::test]
    async fn model_no_means_no_infographic() {
        let model = Reluctant {
            error_on_generate: false,
        };
        let decision = decide(&model, "how do I plant rice", "like this").await;
        assert!(!decision.needed);
    }

    #[tokio::test]
    async fn decision_failure_degrades_to_none() {
        let model = Reluctant {
            error_on_generate: true,
        };
        let decision = decide(&model, "how do I plant rice", "like this").await;
        assert!(!decision.needed);
    }

    #[tokio::test]
    async fn generation_persists_png_under_uploads() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.upload_dir = tmp.path().to_path_buf();

        let model = Reluctant {
            error_on_generate: false,
        };
        let (url, reason) =
            maybe_generate(&model, &config, "explain sugarcane varieties", "answer")
                .await
                .unwrap();

        assert!(url.starts_with("/uploads/infographics/infographic-"));
        assert!(url.ends_with(".png"));
        assert!(reason.contains("sugarcane varieties"));

        let file_name = url.rsplit('/').next().unwrap();
        let on_disk = tmp.path().join(INFOGRAPHIC_DIR).join(file_name);
        assert_eq!(std::fs::read(on_disk).unwrap(), vec![0x89, 0x50, 0x4e, 0x47]);
    }
}
