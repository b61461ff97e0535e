//! Gemini API client.
//!
//! Wraps the Generative Language API (v1beta) behind the [`ModelClient`]
//! trait so every pipeline in the crate can be exercised with a scripted fake
//! instead of the network. Three generation surfaces are used:
//!
//! - text generation, optionally grounded with the file-search tool,
//! - vision (text prompt + inline base64 image),
//! - image generation (the reply carries an `inlineData` image part).
//!
//! Plus the file-search store management calls: create a store, upload a file
//! into it (a long-running operation), and poll that operation.
//!
//! Failure policy is a single attempt per call — callers degrade, they do not
//! retry.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::{gemini_api_key, GeminiConfig};

// ============ Wire types ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    file_search: FileSearch,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileSearch {
    file_search_store_names: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

/// A generated image: decoded bytes plus the vendor-reported mime type.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Status of a long-running vendor operation (store upload).
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub done: bool,
    pub error: Option<String>,
}

// ============ ModelClient trait ============

/// The vendor surface the rest of the crate programs against.
///
/// Tests substitute a scripted implementation; production uses
/// [`GeminiClient`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Text generation. When `store` is set the request carries the
    /// file-search tool so the answer is grounded in uploaded documents.
    async fn generate(&self, prompt: &str, store: Option<&str>) -> Result<String>;

    /// Vision: text prompt plus one inline image.
    async fn generate_vision(&self, prompt: &str, mime_type: &str, image: &[u8])
        -> Result<String>;

    /// Image generation via the image model.
    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage>;

    /// Create a file-search store; returns its resource name
    /// (`fileSearchStores/...`).
    async fn create_store(&self, display_name: &str) -> Result<String>;

    /// Upload a file into a store. Returns the resulting long-running
    /// operation, which may or may not already be done.
    async fn upload_to_store(
        &self,
        store: &str,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Operation>;

    /// Poll a long-running operation by name.
    async fn get_operation(&self, name: &str) -> Result<Operation>;
}

// ============ GeminiClient ============

/// Production [`ModelClient`] over HTTP.
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
    api_key: String,
}

impl GeminiClient {
    /// Build a client from configuration. Requires `GEMINI_API_KEY` in the
    /// environment.
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let api_key = gemini_api_key()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            api_key,
        })
    }

    fn model_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    async fn post_generate(&self, model: &str, request: &GenerateRequest) -> Result<Value> {
        let response = self
            .http
            .post(self.model_url(model))
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Gemini API error {}: {}", status, body);
        }

        response
            .json::<Value>()
            .await
            .context("Gemini response was not valid JSON")
    }
}

/// Concatenate the text parts of the first candidate, newline-joined.
fn candidate_text(value: &Value) -> Result<String> {
    let parts = value
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow!("Gemini response missing candidates[0].content.parts"))?;

    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }

    if out.trim().is_empty() {
        bail!("Gemini response contained no text parts");
    }
    Ok(out)
}

/// Find the first inline image part of the first candidate.
fn candidate_image(value: &Value) -> Result<GeneratedImage> {
    let parts = value
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow!("Gemini response missing candidates[0].content.parts"))?;

    for part in parts {
        let Some(inline) = part.get("inlineData") else {
            continue;
        };
        let mime_type = inline
            .get("mimeType")
            .and_then(|m| m.as_str())
            .unwrap_or("image/png")
            .to_string();
        let data = inline
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| anyhow!("inlineData part missing data"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .context("inlineData was not valid base64")?;
        return Ok(GeneratedImage { mime_type, bytes });
    }

    bail!("Gemini response contained no image parts")
}

fn parse_operation(value: &Value) -> Result<Operation> {
    let name = value
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| anyhow!("operation response missing name"))?
        .to_string();
    let done = value.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    let error = value
        .get("error")
        .map(|e| {
            e.get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown operation error")
                .to_string()
        })
        .filter(|_| done);
    Ok(Operation { name, done, error })
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(&self, prompt: &str, store: Option<&str>) -> Result<String> {
        let tools = store.map(|name| {
            vec![Tool {
                file_search: FileSearch {
                    file_search_store_names: vec![name.to_string()],
                },
            }]
        });

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                    inline_data: None,
                }],
            }],
            tools,
            generation_config: Some(GenerationConfig {
                temperature: Some(0.3),
                response_modalities: None,
            }),
        };

        let value = self.post_generate(&self.config.text_model, &request).await?;
        candidate_text(&value)
    }

    async fn generate_vision(
        &self,
        prompt: &str,
        mime_type: &str,
        image: &[u8],
    ) -> Result<String> {
        let data = base64::engine::general_purpose::STANDARD.encode(image);
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: Some(prompt.to_string()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: mime_type.to_string(),
                            data,
                        }),
                    },
                ],
            }],
            tools: None,
            generation_config: Some(GenerationConfig {
                temperature: Some(0.0),
                response_modalities: None,
            }),
        };

        let value = self
            .post_generate(&self.config.vision_model, &request)
            .await?;
        candidate_text(&value)
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                    inline_data: None,
                }],
            }],
            tools: None,
            generation_config: Some(GenerationConfig {
                temperature: None,
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
            }),
        };

        let value = self
            .post_generate(&self.config.image_model, &request)
            .await?;
        candidate_image(&value)
    }

    async fn create_store(&self, display_name: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/fileSearchStores",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&serde_json::json!({ "displayName": display_name }))
            .send()
            .await
            .context("store creation request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("store creation failed {}: {}", status, body);
        }

        let value: Value = response.json().await?;
        value
            .get("name")
            .and_then(|n| n.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("store creation response missing name"))
    }

    async fn upload_to_store(
        &self,
        store: &str,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Operation> {
        let url = format!(
            "{}/upload/v1beta/{}:uploadToFileSearchStore",
            self.config.base_url.trim_end_matches('/'),
            store
        );

        let metadata = serde_json::json!({ "displayName": file_name }).to_string();
        let form = reqwest::multipart::Form::new()
            .part(
                "metadata",
                reqwest::multipart::Part::text(metadata).mime_str("application/json")?,
            )
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name.to_string())
                    .mime_str(mime_type)?,
            );

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .context("upload request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("upload failed {}: {}", status, body);
        }

        let value: Value = response.json().await?;
        parse_operation(&value)
    }

    async fn get_operation(&self, name: &str) -> Result<Operation> {
        let url = format!(
            "{}/v1beta/{}",
            self.config.base_url.trim_end_matches('/'),
            name
        );
        let response = self
            .http
            .get(url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .context("operation poll failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("operation poll failed {}: {}", status, body);
        }

        let value: Value = response.json().await?;
        parse_operation(&value)
    }
}
