use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Hard cap on request bodies, in bytes. Uploaded documents and images
    /// beyond this size are rejected before any vendor call.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7410".to_string()
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_allowed_extensions() -> Vec<String> {
    ["pdf", "txt", "md", "csv", "png", "jpg", "jpeg", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How many times to poll a long-running upload operation before
    /// reporting the document as not available.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            text_model: default_text_model(),
            vision_model: default_vision_model(),
            image_model: default_image_model(),
            timeout_secs: default_timeout_secs(),
            poll_attempts: default_poll_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_text_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_vision_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_image_model() -> String {
    "gemini-2.0-flash-preview-image-generation".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_poll_attempts() -> u32 {
    30
}
fn default_poll_interval_secs() -> u64 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Persisted record of the reusable file-search store name.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Persisted upload-dedup ledger (content hash → upload record).
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            state_path: default_state_path(),
            ledger_path: default_ledger_path(),
        }
    }
}

fn default_display_name() -> String {
    "agrogate-knowledge".to_string()
}
fn default_state_path() -> PathBuf {
    PathBuf::from("data/store.json")
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/uploads.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrapeConfig {
    /// Where scraped knowledge documents are written, one subdirectory per
    /// source category.
    #[serde(default = "default_scrape_output_dir")]
    pub output_dir: PathBuf,
    /// Pause between page fetches, to stay polite to public sites.
    #[serde(default = "default_request_delay_secs")]
    pub request_delay_secs: u64,
    #[serde(default = "default_scrape_timeout_secs")]
    pub timeout_secs: u64,
    /// How many levels of relevant links to follow from each seed page.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_links_per_page")]
    pub max_links_per_page: usize,
    /// Pages whose extracted text is shorter than this are dropped.
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            output_dir: default_scrape_output_dir(),
            request_delay_secs: default_request_delay_secs(),
            timeout_secs: default_scrape_timeout_secs(),
            max_depth: default_max_depth(),
            max_links_per_page: default_max_links_per_page(),
            min_content_chars: default_min_content_chars(),
        }
    }
}

fn default_scrape_output_dir() -> PathBuf {
    PathBuf::from("knowledge_base/sugarcane")
}
fn default_request_delay_secs() -> u64 {
    2
}
fn default_scrape_timeout_secs() -> u64 {
    30
}
fn default_max_depth() -> u32 {
    2
}
fn default_max_links_per_page() -> usize {
    5
}
fn default_min_content_chars() -> usize {
    200
}

/// Secrets are read from the environment rather than the config file.
pub fn gemini_api_key() -> Result<String> {
    std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY environment variable not set")
}

pub fn webhook_verify_token() -> Option<String> {
    std::env::var("WEBHOOK_VERIFY_TOKEN")
        .ok()
        .filter(|s| !s.trim().is_empty())
}

pub fn webhook_app_secret() -> Option<String> {
    std::env::var("WEBHOOK_APP_SECRET")
        .ok()
        .filter(|s| !s.trim().is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }
    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }
    if config.server.allowed_extensions.is_empty() {
        anyhow::bail!("server.allowed_extensions must not be empty");
    }
    if config.gemini.timeout_secs == 0 {
        anyhow::bail!("gemini.timeout_secs must be > 0");
    }
    if config.gemini.poll_attempts == 0 {
        anyhow::bail!("gemini.poll_attempts must be >= 1");
    }
    if config.scrape.timeout_secs == 0 {
        anyhow::bail!("scrape.timeout_secs must be > 0");
    }
    if config.scrape.min_content_chars == 0 {
        anyhow::bail!("scrape.min_content_chars must be > 0");
    }
    if config.gemini.text_model.trim().is_empty()
        || config.gemini.vision_model.trim().is_empty()
        || config.gemini.image_model.trim().is_empty()
    {
        anyhow::bail!("gemini model names must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:7410");
        assert_eq!(config.server.max_upload_bytes, 50 * 1024 * 1024);
        assert!(config
            .server
            .allowed_extensions
            .contains(&"pdf".to_string()));
        assert_eq!(config.gemini.text_model, "gemini-2.0-flash");
        assert_eq!(config.store.display_name, "agrogate-knowledge");
        assert_eq!(config.scrape.request_delay_secs, 2);
        assert_eq!(config.scrape.min_content_chars, 200);
    }

    #[test]
    fn partial_section_overrides() {
        let config: Config = toml::from_str(
            r#"
[server]
bind = "0.0.0.0:8080"

[gemini]
text_model = "gemini-2.5-pro"
"#,
        )
        .unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.gemini.text_model, "gemini-2.5-pro");
        // Untouched fields keep their defaults.
        assert_eq!(config.gemini.poll_attempts, 30);
    }

    #[test]
    fn rejects_zero_timeout() {
        let config: Config = toml::from_str("[gemini]\ntimeout_secs = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_min_content_chars() {
        let config: Config = toml::from_str("[scrape]\nmin_content_chars = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_empty_extension_list() {
        let config: Config = toml::from_str("[server]\nallowed_extensions = []\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn load_config_missing_file_errors() {
        let err = load_config(Path::new("/nonexistent/agro.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
