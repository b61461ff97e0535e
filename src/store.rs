//! File-search store negotiation and the upload-dedup ledger.
//!
//! Ensures a remote file-search store exists (created once, then reused via a
//! persisted handle) and that a given file's content is present in it exactly
//! once. Dedup is by SHA-256 content hash, recorded in a flat JSON ledger so
//! identical content is never re-uploaded across restarts.
//!
//! Failure policy: any vendor or I/O error during negotiation is logged and
//! surfaces as "not available" — the calling endpoint continues without the
//! document rather than aborting the request. Concurrent requests racing on
//! the same uncached file may both upload; the vendor store tolerates the
//! duplicate, and the ledger itself is mutex-guarded so local writes don't
//! interleave.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::gemini::ModelClient;

/// One ledger record per uploaded content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub file_name: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Flat persisted map of content hash → upload record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UploadLedger {
    #[serde(default)]
    pub entries: HashMap<String, LedgerEntry>,
}

/// Persisted record of the reusable store name.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoreState {
    #[serde(default)]
    name: Option<String>,
}

/// Outcome of [`StoreSync::ensure_uploaded`].
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub hash: String,
    /// True when the content hash was already in the ledger and no remote
    /// upload was performed.
    pub deduplicated: bool,
}

struct SyncState {
    store_name: Option<String>,
    ledger: UploadLedger,
}

/// Store-and-upload negotiator shared by the server and the CLI.
pub struct StoreSync {
    config: Arc<Config>,
    client: Arc<dyn ModelClient>,
    state: Mutex<SyncState>,
}

impl StoreSync {
    /// Load persisted state from disk. Missing files mean a fresh start;
    /// corrupt files are logged and treated as empty rather than fatal.
    pub fn load(config: Arc<Config>, client: Arc<dyn ModelClient>) -> Self {
        let store_name = read_json::<StoreState>(&config.store.state_path)
            .map(|s| s.name)
            .unwrap_or_else(|e| {
                tracing::warn!(
                    path = %config.store.state_path.display(),
                    error = %e,
                    "could not read store state, starting fresh"
                );
                None
            });

        let ledger = read_json::<UploadLedger>(&config.store.ledger_path).unwrap_or_else(|e| {
            tracing::warn!(
                path = %config.store.ledger_path.display(),
                error = %e,
                "could not read upload ledger, starting fresh"
            );
            UploadLedger::default()
        });

        Self {
            config,
            client,
            state: Mutex::new(SyncState { store_name, ledger }),
        }
    }

    /// Return the store name, creating and persisting the store on first use.
    pub async fn ensure_store(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(name) = &state.store_name {
            return Ok(name.clone());
        }

        let name = self
            .client
            .create_store(&self.config.store.display_name)
            .await
            .context("could not create file-search store")?;

        write_json(
            &self.config.store.state_path,
            &StoreState {
                name: Some(name.clone()),
            },
        )?;
        state.store_name = Some(name.clone());
        tracing::info!(store = %name, "created file-search store");
        Ok(name)
    }

    /// Degraded variant of [`ensure_store`](Self::ensure_store) for request
    /// paths: a failure is logged and grounding is simply skipped.
    pub async fn store_if_available(&self) -> Option<String> {
        match self.ensure_store().await {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!(error = %e, "file-search store not available");
                None
            }
        }
    }

    /// Ensure the file at `path` is present in the store exactly once.
    pub async fn ensure_uploaded(&self, path: &Path) -> Result<IngestOutcome> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        self.ensure_uploaded_bytes(&file_name, bytes).await
    }

    /// Byte-level entry point used by the `/upload` endpoint (which already
    /// holds the multipart body in memory).
    pub async fn ensure_uploaded_bytes(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestOutcome> {
        let hash = content_hash(&bytes);

        {
            let state = self.state.lock().await;
            if state.ledger.entries.contains_key(&hash) {
                tracing::debug!(file = file_name, %hash, "upload skipped, hash in ledger");
                return Ok(IngestOutcome {
                    hash,
                    deduplicated: true,
                });
            }
        }

        let store = self.ensure_store().await?;
        let mime_type = mime_for_path(Path::new(file_name));

        let mut operation = self
            .client
            .upload_to_store(&store, file_name, mime_type, bytes)
            .await
            .with_context(|| format!("upload of {} failed", file_name))?;

        let mut attempts = 0u32;
        while !operation.done {
            if attempts >= self.config.gemini.poll_attempts {
                bail!("upload operation {} did not complete in time", operation.name);
            }
            attempts += 1;
            tokio::time::sleep(Duration::from_secs(self.config.gemini.poll_interval_secs)).await;
            operation = self.client.get_operation(&operation.name).await?;
        }
        if let Some(message) = operation.error {
            bail!("upload operation failed: {}", message);
        }

        let mut state = self.state.lock().await;
        state.ledger.entries.insert(
            hash.clone(),
            LedgerEntry {
                file_name: file_name.to_string(),
                uploaded_at: Utc::now(),
            },
        );
        write_json(&self.config.store.ledger_path, &state.ledger)?;
        tracing::info!(file = file_name, %hash, "document indexed into store");

        Ok(IngestOutcome {
            hash,
            deduplicated: false,
        })
    }

    /// Snapshot for the `agro store` CLI command.
    pub async fn status(&self) -> (Option<String>, usize) {
        let state = self.state.lock().await;
        (state.store_name.clone(), state.ledger.entries.len())
    }
}

/// Read-only status from the persisted files, without a vendor client.
/// Used by the `agro store` command so inspection needs no API key.
pub fn status_from_disk(config: &Config) -> (Option<String>, usize) {
    let name = read_json::<StoreState>(&config.store.state_path)
        .map(|s| s.name)
        .unwrap_or(None);
    let ledger = read_json::<UploadLedger>(&config.store.ledger_path).unwrap_or_default();
    (name, ledger.entries.len())
}

/// Hex-encoded SHA-256 of the content.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Best-effort mime type from the file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn read_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)
        .with_context(|| format!("could not write {}", path.display()))?;
    Ok(())
}
