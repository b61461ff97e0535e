//! CLI integration tests.
//!
//! Drive the `agro` binary directly, the same way operators do. Only the
//! offline commands are exercised here; anything reaching the vendor is
//! covered by the in-process tests with a fake client.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn agro_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("agro");
    path
}

fn run_agro(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = agro_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run agro binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn write_config(root: &Path) -> PathBuf {
    let config_content = format!(
        r#"[server]
bind = "127.0.0.1:7411"
upload_dir = "{root}/uploads"

[store]
state_path = "{root}/data/store.json"
ledger_path = "{root}/data/uploads.json"
"#,
        root = root.display()
    );
    let config_path = root.join("agro.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

#[test]
fn store_command_reports_fresh_state() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path());

    let (stdout, stderr, success) = run_agro(&config_path, &["store"]);
    assert!(success, "store failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("store: not created yet"));
    assert!(stdout.contains("indexed documents: 0"));
    assert!(stdout.contains("sugarcane growth stages"));
}

#[test]
fn store_command_reads_persisted_state() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path());

    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(
        data_dir.join("store.json"),
        r#"{"name": "fileSearchStores/abc123"}"#,
    )
    .unwrap();
    fs::write(
        data_dir.join("uploads.json"),
        r#"{"entries": {"deadbeef": {"file_name": "guide.pdf", "uploaded_at": "2026-01-10T00:00:00Z"}}}"#,
    )
    .unwrap();

    let (stdout, _, success) = run_agro(&config_path, &["store"]);
    assert!(success);
    assert!(stdout.contains("store: fileSearchStores/abc123"));
    assert!(stdout.contains("indexed documents: 1"));
}

#[test]
fn invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("agro.toml");
    fs::write(&config_path, "[gemini]\ntimeout_secs = 0\n").unwrap();

    let (_, stderr, success) = run_agro(&config_path, &["store"]);
    assert!(!success);
    assert!(stderr.contains("timeout_secs"));
}

#[test]
fn scrape_rejects_unknown_category() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path());

    let (_, stderr, success) = run_agro(&config_path, &["scrape", "--category", "bogus"]);
    assert!(!success);
    assert!(stderr.contains("unknown source category"));
}

#[test]
fn ingest_requires_api_key() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path());
    let doc = tmp.path().join("guide.txt");
    fs::write(&doc, "red rot treatment notes").unwrap();

    let binary = agro_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("ingest")
        .arg(doc.to_str().unwrap())
        .env_remove("GEMINI_API_KEY")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GEMINI_API_KEY"));
}
