//! In-process HTTP API tests.
//!
//! The router is driven with `tower::ServiceExt::oneshot` and a scripted
//! fake vendor client, so nothing here touches the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use agrogate::config::Config;
use agrogate::gemini::{GeneratedImage, ModelClient, Operation};
use agrogate::server::{build_router, AppState};
use agrogate::store::StoreSync;

/// Scripted vendor. The decision prompt is recognized by its strict-JSON
/// instruction so `generate` can serve both the answer and the infographic
/// decision in one fake.
#[derive(Default)]
struct FakeModel {
    fail_generate: bool,
    fail_vision: bool,
    vision_reply: Option<String>,
    uploads: AtomicUsize,
}

#[async_trait]
impl ModelClient for FakeModel {
    async fn generate(&self, prompt: &str, _store: Option<&str>) -> Result<String> {
        if self.fail_generate {
            bail!("vendor unreachable");
        }
        if prompt.contains("\"needed\"") {
            Ok("{\"needed\": false}".to_string())
        } else {
            Ok("Apply urea in two split doses after planting.".to_string())
        }
    }

    async fn generate_vision(&self, _prompt: &str, _mime: &str, _image: &[u8]) -> Result<String> {
        if self.fail_vision {
            bail!("vendor unreachable");
        }
        Ok(self
            .vision_reply
            .clone()
            .unwrap_or_else(|| "{}".to_string()))
    }

    async fn generate_image(&self, _prompt: &str) -> Result<GeneratedImage> {
        Ok(GeneratedImage {
            mime_type: "image/png".to_string(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        })
    }

    async fn create_store(&self, _display_name: &str) -> Result<String> {
        Ok("fileSearchStores/test".to_string())
    }

    async fn upload_to_store(
        &self,
        _store: &str,
        _file_name: &str,
        _mime: &str,
        _bytes: Vec<u8>,
    ) -> Result<Operation> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(Operation {
            name: "operations/op".to_string(),
            done: true,
            error: None,
        })
    }

    async fn get_operation(&self, name: &str) -> Result<Operation> {
        Ok(Operation {
            name: name.to_string(),
            done: true,
            error: None,
        })
    }
}

fn test_state(model: Arc<dyn ModelClient>) -> (TempDir, AppState) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.server.upload_dir = tmp.path().join("uploads");
    config.store.state_path = tmp.path().join("data/store.json");
    config.store.ledger_path = tmp.path().join("data/uploads.json");
    config.gemini.poll_interval_secs = 0;
    let config = Arc::new(config);

    let store = Arc::new(StoreSync::load(config.clone(), model.clone()));
    let state = AppState {
        config,
        model,
        store,
        verify_token: None,
        app_secret: None,
    };
    (tmp, state)
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_request(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_request(path: &str, file_field: &str, file_name: &str, data: &[u8]) -> Request<Body> {
    let boundary = "agrotestboundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{file_field}\"; \
             filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(
        format!(
            "\r\n--{boundary}\r\nContent-Disposition: form-data; name=\"language\"\r\n\r\n\
             english\r\n--{boundary}--\r\n"
        )
        .as_bytes(),
    );

    Request::builder()
        .method("POST")
        .uri(path)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn health_reports_version() {
    let (_tmp, state) = test_state(Arc::new(FakeModel::default()));
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn ask_returns_text_answer() {
    let (_tmp, state) = test_state(Arc::new(FakeModel::default()));
    let (status, body) = send(
        &state,
        json_request("/ask", json!({"question": "when to apply urea?"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Apply urea in two split doses after planting.");
    assert_eq!(body["response_format"], "text");
    // Model declined the infographic; the key must be absent, not null.
    assert!(body.get("infographic_url").is_none());
}

#[tokio::test]
async fn ask_rejects_empty_question() {
    let (_tmp, state) = test_state(Arc::new(FakeModel::default()));
    let (status, body) = send(&state, json_request("/ask", json!({"question": "  "}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn ask_trigger_phrase_forces_infographic() {
    let (tmp, state) = test_state(Arc::new(FakeModel::default()));
    let (status, body) = send(
        &state,
        json_request(
            "/ask",
            json!({"question": "explain the fertilizer schedule for my farm"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let url = body["infographic_url"].as_str().unwrap();
    assert!(url.starts_with("/uploads/infographics/"));
    assert!(body["infographic_reason"]
        .as_str()
        .unwrap()
        .contains("fertilizer schedule"));

    // The PNG landed on disk where /uploads serves from.
    let file_name = url.rsplit('/').next().unwrap();
    let on_disk = tmp.path().join("uploads/infographics").join(file_name);
    assert!(on_disk.exists());
}

#[tokio::test]
async fn ask_degrades_when_vendor_fails() {
    let model = FakeModel {
        fail_generate: true,
        ..Default::default()
    };
    let (_tmp, state) = test_state(Arc::new(model));
    let (status, body) = send(
        &state,
        json_request("/ask", json!({"question": "when to harvest?"})),
    )
    .await;

    // Vendor failure is a degraded 200, not an error envelope.
    assert_eq!(status, StatusCode::OK);
    assert!(body["response"]
        .as_str()
        .unwrap()
        .contains("could not be reached"));
}

#[tokio::test]
async fn webhook_accepts_all_three_shapes() {
    let shapes = [
        json!({"chat": "when to harvest?", "language": "english"}),
        json!({"payload": {"text": "when to harvest?"}, "language": "english"}),
        json!({"entry": [{"changes": [{"value": {"messages": [
            {"text": {"body": "when to harvest?"}}
        ]}}]}]}),
    ];

    for shape in shapes {
        let (_tmp, state) = test_state(Arc::new(FakeModel::default()));
        let (status, body) = send(&state, json_request("/webhook", shape)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "Apply urea in two split doses after planting.");
    }
}

#[tokio::test]
async fn webhook_rejects_unknown_shape() {
    let (_tmp, state) = test_state(Arc::new(FakeModel::default()));
    let (status, body) = send(&state, json_request("/webhook", json!({"foo": "bar"}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn webhook_verification_echoes_challenge() {
    let (_tmp, mut state) = test_state(Arc::new(FakeModel::default()));
    state.verify_token = Some("farm-token".to_string());

    let request = Request::builder()
        .uri("/webhook?hub.mode=subscribe&hub.verify_token=farm-token&hub.challenge=12345")
        .body(Body::empty())
        .unwrap();
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"12345");

    // Wrong token is refused.
    let request = Request::builder()
        .uri("/webhook?hub.verify_token=wrong&hub.challenge=12345")
        .body(Body::empty())
        .unwrap();
    let response = build_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_post_enforces_signature_when_secret_set() {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let (_tmp, mut state) = test_state(Arc::new(FakeModel::default()));
    state.app_secret = Some("shhh".to_string());

    let body = json!({"chat": "when to harvest?", "language": "english"}).to_string();

    // No signature header at all: refused before the payload is parsed.
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, reply) = send(&state, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(reply["error"]["code"], "forbidden");

    // Correctly signed body goes through to the advisor.
    let mut mac = Hmac::<Sha256>::new_from_slice(b"shhh").unwrap();
    mac.update(body.as_bytes());
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-hub-signature-256", signature)
        .body(Body::from(body))
        .unwrap();
    let (status, reply) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["reply"], "Apply urea in two split doses after planting.");
}

#[tokio::test]
async fn scan_image_parses_diagnosis() {
    let model = FakeModel {
        vision_reply: Some(
            "```json\n{\"healthy\": false, \"disease\": \"red rot\", \"confidence\": 0.9, \
             \"symptoms\": [\"reddened internodes\"], \"treatment\": \"rogue out infected canes\"}\n```"
                .to_string(),
        ),
        ..Default::default()
    };
    let (_tmp, state) = test_state(Arc::new(model));
    let (status, body) = send(
        &state,
        multipart_request("/scan-image", "file", "leaf.png", b"fake png bytes"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], false);
    assert_eq!(body["disease"], "red rot");
    assert_eq!(body["symptoms"][0], "reddened internodes");
}

#[tokio::test]
async fn scan_image_degrades_when_vision_fails() {
    let model = FakeModel {
        fail_vision: true,
        ..Default::default()
    };
    let (_tmp, state) = test_state(Arc::new(model));
    let (status, body) = send(
        &state,
        multipart_request("/scan-image", "image", "leaf.jpg", b"fake jpg"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notes"], "image analysis unavailable");
}

#[tokio::test]
async fn classify_plant_degrades_to_unknown() {
    let model = FakeModel {
        fail_vision: true,
        ..Default::default()
    };
    let (_tmp, state) = test_state(Arc::new(model));
    let (status, body) = send(
        &state,
        multipart_request("/classify-plant", "image", "plant.jpg", b"fake jpg"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["classification"], "unknown");
    assert_eq!(body["details"], "classification unavailable");
}

#[tokio::test]
async fn upload_enforces_extension_allow_list() {
    let (_tmp, state) = test_state(Arc::new(FakeModel::default()));
    let (status, body) = send(
        &state,
        multipart_request("/upload", "file", "malware.exe", b"MZ"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not allowed"));
}

#[tokio::test]
async fn upload_indexes_once_and_dedups_after() {
    let model = Arc::new(FakeModel::default());
    let (_tmp, state) = test_state(model.clone());

    let (status, body) = send(
        &state,
        multipart_request("/upload", "file", "guide.txt", b"red rot guide"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["deduplicated"], false);
    assert_eq!(body["indexed"], true);

    // Same content under another name: no second vendor upload.
    let (status, body) = send(
        &state,
        multipart_request("/upload", "file", "guide-copy.txt", b"red rot guide"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deduplicated"], true);
    assert_eq!(model.uploads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scan_image_without_file_is_rejected() {
    let (_tmp, state) = test_state(Arc::new(FakeModel::default()));
    let boundary = "agrotestboundary";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"language\"\r\n\r\n\
         hindi\r\n--{boundary}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri("/scan-image")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "missing image file");
}
