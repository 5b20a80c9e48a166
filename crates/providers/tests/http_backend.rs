use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use providers::gemini::{GeminiConfig, GeminiProvider};
use providers::{
    HttpBackend, HttpBackendConfig, ImageUpload, NewPatient, ProviderError, ScanBackend,
    ScanSavePayload, TextGenerator,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Seen {
    upload: Option<(String, String, Vec<u8>)>,
    query: Option<String>,
    scan: Option<Value>,
    deleted: Vec<String>,
    gemini: Option<(String, Value)>,
}

type Shared = Arc<Mutex<Seen>>;

async fn detect(State(seen): State<Shared>, mut multipart: Multipart) -> Json<Value> {
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.unwrap();
        seen.lock().unwrap().upload = Some((name, file_name, data.to_vec()));
    }
    Json(json!({"confidence": 0.42, "prediction": "stone"}))
}

async fn patients(
    State(seen): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    seen.lock().unwrap().query = params.get("q").cloned();
    Json(json!([{"_id": "p1", "name": "Budi"}]))
}

async fn create_patient(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["name"] == "" {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "Name is required"})));
    }
    (StatusCode::CREATED, Json(json!({"id": "p123", "name": body["name"]})))
}

async fn save_scan(State(seen): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    seen.lock().unwrap().scan = Some(body);
    Json(json!({"success": true, "id": "s1"}))
}

async fn delete_scan(State(seen): State<Shared>, Path(id): Path<String>) -> StatusCode {
    seen.lock().unwrap().deleted.push(id);
    StatusCode::NO_CONTENT
}

async fn chatbot(Json(body): Json<Value>) -> Json<Value> {
    if body["message"] == "silent" {
        return Json(json!({}));
    }
    let reply = format!(
        "re: {} [{}]",
        body["message"].as_str().unwrap(),
        body["descript"].as_str().unwrap()
    );
    Json(json!({ "result_msg": reply }))
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::OK, "<html>not json</html>")
}

async fn gemini(
    State(seen): State<Shared>,
    Path(rest): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    seen.lock().unwrap().gemini = Some((rest.clone(), body));
    let parts = json!([{"text": "Bagian satu"}, {"text": "Bagian dua"}]);
    match params.get("key").map(String::as_str) {
        Some("good") => (
            StatusCode::OK,
            Json(json!({"candidates": [{"content": {"parts": parts}}]})),
        ),
        Some("slow") => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            (StatusCode::OK, Json(json!({"candidates": []})))
        }
        Some("blocked") => (
            StatusCode::OK,
            Json(json!({"promptFeedback": {"blockReason": "SAFETY"}})),
        ),
        _ => (
            StatusCode::FORBIDDEN,
            Json(json!({"error": {"message": "API key not valid"}})),
        ),
    }
}

async fn spawn_server() -> (String, Shared) {
    let seen: Shared = Arc::default();
    let app = Router::new()
        .route("/detect", post(detect))
        .route("/api/patients", get(patients).post(create_patient))
        .route("/api/scans", post(save_scan))
        .route("/api/scans/:id", delete(delete_scan))
        .route("/chatbot", post(chatbot))
        .route("/api/analytics/classifications", get(broken))
        .route("/v1beta/models/*rest", post(gemini))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake backend");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve") });
    (format!("http://{addr}"), seen)
}

fn backend(base_url: &str) -> HttpBackend {
    HttpBackend::new(HttpBackendConfig {
        base_url: base_url.to_string(),
        timeout: None,
    })
    .unwrap()
}

#[tokio::test]
async fn detect_posts_image_as_multipart_field() {
    let (base, seen) = spawn_server().await;
    let raw = backend(&base)
        .detect(ImageUpload {
            file_name: "scan.png".into(),
            mime: "image/png".into(),
            bytes: Bytes::from_static(b"\x89PNGfake"),
        })
        .await
        .unwrap();

    assert_eq!(raw["confidence"], json!(0.42));
    let (field, file_name, data) = seen.lock().unwrap().upload.clone().unwrap();
    assert_eq!(field, "image");
    assert_eq!(file_name, "scan.png");
    assert_eq!(data, b"\x89PNGfake");
}

#[tokio::test]
async fn list_patients_forwards_search_query() {
    let (base, seen) = spawn_server().await;
    let items = backend(&base).list_patients(Some("budi")).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(seen.lock().unwrap().query.as_deref(), Some("budi"));

    backend(&base).list_patients(Some("  ")).await.unwrap();
    assert_eq!(seen.lock().unwrap().query, None);
}

#[tokio::test]
async fn create_patient_returns_id_and_surfaces_error_message() {
    let (base, _) = spawn_server().await;
    let mut patient = NewPatient {
        name: "Siti".into(),
        age: 41.into(),
        gender: "Female".into(),
        phone: String::new(),
        address: String::new(),
        notes: String::new(),
    };
    assert_eq!(backend(&base).create_patient(&patient).await.unwrap(), "p123");

    patient.name.clear();
    match backend(&base).create_patient(&patient).await {
        Err(ProviderError::Status { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "Name is required");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn save_scan_sends_camel_case_payload() {
    let (base, seen) = spawn_server().await;
    let payload = ScanSavePayload {
        patient_id: "p1".into(),
        prediction: "stone".into(),
        confidence: 0.87,
        image_path: "http://x/o.png".into(),
        grad_cam_path: String::new(),
        annotated_image_path: "http://x/a.png".into(),
        model_version: "YOLOv8 KidneyStone v1".into(),
        scan_date: "2026-01-01T00:00:00.000Z".into(),
        notes: "n".into(),
        pdf_report_path: String::new(),
    };
    backend(&base).save_scan(&payload).await.unwrap();

    let sent = seen.lock().unwrap().scan.clone().unwrap();
    assert_eq!(sent["patientId"], "p1");
    assert_eq!(sent["gradCamPath"], "");
    assert_eq!(sent["confidence"], json!(0.87));
    assert_eq!(sent["pdfReportPath"], "");
}

#[tokio::test]
async fn delete_scan_accepts_empty_body() {
    let (base, seen) = spawn_server().await;
    backend(&base).delete_scan("s-9").await.unwrap();
    assert_eq!(seen.lock().unwrap().deleted, vec!["s-9".to_string()]);
}

#[tokio::test]
async fn chat_returns_reply_or_none() {
    let (base, _) = spawn_server().await;
    let reply = backend(&base).chat("halo", "ctx").await.unwrap();
    assert_eq!(reply.as_deref(), Some("re: halo [ctx]"));
    assert_eq!(backend(&base).chat("silent", "ctx").await.unwrap(), None);
}

#[tokio::test]
async fn unparseable_body_is_invalid_response() {
    let (base, _) = spawn_server().await;
    assert!(matches!(
        backend(&base).analytics().await,
        Err(ProviderError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn unreachable_backend_is_request_failure() {
    let err = backend("http://127.0.0.1:9").analytics().await.unwrap_err();
    assert!(matches!(err, ProviderError::RequestFailed(_)));
}

fn gemini_with_key(base: &str, key: &str) -> GeminiProvider {
    GeminiProvider::new(GeminiConfig {
        api_key: key.into(),
        api_base: base.into(),
        model: "gemini-pro".into(),
        timeout: Some(Duration::from_millis(500)),
    })
    .unwrap()
}

#[tokio::test]
async fn gemini_gives_up_on_a_hung_call() {
    let (base, _) = spawn_server().await;
    let started = std::time::Instant::now();
    let err = gemini_with_key(&base, "slow").generate("p").await.unwrap_err();
    assert!(matches!(err, ProviderError::RequestFailed(_)));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn gemini_joins_candidate_parts() {
    let (base, seen) = spawn_server().await;
    let text = gemini_with_key(&base, "good").generate("prompt").await.unwrap();
    assert_eq!(text, "Bagian satu\nBagian dua");

    let (path, body) = seen.lock().unwrap().gemini.clone().unwrap();
    assert_eq!(path, "gemini-pro:generateContent");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "prompt");
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn gemini_reports_block_and_status_errors() {
    let (base, _) = spawn_server().await;
    assert!(matches!(
        gemini_with_key(&base, "blocked").generate("p").await,
        Err(ProviderError::Blocked(reason)) if reason == "SAFETY"
    ));
    match gemini_with_key(&base, "bad").generate("p").await {
        Err(ProviderError::Status { status, message }) => {
            assert_eq!(status, 403);
            assert_eq!(message, "API key not valid");
        }
        other => panic!("unexpected: {other:?}"),
    }
}
