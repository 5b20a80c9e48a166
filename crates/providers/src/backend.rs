//! Client for the kidney-stone inference and records backend.
//!
//! The backend owns detection, patients and scans; this module only speaks
//! its HTTP contract. Responses whose shape varies between backend versions
//! are handed back as raw JSON for the caller to normalise.

use crate::ProviderError;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A local image ready to be sent as the `image` multipart field.
#[derive(Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Bytes,
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: String,
    /// Whole ages go out as JSON integers, fractional ones as floats.
    pub age: serde_json::Number,
    pub gender: String,
    pub phone: String,
    pub address: String,
    pub notes: String,
}

/// Body of `POST /api/scans`. Confidence is on the 0–1 storage scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSavePayload {
    pub patient_id: String,
    pub prediction: String,
    pub confidence: f64,
    pub image_path: String,
    pub grad_cam_path: String,
    pub annotated_image_path: String,
    pub model_version: String,
    pub scan_date: String,
    pub notes: String,
    pub pdf_report_path: String,
}

#[async_trait::async_trait]
pub trait ScanBackend: Send + Sync {
    /// Runs detection on one image and returns the raw response object.
    async fn detect(&self, image: ImageUpload) -> Result<Value, ProviderError>;
    async fn list_patients(&self, query: Option<&str>) -> Result<Vec<Value>, ProviderError>;
    async fn get_patient(&self, id: &str) -> Result<Value, ProviderError>;
    /// Creates a patient and returns the id assigned by the backend.
    async fn create_patient(&self, patient: &NewPatient) -> Result<String, ProviderError>;
    async fn delete_patient(&self, id: &str) -> Result<(), ProviderError>;
    async fn save_scan(&self, payload: &ScanSavePayload) -> Result<Value, ProviderError>;
    async fn get_scan(&self, id: &str) -> Result<Value, ProviderError>;
    async fn delete_scan(&self, id: &str) -> Result<(), ProviderError>;
    /// Sends one chat turn; `Ok(None)` when the reply carried no message.
    async fn chat(&self, message: &str, context: &str) -> Result<Option<String>, ProviderError>;
    async fn analytics(&self) -> Result<Value, ProviderError>;
}

#[derive(Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    cfg: Arc<HttpBackendConfig>,
}

impl HttpBackend {
    pub fn new(cfg: HttpBackendConfig) -> Result<Self, ProviderError> {
        let mut builder = Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(timeout) = cfg.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.cfg.base_url)
            .map_err(|e| ProviderError::RequestFailed(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| {
                ProviderError::RequestFailed(format!(
                    "base url cannot carry a path: {}",
                    self.cfg.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Reads a JSON body, turning non-2xx statuses into `ProviderError::Status`.
async fn read_json(resp: Response) -> Result<Value, ProviderError> {
    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
    if !status.is_success() {
        let message = error_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
        warn!(status = status.as_u16(), %message, "backend returned an error status");
        return Err(ProviderError::Status {
            status: status.as_u16(),
            message,
        });
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

fn error_message(body: &[u8]) -> Option<String> {
    if let Ok(v) = serde_json::from_slice::<Value>(body) {
        let err = v.get("error")?;
        return err
            .as_str()
            .or_else(|| err.get("message").and_then(Value::as_str))
            .map(str::to_string);
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Pulls a record id out of a backend response (`id` or Mongo-style `_id`).
pub fn extract_id(value: &Value) -> Option<String> {
    let direct = ["id", "_id"].iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    direct.or_else(|| {
        ["patient", "scan", "data"]
            .iter()
            .find_map(|key| value.get(*key).and_then(extract_id))
    })
}

#[async_trait::async_trait]
impl ScanBackend for HttpBackend {
    async fn detect(&self, image: ImageUpload) -> Result<Value, ProviderError> {
        debug!(
            file = %image.file_name,
            bytes = image.bytes.len(),
            "submitting image for detection"
        );
        let part = Part::bytes(image.bytes.to_vec())
            .file_name(image.file_name.clone())
            .mime_str(&image.mime)
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = self
            .client
            .post(self.endpoint(&["detect"])?)
            .multipart(Form::new().part("image", part))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        read_json(resp).await
    }

    async fn list_patients(&self, query: Option<&str>) -> Result<Vec<Value>, ProviderError> {
        let mut builder = self.client.get(self.endpoint(&["api", "patients"])?);
        if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
            builder = builder.query(&[("q", q)]);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        match read_json(resp).await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(ProviderError::InvalidResponse(format!(
                "expected patient array, got {}",
                kind_of(&other)
            ))),
        }
    }

    async fn get_patient(&self, id: &str) -> Result<Value, ProviderError> {
        let resp = self
            .client
            .get(self.endpoint(&["api", "patients", id])?)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        read_json(resp).await
    }

    async fn create_patient(&self, patient: &NewPatient) -> Result<String, ProviderError> {
        let resp = self
            .client
            .post(self.endpoint(&["api", "patients"])?)
            .json(patient)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let created = read_json(resp).await?;
        extract_id(&created).ok_or(ProviderError::MissingField("id"))
    }

    async fn delete_patient(&self, id: &str) -> Result<(), ProviderError> {
        let resp = self
            .client
            .delete(self.endpoint(&["api", "patients", id])?)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        read_json(resp).await.map(|_| ())
    }

    async fn save_scan(&self, payload: &ScanSavePayload) -> Result<Value, ProviderError> {
        let resp = self
            .client
            .post(self.endpoint(&["api", "scans"])?)
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        read_json(resp).await
    }

    async fn get_scan(&self, id: &str) -> Result<Value, ProviderError> {
        let resp = self
            .client
            .get(self.endpoint(&["api", "scans", id])?)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        read_json(resp).await
    }

    async fn delete_scan(&self, id: &str) -> Result<(), ProviderError> {
        let resp = self
            .client
            .delete(self.endpoint(&["api", "scans", id])?)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        read_json(resp).await.map(|_| ())
    }

    async fn chat(&self, message: &str, context: &str) -> Result<Option<String>, ProviderError> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            message: &'a str,
            descript: &'a str,
        }

        let resp = self
            .client
            .post(self.endpoint(&["chatbot"])?)
            .json(&ChatRequest {
                message,
                descript: context,
            })
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let reply = read_json(resp).await?;
        Ok(reply
            .get("result_msg")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }

    async fn analytics(&self) -> Result<Value, ProviderError> {
        let resp = self
            .client
            .get(self.endpoint(&["api", "analytics", "classifications"])?)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        read_json(resp).await
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
