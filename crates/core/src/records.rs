//! Read-side projections of patients, scans and analytics.
//!
//! Stored confidences carry no scale, so they are read with
//! [`Confidence::from_ambiguous`].

use crate::confidence::Confidence;
use crate::models::PatientSummary;
use crate::resolve::ImageUrlResolver;
use providers::backend::extract_id;
use providers::{ProviderError, ScanBackend};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Backend(#[from] ProviderError),
    #[error("patient data not found in response")]
    MissingPatient,
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanItem {
    pub id: String,
    pub scan_date: Option<String>,
    pub prediction: String,
    pub confidence: Confidence,
    pub annotated_image_url: String,
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientDetail {
    pub patient: PatientSummary,
    pub scans: Vec<ScanItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDetail {
    pub id: String,
    pub patient_id: Option<String>,
    pub prediction: String,
    pub confidence: Confidence,
    pub scan_date: Option<String>,
    pub model_version: String,
    pub notes: String,
    pub original_image_url: String,
    pub gradcam_image_url: String,
    pub annotated_image_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Analytics {
    pub total_scans: u64,
    pub healthy_count: u64,
    pub ckd_count: u64,
    pub distribution: Vec<DistributionItem>,
    pub accuracy_over_time: Vec<AccuracyPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionItem {
    pub label: String,
    pub count: u64,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccuracyPoint {
    pub date: String,
    pub average_confidence: f64,
}

fn opt_str(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        raw.get(*k)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn opt_u32(raw: &Value, key: &str) -> Option<u32> {
    raw.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn stored_confidence(raw: &Value) -> Confidence {
    let value = raw.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
    Confidence::from_ambiguous(value).to_percent()
}

fn url_or_empty(resolver: &ImageUrlResolver, raw: &Value, key: &str) -> String {
    resolver.resolve_field(raw, key).unwrap_or_default()
}

/// Normalises one patient record; records without an id are dropped.
pub fn patient_summary(raw: &Value) -> Option<PatientSummary> {
    let id = ["_id", "id"].iter().find_map(|k| match raw.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })?;
    Some(PatientSummary {
        id,
        patient_id: opt_str(raw, &["patientId"]),
        name: opt_str(raw, &["name"]).unwrap_or_else(|| "-".to_string()),
        age: opt_u32(raw, "age"),
        gender: opt_str(raw, &["gender"]),
        phone: opt_str(raw, &["phone"]),
        address: opt_str(raw, &["address"]),
        notes: opt_str(raw, &["notes"]),
        created_at: opt_str(raw, &["createdAt"]),
        total_scans: opt_u32(raw, "totalScans"),
        last_scan_date: opt_str(raw, &["lastScanDate", "last_scan_date"]),
    })
}

pub fn scan_item(raw: &Value, resolver: &ImageUrlResolver) -> Option<ScanItem> {
    Some(ScanItem {
        id: extract_id(raw)?,
        scan_date: opt_str(raw, &["scanDate"]),
        prediction: opt_str(raw, &["prediction"]).unwrap_or_else(|| "Unknown".to_string()),
        confidence: stored_confidence(raw),
        annotated_image_url: url_or_empty(resolver, raw, "annotatedImagePath"),
        image_url: url_or_empty(resolver, raw, "imagePath"),
    })
}

pub fn patient_detail(
    raw: &Value,
    resolver: &ImageUrlResolver,
) -> Result<PatientDetail, RecordError> {
    let patient = raw
        .get("patient")
        .filter(|p| p.is_object())
        .ok_or(RecordError::MissingPatient)?;
    let patient = patient_summary(patient).ok_or(RecordError::Malformed {
        what: "patient",
        reason: "record has no id".to_string(),
    })?;
    let scans = raw
        .get("scans")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|s| scan_item(s, resolver)).collect())
        .unwrap_or_default();
    Ok(PatientDetail { patient, scans })
}

pub fn scan_detail(
    raw: &Value,
    resolver: &ImageUrlResolver,
    default_model_version: &str,
) -> Result<ScanDetail, RecordError> {
    let id = extract_id(raw).ok_or(RecordError::Malformed {
        what: "scan",
        reason: "record has no id".to_string(),
    })?;
    Ok(ScanDetail {
        id,
        patient_id: opt_str(raw, &["patientId"]),
        prediction: opt_str(raw, &["prediction"]).unwrap_or_else(|| "Unknown".to_string()),
        confidence: stored_confidence(raw),
        scan_date: opt_str(raw, &["scanDate"]),
        model_version: opt_str(raw, &["modelVersion"])
            .unwrap_or_else(|| default_model_version.to_string()),
        notes: opt_str(raw, &["notes"]).unwrap_or_else(|| "Tidak ada catatan.".to_string()),
        original_image_url: url_or_empty(resolver, raw, "imagePath"),
        gradcam_image_url: url_or_empty(resolver, raw, "gradCamPath"),
        annotated_image_url: url_or_empty(resolver, raw, "annotatedImagePath"),
    })
}

pub async fn list_patients(
    backend: &dyn ScanBackend,
    query: Option<&str>,
) -> Result<Vec<PatientSummary>, RecordError> {
    let raw = backend.list_patients(query).await?;
    let total = raw.len();
    let patients: Vec<PatientSummary> = raw.iter().filter_map(patient_summary).collect();
    if patients.len() < total {
        warn!(dropped = total - patients.len(), "patient records without id ignored");
    }
    debug!(count = patients.len(), "patients loaded");
    Ok(patients)
}

pub async fn load_patient(
    backend: &dyn ScanBackend,
    resolver: &ImageUrlResolver,
    id: &str,
) -> Result<PatientDetail, RecordError> {
    let raw = backend.get_patient(id).await?;
    patient_detail(&raw, resolver)
}

pub async fn load_scan(
    backend: &dyn ScanBackend,
    resolver: &ImageUrlResolver,
    id: &str,
    default_model_version: &str,
) -> Result<ScanDetail, RecordError> {
    let raw = backend.get_scan(id).await?;
    scan_detail(&raw, resolver, default_model_version)
}

/// Deletes a scan; the backend also removes its stored images.
pub async fn delete_scan(backend: &dyn ScanBackend, id: &str) -> Result<(), RecordError> {
    backend.delete_scan(id).await?;
    debug!(scan_id = %id, "scan deleted");
    Ok(())
}

pub async fn load_analytics(backend: &dyn ScanBackend) -> Result<Analytics, RecordError> {
    let raw = backend.analytics().await?;
    serde_json::from_value(raw).map_err(|e| RecordError::Malformed {
        what: "analytics",
        reason: e.to_string(),
    })
}
