use crate::confidence::Confidence;
use crate::severity::SeverityLabel;
use serde::{Deserialize, Serialize};

/// Canonical result of one detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub label: SeverityLabel,
    pub confidence: Confidence,
    pub description: String,
    /// Annotated image, or empty when the backend returned none.
    pub image_url: String,
    pub gradcam_url: Option<String>,
    pub prediction: Option<String>,
    pub model_version: Option<String>,
    pub analyzed_at: Option<String>,
    pub original_image_url: Option<String>,
    pub gradcam_path: Option<String>,
    pub annotated_image_url: Option<String>,
    pub stone_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: String,
    pub patient_id: Option<String>,
    pub name: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<String>,
    pub total_scans: Option<u32>,
    pub last_scan_date: Option<String>,
}

/// Unvalidated input for the "new patient" save path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPatientForm {
    pub name: String,
    pub age: String,
    pub gender: String,
    pub phone: String,
    pub address: String,
    pub notes: String,
}

/// Outcome of a successful save.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedScan {
    pub patient_id: String,
    pub scan_id: Option<String>,
    /// Set when the patient was created as part of this save.
    pub created_patient: bool,
}
