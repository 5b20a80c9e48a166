//! Upload session: one image from selection through analysis to a saved scan.
//!
//! ```text
//! Idle -> FileSelected -> Analyzing -> ResultReady -> Saving -> Saved
//!                 ^             |                        |
//!                 +-- failure --+                        +----> SaveFailed (result kept)
//! ```
//!
//! Every operation takes `&mut self`, so a session never has two requests
//! in flight.

use crate::description::{generate_description, DescriptionRequest, DescriptionResponse};
use crate::detection::{normalize, NormalizeError};
use crate::models::{DetectionResult, NewPatientForm, PatientSummary, SavedScan};
use crate::records;
use crate::resolve::ImageUrlResolver;
use crate::severity::SeverityThresholds;
use chrono::{DateTime, SecondsFormat, Utc};
use providers::backend::extract_id;
use providers::{
    ImageUpload, NewPatient, ProviderError, ProviderRegistry, ScanBackend, ScanSavePayload,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    FileSelected,
    Analyzing,
    ResultReady,
    Saving,
    Saved { patient_id: String },
    SaveFailed { reason: String },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no image selected")]
    NoFile,
    #[error("no analysis result to save")]
    NoResult,
    #[error("invalid patient: {0}")]
    InvalidPatient(String),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("detection failed: {0}")]
    Detection(#[source] ProviderError),
    #[error("malformed detection response: {0}")]
    Malformed(#[from] NormalizeError),
    #[error("failed to load patients: {0}")]
    Patients(#[source] ProviderError),
    #[error("failed to create patient: {0}")]
    CreatePatient(#[source] ProviderError),
    #[error("failed to save scan: {0}")]
    SaveScan(#[source] ProviderError),
    /// The patient was created but the scan was not saved against it.
    #[error("patient {patient_id} was created but saving the scan failed: {source}")]
    OrphanedPatient {
        patient_id: String,
        #[source]
        source: ProviderError,
    },
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub thresholds: SeverityThresholds,
    pub default_model_version: String,
    /// Delete a freshly created patient when its scan cannot be saved.
    pub rollback_orphaned_patient: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            thresholds: SeverityThresholds::default(),
            default_model_version: "YOLOv8 KidneyStone v1".to_string(),
            rollback_orphaned_patient: false,
        }
    }
}

pub struct UploadSession {
    backend: Arc<dyn ScanBackend>,
    resolver: ImageUrlResolver,
    settings: SessionSettings,
    image: Option<ImageUpload>,
    result: Option<DetectionResult>,
    state: SessionState,
    analysis_duration: Option<Duration>,
}

/// Reads an image from disk, sniffing its MIME type from the content.
pub async fn load_image(path: &Path) -> Result<ImageUpload, UploadError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mime = infer::get(&bytes)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(ImageUpload {
        file_name,
        mime,
        bytes: bytes.into(),
    })
}

/// Builds the `/api/scans` body. Confidence goes back to the 0–1 scale.
pub fn scan_payload(
    result: &DetectionResult,
    patient_id: &str,
    default_model_version: &str,
    now: DateTime<Utc>,
) -> ScanSavePayload {
    ScanSavePayload {
        patient_id: patient_id.to_string(),
        prediction: result
            .prediction
            .clone()
            .unwrap_or_else(|| result.label.to_string()),
        confidence: result.confidence.fraction(),
        image_path: result.original_image_url.clone().unwrap_or_default(),
        grad_cam_path: result.gradcam_path.clone().unwrap_or_default(),
        annotated_image_path: result.annotated_image_url.clone().unwrap_or_default(),
        model_version: result
            .model_version
            .clone()
            .unwrap_or_else(|| default_model_version.to_string()),
        scan_date: result
            .analyzed_at
            .clone()
            .unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        notes: result.description.clone(),
        pdf_report_path: String::new(),
    }
}

fn parse_age(raw: &str) -> Result<serde_json::Number, UploadError> {
    let invalid = || UploadError::InvalidPatient(format!("age must be a number, got {raw:?}"));
    let age: f64 = raw.parse().map_err(|_| invalid())?;
    if !age.is_finite() || age < 0.0 {
        return Err(invalid());
    }
    if age.fract() == 0.0 && age <= u32::MAX as f64 {
        return Ok(serde_json::Number::from(age as u32));
    }
    serde_json::Number::from_f64(age).ok_or_else(invalid)
}

pub fn validate_patient(form: &NewPatientForm) -> Result<NewPatient, UploadError> {
    let name = form.name.trim();
    let age = form.age.trim();
    if name.is_empty() || age.is_empty() {
        return Err(UploadError::InvalidPatient(
            "name and age are required".to_string(),
        ));
    }
    let age = parse_age(age)?;
    let gender = match form.gender.trim() {
        "" => "Male",
        g => g,
    };
    Ok(NewPatient {
        name: name.to_string(),
        age,
        gender: gender.to_string(),
        phone: form.phone.trim().to_string(),
        address: form.address.trim().to_string(),
        notes: form.notes.trim().to_string(),
    })
}

impl UploadSession {
    pub fn new(
        backend: Arc<dyn ScanBackend>,
        resolver: ImageUrlResolver,
        settings: SessionSettings,
    ) -> Self {
        Self {
            backend,
            resolver,
            settings,
            image: None,
            result: None,
            state: SessionState::Idle,
            analysis_duration: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn image(&self) -> Option<&ImageUpload> {
        self.image.as_ref()
    }

    pub fn result(&self) -> Option<&DetectionResult> {
        self.result.as_ref()
    }

    pub fn analysis_duration(&self) -> Option<Duration> {
        self.analysis_duration
    }

    /// Holds a new image; any previous result is discarded.
    pub fn select_file(&mut self, image: ImageUpload) {
        debug!(file = %image.file_name, mime = %image.mime, "image selected");
        self.image = Some(image);
        self.result = None;
        self.analysis_duration = None;
        self.state = SessionState::FileSelected;
    }

    pub async fn load_file(&mut self, path: &Path) -> Result<(), UploadError> {
        let image = load_image(path).await?;
        self.select_file(image);
        Ok(())
    }

    pub fn remove_file(&mut self) {
        self.image = None;
        self.result = None;
        self.analysis_duration = None;
        self.state = SessionState::Idle;
    }

    /// Sends the held image to `/detect` and normalises the answer. On
    /// failure no result is kept and the session returns to `FileSelected`.
    pub async fn submit_for_analysis(&mut self) -> Result<&DetectionResult, UploadError> {
        let image = self.image.clone().ok_or(UploadError::NoFile)?;
        self.result = None;
        self.analysis_duration = None;
        self.state = SessionState::Analyzing;
        info!(file = %image.file_name, "submitting image for analysis");

        let started = Instant::now();
        let outcome = match self.backend.detect(image).await {
            Ok(raw) => normalize(&raw, &self.resolver, &self.settings.thresholds)
                .map_err(UploadError::from),
            Err(e) => Err(UploadError::Detection(e)),
        };

        match outcome {
            Ok(result) => {
                let elapsed = started.elapsed();
                info!(
                    label = %result.label,
                    confidence = %result.confidence,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "analysis complete"
                );
                self.analysis_duration = Some(elapsed);
                self.state = SessionState::ResultReady;
                Ok(&*self.result.insert(result))
            }
            Err(e) => {
                warn!(error = %e, "analysis failed");
                self.state = SessionState::FileSelected;
                Err(e)
            }
        }
    }

    /// Fills in the description when the backend did not provide one.
    /// Returns the generation outcome, or `None` when nothing was generated.
    pub async fn describe(
        &mut self,
        registry: &ProviderRegistry,
        provider: Option<&str>,
    ) -> Option<DescriptionResponse> {
        let result = self.result.as_mut()?;
        if !result.description.trim().is_empty() {
            return None;
        }
        let req = DescriptionRequest::from_result(result);
        let resp = generate_description(&req, registry, provider).await;
        result.description = resp.description.clone();
        Some(resp)
    }

    pub async fn search_patients(&self, query: &str) -> Result<Vec<PatientSummary>, UploadError> {
        records::list_patients(self.backend.as_ref(), Some(query))
            .await
            .map_err(|e| match e {
                records::RecordError::Backend(p) => UploadError::Patients(p),
                other => UploadError::Patients(ProviderError::InvalidResponse(other.to_string())),
            })
    }

    /// Saves the current result against an existing patient. On failure the
    /// result stays in the session so the save can be retried.
    pub async fn persist_result(&mut self, patient_id: &str) -> Result<SavedScan, UploadError> {
        let result = self.result.clone().ok_or(UploadError::NoResult)?;
        self.state = SessionState::Saving;
        match self.save_for(&result, patient_id).await {
            Ok(scan_id) => {
                self.state = SessionState::Saved {
                    patient_id: patient_id.to_string(),
                };
                Ok(SavedScan {
                    patient_id: patient_id.to_string(),
                    scan_id,
                    created_patient: false,
                })
            }
            Err(e) => {
                self.state = SessionState::SaveFailed {
                    reason: e.to_string(),
                };
                Err(UploadError::SaveScan(e))
            }
        }
    }

    /// Creates a patient, then saves the current result against it.
    ///
    /// The two writes are not atomic. If the scan save fails the patient is
    /// left without a scan and `OrphanedPatient` names it, unless
    /// `rollback_orphaned_patient` is set and the delete succeeds.
    pub async fn create_patient_and_persist(
        &mut self,
        form: &NewPatientForm,
    ) -> Result<SavedScan, UploadError> {
        let result = self.result.clone().ok_or(UploadError::NoResult)?;
        let patient = validate_patient(form)?;
        self.state = SessionState::Saving;

        let patient_id = match self.backend.create_patient(&patient).await {
            Ok(id) => id,
            Err(e) => {
                self.state = SessionState::SaveFailed {
                    reason: e.to_string(),
                };
                return Err(UploadError::CreatePatient(e));
            }
        };
        info!(%patient_id, "patient created");

        match self.save_for(&result, &patient_id).await {
            Ok(scan_id) => {
                self.state = SessionState::Saved {
                    patient_id: patient_id.clone(),
                };
                Ok(SavedScan {
                    patient_id,
                    scan_id,
                    created_patient: true,
                })
            }
            Err(e) => {
                self.state = SessionState::SaveFailed {
                    reason: e.to_string(),
                };
                if self.settings.rollback_orphaned_patient {
                    match self.backend.delete_patient(&patient_id).await {
                        Ok(()) => {
                            info!(%patient_id, "rolled back patient after failed scan save");
                            return Err(UploadError::SaveScan(e));
                        }
                        Err(del) => {
                            warn!(%patient_id, error = %del, "rollback of new patient failed");
                        }
                    }
                }
                warn!(%patient_id, error = %e, "scan save failed, patient left without scan");
                Err(UploadError::OrphanedPatient {
                    patient_id,
                    source: e,
                })
            }
        }
    }

    async fn save_for(
        &self,
        result: &DetectionResult,
        patient_id: &str,
    ) -> Result<Option<String>, ProviderError> {
        let payload = scan_payload(
            result,
            patient_id,
            &self.settings.default_model_version,
            Utc::now(),
        );
        debug!(%patient_id, confidence = payload.confidence, "saving scan");
        let resp = self.backend.save_scan(&payload).await?;
        Ok(extract_id(&resp))
    }
}
