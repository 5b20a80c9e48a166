//! Normalisation of raw `/detect` responses.

use crate::confidence::Confidence;
use crate::models::DetectionResult;
use crate::resolve::{Candidate, ImageUrlResolver};
use crate::severity::SeverityThresholds;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("detection response is not a JSON object (got {0})")]
    NotAnObject(&'static str),
}

fn str_field<'a>(raw: &'a Value, key: &str) -> &'a str {
    raw.get(key).and_then(Value::as_str).unwrap_or("")
}

fn opt_string(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Stone count from a `detections` array (or number) or a `count` field.
pub fn stone_count(data: &Value) -> Option<u32> {
    match data.get("detections") {
        Some(Value::Array(items)) => return u32::try_from(items.len()).ok(),
        Some(Value::Number(n)) => return n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => {}
    }
    data.get("count")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

pub fn normalize(
    raw: &Value,
    resolver: &ImageUrlResolver,
    thresholds: &SeverityThresholds,
) -> Result<DetectionResult, NormalizeError> {
    if !raw.is_object() {
        let kind = match raw {
            Value::Null => "null",
            Value::Array(_) => "array",
            Value::String(_) => "string",
            Value::Number(_) => "number",
            _ => "bool",
        };
        return Err(NormalizeError::NotAnObject(kind));
    }

    let raw_conf = raw.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
    let confidence = Confidence::display_from_raw(raw_conf);
    let label = thresholds.classify(confidence);

    let annotated = resolver.first_resolved([
        Candidate::Field(str_field(raw, "annotated_image_path")),
        Candidate::Field(str_field(raw, "result_image_data_uri")),
        Candidate::UploadName(str_field(raw, "result_image")),
    ]);
    let original = resolver.first_resolved([
        Candidate::Field(str_field(raw, "original_image_path")),
        Candidate::Field(str_field(raw, "original_image_data_uri")),
        Candidate::UploadName(str_field(raw, "original_image")),
    ]);
    let gradcam = resolver.first_resolved([
        Candidate::Field(str_field(raw, "gradcam_path")),
        Candidate::Field(str_field(raw, "gradcam_image_data_uri")),
        Candidate::UploadName(str_field(raw, "gradcam_image")),
    ]);

    Ok(DetectionResult {
        label,
        confidence,
        description: str_field(raw, "description").to_string(),
        image_url: annotated.clone().unwrap_or_default(),
        gradcam_url: gradcam.clone(),
        prediction: opt_string(raw, "prediction"),
        model_version: opt_string(raw, "model_version"),
        analyzed_at: opt_string(raw, "analyzed_at"),
        original_image_url: original,
        gradcam_path: gradcam,
        annotated_image_url: annotated,
        stone_count: stone_count(raw),
    })
}
