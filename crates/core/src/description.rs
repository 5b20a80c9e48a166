//! Medical-report description generation.
//!
//! Generation never fails from the caller's point of view: any upstream
//! problem produces a deterministic templated description with
//! `success: false` and the reason in `error`.

use crate::detection::stone_count;
use crate::models::DetectionResult;
use crate::severity::SeverityLabel;
use providers::{ProviderError, ProviderRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const UNKNOWN_LABEL: &str = "Tidak diketahui";
pub const MISSING_API_KEY: &str = "Gemini API key tidak ditemukan. Menggunakan deskripsi fallback.";

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptionRequest {
    pub image_url: Option<String>,
    pub stone_count: u32,
    /// Display-scale confidence (0–100).
    pub confidence: f64,
    pub label: String,
}

impl Default for DescriptionRequest {
    fn default() -> Self {
        Self {
            image_url: None,
            stone_count: 0,
            confidence: 0.0,
            label: UNKNOWN_LABEL.to_string(),
        }
    }
}

impl DescriptionRequest {
    /// Reads `{ imageUrl, detectionData, confidence, label }`; missing or
    /// mistyped fields fall back to their defaults.
    pub fn from_json(body: &Value) -> Self {
        let label = body
            .get("label")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_LABEL);
        Self {
            image_url: body
                .get("imageUrl")
                .and_then(Value::as_str)
                .map(str::to_string),
            stone_count: body.get("detectionData").and_then(stone_count).unwrap_or(0),
            confidence: body.get("confidence").and_then(Value::as_f64).unwrap_or(0.0),
            label: label.to_string(),
        }
    }

    pub fn from_result(result: &DetectionResult) -> Self {
        Self {
            image_url: Some(result.image_url.clone()).filter(|u| !u.is_empty()),
            stone_count: result.stone_count.unwrap_or(0),
            confidence: result.confidence.percent(),
            label: result.label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionResponse {
    pub description: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DescriptionResponse {
    pub fn fallback(req: &DescriptionRequest, error: impl Into<String>) -> Self {
        Self {
            description: fallback_description(req.stone_count, req.confidence, &req.label),
            success: false,
            error: Some(error.into()),
        }
    }

    /// Template text standing in for a generation that produced nothing;
    /// the upstream call itself succeeded.
    pub fn substituted(req: &DescriptionRequest) -> Self {
        Self {
            description: fallback_description(req.stone_count, req.confidence, &req.label),
            success: true,
            error: None,
        }
    }
}

pub fn build_prompt(req: &DescriptionRequest) -> String {
    let count = req.stone_count;
    let conf = req.confidence;
    let label = &req.label;
    let noun = if count == 1 { "batu" } else { "batu-batu" };
    let none_found = if count == 0 { "ya" } else { "tidak" };
    format!(
        "Anda adalah ahli radiologi berpengalaman yang menganalisis hasil CT Scan untuk deteksi batu ginjal.

**Data Hasil Analisis:**
- Jumlah batu ginjal terdeteksi: {count} {noun}
- Tingkat kepercayaan deteksi: {conf}%
- Kategori tingkat keparahan: {label}
- Metode deteksi: Model YOLOv8 (You Only Look Once) untuk deteksi objek

**Tugas Anda:**
Buatkan deskripsi analisis medis yang komprehensif dan profesional dalam bahasa Indonesia dengan struktur berikut:

1. **Ringkasan Hasil Analisis**
   - Berikan ringkasan singkat tentang hasil deteksi batu ginjal
   - Sebutkan jumlah batu ginjal yang terdeteksi dengan jelas

2. **Analisis Detail**
   - Jelaskan interpretasi dari jumlah batu ginjal yang terdeteksi
   - Analisis tingkat kepercayaan deteksi ({conf}%)
   - Penjelasan kategori {label} dan implikasinya

3. **Tingkat Keparahan**
   - Berdasarkan kategori {label} dan confidence score {conf}%
   - Jelaskan apa artinya dalam konteks medis

4. **Rekomendasi Medis**
   - Berikan rekomendasi tindakan lanjutan yang sesuai
   - Saran untuk konsultasi dengan dokter spesialis jika diperlukan
   - Catatan penting tentang interpretasi hasil

**Panduan Penulisan:**
- Gunakan bahasa Indonesia yang jelas dan mudah dipahami
- Tetap profesional dan sesuai dengan konteks medis
- Hindari diagnosis definitif, gunakan istilah \"indikasi\" atau \"menunjukkan\"
- Fokus pada informasi yang bermanfaat untuk pasien dan tenaga medis
- Jika tidak ada batu yang terdeteksi ({none_found}), jelaskan dengan jelas

Buat deskripsi yang informatif, akurat, dan membantu dalam proses diagnosis lebih lanjut."
    )
}

fn severity_sentence(label: &str) -> &'static str {
    match label.parse::<SeverityLabel>() {
        Ok(SeverityLabel::Aman) => {
            "Hasil analisis menunjukkan kondisi yang relatif aman dengan tingkat kepercayaan rendah."
        }
        Ok(SeverityLabel::Ringan) => {
            "Hasil analisis menunjukkan indikasi ringan dengan beberapa tanda yang perlu diperhatikan."
        }
        Ok(SeverityLabel::Sedang) => {
            "Hasil analisis menunjukkan indikasi sedang yang memerlukan perhatian medis lebih lanjut."
        }
        Ok(SeverityLabel::Berat) => {
            "Hasil analisis menunjukkan indikasi berat yang memerlukan evaluasi medis segera."
        }
        Ok(SeverityLabel::SangatSerius) => {
            "Hasil analisis menunjukkan indikasi sangat serius yang memerlukan perhatian medis segera."
        }
        Err(_) => "Hasil analisis menunjukkan deteksi batu ginjal.",
    }
}

/// Deterministic report used whenever generation is unavailable.
pub fn fallback_description(stone_count: u32, confidence: f64, label: &str) -> String {
    let count_text = match stone_count {
        0 => "Tidak terdeteksi batu ginjal".to_string(),
        1 => "Terdeteksi 1 batu ginjal".to_string(),
        n => format!("Terdeteksi {n} batu ginjal"),
    };
    let severity = severity_sentence(label);
    format!(
        "## Ringkasan Hasil Analisis

**{count_text}** dalam CT Scan yang dianalisis.

### Tingkat Keparahan
{severity} Tingkat kepercayaan deteksi: **{confidence}%**.

### Rekomendasi
Disarankan untuk berkonsultasi dengan dokter spesialis urologi untuk evaluasi lebih lanjut dan penanganan yang sesuai. Hasil ini merupakan bantuan diagnosis dan tidak menggantikan konsultasi medis profesional."
    )
}

pub async fn generate_description(
    req: &DescriptionRequest,
    registry: &ProviderRegistry,
    provider: Option<&str>,
) -> DescriptionResponse {
    debug!(
        has_image_url = req.image_url.is_some(),
        stones = req.stone_count,
        confidence = req.confidence,
        label = %req.label,
        "description requested"
    );

    let generator = match registry.generator(provider) {
        Ok(g) => g,
        Err(ProviderError::UnknownProvider(name)) if name == "gemini" => {
            warn!("gemini API key not configured, using fallback description");
            return DescriptionResponse::fallback(req, MISSING_API_KEY);
        }
        Err(e) => {
            warn!(error = %e, "no text generator available, using fallback description");
            return DescriptionResponse::fallback(
                req,
                format!("text generator unavailable ({e}); using fallback description"),
            );
        }
    };

    match generator.generate(&build_prompt(req)).await {
        Ok(text) if !text.trim().is_empty() => {
            info!(len = text.len(), "description generated");
            DescriptionResponse {
                description: text,
                success: true,
                error: None,
            }
        }
        Ok(_) => {
            warn!("generator returned empty text, using fallback description");
            DescriptionResponse::substituted(req)
        }
        Err(ProviderError::Blocked(reason)) => {
            warn!(%reason, "prompt blocked by safety filter, using fallback description");
            DescriptionResponse::substituted(req)
        }
        Err(e) => {
            warn!(error = %e, "description generation failed, using fallback");
            DescriptionResponse::fallback(req, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fallback_mentions_count_and_confidence() {
        let text = fallback_description(3, 87.0, "Sangat Serius");
        assert!(text.contains("Terdeteksi 3 batu ginjal"));
        assert!(text.contains("**87%**"));
        assert!(text.contains("indikasi sangat serius"));
    }

    #[test]
    fn fallback_wording_for_zero_and_one_stone() {
        assert!(fallback_description(0, 12.0, "Aman").contains("Tidak terdeteksi batu ginjal"));
        assert!(fallback_description(1, 12.5, "Aman").contains("Terdeteksi 1 batu ginjal"));
        assert!(fallback_description(1, 12.5, "Aman").contains("**12.5%**"));
        assert!(fallback_description(2, 50.0, UNKNOWN_LABEL)
            .contains("Hasil analisis menunjukkan deteksi batu ginjal."));
    }

    #[test]
    fn request_reads_detection_array_and_defaults() {
        let req = DescriptionRequest::from_json(&json!({
            "imageUrl": "http://x/a.png",
            "detectionData": {"detections": [{}, {}]},
            "confidence": 64,
        }));
        assert_eq!(req.stone_count, 2);
        assert_eq!(req.confidence, 64.0);
        assert_eq!(req.label, UNKNOWN_LABEL);
        assert_eq!(req.image_url.as_deref(), Some("http://x/a.png"));

        let empty = DescriptionRequest::from_json(&json!({}));
        assert_eq!(empty, DescriptionRequest::default());
    }

    #[test]
    fn prompt_carries_the_analysis_numbers() {
        let prompt = build_prompt(&DescriptionRequest {
            image_url: None,
            stone_count: 1,
            confidence: 45.0,
            label: "Sedang".into(),
        });
        assert!(prompt.contains("Jumlah batu ginjal terdeteksi: 1 batu\n"));
        assert!(prompt.contains("Tingkat kepercayaan deteksi: 45%"));
        assert!(prompt.contains("Kategori tingkat keparahan: Sedang"));
        assert!(prompt.contains("Jika tidak ada batu yang terdeteksi (tidak)"));
    }

    #[tokio::test]
    async fn missing_generator_yields_fallback() {
        let registry = ProviderRegistry::new().set_preferred_generator("gemini");
        let req = DescriptionRequest {
            stone_count: 2,
            confidence: 71.0,
            label: "Berat".into(),
            ..DescriptionRequest::default()
        };
        let resp = generate_description(&req, &registry, None).await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some(MISSING_API_KEY));
        assert!(resp.description.contains("Terdeteksi 2 batu ginjal"));
        assert!(resp.description.contains("**71%**"));

        let reg = ProviderRegistry::new().set_preferred_generator("local");
        let resp = generate_description(&req, &reg, None).await;
        assert!(resp.error.unwrap().contains("local"));
    }

    struct Canned(Result<&'static str, &'static str>);

    #[async_trait::async_trait]
    impl providers::TextGenerator for Canned {
        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err("blocked") => Err(ProviderError::Blocked("SAFETY".into())),
                Err(other) => Err(ProviderError::RequestFailed(other.to_string())),
            }
        }
    }

    async fn describe_with(canned: Canned) -> DescriptionResponse {
        let registry = ProviderRegistry::new()
            .with_generator("canned", std::sync::Arc::new(canned))
            .set_preferred_generator("canned");
        let req = DescriptionRequest {
            stone_count: 1,
            confidence: 55.0,
            label: "Sedang".into(),
            ..DescriptionRequest::default()
        };
        generate_description(&req, &registry, None).await
    }

    #[tokio::test]
    async fn empty_or_blocked_output_is_substituted_but_successful() {
        for canned in [Canned(Ok("  \n")), Canned(Err("blocked"))] {
            let resp = describe_with(canned).await;
            assert!(resp.success);
            assert!(resp.error.is_none());
            assert!(resp.description.contains("Terdeteksi 1 batu ginjal"));
            assert!(resp.description.contains("**55%**"));
        }
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let resp = describe_with(Canned(Err("connection reset"))).await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("request failed: connection reset"));
    }
}
