use crate::confidence::Confidence;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Display bucket derived from detection confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeverityLabel {
    Aman,
    Ringan,
    Sedang,
    Berat,
    #[serde(rename = "Sangat Serius")]
    SangatSerius,
}

impl SeverityLabel {
    pub const ALL: [SeverityLabel; 5] = [
        SeverityLabel::Aman,
        SeverityLabel::Ringan,
        SeverityLabel::Sedang,
        SeverityLabel::Berat,
        SeverityLabel::SangatSerius,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aman => "Aman",
            Self::Ringan => "Ringan",
            Self::Sedang => "Sedang",
            Self::Berat => "Berat",
            Self::SangatSerius => "Sangat Serius",
        }
    }
}

impl fmt::Display for SeverityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeverityLabel {
    type Err = SeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|label| label.as_str() == s.trim())
            .ok_or_else(|| SeverityError::UnknownLabel(s.to_string()))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SeverityError {
    #[error("expected 4 severity thresholds, got {0}")]
    WrongCount(usize),
    #[error("severity thresholds must be strictly increasing within 0–100: {0:?}")]
    NotIncreasing(Vec<f64>),
    #[error("unknown severity label: {0}")]
    UnknownLabel(String),
}

/// Lower bounds (display percent) of Ringan, Sedang, Berat and Sangat Serius.
/// These are presentation heuristics, not clinical cut-offs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityThresholds {
    bounds: [f64; 4],
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            bounds: [20.0, 40.0, 60.0, 80.0],
        }
    }
}

impl SeverityThresholds {
    pub fn new(bounds: &[f64]) -> Result<Self, SeverityError> {
        let bounds: [f64; 4] = bounds
            .try_into()
            .map_err(|_| SeverityError::WrongCount(bounds.len()))?;
        let in_range = bounds.iter().all(|b| (0.0..=100.0).contains(b));
        let increasing = bounds.windows(2).all(|w| w[0] < w[1]);
        if !in_range || !increasing {
            return Err(SeverityError::NotIncreasing(bounds.to_vec()));
        }
        Ok(Self { bounds })
    }

    pub fn bounds(&self) -> &[f64; 4] {
        &self.bounds
    }

    /// Lower bound inclusive, upper bound exclusive.
    pub fn classify(&self, confidence: Confidence) -> SeverityLabel {
        let pct = confidence.percent();
        let [ringan, sedang, berat, serius] = self.bounds;
        if pct < ringan {
            SeverityLabel::Aman
        } else if pct < sedang {
            SeverityLabel::Ringan
        } else if pct < berat {
            SeverityLabel::Sedang
        } else if pct < serius {
            SeverityLabel::Berat
        } else {
            SeverityLabel::SangatSerius
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(pct: f64) -> SeverityLabel {
        SeverityThresholds::default().classify(Confidence::Percent(pct))
    }

    #[test]
    fn boundaries_are_lower_inclusive() {
        assert_eq!(label(0.0), SeverityLabel::Aman);
        assert_eq!(label(19.0), SeverityLabel::Aman);
        assert_eq!(label(20.0), SeverityLabel::Ringan);
        assert_eq!(label(39.0), SeverityLabel::Ringan);
        assert_eq!(label(40.0), SeverityLabel::Sedang);
        assert_eq!(label(60.0), SeverityLabel::Berat);
        assert_eq!(label(79.0), SeverityLabel::Berat);
        assert_eq!(label(80.0), SeverityLabel::SangatSerius);
        assert_eq!(label(100.0), SeverityLabel::SangatSerius);
    }

    #[test]
    fn fraction_scale_is_classified_on_percent() {
        let t = SeverityThresholds::default();
        assert_eq!(t.classify(Confidence::Fraction(0.87)), SeverityLabel::SangatSerius);
    }

    #[test]
    fn custom_thresholds_shift_buckets() {
        let t = SeverityThresholds::new(&[10.0, 30.0, 50.0, 90.0]).unwrap();
        assert_eq!(t.classify(Confidence::Percent(85.0)), SeverityLabel::Berat);
        assert_eq!(t.classify(Confidence::Percent(10.0)), SeverityLabel::Ringan);
    }

    #[test]
    fn rejects_malformed_thresholds() {
        assert_eq!(
            SeverityThresholds::new(&[20.0, 40.0]),
            Err(SeverityError::WrongCount(2))
        );
        assert!(matches!(
            SeverityThresholds::new(&[20.0, 20.0, 60.0, 80.0]),
            Err(SeverityError::NotIncreasing(_))
        ));
        assert!(SeverityThresholds::new(&[20.0, 40.0, 60.0, 180.0]).is_err());
    }

    #[test]
    fn labels_parse_and_serialize_with_spaces() {
        assert_eq!("Sangat Serius".parse::<SeverityLabel>(), Ok(SeverityLabel::SangatSerius));
        assert!("Kritis".parse::<SeverityLabel>().is_err());
        assert_eq!(
            serde_json::to_value(SeverityLabel::SangatSerius).unwrap(),
            serde_json::json!("Sangat Serius")
        );
    }
}
