//! Detection confidence with an explicit scale.
//!
//! The detector reports a 0–1 fraction, people read a 0–100 percentage, and
//! stored scans go back to 0–1. Keeping the scale next to the value means
//! converting never has to guess.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scale", content = "value", rename_all = "snake_case")]
pub enum Confidence {
    /// 0.0 ..= 1.0, as produced by the detector and stored with scans.
    Fraction(f64),
    /// 0.0 ..= 100.0, as displayed.
    Percent(f64),
}

impl Confidence {
    /// Display-scale confidence for a raw detector score: `round(c * 100)`.
    /// Scores outside 0–1 (or NaN) are clamped first.
    pub fn display_from_raw(raw: f64) -> Self {
        let clamped = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };
        Confidence::Percent((clamped * 100.0).round())
    }

    /// Reads a value whose scale is unknown: anything above 1 is taken to be
    /// a percentage. Exactly 1.0 is read as a fraction (100%), so a stored
    /// "1%" cannot be told apart from "100%".
    pub fn from_ambiguous(value: f64) -> Self {
        if value > 1.0 {
            Confidence::Percent(value)
        } else {
            Confidence::Fraction(value)
        }
    }

    pub fn percent(self) -> f64 {
        match self {
            Confidence::Fraction(v) => v * 100.0,
            Confidence::Percent(v) => v,
        }
    }

    pub fn fraction(self) -> f64 {
        match self {
            Confidence::Fraction(v) => v,
            Confidence::Percent(v) => v / 100.0,
        }
    }

    pub fn to_percent(self) -> Self {
        Confidence::Percent(self.percent())
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::Fraction(0.0)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent().round())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_scores_round_to_whole_percent() {
        assert_eq!(Confidence::display_from_raw(0.87), Confidence::Percent(87.0));
        assert_eq!(Confidence::display_from_raw(0.196), Confidence::Percent(20.0));
        assert_eq!(Confidence::display_from_raw(0.0), Confidence::Percent(0.0));
        assert_eq!(Confidence::display_from_raw(1.0), Confidence::Percent(100.0));
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        assert_eq!(Confidence::display_from_raw(1.7), Confidence::Percent(100.0));
        assert_eq!(Confidence::display_from_raw(-0.2), Confidence::Percent(0.0));
        assert_eq!(Confidence::display_from_raw(f64::NAN), Confidence::Percent(0.0));
    }

    #[test]
    fn every_whole_percent_maps_back_to_its_fraction() {
        for d in 0..=100 {
            let c = Confidence::Percent(d as f64);
            assert!((c.fraction() - d as f64 / 100.0).abs() < 1e-12);
        }
    }

    #[test]
    fn ambiguous_values_use_the_greater_than_one_rule() {
        assert_eq!(Confidence::from_ambiguous(87.0).fraction(), 0.87);
        assert_eq!(Confidence::from_ambiguous(0.87).fraction(), 0.87);
        // 1% stored as 1 reads back as 100%.
        assert_eq!(Confidence::from_ambiguous(1.0).percent(), 100.0);
        // With the scale known there is nothing to guess.
        assert_eq!(Confidence::Percent(1.0).fraction(), 0.01);
    }

    #[test]
    fn serializes_with_its_scale() {
        let json = serde_json::to_value(Confidence::Percent(87.0)).unwrap();
        assert_eq!(json, serde_json::json!({"scale": "percent", "value": 87.0}));
    }
}
