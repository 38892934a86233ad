//! The independent feature extractors fused by `report`.

pub mod ai_voice;
pub mod artifacts;
pub mod baseline;
pub mod formants;

use serde::{ Deserialize, Serialize };
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "Male",
            Sex::Female => "Female",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label text for an optional sex, "Indeterminate" when the track had no data.
pub fn sex_label(sex: Option<Sex>) -> &'static str {
    sex.map(|s| s.as_str()).unwrap_or("Indeterminate")
}

/// One detector's verdict. `description` always cites the numbers behind it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceVector {
    pub vector: String,
    pub detected: bool,
    pub confidence: f64,
    pub description: String,
}

impl EvidenceVector {
    pub fn new(vector: &str, detected: bool, confidence: f32, description: String) -> Self {
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            vector: vector.to_string(),
            detected,
            confidence: crate::dsp::report_float(confidence as f64),
            description,
        }
    }
}

/// Count of true flags; used by the sub-detectors' "k of n indicators" rules.
#[inline]
pub(crate) fn count_true(flags: &[bool]) -> usize {
    flags.iter().filter(|&&f| f).count()
}
