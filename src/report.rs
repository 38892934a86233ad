//! Confidence fusion and the report document.
//!
//! Fusion counts the manipulation vectors that fired and looks the count up in
//! a fixed table. AI findings are reported alongside and never feed the count.

use anyhow::{ Context, Result };
use serde::{ Deserialize, Serialize };
use std::fmt::{ self, Write as _ };
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::dsp::report_float;
use crate::integrity::VerificationBlock;
use crate::phases::ai_voice::AiResult;
use crate::phases::artifacts::{ ArtifactMetrics, ArtifactResult };
use crate::phases::baseline::F0Track;
use crate::phases::formants::FormantTrack;
use crate::phases::{ sex_label, EvidenceVector };

/// Ordered: `Low < Medium < High < VeryHigh`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfidenceLabel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLabel::Low => "Low",
            ConfidenceLabel::Medium => "Medium",
            ConfidenceLabel::High => "High",
            ConfidenceLabel::VeryHigh => "VeryHigh",
        }
    }
}

impl fmt::Display for ConfidenceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `evidence_count -> (score, label)`. Not configurable.
pub fn fuse(evidence_count: usize, incoherence_confidence: f64) -> (f64, ConfidenceLabel) {
    match evidence_count {
        0 => (0.0, ConfidenceLabel::Low),
        1 => (incoherence_confidence.max(0.6), ConfidenceLabel::Medium),
        2 => (0.85, ConfidenceLabel::High),
        _ => (0.99, ConfidenceLabel::VeryHigh),
    }
}

/// Raw statistics behind the spectral and phase vectors; zero when indeterminate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeasurements {
    pub noise_floor_std_db: f64,
    pub spectral_smoothness: f64,
    pub phase_variance: f64,
    pub phase_entropy: f64,
    pub onset_sharpness: f64,
}

impl From<&ArtifactMetrics> for ArtifactMeasurements {
    fn from(m: &ArtifactMetrics) -> Self {
        Self {
            noise_floor_std_db: report_float(m.noise_floor_std_db as f64),
            spectral_smoothness: report_float(m.envelope_gradient_std as f64),
            phase_variance: report_float(m.phase_variance as f64),
            phase_entropy: report_float(m.phase_entropy as f64),
            onset_sharpness: report_float(m.onset_sharpness as f64),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub asset_id: String,
    pub analysis_timestamp: String,
    pub f0_median_hz: f64,
    pub f0_mean_hz: f64,
    pub f0_std_hz: f64,
    pub voiced_frames: usize,
    pub presented_sex: String,
    pub f1_median_hz: f64,
    pub f2_median_hz: f64,
    pub f3_median_hz: f64,
    pub formant_frames: usize,
    pub probable_sex: String,
    pub alteration_detected: bool,
    pub evidence_count: usize,
    pub confidence_score: f64,
    pub confidence_label: ConfidenceLabel,
    /// Three manipulation vectors, then six AI vectors.
    pub evidence: Vec<EvidenceVector>,
    #[serde(default)]
    pub artifact_metrics: ArtifactMeasurements,
    pub ai_voice_detected: bool,
    pub ai_type: String,
    pub ai_score: f64,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationBlock>,
}

impl AnalysisReport {
    pub fn manipulation_vectors(&self) -> &[EvidenceVector] {
        &self.evidence[..self.evidence.len().min(3)]
    }

    pub fn ai_vectors(&self) -> &[EvidenceVector] {
        self.evidence.get(3..).unwrap_or(&[])
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn hz(v: Option<f32>) -> f64 {
    report_float(v.map(|x| x as f64).unwrap_or(0.0))
}

pub struct ReportSynthesizer;

impl ReportSynthesizer {
    pub fn synthesize(
        asset_id: &str,
        analysis_timestamp: String,
        f0: &F0Track,
        formants: &FormantTrack,
        artifacts: &ArtifactResult,
        ai: &AiResult
    ) -> AnalysisReport {
        let manipulation: Vec<EvidenceVector> = artifacts
            .vectors()
            .iter()
            .map(|v| (*v).clone())
            .collect();
        let evidence_count = manipulation.iter().filter(|v| v.detected).count();
        let (score, confidence_label) = fuse(evidence_count, artifacts.incoherence.confidence);

        let mut evidence = manipulation;
        evidence.extend(ai.vectors.iter().cloned());

        let mut report = AnalysisReport {
            asset_id: asset_id.to_string(),
            analysis_timestamp,
            f0_median_hz: hz(f0.median_hz),
            f0_mean_hz: report_float(f0.mean_hz as f64),
            f0_std_hz: report_float(f0.std_hz as f64),
            voiced_frames: f0.voiced_count(),
            presented_sex: sex_label(f0.presented_sex).to_string(),
            f1_median_hz: hz(formants.f1_median_hz),
            f2_median_hz: hz(formants.f2_median_hz),
            f3_median_hz: hz(formants.f3_median_hz),
            formant_frames: formants.valid_frames(),
            probable_sex: sex_label(formants.probable_sex).to_string(),
            alteration_detected: evidence_count >= 1,
            evidence_count,
            confidence_score: report_float(score),
            confidence_label,
            evidence,
            artifact_metrics: ArtifactMeasurements::from(&artifacts.metrics),
            ai_voice_detected: ai.ai_voice_detected,
            ai_type: ai.ai_type.clone(),
            ai_score: report_float(ai.score),
            summary: String::new(),
            verification: None,
        };
        report.summary = summary_sentence(&report);
        report
    }
}

fn summary_sentence(r: &AnalysisReport) -> String {
    let fired: Vec<&str> = r
        .manipulation_vectors()
        .iter()
        .filter(|v| v.detected)
        .map(|v| v.vector.as_str())
        .collect();
    let verdict = if r.alteration_detected {
        format!(
            "ALTERATION DETECTED ({} confidence, {:.2}): {} of 3 manipulation vectors triggered ({}).",
            r.confidence_label,
            r.confidence_score,
            r.evidence_count,
            fired.join(", ")
        )
    } else {
        "No alteration detected: 0 of 3 manipulation vectors triggered.".to_string()
    };
    let baseline = format!(
        " Voice presents as {} (F0 median {:.1} Hz); vocal-tract resonances indicate {} (F1 {:.0} Hz, F2 {:.0} Hz).",
        r.presented_sex,
        r.f0_median_hz,
        r.probable_sex,
        r.f1_median_hz,
        r.f2_median_hz
    );
    let ai_fired = r.ai_vectors().iter().filter(|v| v.detected).count();
    let ai = if r.ai_voice_detected {
        format!(
            " Synthetic-speech indicators: {} of {} (score {:.2}, type: {}).",
            ai_fired,
            r.ai_vectors().len(),
            r.ai_score,
            r.ai_type
        )
    } else {
        " No synthetic-speech indicators.".to_string()
    };
    format!("{}{}{}", verdict, baseline, ai)
}

fn yes_no(b: bool) -> &'static str {
    if b { "YES" } else { "no" }
}

fn evidence_table(out: &mut String, vectors: &[EvidenceVector]) {
    let _ = writeln!(out, "| Vector | Detected | Confidence | Evidence |");
    let _ = writeln!(out, "|---|---|---|---|");
    for v in vectors {
        let _ = writeln!(
            out,
            "| {} | {} | {:.2} | {} |",
            v.vector,
            yes_no(v.detected),
            v.confidence,
            v.description.replace('|', "\\|")
        );
    }
}

/// Markdown rendering of the same fields. Formatting only.
pub fn to_markdown(r: &AnalysisReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Voice Coherence Analysis: {}\n", r.asset_id);
    let _ = writeln!(out, "_Analyzed {}_\n", r.analysis_timestamp);

    let _ = writeln!(out, "## Executive Summary\n");
    let _ = writeln!(out, "{}\n", r.summary);

    let _ = writeln!(out, "## Classification\n");
    let _ = writeln!(out, "| Field | Value |");
    let _ = writeln!(out, "|---|---|");
    let _ = writeln!(out, "| Alteration detected | {} |", yes_no(r.alteration_detected));
    let _ = writeln!(out, "| Evidence count | {} / 3 |", r.evidence_count);
    let _ = writeln!(out, "| Confidence | {:.2} ({}) |", r.confidence_score, r.confidence_label);
    let _ = writeln!(out, "| AI voice detected | {} |", yes_no(r.ai_voice_detected));
    let _ = writeln!(out, "| AI type | {} |", r.ai_type);
    let _ = writeln!(out, "| AI score | {:.2} |\n", r.ai_score);

    let _ = writeln!(out, "## Baseline Metrics\n");
    let _ = writeln!(out, "| Metric | Value |");
    let _ = writeln!(out, "|---|---|");
    let _ = writeln!(
        out,
        "| F0 (median / mean / std) | {:.1} / {:.1} / {:.1} Hz |",
        r.f0_median_hz,
        r.f0_mean_hz,
        r.f0_std_hz
    );
    let _ = writeln!(out, "| Voiced frames | {} |", r.voiced_frames);
    let _ = writeln!(out, "| Presented as | {} |", r.presented_sex);
    let _ = writeln!(
        out,
        "| Formants F1 / F2 / F3 | {:.0} / {:.0} / {:.0} Hz |",
        r.f1_median_hz,
        r.f2_median_hz,
        r.f3_median_hz
    );
    let _ = writeln!(out, "| Formant frames | {} |", r.formant_frames);
    let _ = writeln!(out, "| Probable sex | {} |\n", r.probable_sex);

    let _ = writeln!(out, "## Evidence Vectors\n");
    let _ = writeln!(out, "### Manipulation\n");
    evidence_table(&mut out, r.manipulation_vectors());
    let _ = writeln!(out, "\n### Artifact Measurements\n");
    let m = &r.artifact_metrics;
    let _ = writeln!(out, "| Measurement | Value |");
    let _ = writeln!(out, "|---|---|");
    let _ = writeln!(out, "| Noise floor std | {:.2} dB |", m.noise_floor_std_db);
    let _ = writeln!(out, "| Spectral smoothness | {:.2} |", m.spectral_smoothness);
    let _ = writeln!(out, "| Phase variance | {:.2} |", m.phase_variance);
    let _ = writeln!(out, "| Phase entropy | {:.2} nats |", m.phase_entropy);
    let _ = writeln!(out, "| Onset sharpness | {:.2} |", m.onset_sharpness);
    let _ = writeln!(out, "\n### Synthetic Speech\n");
    evidence_table(&mut out, r.ai_vectors());

    let _ = writeln!(out, "\n## Verification\n");
    match &r.verification {
        Some(v) => {
            let _ = writeln!(out, "| Field | Value |");
            let _ = writeln!(out, "|---|---|");
            let _ = writeln!(out, "| Protocol | {} |", v.protocol);
            let _ = writeln!(out, "| Signed (UTC) | {} |", v.timestamp_utc);
            let _ = writeln!(out, "| Pipeline version | {} |", v.pipeline_version);
            let _ = writeln!(out, "| Audio file | {} ({} bytes) |", v.audio_file_name, v.audio_file_size_bytes);
            let _ = writeln!(out, "| Audio file SHA-256 | `{}` |", v.audio_file_hash_sha256);
            let _ = writeln!(out, "| Waveform SHA-256 | `{}` |", v.audio_waveform_hash_sha256);
            let _ = writeln!(out, "| Report SHA-256 | `{}` |", v.report_hash_sha256);
        }
        None => {
            let _ = writeln!(out, "Report is not signed.");
        }
    }
    out
}

pub const CSV_HEADER: &str =
    "asset_id,analysis_timestamp,f0_median_hz,presented_sex,f1_median_hz,f2_median_hz,f3_median_hz,probable_sex,alteration_detected,evidence_count,confidence_score,confidence_label,ai_voice_detected,ai_type,ai_score,report_hash_sha256";

fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn csv_row(r: &AnalysisReport) -> String {
    let hash = r.verification.as_ref().map(|v| v.report_hash_sha256.as_str()).unwrap_or("");
    format!(
        "{},{},{:.1},{},{:.0},{:.0},{:.0},{},{},{},{:.2},{},{},{},{:.2},{}",
        csv_field(&r.asset_id),
        csv_field(&r.analysis_timestamp),
        r.f0_median_hz,
        r.presented_sex,
        r.f1_median_hz,
        r.f2_median_hz,
        r.f3_median_hz,
        r.probable_sex,
        r.alteration_detected,
        r.evidence_count,
        r.confidence_score,
        r.confidence_label,
        r.ai_voice_detected,
        csv_field(&r.ai_type),
        r.ai_score,
        hash
    )
}

/// Append one summary row, writing the header first when the file is empty.
pub fn append_summary_csv(path: &Path, r: &AnalysisReport) -> Result<()> {
    let mut csv_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening summary {}", path.display()))?;
    if csv_file.metadata()?.len() == 0 {
        writeln!(csv_file, "{}", CSV_HEADER)?;
    }
    writeln!(csv_file, "{}", csv_row(r))?;
    csv_file.flush()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::params::{ ArtifactParams, FormantParams };
    use crate::phases::ai_voice::{ AiResult, VECTOR_PROSODY, VECTOR_TIMING, VECTOR_VOCODER };
    use crate::phases::artifacts::{ incoherence_check, ArtifactMetrics, VECTOR_PHASE, VECTOR_SPECTRAL };
    use crate::phases::Sex;

    fn f0_track(median: f32) -> F0Track {
        let boundary = crate::params::PitchParams::default().sex_boundary_hz;
        F0Track {
            frames: vec![Some(median); 30],
            median_hz: Some(median),
            mean_hz: median,
            std_hz: 1.5,
            presented_sex: Some(crate::phases::baseline::classify_presented_sex(median, boundary)),
        }
    }

    fn formant_track(f1: f32, f2: f32, f3: f32) -> FormantTrack {
        FormantTrack::from_frames(vec![f1; 20], vec![f2; 20], vec![f3; 20], &FormantParams::default())
    }

    fn vector(name: &str, detected: bool, confidence: f32) -> EvidenceVector {
        EvidenceVector::new(name, detected, confidence, format!("{} check value 1.00", name))
    }

    fn artifacts(f0: &F0Track, formants: &FormantTrack, spectral: bool, phase: bool) -> ArtifactResult {
        let incoherence = incoherence_check(f0, formants, &ArtifactParams::default());
        let overall = incoherence.detected || spectral || phase;
        ArtifactResult {
            incoherence,
            spectral: vector(VECTOR_SPECTRAL, spectral, if spectral { 0.6 } else { 0.0 }),
            phase: vector(VECTOR_PHASE, phase, if phase { 0.65 } else { 0.0 }),
            metrics: ArtifactMetrics::default(),
            overall_manipulation_detected: overall,
        }
    }

    fn ai(fired: &[&str]) -> AiResult {
        let names = [VECTOR_VOCODER, VECTOR_PROSODY, "ai_breathing_pauses", VECTOR_TIMING, "ai_harmonic_structure", "ai_statistical_moments"];
        AiResult::from_vectors(names.iter().map(|n| vector(n, fired.contains(n), 0.5)).collect())
    }

    pub(crate) fn sample_report() -> AnalysisReport {
        let f0 = f0_track(170.0);
        let formants = formant_track(374.0, 2347.0, 2900.0);
        ReportSynthesizer::synthesize(
            "case-001",
            "2024-05-01T11:59:58.123Z".into(),
            &f0,
            &formants,
            &artifacts(&f0, &formants, true, true),
            &ai(&[VECTOR_PROSODY])
        )
    }

    #[test]
    fn fusion_table_is_exact() {
        assert_eq!(fuse(0, 0.05), (0.0, ConfidenceLabel::Low));
        assert_eq!(fuse(1, 0.05), (0.6, ConfidenceLabel::Medium));
        assert_eq!(fuse(1, 0.95), (0.95, ConfidenceLabel::Medium));
        assert_eq!(fuse(2, 0.95), (0.85, ConfidenceLabel::High));
        assert_eq!(fuse(3, 0.95), (0.99, ConfidenceLabel::VeryHigh));
        assert_eq!(fuse(1, f64::NAN), (0.6, ConfidenceLabel::Medium));
    }

    #[test]
    fn label_is_monotonic_in_evidence_count() {
        let labels: Vec<ConfidenceLabel> = (0..=3).map(|n| fuse(n, 0.05).1).collect();
        assert!(labels.windows(2).all(|w| w[0] <= w[1]));
        assert!(ConfidenceLabel::Low < ConfidenceLabel::Medium);
        assert!(ConfidenceLabel::High < ConfidenceLabel::VeryHigh);
    }

    #[test]
    fn pitched_up_male_is_very_high() {
        let r = sample_report();
        assert_eq!(r.presented_sex, "Female");
        assert_eq!(r.probable_sex, "Male");
        assert!(r.alteration_detected);
        assert_eq!(r.evidence_count, 3);
        assert_eq!(r.confidence_label, ConfidenceLabel::VeryHigh);
        assert_eq!(r.confidence_score, 0.99);
        assert_eq!(r.evidence.len(), 9);
        assert!(r.ai_voice_detected);
        assert_eq!(r.ai_type, "TTS System (Tacotron/FastSpeech)");
        assert!(r.summary.starts_with("ALTERATION DETECTED (VeryHigh"));
    }

    #[test]
    fn coherent_natural_voice_is_low() {
        let f0 = f0_track(120.0);
        let formants = formant_track(500.0, 1200.0, 2500.0);
        let r = ReportSynthesizer::synthesize(
            "natural",
            "t".into(),
            &f0,
            &formants,
            &artifacts(&f0, &formants, false, false),
            &ai(&[])
        );
        assert!(!r.alteration_detected);
        assert_eq!(r.evidence_count, 0);
        assert_eq!(r.confidence_label, ConfidenceLabel::Low);
        assert_eq!(r.confidence_score, 0.0);
        assert!(!r.ai_voice_detected);
        assert_eq!(r.ai_type, "None");
    }

    #[test]
    fn time_stretch_trips_phase_alone() {
        let f0 = f0_track(210.0);
        let formants = formant_track(950.0, 2200.0, 3000.0);
        let r = ReportSynthesizer::synthesize(
            "stretched",
            "t".into(),
            &f0,
            &formants,
            &artifacts(&f0, &formants, false, true),
            &ai(&[])
        );
        assert!(!r.evidence[0].detected);
        assert!(r.evidence[2].detected);
        assert_eq!(r.evidence_count, 1);
        assert_eq!(r.confidence_label, ConfidenceLabel::Medium);
        assert_eq!(r.confidence_score, 0.6);
    }

    #[test]
    fn silent_baseline_reports_indeterminate_not_male() {
        let f0 = F0Track {
            frames: vec![None; 30],
            median_hz: None,
            mean_hz: 0.0,
            std_hz: 0.0,
            presented_sex: None,
        };
        let formants = formant_track(374.0, 2347.0, 2900.0);
        let r = ReportSynthesizer::synthesize("s", "t".into(), &f0, &formants, &artifacts(&f0, &formants, false, false), &ai(&[]));
        assert_eq!(r.presented_sex, "Indeterminate");
        assert_eq!(r.f0_median_hz, 0.0);
        assert!(!r.evidence[0].detected);
        assert!(r.evidence[0].description.contains("Indeterminate"));
        assert_eq!(formants.probable_sex, Some(Sex::Male));
    }

    #[test]
    fn unsigned_report_omits_verification_key() {
        let json = serde_json::to_string(&sample_report()).unwrap();
        assert!(!json.contains("verification"));
        let back: AnalysisReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample_report());
    }

    #[test]
    fn markdown_has_every_section() {
        let md = to_markdown(&sample_report());
        for section in ["## Executive Summary", "## Classification", "## Baseline Metrics", "## Evidence Vectors", "## Verification"] {
            assert!(md.contains(section), "missing {section}");
        }
        assert!(md.contains("| pitch_formant_incoherence | YES | 0.95 |"));
        assert!(md.contains("Report is not signed."));
    }

    #[test]
    fn artifact_measurements_are_rounded_into_the_report() {
        let metrics = ArtifactMetrics {
            noise_floor_std_db: 1.5,
            envelope_gradient_std: 2.71828,
            phase_variance: 3.25,
            phase_entropy: f32::NAN,
            onset_sharpness: 0.125,
        };
        let m = ArtifactMeasurements::from(&metrics);
        assert_eq!(m.noise_floor_std_db, 1.5);
        assert_eq!(m.spectral_smoothness, 2.7183);
        assert_eq!(m.phase_variance, 3.25);
        assert_eq!(m.phase_entropy, 0.0);
        assert_eq!(m.onset_sharpness, 0.125);

        let f0 = f0_track(120.0);
        let formants = formant_track(500.0, 1200.0, 2500.0);
        let mut art = artifacts(&f0, &formants, false, false);
        art.metrics = metrics;
        let r = ReportSynthesizer::synthesize("m", String::new(), &f0, &formants, &art, &ai(&[]));
        assert_eq!(r.artifact_metrics, m);
        let md = to_markdown(&r);
        assert!(md.contains("### Artifact Measurements"));
        assert!(md.contains("| Spectral smoothness | 2.72 |"));
    }

    #[test]
    fn summary_csv_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        let r = sample_report();
        append_summary_csv(&path, &r).unwrap();
        append_summary_csv(&path, &r).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("case-001,2024-05-01T11:59:58.123Z,170.0,Female,374,2347,2900,Male,true,3,0.99,VeryHigh,true,"));
        assert_eq!(lines[1].split(',').count(), CSV_HEADER.split(',').count());
    }
}
