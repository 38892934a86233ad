// ───────────────────────────────────────────────────────────────────────────────
// One analysis invocation: load → F0 → formants → artifacts → AI → fuse → sign
// ───────────────────────────────────────────────────────────────────────────────
use anyhow::{ Context, Result };
use chrono::{ SecondsFormat, Utc };
use std::{ path::Path, sync::Arc };

use crate::{
    decode::{ self, Waveform },
    integrity::{ AudioFingerprint, ChainOfCustody, IntegrityVerifier },
    logger::Logger,
    params::AnalysisParams,
    phases::{
        ai_voice::AiVoiceDetector,
        artifacts::ArtifactAnalyzer,
        baseline::BaselineF0Analyzer,
        formants::FormantAnalyzer,
        sex_label,
    },
    report::{ AnalysisReport, ReportSynthesizer },
};

/// Holds no per-file state; one instance may serve many files in sequence.
pub struct Pipeline {
    params: AnalysisParams,
    verifier: IntegrityVerifier,
    working_sr: u32,
    analyst_id: Option<String>,
    logger: Arc<Logger>,
}

/// A signed report and the custody record of the file it came from.
#[derive(Debug)]
pub struct AnalyzedFile {
    pub report: AnalysisReport,
    pub custody: ChainOfCustody,
}

/// Asset id of an input: its file stem.
pub fn asset_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Pipeline {
    pub fn new(params: AnalysisParams, pipeline_version: &str, working_sr: u32, logger: Arc<Logger>) -> Self {
        Self {
            params,
            verifier: IntegrityVerifier::new(pipeline_version),
            working_sr,
            analyst_id: None,
            logger,
        }
    }

    pub fn with_analyst_id(mut self, analyst_id: Option<String>) -> Self {
        self.analyst_id = analyst_id;
        self
    }

    /// Decode, analyze and sign one file. Errors name the file.
    pub fn analyze_file(&self, path: &Path, asset_id: &str) -> Result<AnalyzedFile> {
        let audio = decode::load(path).with_context(|| format!("loading {}", path.display()))?;
        self.logger.info(
            &format!(
                "[{}] decoded {} Hz, {} ch, {:.2} s ({} bytes)",
                asset_id,
                audio.native.sample_rate(),
                audio.channels,
                audio.native.duration_s(),
                audio.bytes.len()
            )
        )?;

        let fingerprint = AudioFingerprint::of(&audio);
        let report = self.analyze_waveform(asset_id, &audio.native)?;
        let signed = self.verifier
            .sign(report, &fingerprint)
            .with_context(|| format!("signing report for {}", path.display()))?;

        if let Some(v) = &signed.verification {
            self.logger.info(
                &format!(
                    "[{}] signed: file {} waveform {} report {}",
                    asset_id,
                    v.audio_file_hash_sha256,
                    v.audio_waveform_hash_sha256,
                    v.report_hash_sha256
                )
            )?;
        }
        let custody = self.verifier.chain_of_custody(path, &fingerprint, &signed, self.analyst_id.as_deref());
        crate::log_debug!(self.logger, "[{}] custody {} by {}", asset_id, custody.custody_id, custody.analyst_id)?;
        Ok(AnalyzedFile { report: signed, custody })
    }

    /// Run the phases on a native-rate waveform. The result is unsigned.
    pub fn analyze_waveform(&self, asset_id: &str, native: &Waveform) -> Result<AnalysisReport> {
        let p = &self.params;
        let waveform = native.resampled(self.working_sr);
        let analysis_timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let f0 = BaselineF0Analyzer::new(p.pitch.clone()).analyze(&waveform);
        crate::log_info!(
            self.logger,
            "[{}] phase 1 F0: median {:.1} Hz over {}/{} voiced frames → {}",
            asset_id,
            f0.median_hz.unwrap_or(0.0),
            f0.voiced_count(),
            f0.frames.len(),
            sex_label(f0.presented_sex)
        )?;

        let formants = FormantAnalyzer::new(p.formant.clone()).analyze(&waveform);
        crate::log_info!(
            self.logger,
            "[{}] phase 2 formants: F1 {:.0} F2 {:.0} F3 {:.0} Hz over {} frames → {}",
            asset_id,
            formants.f1_median_hz.unwrap_or(0.0),
            formants.f2_median_hz.unwrap_or(0.0),
            formants.f3_median_hz.unwrap_or(0.0),
            formants.valid_frames(),
            sex_label(formants.probable_sex)
        )?;

        if f0.is_indeterminate() || formants.is_indeterminate() {
            crate::log_warn!(
                self.logger,
                "[{}] insufficient signal (F0 {}, formants {}); incoherence will be indeterminate",
                asset_id,
                sex_label(f0.presented_sex),
                sex_label(formants.probable_sex)
            )?;
        }

        let artifacts = ArtifactAnalyzer::new(p.artifact.clone()).analyze(&waveform, &f0, &formants);
        for v in artifacts.vectors() {
            crate::log_debug!(self.logger, "[{}]   {} → {}", asset_id, v.vector, v.description)?;
        }
        crate::log_info!(
            self.logger,
            "[{}] phase 3 artifacts: incoherence={} spectral={} phase={}",
            asset_id,
            artifacts.incoherence.detected,
            artifacts.spectral.detected,
            artifacts.phase.detected
        )?;

        let ai = AiVoiceDetector::new(p.ai.clone(), p.pitch.clone()).analyze(&waveform);
        for v in &ai.vectors {
            crate::log_debug!(self.logger, "[{}]   {} → {}", asset_id, v.vector, v.description)?;
        }
        crate::log_info!(
            self.logger,
            "[{}] phase 4 AI: {}/{} sub-detectors, score {:.2}, type {}",
            asset_id,
            ai.detections,
            ai.vectors.len(),
            ai.score,
            ai.ai_type
        )?;

        let report = ReportSynthesizer::synthesize(asset_id, analysis_timestamp, &f0, &formants, &artifacts, &ai);
        crate::log_info!(
            self.logger,
            "[{}] phase 5 fusion: {} vector(s) → {:.2} ({})",
            asset_id,
            report.evidence_count,
            report.confidence_score,
            report.confidence_label
        )?;
        Ok(report)
    }
}
