//! Decision thresholds and frame geometry for every analysis phase.
//!
//! Values are empirical and the regression fixtures are calibrated against
//! them. A JSON file may override any subset; fields it omits keep these
//! defaults. Frame lengths are expressed at the nominal 22050 Hz rate and
//! scaled by each analyzer to the waveform's actual rate.

use anyhow::{ Context, Result };
use serde::{ Deserialize, Serialize };
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    pub pitch: PitchParams,
    pub formant: FormantParams,
    pub artifact: ArtifactParams,
    pub ai: AiParams,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchParams {
    pub fmin_hz: f32,
    pub fmax_hz: f32,
    pub frame_len: usize,
    pub hop_len: usize,
    /// Peak salience relative to the frame's strongest bin.
    pub salience_threshold: f32,
    /// Frames quieter than this RMS are unvoiced regardless of peaks.
    pub min_frame_rms: f32,
    /// `median_f0 > boundary` presents as Female.
    pub sex_boundary_hz: f32,
}

impl Default for PitchParams {
    fn default() -> Self {
        Self {
            fmin_hz: 75.0,
            fmax_hz: 400.0,
            frame_len: 2048,
            hop_len: 512,
            salience_threshold: 0.1,
            min_frame_rms: 1e-4,
            sex_boundary_hz: 165.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormantParams {
    pub time_step_s: f32,
    pub window_s: f32,
    pub max_formants: usize,
    pub ceiling_hz: f32,
    pub pre_emphasis_from_hz: f32,
    /// Frames this far below the loudest frame are treated as failed.
    pub silence_db: f32,
    pub f1_male_below_hz: f32,
    pub f1_female_above_hz: f32,
    pub f2_male_below_hz: f32,
}

impl Default for FormantParams {
    fn default() -> Self {
        Self {
            time_step_s: 0.01,
            window_s: 0.025,
            max_formants: 5,
            ceiling_hz: 5500.0,
            pre_emphasis_from_hz: 50.0,
            silence_db: 50.0,
            f1_male_below_hz: 550.0,
            f1_female_above_hz: 900.0,
            f2_male_below_hz: 1350.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactParams {
    pub incoherence_confidence: f32,
    pub incoherence_baseline_confidence: f32,
    pub spectral_confidence: f32,
    pub phase_confidence: f32,
    pub n_fft: usize,
    pub hop_len: usize,
    pub n_mels: usize,
    pub top_db: f32,
    pub noise_floor_percentile: f32,
    pub noise_floor_std_below_db: f32,
    pub harmonic_smoothness_above: f32,
    pub phase_variance_above: f32,
    pub onset_sharpness_below: f32,
    /// Below this overall RMS the spectral and phase checks are indeterminate.
    pub min_signal_rms: f32,
}

impl Default for ArtifactParams {
    fn default() -> Self {
        Self {
            incoherence_confidence: 0.95,
            incoherence_baseline_confidence: 0.05,
            spectral_confidence: 0.6,
            phase_confidence: 0.65,
            n_fft: 2048,
            hop_len: 512,
            n_mels: 128,
            top_db: 80.0,
            noise_floor_percentile: 10.0,
            noise_floor_std_below_db: 3.0,
            harmonic_smoothness_above: 2.5,
            phase_variance_above: 2.5,
            onset_sharpness_below: 0.5,
            min_signal_rms: 1e-4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiParams {
    /// Below this overall RMS every sub-detector is indeterminate.
    pub min_signal_rms: f32,
    pub n_fft: usize,
    pub hop_len: usize,
    pub n_mels: usize,
    pub top_db: f32,

    pub vocoder_n_fft: usize,
    pub vocoder_hf_split_hz: f32,
    pub vocoder_hf_gap_below_db: f32,
    pub vocoder_rolloff_std_below_hz: f32,
    pub vocoder_flux_cv_below: f32,
    /// Fraction of bins whose raw phase step exceeds `0.9 * pi`.
    pub vocoder_phase_jump_ratio_above: f32,
    pub vocoder_min_indicators: usize,

    pub prosody_min_voiced_frames: usize,
    pub prosody_pitch_delta_std_below_hz: f32,
    pub prosody_micro_variation_below_hz: f32,
    pub prosody_energy_delta_std_below: f32,
    pub prosody_correlation_above: f32,
    pub prosody_min_indicators: usize,

    pub pause_top_db: f32,
    pub pause_min_s: f32,
    pub pause_std_below_s: f32,
    pub breath_min_pause_s: f32,
    pub breath_energy_min: f32,
    pub breath_energy_max: f32,

    pub timing_min_onsets: usize,
    pub timing_ioi_cv_below: f32,
    pub timing_jitter_below_s: f32,

    pub harmonic_hnr_above_db: f32,
    pub harmonic_f0_std_below_hz: f32,
    pub harmonic_centroid_cv_below: f32,
    pub harmonic_hpss_kernel: usize,
    pub harmonic_max_seconds: f32,
    pub harmonic_min_indicators: usize,

    pub stats_n_mfcc: usize,
    pub stats_mfcc_std_below: f32,
    pub stats_skew_above: f32,
    pub stats_kurtosis_above: f32,
    pub stats_zcr_std_below: f32,
    pub stats_min_indicators: usize,
}

impl Default for AiParams {
    fn default() -> Self {
        Self {
            min_signal_rms: 1e-4,
            n_fft: 2048,
            hop_len: 512,
            n_mels: 128,
            top_db: 80.0,

            vocoder_n_fft: 4096,
            vocoder_hf_split_hz: 8000.0,
            vocoder_hf_gap_below_db: -40.0,
            vocoder_rolloff_std_below_hz: 500.0,
            vocoder_flux_cv_below: 0.3,
            vocoder_phase_jump_ratio_above: 0.15,
            vocoder_min_indicators: 2,

            prosody_min_voiced_frames: 10,
            prosody_pitch_delta_std_below_hz: 2.0,
            prosody_micro_variation_below_hz: 1.0,
            prosody_energy_delta_std_below: 0.005,
            prosody_correlation_above: 0.8,
            prosody_min_indicators: 3,

            pause_top_db: 30.0,
            pause_min_s: 0.05,
            pause_std_below_s: 0.05,
            breath_min_pause_s: 0.1,
            breath_energy_min: 0.001,
            breath_energy_max: 0.05,

            timing_min_onsets: 5,
            timing_ioi_cv_below: 0.15,
            timing_jitter_below_s: 0.01,

            harmonic_hnr_above_db: 25.0,
            harmonic_f0_std_below_hz: 1.0,
            harmonic_centroid_cv_below: 0.1,
            harmonic_hpss_kernel: 31,
            harmonic_max_seconds: 60.0,
            harmonic_min_indicators: 2,

            stats_n_mfcc: 20,
            stats_mfcc_std_below: 15.0,
            stats_skew_above: 1.5,
            stats_kurtosis_above: 4.0,
            stats_zcr_std_below: 0.02,
            stats_min_indicators: 2,
        }
    }
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            pitch: PitchParams::default(),
            formant: FormantParams::default(),
            artifact: ArtifactParams::default(),
            ai: AiParams::default(),
        }
    }
}

impl AnalysisParams {
    /// Load overrides from a JSON file; omitted fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading analysis params {}", path.display()))?;
        let params: AnalysisParams = serde_json::from_str(&text)
            .with_context(|| format!("parsing analysis params {}", path.display()))?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_override_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{ "pitch": { "fmax_hz": 500.0 }, "ai": { "timing_min_onsets": 8 } }"#)
            .unwrap();

        let params = AnalysisParams::from_json_file(&path).unwrap();
        assert_eq!(params.pitch.fmax_hz, 500.0);
        assert_eq!(params.pitch.sex_boundary_hz, 165.0);
        assert_eq!(params.ai.timing_min_onsets, 8);
        assert_eq!(params.formant, FormantParams::default());
        assert_eq!(params.artifact, ArtifactParams::default());
    }

    #[test]
    fn malformed_params_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = AnalysisParams::from_json_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("bad.json"));
    }
}
