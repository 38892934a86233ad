//! Manipulation artifacts: three independent vectors.
//!
//! * pitch/formant incoherence: the presented sex contradicts the physical one
//! * spectral artifacts: a too-stable noise floor, or ringing in the envelope
//! * phase decoherence: scrambled frame-to-frame phase, or smeared transients
//!
//! Missing baselines and near-silent input make the affected vector
//! indeterminate. None of the checks fires on absent data.

use crate::decode::Waveform;
use crate::dsp::{ self, MelBank, Stft };
use crate::params::ArtifactParams;
use super::baseline::F0Track;
use super::formants::FormantTrack;
use super::{ sex_label, EvidenceVector };

pub const VECTOR_INCOHERENCE: &str = "pitch_formant_incoherence";
pub const VECTOR_SPECTRAL: &str = "spectral_artifacts";
pub const VECTOR_PHASE: &str = "phase_decoherence";

/// Raw statistics behind the spectral and phase verdicts. Zero when indeterminate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArtifactMetrics {
    pub noise_floor_std_db: f32,
    pub envelope_gradient_std: f32,
    pub phase_variance: f32,
    pub phase_entropy: f32,
    pub onset_sharpness: f32,
}

/// Phase-difference statistics and onset sharpness from `phase_check`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhaseStats {
    pub variance: f32,
    /// Entropy (nats) of a 50-bin histogram of the wrapped differences.
    pub entropy: f32,
    pub sharpness: f32,
}

const PHASE_HISTOGRAM_BINS: usize = 50;

#[derive(Clone, Debug)]
pub struct ArtifactResult {
    pub incoherence: EvidenceVector,
    pub spectral: EvidenceVector,
    pub phase: EvidenceVector,
    pub metrics: ArtifactMetrics,
    pub overall_manipulation_detected: bool,
}

impl ArtifactResult {
    pub fn vectors(&self) -> [&EvidenceVector; 3] {
        [&self.incoherence, &self.spectral, &self.phase]
    }
}

/// Contradiction between the presented and the physical sex label.
pub fn incoherence_check(f0: &F0Track, formants: &FormantTrack, p: &ArtifactParams) -> EvidenceVector {
    let f0_desc = f0.median_hz.map(|m| format!("F0 {:.1} Hz", m)).unwrap_or_else(|| "no voiced frames".into());
    let fmt_desc = match (formants.f1_median_hz, formants.f2_median_hz) {
        (Some(f1), Some(f2)) => format!("F1 {:.1} Hz, F2 {:.1} Hz", f1, f2),
        (Some(f1), None) => format!("F1 {:.1} Hz, F2 unresolved", f1),
        _ => "no resolvable formants".into(),
    };

    match (f0.presented_sex, formants.probable_sex) {
        (Some(presented), Some(probable)) if presented != probable => EvidenceVector::new(
            VECTOR_INCOHERENCE,
            true,
            p.incoherence_confidence,
            format!("Pitch suggests {} ({}), but formants suggest {} ({})", presented, f0_desc, probable, fmt_desc)
        ),
        (Some(presented), Some(_)) => EvidenceVector::new(
            VECTOR_INCOHERENCE,
            false,
            p.incoherence_baseline_confidence,
            format!("Pitch and formants are coherent: both {} ({}; {})", presented, f0_desc, fmt_desc)
        ),
        (presented, probable) => EvidenceVector::new(
            VECTOR_INCOHERENCE,
            false,
            0.0,
            format!(
                "Indeterminate: insufficient data (presented {} from {}; probable {} from {})",
                sex_label(presented),
                f0_desc,
                sex_label(probable),
                fmt_desc
            )
        ),
    }
}

/// Noise-floor stability and envelope smoothness over a `[frame][band]` dB matrix
/// referenced to its maximum.
pub fn spectral_check(mel_db: &[Vec<f32>], p: &ArtifactParams) -> (EvidenceVector, f32, f32) {
    if mel_db.is_empty() {
        let ev = EvidenceVector::new(VECTOR_SPECTRAL, false, 0.0, "Indeterminate: no spectral frames".into());
        return (ev, 0.0, 0.0);
    }

    let floors: Vec<f32> = mel_db
        .iter()
        .map(|frame| dsp::percentile(frame, p.noise_floor_percentile))
        .collect();
    let floor_std = dsp::std_dev(&floors);

    let n_bands = mel_db[0].len();
    let n_frames = mel_db.len() as f32;
    let envelope: Vec<f32> = (0..n_bands)
        .map(|b| mel_db.iter().map(|frame| frame.get(b).copied().unwrap_or(0.0)).sum::<f32>() / n_frames)
        .collect();
    let smoothness = dsp::std_dev(&dsp::gradient(&envelope));

    let stable_floor = floor_std < p.noise_floor_std_below_db;
    let ringing = smoothness > p.harmonic_smoothness_above;

    let mut findings = Vec::new();
    if stable_floor {
        findings.push(format!(
            "Consistent noise floor detected (std: {:.2} dB < {:.2})",
            floor_std,
            p.noise_floor_std_below_db
        ));
    }
    if ringing {
        findings.push(format!(
            "Unnatural harmonic structure (smoothness: {:.2} > {:.2})",
            smoothness,
            p.harmonic_smoothness_above
        ));
    }
    let detected = !findings.is_empty();
    let description = if detected {
        findings.join("; ")
    } else {
        format!(
            "No significant mel artifacts detected (noise floor std {:.2} dB, smoothness {:.2})",
            floor_std,
            smoothness
        )
    };
    let confidence = if detected { p.spectral_confidence } else { 0.0 };
    (EvidenceVector::new(VECTOR_SPECTRAL, detected, confidence, description), floor_std, smoothness)
}

/// Wrapped frame-to-frame phase variance, plus onset-envelope sharpness.
pub fn phase_check(phases: &[Vec<f32>], onset_env: &[f32], p: &ArtifactParams) -> (EvidenceVector, PhaseStats) {
    let mut deltas: Vec<f32> = Vec::new();
    for pair in phases.windows(2) {
        for (cur, prev) in pair[1].iter().zip(pair[0].iter()) {
            deltas.push(dsp::wrap_phase(cur - prev));
        }
    }
    let variance = {
        let s = dsp::std_dev(&deltas);
        s * s
    };
    let entropy = dsp::histogram_entropy(&deltas, PHASE_HISTOGRAM_BINS);
    let sharpness = {
        let d = dsp::diff(onset_env);
        if d.is_empty() { 0.0 } else { d.iter().map(|v| v.abs()).sum::<f32>() / (d.len() as f32) }
    };

    let scrambled = variance > p.phase_variance_above;
    let smeared = sharpness < p.onset_sharpness_below;

    let mut findings = Vec::new();
    if scrambled {
        findings.push(format!("High phase variance detected ({:.2} > {:.2})", variance, p.phase_variance_above));
    }
    if smeared {
        findings.push(format!(
            "Transient smearing detected (sharpness: {:.2} < {:.2})",
            sharpness,
            p.onset_sharpness_below
        ));
    }
    let detected = !findings.is_empty();
    let description = if detected {
        findings.join("; ")
    } else {
        format!(
            "Phase coherence normal (variance {:.2}, entropy {:.2}, sharpness {:.2})",
            variance,
            entropy,
            sharpness
        )
    };
    let confidence = if detected { p.phase_confidence } else { 0.0 };
    (EvidenceVector::new(VECTOR_PHASE, detected, confidence, description), PhaseStats { variance, entropy, sharpness })
}

pub struct ArtifactAnalyzer {
    params: ArtifactParams,
}

impl ArtifactAnalyzer {
    pub fn new(params: ArtifactParams) -> Self {
        Self { params }
    }

    pub fn analyze(&self, waveform: &Waveform, f0: &F0Track, formants: &FormantTrack) -> ArtifactResult {
        let p = &self.params;
        let incoherence = incoherence_check(f0, formants, p);

        let level = dsp::rms(waveform.samples());
        let (spectral, phase, metrics) = if waveform.is_empty() || level < p.min_signal_rms {
            let note = format!("Indeterminate: insufficient signal (RMS {:.6} < {:.6})", level, p.min_signal_rms);
            (
                EvidenceVector::new(VECTOR_SPECTRAL, false, 0.0, note.clone()),
                EvidenceVector::new(VECTOR_PHASE, false, 0.0, note),
                ArtifactMetrics::default(),
            )
        } else {
            let sr = waveform.sample_rate();
            let n_fft = dsp::scale_to_rate(p.n_fft, sr);
            let hop = dsp::scale_to_rate(p.hop_len, sr);
            let stft = Stft::compute(waveform.samples(), sr, n_fft, hop);
            let mel = MelBank::new(sr, n_fft, p.n_mels, 0.0, (sr as f32) * 0.5).spectrogram(&stft);

            let (spectral, noise_floor_std_db, envelope_gradient_std) =
                spectral_check(&dsp::power_to_db(&mel, None, p.top_db), p);
            let onset_env = dsp::onset_strength(&dsp::power_to_db(&mel, Some(1.0), p.top_db));
            let (phase, stats) = phase_check(&stft.phases(), &onset_env, p);
            let metrics = ArtifactMetrics {
                noise_floor_std_db,
                envelope_gradient_std,
                phase_variance: stats.variance,
                phase_entropy: stats.entropy,
                onset_sharpness: stats.sharpness,
            };
            (spectral, phase, metrics)
        };

        let overall_manipulation_detected = incoherence.detected || spectral.detected || phase.detected;
        ArtifactResult { incoherence, spectral, phase, metrics, overall_manipulation_detected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::FormantParams;
    use crate::phases::Sex;
    use rand::rngs::StdRng;
    use rand::{ Rng, SeedableRng };

    fn f0_track(median: Option<f32>, sex: Option<Sex>) -> F0Track {
        F0Track {
            frames: median.map(|m| vec![Some(m); 20]).unwrap_or_else(|| vec![None; 20]),
            median_hz: median,
            mean_hz: median.unwrap_or(0.0),
            std_hz: 0.0,
            presented_sex: sex,
        }
    }

    fn formant_track(f1: f32, f2: f32) -> FormantTrack {
        FormantTrack::from_frames(vec![f1; 10], vec![f2; 10], vec![2900.0; 10], &FormantParams::default())
    }

    #[test]
    fn contradiction_fires_with_fixed_confidence() {
        let p = ArtifactParams::default();
        let ev = incoherence_check(&f0_track(Some(170.0), Some(Sex::Female)), &formant_track(374.0, 2347.0), &p);
        assert!(ev.detected);
        assert_eq!(ev.confidence, 0.95);
        assert!(ev.description.contains("170.0"));
        assert!(ev.description.contains("374.0"));
    }

    #[test]
    fn agreement_reports_low_baseline() {
        let p = ArtifactParams::default();
        let ev = incoherence_check(&f0_track(Some(120.0), Some(Sex::Male)), &formant_track(400.0, 1200.0), &p);
        assert!(!ev.detected);
        assert_eq!(ev.confidence, 0.05);
    }

    #[test]
    fn missing_pitch_never_fires_incoherence() {
        let p = ArtifactParams::default();
        for formants in [formant_track(374.0, 2347.0), formant_track(1000.0, 2500.0)] {
            let ev = incoherence_check(&f0_track(None, None), &formants, &p);
            assert!(!ev.detected);
            assert_eq!(ev.confidence, 0.0);
            assert!(ev.description.starts_with("Indeterminate"));
        }
    }

    #[test]
    fn missing_formants_never_fire_incoherence() {
        let p = ArtifactParams::default();
        let nan = f32::NAN;
        let formants = FormantTrack::from_frames(vec![nan; 4], vec![nan; 4], vec![nan; 4], &FormantParams::default());
        let ev = incoherence_check(&f0_track(Some(200.0), Some(Sex::Female)), &formants, &p);
        assert!(!ev.detected);
        assert!(ev.description.contains("no resolvable formants"));
    }

    #[test]
    fn frozen_noise_floor_is_flagged() {
        let p = ArtifactParams::default();
        let frame: Vec<f32> = (0..128).map(|b| -60.0 + (b as f32) * 0.1).collect();
        let db = vec![frame; 50];
        let (ev, floor_std, smoothness) = spectral_check(&db, &p);
        assert!(ev.detected);
        assert!(floor_std < 1e-4);
        assert!(smoothness < p.harmonic_smoothness_above);
        assert!(ev.description.contains("Consistent noise floor"));
        assert_eq!(ev.confidence, 0.6);
    }

    #[test]
    fn wandering_floor_and_smooth_envelope_pass() {
        let p = ArtifactParams::default();
        let db: Vec<Vec<f32>> = (0..50)
            .map(|t| {
                let offset = if t % 2 == 0 { -70.0 } else { -30.0 };
                (0..128).map(|b| offset + (b as f32) * 0.1).collect()
            })
            .collect();
        let (ev, floor_std, _) = spectral_check(&db, &p);
        assert!((floor_std - 20.0).abs() < 1e-3);
        assert!(!ev.detected, "{}", ev.description);
    }

    #[test]
    fn ringing_envelope_is_flagged() {
        let p = ArtifactParams::default();
        let db: Vec<Vec<f32>> = (0..50)
            .map(|t| {
                let offset = if t % 2 == 0 { -70.0 } else { -30.0 };
                (0..128).map(|b| offset + if b % 4 < 2 { 0.0 } else { 20.0 }).collect()
            })
            .collect();
        let (ev, _, smoothness) = spectral_check(&db, &p);
        assert!(smoothness > p.harmonic_smoothness_above);
        assert!(ev.detected);
        assert!(ev.description.contains("smoothness"));
    }

    #[test]
    fn scrambled_phase_is_flagged() {
        let p = ArtifactParams::default();
        let mut rng = StdRng::seed_from_u64(3);
        let phases: Vec<Vec<f32>> = (0..40)
            .map(|_| (0..256).map(|_| rng.random_range(-std::f32::consts::PI..std::f32::consts::PI)).collect())
            .collect();
        let sharp_env: Vec<f32> = (0..40).map(|t| if t % 4 == 0 { 10.0 } else { 0.0 }).collect();
        let (ev, stats) = phase_check(&phases, &sharp_env, &p);
        assert!(stats.variance > 2.5, "{}", stats.variance);
        assert!(stats.sharpness > 0.5);
        // uniform differences spread over all 50 bins: close to ln(50)
        assert!(stats.entropy > 3.5 && stats.entropy <= (50.0f32).ln() + 1e-3, "{}", stats.entropy);
        assert!(ev.detected);
        assert!(ev.description.contains("High phase variance"));
    }

    #[test]
    fn smeared_transients_alone_are_flagged() {
        let p = ArtifactParams::default();
        let phases = vec![vec![0.3f32; 64]; 40];
        let flat_env = vec![1.0f32; 40];
        let (ev, stats) = phase_check(&phases, &flat_env, &p);
        assert_eq!(stats.variance, 0.0);
        assert_eq!(stats.sharpness, 0.0);
        assert!(stats.entropy < 1e-3, "{}", stats.entropy);
        assert!(ev.detected);
        assert!(ev.description.contains("Transient smearing"));
        assert!(!ev.description.contains("High phase variance"));
    }

    #[test]
    fn silence_is_indeterminate_everywhere() {
        let w = Waveform::new(vec![0.0; 22_050], 22_050);
        let result = ArtifactAnalyzer::new(ArtifactParams::default()).analyze(
            &w,
            &f0_track(None, None),
            &formant_track(374.0, 2347.0)
        );
        assert!(!result.overall_manipulation_detected);
        for ev in result.vectors() {
            assert!(!ev.detected);
            assert!(ev.description.starts_with("Indeterminate"), "{}", ev.description);
        }
        assert_eq!(result.metrics, ArtifactMetrics::default());
    }
}
