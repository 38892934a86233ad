//! Synthetic-speech signatures. Six independent sub-detectors, each a
//! "k of n indicators" rule over plain signal statistics:
//!
//! | vector | indicators |
//! |---|---|
//! | vocoder signature | HF/LF dB gap, rolloff std, flux CV, phase-jump ratio |
//! | prosody | pitch-delta std, pitch micro-variation, RMS-delta std, pitch/energy correlation |
//! | breathing/pauses | pause-length regularity, no weak broadband energy in pauses |
//! | micro-timing | inter-onset CV, detrended onset jitter |
//! | harmonic structure | HPSS harmonic/percussive ratio, F0 std, centroid CV |
//! | statistical moments | MFCC std, MFCC skew/kurtosis, ZCR std |
//!
//! The type label comes from a fixed priority list, first match wins.
//! In evidence text a trailing `!` marks an indicator that tripped.

use std::f32::consts::PI;

use crate::decode::Waveform;
use crate::dsp::{ self, MelBank, Stft };
use crate::params::{ AiParams, PitchParams };
use super::baseline::track_pitch;
use super::{ count_true, EvidenceVector };

pub const VECTOR_VOCODER: &str = "ai_vocoder_signature";
pub const VECTOR_PROSODY: &str = "ai_prosody";
pub const VECTOR_BREATHING: &str = "ai_breathing_pauses";
pub const VECTOR_TIMING: &str = "ai_micro_timing";
pub const VECTOR_HARMONIC: &str = "ai_harmonic_structure";
pub const VECTOR_STATISTICAL: &str = "ai_statistical_moments";

pub const AI_TYPE_NONE: &str = "None";

/// Vector that must have fired, and the label it assigns. Checked top to bottom.
pub const AI_TYPE_PRIORITY: [(&str, &str); 6] = [
    (VECTOR_VOCODER, "Neural Vocoder (WaveNet/WaveGlow/HiFi-GAN)"),
    (VECTOR_HARMONIC, "Neural Vocoder (Harmonic Resynthesis)"),
    (VECTOR_PROSODY, "TTS System (Tacotron/FastSpeech)"),
    (VECTOR_BREATHING, "Voice Cloning (Real-Time VC)"),
    (VECTOR_TIMING, "TTS System (Duration Model)"),
    (VECTOR_STATISTICAL, "AI-Generated (Type Unknown)"),
];

#[derive(Clone, Debug)]
pub struct AiResult {
    /// Always six entries, in detector order.
    pub vectors: Vec<EvidenceVector>,
    pub ai_voice_detected: bool,
    pub ai_type: String,
    pub score: f64,
    pub detections: usize,
}

impl AiResult {
    pub fn from_vectors(vectors: Vec<EvidenceVector>) -> Self {
        let detections = vectors.iter().filter(|v| v.detected).count();
        Self {
            ai_type: classify_ai_type(&vectors).to_string(),
            ai_voice_detected: detections >= 1,
            score: ai_score(detections),
            detections,
            vectors,
        }
    }
}

/// Score by number of triggered sub-detectors.
pub fn ai_score(detections: usize) -> f64 {
    match detections {
        0 => 0.0,
        1 => 0.3,
        2 => 0.6,
        3 => 0.8,
        4 => 0.9,
        _ => 0.95,
    }
}

pub fn classify_ai_type(vectors: &[EvidenceVector]) -> &'static str {
    AI_TYPE_PRIORITY
        .iter()
        .find(|(name, _)| vectors.iter().any(|v| v.detected && v.vector == *name))
        .map(|(_, label)| *label)
        .unwrap_or(AI_TYPE_NONE)
}

fn verdict(name: &str, hits: usize, total: usize, needed: usize, findings: Vec<String>) -> EvidenceVector {
    let detected = hits >= needed;
    let confidence = (hits as f32) / (total.max(1) as f32);
    let summary = findings.join("; ");
    let description = if detected {
        format!("{}/{} indicators: {}", hits, total, summary)
    } else {
        format!("Below threshold ({}/{} indicators, {} needed): {}", hits, total, needed, summary)
    };
    EvidenceVector::new(name, detected, confidence, description)
}

fn indeterminate(name: &str, why: String) -> EvidenceVector {
    EvidenceVector::new(name, false, 0.0, format!("Indeterminate: {}", why))
}

fn mark(hit: bool) -> &'static str {
    if hit { "!" } else { "" }
}

// ── vocoder signature ─────────────────────────────────────────────────────────

/// Frame statistics behind the vocoder verdict.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VocoderStats {
    /// Mean dB above the split minus mean dB below it; `None` when the split is out of range.
    pub hf_gap_db: Option<f32>,
    pub rolloff_std_hz: f32,
    pub flux_cv: f32,
    pub phase_jump_ratio: f32,
}

/// One pass over the frames; only the previous frame's magnitudes and phases are kept.
/// Needs at least two frames.
pub fn vocoder_stats(stft: &Stft, p: &AiParams) -> VocoderStats {
    let n_bins = stft.n_bins();
    let bin_hz = stft.bin_hz();
    let nyquist = (stft.sample_rate as f32) * 0.5;
    let split = ((p.vocoder_hf_split_hz / nyquist) * (n_bins as f32)) as usize;
    let has_split = split > 0 && split < n_bins;

    // dB relative to the loudest bin, floored at -top_db
    let peak = stft.frames
        .iter()
        .flat_map(|f| f.iter().map(|c| c.norm_sqr()))
        .fold(0.0f32, f32::max);
    let ref_db = 10.0 * peak.max(dsp::AMIN_POWER).log10();
    let to_db = |power: f32| (10.0 * power.max(dsp::AMIN_POWER).log10() - ref_db).max(-p.top_db);

    let (mut lf, mut hf) = (0.0f64, 0.0f64);
    let mut rolloff = Vec::with_capacity(stft.frames.len());
    let mut flux = Vec::with_capacity(stft.frames.len());
    let (mut jumps, mut steps) = (0usize, 0usize);
    let mut prev_mag: Vec<f32> = Vec::new();
    let mut prev_phase: Vec<f32> = Vec::new();
    let mut mag = vec![0.0f32; n_bins];
    let mut phase = vec![0.0f32; n_bins];

    for frame in &stft.frames {
        let mut total = 0.0f32;
        for (k, c) in frame.iter().enumerate().take(n_bins) {
            mag[k] = c.norm();
            phase[k] = c.im.atan2(c.re);
            total += mag[k];
            if has_split {
                let db = to_db(c.norm_sqr()) as f64;
                if k < split {
                    lf += db;
                } else {
                    hf += db;
                }
            }
        }

        rolloff.push(if total <= 0.0 {
            0.0
        } else {
            let target = 0.85 * total;
            let mut acc = 0.0f32;
            mag.iter()
                .position(|&m| {
                    acc += m;
                    acc >= target
                })
                .map(|k| (k as f32) * bin_hz)
                .unwrap_or(nyquist)
        });

        if !prev_mag.is_empty() {
            let sq: f32 = mag
                .iter()
                .zip(prev_mag.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            flux.push((sq / (n_bins as f32)).sqrt());
            for (cur, prev) in phase.iter().zip(prev_phase.iter()) {
                steps += 1;
                if (cur - prev).abs() > 0.9 * PI {
                    jumps += 1;
                }
            }
        }
        std::mem::swap(&mut prev_mag, &mut mag);
        std::mem::swap(&mut prev_phase, &mut phase);
        mag.resize(n_bins, 0.0);
        phase.resize(n_bins, 0.0);
    }

    let gap = if has_split {
        let frames = stft.frames.len() as f64;
        let lf_mean = lf / (frames * (split as f64));
        let hf_mean = hf / (frames * ((n_bins - split) as f64));
        Some((hf_mean - lf_mean) as f32)
    } else {
        None
    };
    VocoderStats {
        hf_gap_db: gap,
        rolloff_std_hz: dsp::std_dev(&rolloff),
        flux_cv: dsp::coeff_of_variation(&flux),
        phase_jump_ratio: (jumps as f32) / (steps.max(1) as f32),
    }
}

pub fn vocoder_check(stft: &Stft, p: &AiParams) -> EvidenceVector {
    if stft.frames.len() < 2 {
        return indeterminate(VECTOR_VOCODER, "fewer than two spectral frames".into());
    }
    let VocoderStats { hf_gap_db: gap, rolloff_std_hz: rolloff_std, flux_cv, phase_jump_ratio: jump_ratio } =
        vocoder_stats(stft, p);

    let low_hf = gap.map(|g| g < p.vocoder_hf_gap_below_db).unwrap_or(false);
    let steady_rolloff = rolloff_std < p.vocoder_rolloff_std_below_hz;
    let steady_flux = flux_cv < p.vocoder_flux_cv_below;
    let phase_jumps = jump_ratio > p.vocoder_phase_jump_ratio_above;
    let flags = [low_hf, steady_rolloff, steady_flux, phase_jumps];

    let gap_text = gap
        .map(|g| format!("HF/LF gap {:.1} dB{}", g, mark(low_hf)))
        .unwrap_or_else(|| "HF/LF gap n/a (band above Nyquist)".into());
    let findings = vec![
        gap_text,
        format!("rolloff std {:.1} Hz{}", rolloff_std, mark(steady_rolloff)),
        format!("flux CV {:.3}{}", flux_cv, mark(steady_flux)),
        format!("phase-jump ratio {:.3}{}", jump_ratio, mark(phase_jumps)),
    ];
    verdict(VECTOR_VOCODER, count_true(&flags), flags.len(), p.vocoder_min_indicators, findings)
}

// ── prosody ───────────────────────────────────────────────────────────────────

/// `pitch` and `energy` share one frame grid; unvoiced frames are `None`.
pub fn prosody_check(pitch: &[Option<f32>], energy: &[f32], p: &AiParams) -> EvidenceVector {
    let contour: Vec<f32> = pitch.iter().filter_map(|f| *f).collect();
    if contour.len() < p.prosody_min_voiced_frames {
        return indeterminate(
            VECTOR_PROSODY,
            format!("{} voiced frames < {}", contour.len(), p.prosody_min_voiced_frames)
        );
    }

    let delta_std = dsp::std_dev(&dsp::diff(&contour));
    let smoothed = dsp::savgol_11_quadratic(&contour);
    let micro = if smoothed.is_empty() {
        None
    } else {
        let residual: Vec<f32> = smoothed.iter().map(|&(i, s)| contour[i] - s).collect();
        Some(dsp::std_dev(&residual))
    };
    let energy_delta_std = dsp::std_dev(&dsp::diff(energy));

    let (voiced_pitch, voiced_energy): (Vec<f32>, Vec<f32>) = pitch
        .iter()
        .zip(energy.iter())
        .filter_map(|(f, &e)| f.map(|f| (f, e)))
        .unzip();
    let corr = dsp::correlation(&voiced_pitch, &voiced_energy);

    let too_smooth = delta_std < p.prosody_pitch_delta_std_below_hz;
    let no_micro = micro.map(|m| m < p.prosody_micro_variation_below_hz).unwrap_or(false);
    let flat_energy = energy_delta_std < p.prosody_energy_delta_std_below;
    let locked = corr.abs() > p.prosody_correlation_above;
    let flags = [too_smooth, no_micro, flat_energy, locked];

    let findings = vec![
        format!("pitch-delta std {:.2} Hz{}", delta_std, mark(too_smooth)),
        micro
            .map(|m| format!("micro-variation {:.2} Hz{}", m, mark(no_micro)))
            .unwrap_or_else(|| "micro-variation n/a".into()),
        format!("RMS-delta std {:.4}{}", energy_delta_std, mark(flat_energy)),
        format!("pitch/energy correlation {:.2}{}", corr, mark(locked)),
    ];
    verdict(VECTOR_PROSODY, count_true(&flags), flags.len(), p.prosody_min_indicators, findings)
}

// ── breathing / pauses ────────────────────────────────────────────────────────

/// Non-silent `[start, end)` sample ranges: frames within `top_db` of the loudest.
pub fn split_nonsilent(samples: &[f32], frame_len: usize, hop: usize, top_db: f32) -> Vec<(usize, usize)> {
    let energy = dsp::frame_rms(samples, frame_len, hop);
    let peak = energy.iter().copied().fold(0.0f32, f32::max);
    if peak <= 0.0 {
        return Vec::new();
    }
    let floor = peak * (10.0f32).powf(-top_db / 20.0);
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (t, &e) in energy.iter().enumerate() {
        match (e > floor, start) {
            (true, None) => {
                start = Some(t);
            }
            (false, Some(s)) => {
                out.push(((s * hop).min(samples.len()), (t * hop).min(samples.len())));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push(((s * hop).min(samples.len()), samples.len()));
    }
    out
}

pub fn breathing_check(samples: &[f32], sr: u32, frame_len: usize, hop: usize, p: &AiParams) -> EvidenceVector {
    let intervals = split_nonsilent(samples, frame_len, hop, p.pause_top_db);
    let srf = sr.max(1) as f32;

    let gaps: Vec<(usize, usize)> = intervals
        .windows(2)
        .map(|pair| (pair[0].1, pair[1].0))
        .filter(|(a, b)| b > a)
        .collect();
    let pauses: Vec<f32> = gaps
        .iter()
        .map(|(a, b)| ((b - a) as f32) / srf)
        .filter(|&d| d > p.pause_min_s)
        .collect();
    let pause_std = dsp::std_dev(&pauses);
    let regular = pauses.is_empty() || pause_std < p.pause_std_below_s;

    // first-order low-frequency emphasis, y[n] = x[n] + 0.97 x[n-1]
    let mut breath_energy: Option<f32> = None;
    for &(a, b) in &gaps {
        if ((b - a) as f32) / srf <= p.breath_min_pause_s {
            continue;
        }
        let mut acc = 0.0f32;
        for n in a..b {
            let prev = if n > 0 { samples[n - 1] } else { 0.0 };
            acc += (samples[n] + 0.97 * prev).abs();
        }
        let level = acc / ((b - a) as f32);
        if level > p.breath_energy_min && level < p.breath_energy_max {
            breath_energy = Some(level);
            break;
        }
    }
    let breathless = breath_energy.is_none();
    let flags = [regular, breathless];

    let findings = vec![
        if pauses.is_empty() {
            format!("no pauses longer than {:.2} s{}", p.pause_min_s, mark(regular))
        } else {
            format!("{} pauses, duration std {:.3} s{}", pauses.len(), pause_std, mark(regular))
        },
        match breath_energy {
            Some(level) => format!("breath-like energy {:.4} in a pause", level),
            None => "no breath-like energy in pauses!".into(),
        },
    ];
    verdict(VECTOR_BREATHING, count_true(&flags), flags.len(), flags.len(), findings)
}

// ── micro-timing ──────────────────────────────────────────────────────────────

/// Onset frames from an onset-strength envelope (normalized, local max above local mean).
pub fn pick_onsets(env: &[f32], sr: u32, hop: usize) -> Vec<usize> {
    let lo = env.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = env.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if env.is_empty() || !(hi - lo > 1e-9) {
        return Vec::new();
    }
    let x: Vec<f32> = env.iter().map(|v| (v - lo) / (hi - lo)).collect();
    let fps = (sr as f32) / (hop.max(1) as f32);
    let pre_max = (0.03 * fps) as usize;
    let post_max = 1usize;
    let pre_avg = (0.1 * fps) as usize;
    let post_avg = pre_avg + 1;
    let wait = pre_max;
    const DELTA: f32 = 0.07;

    let mut peaks = Vec::new();
    let mut last: Option<usize> = None;
    for n in 0..x.len() {
        let local_max = x[n.saturating_sub(pre_max)..(n + post_max).min(x.len())]
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        if x[n] < local_max {
            continue;
        }
        let window = &x[n.saturating_sub(pre_avg)..(n + post_avg).min(x.len())];
        let avg = window.iter().sum::<f32>() / (window.len() as f32);
        if x[n] < avg + DELTA {
            continue;
        }
        if last.map(|l| n <= l + wait).unwrap_or(false) {
            continue;
        }
        peaks.push(n);
        last = Some(n);
    }
    peaks
}

pub fn timing_check(onsets_s: &[f32], p: &AiParams) -> EvidenceVector {
    if onsets_s.len() < p.timing_min_onsets {
        return indeterminate(VECTOR_TIMING, format!("{} onsets < {}", onsets_s.len(), p.timing_min_onsets));
    }
    let ioi = dsp::diff(onsets_s);
    let cv = dsp::coeff_of_variation(&ioi);
    let jitter = if ioi.len() > 3 {
        let trend = dsp::moving_average(&ioi, ioi.len().min(5));
        let detrended: Vec<f32> = ioi.iter().zip(trend.iter()).map(|(v, t)| v - t).collect();
        Some(dsp::std_dev(&detrended))
    } else {
        None
    };

    let metronomic = cv < p.timing_ioi_cv_below;
    let no_jitter = jitter.map(|j| j < p.timing_jitter_below_s).unwrap_or(false);
    let flags = [metronomic, no_jitter];
    let findings = vec![
        format!("{} onsets, IOI CV {:.3}{}", onsets_s.len(), cv, mark(metronomic)),
        jitter
            .map(|j| format!("jitter {:.4} s{}", j, mark(no_jitter)))
            .unwrap_or_else(|| "jitter n/a".into()),
    ];
    verdict(VECTOR_TIMING, count_true(&flags), flags.len(), 1, findings)
}

// ── harmonic structure ────────────────────────────────────────────────────────

/// Median over a centered window that shrinks at the edges.
fn median_filter(values: &[f32], kernel: usize) -> Vec<f32> {
    let half = kernel.max(1) / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            dsp::median(&values[lo..hi]).unwrap_or(0.0)
        })
        .collect()
}

/// Harmonic-to-percussive energy ratio (dB) from median-filter HPSS with soft masks.
pub fn harmonic_percussive_ratio_db(mags: &[Vec<f32>], kernel: usize) -> f32 {
    let n_frames = mags.len();
    let n_bins = mags.first().map(|f| f.len()).unwrap_or(0);
    if n_frames == 0 || n_bins == 0 {
        return 0.0;
    }

    // harmonic: smooth along time for each bin
    let mut harmonic = vec![vec![0.0f32; n_bins]; n_frames];
    let mut track = vec![0.0f32; n_frames];
    for k in 0..n_bins {
        for (t, frame) in mags.iter().enumerate() {
            track[t] = frame[k];
        }
        for (t, v) in median_filter(&track, kernel).into_iter().enumerate() {
            harmonic[t][k] = v;
        }
    }

    let (mut eh, mut ep) = (0.0f64, 0.0f64);
    for (t, frame) in mags.iter().enumerate() {
        // percussive: smooth along frequency within the frame
        let percussive = median_filter(frame, kernel);
        for k in 0..n_bins {
            let h2 = (harmonic[t][k] as f64).powi(2);
            let p2 = (percussive[k] as f64).powi(2);
            let total = h2 + p2;
            if total <= 0.0 {
                continue;
            }
            let s2 = (frame[k] as f64).powi(2);
            eh += s2 * (h2 / total).powi(2);
            ep += s2 * (p2 / total).powi(2);
        }
    }
    (10.0 * ((eh + 1e-10) / (ep + 1e-10)).log10()) as f32
}

pub fn harmonic_check(
    hpr_db: f32,
    pitch: &[Option<f32>],
    centroids: &[f32],
    p: &AiParams
) -> EvidenceVector {
    let voiced: Vec<f32> = pitch.iter().filter_map(|f| *f).collect();
    let f0_std = if voiced.len() > 10 { Some(dsp::std_dev(&voiced)) } else { None };
    let centroid_cv = dsp::coeff_of_variation(centroids);

    let high_hnr = hpr_db > p.harmonic_hnr_above_db;
    let rigid_f0 = f0_std.map(|s| s < p.harmonic_f0_std_below_hz).unwrap_or(false);
    let steady_centroid = !centroids.is_empty() && centroid_cv < p.harmonic_centroid_cv_below;
    let flags = [high_hnr, rigid_f0, steady_centroid];

    let findings = vec![
        format!("harmonic/percussive ratio {:.1} dB{}", hpr_db, mark(high_hnr)),
        f0_std
            .map(|s| format!("F0 std {:.2} Hz{}", s, mark(rigid_f0)))
            .unwrap_or_else(|| format!("F0 std n/a ({} voiced frames)", voiced.len())),
        format!("centroid CV {:.3}{}", centroid_cv, mark(steady_centroid)),
    ];
    verdict(VECTOR_HARMONIC, count_true(&flags), flags.len(), p.harmonic_min_indicators, findings)
}

fn spectral_centroids(stft: &Stft) -> Vec<f32> {
    let bin_hz = stft.bin_hz();
    stft.frames
        .iter()
        .filter_map(|frame| {
            let total: f32 = frame.iter().map(|c| c.norm()).sum();
            if total <= 0.0 {
                return None;
            }
            let weighted: f32 = frame
                .iter()
                .enumerate()
                .map(|(k, c)| (k as f32) * bin_hz * c.norm())
                .sum();
            Some(weighted / total)
        })
        .collect()
}

// ── statistical moments ───────────────────────────────────────────────────────

/// Fraction of sign changes per centered frame.
pub fn zero_crossing_rates(samples: &[f32], frame_len: usize, hop: usize) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let frame_len = frame_len.max(2);
    let hop = hop.max(1);
    let pad = frame_len / 2;
    let n_frames = (samples.len() + 2 * pad - frame_len) / hop + 1;
    (0..n_frames)
        .map(|f| {
            let start = (f * hop) as isize - (pad as isize);
            let mut crossings = 0usize;
            let mut prev: Option<bool> = None;
            for j in 0..frame_len {
                let idx = start + (j as isize);
                let v = if idx >= 0 && (idx as usize) < samples.len() { samples[idx as usize] } else { 0.0 };
                let sign = v >= 0.0;
                if prev.map(|s| s != sign).unwrap_or(false) {
                    crossings += 1;
                }
                prev = Some(sign);
            }
            (crossings as f32) / (frame_len as f32)
        })
        .collect()
}

/// `mfcc[frame][coef]` plus per-frame zero-crossing rates.
pub fn statistical_check(mfcc: &[Vec<f32>], zcr: &[f32], p: &AiParams) -> EvidenceVector {
    let n_coef = mfcc.first().map(|f| f.len()).unwrap_or(0);
    if mfcc.len() < 2 || n_coef == 0 {
        return indeterminate(VECTOR_STATISTICAL, format!("{} MFCC frames", mfcc.len()));
    }
    let (mut std_sum, mut skew_sum, mut kurt_sum) = (0.0f32, 0.0f32, 0.0f32);
    for c in 0..n_coef {
        let series: Vec<f32> = mfcc.iter().map(|frame| frame[c]).collect();
        std_sum += dsp::std_dev(&series);
        let (skew, kurt) = dsp::skew_kurtosis(&series);
        skew_sum += skew.abs();
        kurt_sum += kurt.abs();
    }
    let n = n_coef as f32;
    let (mean_std, mean_skew, mean_kurt) = (std_sum / n, skew_sum / n, kurt_sum / n);
    let zcr_std = dsp::std_dev(zcr);

    let low_variance = mean_std < p.stats_mfcc_std_below;
    let abnormal = mean_skew > p.stats_skew_above || mean_kurt > p.stats_kurtosis_above;
    let steady_zcr = zcr_std < p.stats_zcr_std_below;
    let flags = [low_variance, abnormal, steady_zcr];

    let findings = vec![
        format!("mean MFCC std {:.2}{}", mean_std, mark(low_variance)),
        format!("mean |skew| {:.2}, mean |kurtosis| {:.2}{}", mean_skew, mean_kurt, mark(abnormal)),
        format!("ZCR std {:.4}{}", zcr_std, mark(steady_zcr)),
    ];
    verdict(VECTOR_STATISTICAL, count_true(&flags), flags.len(), p.stats_min_indicators, findings)
}

// ── detector ──────────────────────────────────────────────────────────────────

pub struct AiVoiceDetector {
    params: AiParams,
    pitch: PitchParams,
}

impl AiVoiceDetector {
    pub fn new(params: AiParams, pitch: PitchParams) -> Self {
        Self { params, pitch }
    }

    pub fn analyze(&self, waveform: &Waveform) -> AiResult {
        let p = &self.params;
        let samples = waveform.samples();
        let sr = waveform.sample_rate();

        let level = dsp::rms(samples);
        if waveform.is_empty() || level < p.min_signal_rms {
            let why = format!("insufficient signal (RMS {:.6} < {:.6})", level, p.min_signal_rms);
            let vectors = [
                VECTOR_VOCODER,
                VECTOR_PROSODY,
                VECTOR_BREATHING,
                VECTOR_TIMING,
                VECTOR_HARMONIC,
                VECTOR_STATISTICAL,
            ]
                .iter()
                .map(|name| indeterminate(name, why.clone()))
                .collect();
            return AiResult::from_vectors(vectors);
        }

        let n_fft = dsp::scale_to_rate(p.n_fft, sr);
        let hop = dsp::scale_to_rate(p.hop_len, sr);
        let stft = Stft::compute(samples, sr, n_fft, hop);
        let mel = MelBank::new(sr, n_fft, p.n_mels, 0.0, (sr as f32) * 0.5).spectrogram(&stft);
        let mel_db = dsp::power_to_db(&mel, Some(1.0), p.top_db);

        let vocoder = {
            let wide = Stft::compute(samples, sr, dsp::scale_to_rate(p.vocoder_n_fft, sr), hop);
            vocoder_check(&wide, p)
        };

        let pitch_frames = track_pitch(samples, sr, &self.pitch);
        let energy = dsp::frame_rms(
            samples,
            dsp::scale_to_rate(self.pitch.frame_len, sr),
            dsp::scale_to_rate(self.pitch.hop_len, sr)
        );
        let prosody = prosody_check(&pitch_frames, &energy, p);

        let breathing = breathing_check(samples, sr, n_fft, hop, p);

        let onsets: Vec<f32> = pick_onsets(&dsp::onset_strength(&mel_db), sr, hop)
            .into_iter()
            .map(|f| ((f * hop) as f32) / (sr as f32))
            .collect();
        let timing = timing_check(&onsets, p);

        let harmonic = {
            let limit = ((p.harmonic_max_seconds * (sr as f32)) as usize).min(samples.len());
            let head = if limit == samples.len() { None } else { Some(Stft::compute(&samples[..limit], sr, n_fft, hop)) };
            let hpss_stft = head.as_ref().unwrap_or(&stft);
            let hpr = harmonic_percussive_ratio_db(&hpss_stft.magnitudes(), p.harmonic_hpss_kernel);
            harmonic_check(hpr, &pitch_frames, &spectral_centroids(&stft), p)
        };

        let mfcc: Vec<Vec<f32>> = mel_db
            .iter()
            .map(|frame| dsp::dct_ii_ortho(frame, p.stats_n_mfcc))
            .collect();
        let statistical = statistical_check(&mfcc, &zero_crossing_rates(samples, n_fft, hop), p);

        AiResult::from_vectors(vec![vocoder, prosody, breathing, timing, harmonic, statistical])
    }
}
