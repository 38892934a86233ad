//! Fundamental-frequency baseline: the pitch the recording *presents*.
//!
//! Per frame, the strongest interpolated spectral peak inside the voice band
//! whose magnitude clears `salience_threshold` of the frame maximum is taken as
//! F0. Frames without such a peak are unvoiced and never enter the statistics.

use crate::decode::Waveform;
use crate::dsp::{ self, Stft };
use crate::params::PitchParams;
use super::Sex;

#[derive(Clone, Debug)]
pub struct F0Track {
    /// Per-frame estimate, `None` where unvoiced.
    pub frames: Vec<Option<f32>>,
    /// Median over voiced frames only; `None` when nothing was voiced.
    pub median_hz: Option<f32>,
    pub mean_hz: f32,
    pub std_hz: f32,
    /// `None` marks insufficient data, never a guess.
    pub presented_sex: Option<Sex>,
}

impl F0Track {
    pub fn voiced_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_some()).count()
    }

    pub fn is_indeterminate(&self) -> bool {
        self.presented_sex.is_none()
    }
}

/// Fixed decision boundary: strictly above presents as Female.
pub fn classify_presented_sex(median_hz: f32, boundary_hz: f32) -> Sex {
    if median_hz > boundary_hz { Sex::Female } else { Sex::Male }
}

/// Salience-weighted peak picking over a centered STFT.
/// Returns one entry per frame, on the hop grid of `p.hop_len` scaled to `sr`.
pub fn track_pitch(samples: &[f32], sr: u32, p: &PitchParams) -> Vec<Option<f32>> {
    let frame_len = dsp::scale_to_rate(p.frame_len, sr);
    let hop = dsp::scale_to_rate(p.hop_len, sr);
    if samples.is_empty() || sr == 0 {
        return Vec::new();
    }

    let stft = Stft::compute(samples, sr, frame_len, hop);
    let energy = dsp::frame_rms(samples, frame_len, hop);
    let bin_hz = stft.bin_hz();
    let n_bins = stft.n_bins();
    let k_min = ((p.fmin_hz / bin_hz).ceil() as usize).max(1);
    let k_max = ((p.fmax_hz / bin_hz).floor() as usize).min(n_bins.saturating_sub(2));

    let frames = stft
        .frames
        .iter()
        .enumerate()
        .map(|(t, frame)| {
            if energy.get(t).copied().unwrap_or(0.0) < p.min_frame_rms || k_min > k_max {
                return None;
            }
            let mag: Vec<f32> = frame.iter().map(|c| c.norm()).collect();
            let reference = mag.iter().copied().fold(0.0f32, f32::max);
            if reference <= 0.0 {
                return None;
            }
            let threshold = p.salience_threshold * reference;

            let mut best: Option<(f32, f32)> = None;
            for k in k_min..=k_max {
                let (l, c, r) = (mag[k - 1], mag[k], mag[k + 1]);
                if !(c > l && c >= r && c > threshold) {
                    continue;
                }
                let avg = 0.5 * (r - l);
                let curvature = 2.0 * c - r - l;
                let shift = if curvature.abs() > 1e-12 { avg / curvature } else { 0.0 };
                let freq = ((k as f32) + shift) * bin_hz;
                let salience = c + 0.5 * avg * shift;
                if freq < p.fmin_hz || freq > p.fmax_hz {
                    continue;
                }
                if best.map(|(_, s)| salience > s).unwrap_or(true) {
                    best = Some((freq, salience));
                }
            }
            best.map(|(f, _)| f)
        })
        .collect();
    frames
}

pub struct BaselineF0Analyzer {
    params: PitchParams,
}

impl BaselineF0Analyzer {
    pub fn new(params: PitchParams) -> Self {
        Self { params }
    }

    pub fn analyze(&self, waveform: &Waveform) -> F0Track {
        let frames = track_pitch(waveform.samples(), waveform.sample_rate(), &self.params);
        let voiced: Vec<f32> = frames.iter().filter_map(|f| *f).collect();
        let median_hz = dsp::median(&voiced);
        let (mean_hz, std_hz) = dsp::mean_std(&voiced);
        let presented_sex = median_hz.map(|m| classify_presented_sex(m, self.params.sex_boundary_hz));
        F0Track { frames, median_hz, mean_hz, std_hz, presented_sex }
    }
}
