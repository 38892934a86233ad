//! Vocal-tract resonances: the speaker's *physical* baseline.
//!
//! Formant frequencies follow tract geometry (`F ∝ c / 4L`) and survive
//! pitch-shifting, which is what makes them a reference for the presented F0.
//!
//! Per frame: resample to twice the ceiling, pre-emphasize, apply a Gaussian
//! window, fit an all-pole model with Burg's method (order = 2 × max formants),
//! and convert the complex roots of the predictor polynomial to frequencies and
//! bandwidths. Frames whose fit fails carry NaN and are excluded from medians.

use rustfft::num_complex::Complex;
use std::f64::consts::PI;

use crate::decode::Waveform;
use crate::dsp;
use crate::params::FormantParams;
use super::Sex;

/// Root candidates wider than this are treated as spectral tilt, not resonances.
const MAX_BANDWIDTH_HZ: f64 = 600.0;

#[derive(Clone, Debug)]
pub struct FormantTrack {
    /// Per-frame F1; NaN where tracking failed.
    pub f1: Vec<f32>,
    pub f1_median_hz: Option<f32>,
    pub f2_median_hz: Option<f32>,
    pub f3_median_hz: Option<f32>,
    /// `None` when the medians cannot decide.
    pub probable_sex: Option<Sex>,
}

impl FormantTrack {
    pub fn from_frames(
        f1: Vec<f32>,
        f2: Vec<f32>,
        f3: Vec<f32>,
        p: &FormantParams
    ) -> Self {
        let f1_median_hz = dsp::median(&f1);
        let f2_median_hz = dsp::median(&f2);
        let f3_median_hz = dsp::median(&f3);
        let probable_sex = classify_probable_sex(f1_median_hz, f2_median_hz, p);
        Self { f1, f1_median_hz, f2_median_hz, f3_median_hz, probable_sex }
    }

    /// Frames with a usable F1.
    pub fn valid_frames(&self) -> usize {
        self.f1.iter().filter(|v| v.is_finite()).count()
    }

    pub fn is_indeterminate(&self) -> bool {
        self.probable_sex.is_none()
    }
}

/// F1 decides when it is clearly low or high; F2 breaks the tie in between.
pub fn classify_probable_sex(f1: Option<f32>, f2: Option<f32>, p: &FormantParams) -> Option<Sex> {
    let f1 = f1?;
    if f1 < p.f1_male_below_hz {
        return Some(Sex::Male);
    }
    if f1 > p.f1_female_above_hz {
        return Some(Sex::Female);
    }
    let f2 = f2?;
    if f2 < p.f2_male_below_hz { Some(Sex::Male) } else { Some(Sex::Female) }
}

/// Burg's method. Returns `[1, a1, .., ap]` for `x[n] + Σ a_k x[n-k] = e[n]`.
pub fn burg(x: &[f64], order: usize) -> Option<Vec<f64>> {
    let n = x.len();
    if order == 0 || n <= order {
        return None;
    }
    let mut a = vec![0.0f64; order + 1];
    a[0] = 1.0;
    let mut f = x.to_vec();
    let mut b = x.to_vec();

    for m in 0..order {
        let mut num = 0.0f64;
        let mut den = 0.0f64;
        for i in (m + 1)..n {
            num += f[i] * b[i - 1];
            den += f[i] * f[i] + b[i - 1] * b[i - 1];
        }
        if den <= f64::MIN_POSITIVE {
            return None;
        }
        let k = (-2.0 * num) / den;

        let prev = a.clone();
        for j in 1..=m + 1 {
            a[j] = prev[j] + k * prev[m + 1 - j];
        }
        // descending so b[i - 1] is still the previous stage when read
        for i in ((m + 1)..n).rev() {
            let fi = f[i];
            let bi = b[i - 1];
            f[i] = fi + k * bi;
            b[i] = bi + k * fi;
        }
    }
    if a.iter().all(|v| v.is_finite()) { Some(a) } else { None }
}

/// All complex roots of `c[0] z^n + c[1] z^(n-1) + .. + c[n]` (Durand-Kerner).
pub fn polynomial_roots(coeffs: &[f64]) -> Vec<Complex<f64>> {
    if coeffs.len() < 2 || coeffs[0] == 0.0 {
        return Vec::new();
    }
    let lead = coeffs[0];
    let c: Vec<f64> = coeffs.iter().map(|v| v / lead).collect();
    let n = c.len() - 1;
    let eval = |z: Complex<f64>| c.iter().fold(Complex::new(0.0, 0.0), |acc, &k| acc * z + k);

    let seed = Complex::new(0.4, 0.9);
    let mut roots: Vec<Complex<f64>> = (0..n).map(|i| seed.powu(i as u32)).collect();
    for _ in 0..500 {
        let mut max_delta = 0.0f64;
        for i in 0..n {
            let zi = roots[i];
            let mut denom = Complex::new(1.0, 0.0);
            for (j, zj) in roots.iter().enumerate() {
                if j != i {
                    denom *= zi - zj;
                }
            }
            if denom.norm() < 1e-300 {
                roots[i] = zi + Complex::new(1e-6, 1e-6);
                max_delta = f64::INFINITY;
                continue;
            }
            let delta = eval(zi) / denom;
            roots[i] = zi - delta;
            max_delta = max_delta.max(delta.norm());
        }
        if max_delta < 1e-12 {
            break;
        }
    }
    roots
}

/// Resonances `(frequency_hz, bandwidth_hz)` of an LPC polynomial, ascending.
pub fn resonances(lpc: &[f64], sr: f64, ceiling_hz: f64) -> Vec<(f64, f64)> {
    let mut out: Vec<(f64, f64)> = polynomial_roots(lpc)
        .into_iter()
        .filter(|r| r.im > 0.0 && r.is_finite())
        .filter_map(|r| {
            let mut radius = r.norm();
            if radius <= 0.0 {
                return None;
            }
            if radius > 1.0 {
                radius = 1.0 / radius;
            }
            let freq = r.arg() * sr / (2.0 * PI);
            let bandwidth = -radius.ln() * sr / PI;
            Some((freq, bandwidth))
        })
        .filter(|&(f, bw)| f > 50.0 && f < ceiling_hz - 50.0 && bw < MAX_BANDWIDTH_HZ)
        .collect();
    out.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    out
}

fn gaussian_window(n: usize) -> Vec<f64> {
    let edge = (-12.0f64).exp();
    (0..n)
        .map(|i| {
            let t = (i as f64) / ((n.max(2) - 1) as f64) - 0.5;
            ((-12.0 * t * t).exp() - edge) / (1.0 - edge)
        })
        .collect()
}

pub struct FormantAnalyzer {
    params: FormantParams,
}

impl FormantAnalyzer {
    pub fn new(params: FormantParams) -> Self {
        Self { params }
    }

    pub fn analyze(&self, waveform: &Waveform) -> FormantTrack {
        let p = &self.params;
        let empty = || FormantTrack::from_frames(Vec::new(), Vec::new(), Vec::new(), p);
        if waveform.is_empty() || p.ceiling_hz <= 100.0 {
            return empty();
        }

        let fs = (2.0 * p.ceiling_hz).round() as u32;
        let x = dsp::resample(waveform.samples(), waveform.sample_rate(), fs);
        let alpha = (-2.0 * PI * (p.pre_emphasis_from_hz as f64) / (fs as f64)).exp();
        let mut y: Vec<f64> = Vec::with_capacity(x.len());
        let mut prev = 0.0f64;
        for &s in &x {
            let cur = s as f64;
            y.push(cur - alpha * prev);
            prev = cur;
        }

        // Gaussian analysis window spans twice the nominal window length
        let n_win = (2.0 * (p.window_s as f64) * (fs as f64)).round() as usize;
        let step = ((p.time_step_s as f64) * (fs as f64)).round().max(1.0) as usize;
        if n_win < 8 || y.len() < n_win {
            return empty();
        }
        let window = gaussian_window(n_win);
        let order = 2 * p.max_formants.max(1);

        let starts: Vec<usize> = (0..=(y.len() - n_win)).step_by(step).collect();
        let energies: Vec<f64> = starts
            .iter()
            .map(|&s| {
                let e = y[s..s + n_win].iter().map(|v| v * v).sum::<f64>() / (n_win as f64);
                e.sqrt()
            })
            .collect();
        let loudest = energies.iter().copied().fold(0.0f64, f64::max);
        let floor = loudest * (10.0f64).powf(-(p.silence_db as f64) / 20.0);

        let (mut f1, mut f2, mut f3) = (Vec::new(), Vec::new(), Vec::new());
        for (&start, &energy) in starts.iter().zip(energies.iter()) {
            let mut picks = [f32::NAN; 3];
            if energy > 0.0 && energy >= floor {
                let frame: Vec<f64> = y[start..start + n_win]
                    .iter()
                    .zip(window.iter())
                    .map(|(s, w)| s * w)
                    .collect();
                if let Some(lpc) = burg(&frame, order) {
                    let found = resonances(&lpc, fs as f64, p.ceiling_hz as f64);
                    for (slot, (freq, _)) in picks.iter_mut().zip(found.iter()) {
                        *slot = *freq as f32;
                    }
                }
            }
            f1.push(picks[0]);
            f2.push(picks[1]);
            f3.push(picks[2]);
        }
        FormantTrack::from_frames(f1, f2, f3, p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{ Rng, SeedableRng };

    fn resonator_coeffs(freq: f64, bw: f64, sr: f64) -> (f64, f64) {
        let r = (-PI * bw / sr).exp();
        let theta = 2.0 * PI * freq / sr;
        (2.0 * r * theta.cos(), -r * r)
    }

    /// Noise shaped by a cascade of two-pole resonators, with a -6 dB/oct source tilt.
    fn synthetic_vowel(formants: &[(f64, f64)], sr: u32, seconds: f64, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = ((sr as f64) * seconds) as usize;
        let tilt = (-2.0 * PI * 50.0 / (sr as f64)).exp();
        let mut src_prev = 0.0f64;
        let mut signal: Vec<f64> = (0..n)
            .map(|_| {
                let e: f64 = rng.random_range(-1.0..1.0);
                src_prev = e + tilt * src_prev;
                src_prev
            })
            .collect();
        for &(freq, bw) in formants {
            let (c1, c2) = resonator_coeffs(freq, bw, sr as f64);
            let (mut y1, mut y2) = (0.0f64, 0.0f64);
            for v in signal.iter_mut() {
                let y = *v + c1 * y1 + c2 * y2;
                y2 = y1;
                y1 = y;
                *v = y;
            }
        }
        let peak = signal.iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1e-12);
        signal.iter().map(|v| (0.8 * v / peak) as f32).collect()
    }

    #[test]
    fn burg_recovers_second_order_resonance() {
        let sr = 11_000.0;
        let (c1, c2) = resonator_coeffs(1000.0, 60.0, sr);
        let mut rng = StdRng::seed_from_u64(7);
        let mut x = Vec::with_capacity(8000);
        let (mut y1, mut y2) = (0.0f64, 0.0f64);
        for _ in 0..8000 {
            let e: f64 = rng.random_range(-1.0..1.0);
            let y = e + c1 * y1 + c2 * y2;
            y2 = y1;
            y1 = y;
            x.push(y);
        }
        let a = burg(&x, 2).unwrap();
        assert!((a[1] + c1).abs() < 0.05, "a1 {} vs {}", a[1], -c1);
        assert!((a[2] + c2).abs() < 0.05, "a2 {} vs {}", a[2], -c2);

        let found = resonances(&a, sr, 5500.0);
        assert_eq!(found.len(), 1);
        assert!((found[0].0 - 1000.0).abs() < 30.0, "{:?}", found);
    }

    #[test]
    fn roots_of_known_polynomial() {
        // (z - 0.5)(z^2 + 1) = z^3 - 0.5 z^2 + z - 0.5
        let mut roots = polynomial_roots(&[1.0, -0.5, 1.0, -0.5]);
        roots.sort_by(|a, b| a.im.partial_cmp(&b.im).unwrap());
        assert!((roots[0] - Complex::new(0.0, -1.0)).norm() < 1e-8);
        assert!((roots[1] - Complex::new(0.5, 0.0)).norm() < 1e-8);
        assert!((roots[2] - Complex::new(0.0, 1.0)).norm() < 1e-8);
    }

    #[test]
    fn burg_rejects_silence_and_short_frames() {
        assert!(burg(&[0.0; 64], 10).is_none());
        assert!(burg(&[1.0; 5], 10).is_none());
    }

    #[test]
    fn classification_branches() {
        let p = FormantParams::default();
        assert_eq!(classify_probable_sex(Some(374.0), Some(2347.0), &p), Some(Sex::Male));
        assert_eq!(classify_probable_sex(Some(950.0), None, &p), Some(Sex::Female));
        assert_eq!(classify_probable_sex(Some(700.0), Some(1200.0), &p), Some(Sex::Male));
        assert_eq!(classify_probable_sex(Some(700.0), Some(1350.0), &p), Some(Sex::Female));
        assert_eq!(classify_probable_sex(Some(700.0), None, &p), None);
        assert_eq!(classify_probable_sex(None, Some(1000.0), &p), None);
    }

    #[test]
    fn failed_frames_are_excluded_not_zeroed() {
        let p = FormantParams::default();
        let nan = f32::NAN;
        let track = FormantTrack::from_frames(
            vec![nan, 400.0, 420.0, nan],
            vec![nan, 1100.0, nan, 1300.0],
            vec![nan, nan, nan, nan],
            &p
        );
        assert_eq!(track.f1_median_hz, Some(410.0));
        assert_eq!(track.f2_median_hz, Some(1200.0));
        assert_eq!(track.f3_median_hz, None);
        assert_eq!(track.valid_frames(), 2);
        assert_eq!(track.probable_sex, Some(Sex::Male));
    }

    #[test]
    fn synthetic_vowel_formants_are_tracked() {
        let sr = 22_050;
        let samples = synthetic_vowel(&[(400.0, 80.0), (1200.0, 100.0), (2400.0, 120.0)], sr, 1.0, 11);
        let track = FormantAnalyzer::new(FormantParams::default()).analyze(&Waveform::new(samples, sr));
        let f1 = track.f1_median_hz.unwrap();
        let f2 = track.f2_median_hz.unwrap();
        assert!((f1 - 400.0).abs() < 80.0, "f1 {f1}");
        assert!((f2 - 1200.0).abs() < 120.0, "f2 {f2}");
        assert_eq!(track.probable_sex, Some(Sex::Male));
    }

    #[test]
    fn silence_yields_indeterminate_track() {
        let track = FormantAnalyzer::new(FormantParams::default())
            .analyze(&Waveform::new(vec![0.0; 22_050], 22_050));
        assert_eq!(track.valid_frames(), 0);
        assert!(track.is_indeterminate());
        assert!(track.f1.iter().all(|v| v.is_nan()));
    }
}
