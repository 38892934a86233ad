//! Numeric kernels shared by every analysis phase.
//!
//! Spectra are computed with `realfft` on periodic-Hann windowed frames. Frames
//! are centered (the signal is zero-padded by `n_fft / 2` on both sides) so
//! frame `t` is centered on sample `t * hop`.

use realfft::num_complex::Complex;
use realfft::RealFftPlanner;
use std::cmp::Ordering;
use std::f32::consts::PI;

/// Guard added before taking logarithms of powers.
pub const AMIN_POWER: f32 = 1e-10;

/// Nominal rate the frame sizes in `AnalysisParams` are expressed at.
pub const NOMINAL_RATE: u32 = 22_050;

/// Scale a frame length given at `NOMINAL_RATE` to `sr`.
#[inline]
pub fn scale_to_rate(len_at_nominal: usize, sr: u32) -> usize {
    let scaled = ((len_at_nominal as f64) * (sr as f64) / (NOMINAL_RATE as f64)).round();
    (scaled as usize).max(16)
}

#[inline]
pub fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let t = (PI * (i as f32)) / (n as f32);
            t.sin() * t.sin()
        })
        .collect()
}

/// Centered short-time Fourier transform. `frames[t][k]`, `k` in `0..=n_fft/2`.
pub struct Stft {
    pub n_fft: usize,
    pub hop: usize,
    pub sample_rate: u32,
    pub frames: Vec<Vec<Complex<f32>>>,
}

impl Stft {
    pub fn compute(samples: &[f32], sample_rate: u32, n_fft: usize, hop: usize) -> Self {
        let n_fft = n_fft.max(2);
        let hop = hop.max(1);
        let mut stft = Stft { n_fft, hop, sample_rate, frames: Vec::new() };
        if samples.is_empty() {
            return stft;
        }

        let pad = n_fft / 2;
        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let window = hann(n_fft);
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(n_fft);
        let mut inbuf = r2c.make_input_vec();
        let mut outbuf = r2c.make_output_vec();

        let n_frames = (padded.len() - n_fft) / hop + 1;
        stft.frames.reserve(n_frames);
        for f in 0..n_frames {
            let start = f * hop;
            for j in 0..n_fft {
                inbuf[j] = padded[start + j] * window[j];
            }
            r2c.process(&mut inbuf, &mut outbuf).ok();
            stft.frames.push(outbuf.clone());
        }
        stft
    }

    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn bin_hz(&self) -> f32 {
        (self.sample_rate as f32) / (self.n_fft as f32)
    }

    pub fn magnitudes(&self) -> Vec<Vec<f32>> {
        self.frames
            .iter()
            .map(|f| f.iter().map(|c| c.norm()).collect())
            .collect()
    }

    pub fn phases(&self) -> Vec<Vec<f32>> {
        self.frames
            .iter()
            .map(|f| f.iter().map(|c| c.im.atan2(c.re)).collect())
            .collect()
    }
}

/// Triangular mel filter bank on the Slaney mel scale with area normalization.
pub struct MelBank {
    filters: Vec<Vec<(usize, f32)>>,
}

impl MelBank {
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize, f_min: f32, f_max: f32) -> Self {
        let sr = sample_rate.max(1) as f32;
        let f_max = f_max.min(sr * 0.5).max(f_min);
        let mel_min = hz_to_mel(f_min);
        let mel_max = hz_to_mel(f_max);
        let hz_points: Vec<f32> = (0..n_mels + 2)
            .map(|i| {
                let t = (i as f32) / ((n_mels + 1) as f32);
                mel_to_hz(mel_min + (mel_max - mel_min) * t)
            })
            .collect();

        let n_bins = n_fft / 2 + 1;
        let bin_hz = sr / (n_fft as f32);
        let mut filters = Vec::with_capacity(n_mels);
        for m in 0..n_mels {
            let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
            let norm = 2.0 / (right - left).max(1e-6);
            let mut weights = Vec::new();
            for k in 0..n_bins {
                let f = (k as f32) * bin_hz;
                let lower = (f - left) / (center - left).max(1e-6);
                let upper = (right - f) / (right - center).max(1e-6);
                let w = lower.min(upper);
                if w > 0.0 {
                    weights.push((k, w * norm));
                }
            }
            filters.push(weights);
        }
        Self { filters }
    }

    pub fn apply(&self, power: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|filter| {
                let mut sum = 0.0f64;
                for &(bin, weight) in filter {
                    let p = power.get(bin).copied().unwrap_or(0.0).max(0.0) as f64;
                    sum += p * (weight as f64);
                }
                sum as f32
            })
            .collect()
    }

    /// Mel power spectrogram, `[frame][band]`.
    pub fn spectrogram(&self, stft: &Stft) -> Vec<Vec<f32>> {
        stft.frames
            .iter()
            .map(|frame| {
                let power: Vec<f32> = frame.iter().map(|c| c.norm_sqr()).collect();
                self.apply(&power)
            })
            .collect()
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0f32;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0f32;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

/// Power spectrogram to dB relative to `reference`, floored at `max - top_db`.
/// `reference = None` uses the matrix maximum.
pub fn power_to_db(spec: &[Vec<f32>], reference: Option<f32>, top_db: f32) -> Vec<Vec<f32>> {
    let peak = spec
        .iter()
        .flat_map(|row| row.iter().copied())
        .fold(0.0f32, f32::max);
    let reference = reference.unwrap_or(peak).max(AMIN_POWER);
    let ref_db = 10.0 * reference.log10();
    let mut out: Vec<Vec<f32>> = spec
        .iter()
        .map(|row| {
            row.iter()
                .map(|&p| 10.0 * p.max(AMIN_POWER).log10() - ref_db)
                .collect()
        })
        .collect();
    let max_db = out
        .iter()
        .flat_map(|row| row.iter().copied())
        .fold(f32::NEG_INFINITY, f32::max);
    if max_db.is_finite() {
        let floor = max_db - top_db;
        for row in out.iter_mut() {
            for v in row.iter_mut() {
                *v = v.max(floor);
            }
        }
    }
    out
}

#[inline]
pub fn rms(x: &[f32]) -> f32 {
    let e = x.iter().map(|v| v * v).sum::<f32>() / (x.len().max(1) as f32);
    e.sqrt()
}

/// Centered frame RMS on the same grid as `Stft::compute`.
pub fn frame_rms(samples: &[f32], frame_len: usize, hop: usize) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let frame_len = frame_len.max(1);
    let hop = hop.max(1);
    let pad = frame_len / 2;
    let total = samples.len() + 2 * pad;
    let n_frames = (total - frame_len) / hop + 1;
    (0..n_frames)
        .map(|f| {
            let start = (f * hop) as isize - pad as isize;
            let mut e = 0.0f64;
            for j in 0..frame_len {
                let idx = start + j as isize;
                if idx >= 0 && (idx as usize) < samples.len() {
                    let v = samples[idx as usize] as f64;
                    e += v * v;
                }
            }
            (e / (frame_len as f64)).sqrt() as f32
        })
        .collect()
}

/// Mean and population standard deviation of the finite values.
pub fn mean_std(values: &[f32]) -> (f32, f32) {
    let finite: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| v as f64)
        .collect();
    if finite.is_empty() {
        return (0.0, 0.0);
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let var = finite.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean as f32, var.sqrt() as f32)
}

#[inline]
pub fn std_dev(values: &[f32]) -> f32 {
    mean_std(values).1
}

/// `std / mean`, zero when the mean vanishes.
#[inline]
pub fn coeff_of_variation(values: &[f32]) -> f32 {
    let (mean, std) = mean_std(values);
    std / (mean.abs() + 1e-10)
}

/// Median of the finite values, `None` when there are none.
pub fn median(values: &[f32]) -> Option<f32> {
    let mut v: Vec<f32> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    let n = v.len();
    let k = n / 2;
    let (lo, mid, _hi) = v.select_nth_unstable_by(k, |a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid_val = *mid;
    if n % 2 == 1 {
        Some(mid_val)
    } else {
        let max_lo = lo.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Some((max_lo + mid_val) * 0.5)
    }
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f32], p: f32) -> f32 {
    let mut v: Vec<f32> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return 0.0;
    }
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let pos = (p.clamp(0.0, 100.0) / 100.0) * ((v.len() - 1) as f32);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let t = pos - (lo as f32);
    v[lo] + (v[hi] - v[lo]) * t
}

/// Wrap an angle to `[-pi, pi)`.
#[inline]
pub fn wrap_phase(x: f32) -> f32 {
    (x + PI).rem_euclid(2.0 * PI) - PI
}

/// Shannon entropy (nats) of a `bins`-bin histogram spanning the data range.
/// Each bin count gets `1e-10` before normalizing, so empty bins stay finite.
pub fn histogram_entropy(values: &[f32], bins: usize) -> f32 {
    let bins = bins.max(1);
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0;
    }
    // a constant series lands in one bin of unit width
    let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, hi + 0.5) };
    let width = (hi - lo) / (bins as f32);
    let mut counts = vec![1e-10f64; bins];
    for &v in values.iter().filter(|v| v.is_finite()) {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1.0;
    }
    let total: f64 = counts.iter().sum();
    let h: f64 = counts
        .iter()
        .map(|&c| {
            let q = c / total;
            -q * q.ln()
        })
        .sum();
    h as f32
}

/// Second-order central differences, one-sided at the edges.
pub fn gradient(values: &[f32]) -> Vec<f32> {
    let n = values.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| {
                if i == 0 {
                    values[1] - values[0]
                } else if i == n - 1 {
                    values[n - 1] - values[n - 2]
                } else {
                    (values[i + 1] - values[i - 1]) * 0.5
                }
            })
            .collect(),
    }
}

/// First difference, length `n - 1`.
pub fn diff(values: &[f32]) -> Vec<f32> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Sample skewness and excess kurtosis (Fisher), biased estimators.
pub fn skew_kurtosis(values: &[f32]) -> (f32, f32) {
    let (mean, std) = mean_std(values);
    if values.is_empty() || std <= 1e-12 {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let (mut m3, mut m4) = (0.0f64, 0.0f64);
    for &v in values {
        let z = ((v - mean) as f64) / (std as f64);
        m3 += z * z * z;
        m4 += z * z * z * z;
    }
    ((m3 / n) as f32, (m4 / n - 3.0) as f32)
}

/// Pearson correlation; zero when either series is constant.
pub fn correlation(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (ma, sa) = mean_std(&a[..n]);
    let (mb, sb) = mean_std(&b[..n]);
    if sa <= 1e-12 || sb <= 1e-12 {
        return 0.0;
    }
    let cov = (0..n)
        .map(|i| ((a[i] - ma) as f64) * ((b[i] - mb) as f64))
        .sum::<f64>() / (n as f64);
    ((cov / ((sa as f64) * (sb as f64))) as f32).clamp(-1.0, 1.0)
}

/// Onset strength per frame from a `[frame][band]` dB matrix: half-wave
/// rectified time difference averaged over bands, with a leading zero.
pub fn onset_strength(mel_db: &[Vec<f32>]) -> Vec<f32> {
    if mel_db.is_empty() {
        return Vec::new();
    }
    let mut env = Vec::with_capacity(mel_db.len());
    env.push(0.0);
    for pair in mel_db.windows(2) {
        let bands = pair[0].len().min(pair[1].len()).max(1);
        let rise = pair[1]
            .iter()
            .zip(pair[0].iter())
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .sum::<f32>();
        env.push(rise / (bands as f32));
    }
    env
}

/// Quadratic Savitzky-Golay smoothing over an 11-point window, interior points only.
/// Returns `(index, smoothed)` pairs so callers can form residuals.
pub fn savgol_11_quadratic(values: &[f32]) -> Vec<(usize, f32)> {
    const COEFFS: [f32; 11] = [-36.0, 9.0, 44.0, 69.0, 84.0, 89.0, 84.0, 69.0, 44.0, 9.0, -36.0];
    const NORM: f32 = 429.0;
    if values.len() < COEFFS.len() {
        return Vec::new();
    }
    (5..values.len() - 5)
        .map(|i| {
            let s = COEFFS
                .iter()
                .enumerate()
                .map(|(j, c)| c * values[i + j - 5])
                .sum::<f32>();
            (i, s / NORM)
        })
        .collect()
}

/// Centered moving average (first-order Savitzky-Golay), shrinking at the edges.
pub fn moving_average(values: &[f32], width: usize) -> Vec<f32> {
    let half = width.max(1) / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            values[lo..hi].iter().sum::<f32>() / ((hi - lo) as f32)
        })
        .collect()
}

/// Orthonormal DCT-II, first `count` coefficients.
pub fn dct_ii_ortho(values: &[f32], count: usize) -> Vec<f32> {
    let n = values.len().max(1) as f64;
    (0..count)
        .map(|k| {
            let mut sum = 0.0f64;
            for (m, &v) in values.iter().enumerate() {
                let angle = std::f64::consts::PI * (k as f64) * ((m as f64) + 0.5) / n;
                sum += (v as f64) * angle.cos();
            }
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (sum * scale) as f32
        })
        .collect()
}

/// Windowed-sinc low-pass (Hann taper). `cutoff_hz` is the -6 dB point.
pub fn lowpass_fir(x: &[f32], sr: u32, cutoff_hz: f32, taps: usize) -> Vec<f32> {
    if x.is_empty() || sr == 0 {
        return x.to_vec();
    }
    let taps = taps.max(3) | 1;
    let fc = (cutoff_hz / (sr as f32)).clamp(1e-4, 0.5);
    let mid = (taps / 2) as isize;
    let mut h: Vec<f32> = (0..taps)
        .map(|i| {
            let n = (i as isize - mid) as f32;
            let sinc = if n == 0.0 { 2.0 * fc } else { (2.0 * PI * fc * n).sin() / (PI * n) };
            let w = 0.5 - 0.5 * ((2.0 * PI * (i as f32)) / ((taps - 1) as f32)).cos();
            sinc * w
        })
        .collect();
    let gain: f32 = h.iter().sum();
    if gain.abs() > 1e-9 {
        for c in h.iter_mut() {
            *c /= gain;
        }
    }
    (0..x.len() as isize)
        .map(|i| {
            let mut acc = 0.0f32;
            for (j, c) in h.iter().enumerate() {
                let idx = i + (j as isize) - mid;
                if idx >= 0 && (idx as usize) < x.len() {
                    acc += c * x[idx as usize];
                }
            }
            acc
        })
        .collect()
}

/// simple linear resampler (mono)
pub fn resample_linear_mono(x: &[f32], sr_in: u32, sr_out: u32) -> Vec<f32> {
    if x.is_empty() || sr_in == 0 || sr_out == 0 || sr_in == sr_out {
        return x.to_vec();
    }
    let ratio = (sr_out as f64) / (sr_in as f64);
    let n_out = ((x.len() as f64) * ratio).floor().max(1.0) as usize;
    let last = x[x.len() - 1];
    let mut y = Vec::with_capacity(n_out);

    for i in 0..n_out {
        let pos = (i as f64) / ratio; // position in input
        let i0 = pos.floor() as usize;
        if i0 + 1 >= x.len() {
            y.push(last);
        } else {
            let t = (pos - (i0 as f64)) as f32; // frac
            let a = x[i0];
            let b = x[i0 + 1];
            y.push(a + (b - a) * t); // lerp
        }
    }
    y
}

/// Resample with an anti-alias low-pass when going down.
pub fn resample(x: &[f32], sr_in: u32, sr_out: u32) -> Vec<f32> {
    if sr_out < sr_in {
        let filtered = lowpass_fir(x, sr_in, 0.45 * (sr_out as f32), 63);
        resample_linear_mono(&filtered, sr_in, sr_out)
    } else {
        resample_linear_mono(x, sr_in, sr_out)
    }
}

/// Finite value rounded to four decimals; NaN and infinities become zero.
#[inline]
pub fn report_float(v: f64) -> f64 {
    if v.is_finite() {
        (v * 10_000.0).round() / 10_000.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_ignores_nan_frames() {
        let v = [f32::NAN, 300.0, 100.0, f32::NAN, 200.0];
        assert_eq!(median(&v), Some(200.0));
        assert_eq!(median(&[f32::NAN, f32::NAN]), None);
        assert_eq!(median(&[1.0, 3.0]), Some(2.0));
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let v = [0.0, 10.0, 20.0, 30.0, 40.0];
        assert!((percentile(&v, 10.0) - 4.0).abs() < 1e-6);
        assert!((percentile(&v, 50.0) - 20.0).abs() < 1e-6);
        assert_eq!(percentile(&[], 10.0), 0.0);
    }

    #[test]
    fn wrap_phase_stays_in_range() {
        for x in [-10.0f32, -PI, -0.5, 0.0, 0.5, PI, 7.0, 100.0] {
            let w = wrap_phase(x);
            assert!(w >= -PI - 1e-5 && w <= PI + 1e-5, "{x} -> {w}");
            assert!(((x - w) / (2.0 * PI) - ((x - w) / (2.0 * PI)).round()).abs() < 1e-3);
        }
    }

    #[test]
    fn gradient_matches_central_differences() {
        let g = gradient(&[1.0, 2.0, 4.0, 7.0]);
        assert_eq!(g, vec![1.0, 1.5, 2.5, 3.0]);
    }

    #[test]
    fn onset_strength_only_counts_rises() {
        let db = vec![vec![0.0, 0.0], vec![10.0, -10.0], vec![4.0, 6.0]];
        assert_eq!(onset_strength(&db), vec![0.0, 5.0, 8.0]);
        assert!(onset_strength(&[]).is_empty());
    }

    #[test]
    fn stft_peaks_at_tone_bin() {
        let sr = 22_050;
        let x: Vec<f32> = (0..sr as usize)
            .map(|i| (2.0 * PI * 1000.0 * (i as f32) / (sr as f32)).sin())
            .collect();
        let stft = Stft::compute(&x, sr, 2048, 512);
        assert_eq!(stft.frames.len(), x.len() / 512 + 1);
        let mags = stft.magnitudes();
        let mid = &mags[mags.len() / 2];
        let (peak_bin, _) = mid
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |acc, (k, &m)| if m > acc.1 { (k, m) } else { acc });
        let peak_hz = (peak_bin as f32) * stft.bin_hz();
        assert!((peak_hz - 1000.0).abs() < stft.bin_hz());
    }

    #[test]
    fn mel_bank_has_no_empty_filters_at_working_rate() {
        let bank = MelBank::new(22_050, 2048, 128, 0.0, 11_025.0);
        let flat = vec![1.0f32; 1025];
        assert!(bank.apply(&flat).iter().all(|&e| e > 0.0));
    }

    #[test]
    fn power_to_db_floors_at_top_db() {
        let spec = vec![vec![1.0, 1e-12], vec![0.1, 0.0]];
        let db = power_to_db(&spec, None, 80.0);
        assert!((db[0][0] - 0.0).abs() < 1e-4);
        assert!((db[1][0] + 10.0).abs() < 1e-4);
        assert!((db[0][1] + 80.0).abs() < 1e-4);
        assert!((db[1][1] + 80.0).abs() < 1e-4);
    }

    #[test]
    fn resample_keeps_duration() {
        let x = vec![0.0f32; 44_100];
        assert_eq!(resample(&x, 44_100, 22_050).len(), 22_050);
        assert_eq!(resample(&x, 44_100, 44_100).len(), 44_100);
    }

    #[test]
    fn histogram_entropy_of_two_even_bins_is_ln2() {
        let h = histogram_entropy(&[0.0, 0.0, 1.0, 1.0], 2);
        assert!((h - std::f32::consts::LN_2).abs() < 1e-6, "{h}");
        assert!(histogram_entropy(&[0.7; 16], 50) < 1e-6);
        assert_eq!(histogram_entropy(&[], 50), 0.0);
    }

    #[test]
    fn report_float_scrubs_non_finite() {
        assert_eq!(report_float(f64::NAN), 0.0);
        assert_eq!(report_float(f64::INFINITY), 0.0);
        assert_eq!(report_float(0.123456), 0.1235);
    }
}
