// ───────────────────────────────────────────────────────────────────────────────
// Decoder for WAV/MP3/FLAC/OGG/M4A using symphonia, downmixed to mono
// ───────────────────────────────────────────────────────────────────────────────
use std::{ io::Cursor, path::{ Path, PathBuf } };
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{ DecoderOptions, CODEC_TYPE_NULL },
    errors::Error,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{ get_codecs, get_probe };

use crate::dsp;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("audio file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unsupported or unrecognized audio format: {0}")]
    Unsupported(String),
    #[error("no decodable audio track found")]
    NoAudioTrack,
    #[error("unknown sample rate")]
    UnknownSampleRate,
    #[error("audio contains no samples")]
    Empty,
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Mono samples at a known rate. Immutable once built.
#[derive(Debug, Clone)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_s(&self) -> f32 {
        (self.samples.len() as f32) / (self.sample_rate.max(1) as f32)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian bytes of the sample buffer, the input of the waveform hash.
    pub fn sample_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 4);
        for s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    pub fn resampled(&self, target_sr: u32) -> Waveform {
        if target_sr == 0 || target_sr == self.sample_rate {
            return self.clone();
        }
        Waveform {
            samples: dsp::resample(&self.samples, self.sample_rate, target_sr),
            sample_rate: target_sr,
        }
    }
}

/// Result of decoding one file: the native-rate mono buffer plus the raw bytes.
#[derive(Debug)]
pub struct LoadedAudio {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub channels: u16,
    pub native: Waveform,
}

impl LoadedAudio {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub fn load<P: AsRef<Path>>(path: P) -> Result<LoadedAudio, InputError> {
    let path_ref = path.as_ref();
    if !path_ref.is_file() {
        return Err(InputError::NotFound(path_ref.to_path_buf()));
    }
    let bytes = std::fs::read(path_ref).map_err(|source| InputError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    let ext = path_ref.extension().and_then(|e| e.to_str());
    let (native, channels) = decode_bytes(&bytes, ext)?;
    Ok(LoadedAudio { path: path_ref.to_path_buf(), bytes, channels, native })
}

/// Decode an in-memory file. `ext` is only a probing hint.
pub fn decode_bytes(bytes: &[u8], ext: Option<&str>) -> Result<(Waveform, u16), InputError> {
    if bytes.is_empty() {
        return Err(InputError::Empty);
    }
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = ext {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| InputError::Unsupported(e.to_string()))?;
    let mut format = probed.format;

    let (track_id, codec_params) = {
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(InputError::NoAudioTrack)?;
        (track.id, track.codec_params.clone())
    };

    let mut decoder = get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| InputError::Unsupported(e.to_string()))?;

    let sr = codec_params.sample_rate.ok_or(InputError::UnknownSampleRate)?;
    let mut channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(1u16);

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut mono = Vec::<f32>::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(err) => {
                return Err(InputError::Decode(err.to_string()));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::DecodeError(_)) => {
                continue;
            }
            Err(err) => {
                return Err(InputError::Decode(err.to_string()));
            }
        };

        let spec = *decoded.spec();
        let chan_count = spec.channels.count().max(1);
        channels = chan_count as u16;

        let needs_alloc = sample_buf
            .as_ref()
            .map(|b| b.capacity() < decoded.capacity())
            .unwrap_or(true);
        if needs_alloc {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            downmix_into(buf.samples(), chan_count, &mut mono);
        }
    }

    if mono.is_empty() {
        return Err(InputError::Empty);
    }
    Ok((Waveform::new(mono, sr), channels))
}

/// Average interleaved channels into mono.
fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    let scale = 1.0 / (channels as f32);
    for frame in interleaved.chunks_exact(channels) {
        out.push(frame.iter().sum::<f32>() * scale);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn write_wav(path: &Path, sr: u32, channels: u16, interleaved: &[f32]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: sr,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in interleaved {
            writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn stereo_wav_is_downmixed_by_averaging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let frames = 8000;
        let mut interleaved = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            interleaved.push(0.5);
            interleaved.push(-0.25);
        }
        write_wav(&path, 16_000, 2, &interleaved);

        let audio = load(&path).unwrap();
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.native.sample_rate(), 16_000);
        assert_eq!(audio.native.samples().len(), frames);
        let mid = audio.native.samples()[frames / 2];
        assert!((mid - 0.125).abs() < 1e-3, "{mid}");
        assert_eq!(audio.file_name(), "stereo.wav");
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let err = load("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, InputError::NotFound(_)));
    }

    #[test]
    fn garbage_bytes_are_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"this is not audio at all").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, InputError::Unsupported(_)));
    }

    #[test]
    fn zero_length_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(load(&path).unwrap_err(), InputError::Empty));
    }

    #[test]
    fn resampling_changes_rate_and_length() {
        let w = Waveform::new(vec![0.1; 44_100], 44_100);
        let r = w.resampled(22_050);
        assert_eq!(r.sample_rate(), 22_050);
        assert_eq!(r.samples().len(), 22_050);
        assert!((r.duration_s() - 1.0).abs() < 1e-3);
        assert_eq!(w.sample_bytes().len(), 44_100 * 4);
    }
}
