//! WAV decoding and encoding
//!
//! Decoding produces what the engine plays: mono f32 at the engine rate with
//! its peak normalized to 1.0. Encoding writes 32-bit float mono.

use super::resample::resample;
use cascade_core::domain::audio::{AudioError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Raw file contents before any conversion
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWav {
    /// Interleaved samples scaled to [-1, 1]
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl DecodedWav {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

fn decode_error(path: &Path, e: impl std::fmt::Display) -> AudioError {
    AudioError::DecodeError(format!("{}: {}", path.display(), e))
}

/// Read a WAV file (8/16/24/32-bit int or 32-bit float)
pub fn read_wav(path: impl AsRef<Path>) -> Result<DecodedWav> {
    let path = path.as_ref();
    let reader = WavReader::open(path).map_err(|e| decode_error(path, e))?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(decode_error(path, "file declares zero channels"));
    }

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = 1.0 / (1u64 << (bits - 1)) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| (v as f64 * scale) as f32))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| decode_error(path, e))?
        }
        (SampleFormat::Float, 32) => {
            let samples = reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| decode_error(path, e))?;
            if let Some(index) = samples.iter().position(|x| !x.is_finite()) {
                return Err(decode_error(
                    path,
                    format!("non-finite sample at index {index}"),
                ));
            }
            samples
        }
        (format, bits) => {
            return Err(decode_error(
                path,
                format!("unsupported sample format {:?} with {} bits", format, bits),
            ))
        }
    };

    debug!(
        "Decoded {}: {} samples, {} channels, {} Hz",
        path.display(),
        samples.len(),
        spec.channels,
        spec.sample_rate
    );

    Ok(DecodedWav {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

/// Average interleaved channels into one
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 | 1 => samples.to_vec(),
        n => samples
            .chunks_exact(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

/// Scale so the largest magnitude is 1.0; silence is left untouched
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    if peak > 0.0 && peak.is_finite() {
        let gain = 1.0 / peak;
        samples.iter_mut().for_each(|x| *x *= gain);
    }
}

/// Decode a file into what the source multiplexer plays
///
/// Channels are averaged, the result is resampled to `target_rate` and
/// finally peak-normalized.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_mono(path: impl AsRef<Path>, target_rate: u32) -> Result<Vec<f32>> {
    let decoded = read_wav(path.as_ref())?;
    let mono = downmix(&decoded.samples, decoded.channels);
    let mut samples = resample(&mono, decoded.sample_rate, target_rate)?;
    normalize_peak(&mut samples);

    info!(
        "Loaded {:.2} s of audio ({} samples at {} Hz)",
        decoded.duration_secs(),
        samples.len(),
        target_rate
    );
    Ok(samples)
}

/// Write mono samples as a 32-bit float WAV
#[instrument(skip(samples), fields(path = %path.as_ref().display(), len = samples.len()))]
pub fn write_wav(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let encode_error = |e: hound::Error| AudioError::EncodeError(format!("{}: {}", path.display(), e));

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).map_err(encode_error)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(encode_error)?;
    }
    writer.finalize().map_err(encode_error)?;

    info!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}

/// Write mono samples as a 16-bit integer WAV
pub fn write_wav_i16(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let encode_error = |e: hound::Error| AudioError::EncodeError(format!("{}: {}", path.display(), e));

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(encode_error)?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(value).map_err(encode_error)?;
    }
    writer.finalize().map_err(encode_error)
}
