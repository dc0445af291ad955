//! Offline sample rate conversion for decoded files
//!
//! Uses rubato's FFT resampler on the control thread. The output is trimmed
//! of the resampler's delay and sized to exactly `round(len * to / from)`
//! samples, so a file keeps its duration at the engine rate.

use cascade_core::domain::audio::{AudioError, Result};
use rubato::{FftFixedIn, Resampler as RubatoResampler};
use tracing::debug;

/// Input frames per resampler call
const CHUNK_FRAMES: usize = 1024;

/// FFT sub-chunks, trading latency for quality
const SUB_CHUNKS: usize = 2;

/// Number of samples a signal of `len` samples has after conversion
pub fn resampled_len(len: usize, from_hz: u32, to_hz: u32) -> usize {
    (len as f64 * to_hz as f64 / from_hz as f64).round() as usize
}

/// Convert a mono signal from `from_hz` to `to_hz`
pub fn resample(samples: &[f32], from_hz: u32, to_hz: u32) -> Result<Vec<f32>> {
    if from_hz == 0 || to_hz == 0 {
        return Err(AudioError::InvalidConfiguration(format!(
            "cannot resample {from_hz} Hz to {to_hz} Hz"
        )));
    }
    if from_hz == to_hz || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_hz as usize, to_hz as usize, CHUNK_FRAMES, SUB_CHUNKS, 1)
            .map_err(|e| AudioError::DecodeError(format!("resampler setup failed: {e}")))?;

    let expected = resampled_len(samples.len(), from_hz, to_hz);
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + resampler.output_frames_max());

    debug!(
        "Resampling {} samples {} Hz -> {} Hz (delay {})",
        samples.len(),
        from_hz,
        to_hz,
        delay
    );

    let mut position = 0;
    while samples.len() - position >= resampler.input_frames_next() {
        let end = position + resampler.input_frames_next();
        let frames: [&[f32]; 1] = [&samples[position..end]];
        let chunk = resampler
            .process(&frames[..], None)
            .map_err(|e| AudioError::DecodeError(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&chunk[0]);
        position = end;
    }

    if position < samples.len() {
        let tail: [&[f32]; 1] = [&samples[position..]];
        let chunk = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(|e| AudioError::DecodeError(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&chunk[0]);
    }

    // Flush what the filter still holds
    while output.len() < expected + delay {
        let chunk = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| AudioError::DecodeError(format!("resampling failed: {e}")))?;
        if chunk[0].is_empty() {
            break;
        }
        output.extend_from_slice(&chunk[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_same_rate_is_copy() {
        let input = sine(440.0, 44100, 1000);
        assert_eq!(resample(&input, 44100, 44100).unwrap(), input);
    }

    #[test]
    fn test_upsample_three_seconds() {
        let input = sine(440.0, 22050, 3 * 22050);
        let output = resample(&input, 22050, 44100).unwrap();
        assert_eq!(output.len(), 132300);
    }

    #[test]
    fn test_downsample_length() {
        let input = sine(440.0, 48000, 48000);
        let output = resample(&input, 48000, 44100).unwrap();
        assert_eq!(output.len(), 44100);
    }

    #[test]
    fn test_short_input_is_flushed() {
        let input = sine(440.0, 22050, 100);
        let output = resample(&input, 22050, 44100).unwrap();
        assert_eq!(output.len(), 200);
        assert!(output.iter().any(|x| x.abs() > 0.1));
    }

    #[test]
    fn test_tone_level_preserved() {
        let input = sine(440.0, 22050, 22050);
        let output = resample(&input, 22050, 44100).unwrap();

        let middle = &output[4000..40000];
        let rms = (middle.iter().map(|x| x * x).sum::<f32>() / middle.len() as f32).sqrt();
        let expected = 0.5 / std::f32::consts::SQRT_2;
        assert!((rms - expected).abs() < 0.02 * expected, "rms {rms}");
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(matches!(
            resample(&[0.0; 4], 0, 44100),
            Err(AudioError::InvalidConfiguration(_))
        ));
    }
}
