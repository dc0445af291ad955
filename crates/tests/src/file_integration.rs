//! Integration tests for file sources, export and presets

use cascade_core::domain::audio::{AudioError, StreamConfig};
use cascade_core::domain::chain::FilterBank;
use cascade_core::domain::config::{ControlConfig, PresetManager};
use cascade_core::domain::control::{ControlSnapshot, SlotId};
use cascade_core::domain::engine::{AudioEngine, EngineEvent};
use cascade_core::domain::source::SourceState;
use cascade_infra::audio::wav::{read_wav, write_wav, write_wav_i16};
use cascade_infra::audio::{export_file, EqualizerSession, SpectrumAnalyzer, TestSignal};
use std::path::Path;
use tempfile::TempDir;

const SAMPLE_RATE: u32 = 44100;
const BLOCK: usize = 1024;

fn detached(initial: ControlSnapshot) -> (EqualizerSession, AudioEngine) {
    let config = StreamConfig::new(SAMPLE_RATE, BLOCK).unwrap();
    EqualizerSession::detached(config, FilterBank::defaults(SAMPLE_RATE as f32), initial).unwrap()
}

fn write_stereo_i16(path: &Path, frames: usize, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let left = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
        writer.write_sample((left * i16::MAX as f32) as i16).unwrap();
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

// ============================================================================
// LOADING
// ============================================================================

#[test]
fn test_low_rate_file_is_resampled_to_stream_rate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("slow.wav");
    let signal = TestSignal::Sine { hz: 440.0 }.render(22050, 3.0);
    write_wav_i16(&path, &signal, 22050).unwrap();

    let (mut session, _engine) = detached(ControlSnapshot::default());
    let len = session.load_file(&path).unwrap();
    assert!(len.abs_diff(132300) <= 1, "loaded {len} samples");
    assert_eq!(session.loaded_len(), Some(len));
}

#[test]
fn test_stereo_file_is_downmixed_and_resampled() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stereo.wav");
    write_stereo_i16(&path, 48000, 48000);

    let (mut session, _engine) = detached(ControlSnapshot::default());
    assert_eq!(session.load_file(&path).unwrap(), 44100);
}

#[test]
fn test_decode_error_leaves_source_unchanged() {
    let dir = TempDir::new().unwrap();
    let garbage = dir.path().join("garbage.wav");
    std::fs::write(&garbage, b"definitely not a RIFF header").unwrap();
    let infinite = dir.path().join("infinite.wav");
    write_wav(&infinite, &[0.5, f32::INFINITY, 0.5], SAMPLE_RATE).unwrap();

    let (mut session, mut engine) = detached(ControlSnapshot::default());
    session.start_capture().unwrap();
    let mut block = vec![0.0; BLOCK];
    engine.process(&[0.2; BLOCK], &mut block);

    assert!(matches!(
        session.load_file(&garbage),
        Err(AudioError::DecodeError(_))
    ));
    assert!(matches!(
        session.play_file(&infinite),
        Err(AudioError::DecodeError(_))
    ));
    assert!(matches!(
        session.play_file(dir.path().join("missing.wav")),
        Err(AudioError::DecodeError(_))
    ));

    engine.process(&[0.2; BLOCK], &mut block);
    assert_eq!(session.source_state(), SourceState::Capturing);
    assert_eq!(block, vec![0.2; BLOCK]);
    assert!(session.loaded_len().is_none());
}

// ============================================================================
// PLAYBACK
// ============================================================================

#[test]
fn test_short_file_plays_out_in_full_blocks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.wav");
    write_wav(&path, &vec![0.5; 2500], SAMPLE_RATE).unwrap();

    let (mut session, mut engine) = detached(ControlSnapshot::default());
    session.play_file(&path).unwrap();

    let mut output = Vec::new();
    let mut states = Vec::new();
    let mut block = vec![f32::NAN; BLOCK];
    for _ in 0..4 {
        engine.process(&[], &mut block);
        assert_eq!(block.len(), BLOCK);
        output.extend_from_slice(&block);
        states.push(session.source_state());
    }

    // Normalized to full scale on load
    assert!(output[..2500].iter().all(|&x| x == 1.0));
    assert!(output[2500..].iter().all(|&x| x == 0.0));
    assert_eq!(
        states,
        vec![
            SourceState::PlayingFile,
            SourceState::PlayingFile,
            SourceState::FileExhausted,
            SourceState::Idle,
        ]
    );

    let events = session.poll_events();
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == EngineEvent::PlaybackEnded)
            .count(),
        1
    );
}

#[test]
fn test_loaded_file_replays_from_start() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.wav");
    let ramp: Vec<f32> = (0..BLOCK).map(|i| (i + 1) as f32 / BLOCK as f32).collect();
    write_wav(&path, &ramp, SAMPLE_RATE).unwrap();

    let (mut session, mut engine) = detached(ControlSnapshot::default());
    session.play_file(&path).unwrap();
    let mut first = vec![0.0; BLOCK];
    engine.process(&[], &mut first);

    session.stop().unwrap();
    let mut block = vec![0.0; BLOCK];
    engine.process(&[], &mut block);
    assert_eq!(session.source_state(), SourceState::Idle);

    session.play().unwrap();
    let mut again = vec![0.0; BLOCK];
    engine.process(&[], &mut again);
    assert_eq!(first, again);
    assert_eq!(first, ramp);
}

// ============================================================================
// EXPORT
// ============================================================================

#[test]
fn test_export_lowpass_removes_high_tone() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("multitone.wav");
    let output = dir.path().join("filtered.wav");
    let signal = TestSignal::Multitone {
        hz: vec![1000.0, 10000.0],
    }
    .render(SAMPLE_RATE, 1.0);
    write_wav_i16(&input, &signal, SAMPLE_RATE).unwrap();

    let bank = FilterBank::defaults(SAMPLE_RATE as f32);
    let snapshot = ControlSnapshot::default().with_enabled(SlotId::Low, true);
    assert_eq!(
        export_file(&bank, &snapshot, &input, &output).unwrap(),
        signal.len()
    );

    let written = read_wav(&output).unwrap();
    assert_eq!(written.channels, 1);
    assert_eq!(written.sample_rate, SAMPLE_RATE);
    assert_eq!(written.samples.len(), signal.len());

    let reader = hound::WavReader::open(&output).unwrap();
    assert_eq!(reader.spec().bits_per_sample, 32);
    assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);

    let spectrum = SpectrumAnalyzer::new(SAMPLE_RATE)
        .analyze(&written.samples)
        .unwrap();
    assert!((spectrum.peak_frequency() - 1000.0).abs() < 2.0);
    let ratio = spectrum.magnitude_at(10000.0) / spectrum.magnitude_at(1000.0);
    assert!(ratio < 0.05, "10 kHz left at {ratio} of 1 kHz");
}

#[test]
fn test_export_with_nothing_enabled_keeps_signal() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.wav");
    let output = dir.path().join("out.wav");
    let signal = TestSignal::Sine { hz: 440.0 }.render(SAMPLE_RATE, 0.5);
    write_wav(&input, &signal, SAMPLE_RATE).unwrap();

    let (session, _engine) = detached(ControlSnapshot::default());
    session.export_job(&input, &output).run().unwrap();

    // Loading normalizes the sine to full scale
    let peak = signal.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    let written = read_wav(&output).unwrap();
    assert_eq!(written.samples.len(), signal.len());
    for (out, src) in written.samples.iter().zip(&signal) {
        assert!((out - src / peak).abs() < 1e-5);
    }
}

#[test]
fn test_export_missing_input_is_decode_error() {
    let dir = TempDir::new().unwrap();
    let bank = FilterBank::defaults(SAMPLE_RATE as f32);
    let result = export_file(
        &bank,
        &ControlSnapshot::default(),
        dir.path().join("missing.wav"),
        dir.path().join("out.wav"),
    );
    assert!(matches!(result, Err(AudioError::DecodeError(_))));
    assert!(!dir.path().join("out.wav").exists());
}

// ============================================================================
// PRESETS
// ============================================================================

#[tokio::test]
async fn test_preset_round_trip_restores_controls() {
    let dir = TempDir::new().unwrap();
    let presets = PresetManager::new(dir.path().join("presets"));

    let (mut session, _engine) = detached(ControlSnapshot::default());
    session.toggle(SlotId::BandStop);
    session.set_enabled(SlotId::Custom, true);
    session.set_custom_cutoff(2500.0);
    session.set_gain(0.6);
    let saved = session.snapshot();

    presets
        .save_preset("vocals", &ControlConfig::from(&saved))
        .await
        .unwrap();
    assert_eq!(presets.list_presets().await.unwrap(), vec!["vocals"]);

    let (mut restored, _engine) = detached(ControlSnapshot::default());
    let controls = presets.load_preset("vocals").await.unwrap();
    restored.apply_snapshot(controls.to_snapshot());
    assert_eq!(restored.snapshot(), saved);
}
