//! Integration tests for the real-time engine
//!
//! These tests run the engine the way a driver would, with the control side
//! and the redesign thread live, and check the streaming guarantees end to end.

use cascade_core::domain::audio::{AudioError, StreamConfig};
use cascade_core::domain::chain::FilterBank;
use cascade_core::domain::control::{ControlSnapshot, SlotId};
use cascade_core::domain::engine::{AudioEngine, EngineEvent, FaultKind};
use cascade_core::domain::source::SourceState;
use cascade_infra::audio::wav::write_wav;
use cascade_infra::audio::EqualizerSession;
use std::time::Duration;
use tempfile::TempDir;

const SAMPLE_RATE: u32 = 44100;
const BLOCK: usize = 1024;

fn detached(initial: ControlSnapshot) -> (EqualizerSession, AudioEngine) {
    let config = StreamConfig::new(SAMPLE_RATE, BLOCK).unwrap();
    EqualizerSession::detached(config, FilterBank::defaults(SAMPLE_RATE as f32), initial).unwrap()
}

fn generate_sine_wave(frequency: f32, offset: usize, len: usize, amplitude: f32) -> Vec<f32> {
    (offset..offset + len)
        .map(|i| {
            amplitude
                * (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin()
        })
        .collect()
}

fn peak(buffer: &[f32]) -> f32 {
    buffer.iter().fold(0.0_f32, |m, x| m.max(x.abs()))
}

/// Run `blocks` blocks of a sine through the capture path
fn capture_sine(engine: &mut AudioEngine, frequency: f32, blocks: usize) -> Vec<f32> {
    let mut output = Vec::with_capacity(blocks * BLOCK);
    let mut block = vec![0.0; BLOCK];
    for n in 0..blocks {
        let input = generate_sine_wave(frequency, n * BLOCK, BLOCK, 0.5);
        engine.process(&input, &mut block);
        output.extend_from_slice(&block);
    }
    output
}

// ============================================================================
// CHAIN THROUGH THE ENGINE
// ============================================================================

#[test]
fn test_disabled_chain_is_transparent() {
    let (mut session, mut engine) = detached(ControlSnapshot::default());
    session.start_capture().unwrap();

    let output = capture_sine(&mut engine, 440.0, 4);
    let expected: Vec<f32> = (0..4)
        .flat_map(|n| generate_sine_wave(440.0, n * BLOCK, BLOCK, 0.5))
        .collect();
    assert_eq!(output, expected);
}

#[test]
fn test_lowpass_passes_low_and_cuts_high() {
    let snapshot = ControlSnapshot::default().with_enabled(SlotId::Low, true);

    let (mut session, mut engine) = detached(snapshot);
    session.start_capture().unwrap();
    let low = capture_sine(&mut engine, 1000.0, 20);
    assert!((peak(&low[10 * BLOCK..]) - 0.5).abs() < 0.025);

    let (mut session, mut engine) = detached(snapshot);
    session.start_capture().unwrap();
    let high = capture_sine(&mut engine, 10000.0, 20);
    // More than 20 dB below the 0.5 input
    assert!(peak(&high[10 * BLOCK..]) < 0.05);
}

#[test]
fn test_every_slot_with_gain_stays_in_range() {
    let snapshot = SlotId::ALL
        .iter()
        .fold(ControlSnapshot::default(), |s, &slot| s.with_enabled(slot, true))
        .with_gain(1.0);
    let (mut session, mut engine) = detached(snapshot);
    session.start_capture().unwrap();

    // Full-scale square wave rings through every filter
    let mut block = vec![0.0; BLOCK];
    for n in 0..16 {
        let input: Vec<f32> = (0..BLOCK)
            .map(|i| if ((n * BLOCK + i) / 50) % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        engine.process(&input, &mut block);
        assert!(block.iter().all(|x| (-1.0..=1.0).contains(x)));
    }
}

#[test]
fn test_driver_buffer_size_does_not_change_output() {
    let snapshot = ControlSnapshot::default()
        .with_enabled(SlotId::High, true)
        .with_enabled(SlotId::BandStop, true);
    let input = generate_sine_wave(9000.0, 0, 8 * BLOCK, 0.5);

    let (mut whole_session, mut whole) = detached(snapshot);
    whole_session.start_capture().unwrap();
    let mut whole_out = vec![0.0; input.len()];
    for (src, dst) in input.chunks(2 * BLOCK).zip(whole_out.chunks_mut(2 * BLOCK)) {
        whole.process(src, dst);
    }

    let (mut split_session, mut split) = detached(snapshot);
    split_session.start_capture().unwrap();
    let mut split_out = vec![0.0; input.len()];
    for (src, dst) in input.chunks(BLOCK / 2).zip(split_out.chunks_mut(BLOCK / 2)) {
        split.process(src, dst);
    }

    assert_eq!(whole_out, split_out);
}

// ============================================================================
// CUSTOM SLOT HOT SWAP
// ============================================================================

#[test]
fn test_custom_cutoff_swap_without_clicks() {
    let snapshot = ControlSnapshot::default().with_enabled(SlotId::Custom, true);
    let (mut session, mut engine) = detached(snapshot);
    session.start_capture().unwrap();

    let mut output = Vec::new();
    let mut block = vec![0.0; BLOCK];
    let mut n = 0;
    while n < 12 || engine.chain().custom_cutoff_hz() != 2000.0 {
        assert!(n < 2000, "redesign never arrived");
        if n == 6 {
            assert_eq!(session.set_custom_cutoff(2000.0), 2000.0);
        }
        let input = generate_sine_wave(200.0, n * BLOCK, BLOCK, 0.5);
        engine.process(&input, &mut block);
        output.extend_from_slice(&block);
        if n >= 6 {
            std::thread::sleep(Duration::from_millis(1));
        }
        n += 1;
    }

    let max_jump = output[BLOCK..]
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0_f32, f32::max);
    assert!(max_jump < 0.1, "discontinuity of {max_jump}");
    assert!(session.poll_events().is_empty());
}

#[test]
fn test_out_of_range_cutoff_is_clamped_before_design() {
    let snapshot = ControlSnapshot::default().with_enabled(SlotId::Custom, true);
    let (mut session, mut engine) = detached(snapshot);
    session.start_capture().unwrap();

    assert_eq!(session.set_custom_cutoff(40000.0), 15000.0);

    let mut block = vec![0.0; BLOCK];
    for n in 0..2000 {
        engine.process(&generate_sine_wave(440.0, n * BLOCK, BLOCK, 0.5), &mut block);
        if engine.chain().custom_cutoff_hz() == 15000.0 {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("custom slot never reached 15000 Hz");
}

// ============================================================================
// SOURCES AND FAULTS
// ============================================================================

#[test]
fn test_capture_and_file_are_exclusive() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav(&path, &generate_sine_wave(440.0, 0, 4 * BLOCK, 0.5), SAMPLE_RATE).unwrap();

    let (mut session, mut engine) = detached(ControlSnapshot::default());
    session.load_file(&path).unwrap();
    session.start_capture().unwrap();

    let mut block = vec![0.0; BLOCK];
    engine.process(&[0.1; BLOCK], &mut block);
    assert_eq!(session.source_state(), SourceState::Capturing);
    assert!(matches!(session.play(), Err(AudioError::InvalidState(_))));

    session.stop().unwrap();
    engine.process(&[0.1; BLOCK], &mut block);
    assert_eq!(session.source_state(), SourceState::Idle);
    assert!(block.iter().all(|&x| x == 0.0));

    // Once idle the file is accepted and capture is refused in turn
    session.play().unwrap();
    engine.process(&[], &mut block);
    assert_eq!(session.source_state(), SourceState::PlayingFile);
    assert!(matches!(
        session.start_capture(),
        Err(AudioError::InvalidState(_))
    ));
}

#[test]
fn test_non_finite_block_becomes_silence_and_recovers() {
    let snapshot = ControlSnapshot::default().with_enabled(SlotId::Low, true);
    let (mut session, mut engine) = detached(snapshot);
    session.start_capture().unwrap();

    let mut block = vec![0.0; BLOCK];
    let mut poisoned = generate_sine_wave(440.0, 0, BLOCK, 0.5);
    poisoned[100] = f32::NAN;
    engine.process(&poisoned, &mut block);
    assert!(block.iter().all(|&x| x == 0.0));

    engine.process(&generate_sine_wave(440.0, BLOCK, BLOCK, 0.5), &mut block);
    assert!(block.iter().all(|x| x.is_finite()));
    assert!(peak(&block) > 0.1);

    let events = session.poll_events();
    assert_eq!(events, vec![EngineEvent::RuntimeFault(FaultKind::NonFinite)]);
    assert!(matches!(
        events[0].as_error(),
        Some(AudioError::RuntimeFault(_))
    ));
    assert_eq!(engine.fault_count(), 1);
}
