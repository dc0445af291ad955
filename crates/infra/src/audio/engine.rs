//! Control-side equalizer session
//!
//! [`EqualizerSession`] is what a control surface talks to. It owns the
//! [`EngineHandle`], the thread redesigning the custom slot and, when
//! running live, the duplex stream that carries the [`AudioEngine`].
//! Every method runs on the control thread and returns synchronously.

use super::spectrum::{Spectrum, SpectrumAnalyzer};
use super::stream::{DeviceSelection, DuplexStream};
use super::wav::{load_mono, write_wav};
use cascade_core::domain::audio::{AudioError, Result, StreamConfig};
use cascade_core::domain::chain::{render_offline, FilterBank};
use cascade_core::domain::control::{ControlSnapshot, SlotId};
use cascade_core::domain::engine::{AudioEngine, EngineEvent, EngineHandle};
use cascade_core::domain::source::SourceState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// A running equalizer, seen from the control thread
pub struct EqualizerSession {
    handle: EngineHandle,
    bank: FilterBank,
    redesign: Option<JoinHandle<()>>,
    stream: Option<DuplexStream>,
    loaded: Option<Arc<[f32]>>,
    analyzer: SpectrumAnalyzer,
    tap_scratch: Vec<f32>,
}

impl EqualizerSession {
    /// Build the engine and start the redesign thread without opening a device
    ///
    /// The caller drives the returned [`AudioEngine`] itself, from a test or
    /// any other block clock.
    pub fn detached(
        config: StreamConfig,
        bank: FilterBank,
        initial: ControlSnapshot,
    ) -> Result<(Self, AudioEngine)> {
        let parts = AudioEngine::build(config, bank, initial)?;
        let redesign = parts.redesigner.spawn()?;

        let session = Self {
            handle: parts.handle,
            bank,
            redesign: Some(redesign),
            stream: None,
            loaded: None,
            analyzer: SpectrumAnalyzer::new(config.sample_rate.hz()),
            tap_scratch: Vec::with_capacity(config.block_size),
        };
        Ok((session, parts.engine))
    }

    /// Build the engine and run it on the audio devices
    pub fn open(
        config: StreamConfig,
        bank: FilterBank,
        initial: ControlSnapshot,
        devices: &DeviceSelection,
    ) -> Result<Self> {
        let (mut session, engine) = Self::detached(config, bank, initial)?;
        session.stream = Some(DuplexStream::open(engine, devices)?);
        info!("Equalizer session live");
        Ok(session)
    }

    pub fn config(&self) -> &StreamConfig {
        self.handle.config()
    }

    pub fn bank(&self) -> &FilterBank {
        &self.bank
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        self.handle.snapshot()
    }

    pub fn source_state(&self) -> SourceState {
        self.handle.source_state()
    }

    pub fn is_live(&self) -> bool {
        self.stream.is_some()
    }

    /// Length in samples of the loaded file, if any
    pub fn loaded_len(&self) -> Option<usize> {
        self.loaded.as_ref().map(|samples| samples.len())
    }

    // ------------------------------------------------------------------
    // Controls
    // ------------------------------------------------------------------

    pub fn set_enabled(&mut self, slot: SlotId, enabled: bool) {
        self.handle.set_enabled(slot, enabled);
    }

    /// Flip a slot, returning its new state
    pub fn toggle(&mut self, slot: SlotId) -> bool {
        let enabled = !self.handle.snapshot().is_enabled(slot);
        self.handle.set_enabled(slot, enabled);
        enabled
    }

    pub fn set_custom_cutoff(&mut self, hz: f32) -> f32 {
        self.handle.set_custom_cutoff(hz)
    }

    pub fn set_gain(&mut self, gain: f32) -> f32 {
        self.handle.set_gain(gain)
    }

    /// Replace every control at once, e.g. from a preset
    pub fn apply_snapshot(&mut self, snapshot: ControlSnapshot) {
        debug!("Applying control snapshot {:?}", snapshot);
        self.handle.publish(snapshot);
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    /// Decode, resample and normalize a file, keeping it ready to play
    ///
    /// A decode failure leaves the current source and the previously
    /// loaded file untouched.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let samples = load_mono(path.as_ref(), self.config().sample_rate.hz())?;
        let len = samples.len();
        self.loaded = Some(samples.into());
        Ok(len)
    }

    /// Start playing the loaded file from its beginning
    pub fn play(&mut self) -> Result<()> {
        let samples = self
            .loaded
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| AudioError::InvalidState("no file loaded".to_string()))?;
        self.handle.play_file(samples)?;
        info!("Playback started");
        Ok(())
    }

    pub fn play_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.load_file(path)?;
        self.play()
    }

    pub fn start_capture(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            if !stream.has_input() {
                return Err(AudioError::DeviceError("no capture device available".to_string()));
            }
        }
        self.handle.start_capture()?;
        info!("Capture started");
        Ok(())
    }

    /// Stop whichever source is active
    pub fn stop(&mut self) -> Result<()> {
        match self.handle.source_state() {
            SourceState::Capturing => self.handle.stop_capture(),
            SourceState::PlayingFile | SourceState::FileExhausted => self.handle.stop_file(),
            SourceState::Idle => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Consumers
    // ------------------------------------------------------------------

    /// Freeze the current controls into an export that can run elsewhere
    pub fn export_job(&self, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> ExportJob {
        ExportJob::new(self.bank, self.snapshot(), input, output)
    }

    /// Spectrum of the last processed block, `None` while silent
    pub fn spectrum(&mut self) -> Option<Spectrum> {
        self.handle.last_block(&mut self.tap_scratch);
        self.analyzer.analyze(&self.tap_scratch)
    }

    /// Drain engine events, logging each one
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        if let Some(stream) = &self.stream {
            for message in stream.poll_errors() {
                warn!("Audio device reported: {}", message);
            }
        }

        let events = self.handle.poll_events();
        for event in &events {
            match event {
                EngineEvent::PlaybackEnded => info!("Playback ended"),
                EngineEvent::SourceRejected { count } => {
                    warn!("{} source command(s) rejected by the engine", count)
                }
                EngineEvent::RuntimeFault(kind) => {
                    error!("Audio block replaced by silence: {:?}", kind)
                }
            }
        }
        events
    }

    /// Stop the stream and wait for the redesign thread
    pub fn shutdown(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        let Some(stream) = self.stream.take() else {
            // The engine lives with the caller; its designer exits once it
            // is dropped.
            self.redesign.take();
            return;
        };
        drop(stream);
        if let Some(thread) = self.redesign.take() {
            if thread.join().is_err() {
                error!("Redesign thread panicked");
            }
        }
        info!("Equalizer session stopped");
    }
}

impl Drop for EqualizerSession {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

/// One offline export with its controls fixed at creation
///
/// Owns everything it needs, so it can be moved to a blocking worker
/// while the session keeps running.
#[derive(Debug, Clone)]
pub struct ExportJob {
    bank: FilterBank,
    snapshot: ControlSnapshot,
    input: PathBuf,
    output: PathBuf,
}

impl ExportJob {
    pub fn new(
        bank: FilterBank,
        snapshot: ControlSnapshot,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bank,
            snapshot,
            input: input.into(),
            output: output.into(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Decode, render and write; blocks for the whole file
    pub fn run(self) -> Result<usize> {
        export_file(&self.bank, &self.snapshot, &self.input, &self.output)
    }
}

/// Offline export: decode `input`, render it zero-phase, write `output`
///
/// Returns the number of samples written. Touches no real-time state.
pub fn export_file(
    bank: &FilterBank,
    snapshot: &ControlSnapshot,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<usize> {
    let rate = bank.custom.sample_rate as u32;
    let samples = load_mono(input.as_ref(), rate)?;
    let rendered = render_offline(bank, snapshot, &samples)?;
    write_wav(output.as_ref(), &rendered, rate)?;
    info!(
        "Exported {} samples to {}",
        rendered.len(),
        output.as_ref().display()
    );
    Ok(rendered.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::{read_wav, write_wav};
    use tempfile::TempDir;

    const RATE: u32 = 44100;
    const BLOCK: usize = 1024;

    fn session() -> (EqualizerSession, AudioEngine) {
        let config = StreamConfig::new(RATE, BLOCK).unwrap();
        EqualizerSession::detached(
            config,
            FilterBank::defaults(RATE as f32),
            ControlSnapshot::default(),
        )
        .unwrap()
    }

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / RATE as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_play_without_file_is_invalid_state() {
        let (mut session, _engine) = session();
        assert!(matches!(session.play(), Err(AudioError::InvalidState(_))));
    }

    #[test]
    fn test_toggle_flips_snapshot() {
        let (mut session, _engine) = session();
        assert!(session.toggle(SlotId::Low));
        assert!(session.snapshot().is_enabled(SlotId::Low));
        assert!(!session.toggle(SlotId::Low));
        assert_eq!(session.set_gain(3.0), 1.0);
        assert_eq!(session.set_custom_cutoff(50.0), 100.0);
    }

    #[test]
    fn test_failed_load_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("tone.wav");
        write_wav(&good, &tone(2048), RATE).unwrap();

        let (mut session, _engine) = session();
        assert_eq!(session.load_file(&good).unwrap(), 2048);
        assert!(matches!(
            session.load_file(dir.path().join("missing.wav")),
            Err(AudioError::DecodeError(_))
        ));
        assert_eq!(session.loaded_len(), Some(2048));
    }

    #[test]
    fn test_file_plays_to_end_and_reports() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, &tone(2500), RATE).unwrap();

        let (mut session, mut engine) = session();
        session.play_file(&path).unwrap();
        assert_eq!(session.source_state(), SourceState::PlayingFile);

        let mut output = vec![0.0; BLOCK];
        for _ in 0..4 {
            engine.process(&[], &mut output);
        }

        assert_eq!(session.source_state(), SourceState::Idle);
        let events = session.poll_events();
        assert!(events.contains(&EngineEvent::PlaybackEnded));
    }

    #[test]
    fn test_spectrum_follows_last_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, &tone(4096), RATE).unwrap();

        let (mut session, mut engine) = session();
        assert!(session.spectrum().is_none());

        session.play_file(&path).unwrap();
        let mut output = vec![0.0; BLOCK];
        engine.process(&[], &mut output);

        let spectrum = session.spectrum().unwrap();
        assert!((spectrum.peak_frequency() - 1000.0).abs() < 50.0);
    }

    #[test]
    fn test_export_matches_offline_render() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_wav(&input, &tone(8192), RATE).unwrap();

        let (mut session, _engine) = session();
        session.set_enabled(SlotId::High, true);
        let job = session.export_job(&input, &output);
        // Later control changes do not reach a job already taken
        session.set_enabled(SlotId::High, false);
        assert_eq!(job.output(), output.as_path());
        assert_eq!(job.run().unwrap(), 8192);

        let written = read_wav(&output).unwrap();
        assert_eq!(written.sample_rate, RATE);
        assert_eq!(written.samples.len(), 8192);
        // 1 kHz through the 8 kHz highpass is nearly gone
        let peak = written.samples.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        assert!(peak < 0.05, "peak {peak}");
    }
}
