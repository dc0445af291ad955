//! Real-time audio engine and its control handle
//!
//! [`AudioEngine`] owns everything the audio callback touches: the filter
//! chain, the source multiplexer and preallocated scratch memory. The
//! control side only ever holds an [`EngineHandle`], which publishes
//! snapshots, queues source commands and drains engine events.
//!
//! Per block the engine:
//! 1. loads the latest [`ControlSnapshot`]
//! 2. pulls samples from the source multiplexer
//! 3. runs the filter chain (gain and clip included)
//! 4. publishes a copy to the visualization tap
//! 5. writes the block to the driver's output buffer
//!
//! A panic or a non-finite sample during steps 2-4 is contained: the
//! block is replaced by silence, the filters are reset and a
//! [`EngineEvent::RuntimeFault`] is queued for the control side.

use crate::domain::audio::{AudioError, Result, StreamConfig};
use crate::domain::chain::{FilterBank, FilterChain, Redesigner};
use crate::domain::control::{ControlSnapshot, SlotId, SnapshotCell};
use crate::domain::source::{source_link, SourceControl, SourceMultiplexer, SourceState};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Pending engine events before new ones are dropped
const EVENT_CAPACITY: usize = 64;

/// What went wrong inside a contained fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The processing code panicked
    Panic,
    /// The chain produced NaN or infinity
    NonFinite,
    /// A processing stage returned an error
    Processing,
}

/// Notifications from the audio thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The file source ran out and the engine went idle
    PlaybackEnded,
    /// Source toggles refused by the multiplexer
    SourceRejected { count: u32 },
    /// A block was replaced by silence
    RuntimeFault(FaultKind),
}

impl EngineEvent {
    /// Error value for faults, for reporting on the control side
    pub fn as_error(&self) -> Option<AudioError> {
        match self {
            EngineEvent::RuntimeFault(kind) => Some(AudioError::RuntimeFault(format!(
                "{kind:?} in audio callback; block replaced by silence"
            ))),
            _ => None,
        }
    }
}

// ============================================================================
// VISUALIZATION TAP
// ============================================================================

/// Single-slot copy of the last processed block
///
/// The audio thread overwrites it every block; readers may observe a block
/// that is partly old and partly new. That is accepted: the data is only
/// used for display.
#[derive(Debug)]
pub struct VisualizationTap {
    samples: Box<[AtomicU32]>,
    len: AtomicUsize,
    sequence: AtomicU64,
}

impl VisualizationTap {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            len: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Overwrite the slot with `block` (truncated to capacity)
    pub fn publish(&self, block: &[f32]) {
        let n = block.len().min(self.samples.len());
        for (slot, sample) in self.samples.iter().zip(&block[..n]) {
            slot.store(sample.to_bits(), Ordering::Relaxed);
        }
        self.len.store(n, Ordering::Relaxed);
        self.sequence.fetch_add(1, Ordering::Release);
    }

    /// Number of blocks published so far
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Copy the current block into `out`, returning its sequence number
    pub fn read_into(&self, out: &mut Vec<f32>) -> u64 {
        let sequence = self.sequence();
        let n = self.len.load(Ordering::Relaxed).min(self.samples.len());
        out.clear();
        out.extend(
            self.samples[..n]
                .iter()
                .map(|s| f32::from_bits(s.load(Ordering::Relaxed))),
        );
        sequence
    }
}

// ============================================================================
// AUDIO ENGINE (audio thread)
// ============================================================================

/// Everything [`AudioEngine::build`] hands out
pub struct EngineParts {
    pub engine: AudioEngine,
    pub handle: EngineHandle,
    /// Must be driven (see [`Redesigner::spawn`]) for custom cutoff changes
    /// to take effect
    pub redesigner: Redesigner,
}

/// Real-time state, moved into the driver callback
#[derive(Debug)]
pub struct AudioEngine {
    config: StreamConfig,
    snapshot: Arc<SnapshotCell>,
    chain: FilterChain,
    source: SourceMultiplexer,
    tap: Arc<VisualizationTap>,
    events: Sender<EngineEvent>,
    scratch: Vec<f32>,
    faults: u64,
}

impl AudioEngine {
    /// Design the filter bank and wire up both sides of the engine
    pub fn build(
        config: StreamConfig,
        bank: FilterBank,
        initial: ControlSnapshot,
    ) -> Result<EngineParts> {
        config.validate()?;
        let rate = config.sample_rate.hz() as f32;
        for slot in SlotId::ALL {
            if bank.spec(slot).sample_rate != rate {
                return Err(AudioError::InvalidConfiguration(format!(
                    "{slot} designed for {} Hz but the stream runs at {rate} Hz",
                    bank.spec(slot).sample_rate
                )));
            }
        }

        let mut chain = FilterChain::new(bank)?;
        let redesigner = chain.redesigner();
        let (source_control, source) = source_link();
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        let snapshot = Arc::new(SnapshotCell::new(initial));
        let tap = Arc::new(VisualizationTap::new(config.block_size));

        info!(
            "Audio engine built: {} Hz, block {}",
            config.sample_rate.hz(),
            config.block_size
        );

        Ok(EngineParts {
            engine: AudioEngine {
                config,
                snapshot: Arc::clone(&snapshot),
                chain,
                source,
                tap: Arc::clone(&tap),
                events: event_tx,
                scratch: vec![0.0; config.block_size],
                faults: 0,
            },
            handle: EngineHandle {
                config,
                current: initial,
                snapshot,
                source: source_control,
                events: event_rx,
                tap,
            },
            redesigner,
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    /// Blocks replaced by silence so far
    pub fn fault_count(&self) -> u64 {
        self.faults
    }

    /// Driver callback entry point
    ///
    /// `output` may be any length; it is processed in chunks of at most the
    /// configured block size. `input` holds the matching capture samples
    /// (missing ones read as silence).
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let block_size = self.config.block_size;
        for (index, chunk) in output.chunks_mut(block_size).enumerate() {
            let start = (index * block_size).min(input.len());
            let end = (start + chunk.len()).min(input.len());
            self.process_block(&input[start..end], chunk);
        }
    }

    fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        let snapshot = self.snapshot.load();
        let len = output.len();
        let source = &mut self.source;
        let chain = &mut self.chain;
        let scratch = &mut self.scratch[..len];
        let mut block = None;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            block = Some(source.next_block(input, scratch));
            chain.apply(scratch, &snapshot)?;
            if scratch.iter().any(|x| !x.is_finite()) {
                return Err(FaultKind::NonFinite);
            }
            Ok(())
        }));

        // Source transitions already happened, fault or not
        if let Some(block) = block {
            if block.playback_ended {
                self.emit(EngineEvent::PlaybackEnded);
            }
            if block.rejected > 0 {
                self.emit(EngineEvent::SourceRejected {
                    count: block.rejected,
                });
            }
        }

        let fault = match outcome {
            Ok(Ok(())) => {
                output.copy_from_slice(&self.scratch[..len]);
                None
            }
            Ok(Err(kind)) => Some(kind),
            Err(_) => Some(FaultKind::Panic),
        };

        if let Some(kind) = fault {
            output.fill(0.0);
            self.chain.reset();
            self.faults += 1;
            self.emit(EngineEvent::RuntimeFault(kind));
        }

        self.tap.publish(output);
    }

    fn emit(&self, event: EngineEvent) {
        // Dropped when the control side is not keeping up.
        let _ = self.events.try_send(event);
    }
}

impl From<AudioError> for FaultKind {
    fn from(_: AudioError) -> Self {
        FaultKind::Processing
    }
}

// ============================================================================
// ENGINE HANDLE (control thread)
// ============================================================================

/// Control-side view of a running engine
///
/// Holds the only writer of the control snapshot. All operations are
/// non-blocking publications; none waits for the audio thread.
#[derive(Debug)]
pub struct EngineHandle {
    config: StreamConfig,
    current: ControlSnapshot,
    snapshot: Arc<SnapshotCell>,
    source: SourceControl,
    events: Receiver<EngineEvent>,
    tap: Arc<VisualizationTap>,
}

impl EngineHandle {
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Last snapshot published from this handle
    pub fn snapshot(&self) -> ControlSnapshot {
        self.current
    }

    pub fn publish(&mut self, snapshot: ControlSnapshot) {
        self.current = snapshot;
        self.snapshot.publish(snapshot);
    }

    pub fn set_enabled(&mut self, slot: SlotId, enabled: bool) {
        debug!("{} {}", slot, if enabled { "enabled" } else { "disabled" });
        self.publish(self.current.with_enabled(slot, enabled));
    }

    /// Returns the cutoff actually published after clamping
    pub fn set_custom_cutoff(&mut self, hz: f32) -> f32 {
        self.publish(self.current.with_custom_cutoff(hz));
        debug!("Custom cutoff set to {} Hz", self.current.custom_cutoff_hz());
        self.current.custom_cutoff_hz()
    }

    /// Returns the gain actually published after clamping
    pub fn set_gain(&mut self, gain: f32) -> f32 {
        self.publish(self.current.with_gain(gain));
        debug!("Gain set to {}", self.current.gain());
        self.current.gain()
    }

    pub fn source_state(&self) -> SourceState {
        self.source.state()
    }

    pub fn start_capture(&self) -> Result<()> {
        self.source.start_capture()
    }

    pub fn stop_capture(&self) -> Result<()> {
        self.source.stop_capture()
    }

    pub fn play_file(&self, samples: Arc<[f32]>) -> Result<()> {
        self.source.play_file(samples)
    }

    pub fn stop_file(&self) -> Result<()> {
        self.source.stop_file()
    }

    /// Drain queued engine events and free retired buffers
    pub fn poll_events(&self) -> Vec<EngineEvent> {
        self.source.collect_retired();
        self.events.try_iter().collect()
    }

    /// Copy the most recent processed block into `out`
    pub fn last_block(&self, out: &mut Vec<f32>) -> u64 {
        self.tap.read_into(out)
    }

    pub fn tap(&self) -> Arc<VisualizationTap> {
        Arc::clone(&self.tap)
    }
}
