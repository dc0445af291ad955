//! Per-block choice between live capture, file playback and silence
//!
//! The [`SourceMultiplexer`] lives on the audio thread. The control side
//! drives it through a [`SourceControl`], whose commands are queued on a
//! lock-free channel and applied at the start of the next block, so the
//! block in flight always completes under the state it started with.

use crate::domain::audio::{AudioError, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Queued commands before `try_send` starts failing
const COMMAND_CAPACITY: usize = 16;

/// Released file buffers waiting to be freed on the control side
const RETIRED_CAPACITY: usize = 8;

/// Source state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceState {
    Idle = 0,
    Capturing = 1,
    PlayingFile = 2,
    /// All file samples were emitted; the next block drops to `Idle`
    FileExhausted = 3,
}

impl SourceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SourceState::Capturing,
            2 => SourceState::PlayingFile,
            3 => SourceState::FileExhausted,
            _ => SourceState::Idle,
        }
    }

    pub fn is_file_active(self) -> bool {
        matches!(self, SourceState::PlayingFile)
    }

    pub fn is_capturing(self) -> bool {
        matches!(self, SourceState::Capturing)
    }
}

/// Where the samples of a block came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLabel {
    Silence,
    Capture,
    File,
}

/// Control request, applied at the next block boundary
#[derive(Debug, Clone)]
pub enum SourceCommand {
    StartCapture,
    StopCapture,
    PlayFile(Arc<[f32]>),
    StopFile,
}

/// Outcome of one [`SourceMultiplexer::next_block`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceBlock {
    pub label: SourceLabel,
    /// File playback reached its end and the source went idle
    pub playback_ended: bool,
    /// Commands refused because the other source was active
    pub rejected: u32,
}

/// Audio-thread half of the source link
#[derive(Debug)]
pub struct SourceMultiplexer {
    state: SourceState,
    file: Option<Arc<[f32]>>,
    position: usize,
    commands: Receiver<SourceCommand>,
    published: Arc<AtomicU8>,
    retired: Sender<Arc<[f32]>>,
}

/// Control-thread half of the source link
#[derive(Debug, Clone)]
pub struct SourceControl {
    commands: Sender<SourceCommand>,
    published: Arc<AtomicU8>,
    retired: Receiver<Arc<[f32]>>,
}

/// Create a connected control/multiplexer pair, starting `Idle`
pub fn source_link() -> (SourceControl, SourceMultiplexer) {
    let (command_tx, command_rx) = bounded(COMMAND_CAPACITY);
    let (retired_tx, retired_rx) = bounded(RETIRED_CAPACITY);
    let published = Arc::new(AtomicU8::new(SourceState::Idle as u8));
    (
        SourceControl {
            commands: command_tx,
            published: Arc::clone(&published),
            retired: retired_rx,
        },
        SourceMultiplexer {
            state: SourceState::Idle,
            file: None,
            position: 0,
            commands: command_rx,
            published,
            retired: retired_tx,
        },
    )
}

impl SourceMultiplexer {
    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Samples consumed from the current file
    pub fn position(&self) -> usize {
        self.position
    }

    /// Fill `output` for one block
    ///
    /// `input` is the driver's capture block, used only while capturing.
    /// `output` is always completely written: real samples first, zeros
    /// for whatever is missing. Never allocates or blocks.
    pub fn next_block(&mut self, input: &[f32], output: &mut [f32]) -> SourceBlock {
        let mut block = SourceBlock {
            label: SourceLabel::Silence,
            playback_ended: false,
            rejected: 0,
        };

        while let Ok(command) = self.commands.try_recv() {
            if !self.apply(command, &mut block) {
                block.rejected += 1;
            }
        }

        match self.state {
            SourceState::Idle => output.fill(0.0),
            SourceState::Capturing => {
                let n = input.len().min(output.len());
                output[..n].copy_from_slice(&input[..n]);
                output[n..].fill(0.0);
                block.label = SourceLabel::Capture;
            }
            SourceState::PlayingFile => {
                let samples = self.file.as_deref().unwrap_or(&[]);
                let remaining = samples.len().saturating_sub(self.position);
                let n = remaining.min(output.len());
                output[..n].copy_from_slice(&samples[self.position..self.position + n]);
                output[n..].fill(0.0);
                self.position += n;
                if self.position >= samples.len() {
                    self.state = SourceState::FileExhausted;
                }
                block.label = SourceLabel::File;
            }
            SourceState::FileExhausted => {
                output.fill(0.0);
                self.release_file();
                self.state = SourceState::Idle;
                block.playback_ended = true;
            }
        }

        self.publish();
        block
    }

    /// Returns false when the command was refused
    fn apply(&mut self, command: SourceCommand, block: &mut SourceBlock) -> bool {
        match command {
            SourceCommand::StartCapture => match self.state {
                SourceState::PlayingFile => false,
                SourceState::FileExhausted => {
                    self.release_file();
                    block.playback_ended = true;
                    self.state = SourceState::Capturing;
                    true
                }
                _ => {
                    self.state = SourceState::Capturing;
                    true
                }
            },
            SourceCommand::StopCapture => {
                if self.state == SourceState::Capturing {
                    self.state = SourceState::Idle;
                }
                true
            }
            SourceCommand::PlayFile(samples) => {
                if self.state == SourceState::Capturing {
                    self.retire(samples);
                    return false;
                }
                self.release_file();
                self.file = Some(samples);
                self.position = 0;
                self.state = SourceState::PlayingFile;
                true
            }
            SourceCommand::StopFile => {
                if matches!(
                    self.state,
                    SourceState::PlayingFile | SourceState::FileExhausted
                ) {
                    self.release_file();
                    self.state = SourceState::Idle;
                }
                true
            }
        }
    }

    fn release_file(&mut self) {
        self.position = 0;
        if let Some(samples) = self.file.take() {
            self.retire(samples);
        }
    }

    fn retire(&self, samples: Arc<[f32]>) {
        // A full queue means the buffer is freed here instead.
        let _ = self.retired.try_send(samples);
    }

    fn publish(&self) {
        self.published.store(self.state as u8, Ordering::Release);
    }
}

impl SourceControl {
    /// Last state published by the audio thread
    pub fn state(&self) -> SourceState {
        SourceState::from_u8(self.published.load(Ordering::Acquire))
    }

    pub fn start_capture(&self) -> Result<()> {
        if self.state().is_file_active() {
            return Err(AudioError::InvalidState(
                "cannot start capture while a file is playing".to_string(),
            ));
        }
        info!("Requesting live capture");
        self.send(SourceCommand::StartCapture)
    }

    pub fn stop_capture(&self) -> Result<()> {
        debug!("Requesting capture stop");
        self.send(SourceCommand::StopCapture)
    }

    pub fn play_file(&self, samples: Arc<[f32]>) -> Result<()> {
        if self.state().is_capturing() {
            return Err(AudioError::InvalidState(
                "cannot play a file while capturing".to_string(),
            ));
        }
        info!("Requesting file playback ({} samples)", samples.len());
        self.send(SourceCommand::PlayFile(samples))
    }

    pub fn stop_file(&self) -> Result<()> {
        debug!("Requesting playback stop");
        self.send(SourceCommand::StopFile)
    }

    /// Free buffers the audio thread has let go of, returning how many
    pub fn collect_retired(&self) -> usize {
        self.retired.try_iter().map(drop).count()
    }

    fn send(&self, command: SourceCommand) -> Result<()> {
        self.commands
            .try_send(command)
            .map_err(|e| AudioError::InvalidState(format!("source command not queued: {e}")))
    }
}
