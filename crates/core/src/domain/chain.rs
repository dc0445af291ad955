//! Fixed-order filter chain with a hot-swappable custom slot
//!
//! The chain always runs its five slots in the same order (lowpass,
//! highpass, band-pass, band-stop, custom) as a strict series cascade.
//! Which slots take part in a block is decided by the [`ControlSnapshot`]
//! read at the top of that block.
//!
//! The custom slot's cutoff can move at runtime. Its coefficients are
//! designed by a [`Redesigner`] on a control-side thread; the audio thread
//! only ever sends a request with `try_send` and picks up finished designs
//! with `try_recv`, so a redesign never stalls the callback.

use crate::domain::audio::{AudioError, Result};
use crate::domain::control::{ControlSnapshot, SlotId};
use crate::domain::design::{design, Cutoff, FilterSpec, SosCoeffs, MAX_ORDER};
use crate::domain::dsp::{zero_phase, Effect, SosCascade};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Redesign requests queued between the audio thread and the redesigner
const REQUEST_CAPACITY: usize = 4;

/// Finished designs waiting for pickup
const UPDATE_CAPACITY: usize = 4;

/// Most sections a single-cutoff design can produce
const MAX_CUSTOM_SECTIONS: usize = (MAX_ORDER as usize + 1) / 2;

// ============================================================================
// FILTER BANK
// ============================================================================

/// Designs for all five slots
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterBank {
    pub lowpass: FilterSpec,
    pub highpass: FilterSpec,
    pub bandpass: FilterSpec,
    pub bandstop: FilterSpec,
    /// Starting point for the runtime-tunable slot; only its cutoff moves
    pub custom: FilterSpec,
}

impl FilterBank {
    pub const DEFAULT_ORDER: u32 = 4;
    pub const DEFAULT_CUSTOM_ORDER: u32 = 2;

    /// Factory designs: lowpass 4 kHz, highpass 8 kHz, band-pass 5-12 kHz,
    /// band-stop 4-8 kHz (all fourth order), custom second-order lowpass at 4 kHz
    pub fn defaults(sample_rate: f32) -> Self {
        let order = Self::DEFAULT_ORDER;
        Self {
            lowpass: FilterSpec::lowpass(order, 4000.0, sample_rate),
            highpass: FilterSpec::highpass(order, 8000.0, sample_rate),
            bandpass: FilterSpec::bandpass(order, 5000.0, 12000.0, sample_rate),
            bandstop: FilterSpec::bandstop(order, 4000.0, 8000.0, sample_rate),
            custom: FilterSpec::lowpass(
                Self::DEFAULT_CUSTOM_ORDER,
                ControlSnapshot::DEFAULT_CUTOFF_HZ,
                sample_rate,
            ),
        }
    }

    pub fn spec(&self, slot: SlotId) -> &FilterSpec {
        match slot {
            SlotId::Low => &self.lowpass,
            SlotId::High => &self.highpass,
            SlotId::BandPass => &self.bandpass,
            SlotId::BandStop => &self.bandstop,
            SlotId::Custom => &self.custom,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for slot in SlotId::ALL {
            self.spec(slot).validate()?;
        }
        if !matches!(self.custom.cutoff, Cutoff::Single(_)) {
            return Err(AudioError::InvalidSpec(
                "custom slot must use a single cutoff".to_string(),
            ));
        }
        Ok(())
    }

    /// Custom slot spec at the cutoff a snapshot asks for
    pub fn custom_at(&self, snapshot: &ControlSnapshot) -> FilterSpec {
        self.custom.with_cutoff(snapshot.custom_cutoff_hz())
    }
}

// ============================================================================
// FILTER SLOT
// ============================================================================

/// One toggleable stage of the chain, owning its cascade exclusively
#[derive(Debug, Clone)]
pub struct FilterSlot {
    id: SlotId,
    spec: FilterSpec,
    cascade: SosCascade,
    enabled: bool,
}

impl FilterSlot {
    /// Design `spec` and wrap it, initially disabled
    pub fn new(id: SlotId, spec: FilterSpec) -> Result<Self> {
        let sections = design(&spec)?;
        Ok(Self {
            id,
            spec,
            cascade: SosCascade::new(id.name(), &sections),
            enabled: false,
        })
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn cascade(&self) -> &SosCascade {
        &self.cascade
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enabling a disabled slot clears its registers first
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.cascade.reset();
        }
        self.enabled = enabled;
    }

    /// Adopt a new design without touching the running state
    pub fn swap(&mut self, spec: FilterSpec, sections: &[SosCoeffs]) -> Result<()> {
        self.cascade.set_coeffs(sections)?;
        self.spec = spec;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.cascade.reset();
    }

    pub fn process(&mut self, block: &mut [f32]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.cascade.process(block)
    }
}

// ============================================================================
// CUSTOM SLOT REDESIGN
// ============================================================================

/// Ask for the custom slot at a new cutoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedesignRequest {
    pub cutoff_hz: f32,
}

/// Custom slot sections stored inline
///
/// Updates travel by value and own no heap memory, so the audio thread
/// never frees anything when it consumes one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionBuffer {
    coeffs: [SosCoeffs; MAX_CUSTOM_SECTIONS],
    len: usize,
}

impl SectionBuffer {
    pub fn from_slice(sections: &[SosCoeffs]) -> Result<Self> {
        if sections.len() > MAX_CUSTOM_SECTIONS {
            return Err(AudioError::InvalidSpec(format!(
                "custom slot holds at most {MAX_CUSTOM_SECTIONS} sections, got {}",
                sections.len()
            )));
        }
        let mut coeffs = [SosCoeffs::UNITY; MAX_CUSTOM_SECTIONS];
        coeffs[..sections.len()].copy_from_slice(sections);
        Ok(Self {
            coeffs,
            len: sections.len(),
        })
    }

    pub fn as_slice(&self) -> &[SosCoeffs] {
        &self.coeffs[..self.len]
    }
}

/// Result of a redesign, handed back to the audio thread
///
/// A rejection only names the cutoff; the reason is logged by the
/// redesigner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoefficientUpdate {
    Ready {
        spec: FilterSpec,
        sections: SectionBuffer,
    },
    Rejected {
        cutoff_hz: f32,
    },
}

/// Audio-side end of the redesign link
#[derive(Debug)]
struct CustomLink {
    requests: Sender<RedesignRequest>,
    updates: Receiver<CoefficientUpdate>,
    pending: bool,
    rejected_hz: Option<f32>,
}

/// Control-side designer for the custom slot
///
/// Requests that pile up while a design is running are coalesced: only the
/// most recent cutoff is designed.
#[derive(Debug)]
pub struct Redesigner {
    base: FilterSpec,
    requests: Receiver<RedesignRequest>,
    updates: Sender<CoefficientUpdate>,
}

impl Redesigner {
    /// Serve every request currently queued, returning how many designs ran
    ///
    /// Returns `Ok(0)` when nothing was waiting.
    pub fn run_pending(&self) -> Result<usize> {
        match self.requests.try_iter().last() {
            Some(request) => {
                self.serve(request)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// Block on requests until the audio side goes away
    pub fn run(self) {
        info!("Custom filter redesigner started");
        while let Ok(first) = self.requests.recv() {
            let latest = self.requests.try_iter().last().unwrap_or(first);
            if self.serve(latest).is_err() {
                break;
            }
        }
        info!("Custom filter redesigner stopped");
    }

    /// Run [`Self::run`] on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("cascade-redesign".to_string())
            .spawn(move || self.run())
            .map_err(|e| AudioError::RuntimeFault(format!("failed to spawn redesigner: {e}")))
    }

    fn serve(&self, request: RedesignRequest) -> Result<()> {
        let spec = self.base.with_cutoff(request.cutoff_hz);
        let update = match design(&spec).and_then(|s| SectionBuffer::from_slice(&s)) {
            Ok(sections) => {
                debug!("Redesigned custom slot at {} Hz", request.cutoff_hz);
                CoefficientUpdate::Ready { spec, sections }
            }
            Err(error) => {
                warn!("Custom cutoff {} Hz rejected: {}", request.cutoff_hz, error);
                CoefficientUpdate::Rejected {
                    cutoff_hz: request.cutoff_hz,
                }
            }
        };
        self.updates
            .send(update)
            .map_err(|_| AudioError::InvalidState("filter chain dropped".to_string()))
    }
}

// ============================================================================
// FILTER CHAIN
// ============================================================================

/// The five slots in processing order
#[derive(Debug)]
pub struct FilterChain {
    bank: FilterBank,
    slots: Vec<FilterSlot>,
    link: Option<CustomLink>,
}

impl FilterChain {
    /// Design every slot of `bank`; all slots start disabled
    pub fn new(bank: FilterBank) -> Result<Self> {
        bank.validate()?;
        let slots = SlotId::ALL
            .iter()
            .map(|&id| FilterSlot::new(id, *bank.spec(id)))
            .collect::<Result<Vec<_>>>()?;
        info!("Filter chain ready with {} slots", slots.len());
        Ok(Self {
            bank,
            slots,
            link: None,
        })
    }

    /// Connect the custom slot to a control-side designer
    ///
    /// Without a designer, snapshot cutoff changes are ignored. Calling this
    /// again replaces the previous link.
    pub fn redesigner(&mut self) -> Redesigner {
        let (request_tx, request_rx) = bounded(REQUEST_CAPACITY);
        let (update_tx, update_rx) = bounded(UPDATE_CAPACITY);
        self.link = Some(CustomLink {
            requests: request_tx,
            updates: update_rx,
            pending: false,
            rejected_hz: None,
        });
        Redesigner {
            base: self.bank.custom,
            requests: request_rx,
            updates: update_tx,
        }
    }

    pub fn bank(&self) -> &FilterBank {
        &self.bank
    }

    pub fn slot(&self, id: SlotId) -> &FilterSlot {
        &self.slots[id.index()]
    }

    pub fn slots(&self) -> &[FilterSlot] {
        &self.slots
    }

    /// Cutoff the custom slot is currently designed for
    pub fn custom_cutoff_hz(&self) -> f32 {
        self.slot(SlotId::Custom).spec().primary_cutoff()
    }

    /// A redesign was requested and has not come back yet
    pub fn redesign_pending(&self) -> bool {
        self.link.as_ref().is_some_and(|l| l.pending)
    }

    /// Clear every slot's registers
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.reset();
        }
    }

    /// Filter `block` in place according to `snapshot`
    ///
    /// Real-time safe: no allocation and no blocking. Gain is applied once
    /// after the whole cascade, then every sample is clipped to [-1, 1].
    pub fn apply(&mut self, block: &mut [f32], snapshot: &ControlSnapshot) -> Result<()> {
        for slot in self.slots.iter_mut() {
            slot.set_enabled(snapshot.is_enabled(slot.id));
        }
        self.sync_custom(snapshot);

        for slot in self.slots.iter_mut() {
            slot.process(block)?;
        }

        let gain = snapshot.gain();
        for sample in block.iter_mut() {
            *sample = (*sample * gain).clamp(-1.0, 1.0);
        }
        Ok(())
    }

    /// Adopt finished designs, then request one if the cutoff moved
    fn sync_custom(&mut self, snapshot: &ControlSnapshot) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let custom = &mut self.slots[SlotId::Custom.index()];

        loop {
            match link.updates.try_recv() {
                Ok(CoefficientUpdate::Ready { spec, sections }) => {
                    link.pending = false;
                    if custom.swap(spec, sections.as_slice()).is_ok() {
                        link.rejected_hz = None;
                    }
                }
                Ok(CoefficientUpdate::Rejected { cutoff_hz }) => {
                    link.pending = false;
                    link.rejected_hz = Some(cutoff_hz);
                }
                Err(_) => break,
            }
        }

        let wanted = snapshot.custom_cutoff_hz();
        if link.pending
            || wanted == custom.spec().primary_cutoff()
            || link.rejected_hz == Some(wanted)
        {
            return;
        }

        match link.requests.try_send(RedesignRequest { cutoff_hz: wanted }) {
            Ok(()) => link.pending = true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Offline zero-phase rendering of the chain for export
///
/// Designs every enabled slot fresh (the custom slot at the snapshot's
/// cutoff), filters the whole signal forward and backward through each in
/// chain order, then applies gain and the final clip. Runs on the control
/// thread and shares no state with a live chain.
pub fn render_offline(
    bank: &FilterBank,
    snapshot: &ControlSnapshot,
    input: &[f32],
) -> Result<Vec<f32>> {
    bank.validate()?;
    let mut signal = input.to_vec();
    for slot in SlotId::ALL {
        if !snapshot.is_enabled(slot) {
            continue;
        }
        let spec = match slot {
            SlotId::Custom => bank.custom_at(snapshot),
            _ => *bank.spec(slot),
        };
        let sections = design(&spec)?;
        signal = zero_phase(&sections, &signal);
        debug!("Rendered {} offline ({} sections)", slot, sections.len());
    }

    let gain = snapshot.gain();
    for sample in signal.iter_mut() {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
    Ok(signal)
}
