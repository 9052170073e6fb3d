//! Ownership bookkeeping behind the component's buffer traffic.
//!
//! Single-writer discipline: the component thread performs every transition
//! except completion, which the DSP callback thread applies while holding the
//! registry lock. Counters here are what the stop/pause/flush waits converge
//! on.

use std::collections::VecDeque;

use crate::buffer::{BufferId, BufferMark, BufferOwner, OmxBuffer};
use crate::common::{Direction, OmxError};
use crate::config::PortConfig;

/// Per-direction flush/reconfiguration progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum FlushState {
    #[default]
    Idle,
    /// Waiting for DSP submissions to converge with completions.
    AwaitingDrain,
    /// DSP flush issued, waiting for the stream-control acknowledgment.
    Flushing,
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub owner: BufferOwner,
    pub pending: bool,
    pub component_allocated: bool,
    /// Present while the slot is registered; freed slots leave a hole so
    /// later indices stay stable.
    pub registered: bool,
}

#[derive(Debug)]
pub(crate) struct PortRegistry {
    pub enabled: bool,
    pub target: usize,
    pub slots: Vec<Slot>,
    /// Buffers the component holds while it cannot submit them: queued
    /// before Executing, during Pause, during a disable window, or returned
    /// by the DSP mid-stop.
    pub parked: VecDeque<OmxBuffer>,
    /// Buffers handed to the component and not yet returned to the client.
    pub outstanding_from_client: usize,
    /// Buffers submitted to the DSP and not yet completed.
    pub outstanding_at_dsp: usize,
    pub flush: FlushState,
    /// A disable command is parked behind the drain discipline.
    pub pending_disable: bool,
}

impl PortRegistry {
    pub fn new(config: &PortConfig) -> Self {
        Self {
            enabled: config.enabled,
            target: config.buffer_count,
            slots: Vec::new(),
            parked: VecDeque::new(),
            outstanding_from_client: 0,
            outstanding_at_dsp: 0,
            flush: FlushState::Idle,
            pending_disable: false,
        }
    }

    pub fn registered_count(&self) -> usize {
        self.slots.iter().filter(|s| s.registered).count()
    }

    /// Populated exactly when registrations reach the target.
    pub fn populated(&self) -> bool {
        self.registered_count() >= self.target
    }

    pub fn drained(&self) -> bool {
        self.outstanding_at_dsp == 0
    }

    pub fn register(&mut self, component_allocated: bool) -> usize {
        // Reuse a freed hole before growing the table.
        let slot = Slot {
            owner: BufferOwner::Client,
            pending: false,
            component_allocated,
            registered: true,
        };
        if let Some(index) = self.slots.iter().position(|s| !s.registered) {
            self.slots[index] = slot;
            return index;
        }
        self.slots.push(slot);
        self.slots.len() - 1
    }

    /// Drop a registration. Reports whether the memory was
    /// component-allocated.
    pub fn unregister(&mut self, index: usize) -> Result<bool, OmxError> {
        let slot = self.slot_mut(index)?;
        if slot.pending {
            return Err(OmxError::BufferAlreadyPending);
        }
        slot.registered = false;
        Ok(slot.component_allocated)
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Slot, OmxError> {
        match self.slots.get_mut(index) {
            Some(slot) if slot.registered => Ok(slot),
            _ => Err(OmxError::UnknownBuffer),
        }
    }

    fn slot(&self, index: usize) -> Result<&Slot, OmxError> {
        match self.slots.get(index) {
            Some(slot) if slot.registered => Ok(slot),
            _ => Err(OmxError::UnknownBuffer),
        }
    }

    pub fn owner(&self, index: usize) -> Result<BufferOwner, OmxError> {
        Ok(self.slot(index)?.owner)
    }

    pub fn is_pending(&self, index: usize) -> Result<bool, OmxError> {
        Ok(self.slot(index)?.pending)
    }

    /// Client hands the buffer to the component.
    pub fn mark_submitted(&mut self, index: usize) -> Result<(), OmxError> {
        let slot = self.slot_mut(index)?;
        if slot.owner != BufferOwner::Client {
            return Err(OmxError::BadParameter("buffer is not client-owned"));
        }
        slot.owner = BufferOwner::Component;
        self.outstanding_from_client += 1;
        Ok(())
    }

    /// Component hands the buffer to the DSP. Pending must be clear going in
    /// and is set atomically with the ownership flip.
    pub fn mark_queued(&mut self, index: usize) -> Result<(), OmxError> {
        let slot = self.slot_mut(index)?;
        if slot.pending {
            return Err(OmxError::BufferAlreadyPending);
        }
        if slot.owner != BufferOwner::Component {
            return Err(OmxError::BadParameter("buffer is not component-owned"));
        }
        slot.owner = BufferOwner::DspProxy;
        slot.pending = true;
        self.outstanding_at_dsp += 1;
        Ok(())
    }

    /// DSP completed the buffer; ownership returns to the client.
    pub fn mark_completed(&mut self, index: usize) -> Result<(), OmxError> {
        let slot = self.slot_mut(index)?;
        if slot.owner != BufferOwner::DspProxy || !slot.pending {
            return Err(OmxError::BadParameter("completion for a non-pending buffer"));
        }
        slot.owner = BufferOwner::Client;
        slot.pending = false;
        self.outstanding_at_dsp -= 1;
        self.outstanding_from_client -= 1;
        Ok(())
    }

    /// DSP returned the buffer mid-stop; the component keeps it parked until
    /// the stop acknowledgment lands.
    pub fn mark_reclaimed(&mut self, index: usize) -> Result<(), OmxError> {
        let slot = self.slot_mut(index)?;
        if slot.owner != BufferOwner::DspProxy || !slot.pending {
            return Err(OmxError::BadParameter("reclaim of a non-pending buffer"));
        }
        slot.owner = BufferOwner::Component;
        slot.pending = false;
        self.outstanding_at_dsp -= 1;
        Ok(())
    }

    /// Component returns a held buffer to the client without DSP involvement
    /// (bypass path, flush returns, stop returns).
    pub fn mark_returned(&mut self, index: usize) -> Result<(), OmxError> {
        let slot = self.slot_mut(index)?;
        if slot.owner != BufferOwner::Component {
            return Err(OmxError::BadParameter("return of a non-component buffer"));
        }
        slot.owner = BufferOwner::Client;
        self.outstanding_from_client -= 1;
        Ok(())
    }

    /// Undo `mark_submitted` when the hand-off channel is full.
    pub fn rollback_submitted(&mut self, index: usize) {
        if let Ok(slot) = self.slot_mut(index) {
            slot.owner = BufferOwner::Client;
        }
        self.outstanding_from_client = self.outstanding_from_client.saturating_sub(1);
    }
}

/// Registry state shared by the component thread and the callback router.
#[derive(Debug)]
pub(crate) struct Registry {
    ports: [PortRegistry; 2],
    /// Input EOS seen; the next output completion carries the flag.
    pub eos_received: bool,
    /// Input timestamps in submission order, stamped onto output completions.
    pub timestamps: VecDeque<i64>,
    /// Mark armed by a MarkBuffer command, attached to the next submission.
    pub armed_mark: Option<BufferMark>,
    /// Mark travelling from an input buffer to the next output completion.
    pub output_mark: Option<BufferMark>,
    /// An Executing→Idle stop is in flight; completions are reclaimed, not
    /// returned, until the stop acknowledgment arrives.
    pub stop_in_progress: bool,
}

impl Registry {
    pub fn new(input: &PortConfig, output: &PortConfig) -> Self {
        Self {
            ports: [PortRegistry::new(input), PortRegistry::new(output)],
            eos_received: false,
            timestamps: VecDeque::new(),
            armed_mark: None,
            output_mark: None,
            stop_in_progress: false,
        }
    }

    pub fn port(&self, dir: Direction) -> &PortRegistry {
        &self.ports[dir.index()]
    }

    pub fn port_mut(&mut self, dir: Direction) -> &mut PortRegistry {
        &mut self.ports[dir.index()]
    }

    /// True when every enabled port has reached its buffer target.
    pub fn enabled_ports_populated(&self) -> bool {
        self.ports.iter().all(|p| !p.enabled || p.populated())
    }

    /// True when the client has freed every registered buffer.
    pub fn all_freed(&self) -> bool {
        self.ports.iter().all(|p| p.registered_count() == 0)
    }

    pub fn validate(&self, id: BufferId) -> Result<(), OmxError> {
        self.port(id.direction).slot(id.index).map(|_| ())
    }

    /// Reset stream-scoped bookkeeping on stop or fatal recovery.
    pub fn reset_stream_state(&mut self) {
        self.eos_received = false;
        self.timestamps.clear();
        self.output_mark = None;
        self.stop_in_progress = false;
    }
}
