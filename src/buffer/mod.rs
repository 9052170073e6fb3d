//! Buffer descriptors and the ownership registry.
//!
//! An [`OmxBuffer`] couples a registry slot with its backing memory. The
//! memory travels with the value: holding the buffer *is* holding ownership
//! of the region, so the single-owner invariant is enforced by moves rather
//! than by discipline. The registry keeps the bookkeeping side — owner tag,
//! pending flag, outstanding counters — that the state machine and the flush
//! protocol wait on.

pub mod arena;
pub(crate) mod registry;

use std::ops::{Deref, DerefMut};

pub use arena::{BufferArena, DSP_CACHE_ALIGN, PayloadOffset, Region};

use crate::common::Direction;

/// Who currently holds a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    Client,
    Component,
    DspProxy,
    TunneledPeer,
}

/// Flags carried on a submission or completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// End of stream.
    pub eos: bool,
}

/// Identifies a registry slot: the port plus the slot index on that port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub direction: Direction,
    pub index: usize,
}

/// A mark riding on a buffer, surfaced on the matching output completion or,
/// when targeted at this component, as a Mark event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferMark {
    /// Name of the component the mark is addressed to.
    pub target: String,
    /// Opaque client token.
    pub token: u64,
}

/// Backing memory of a buffer: an arena region for component-allocated
/// buffers, caller-supplied memory for `use_buffer`.
pub enum BufferData {
    Arena(Region),
    Client(Box<[u8]>),
}

impl BufferData {
    pub fn capacity(&self) -> usize {
        match self {
            Self::Arena(r) => r.len(),
            Self::Client(b) => b.len(),
        }
    }
}

impl Deref for BufferData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Arena(r) => r,
            Self::Client(b) => b,
        }
    }
}

impl DerefMut for BufferData {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Arena(r) => r,
            Self::Client(b) => b,
        }
    }
}

impl std::fmt::Debug for BufferData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arena(r) => write!(f, "BufferData::Arena({} bytes)", r.len()),
            Self::Client(b) => write!(f, "BufferData::Client({} bytes)", b.len()),
        }
    }
}

/// A buffer whose backing memory moves with it through the
/// client → component → DSP → client cycle.
#[derive(Debug)]
pub struct OmxBuffer {
    id: BufferId,
    data: BufferData,
    /// Valid bytes in the payload.
    pub filled_len: usize,
    pub flags: BufferFlags,
    /// Presentation timestamp in microseconds.
    pub timestamp: i64,
    pub mark: Option<BufferMark>,
}

impl OmxBuffer {
    pub(crate) fn new(id: BufferId, data: BufferData) -> Self {
        Self {
            id,
            data,
            filled_len: 0,
            flags: BufferFlags::default(),
            timestamp: 0,
            mark: None,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.id.direction
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The valid part of the payload.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.filled_len.min(self.data.capacity())]
    }

    /// The whole capacity, for filling.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reset completion-visible state before handing the buffer back.
    pub(crate) fn reset_for_return(&mut self) {
        self.filled_len = 0;
        self.flags = BufferFlags::default();
        self.mark = None;
    }
}
