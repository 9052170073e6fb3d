//! The DSP proxy boundary.
//!
//! Everything the engine knows about the co-processor service lives here:
//! the [`DspProxy`] operations the component thread drives, and the
//! [`DspEvent`]s the service delivers through its single callback entry
//! point. The proxy's internals — bridge driver, firmware, codec nodes — are
//! opaque; implementations adapt a concrete service to this trait.

use crate::buffer::OmxBuffer;
use crate::common::{Direction, OmxError};

/// Parameters handed to the proxy when the codec node is created, derived
/// from the engine configuration the way the reference derived its init
/// block from the port definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInitParams {
    /// Codec identifier, e.g. `"aac.enc"`.
    pub codec: String,
    pub stream_id: u32,
    pub input: PortParams,
    pub output: PortParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortParams {
    pub buffer_count: usize,
    pub buffer_size: usize,
}

/// Stream-level control operations multiplexed over one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOp {
    /// Push the codec parameter block down to the stream.
    SetCodecParams,
    /// Discard everything queued on one direction.
    Flush,
}

/// Opcodes accepted by [`DspProxy::control`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControlOp {
    Start,
    Stop,
    Pause,
    Destroy,
    /// Algorithm-specific control with a marshalled payload.
    AlgControl { payload: Vec<u8> },
    /// Stream control; `direction` is `None` for stream-wide operations.
    StreamControl {
        op: StreamOp,
        direction: Option<Direction>,
    },
}

/// One buffer handed to the DSP. The backing memory moves with the
/// submission; it comes back inside [`DspEvent::BufferProcessed`].
#[derive(Debug)]
pub struct BufferSubmission {
    pub direction: Direction,
    pub buffer: OmxBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ok,
    Failed,
}

/// Severity reported with a DSP error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DspErrorSeverity {
    Warning,
    Recoverable,
    Fatal,
}

/// Transient codec warnings. Logged, never escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecWarning {
    Concealment,
    Underflow,
    Overflow,
    EndOfData,
    /// The algorithm drained its final frame; surfaces as an EOS buffer flag.
    PlayCompleted,
}

/// Error codes reported with a DSP error event.
///
/// `UnknownMessage` with an empty detail payload is the MMU-fault signature
/// the reference hardware produced; the router treats it as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DspErrorCode {
    None,
    UnknownMessage,
    Warning(CodecWarning),
    General,
    DataCorrupt,
}

/// Events delivered by the proxy. The callback may arrive on any
/// proxy-owned thread; sinks must stay bounded — registry updates, condvar
/// signals, and client completion callbacks only.
#[derive(Debug)]
pub enum DspEvent {
    BufferProcessed {
        direction: Direction,
        buffer: OmxBuffer,
        /// Bytes produced (output) or consumed (input).
        filled_len: usize,
    },
    StreamControlAck {
        op: StreamOp,
        direction: Option<Direction>,
        status: AckStatus,
    },
    ProcessingStarted,
    ProcessingPaused,
    ProcessingStopped,
    AlgControlAck,
    Error {
        severity: DspErrorSeverity,
        code: DspErrorCode,
        detail: Option<String>,
    },
    MessageReceived {
        opcode: u32,
        arg1: u32,
        arg2: u32,
    },
}

/// Receives proxy events. Installed at open time; invoked from proxy-owned
/// threads.
pub trait DspEventSink: Send + Sync {
    fn on_event(&self, event: DspEvent);
}

/// The operations the engine consumes from the DSP proxy service.
///
/// Contract:
/// - `open` must be called before `control` or `queue_buffer`;
/// - `control(Stop)` returns every queued buffer through
///   [`DspEvent::BufferProcessed`] (zero result length permitted) before
///   [`DspEvent::ProcessingStopped`] fires;
/// - a rejected `queue_buffer` must not retain the submission's memory.
pub trait DspProxy: Send {
    fn open(
        &mut self,
        init: &CodecInitParams,
        sink: std::sync::Arc<dyn DspEventSink>,
    ) -> Result<(), OmxError>;

    fn control(&mut self, op: ControlOp) -> Result<(), OmxError>;

    fn queue_buffer(&mut self, submission: BufferSubmission) -> Result<(), OmxError>;
}
