//! Host-side OpenMAX IL style component engine with DSP offload.
//!
//! The crate implements the concurrency and protocol core shared by
//! DSP-accelerated audio/video components: a command/data dispatch loop, a
//! buffer-ownership registry, the OMX lifecycle state machine, and the
//! flush/port-reconfiguration protocol, all kept consistent with the
//! asynchronous callback channel of an external DSP proxy service.
//!
//! Codec specifics (parameter tables, opcodes) stay behind the
//! [`proxy::DspProxy`] trait; this crate only guarantees the lifecycle,
//! ownership, and acknowledgment discipline around it.

pub mod buffer;
pub mod common;
pub mod component;
pub mod config;
pub mod proxy;

pub use buffer::{BufferArena, BufferData, BufferFlags, BufferId, BufferMark, OmxBuffer};
pub use common::{Direction, OmxError, PortSelector, Severity};
pub use component::{
    ClientCallbacks, Command, CompletedCommand, Component, ComponentEvent, ComponentState,
    RejectedBuffer,
};
pub use config::{EngineConfig, PortConfig};
pub use proxy::{
    AckStatus, BufferSubmission, CodecInitParams, CodecWarning, ControlOp, DspErrorCode,
    DspErrorSeverity, DspEvent, DspEventSink, DspProxy, PortParams, StreamOp,
};
