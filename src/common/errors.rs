use thiserror::Error;

/// Severity attached to error events delivered through the client callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

/// How an error propagates through the engine.
///
/// Usage errors are reported and forgotten, resource errors may park the
/// component in `WaitForResources`, fatal errors force recovery into
/// `Invalid`, and preemption substitutes the normal command-complete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Usage,
    Resource,
    Fatal,
    Preemption,
}

/// Component error taxonomy, mirroring the OMX error set this engine exposes
/// to IL clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OmxError {
    #[error("port index {0} is out of range")]
    BadPortIndex(u32),

    #[error("bad parameter: {0}")]
    BadParameter(&'static str),

    #[error("component is already in the requested state")]
    SameState,

    #[error("transition is not permitted from the current state")]
    IncorrectStateTransition,

    #[error("operation is not permitted in the current state")]
    IncorrectStateOperation,

    #[error("buffer is already queued at the DSP")]
    BufferAlreadyPending,

    #[error("buffer does not belong to this component")]
    UnknownBuffer,

    #[error("port is not ready for buffer traffic")]
    PortNotReady,

    #[error("insufficient resources")]
    InsufficientResources,

    #[error("command channel is full or closed")]
    ChannelFull,

    #[error("hardware failure: {0}")]
    Hardware(String),

    #[error("component has entered the invalid state")]
    InvalidState,

    #[error("resources preempted by the resource manager")]
    ResourcesPreempted,

    #[error("resources lost while the component was inactive")]
    ResourcesLost,

    #[error("stream is corrupt and decoding cannot continue")]
    StreamCorrupt,
}

impl OmxError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::BadPortIndex(_)
            | Self::BadParameter(_)
            | Self::SameState
            | Self::IncorrectStateTransition
            | Self::IncorrectStateOperation
            | Self::BufferAlreadyPending
            | Self::UnknownBuffer
            | Self::PortNotReady => ErrorClass::Usage,
            Self::InsufficientResources | Self::ChannelFull => ErrorClass::Resource,
            Self::Hardware(_) | Self::InvalidState | Self::StreamCorrupt => ErrorClass::Fatal,
            Self::ResourcesPreempted | Self::ResourcesLost => ErrorClass::Preemption,
        }
    }

    pub fn severity(&self) -> Severity {
        match self.class() {
            ErrorClass::Usage => Severity::Minor,
            ErrorClass::Resource | ErrorClass::Preemption => Severity::Major,
            ErrorClass::Fatal => Severity::Critical,
        }
    }
}
