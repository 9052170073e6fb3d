//! Client-facing callback surface.

use crate::buffer::{BufferMark, OmxBuffer};
use crate::common::{Direction, OmxError, Severity};
use crate::component::ComponentState;

/// Which command an acknowledgment refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedCommand {
    StateSet(ComponentState),
    Flush(Direction),
    PortDisable(Direction),
    PortEnable(Direction),
}

/// Events delivered through [`ClientCallbacks::on_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentEvent {
    CommandComplete(CompletedCommand),
    Error { error: OmxError, severity: Severity },
    /// A flagged buffer (currently only end-of-stream) reached a port edge.
    BufferFlag { port: Direction, eos: bool },
    /// A buffer mark addressed to this component was consumed.
    Mark(BufferMark),
}

/// The IL client's callback triple. Completion callbacks return buffer
/// ownership to the caller; they may be invoked from the component thread or
/// from the DSP callback thread and must not block.
pub trait ClientCallbacks: Send + Sync {
    fn on_event(&self, event: ComponentEvent);
    fn empty_buffer_done(&self, buffer: OmxBuffer);
    fn fill_buffer_done(&self, buffer: OmxBuffer);
}
