//! The client-facing component handle and its dispatch machinery.
//!
//! [`Component::spawn`] starts the component thread and hands back the
//! handle clients drive. Client calls never block: commands and buffers
//! travel over bounded channels into the dispatch loop, which is the sole
//! mutator of lifecycle and ownership state. The DSP proxy's callback
//! thread feeds results back through the callback router.

mod engine;
mod events;
mod flush;
mod router;
mod shared;
mod state;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Instant;

use flume::{Sender, TrySendError};
use tracing::debug;

use crate::buffer::{BufferArena, BufferData, BufferId, BufferMark, DSP_CACHE_ALIGN, OmxBuffer};
use crate::common::{Direction, OmxError, PortSelector};
use crate::config::EngineConfig;
use crate::proxy::DspProxy;

use engine::{Engine, EngineMsg};
use shared::Shared;

pub use events::{ClientCallbacks, CompletedCommand, ComponentEvent};
pub use state::ComponentState;

/// Commands accepted by [`Component::send_command`]. The dispatcher executes
/// each one fully before reading the next.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetState(ComponentState),
    Flush(PortSelector),
    PortDisable(PortSelector),
    PortEnable(PortSelector),
    /// Arm a mark for the next input buffer.
    MarkBuffer(BufferMark),
}

/// A buffer submission the component refused. The buffer rides back so the
/// caller keeps ownership of the memory.
#[derive(Debug)]
pub struct RejectedBuffer {
    pub error: OmxError,
    pub buffer: OmxBuffer,
}

/// Handle to a running component instance.
///
/// Dropping the handle tears the component down: the dispatch thread is
/// signalled, woken out of any acknowledgment wait, and joined; the proxy is
/// destroyed best-effort on the way out.
pub struct Component {
    shared: Arc<Shared>,
    cmd_tx: Sender<EngineMsg>,
    data_tx: Sender<OmxBuffer>,
    callbacks: Arc<dyn ClientCallbacks>,
    arena: BufferArena,
    config: EngineConfig,
    thread: Option<JoinHandle<()>>,
}

impl Component {
    /// Start the component thread in `Loaded` with the given proxy binding
    /// and callback triple.
    pub fn spawn(
        config: EngineConfig,
        callbacks: Arc<dyn ClientCallbacks>,
        proxy: Box<dyn DspProxy>,
    ) -> Result<Self, OmxError> {
        let shared = Arc::new(Shared::new(&config));
        let (cmd_tx, cmd_rx) = flume::bounded(config.channel_depth);
        let (data_tx, data_rx) = flume::bounded(config.channel_depth);
        let arena = BufferArena::new(DSP_CACHE_ALIGN)?;

        let engine = Engine::new(
            config.clone(),
            Arc::clone(&shared),
            Arc::clone(&callbacks),
            proxy,
            cmd_rx,
            data_rx,
            cmd_tx.clone(),
        );
        let thread = std::thread::Builder::new()
            .name(format!("{}-dispatch", config.name))
            .spawn(move || engine.run())
            .map_err(|err| OmxError::Hardware(format!("component thread spawn failed: {err}")))?;

        Ok(Self {
            shared,
            cmd_tx,
            data_tx,
            callbacks,
            arena,
            config,
            thread: Some(thread),
        })
    }

    /// Enqueue a command. Never blocks; a full or closed channel is a
    /// resource-exhaustion error and the command is dropped.
    pub fn send_command(&self, command: Command) -> Result<(), OmxError> {
        let is_state_set = matches!(command, Command::SetState(_));
        if is_state_set {
            self.shared.begin_transition();
        }
        match self.cmd_tx.try_send(EngineMsg::Command(command)) {
            Ok(()) => Ok(()),
            Err(_) => {
                if is_state_set {
                    self.shared.cancel_transition();
                }
                Err(OmxError::ChannelFull)
            }
        }
    }

    /// Hand an input buffer to the component for consumption.
    pub fn empty_this_buffer(&self, buffer: OmxBuffer) -> Result<(), RejectedBuffer> {
        self.submit(Direction::Input, buffer)
    }

    /// Hand an output buffer to the component to be filled.
    pub fn fill_this_buffer(&self, buffer: OmxBuffer) -> Result<(), RejectedBuffer> {
        self.submit(Direction::Output, buffer)
    }

    fn submit(&self, dir: Direction, buffer: OmxBuffer) -> Result<(), RejectedBuffer> {
        if buffer.direction() != dir {
            return Err(RejectedBuffer {
                error: OmxError::BadPortIndex(buffer.direction().port_index()),
                buffer,
            });
        }
        match self.shared.current_state() {
            ComponentState::Idle | ComponentState::Executing | ComponentState::Pause => {}
            _ => {
                return Err(RejectedBuffer {
                    error: OmxError::IncorrectStateOperation,
                    buffer,
                });
            }
        }
        let id = buffer.id();
        if let Err(error) = self
            .shared
            .registry
            .lock()
            .port_mut(dir)
            .mark_submitted(id.index)
        {
            return Err(RejectedBuffer { error, buffer });
        }
        match self.data_tx.try_send(buffer) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.shared
                    .registry
                    .lock()
                    .port_mut(dir)
                    .rollback_submitted(id.index);
                let buffer = match err {
                    TrySendError::Full(b) | TrySendError::Disconnected(b) => b,
                };
                Err(RejectedBuffer {
                    error: OmxError::ChannelFull,
                    buffer,
                })
            }
        }
    }

    /// Register a client-allocated memory region on `dir`.
    ///
    /// Permitted while the port is being populated: in `Loaded` or
    /// `WaitForResources`, or while the port is disabled.
    pub fn use_buffer(&self, dir: Direction, memory: Box<[u8]>) -> Result<OmxBuffer, OmxError> {
        if memory.is_empty() {
            return Err(OmxError::BadParameter("buffer memory must be non-empty"));
        }
        let id = self.register(dir, false)?;
        Ok(OmxBuffer::new(id, BufferData::Client(memory)))
    }

    /// Allocate `size` bytes of DSP-aligned memory and register it on `dir`.
    pub fn allocate_buffer(&self, dir: Direction, size: usize) -> Result<OmxBuffer, OmxError> {
        let region = self.arena.alloc(size)?;
        let id = self.register(dir, true)?;
        Ok(OmxBuffer::new(id, BufferData::Arena(region)))
    }

    fn register(&self, dir: Direction, component_allocated: bool) -> Result<BufferId, OmxError> {
        let state = self.shared.current_state();
        let mut reg = self.shared.registry.lock();
        let port = reg.port_mut(dir);
        let populating = matches!(
            state,
            ComponentState::Loaded | ComponentState::WaitForResources
        ) || !port.enabled;
        if !populating {
            return Err(OmxError::IncorrectStateOperation);
        }
        if port.registered_count() >= port.target {
            return Err(OmxError::BadParameter(
                "port already holds its full complement of buffers",
            ));
        }
        let index = port.register(component_allocated);
        drop(reg);
        // the Loaded->Idle transition waits on population
        self.shared.registry_cond.notify_all();
        Ok(BufferId {
            direction: dir,
            index,
        })
    }

    /// Release a buffer's registration. Holding the buffer is the ownership
    /// proof: only client-owned buffers can arrive here.
    pub fn free_buffer(&self, buffer: OmxBuffer) -> Result<(), RejectedBuffer> {
        let id = buffer.id();
        match self
            .shared
            .registry
            .lock()
            .port_mut(id.direction)
            .unregister(id.index)
        {
            Ok(component_allocated) => {
                debug!(
                    dir = %id.direction,
                    index = id.index,
                    component_allocated,
                    "buffer freed"
                );
            }
            Err(error) => return Err(RejectedBuffer { error, buffer }),
        }
        // teardown waits until every registration is gone
        self.shared.registry_cond.notify_all();
        Ok(())
    }

    /// Current lifecycle state.
    ///
    /// Waits out any accepted-but-unacknowledged state-set commands, bounded
    /// by the configured acknowledgment timeout.
    pub fn state(&self) -> ComponentState {
        let deadline = self.config.ack_timeout().map(|d| Instant::now() + d);
        let mut cell = self.shared.state.lock();
        while cell.pending_transitions > 0 {
            match deadline {
                None => self.shared.state_cond.wait(&mut cell),
                Some(at) => {
                    if self.shared.state_cond.wait_until(&mut cell, at).timed_out() {
                        break;
                    }
                }
            }
        }
        cell.current
    }

    /// Resource-manager callback: the DSP became available again. Retries
    /// the `WaitForResources` to `Idle` acquisition.
    pub fn resources_available(&self) -> Result<(), OmxError> {
        if self.shared.current_state() != ComponentState::WaitForResources {
            return Ok(());
        }
        self.send_command(Command::SetState(ComponentState::Idle))
    }

    /// Resource-manager callback: the DSP is being reclaimed. Forces an
    /// `Idle` transition whose completion reports `ResourcesPreempted`
    /// instead of the normal acknowledgment.
    pub fn preempt_resources(&self) -> Result<(), OmxError> {
        match self.shared.current_state() {
            ComponentState::Executing | ComponentState::Pause => {
                self.shared.preempted.store(true, Ordering::Release);
                self.send_command(Command::SetState(ComponentState::Idle))
            }
            _ => {
                // nothing running on the DSP; the resources are simply gone
                let error = OmxError::ResourcesLost;
                let severity = error.severity();
                self.callbacks
                    .on_event(ComponentEvent::Error { error, severity });
                Ok(())
            }
        }
    }
}

impl Drop for Component {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake_all();
        let _ = self.cmd_tx.try_send(EngineMsg::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                debug!("component thread panicked during teardown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{BufferSubmission, CodecInitParams, ControlOp, DspEventSink};

    struct NullProxy;

    impl DspProxy for NullProxy {
        fn open(
            &mut self,
            _init: &CodecInitParams,
            _sink: Arc<dyn DspEventSink>,
        ) -> Result<(), OmxError> {
            Ok(())
        }

        fn control(&mut self, _op: ControlOp) -> Result<(), OmxError> {
            Ok(())
        }

        fn queue_buffer(&mut self, _submission: BufferSubmission) -> Result<(), OmxError> {
            Ok(())
        }
    }

    struct NullCallbacks;

    impl ClientCallbacks for NullCallbacks {
        fn on_event(&self, _event: ComponentEvent) {}
        fn empty_buffer_done(&self, _buffer: OmxBuffer) {}
        fn fill_buffer_done(&self, _buffer: OmxBuffer) {}
    }

    fn component() -> Component {
        Component::spawn(
            EngineConfig::default(),
            Arc::new(NullCallbacks),
            Box::new(NullProxy),
        )
        .unwrap()
    }

    #[test]
    fn starts_loaded() {
        let c = component();
        assert_eq!(c.state(), ComponentState::Loaded);
    }

    #[test]
    fn buffer_traffic_is_rejected_before_idle() {
        let c = component();
        let buf = c.allocate_buffer(Direction::Input, 64).unwrap();
        let rejected = c.empty_this_buffer(buf).unwrap_err();
        assert_eq!(rejected.error, OmxError::IncorrectStateOperation);
        c.free_buffer(rejected.buffer).unwrap();
    }

    #[test]
    fn wrong_direction_is_a_bad_port() {
        let c = component();
        let buf = c.allocate_buffer(Direction::Output, 64).unwrap();
        let rejected = c.empty_this_buffer(buf).unwrap_err();
        assert!(matches!(rejected.error, OmxError::BadPortIndex(1)));
    }

    #[test]
    fn registration_stops_at_the_target() {
        let c = component();
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(c.allocate_buffer(Direction::Input, 64).unwrap());
        }
        assert!(c.allocate_buffer(Direction::Input, 64).is_err());
    }

    #[test]
    fn freed_slot_can_be_registered_again() {
        let c = component();
        let memory = vec![0u8; 128].into_boxed_slice();
        let buf = c.use_buffer(Direction::Output, memory).unwrap();
        let id = buf.id();
        c.free_buffer(buf).unwrap();
        let again = c.use_buffer(Direction::Output, vec![0u8; 32].into_boxed_slice()).unwrap();
        assert_eq!(again.id(), id);
    }
}
