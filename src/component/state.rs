//! Lifecycle state machine.
//!
//! Transition handlers run on the component thread only. Each one either
//! publishes the new state and fires the completion event itself, or returns
//! an error for the dispatcher to report. The Executing/Pause→Idle path is
//! the ordering-critical one: buffers are returned to the client strictly
//! after the DSP stop acknowledgment, never before.

use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::common::{Direction, OmxError};
use crate::component::engine::Engine;
use crate::component::events::{CompletedCommand, ComponentEvent};
use crate::component::shared::AckKind;
use crate::proxy::{CodecInitParams, ControlOp, PortParams, StreamOp};

/// OMX component lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Loaded,
    Idle,
    Executing,
    Pause,
    WaitForResources,
    Invalid,
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Loaded => "Loaded",
            Self::Idle => "Idle",
            Self::Executing => "Executing",
            Self::Pause => "Pause",
            Self::WaitForResources => "WaitForResources",
            Self::Invalid => "Invalid",
        };
        write!(f, "{name}")
    }
}

impl Engine {
    pub(super) fn handle_state_set(&mut self, target: ComponentState) {
        debug!(current = %self.state, %target, "state set");
        let result = self.transition(target);
        self.shared.end_transition();
        if let Err(err) = result {
            self.report_error(err);
        }
    }

    fn transition(&mut self, target: ComponentState) -> Result<(), OmxError> {
        if self.state == target {
            // repeating the current state is an error event, not a no-op
            return Err(OmxError::SameState);
        }
        match target {
            ComponentState::Idle => self.to_idle(),
            ComponentState::Executing => self.to_executing(),
            ComponentState::Pause => self.to_pause(),
            ComponentState::Loaded => self.to_loaded(),
            ComponentState::WaitForResources => self.to_wait_for_resources(),
            ComponentState::Invalid => {
                self.enter_invalid();
                Ok(())
            }
        }
    }

    fn to_idle(&mut self) -> Result<(), OmxError> {
        match self.state {
            ComponentState::Loaded | ComponentState::WaitForResources => self.open_codec(),
            ComponentState::Executing | ComponentState::Pause => self.stop_codec(),
            _ => Err(OmxError::IncorrectStateTransition),
        }
    }

    /// Loaded/WaitForResources → Idle: wait for port population, then open
    /// the codec node on the DSP.
    fn open_codec(&mut self) -> Result<(), OmxError> {
        self.wait_registry("port population", |r| r.enabled_ports_populated())?;

        let init = CodecInitParams {
            codec: self.config.codec.clone(),
            stream_id: self.config.stream_id,
            input: PortParams {
                buffer_count: self.config.input.buffer_count,
                buffer_size: self.config.input.buffer_size,
            },
            output: PortParams {
                buffer_count: self.config.output.buffer_count,
                buffer_size: self.config.output.buffer_size,
            },
        };

        let sink = self.make_sink();
        match self.proxy.open(&init, sink) {
            Ok(()) => {
                self.proxy_open = true;
                self.init_params = Some(init);
                self.publish(ComponentState::Idle);
                self.emit(ComponentEvent::CommandComplete(CompletedCommand::StateSet(
                    ComponentState::Idle,
                )));
                Ok(())
            }
            Err(err) if self.config.resource_manager => {
                // the resource manager will call back when the DSP frees up
                warn!(%err, "DSP open failed, waiting for resources");
                self.publish(ComponentState::WaitForResources);
                self.emit(ComponentEvent::CommandComplete(CompletedCommand::StateSet(
                    ComponentState::WaitForResources,
                )));
                Ok(())
            }
            Err(err) => {
                warn!(%err, "DSP open failed");
                Err(OmxError::InsufficientResources)
            }
        }
    }

    /// Executing/Pause → Idle. The stop acknowledgment gates every buffer
    /// return: until the DSP confirms it stopped, its DMA may still touch
    /// the shared regions.
    fn stop_codec(&mut self) -> Result<(), OmxError> {
        self.shared.registry.lock().stop_in_progress = true;
        self.shared.clear_ack(AckKind::Stopped);
        self.control(ControlOp::Stop)?;
        self.wait_ack(AckKind::Stopped)?;

        // submissions that never left the hand-off channel go back too
        self.drain_client_queue();

        {
            let mut reg = self.shared.registry.lock();
            for dir in Direction::ALL {
                let port = reg.port(dir);
                if port.outstanding_at_dsp != 0 {
                    warn!(%dir, count = port.outstanding_at_dsp,
                          "DSP kept buffers across stop");
                }
            }
            reg.reset_stream_state();
        }

        self.return_all_parked();
        self.publish(ComponentState::Idle);
        self.complete_or_preempted(ComponentState::Idle);
        Ok(())
    }

    fn to_executing(&mut self) -> Result<(), OmxError> {
        match self.state {
            ComponentState::Idle => {
                self.control(ControlOp::StreamControl {
                    op: StreamOp::SetCodecParams,
                    direction: None,
                })?;
                if let Some(payload) = self.config.alg_params.clone() {
                    self.control(ControlOp::AlgControl { payload })?;
                }
                self.control(ControlOp::Start)?;
            }
            ComponentState::Pause => {
                self.control(ControlOp::Start)?;
            }
            _ => return Err(OmxError::IncorrectStateTransition),
        }
        self.shared.codec_stopped.store(false, Ordering::Release);
        self.publish(ComponentState::Executing);
        // buffers queued while we were not running go down now
        self.resubmit_parked_all()?;
        self.emit(ComponentEvent::CommandComplete(CompletedCommand::StateSet(
            ComponentState::Executing,
        )));
        Ok(())
    }

    fn to_pause(&mut self) -> Result<(), OmxError> {
        if self.state != ComponentState::Executing {
            return Err(OmxError::IncorrectStateTransition);
        }
        self.shared.clear_ack(AckKind::Paused);
        self.control(ControlOp::Pause)?;
        self.wait_ack(AckKind::Paused)?;
        // pause completion also requires the in-flight counters to converge
        self.wait_registry("pause drain", |r| {
            Direction::ALL.iter().all(|d| r.port(*d).drained())
        })?;
        self.publish(ComponentState::Pause);
        self.emit(ComponentEvent::CommandComplete(CompletedCommand::StateSet(
            ComponentState::Pause,
        )));
        Ok(())
    }

    fn to_loaded(&mut self) -> Result<(), OmxError> {
        match self.state {
            ComponentState::WaitForResources => {
                self.publish(ComponentState::Loaded);
                self.emit(ComponentEvent::CommandComplete(CompletedCommand::StateSet(
                    ComponentState::Loaded,
                )));
                Ok(())
            }
            ComponentState::Idle => {
                // anything the component still holds goes back first, else
                // the client has nothing to free
                self.drain_client_queue();
                self.return_all_parked();
                // the client frees its buffers on the way down; wait them out
                self.wait_registry("buffer teardown", |r| r.all_freed())?;
                self.destroy_proxy();
                // a fresh acquisition may follow; rearm the session latches
                self.shared
                    .destroy_in_flight
                    .store(false, Ordering::Release);
                self.shared.codec_stopped.store(false, Ordering::Release);
                self.publish(ComponentState::Loaded);
                self.complete_or_preempted(ComponentState::Loaded);
                Ok(())
            }
            _ => Err(OmxError::IncorrectStateTransition),
        }
    }

    fn to_wait_for_resources(&mut self) -> Result<(), OmxError> {
        match self.state {
            ComponentState::Loaded => {}
            ComponentState::Idle => {
                // yield the codec node; registrations stay for re-acquisition
                self.destroy_proxy();
                self.shared
                    .destroy_in_flight
                    .store(false, Ordering::Release);
            }
            _ => return Err(OmxError::IncorrectStateTransition),
        }
        self.publish(ComponentState::WaitForResources);
        self.emit(ComponentEvent::CommandComplete(CompletedCommand::StateSet(
            ComponentState::WaitForResources,
        )));
        Ok(())
    }

    /// Full recovery into the terminal Invalid state. Safe to call from any
    /// state and idempotent; also the landing point for DSP fatal faults.
    pub(super) fn enter_invalid(&mut self) {
        if self.state == ComponentState::Invalid {
            return;
        }
        self.destroy_proxy();
        self.shared.fatal.store(true, Ordering::Release);
        self.shared.wake_all();
        self.drain_client_queue();
        self.return_all_parked();
        self.publish(ComponentState::Invalid);
        self.shared.abort_transitions();
        self.emit_error(OmxError::InvalidState);
    }

    /// Best-effort Destroy, skipped when one is already in flight. Also
    /// releases the init-time parameter block.
    fn destroy_proxy(&mut self) {
        if let Some(init) = self.init_params.take() {
            debug!(codec = %init.codec, "released codec init params");
        }
        if !self.proxy_open {
            return;
        }
        if !self.shared.destroy_in_flight.swap(true, Ordering::AcqRel) {
            if let Err(err) = self.proxy.control(ControlOp::Destroy) {
                warn!(%err, "destroy failed during teardown");
            }
        }
        self.proxy_open = false;
    }

    /// Fire the normal completion, or the preemption substitute when the
    /// resource manager forced this transition.
    pub(super) fn complete_or_preempted(&mut self, state: ComponentState) {
        if self.shared.preempted.swap(false, Ordering::AcqRel) {
            self.emit_error(OmxError::ResourcesPreempted);
        } else {
            self.emit(ComponentEvent::CommandComplete(CompletedCommand::StateSet(state)));
        }
    }
}
