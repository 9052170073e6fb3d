//! Flush and port-reconfiguration protocol.
//!
//! Per direction the protocol walks Idle → AwaitingDrain → Flushing. A
//! request only reaches the DSP once submissions and completions have
//! converged; until then it parks, and the callback router re-enqueues it on
//! every completion that closes the gap. Port disable rides the same drain
//! discipline; port enable replays whatever parked during the window.

use tracing::debug;

use crate::buffer::registry::FlushState;
use crate::common::{Direction, OmxError};
use crate::component::engine::Engine;
use crate::component::events::{CompletedCommand, ComponentEvent};
use crate::component::shared::AckKind;
use crate::component::state::ComponentState;
use crate::proxy::{ControlOp, StreamOp};

impl Engine {
    pub(super) fn handle_flush(&mut self, dir: Direction) -> Result<(), OmxError> {
        let proceed = {
            let mut reg = self.shared.registry.lock();
            let port = reg.port_mut(dir);
            if port.drained() {
                port.flush = FlushState::Flushing;
                true
            } else {
                port.flush = FlushState::AwaitingDrain;
                false
            }
        };
        if !proceed {
            debug!(%dir, "flush parked awaiting drain");
            return Ok(());
        }

        if self.proxy_open {
            self.shared.clear_ack(AckKind::Flush(dir));
            self.control(ControlOp::StreamControl {
                op: StreamOp::Flush,
                direction: Some(dir),
            })?;
            self.wait_ack(AckKind::Flush(dir))?;
        }

        self.shared.registry.lock().port_mut(dir).flush = FlushState::Idle;
        let returned = self.return_parked(dir);
        debug!(%dir, returned, "flush complete");
        self.emit(ComponentEvent::CommandComplete(CompletedCommand::Flush(dir)));
        Ok(())
    }

    pub(super) fn handle_port_disable(&mut self, dir: Direction) -> Result<(), OmxError> {
        {
            let mut reg = self.shared.registry.lock();
            let port = reg.port_mut(dir);
            if !port.populated() {
                // nothing registered: detach without touching the DSP
                port.enabled = false;
                port.pending_disable = false;
                drop(reg);
                self.emit(ComponentEvent::CommandComplete(CompletedCommand::PortDisable(dir)));
                return Ok(());
            }
            if !port.drained() {
                port.pending_disable = true;
                debug!(%dir, "port disable parked awaiting drain");
                return Ok(());
            }
            port.pending_disable = false;
        }

        if self.proxy_open
            && matches!(self.state, ComponentState::Executing | ComponentState::Pause)
        {
            self.shared.clear_ack(AckKind::Flush(dir));
            self.control(ControlOp::StreamControl {
                op: StreamOp::Flush,
                direction: Some(dir),
            })?;
            self.wait_ack(AckKind::Flush(dir))?;
        }

        self.shared.registry.lock().port_mut(dir).enabled = false;
        debug!(%dir, "port disabled");
        self.emit(ComponentEvent::CommandComplete(CompletedCommand::PortDisable(dir)));
        Ok(())
    }

    pub(super) fn handle_port_enable(&mut self, dir: Direction) -> Result<(), OmxError> {
        {
            let mut reg = self.shared.registry.lock();
            let port = reg.port_mut(dir);
            port.enabled = true;
            port.pending_disable = false;
        }
        // population waiters may be watching the enabled set
        self.shared.registry_cond.notify_all();

        if self.proxy_open && self.state == ComponentState::Executing {
            self.control(ControlOp::Start)?;
            self.shared
                .codec_stopped
                .store(false, std::sync::atomic::Ordering::Release);
            self.resubmit_parked(dir)?;
        }
        debug!(%dir, "port enabled");
        self.emit(ComponentEvent::CommandComplete(CompletedCommand::PortEnable(dir)));
        Ok(())
    }
}
