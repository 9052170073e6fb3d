//! The component thread: sole consumer of the command and buffer channels,
//! sole mutator of lifecycle and ownership state.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use flume::{Receiver, Selector, Sender};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::OmxBuffer;
use crate::buffer::registry::Registry;
use crate::common::{Direction, ErrorClass, OmxError};
use crate::component::events::{ClientCallbacks, ComponentEvent};
use crate::component::router::CallbackRouter;
use crate::component::shared::{AckKind, Shared};
use crate::component::state::ComponentState;
use crate::component::Command;
use crate::config::EngineConfig;
use crate::proxy::{BufferSubmission, CodecInitParams, ControlOp, DspEventSink, DspProxy};

/// Everything that can arrive on the command channel.
#[derive(Debug)]
pub(crate) enum EngineMsg {
    Command(Command),
    /// The callback router saw a fatal DSP fault.
    Fatal { detail: String },
    /// The component handle is being dropped.
    Shutdown,
}

enum Incoming {
    Command(EngineMsg),
    Buffer(OmxBuffer),
    Disconnected,
}

enum Flow {
    Continue,
    /// The component handle is going away; leave the loop.
    Exit,
}

pub(crate) struct Engine {
    pub(super) config: EngineConfig,
    pub(super) shared: Arc<Shared>,
    pub(super) callbacks: Arc<dyn ClientCallbacks>,
    pub(super) proxy: Box<dyn DspProxy>,
    pub(super) proxy_open: bool,
    pub(super) init_params: Option<CodecInitParams>,
    pub(super) state: ComponentState,
    cmd_rx: Receiver<EngineMsg>,
    data_rx: Receiver<OmxBuffer>,
    cmd_tx: Sender<EngineMsg>,
    /// Alternates channel priority so neither side starves the other.
    fair_flip: bool,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        shared: Arc<Shared>,
        callbacks: Arc<dyn ClientCallbacks>,
        proxy: Box<dyn DspProxy>,
        cmd_rx: Receiver<EngineMsg>,
        data_rx: Receiver<OmxBuffer>,
        cmd_tx: Sender<EngineMsg>,
    ) -> Self {
        Self {
            config,
            shared,
            callbacks,
            proxy,
            proxy_open: false,
            init_params: None,
            state: ComponentState::Loaded,
            cmd_rx,
            data_rx,
            cmd_tx,
            fair_flip: false,
        }
    }

    pub fn run(mut self) {
        debug!(name = %self.config.name, "component thread up");
        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            match self.next_message() {
                Incoming::Command(msg) => match self.handle_message(msg) {
                    Flow::Continue => {}
                    Flow::Exit => break,
                },
                Incoming::Buffer(buf) => {
                    if let Err(err) = self.handle_buffer(buf) {
                        self.report_error(err);
                    }
                }
                Incoming::Disconnected => {
                    if !self.shared.shutdown.load(Ordering::Acquire) {
                        self.emit_error(OmxError::Hardware(
                            "command transport closed under the dispatcher".into(),
                        ));
                    }
                    break;
                }
            }
        }
        self.finish();
    }

    fn next_message(&mut self) -> Incoming {
        // buffer traffic is withheld while paused; submissions queue up
        if self.state == ComponentState::Pause {
            return match self.cmd_rx.recv() {
                Ok(msg) => Incoming::Command(msg),
                Err(_) => Incoming::Disconnected,
            };
        }
        self.fair_flip = !self.fair_flip;
        let cmd = |r: Result<EngineMsg, flume::RecvError>| match r {
            Ok(msg) => Incoming::Command(msg),
            Err(_) => Incoming::Disconnected,
        };
        let data = |r: Result<OmxBuffer, flume::RecvError>| match r {
            Ok(buf) => Incoming::Buffer(buf),
            Err(_) => Incoming::Disconnected,
        };
        if self.fair_flip {
            Selector::new()
                .recv(&self.cmd_rx, cmd)
                .recv(&self.data_rx, data)
                .wait()
        } else {
            Selector::new()
                .recv(&self.data_rx, data)
                .recv(&self.cmd_rx, cmd)
                .wait()
        }
    }

    fn handle_message(&mut self, msg: EngineMsg) -> Flow {
        match msg {
            EngineMsg::Shutdown => Flow::Exit,
            EngineMsg::Fatal { detail } => {
                error!(detail, "fatal DSP fault");
                self.enter_invalid();
                Flow::Continue
            }
            EngineMsg::Command(cmd) => {
                trace!(?cmd, "command");
                match cmd {
                    Command::SetState(target) => self.handle_state_set(target),
                    Command::Flush(sel) => {
                        for dir in sel.iter() {
                            if let Err(err) = self.handle_flush(dir) {
                                self.report_error(err);
                            }
                        }
                    }
                    Command::PortDisable(sel) => {
                        for dir in sel.iter() {
                            if let Err(err) = self.handle_port_disable(dir) {
                                self.report_error(err);
                            }
                        }
                    }
                    Command::PortEnable(sel) => {
                        for dir in sel.iter() {
                            if let Err(err) = self.handle_port_enable(dir) {
                                self.report_error(err);
                            }
                        }
                    }
                    Command::MarkBuffer(mark) => {
                        let mut reg = self.shared.registry.lock();
                        // first armed mark wins until a buffer picks it up
                        if reg.armed_mark.is_none() {
                            reg.armed_mark = Some(mark);
                        }
                    }
                }
                Flow::Continue
            }
        }
    }

    /// Classify and dispatch one buffer from the client.
    fn handle_buffer(&mut self, mut buf: OmxBuffer) -> Result<(), OmxError> {
        let id = buf.id();
        let dir = id.direction;
        self.shared.registry.lock().validate(id)?;
        trace!(%dir, index = id.index, filled = buf.filled_len, "buffer from client");

        if dir == Direction::Input {
            if buf.mark.is_none() {
                buf.mark = self.shared.registry.lock().armed_mark.take();
            }
            if buf.mark.as_ref().is_some_and(|m| m.target == self.config.name) {
                if let Some(mark) = buf.mark.take() {
                    self.emit(ComponentEvent::Mark(mark));
                }
            }
        }

        // marker-only and zero-length signals never touch the DSP
        if dir == Direction::Input && buf.filled_len == 0 && !buf.flags.eos {
            return self.complete_back(buf);
        }

        if dir == Direction::Input {
            let mut reg = self.shared.registry.lock();
            if buf.flags.eos {
                reg.eos_received = true;
            }
            reg.timestamps.push_back(buf.timestamp);
            if let Some(mark) = buf.mark.take() {
                reg.output_mark = Some(mark);
            }
        }

        let can_submit = {
            let reg = self.shared.registry.lock();
            let port = reg.port(dir);
            self.state == ComponentState::Executing
                && !self.shared.codec_stopped.load(Ordering::Acquire)
                && port.enabled
                && !port.pending_disable
        };
        if can_submit {
            self.submit_to_dsp(buf)
        } else {
            self.park(buf);
            Ok(())
        }
    }

    pub(super) fn submit_to_dsp(&mut self, buf: OmxBuffer) -> Result<(), OmxError> {
        let id = buf.id();
        let queued = {
            let mut reg = self.shared.registry.lock();
            reg.port_mut(id.direction).mark_queued(id.index)
        };
        match queued {
            Ok(()) => {}
            Err(err @ OmxError::BufferAlreadyPending) => {
                // double submission is a client bug: reject loudly, hand back
                self.emit_error(err);
                return self.complete_back(buf);
            }
            Err(err) => return Err(err),
        }
        trace!(dir = %id.direction, index = id.index, "queue to DSP");
        if let Err(err) = self.proxy.queue_buffer(BufferSubmission {
            direction: id.direction,
            buffer: buf,
        }) {
            // the submission's memory stays with the proxy; recovery tears down
            let mut reg = self.shared.registry.lock();
            let _ = reg.port_mut(id.direction).mark_reclaimed(id.index);
            drop(reg);
            return Err(OmxError::Hardware(format!("queue to DSP failed: {err}")));
        }
        Ok(())
    }

    pub(super) fn park(&self, buf: OmxBuffer) {
        let mut reg = self.shared.registry.lock();
        reg.port_mut(buf.id().direction).parked.push_back(buf);
    }

    /// Return a component-held buffer straight to the client.
    pub(super) fn complete_back(&self, mut buf: OmxBuffer) -> Result<(), OmxError> {
        let id = buf.id();
        self.shared
            .registry
            .lock()
            .port_mut(id.direction)
            .mark_returned(id.index)?;
        buf.reset_for_return();
        self.complete_to_client(buf);
        self.shared.registry_cond.notify_all();
        Ok(())
    }

    pub(super) fn complete_to_client(&self, buf: OmxBuffer) {
        match buf.direction() {
            Direction::Input => self.callbacks.empty_buffer_done(buf),
            Direction::Output => self.callbacks.fill_buffer_done(buf),
        }
    }

    /// Submit every parked buffer on enabled ports, oldest first, each
    /// exactly once.
    pub(super) fn resubmit_parked_all(&mut self) -> Result<(), OmxError> {
        for dir in Direction::ALL {
            self.resubmit_parked(dir)?;
        }
        Ok(())
    }

    pub(super) fn resubmit_parked(&mut self, dir: Direction) -> Result<(), OmxError> {
        loop {
            let buf = {
                let mut reg = self.shared.registry.lock();
                let port = reg.port_mut(dir);
                if !port.enabled || port.pending_disable {
                    return Ok(());
                }
                port.parked.pop_front()
            };
            match buf {
                Some(buf) => self.submit_to_dsp(buf)?,
                None => return Ok(()),
            }
        }
    }

    /// Return every parked buffer on `dir` to the client, zero-filled.
    pub(super) fn return_parked(&mut self, dir: Direction) -> usize {
        let mut count = 0;
        loop {
            let buf = {
                let mut reg = self.shared.registry.lock();
                let taken = reg.port_mut(dir).parked.pop_front();
                if let Some(b) = &taken {
                    if let Err(err) = reg.port_mut(dir).mark_returned(b.id().index) {
                        warn!(%err, %dir, "inconsistent parked buffer");
                    }
                }
                taken
            };
            match buf {
                Some(mut buf) => {
                    buf.reset_for_return();
                    self.complete_to_client(buf);
                    count += 1;
                }
                None => break,
            }
        }
        self.shared.registry_cond.notify_all();
        count
    }

    /// Return buffers stranded in the hand-off channel. Used on the paths
    /// that empty the component: stop, unload, fatal recovery.
    pub(super) fn drain_client_queue(&mut self) {
        while let Ok(buf) = self.data_rx.try_recv() {
            if let Err(err) = self.complete_back(buf) {
                warn!(%err, "dropping buffer stranded in the hand-off channel");
            }
        }
    }

    pub(super) fn return_all_parked(&mut self) {
        for dir in Direction::ALL {
            let n = self.return_parked(dir);
            if n > 0 {
                debug!(%dir, returned = n, "returned held buffers");
            }
        }
    }

    pub(super) fn publish(&mut self, state: ComponentState) {
        info!(from = %self.state, to = %state, "state change");
        self.state = state;
        self.shared.publish_state(state);
    }

    pub(super) fn emit(&self, event: ComponentEvent) {
        self.callbacks.on_event(event);
    }

    pub(super) fn emit_error(&self, error: OmxError) {
        warn!(%error, "error event");
        let severity = error.severity();
        self.callbacks
            .on_event(ComponentEvent::Error { error, severity });
    }

    /// Route an error by class: fatal errors force recovery, everything else
    /// is reported and forgotten.
    pub(super) fn report_error(&mut self, error: OmxError) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        match error.class() {
            ErrorClass::Fatal => {
                error!(%error, "entering fatal recovery");
                self.enter_invalid();
            }
            _ => self.emit_error(error),
        }
    }

    pub(super) fn control(&mut self, op: ControlOp) -> Result<(), OmxError> {
        let label = format!("{op:?}");
        self.proxy
            .control(op)
            .map_err(|err| OmxError::Hardware(format!("DSP control {label} failed: {err}")))
    }

    pub(super) fn wait_ack(&self, kind: AckKind) -> Result<(), OmxError> {
        self.shared.wait_ack(kind, self.config.ack_timeout())
    }

    pub(super) fn wait_registry(
        &self,
        what: &str,
        pred: impl Fn(&Registry) -> bool,
    ) -> Result<(), OmxError> {
        self.shared
            .wait_registry(self.config.ack_timeout(), what, pred)
    }

    pub(super) fn make_sink(&self) -> Arc<dyn DspEventSink> {
        Arc::new(CallbackRouter::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.callbacks),
            self.cmd_tx.clone(),
        ))
    }

    /// Loop epilogue: the handle is gone or the transport failed. The proxy
    /// is destroyed best-effort and every blocked waiter is released.
    fn finish(mut self) {
        if self.proxy_open && !self.shared.destroy_in_flight.swap(true, Ordering::AcqRel) {
            if let Err(err) = self.proxy.control(ControlOp::Destroy) {
                warn!(%err, "destroy failed during teardown");
            }
            self.proxy_open = false;
        }
        self.shared.abort_transitions();
        debug!(name = %self.config.name, "component thread down");
    }
}
