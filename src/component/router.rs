//! Demultiplexes DSP proxy events.
//!
//! Runs on whatever thread the proxy calls from, so every branch is bounded:
//! registry updates, condvar signals, client completion callbacks, and
//! command re-enqueues. Anything that needs the proxy itself — flush
//! issuance, fatal teardown — goes back through the command channel to the
//! component thread.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use flume::Sender;
use tracing::{debug, info, warn};

use crate::buffer::OmxBuffer;
use crate::buffer::registry::FlushState;
use crate::common::{Direction, PortSelector};
use crate::component::Command;
use crate::component::engine::EngineMsg;
use crate::component::events::{ClientCallbacks, ComponentEvent};
use crate::component::shared::{AckKind, Shared};
use crate::proxy::{
    AckStatus, CodecWarning, DspErrorCode, DspErrorSeverity, DspEvent, DspEventSink, StreamOp,
};

pub(crate) struct CallbackRouter {
    shared: Arc<Shared>,
    callbacks: Arc<dyn ClientCallbacks>,
    cmd_tx: Sender<EngineMsg>,
}

impl CallbackRouter {
    pub fn new(
        shared: Arc<Shared>,
        callbacks: Arc<dyn ClientCallbacks>,
        cmd_tx: Sender<EngineMsg>,
    ) -> Self {
        Self {
            shared,
            callbacks,
            cmd_tx,
        }
    }

    fn buffer_processed(&self, direction: Direction, mut buffer: OmxBuffer, filled_len: usize) {
        let id = buffer.id();
        buffer.filled_len = filled_len.min(buffer.capacity());

        let mut reg = self.shared.registry.lock();

        if reg.stop_in_progress {
            // mid-stop returns are held until the stop acknowledgment lands
            match reg.port_mut(direction).mark_reclaimed(id.index) {
                Ok(()) => reg.port_mut(direction).parked.push_back(buffer),
                Err(err) => warn!(%err, %direction, "dropping unexpected completion"),
            }
            drop(reg);
            self.shared.registry_cond.notify_all();
            return;
        }

        if let Err(err) = reg.port_mut(direction).mark_completed(id.index) {
            warn!(%err, %direction, "dropping unexpected completion");
            return;
        }

        // output completions inherit the stream metadata recorded at submit
        if direction == Direction::Output {
            buffer.timestamp = reg.timestamps.pop_front().unwrap_or(0);
            if reg.eos_received {
                buffer.flags.eos = true;
                reg.eos_received = false;
            }
            if let Some(mark) = reg.output_mark.take() {
                buffer.mark = Some(mark);
            }
        }

        let port = reg.port(direction);
        let drained = port.drained();
        let release_flush = drained && port.flush == FlushState::AwaitingDrain;
        let release_disable = drained && port.pending_disable;
        let eos = direction == Direction::Output && buffer.flags.eos;
        drop(reg);

        if release_flush {
            let _ = self.cmd_tx.try_send(EngineMsg::Command(Command::Flush(
                PortSelector::One(direction),
            )));
        }
        if release_disable {
            let _ = self.cmd_tx.try_send(EngineMsg::Command(Command::PortDisable(
                PortSelector::One(direction),
            )));
        }
        if eos {
            self.callbacks.on_event(ComponentEvent::BufferFlag {
                port: direction,
                eos: true,
            });
        }
        match direction {
            Direction::Input => self.callbacks.empty_buffer_done(buffer),
            Direction::Output => self.callbacks.fill_buffer_done(buffer),
        }
        self.shared.registry_cond.notify_all();
    }

    fn dsp_error(&self, severity: DspErrorSeverity, code: DspErrorCode, detail: Option<String>) {
        match (severity, code) {
            (DspErrorSeverity::Warning, DspErrorCode::Warning(CodecWarning::PlayCompleted)) => {
                // the algorithm drained its last frame; flag EOS downstream
                info!("codec reports play completed");
                self.shared.registry.lock().eos_received = true;
                self.callbacks.on_event(ComponentEvent::BufferFlag {
                    port: Direction::Output,
                    eos: true,
                });
            }
            (DspErrorSeverity::Warning, DspErrorCode::Warning(w)) => {
                warn!(warning = ?w, "codec warning");
            }
            // unrecognized message with an empty payload is the fault
            // signature of a wedged MMU
            (_, DspErrorCode::UnknownMessage) | (_, DspErrorCode::None) if detail.is_none() => {
                self.raise_fatal(code, detail);
            }
            (_, DspErrorCode::General) | (_, DspErrorCode::DataCorrupt) => {
                self.raise_fatal(code, detail);
            }
            (DspErrorSeverity::Fatal, _) => {
                self.raise_fatal(code, detail);
            }
            _ => {
                warn!(?severity, ?code, ?detail, "ignoring recoverable DSP error");
            }
        }
    }

    fn raise_fatal(&self, code: DspErrorCode, detail: Option<String>) {
        let detail = detail.unwrap_or_else(|| format!("{code:?}"));
        warn!(detail, "fatal DSP error");
        self.shared.fatal.store(true, Ordering::Release);
        self.shared.wake_all();
        let _ = self.cmd_tx.try_send(EngineMsg::Fatal { detail });
    }
}

impl DspEventSink for CallbackRouter {
    fn on_event(&self, event: DspEvent) {
        match event {
            DspEvent::BufferProcessed {
                direction,
                buffer,
                filled_len,
            } => self.buffer_processed(direction, buffer, filled_len),
            DspEvent::StreamControlAck {
                op: StreamOp::Flush,
                direction: Some(dir),
                status,
            } => {
                if status == AckStatus::Failed {
                    warn!(%dir, "DSP reported a failed flush");
                }
                self.shared.signal_ack(AckKind::Flush(dir));
            }
            DspEvent::StreamControlAck { op, direction, status } => {
                debug!(?op, ?direction, ?status, "stream control acknowledged");
            }
            DspEvent::ProcessingStarted => self.shared.signal_ack(AckKind::Started),
            DspEvent::ProcessingPaused => self.shared.signal_ack(AckKind::Paused),
            DspEvent::ProcessingStopped => {
                self.shared.codec_stopped.store(true, Ordering::Release);
                self.shared.signal_ack(AckKind::Stopped);
            }
            DspEvent::AlgControlAck => self.shared.signal_ack(AckKind::Alg),
            DspEvent::Error {
                severity,
                code,
                detail,
            } => self.dsp_error(severity, code, detail),
            DspEvent::MessageReceived { opcode, arg1, arg2 } => {
                debug!(opcode, arg1, arg2, "DSP message");
            }
        }
    }
}
