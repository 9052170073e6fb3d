//! Shared harness for the integration suite: a scriptable in-process DSP
//! proxy and a recording client callback triple.
//!
//! The mock acknowledges controls synchronously by default, which exercises
//! the sticky-ack discipline (the acknowledgment lands before the engine
//! starts waiting). Tests that need to observe ordering switch the relevant
//! control to manual and drive the events themselves.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use omxlink::{
    AckStatus, BufferSubmission, ClientCallbacks, CodecInitParams, Command, CompletedCommand,
    Component, ComponentEvent, ComponentState, ControlOp, Direction, DspEvent, DspEventSink,
    DspProxy, EngineConfig, OmxBuffer, OmxError, StreamOp,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);
/// Long enough for the dispatcher to drain its channels when idle.
pub const SETTLE: Duration = Duration::from_millis(100);

#[derive(Default)]
struct MockState {
    sink: Option<Arc<dyn DspEventSink>>,
    init: Option<CodecInitParams>,
    controls: Vec<ControlOp>,
    queued: [VecDeque<OmxBuffer>; 2],
    submissions: [usize; 2],
    fail_open: bool,
    fail_queue: bool,
    manual_stop: bool,
    manual_pause: bool,
    manual_flush: bool,
}

struct MockCore {
    state: Mutex<MockState>,
    cond: Condvar,
}

/// The proxy half handed to [`Component::spawn`].
pub struct MockProxy {
    core: Arc<MockCore>,
}

/// The test's side of the mock: inspect what the engine did, inject events.
#[derive(Clone)]
pub struct MockHandle {
    core: Arc<MockCore>,
}

pub fn mock_proxy() -> (MockProxy, MockHandle) {
    let core = Arc::new(MockCore {
        state: Mutex::new(MockState::default()),
        cond: Condvar::new(),
    });
    (
        MockProxy {
            core: Arc::clone(&core),
        },
        MockHandle { core },
    )
}

impl DspProxy for MockProxy {
    fn open(
        &mut self,
        init: &CodecInitParams,
        sink: Arc<dyn DspEventSink>,
    ) -> Result<(), OmxError> {
        let mut s = self.core.state.lock();
        if s.fail_open {
            return Err(OmxError::InsufficientResources);
        }
        s.init = Some(init.clone());
        s.sink = Some(sink);
        Ok(())
    }

    fn control(&mut self, op: ControlOp) -> Result<(), OmxError> {
        let (sink, events) = {
            let mut s = self.core.state.lock();
            s.controls.push(op.clone());
            let sink = s.sink.clone();
            let mut events = Vec::new();
            match &op {
                ControlOp::Start => events.push(DspEvent::ProcessingStarted),
                ControlOp::Stop => {
                    if !s.manual_stop {
                        // queued buffers come back before the stop lands
                        for dir in Direction::ALL {
                            while let Some(buffer) = s.queued[dir.index()].pop_front() {
                                events.push(DspEvent::BufferProcessed {
                                    direction: dir,
                                    buffer,
                                    filled_len: 0,
                                });
                            }
                        }
                        events.push(DspEvent::ProcessingStopped);
                    }
                }
                ControlOp::Pause => {
                    if !s.manual_pause {
                        for dir in Direction::ALL {
                            while let Some(buffer) = s.queued[dir.index()].pop_front() {
                                events.push(DspEvent::BufferProcessed {
                                    direction: dir,
                                    buffer,
                                    filled_len: 0,
                                });
                            }
                        }
                        events.push(DspEvent::ProcessingPaused);
                    }
                }
                ControlOp::Destroy => {}
                ControlOp::AlgControl { .. } => events.push(DspEvent::AlgControlAck),
                ControlOp::StreamControl {
                    op: StreamOp::SetCodecParams,
                    direction,
                } => events.push(DspEvent::StreamControlAck {
                    op: StreamOp::SetCodecParams,
                    direction: *direction,
                    status: AckStatus::Ok,
                }),
                ControlOp::StreamControl {
                    op: StreamOp::Flush,
                    direction,
                } => {
                    if !s.manual_flush {
                        if let Some(dir) = direction {
                            while let Some(buffer) = s.queued[dir.index()].pop_front() {
                                events.push(DspEvent::BufferProcessed {
                                    direction: *dir,
                                    buffer,
                                    filled_len: 0,
                                });
                            }
                        }
                        events.push(DspEvent::StreamControlAck {
                            op: StreamOp::Flush,
                            direction: *direction,
                            status: AckStatus::Ok,
                        });
                    }
                }
            }
            (sink, events)
        };
        if let Some(sink) = sink {
            for event in events {
                sink.on_event(event);
            }
        }
        Ok(())
    }

    fn queue_buffer(&mut self, submission: BufferSubmission) -> Result<(), OmxError> {
        let mut s = self.core.state.lock();
        if s.fail_queue {
            return Err(OmxError::Hardware("codec queue rejected the buffer".into()));
        }
        let idx = submission.direction.index();
        s.queued[idx].push_back(submission.buffer);
        s.submissions[idx] += 1;
        self.core.cond.notify_all();
        Ok(())
    }
}

impl MockHandle {
    fn sink(&self) -> Arc<dyn DspEventSink> {
        self.core
            .state
            .lock()
            .sink
            .clone()
            .expect("proxy is not open")
    }

    pub fn emit(&self, event: DspEvent) {
        self.sink().on_event(event);
    }

    pub fn emit_stopped(&self) {
        self.emit(DspEvent::ProcessingStopped);
    }

    pub fn emit_paused(&self) {
        self.emit(DspEvent::ProcessingPaused);
    }

    pub fn ack_flush(&self, dir: Direction) {
        self.emit(DspEvent::StreamControlAck {
            op: StreamOp::Flush,
            direction: Some(dir),
            status: AckStatus::Ok,
        });
    }

    /// Complete the oldest queued buffer on `dir` with `filled_len` bytes.
    pub fn complete_next(&self, dir: Direction, filled_len: usize) {
        let buffer = self.core.state.lock().queued[dir.index()]
            .pop_front()
            .expect("no queued buffer to complete");
        self.emit(DspEvent::BufferProcessed {
            direction: dir,
            buffer,
            filled_len,
        });
    }

    pub fn complete_all(&self, dir: Direction, filled_len: usize) {
        loop {
            let buffer = self.core.state.lock().queued[dir.index()].pop_front();
            match buffer {
                Some(buffer) => self.emit(DspEvent::BufferProcessed {
                    direction: dir,
                    buffer,
                    filled_len,
                }),
                None => break,
            }
        }
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.core.state.lock().fail_open = fail;
    }

    pub fn set_fail_queue(&self, fail: bool) {
        self.core.state.lock().fail_queue = fail;
    }

    pub fn set_manual_stop(&self, manual: bool) {
        self.core.state.lock().manual_stop = manual;
    }

    pub fn set_manual_pause(&self, manual: bool) {
        self.core.state.lock().manual_pause = manual;
    }

    pub fn set_manual_flush(&self, manual: bool) {
        self.core.state.lock().manual_flush = manual;
    }

    pub fn init(&self) -> Option<CodecInitParams> {
        self.core.state.lock().init.clone()
    }

    pub fn controls(&self) -> Vec<ControlOp> {
        self.core.state.lock().controls.clone()
    }

    pub fn submissions(&self, dir: Direction) -> usize {
        self.core.state.lock().submissions[dir.index()]
    }

    pub fn queued_len(&self, dir: Direction) -> usize {
        self.core.state.lock().queued[dir.index()].len()
    }

    /// Wait until the engine has queued at least `n` buffers on `dir` over
    /// the proxy's lifetime.
    pub fn wait_submissions(&self, dir: Direction, n: usize) {
        let deadline = Instant::now() + TIMEOUT;
        let mut s = self.core.state.lock();
        while s.submissions[dir.index()] < n {
            if self.core.cond.wait_until(&mut s, deadline).timed_out() {
                panic!(
                    "timed out waiting for {n} submissions on {dir}, saw {}",
                    s.submissions[dir.index()]
                );
            }
        }
    }
}

#[derive(Default)]
pub struct RecorderState {
    pub events: Vec<ComponentEvent>,
    pub empties: Vec<OmxBuffer>,
    pub fills: Vec<OmxBuffer>,
    pub empty_done: usize,
    pub fill_done: usize,
    /// Coarse labels in client-visible callback order.
    pub order: Vec<String>,
}

/// Records the client callback triple and wakes waiters on every delivery.
#[derive(Default)]
pub struct Recorder {
    state: Mutex<RecorderState>,
    cond: Condvar,
}

fn label(event: &ComponentEvent) -> String {
    match event {
        ComponentEvent::CommandComplete(cmd) => format!("complete:{cmd:?}"),
        ComponentEvent::Error { error, .. } => format!("error:{error:?}"),
        ComponentEvent::BufferFlag { port, .. } => format!("flag:{port}"),
        ComponentEvent::Mark(_) => "mark".into(),
    }
}

impl ClientCallbacks for Recorder {
    fn on_event(&self, event: ComponentEvent) {
        let mut s = self.state.lock();
        s.order.push(label(&event));
        s.events.push(event);
        self.cond.notify_all();
    }

    fn empty_buffer_done(&self, buffer: OmxBuffer) {
        let mut s = self.state.lock();
        s.order.push("empty_buffer_done".into());
        s.empty_done += 1;
        s.empties.push(buffer);
        self.cond.notify_all();
    }

    fn fill_buffer_done(&self, buffer: OmxBuffer) {
        let mut s = self.state.lock();
        s.order.push("fill_buffer_done".into());
        s.fill_done += 1;
        s.fills.push(buffer);
        self.cond.notify_all();
    }
}

impl Recorder {
    /// Block until `pred` yields, panicking with the observed callback order
    /// on timeout.
    pub fn wait_until<T>(&self, what: &str, pred: impl Fn(&RecorderState) -> Option<T>) -> T {
        let deadline = Instant::now() + TIMEOUT;
        let mut s = self.state.lock();
        loop {
            if let Some(out) = pred(&s) {
                return out;
            }
            if self.cond.wait_until(&mut s, deadline).timed_out() {
                panic!("timed out waiting for {what}; saw {:?}", s.order);
            }
        }
    }

    pub fn wait_complete(&self, cmd: CompletedCommand) {
        self.wait_complete_n(cmd, 1);
    }

    /// Wait for the `n`th completion of `cmd`.
    pub fn wait_complete_n(&self, cmd: CompletedCommand, n: usize) {
        self.wait_until(&format!("completion #{n} of {cmd:?}"), |s| {
            (count_complete(s, cmd) >= n).then_some(())
        });
    }

    pub fn wait_error(&self, err: &OmxError) {
        self.wait_until(&format!("error event {err:?}"), |s| {
            s.events
                .iter()
                .any(|e| matches!(e, ComponentEvent::Error { error, .. } if error == err))
                .then_some(())
        });
    }

    pub fn wait_empties(&self, n: usize) {
        self.wait_until(&format!("{n} empty_buffer_done calls"), |s| {
            (s.empty_done >= n).then_some(())
        });
    }

    pub fn wait_fills(&self, n: usize) {
        self.wait_until(&format!("{n} fill_buffer_done calls"), |s| {
            (s.fill_done >= n).then_some(())
        });
    }

    pub fn has_complete(&self, cmd: CompletedCommand) -> bool {
        self.complete_count(cmd) > 0
    }

    pub fn complete_count(&self, cmd: CompletedCommand) -> usize {
        count_complete(&self.state.lock(), cmd)
    }

    pub fn empty_done(&self) -> usize {
        self.state.lock().empty_done
    }

    pub fn fill_done(&self) -> usize {
        self.state.lock().fill_done
    }

    pub fn events(&self) -> Vec<ComponentEvent> {
        self.state.lock().events.clone()
    }

    pub fn order(&self) -> Vec<String> {
        self.state.lock().order.clone()
    }

    pub fn take_empties(&self) -> Vec<OmxBuffer> {
        std::mem::take(&mut self.state.lock().empties)
    }

    pub fn take_fills(&self) -> Vec<OmxBuffer> {
        std::mem::take(&mut self.state.lock().fills)
    }
}

fn count_complete(s: &RecorderState, cmd: CompletedCommand) -> usize {
    s.events
        .iter()
        .filter(|e| matches!(e, ComponentEvent::CommandComplete(c) if *c == cmd))
        .count()
}

pub fn init_logs() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn small_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.name = "test-comp".into();
    config.codec = "pcm.dec".into();
    config.input.buffer_count = 2;
    config.input.buffer_size = 64;
    config.output.buffer_count = 2;
    config.output.buffer_size = 64;
    config
}

pub fn setup(config: EngineConfig) -> (Component, Arc<Recorder>, MockHandle) {
    init_logs();
    let (proxy, handle) = mock_proxy();
    let recorder = Arc::new(Recorder::default());
    let component = Component::spawn(config, recorder.clone(), Box::new(proxy))
        .expect("component thread failed to spawn");
    (component, recorder, handle)
}

/// Register the full buffer complement on both ports.
pub fn allocate_ports(
    component: &Component,
    config: &EngineConfig,
) -> (Vec<OmxBuffer>, Vec<OmxBuffer>) {
    let inputs = (0..config.input.buffer_count)
        .map(|_| {
            component
                .allocate_buffer(Direction::Input, config.input.buffer_size)
                .unwrap()
        })
        .collect();
    let outputs = (0..config.output.buffer_count)
        .map(|_| {
            component
                .allocate_buffer(Direction::Output, config.output.buffer_size)
                .unwrap()
        })
        .collect();
    (inputs, outputs)
}

pub fn to_idle(component: &Component, recorder: &Recorder) {
    component
        .send_command(Command::SetState(ComponentState::Idle))
        .unwrap();
    recorder.wait_complete(CompletedCommand::StateSet(ComponentState::Idle));
}

pub fn to_executing(component: &Component, recorder: &Recorder) {
    component
        .send_command(Command::SetState(ComponentState::Executing))
        .unwrap();
    recorder.wait_complete(CompletedCommand::StateSet(ComponentState::Executing));
}
