//! State shared between the client threads, the component thread, and the
//! DSP callback thread.
//!
//! Locking is deliberately coarse-grained and short-lived: one mutex for the
//! buffer registry, one for the acknowledgment flags, one for the published
//! state. Every blocking wait in the engine is a predicate loop over one of
//! the condition variables here; nothing sleeps or polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::buffer::registry::Registry;
use crate::common::{Direction, OmxError};
use crate::component::ComponentState;
use crate::config::EngineConfig;

/// Acknowledgments the state machine and flush protocol wait on. Flags are
/// sticky until the next `clear_ack` so a signal can never be missed between
/// issuing a control and starting the wait.
#[derive(Debug, Default)]
pub(crate) struct AckFlags {
    pub started: bool,
    pub paused: bool,
    pub stopped: bool,
    pub alg: bool,
    pub flush: [bool; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckKind {
    Started,
    Paused,
    Stopped,
    Alg,
    Flush(Direction),
}

impl AckKind {
    fn describe(self) -> &'static str {
        match self {
            Self::Started => "start acknowledgment",
            Self::Paused => "pause acknowledgment",
            Self::Stopped => "stop acknowledgment",
            Self::Alg => "algorithm-control acknowledgment",
            Self::Flush(Direction::Input) => "input flush acknowledgment",
            Self::Flush(Direction::Output) => "output flush acknowledgment",
        }
    }
}

impl AckFlags {
    fn flag_mut(&mut self, kind: AckKind) -> &mut bool {
        match kind {
            AckKind::Started => &mut self.started,
            AckKind::Paused => &mut self.paused,
            AckKind::Stopped => &mut self.stopped,
            AckKind::Alg => &mut self.alg,
            AckKind::Flush(dir) => &mut self.flush[dir.index()],
        }
    }

    fn is_set(&self, kind: AckKind) -> bool {
        match kind {
            AckKind::Started => self.started,
            AckKind::Paused => self.paused,
            AckKind::Stopped => self.stopped,
            AckKind::Alg => self.alg,
            AckKind::Flush(dir) => self.flush[dir.index()],
        }
    }
}

#[derive(Debug)]
pub(crate) struct StateCell {
    pub current: ComponentState,
    /// State-set commands accepted but not yet acknowledged.
    pub pending_transitions: u32,
}

pub(crate) struct Shared {
    pub registry: Mutex<Registry>,
    /// Signals registry progress: population, drain, frees, parked returns.
    pub registry_cond: Condvar,
    pub acks: Mutex<AckFlags>,
    pub ack_cond: Condvar,
    pub state: Mutex<StateCell>,
    pub state_cond: Condvar,
    /// The DSP raised an unrecoverable fault; every wait aborts.
    pub fatal: AtomicBool,
    /// The component handle is being dropped; every wait aborts.
    pub shutdown: AtomicBool,
    /// The resource manager reclaimed the DSP; the next Idle/Loaded publish
    /// reports ResourcesPreempted instead of the normal completion.
    pub preempted: AtomicBool,
    /// The DSP reported itself stopped; submissions park until a new Start.
    pub codec_stopped: AtomicBool,
    /// A Destroy was already issued to the proxy.
    pub destroy_in_flight: AtomicBool,
}

impl Shared {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            registry: Mutex::new(Registry::new(&config.input, &config.output)),
            registry_cond: Condvar::new(),
            acks: Mutex::new(AckFlags::default()),
            ack_cond: Condvar::new(),
            state: Mutex::new(StateCell {
                current: ComponentState::Loaded,
                pending_transitions: 0,
            }),
            state_cond: Condvar::new(),
            fatal: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            preempted: AtomicBool::new(false),
            codec_stopped: AtomicBool::new(false),
            destroy_in_flight: AtomicBool::new(false),
        }
    }

    pub fn current_state(&self) -> ComponentState {
        self.state.lock().current
    }

    pub fn publish_state(&self, state: ComponentState) {
        self.state.lock().current = state;
        self.state_cond.notify_all();
    }

    pub fn begin_transition(&self) {
        self.state.lock().pending_transitions += 1;
    }

    pub fn cancel_transition(&self) {
        self.end_transition();
    }

    pub fn end_transition(&self) {
        let mut cell = self.state.lock();
        cell.pending_transitions = cell.pending_transitions.saturating_sub(1);
        self.state_cond.notify_all();
    }

    /// Drop every pending transition so `state()` callers stop waiting.
    pub fn abort_transitions(&self) {
        self.state.lock().pending_transitions = 0;
        self.state_cond.notify_all();
    }

    pub fn clear_ack(&self, kind: AckKind) {
        *self.acks.lock().flag_mut(kind) = false;
    }

    pub fn signal_ack(&self, kind: AckKind) {
        *self.acks.lock().flag_mut(kind) = true;
        self.ack_cond.notify_all();
    }

    /// Block until `kind` is acknowledged, the configured timeout elapses,
    /// or the engine dies underneath the wait.
    pub fn wait_ack(&self, kind: AckKind, timeout: Option<Duration>) -> Result<(), OmxError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut acks = self.acks.lock();
        loop {
            if self.fatal.load(Ordering::Acquire) {
                return Err(OmxError::Hardware(format!(
                    "DSP fault while waiting for {}",
                    kind.describe()
                )));
            }
            if self.shutdown.load(Ordering::Acquire) {
                return Err(OmxError::Hardware(format!(
                    "component torn down while waiting for {}",
                    kind.describe()
                )));
            }
            if acks.is_set(kind) {
                return Ok(());
            }
            match deadline {
                None => self.ack_cond.wait(&mut acks),
                Some(at) => {
                    if self.ack_cond.wait_until(&mut acks, at).timed_out() {
                        return Err(OmxError::Hardware(format!(
                            "timed out waiting for {}",
                            kind.describe()
                        )));
                    }
                }
            }
        }
    }

    /// Block until `pred` holds over the registry, with the same abort and
    /// timeout rules as [`Shared::wait_ack`].
    pub fn wait_registry(
        &self,
        timeout: Option<Duration>,
        what: &str,
        pred: impl Fn(&Registry) -> bool,
    ) -> Result<(), OmxError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut reg = self.registry.lock();
        loop {
            if self.fatal.load(Ordering::Acquire) {
                return Err(OmxError::Hardware(format!("DSP fault while waiting for {what}")));
            }
            if self.shutdown.load(Ordering::Acquire) {
                return Err(OmxError::Hardware(format!(
                    "component torn down while waiting for {what}"
                )));
            }
            if pred(&reg) {
                return Ok(());
            }
            match deadline {
                None => self.registry_cond.wait(&mut reg),
                Some(at) => {
                    if self.registry_cond.wait_until(&mut reg, at).timed_out() {
                        return Err(OmxError::Hardware(format!("timed out waiting for {what}")));
                    }
                }
            }
        }
    }

    /// Wake every waiter after a fatal fault or shutdown.
    pub fn wake_all(&self) {
        self.ack_cond.notify_all();
        self.registry_cond.notify_all();
        self.state_cond.notify_all();
    }
}
