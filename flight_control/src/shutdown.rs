//! Stop propagation and the ordered safe-shutdown sequence.

use crate::boundary::{Actuator, BoundaryError, GatedActuator, MediaStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{error, info, warn};

/// Cooperative stop flag shared by every stage loop.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn trigger(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one shutdown step.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    Done,
    Failed(String),
    TimedOut,
}

/// Per-step outcomes of a completed shutdown sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct ShutdownReport {
    pub reason: String,
    pub land: StepOutcome,
    pub stream: Option<StepOutcome>,
    pub disconnect: StepOutcome,
}

/// Runs the safe-shutdown sequence exactly once, whoever asks first.
///
/// Order: gate motion (waiting for any in-flight velocity command) and land, stop the video stream, disconnect the
/// platform, then raise the stop flag. Each step is bounded by
/// `step_deadline`; a failed or hung step is logged and the sequence moves
/// on.
pub struct ShutdownSupervisor {
    actuator: Arc<GatedActuator>,
    stream: Option<Arc<dyn MediaStream>>,
    stop: StopSignal,
    initiated: AtomicBool,
    step_deadline: Duration,
}

impl ShutdownSupervisor {
    pub fn new(
        actuator: Arc<GatedActuator>,
        stream: Option<Arc<dyn MediaStream>>,
        stop: StopSignal,
        step_deadline: Duration,
    ) -> Self {
        Self {
            actuator,
            stream,
            stop,
            initiated: AtomicBool::new(false),
            step_deadline,
        }
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn initiated(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Start the shutdown sequence. Returns `None` when another caller
    /// already started it; the sequence never runs twice.
    pub fn request_stop(&self, reason: &str) -> Option<ShutdownReport> {
        if self.initiated.swap(true, Ordering::SeqCst) {
            info!(reason, "shutdown already in progress");
            return None;
        }
        warn!(reason, "safe shutdown started");

        if !self.actuator.disable_motion(self.step_deadline) {
            error!(deadline = ?self.step_deadline, "velocity command still in flight, landing anyway");
        }
        let actuator = self.actuator.clone();
        let land = run_bounded("land", self.step_deadline, move || actuator.land());

        let stream = self.stream.clone().map(|stream| {
            run_bounded("stream stop", self.step_deadline, move || stream.stop())
        });

        let actuator = self.actuator.clone();
        let disconnect =
            run_bounded("disconnect", self.step_deadline, move || actuator.disconnect());

        self.stop.trigger();
        info!(reason, "safe shutdown complete");
        Some(ShutdownReport {
            reason: reason.to_string(),
            land,
            stream,
            disconnect,
        })
    }
}

/// Run `step` on a helper thread and wait at most `deadline` for it.
/// A step that overruns is abandoned; its thread finishes on its own.
fn run_bounded<F>(name: &'static str, deadline: Duration, step: F) -> StepOutcome
where
    F: FnOnce() -> Result<(), BoundaryError> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = std::thread::Builder::new()
        .name(format!("shutdown-{}", name.replace(' ', "-")))
        .spawn(move || {
            // Receiver may be gone after a timeout.
            let _ = tx.send(step());
        });
    if let Err(e) = spawned {
        error!(step = name, error = %e, "could not spawn shutdown step");
        return StepOutcome::Failed(e.to_string());
    }
    match rx.recv_timeout(deadline) {
        Ok(Ok(())) => StepOutcome::Done,
        Ok(Err(e)) => {
            error!(step = name, error = %e, "shutdown step failed, continuing");
            StepOutcome::Failed(e.to_string())
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            error!(step = name, ?deadline, "shutdown step timed out, continuing");
            StepOutcome::TimedOut
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            error!(step = name, "shutdown step panicked, continuing");
            StepOutcome::Failed("step panicked".into())
        }
    }
}
