//! Stage threads and pipeline assembly.
//!
//! One named thread per stage, connected only through [`StageQueue`]s and a
//! shared [`StopSignal`]:
//!
//! ```text
//! acquisition ─Frame─▶ association ─FusedObservation─▶ control ─▶ actuator
//!                                              range ─RangeSample─▶ ┘
//! ```
//!
//! Range and control hold back until association has seen its first frame,
//! so the platform does not move on a dead camera.
//!
//! A watchdog thread owns the [`ShutdownSupervisor`] and fires it when the
//! operator asks, when any stage exits for any reason, or when the mission
//! deadline passes.

use crate::{
    boundary::{Actuator, Detector, Frame, FrameSource, GatedActuator, MediaStream, RangeSensor},
    clock::Clock,
    config::{positive, ConfigError, SystemConfig},
    fusion::{ControlState, FusionController},
    queue::StageQueue,
    shutdown::{ShutdownReport, ShutdownSupervisor, StopSignal},
};
use sensor_models::{parse_tof_response, RangeSample};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracker_core::{Associator, AssociatorConfig, Detection, FusedObservation, TargetSelector};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// Distance reported when the sensor reply is malformed (cm)
    pub failure_distance_cm: f64,
    /// Seconds between sensor queries
    pub poll_interval: f64,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            failure_distance_cm: 200.0,
            poll_interval: 0.5,
        }
    }
}

impl RangeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("range.failure_distance_cm", self.failure_distance_cm)?;
        positive("range.poll_interval", self.poll_interval)?;
        Ok(())
    }
}

/// Loop pacing, all in seconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTiming {
    pub control_tick: f64,
    pub association_idle: f64,
    pub startup_timeout: f64,
    pub startup_poll: f64,
    pub watchdog_poll: f64,
    /// Bound on each shutdown step
    pub landing_deadline: f64,
}

impl Default for StageTiming {
    fn default() -> Self {
        Self {
            control_tick: 0.3,
            association_idle: 0.02,
            startup_timeout: 5.0,
            startup_poll: 0.1,
            watchdog_poll: 0.1,
            landing_deadline: 5.0,
        }
    }
}

impl StageTiming {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("timing.control_tick", self.control_tick)?;
        positive("timing.association_idle", self.association_idle)?;
        positive("timing.startup_timeout", self.startup_timeout)?;
        positive("timing.startup_poll", self.startup_poll)?;
        positive("timing.watchdog_poll", self.watchdog_poll)?;
        positive("timing.landing_deadline", self.landing_deadline)?;
        Ok(())
    }
}

fn secs(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::OutOfRange {
        name,
        expected: "representable duration",
        value,
    })
}

/// Validated loop intervals.
#[derive(Clone, Copy, Debug)]
struct Pacing {
    control_tick: Duration,
    association_idle: Duration,
    range_poll: Duration,
    startup_timeout: Duration,
    startup_poll: Duration,
    watchdog_poll: Duration,
    landing_deadline: Duration,
}

impl Pacing {
    fn new(config: &SystemConfig) -> Result<Self, ConfigError> {
        let t = &config.timing;
        Ok(Self {
            control_tick: secs("timing.control_tick", t.control_tick)?,
            association_idle: secs("timing.association_idle", t.association_idle)?,
            range_poll: secs("range.poll_interval", config.range.poll_interval)?,
            startup_timeout: secs("timing.startup_timeout", t.startup_timeout)?,
            startup_poll: secs("timing.startup_poll", t.startup_poll)?,
            watchdog_poll: secs("timing.watchdog_poll", t.watchdog_poll)?,
            landing_deadline: secs("timing.landing_deadline", t.landing_deadline)?,
        })
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not spawn {stage} thread: {source}")]
    Spawn {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Stage loops
// ---------------------------------------------------------------------------

/// Marks a stage as exited when dropped, including on panic.
struct ExitGuard(Arc<AtomicBool>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// One-shot flag opened by association on the first frame.
#[derive(Clone, Debug, Default)]
struct StartGate(Arc<AtomicBool>);

impl StartGate {
    fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Poll until the gate opens or `stop` fires. The association stage
    /// owns the startup timeout; a stalled start ends through the stop flag.
    fn wait(&self, poll: Duration, stop: &StopSignal) -> bool {
        loop {
            if self.is_open() {
                return true;
            }
            if stop.is_stopped() {
                return false;
            }
            std::thread::sleep(poll);
        }
    }
}

fn acquisition_loop(
    mut source: Box<dyn FrameSource>,
    frames: Arc<StageQueue<Frame>>,
    stop: StopSignal,
    idle: Duration,
) {
    info!("acquisition stage started");
    while !stop.is_stopped() {
        match source.next_frame() {
            Ok(Some(frame)) => {
                frames.publish(frame);
            }
            Ok(None) => std::thread::sleep(idle),
            Err(e) => {
                warn!(error = %e, "frame acquisition failed");
                std::thread::sleep(idle);
            }
        }
    }
    info!(
        published = frames.published(),
        dropped = frames.overwritten(),
        "acquisition stage stopped"
    );
}

fn association_loop(
    mut detector: Box<dyn Detector>,
    config: AssociatorConfig,
    frames: Arc<StageQueue<Frame>>,
    observations: Arc<StageQueue<FusedObservation>>,
    gate: StartGate,
    stop: StopSignal,
    pacing: Pacing,
) {
    info!("association stage waiting for the first frame");
    let Some(first) = frames.wait_take(pacing.startup_timeout, pacing.startup_poll, &stop) else {
        if !stop.is_stopped() {
            error!(timeout = ?pacing.startup_timeout, "no frame before startup timeout");
        }
        return;
    };
    let selector = TargetSelector::new(first.size());
    let mut associator = Associator::new(config);
    info!(width = first.width, height = first.height, "association stage started");
    gate.open();

    let mut pending = Some(first);
    while !stop.is_stopped() {
        let Some(frame) = pending.take().or_else(|| frames.try_take()) else {
            std::thread::sleep(pacing.association_idle);
            continue;
        };
        let boxes = match detector.detect(&frame) {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!(frame = frame.sequence, error = %e, "detector failed, frame skipped");
                continue;
            }
        };
        let detections = Detection::from_boxes(&boxes, associator.observation());
        let out = associator.process_frame(&detections);
        debug!(
            frame = frame.sequence,
            tracks = out.tracks.len(),
            births = out.births.len(),
            deletions = out.deletions.len(),
            "frame associated"
        );
        if let Some(obs) = selector.observe(associator.tracks()) {
            observations.publish(obs);
        }
    }
    info!("association stage stopped");
}

/// Query the sensor once. Failures and malformed replies read as the
/// configured failure distance.
pub fn sample_range(sensor: &mut dyn RangeSensor, config: &RangeConfig, now: f64) -> RangeSample {
    let distance = match sensor.query() {
        Ok(reply) => parse_tof_response(&reply).unwrap_or_else(|| {
            warn!(%reply, "malformed range reply");
            config.failure_distance_cm
        }),
        Err(e) => {
            warn!(error = %e, "range query failed");
            config.failure_distance_cm
        }
    };
    RangeSample::new(distance, now)
}

fn range_loop(
    mut sensor: Box<dyn RangeSensor>,
    config: RangeConfig,
    ranges: Arc<StageQueue<RangeSample>>,
    clock: Arc<dyn Clock>,
    gate: StartGate,
    stop: StopSignal,
    pacing: Pacing,
) {
    if !gate.wait(pacing.startup_poll, &stop) {
        return;
    }
    info!("range stage started");
    while !stop.is_stopped() {
        ranges.publish(sample_range(sensor.as_mut(), &config, clock.now()));
        std::thread::sleep(pacing.range_poll);
    }
    info!("range stage stopped");
}

fn control_loop(
    mut controller: FusionController,
    clock: Arc<dyn Clock>,
    gate: StartGate,
    stop: StopSignal,
    pacing: Pacing,
) {
    if !gate.wait(pacing.startup_poll, &stop) {
        return;
    }
    info!("control stage started");
    while !stop.is_stopped() {
        let report = controller.tick(clock.now());
        if report.state == ControlState::Engaging {
            info!("engagement complete, control stage exiting");
            return;
        }
        std::thread::sleep(pacing.control_tick);
    }
    info!("control stage stopped");
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// The external collaborators a pipeline runs against.
pub struct Boundaries {
    pub frames: Box<dyn FrameSource>,
    pub detector: Box<dyn Detector>,
    pub range: Box<dyn RangeSensor>,
    pub actuator: Arc<dyn Actuator>,
    pub stream: Option<Arc<dyn MediaStream>>,
}

struct StageHandle {
    name: &'static str,
    exited: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

fn spawn_stage<F>(name: &'static str, body: F) -> Result<StageHandle, StageError>
where
    F: FnOnce() + Send + 'static,
{
    let exited = Arc::new(AtomicBool::new(false));
    let guard = ExitGuard(exited.clone());
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _guard = guard;
            body();
        })
        .map_err(|source| StageError::Spawn {
            stage: name,
            source,
        })?;
    Ok(StageHandle {
        name,
        exited,
        handle,
    })
}

/// Fires the shutdown supervisor on the first trigger it observes.
pub struct Watchdog {
    supervisor: Arc<ShutdownSupervisor>,
    stages: Vec<(&'static str, Arc<AtomicBool>)>,
    operator: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    deadline: Option<f64>,
    poll: Duration,
}

impl Watchdog {
    /// What should stop the pipeline now, if anything.
    fn check(&self) -> Option<String> {
        if self.operator.load(Ordering::SeqCst) {
            return Some("operator requested stop".to_string());
        }
        if let Some((name, _)) = self.stages.iter().find(|(_, e)| e.load(Ordering::SeqCst)) {
            return Some(format!("{name} stage exited"));
        }
        match self.deadline {
            Some(d) if self.clock.now() >= d => Some("mission deadline reached".to_string()),
            _ => None,
        }
    }

    fn run(self) -> Option<ShutdownReport> {
        info!("watchdog started");
        loop {
            if let Some(reason) = self.check() {
                return self.supervisor.request_stop(&reason);
            }
            if self.supervisor.stop_signal().is_stopped() {
                return None;
            }
            std::thread::sleep(self.poll);
        }
    }
}

/// How a pipeline ended.
#[derive(Debug)]
pub struct PipelineSummary {
    pub shutdown: Option<ShutdownReport>,
    /// Stages (or the watchdog) that panicked
    pub panicked: Vec<&'static str>,
}

pub struct PipelineHandles {
    stages: Vec<StageHandle>,
    watchdog: JoinHandle<Option<ShutdownReport>>,
    operator: Arc<AtomicBool>,
    stop: StopSignal,
}

impl PipelineHandles {
    /// Ask the watchdog to run the shutdown sequence.
    pub fn request_stop(&self) {
        self.operator.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Names of stages that have exited so far.
    pub fn exited_stages(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|s| s.exited.load(Ordering::SeqCst))
            .map(|s| s.name)
            .collect()
    }

    /// Wait for the watchdog and every stage.
    pub fn join(self) -> PipelineSummary {
        let mut panicked = Vec::new();
        let shutdown = match self.watchdog.join() {
            Ok(report) => report,
            Err(_) => {
                error!("watchdog panicked, raising stop directly");
                self.stop.trigger();
                panicked.push("watchdog");
                None
            }
        };
        for stage in self.stages {
            if stage.handle.join().is_err() {
                error!(stage = stage.name, "stage panicked");
                panicked.push(stage.name);
            }
        }
        PipelineSummary { shutdown, panicked }
    }
}

/// Validate `config`, then spawn every stage and the watchdog.
///
/// `mission_time` bounds the run in clock seconds from now.
pub fn spawn_pipeline(
    config: &SystemConfig,
    boundaries: Boundaries,
    clock: Arc<dyn Clock>,
    mission_time: Option<f64>,
) -> Result<PipelineHandles, StageError> {
    config.validate()?;
    let pacing = Pacing::new(config)?;

    let stop = StopSignal::new();
    let gated = Arc::new(GatedActuator::new(boundaries.actuator));
    let supervisor = Arc::new(ShutdownSupervisor::new(
        gated.clone(),
        boundaries.stream,
        stop.clone(),
        pacing.landing_deadline,
    ));

    let frames: Arc<StageQueue<Frame>> = Arc::new(StageQueue::new());
    let observations: Arc<StageQueue<FusedObservation>> = Arc::new(StageQueue::new());
    let ranges: Arc<StageQueue<RangeSample>> = Arc::new(StageQueue::new());

    let gate = StartGate::default();
    let mut stages = Vec::with_capacity(4);

    let (q, s) = (frames.clone(), stop.clone());
    let source = boundaries.frames;
    stages.push(spawn_stage("acquisition", move || {
        acquisition_loop(source, q, s, pacing.association_idle)
    })?);

    let (fq, oq, g, s) = (frames, observations.clone(), gate.clone(), stop.clone());
    let detector = boundaries.detector;
    let assoc_config = config.associator.clone();
    stages.push(spawn_stage("association", move || {
        association_loop(detector, assoc_config, fq, oq, g, s, pacing)
    })?);

    let (q, c, g, s) = (ranges.clone(), clock.clone(), gate.clone(), stop.clone());
    let sensor = boundaries.range;
    let range_config = config.range.clone();
    stages.push(spawn_stage("range", move || {
        range_loop(sensor, range_config, q, c, g, s, pacing)
    })?);

    let controller = FusionController::new(config.control.clone(), observations, ranges, gated);
    let (c, s) = (clock.clone(), stop.clone());
    stages.push(spawn_stage("control", move || {
        control_loop(controller, c, gate, s, pacing)
    })?);

    let operator = Arc::new(AtomicBool::new(false));
    let watchdog = Watchdog {
        supervisor,
        stages: stages.iter().map(|s| (s.name, s.exited.clone())).collect(),
        operator: operator.clone(),
        deadline: mission_time.map(|t| clock.now() + t),
        clock,
        poll: pacing.watchdog_poll,
    };
    let watchdog = std::thread::Builder::new()
        .name("watchdog".to_string())
        .spawn(move || watchdog.run())
        .map_err(|source| {
            // Stages are already running; make sure they wind down.
            stop.trigger();
            StageError::Spawn {
                stage: "watchdog",
                source,
            }
        })?;

    info!(stages = stages.len(), "pipeline running");
    Ok(PipelineHandles {
        stages,
        watchdog,
        operator,
        stop,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::testing::{Call, RecordingActuator};
    use crate::boundary::BoundaryError;
    use crate::clock::MonotonicClock;
    use sensor_models::BoundingBox;
    use std::time::Instant;

    /// Endless 960×720 frames.
    struct Frames(u64);

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Result<Option<Frame>, BoundaryError> {
            std::thread::sleep(Duration::from_millis(5));
            self.0 += 1;
            Ok(Some(Frame {
                width: 960,
                height: 720,
                data: Arc::from(Vec::new()),
                sequence: self.0,
                timestamp: 0.0,
            }))
        }
    }

    struct NoFrames;

    impl FrameSource for NoFrames {
        fn next_frame(&mut self) -> Result<Option<Frame>, BoundaryError> {
            Ok(None)
        }
    }

    /// Always reports one centred box of the given width.
    struct FixedBox(f64);

    impl Detector for FixedBox {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, BoundaryError> {
            Ok(vec![BoundingBox::from_center(480.0, 360.0, self.0, 2.0 * self.0)])
        }
    }

    struct Tof(&'static str);

    impl RangeSensor for Tof {
        fn query(&mut self) -> Result<String, BoundaryError> {
            Ok(self.0.to_string())
        }
    }

    fn fast_config() -> SystemConfig {
        let mut cfg = SystemConfig::default();
        cfg.timing = StageTiming {
            control_tick: 0.02,
            association_idle: 0.005,
            startup_timeout: 0.3,
            startup_poll: 0.01,
            watchdog_poll: 0.01,
            landing_deadline: 0.5,
        };
        cfg.range.poll_interval = 0.02;
        cfg
    }

    fn boundaries(
        frames: Box<dyn FrameSource>,
        width: f64,
        actuator: Arc<RecordingActuator>,
    ) -> Boundaries {
        Boundaries {
            frames,
            detector: Box::new(FixedBox(width)),
            range: Box::new(Tof("tof 150")),
            actuator,
            stream: None,
        }
    }

    #[test]
    fn operator_stop_lands_once_and_joins() {
        let actuator = Arc::new(RecordingActuator::default());
        let handles = spawn_pipeline(
            &fast_config(),
            boundaries(Box::new(Frames(0)), 80.0, actuator.clone()),
            Arc::new(MonotonicClock::new()),
            None,
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(300));
        handles.request_stop();
        handles.request_stop();
        let summary = handles.join();

        let report = summary.shutdown.unwrap();
        assert_eq!(report.reason, "operator requested stop");
        assert!(summary.panicked.is_empty());
        assert_eq!(actuator.count(|c| *c == Call::Land), 1);
        assert_eq!(actuator.count(|c| *c == Call::Disconnect), 1);
        assert!(!actuator.velocities().is_empty());
    }

    #[test]
    fn engagement_ends_the_run() {
        let actuator = Arc::new(RecordingActuator::default());
        let handles = spawn_pipeline(
            &fast_config(),
            boundaries(Box::new(Frames(0)), 700.0, actuator.clone()),
            Arc::new(MonotonicClock::new()),
            Some(10.0),
        )
        .unwrap();
        let summary = handles.join();
        assert_eq!(summary.shutdown.unwrap().reason, "control stage exited");
        assert!(actuator
            .calls()
            .contains(&Call::Indicator(crate::boundary::IndicatorPattern::Attack)));
    }

    #[test]
    fn missing_first_frame_shuts_down_after_startup_timeout() {
        let actuator = Arc::new(RecordingActuator::default());
        let start = Instant::now();
        let handles = spawn_pipeline(
            &fast_config(),
            boundaries(Box::new(NoFrames), 80.0, actuator.clone()),
            Arc::new(MonotonicClock::new()),
            None,
        )
        .unwrap();
        let summary = handles.join();
        assert_eq!(summary.shutdown.unwrap().reason, "association stage exited");
        assert_eq!(actuator.count(|c| *c == Call::Land), 1);
        assert!(actuator.velocities().is_empty());
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn start_gate_releases_on_open_or_stop() {
        let gate = StartGate::default();
        let stop = StopSignal::new();
        let opener = gate.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            opener.open();
        });
        assert!(gate.wait(Duration::from_millis(5), &stop));
        t.join().unwrap();

        let closed = StartGate::default();
        stop.trigger();
        assert!(!closed.wait(Duration::from_millis(5), &stop));
    }

    #[test]
    fn mission_deadline_stops_pipeline() {
        let actuator = Arc::new(RecordingActuator::default());
        let handles = spawn_pipeline(
            &fast_config(),
            boundaries(Box::new(Frames(0)), 80.0, actuator.clone()),
            Arc::new(MonotonicClock::new()),
            Some(0.2),
        )
        .unwrap();
        let summary = handles.join();
        assert_eq!(summary.shutdown.unwrap().reason, "mission deadline reached");
    }

    #[test]
    fn malformed_range_reads_as_failure_distance() {
        let cfg = RangeConfig::default();
        assert_eq!(sample_range(&mut Tof("tof 87"), &cfg, 1.0), RangeSample::new(87.0, 1.0));
        assert_eq!(sample_range(&mut Tof("ok"), &cfg, 2.0).distance_cm, 200.0);
        assert_eq!(sample_range(&mut Tof("tof -3"), &cfg, 2.0).distance_cm, 200.0);
    }

    #[test]
    fn invalid_config_is_rejected_before_spawning() {
        let mut cfg = fast_config();
        cfg.timing.control_tick = 0.0;
        let actuator = Arc::new(RecordingActuator::default());
        let result = spawn_pipeline(
            &cfg,
            boundaries(Box::new(Frames(0)), 80.0, actuator.clone()),
            Arc::new(MonotonicClock::new()),
            None,
        );
        assert!(matches!(result, Err(StageError::Config(_))));
        assert!(actuator.calls().is_empty());
    }
}
