//! Fusion controller: turns the selected target and the range sensor into
//! platform commands.
//!
//! # States
//! - `Searching`: no recent target. Commands a slow yaw sweep.
//! - `Tracking`: a fused observation arrived within the lost-target
//!   timeout. Yaw, vertical and forward PIDs drive the platform.
//! - `Engaging`: proximity or range said "close enough". The indicator runs
//!   attack, attack-complete, cruise once, landing is commanded, and the state is terminal
//!   until [`FusionController::reset`].
//!
//! The PIDs are driven by the video proximity only. The range sensor is a
//! cross-check that can trigger engagement; when no fresh sample exists a
//! conservative default distance is used that never triggers on its own.

use crate::{
    boundary::{Actuator, ActuatorCommand, IndicatorPattern},
    config::{non_negative, positive, ConfigError},
    pid::{Action, PidAxis, PidGains},
    queue::StageQueue,
};
use sensor_models::RangeSample;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracker_core::FusedObservation;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Yaw rate from horizontal offset (setpoint 0)
    pub yaw: PidGains,
    /// Vertical speed from vertical offset (setpoint 0)
    pub vertical: PidGains,
    /// Forward speed from proximity against the target proximity
    pub forward: PidGains,
    /// Seconds without a new observation before dropping to search
    pub lost_target_timeout: f64,
    /// Proximity above which the target counts as reached
    pub engage_proximity: f64,
    /// Range below which the target counts as reached (cm)
    pub engage_min_range_cm: f64,
    /// Range assumed when no fresh sample exists (cm)
    pub default_range_cm: f64,
    /// Range samples older than this are ignored (s)
    pub range_freshness: f64,
    /// Yaw rate commanded while searching
    pub search_yaw_rate: f64,
    /// Final per-axis command clamp (±)
    pub command_limit: f64,
    /// dt assumed by the PIDs when the clock gives none
    pub fallback_dt: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            yaw: PidGains {
                kp: 25.0,
                ki: 0.1,
                kd: 5.0,
                setpoint: 0.0,
                output_min: -50.0,
                output_max: 50.0,
                action: Action::Reverse,
            },
            vertical: PidGains {
                kp: 25.0,
                ki: 0.1,
                kd: 5.0,
                setpoint: 0.0,
                output_min: -50.0,
                output_max: 50.0,
                action: Action::Reverse,
            },
            forward: PidGains {
                kp: 50.0,
                ki: 0.0,
                kd: 10.0,
                setpoint: 0.6,
                output_min: 0.0,
                output_max: 100.0,
                action: Action::Direct,
            },
            lost_target_timeout: 3.0,
            engage_proximity: 0.6,
            engage_min_range_cm: 40.0,
            default_range_cm: 65.0,
            range_freshness: 1.5,
            search_yaw_rate: 20.0,
            command_limit: 100.0,
            fallback_dt: 0.1,
        }
    }
}

impl ControlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.yaw.validate("yaw")?;
        self.vertical.validate("vertical")?;
        self.forward.validate("forward")?;
        positive("control.lost_target_timeout", self.lost_target_timeout)?;
        positive("control.engage_proximity", self.engage_proximity)?;
        non_negative("control.engage_min_range_cm", self.engage_min_range_cm)?;
        positive("control.range_freshness", self.range_freshness)?;
        positive("control.command_limit", self.command_limit)?;
        positive("control.fallback_dt", self.fallback_dt)?;
        if !self.search_yaw_rate.is_finite() {
            return Err(ConfigError::OutOfRange {
                name: "control.search_yaw_rate",
                expected: "finite",
                value: self.search_yaw_rate,
            });
        }
        // The substitute distance must never trigger engagement by itself.
        if !(self.default_range_cm.is_finite() && self.default_range_cm >= self.engage_min_range_cm)
        {
            return Err(ConfigError::OutOfRange {
                name: "control.default_range_cm",
                expected: ">= engage_min_range_cm",
                value: self.default_range_cm,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlState {
    Searching,
    Tracking,
    Engaging,
}

impl ControlState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Searching => "Searching",
            Self::Tracking => "Tracking",
            Self::Engaging => "Engaging",
        }
    }
}

/// Why engagement fired.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum EngageTrigger {
    Proximity(f64),
    Range(f64),
}

/// What a tick decided.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum TickAction {
    /// Search sweep commanded
    Search(ActuatorCommand),
    /// Pursuit command from the PIDs
    Pursue(ActuatorCommand),
    /// Tracking, but no new observation this tick: keep the last command
    Hold,
    /// Engagement fired this tick
    Engage(EngageTrigger),
    /// Already engaged, nothing to do
    Idle,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub time: f64,
    pub state: ControlState,
    pub action: TickAction,
    /// Range used for the engage decision this tick (cm)
    pub range_cm: Option<f64>,
    /// False when the actuator rejected the command
    pub delivered: bool,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct FusionController {
    config: ControlConfig,
    state: ControlState,
    yaw: PidAxis,
    vertical: PidAxis,
    forward: PidAxis,
    observations: Arc<StageQueue<FusedObservation>>,
    ranges: Arc<StageQueue<RangeSample>>,
    actuator: Arc<dyn Actuator>,
    latest_range: Option<RangeSample>,
    last_observation_time: Option<f64>,
}

impl FusionController {
    pub fn new(
        config: ControlConfig,
        observations: Arc<StageQueue<FusedObservation>>,
        ranges: Arc<StageQueue<RangeSample>>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        let dt = config.fallback_dt;
        Self {
            yaw: PidAxis::new(config.yaw.clone(), dt),
            vertical: PidAxis::new(config.vertical.clone(), dt),
            forward: PidAxis::new(config.forward.clone(), dt),
            config,
            state: ControlState::Searching,
            observations,
            ranges,
            actuator,
            latest_range: None,
            last_observation_time: None,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    /// (yaw, vertical, forward) axis states.
    pub fn axes(&self) -> (&PidAxis, &PidAxis, &PidAxis) {
        (&self.yaw, &self.vertical, &self.forward)
    }

    /// External reset after an engagement: back to searching, PIDs cleared.
    pub fn reset(&mut self) {
        self.reset_axes();
        self.state = ControlState::Searching;
        self.latest_range = None;
        self.last_observation_time = None;
    }

    fn reset_axes(&mut self) {
        self.yaw.reset();
        self.vertical.reset();
        self.forward.reset();
    }

    fn transition(&mut self, next: ControlState, now: f64) {
        if self.state != next {
            info!(from = self.state.label(), to = next.label(), t = now, "control state change");
            self.state = next;
        }
    }

    /// Latest range sample if it is still fresh at `now`.
    fn fresh_range(&self, now: f64) -> Option<f64> {
        self.latest_range
            .filter(|s| s.is_fresh(now, self.config.range_freshness))
            .map(|s| s.distance_cm)
    }

    fn deliver(&self, cmd: &ActuatorCommand) -> bool {
        match self.actuator.set_velocity(cmd) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "velocity command not delivered this tick");
                false
            }
        }
    }

    fn search_command(&self) -> ActuatorCommand {
        ActuatorCommand::new(0.0, 0.0, 0.0, self.config.search_yaw_rate)
            .clamped(self.config.command_limit)
    }

    fn engage(&mut self, trigger: EngageTrigger, now: f64) {
        self.transition(ControlState::Engaging, now);
        info!(?trigger, "target reached, running attack simulation");
        for pattern in [
            IndicatorPattern::Attack,
            IndicatorPattern::AttackComplete,
            IndicatorPattern::Cruise,
        ] {
            if let Err(e) = self.actuator.indicator(pattern) {
                warn!(?pattern, error = %e, "indicator failed");
            }
        }
        if let Err(e) = self.actuator.land() {
            error!(error = %e, "landing after engagement failed");
        }
    }

    /// One control-loop iteration at clock time `now`.
    pub fn tick(&mut self, now: f64) -> TickReport {
        let mut report = TickReport {
            time: now,
            state: self.state,
            action: TickAction::Idle,
            range_cm: None,
            delivered: true,
        };
        if self.state == ControlState::Engaging {
            return report;
        }

        if let Some(sample) = self.ranges.try_take() {
            self.latest_range = Some(sample);
        }

        match self.observations.try_take() {
            Some(obs) => {
                self.last_observation_time = Some(now);
                self.transition(ControlState::Tracking, now);

                let range = self.fresh_range(now).unwrap_or(self.config.default_range_cm);
                report.range_cm = Some(range);

                let trigger = if obs.proximity > self.config.engage_proximity {
                    Some(EngageTrigger::Proximity(obs.proximity))
                } else if range < self.config.engage_min_range_cm {
                    Some(EngageTrigger::Range(range))
                } else {
                    None
                };

                if let Some(trigger) = trigger {
                    self.engage(trigger, now);
                    report.action = TickAction::Engage(trigger);
                } else {
                    let cmd = ActuatorCommand::new(
                        0.0,
                        self.forward.update(obs.proximity, now),
                        self.vertical.update(obs.offset_y, now),
                        self.yaw.update(obs.offset_x, now),
                    )
                    .clamped(self.config.command_limit);
                    debug!(track = %obs.track_id, ?cmd, range, "pursuit command");
                    report.delivered = self.deliver(&cmd);
                    report.action = TickAction::Pursue(cmd);
                }
            }
            None => {
                let lost = self
                    .last_observation_time
                    .map_or(true, |t| now - t > self.config.lost_target_timeout);
                if self.state == ControlState::Tracking && lost {
                    warn!(timeout = self.config.lost_target_timeout, "target lost, searching");
                    self.reset_axes();
                    self.transition(ControlState::Searching, now);
                }
                if self.state == ControlState::Searching {
                    let cmd = self.search_command();
                    report.delivered = self.deliver(&cmd);
                    report.action = TickAction::Search(cmd);
                } else {
                    report.action = TickAction::Hold;
                }
            }
        }

        report.state = self.state;
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::testing::{Call, RecordingActuator};
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::Ordering;
    use tracker_core::{StateVec, TrackId};

    struct Rig {
        obs: Arc<StageQueue<FusedObservation>>,
        ranges: Arc<StageQueue<RangeSample>>,
        actuator: Arc<RecordingActuator>,
        ctl: FusionController,
    }

    fn rig() -> Rig {
        let obs = Arc::new(StageQueue::new());
        let ranges = Arc::new(StageQueue::new());
        let actuator = Arc::new(RecordingActuator::default());
        let ctl = FusionController::new(
            ControlConfig::default(),
            obs.clone(),
            ranges.clone(),
            actuator.clone(),
        );
        Rig {
            obs,
            ranges,
            actuator,
            ctl,
        }
    }

    fn observation(offset_x: f64, offset_y: f64, proximity: f64) -> FusedObservation {
        FusedObservation {
            offset_x,
            offset_y,
            proximity,
            track_id: TrackId(0),
            state: StateVec::zeros(),
        }
    }

    #[test]
    fn starts_searching_with_slow_yaw() {
        let mut r = rig();
        let report = r.ctl.tick(0.0);
        assert_eq!(report.state, ControlState::Searching);
        assert_eq!(
            report.action,
            TickAction::Search(ActuatorCommand::new(0.0, 0.0, 0.0, 20.0))
        );
    }

    #[test]
    fn observation_moves_to_tracking() {
        let mut r = rig();
        r.obs.publish(observation(0.2, 0.0, 0.1));
        let report = r.ctl.tick(0.0);
        assert_eq!(report.state, ControlState::Tracking);
        assert!(matches!(report.action, TickAction::Pursue(_)));
    }

    #[test]
    fn repeat_polls_hold_instead_of_new_commands() {
        let mut r = rig();
        r.obs.publish(observation(0.2, 0.0, 0.1));
        r.ctl.tick(0.0);
        let report = r.ctl.tick(0.3);
        assert_eq!(report.action, TickAction::Hold);
        assert_eq!(r.actuator.velocities().len(), 1);
    }

    #[test]
    fn lost_target_resets_pids_and_searches() {
        let mut r = rig();
        r.obs.publish(observation(0.3, -0.2, 0.1));
        r.ctl.tick(0.0);
        r.obs.publish(observation(0.3, -0.2, 0.1));
        r.ctl.tick(0.3);
        let (yaw, vertical, forward) = r.ctl.axes();
        assert!(yaw.integral() != 0.0 && vertical.integral() != 0.0 && forward.integral() != 0.0);

        // Within the timeout: still tracking
        assert_eq!(r.ctl.tick(3.0).state, ControlState::Tracking);
        // Beyond it: search, integrators cleared
        let report = r.ctl.tick(3.4);
        assert_eq!(report.state, ControlState::Searching);
        assert!(matches!(report.action, TickAction::Search(_)));
        let (yaw, vertical, forward) = r.ctl.axes();
        for axis in [yaw, vertical, forward] {
            assert_eq!(axis.integral(), 0.0);
            assert_eq!(axis.last_error(), 0.0);
        }
    }

    #[test]
    fn proximity_above_threshold_engages_once() {
        let mut r = rig();
        r.obs.publish(observation(0.0, 0.0, 0.61));
        let report = r.ctl.tick(0.0);
        assert_eq!(report.state, ControlState::Engaging);
        assert_eq!(report.action, TickAction::Engage(EngageTrigger::Proximity(0.61)));
        assert_eq!(
            r.actuator.calls(),
            vec![
                Call::Indicator(IndicatorPattern::Attack),
                Call::Indicator(IndicatorPattern::AttackComplete),
                Call::Indicator(IndicatorPattern::Cruise),
                Call::Land
            ]
        );

        // Terminal: further observations do nothing
        r.obs.publish(observation(0.0, 0.0, 0.9));
        assert_eq!(r.ctl.tick(0.3).action, TickAction::Idle);
        assert_eq!(r.actuator.calls().len(), 4);
    }

    #[test]
    fn close_range_engages_independently() {
        let mut r = rig();
        r.ranges.publish(RangeSample::new(30.0, 0.0));
        r.obs.publish(observation(0.0, 0.0, 0.2));
        let report = r.ctl.tick(0.1);
        assert_eq!(report.action, TickAction::Engage(EngageTrigger::Range(30.0)));
    }

    #[test]
    fn just_below_threshold_with_safe_range_does_not_engage() {
        let mut r = rig();
        r.ranges.publish(RangeSample::new(120.0, 0.0));
        r.obs.publish(observation(0.0, 0.0, 0.59));
        let report = r.ctl.tick(0.1);
        assert_eq!(report.state, ControlState::Tracking);
        assert_eq!(report.range_cm, Some(120.0));
        assert!(matches!(report.action, TickAction::Pursue(_)));
    }

    #[test]
    fn stale_range_is_replaced_by_default() {
        let mut r = rig();
        // Close sample, but far older than the freshness window
        r.ranges.publish(RangeSample::new(10.0, 0.0));
        r.obs.publish(observation(0.0, 0.0, 0.2));
        let report = r.ctl.tick(5.0);
        assert_eq!(report.state, ControlState::Tracking);
        assert_eq!(report.range_cm, Some(65.0));
    }

    #[test]
    fn actuation_failure_is_not_fatal() {
        let mut r = rig();
        r.actuator.fail_velocity.store(true, Ordering::SeqCst);
        r.obs.publish(observation(0.1, 0.0, 0.2));
        let report = r.ctl.tick(0.0);
        assert!(!report.delivered);
        assert_eq!(report.state, ControlState::Tracking);

        r.actuator.fail_velocity.store(false, Ordering::SeqCst);
        r.obs.publish(observation(0.1, 0.0, 0.2));
        assert!(r.ctl.tick(0.3).delivered);
    }

    #[test]
    fn forward_speed_shrinks_as_target_grows() {
        let mut r = rig();
        r.obs.publish(observation(0.0, 0.0, 0.1));
        let far = match r.ctl.tick(0.0).action {
            TickAction::Pursue(c) => c.forward,
            other => panic!("unexpected {other:?}"),
        };
        r.ctl.reset();
        r.obs.publish(observation(0.0, 0.0, 0.5));
        let near = match r.ctl.tick(1.0).action {
            TickAction::Pursue(c) => c.forward,
            other => panic!("unexpected {other:?}"),
        };
        assert!(far > near && near >= 0.0);
    }

    #[test]
    fn centred_pedestrian_then_left_shift_yaws_left() {
        use sensor_models::BoundingBox;
        use tracker_core::{Associator, AssociatorConfig, Detection, FrameSize, TargetSelector};

        let mut r = rig();
        let mut assoc = Associator::new(AssociatorConfig::default());
        let selector = TargetSelector::new(FrameSize::new(960, 720));

        let first = BoundingBox::new(440.0, 320.0, 520.0, 400.0);
        let dets = Detection::from_boxes(&[first], assoc.observation());
        let out = assoc.process_frame(&dets);
        assert_eq!(out.births.len(), 1);
        let obs = selector.observe(assoc.tracks()).unwrap();
        assert_abs_diff_eq!(obs.offset_x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(obs.offset_y, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(obs.proximity, 80.0 / 960.0, epsilon = 1e-9);
        r.obs.publish(obs);
        assert_eq!(r.ctl.tick(0.0).state, ControlState::Tracking);

        let shifted = BoundingBox::from_center(432.0, 360.0, 80.0, 80.0);
        let dets = Detection::from_boxes(&[shifted], assoc.observation());
        let out = assoc.process_frame(&dets);
        assert_eq!(out.matches.len(), 1);
        assert!(out.births.is_empty());
        let obs = selector.observe(assoc.tracks()).unwrap();
        assert!(obs.offset_x < -0.05 && obs.offset_x >= -0.1);
        r.obs.publish(obs);

        match r.ctl.tick(0.3).action {
            TickAction::Pursue(cmd) => {
                assert!(cmd.yaw < 0.0);
                assert!(cmd.yaw >= -50.0);
                assert_eq!(cmd.lateral, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn default_config_is_valid_and_default_range_is_safe() {
        let cfg = ControlConfig::default();
        assert!(cfg.validate().is_ok());
        let bad = ControlConfig {
            default_range_cm: 10.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
