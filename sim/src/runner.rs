//! Deterministic offline run: the whole control core stepped in lock-step
//! with a manual clock, no threads.
//!
//! Per camera frame: advance the world, detect, associate, select, publish.
//! Range polls and control ticks fire on their own intervals from the same
//! clock, so one seed always yields the same log.

use crate::{
    camera::{SimCamera, SimDetector},
    platform::{SimPlatform, SimRangeSensor},
    replay::{FrameRecord, Outcome, ReplayLog, TrackSnapshot},
    scenarios::Scenario,
    world::World,
};
use anyhow::Context;
use flight_control::{
    sample_range, Clock, ControlState, Detector, FrameSource, FusionController, ManualClock,
    StageQueue, SystemConfig, TickAction,
};
use sensor_models::RangeSample;
use std::sync::Arc;
use tracing::info;
use tracker_core::metrics::EngagementMetrics;
use tracker_core::{Associator, Detection, FusedObservation, TargetSelector};

/// Slack when comparing step times against tick schedules.
const SCHEDULE_EPS: f64 = 1e-9;

pub fn run_offline(scenario: &Scenario, config: &SystemConfig) -> anyhow::Result<ReplayLog> {
    config.validate().context("invalid configuration")?;

    let clock = Arc::new(ManualClock::new(0.0));
    let world = World::shared(scenario.pedestrians.clone());
    let platform = Arc::new(SimPlatform::new(world.clone(), clock.clone()));
    let mut camera = SimCamera::new(world.clone(), scenario.camera, clock.clone(), scenario.frame_dt);
    let mut detector = SimDetector::new(
        world.clone(),
        scenario.camera,
        scenario.detector.clone(),
        scenario.seed,
    );
    let mut tof = SimRangeSensor::new(world.clone(), scenario.tof.clone(), scenario.seed.wrapping_add(1));

    let observations: Arc<StageQueue<FusedObservation>> = Arc::new(StageQueue::new());
    let ranges: Arc<StageQueue<RangeSample>> = Arc::new(StageQueue::new());
    let mut controller = FusionController::new(
        config.control.clone(),
        observations.clone(),
        ranges.clone(),
        platform.clone(),
    );
    let mut associator = Associator::new(config.associator.clone());
    let selector = TargetSelector::new(scenario.camera.frame_size());

    let mut frames = Vec::new();
    let mut ticks = Vec::new();
    let mut metrics = EngagementMetrics::default();
    let mut outcome = Outcome::TimedOut;
    let mut next_range = 0.0;
    let mut next_control = 0.0;

    info!(scenario = %scenario.name, seed = scenario.seed, "offline run started");
    let n_steps = (scenario.duration / scenario.frame_dt).round() as u64;
    for step in 0..=n_steps {
        let t = step as f64 * scenario.frame_dt;
        clock.set(t);

        if let Some(frame) = camera.next_frame()? {
            let boxes = detector.detect(&frame)?;
            let detections = Detection::from_boxes(&boxes, associator.observation());
            associator.process_frame(&detections);

            let selected = selector.observe(associator.tracks());
            let truth = scenario.camera.ground_truth(&world.lock());
            let center = selected.as_ref().and_then(|obs| {
                associator
                    .tracks()
                    .iter()
                    .find(|tr| tr.id == obs.track_id)
                    .map(|tr| (tr.id, tr.center()))
            });
            metrics.accumulate(center, truth.as_ref());
            if let Some(obs) = &selected {
                observations.publish(obs.clone());
            }

            frames.push(FrameRecord {
                time: t,
                sequence: frame.sequence,
                detections: boxes,
                tracks: associator
                    .tracks()
                    .iter()
                    .map(|tr| TrackSnapshot {
                        id: tr.id,
                        bbox: associator.observation().state_to_box(&tr.state),
                        age_since_update: tr.age_since_update,
                    })
                    .collect(),
                selected,
                truth,
            });
        }

        if t + SCHEDULE_EPS >= next_range {
            ranges.publish(sample_range(&mut tof, &config.range, clock.now()));
            next_range += config.range.poll_interval;
        }

        if t + SCHEDULE_EPS >= next_control {
            let report = controller.tick(t);
            next_control += config.timing.control_tick;
            ticks.push(report);
            if let TickAction::Engage(trigger) = report.action {
                outcome = Outcome::Engaged { time: t, trigger };
            }
            if report.state == ControlState::Engaging {
                break;
            }
        }
    }

    info!(
        scenario = %scenario.name,
        frames = frames.len(),
        ticks = ticks.len(),
        ?outcome,
        "offline run finished"
    );
    Ok(ReplayLog {
        scenario_name: scenario.name.clone(),
        seed: scenario.seed,
        frame_dt: scenario.frame_dt,
        duration: scenario.duration,
        config: config.clone(),
        frames,
        ticks,
        commands: platform.commands(),
        metrics,
        outcome,
    })
}
