//! Simulated platform: actuation, video stream and ToF range sensor over a
//! shared [`World`](crate::world::World). Every call is recorded.

use crate::world::SharedWorld;
use flight_control::{
    Actuator, ActuatorCommand, BoundaryError, Clock, IndicatorPattern, MediaStream, RangeSensor,
};
use parking_lot::Mutex;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PlatformCommand {
    Velocity(ActuatorCommand),
    Land,
    Indicator(IndicatorPattern),
    Disconnect,
    StreamStop,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub time: f64,
    pub command: PlatformCommand,
}

pub struct SimPlatform {
    world: SharedWorld,
    clock: Arc<dyn Clock>,
    log: Mutex<Vec<CommandRecord>>,
    connected: AtomicBool,
    streaming: AtomicBool,
}

impl SimPlatform {
    pub fn new(world: SharedWorld, clock: Arc<dyn Clock>) -> Self {
        Self {
            world,
            clock,
            log: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            streaming: AtomicBool::new(true),
        }
    }

    fn record(&self, command: PlatformCommand) {
        let time = self.clock.now();
        debug!(time, ?command, "platform command");
        self.log.lock().push(CommandRecord { time, command });
    }

    fn ensure_connected(&self) -> Result<(), BoundaryError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BoundaryError::Actuation("platform disconnected".into()))
        }
    }

    pub fn commands(&self) -> Vec<CommandRecord> {
        self.log.lock().clone()
    }

    pub fn is_landed(&self) -> bool {
        self.world.lock().landed
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }
}

impl Actuator for SimPlatform {
    fn set_velocity(&self, cmd: &ActuatorCommand) -> Result<(), BoundaryError> {
        self.ensure_connected()?;
        {
            let mut world = self.world.lock();
            if world.landed {
                return Err(BoundaryError::Actuation("platform has landed".into()));
            }
            world.velocity = *cmd;
        }
        self.record(PlatformCommand::Velocity(*cmd));
        Ok(())
    }

    fn land(&self) -> Result<(), BoundaryError> {
        self.ensure_connected()?;
        {
            let mut world = self.world.lock();
            world.landed = true;
            world.velocity = ActuatorCommand::default();
        }
        self.record(PlatformCommand::Land);
        Ok(())
    }

    fn indicator(&self, pattern: IndicatorPattern) -> Result<(), BoundaryError> {
        self.ensure_connected()?;
        self.record(PlatformCommand::Indicator(pattern));
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BoundaryError> {
        self.connected.store(false, Ordering::SeqCst);
        self.record(PlatformCommand::Disconnect);
        Ok(())
    }
}

impl MediaStream for SimPlatform {
    fn stop(&self) -> Result<(), BoundaryError> {
        self.streaming.store(false, Ordering::SeqCst);
        self.record(PlatformCommand::StreamStop);
        Ok(())
    }
}

/// ToF sensor parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TofParams {
    /// Chance a reply is garbled
    pub failure_probability: f64,
    /// Half-angle of the sensing cone (degrees)
    pub cone_half_angle_deg: f64,
    /// Reading when nothing is in the cone (cm)
    pub max_range_cm: f64,
}

impl Default for TofParams {
    fn default() -> Self {
        Self {
            failure_probability: 0.05,
            cone_half_angle_deg: 12.5,
            max_range_cm: 800.0,
        }
    }
}

/// Forward-looking ToF sensor. Replies `"tof <cm>"`, or garbage on failure.
pub struct SimRangeSensor {
    world: SharedWorld,
    params: TofParams,
    rng: ChaCha8Rng,
}

impl SimRangeSensor {
    pub fn new(world: SharedWorld, params: TofParams, seed: u64) -> Self {
        Self {
            world,
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl RangeSensor for SimRangeSensor {
    fn query(&mut self) -> Result<String, BoundaryError> {
        if self.rng.gen::<f64>() < self.params.failure_probability {
            return Ok("tof error".to_string());
        }
        let distance = self
            .world
            .lock()
            .nearest_ahead(self.params.cone_half_angle_deg.to_radians())
            .map_or(self.params.max_range_cm, |p| p.range_cm.min(self.params.max_range_cm));
        Ok(format!("tof {distance:.0}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Pedestrian, World};
    use flight_control::ManualClock;
    use sensor_models::parse_tof_response;

    fn platform() -> (SharedWorld, SimPlatform) {
        let world = World::shared(vec![Pedestrian::new(0, 0.0, 0.0, 250.0)]);
        let p = SimPlatform::new(world.clone(), Arc::new(ManualClock::new(1.5)));
        (world, p)
    }

    #[test]
    fn velocity_reaches_world_until_landed() {
        let (world, p) = platform();
        let cmd = ActuatorCommand::new(0.0, 20.0, 0.0, 5.0);
        p.set_velocity(&cmd).unwrap();
        assert_eq!(world.lock().velocity, cmd);

        p.land().unwrap();
        assert!(p.is_landed());
        assert_eq!(world.lock().velocity, ActuatorCommand::default());
        assert!(p.set_velocity(&cmd).is_err());
    }

    #[test]
    fn records_every_call_with_time() {
        let (_, p) = platform();
        p.indicator(IndicatorPattern::Attack).unwrap();
        p.stop().unwrap();
        p.disconnect().unwrap();
        assert!(p.land().is_err());
        let log = p.commands();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].time, 1.5);
        assert_eq!(log[1].command, PlatformCommand::StreamStop);
        assert!(!p.is_streaming());
    }

    #[test]
    fn tof_reports_nearest_in_cone() {
        let world = World::shared(vec![
            Pedestrian::new(0, 3.0, 0.0, 250.0),
            Pedestrian::new(1, 40.0, 0.0, 100.0),
        ]);
        let params = TofParams {
            failure_probability: 0.0,
            ..Default::default()
        };
        let mut tof = SimRangeSensor::new(world.clone(), params.clone(), 0);
        assert_eq!(parse_tof_response(&tof.query().unwrap()), Some(250.0));

        world.lock().pedestrians.clear();
        assert_eq!(parse_tof_response(&tof.query().unwrap()), Some(800.0));
    }

    #[test]
    fn tof_failure_is_unparseable() {
        let world = World::shared(Vec::new());
        let params = TofParams {
            failure_probability: 1.0,
            ..Default::default()
        };
        let mut tof = SimRangeSensor::new(world, params, 0);
        assert_eq!(parse_tof_response(&tof.query().unwrap()), None);
    }
}
