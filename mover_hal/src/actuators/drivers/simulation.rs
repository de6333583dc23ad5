//! Simulation driver: accepts every command and records it.

use crate::actuators::{ActuatorError, JointDriver, JointSpec};
use mover_common::hal::config::ActuatorsConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "simulation";

#[derive(Default)]
struct Recorded {
    commands: Vec<(u32, f64)>,
    released: bool,
    fail: bool,
}

/// Shared view of what the driver received.
#[derive(Clone, Default)]
pub struct CommandLog {
    inner: Arc<Mutex<Recorded>>,
}

impl CommandLog {
    /// `(channel, angle)` pairs in order.
    pub fn commands(&self) -> Vec<(u32, f64)> {
        self.inner.lock().commands.clone()
    }

    pub fn last(&self, channel: u32) -> Option<f64> {
        self.inner
            .lock()
            .commands
            .iter()
            .rev()
            .find(|(ch, _)| *ch == channel)
            .map(|&(_, a)| a)
    }

    pub fn released(&self) -> bool {
        self.inner.lock().released
    }

    pub fn clear(&self) {
        self.inner.lock().commands.clear();
    }

    /// Make every following output fail.
    pub fn fail_outputs(&self, fail: bool) {
        self.inner.lock().fail = fail;
    }
}

pub struct SimulationJointDriver {
    log: CommandLog,
    initialized: bool,
}

impl SimulationJointDriver {
    pub fn new() -> Self {
        Self {
            log: CommandLog::default(),
            initialized: false,
        }
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }
}

impl Default for SimulationJointDriver {
    fn default() -> Self {
        Self::new()
    }
}

pub fn create() -> Box<dyn JointDriver> {
    Box::new(SimulationJointDriver::new())
}

impl JointDriver for SimulationJointDriver {
    fn name(&self) -> &'static str {
        NAME
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn init(&mut self, _config: &ActuatorsConfig, joints: &[JointSpec]) -> Result<(), ActuatorError> {
        for j in joints {
            debug!(joint = %j.kind, channel = j.channel, "Simulated joint");
        }
        self.initialized = true;
        Ok(())
    }

    fn set_angle(&mut self, channel: u32, angle_deg: f64) -> Result<(), ActuatorError> {
        if !self.initialized {
            return Err(ActuatorError::NotInitialized);
        }
        let mut rec = self.log.inner.lock();
        if rec.fail {
            return Err(ActuatorError::Output {
                channel,
                reason: "simulated output failure".into(),
            });
        }
        rec.commands.push((channel, angle_deg));
        rec.released = false;
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        self.log.inner.lock().released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_before_init_fails() {
        let mut d = SimulationJointDriver::new();
        assert!(matches!(d.set_angle(0, 1.0), Err(ActuatorError::NotInitialized)));
    }

    #[test]
    fn records_last_angle_per_channel() {
        let mut d = SimulationJointDriver::new();
        let log = d.log();
        d.init(&ActuatorsConfig::default(), &[]).unwrap();
        d.set_angle(0, 10.0).unwrap();
        d.set_angle(1, 3.0).unwrap();
        d.set_angle(0, 12.0).unwrap();
        assert_eq!(log.last(0), Some(12.0));
        assert_eq!(log.last(1), Some(3.0));
        assert_eq!(log.last(2), None);
    }
}
