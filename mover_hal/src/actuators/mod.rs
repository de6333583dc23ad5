//! Lift and gripper actuators.
//!
//! Two independent open-loop joints behind a pluggable [`JointDriver`].
//! [`Actuators`] never returns errors from its motion operations: a driver
//! failure is logged and reported as `false`.

pub mod drivers;
pub mod joint;
pub mod registry;

use mover_common::hal::config::ActuatorsConfig;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use joint::{GripPreset, Joint, JointBucket, JointKind, JointSpec, JointStatus, LiftPreset};
pub use registry::{JointDriverFactory, JointRegistry};

/// Actuator failures.
#[derive(Debug, Clone, Error)]
pub enum ActuatorError {
    #[error("Driver initialization failed: {0}")]
    InitFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Output error on channel {channel}: {reason}")]
    Output { channel: u32, reason: String },

    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    #[error("Driver not initialized")]
    NotInitialized,
}

/// Backend that turns joint angles into physical outputs.
///
/// Lifecycle: `init` once with the joint layout, then any number of
/// `set_angle` calls, then `release` to switch outputs off.
pub trait JointDriver: Send {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str;

    /// Prepare every output in `joints`. Driver-specific settings come from
    /// `config.driver_config[self.name()]`.
    fn init(&mut self, config: &ActuatorsConfig, joints: &[JointSpec]) -> Result<(), ActuatorError>;

    /// Drive `channel` to `angle_deg`. The angle is already clipped.
    fn set_angle(&mut self, channel: u32, angle_deg: f64) -> Result<(), ActuatorError>;

    /// Turn all outputs off.
    fn release(&mut self) -> Result<(), ActuatorError>;
}

/// The lift and gripper on one driver.
pub struct Actuators {
    driver: Box<dyn JointDriver>,
    lift: Joint,
    gripper: Joint,
}

impl Actuators {
    /// Create the configured driver from `registry` and initialize it.
    pub fn new(config: &ActuatorsConfig, registry: &JointRegistry) -> Result<Self, ActuatorError> {
        let driver = registry.create_driver(&config.driver)?;
        Self::with_driver(config, driver)
    }

    /// Initialize `driver` and park both joints at their rest angles
    /// (lift up, gripper open).
    pub fn with_driver(
        config: &ActuatorsConfig,
        mut driver: Box<dyn JointDriver>,
    ) -> Result<Self, ActuatorError> {
        config
            .validate()
            .map_err(|e| ActuatorError::ConfigError(e.to_string()))?;
        let lift = Joint::lift(&config.lift, config.rate_deg_s);
        let gripper = Joint::gripper(&config.gripper, config.rate_deg_s);

        driver.init(config, &[*lift.spec(), *gripper.spec()])?;
        for joint in [&lift, &gripper] {
            driver.set_angle(joint.spec().channel, joint.position())?;
        }
        info!(
            driver = driver.name(),
            version = driver.version(),
            "Actuators ready"
        );
        Ok(Self {
            driver,
            lift,
            gripper,
        })
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    pub fn joint(&self, kind: JointKind) -> &Joint {
        match kind {
            JointKind::Lift => &self.lift,
            JointKind::Gripper => &self.gripper,
        }
    }

    fn joint_mut(&mut self, kind: JointKind) -> &mut Joint {
        match kind {
            JointKind::Lift => &mut self.lift,
            JointKind::Gripper => &mut self.gripper,
        }
    }

    /// Move `kind` to `angle`, clipped to its range, at the joint's rate.
    ///
    /// Returns false when the angle is not finite or the driver fails; the
    /// tracked position then stays at the last step that was applied.
    pub async fn move_to(&mut self, kind: JointKind, angle: f64) -> bool {
        if !angle.is_finite() {
            warn!(joint = %kind, angle, "Joint target is not finite");
            return false;
        }
        let joint = self.joint(kind);
        let target = joint.clip(angle);
        if target != angle {
            warn!(joint = %kind, requested = angle, applied = target, "Joint target clipped");
        }
        let path = joint.path(target);
        let delay = joint.step_delay();
        let channel = joint.spec().channel;

        for (i, step) in path.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = self.driver.set_angle(channel, step) {
                warn!(joint = %kind, angle = step, error = %e, "Joint output failed");
                return false;
            }
            self.joint_mut(kind).set_position(step);
        }
        debug!(joint = %kind, angle = target, "Joint in position");
        true
    }

    /// Move by `delta` degrees from the tracked position.
    pub async fn nudge(&mut self, kind: JointKind, delta: f64) -> bool {
        let target = self.joint(kind).position() + delta;
        self.move_to(kind, target).await
    }

    pub async fn lift(&mut self, preset: LiftPreset) -> bool {
        match self.lift.lift_angle(preset) {
            Some(angle) => self.move_to(JointKind::Lift, angle).await,
            None => false,
        }
    }

    pub async fn grip(&mut self, preset: GripPreset) -> bool {
        match self.gripper.grip_angle(preset) {
            Some(angle) => self.move_to(JointKind::Gripper, angle).await,
            None => false,
        }
    }

    pub fn status(&self, kind: JointKind) -> JointStatus {
        self.joint(kind).status()
    }

    /// Change the transition rate of one joint.
    pub fn set_rate(&mut self, kind: JointKind, deg_s: f64) -> bool {
        let ok = self.joint_mut(kind).set_rate(deg_s);
        if ok {
            info!(joint = %kind, rate_deg_s = deg_s, "Joint rate changed");
        } else {
            warn!(joint = %kind, rate_deg_s = deg_s, "Joint rate rejected");
        }
        ok
    }

    /// Switch outputs off. Tracked positions are kept.
    pub fn release(&mut self) -> bool {
        match self.driver.release() {
            Ok(()) => {
                info!(driver = self.driver.name(), "Actuator outputs released");
                true
            }
            Err(e) => {
                warn!(error = %e, "Actuator release failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::drivers::simulation::SimulationJointDriver;
    use super::*;
    use std::time::Duration;

    fn actuators() -> (Actuators, drivers::simulation::CommandLog) {
        let driver = SimulationJointDriver::new();
        let log = driver.log();
        let act = Actuators::with_driver(&ActuatorsConfig::default(), Box::new(driver)).unwrap();
        (act, log)
    }

    #[tokio::test(start_paused = true)]
    async fn starts_at_rest() {
        let (act, log) = actuators();
        assert_eq!(act.status(JointKind::Lift).bucket, JointBucket::Up);
        assert_eq!(act.status(JointKind::Gripper).bucket, JointBucket::Open);
        assert_eq!(log.commands().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn move_is_stepped_at_rate() {
        let (mut act, log) = actuators();
        log.clear();
        let start = tokio::time::Instant::now();
        assert!(act.move_to(JointKind::Lift, 264.0).await);
        // 274 → 264 in 2° steps: 272, 270, 268, 266, 264.
        let angles: Vec<f64> = log.commands().iter().map(|c| c.1).collect();
        assert_eq!(angles, vec![272.0, 270.0, 268.0, 266.0, 264.0]);
        let expected = Duration::from_secs_f64(2.0 / 30.0) * 4;
        assert!(start.elapsed() >= expected);
        assert_eq!(act.joint(JointKind::Lift).position(), 264.0);
    }

    #[tokio::test(start_paused = true)]
    async fn gripper_cannot_pass_clamp() {
        let (mut act, log) = actuators();
        assert!(act.move_to(JointKind::Gripper, 90.0).await);
        assert_eq!(act.joint(JointKind::Gripper).position(), 5.0);
        assert!(act.nudge(JointKind::Gripper, 10.0).await);
        assert_eq!(act.joint(JointKind::Gripper).position(), 5.0);
        assert!(log.commands().iter().all(|&(ch, a)| ch != 1 || a <= 5.0));
    }

    #[tokio::test(start_paused = true)]
    async fn presets_and_release() {
        let (mut act, log) = actuators();
        assert!(act.lift(LiftPreset::Down).await);
        assert_eq!(act.status(JointKind::Lift).bucket, JointBucket::Down);
        assert!(act.grip(GripPreset::Close).await);
        assert_eq!(act.status(JointKind::Gripper).bucket, JointBucket::Closed);
        assert!(act.release());
        assert!(log.released());
    }

    #[tokio::test(start_paused = true)]
    async fn non_finite_target_refused() {
        let (mut act, _log) = actuators();
        assert!(!act.move_to(JointKind::Lift, f64::NAN).await);
        assert_eq!(act.joint(JointKind::Lift).position(), 274.0);
    }

    #[test]
    fn invalid_config_is_refused_before_init() {
        let mut config = ActuatorsConfig::default();
        config.gripper.open_deg = 20.0;
        config.gripper.closed_deg = 10.0;
        let driver = SimulationJointDriver::new();
        let log = driver.log();
        let err = Actuators::with_driver(&config, Box::new(driver)).err();
        assert!(matches!(err, Some(ActuatorError::ConfigError(_))));
        assert!(log.commands().is_empty());

        let mut config = ActuatorsConfig::default();
        config.rate_deg_s = 1e-300;
        let err = Actuators::with_driver(&config, Box::new(SimulationJointDriver::new())).err();
        assert!(matches!(err, Some(ActuatorError::ConfigError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_rate_is_rejected() {
        let (mut act, _log) = actuators();
        assert!(!act.set_rate(JointKind::Gripper, 1e-300));
        assert_eq!(act.joint(JointKind::Gripper).rate(), 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_failure_reports_false() {
        let driver = SimulationJointDriver::new();
        let log = driver.log();
        let mut act =
            Actuators::with_driver(&ActuatorsConfig::default(), Box::new(driver)).unwrap();
        log.fail_outputs(true);
        assert!(!act.lift(LiftPreset::Mid).await);
        assert_eq!(act.joint(JointKind::Lift).position(), 274.0);
    }
}
