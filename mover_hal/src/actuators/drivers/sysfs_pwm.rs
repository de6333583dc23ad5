//! Linux PWM class driver (`/sys/class/pwm`).
//!
//! Each joint channel is a PWM output on one chip. Angles map linearly
//! onto a 500–2500 µs pulse at a 20 ms period.
//!
//! ```toml
//! [actuators.driver_config.sysfs_pwm]
//! chip = 0
//! root = "/sys/class/pwm"   # optional
//! ```

use crate::actuators::{ActuatorError, JointDriver, JointSpec};
use mover_common::consts::{SERVO_PERIOD_NS, SERVO_PULSE_MAX_US, SERVO_PULSE_MIN_US};
use mover_common::hal::config::ActuatorsConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const NAME: &str = "sysfs_pwm";

fn default_root() -> PathBuf {
    PathBuf::from("/sys/class/pwm")
}

#[derive(Debug, Clone, Deserialize)]
struct SysfsPwmConfig {
    #[serde(default)]
    chip: u32,
    #[serde(default = "default_root")]
    root: PathBuf,
}

impl Default for SysfsPwmConfig {
    fn default() -> Self {
        Self {
            chip: 0,
            root: default_root(),
        }
    }
}

/// Pulse width for `angle` on a servo whose full pulse range spans
/// `0..=full_scale_deg`.
pub fn pulse_width_us(angle_deg: f64, full_scale_deg: f64) -> u32 {
    let ratio = (angle_deg / full_scale_deg).clamp(0.0, 1.0);
    let span = f64::from(SERVO_PULSE_MAX_US - SERVO_PULSE_MIN_US);
    SERVO_PULSE_MIN_US + (ratio * span).round() as u32
}

pub struct SysfsPwmDriver {
    chip_dir: Option<PathBuf>,
    /// channel → full-scale angle
    channels: HashMap<u32, f64>,
}

impl SysfsPwmDriver {
    pub fn new() -> Self {
        Self {
            chip_dir: None,
            channels: HashMap::new(),
        }
    }

    fn chip_dir(&self) -> Result<&Path, ActuatorError> {
        self.chip_dir.as_deref().ok_or(ActuatorError::NotInitialized)
    }

    fn write_attr(dir: &Path, channel: u32, attr: &str, value: &str) -> Result<(), ActuatorError> {
        let path = dir.join(format!("pwm{channel}")).join(attr);
        fs::write(&path, value).map_err(|e| ActuatorError::Output {
            channel,
            reason: format!("{}: {e}", path.display()),
        })
    }

    fn export(dir: &Path, channel: u32) -> Result<(), ActuatorError> {
        if dir.join(format!("pwm{channel}")).is_dir() {
            return Ok(());
        }
        fs::write(dir.join("export"), channel.to_string()).map_err(|e| {
            ActuatorError::InitFailed(format!("export pwm{channel} on {}: {e}", dir.display()))
        })?;
        if !dir.join(format!("pwm{channel}")).is_dir() {
            return Err(ActuatorError::InitFailed(format!(
                "pwm{channel} not present after export on {}",
                dir.display()
            )));
        }
        debug!(channel, "PWM channel exported");
        Ok(())
    }
}

impl Default for SysfsPwmDriver {
    fn default() -> Self {
        Self::new()
    }
}

pub fn create() -> Box<dyn JointDriver> {
    Box::new(SysfsPwmDriver::new())
}

impl JointDriver for SysfsPwmDriver {
    fn name(&self) -> &'static str {
        NAME
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn init(&mut self, config: &ActuatorsConfig, joints: &[JointSpec]) -> Result<(), ActuatorError> {
        let cfg: SysfsPwmConfig = match config.driver_table(NAME) {
            Some(table) => table
                .clone()
                .try_into()
                .map_err(|e| ActuatorError::ConfigError(format!("driver_config.{NAME}: {e}")))?,
            None => SysfsPwmConfig::default(),
        };
        let dir = cfg.root.join(format!("pwmchip{}", cfg.chip));
        if !dir.is_dir() {
            return Err(ActuatorError::InitFailed(format!(
                "{} not found",
                dir.display()
            )));
        }

        for j in joints {
            Self::export(&dir, j.channel)?;
            Self::write_attr(&dir, j.channel, "period", &SERVO_PERIOD_NS.to_string())?;
            Self::write_attr(&dir, j.channel, "enable", "1")?;
            self.channels.insert(j.channel, j.full_scale_deg);
        }
        info!(chip = %dir.display(), channels = joints.len(), "PWM outputs enabled");
        self.chip_dir = Some(dir);
        Ok(())
    }

    fn set_angle(&mut self, channel: u32, angle_deg: f64) -> Result<(), ActuatorError> {
        let dir = self.chip_dir()?;
        let full_scale = self
            .channels
            .get(&channel)
            .copied()
            .ok_or_else(|| ActuatorError::Output {
                channel,
                reason: "channel not initialized".into(),
            })?;
        let pulse_us = pulse_width_us(angle_deg, full_scale);
        let duty_ns = u64::from(pulse_us) * 1_000;
        Self::write_attr(dir, channel, "duty_cycle", &duty_ns.to_string())?;
        debug!(channel, angle_deg, pulse_us, "PWM duty set");
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        let dir = self.chip_dir()?.to_path_buf();
        for &channel in self.channels.keys() {
            Self::write_attr(&dir, channel, "duty_cycle", "0")?;
            Self::write_attr(&dir, channel, "enable", "0")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuators::JointKind;

    fn fake_chip(channels: &[u32]) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let chip = root.path().join("pwmchip0");
        fs::create_dir(&chip).unwrap();
        fs::write(chip.join("export"), "").unwrap();
        for ch in channels {
            fs::create_dir(chip.join(format!("pwm{ch}"))).unwrap();
        }
        root
    }

    fn config_for(root: &Path) -> ActuatorsConfig {
        let mut cfg = ActuatorsConfig::default();
        let table: toml::Table =
            toml::from_str(&format!("chip = 0\nroot = \"{}\"", root.display())).unwrap();
        cfg.driver_config.insert(NAME.into(), toml::Value::Table(table));
        cfg
    }

    fn spec(channel: u32, full_scale_deg: f64) -> JointSpec {
        JointSpec {
            kind: JointKind::Lift,
            channel,
            min_deg: 0.0,
            max_deg: full_scale_deg,
            full_scale_deg,
        }
    }

    #[test]
    fn pulse_mapping() {
        assert_eq!(pulse_width_us(0.0, 180.0), 500);
        assert_eq!(pulse_width_us(90.0, 180.0), 1500);
        assert_eq!(pulse_width_us(180.0, 180.0), 2500);
        assert_eq!(pulse_width_us(274.0, 274.0), 2500);
        assert_eq!(pulse_width_us(300.0, 274.0), 2500);
        assert_eq!(pulse_width_us(-5.0, 180.0), 500);
    }

    #[test]
    fn init_configures_period_and_duty_follows_angle() {
        let root = fake_chip(&[0, 1]);
        let mut d = SysfsPwmDriver::new();
        d.init(&config_for(root.path()), &[spec(0, 274.0), spec(1, 180.0)])
            .unwrap();

        let chip = root.path().join("pwmchip0");
        assert_eq!(fs::read_to_string(chip.join("pwm0/period")).unwrap(), "20000000");
        assert_eq!(fs::read_to_string(chip.join("pwm1/enable")).unwrap(), "1");

        d.set_angle(1, 90.0).unwrap();
        assert_eq!(fs::read_to_string(chip.join("pwm1/duty_cycle")).unwrap(), "1500000");

        d.release().unwrap();
        assert_eq!(fs::read_to_string(chip.join("pwm0/enable")).unwrap(), "0");
        assert_eq!(fs::read_to_string(chip.join("pwm1/duty_cycle")).unwrap(), "0");
    }

    #[test]
    fn missing_chip_fails_init() {
        let root = tempfile::tempdir().unwrap();
        let mut d = SysfsPwmDriver::new();
        let err = d.init(&config_for(root.path()), &[spec(0, 180.0)]).unwrap_err();
        assert!(matches!(err, ActuatorError::InitFailed(_)));
    }

    #[test]
    fn unknown_channel_is_output_error() {
        let root = fake_chip(&[0]);
        let mut d = SysfsPwmDriver::new();
        d.init(&config_for(root.path()), &[spec(0, 180.0)]).unwrap();
        assert!(matches!(d.set_angle(3, 10.0), Err(ActuatorError::Output { channel: 3, .. })));
    }

    #[test]
    fn output_before_init_fails() {
        let mut d = SysfsPwmDriver::new();
        assert!(matches!(d.set_angle(0, 10.0), Err(ActuatorError::NotInitialized)));
    }
}
