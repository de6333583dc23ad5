//! Open-loop position joint.
//!
//! A joint tracks its nominal angle in software; there is no feedback
//! sensor. Targets outside the range are clipped, and motion is broken into
//! fixed angular steps so the actual speed follows the configured rate.

use mover_common::consts::{
    JOINT_STEP_DEG, MIN_JOINT_RATE_DEG_S, PRESET_TOLERANCE_DEG, SERVO_STANDARD_SCALE_DEG,
};
use mover_common::hal::config::{GripperConfig, LiftConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JointKind {
    Lift,
    Gripper,
}

impl fmt::Display for JointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JointKind::Lift => "lift",
            JointKind::Gripper => "gripper",
        })
    }
}

/// Lift presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiftPreset {
    Up,
    Mid,
    Down,
}

impl fmt::Display for LiftPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LiftPreset::Up => "up",
            LiftPreset::Mid => "mid",
            LiftPreset::Down => "down",
        })
    }
}

/// Gripper presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripPreset {
    Open,
    Close,
}

impl fmt::Display for GripPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GripPreset::Open => "open",
            GripPreset::Close => "close",
        })
    }
}

/// Named bucket of a continuous joint angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JointBucket {
    Up,
    Mid,
    Down,
    Open,
    Partial,
    Closed,
}

/// What a driver needs to know about one output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointSpec {
    pub kind: JointKind,
    pub channel: u32,
    pub min_deg: f64,
    pub max_deg: f64,
    /// Angle that maps to the longest pulse.
    pub full_scale_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JointStatus {
    pub joint: JointKind,
    pub position_deg: f64,
    pub bucket: JointBucket,
    pub rate_deg_s: f64,
}

#[derive(Debug, Clone, Copy)]
enum Presets {
    Lift { up: f64, mid: f64, down: f64 },
    Gripper { open: f64, closed: f64 },
}

#[derive(Debug, Clone)]
pub struct Joint {
    spec: JointSpec,
    presets: Presets,
    position: f64,
    rate_deg_s: f64,
}

impl Joint {
    /// Lift joint over its full range, starting raised.
    pub fn lift(cfg: &LiftConfig, rate_deg_s: f64) -> Self {
        Self {
            spec: JointSpec {
                kind: JointKind::Lift,
                channel: cfg.channel,
                min_deg: cfg.min_deg,
                max_deg: cfg.max_deg,
                full_scale_deg: cfg.max_deg,
            },
            presets: Presets::Lift {
                up: cfg.up_deg,
                mid: cfg.mid_deg,
                down: cfg.down_deg,
            },
            position: cfg.up_deg,
            rate_deg_s,
        }
    }

    /// Gripper joint. The range ends at the closed clamp, not at full
    /// mechanical travel.
    pub fn gripper(cfg: &GripperConfig, rate_deg_s: f64) -> Self {
        Self {
            spec: JointSpec {
                kind: JointKind::Gripper,
                channel: cfg.channel,
                min_deg: cfg.open_deg,
                max_deg: cfg.closed_deg.min(cfg.travel_deg),
                full_scale_deg: SERVO_STANDARD_SCALE_DEG,
            },
            presets: Presets::Gripper {
                open: cfg.open_deg,
                closed: cfg.closed_deg,
            },
            position: cfg.open_deg,
            rate_deg_s,
        }
    }

    pub fn spec(&self) -> &JointSpec {
        &self.spec
    }

    pub fn kind(&self) -> JointKind {
        self.spec.kind
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub(crate) fn set_position(&mut self, angle: f64) {
        self.position = angle;
    }

    pub fn rate(&self) -> f64 {
        self.rate_deg_s
    }

    /// Returns false for a non-finite rate or one below
    /// `MIN_JOINT_RATE_DEG_S`.
    pub fn set_rate(&mut self, deg_s: f64) -> bool {
        if !(deg_s.is_finite() && deg_s >= MIN_JOINT_RATE_DEG_S) {
            return false;
        }
        self.rate_deg_s = deg_s;
        true
    }

    /// Limit `angle` to the joint range. An inverted range pins to `min_deg`.
    pub fn clip(&self, angle: f64) -> f64 {
        angle.min(self.spec.max_deg).max(self.spec.min_deg)
    }

    /// Delay between two steps at the current rate.
    pub fn step_delay(&self) -> Duration {
        Duration::from_secs_f64(JOINT_STEP_DEG / self.rate_deg_s.max(MIN_JOINT_RATE_DEG_S))
    }

    /// Intermediate angles from the current position to `target`, one step
    /// apart, ending exactly on `target`. Empty when already there.
    pub fn path(&self, target: f64) -> Vec<f64> {
        let delta = target - self.position;
        if delta.abs() < 1e-6 {
            return Vec::new();
        }
        let step = JOINT_STEP_DEG.copysign(delta);
        let mut angle = self.position;
        let mut out = Vec::with_capacity((delta.abs() / JOINT_STEP_DEG).ceil() as usize + 1);
        while (target - angle).abs() > JOINT_STEP_DEG {
            angle += step;
            out.push(angle);
        }
        out.push(target);
        out
    }

    /// Preset angle for a lift preset. `None` on the gripper.
    pub fn lift_angle(&self, preset: LiftPreset) -> Option<f64> {
        match (self.presets, preset) {
            (Presets::Lift { up, .. }, LiftPreset::Up) => Some(up),
            (Presets::Lift { mid, .. }, LiftPreset::Mid) => Some(mid),
            (Presets::Lift { down, .. }, LiftPreset::Down) => Some(down),
            (Presets::Gripper { .. }, _) => None,
        }
    }

    /// Preset angle for a gripper preset. `None` on the lift.
    pub fn grip_angle(&self, preset: GripPreset) -> Option<f64> {
        match (self.presets, preset) {
            (Presets::Gripper { open, .. }, GripPreset::Open) => Some(open),
            (Presets::Gripper { closed, .. }, GripPreset::Close) => Some(closed),
            (Presets::Lift { .. }, _) => None,
        }
    }

    pub fn bucket(&self) -> JointBucket {
        let p = self.position;
        match self.presets {
            Presets::Lift { up, down, .. } => {
                if p >= up - PRESET_TOLERANCE_DEG {
                    JointBucket::Up
                } else if p <= down + PRESET_TOLERANCE_DEG {
                    JointBucket::Down
                } else {
                    JointBucket::Mid
                }
            }
            Presets::Gripper { open, closed } => {
                // The gripper span is narrow; keep the buckets apart.
                let tol = PRESET_TOLERANCE_DEG.min((closed - open) / 3.0);
                if p <= open + tol {
                    JointBucket::Open
                } else if p >= closed - tol {
                    JointBucket::Closed
                } else {
                    JointBucket::Partial
                }
            }
        }
    }

    pub fn status(&self) -> JointStatus {
        JointStatus {
            joint: self.spec.kind,
            position_deg: self.position,
            bucket: self.bucket(),
            rate_deg_s: self.rate_deg_s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lift() -> Joint {
        Joint::lift(&LiftConfig::default(), 30.0)
    }

    fn gripper() -> Joint {
        Joint::gripper(&GripperConfig::default(), 30.0)
    }

    #[test]
    fn path_steps_and_lands_on_target() {
        let mut j = lift();
        j.set_position(10.0);
        let path = j.path(17.0);
        assert_eq!(path, vec![12.0, 14.0, 16.0, 17.0]);

        let down = j.path(5.0);
        assert_eq!(down, vec![8.0, 6.0, 5.0]);
        assert!(j.path(10.0).is_empty());
    }

    #[test]
    fn step_delay_follows_rate() {
        let mut j = lift();
        assert_eq!(j.step_delay(), Duration::from_secs_f64(2.0 / 30.0));
        assert!(j.set_rate(60.0));
        assert_eq!(j.step_delay(), Duration::from_secs_f64(2.0 / 60.0));
        assert!(!j.set_rate(0.0));
        assert!(!j.set_rate(f64::NAN));
        assert!(!j.set_rate(1e-300));
        assert_eq!(j.rate(), 60.0);
    }

    #[test]
    fn unchecked_rate_and_range_do_not_panic() {
        let j = Joint::lift(&LiftConfig::default(), 1e-300);
        assert_eq!(j.step_delay(), Duration::from_secs(20));

        let inverted = GripperConfig {
            open_deg: 20.0,
            closed_deg: 10.0,
            ..GripperConfig::default()
        };
        let g = Joint::gripper(&inverted, 30.0);
        assert_eq!(g.clip(15.0), 20.0);
    }

    #[test]
    fn gripper_range_ends_at_clamp() {
        let g = gripper();
        assert_eq!(g.clip(90.0), GripperConfig::default().closed_deg);
        assert_eq!(g.clip(-10.0), 0.0);
        assert_eq!(g.spec().full_scale_deg, 180.0);
    }

    #[test]
    fn lift_buckets() {
        let mut j = lift();
        assert_eq!(j.bucket(), JointBucket::Up);
        j.set_position(271.0);
        assert_eq!(j.bucket(), JointBucket::Up);
        j.set_position(137.0);
        assert_eq!(j.bucket(), JointBucket::Mid);
        j.set_position(4.0);
        assert_eq!(j.bucket(), JointBucket::Down);
    }

    #[test]
    fn gripper_buckets() {
        let mut g = gripper();
        assert_eq!(g.bucket(), JointBucket::Open);
        g.set_position(2.5);
        assert_eq!(g.bucket(), JointBucket::Partial);
        g.set_position(5.0);
        assert_eq!(g.bucket(), JointBucket::Closed);
    }

    #[test]
    fn presets_belong_to_their_joint() {
        assert_eq!(lift().lift_angle(LiftPreset::Mid), Some(137.0));
        assert_eq!(lift().grip_angle(GripPreset::Open), None);
        assert_eq!(gripper().grip_angle(GripPreset::Close), Some(5.0));
        assert_eq!(gripper().lift_angle(LiftPreset::Up), None);
    }
}
