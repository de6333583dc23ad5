//! Workspace-wide constants and defaults.
//!
//! Single source of truth for protocol bytes, timing defaults and joint
//! ranges. Config `default_*` functions read from here.

use std::time::Duration;

// ─── Wire protocol ──────────────────────────────────────────────────

/// Out-of-band feed hold / emergency stop byte.
pub const ESTOP_BYTE: u8 = b'!';

/// Real-time status probe byte.
pub const STATUS_PROBE_BYTE: u8 = b'?';

/// Cycle start / resume.
pub const CYCLE_START_BYTE: u8 = b'~';

/// Soft reset (Ctrl-X). Discards held motion.
pub const SOFT_RESET_BYTE: u8 = 0x18;

/// Spindle/laser off, sent on disconnect when keep-alive was active.
pub const CMD_KEEP_ALIVE_OFF: &str = "M5";

/// Unlock command (clears alarm lock).
pub const CMD_UNLOCK: &str = "$X";

/// Homing cycle.
pub const CMD_HOME: &str = "$H";

/// Millimetre units.
pub const CMD_MM_UNITS: &str = "G21";

/// Absolute positioning.
pub const CMD_ABSOLUTE: &str = "G90";

/// Default keep-alive line.
pub const DEFAULT_KEEP_ALIVE_CMD: &str = "M3 S1";

/// Maximum accepted line length from the controller.
pub const MAX_LINE_LEN: usize = 256;

// ─── Link timing ────────────────────────────────────────────────────

pub const DEFAULT_BAUD: u32 = 115_200;

/// Silence after which the controller is probed.
pub const DEFAULT_LIVENESS_THRESHOLD: Duration = Duration::from_secs(5);

/// Silence after a probe before the link is declared failed.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Supervisor tick.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_millis(500);

pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(8);

pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(25);

// ─── Motion ─────────────────────────────────────────────────────────

pub const DEFAULT_FEED_MIN: f64 = 100.0;
pub const DEFAULT_FEED_MAX: f64 = 5000.0;
pub const DEFAULT_FEED_RATE: f64 = 2000.0;

/// Slow feed for push moves.
pub const DEFAULT_PUSH_FEED: f64 = 300.0;
pub const DEFAULT_PUSH_DISTANCE_MM: f64 = 30.0;
/// Travel past one square width when pushing with the pusher tool.
pub const TOOL_PUSH_MARGIN_MM: f64 = 20.0;

// ─── Actuators ──────────────────────────────────────────────────────

pub const LIFT_MIN_DEG: f64 = 0.0;
pub const LIFT_MAX_DEG: f64 = 274.0;
pub const LIFT_UP_DEG: f64 = 274.0;
pub const LIFT_MID_DEG: f64 = 137.0;
pub const LIFT_DOWN_DEG: f64 = 0.0;

/// Full mechanical travel of the gripper.
pub const GRIPPER_TRAVEL_DEG: f64 = 90.0;
pub const GRIPPER_OPEN_DEG: f64 = 0.0;
/// Closed-end clamp; bounds grip force.
pub const GRIPPER_CLOSED_DEG: f64 = 5.0;

/// Tolerance used to bucket a joint angle into a named preset.
pub const PRESET_TOLERANCE_DEG: f64 = 5.0;

pub const DEFAULT_JOINT_RATE_DEG_S: f64 = 30.0;
pub const JOINT_STEP_DEG: f64 = 2.0;
/// Slowest accepted joint rate; one step then takes 20 s.
pub const MIN_JOINT_RATE_DEG_S: f64 = 0.1;

/// Pulse width range for hobby servos on the PWM class driver.
pub const SERVO_PULSE_MIN_US: u32 = 500;
pub const SERVO_PULSE_MAX_US: u32 = 2500;
pub const SERVO_PERIOD_NS: u64 = 20_000_000;

/// Angle mapped to the full pulse range on a standard 180° servo.
pub const SERVO_STANDARD_SCALE_DEG: f64 = 180.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gripper_clamp_below_travel() {
        assert!(GRIPPER_CLOSED_DEG <= GRIPPER_TRAVEL_DEG);
        assert!(GRIPPER_OPEN_DEG < GRIPPER_CLOSED_DEG);
    }

    #[test]
    fn lift_presets_inside_range() {
        for p in [LIFT_UP_DEG, LIFT_MID_DEG, LIFT_DOWN_DEG] {
            assert!((LIFT_MIN_DEG..=LIFT_MAX_DEG).contains(&p));
        }
    }

    #[test]
    fn timing_defaults_are_ordered() {
        assert!(DEFAULT_HEALTH_INTERVAL < DEFAULT_PROBE_TIMEOUT);
        assert!(DEFAULT_PROBE_TIMEOUT < DEFAULT_LIVENESS_THRESHOLD);
        assert!(DEFAULT_RECONNECT_BACKOFF <= DEFAULT_RECONNECT_BACKOFF_MAX);
        assert!(DEFAULT_FEED_MIN <= DEFAULT_FEED_RATE && DEFAULT_FEED_RATE <= DEFAULT_FEED_MAX);
    }
}
