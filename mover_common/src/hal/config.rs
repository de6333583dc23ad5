//! Hardware configuration types.
//!
//! - `LinkConfig` - `[link]`: serial port, liveness, reconnect and feed limits
//! - `SafetyLimits` - `[safety]`: per-axis travel envelope
//! - `ActuatorsConfig` - `[actuators]`: joint driver, ranges and rates

use crate::config::{ConfigError, ensure};
use crate::consts::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

fn default_true() -> bool {
    true
}

fn default_liveness_ms() -> u64 {
    DEFAULT_LIVENESS_THRESHOLD.as_millis() as u64
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT.as_millis() as u64
}

fn default_health_interval_ms() -> u64 {
    DEFAULT_HEALTH_INTERVAL.as_millis() as u64
}

fn default_reconnect_attempts() -> u32 {
    DEFAULT_RECONNECT_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    DEFAULT_RECONNECT_BACKOFF.as_millis() as u64
}

fn default_backoff_max_ms() -> u64 {
    DEFAULT_RECONNECT_BACKOFF_MAX.as_millis() as u64
}

fn default_keep_alive_interval_ms() -> u64 {
    DEFAULT_KEEP_ALIVE_INTERVAL.as_millis() as u64
}

fn default_keep_alive_cmd() -> String {
    DEFAULT_KEEP_ALIVE_CMD.to_string()
}

// ─── Feed limits ────────────────────────────────────────────────────

fn default_feed_min() -> f64 {
    DEFAULT_FEED_MIN
}

fn default_feed_max() -> f64 {
    DEFAULT_FEED_MAX
}

/// Accepted feed-rate window in mm/min.
///
/// Requests outside the window are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedLimits {
    #[serde(default = "default_feed_min")]
    pub min_mm_min: f64,
    #[serde(default = "default_feed_max")]
    pub max_mm_min: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for FeedLimits {
    fn default() -> Self {
        Self {
            min_mm_min: DEFAULT_FEED_MIN,
            max_mm_min: DEFAULT_FEED_MAX,
            enabled: true,
        }
    }
}

impl FeedLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.min_mm_min.is_finite()
                && self.max_mm_min.is_finite()
                && self.min_mm_min > 0.0
                && self.min_mm_min <= self.max_mm_min,
            || {
                format!(
                    "feed limits must satisfy 0 < min <= max (got {}..{})",
                    self.min_mm_min, self.max_mm_min
                )
            },
        )
    }

    /// Clamp `feed` into the window. Returns the value to send and whether
    /// it differs from the request. Non-finite requests map to the minimum.
    pub fn clamp(&self, feed: f64) -> (f64, bool) {
        if !feed.is_finite() {
            return (self.min_mm_min, true);
        }
        if !self.enabled {
            return (feed, false);
        }
        let clamped = feed.clamp(self.min_mm_min, self.max_mm_min);
        (clamped, clamped != feed)
    }
}

// ─── Link ───────────────────────────────────────────────────────────

/// `[link]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial device path.
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Reconnect from the supervisor after the link fails.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Silence before a status probe is issued.
    #[serde(default = "default_liveness_ms")]
    pub liveness_threshold_ms: u64,

    /// Silence after a probe before the link goes to Error.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Supervisor tick.
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,

    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// First reconnect delay; doubles per attempt.
    #[serde(default = "default_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub reconnect_backoff_max_ms: u64,

    #[serde(default)]
    pub keep_alive: bool,

    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,

    #[serde(default = "default_keep_alive_cmd")]
    pub keep_alive_cmd: String,

    #[serde(default)]
    pub feed: FeedLimits,

    /// Carriage height used for square-to-square moves.
    #[serde(default)]
    pub travel_z_mm: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: DEFAULT_BAUD,
            auto_reconnect: true,
            liveness_threshold_ms: default_liveness_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            health_interval_ms: default_health_interval_ms(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_backoff_ms: default_backoff_ms(),
            reconnect_backoff_max_ms: default_backoff_max_ms(),
            keep_alive: false,
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            keep_alive_cmd: default_keep_alive_cmd(),
            feed: FeedLimits::default(),
            travel_z_mm: 0.0,
        }
    }
}

/// True when every word of `cmd` is one a controller runs without moving.
fn keep_alive_is_inert(cmd: &str) -> bool {
    let mut chars = cmd.chars().filter(|c| !c.is_whitespace()).peekable();
    let mut words = 0;
    while let Some(letter) = chars.next() {
        let mut number = String::new();
        while let Some(c) =
            chars.next_if(|c| c.is_ascii_digit() || matches!(*c, '.' | '-'))
        {
            number.push(c);
        }
        if number.parse::<f64>().is_err() {
            return false;
        }
        let inert = match letter.to_ascii_uppercase() {
            'M' | 'S' | 'P' | 'F' | 'N' => true,
            'G' => number.trim_start_matches('0') == "4",
            _ => false,
        };
        if !inert {
            return false;
        }
        words += 1;
    }
    words > 0
}

impl LinkConfig {
    /// # Validation Rules
    /// 1. baud > 0
    /// 2. health interval > 0 and shorter than both liveness and probe windows
    /// 3. backoff > 0 and backoff <= backoff max
    /// 4. keep-alive command is a single non-empty line of non-motion words
    /// 5. feed limits valid, travel z finite
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.baud > 0, || "link.baud must be greater than 0".into())?;
        ensure(self.health_interval_ms > 0, || {
            "link.health_interval_ms must be greater than 0".into()
        })?;
        ensure(
            self.health_interval_ms < self.liveness_threshold_ms
                && self.health_interval_ms < self.probe_timeout_ms,
            || {
                format!(
                    "link.health_interval_ms ({}) must be shorter than liveness ({}) and probe ({}) windows",
                    self.health_interval_ms, self.liveness_threshold_ms, self.probe_timeout_ms
                )
            },
        )?;
        ensure(
            self.reconnect_backoff_ms > 0
                && self.reconnect_backoff_ms <= self.reconnect_backoff_max_ms,
            || "link reconnect backoff must satisfy 0 < backoff <= backoff_max".into(),
        )?;
        ensure(
            !self.keep_alive_cmd.trim().is_empty()
                && !self.keep_alive_cmd.contains(['\n', '\r']),
            || "link.keep_alive_cmd must be a single non-empty line".into(),
        )?;
        ensure(keep_alive_is_inert(&self.keep_alive_cmd), || {
            format!(
                "link.keep_alive_cmd '{}' may only use M, S, P, F, N words and G4",
                self.keep_alive_cmd.trim()
            )
        })?;
        ensure(self.travel_z_mm.is_finite(), || {
            "link.travel_z_mm must be finite".into()
        })?;
        self.feed.validate()
    }

    pub fn liveness_threshold(&self) -> Duration {
        Duration::from_millis(self.liveness_threshold_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// Delay before reconnect attempt `attempt` (0-based): exponential,
    /// capped at the configured maximum.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .reconnect_backoff_ms
            .saturating_mul(factor)
            .min(self.reconnect_backoff_max_ms);
        Duration::from_millis(ms)
    }
}

// ─── Safety ─────────────────────────────────────────────────────────

/// Inclusive travel range of one axis, in mm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub min: f64,
    pub max: f64,
}

impl AxisLimits {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, v: f64) -> bool {
        v.is_finite() && v >= self.min && v <= self.max
    }

    fn validate(&self, axis: char) -> Result<(), ConfigError> {
        ensure(
            self.min.is_finite() && self.max.is_finite() && self.min <= self.max,
            || {
                format!(
                    "safety.{axis} must be finite with min <= max (got {}..{})",
                    self.min, self.max
                )
            },
        )
    }
}

fn default_xy_limits() -> AxisLimits {
    AxisLimits::new(0.0, 450.0)
}

fn default_z_limits() -> AxisLimits {
    AxisLimits::new(0.0, 100.0)
}

/// `[safety]` section: the machine's travel envelope.
///
/// ```toml
/// [safety]
/// x = { min = 0.0, max = 450.0 }
/// y = { min = 0.0, max = 450.0 }
/// z = { min = 0.0, max = 100.0 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    #[serde(default = "default_xy_limits")]
    pub x: AxisLimits,
    #[serde(default = "default_xy_limits")]
    pub y: AxisLimits,
    #[serde(default = "default_z_limits")]
    pub z: AxisLimits,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            x: default_xy_limits(),
            y: default_xy_limits(),
            z: default_z_limits(),
        }
    }
}

impl SafetyLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.x.validate('x')?;
        self.y.validate('y')?;
        self.z.validate('z')
    }

    /// Limits for each axis with its name, in x, y, z order.
    pub fn axes(&self) -> [(char, AxisLimits); 3] {
        [('x', self.x), ('y', self.y), ('z', self.z)]
    }
}

// ─── Actuators ──────────────────────────────────────────────────────

fn default_driver() -> String {
    "simulation".to_string()
}

fn default_rate() -> f64 {
    DEFAULT_JOINT_RATE_DEG_S
}

fn default_lift_min() -> f64 {
    LIFT_MIN_DEG
}

fn default_lift_max() -> f64 {
    LIFT_MAX_DEG
}

fn default_lift_up() -> f64 {
    LIFT_UP_DEG
}

fn default_lift_mid() -> f64 {
    LIFT_MID_DEG
}

fn default_lift_down() -> f64 {
    LIFT_DOWN_DEG
}

fn default_gripper_travel() -> f64 {
    GRIPPER_TRAVEL_DEG
}

fn default_gripper_open() -> f64 {
    GRIPPER_OPEN_DEG
}

fn default_gripper_closed() -> f64 {
    GRIPPER_CLOSED_DEG
}

fn default_lift_channel() -> u32 {
    0
}

fn default_gripper_channel() -> u32 {
    1
}

/// Lift joint: full range plus up/mid/down presets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiftConfig {
    #[serde(default = "default_lift_min")]
    pub min_deg: f64,
    #[serde(default = "default_lift_max")]
    pub max_deg: f64,
    #[serde(default = "default_lift_up")]
    pub up_deg: f64,
    #[serde(default = "default_lift_mid")]
    pub mid_deg: f64,
    #[serde(default = "default_lift_down")]
    pub down_deg: f64,
    /// Output channel on the joint driver.
    #[serde(default = "default_lift_channel")]
    pub channel: u32,
}

impl Default for LiftConfig {
    fn default() -> Self {
        Self {
            min_deg: LIFT_MIN_DEG,
            max_deg: LIFT_MAX_DEG,
            up_deg: LIFT_UP_DEG,
            mid_deg: LIFT_MID_DEG,
            down_deg: LIFT_DOWN_DEG,
            channel: default_lift_channel(),
        }
    }
}

/// Gripper joint.
///
/// `closed_deg` is the closed-end clamp and bounds grip force. It may not
/// exceed `travel_deg`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GripperConfig {
    /// Full mechanical travel.
    #[serde(default = "default_gripper_travel")]
    pub travel_deg: f64,
    #[serde(default = "default_gripper_open")]
    pub open_deg: f64,
    #[serde(default = "default_gripper_closed")]
    pub closed_deg: f64,
    #[serde(default = "default_gripper_channel")]
    pub channel: u32,
}

impl Default for GripperConfig {
    fn default() -> Self {
        Self {
            travel_deg: GRIPPER_TRAVEL_DEG,
            open_deg: GRIPPER_OPEN_DEG,
            closed_deg: GRIPPER_CLOSED_DEG,
            channel: default_gripper_channel(),
        }
    }
}

/// `[actuators]` section.
///
/// ```toml
/// [actuators]
/// driver = "sysfs_pwm"
/// rate_deg_s = 45.0
///
/// [actuators.gripper]
/// closed_deg = 6.0
///
/// [actuators.driver_config.sysfs_pwm]
/// chip = 0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorsConfig {
    /// Registered joint driver name.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Transition rate for both joints, degrees per second.
    #[serde(default = "default_rate")]
    pub rate_deg_s: f64,

    #[serde(default)]
    pub lift: LiftConfig,

    #[serde(default)]
    pub gripper: GripperConfig,

    /// Per-driver tables. Key = driver name.
    #[serde(default)]
    pub driver_config: HashMap<String, toml::Value>,
}

impl Default for ActuatorsConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            rate_deg_s: DEFAULT_JOINT_RATE_DEG_S,
            lift: LiftConfig::default(),
            gripper: GripperConfig::default(),
            driver_config: HashMap::new(),
        }
    }
}

impl ActuatorsConfig {
    /// # Validation Rules
    /// 1. rate finite and >= MIN_JOINT_RATE_DEG_S
    /// 2. lift range ordered, presets inside it
    /// 3. 0 <= open < closed <= travel for the gripper
    /// 4. lift and gripper use different channels
    ///
    /// A closed clamp that differs from the factory value is accepted with a
    /// warning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.rate_deg_s.is_finite() && self.rate_deg_s >= MIN_JOINT_RATE_DEG_S,
            || {
                format!(
                    "actuators.rate_deg_s must be at least {MIN_JOINT_RATE_DEG_S} (got {})",
                    self.rate_deg_s
                )
            },
        )?;

        let l = &self.lift;
        ensure(
            l.min_deg.is_finite() && l.max_deg.is_finite() && l.min_deg < l.max_deg,
            || format!("actuators.lift range invalid ({}..{})", l.min_deg, l.max_deg),
        )?;
        for (name, v) in [("up", l.up_deg), ("mid", l.mid_deg), ("down", l.down_deg)] {
            ensure(v >= l.min_deg && v <= l.max_deg, || {
                format!("actuators.lift.{name}_deg {v} outside {}..{}", l.min_deg, l.max_deg)
            })?;
        }

        let g = &self.gripper;
        ensure(g.travel_deg.is_finite() && g.travel_deg > 0.0, || {
            "actuators.gripper.travel_deg must be positive".into()
        })?;
        ensure(
            g.closed_deg <= g.travel_deg,
            || {
                format!(
                    "actuators.gripper.closed_deg {} exceeds mechanical travel {}",
                    g.closed_deg, g.travel_deg
                )
            },
        )?;
        ensure(g.open_deg >= 0.0 && g.open_deg < g.closed_deg, || {
            format!(
                "actuators.gripper requires 0 <= open_deg < closed_deg (got {} / {})",
                g.open_deg, g.closed_deg
            )
        })?;
        ensure(l.channel != g.channel, || {
            format!("actuators: lift and gripper share channel {}", l.channel)
        })?;

        if g.closed_deg != GRIPPER_CLOSED_DEG {
            warn!(
                closed_deg = g.closed_deg,
                default = GRIPPER_CLOSED_DEG,
                "Gripper closed clamp differs from the factory value; grip force changes"
            );
        }
        Ok(())
    }

    /// The driver-specific table for `name`, if any.
    pub fn driver_table(&self, name: &str) -> Option<&toml::Value> {
        self.driver_config.get(name)
    }
}
