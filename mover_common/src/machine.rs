//! `machine.toml`: the aggregate configuration for one mover instance.
//!
//! Only `[shared]` is conventionally present; every other section falls
//! back to defaults.
//!
//! ```toml
//! [shared]
//! service_name = "mover-01"
//!
//! [board]
//! ranks = 10
//! height_mm = 500.0
//! storage_layout = "top"
//!
//! [link]
//! port = "/dev/ttyACM0"
//!
//! [storage]
//! strategy = "by_color"
//!
//! [executor]
//! capture_fallback = "tool_push"
//! tool_holder = "a10"
//! ```

use crate::board::BoardGeometry;
use crate::config::{ConfigError, ConfigLoader, SharedConfig, ensure};
use crate::consts::{DEFAULT_FEED_RATE, DEFAULT_PUSH_DISTANCE_MM, DEFAULT_PUSH_FEED};
use crate::hal::config::{ActuatorsConfig, LinkConfig, SafetyLimits};
use crate::types::Square;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Placement policy for captured pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageStrategy {
    /// Closest free square to where the piece was captured.
    #[default]
    Nearest,
    /// White in the low-file half, black in the high-file half.
    ByColor,
    /// Pawns on the zoned rank, pieces elsewhere.
    ByType,
    /// Fill order by priority only.
    Chronological,
}

impl fmt::Display for StorageStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageStrategy::Nearest => "nearest",
            StorageStrategy::ByColor => "by_color",
            StorageStrategy::ByType => "by_type",
            StorageStrategy::Chronological => "chronological",
        };
        f.write_str(s)
    }
}

/// What the planner does when storage is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFallback {
    /// Fail the plan with `StorageFull`.
    #[default]
    None,
    /// Drop the piece on an empty edge square and push it off with the
    /// open gripper.
    EdgePush,
    /// Drop the piece on an empty edge square, then fetch the pusher tool
    /// from `executor.tool_holder` and sweep the piece off with it.
    ToolPush,
}

/// `[storage]` section.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub strategy: StorageStrategy,
}

fn default_feed_rate() -> f64 {
    DEFAULT_FEED_RATE
}

fn default_push_feed() -> f64 {
    DEFAULT_PUSH_FEED
}

fn default_push_distance() -> f64 {
    DEFAULT_PUSH_DISTANCE_MM
}

fn default_true() -> bool {
    true
}

fn default_motion_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_position_tolerance() -> f64 {
    0.5
}

fn default_grip_settle_ms() -> u64 {
    200
}

/// `[executor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Feed for square-to-square moves, mm/min.
    #[serde(default = "default_feed_rate")]
    pub feed_rate: f64,

    /// Feed for push moves, mm/min.
    #[serde(default = "default_push_feed")]
    pub push_feed: f64,

    #[serde(default = "default_push_distance")]
    pub push_distance_mm: f64,

    /// Wait for the controller to report Idle at the target after each move.
    #[serde(default = "default_true")]
    pub await_motion: bool,

    #[serde(default = "default_motion_timeout_ms")]
    pub motion_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-axis tolerance for "arrived at target", mm.
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance_mm: f64,

    /// Dwell after closing the gripper.
    #[serde(default = "default_grip_settle_ms")]
    pub grip_settle_ms: u64,

    #[serde(default)]
    pub capture_fallback: CaptureFallback,

    /// Storage square where the pusher tool rests. Required by `tool_push`.
    #[serde(default)]
    pub tool_holder: Option<Square>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            feed_rate: DEFAULT_FEED_RATE,
            push_feed: DEFAULT_PUSH_FEED,
            push_distance_mm: DEFAULT_PUSH_DISTANCE_MM,
            await_motion: true,
            motion_timeout_ms: default_motion_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            position_tolerance_mm: default_position_tolerance(),
            grip_settle_ms: default_grip_settle_ms(),
            capture_fallback: CaptureFallback::None,
            tool_holder: None,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, v) in [
            ("feed_rate", self.feed_rate),
            ("push_feed", self.push_feed),
            ("push_distance_mm", self.push_distance_mm),
            ("position_tolerance_mm", self.position_tolerance_mm),
        ] {
            ensure(v.is_finite() && v > 0.0, || {
                format!("executor.{name} must be positive (got {v})")
            })?;
        }
        ensure(self.poll_interval_ms > 0, || {
            "executor.poll_interval_ms must be greater than 0".into()
        })?;
        ensure(self.motion_timeout_ms >= self.poll_interval_ms, || {
            "executor.motion_timeout_ms must be at least one poll interval".into()
        })?;
        ensure(
            self.capture_fallback != CaptureFallback::ToolPush || self.tool_holder.is_some(),
            || "executor.capture_fallback = \"tool_push\" needs executor.tool_holder".into(),
        )
    }

    pub fn motion_timeout(&self) -> Duration {
        Duration::from_millis(self.motion_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grip_settle(&self) -> Duration {
        Duration::from_millis(self.grip_settle_ms)
    }
}

/// Everything in `machine.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub board: BoardGeometry,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub safety: SafetyLimits,
    #[serde(default)]
    pub actuators: ActuatorsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl MachineConfig {
    /// Validate every section, then cross-check the board against the
    /// travel envelope.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.board.validate()?;
        self.link.validate()?;
        self.safety.validate()?;
        self.actuators.validate()?;
        self.executor.validate()?;

        let b = &self.board;
        let s = &self.safety;
        ensure(
            s.x.contains(b.origin_x_mm)
                && s.x.contains(b.origin_x_mm + b.width_mm)
                && s.y.contains(b.origin_y_mm)
                && s.y.contains(b.origin_y_mm + b.height_mm),
            || "board extends outside the safety envelope".into(),
        )?;
        ensure(s.z.contains(self.link.travel_z_mm), || {
            format!(
                "link.travel_z_mm {} outside safety z range",
                self.link.travel_z_mm
            )
        })?;
        match self.executor.tool_holder {
            Some(holder) => ensure(b.is_storage_square(holder), || {
                format!("executor.tool_holder {holder} is not a storage square")
            }),
            None => Ok(()),
        }
    }

    /// Load `path` and validate it.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::StorageLayout;

    #[test]
    fn empty_file_yields_valid_defaults() {
        let cfg = MachineConfig::parse("").unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.storage.strategy, StorageStrategy::Nearest);
        assert_eq!(cfg.executor.capture_fallback, CaptureFallback::None);
    }

    #[test]
    fn sections_parse() {
        let cfg = MachineConfig::parse(
            r#"
[board]
ranks = 10
height_mm = 400.0
storage_layout = "top"

[storage]
strategy = "by_type"

[executor]
capture_fallback = "edge_push"
await_motion = false
"#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.board.storage_layout, StorageLayout::Top);
        assert_eq!(cfg.storage.strategy, StorageStrategy::ByType);
        assert_eq!(cfg.executor.capture_fallback, CaptureFallback::EdgePush);
        assert!(!cfg.executor.await_motion);
    }

    #[test]
    fn tool_push_needs_a_holder_in_storage() {
        let mut cfg = MachineConfig::parse(
            r#"
[board]
ranks = 10
height_mm = 400.0
storage_layout = "top"

[executor]
capture_fallback = "tool_push"
"#,
        )
        .unwrap();
        assert_eq!(cfg.executor.capture_fallback, CaptureFallback::ToolPush);
        assert!(cfg.validate().is_err());

        cfg.executor.tool_holder = Some("a4".parse().unwrap());
        assert!(cfg.validate().is_err());
        cfg.executor.tool_holder = Some("a10".parse().unwrap());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn board_outside_envelope_rejected() {
        let mut cfg = MachineConfig::default();
        cfg.board.origin_x_mm = 100.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn unknown_strategy_is_parse_error() {
        let result = MachineConfig::parse("[storage]\nstrategy = \"random\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
