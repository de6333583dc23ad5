//! Common re-exports.
//!
//! ```rust
//! use mover_common::prelude::*;
//! ```

// ─── Value types ────────────────────────────────────────────────────
pub use crate::types::{BoardOccupancy, Color, Move, Piece, PieceType, Position, Square};

// ─── Geometry ───────────────────────────────────────────────────────
pub use crate::board::{BoardGeometry, Direction, PlayArea, StorageLayout};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::hal::config::{
    ActuatorsConfig, AxisLimits, FeedLimits, GripperConfig, LiftConfig, LinkConfig, SafetyLimits,
};
pub use crate::machine::{
    CaptureFallback, ExecutorConfig, MachineConfig, StorageConfig, StorageStrategy,
};
