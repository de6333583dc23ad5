//! Mover Common Library
//!
//! Shared value types, board geometry and configuration loading for the
//! chess mover workspace.
//!
//! # Module Structure
//!
//! - [`types`] - Position, Square, Piece, Move, BoardOccupancy
//! - [`board`] - Board grid, storage layout and play area
//! - [`config`] - Configuration loading traits and the `[shared]` section
//! - [`hal`] - Link, safety and actuator configuration
//! - [`machine`] - `machine.toml` aggregate, storage and executor sections
//! - [`consts`] - Protocol bytes and defaults
//! - [`prelude`] - Common re-exports
//!
//! # Usage
//!
//! ```rust
//! use mover_common::prelude::*;
//!
//! let e4: Square = "e4".parse().unwrap();
//! let geometry = BoardGeometry::default();
//! assert!(geometry.is_playing_square(e4));
//! ```

pub mod board;
pub mod config;
pub mod consts;
pub mod hal;
pub mod machine;
pub mod prelude;
pub mod types;
