//! # Mover Executor
//!
//! Captured-piece storage and chess move execution on top of `mover_hal`.
//!
//! # Module Structure
//!
//! - [`storage`] - storage map, placement strategies, reservations
//! - [`executor`] - move planning and sequential plan execution
//!
//! # Flow
//!
//! ```text
//!  Move + BoardOccupancy
//!          │
//!          ▼
//!   MoveExecutor::plan ──assign / claim──► StorageAllocator
//!          │
//!          ▼ ExecutionPlan
//!   MoveExecutor::execute ──► Link (G-code)   Actuators (lift, gripper)
//!          │
//!          ▼
//!   ProgressEvent stream, ExecutionReport | ExecutionError
//! ```

pub mod executor;
pub mod storage;

pub use crate::executor::{
    Action, ActionError, ExecutionError, ExecutionPlan, ExecutionReport, MoveExecutor, MovePhase,
    PlanError, ProgressEvent,
};
pub use crate::storage::{SlotState, StorageAllocator, StorageError, StorageSlot, StorageStats};
