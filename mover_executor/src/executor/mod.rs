//! Move execution.
//!
//! [`MoveExecutor`] turns a validated [`Move`] into an [`ExecutionPlan`]
//! and drives the link and actuators through it, one action at a time.
//!
//! # Per-move state machine
//!
//! ```text
//! Idle ──plan──► Planning ──execute──► Executing ──► Completed
//!                    │                     │
//!                    └────────► Failed ◄───┘
//! ```
//!
//! Plans run strictly one after another: the actuators are held for the
//! whole plan, so a second `execute` waits for the first to finish. The
//! only way to interrupt a running plan is the link's emergency stop.

mod execute;
pub mod plan;

use crate::storage::StorageAllocator;
use mover_common::board::BoardGeometry;
use mover_common::machine::ExecutorConfig;
use mover_common::types::{BoardOccupancy, Move, Position, Square};
use mover_hal::actuators::{Actuators, JointKind, JointStatus};
use mover_hal::link::{ConnectionState, Connector, Link};
use mover_hal::safety::SafetyViolation;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub use plan::{
    Action, BoundEffect, ExecutionPlan, PlanError, Planner, StorageEffect, castling_rook_squares,
};

/// Phase of the move currently handled by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MovePhase {
    #[default]
    Idle,
    Planning,
    Executing,
    Completed,
    Failed,
}

impl fmt::Display for MovePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MovePhase::Idle => "idle",
            MovePhase::Planning => "planning",
            MovePhase::Executing => "executing",
            MovePhase::Completed => "completed",
            MovePhase::Failed => "failed",
        })
    }
}

/// Why one action failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("{0} has no machine position")]
    OffBoard(Square),

    #[error("Safety limits: {0}")]
    Safety(#[from] SafetyViolation),

    #[error("Link refused the command")]
    Refused,

    #[error("Emergency stop latched")]
    EmergencyStop,

    #[error("Link not ready ({0})")]
    LinkNotReady(ConnectionState),

    #[error("Motion to {target} not confirmed within {timeout_ms} ms")]
    MotionTimeout { target: Position, timeout_ms: u64 },

    #[error("{0} actuator failed")]
    Actuator(JointKind),

    #[error("Push has no reference position")]
    NoReference,
}

/// A plan that stopped at `index`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Move {mv}: action {index} ({action}) failed: {error}")]
pub struct ExecutionError {
    pub mv: Move,
    pub index: usize,
    pub action: Action,
    pub error: ActionError,
}

/// A plan that ran to the end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    #[serde(rename = "move")]
    pub mv: Move,
    pub actions: usize,
    pub elapsed: Duration,
}

/// Progress notifications, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    PhaseChanged {
        #[serde(rename = "move")]
        mv: Move,
        phase: MovePhase,
    },
    ActionStarted {
        index: usize,
        total: usize,
        action: Action,
    },
    ActionCompleted {
        index: usize,
        total: usize,
        action: Action,
    },
    ActionFailed {
        index: usize,
        action: Action,
        error: String,
    },
    StorageUpdated(StorageEffect),
}

/// Plans and executes moves on one machine.
pub struct MoveExecutor<C: Connector> {
    link: Arc<Link<C>>,
    actuators: tokio::sync::Mutex<Actuators>,
    storage: Arc<StorageAllocator>,
    config: ExecutorConfig,
    phase: Mutex<MovePhase>,
    events: broadcast::Sender<ProgressEvent>,
}

impl<C: Connector> MoveExecutor<C> {
    pub fn new(
        link: Arc<Link<C>>,
        actuators: Actuators,
        storage: Arc<StorageAllocator>,
        config: ExecutorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        if let Some(holder) = config.tool_holder {
            if let Err(e) = storage.withhold(holder) {
                warn!(%holder, error = %e, "Tool holder square not withheld from storage");
            }
        }
        Self {
            link,
            actuators: tokio::sync::Mutex::new(actuators),
            storage,
            config,
            phase: Mutex::new(MovePhase::Idle),
            events,
        }
    }

    pub fn link(&self) -> &Arc<Link<C>> {
        &self.link
    }

    pub fn storage(&self) -> &Arc<StorageAllocator> {
        &self.storage
    }

    pub fn board(&self) -> &BoardGeometry {
        self.storage.board()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn phase(&self) -> MovePhase {
        *self.phase.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Joint status; waits for a running plan to finish.
    pub async fn joint_status(&self, kind: JointKind) -> JointStatus {
        self.actuators.lock().await.status(kind)
    }

    /// Build the action sequence for `mv`. Storage squares the plan needs
    /// are reserved now and released again if planning fails.
    pub fn plan(&self, mv: &Move, occupancy: &BoardOccupancy) -> Result<ExecutionPlan, PlanError> {
        self.set_phase(mv, MovePhase::Planning);
        let planner = Planner {
            board: self.storage.board(),
            storage: &self.storage,
            fallback: self.config.capture_fallback,
            push_distance_mm: self.config.push_distance_mm,
            tool_holder: self.config.tool_holder,
        };
        match planner.plan(mv, occupancy) {
            Ok(plan) => {
                info!(%mv, actions = plan.len(), "Move planned");
                Ok(plan)
            }
            Err(e) => {
                warn!(%mv, error = %e, "Move cannot be planned");
                self.set_phase(mv, MovePhase::Failed);
                Err(e)
            }
        }
    }

    /// Drop a plan without running it, undoing its reservations.
    pub fn discard(&self, plan: ExecutionPlan) {
        let (mv, _, effects) = plan.into_parts();
        plan::unwind(&self.storage, &effects);
        info!(%mv, "Plan discarded");
        self.set_phase(&mv, MovePhase::Idle);
    }

    /// Clear storage occupancy for a new game.
    pub fn reset(&self) {
        self.storage.reset();
        *self.phase.lock() = MovePhase::Idle;
        info!("Executor reset");
    }

    fn set_phase(&self, mv: &Move, phase: MovePhase) {
        let prev = std::mem::replace(&mut *self.phase.lock(), phase);
        if prev != phase {
            info!(%mv, from = %prev, to = %phase, "Move phase");
        }
        self.publish(ProgressEvent::PhaseChanged { mv: *mv, phase });
    }

    fn publish(&self, event: ProgressEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
