//! Plan execution: one action at a time, aborting on the first failure.

use super::plan::{self, Action, BoundEffect, ExecutionPlan, StorageEffect};
use super::{ActionError, ExecutionError, ExecutionReport, MoveExecutor, MovePhase, ProgressEvent};
use mover_common::types::Position;
use mover_hal::actuators::{Actuators, GripPreset, JointKind};
use mover_hal::link::protocol::RunState;
use mover_hal::link::{ConnectionState, Connector};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Copy)]
enum Stroke {
    Rapid,
    Linear,
}

impl<C: Connector> MoveExecutor<C> {
    /// Run `plan` to completion or to its first failing action.
    ///
    /// Storage effects are applied as the actions that realize them
    /// succeed. On failure, effects bound to the failed action or later are
    /// undone; nothing already done is rolled back.
    pub async fn execute(&self, plan: ExecutionPlan) -> Result<ExecutionReport, ExecutionError> {
        let (mv, actions, effects) = plan.into_parts();
        let mut actuators = self.actuators.lock().await;
        self.set_phase(&mv, MovePhase::Executing);

        let started = Instant::now();
        let total = actions.len();
        let mut last_target = self.link.position();

        for (index, action) in actions.iter().copied().enumerate() {
            self.publish(ProgressEvent::ActionStarted {
                index,
                total,
                action,
            });
            debug!(%mv, index, %action, "Action started");

            if let Err(error) = self.run_action(&mut actuators, action, &mut last_target).await {
                warn!(%mv, index, %action, %error, "Action failed; plan aborted");
                self.publish(ProgressEvent::ActionFailed {
                    index,
                    action,
                    error: error.to_string(),
                });
                let pending: Vec<BoundEffect> = effects
                    .iter()
                    .filter(|b| b.action >= index)
                    .copied()
                    .collect();
                plan::unwind(&self.storage, &pending);
                self.set_phase(&mv, MovePhase::Failed);
                return Err(ExecutionError {
                    mv,
                    index,
                    action,
                    error,
                });
            }

            for bound in effects.iter().filter(|b| b.action == index) {
                self.apply(bound.effect);
            }
            self.publish(ProgressEvent::ActionCompleted {
                index,
                total,
                action,
            });
        }

        let elapsed = started.elapsed();
        self.set_phase(&mv, MovePhase::Completed);
        info!(%mv, actions = total, elapsed_ms = elapsed.as_millis() as u64, "Move completed");
        Ok(ExecutionReport {
            mv,
            actions: total,
            elapsed,
        })
    }

    async fn run_action(
        &self,
        actuators: &mut Actuators,
        action: Action,
        last_target: &mut Option<Position>,
    ) -> Result<(), ActionError> {
        if self.link.is_emergency_stopped() {
            return Err(ActionError::EmergencyStop);
        }
        match action {
            Action::MoveTo(square) => {
                let z = self.link.config().travel_z_mm;
                let target = self
                    .board()
                    .square_position(square, z)
                    .ok_or(ActionError::OffBoard(square))?;
                self.travel(target, self.config.feed_rate, Stroke::Rapid).await?;
                *last_target = Some(target);
            }
            Action::Lift(preset) => {
                if !actuators.lift(preset).await {
                    return Err(ActionError::Actuator(JointKind::Lift));
                }
            }
            Action::Grip(preset) => {
                if !actuators.grip(preset).await {
                    return Err(ActionError::Actuator(JointKind::Gripper));
                }
                if preset == GripPreset::Close {
                    tokio::time::sleep(self.config.grip_settle()).await;
                }
            }
            Action::Push {
                direction,
                distance_mm,
            } => {
                let base = last_target.ok_or(ActionError::NoReference)?;
                let (ux, uy) = direction.unit();
                let target = base.offset(ux * distance_mm, uy * distance_mm, 0.0);
                self.travel(target, self.config.push_feed, Stroke::Linear).await?;
                *last_target = Some(target);
            }
        }
        Ok(())
    }

    async fn travel(&self, target: Position, feed: f64, stroke: Stroke) -> Result<(), ActionError> {
        self.link.gate().validate(&target)?;
        let accepted = match stroke {
            Stroke::Rapid => self.link.rapid_to(target, feed).await,
            Stroke::Linear => self.link.linear_to(target, feed).await,
        };
        if !accepted {
            return Err(self.refusal());
        }
        if self.config.await_motion {
            self.await_arrival(target).await?;
        }
        Ok(())
    }

    /// Poll status until the controller is Idle at `target`.
    async fn await_arrival(&self, target: Position) -> Result<(), ActionError> {
        let poll = self.config.poll_interval();
        let tolerance = self.config.position_tolerance_mm;
        let deadline = Instant::now() + self.config.motion_timeout();
        loop {
            if self.link.is_emergency_stopped() {
                return Err(ActionError::EmergencyStop);
            }
            let state = self.link.state();
            if state != ConnectionState::Connected {
                return Err(ActionError::LinkNotReady(state));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ActionError::MotionTimeout {
                    target,
                    timeout_ms: self.config.motion_timeout_ms,
                });
            }
            if let Some(pos) = self.link.wait_for_position(remaining.min(poll)).await {
                let idle = self.link.snapshot().run_state == RunState::Idle;
                if idle && pos.max_axis_distance(&target) <= tolerance {
                    debug!(%target, "Arrived");
                    return Ok(());
                }
                tokio::time::sleep(remaining.min(poll)).await;
            }
        }
    }

    fn refusal(&self) -> ActionError {
        if self.link.is_emergency_stopped() {
            return ActionError::EmergencyStop;
        }
        match self.link.state() {
            ConnectionState::Connected => ActionError::Refused,
            other => ActionError::LinkNotReady(other),
        }
    }

    fn apply(&self, effect: StorageEffect) {
        let result = match effect {
            StorageEffect::Deposit { square, .. } => self.storage.confirm(square),
            StorageEffect::Withdraw { square, .. } => self.storage.release(square).map(|_| ()),
        };
        match result {
            Ok(()) => self.publish(ProgressEvent::StorageUpdated(effect)),
            Err(e) => warn!(?effect, error = %e, "Storage effect not applied"),
        }
    }
}
