//! Move planning.
//!
//! A plan is an immutable list of [`Action`]s plus the storage effects the
//! plan will realize, each bound to the index of the action that physically
//! causes it. Every physical transfer is the same six-step carry:
//!
//! ```text
//! MoveTo(src) → Grip(close) → Lift(up) → MoveTo(dst) → Lift(down) → Grip(open)
//! ```

use crate::storage::{StorageAllocator, StorageError};
use mover_common::board::{BoardGeometry, Direction};
use mover_common::consts::TOOL_PUSH_MARGIN_MM;
use mover_common::machine::CaptureFallback;
use mover_common::types::{BoardOccupancy, Color, Move, Piece, PieceType, Square};
use mover_hal::actuators::{GripPreset, LiftPreset};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// One plan step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", content = "args", rename_all = "snake_case")]
pub enum Action {
    MoveTo(Square),
    Lift(LiftPreset),
    Grip(GripPreset),
    /// Relative move from the last commanded position.
    Push { direction: Direction, distance_mm: f64 },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::MoveTo(sq) => write!(f, "move_to {sq}"),
            Action::Lift(p) => write!(f, "lift {p}"),
            Action::Grip(p) => write!(f, "grip {p}"),
            Action::Push {
                direction,
                distance_mm,
            } => write!(f, "push {direction} {distance_mm:.1} mm"),
        }
    }
}

/// Storage change realized by one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum StorageEffect {
    /// A reserved square receives its piece.
    Deposit { square: Square, piece: Piece },
    /// A claimed piece leaves its square.
    Withdraw { square: Square, piece: Piece },
}

impl StorageEffect {
    pub fn square(&self) -> Square {
        match self {
            StorageEffect::Deposit { square, .. } | StorageEffect::Withdraw { square, .. } => {
                *square
            }
        }
    }
}

/// A storage effect and the action index that realizes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundEffect {
    pub action: usize,
    pub effect: StorageEffect,
}

/// Why a move could not be planned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("{0} is not a playing square")]
    NotPlayable(Square),

    #[error("No piece on {0}")]
    EmptySource(Square),

    #[error("Destination {0} is occupied")]
    DestinationOccupied(Square),

    #[error("No piece to capture on {0}")]
    NothingToCapture(Square),

    #[error("Castling rook not found on {0}")]
    NoCastlingRook(Square),

    #[error("Cannot promote to {0}")]
    InvalidPromotion(PieceType),

    #[error("Storage full: nowhere to put {0}")]
    StorageFull(Piece),

    #[error("Promotion piece unavailable: no {color} {kind} in storage")]
    PromotionUnavailable { kind: PieceType, color: Color },
}

/// Ordered actions realizing one move. Consumed by execution.
#[derive(Debug, Serialize)]
pub struct ExecutionPlan {
    #[serde(rename = "move")]
    mv: Move,
    actions: Vec<Action>,
    effects: Vec<BoundEffect>,
}

impl ExecutionPlan {
    pub fn mv(&self) -> &Move {
        &self.mv
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn effects(&self) -> &[BoundEffect] {
        &self.effects
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Move, Vec<Action>, Vec<BoundEffect>) {
        (self.mv, self.actions, self.effects)
    }
}

/// Undo the storage side of effects that never happened.
pub(crate) fn unwind(storage: &StorageAllocator, effects: &[BoundEffect]) {
    for bound in effects {
        let square = bound.effect.square();
        if let Err(e) = storage.cancel(square) {
            warn!(%square, error = %e, "Storage transition not undone");
        }
    }
}

/// Rook origin and landing square for a castling king move. The rook
/// starts in the play-area corner on the king's side and lands next to the
/// king, on the inside.
pub fn castling_rook_squares(board: &BoardGeometry, king_move: &Move) -> (Square, Square) {
    let area = board.play_area();
    let rank = king_move.from.rank;
    if king_move.to.file > king_move.from.file {
        (
            Square::new(area.max_file, rank),
            Square::new(king_move.to.file.saturating_sub(1), rank),
        )
    } else {
        (
            Square::new(area.min_file, rank),
            Square::new(king_move.to.file + 1, rank),
        )
    }
}

/// Builds plans against one storage allocator.
pub struct Planner<'a> {
    pub board: &'a BoardGeometry,
    pub storage: &'a StorageAllocator,
    pub fallback: CaptureFallback,
    pub push_distance_mm: f64,
    /// Rest square of the pusher tool, for `CaptureFallback::ToolPush`.
    pub tool_holder: Option<Square>,
}

struct Draft {
    actions: Vec<Action>,
    effects: Vec<BoundEffect>,
    /// Edge squares already used for pushes, plus squares the move lands on.
    blocked: Vec<Square>,
}

/// Action indices inside one carry.
struct Carry {
    picked_up: usize,
    set_down: usize,
}

impl Draft {
    fn carry(&mut self, src: Square, dst: Square) -> Carry {
        let base = self.actions.len();
        self.actions.extend([
            Action::MoveTo(src),
            Action::Grip(GripPreset::Close),
            Action::Lift(LiftPreset::Up),
            Action::MoveTo(dst),
            Action::Lift(LiftPreset::Down),
            Action::Grip(GripPreset::Open),
        ]);
        Carry {
            picked_up: base + 2,
            set_down: base + 5,
        }
    }

    fn bind(&mut self, action: usize, effect: StorageEffect) {
        self.effects.push(BoundEffect { action, effect });
    }
}

impl Planner<'_> {
    /// Plan `mv` against `occupancy`. On error every reservation made so
    /// far is undone.
    pub fn plan(&self, mv: &Move, occupancy: &BoardOccupancy) -> Result<ExecutionPlan, PlanError> {
        let mut draft = Draft {
            actions: Vec::new(),
            effects: Vec::new(),
            blocked: vec![mv.to],
        };
        match self.build(mv, occupancy, &mut draft) {
            Ok(()) => {
                debug!(
                    %mv,
                    actions = draft.actions.len(),
                    effects = draft.effects.len(),
                    "Plan built"
                );
                Ok(ExecutionPlan {
                    mv: *mv,
                    actions: draft.actions,
                    effects: draft.effects,
                })
            }
            Err(e) => {
                unwind(self.storage, &draft.effects);
                Err(e)
            }
        }
    }

    fn build(&self, mv: &Move, occ: &BoardOccupancy, draft: &mut Draft) -> Result<(), PlanError> {
        for sq in [mv.from, mv.to] {
            if !self.board.is_playing_square(sq) {
                return Err(PlanError::NotPlayable(sq));
            }
        }
        let mover = occ.get(mv.from).ok_or(PlanError::EmptySource(mv.from))?;

        if mv.is_castle {
            return self.castle(mv, mover, occ, draft);
        }

        let captured_on = if mv.is_en_passant {
            Some(Square::new(mv.to.file, mv.from.rank))
        } else if mv.is_capture {
            Some(mv.to)
        } else {
            None
        };
        let destination_must_be_empty = mv.is_en_passant || !mv.is_capture;
        if destination_must_be_empty && occ.get(mv.to).is_some() {
            return Err(PlanError::DestinationOccupied(mv.to));
        }

        if let Some(sq) = captured_on {
            let victim = occ.get(sq).ok_or(PlanError::NothingToCapture(sq))?;
            self.remove(victim, sq, occ, draft)?;
        }

        match mv.promotion {
            Some(kind) => self.promote(mv, mover, kind, occ, draft),
            None => {
                draft.carry(mv.from, mv.to);
                Ok(())
            }
        }
    }

    /// King first, then the rook.
    fn castle(
        &self,
        mv: &Move,
        king: Piece,
        occ: &BoardOccupancy,
        draft: &mut Draft,
    ) -> Result<(), PlanError> {
        let (rook_from, rook_to) = castling_rook_squares(self.board, mv);

        match occ.get(rook_from) {
            Some(p) if p.kind == PieceType::Rook && p.color == king.color => {}
            _ => return Err(PlanError::NoCastlingRook(rook_from)),
        }
        for sq in [mv.to, rook_to] {
            if occ.get(sq).is_some() {
                return Err(PlanError::DestinationOccupied(sq));
            }
        }

        draft.carry(mv.from, mv.to);
        draft.carry(rook_from, rook_to);
        Ok(())
    }

    /// Pawn to storage, then the promoted piece from storage to the
    /// destination.
    fn promote(
        &self,
        mv: &Move,
        pawn: Piece,
        kind: PieceType,
        occ: &BoardOccupancy,
        draft: &mut Draft,
    ) -> Result<(), PlanError> {
        if matches!(kind, PieceType::Pawn | PieceType::King) {
            return Err(PlanError::InvalidPromotion(kind));
        }
        let color = pawn.color;
        let stored = self
            .storage
            .claim(kind, color)
            .map_err(|_| PlanError::PromotionUnavailable { kind, color })?;

        if let Err(e) = self.remove(pawn, mv.from, occ, draft) {
            if let Err(c) = self.storage.cancel(stored) {
                warn!(square = %stored, error = %c, "Claim not undone");
            }
            return Err(e);
        }
        let carry = draft.carry(stored, mv.to);
        draft.bind(
            carry.picked_up,
            StorageEffect::Withdraw {
                square: stored,
                piece: Piece::new(kind, color),
            },
        );
        Ok(())
    }

    /// Carry `piece` off `from` into storage, or push it off the board.
    fn remove(
        &self,
        piece: Piece,
        from: Square,
        occ: &BoardOccupancy,
        draft: &mut Draft,
    ) -> Result<(), PlanError> {
        match self.storage.assign(piece, from) {
            Ok(slot) => {
                let carry = draft.carry(from, slot);
                draft.bind(
                    carry.set_down,
                    StorageEffect::Deposit {
                        square: slot,
                        piece,
                    },
                );
                Ok(())
            }
            Err(StorageError::Full(_)) if self.fallback != CaptureFallback::None => {
                let tool = match self.fallback {
                    CaptureFallback::ToolPush => {
                        Some(self.tool_holder.ok_or(PlanError::StorageFull(piece))?)
                    }
                    _ => None,
                };
                let (edge, direction) = self
                    .edge_target(from, occ, &draft.blocked)
                    .ok_or(PlanError::StorageFull(piece))?;
                debug!(%piece, %from, %edge, %direction, "Storage full; pushing off the edge");
                draft.blocked.push(edge);
                draft.carry(from, edge);
                match tool {
                    Some(holder) => self.tool_push(holder, edge, direction, draft),
                    None => draft.actions.push(Action::Push {
                        direction,
                        distance_mm: self.push_distance_mm,
                    }),
                }
                Ok(())
            }
            Err(_) => Err(PlanError::StorageFull(piece)),
        }
    }

    /// Fetch the pusher tool, sweep `edge` one square plus a margin in
    /// `direction`, and put the tool back.
    fn tool_push(&self, holder: Square, edge: Square, direction: Direction, draft: &mut Draft) {
        let square = match direction {
            Direction::North | Direction::South => self.board.square_size_y(),
            Direction::East | Direction::West => self.board.square_size_x(),
        };
        draft.actions.extend([
            Action::Lift(LiftPreset::Up),
            Action::MoveTo(holder),
            Action::Lift(LiftPreset::Down),
            Action::Grip(GripPreset::Close),
            Action::Lift(LiftPreset::Up),
            Action::MoveTo(edge),
            Action::Lift(LiftPreset::Down),
            Action::Push {
                direction,
                distance_mm: square + TOOL_PUSH_MARGIN_MM,
            },
            Action::Lift(LiftPreset::Up),
            Action::MoveTo(holder),
            Action::Lift(LiftPreset::Down),
            Action::Grip(GripPreset::Open),
            Action::Lift(LiftPreset::Up),
        ]);
    }

    /// Empty playing square with an off-grid exit for `origin`'s piece.
    ///
    /// Grid corners come first, then Manhattan distance, then square order.
    fn edge_target(
        &self,
        origin: Square,
        occ: &BoardOccupancy,
        blocked: &[Square],
    ) -> Option<(Square, Direction)> {
        self.board
            .push_squares()
            .filter(|(sq, _)| occ.get(*sq).is_none() && !blocked.contains(sq))
            .min_by_key(|(sq, _)| (!self.board.is_grid_corner(*sq), sq.manhattan(&origin), *sq))
    }
}
