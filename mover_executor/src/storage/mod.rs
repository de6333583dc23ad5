//! Captured-piece storage.
//!
//! [`StorageAllocator`] owns the storage map: every off-play square of the
//! board grid with its fill priority, zone and slot state. It is the single
//! source of truth for where captured pieces are.
//!
//! # Slot lifecycle
//!
//! ```text
//!            assign             confirm
//!   Free ───────────► Reserved ─────────► Occupied
//!    ▲                   │ cancel            │ claim
//!    └───────────────────┘                   ▼
//!    ▲          release               Departing
//!    └───────────────────────────────────────┘
//! ```
//!
//! A slot has an occupant only while a piece is physically there
//! (`Occupied` or `Departing`). Selection and reservation happen under one
//! lock, so two callers can never be handed the same square.

pub mod strategy;

use mover_common::board::BoardGeometry;
use mover_common::machine::StorageStrategy;
use mover_common::types::{BoardOccupancy, Color, Piece, PieceType, Square};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Storage failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Storage full: no free square for {0}")]
    Full(Piece),

    #[error("{0} is not a storage square")]
    NotStorage(Square),

    #[error("No {color} {kind} in storage")]
    NotFound { kind: PieceType, color: Color },

    #[error("Storage square {square} is {state}, expected {expected}")]
    InvalidState {
        square: Square,
        state: &'static str,
        expected: &'static str,
    },
}

/// Occupancy of one storage square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "piece", rename_all = "snake_case")]
pub enum SlotState {
    Free,
    /// Promised to a piece that has not arrived yet.
    Reserved(Piece),
    Occupied(Piece),
    /// Still present, promised to a plan that will take it away.
    Departing(Piece),
}

impl SlotState {
    pub fn name(&self) -> &'static str {
        match self {
            SlotState::Free => "free",
            SlotState::Reserved(_) => "reserved",
            SlotState::Occupied(_) => "occupied",
            SlotState::Departing(_) => "departing",
        }
    }
}

/// One square of the storage map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageSlot {
    pub square: Square,
    pub priority: u32,
    /// Set under the by-color strategy.
    pub color_zone: Option<Color>,
    /// Set under the by-type strategy.
    pub type_zone: Option<PieceType>,
    pub state: SlotState,
}

impl StorageSlot {
    /// The piece physically on this square.
    pub fn occupant(&self) -> Option<Piece> {
        match self.state {
            SlotState::Occupied(p) | SlotState::Departing(p) => Some(p),
            SlotState::Free | SlotState::Reserved(_) => None,
        }
    }
}

/// Storage usage summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub total: usize,
    pub occupied: usize,
    pub reserved: usize,
    pub available: usize,
    pub utilization_pct: f64,
    pub per_color: BTreeMap<Color, usize>,
    pub per_type: BTreeMap<PieceType, usize>,
    pub strategy: StorageStrategy,
}

struct StorageMap {
    strategy: StorageStrategy,
    slots: Vec<StorageSlot>,
}

impl StorageMap {
    fn index(&self, square: Square) -> Result<usize, StorageError> {
        self.slots
            .iter()
            .position(|s| s.square == square)
            .ok_or(StorageError::NotStorage(square))
    }

    /// Lowest priority, then square order, among pieces at rest.
    fn find(&self, kind: PieceType, color: Color) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == SlotState::Occupied(Piece::new(kind, color)))
            .min_by_key(|(_, s)| (s.priority, s.square))
            .map(|(i, _)| i)
    }
}

/// Allocator over the storage squares of one board.
pub struct StorageAllocator {
    board: BoardGeometry,
    map: Mutex<StorageMap>,
}

impl StorageAllocator {
    /// Build the storage map for `board`. All slots start free.
    pub fn new(board: BoardGeometry, strategy: StorageStrategy) -> Self {
        let mut slots: Vec<StorageSlot> = board
            .storage_squares()
            .into_iter()
            .map(|square| StorageSlot {
                square,
                priority: strategy::priority(&board, square),
                color_zone: None,
                type_zone: None,
                state: SlotState::Free,
            })
            .collect();
        apply_zones(&board, strategy, &mut slots);
        info!(
            layout = %board.storage_layout,
            squares = slots.len(),
            %strategy,
            "Storage map built"
        );
        Self {
            board,
            map: Mutex::new(StorageMap { strategy, slots }),
        }
    }

    pub fn board(&self) -> &BoardGeometry {
        &self.board
    }

    pub fn strategy(&self) -> StorageStrategy {
        self.map.lock().strategy
    }

    /// Switch strategy and recompute zones. Slot states are kept.
    pub fn set_strategy(&self, strategy: StorageStrategy) {
        let mut map = self.map.lock();
        map.strategy = strategy;
        apply_zones(&self.board, strategy, &mut map.slots);
        info!(%strategy, "Storage strategy changed");
    }

    // ─── Allocation ─────────────────────────────────────────────────

    /// Reserve the best free square for `piece`, captured on `vacated`.
    pub fn assign(&self, piece: Piece, vacated: Square) -> Result<Square, StorageError> {
        let mut map = self.map.lock();
        let strategy = map.strategy;
        let Some(idx) = strategy::select(strategy, &map.slots, piece, vacated) else {
            warn!(%piece, %vacated, %strategy, "No storage square available");
            return Err(StorageError::Full(piece));
        };
        let slot = &mut map.slots[idx];
        slot.state = SlotState::Reserved(piece);
        debug!(%piece, square = %slot.square, %strategy, "Storage square reserved");
        Ok(slot.square)
    }

    /// The reserved piece has been set down on `square`.
    pub fn confirm(&self, square: Square) -> Result<(), StorageError> {
        let mut map = self.map.lock();
        let idx = map.index(square)?;
        let slot = &mut map.slots[idx];
        match slot.state {
            SlotState::Reserved(p) => {
                slot.state = SlotState::Occupied(p);
                info!(piece = %p, %square, "Piece stored");
                Ok(())
            }
            other => Err(StorageError::InvalidState {
                square,
                state: other.name(),
                expected: "reserved",
            }),
        }
    }

    /// Free `square` whatever its state. Returns the piece that was on it.
    pub fn release(&self, square: Square) -> Result<Option<Piece>, StorageError> {
        let mut map = self.map.lock();
        let idx = map.index(square)?;
        let slot = &mut map.slots[idx];
        let piece = slot.occupant();
        slot.state = SlotState::Free;
        debug!(%square, ?piece, "Storage square released");
        Ok(piece)
    }

    /// Undo a pending transition: a reservation becomes free again, a
    /// departing piece stays.
    pub fn cancel(&self, square: Square) -> Result<(), StorageError> {
        let mut map = self.map.lock();
        let idx = map.index(square)?;
        let slot = &mut map.slots[idx];
        slot.state = match slot.state {
            SlotState::Reserved(_) => SlotState::Free,
            SlotState::Departing(p) => SlotState::Occupied(p),
            other => {
                return Err(StorageError::InvalidState {
                    square,
                    state: other.name(),
                    expected: "reserved or departing",
                });
            }
        };
        debug!(%square, "Storage transition cancelled");
        Ok(())
    }

    /// Take a free `square` out of allocation for good. Used for the square
    /// a fixture such as the pusher tool rests on.
    pub fn withhold(&self, square: Square) -> Result<(), StorageError> {
        let mut map = self.map.lock();
        let idx = map.index(square)?;
        match map.slots[idx].state {
            SlotState::Free => {
                map.slots.remove(idx);
                info!(%square, "Storage square withheld");
                Ok(())
            }
            other => Err(StorageError::InvalidState {
                square,
                state: other.name(),
                expected: "free",
            }),
        }
    }

    /// Where a stored `color` `kind` sits, if any.
    pub fn find(&self, kind: PieceType, color: Color) -> Option<Square> {
        let map = self.map.lock();
        map.find(kind, color).map(|i| map.slots[i].square)
    }

    /// Find a stored piece and mark it departing in one step.
    pub fn claim(&self, kind: PieceType, color: Color) -> Result<Square, StorageError> {
        let mut map = self.map.lock();
        let idx = map.find(kind, color).ok_or(StorageError::NotFound { kind, color })?;
        let slot = &mut map.slots[idx];
        slot.state = SlotState::Departing(Piece::new(kind, color));
        debug!(%kind, %color, square = %slot.square, "Stored piece claimed");
        Ok(slot.square)
    }

    /// Clear every slot for a new game.
    pub fn reset(&self) {
        let mut map = self.map.lock();
        for slot in &mut map.slots {
            slot.state = SlotState::Free;
        }
        info!("Storage cleared");
    }

    /// Rebuild slot states from a board snapshot. Pending reservations and
    /// departures are dropped.
    pub fn sync_with_occupancy(&self, occupancy: &BoardOccupancy) {
        let mut map = self.map.lock();
        for slot in &mut map.slots {
            slot.state = match occupancy.get(slot.square) {
                Some(p) => SlotState::Occupied(p),
                None => SlotState::Free,
            };
        }
        let stored = map.slots.iter().filter(|s| s.occupant().is_some()).count();
        info!(stored, "Storage synchronised with board");
    }

    // ─── Inspection ─────────────────────────────────────────────────

    pub fn squares(&self) -> Vec<StorageSlot> {
        self.map.lock().slots.clone()
    }

    pub fn slot(&self, square: Square) -> Option<StorageSlot> {
        self.map.lock().slots.iter().find(|s| s.square == square).copied()
    }

    pub fn stats(&self) -> StorageStats {
        let map = self.map.lock();
        let total = map.slots.len();
        let mut per_color = BTreeMap::new();
        let mut per_type = BTreeMap::new();
        let mut occupied = 0;
        let mut reserved = 0;
        for slot in &map.slots {
            if let Some(p) = slot.occupant() {
                occupied += 1;
                *per_color.entry(p.color).or_insert(0) += 1;
                *per_type.entry(p.kind).or_insert(0) += 1;
            } else if matches!(slot.state, SlotState::Reserved(_)) {
                reserved += 1;
            }
        }
        let utilization_pct = if total == 0 {
            0.0
        } else {
            occupied as f64 / total as f64 * 100.0
        };
        StorageStats {
            total,
            occupied,
            reserved,
            available: total - occupied - reserved,
            utilization_pct,
            per_color,
            per_type,
            strategy: map.strategy,
        }
    }

    /// Whole grid, top rank first: FEN letter for a stored piece, `·` for
    /// empty storage, blank for playing squares.
    pub fn visual_map(&self) -> Vec<Vec<char>> {
        let map = self.map.lock();
        (0..self.board.ranks)
            .rev()
            .map(|rank| {
                (0..self.board.files)
                    .map(|file| {
                        let sq = Square::new(file, rank);
                        match map.slots.iter().find(|s| s.square == sq) {
                            Some(slot) => slot.occupant().map_or('·', |p| p.fen_char()),
                            None => ' ',
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

fn apply_zones(board: &BoardGeometry, strategy: StorageStrategy, slots: &mut [StorageSlot]) {
    for slot in slots {
        slot.color_zone = match strategy {
            StorageStrategy::ByColor => Some(strategy::color_zone(board, slot.square)),
            _ => None,
        };
        slot.type_zone = match strategy {
            StorageStrategy::ByType => strategy::type_zone(board, slot.square),
            _ => None,
        };
    }
}
