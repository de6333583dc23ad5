//! Slot priorities, zones and per-strategy selection.
//!
//! Lower priority numbers are taken first. Every selection ends its sort
//! key with the square itself, so ties always resolve the same way.

use super::{SlotState, StorageSlot};
use mover_common::board::{BoardGeometry, StorageLayout};
use mover_common::machine::StorageStrategy;
use mover_common::types::{Color, Piece, PieceType, Square};

/// Fill priority of a storage square.
///
/// - Top: storage rank nearest the play area first, then files near the centre
/// - Bottom: mirrored
/// - Perimeter: grid corners 0, everything else 50
pub fn priority(board: &BoardGeometry, sq: Square) -> u32 {
    let files = u32::from(board.files);
    let ranks = u32::from(board.ranks);
    let file = u32::from(sq.file);
    let rank = u32::from(sq.rank);
    // |file - files/2| * 10, kept in integers
    let centre = (2 * file).abs_diff(files) * 5;
    match board.storage_layout {
        StorageLayout::Top => rank * 100 + centre,
        StorageLayout::Bottom => (ranks - rank) * 100 + centre,
        StorageLayout::Perimeter => {
            let edge_file = sq.file == 0 || sq.file + 1 == board.files;
            let edge_rank = sq.rank == 0 || sq.rank + 1 == board.ranks;
            if edge_file && edge_rank { 0 } else { 50 }
        }
        StorageLayout::None => 100,
    }
}

/// Colour half: white in the low-file half, black in the rest.
pub fn color_zone(board: &BoardGeometry, sq: Square) -> Color {
    if 2 * u32::from(sq.file) < u32::from(board.files) {
        Color::White
    } else {
        Color::Black
    }
}

/// Squares on the pawn rank are zoned for pawns; the rest are unzoned.
pub fn type_zone(board: &BoardGeometry, sq: Square) -> Option<PieceType> {
    match board.inner_storage_rank() {
        Some(rank) if rank == sq.rank => Some(PieceType::Pawn),
        _ => None,
    }
}

/// Pick the slot index for `piece` vacating `vacated`, or `None` when no
/// candidate is free.
pub fn select(
    strategy: StorageStrategy,
    slots: &[StorageSlot],
    piece: Piece,
    vacated: Square,
) -> Option<usize> {
    let free = slots
        .iter()
        .enumerate()
        .filter(|(_, s)| s.state == SlotState::Free);

    match strategy {
        StorageStrategy::Nearest => free
            .min_by_key(|(_, s)| (s.square.manhattan(&vacated), s.priority, s.square))
            .map(|(i, _)| i),
        StorageStrategy::ByColor => free
            .filter(|(_, s)| s.color_zone == Some(piece.color))
            .min_by_key(|(_, s)| (s.priority, s.square))
            .map(|(i, _)| i),
        StorageStrategy::ByType => free
            .min_by_key(|(_, s)| {
                let mismatch = if piece.kind == PieceType::Pawn {
                    s.type_zone != Some(PieceType::Pawn)
                } else {
                    s.type_zone.is_some()
                };
                (mismatch, s.priority, s.square)
            })
            .map(|(i, _)| i),
        StorageStrategy::Chronological => free
            .min_by_key(|(_, s)| (s.priority, s.square))
            .map(|(i, _)| i),
    }
}
