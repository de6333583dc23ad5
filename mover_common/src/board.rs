//! Physical board geometry.
//!
//! The board is a `files × ranks` grid laid over the machine's XY plane.
//! Depending on the [`StorageLayout`], part of the grid is the playing area
//! and the rest holds captured pieces.
//!
//! # TOML Example
//!
//! ```toml
//! [board]
//! files = 8
//! ranks = 10
//! width_mm = 400.0
//! height_mm = 500.0
//! storage_layout = "top"
//! storage_depth = 2
//! ```

use crate::config::ConfigError;
use crate::types::{Position, Square};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where captured pieces are stored relative to the playing area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageLayout {
    /// No storage; the whole grid is playing area.
    #[default]
    None,
    /// Storage ranks above the playing area.
    Top,
    /// Storage ranks below the playing area.
    Bottom,
    /// One-square border around the playing area.
    Perimeter,
}

impl fmt::Display for StorageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageLayout::None => "none",
            StorageLayout::Top => "top",
            StorageLayout::Bottom => "bottom",
            StorageLayout::Perimeter => "perimeter",
        };
        f.write_str(s)
    }
}

/// Outward direction from a square on the grid boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Unit vector in machine XY (rank grows with +Y, file with +X).
    pub const fn unit(self) -> (f64, f64) {
        match self {
            Direction::North => (0.0, 1.0),
            Direction::South => (0.0, -1.0),
            Direction::East => (1.0, 0.0),
            Direction::West => (-1.0, 0.0),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
        };
        f.write_str(s)
    }
}

/// Inclusive grid bounds of the playing area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayArea {
    pub min_file: u8,
    pub max_file: u8,
    pub min_rank: u8,
    pub max_rank: u8,
}

impl PlayArea {
    pub fn contains(&self, sq: Square) -> bool {
        (self.min_file..=self.max_file).contains(&sq.file)
            && (self.min_rank..=self.max_rank).contains(&sq.rank)
    }
}

fn default_files() -> u8 {
    8
}

fn default_ranks() -> u8 {
    8
}

fn default_size_mm() -> f64 {
    400.0
}

fn default_storage_depth() -> u8 {
    2
}

/// Board grid mapped onto machine coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardGeometry {
    /// Grid files including storage columns.
    #[serde(default = "default_files")]
    pub files: u8,
    /// Grid ranks including storage rows.
    #[serde(default = "default_ranks")]
    pub ranks: u8,
    /// Physical width of the whole grid.
    #[serde(default = "default_size_mm")]
    pub width_mm: f64,
    #[serde(default = "default_size_mm")]
    pub height_mm: f64,
    /// Machine coordinates of the grid's lower-left corner.
    #[serde(default)]
    pub origin_x_mm: f64,
    #[serde(default)]
    pub origin_y_mm: f64,
    #[serde(default)]
    pub storage_layout: StorageLayout,
    /// Storage ranks for `top` / `bottom` layouts. Perimeter is always 1.
    #[serde(default = "default_storage_depth")]
    pub storage_depth: u8,
}

impl Default for BoardGeometry {
    fn default() -> Self {
        Self {
            files: default_files(),
            ranks: default_ranks(),
            width_mm: default_size_mm(),
            height_mm: default_size_mm(),
            origin_x_mm: 0.0,
            origin_y_mm: 0.0,
            storage_layout: StorageLayout::None,
            storage_depth: default_storage_depth(),
        }
    }
}

impl BoardGeometry {
    /// Validate the board geometry.
    ///
    /// # Validation Rules
    /// 1. 1 ≤ files ≤ 26, ranks ≥ 1
    /// 2. width/height finite and > 0, origin finite
    /// 3. The layout leaves a non-empty playing area
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.files == 0 || self.files > Square::MAX_FILES {
            return Err(ConfigError::ValidationError(format!(
                "board.files must be in 1..={} (got {})",
                Square::MAX_FILES,
                self.files
            )));
        }
        if self.ranks == 0 {
            return Err(ConfigError::ValidationError(
                "board.ranks must be greater than 0".to_string(),
            ));
        }
        if !(self.width_mm.is_finite() && self.width_mm > 0.0)
            || !(self.height_mm.is_finite() && self.height_mm > 0.0)
        {
            return Err(ConfigError::ValidationError(format!(
                "board dimensions must be positive (got {} x {} mm)",
                self.width_mm, self.height_mm
            )));
        }
        if !self.origin_x_mm.is_finite() || !self.origin_y_mm.is_finite() {
            return Err(ConfigError::ValidationError(
                "board origin must be finite".to_string(),
            ));
        }
        let depth = self.storage_depth;
        let ok = match self.storage_layout {
            StorageLayout::None => true,
            StorageLayout::Top | StorageLayout::Bottom => depth >= 1 && depth < self.ranks,
            StorageLayout::Perimeter => self.files >= 3 && self.ranks >= 3,
        };
        if !ok {
            return Err(ConfigError::ValidationError(format!(
                "storage layout '{}' leaves no playing area on a {}x{} grid",
                self.storage_layout, self.files, self.ranks
            )));
        }
        Ok(())
    }

    pub fn square_size_x(&self) -> f64 {
        self.width_mm / f64::from(self.files.max(1))
    }

    pub fn square_size_y(&self) -> f64 {
        self.height_mm / f64::from(self.ranks.max(1))
    }

    /// Whether `sq` lies on the grid at all.
    pub fn contains(&self, sq: Square) -> bool {
        sq.file < self.files && sq.rank < self.ranks
    }

    /// Playing area implied by the storage layout.
    pub fn play_area(&self) -> PlayArea {
        let max_file = self.files.saturating_sub(1);
        let max_rank = self.ranks.saturating_sub(1);
        let depth = self.storage_depth.min(max_rank);
        match self.storage_layout {
            StorageLayout::None => PlayArea {
                min_file: 0,
                max_file,
                min_rank: 0,
                max_rank,
            },
            StorageLayout::Top => PlayArea {
                min_file: 0,
                max_file,
                min_rank: 0,
                max_rank: max_rank - depth,
            },
            StorageLayout::Bottom => PlayArea {
                min_file: 0,
                max_file,
                min_rank: depth,
                max_rank,
            },
            StorageLayout::Perimeter => PlayArea {
                min_file: 1.min(max_file),
                max_file: max_file.saturating_sub(1).max(1.min(max_file)),
                min_rank: 1.min(max_rank),
                max_rank: max_rank.saturating_sub(1).max(1.min(max_rank)),
            },
        }
    }

    /// The grid square one step from `sq` in `direction`, if there is one.
    pub fn neighbour(&self, sq: Square, direction: Direction) -> Option<Square> {
        let (file, rank) = match direction {
            Direction::North => (Some(sq.file), sq.rank.checked_add(1)),
            Direction::South => (Some(sq.file), sq.rank.checked_sub(1)),
            Direction::East => (sq.file.checked_add(1), Some(sq.rank)),
            Direction::West => (sq.file.checked_sub(1), Some(sq.rank)),
        };
        Some(Square::new(file?, rank?)).filter(|n| self.contains(*n))
    }

    /// Direction that pushes a piece on playing square `sq` straight off
    /// the grid. North/south win on corners.
    pub fn push_exit(&self, sq: Square) -> Option<Direction> {
        if !self.is_playing_square(sq) {
            return None;
        }
        [
            Direction::North,
            Direction::South,
            Direction::East,
            Direction::West,
        ]
        .into_iter()
        .find(|d| self.neighbour(sq, *d).is_none())
    }

    pub fn is_grid_corner(&self, sq: Square) -> bool {
        (sq.file == 0 || sq.file == self.files.saturating_sub(1))
            && (sq.rank == 0 || sq.rank == self.ranks.saturating_sub(1))
    }

    /// Playing squares that can be pushed off the grid, in (file, rank) order.
    pub fn push_squares(&self) -> impl Iterator<Item = (Square, Direction)> + '_ {
        (0..self.files)
            .flat_map(move |f| (0..self.ranks).map(move |r| Square::new(f, r)))
            .filter_map(move |sq| self.push_exit(sq).map(|d| (sq, d)))
    }

    pub fn is_playing_square(&self, sq: Square) -> bool {
        self.contains(sq) && self.play_area().contains(sq)
    }

    pub fn is_storage_square(&self, sq: Square) -> bool {
        self.contains(sq) && !self.play_area().contains(sq)
    }

    /// Every storage square in (file, rank) order.
    pub fn storage_squares(&self) -> Vec<Square> {
        let area = self.play_area();
        (0..self.files)
            .flat_map(|f| (0..self.ranks).map(move |r| Square::new(f, r)))
            .filter(|sq| !area.contains(*sq))
            .collect()
    }

    /// Machine XY of the centre of `sq`, or `None` when off-grid.
    pub fn square_center(&self, sq: Square) -> Option<(f64, f64)> {
        if !self.contains(sq) {
            return None;
        }
        let x = self.origin_x_mm + (f64::from(sq.file) + 0.5) * self.square_size_x();
        let y = self.origin_y_mm + (f64::from(sq.rank) + 0.5) * self.square_size_y();
        Some((x, y))
    }

    /// Centre of `sq` at height `z`.
    pub fn square_position(&self, sq: Square, z: f64) -> Option<Position> {
        self.square_center(sq).map(|(x, y)| Position::new(x, y, z))
    }

    /// Storage rank nearest the playing area, if the layout has one.
    pub fn inner_storage_rank(&self) -> Option<u8> {
        let area = self.play_area();
        match self.storage_layout {
            StorageLayout::Top => Some(area.max_rank + 1),
            StorageLayout::Bottom => area.min_rank.checked_sub(1),
            StorageLayout::Perimeter => Some(0),
            StorageLayout::None => None,
        }
    }
}
