//! Value types shared by the link, the actuators and the executor.
//!
//! - [`Position`] - machine coordinates in millimetres
//! - [`Square`] - a cell of the physical board grid (playing or storage)
//! - [`Piece`], [`PieceType`], [`Color`] - chess material
//! - [`Move`] - an already-validated move handed over by the rules collaborator
//! - [`BoardOccupancy`] - square → piece snapshot

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Machine position in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Largest per-axis distance to `other`.
    pub fn max_axis_distance(&self, other: &Position) -> f64 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
    }

    /// Returns a copy shifted by the given deltas.
    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Error produced when parsing squares and pieces from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid square '{0}': expected file letter followed by rank number")]
    Square(String),
    #[error("invalid piece '{0}'")]
    Piece(String),
}

/// A cell of the board grid.
///
/// `file` and `rank` are 0-indexed grid coordinates covering both playing
/// and storage squares. The text form is `<file letter><1-based rank>`,
/// so grid (4, 3) is `e4` and grid (0, 9) is `a10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Square {
    pub file: u8,
    pub rank: u8,
}

impl Square {
    /// Maximum number of files representable with a single letter.
    pub const MAX_FILES: u8 = 26;

    pub const fn new(file: u8, rank: u8) -> Self {
        Self { file, rank }
    }

    /// Manhattan distance in grid cells.
    pub fn manhattan(&self, other: &Square) -> u32 {
        (self.file.abs_diff(other.file) as u32) + (self.rank.abs_diff(other.rank) as u32)
    }

    /// The file letter (`a`..`z`).
    pub fn file_char(&self) -> char {
        (b'a' + self.file.min(Self::MAX_FILES - 1)) as char
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.file_char(), self.rank as u32 + 1)
    }
}

impl FromStr for Square {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::Square(s.to_string());
        let mut chars = s.trim().chars();
        let file_char = chars.next().ok_or_else(err)?.to_ascii_lowercase();
        if !file_char.is_ascii_lowercase() {
            return Err(err());
        }
        let rank: u32 = chars.as_str().parse().map_err(|_| err())?;
        if rank == 0 || rank > u8::MAX as u32 {
            return Err(err());
        }
        Ok(Square::new(file_char as u8 - b'a', (rank - 1) as u8))
    }
}

impl TryFrom<String> for Square {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Square> for String {
    fn from(value: Square) -> Self {
        value.to_string()
    }
}

/// Chess piece types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceType {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceType {
    pub const ALL: [PieceType; 6] = [
        PieceType::Pawn,
        PieceType::Knight,
        PieceType::Bishop,
        PieceType::Rook,
        PieceType::Queen,
        PieceType::King,
    ];

    /// Lowercase FEN letter.
    pub const fn fen_char(self) -> char {
        match self {
            PieceType::Pawn => 'p',
            PieceType::Knight => 'n',
            PieceType::Bishop => 'b',
            PieceType::Rook => 'r',
            PieceType::Queen => 'q',
            PieceType::King => 'k',
        }
    }

    pub fn from_fen_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'p' => Some(PieceType::Pawn),
            'n' => Some(PieceType::Knight),
            'b' => Some(PieceType::Bishop),
            'r' => Some(PieceType::Rook),
            'q' => Some(PieceType::Queen),
            'k' => Some(PieceType::King),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PieceType::Pawn => "pawn",
            PieceType::Knight => "knight",
            PieceType::Bishop => "bishop",
            PieceType::Rook => "rook",
            PieceType::Queen => "queen",
            PieceType::King => "king",
        }
    }
}

impl fmt::Display for PieceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PieceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(pt) = PieceType::ALL.into_iter().find(|pt| pt.name() == lower) {
            return Ok(pt);
        }
        let mut chars = lower.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => PieceType::from_fen_char(c).ok_or_else(|| ParseError::Piece(s.into())),
            _ => Err(ParseError::Piece(s.to_string())),
        }
    }
}

/// Piece colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub const fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => f.write_str("white"),
            Color::Black => f.write_str("black"),
        }
    }
}

/// A chess piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub kind: PieceType,
    pub color: Color,
}

impl Piece {
    pub const fn new(kind: PieceType, color: Color) -> Self {
        Self { kind, color }
    }

    /// FEN character: uppercase for white, lowercase for black.
    pub fn fen_char(&self) -> char {
        let c = self.kind.fen_char();
        match self.color {
            Color::White => c.to_ascii_uppercase(),
            Color::Black => c,
        }
    }

    pub fn from_fen_char(c: char) -> Option<Self> {
        let kind = PieceType::from_fen_char(c)?;
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        Some(Self { kind, color })
    }
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fen_char())
    }
}

impl FromStr for Piece {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Piece::from_fen_char(c).ok_or_else(|| ParseError::Piece(s.into())),
            _ => Err(ParseError::Piece(s.to_string())),
        }
    }
}

/// An already-validated move, in grid coordinates.
///
/// Legality is decided by the rules collaborator; the flags only tell the
/// planner which physical sequence the move needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    #[serde(default)]
    pub is_capture: bool,
    #[serde(default)]
    pub is_castle: bool,
    #[serde(default)]
    pub is_en_passant: bool,
    #[serde(default)]
    pub promotion: Option<PieceType>,
}

impl Move {
    /// A quiet move.
    pub const fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            is_capture: false,
            is_castle: false,
            is_en_passant: false,
            promotion: None,
        }
    }

    pub const fn capture(mut self) -> Self {
        self.is_capture = true;
        self
    }

    pub const fn castle(mut self) -> Self {
        self.is_castle = true;
        self
    }

    /// En passant implies capture.
    pub const fn en_passant(mut self) -> Self {
        self.is_en_passant = true;
        self.is_capture = true;
        self
    }

    pub const fn promote(mut self, kind: PieceType) -> Self {
        self.promotion = Some(kind);
        self
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(p) = self.promotion {
            write!(f, "{}", p.fen_char())?;
        }
        Ok(())
    }
}

/// Snapshot of which piece stands on which square.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardOccupancy {
    pieces: BTreeMap<Square, Piece>,
}

impl BoardOccupancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, square: Square) -> Option<Piece> {
        self.pieces.get(&square).copied()
    }

    /// Place or clear a square.
    pub fn set(&mut self, square: Square, piece: Option<Piece>) {
        match piece {
            Some(p) => {
                self.pieces.insert(square, p);
            }
            None => {
                self.pieces.remove(&square);
            }
        }
    }

    pub fn with(mut self, square: Square, piece: Piece) -> Self {
        self.pieces.insert(square, piece);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        self.pieces.iter().map(|(s, p)| (*s, *p))
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}

impl FromIterator<(Square, Piece)> for BoardOccupancy {
    fn from_iter<T: IntoIterator<Item = (Square, Piece)>>(iter: T) -> Self {
        Self {
            pieces: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    #[test]
    fn square_text_form() {
        assert_eq!(sq("e4"), Square::new(4, 3));
        assert_eq!(sq("a10"), Square::new(0, 9));
        assert_eq!(Square::new(7, 0).to_string(), "h1");
        assert_eq!(Square::new(0, 9).to_string(), "a10");
        assert_eq!(sq("E2"), Square::new(4, 1));
    }

    #[test]
    fn square_rejects_garbage() {
        for bad in ["", "4e", "e0", "e", "ee4", "e-1", "é4"] {
            assert!(bad.parse::<Square>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn square_ordering_is_file_then_rank() {
        assert!(sq("a9") < sq("a10"));
        assert!(sq("a10") < sq("b1"));
    }

    #[test]
    fn manhattan_distance() {
        assert_eq!(sq("e4").manhattan(&sq("e4")), 0);
        assert_eq!(sq("e4").manhattan(&sq("h9")), 3 + 5);
        assert_eq!(sq("h9").manhattan(&sq("e4")), 8);
    }

    #[test]
    fn piece_fen_roundtrip() {
        for c in ['P', 'n', 'B', 'r', 'Q', 'k'] {
            assert_eq!(Piece::from_fen_char(c).unwrap().fen_char(), c);
        }
        assert!(Piece::from_fen_char('x').is_none());
        assert_eq!(
            "Q".parse::<Piece>().unwrap(),
            Piece::new(PieceType::Queen, Color::White)
        );
    }

    #[test]
    fn piece_type_parses_names_and_letters() {
        assert_eq!("queen".parse::<PieceType>().unwrap(), PieceType::Queen);
        assert_eq!("N".parse::<PieceType>().unwrap(), PieceType::Knight);
        assert!("dragon".parse::<PieceType>().is_err());
    }

    #[test]
    fn en_passant_implies_capture() {
        let m = Move::new(sq("e5"), sq("d6")).en_passant();
        assert!(m.is_capture && m.is_en_passant);
    }

    #[test]
    fn occupancy_set_and_clear() {
        let mut occ = BoardOccupancy::new();
        let q = Piece::new(PieceType::Queen, Color::Black);
        occ.set(sq("d8"), Some(q));
        assert_eq!(occ.get(sq("d8")), Some(q));
        occ.set(sq("d8"), None);
        assert!(occ.is_empty());
    }

    #[test]
    fn square_serde_as_string() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            at: Square,
        }
        let w: Wrapper = toml::from_str("at = \"c7\"").unwrap();
        assert_eq!(w.at, Square::new(2, 6));
        assert!(toml::to_string(&w).unwrap().contains("c7"));
    }
}
