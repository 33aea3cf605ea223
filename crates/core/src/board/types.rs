//! Core board vocabulary: colors, pieces, squares, castling rights, moves

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Side of the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// The single-letter code used in board text and the session cache
    pub fn as_char(self) -> char {
        match self {
            Color::White => 'w',
            Color::Black => 'b',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'w' => Some(Color::White),
            'b' => Some(Color::Black),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }
    }

    /// Rank (0-based) this color's pawns start on
    pub fn pawn_rank(self) -> u8 {
        match self {
            Color::White => 1,
            Color::Black => 6,
        }
    }

    /// Rank (0-based) this color's pieces start on
    pub fn back_rank(self) -> u8 {
        match self {
            Color::White => 0,
            Color::Black => 7,
        }
    }

    /// Rank step a pawn of this color advances by
    pub fn forward(self) -> i8 {
        match self {
            Color::White => 1,
            Color::Black => -1,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    /// Lowercase letter for this kind (`p`, `n`, `b`, `r`, `q`, `k`)
    pub fn as_char(self) -> char {
        match self {
            PieceKind::Pawn => 'p',
            PieceKind::Knight => 'n',
            PieceKind::Bishop => 'b',
            PieceKind::Rook => 'r',
            PieceKind::Queen => 'q',
            PieceKind::King => 'k',
        }
    }

    /// Case-insensitive letter lookup
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'p' => Some(PieceKind::Pawn),
            'n' => Some(PieceKind::Knight),
            'b' => Some(PieceKind::Bishop),
            'r' => Some(PieceKind::Rook),
            'q' => Some(PieceKind::Queen),
            'k' => Some(PieceKind::King),
            _ => None,
        }
    }

    /// Kinds a pawn may be replaced by on the last rank
    pub fn is_promotion_target(self) -> bool {
        matches!(
            self,
            PieceKind::Knight | PieceKind::Bishop | PieceKind::Rook | PieceKind::Queen
        )
    }
}

impl FromStr for PieceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => PieceKind::from_char(c)
                .ok_or_else(|| Error::Format(format!("unknown piece kind '{}'", s))),
            _ => match s.to_ascii_lowercase().as_str() {
                "pawn" => Ok(PieceKind::Pawn),
                "knight" => Ok(PieceKind::Knight),
                "bishop" => Ok(PieceKind::Bishop),
                "rook" => Ok(PieceKind::Rook),
                "queen" => Ok(PieceKind::Queen),
                "king" => Ok(PieceKind::King),
                _ => Err(Error::Format(format!("unknown piece kind '{}'", s))),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub color: Color,
    pub kind: PieceKind,
}

impl Piece {
    pub const fn new(color: Color, kind: PieceKind) -> Self {
        Self { color, kind }
    }

    /// Board-text letter: uppercase for white, lowercase for black
    pub fn as_char(self) -> char {
        let c = self.kind.as_char();
        match self.color {
            Color::White => c.to_ascii_uppercase(),
            Color::Black => c,
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        let kind = PieceKind::from_char(c)?;
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        Some(Self { color, kind })
    }
}

/// A board coordinate, a1 = 0 through h8 = 63
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square(u8);

impl Square {
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        (file < 8 && rank < 8).then(|| Self(rank * 8 + file))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        (index < 64).then(|| Self(index as u8))
    }

    pub fn file(self) -> u8 {
        self.0 % 8
    }

    pub fn rank(self) -> u8 {
        self.0 / 8
    }

    /// The square `df` files and `dr` ranks away, if still on the board
    pub fn offset(self, df: i8, dr: i8) -> Option<Self> {
        let file = self.file() as i8 + df;
        let rank = self.rank() as i8 + dr;
        if (0..8).contains(&file) && (0..8).contains(&rank) {
            Some(Self((rank * 8 + file) as u8))
        } else {
            None
        }
    }

    pub fn all() -> impl Iterator<Item = Square> {
        (0..64u8).map(Square)
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            (b'a' + self.file()) as char,
            (b'1' + self.rank()) as char
        )
    }
}

impl FromStr for Square {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err(Error::Format(format!("invalid coordinate '{}'", s)));
        }
        let file = bytes[0].to_ascii_lowercase().wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        Square::new(file, rank).ok_or_else(|| Error::Format(format!("invalid coordinate '{}'", s)))
    }
}

impl Serialize for Square {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Square {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Four independent castling flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CastlingRights {
    pub white_kingside: bool,
    pub white_queenside: bool,
    pub black_kingside: bool,
    pub black_queenside: bool,
}

impl CastlingRights {
    pub const ALL: Self = Self {
        white_kingside: true,
        white_queenside: true,
        black_kingside: true,
        black_queenside: true,
    };

    pub const NONE: Self = Self {
        white_kingside: false,
        white_queenside: false,
        black_kingside: false,
        black_queenside: false,
    };

    pub fn kingside(&self, color: Color) -> bool {
        match color {
            Color::White => self.white_kingside,
            Color::Black => self.black_kingside,
        }
    }

    pub fn queenside(&self, color: Color) -> bool {
        match color {
            Color::White => self.white_queenside,
            Color::Black => self.black_queenside,
        }
    }

    pub fn revoke_all(&mut self, color: Color) {
        match color {
            Color::White => {
                self.white_kingside = false;
                self.white_queenside = false;
            }
            Color::Black => {
                self.black_kingside = false;
                self.black_queenside = false;
            }
        }
    }

    /// Drops whichever right is tied to a rook standing on `square`
    pub fn revoke_for_rook_square(&mut self, square: Square) {
        match (square.file(), square.rank()) {
            (0, 0) => self.white_queenside = false,
            (7, 0) => self.white_kingside = false,
            (0, 7) => self.black_queenside = false,
            (7, 7) => self.black_kingside = false,
            _ => {}
        }
    }

    pub fn to_fen(&self) -> String {
        let mut s = String::new();
        if self.white_kingside {
            s.push('K');
        }
        if self.white_queenside {
            s.push('Q');
        }
        if self.black_kingside {
            s.push('k');
        }
        if self.black_queenside {
            s.push('q');
        }
        if s.is_empty() {
            s.push('-');
        }
        s
    }

    pub fn from_fen(field: &str) -> Option<Self> {
        if field == "-" {
            return Some(Self::NONE);
        }
        if field.is_empty() {
            return None;
        }
        let mut rights = Self::NONE;
        for c in field.chars() {
            let flag = match c {
                'K' => &mut rights.white_kingside,
                'Q' => &mut rights.white_queenside,
                'k' => &mut rights.black_kingside,
                'q' => &mut rights.black_queenside,
                _ => return None,
            };
            if *flag {
                return None;
            }
            *flag = true;
        }
        Some(rights)
    }
}

/// A requested move: source, destination and optional promotion kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PieceKind>,
}

impl Move {
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    pub fn with_promotion(mut self, kind: PieceKind) -> Self {
        self.promotion = Some(kind);
        self
    }
}

/// Coordinate notation, e.g. `e2e4` or `e7e8q`
impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(kind) = self.promotion {
            write!(f, "{}", kind.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for Move {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !s.is_ascii() || !(4..=5).contains(&s.len()) {
            return Err(Error::Format(format!("invalid move '{}'", s)));
        }
        let from = s[0..2].parse()?;
        let to = s[2..4].parse()?;
        let promotion = match s.get(4..5) {
            Some(p) => Some(p.parse()?),
            None => None,
        };
        Ok(Self { from, to, promotion })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_parse_and_display() {
        let sq: Square = "e4".parse().unwrap();
        assert_eq!(sq.file(), 4);
        assert_eq!(sq.rank(), 3);
        assert_eq!(sq.to_string(), "e4");
        assert_eq!("H8".parse::<Square>().unwrap().index(), 63);
    }

    #[test]
    fn test_square_rejects_garbage() {
        for bad in ["", "e", "e9", "i1", "e44", "é1"] {
            assert!(matches!(bad.parse::<Square>(), Err(Error::Format(_))), "{}", bad);
        }
    }

    #[test]
    fn test_square_offset_stays_on_board() {
        let a1: Square = "a1".parse().unwrap();
        assert_eq!(a1.offset(-1, 0), None);
        assert_eq!(a1.offset(1, 2).map(|s| s.to_string()), Some("b3".to_string()));
    }

    #[test]
    fn test_castling_rights_fen() {
        assert_eq!(CastlingRights::ALL.to_fen(), "KQkq");
        assert_eq!(CastlingRights::NONE.to_fen(), "-");
        let rights = CastlingRights::from_fen("Kq").unwrap();
        assert!(rights.white_kingside && rights.black_queenside);
        assert!(!rights.white_queenside && !rights.black_kingside);
        assert!(CastlingRights::from_fen("KK").is_none());
        assert!(CastlingRights::from_fen("X").is_none());
    }

    #[test]
    fn test_move_notation() {
        let mv: Move = "e7e8q".parse().unwrap();
        assert_eq!(mv.promotion, Some(PieceKind::Queen));
        assert_eq!(mv.to_string(), "e7e8q");
        assert!("e2".parse::<Move>().is_err());
    }
}
