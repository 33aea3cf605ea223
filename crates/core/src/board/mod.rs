//! Board model: piece placement plus side to move, castling and en passant

mod fen;
mod types;

pub use fen::STARTING_FEN;
pub use types::*;

/// An immutable position. Every move produces a new `Board`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    squares: [Option<Piece>; 64],
    side_to_move: Color,
    castling: CastlingRights,
    en_passant: Option<Square>,
    halfmove_clock: u32,
    fullmove_number: u32,
}

impl Board {
    /// A board with no pieces, white to move
    pub fn empty() -> Self {
        Self {
            squares: [None; 64],
            side_to_move: Color::White,
            castling: CastlingRights::NONE,
            en_passant: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    /// The standard starting position
    pub fn starting() -> Self {
        let mut board = Self::empty();
        let back = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];
        for (file, kind) in back.into_iter().enumerate() {
            let file = file as u8;
            for color in [Color::White, Color::Black] {
                board.place(file, color.back_rank(), Piece::new(color, kind));
                board.place(file, color.pawn_rank(), Piece::new(color, PieceKind::Pawn));
            }
        }
        board.castling = CastlingRights::ALL;
        board
    }

    fn place(&mut self, file: u8, rank: u8, piece: Piece) {
        self.squares[(rank * 8 + file) as usize] = Some(piece);
    }

    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.squares[square.index()]
    }

    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    pub fn castling(&self) -> CastlingRights {
        self.castling
    }

    pub fn en_passant(&self) -> Option<Square> {
        self.en_passant
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    /// Squares holding a piece of `color`
    pub fn squares_of(&self, color: Color) -> impl Iterator<Item = Square> + '_ {
        Square::all().filter(move |sq| matches!(self.piece_at(*sq), Some(p) if p.color == color))
    }

    pub fn king_square(&self, color: Color) -> Option<Square> {
        Square::all().find(|sq| self.piece_at(*sq) == Some(Piece::new(color, PieceKind::King)))
    }

    /// Crate-internal builder used by the rules engine to derive the next board.
    pub(crate) fn edit(&self) -> BoardEdit {
        BoardEdit { board: self.clone() }
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::starting()
    }
}

/// Scratch copy of a board. Mutations only ever touch the copy; the
/// original `Board` is left untouched.
pub(crate) struct BoardEdit {
    board: Board,
}

impl BoardEdit {
    pub(crate) fn set(&mut self, square: Square, piece: Option<Piece>) -> &mut Self {
        self.board.squares[square.index()] = piece;
        self
    }

    pub(crate) fn take(&mut self, square: Square) -> Option<Piece> {
        self.board.squares[square.index()].take()
    }

    pub(crate) fn castling_mut(&mut self) -> &mut CastlingRights {
        &mut self.board.castling
    }

    pub(crate) fn en_passant(&mut self, square: Option<Square>) -> &mut Self {
        self.board.en_passant = square;
        self
    }

    pub(crate) fn side_to_move(&mut self, color: Color) -> &mut Self {
        self.board.side_to_move = color;
        self
    }

    pub(crate) fn counters(&mut self, halfmove: u32, fullmove: u32) -> &mut Self {
        self.board.halfmove_clock = halfmove;
        self.board.fullmove_number = fullmove;
        self
    }

    pub(crate) fn finish(self) -> Board {
        self.board
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(name: &str) -> Square {
        name.parse().unwrap()
    }

    #[test]
    fn test_starting_position_layout() {
        let board = Board::starting();
        assert_eq!(board.piece_at(sq("e1")), Some(Piece::new(Color::White, PieceKind::King)));
        assert_eq!(board.piece_at(sq("d8")), Some(Piece::new(Color::Black, PieceKind::Queen)));
        assert_eq!(board.piece_at(sq("a7")), Some(Piece::new(Color::Black, PieceKind::Pawn)));
        assert_eq!(board.piece_at(sq("e4")), None);
        assert_eq!(board.squares_of(Color::White).count(), 16);
        assert_eq!(board.side_to_move(), Color::White);
        assert_eq!(board.castling(), CastlingRights::ALL);
    }

    #[test]
    fn test_king_square() {
        let board = Board::starting();
        assert_eq!(board.king_square(Color::Black), Some(sq("e8")));
        assert_eq!(Board::empty().king_square(Color::White), None);
    }

    #[test]
    fn test_edit_leaves_original_untouched() {
        let board = Board::starting();
        let mut edit = board.edit();
        edit.take(sq("e2"));
        let edited = edit.finish();
        assert!(board.piece_at(sq("e2")).is_some());
        assert!(edited.piece_at(sq("e2")).is_none());
    }
}
