//! Pseudo-legal move generation, one routine per piece kind

use super::attacks::is_attacked;
use crate::board::{Board, Color, PieceKind, Square};

pub(super) const ORTHOGONALS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
pub(super) const DIAGONALS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];
pub(super) const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];
pub(super) const KING_OFFSETS: [(i8, i8); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Destinations for the piece on `from`, ignoring whether the mover's king
/// is left attacked. Empty when `from` is empty.
pub fn pseudo_moves(board: &Board, from: Square) -> Vec<Square> {
    let Some(piece) = board.piece_at(from) else {
        return Vec::new();
    };
    let color = piece.color;

    match piece.kind {
        PieceKind::Pawn => pawn_moves(board, from, color),
        PieceKind::Knight => step_moves(board, from, color, &KNIGHT_OFFSETS),
        PieceKind::Bishop => slide_moves(board, from, color, &DIAGONALS),
        PieceKind::Rook => slide_moves(board, from, color, &ORTHOGONALS),
        PieceKind::Queen => {
            let mut moves = slide_moves(board, from, color, &ORTHOGONALS);
            moves.extend(slide_moves(board, from, color, &DIAGONALS));
            moves
        }
        PieceKind::King => {
            let mut moves = step_moves(board, from, color, &KING_OFFSETS);
            moves.extend(castling_moves(board, from, color));
            moves
        }
    }
}

fn is_enemy(board: &Board, square: Square, color: Color) -> bool {
    matches!(board.piece_at(square), Some(p) if p.color != color)
}

fn is_own(board: &Board, square: Square, color: Color) -> bool {
    matches!(board.piece_at(square), Some(p) if p.color == color)
}

fn pawn_moves(board: &Board, from: Square, color: Color) -> Vec<Square> {
    let mut moves = Vec::new();
    let dir = color.forward();

    if let Some(one) = from.offset(0, dir) {
        if board.piece_at(one).is_none() {
            moves.push(one);
            if from.rank() == color.pawn_rank() {
                if let Some(two) = one.offset(0, dir) {
                    if board.piece_at(two).is_none() {
                        moves.push(two);
                    }
                }
            }
        }
    }

    // En passant only from the rank a double-stepped enemy pawn lands beside.
    let capture_rank = match color {
        Color::White => 4,
        Color::Black => 3,
    };
    for df in [-1, 1] {
        let Some(target) = from.offset(df, dir) else {
            continue;
        };
        if is_enemy(board, target, color) {
            moves.push(target);
        } else if board.en_passant() == Some(target) && from.rank() == capture_rank {
            moves.push(target);
        }
    }

    moves
}

fn step_moves(board: &Board, from: Square, color: Color, offsets: &[(i8, i8)]) -> Vec<Square> {
    offsets
        .iter()
        .filter_map(|&(df, dr)| from.offset(df, dr))
        .filter(|sq| !is_own(board, *sq, color))
        .collect()
}

fn slide_moves(board: &Board, from: Square, color: Color, dirs: &[(i8, i8)]) -> Vec<Square> {
    let mut moves = Vec::new();
    for &(df, dr) in dirs {
        let mut current = from;
        while let Some(next) = current.offset(df, dr) {
            match board.piece_at(next) {
                None => moves.push(next),
                Some(p) => {
                    if p.color != color {
                        moves.push(next);
                    }
                    break;
                }
            }
            current = next;
        }
    }
    moves
}

fn castling_moves(board: &Board, from: Square, color: Color) -> Vec<Square> {
    let mut moves = Vec::new();
    let rank = color.back_rank();
    let rights = board.castling();
    let enemy = color.opposite();

    if Square::new(4, rank) != Some(from) || is_attacked(board, from, enemy) {
        return moves;
    }

    let square = |file: u8| Square::new(file, rank);
    let empty = |files: &[u8]| {
        files
            .iter()
            .filter_map(|&f| square(f))
            .all(|sq| board.piece_at(sq).is_none())
    };
    let safe = |files: &[u8]| {
        files
            .iter()
            .filter_map(|&f| square(f))
            .all(|sq| !is_attacked(board, sq, enemy))
    };
    let rook_home = |file: u8| {
        square(file)
            .and_then(|sq| board.piece_at(sq))
            .map_or(false, |p| p.color == color && p.kind == PieceKind::Rook)
    };

    if rights.kingside(color) && rook_home(7) && empty(&[5, 6]) && safe(&[5, 6]) {
        moves.extend(square(6));
    }
    if rights.queenside(color) && rook_home(0) && empty(&[1, 2, 3]) && safe(&[3, 2]) {
        moves.extend(square(2));
    }

    moves
}
