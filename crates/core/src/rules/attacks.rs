//! Square threat detection
//!
//! Threats are re-derived from the attacker's point of view instead of
//! reusing move generation, so the answer holds for either color no matter
//! whose turn it is.

use super::moves::{DIAGONALS, KING_OFFSETS, KNIGHT_OFFSETS, ORTHOGONALS};
use crate::board::{Board, Color, Piece, PieceKind, Square};

/// Whether any piece of `by` attacks `target`.
pub fn is_attacked(board: &Board, target: Square, by: Color) -> bool {
    // A pawn of `by` attacks diagonally forward, so look one rank behind.
    let pawn = Piece::new(by, PieceKind::Pawn);
    for df in [-1, 1] {
        if let Some(sq) = target.offset(df, -by.forward()) {
            if board.piece_at(sq) == Some(pawn) {
                return true;
            }
        }
    }

    if hits(board, target, &KNIGHT_OFFSETS, Piece::new(by, PieceKind::Knight))
        || hits(board, target, &KING_OFFSETS, Piece::new(by, PieceKind::King))
    {
        return true;
    }

    ray_hits(board, target, &ORTHOGONALS, by, PieceKind::Rook)
        || ray_hits(board, target, &DIAGONALS, by, PieceKind::Bishop)
}

fn hits(board: &Board, target: Square, offsets: &[(i8, i8)], attacker: Piece) -> bool {
    offsets
        .iter()
        .filter_map(|&(df, dr)| target.offset(df, dr))
        .any(|sq| board.piece_at(sq) == Some(attacker))
}

/// Walks each ray until the first occupied square; a hit is `slider` or a queen of `by`.
fn ray_hits(board: &Board, target: Square, dirs: &[(i8, i8)], by: Color, slider: PieceKind) -> bool {
    for &(df, dr) in dirs {
        let mut current = target;
        while let Some(next) = current.offset(df, dr) {
            if let Some(piece) = board.piece_at(next) {
                if piece.color == by && (piece.kind == slider || piece.kind == PieceKind::Queen) {
                    return true;
                }
                break;
            }
            current = next;
        }
    }
    false
}
