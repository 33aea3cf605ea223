//! Legal move filtering, move application and end-of-game detection

use serde::{Deserialize, Serialize};

use super::attacks::is_attacked;
use super::moves::pseudo_moves;
use crate::board::{Board, Color, Move, Piece, PieceKind, Square};

const PROMOTION_KINDS: [PieceKind; 4] = [
    PieceKind::Queen,
    PieceKind::Rook,
    PieceKind::Bishop,
    PieceKind::Knight,
];

/// Pseudo-moves of the piece on `from` that do not leave its own king attacked.
///
/// Each candidate is played on a fresh board and the mover's king is
/// re-checked, which covers pins and discovered checks without any pin
/// bookkeeping.
pub fn legal_moves(board: &Board, from: Square) -> Vec<Square> {
    let Some(piece) = board.piece_at(from) else {
        return Vec::new();
    };

    pseudo_moves(board, from)
        .into_iter()
        .filter(|&to| leaves_king_safe(board, Move::new(from, to), piece.color))
        .collect()
}

fn leaves_king_safe(board: &Board, mv: Move, color: Color) -> bool {
    let next = apply_move(board, mv);
    match next.king_square(color) {
        Some(king) => !is_attacked(&next, king, color.opposite()),
        None => true,
    }
}

/// Whether `mv` is a legal move for the side to move.
pub fn is_legal(board: &Board, mv: Move) -> bool {
    if mv.promotion.map_or(false, |k| !k.is_promotion_target()) {
        return false;
    }
    match board.piece_at(mv.from) {
        Some(piece) if piece.color == board.side_to_move() => {
            legal_moves(board, mv.from).contains(&mv.to)
        }
        _ => false,
    }
}

/// Whether moving the piece on `from` to `to` lands a pawn on its last rank.
pub fn is_promotion(board: &Board, from: Square, to: Square) -> bool {
    matches!(
        board.piece_at(from),
        Some(Piece { kind: PieceKind::Pawn, color }) if to.rank() == color.opposite().back_rank()
    )
}

/// Every legal move of the side to move, with one entry per promotion kind.
pub fn all_legal_moves(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    for from in board.squares_of(board.side_to_move()) {
        for to in legal_moves(board, from) {
            if is_promotion(board, from, to) {
                moves.extend(PROMOTION_KINDS.iter().map(|&k| Move::new(from, to).with_promotion(k)));
            } else {
                moves.push(Move::new(from, to));
            }
        }
    }
    moves
}

pub fn has_legal_move(board: &Board) -> bool {
    board
        .squares_of(board.side_to_move())
        .any(|from| !legal_moves(board, from).is_empty())
}

/// Plays `mv` and returns the resulting board.
///
/// The move is not re-validated: callers confirm it with [`legal_moves`]
/// first. A move from an empty square yields an unchanged copy.
pub fn apply_move(board: &Board, mv: Move) -> Board {
    let Some(piece) = board.piece_at(mv.from) else {
        return board.clone();
    };
    let color = piece.color;

    let mut edit = board.edit();
    edit.take(mv.from);
    let mut captured = edit.take(mv.to).is_some();
    let mut placed = piece;

    match piece.kind {
        PieceKind::Pawn => {
            let diagonal = mv.from.file() != mv.to.file();
            if diagonal && !captured && board.en_passant() == Some(mv.to) {
                if let Some(victim) = mv.to.offset(0, -color.forward()) {
                    edit.take(victim);
                }
                captured = true;
            }
            if mv.to.rank() == color.opposite().back_rank() {
                let kind = mv
                    .promotion
                    .filter(|k| k.is_promotion_target())
                    .unwrap_or(PieceKind::Queen);
                placed = Piece::new(color, kind);
            }
        }
        PieceKind::King => {
            edit.castling_mut().revoke_all(color);
            let df = mv.to.file() as i8 - mv.from.file() as i8;
            if df.abs() == 2 {
                let rank = color.back_rank();
                let (rook_from, rook_to) = if df > 0 { (7, 5) } else { (0, 3) };
                if let (Some(rf), Some(rt)) = (Square::new(rook_from, rank), Square::new(rook_to, rank)) {
                    let rook = edit.take(rf);
                    edit.set(rt, rook);
                }
            }
        }
        PieceKind::Rook => edit.castling_mut().revoke_for_rook_square(mv.from),
        _ => {}
    }

    if captured {
        edit.castling_mut().revoke_for_rook_square(mv.to);
    }
    edit.set(mv.to, Some(placed));

    let double_step = piece.kind == PieceKind::Pawn
        && (mv.to.rank() as i8 - mv.from.rank() as i8).abs() == 2;
    edit.en_passant(if double_step {
        mv.from.offset(0, color.forward())
    } else {
        None
    });

    let halfmove = if piece.kind == PieceKind::Pawn || captured {
        0
    } else {
        board.halfmove_clock() + 1
    };
    let fullmove = match color {
        Color::Black => board.fullmove_number() + 1,
        Color::White => board.fullmove_number(),
    };
    edit.counters(halfmove, fullmove).side_to_move(color.opposite());

    edit.finish()
}

/// Whether the side to move has its king attacked.
pub fn is_check(board: &Board) -> bool {
    let side = board.side_to_move();
    board
        .king_square(side)
        .map_or(false, |king| is_attacked(board, king, side.opposite()))
}

pub fn is_checkmate(board: &Board) -> bool {
    is_check(board) && !has_legal_move(board)
}

pub fn is_stalemate(board: &Board) -> bool {
    !is_check(board) && !has_legal_move(board)
}

/// Check flags for a position, computed with a single legal-move scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoardStatus {
    pub is_check: bool,
    pub is_checkmate: bool,
    pub is_stalemate: bool,
}

impl BoardStatus {
    pub fn of(board: &Board) -> Self {
        let check = is_check(board);
        let stuck = !has_legal_move(board);
        Self {
            is_check: check,
            is_checkmate: check && stuck,
            is_stalemate: !check && stuck,
        }
    }

    pub fn is_over(&self) -> bool {
        self.is_checkmate || self.is_stalemate
    }
}

/// Counts leaf nodes of the legal move tree to `depth`.
pub fn perft(board: &Board, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    let moves = all_legal_moves(board);
    if depth == 1 {
        return moves.len() as u64;
    }
    moves
        .into_iter()
        .map(|mv| perft(&apply_move(board, mv), depth - 1))
        .sum()
}
