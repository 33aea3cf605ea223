//! Rules engine: move generation, threat detection, legality and game end

mod attacks;
mod legal;
mod moves;

pub use attacks::is_attacked;
pub use legal::{
    all_legal_moves, apply_move, has_legal_move, is_check, is_checkmate, is_legal, is_promotion,
    is_stalemate, legal_moves, perft, BoardStatus,
};
pub use moves::pseudo_moves;
