//! Count leaf nodes of the legal move tree, optionally split by first move

use std::time::Instant;

use chess_lobby_core::rules::{all_legal_moves, apply_move, perft};
use chess_lobby_core::{Board, STARTING_FEN};

fn main() {
    let mut args = std::env::args().skip(1);
    let depth: u32 = match args.next().map(|d| d.parse()) {
        Some(Ok(depth)) => depth,
        _ => {
            eprintln!("Usage: perft <depth> [fen]");
            std::process::exit(1);
        }
    };
    let fen = args.collect::<Vec<_>>().join(" ");
    let fen = if fen.is_empty() { STARTING_FEN.to_string() } else { fen };

    let board = match Board::from_fen(&fen) {
        Ok(board) => board,
        Err(e) => {
            eprintln!("Bad position: {}", e);
            std::process::exit(1);
        }
    };

    println!("Position: {}", board);
    let start = Instant::now();
    let mut total = 0;

    if depth == 0 {
        total = 1;
    } else {
        for mv in all_legal_moves(&board) {
            let nodes = perft(&apply_move(&board, mv), depth - 1);
            println!("  {}: {}", mv, nodes);
            total += nodes;
        }
    }

    let elapsed = start.elapsed();
    println!("\nNodes: {}", total);
    println!("Time: {:.3}s", elapsed.as_secs_f64());
}
