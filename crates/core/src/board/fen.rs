//! Board text (FEN) parsing and serialization

use std::fmt;
use std::str::FromStr;

use super::{Board, CastlingRights, Color, Piece, Square};
use crate::error::{Error, Result};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

impl Board {
    /// Parses the six-field board text.
    pub fn from_fen(fen: &str) -> Result<Self> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(Error::Format(format!(
                "expected 6 fields, got {}",
                fields.len()
            )));
        }

        let mut board = Board::empty();

        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(Error::Format(format!("expected 8 ranks, got {}", ranks.len())));
        }

        for (idx, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - idx as u8;
            let mut file: u8 = 0;
            for c in rank_str.chars() {
                if let Some(n) = c.to_digit(10) {
                    if !(1..=8).contains(&n) {
                        return Err(Error::Format(format!(
                            "invalid empty run '{}' on rank {}",
                            c,
                            rank + 1
                        )));
                    }
                    file += n as u8;
                } else {
                    let piece = Piece::from_char(c).ok_or_else(|| {
                        Error::Format(format!("unrecognized piece character '{}'", c))
                    })?;
                    if file > 7 {
                        return Err(Error::Format(format!("rank {} overflows", rank + 1)));
                    }
                    board.place(file, rank, piece);
                    file += 1;
                }
                if file > 8 {
                    return Err(Error::Format(format!("rank {} overflows", rank + 1)));
                }
            }
            if file != 8 {
                return Err(Error::Format(format!(
                    "rank {} has {} squares instead of 8",
                    rank + 1,
                    file
                )));
            }
        }

        let mut side = fields[1].chars();
        board.side_to_move = match (side.next().and_then(Color::from_char), side.next()) {
            (Some(color), None) => color,
            _ => {
                return Err(Error::Format(format!(
                    "invalid side to move '{}'",
                    fields[1]
                )))
            }
        };

        board.castling = CastlingRights::from_fen(fields[2])
            .ok_or_else(|| Error::Format(format!("invalid castling field '{}'", fields[2])))?;

        board.en_passant = match fields[3] {
            "-" => None,
            text => {
                let square: Square = text.parse()?;
                if square.rank() != 2 && square.rank() != 5 {
                    return Err(Error::Format(format!(
                        "en passant target {} is not on rank 3 or 6",
                        square
                    )));
                }
                Some(square)
            }
        };

        board.halfmove_clock = fields[4]
            .parse()
            .map_err(|_| Error::Format(format!("invalid halfmove clock '{}'", fields[4])))?;
        board.fullmove_number = fields[5]
            .parse()
            .map_err(|_| Error::Format(format!("invalid fullmove number '{}'", fields[5])))?;

        Ok(board)
    }

    pub fn to_fen(&self) -> String {
        let mut fen = String::with_capacity(90);

        for rank in (0..8u8).rev() {
            let mut empty = 0u8;
            for file in 0..8u8 {
                match self.squares[(rank * 8 + file) as usize] {
                    Some(piece) => {
                        if empty > 0 {
                            fen.push((b'0' + empty) as char);
                            empty = 0;
                        }
                        fen.push(piece.as_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                fen.push((b'0' + empty) as char);
            }
            if rank > 0 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(self.side_to_move.as_char());
        fen.push(' ');
        fen.push_str(&self.castling.to_fen());
        fen.push(' ');
        match self.en_passant {
            Some(square) => fen.push_str(&square.to_string()),
            None => fen.push('-'),
        }
        fen.push_str(&format!(" {} {}", self.halfmove_clock, self.fullmove_number));

        fen
    }
}

impl FromStr for Board {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Board::from_fen(s)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fen())
    }
}
