// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use regex::Regex;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Move, Position, Role, Square};

use crate::error::{CommandError, CommandResult};

lazy_static! {
    static ref MOVE_PATTERN: Regex =
        Regex::new(r"^([a-h][1-8][a-h][1-8])([qrbnQRBN])?$").expect("move pattern");
}

/// Resolves a coordinate move string (`e2e4`, `e7e8q`) against a position.
/// Strings that are not coordinate moves are `BadMove`; well-formed moves
/// the position does not allow are `IllegalMove`.
pub fn parse_move(pos: &Chess, text: &str) -> CommandResult<Move> {
    let trimmed = text.trim();
    let caps = MOVE_PATTERN
        .captures(trimmed)
        .ok_or_else(|| CommandError::BadMove(text.to_owned()))?;
    let mut normalized = caps[1].to_owned();
    if let Some(promotion) = caps.get(2) {
        normalized.push_str(&promotion.as_str().to_ascii_lowercase());
    }

    let uci: UciMove = normalized
        .parse()
        .map_err(|_| CommandError::BadMove(text.to_owned()))?;
    let mov = uci
        .to_move(pos)
        .map_err(|_| CommandError::IllegalMove(trimmed.to_owned()))?;
    if !pos.is_legal(&mov) {
        return Err(CommandError::IllegalMove(trimmed.to_owned()));
    }

    Ok(mov)
}

/// Coordinate notation, with castling written as the king's two squares.
pub fn uci(mov: &Move) -> String {
    UciMove::from_move(mov, CastlingMode::Standard).to_string()
}

/// Origin and destination squares for a `[%cal]` arrow. Promotion pieces are
/// dropped.
pub fn arrow(mov: &Move) -> String {
    let mut text = uci(mov);
    text.truncate(4);
    text
}

/// Standard algebraic notation for a legal move in `pos`.
pub fn san(pos: &Chess, mov: &Move) -> String {
    let mut text = match *mov {
        Move::Castle { king, rook } => {
            if rook.file() > king.file() {
                "O-O".to_owned()
            } else {
                "O-O-O".to_owned()
            }
        }
        Move::Normal {
            role,
            from,
            capture,
            to,
            promotion,
        } => {
            let mut text = String::new();
            if role == Role::Pawn {
                if capture.is_some() {
                    text.push(from.file().char());
                    text.push('x');
                }
            } else {
                text.push(role.upper_char());
                text.push_str(&origin_fragment(pos, role, from, to));
                if capture.is_some() {
                    text.push('x');
                }
            }

            text.push_str(&to.to_string());
            if let Some(piece) = promotion {
                text.push('=');
                text.push(piece.upper_char());
            }
            text
        }
        Move::EnPassant { from, to } => format!("{}x{}", from.file().char(), to),
        Move::Put { role, to } => format!("{}@{}", role.upper_char(), to),
    };

    text.push_str(check_suffix(pos, mov));
    text
}

// The smallest piece of the origin square that tells this move apart from
// every other legal move of the same piece type to the same square.
fn origin_fragment(pos: &Chess, role: Role, from: Square, to: Square) -> String {
    let rivals: Vec<Square> = pos
        .legal_moves()
        .iter()
        .filter_map(|other| match *other {
            Move::Normal {
                role: other_role,
                from: other_from,
                to: other_to,
                ..
            } if other_role == role && other_to == to && other_from != from => Some(other_from),
            _ => None,
        })
        .collect();

    if rivals.is_empty() {
        return String::new();
    }

    let file_conflict = rivals.iter().any(|sq| sq.file() == from.file());
    let rank_conflict = rivals.iter().any(|sq| sq.rank() == from.rank());
    match (file_conflict, rank_conflict) {
        (true, true) => from.to_string(),
        (true, false) => from.rank().char().to_string(),
        (false, _) => from.file().char().to_string(),
    }
}

fn check_suffix(pos: &Chess, mov: &Move) -> &'static str {
    let mut scratch = pos.clone();
    scratch.play_unchecked(mov);
    if scratch.is_checkmate() {
        "#"
    } else if scratch.is_check() {
        "+"
    } else {
        ""
    }
}
