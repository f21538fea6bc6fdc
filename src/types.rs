// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::fmt::{self, Display};

/// One of the two sides of the board, and therefore one of the two teams.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

pub const SIDES: [Side; 2] = [Side::White, Side::Black];

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn as_index(self) -> usize {
        match self {
            Side::White => 0,
            Side::Black => 1,
        }
    }

    /// The game result string for a win by this side.
    pub fn win_string(self) -> &'static str {
        match self {
            Side::White => "1-0",
            Side::Black => "0-1",
        }
    }
}

impl From<shakmaty::Color> for Side {
    fn from(color: shakmaty::Color) -> Side {
        match color {
            shakmaty::Color::White => Side::White,
            shakmaty::Color::Black => Side::Black,
        }
    }
}

impl From<Side> for shakmaty::Color {
    fn from(side: Side) -> shakmaty::Color {
        match side {
            Side::White => shakmaty::Color::White,
            Side::Black => shakmaty::Color::Black,
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Side::White => write!(f, "White"),
            Side::Black => write!(f, "Black"),
        }
    }
}

/// A user as the session layer knows them. The engine only borrows the name
/// and rating; the session layer owns the connection behind it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub rating: i32,
}

impl Identity {
    pub fn new<S: Into<String>>(name: S, rating: i32) -> Identity {
        Identity {
            name: name.into(),
            rating,
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.rating)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pregame,
    Voting,
    Veto,
    Postgame,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Phase::Pregame => "pregame",
            Phase::Voting => "voting",
            Phase::Veto => "veto",
            Phase::Postgame => "postgame",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameResult {
    Win(Side),
    Draw,
    Aborted,
}

impl GameResult {
    /// The PGN `Result` tag value.
    pub fn pgn(self) -> &'static str {
        match self {
            GameResult::Win(side) => side.win_string(),
            GameResult::Draw => "1/2-1/2",
            GameResult::Aborted => "*",
        }
    }

    pub fn winner(self) -> Option<Side> {
        match self {
            GameResult::Win(side) => Some(side),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    Forfeit,
    Resignation,
    Deserted,
    MoleVote,
    MutualMoleVote,
    Aborted,
    Broken,
}

impl Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            EndReason::Checkmate => "checkmate",
            EndReason::Stalemate => "stalemate",
            EndReason::InsufficientMaterial => "insufficient material",
            EndReason::Forfeit => "forfeit",
            EndReason::Resignation => "resignation",
            EndReason::Deserted => "deserted",
            EndReason::MoleVote => "mole vote",
            EndReason::MutualMoleVote => "mutual mole vote",
            EndReason::Aborted => "aborted",
            EndReason::Broken => "internal error",
        };
        f.write_str(text)
    }
}
