// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::fmt::Write;

use crate::types::{GameResult, Side};
use crate::voting::MoveRecord;

/// Social events worth a comment in the move text.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Annotation {
    VotedOff,
    Rampage,
    Defection,
}

impl Annotation {
    fn label(self) -> &'static str {
        match self {
            Annotation::VotedOff => "VOTED OFF",
            Annotation::Rampage => "RAMPAGE",
            Annotation::Defection => "DEFECTION",
        }
    }
}

/// A PGN-style record of a game, built up as plies are played.
///
/// Every move carries a comment naming who proposed it (`?` for a random
/// fallback) and a `[%cal]` arrow list with unplayed proposals in red and
/// the played move in green. Unplayed proposals also appear as one-move
/// variations.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    event: String,
    movetext: String,
}

impl Transcript {
    pub fn new(event: &str) -> Transcript {
        Transcript {
            event: event.to_owned(),
            movetext: String::new(),
        }
    }

    pub fn record_move(&mut self, record: &MoveRecord) {
        let number = (record.ply + 1) / 2;
        let prefix = match record.side {
            Side::White => format!("{}.", number),
            Side::Black => format!("{}...", number),
        };

        let mut arrows = String::from("[%cal ");
        for alt in &record.alternates {
            let _ = write!(arrows, "R{},", squares(&alt.uci));
        }
        let _ = write!(arrows, "G{}]", squares(&record.uci));

        let _ = write!(
            self.movetext,
            "{} {} {{{} {}}} ",
            prefix,
            record.san,
            record.source.player().unwrap_or("?"),
            arrows
        );
        for alt in &record.alternates {
            let _ = write!(self.movetext, "( {} {{{}}} ) ", alt.san, alt.player);
        }
    }

    pub fn annotate(&mut self, annotation: Annotation, name: &str) {
        let _ = write!(self.movetext, "{{{}: {}}} ", annotation.label(), name);
    }

    pub fn render(&self, white: &str, black: &str, result: GameResult) -> String {
        let mut pgn = String::new();
        let _ = writeln!(pgn, "[Event \"{}\"]", self.event);
        let _ = writeln!(pgn, "[White \"{}\"]", white);
        let _ = writeln!(pgn, "[Black \"{}\"]", black);
        let _ = writeln!(pgn, "[Result \"{}\"]", result.pgn());
        let _ = writeln!(pgn);
        let _ = write!(pgn, "{}{}", self.movetext, result.pgn());
        pgn
    }
}

// Origin and destination only; arrows ignore promotion.
fn squares(uci: &str) -> &str {
    uci.get(..4).unwrap_or(uci)
}
