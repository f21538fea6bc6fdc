// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use thiserror::Error;

use crate::types::{Phase, Side};

/// A command that was rejected. The game state is exactly as it was before
/// the command arrived.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("bad move: {0}")]
    BadMove(String),

    #[error("illegal move: {0}")]
    IllegalMove(String),

    #[error("bad phase: {0}")]
    WrongPhase(Phase),

    #[error("current turn: {0}")]
    NotYourTurn(Side),

    #[error("not in this game: {0}")]
    NotParticipant(String),

    #[error("player not found (or wrong side): {0}")]
    UnknownPlayer(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("too many players")]
    Full,

    #[error("already joined")]
    AlreadyJoined,

    #[error("already observing")]
    AlreadyObserving,

    #[error("game not ready: {0} players")]
    NotReady(&'static str),

    #[error("no more accusations for this team")]
    AccusationLimit,

    #[error("you have been voted off")]
    VotedOff,

    #[error("{name} must be inactive for {required} turns (currently: {skipped})")]
    NotKickable {
        name: String,
        skipped: u32,
        required: u32,
    },

    #[error("power unavailable: {0}")]
    Unavailable(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("invalid game: {0}")]
    InvalidGame(String),

    #[error("no such game: {0}")]
    NoSuchGame(String),

    #[error("game is closed")]
    GameClosed,
}

/// A broken invariant inside the turn loop. The game cannot continue.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("rules rejected selected move {uci} at ply {ply}")]
    RejectedMove { uci: String, ply: u32 },

    #[error("no legal move to play at ply {0}")]
    NoLegalMove(u32),
}

pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kick_message_names_the_threshold() {
        let err = CommandError::NotKickable {
            name: "bob".to_owned(),
            skipped: 1,
            required: 2,
        };
        assert_eq!(
            "bob must be inactive for 2 turns (currently: 1)",
            err.to_string()
        );
    }
}
