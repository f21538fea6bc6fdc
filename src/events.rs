// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::player::{PlayerView, RoleName};
use crate::rating::RatingDelta;
use crate::team::TeamView;
use crate::types::{EndReason, GameResult, Phase, Side};
use crate::voting::{MoveRecord, TallyEntry};

/// Who an event is for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "names", rename_all = "lowercase")]
pub enum Audience {
    /// Everyone at the table: participants who are present and observers.
    Table(Vec<String>),
    Player(String),
}

impl Audience {
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Audience::Table(names) => names.iter().any(|n| n.eq_ignore_ascii_case(name)),
            Audience::Player(player) => player.eq_ignore_ascii_case(name),
        }
    }
}

/// Everything a client needs to draw the game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub title: String,
    pub creator: String,
    pub phase: Phase,
    pub turn: Side,
    pub ply: u32,
    pub fen: String,
    pub pool: Vec<PlayerView>,
    pub teams: Vec<TeamView>,
    pub observers: Vec<String>,
    pub result: Option<GameResult>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    PhaseChanged {
        snapshot: GameSnapshot,
        /// Seconds until the phase times out.
        remaining: u64,
    },
    MoveSelected {
        record: MoveRecord,
        fen: String,
        snapshot: GameSnapshot,
    },
    VoteTally {
        side: Side,
        ply: u32,
        ballots: Vec<TallyEntry>,
    },
    /// Private confirmation of a hidden proposal.
    MoveConfirmed {
        uci: String,
        san: String,
    },
    RoleAssigned {
        side: Side,
        role: RoleName,
    },
    AccusationCast {
        accuser: String,
        suspect: String,
    },
    AccusationRetracted {
        accuser: String,
    },
    AccusationOutcome {
        side: Side,
        suspect: String,
        was_mole: bool,
        /// The team's mole, revealed when an innocent was voted off.
        mole: Option<String>,
        defected: bool,
    },
    Defection {
        name: String,
        to: Side,
    },
    VetoOffered {
        san: String,
    },
    Vetoed {
        san: String,
        /// One past proposal of the vetoing mole.
        revealed: Option<String>,
    },
    BombDetonated {
        side: Side,
        san: String,
    },
    Inspection {
        /// One past proposal of the inspector's mole.
        revealed: Option<String>,
    },
    GameStarted {
        snapshot: GameSnapshot,
    },
    GameFinished {
        result: GameResult,
        reason: EndReason,
        transcript: String,
        deltas: Vec<RatingDelta>,
    },
    Notice {
        text: String,
    },
    /// The game is closed and may be reaped.
    Defunct,
}

/// Receives every event a game emits. Implementations must not block for
/// long; they are called from the game's own thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, game: &str, audience: &Audience, event: &GameEvent);
}

#[derive(Clone, Debug)]
pub struct Envelope {
    pub game: String,
    pub audience: Audience,
    pub event: GameEvent,
}

/// Forwards events over a channel, for a session layer running elsewhere.
pub struct ChannelSink {
    sender: Mutex<Sender<Envelope>>,
}

impl ChannelSink {
    pub fn new() -> (ChannelSink, Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel();
        let sink = ChannelSink {
            sender: Mutex::new(sender),
        };
        (sink, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, game: &str, audience: &Audience, event: &GameEvent) {
        let envelope = Envelope {
            game: game.to_owned(),
            audience: audience.clone(),
            event: event.clone(),
        };
        let sent = match self.sender.lock() {
            Ok(sender) => sender.send(envelope).is_ok(),
            Err(_) => false,
        };
        if !sent {
            debug!("[{}] event dropped, no receiver", game);
        }
    }
}

/// Writes events to the log as JSON.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, game: &str, audience: &Audience, event: &GameEvent) {
        match serde_json::to_string(event) {
            Ok(json) => info!("[{}] {:?}: {}", game, audience, json),
            Err(err) => warn!("[{}] unserializable event: {}", game, err),
        }
    }
}

pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _game: &str, _audience: &Audience, _event: &GameEvent) {}
}
