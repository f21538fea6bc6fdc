// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Rules engine for team-voting chess with hidden moles.
//!
//! Each side is a team of people who propose moves; one proposal per ply is
//! drawn at random and played. One member of each team is secretly working
//! for the other side.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod balance;
pub mod config;
pub mod error;
pub mod events;
pub mod game;
pub mod notation;
pub mod pgn;
pub mod player;
pub mod rating;
pub mod record;
pub mod runner;
pub mod team;
pub mod types;
pub mod uci;
pub mod voting;

pub use config::GameConfig;
pub use error::{CommandError, CommandResult, FatalError};
pub use events::{Audience, ChannelSink, EventSink, GameEvent, LogSink, NullSink};
pub use game::{Ack, Command, Game, Readiness};
pub use record::{CsvRecorder, MemoryStore, NullStore, ResultStore};
pub use runner::{GameHandle, Lobby};
pub use types::{EndReason, GameResult, Identity, Phase, Side};
pub use uci::{MoveSuggester, RandomMover, UciEngine};
