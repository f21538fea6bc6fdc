// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::player::{Participant, PlayerView};
use crate::types::Side;

/// A member of a team as it stood when the game started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineupEntry {
    pub name: String,
    pub mole: bool,
}

/// The participants playing one side, in turn order.
#[derive(Clone, Debug)]
pub struct TeamRoster {
    pub side: Side,
    pub players: Vec<Participant>,
    pub lineup: Vec<LineupEntry>,
    /// Resolved accusations so far. Never decreases.
    pub accusations: u32,
}

impl TeamRoster {
    pub fn new(side: Side) -> TeamRoster {
        TeamRoster {
            side,
            players: vec![],
            lineup: vec![],
            accusations: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.players.iter().position(|p| p.is(name))
    }

    pub fn find(&self, name: &str) -> Option<&Participant> {
        self.players.iter().find(|p| p.is(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Participant> {
        self.players.iter_mut().find(|p| p.is(name))
    }

    pub fn push(&mut self, mut player: Participant) {
        player.side = Some(self.side);
        self.players.push(player);
    }

    /// Removes a participant, handing ownership back to the caller.
    pub fn remove(&mut self, name: &str) -> Option<Participant> {
        let index = self.position(name)?;
        Some(self.players.remove(index))
    }

    pub fn mole(&self) -> Option<&Participant> {
        self.players.iter().find(|p| p.is_mole())
    }

    pub fn mole_mut(&mut self) -> Option<&mut Participant> {
        self.players.iter_mut().find(|p| p.is_mole())
    }

    pub fn active_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_active()).count()
    }

    pub fn interactive_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_interactive()).count()
    }

    /// Proposals held by active participants.
    pub fn proposal_count(&self) -> usize {
        self.players
            .iter()
            .filter(|p| p.is_active() && p.proposal.is_some())
            .count()
    }

    /// True when every person still playing for this side has resigned.
    pub fn all_resigned(&self) -> bool {
        self.players
            .iter()
            .filter(|p| p.is_interactive())
            .all(|p| p.resigning)
    }

    pub fn clear_accusations(&mut self) {
        for player in &mut self.players {
            player.accusation = None;
        }
    }

    /// Drops every accusation pointing at `name`.
    pub fn forget_suspect(&mut self, name: &str) {
        for player in &mut self.players {
            let points_at = match player.accusation {
                Some(ref suspect) => suspect.eq_ignore_ascii_case(name),
                None => false,
            };
            if points_at {
                player.accusation = None;
            }
        }
    }

    pub fn record_lineup(&mut self) {
        self.lineup = self
            .players
            .iter()
            .map(|p| LineupEntry {
                name: p.identity.name.clone(),
                mole: p.is_mole(),
            })
            .collect();
    }

    /// The starting lineup with the mole marked, as used in transcripts.
    pub fn lineup_string(&self) -> String {
        self.lineup
            .iter()
            .map(|entry| {
                if entry.mole {
                    format!("{}(*)", entry.name)
                } else {
                    entry.name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn starting_mole(&self) -> Option<&str> {
        self.lineup
            .iter()
            .find(|entry| entry.mole)
            .map(|entry| entry.name.as_str())
    }

    pub fn view(&self, kick_threshold: u32) -> TeamView {
        TeamView {
            side: self.side,
            players: self.players.iter().map(|p| p.view(kick_threshold)).collect(),
            accusations: self.accusations,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamView {
    pub side: Side,
    pub players: Vec<PlayerView>,
    pub accusations: u32,
}
