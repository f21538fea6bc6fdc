// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Turning many simultaneous decisions into one.
//!
//! Move selection is deliberately a lottery over proposals rather than a
//! majority vote: three teammates proposing the same move give it three
//! tickets, not a win. Accusations are the opposite and need unanimity.
use rand::seq::SliceRandom;
use rand::Rng;
use shakmaty::{Chess, Move, Position};

use crate::notation;
use crate::team::TeamRoster;
use crate::types::Side;

/// Where a played move came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MoveSource {
    Proposal { player: String },
    /// An armed mole bomb.
    Forced { player: String },
    /// Nobody proposed anything usable.
    Random,
}

impl MoveSource {
    pub fn player(&self) -> Option<&str> {
        match self {
            MoveSource::Proposal { player } | MoveSource::Forced { player } => {
                Some(player.as_str())
            }
            MoveSource::Random => None,
        }
    }
}

/// The move chosen for a ply, before it is played.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub mov: Move,
    pub uci: String,
    pub san: String,
    pub source: MoveSource,
}

impl Selection {
    pub fn is_forced(&self) -> bool {
        match self.source {
            MoveSource::Forced { .. } => true,
            _ => false,
        }
    }
}

/// A proposal that was considered but not played.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternate {
    pub player: String,
    pub uci: String,
    pub san: String,
}

/// The outcome of one ply. Appended to the game history and never changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub ply: u32,
    pub side: Side,
    pub uci: String,
    pub san: String,
    pub source: MoveSource,
    pub alternates: Vec<Alternate>,
    /// Position after the move.
    pub fen: String,
}

impl MoveRecord {
    /// Every (player, san) pair this record remembers, played or not.
    pub fn proposals(&self) -> impl Iterator<Item = (&str, &str)> {
        self.source
            .player()
            .map(|p| (p, self.san.as_str()))
            .into_iter()
            .chain(
                self.alternates
                    .iter()
                    .map(|alt| (alt.player.as_str(), alt.san.as_str())),
            )
    }
}

/// True once every active participant of the team holds a proposal.
/// Automated players count; a team with nobody active is trivially complete.
pub fn participation_complete(team: &TeamRoster) -> bool {
    team.proposal_count() >= team.active_count()
}

/// Picks the move for this ply. An armed bomb with a live proposal wins
/// outright. Otherwise every proposal is one equally likely ticket, and an
/// empty ballot falls back to a random legal move. `vetoed` excludes a
/// previous selection and disables the bomb. Only active participants hold
/// tickets or bombs.
///
/// Returns `None` only when the position has no legal moves at all.
pub fn select_move<R: Rng + ?Sized>(
    team: &TeamRoster,
    pos: &Chess,
    vetoed: Option<&Selection>,
    rng: &mut R,
) -> Option<Selection> {
    if vetoed.is_none() {
        let forced = team
            .mole()
            .filter(|mole| mole.is_active() && mole.bomb_armed())
            .and_then(|mole| mole.proposal.as_ref().map(|prop| (mole, prop)));
        if let Some((mole, proposal)) = forced {
            return Some(Selection {
                mov: proposal.mov.clone(),
                uci: proposal.uci.clone(),
                san: proposal.san.clone(),
                source: MoveSource::Forced {
                    player: mole.identity.name.clone(),
                },
            });
        }
    }

    let excluded = vetoed.and_then(|sel| sel.source.player());
    let tickets: Vec<_> = team
        .players
        .iter()
        .filter(|p| p.is_active())
        .filter(|p| match excluded {
            Some(name) => !p.is(name),
            None => true,
        })
        .filter_map(|p| p.proposal.as_ref().map(|prop| (p, prop)))
        .collect();

    if let Some(&(player, proposal)) = tickets.choose(rng) {
        return Some(Selection {
            mov: proposal.mov.clone(),
            uci: proposal.uci.clone(),
            san: proposal.san.clone(),
            source: MoveSource::Proposal {
                player: player.identity.name.clone(),
            },
        });
    }

    random_selection(pos, rng)
}

/// A uniformly random legal move.
pub fn random_selection<R: Rng + ?Sized>(pos: &Chess, rng: &mut R) -> Option<Selection> {
    let legal = pos.legal_moves();
    let mov = legal.choose(rng)?.clone();
    Some(Selection {
        uci: notation::uci(&mov),
        san: notation::san(pos, &mov),
        mov,
        source: MoveSource::Random,
    })
}

/// Every proposal on the team other than the selected one.
pub fn alternates(team: &TeamRoster, selection: &Selection) -> Vec<Alternate> {
    if selection.is_forced() {
        return vec![];
    }

    let chosen = selection.source.player();
    team.players
        .iter()
        .filter(|p| p.is_active())
        .filter(|p| match chosen {
            Some(name) => !p.is(name),
            None => true,
        })
        .filter_map(|p| {
            p.proposal.as_ref().map(|prop| Alternate {
                player: p.identity.name.clone(),
                uci: prop.uci.clone(),
                san: prop.san.clone(),
            })
        })
        .collect()
}

/// Updates skip counters after a ply. Proposing resets the counter; a
/// forced ply does not count against anyone.
pub fn record_participation(team: &mut TeamRoster, forced: bool) {
    for player in &mut team.players {
        if player.proposal.is_some() {
            player.skipped = 0;
        } else if !forced {
            player.skipped += 1;
        }
    }
}

/// The suspect every eligible teammate agrees on, if there is one. Eligible
/// voters are active people other than the suspect, and there must be at
/// least one of them.
pub fn voted_off(team: &TeamRoster) -> Option<String> {
    team.players
        .iter()
        .filter(|suspect| suspect.is_active())
        .find(|suspect| {
            let mut votes = 0;
            for voter in &team.players {
                if voter.is(suspect.name()) || !voter.is_interactive() {
                    continue;
                }
                match voter.accusation {
                    Some(ref name) if suspect.is(name) => votes += 1,
                    _ => return false,
                }
            }
            votes > 0
        })
        .map(|suspect| suspect.identity.name.clone())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "san", rename_all = "lowercase")]
pub enum Ballot {
    Pending,
    Hidden,
    Cast(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    pub player: String,
    pub ballot: Ballot,
}

/// Who has proposed what so far this ply.
pub fn tally(team: &TeamRoster, hidden: bool) -> Vec<TallyEntry> {
    team.players
        .iter()
        .map(|p| TallyEntry {
            player: p.identity.name.clone(),
            ballot: match p.proposal {
                None => Ballot::Pending,
                Some(_) if hidden => Ballot::Hidden,
                Some(ref prop) => Ballot::Cast(prop.san.clone()),
            },
        })
        .collect()
}
