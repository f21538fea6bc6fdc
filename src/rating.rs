// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::config::GameConfig;
use crate::player::Participant;
use crate::team::TeamRoster;
use crate::types::{GameResult, Side};

const BASE_GAIN: i32 = 16;
const MAX_SWING: i32 = 32;
const GAP_FACTOR: f64 = 0.04;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingDelta {
    pub name: String,
    pub side: Side,
    pub before: i32,
    pub after: i32,
}

impl RatingDelta {
    pub fn change(&self) -> i32 {
        self.after - self.before
    }
}

fn effective_rating(player: &Participant, config: &GameConfig) -> i32 {
    if !player.ai {
        player.identity.rating
    } else if player.is_mole() {
        config.ai_mole_rating
    } else {
        config.ai_rating
    }
}

fn average(team: &TeamRoster, config: &GameConfig) -> Option<f64> {
    if team.is_empty() {
        return None;
    }

    let sum: i32 = team
        .players
        .iter()
        .map(|p| effective_rating(p, config))
        .sum();
    Some(f64::from(sum) / team.len() as f64)
}

/// Rating changes for every person on either team. Automated players count
/// toward team averages but never get a delta; a participant who ends the
/// game still holding the mole role has the sign of their change flipped.
pub fn rating_deltas(
    white: &TeamRoster,
    black: &TeamRoster,
    result: GameResult,
    config: &GameConfig,
) -> Vec<RatingDelta> {
    let (white_avg, black_avg) = match (average(white, config), average(black, config)) {
        (Some(w), Some(b)) => (w, b),
        _ => return vec![],
    };

    let (white_change, black_change) = match result {
        GameResult::Win(Side::White) => {
            let gain = win_gain(white_avg, black_avg);
            (gain, -gain)
        }
        GameResult::Win(Side::Black) => {
            let gain = win_gain(black_avg, white_avg);
            (-gain, gain)
        }
        GameResult::Draw => {
            let shift = gap(white_avg, black_avg).max(-MAX_SWING).min(MAX_SWING);
            (-shift, shift)
        }
        GameResult::Aborted => return vec![],
    };

    let mut deltas = vec![];
    for (team, change) in &[(white, white_change), (black, black_change)] {
        for player in team.players.iter().filter(|p| !p.ai) {
            let change = if player.is_mole() { -change } else { *change };
            deltas.push(RatingDelta {
                name: player.identity.name.clone(),
                side: team.side,
                before: player.identity.rating,
                after: player.identity.rating + change,
            });
        }
    }

    deltas
}

fn gap(first: f64, second: f64) -> i32 {
    ((first - second) * GAP_FACTOR).trunc() as i32
}

fn win_gain(winners: f64, losers: f64) -> i32 {
    (BASE_GAIN - gap(winners, losers)).max(0).min(MAX_SWING)
}
