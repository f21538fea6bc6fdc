// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::{CommandError, CommandResult};
use crate::types::Phase;

/// Options for a single game. Everything that used to be process-wide (the
/// name pool for automated players, the random seed) lives here so that two
/// games never share mutable state.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub move_time: Duration,
    pub veto_time: Duration,
    pub post_game_linger: Duration,
    pub pregame_idle: Duration,
    /// Minimum team size. Also the pool size needed to start without AI.
    pub min_players: usize,
    /// Maximum team size.
    pub max_players: usize,
    pub kick_threshold: u32,
    pub abort_ply_limit: u32,
    pub accusation_limit: u32,
    pub ai_fill: bool,
    pub balanced_teams: bool,
    pub defection: bool,
    pub end_on_accusation: bool,
    pub end_on_mutual_accusation: bool,
    pub mole_veto: bool,
    pub mole_bomb: bool,
    pub inspector_role: bool,
    /// Own-team turns between inspections.
    pub inspect_interval: u32,
    pub mole_move_prediction: bool,
    pub team_move_prediction: bool,
    pub hide_move_votes: bool,
    pub casual: bool,
    /// Fraction of the move time an automated player may think for.
    pub think_factor: f64,
    pub ai_rating: i32,
    pub ai_mole_rating: i32,
    pub ai_names: Vec<String>,
    pub start_fen: Option<String>,
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> GameConfig {
        GameConfig {
            move_time: Duration::from_secs(60),
            veto_time: Duration::from_secs(8),
            post_game_linger: Duration::from_secs(300),
            pregame_idle: Duration::from_secs(999),
            min_players: 3,
            max_players: 6,
            kick_threshold: 2,
            abort_ply_limit: 4,
            accusation_limit: 1,
            ai_fill: true,
            balanced_teams: true,
            defection: true,
            end_on_accusation: false,
            end_on_mutual_accusation: false,
            mole_veto: false,
            mole_bomb: true,
            inspector_role: true,
            inspect_interval: 12,
            mole_move_prediction: false,
            team_move_prediction: false,
            hide_move_votes: false,
            casual: true,
            think_factor: 0.25,
            ai_rating: 1600,
            ai_mole_rating: 1200,
            ai_names: DEFAULT_AI_NAMES.iter().map(|&n| n.to_owned()).collect(),
            start_fen: None,
            seed: None,
        }
    }
}

const DEFAULT_AI_NAMES: [&str; 12] = [
    "Burrow", "Digger", "Tunnel", "Molehill", "Sniffer", "Claws", "Velvet", "Squint",
    "Loam", "Shovel", "Gopher", "Talpa",
];

impl GameConfig {
    pub fn think_time(&self) -> Duration {
        self.move_time.mul_f64(self.think_factor)
    }

    /// Applies a session-layer option map. Either every entry applies or the
    /// config is left alone; on success returns the new config and one notice
    /// per changed option.
    pub fn with_options(
        &self,
        options: &Map<String, Value>,
        phase: Phase,
    ) -> CommandResult<(GameConfig, Vec<String>)> {
        let mut next = self.clone();
        let mut notices = vec![];
        for (key, value) in options {
            let pregame_only = |name: &str| -> CommandResult<()> {
                if phase == Phase::Pregame {
                    Ok(())
                } else {
                    Err(CommandError::InvalidOption(format!(
                        "{} can only change before the game starts",
                        name
                    )))
                }
            };

            let notice = match key.as_str() {
                "move_time" => {
                    next.move_time = seconds(key, value)?;
                    format!("Move Time: {}", next.move_time.as_secs())
                }
                "veto_time" => {
                    next.veto_time = seconds(key, value)?;
                    format!("Veto Time: {}", next.veto_time.as_secs())
                }
                "post_time" => {
                    next.post_game_linger = seconds(key, value)?;
                    format!("Postgame Time: {}", next.post_game_linger.as_secs())
                }
                "min_play" => {
                    pregame_only(key)?;
                    let n = count(key, value)? as usize;
                    if n < 1 || n >= next.max_players {
                        return Err(CommandError::InvalidOption(format!("min_play: {}", n)));
                    }
                    next.min_players = n;
                    format!("Min Players: {}", n)
                }
                "max_play" => {
                    pregame_only(key)?;
                    let n = count(key, value)? as usize;
                    if n <= next.min_players || n >= 99 {
                        return Err(CommandError::InvalidOption(format!("max_play: {}", n)));
                    }
                    next.max_players = n;
                    format!("Max Players: {}", n)
                }
                "vote_limit" => {
                    next.accusation_limit = count(key, value)? as u32;
                    format!("Accusation Limit: {}", next.accusation_limit)
                }
                "mole_veto" => {
                    next.mole_veto = flag(key, value)?;
                    format!("Mole Veto: {}", next.mole_veto)
                }
                "mole_bomb" => {
                    pregame_only(key)?;
                    next.mole_bomb = flag(key, value)?;
                    format!("Mole Bomb: {}", next.mole_bomb)
                }
                "inspector_role" => {
                    pregame_only(key)?;
                    next.inspector_role = flag(key, value)?;
                    format!("Inspector Role: {}", next.inspector_role)
                }
                "mole_move_predict" => {
                    next.mole_move_prediction = flag(key, value)?;
                    format!("Mole Move Prediction: {}", next.mole_move_prediction)
                }
                "team_move_predict" => {
                    next.team_move_prediction = flag(key, value)?;
                    format!("Team Move Prediction: {}", next.team_move_prediction)
                }
                "hide_move" => {
                    next.hide_move_votes = flag(key, value)?;
                    format!("Hide Move Votes: {}", next.hide_move_votes)
                }
                "casual" => {
                    pregame_only(key)?;
                    next.casual = flag(key, value)?;
                    format!("Casual: {}", next.casual)
                }
                "defection" => {
                    next.defection = flag(key, value)?;
                    format!("Defection: {}", next.defection)
                }
                "end_on_accusation" => {
                    next.end_on_accusation = flag(key, value)?;
                    format!("End On Accusation: {}", next.end_on_accusation)
                }
                "end_on_mutual_accusation" => {
                    next.end_on_mutual_accusation = flag(key, value)?;
                    format!("End On Mutual Accusation: {}", next.end_on_mutual_accusation)
                }
                "ai_fill" => {
                    pregame_only(key)?;
                    next.ai_fill = flag(key, value)?;
                    format!("AI Fill: {}", next.ai_fill)
                }
                _ => return Err(CommandError::InvalidOption(key.clone())),
            };
            notices.push(notice);
        }

        Ok((next, notices))
    }
}

fn seconds(key: &str, value: &Value) -> CommandResult<Duration> {
    let secs = count(key, value)?;
    if secs == 0 {
        return Err(CommandError::InvalidOption(format!("{}: must be positive", key)));
    }
    Ok(Duration::from_secs(secs))
}

fn count(key: &str, value: &Value) -> CommandResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| CommandError::InvalidOption(format!("{}: expected a number", key)))
}

fn flag(key: &str, value: &Value) -> CommandResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| CommandError::InvalidOption(format!("{}: expected true/false", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn applies_every_option() {
        let config = GameConfig::default();
        let (next, notices) = config
            .with_options(
                &options(json!({"move_time": 30, "mole_veto": true, "max_play": 8})),
                Phase::Pregame,
            )
            .unwrap();
        assert_eq!(Duration::from_secs(30), next.move_time);
        assert!(next.mole_veto);
        assert_eq!(8, next.max_players);
        assert_eq!(3, notices.len());
    }

    #[test]
    fn one_bad_entry_rejects_the_whole_map() {
        let config = GameConfig::default();
        let err = config
            .with_options(
                &options(json!({"move_time": 30, "warp_speed": true})),
                Phase::Pregame,
            )
            .unwrap_err();
        assert_eq!(CommandError::InvalidOption("warp_speed".to_owned()), err);
        assert_eq!(Duration::from_secs(60), config.move_time);
    }

    #[test]
    fn pregame_only_options_are_locked_once_started() {
        let config = GameConfig::default();
        assert!(config
            .with_options(&options(json!({"casual": false})), Phase::Voting)
            .is_err());
        assert!(config
            .with_options(&options(json!({"mole_veto": true})), Phase::Voting)
            .is_ok());
    }

    #[test]
    fn max_players_must_exceed_min() {
        let config = GameConfig::default();
        assert!(config
            .with_options(&options(json!({"max_play": 3})), Phase::Pregame)
            .is_err());
    }

    #[test]
    fn think_time_is_a_fraction_of_move_time() {
        let config = GameConfig::default();
        assert_eq!(Duration::from_secs(15), config.think_time());
    }
}
