// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The per-game state machine.
//!
//! A `Game` never looks at a clock. Every operation that can depend on time
//! takes the current `Instant`, and `poll` resolves whatever is due at that
//! instant. The caller (normally the runner thread in `runner`) decides when to
//! poll; tests can jump time forward without sleeping.
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{Map, Value};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position};

use crate::balance;
use crate::config::GameConfig;
use crate::error::{CommandError, CommandResult, FatalError};
use crate::events::{Audience, EventSink, GameEvent, GameSnapshot};
use crate::notation;
use crate::pgn::{Annotation, Transcript};
use crate::player::{Bomb, Participant, Proposal, Role};
use crate::rating;
use crate::record::{GameSummary, ResultStore};
use crate::team::TeamRoster;
use crate::types::{EndReason, GameResult, Identity, Phase, Side, SIDES};
use crate::uci::SuggestionRequest;
use crate::voting::{self, MoveRecord, Selection};

/// Everything a participant can ask a game to do.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Join {
        #[serde(default)]
        side: Option<Side>,
    },
    Leave,
    Kick {
        target: String,
    },
    Start,
    Propose {
        mov: String,
    },
    Accuse {
        suspect: String,
    },
    Resign,
    /// `accept: true` lets the offered move stand.
    Veto {
        accept: bool,
    },
    Abort,
    SetOptions {
        options: Map<String, Value>,
    },
    Observe,
    Unobserve,
    Inspect,
    Bomb,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    pub fn new<S: Into<String>>(message: S) -> Ack {
        Ack {
            message: message.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Unbalanced,
    Insufficient,
}

impl Readiness {
    pub fn as_str(self) -> &'static str {
        match self {
            Readiness::Ready => "ready",
            Readiness::Unbalanced => "unbalanced",
            Readiness::Insufficient => "insufficient",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Seat {
    Pool(usize),
    Team(Side, usize),
}

pub struct Game {
    title: String,
    creator: Identity,
    config: GameConfig,
    phase: Phase,
    playing: bool,
    closed: bool,
    pos: Chess,
    ply: u32,
    pool: Vec<Participant>,
    teams: [TeamRoster; 2],
    observers: Vec<Identity>,
    history: Vec<MoveRecord>,
    transcript: Transcript,
    rng: StdRng,
    deadline: Option<Instant>,
    last_activity: Instant,
    pending: Option<Selection>,
    veto: Option<bool>,
    suggestions: Vec<SuggestionRequest>,
    result: Option<(GameResult, EndReason)>,
    sink: Arc<dyn EventSink>,
    store: Arc<dyn ResultStore>,
}

impl Game {
    pub fn new(
        creator: Identity,
        title: &str,
        config: GameConfig,
        sink: Arc<dyn EventSink>,
        store: Arc<dyn ResultStore>,
        now: Instant,
    ) -> CommandResult<Game> {
        let pos = match config.start_fen {
            Some(ref fen) => parse_position(fen)?,
            None => Chess::default(),
        };
        if pos.is_game_over() {
            return Err(CommandError::InvalidGame(
                "starting position is already decided".to_owned(),
            ));
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!("[{}] created by {}", title, creator.name);
        Ok(Game {
            title: title.to_owned(),
            creator,
            ply: starting_ply(&pos),
            pos,
            config,
            phase: Phase::Pregame,
            playing: false,
            closed: false,
            pool: vec![],
            teams: [TeamRoster::new(Side::White), TeamRoster::new(Side::Black)],
            observers: vec![],
            history: vec![],
            transcript: Transcript::new(title),
            rng,
            deadline: None,
            last_activity: now,
            pending: None,
            veto: None,
            suggestions: vec![],
            result: None,
            sink,
            store,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn creator(&self) -> &Identity {
        &self.creator
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn turn(&self) -> Side {
        self.pos.turn().into()
    }

    pub fn ply(&self) -> u32 {
        self.ply
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn position(&self) -> &Chess {
        &self.pos
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.pos.clone(), EnPassantMode::Legal).to_string()
    }

    pub fn pool(&self) -> &[Participant] {
        &self.pool
    }

    pub fn team(&self, side: Side) -> &TeamRoster {
        &self.teams[side.as_index()]
    }

    pub fn observers(&self) -> &[Identity] {
        &self.observers
    }

    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    pub fn result(&self) -> Option<(GameResult, EndReason)> {
        self.result
    }

    /// The transcript so far, with the final result if there is one.
    pub fn pgn(&self) -> String {
        let result = self.result.map_or(GameResult::Aborted, |(result, _)| result);
        self.transcript.render(
            &self.team(Side::White).lineup_string(),
            &self.team(Side::Black).lineup_string(),
            result,
        )
    }

    /// When the current phase times out, if it can.
    pub fn deadline(&self) -> Option<Instant> {
        if self.closed {
            None
        } else if self.phase == Phase::Pregame {
            Some(self.last_activity + self.config.pregame_idle)
        } else {
            self.deadline
        }
    }

    /// Move requests for automated players queued since the last call.
    pub fn take_suggestion_requests(&mut self) -> Vec<SuggestionRequest> {
        mem::replace(&mut self.suggestions, vec![])
    }

    pub fn readiness(&self) -> Readiness {
        let min = self.config.min_players;
        if self.config.balanced_teams {
            let n = self.pool.len();
            if n < min {
                Readiness::Insufficient
            } else if n % 2 == 0 {
                Readiness::Ready
            } else {
                Readiness::Unbalanced
            }
        } else {
            let white = self.team(Side::White).len();
            let black = self.team(Side::Black).len();
            if white != black {
                Readiness::Unbalanced
            } else if white < min {
                Readiness::Insufficient
            } else {
                Readiness::Ready
            }
        }
    }

    pub fn snapshot(&self) -> GameSnapshot {
        let threshold = self.config.kick_threshold;
        GameSnapshot {
            title: self.title.clone(),
            creator: self.creator.name.clone(),
            phase: self.phase,
            turn: self.turn(),
            ply: self.ply,
            fen: self.fen(),
            pool: self.pool.iter().map(|p| p.view(threshold)).collect(),
            teams: self.teams.iter().map(|t| t.view(threshold)).collect(),
            observers: self.observers.iter().map(|o| o.name.clone()).collect(),
            result: self.result.map(|(result, _)| result),
        }
    }

    /// Applies one command. A rejected command leaves the game exactly as
    /// it was. Call `poll` afterwards to resolve anything the command
    /// completed.
    pub fn handle(&mut self, issuer: &Identity, command: Command, now: Instant) -> CommandResult<Ack> {
        if self.closed {
            return Err(CommandError::GameClosed);
        }

        debug!("[{}] {}: {:?}", self.title, issuer.name, command);
        let ack = match command {
            Command::Join { side } => self.join(issuer, side),
            Command::Leave => self.leave(issuer, now),
            Command::Kick { target } => self.kick(issuer, &target),
            Command::Start => self.start(issuer, now),
            Command::Propose { mov } => self.propose(issuer, &mov),
            Command::Accuse { suspect } => self.accuse(issuer, &suspect, now),
            Command::Resign => self.resign(issuer, now),
            Command::Veto { accept } => self.veto_decision(issuer, accept),
            Command::Abort => self.abort(issuer, now),
            Command::SetOptions { options } => self.set_options(issuer, &options),
            Command::Observe => self.observe(issuer),
            Command::Unobserve => self.unobserve(issuer),
            Command::Inspect => self.inspect(issuer),
            Command::Bomb => self.bomb(issuer),
        }?;

        self.last_activity = now;
        Ok(ack)
    }

    /// Feeds an automated player's move back in. Suggestions for another
    /// ply are stale and rejected.
    pub fn accept_suggestion(&mut self, name: &str, ply: u32, uci: &str) -> CommandResult<Ack> {
        if self.closed {
            return Err(CommandError::GameClosed);
        }
        if self.phase != Phase::Voting || ply != self.ply {
            return Err(CommandError::Unavailable(format!(
                "stale suggestion for ply {}",
                ply
            )));
        }

        let (side, index) = self.seated(name)?;
        if !self.teams[side.as_index()].players[index].ai {
            return Err(CommandError::PermissionDenied(name.to_owned()));
        }
        self.submit(side, index, uci)
    }

    /// Resolves every phase that is complete or timed out at `now`.
    pub fn poll(&mut self, now: Instant) -> Result<(), FatalError> {
        loop {
            if self.closed {
                return Ok(());
            }

            let due = self.deadline().map_or(false, |deadline| now >= deadline);
            match self.phase {
                Phase::Pregame => {
                    if due {
                        info!("[{}] idle before starting, closing", self.title);
                        self.notice("Game closed for inactivity".to_owned());
                        self.close();
                    }
                    return Ok(());
                }
                Phase::Voting => {
                    let complete = voting::participation_complete(self.team(self.turn()));
                    if !due && !complete {
                        return Ok(());
                    }
                    self.resolve_voting(now)?;
                }
                Phase::Veto => {
                    if !due && self.veto.is_none() {
                        return Ok(());
                    }
                    self.resolve_veto(now)?;
                }
                Phase::Postgame => {
                    if due {
                        self.close();
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Ends a game whose turn loop hit a broken invariant.
    pub fn fail(&mut self, err: FatalError, now: Instant) {
        error!("[{}] {}", self.title, err);
        self.notice(format!("Internal error: {}", err));
        self.finish(GameResult::Aborted, EndReason::Broken, now);
        self.close();
    }

    /// Stops the game from outside, as when the server goes down.
    pub fn shut_down(&mut self, now: Instant) {
        if self.playing {
            self.notice("Server shutting down".to_owned());
            self.finish(GameResult::Aborted, EndReason::Aborted, now);
        }
        self.close();
    }

    fn join(&mut self, issuer: &Identity, side: Option<Side>) -> CommandResult<Ack> {
        if let Some(seat) = self.seat(&issuer.name) {
            let player = self.participant_mut(seat);
            if !player.away {
                return Err(CommandError::AlreadyJoined);
            }
            player.away = false;
            self.notice(format!("{} rejoins the game", issuer.name));
            return Ok(Ack::new(format!("Rejoining game: {}", self.title)));
        }

        if self.phase != Phase::Pregame {
            return Err(CommandError::WrongPhase(self.phase));
        }

        if self.config.balanced_teams {
            if self.pool.len() >= self.config.max_players * 2 {
                return Err(CommandError::Full);
            }
            self.pool.push(Participant::new(issuer.clone(), None));
        } else {
            let side = side.unwrap_or_else(|| {
                if self.team(Side::Black).len() < self.team(Side::White).len() {
                    Side::Black
                } else {
                    Side::White
                }
            });
            if self.team(side).len() >= self.config.max_players {
                return Err(CommandError::Full);
            }
            self.team_mut(side)
                .push(Participant::new(issuer.clone(), Some(side)));
        }

        self.notice(format!("{} joins the game", issuer.name));
        Ok(Ack::new(format!("Joined game: {}", self.title)))
    }

    fn leave(&mut self, issuer: &Identity, now: Instant) -> CommandResult<Ack> {
        let observed = self.remove_observer(&issuer.name);
        let seat = match self.seat(&issuer.name) {
            Some(seat) => seat,
            None if observed => {
                return Ok(Ack::new(format!("No longer observing: {}", self.title)));
            }
            None => return Err(CommandError::NotParticipant(issuer.name.clone())),
        };

        match (self.phase, seat) {
            (Phase::Pregame, Seat::Pool(index)) => {
                self.pool.remove(index);
            }
            (Phase::Pregame, Seat::Team(side, index)) => {
                self.team_mut(side).players.remove(index);
            }
            (_, seat) => self.participant_mut(seat).away = true,
        }
        self.notice(format!("{} leaves", issuer.name));

        match self.phase {
            Phase::Pregame => {
                if self.seat(&self.creator.name).is_none() {
                    info!("[{}] creator left before the start", self.title);
                    self.close();
                }
            }
            Phase::Voting | Phase::Veto => {
                if self.deserted() {
                    self.finish(GameResult::Aborted, EndReason::Deserted, now);
                }
            }
            Phase::Postgame => {
                if self.creator.is(&issuer.name) || self.deserted() {
                    self.close();
                }
            }
        }

        Ok(Ack::new(format!("Left game: {}", self.title)))
    }

    fn kick(&mut self, issuer: &Identity, target: &str) -> CommandResult<Ack> {
        let (side, _) = self.active_seat(&issuer.name)?;
        if self.phase != Phase::Voting {
            return Err(CommandError::WrongPhase(self.phase));
        }

        let threshold = self.config.kick_threshold;
        let player = self
            .team_mut(side)
            .find_mut(target)
            .ok_or_else(|| CommandError::UnknownPlayer(target.to_owned()))?;
        if player.ai {
            return Err(CommandError::PermissionDenied(
                "cannot kick automated players".to_owned(),
            ));
        }
        if player.skipped < threshold {
            return Err(CommandError::NotKickable {
                name: player.identity.name.clone(),
                skipped: player.skipped,
                required: threshold,
            });
        }

        player.away = true;
        let name = player.identity.name.clone();
        self.notice(format!(
            "{} kicks {} (reason: inactivity)",
            issuer.name, name
        ));
        Ok(Ack::new(format!("Kicked: {}", name)))
    }

    fn start(&mut self, issuer: &Identity, now: Instant) -> CommandResult<Ack> {
        if self.phase != Phase::Pregame {
            return Err(CommandError::WrongPhase(self.phase));
        }
        if !self.creator.is(&issuer.name) {
            return Err(CommandError::PermissionDenied(
                "only the creator can start the game".to_owned(),
            ));
        }

        let readiness = self.readiness();
        let startable = match readiness {
            Readiness::Ready => true,
            Readiness::Unbalanced => self.config.balanced_teams || self.config.ai_fill,
            Readiness::Insufficient => self.config.ai_fill,
        };
        if !startable {
            return Err(CommandError::NotReady(readiness.as_str()));
        }

        if self.config.balanced_teams {
            self.form_teams();
        }
        if self.config.ai_fill {
            let target = SIDES
                .iter()
                .map(|&side| self.team(side).len())
                .max()
                .unwrap_or(0)
                .max(self.config.min_players);
            for &side in &SIDES {
                self.ai_fill(side, target);
            }
        }
        self.assign_roles();
        for team in self.teams.iter_mut() {
            team.players.shuffle(&mut self.rng);
            team.record_lineup();
        }

        for team in &self.teams {
            for player in team.players.iter().filter(|p| !p.ai) {
                self.tell(
                    player.name(),
                    GameEvent::RoleAssigned {
                        side: team.side,
                        role: player.role.name(),
                    },
                );
            }
        }

        self.playing = true;
        self.ply = starting_ply(&self.pos);
        info!(
            "[{}] started: {} v {}",
            self.title,
            self.team(Side::White).lineup.len(),
            self.team(Side::Black).lineup.len()
        );
        self.broadcast(GameEvent::GameStarted {
            snapshot: self.snapshot(),
        });
        self.start_voting(now);
        Ok(Ack::new(format!("Game started: {}", self.title)))
    }

    fn form_teams(&mut self) {
        let pool = mem::replace(&mut self.pool, vec![]);
        let partition = balance::balance(pool, |p| f64::from(p.identity.rating), &mut self.rng);
        info!(
            "[{}] teams balanced with an average gap of {:.1}",
            self.title, partition.gap
        );
        for player in partition.white {
            self.teams[Side::White.as_index()].push(player);
        }
        for player in partition.black {
            self.teams[Side::Black.as_index()].push(player);
        }
    }

    /// Tops `side` up with automated players until it has `target` members.
    fn ai_fill(&mut self, side: Side, target: usize) {
        while self.team(side).len() < target {
            let name = self.next_ai_name();
            let rating = self.config.ai_rating;
            debug!("[{}] {} fills in for {}", self.title, name, side);
            self.team_mut(side)
                .push(Participant::automated(Identity::new(name, rating), side));
        }
    }

    fn next_ai_name(&mut self) -> String {
        let free: Vec<String> = self
            .config
            .ai_names
            .iter()
            .filter(|name| self.seat(name).is_none())
            .cloned()
            .collect();
        if let Some(name) = free.choose(&mut self.rng) {
            return name.clone();
        }

        let mut n = 1;
        loop {
            let name = format!("Bot{}", n);
            if self.seat(&name).is_none() {
                return name;
            }
            n += 1;
        }
    }

    /// One mole per team, never the team's only person, and optionally one
    /// inspector chosen from whoever is left.
    fn assign_roles(&mut self) {
        let mut missing = vec![];
        for team in self.teams.iter_mut() {
            let humans = team.players.iter().filter(|p| !p.ai).count();
            let mut order: Vec<usize> = (0..team.len()).collect();
            order.shuffle(&mut self.rng);

            let mole = order
                .iter()
                .cloned()
                .find(|&i| team.players[i].ai || humans > 1);
            match mole {
                Some(i) => team.players[i].role = Role::mole(self.config.mole_bomb),
                None => missing.push(format!("Could not assign role: {} mole", team.side)),
            }

            if self.config.inspector_role {
                let ordinary = |i: &usize| team.players[*i].role == Role::Ordinary;
                let inspector = order
                    .iter()
                    .cloned()
                    .filter(ordinary)
                    .find(|&i| !team.players[i].ai)
                    .or_else(|| order.iter().cloned().find(ordinary));
                match inspector {
                    Some(i) => {
                        team.players[i].role = Role::inspector(self.config.inspect_interval)
                    }
                    None => missing.push(format!("Could not assign role: {} inspector", team.side)),
                }
            }
        }

        for text in missing {
            self.notice(text);
        }
    }

    fn propose(&mut self, issuer: &Identity, text: &str) -> CommandResult<Ack> {
        if self.phase != Phase::Voting {
            return Err(CommandError::WrongPhase(self.phase));
        }
        let (side, index) = self.active_seat(&issuer.name)?;
        self.submit(side, index, text)
    }

    fn submit(&mut self, side: Side, index: usize, text: &str) -> CommandResult<Ack> {
        let turn = self.turn();
        let predicting = side != turn;
        if predicting
            && !(self.config.mole_move_prediction
                && self.teams[side.as_index()].players[index].is_mole())
        {
            return Err(CommandError::NotYourTurn(turn));
        }

        let mov = notation::parse_move(&self.pos, text)?;
        let proposal = Proposal {
            uci: notation::uci(&mov),
            san: notation::san(&self.pos, &mov),
            mov,
        };
        if predicting {
            return self.predict(side, index, proposal);
        }

        let hidden = self.config.hide_move_votes;
        let player = &mut self.teams[side.as_index()].players[index];
        if player.kicked {
            return Err(CommandError::VotedOff);
        }
        if player.is_inspecting() {
            return Err(CommandError::Unavailable(
                "you have inspected this turn".to_owned(),
            ));
        }

        let (uci, san) = (proposal.uci.clone(), proposal.san.clone());
        player.proposal = Some(proposal);
        let name = player.identity.name.clone();
        let ai = player.ai;
        if hidden && !ai {
            self.tell(
                &name,
                GameEvent::MoveConfirmed {
                    uci,
                    san: san.clone(),
                },
            );
        }
        self.broadcast_tally();
        Ok(Ack::new(format!("Move: {}", san)))
    }

    fn predict(&mut self, side: Side, index: usize, proposal: Proposal) -> CommandResult<Ack> {
        let rampaging = self
            .team(side.other())
            .mole()
            .map_or(false, |mole| mole.is_rampaging());
        if !rampaging {
            return Err(CommandError::Unavailable(
                "the enemy mole is not rampaging".to_owned(),
            ));
        }

        let san = proposal.san.clone();
        self.teams[side.as_index()].players[index].prediction = Some(proposal);
        self.notice(format!("{}'s Mole has made a prediction!", side));
        Ok(Ack::new(format!("You predicted: {}", san)))
    }

    fn accuse(&mut self, issuer: &Identity, suspect: &str, now: Instant) -> CommandResult<Ack> {
        let (side, index) = self.active_seat(&issuer.name)?;
        if !self.playing || self.phase != Phase::Voting {
            return Err(CommandError::WrongPhase(self.phase));
        }

        let team = self.team(side);
        if team.accusations >= self.config.accusation_limit {
            return Err(CommandError::AccusationLimit);
        }
        let accuser = &team.players[index];
        let target = team
            .find(suspect)
            .filter(|p| p.is_active())
            .ok_or_else(|| CommandError::UnknownPlayer(suspect.to_owned()))?;
        if target.is(&issuer.name) {
            return Err(CommandError::PermissionDenied(
                "you cannot accuse yourself".to_owned(),
            ));
        }

        let target_name = target.identity.name.clone();
        let retract = accuser
            .accusation
            .as_ref()
            .map_or(false, |current| target.is(current));
        let accuser_name = accuser.identity.name.clone();

        let player = &mut self.teams[side.as_index()].players[index];
        if retract {
            player.accusation = None;
            self.broadcast(GameEvent::AccusationRetracted {
                accuser: accuser_name,
            });
            return Ok(Ack::new(format!("Retracted accusation of {}", target_name)));
        }

        player.accusation = Some(target_name.clone());
        self.broadcast(GameEvent::AccusationCast {
            accuser: accuser_name,
            suspect: target_name.clone(),
        });

        if let Some(voted) = voting::voted_off(self.team(side)) {
            self.resolve_accusation(side, &voted, now);
        }
        Ok(Ack::new(format!("You accuse {}", target_name)))
    }

    fn resolve_accusation(&mut self, side: Side, suspect: &str, now: Instant) {
        self.notice(format!("{} is voted off!", suspect));
        let team = self.team_mut(side);
        team.accusations += 1;
        team.clear_accusations();

        let was_mole = team.find(suspect).map_or(false, |p| p.is_mole());
        if was_mole {
            let defected = self.config.defection;
            info!("[{}] {} mole {} exposed", self.title, side, suspect);
            self.transcript.annotate(Annotation::VotedOff, suspect);
            self.broadcast(GameEvent::AccusationOutcome {
                side,
                suspect: suspect.to_owned(),
                was_mole: true,
                mole: Some(suspect.to_owned()),
                defected,
            });
            if defected {
                self.defect(side, suspect);
            } else if let Some(player) = self.team_mut(side).find_mut(suspect) {
                player.kicked = true;
                player.accusation = None;
                player.clear_ply();
            }
        } else {
            let mole = self.team_mut(side).mole_mut().map(|mole| {
                if let Role::Mole {
                    ref mut rampaging, ..
                } = mole.role
                {
                    *rampaging = true;
                }
                mole.identity.name.clone()
            });
            match mole {
                Some(ref name) => {
                    info!("[{}] {} mole {} rampages", self.title, side, name);
                    self.transcript.annotate(Annotation::Rampage, name);
                    self.notice(format!("{} was the Mole!", name));
                }
                None => self.notice(format!("{} has no mole", side)),
            }
            self.broadcast(GameEvent::AccusationOutcome {
                side,
                suspect: suspect.to_owned(),
                was_mole: false,
                mole,
                defected: false,
            });
        }

        if self.config.end_on_accusation {
            self.finish(GameResult::Draw, EndReason::MoleVote, now);
        } else if self.config.end_on_mutual_accusation
            && self.teams.iter().all(|team| team.accusations > 0)
        {
            self.finish(GameResult::Draw, EndReason::MutualMoleVote, now);
        }
    }

    /// Moves a participant to the other roster as an ordinary player.
    fn defect(&mut self, from: Side, name: &str) {
        let mut player = match self.team_mut(from).remove(name) {
            Some(player) => player,
            None => return,
        };
        self.team_mut(from).forget_suspect(name);

        let to = from.other();
        player.defect_to(to);
        let name = player.identity.name.clone();
        self.team_mut(to).push(player);

        info!("[{}] {} defects to {}", self.title, name, to);
        self.transcript.annotate(Annotation::Defection, &name);
        self.notice(format!("{} defects to {}!", name, to));
        self.broadcast(GameEvent::Defection { name, to });
    }

    fn resign(&mut self, issuer: &Identity, now: Instant) -> CommandResult<Ack> {
        let (side, index) = self.seated(&issuer.name)?;
        if !self.playing {
            return Err(CommandError::WrongPhase(self.phase));
        }

        let limit = self.config.abort_ply_limit;
        if (self.history.len() as u32) < limit {
            if self.creator.is(&issuer.name) {
                return self.abort(issuer, now);
            }
            return Err(CommandError::Unavailable(format!(
                "resignation opens after ply {}",
                limit
            )));
        }

        let player = &mut self.teams[side.as_index()].players[index];
        if player.resigning {
            return Err(CommandError::Unavailable("already resigned".to_owned()));
        }
        player.resigning = true;
        self.notice(format!("{} resigns", issuer.name));

        if self.team(side).all_resigned() {
            self.finish(GameResult::Win(side.other()), EndReason::Resignation, now);
        }
        Ok(Ack::new("Resigned"))
    }

    fn veto_decision(&mut self, issuer: &Identity, accept: bool) -> CommandResult<Ack> {
        let (side, index) = self.seated(&issuer.name)?;
        if self.phase != Phase::Veto {
            return Err(CommandError::WrongPhase(self.phase));
        }

        let player = &self.teams[side.as_index()].players[index];
        if side == self.turn() || !player.is_mole() || player.is_rampaging() {
            return Err(CommandError::PermissionDenied(
                "only the opposing hidden mole may veto".to_owned(),
            ));
        }

        self.veto = Some(accept);
        Ok(Ack::new(if accept { "Move accepted" } else { "Move vetoed" }))
    }

    fn abort(&mut self, issuer: &Identity, now: Instant) -> CommandResult<Ack> {
        if !self.creator.is(&issuer.name) {
            return Err(CommandError::PermissionDenied(
                "only the creator can abort".to_owned(),
            ));
        }

        let limit = self.config.abort_ply_limit;
        if self.playing && self.history.len() as u32 >= limit {
            return Err(CommandError::Unavailable(format!(
                "running games can only be aborted before ply {}",
                limit
            )));
        }

        self.notice(format!("Game aborted by creator: {}", issuer.name));
        if self.playing {
            self.finish(GameResult::Aborted, EndReason::Aborted, now);
        } else {
            self.close();
        }
        Ok(Ack::new(format!("Aborted: {}", self.title)))
    }

    fn set_options(&mut self, issuer: &Identity, options: &Map<String, Value>) -> CommandResult<Ack> {
        if !self.creator.is(&issuer.name) {
            return Err(CommandError::PermissionDenied(
                "only the creator can change options".to_owned(),
            ));
        }

        let (config, notices) = self.config.with_options(options, self.phase)?;
        self.config = config;
        for text in notices {
            self.notice(text);
        }
        Ok(Ack::new("Options updated"))
    }

    fn observe(&mut self, issuer: &Identity) -> CommandResult<Ack> {
        if self.observers.iter().any(|o| o.is(&issuer.name)) {
            return Err(CommandError::AlreadyObserving);
        }
        self.observers.push(issuer.clone());
        Ok(Ack::new(format!("Observing: {}", self.title)))
    }

    fn unobserve(&mut self, issuer: &Identity) -> CommandResult<Ack> {
        if !self.remove_observer(&issuer.name) {
            return Err(CommandError::NotParticipant(issuer.name.clone()));
        }
        Ok(Ack::new(format!("No longer observing: {}", self.title)))
    }

    fn inspect(&mut self, issuer: &Identity) -> CommandResult<Ack> {
        let (side, index) = self.active_seat(&issuer.name)?;
        if self.phase != Phase::Voting {
            return Err(CommandError::WrongPhase(self.phase));
        }
        if side != self.turn() {
            return Err(CommandError::NotYourTurn(self.turn()));
        }

        match self.teams[side.as_index()].players[index].role {
            Role::Inspector {
                inspecting: true, ..
            } => {
                return Err(CommandError::Unavailable(
                    "already inspected this turn".to_owned(),
                ))
            }
            Role::Inspector { cooldown, .. } if cooldown > 0 => {
                return Err(CommandError::Unavailable(format!(
                    "you can inspect in {} turns",
                    cooldown
                )))
            }
            Role::Inspector { .. } => {}
            _ => {
                return Err(CommandError::PermissionDenied(
                    "you are not the inspector".to_owned(),
                ))
            }
        }

        let random = voting::random_selection(&self.pos, &mut self.rng)
            .ok_or_else(|| CommandError::Unavailable("no legal moves".to_owned()))?;
        let mole = self.team(side).mole().map(|m| m.identity.name.clone());
        let revealed = mole.and_then(|name| self.past_proposal(&name));

        let interval = self.config.inspect_interval;
        let player = &mut self.teams[side.as_index()].players[index];
        player.role = Role::Inspector {
            cooldown: interval,
            inspecting: true,
        };
        player.proposal = Some(Proposal {
            mov: random.mov,
            uci: random.uci,
            san: random.san,
        });

        self.tell(&issuer.name, GameEvent::Inspection { revealed });
        self.broadcast_tally();
        Ok(Ack::new("Inspection complete"))
    }

    fn bomb(&mut self, issuer: &Identity) -> CommandResult<Ack> {
        let (side, index) = self.active_seat(&issuer.name)?;
        if self.phase != Phase::Voting {
            return Err(CommandError::WrongPhase(self.phase));
        }
        if side != self.turn() {
            return Err(CommandError::NotYourTurn(self.turn()));
        }
        if !self.config.mole_bomb {
            return Err(CommandError::Unavailable("bomb disabled".to_owned()));
        }

        match self.teams[side.as_index()].players[index].role {
            Role::Mole {
                ref mut bomb,
                ..
            } => {
                if *bomb != Bomb::Charged {
                    return Err(CommandError::Unavailable("bomb already used".to_owned()));
                }
                *bomb = Bomb::Armed;
            }
            _ => {
                return Err(CommandError::PermissionDenied(
                    "you are not the mole".to_owned(),
                ))
            }
        }

        debug!("[{}] {} bomb armed", self.title, side);
        Ok(Ack::new("Bomb set!"))
    }

    fn start_voting(&mut self, now: Instant) {
        self.phase = Phase::Voting;
        self.deadline = Some(now + self.config.move_time);
        self.pending = None;
        self.veto = None;

        let side = self.turn();
        self.notice(format!("Turn #{}: {}", self.ply, side));
        self.broadcast_phase(now);
        self.broadcast_tally();

        let fen = self.fen();
        let think_time = self.config.think_time();
        let (ai_rating, ai_mole_rating) = (self.config.ai_rating, self.config.ai_mole_rating);
        let ply = self.ply;
        let requests: Vec<_> = self
            .team(side)
            .players
            .iter()
            .filter(|p| p.ai && p.is_active())
            .map(|p| SuggestionRequest {
                name: p.identity.name.clone(),
                ply,
                fen: fen.clone(),
                think_time,
                elo: if p.is_mole() { ai_mole_rating } else { ai_rating },
            })
            .collect();
        self.suggestions.extend(requests);
    }

    fn resolve_voting(&mut self, now: Instant) -> Result<(), FatalError> {
        let side = self.turn();
        if self.team(side).active_count() == 0 {
            self.finish(GameResult::Win(side.other()), EndReason::Forfeit, now);
            return Ok(());
        }

        let selection = voting::select_move(
            &self.teams[side.as_index()],
            &self.pos,
            None,
            &mut self.rng,
        )
        .ok_or(FatalError::NoLegalMove(self.ply))?;

        if self.veto_applies(side, &selection) {
            let san = selection.san.clone();
            let counter = self
                .team(side.other())
                .mole()
                .map(|mole| mole.identity.name.clone());
            self.pending = Some(selection);
            self.veto = None;
            self.phase = Phase::Veto;
            self.deadline = Some(now + self.config.veto_time);
            self.notice(format!("The enemy mole may veto the following move: {}", san));
            if let Some(name) = counter {
                self.tell(&name, GameEvent::VetoOffered { san });
            }
            self.broadcast_phase(now);
            return Ok(());
        }

        self.play(selection, now)
    }

    fn veto_applies(&self, side: Side, selection: &Selection) -> bool {
        if !self.config.mole_veto {
            return false;
        }

        match (self.team(side).mole(), self.team(side.other()).mole()) {
            (Some(mole), Some(counter)) => {
                (mole.is_rampaging() || selection.is_forced())
                    && !counter.is_rampaging()
                    && counter.is_interactive()
            }
            _ => false,
        }
    }

    fn resolve_veto(&mut self, now: Instant) -> Result<(), FatalError> {
        let offered = match self.pending.take() {
            Some(selection) => selection,
            None => return self.resolve_voting(now),
        };

        if self.veto.take().unwrap_or(true) {
            return self.play(offered, now);
        }

        let side = self.turn();
        let replacement = voting::select_move(
            &self.teams[side.as_index()],
            &self.pos,
            Some(&offered),
            &mut self.rng,
        )
        .ok_or(FatalError::NoLegalMove(self.ply))?;

        let counter = self
            .team(side.other())
            .mole()
            .map(|mole| mole.identity.name.clone());
        let revealed = counter.and_then(|name| self.past_proposal(&name));
        self.notice("Move vetoed!".to_owned());
        self.broadcast(GameEvent::Vetoed {
            san: offered.san,
            revealed,
        });
        self.play(replacement, now)
    }

    fn play(&mut self, selection: Selection, now: Instant) -> Result<(), FatalError> {
        let side = self.turn();
        let next = self
            .pos
            .clone()
            .play(&selection.mov)
            .map_err(|_| FatalError::RejectedMove {
                uci: selection.uci.clone(),
                ply: self.ply,
            })?;

        let forced = selection.is_forced();
        let predictor = if forced {
            None
        } else {
            self.prediction_match(side)
        };
        let team = &mut self.teams[side.as_index()];
        let alternates = voting::alternates(team, &selection);
        voting::record_participation(team, forced);

        self.pos = next;
        let record = MoveRecord {
            ply: self.ply,
            side,
            uci: selection.uci,
            san: selection.san,
            source: selection.source,
            alternates,
            fen: self.fen(),
        };
        debug!("[{}] ply {}: {} ({:?})", self.title, record.ply, record.san, record.source);
        self.transcript.record_move(&record);
        self.history.push(record.clone());

        if forced {
            self.notice("MOLE BOMB!".to_owned());
            self.broadcast(GameEvent::BombDetonated {
                side,
                san: record.san.clone(),
            });
        }
        self.notice(format!("Selected Move: {}", record.san));
        self.broadcast(GameEvent::MoveSelected {
            fen: record.fen.clone(),
            record,
            snapshot: self.snapshot(),
        });

        if self.pos.is_checkmate() {
            self.finish(GameResult::Win(side), EndReason::Checkmate, now);
            return Ok(());
        }
        if self.pos.is_stalemate() {
            self.finish(GameResult::Draw, EndReason::Stalemate, now);
            return Ok(());
        }
        if self.pos.is_insufficient_material() {
            self.finish(GameResult::Draw, EndReason::InsufficientMaterial, now);
            return Ok(());
        }

        if let Some((mole, predictor)) = predictor {
            self.notice(format!("{}'s move was predicted by {}!", mole, predictor));
            self.defect(side, &mole);
        }

        for team in self.teams.iter_mut() {
            for player in team.players.iter_mut() {
                player.clear_ply();
            }
        }
        for player in self.teams[side.as_index()].players.iter_mut() {
            player.tick_cooldown();
        }

        self.ply += 1;
        self.start_voting(now);
        Ok(())
    }

    /// The rampaging mole whose proposal was guessed this ply, and who
    /// guessed it.
    fn prediction_match(&self, side: Side) -> Option<(String, String)> {
        let team = self.team(side);
        let mole = team.mole().filter(|mole| mole.is_rampaging())?;
        let target = &mole.proposal.as_ref()?.mov;

        if self.config.mole_move_prediction {
            let guessed = self
                .team(side.other())
                .mole()
                .and_then(|counter| counter.prediction.as_ref())
                .map_or(false, |prediction| prediction.mov == *target);
            if guessed {
                return Some((mole.identity.name.clone(), "the enemy Mole".to_owned()));
            }
        }

        if self.config.team_move_prediction {
            let teammate = team.players.iter().find(|p| {
                !p.is_mole() && p.proposal.as_ref().map_or(false, |prop| prop.mov == *target)
            });
            if let Some(teammate) = teammate {
                return Some((mole.identity.name.clone(), teammate.identity.name.clone()));
            }
        }

        None
    }

    /// Ends the game once. Rated games are saved and scored; games that
    /// were abandoned or broken close at once, the rest linger in postgame.
    fn finish(&mut self, result: GameResult, reason: EndReason, now: Instant) {
        if !self.playing {
            return;
        }
        self.playing = false;
        self.result = Some((result, reason));
        self.pending = None;
        self.veto = None;
        self.suggestions.clear();

        match result.winner() {
            Some(side) => self.notice(format!("{} wins by {}!", side, reason)),
            None => self.notice(format!("Game Over! ({})", reason)),
        }
        info!("[{}] finished {} by {}", self.title, result.pgn(), reason);

        let transcript = self.pgn();
        let deltas = if self.config.casual {
            vec![]
        } else {
            let deltas = rating::rating_deltas(
                self.team(Side::White),
                self.team(Side::Black),
                result,
                &self.config,
            );
            let summary = GameSummary {
                title: self.title.clone(),
                result,
                reason,
                transcript: transcript.clone(),
                deltas: deltas.clone(),
            };
            if let Err(err) = self.store.save(&summary) {
                warn!("[{}] could not save result: {}", self.title, err);
            }
            deltas
        };

        for team in &self.teams {
            if let Some(mole) = team.starting_mole() {
                self.notice(format!("{} Mole: {}", team.side, mole));
            }
        }
        self.broadcast(GameEvent::GameFinished {
            result,
            reason,
            transcript,
            deltas,
        });

        match reason {
            EndReason::Deserted | EndReason::Aborted | EndReason::Broken => self.close(),
            _ => {
                self.phase = Phase::Postgame;
                self.deadline = Some(now + self.config.post_game_linger);
                self.broadcast_phase(now);
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.playing = false;
        self.deadline = None;
        info!("[{}] closed", self.title);
        self.broadcast(GameEvent::Defunct);
    }

    fn deserted(&self) -> bool {
        !self
            .teams
            .iter()
            .flat_map(|team| team.players.iter())
            .any(|p| !p.away && !p.ai)
    }

    /// A random remembered proposal by `name`, played or not.
    fn past_proposal(&mut self, name: &str) -> Option<String> {
        let proposals: Vec<String> = self
            .history
            .iter()
            .flat_map(|record| record.proposals())
            .filter(|(player, _)| player.eq_ignore_ascii_case(name))
            .map(|(_, san)| san.to_owned())
            .collect();
        proposals.choose(&mut self.rng).cloned()
    }

    fn seat(&self, name: &str) -> Option<Seat> {
        if let Some(index) = self.pool.iter().position(|p| p.is(name)) {
            return Some(Seat::Pool(index));
        }
        for team in &self.teams {
            if let Some(index) = team.position(name) {
                return Some(Seat::Team(team.side, index));
            }
        }
        None
    }

    /// The issuer's side and roster index. Pool members are not seated yet.
    fn seated(&self, name: &str) -> CommandResult<(Side, usize)> {
        match self.seat(name) {
            Some(Seat::Team(side, index)) => Ok((side, index)),
            _ => Err(CommandError::NotParticipant(name.to_owned())),
        }
    }

    /// Like `seated`, but refuses participants who are away or voted off.
    fn active_seat(&self, name: &str) -> CommandResult<(Side, usize)> {
        let (side, index) = self.seated(name)?;
        let player = &self.teams[side.as_index()].players[index];
        if player.kicked {
            return Err(CommandError::VotedOff);
        }
        if player.away {
            return Err(CommandError::Unavailable(
                "you have left this game; join again first".to_owned(),
            ));
        }
        Ok((side, index))
    }

    fn participant_mut(&mut self, seat: Seat) -> &mut Participant {
        match seat {
            Seat::Pool(index) => &mut self.pool[index],
            Seat::Team(side, index) => &mut self.teams[side.as_index()].players[index],
        }
    }

    fn team_mut(&mut self, side: Side) -> &mut TeamRoster {
        &mut self.teams[side.as_index()]
    }

    fn remove_observer(&mut self, name: &str) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !o.is(name));
        self.observers.len() != before
    }

    fn table(&self) -> Audience {
        let mut names: Vec<String> = self
            .pool
            .iter()
            .chain(self.teams.iter().flat_map(|team| team.players.iter()))
            .filter(|p| !p.ai && !p.away)
            .map(|p| p.identity.name.clone())
            .collect();
        for observer in &self.observers {
            if !names.iter().any(|name| observer.is(name)) {
                names.push(observer.name.clone());
            }
        }
        Audience::Table(names)
    }

    fn broadcast(&self, event: GameEvent) {
        self.sink.emit(&self.title, &self.table(), &event);
    }

    fn tell(&self, name: &str, event: GameEvent) {
        self.sink
            .emit(&self.title, &Audience::Player(name.to_owned()), &event);
    }

    fn notice(&self, text: String) {
        self.broadcast(GameEvent::Notice { text });
    }

    fn broadcast_phase(&self, now: Instant) {
        let remaining = self
            .deadline
            .map_or(0, |deadline| deadline.saturating_duration_since(now).as_secs());
        self.broadcast(GameEvent::PhaseChanged {
            snapshot: self.snapshot(),
            remaining,
        });
    }

    fn broadcast_tally(&self) {
        let side = self.turn();
        self.broadcast(GameEvent::VoteTally {
            side,
            ply: self.ply,
            ballots: voting::tally(self.team(side), self.config.hide_move_votes),
        });
    }
}

fn parse_position(fen: &str) -> CommandResult<Chess> {
    let parsed: Fen = fen
        .parse()
        .map_err(|_| CommandError::InvalidGame(format!("bad fen: {}", fen)))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|_| CommandError::InvalidGame(format!("illegal position: {}", fen)))
}

/// Ply number of the side to move, counting from 1 at the initial position.
fn starting_ply(pos: &Chess) -> u32 {
    let full = pos.fullmoves().get();
    let offset = if pos.turn().is_white() { 1 } else { 2 };
    (full - 1) * 2 + offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use crate::record::{MemoryStore, NullStore};
    use std::time::Duration;

    fn config() -> GameConfig {
        GameConfig {
            seed: Some(11),
            min_players: 2,
            ai_fill: false,
            inspector_role: false,
            ..GameConfig::default()
        }
    }

    fn who(name: &str) -> Identity {
        Identity::new(name, 1500)
    }

    fn game(config: GameConfig, now: Instant) -> Game {
        Game::new(
            who("alice"),
            "test",
            config,
            Arc::new(NullSink),
            Arc::new(NullStore),
            now,
        )
        .unwrap()
    }

    /// Two teams picked by hand: alice and bob for White, carol and dave for
    /// Black.
    fn started(config: GameConfig, now: Instant) -> Game {
        let mut g = game(
            GameConfig {
                balanced_teams: false,
                ..config
            },
            now,
        );
        for &(name, side) in &[
            ("alice", Side::White),
            ("bob", Side::White),
            ("carol", Side::Black),
            ("dave", Side::Black),
        ] {
            g.handle(&who(name), Command::Join { side: Some(side) }, now)
                .unwrap();
        }
        g.handle(&who("alice"), Command::Start, now).unwrap();
        g
    }

    fn propose(g: &mut Game, name: &str, mov: &str, now: Instant) -> CommandResult<Ack> {
        g.handle(
            &who(name),
            Command::Propose {
                mov: mov.to_owned(),
            },
            now,
        )
    }

    #[test]
    fn starting_ply_from_fen() {
        assert_eq!(1, starting_ply(&Chess::default()));
        let pos = parse_position("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1").unwrap();
        assert_eq!(2, starting_ply(&pos));
    }

    #[test]
    fn only_the_creator_starts() {
        let now = Instant::now();
        let mut g = game(config(), now);
        g.handle(&who("alice"), Command::Join { side: None }, now).unwrap();
        g.handle(&who("bob"), Command::Join { side: None }, now).unwrap();
        assert_eq!(
            Err(CommandError::PermissionDenied(
                "only the creator can start the game".to_owned()
            )),
            g.handle(&who("bob"), Command::Start, now)
        );
        assert_eq!(Phase::Pregame, g.phase());
    }

    #[test]
    fn insufficient_pool_needs_ai_fill() {
        let now = Instant::now();
        let mut g = game(config(), now);
        g.handle(&who("alice"), Command::Join { side: None }, now).unwrap();
        assert_eq!(
            Err(CommandError::NotReady("insufficient")),
            g.handle(&who("alice"), Command::Start, now)
        );

        let mut g = game(
            GameConfig {
                ai_fill: true,
                ..config()
            },
            now,
        );
        g.handle(&who("alice"), Command::Join { side: None }, now).unwrap();
        g.handle(&who("alice"), Command::Start, now).unwrap();
        assert_eq!(2, g.team(Side::White).len());
        assert_eq!(2, g.team(Side::Black).len());
        let names: Vec<_> = g
            .team(Side::White)
            .players
            .iter()
            .chain(g.team(Side::Black).players.iter())
            .map(|p| p.identity.name.clone())
            .collect();
        for name in &names {
            assert_eq!(1, names.iter().filter(|n| *n == name).count());
        }
    }

    #[test]
    fn lone_human_is_never_the_mole() {
        let now = Instant::now();
        for seed in 0..20 {
            let mut g = game(
                GameConfig {
                    ai_fill: true,
                    seed: Some(seed),
                    ..config()
                },
                now,
            );
            g.handle(&who("alice"), Command::Join { side: None }, now).unwrap();
            g.handle(&who("alice"), Command::Start, now).unwrap();
            for &side in &SIDES {
                if let Some(mole) = g.team(side).mole() {
                    assert!(mole.ai);
                }
            }
        }
    }

    #[test]
    fn voting_waits_for_everyone_or_the_clock() {
        let now = Instant::now();
        let mut g = started(config(), now);
        propose(&mut g, "alice", "e2e4", now).unwrap();
        g.poll(now).unwrap();
        assert_eq!(Phase::Voting, g.phase());
        assert!(g.history().is_empty());

        g.poll(now + Duration::from_secs(30)).unwrap();
        assert!(g.history().is_empty());

        let later = now + g.config().move_time;
        g.poll(later).unwrap();
        assert_eq!(1, g.history().len());
        assert_eq!("e4", g.history()[0].san);
        assert_eq!(Side::Black, g.turn());
        assert_eq!(1, g.team(Side::White).find("bob").unwrap().skipped);
    }

    #[test]
    fn rejected_commands_change_nothing() {
        let now = Instant::now();
        let mut g = started(config(), now);
        assert_eq!(
            Err(CommandError::NotYourTurn(Side::White)),
            propose(&mut g, "carol", "e7e5", now)
        );
        assert_eq!(
            Err(CommandError::BadMove("e4".to_owned())),
            propose(&mut g, "alice", "e4", now)
        );
        assert_eq!(
            Err(CommandError::IllegalMove("e2e5".to_owned())),
            propose(&mut g, "alice", "e2e5", now)
        );
        assert_eq!(
            Err(CommandError::NotParticipant("zed".to_owned())),
            propose(&mut g, "zed", "e2e4", now)
        );
        assert!(g.team(Side::White).players.iter().all(|p| p.proposal.is_none()));
    }

    #[test]
    fn resubmission_replaces_the_proposal() {
        let now = Instant::now();
        let mut g = started(config(), now);
        propose(&mut g, "alice", "e2e4", now).unwrap();
        propose(&mut g, "alice", "d2d4", now).unwrap();
        let alice = g.team(Side::White).find("alice").unwrap();
        assert_eq!("d2d4", alice.proposal.as_ref().unwrap().uci);
    }

    #[test]
    fn kicking_needs_enough_skipped_turns() {
        let now = Instant::now();
        let mut g = started(config(), now);
        let kick = Command::Kick {
            target: "bob".to_owned(),
        };
        assert_eq!(
            Err(CommandError::NotKickable {
                name: "bob".to_owned(),
                skipped: 0,
                required: 2,
            }),
            g.handle(&who("alice"), kick.clone(), now)
        );

        // bob sits out two White turns
        let mut t = now;
        for mov in &[("e2e4", "e7e5"), ("g1f3", "b8c6")] {
            propose(&mut g, "alice", mov.0, t).unwrap();
            t += g.config().move_time;
            g.poll(t).unwrap();
            propose(&mut g, "carol", mov.1, t).unwrap();
            propose(&mut g, "dave", mov.1, t).unwrap();
            g.poll(t).unwrap();
        }
        assert_eq!(4, g.history().len());
        g.handle(&who("alice"), kick, t).unwrap();
        assert!(g.team(Side::White).find("bob").unwrap().away);
    }

    #[test]
    fn accusing_yourself_is_refused() {
        let now = Instant::now();
        let mut g = started(config(), now);
        assert_eq!(
            Err(CommandError::PermissionDenied(
                "you cannot accuse yourself".to_owned()
            )),
            g.handle(
                &who("alice"),
                Command::Accuse {
                    suspect: "alice".to_owned()
                },
                now
            )
        );
        assert_eq!(
            Err(CommandError::UnknownPlayer("carol".to_owned())),
            g.handle(
                &who("alice"),
                Command::Accuse {
                    suspect: "carol".to_owned()
                },
                now
            )
        );
    }

    #[test]
    fn accusing_twice_retracts() {
        let now = Instant::now();
        let mut g = started(config(), now);
        let accuse = Command::Accuse {
            suspect: "bob".to_owned(),
        };
        // alice is the only eligible voter against bob, so the first
        // accusation resolves straight away; use a three-player team instead.
        let mut g3 = game(
            GameConfig {
                balanced_teams: false,
                ..config()
            },
            now,
        );
        for &(name, side) in &[
            ("alice", Side::White),
            ("bob", Side::White),
            ("erin", Side::White),
            ("carol", Side::Black),
            ("dave", Side::Black),
            ("frank", Side::Black),
        ] {
            g3.handle(&who(name), Command::Join { side: Some(side) }, now)
                .unwrap();
        }
        g3.handle(&who("alice"), Command::Start, now).unwrap();
        g3.handle(&who("alice"), accuse.clone(), now).unwrap();
        assert_eq!(
            Some("bob".to_owned()),
            g3.team(Side::White).find("alice").unwrap().accusation
        );
        g3.handle(&who("alice"), accuse.clone(), now).unwrap();
        assert_eq!(None, g3.team(Side::White).find("alice").unwrap().accusation);
        assert_eq!(0, g3.team(Side::White).accusations);

        g.handle(&who("alice"), accuse, now).unwrap();
        assert_eq!(1, g.team(Side::White).accusations);
    }

    #[test]
    fn accusation_limit() {
        let now = Instant::now();
        let mut g = started(config(), now);
        g.handle(
            &who("alice"),
            Command::Accuse {
                suspect: "bob".to_owned(),
            },
            now,
        )
        .unwrap();
        let again = g.handle(
            &who("alice"),
            Command::Accuse {
                suspect: "bob".to_owned(),
            },
            now,
        );
        // bob may have defected; either way White has used its accusation.
        assert!(again.is_err());
    }

    #[test]
    fn end_on_accusation_draws() {
        let now = Instant::now();
        let mut g = started(
            GameConfig {
                end_on_accusation: true,
                ..config()
            },
            now,
        );
        g.handle(
            &who("carol"),
            Command::Accuse {
                suspect: "dave".to_owned(),
            },
            now,
        )
        .unwrap();
        assert_eq!(Some((GameResult::Draw, EndReason::MoleVote)), g.result());
        assert_eq!(Phase::Postgame, g.phase());
    }

    #[test]
    fn mutual_accusation_draws_once_both_teams_resolve() {
        let now = Instant::now();
        let mut g = started(
            GameConfig {
                end_on_mutual_accusation: true,
                defection: false,
                ..config()
            },
            now,
        );
        g.handle(
            &who("alice"),
            Command::Accuse {
                suspect: "bob".to_owned(),
            },
            now,
        )
        .unwrap();
        assert_eq!(None, g.result());
        g.handle(
            &who("carol"),
            Command::Accuse {
                suspect: "dave".to_owned(),
            },
            now,
        )
        .unwrap();
        assert_eq!(
            Some((GameResult::Draw, EndReason::MutualMoleVote)),
            g.result()
        );
    }

    #[test]
    fn desertion_aborts_and_closes() {
        let now = Instant::now();
        let mut g = started(config(), now);
        for name in &["alice", "bob", "carol"] {
            g.handle(&who(name), Command::Leave, now).unwrap();
            assert!(!g.is_closed());
        }
        g.handle(&who("dave"), Command::Leave, now).unwrap();
        assert!(g.is_closed());
        assert_eq!(Some((GameResult::Aborted, EndReason::Deserted)), g.result());
        assert_eq!(
            Err(CommandError::GameClosed),
            g.handle(&who("dave"), Command::Join { side: None }, now)
        );
    }

    #[test]
    fn away_players_can_rejoin() {
        let now = Instant::now();
        let mut g = started(config(), now);
        g.handle(&who("bob"), Command::Leave, now).unwrap();
        assert!(g.team(Side::White).find("bob").unwrap().away);
        g.handle(&who("bob"), Command::Join { side: None }, now).unwrap();
        assert!(!g.team(Side::White).find("bob").unwrap().away);
    }

    #[test]
    fn forfeit_when_the_moving_side_is_empty() {
        let now = Instant::now();
        let mut g = started(config(), now);
        for name in &["alice", "bob"] {
            g.handle(&who(name), Command::Leave, now).unwrap();
        }
        g.poll(now).unwrap();
        assert_eq!(
            Some((GameResult::Win(Side::Black), EndReason::Forfeit)),
            g.result()
        );
    }

    #[test]
    fn abort_is_only_allowed_early() {
        let now = Instant::now();
        let mut g = started(
            GameConfig {
                abort_ply_limit: 1,
                ..config()
            },
            now,
        );
        propose(&mut g, "alice", "e2e4", now).unwrap();
        propose(&mut g, "bob", "e2e4", now).unwrap();
        g.poll(now).unwrap();
        assert!(g
            .handle(&who("alice"), Command::Abort, now)
            .unwrap_err()
            .to_string()
            .contains("before ply 1"));
        assert_eq!(
            Err(CommandError::PermissionDenied(
                "only the creator can abort".to_owned()
            )),
            g.handle(&who("bob"), Command::Abort, now)
        );
    }

    #[test]
    fn abort_before_the_limit_closes() {
        let now = Instant::now();
        let mut g = started(config(), now);
        g.handle(&who("alice"), Command::Abort, now).unwrap();
        assert!(g.is_closed());
        assert_eq!(Some((GameResult::Aborted, EndReason::Aborted)), g.result());
    }

    #[test]
    fn resignation_needs_the_whole_team() {
        let now = Instant::now();
        let mut g = started(
            GameConfig {
                abort_ply_limit: 0,
                ..config()
            },
            now,
        );
        g.handle(&who("carol"), Command::Resign, now).unwrap();
        assert_eq!(None, g.result());
        g.handle(&who("dave"), Command::Resign, now).unwrap();
        assert_eq!(
            Some((GameResult::Win(Side::White), EndReason::Resignation)),
            g.result()
        );
    }

    #[test]
    fn checkmate_ends_the_game() {
        let now = Instant::now();
        let mut g = started(
            GameConfig {
                start_fen: Some(
                    "rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2".to_owned(),
                ),
                ..config()
            },
            now,
        );
        assert_eq!(Side::Black, g.turn());
        assert_eq!(4, g.ply());
        propose(&mut g, "carol", "d8h4", now).unwrap();
        propose(&mut g, "dave", "d8h4", now).unwrap();
        g.poll(now).unwrap();
        assert_eq!("Qh4#", g.history()[0].san);
        assert_eq!(
            Some((GameResult::Win(Side::Black), EndReason::Checkmate)),
            g.result()
        );
        assert_eq!(Phase::Postgame, g.phase());
        assert!(g.pgn().contains("2... Qh4#"));

        g.poll(now + g.config().post_game_linger).unwrap();
        assert!(g.is_closed());
    }

    #[test]
    fn stalemate_draws() {
        let now = Instant::now();
        let mut g = started(
            GameConfig {
                start_fen: Some("7k/8/5K2/8/8/8/8/6Q1 w - - 0 1".to_owned()),
                ..config()
            },
            now,
        );
        propose(&mut g, "alice", "g1g6", now).unwrap();
        propose(&mut g, "bob", "g1g6", now).unwrap();
        g.poll(now).unwrap();
        assert_eq!("Qg6", g.history()[0].san);
        assert_eq!(Some((GameResult::Draw, EndReason::Stalemate)), g.result());
        assert_eq!(Phase::Postgame, g.phase());
    }

    #[test]
    fn bare_kings_and_a_bishop_draw() {
        let now = Instant::now();
        let mut g = started(
            GameConfig {
                start_fen: Some("7k/5n2/8/8/2B5/8/8/4K3 w - - 0 1".to_owned()),
                ..config()
            },
            now,
        );
        propose(&mut g, "alice", "c4f7", now).unwrap();
        propose(&mut g, "bob", "c4f7", now).unwrap();
        g.poll(now).unwrap();
        assert_eq!("Bxf7", g.history()[0].san);
        assert_eq!(
            Some((GameResult::Draw, EndReason::InsufficientMaterial)),
            g.result()
        );
    }

    #[test]
    fn decided_starting_positions_are_refused() {
        let now = Instant::now();
        for fen in &[
            "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
            "7k/8/5KQ1/8/8/8/8/8 b - - 0 1",
        ] {
            let result = Game::new(
                who("alice"),
                "test",
                GameConfig {
                    start_fen: Some((*fen).to_owned()),
                    ..config()
                },
                Arc::new(NullSink),
                Arc::new(NullStore),
                now,
            );
            match result {
                Err(CommandError::InvalidGame(_)) => {}
                _ => panic!("accepted {}", fen),
            }
        }
    }

    #[test]
    fn broken_games_abort_and_close() {
        let now = Instant::now();
        let mut g = started(config(), now);
        g.fail(FatalError::NoLegalMove(g.ply()), now);
        assert_eq!(Some((GameResult::Aborted, EndReason::Broken)), g.result());
        assert!(g.is_closed());
        assert!(!g.is_playing());
        assert_eq!(
            Err(CommandError::GameClosed),
            propose(&mut g, "alice", "e2e4", now)
        );
    }

    #[test]
    fn away_players_cannot_act() {
        let now = Instant::now();
        let mut g = started(config(), now);
        g.handle(&who("carol"), Command::Leave, now).unwrap();
        let accuse = Command::Accuse {
            suspect: "dave".to_owned(),
        };
        match g.handle(&who("carol"), accuse.clone(), now) {
            Err(CommandError::Unavailable(_)) => {}
            other => panic!("away accusation: {:?}", other),
        }
        assert!(g.team(Side::Black).find("carol").unwrap().accusation.is_none());
        match g.handle(&who("carol"), Command::Bomb, now) {
            Err(CommandError::Unavailable(_)) => {}
            other => panic!("away bomb: {:?}", other),
        }

        g.handle(&who("carol"), Command::Join { side: None }, now)
            .unwrap();
        g.handle(&who("carol"), accuse, now).unwrap();
    }

    #[test]
    fn rated_games_are_saved() {
        let now = Instant::now();
        let store = Arc::new(MemoryStore::new());
        let mut g = Game::new(
            who("alice"),
            "rated",
            GameConfig {
                casual: false,
                balanced_teams: false,
                min_players: 1,
                abort_ply_limit: 0,
                ..config()
            },
            Arc::new(NullSink),
            store.clone(),
            now,
        )
        .unwrap();
        for &(name, side) in &[("alice", Side::White), ("bob", Side::Black)] {
            g.handle(&who(name), Command::Join { side: Some(side) }, now)
                .unwrap();
        }
        g.handle(&who("alice"), Command::Start, now).unwrap();
        g.handle(&who("bob"), Command::Resign, now).unwrap();

        let saved = store.summaries();
        assert_eq!(1, saved.len());
        assert_eq!(GameResult::Win(Side::White), saved[0].result);
        assert_eq!(2, saved[0].deltas.len());
    }

    #[test]
    fn pregame_idles_out() {
        let now = Instant::now();
        let mut g = game(config(), now);
        g.handle(&who("alice"), Command::Join { side: None }, now).unwrap();
        g.poll(now + Duration::from_secs(10)).unwrap();
        assert!(!g.is_closed());
        g.poll(now + g.config().pregame_idle).unwrap();
        assert!(g.is_closed());
    }

    #[test]
    fn creator_leaving_the_pool_closes_the_game() {
        let now = Instant::now();
        let mut g = game(config(), now);
        g.handle(&who("alice"), Command::Join { side: None }, now).unwrap();
        g.handle(&who("bob"), Command::Join { side: None }, now).unwrap();
        g.handle(&who("bob"), Command::Leave, now).unwrap();
        assert!(!g.is_closed());
        g.handle(&who("alice"), Command::Leave, now).unwrap();
        assert!(g.is_closed());
    }

    #[test]
    fn observers() {
        let now = Instant::now();
        let mut g = game(config(), now);
        g.handle(&who("zed"), Command::Observe, now).unwrap();
        assert_eq!(
            Err(CommandError::AlreadyObserving),
            g.handle(&who("zed"), Command::Observe, now)
        );
        g.handle(&who("zed"), Command::Unobserve, now).unwrap();
        assert!(g.observers().is_empty());
    }

    #[test]
    fn options_are_creator_only() {
        let now = Instant::now();
        let mut g = game(config(), now);
        let mut options = Map::new();
        options.insert("move_time".to_owned(), Value::from(20));
        assert!(g
            .handle(
                &who("bob"),
                Command::SetOptions {
                    options: options.clone()
                },
                now
            )
            .is_err());
        g.handle(&who("alice"), Command::SetOptions { options }, now)
            .unwrap();
        assert_eq!(Duration::from_secs(20), g.config().move_time);
    }

    #[test]
    fn bomb_forces_the_mole_proposal() {
        let now = Instant::now();
        let mut g = started(config(), now);
        let mole = g.team(Side::White).mole().unwrap().identity.name.clone();
        let other = if mole == "alice" { "bob" } else { "alice" };

        assert!(g.handle(&who(other), Command::Bomb, now).is_err());
        g.handle(&who(&mole), Command::Bomb, now).unwrap();
        propose(&mut g, &mole, "f2f3", now).unwrap();
        propose(&mut g, other, "e2e4", now).unwrap();
        g.poll(now).unwrap();

        let record = &g.history()[0];
        assert_eq!("f3", record.san);
        assert!(record.alternates.is_empty());
        assert_eq!(0, g.team(Side::White).find(other).unwrap().skipped);
        assert_eq!(
            Err(CommandError::NotYourTurn(Side::Black)),
            g.handle(&who(&mole), Command::Bomb, now)
        );
    }

    #[test]
    fn inspector_waits_out_the_cooldown() {
        let now = Instant::now();
        let mut g = started(
            GameConfig {
                inspector_role: true,
                inspect_interval: 1,
                ..config()
            },
            now,
        );
        let inspector = g
            .team(Side::White)
            .players
            .iter()
            .find(|p| p.role.name() == crate::player::RoleName::Inspector)
            .map(|p| p.identity.name.clone());
        // With two players per team the mole takes one seat and the
        // inspector the other.
        let inspector = inspector.unwrap();
        assert!(g
            .handle(&who(&inspector), Command::Inspect, now)
            .unwrap_err()
            .to_string()
            .contains("inspect in 2 turns"));

        let mut t = now;
        for _ in 0..2 {
            t += g.config().move_time;
            g.poll(t).unwrap();
            t += g.config().move_time;
            g.poll(t).unwrap();
        }
        assert_eq!(Side::White, g.turn());
        g.handle(&who(&inspector), Command::Inspect, t).unwrap();
        let player = g.team(Side::White).find(&inspector).unwrap();
        assert!(player.is_inspecting());
        assert!(player.proposal.is_some());
        assert_eq!(
            Err(CommandError::Unavailable(
                "you have inspected this turn".to_owned()
            )),
            propose(&mut g, &inspector, "e2e4", t)
        );
    }
}
