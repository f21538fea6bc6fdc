// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use shakmaty::Move;

use crate::types::{Identity, Side};

/// A legal move submitted by one participant for the current ply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub mov: Move,
    pub uci: String,
    pub san: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bomb {
    Charged,
    Armed,
    Spent,
}

/// A participant's secret role. Only the data a role actually needs lives
/// on its variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Ordinary,
    Mole { rampaging: bool, bomb: Bomb },
    Inspector { cooldown: u32, inspecting: bool },
}

/// The name of a role, without its state. This is what participants are
/// told about themselves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    Ordinary,
    Mole,
    Inspector,
}

impl Role {
    pub fn mole(bomb: bool) -> Role {
        Role::Mole {
            rampaging: false,
            bomb: if bomb { Bomb::Charged } else { Bomb::Spent },
        }
    }

    pub fn inspector(interval: u32) -> Role {
        Role::Inspector {
            cooldown: interval * 2,
            inspecting: false,
        }
    }

    pub fn name(&self) -> RoleName {
        match self {
            Role::Ordinary => RoleName::Ordinary,
            Role::Mole { .. } => RoleName::Mole,
            Role::Inspector { .. } => RoleName::Inspector,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Participant {
    pub identity: Identity,
    pub side: Option<Side>,
    pub role: Role,
    pub away: bool,
    /// Voted off as an exposed mole. Permanent.
    pub kicked: bool,
    pub resigning: bool,
    pub ai: bool,
    pub score: i32,
    pub proposal: Option<Proposal>,
    pub prediction: Option<Proposal>,
    /// Name of the teammate this participant accuses, if any.
    pub accusation: Option<String>,
    /// Consecutive own plies without a proposal.
    pub skipped: u32,
}

impl Participant {
    pub fn new(identity: Identity, side: Option<Side>) -> Participant {
        Participant {
            identity,
            side,
            role: Role::Ordinary,
            away: false,
            kicked: false,
            resigning: false,
            ai: false,
            score: 0,
            proposal: None,
            prediction: None,
            accusation: None,
            skipped: 0,
        }
    }

    pub fn automated(identity: Identity, side: Side) -> Participant {
        let mut player = Participant::new(identity, Some(side));
        player.ai = true;
        player
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn is(&self, name: &str) -> bool {
        self.identity.is(name)
    }

    pub fn is_active(&self) -> bool {
        !self.away && !self.kicked
    }

    /// Active and controlled by a person.
    pub fn is_interactive(&self) -> bool {
        self.is_active() && !self.ai
    }

    pub fn is_mole(&self) -> bool {
        match self.role {
            Role::Mole { .. } => true,
            _ => false,
        }
    }

    pub fn is_rampaging(&self) -> bool {
        match self.role {
            Role::Mole { rampaging, .. } => rampaging,
            _ => false,
        }
    }

    pub fn is_inspecting(&self) -> bool {
        match self.role {
            Role::Inspector { inspecting, .. } => inspecting,
            _ => false,
        }
    }

    pub fn bomb_armed(&self) -> bool {
        match self.role {
            Role::Mole { bomb, .. } => bomb == Bomb::Armed,
            _ => false,
        }
    }

    /// Forgets everything that only lives for one ply. An armed bomb that did
    /// not fire is spent anyway.
    pub fn clear_ply(&mut self) {
        self.proposal = None;
        self.prediction = None;
        match self.role {
            Role::Mole { ref mut bomb, .. } => {
                if *bomb == Bomb::Armed {
                    *bomb = Bomb::Spent;
                }
            }
            Role::Inspector {
                ref mut inspecting,
                ..
            } => *inspecting = false,
            Role::Ordinary => {}
        }
    }

    /// Called once at the end of each of this participant's own team turns.
    pub fn tick_cooldown(&mut self) {
        if let Role::Inspector {
            ref mut cooldown, ..
        } = self.role
        {
            *cooldown = cooldown.saturating_sub(1);
        }
    }

    /// Turns an exposed mole into an ordinary player bound for `side`.
    pub fn defect_to(&mut self, side: Side) {
        self.side = Some(side);
        self.role = Role::Ordinary;
        self.proposal = None;
        self.prediction = None;
        self.accusation = None;
        self.skipped = 0;
    }

    pub fn view(&self, kick_threshold: u32) -> PlayerView {
        PlayerView {
            name: self.identity.name.clone(),
            rating: self.identity.rating,
            side: self.side,
            away: self.away,
            kicked: self.kicked,
            ai: self.ai,
            resigning: self.resigning,
            proposed: self.proposal.is_some(),
            kickable: !self.ai && self.skipped >= kick_threshold,
            accusing: self.accusation.clone(),
            rampaging: self.is_rampaging(),
            score: self.score,
        }
    }
}

/// The public face of a participant. Roles stay hidden unless a failed
/// accusation has revealed a rampaging mole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub name: String,
    pub rating: i32,
    pub side: Option<Side>,
    pub away: bool,
    pub kicked: bool,
    pub ai: bool,
    pub resigning: bool,
    pub proposed: bool,
    pub kickable: bool,
    pub accusing: Option<String>,
    pub rampaging: bool,
    pub score: i32,
}
