// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Threads that own games.
//!
//! Every game lives on its own named thread and is only ever touched from
//! there. Commands, timer expiries and automated-player suggestions are all
//! funneled through one channel, so a game sees them strictly one at a time.
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{Builder, JoinHandle};
use std::time::Instant;

use regex::Regex;
use serde_json::{Map, Value};

use crate::config::GameConfig;
use crate::error::{CommandError, CommandResult};
use crate::events::EventSink;
use crate::game::{Ack, Command, Game};
use crate::record::ResultStore;
use crate::types::{Identity, Phase};
use crate::uci::{MoveSuggester, SuggestionRequest};

lazy_static! {
    static ref TITLE_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_\- ]{1,32}$").unwrap();
}

enum Request {
    Command {
        issuer: Identity,
        command: Command,
        reply: Sender<CommandResult<Ack>>,
    },
    Suggestion {
        name: String,
        ply: u32,
        uci: Option<String>,
    },
    Shutdown,
}

/// A cheap, cloneable way to talk to a running game.
#[derive(Clone)]
pub struct GameHandle {
    title: String,
    sender: Sender<Request>,
    alive: Arc<AtomicBool>,
}

impl GameHandle {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Sends a command and waits for the game to answer it.
    pub fn send(&self, issuer: &Identity, command: Command) -> CommandResult<Ack> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(Request::Command {
                issuer: issuer.clone(),
                command,
                reply,
            })
            .map_err(|_| CommandError::GameClosed)?;
        response.recv().map_err(|_| CommandError::GameClosed)?
    }

    fn shutdown(&self) {
        let _ = self.sender.send(Request::Shutdown);
    }
}

/// Moves `game` onto its own thread.
pub fn spawn_game(
    game: Game,
    suggester: Arc<dyn MoveSuggester>,
) -> io::Result<(GameHandle, JoinHandle<()>)> {
    let (sender, receiver) = mpsc::channel();
    let alive = Arc::new(AtomicBool::new(true));
    let handle = GameHandle {
        title: game.title().to_owned(),
        sender: sender.clone(),
        alive: alive.clone(),
    };

    let thread = Builder::new()
        .name(format!("game-{}", game.title()))
        .spawn(move || run_game(game, receiver, sender, suggester, alive))?;
    Ok((handle, thread))
}

fn run_game(
    mut game: Game,
    requests: Receiver<Request>,
    loopback: Sender<Request>,
    suggester: Arc<dyn MoveSuggester>,
    alive: Arc<AtomicBool>,
) {
    info!("[{}] game thread started", game.title());
    loop {
        for request in game.take_suggestion_requests() {
            request_suggestion(&suggester, request, loopback.clone());
        }
        if game.is_closed() {
            break;
        }

        let received = match game.deadline() {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    Err(RecvTimeoutError::Timeout)
                } else {
                    requests.recv_timeout(deadline - now)
                }
            }
            None => requests
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };

        let now = Instant::now();
        let reply = match received {
            Ok(Request::Command {
                issuer,
                command,
                reply,
            }) => {
                let result = game.handle(&issuer, command, now);
                Some((reply, result))
            }
            Ok(Request::Suggestion { name, ply, uci }) => {
                match uci {
                    Some(uci) => {
                        if let Err(err) = game.accept_suggestion(&name, ply, &uci) {
                            debug!("[{}] dropped suggestion {} from {}: {}", game.title(), uci, name, err);
                        }
                    }
                    None => debug!("[{}] {} had no move at ply {}", game.title(), name, ply),
                }
                None
            }
            Ok(Request::Shutdown) => {
                game.shut_down(now);
                break;
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if let Err(err) = game.poll(now) {
            game.fail(err, now);
        }
        if let Some((reply, result)) = reply {
            let _ = reply.send(result);
        }
    }

    alive.store(false, Ordering::Release);
    info!("[{}] game thread exiting", game.title());
}

fn request_suggestion(
    suggester: &Arc<dyn MoveSuggester>,
    request: SuggestionRequest,
    loopback: Sender<Request>,
) {
    let suggester = suggester.clone();
    let spawned = Builder::new()
        .name(format!("suggest-{}", request.name))
        .spawn(move || {
            let uci = suggester.suggest(&request);
            let _ = loopback.send(Request::Suggestion {
                name: request.name,
                ply: request.ply,
                uci,
            });
        });
    if let Err(err) = spawned {
        warn!("failed to spawn suggestion thread: {}", err);
    }
}

struct Entry {
    handle: GameHandle,
    thread: JoinHandle<()>,
}

/// Every game on the server, by case-insensitive title.
pub struct Lobby {
    games: Mutex<HashMap<String, Entry>>,
    defaults: GameConfig,
    sink: Arc<dyn EventSink>,
    store: Arc<dyn ResultStore>,
    suggester: Arc<dyn MoveSuggester>,
}

impl Lobby {
    pub fn new(
        defaults: GameConfig,
        sink: Arc<dyn EventSink>,
        store: Arc<dyn ResultStore>,
        suggester: Arc<dyn MoveSuggester>,
    ) -> Lobby {
        Lobby {
            games: Mutex::new(HashMap::new()),
            defaults,
            sink,
            store,
            suggester,
        }
    }

    /// Creates a game, starts its thread and seats the creator.
    pub fn create_game(
        &self,
        creator: &Identity,
        title: &str,
        options: Option<&Map<String, Value>>,
    ) -> CommandResult<GameHandle> {
        if !TITLE_PATTERN.is_match(title) {
            return Err(CommandError::InvalidGame(title.to_owned()));
        }

        let key = title.to_lowercase();
        let handle = {
            let mut games = self.games();
            if games.get(&key).map_or(false, |entry| entry.handle.is_alive()) {
                return Err(CommandError::InvalidGame(format!("{} already exists", title)));
            }

            let config = match options {
                Some(options) => self.defaults.with_options(options, Phase::Pregame)?.0,
                None => self.defaults.clone(),
            };
            let game = Game::new(
                creator.clone(),
                title,
                config,
                self.sink.clone(),
                self.store.clone(),
                Instant::now(),
            )?;
            let (handle, thread) = spawn_game(game, self.suggester.clone())
                .map_err(|err| CommandError::Unavailable(err.to_string()))?;

            let entry = Entry {
                handle: handle.clone(),
                thread,
            };
            if let Some(stale) = games.insert(key, entry) {
                let _ = stale.thread.join();
            }
            handle
        };

        handle.send(creator, Command::Join { side: None })?;
        Ok(handle)
    }

    pub fn handle(&self, title: &str) -> Option<GameHandle> {
        self.games()
            .get(&title.to_lowercase())
            .map(|entry| entry.handle.clone())
    }

    pub fn command(&self, title: &str, issuer: &Identity, command: Command) -> CommandResult<Ack> {
        let handle = self
            .handle(title)
            .ok_or_else(|| CommandError::NoSuchGame(title.to_owned()))?;
        handle.send(issuer, command)
    }

    /// Titles of games still running.
    pub fn titles(&self) -> Vec<String> {
        let mut titles: Vec<_> = self
            .games()
            .values()
            .filter(|entry| entry.handle.is_alive())
            .map(|entry| entry.handle.title().to_owned())
            .collect();
        titles.sort();
        titles
    }

    /// Forgets closed games and joins their threads.
    pub fn reap(&self) -> Vec<String> {
        let mut games = self.games();
        let dead: Vec<String> = games
            .iter()
            .filter(|(_, entry)| !entry.handle.is_alive())
            .map(|(key, _)| key.clone())
            .collect();

        let mut reaped = vec![];
        for key in dead {
            if let Some(entry) = games.remove(&key) {
                if entry.thread.join().is_err() {
                    warn!("[{}] game thread panicked", entry.handle.title());
                }
                reaped.push(entry.handle.title().to_owned());
            }
        }
        reaped
    }

    pub fn shutdown(&self) {
        debug!("lobby shutting down");
        let entries: Vec<Entry> = self.games().drain().map(|(_, entry)| entry).collect();
        for entry in &entries {
            entry.handle.shutdown();
        }
        for entry in entries {
            if entry.thread.join().is_err() {
                warn!("[{}] game thread panicked", entry.handle.title());
            }
        }
        debug!("lobby shutdown complete");
    }

    fn games(&self) -> MutexGuard<HashMap<String, Entry>> {
        match self.games.lock() {
            Ok(games) => games,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for Lobby {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use crate::record::NullStore;
    use crate::uci::RandomMover;

    fn lobby() -> Lobby {
        Lobby::new(
            GameConfig {
                seed: Some(3),
                ..GameConfig::default()
            },
            Arc::new(NullSink),
            Arc::new(NullStore),
            Arc::new(RandomMover::with_seed(3)),
        )
    }

    #[test]
    fn titles_are_validated() {
        let lobby = lobby();
        let alice = Identity::new("alice", 1500);
        assert!(lobby.create_game(&alice, "", None).is_err());
        assert!(lobby.create_game(&alice, "bad/title", None).is_err());
        assert!(lobby.create_game(&alice, "Friday Night", None).is_ok());
        assert_eq!(
            Err(CommandError::InvalidGame("friday night already exists".to_owned())),
            lobby.create_game(&alice, "friday night", None).map(|_| ())
        );
    }

    #[test]
    fn creator_is_seated() {
        let lobby = lobby();
        let alice = Identity::new("alice", 1500);
        lobby.create_game(&alice, "g", None).unwrap();
        assert_eq!(
            Err(CommandError::AlreadyJoined),
            lobby.command("g", &alice, Command::Join { side: None })
        );
        assert_eq!(
            Err(CommandError::NoSuchGame("h".to_owned())),
            lobby.command("h", &alice, Command::Observe)
        );
    }

    #[test]
    fn closed_games_are_reaped() {
        let lobby = lobby();
        let alice = Identity::new("alice", 1500);
        let handle = lobby.create_game(&alice, "short", None).unwrap();
        lobby.command("short", &alice, Command::Abort).unwrap();

        while handle.is_alive() {
            std::thread::yield_now();
        }
        assert_eq!(vec!["short".to_owned()], lobby.reap());
        assert!(lobby.titles().is_empty());
        assert_eq!(
            Err(CommandError::GameClosed),
            handle.send(&alice, Command::Observe)
        );
    }
}
