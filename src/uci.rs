// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Move suggestions for automated players.
//!
//! A suggester is handed a position and a time budget and answers with a
//! coordinate move string, or nothing. Whatever it says is validated like
//! any human proposal, so a suggester can be wrong without harm.
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Position};

use crate::notation;

/// One automated player's request for a move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionRequest {
    pub name: String,
    pub ply: u32,
    pub fen: String,
    pub think_time: Duration,
    /// Playing strength to ask the engine for.
    pub elo: i32,
}

pub trait MoveSuggester: Send + Sync {
    fn suggest(&self, request: &SuggestionRequest) -> Option<String>;
}

/// A conversation with a UCI engine over any pair of streams.
pub struct UciSession<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> UciSession<R, W> {
    pub fn new(reader: R, writer: W) -> UciSession<R, W> {
        UciSession { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    pub fn handshake(&mut self) -> io::Result<()> {
        writeln!(self.writer, "uci")?;
        self.writer.flush()?;
        self.wait_for("uciok")
    }

    pub fn set_option(&mut self, name: &str, value: &str) -> io::Result<()> {
        writeln!(self.writer, "setoption name {} value {}", name, value)
    }

    pub fn is_ready(&mut self) -> io::Result<()> {
        writeln!(self.writer, "isready")?;
        self.writer.flush()?;
        self.wait_for("readyok")
    }

    /// Searches `fen` for `movetime` and returns the engine's `bestmove`.
    /// An engine with nothing to play answers `(none)`, which is `None`.
    pub fn best_move(&mut self, fen: &str, movetime: Duration) -> io::Result<Option<String>> {
        writeln!(self.writer, "position fen {}", fen)?;
        writeln!(self.writer, "go movetime {}", movetime.as_millis())?;
        self.writer.flush()?;
        loop {
            let line = self.read_line()?;
            let components: Vec<_> = line.split_whitespace().collect();
            match components.split_first().unwrap_or((&"", &[])) {
                (&"bestmove", [mov, ..]) if *mov == "(none)" || *mov == "0000" => {
                    return Ok(None)
                }
                (&"bestmove", [mov, ..]) => return Ok(Some((*mov).to_owned())),
                (&"bestmove", []) => return Ok(None),
                _ => {}
            }
        }
    }

    /// One full request: handshake, strength limit, search, quit.
    pub fn consult(&mut self, fen: &str, movetime: Duration, elo: i32) -> io::Result<Option<String>> {
        self.handshake()?;
        self.set_option("UCI_LimitStrength", "true")?;
        self.set_option("UCI_Elo", &elo.to_string())?;
        self.is_ready()?;
        let best = self.best_move(fen, movetime)?;
        self.quit()?;
        Ok(best)
    }

    pub fn quit(&mut self) -> io::Result<()> {
        writeln!(self.writer, "quit")?;
        self.writer.flush()
    }

    fn wait_for(&mut self, token: &str) -> io::Result<()> {
        loop {
            if self.read_line()?.trim() == token {
                return Ok(());
            }
        }
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "engine closed its output",
            ));
        }
        Ok(line)
    }
}

/// How long past its think time an engine may take before it is killed.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// An engine process that is killed and reaped when dropped, however the
/// conversation with it ended.
struct EngineProcess(Child);

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            let _ = self.0.kill();
        }
        let _ = self.0.wait();
    }
}

/// Runs an external UCI engine binary, one process per request.
pub struct UciEngine {
    path: PathBuf,
    grace: Duration,
}

impl UciEngine {
    pub fn new<P: Into<PathBuf>>(path: P) -> UciEngine {
        UciEngine {
            path: path.into(),
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(self, grace: Duration) -> UciEngine {
        UciEngine { grace, ..self }
    }

    fn consult(&self, request: &SuggestionRequest) -> io::Result<Option<String>> {
        let mut child = EngineProcess(
            Command::new(&self.path)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()?,
        );
        let stdin = child
            .0
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "no engine stdin"))?;
        let stdout = child
            .0
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "no engine stdout"))?;

        // The conversation runs on its own thread so a silent engine can be
        // abandoned. Killing the process ends that thread's blocked read.
        let (tx, rx) = mpsc::channel();
        let (fen, think_time, elo) = (request.fen.clone(), request.think_time, request.elo);
        thread::Builder::new()
            .name(format!("uci-{}", request.name))
            .spawn(move || {
                let mut session = UciSession::new(BufReader::new(stdout), stdin);
                let _ = tx.send(session.consult(&fen, think_time, elo));
            })?;

        let answer = rx
            .recv_timeout(request.think_time + self.grace)
            .unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "engine did not answer in time",
                ))
            });
        drop(child);
        answer
    }
}

impl MoveSuggester for UciEngine {
    fn suggest(&self, request: &SuggestionRequest) -> Option<String> {
        match self.consult(request) {
            Ok(best) => best,
            Err(err) => {
                warn!(
                    "engine {} failed for {} at ply {}: {}",
                    self.path.display(),
                    request.name,
                    request.ply,
                    err
                );
                None
            }
        }
    }
}

/// Plays a uniformly random legal move. Used when no engine is configured.
pub struct RandomMover {
    rng: Mutex<StdRng>,
}

impl RandomMover {
    pub fn new() -> RandomMover {
        RandomMover {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> RandomMover {
        RandomMover {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomMover {
    fn default() -> RandomMover {
        RandomMover::new()
    }
}

impl MoveSuggester for RandomMover {
    fn suggest(&self, request: &SuggestionRequest) -> Option<String> {
        let pos: Chess = match request
            .fen
            .parse::<Fen>()
            .ok()
            .and_then(|fen| fen.into_position(CastlingMode::Standard).ok())
        {
            Some(pos) => pos,
            None => {
                warn!("unreadable position for {}: {}", request.name, request.fen);
                return None;
            }
        };

        let legal = pos.legal_moves();
        let mut rng = self.rng.lock().ok()?;
        legal.choose(&mut *rng).map(notation::uci)
    }
}
