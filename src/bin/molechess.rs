// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;

use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{App, Arg, ArgMatches, SubCommand};
use molechess::balance;
use molechess::game::{Command, Game};
use molechess::notation;
use molechess::uci::{MoveSuggester, RandomMover, SuggestionRequest, UciEngine};
use molechess::{GameConfig, Identity, LogSink, NullSink, NullStore, Phase, EventSink};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess};

const MAX_SIMULATED_PLIES: u32 = 400;

fn main() {
    env_logger::init();
    let matches = App::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .subcommand(
            SubCommand::with_name("balance")
                .about("Split a pool of ratings into two even teams")
                .arg(
                    Arg::with_name("RATINGS")
                        .help("Player ratings")
                        .required(true)
                        .multiple(true)
                        .index(1),
                ),
        )
        .subcommand(
            SubCommand::with_name("notate")
                .about("Print the SAN of a coordinate move")
                .arg(
                    Arg::with_name("FEN")
                        .help("FEN string for a board position")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("MOVE")
                        .help("Move in coordinate notation, e.g. e2e4")
                        .required(true)
                        .index(2),
                ),
        )
        .subcommand(
            SubCommand::with_name("simulate")
                .about("Play a whole game with simulated voters")
                .arg(
                    Arg::with_name("players")
                        .help("Number of people in the pool")
                        .value_name("PLAYERS")
                        .short("-p")
                        .long("--players")
                        .takes_value(true)
                        .default_value("6"),
                )
                .arg(
                    Arg::with_name("seed")
                        .help("Seed for every random choice")
                        .value_name("SEED")
                        .short("-s")
                        .long("--seed")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("engine")
                        .help("UCI engine used to pick every voter's move")
                        .value_name("PATH")
                        .short("-e")
                        .long("--engine")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("verbose")
                        .help("Log every game event")
                        .short("-v")
                        .long("--verbose"),
                ),
        )
        .get_matches();

    if let Some(matches) = matches.subcommand_matches("balance") {
        run_balance(matches);
    }

    if let Some(matches) = matches.subcommand_matches("notate") {
        run_notate(matches);
    }

    if let Some(matches) = matches.subcommand_matches("simulate") {
        run_simulate(matches);
    }

    println!("{}", matches.usage());
    process::exit(1);
}

fn run_balance(matches: &ArgMatches) -> ! {
    let ratings = values_t_or_exit!(matches, "RATINGS", i32);
    let mut rng = rand::thread_rng();
    let teams = balance::balance(ratings, |r| f64::from(*r), &mut rng);

    println!("white: {:?}", teams.white);
    println!("black: {:?}", teams.black);
    println!("gap:   {:.2}", teams.gap);
    process::exit(0);
}

fn run_notate(matches: &ArgMatches) -> ! {
    let fen = matches.value_of("FEN").unwrap();
    let text = matches.value_of("MOVE").unwrap();
    let pos: Chess = match fen
        .parse::<Fen>()
        .ok()
        .and_then(|fen| fen.into_position(CastlingMode::Standard).ok())
    {
        Some(pos) => pos,
        None => {
            println!("invalid fen!");
            process::exit(1);
        }
    };

    match notation::parse_move(&pos, text) {
        Ok(mov) => {
            println!("{}", notation::san(&pos, &mov));
            process::exit(0);
        }
        Err(err) => {
            println!("{}", err);
            process::exit(1);
        }
    }
}

fn run_simulate(matches: &ArgMatches) -> ! {
    let players = value_t_or_exit!(matches, "players", usize);
    let seed = if matches.is_present("seed") {
        value_t_or_exit!(matches, "seed", u64)
    } else {
        rand::thread_rng().gen()
    };
    let suggester: Box<dyn MoveSuggester> = match matches.value_of("engine") {
        Some(path) => Box::new(UciEngine::new(path)),
        None => Box::new(RandomMover::with_seed(seed)),
    };
    let sink: Arc<dyn EventSink> = if matches.is_present("verbose") {
        Arc::new(LogSink)
    } else {
        Arc::new(NullSink)
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let pool: Vec<Identity> = (1..=players)
        .map(|n| Identity::new(format!("player{}", n), rng.gen_range(1000, 2200)))
        .collect();
    let creator = match pool.first() {
        Some(creator) => creator.clone(),
        None => {
            println!("need at least one player");
            process::exit(1);
        }
    };

    let config = GameConfig {
        seed: Some(seed),
        ..GameConfig::default()
    };
    let mut now = Instant::now();
    let mut game = match Game::new(creator.clone(), "simulation", config, sink, Arc::new(NullStore), now) {
        Ok(game) => game,
        Err(err) => {
            println!("{}", err);
            process::exit(1);
        }
    };

    for identity in &pool {
        if let Err(err) = game.handle(identity, Command::Join { side: None }, now) {
            println!("{} could not join: {}", identity, err);
        }
    }
    if let Err(err) = game.handle(&creator, Command::Start, now) {
        println!("could not start: {}", err);
        process::exit(1);
    }

    let think_time = Duration::from_millis(50);
    while game.is_playing() && game.ply() < MAX_SIMULATED_PLIES {
        let ply = game.ply();
        if game.phase() == Phase::Voting {
            for request in game.take_suggestion_requests() {
                if let Some(uci) = suggester.suggest(&request) {
                    let _ = game.accept_suggestion(&request.name, request.ply, &uci);
                }
            }

            let voters: Vec<Identity> = game
                .team(game.turn())
                .players
                .iter()
                .filter(|p| p.is_interactive())
                .map(|p| p.identity.clone())
                .collect();
            for voter in voters {
                let request = SuggestionRequest {
                    name: voter.name.clone(),
                    ply,
                    fen: game.fen(),
                    think_time,
                    elo: voter.rating,
                };
                if let Some(mov) = suggester.suggest(&request) {
                    if let Err(err) = game.handle(&voter, Command::Propose { mov }, now) {
                        debug!("{} could not propose: {}", voter, err);
                    }
                }
            }
        }

        now += Duration::from_secs(1);
        if let Err(err) = game.poll(now) {
            game.fail(err, now);
        }
        if game.is_playing() && game.ply() == ply {
            if let Some(deadline) = game.deadline() {
                now = deadline;
                if let Err(err) = game.poll(now) {
                    game.fail(err, now);
                }
            }
        }
    }

    if game.is_playing() {
        println!("no result after {} plies, stopping", MAX_SIMULATED_PLIES);
        game.shut_down(now);
    }

    println!("{}", game.pgn());
    if let Some((result, reason)) = game.result() {
        println!();
        println!("result: {} ({})", result.pgn(), reason);
    }
    process::exit(0);
}
