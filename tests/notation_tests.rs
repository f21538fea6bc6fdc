// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use molechess::notation;
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::{CastlingMode, Chess, Position};

fn position(fen: &str) -> Chess {
    fen.parse::<Fen>()
        .unwrap()
        .into_position(CastlingMode::Standard)
        .unwrap()
}

fn check_every_move(fen: &str) {
    let pos = position(fen);
    for mov in pos.legal_moves().iter() {
        let ours = notation::san(&pos, mov);
        let reference = SanPlus::from_move(pos.clone(), mov).to_string();
        assert_eq!(reference, ours, "{} in {}", notation::uci(mov), fen);

        // and the coordinate form parses back to the same move
        let parsed = notation::parse_move(&pos, &notation::uci(mov)).unwrap();
        assert_eq!(*mov, parsed);
    }
}

#[test]
fn starting_position() {
    check_every_move("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
}

#[test]
fn kiwipete() {
    check_every_move("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");
}

#[test]
fn kiwipete_black() {
    check_every_move("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R b KQkq - 0 1");
}

#[test]
fn promotions_and_checks() {
    check_every_move("n1n5/PPPk4/8/8/8/8/4Kppp/5N1N b - - 0 1");
}

#[test]
fn three_queens_on_one_square() {
    check_every_move("7k/8/8/8/Q1Q5/8/Q7/7K w - - 0 1");
}

#[test]
fn en_passant_available() {
    check_every_move("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3");
}
