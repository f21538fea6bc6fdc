// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use molechess::balance;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn average(ratings: &[i32]) -> f64 {
    f64::from(ratings.iter().sum::<i32>()) / ratings.len() as f64
}

// Every split with floor(n/2) members on one side, by bitmask.
fn best_gap(pool: &[i32]) -> f64 {
    let n = pool.len();
    let k = n / 2;
    let mut best = std::f64::INFINITY;
    for mask in 0u32..(1 << n) {
        if mask.count_ones() as usize != k {
            continue;
        }
        let (mut left, mut right) = (vec![], vec![]);
        for (i, &rating) in pool.iter().enumerate() {
            if mask & (1 << i) != 0 {
                left.push(rating);
            } else {
                right.push(rating);
            }
        }
        let gap = (average(&left) - average(&right)).abs();
        if gap < best {
            best = gap;
        }
    }
    best
}

#[test]
fn matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(42);
    for n in 2..=10 {
        for _ in 0..20 {
            let pool: Vec<i32> = (0..n).map(|_| rng.gen_range(800, 2400)).collect();
            let teams = balance::balance(pool.clone(), |r| f64::from(*r), &mut rng);

            assert_eq!(n / 2, teams.black.len());
            assert_eq!(n - n / 2, teams.white.len());
            assert!(
                (best_gap(&pool) - teams.gap).abs() < 1e-9,
                "pool {:?}: got {}, best {}",
                pool,
                teams.gap,
                best_gap(&pool)
            );
            assert!((average(&teams.white) - average(&teams.black)).abs() - teams.gap < 1e-9);

            let mut everyone: Vec<i32> = teams.white.iter().chain(teams.black.iter()).cloned().collect();
            let mut expected = pool.clone();
            everyone.sort();
            expected.sort();
            assert_eq!(expected, everyone);
        }
    }
}

#[test]
fn equal_pools_split_evenly() {
    let mut rng = StdRng::seed_from_u64(7);
    let teams = balance::balance(vec![1500; 6], |r| f64::from(*r), &mut rng);
    assert_eq!(3, teams.white.len());
    assert_eq!(3, teams.black.len());
    assert_eq!(0.0, teams.gap);
}

#[test]
fn partition_is_deterministic() {
    let pool = vec![1210, 1830, 1475, 1660, 1990, 1305, 1502];
    let first = balance::balance(pool.clone(), |r| f64::from(*r), &mut StdRng::seed_from_u64(1));
    let second = balance::balance(pool, |r| f64::from(*r), &mut StdRng::seed_from_u64(99));
    assert_eq!(first.white, second.white);
    assert_eq!(first.black, second.black);
}
