// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Rating-balanced team formation.
//!
//! The pool is split into two rosters of `floor(N/2)` and `ceil(N/2)`
//! members so that the difference between the two rating averages is as
//! small as possible. The search is exhaustive: every size-balanced
//! bipartition is scored, which is `O(C(N, N/2))` and perfectly fine for the
//! pool sizes a single game allows.
use rand::Rng;

/// The result of balancing a pool. `black` always holds the smaller half.
#[derive(Clone, Debug)]
pub struct Partition<T> {
    pub white: Vec<T>,
    pub black: Vec<T>,
    /// Absolute difference between the two rating averages.
    pub gap: f64,
}

/// Splits `pool` into two rosters minimising the average-rating gap. Ties
/// keep the first partition found in enumeration order. A pool of zero or
/// one member is placed on a random side.
pub fn balance<T, F, R>(pool: Vec<T>, rating: F, rng: &mut R) -> Partition<T>
where
    F: Fn(&T) -> f64,
    R: Rng + ?Sized,
{
    let n = pool.len();
    if n <= 1 {
        let (white, black) = if rng.gen_bool(0.5) {
            (pool, vec![])
        } else {
            (vec![], pool)
        };
        return Partition {
            white,
            black,
            gap: 0.0,
        };
    }

    let ratings: Vec<f64> = pool.iter().map(|member| rating(member)).collect();
    let total: f64 = ratings.iter().sum();
    let k = n / 2;

    let mut indices: Vec<usize> = (0..k).collect();
    let mut best_gap = std::f64::INFINITY;
    let mut best = indices.clone();
    loop {
        // With an even pool every partition not holding the first member is
        // the mirror image of one that does.
        if n % 2 == 0 && indices[0] != 0 {
            break;
        }

        let chosen: f64 = indices.iter().map(|&i| ratings[i]).sum();
        let gap = average_gap(chosen, k, total - chosen, n - k);
        if gap < best_gap {
            best_gap = gap;
            best.copy_from_slice(&indices);
        }

        if !advance(&mut indices, n) {
            break;
        }
    }

    let mut on_black = vec![false; n];
    for &i in &best {
        on_black[i] = true;
    }

    let mut white = Vec::with_capacity(n - k);
    let mut black = Vec::with_capacity(k);
    for (member, black_side) in pool.into_iter().zip(on_black) {
        if black_side {
            black.push(member);
        } else {
            white.push(member);
        }
    }

    debug!(
        "balanced {} players into {} v {} (gap {:.2})",
        n,
        white.len(),
        black.len(),
        best_gap
    );
    Partition {
        white,
        black,
        gap: best_gap,
    }
}

fn average_gap(left_sum: f64, left_len: usize, right_sum: f64, right_len: usize) -> f64 {
    (left_sum / left_len as f64 - right_sum / right_len as f64).abs()
}

/// Moves `indices` to the next k-combination of `0..n` in lexicographic
/// order. Returns false once the last combination has been visited.
fn advance(indices: &mut [usize], n: usize) -> bool {
    let k = indices.len();
    let mut i = k;
    while i > 0 {
        i -= 1;
        if indices[i] < n - k + i {
            indices[i] += 1;
            for j in i + 1..k {
                indices[j] = indices[j - 1] + 1;
            }
            return true;
        }
    }

    false
}
