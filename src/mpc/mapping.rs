//! Assignment of evaluation points to participants.
//!
//! Summation and multiplication combine shares of different polynomials
//! held by the same participant, which is only sound when every polynomial was
//! evaluated at the same point for that participant. Those operations take an
//! [`IdentityMapping`]; the randomized mapping can only be used for plain
//! sharing and reconstruction.

use std::collections::BTreeMap;

use rand::{seq::SliceRandom, Rng};

use crate::net::PeerId;

/// A bijection from participant IDs to evaluation points.
pub trait EvaluationPoints {
    /// Evaluation point assigned to a participant.
    fn x_for(&self, peer: PeerId) -> Option<u64>;

    fn num_peers(&self) -> usize;

    /// Every `(peer, x)` assignment ordered by peer ID.
    fn assignments(&self) -> Vec<(PeerId, u64)> {
        (1..=self.num_peers())
            .filter_map(|peer| self.x_for(peer).map(|x| (peer, x)))
            .collect()
    }
}

/// Maps participant `i` to `x = i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityMapping {
    num_peers: usize,
}

impl IdentityMapping {
    pub fn new(num_peers: usize) -> Self {
        Self { num_peers }
    }
}

impl EvaluationPoints for IdentityMapping {
    fn x_for(&self, peer: PeerId) -> Option<u64> {
        (1..=self.num_peers).contains(&peer).then_some(peer as u64)
    }

    fn num_peers(&self) -> usize {
        self.num_peers
    }
}

/// Maps each participant to a distinct point drawn from `[1, 2n]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomizedMapping {
    points: BTreeMap<PeerId, u64>,
}

impl RandomizedMapping {
    pub fn generate<R: Rng + ?Sized>(num_peers: usize, rng: &mut R) -> Self {
        let mut candidates: Vec<u64> = (1..=2 * num_peers as u64).collect();
        candidates.shuffle(rng);
        let points = (1..=num_peers).zip(candidates).collect();
        Self { points }
    }
}

impl EvaluationPoints for RandomizedMapping {
    fn x_for(&self, peer: PeerId) -> Option<u64> {
        self.points.get(&peer).copied()
    }

    fn num_peers(&self) -> usize {
        self.points.len()
    }
}
