use std::collections::{BTreeMap, VecDeque};

use num_bigint::{BigInt, RandBigInt};
use rand::Rng;

use crate::{
    math::Polynomial,
    mpc::{
        mapping::{EvaluationPoints, IdentityMapping},
        message::WireError,
        share::Share,
        ProtocolError,
    },
    net::PeerId,
};

/// Separates `a`, `b` and `c` inside a triple of a batch.
pub const TRIPLE_DELIMITER: char = ';';
/// Separates two triples of a batch.
pub const TRIPLE_SEPARATOR: char = '/';

/// A Beaver triple in the clear, only ever known to the dealer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaverTriple {
    pub a: BigInt,
    pub b: BigInt,
    pub c: BigInt,
}

impl BeaverTriple {
    /// Draws `a` and `b` from `[0, 2^bits)` and sets `c = a * b`.
    pub fn random<R: Rng>(bits: u64, rng: &mut R) -> Self {
        let a = BigInt::from(rng.gen_biguint(bits));
        let b = BigInt::from(rng.gen_biguint(bits));
        let c = &a * &b;
        Self { a, b, c }
    }

    pub fn is_valid(&self) -> bool {
        &self.a * &self.b == self.c
    }

    /// Shares `a`, `b` and `c` with three independent polynomials and returns
    /// the share triple of every participant.
    pub fn deal<R: Rng>(
        &self,
        mapping: &IdentityMapping,
        degree: usize,
        coefficient_bits: u64,
        rng: &mut R,
    ) -> BTreeMap<PeerId, TripleShare> {
        let poly_a = Polynomial::random(self.a.clone(), degree, coefficient_bits, rng);
        let poly_b = Polynomial::random(self.b.clone(), degree, coefficient_bits, rng);
        let poly_c = Polynomial::random(self.c.clone(), degree, coefficient_bits, rng);

        mapping
            .assignments()
            .into_iter()
            .map(|(peer, x)| {
                let point = BigInt::from(x);
                let share = TripleShare {
                    a: Share::new(poly_a.evaluate(&point), peer, x),
                    b: Share::new(poly_b.evaluate(&point), peer, x),
                    c: Share::new(poly_c.evaluate(&point), peer, x),
                };
                (peer, share)
            })
            .collect()
    }
}

/// A participant's shares of one Beaver triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripleShare {
    pub a: Share,
    pub b: Share,
    pub c: Share,
}

impl TripleShare {
    /// Builds a triple share from shares received one by one, checking they
    /// belong to the same participant and point.
    pub fn from_shares(a: Share, b: Share, c: Share) -> Result<Self, ProtocolError> {
        for share in [&b, &c] {
            if share.owner != a.owner {
                return Err(ProtocolError::UnexpectedShareOwner {
                    expected: a.owner,
                    got: share.owner,
                });
            }
        }
        a.subtract(&b)?;
        a.subtract(&c)?;
        Ok(Self { a, b, c })
    }
}

/// The triple shares of one participant, consumed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripleBatch {
    owner: PeerId,
    x: u64,
    values: VecDeque<[BigInt; 3]>,
}

impl TripleBatch {
    pub fn new(owner: PeerId, x: u64) -> Self {
        Self {
            owner,
            x,
            values: VecDeque::new(),
        }
    }

    pub fn push(&mut self, share: &TripleShare) {
        self.values.push_back([
            share.a.value.clone(),
            share.b.value.clone(),
            share.c.value.clone(),
        ]);
    }

    /// Takes the next unused triple share out of the batch.
    pub fn next_triple(&mut self) -> Option<TripleShare> {
        let [a, b, c] = self.values.pop_front()?;
        Some(TripleShare {
            a: Share::new(a, self.owner, self.x),
            b: Share::new(b, self.owner, self.x),
            c: Share::new(c, self.owner, self.x),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encodes the batch as `a;b;c/a;b;c/...`.
    pub fn encode(&self) -> String {
        let mut result = String::new();
        for (i, [a, b, c]) in self.values.iter().enumerate() {
            if i != 0 {
                result.push(TRIPLE_SEPARATOR);
            }
            result.push_str(&format!(
                "{a}{TRIPLE_DELIMITER}{b}{TRIPLE_DELIMITER}{c}"
            ));
        }
        result
    }

    /// Decodes a batch sent to the participant `owner` holding the point `x`.
    pub fn decode(text: &str, owner: PeerId, x: u64) -> Result<Self, WireError> {
        let mut batch = Self::new(owner, x);
        if text.is_empty() {
            return Ok(batch);
        }
        for (index, triple) in text.split(TRIPLE_SEPARATOR).enumerate() {
            let malformed =
                || WireError::MalformedTripleBatch(format!("triple {index}: {triple:?}"));
            let values = triple
                .split(TRIPLE_DELIMITER)
                .map(|value| value.parse::<BigInt>().map_err(|_| malformed()))
                .collect::<Result<Vec<_>, _>>()?;
            let values: [BigInt; 3] = values.try_into().map_err(|_| malformed())?;
            batch.values.push_back(values);
        }
        Ok(batch)
    }
}

/// Triples precomputed by the dealer to serve many multiplications.
#[derive(Debug, Clone)]
pub struct TriplePool {
    triples: Vec<BeaverTriple>,
}

impl TriplePool {
    pub fn generate<R: Rng>(size: usize, bits: u64, rng: &mut R) -> Self {
        let triples: Vec<BeaverTriple> = (0..size).map(|_| BeaverTriple::random(bits, rng)).collect();
        debug_assert!(triples.iter().all(BeaverTriple::is_valid));
        Self { triples }
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    #[cfg(test)]
    pub fn triples(&self) -> &[BeaverTriple] {
        &self.triples
    }

    /// Shares every triple of the pool and groups the shares per participant.
    pub fn deal_batches<R: Rng>(
        &self,
        mapping: &IdentityMapping,
        degree: usize,
        coefficient_bits: u64,
        rng: &mut R,
    ) -> BTreeMap<PeerId, TripleBatch> {
        let mut batches: BTreeMap<PeerId, TripleBatch> = mapping
            .assignments()
            .into_iter()
            .map(|(peer, x)| (peer, TripleBatch::new(peer, x)))
            .collect();

        for triple in &self.triples {
            for (peer, share) in triple.deal(mapping, degree, coefficient_bits, rng) {
                if let Some(batch) = batches.get_mut(&peer) {
                    batch.push(&share);
                }
            }
        }
        batches
    }
}
