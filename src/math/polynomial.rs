use std::ops::Index;

use num_bigint::{BigInt, RandBigInt};
use num_traits::Zero;
use rand::Rng;

/// Polynomial with exact integer coefficients. The coefficient at index `i`
/// multiplies `x^i`, so the free coefficient `a0` sits at index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polynomial(Vec<BigInt>);

impl Polynomial {
    /// Creates a polynomial from its coefficients, lowest degree first.
    ///
    /// An empty coefficient list is treated as the zero polynomial.
    pub fn new(mut coefficients: Vec<BigInt>) -> Self {
        if coefficients.is_empty() {
            coefficients.push(BigInt::zero());
        }
        Self(coefficients)
    }

    /// Creates a polynomial of the given degree whose free coefficient is the
    /// secret and whose remaining coefficients are drawn uniformly from
    /// `[0, 2^coefficient_bits)`.
    pub fn random<R: Rng>(secret: BigInt, degree: usize, coefficient_bits: u64, rng: &mut R) -> Self {
        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(secret);
        for _ in 0..degree {
            coefficients.push(BigInt::from(rng.gen_biguint(coefficient_bits)));
        }
        Self::new(coefficients)
    }

    /// Nominal degree of the polynomial. The leading coefficient may be zero.
    pub fn degree(&self) -> usize {
        self.0.len() - 1
    }

    /// Value of the polynomial at zero.
    pub fn secret(&self) -> &BigInt {
        &self.0[0]
    }

    /// Evaluates the polynomial at `x` using Horner's rule.
    pub fn evaluate(&self, x: &BigInt) -> BigInt {
        self.0
            .iter()
            .rev()
            .fold(BigInt::zero(), |acc, coefficient| acc * x + coefficient)
    }
}

impl Index<usize> for Polynomial {
    type Output = BigInt;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}
