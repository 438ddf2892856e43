use std::{fmt, str::FromStr};

use num_bigint::BigInt;
use thiserror::Error;

use crate::{math::Point, mpc::message::WireError, net::PeerId};

/// Separator of the fields of a share on the wire.
pub const DELIMITER: char = ';';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShareError {
    #[error("shares evaluated at x = {left} and x = {right} can not be combined")]
    MismatchedEvaluationPoint { left: u64, right: u64 },
}

/// Share of a secret held by a participant: the evaluation of the sharing
/// polynomial at the participant's point `x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    /// The evaluation `f(x)`.
    pub value: BigInt,

    /// The participant holding the share.
    pub owner: PeerId,

    /// The evaluation point.
    pub x: u64,
}

impl Share {
    pub fn new(value: BigInt, owner: PeerId, x: u64) -> Self {
        Self { value, owner, x }
    }

    /// The share as an interpolation point `(x, f(x))`.
    pub fn point(&self) -> Point {
        (BigInt::from(self.x), self.value.clone())
    }

    /// Adds two shares evaluated at the same point. The result is a share of
    /// the sum of the two secrets.
    pub fn add(&self, other: &Self) -> Result<Self, ShareError> {
        self.ensure_same_point(other)?;
        Ok(Self {
            value: &self.value + &other.value,
            owner: self.owner,
            x: self.x,
        })
    }

    pub fn subtract(&self, other: &Self) -> Result<Self, ShareError> {
        self.ensure_same_point(other)?;
        Ok(Self {
            value: &self.value - &other.value,
            owner: self.owner,
            x: self.x,
        })
    }

    /// Shifts the shared secret by a public constant.
    pub fn add_const(&self, other: &BigInt) -> Self {
        Self {
            value: &self.value + other,
            owner: self.owner,
            x: self.x,
        }
    }

    /// Scales the shared secret by a public constant.
    pub fn multiply_const(&self, other: &BigInt) -> Self {
        Self {
            value: &self.value * other,
            owner: self.owner,
            x: self.x,
        }
    }

    fn ensure_same_point(&self, other: &Self) -> Result<(), ShareError> {
        if self.x != other.x {
            return Err(ShareError::MismatchedEvaluationPoint {
                left: self.x,
                right: other.x,
            });
        }
        Ok(())
    }
}

/// Sums shares that were all evaluated at the same point.
pub fn sum_shares(shares: &[Share]) -> Result<Option<Share>, ShareError> {
    let mut iter = shares.iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    let mut sum = first.clone();
    for share in iter {
        sum = sum.add(share)?;
    }
    Ok(Some(sum))
}

impl fmt::Display for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{DELIMITER}{}{DELIMITER}{}", self.value, self.owner, self.x)
    }
}

impl FromStr for Share {
    type Err = WireError;

    /// Parses a `value;ownerId;x` record.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || WireError::MalformedShareMessage(s.to_string());

        let mut fields = s.split(DELIMITER);
        let (Some(value), Some(owner), Some(x), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed());
        };

        let value = BigInt::from_str(value.trim()).map_err(|_| malformed())?;
        let owner = owner.trim().parse::<PeerId>().map_err(|_| malformed())?;
        let x = x.trim().parse::<u64>().map_err(|_| malformed())?;
        if x == 0 {
            // f(0) is the secret itself.
            return Err(malformed());
        }
        Ok(Self { value, owner, x })
    }
}
