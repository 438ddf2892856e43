use std::collections::BTreeMap;

use num_bigint::BigInt;
use rand::Rng;
use share::{Share, ShareError};
use thiserror::Error;

use crate::{
    config::{ConfigError, SchemeConfig},
    math::{InterpolationError, Interpolator, Polynomial},
    net::{Network, NetworkError, Packet, PeerId},
};
use mapping::EvaluationPoints;
use message::WireError;

pub mod coordinator;
pub mod dealer;
pub mod mapping;
pub mod message;
pub mod multiply;
pub mod participant;
pub mod share;
pub mod triple;

/// Errors that abort the current protocol run. None of them is fatal to the
/// process: a new run may be started from fresh polynomials and triples.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("timed out waiting for a message from party {peer}")]
    TransportTimeout { peer: PeerId },

    #[error("could not deliver to parties {failed:?}")]
    PartialDistributionFailure { failed: Vec<PeerId> },

    #[error("expected a share held by party {expected}, got one held by party {got}")]
    UnexpectedShareOwner { expected: PeerId, got: PeerId },

    #[error("party {0} can not act as the dealer")]
    NotTheDealer(PeerId),

    #[error("no evaluation point is assigned to party {0}")]
    MissingEvaluationPoint(PeerId),

    #[error("the triple pool is exhausted")]
    TriplePoolExhausted,

    #[error("reconstruction can not {action} while {state}")]
    OutOfOrder {
        action: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Network(NetworkError),
}

impl From<NetworkError> for ProtocolError {
    fn from(err: NetworkError) -> Self {
        match err.timed_out_peer() {
            Some(peer) => Self::TransportTimeout { peer },
            None => Self::Network(err),
        }
    }
}

/// Lane of the network a delivery goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Share,
    Bulk,
}

/// Computes the shares of a secret for every participant of the mapping.
/// The shares are ordered by participant ID.
pub fn compute_shares<R, M>(
    secret: &BigInt,
    mapping: &M,
    degree: usize,
    coefficient_bits: u64,
    rng: &mut R,
) -> (Polynomial, Vec<Share>)
where
    R: Rng,
    M: EvaluationPoints,
{
    log::debug!("computing shares of secret value: {secret}");
    let poly = Polynomial::random(secret.clone(), degree, coefficient_bits, rng);
    debug_assert_eq!(poly.degree(), degree);
    debug_assert_eq!(poly.secret(), secret);

    log::debug!("using polynomial to share the secret: {:?}", poly);

    let shares = mapping
        .assignments()
        .into_iter()
        .map(|(peer, x)| Share::new(poly.evaluate(&BigInt::from(x)), peer, x))
        .collect();
    (poly, shares)
}

/// Reconstructs a secret from at least `threshold` shares of the same
/// polynomial. Only the first `threshold` shares are used.
pub fn reconstruct_secret(shares: &[Share], scheme: &SchemeConfig) -> Result<BigInt, InterpolationError> {
    let points: Vec<_> = shares.iter().map(Share::point).collect();
    Interpolator::for_degree(scheme.degree).reconstruct(scheme.degree, &points)
}

/// Sends every participant its packets, in order. Deliveries are tracked per
/// participant: a failed send is retried up to `retries` times, resuming at the
/// first packet that participant did not get. Participants still missing
/// packets after the last attempt are reported.
///
/// A retry resends whole packets on the same channel. A channel that fails
/// part way through a frame closes itself, so retrying it fails with
/// `ChannelError::Closed` and never writes after a truncated frame.
pub fn deliver(
    network: &mut Network,
    outbox: BTreeMap<PeerId, Vec<Packet>>,
    lane: Lane,
    retries: usize,
) -> Result<(), ProtocolError> {
    let mut pending: BTreeMap<PeerId, (usize, Vec<Packet>)> = outbox
        .into_iter()
        .map(|(peer, packets)| (peer, (0, packets)))
        .collect();

    for attempt in 0..=retries {
        if attempt > 0 {
            log::warn!(
                "retrying delivery to parties {:?} (attempt {attempt} of {retries})",
                pending.keys().collect::<Vec<_>>()
            );
        }
        pending.retain(|peer, (sent, packets)| {
            while *sent < packets.len() {
                let result = match lane {
                    Lane::Share => network.send_to(&packets[*sent], *peer),
                    Lane::Bulk => network.send_bulk_to(&packets[*sent], *peer),
                };
                if let Err(err) = result {
                    log::error!("error delivering to party {peer}: {err}");
                    return true;
                }
                *sent += 1;
            }
            false
        });
        if pending.is_empty() {
            return Ok(());
        }
    }

    Err(ProtocolError::PartialDistributionFailure {
        failed: pending.into_keys().collect(),
    })
}

/// Sends each share to the participant holding it over the share lane.
pub fn send_shares(network: &mut Network, shares: &[Share], retries: usize) -> Result<(), ProtocolError> {
    let mut outbox: BTreeMap<PeerId, Vec<Packet>> = BTreeMap::new();
    for share in shares {
        log::debug!("sending share to party {}: {}", share.owner, share);
        outbox
            .entry(share.owner)
            .or_default()
            .push(message::Message::Share(share.clone()).to_packet());
    }
    deliver(network, outbox, Lane::Share, retries)
}
