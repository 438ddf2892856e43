//! The demonstration run shared by the dealer and the participants: the
//! dealer's secret is reconstructed, the private values of the participants
//! are summed and then multiplied with every configured strategy.

use std::{
    fmt,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use num_bigint::BigInt;

use crate::{
    config::{ProtocolConfig, StrategyKind},
    mpc::{
        dealer::Dealer,
        multiply::{multiplier_for, run_chained_product, serve_triples, ChainPlan},
        participant::{Participant, ReconstructionRole},
    },
    net::{Network, PeerId, DEALER_ID},
};

pub const DEFAULT_SECRET: i64 = 40;

/// Private value a participant contributes when none is given.
pub fn default_private_value(id: PeerId) -> BigInt {
    let value = match id {
        1 => 11,
        2 => 15,
        3 => 28,
        4 => 31,
        _ => 21,
    };
    BigInt::from(value)
}

/// Outcome of a participant's run.
#[derive(Debug, Clone)]
pub struct PeerReport {
    pub id: PeerId,
    /// The dealer's secret, if this participant reconstructed it.
    pub secret: Option<BigInt>,
    pub sum: BigInt,
    pub products: Vec<(StrategyKind, BigInt, Duration)>,
}

impl fmt::Display for PeerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant {}: ", self.id)?;
        match &self.secret {
            Some(secret) => write!(f, "secret = {secret}, ")?,
            None => write!(f, "secret not reconstructed, ")?,
        }
        write!(f, "sum = {}", self.sum)?;
        for (kind, product, elapsed) in &self.products {
            write!(f, ", {kind:?} product = {product} ({elapsed:?})")?;
        }
        Ok(())
    }
}

/// Dealer side of the run.
pub fn run_dealer(mut dealer: Dealer, secret: &BigInt) -> anyhow::Result<()> {
    let mapping = dealer.generate_id_to_x_mapping();
    log::debug!("evaluation points of the secret: {:?}", mapping);
    dealer
        .distribute_secret(secret, &mapping)
        .context("distributing the secret")?;

    let plan = ChainPlan::for_peers(dealer.config().scheme.num_peers);
    let strategies = dealer.config().strategies.clone();
    for kind in strategies {
        log::info!("serving triples for the {kind:?} multiplication");
        serve_triples(&mut dealer, kind, &plan)
            .with_context(|| format!("serving triples for the {kind:?} multiplication"))?;
    }

    dealer.await_ready().context("waiting for the participants to finish")?;
    log::info!("all participants are done");
    dealer.close()?;
    Ok(())
}

/// Participant side of the run.
pub fn run_peer(mut participant: Participant, private_value: &BigInt) -> anyhow::Result<PeerReport> {
    let id = participant.id();
    let role = participant
        .config()
        .designated_reconstructor
        .map_or(ReconstructionRole::Everyone, ReconstructionRole::Designated);

    let own = participant
        .await_own_share(DEALER_ID)
        .context("receiving the share of the secret")?;
    let secret = participant
        .reconstruct(&own, role)
        .context("reconstructing the secret")?;
    if let Some(secret) = &secret {
        participant.record("secret", secret.clone());
    }
    participant.barrier()?;

    let mapping = participant.identity_mapping();
    let sum = participant
        .sum_private_values(private_value, &mapping)
        .context("summing the private values")?;
    participant.record("sum", sum.clone());
    participant.barrier()?;

    let plan = ChainPlan::for_peers(participant.config().scheme.num_peers);
    let strategies = participant.config().strategies.clone();
    let mut products = Vec::with_capacity(strategies.len());
    for kind in strategies {
        let start = Instant::now();
        let mut multiplier = multiplier_for(kind);
        let product = run_chained_product(&mut participant, &plan, private_value, multiplier.as_mut())
            .with_context(|| format!("running the {kind:?} multiplication"))?;
        let elapsed = start.elapsed();
        log::info!("participant {id}: {kind:?} multiplication took {elapsed:?}");

        participant.record(&format!("{kind:?} product"), product.clone());
        products.push((kind, product, elapsed));
        participant.barrier()?;
    }

    for (label, value) in participant.results() {
        log::debug!("participant {id}: recorded {label} = {value}");
    }
    participant.signal_dealer()?;
    participant.close()?;
    Ok(PeerReport {
        id,
        secret,
        sum,
        products,
    })
}

/// Runs the dealer and every participant as threads of this process, connected
/// through in-memory channels. Participants use their default private value.
pub fn simulate(config: ProtocolConfig, secret: BigInt) -> anyhow::Result<Vec<PeerReport>> {
    config.validate()?;
    let mut networks = Network::in_memory(config.scheme.num_peers, config.recv_timeout());
    let dealer = Dealer::new(config.clone(), networks.remove(DEALER_ID))?;
    let dealer_handle = thread::spawn(move || run_dealer(dealer, &secret));

    let handles: Vec<_> = networks
        .into_iter()
        .map(|network| {
            let config = config.clone();
            thread::spawn(move || {
                let id = network.id();
                let participant = Participant::new(config, network)?;
                run_peer(participant, &default_private_value(id))
            })
        })
        .collect();

    let reports = handles
        .into_iter()
        .map(join)
        .collect::<anyhow::Result<Vec<_>>>()?;
    join(dealer_handle)?;
    Ok(reports)
}

fn join<T>(handle: JoinHandle<anyhow::Result<T>>) -> anyhow::Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("a protocol thread panicked"))?
}
