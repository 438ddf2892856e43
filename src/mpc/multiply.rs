//! Secure multiplication with Beaver triples.
//!
//! Given shares `x_i`, `y_i` and a triple share `(a_i, b_i, c_i)` with
//! `c = a * b`, the participants open `d = x - a` and `e = y - b`, which are
//! masked by the random `a` and `b`, and compute locally
//! `z_i = c_i + d * b_i + e * a_i + d * e`, a share of `x * y`.

use num_bigint::BigInt;
use num_traits::One;

use crate::{
    config::StrategyKind,
    mpc::{
        dealer::Dealer,
        mapping::IdentityMapping,
        participant::Participant,
        share::{Share, ShareError},
        triple::{TripleBatch, TripleShare},
        ProtocolError,
    },
    net::PeerId,
};

/// Computes the masked differences `d_i = x_i - a_i` and `e_i = y_i - b_i`.
pub fn masked_differences(x: &Share, y: &Share, triple: &TripleShare) -> Result<(Share, Share), ShareError> {
    Ok((x.subtract(&triple.a)?, y.subtract(&triple.b)?))
}

/// Computes the share of the product `z_i = c_i + d * b_i + e * a_i + d * e`
/// from the opened differences.
pub fn product_share(triple: &TripleShare, d: &BigInt, e: &BigInt) -> Result<Share, ShareError> {
    Ok(triple
        .c
        .add(&triple.b.multiply_const(d))?
        .add(&triple.a.multiply_const(e))?
        .add_const(&(d * e)))
}

/// Scheduling of the Beaver multiplication among the participants.
pub trait Multiplier {
    fn kind(&self) -> StrategyKind;

    /// Whether the operands of every product are gathered before the first
    /// product is computed.
    fn pipelined(&self) -> bool;

    /// Multiplies each pair of shared operands and returns this participant's
    /// shares of the products.
    fn multiply(
        &mut self,
        participant: &mut Participant,
        operands: &[(Share, Share)],
    ) -> Result<Vec<Share>, ProtocolError>;
}

/// Multiplies one pair at a time. Triples come from a pool shipped once by
/// the dealer, and each difference is opened in its own round.
#[derive(Debug, Default)]
pub struct NaiveMultiplier {
    pool: Option<TripleBatch>,
}

impl NaiveMultiplier {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_triple(&mut self, participant: &mut Participant) -> Result<TripleShare, ProtocolError> {
        if self.pool.is_none() {
            self.pool = Some(participant.receive_triple_batch()?);
        }
        self.pool
            .as_mut()
            .and_then(TripleBatch::next_triple)
            .ok_or(ProtocolError::TriplePoolExhausted)
    }
}

impl Multiplier for NaiveMultiplier {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Naive
    }

    fn pipelined(&self) -> bool {
        false
    }

    fn multiply(
        &mut self,
        participant: &mut Participant,
        operands: &[(Share, Share)],
    ) -> Result<Vec<Share>, ProtocolError> {
        let mut products = Vec::with_capacity(operands.len());
        for (x, y) in operands {
            let triple = self.next_triple(participant)?;
            let (d_share, e_share) = masked_differences(x, y, &triple)?;

            participant.barrier()?;
            let d = participant.open(&d_share)?;
            log::debug!("participant {}: opened d = {d}", participant.id());

            participant.barrier()?;
            let e = participant.open(&e_share)?;
            log::debug!("participant {}: opened e = {e}", participant.id());

            products.push(product_share(&triple, &d, &e)?);
        }
        Ok(products)
    }
}

/// Multiplies every pair at once. One fresh triple per product is requested
/// from the dealer and all differences are opened in a single round.
#[derive(Debug, Default)]
pub struct BatchedMultiplier;

impl Multiplier for BatchedMultiplier {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Batched
    }

    fn pipelined(&self) -> bool {
        true
    }

    fn multiply(
        &mut self,
        participant: &mut Participant,
        operands: &[(Share, Share)],
    ) -> Result<Vec<Share>, ProtocolError> {
        let triples = operands
            .iter()
            .map(|_| participant.request_triple())
            .collect::<Result<Vec<_>, _>>()?;

        let mut masked = Vec::with_capacity(2 * operands.len());
        for ((x, y), triple) in operands.iter().zip(&triples) {
            let (d_share, e_share) = masked_differences(x, y, triple)?;
            masked.push(d_share);
            masked.push(e_share);
        }

        participant.barrier()?;
        let opened = participant.open_many(&masked)?;
        log::debug!("participant {}: opened differences {:?}", participant.id(), opened);

        let products = triples
            .iter()
            .zip(opened.chunks(2))
            .map(|(triple, de)| product_share(triple, &de[0], &de[1]))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }
}

pub fn multiplier_for(kind: StrategyKind) -> Box<dyn Multiplier> {
    match kind {
        StrategyKind::Naive => Box::new(NaiveMultiplier::new()),
        StrategyKind::Batched => Box::new(BatchedMultiplier),
    }
}

/// Order in which the private values of the participants are multiplied:
/// consecutive pairs first, then the participant left over, if any, multiplies
/// the product of the pairs by its own value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPlan {
    pub pairs: Vec<(PeerId, PeerId)>,
    pub aggregator: Option<PeerId>,
}

impl ChainPlan {
    pub fn for_peers(num_peers: usize) -> Self {
        let pairs = (1..num_peers)
            .step_by(2)
            .map(|left| (left, left + 1))
            .collect();
        let aggregator = (num_peers % 2 == 1).then_some(num_peers);
        Self { pairs, aggregator }
    }

    /// Number of Beaver multiplications the plan runs.
    pub fn products(&self) -> usize {
        self.pairs.len()
    }

    /// Participants whose private value enters a Beaver multiplication.
    pub fn input_owners(&self) -> Vec<PeerId> {
        self.pairs
            .iter()
            .flat_map(|(left, right)| [*left, *right])
            .collect()
    }
}

/// Multiplies the private values of all participants following the plan. Every
/// participant learns the product of the pairs; the aggregator also multiplies
/// in its own value, so it alone returns the full product.
pub fn run_chained_product(
    participant: &mut Participant,
    plan: &ChainPlan,
    private_value: &BigInt,
    multiplier: &mut dyn Multiplier,
) -> Result<BigInt, ProtocolError> {
    let mapping = IdentityMapping::new(participant.config().scheme.num_peers);
    let id = participant.id();
    log::info!("participant {id}: running the {:?} chained product", multiplier.kind());

    let sub_results = if multiplier.pipelined() {
        let owners = plan.input_owners();
        if owners.contains(&id) {
            participant.share_private_value(private_value, &mapping)?;
        }
        let shares = participant.collect_shares(&owners)?;
        let operands: Vec<(Share, Share)> = shares
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();

        let products = multiplier.multiply(participant, &operands)?;
        participant.barrier()?;
        participant.open_many(&products)?
    } else {
        let mut sub_results = Vec::with_capacity(plan.products());
        for &(left, right) in &plan.pairs {
            if id == left || id == right {
                participant.share_private_value(private_value, &mapping)?;
            }
            let shares = participant.collect_shares(&[left, right])?;
            let operands = [(shares[0].clone(), shares[1].clone())];

            let products = multiplier.multiply(participant, &operands)?;
            participant.barrier()?;
            let result = participant.open(&products[0])?;
            log::info!("participant {id}: sub multiplication {left} x {right} = {result}");
            sub_results.push(result);
        }
        sub_results
    };

    let mut product = sub_results
        .iter()
        .fold(BigInt::one(), |acc, result| acc * result);
    log::info!("participant {id}: multiplication so far {product}");

    if plan.aggregator == Some(id) {
        product *= private_value;
        log::info!("participant {id}: final result including its own value {product}");
    }
    Ok(product)
}

/// Dealer side of a chained product: hands out the triples the participants
/// running `kind` ask for.
pub fn serve_triples(dealer: &mut Dealer, kind: StrategyKind, plan: &ChainPlan) -> Result<(), ProtocolError> {
    if plan.products() == 0 {
        return Ok(());
    }
    match kind {
        StrategyKind::Naive => {
            let pool = dealer.generate_triple_pool();
            if pool.len() < plan.products() {
                return Err(ProtocolError::TriplePoolExhausted);
            }
            dealer.await_ready()?;
            dealer.distribute_triple_batch(&pool)
        }
        StrategyKind::Batched => {
            for product in 0..plan.products() {
                dealer.await_ready()?;
                let triple = dealer.distribute_triple()?;
                log::debug!("dealt triple {product}: {:?}", triple);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use num_bigint::BigInt;
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    use super::{
        masked_differences, multiplier_for, product_share, run_chained_product, serve_triples,
        ChainPlan, Multiplier, NaiveMultiplier,
    };
    use crate::{
        config::{ProtocolConfig, SchemeConfig, StrategyKind},
        mpc::{
            compute_shares,
            dealer::Dealer,
            mapping::IdentityMapping,
            participant::Participant,
            reconstruct_secret,
            share::Share,
            triple::{BeaverTriple, TripleBatch},
            ProtocolError,
        },
        net::{Network, DEALER_ID},
    };

    fn demo_values() -> Vec<BigInt> {
        [11, 15, 28, 31, 21].into_iter().map(BigInt::from).collect()
    }

    /// Reconstructs from `threshold` shares picked at random.
    fn reconstruct_from_any(shares: &[Share], scheme: &SchemeConfig, rng: &mut StdRng) -> BigInt {
        let subset: Vec<Share> = shares.choose_multiple(rng, scheme.threshold).cloned().collect();
        reconstruct_secret(&subset, scheme).unwrap()
    }

    #[test]
    fn local_product_shares_reconstruct_to_product() {
        const N_SAMPLES: usize = 200;

        let mut rng = StdRng::seed_from_u64(31);
        for _ in 0..N_SAMPLES {
            let degree = rng.gen_range(1..5);
            let num_peers = rng.gen_range(degree + 1..=9);
            let scheme = SchemeConfig::new(degree, num_peers, degree + 1).unwrap();
            let mapping = IdentityMapping::new(num_peers);

            let x = BigInt::from(rng.gen::<i64>());
            let y = BigInt::from(rng.gen::<i64>());
            let x_shares = compute_shares(&x, &mapping, degree, 80, &mut rng).1;
            let y_shares = compute_shares(&y, &mapping, degree, 80, &mut rng).1;
            let triple = BeaverTriple::random(rng.gen_range(1..64), &mut rng);
            let triple_shares = triple.deal(&mapping, degree, 80, &mut rng);

            let (d_shares, e_shares): (Vec<Share>, Vec<Share>) = (0..num_peers)
                .map(|i| masked_differences(&x_shares[i], &y_shares[i], &triple_shares[&(i + 1)]).unwrap())
                .unzip();
            let d = reconstruct_from_any(&d_shares, &scheme, &mut rng);
            let e = reconstruct_from_any(&e_shares, &scheme, &mut rng);
            assert_eq!(d, &x - &triple.a);
            assert_eq!(e, &y - &triple.b);

            let z_shares: Vec<Share> = (1..=num_peers)
                .map(|peer| product_share(&triple_shares[&peer], &d, &e).unwrap())
                .collect();
            assert_eq!(reconstruct_from_any(&z_shares, &scheme, &mut rng), &x * &y);
        }
    }

    #[test]
    fn product_share_rejects_mixed_points() {
        let triple = BeaverTriple {
            a: 2.into(),
            b: 3.into(),
            c: 6.into(),
        };
        let mut shares = triple.deal(&IdentityMapping::new(3), 2, 80, &mut StdRng::seed_from_u64(5));
        let mut mixed = shares.remove(&1).unwrap();
        mixed.b = shares[&2].b.clone();
        assert!(product_share(&mixed, &1.into(), &1.into()).is_err());
    }

    #[test]
    fn chain_plans() {
        assert_eq!(
            ChainPlan::for_peers(5),
            ChainPlan {
                pairs: vec![(1, 2), (3, 4)],
                aggregator: Some(5)
            }
        );
        assert_eq!(
            ChainPlan::for_peers(4),
            ChainPlan {
                pairs: vec![(1, 2), (3, 4)],
                aggregator: None
            }
        );
        assert_eq!(ChainPlan::for_peers(3).input_owners(), vec![1, 2]);
        assert_eq!(ChainPlan::for_peers(3).products(), 1);
    }

    /// Runs a chained product with every participant and the dealer in their
    /// own thread. Participant `i` contributes `values[i - 1]`. Returns the
    /// products ordered by participant ID.
    fn run_chain(kind: StrategyKind, config: ProtocolConfig, values: &[BigInt]) -> Vec<BigInt> {
        let plan = ChainPlan::for_peers(config.scheme.num_peers);
        let mut networks = Network::in_memory(config.scheme.num_peers, config.recv_timeout());
        let dealer_network = networks.remove(DEALER_ID);

        let dealer_config = config.clone();
        let dealer_plan = plan.clone();
        let dealer = thread::spawn(move || {
            let mut dealer =
                Dealer::with_rng(dealer_config, dealer_network, StdRng::seed_from_u64(0)).unwrap();
            serve_triples(&mut dealer, kind, &dealer_plan).unwrap();
        });

        let handles: Vec<_> = networks
            .into_iter()
            .map(|network| {
                let config = config.clone();
                let plan = plan.clone();
                let value = values[network.id() - 1].clone();
                thread::spawn(move || {
                    let id = network.id();
                    let mut participant =
                        Participant::with_rng(config, network, StdRng::seed_from_u64(id as u64))
                            .unwrap();
                    let mut multiplier = multiplier_for(kind);
                    assert_eq!(multiplier.kind(), kind);
                    run_chained_product(
                        &mut participant,
                        &plan,
                        &value,
                        multiplier.as_mut(),
                    )
                    .unwrap()
                })
            })
            .collect();

        let products = handles.into_iter().map(|h| h.join().unwrap()).collect();
        dealer.join().unwrap();
        products
    }

    #[test]
    fn naive_chain_multiplies_all_values() {
        let config = ProtocolConfig {
            triple_pool_size: 4,
            ..ProtocolConfig::default()
        };
        let products = run_chain(StrategyKind::Naive, config, &demo_values());
        let pairs = BigInt::from(11 * 15 * 28 * 31);
        assert!(products[..4].iter().all(|p| p == &pairs));
        assert_eq!(products[4], BigInt::from(3_007_620));
    }

    #[test]
    fn batched_chain_multiplies_all_values() {
        let products = run_chain(StrategyKind::Batched, ProtocolConfig::default(), &demo_values());
        assert_eq!(products[4], BigInt::from(3_007_620));
        assert!(products[..4].iter().all(|p| p == &BigInt::from(143_220)));
    }

    #[test]
    fn batched_chain_with_even_number_of_peers() {
        let config = ProtocolConfig {
            scheme: SchemeConfig::new(2, 4, 3).unwrap(),
            ..ProtocolConfig::default()
        };
        let products = run_chain(StrategyKind::Batched, config, &demo_values());
        assert!(products.iter().all(|p| p == &BigInt::from(143_220)));
    }

    #[test]
    fn chains_of_random_signed_values() {
        let mut rng = StdRng::seed_from_u64(17);
        for kind in [StrategyKind::Naive, StrategyKind::Batched] {
            for _ in 0..3 {
                let num_peers = rng.gen_range(3..=7);
                let config = ProtocolConfig {
                    scheme: SchemeConfig::new(2, num_peers, 3).unwrap(),
                    triple_pool_size: 4,
                    ..ProtocolConfig::default()
                };
                let values: Vec<BigInt> = (0..num_peers)
                    .map(|_| BigInt::from(rng.gen_range(-1_000_000i64..1_000_000)))
                    .collect();
                let pairs: BigInt = values[..num_peers / 2 * 2].iter().product();

                let products = run_chain(kind, config, &values);
                for (i, product) in products.iter().enumerate() {
                    if num_peers % 2 == 1 && i == num_peers - 1 {
                        assert_eq!(product, &(&pairs * &values[i]));
                    } else {
                        assert_eq!(product, &pairs);
                    }
                }
            }
        }
    }

    #[test]
    fn exhausted_pool_is_reported() {
        let config = ProtocolConfig::default();
        let mut networks = Network::in_memory(5, Duration::from_millis(50));
        let network = networks.remove(1);
        let mut participant =
            Participant::with_rng(config, network, StdRng::seed_from_u64(1)).unwrap();
        let mut multiplier = NaiveMultiplier {
            pool: Some(TripleBatch::new(1, 1)),
        };
        let operands = [(Share::new(1.into(), 1, 1), Share::new(2.into(), 1, 1))];
        assert!(matches!(
            multiplier.multiply(&mut participant, &operands),
            Err(ProtocolError::TriplePoolExhausted)
        ));
    }
}
