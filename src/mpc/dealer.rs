use std::collections::BTreeMap;

use num_bigint::BigInt;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    config::ProtocolConfig,
    math::Polynomial,
    mpc::{
        compute_shares,
        coordinator::Coordinator,
        deliver,
        mapping::{EvaluationPoints, IdentityMapping, RandomizedMapping},
        message::Message,
        send_shares,
        share::Share,
        triple::{BeaverTriple, TriplePool, TripleShare},
        Lane, ProtocolError,
    },
    net::{Network, Packet, PeerId, DEALER_ID},
};

/// Trusted party that owns the secret and manufactures Beaver triples.
pub struct Dealer {
    config: ProtocolConfig,
    network: Network,
    coordinator: Coordinator,
    rng: StdRng,
}

impl Dealer {
    pub fn new(config: ProtocolConfig, network: Network) -> Result<Self, ProtocolError> {
        Self::with_rng(config, network, StdRng::from_entropy())
    }

    pub fn with_rng(config: ProtocolConfig, network: Network, rng: StdRng) -> Result<Self, ProtocolError> {
        config.validate()?;
        if network.id() != DEALER_ID {
            return Err(ProtocolError::NotTheDealer(network.id()));
        }
        Ok(Self {
            config,
            network,
            coordinator: Coordinator::new(),
            rng,
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Assigns each participant a distinct random evaluation point.
    pub fn generate_id_to_x_mapping(&mut self) -> RandomizedMapping {
        RandomizedMapping::generate(self.config.scheme.num_peers, &mut self.rng)
    }

    /// Assigns participant `i` the evaluation point `i`.
    pub fn identity_mapping(&self) -> IdentityMapping {
        IdentityMapping::new(self.config.scheme.num_peers)
    }

    /// Builds a fresh polynomial for the secret and evaluates it for every
    /// participant of the mapping.
    pub fn share_secret<M: EvaluationPoints>(
        &mut self,
        secret: &BigInt,
        mapping: &M,
    ) -> Result<(Polynomial, BTreeMap<PeerId, Share>), ProtocolError> {
        self.ensure_complete(mapping)?;
        let (poly, shares) = compute_shares(
            secret,
            mapping,
            self.config.scheme.degree,
            self.config.coefficient_bits,
            &mut self.rng,
        );
        Ok((poly, shares.into_iter().map(|share| (share.owner, share)).collect()))
    }

    /// Shares the secret and sends each participant its share.
    pub fn distribute_secret<M: EvaluationPoints>(
        &mut self,
        secret: &BigInt,
        mapping: &M,
    ) -> Result<BTreeMap<PeerId, Share>, ProtocolError> {
        log::info!("distributing shares of the secret to the participants");
        let (poly, shares) = self.share_secret(secret, mapping)?;
        log::debug!("the secret polynomial is {:?}", poly);

        let shares_list: Vec<Share> = shares.values().cloned().collect();
        send_shares(&mut self.network, &shares_list, self.config.send_retries)?;
        Ok(shares)
    }

    pub fn generate_beaver_triple(&mut self) -> BeaverTriple {
        let triple = BeaverTriple::random(self.config.triple_bits, &mut self.rng);
        debug_assert!(triple.is_valid());
        triple
    }

    /// Generates a triple and shares it among the participants.
    pub fn deal_triple(&mut self) -> (BeaverTriple, BTreeMap<PeerId, TripleShare>) {
        let triple = self.generate_beaver_triple();
        let mapping = self.identity_mapping();
        let shares = triple.deal(
            &mapping,
            self.config.scheme.degree,
            self.config.coefficient_bits,
            &mut self.rng,
        );
        (triple, shares)
    }

    /// Deals a fresh triple and sends each participant its shares of `a`, `b`
    /// and `c`, in that order, over the share lane.
    pub fn distribute_triple(&mut self) -> Result<BeaverTriple, ProtocolError> {
        let (triple, shares) = self.deal_triple();
        log::info!("distributing shares of a fresh Beaver triple");

        let outbox: BTreeMap<PeerId, Vec<Packet>> = shares
            .into_iter()
            .map(|(peer, share)| {
                let packets = [share.a, share.b, share.c]
                    .into_iter()
                    .map(|part| Message::Share(part).to_packet())
                    .collect();
                (peer, packets)
            })
            .collect();
        deliver(&mut self.network, outbox, Lane::Share, self.config.send_retries)?;
        Ok(triple)
    }

    pub fn generate_triple_pool(&mut self) -> TriplePool {
        log::info!(
            "precomputing a pool of {} Beaver triples",
            self.config.triple_pool_size
        );
        TriplePool::generate(
            self.config.triple_pool_size,
            self.config.triple_bits,
            &mut self.rng,
        )
    }

    /// Shares every triple of the pool and ships each participant its batch
    /// over the bulk lane.
    pub fn distribute_triple_batch(&mut self, pool: &TriplePool) -> Result<(), ProtocolError> {
        let mapping = self.identity_mapping();
        let batches = pool.deal_batches(
            &mapping,
            self.config.scheme.degree,
            self.config.coefficient_bits,
            &mut self.rng,
        );

        log::info!("shipping batches of {} triple shares", pool.len());
        let outbox = batches
            .into_iter()
            .map(|(peer, batch)| (peer, vec![Packet::from_text(&batch.encode())]))
            .collect();
        deliver(&mut self.network, outbox, Lane::Bulk, self.config.send_retries)
    }

    /// Blocks until every participant has signalled it is ready.
    pub fn await_ready(&mut self) -> Result<(), ProtocolError> {
        let peers = self.config.scheme.peers();
        self.coordinator.await_ready(&mut self.network, peers)?;
        log::info!("all participants ready, dealer in phase {}", self.coordinator.phase());
        Ok(())
    }

    pub fn close(mut self) -> std::io::Result<()> {
        self.network.close()
    }

    fn ensure_complete<M: EvaluationPoints>(&self, mapping: &M) -> Result<(), ProtocolError> {
        for peer in self.config.scheme.peers() {
            if mapping.x_for(peer).is_none() {
                return Err(ProtocolError::MissingEvaluationPoint(peer));
            }
        }
        Ok(())
    }
}
