use num_bigint::BigInt;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    config::ProtocolConfig,
    mpc::{
        compute_shares,
        coordinator::Coordinator,
        mapping::IdentityMapping,
        message::{recv_share, Message},
        reconstruct_secret, send_shares,
        share::{sum_shares, Share},
        triple::{TripleBatch, TripleShare},
        ProtocolError,
    },
    net::{Network, PeerId, DEALER_ID},
};

/// Steps of a reconstruction round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconstructionState {
    AwaitingOwnShare,
    Broadcasting,
    Collecting,
    Reconstructed(BigInt),
    /// Terminal state of a participant that only sends its share.
    Sent,
}

impl ReconstructionState {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingOwnShare => "awaiting own share",
            Self::Broadcasting => "broadcasting",
            Self::Collecting => "collecting",
            Self::Reconstructed(_) => "reconstructed",
            Self::Sent => "sent",
        }
    }
}

/// Who reconstructs the secret in a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionRole {
    /// Every participant broadcasts its share and reconstructs.
    Everyone,
    /// Every participant sends its share to this participant, which is the only
    /// one to reconstruct.
    Designated(PeerId),
}

/// One reconstruction round as seen by a single participant.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    id: PeerId,
    role: ReconstructionRole,
    state: ReconstructionState,
    own: Option<Share>,
    collected: Vec<Share>,
}

impl Reconstruction {
    pub fn new(id: PeerId, role: ReconstructionRole) -> Self {
        Self {
            id,
            role,
            state: ReconstructionState::AwaitingOwnShare,
            own: None,
            collected: Vec::new(),
        }
    }

    pub fn state(&self) -> &ReconstructionState {
        &self.state
    }

    /// Hands the round the share to broadcast.
    pub fn accept_own_share(&mut self, share: Share) -> Result<(), ProtocolError> {
        self.expect_state(ReconstructionState::AwaitingOwnShare, "accept a share")?;
        if share.owner != self.id {
            return Err(ProtocolError::UnexpectedShareOwner {
                expected: self.id,
                got: share.owner,
            });
        }
        self.own = Some(share);
        self.state = ReconstructionState::Broadcasting;
        Ok(())
    }

    /// The share to broadcast and the participants to send it to.
    pub fn outgoing(&self, peers: impl Iterator<Item = PeerId>) -> Result<(&Share, Vec<PeerId>), ProtocolError> {
        self.expect_state(ReconstructionState::Broadcasting, "broadcast")?;
        let own = self.own.as_ref().ok_or(ProtocolError::OutOfOrder {
            action: "broadcast",
            state: "missing own share",
        })?;
        let targets = match self.role {
            ReconstructionRole::Everyone => peers.collect(),
            ReconstructionRole::Designated(designated) => vec![designated],
        };
        Ok((own, targets))
    }

    /// Marks the broadcast as done.
    pub fn broadcast_done(&mut self) -> Result<(), ProtocolError> {
        self.expect_state(ReconstructionState::Broadcasting, "finish broadcasting")?;
        self.state = match self.role {
            ReconstructionRole::Designated(designated) if designated != self.id => {
                ReconstructionState::Sent
            }
            _ => ReconstructionState::Collecting,
        };
        Ok(())
    }

    /// Records the share broadcast by `from`.
    pub fn collect(&mut self, from: PeerId, share: Share) -> Result<(), ProtocolError> {
        self.expect_state(ReconstructionState::Collecting, "collect")?;
        if share.owner != from {
            return Err(ProtocolError::UnexpectedShareOwner {
                expected: from,
                got: share.owner,
            });
        }
        self.collected.push(share);
        Ok(())
    }

    /// Interpolates the collected shares.
    pub fn finish(&mut self, config: &ProtocolConfig) -> Result<BigInt, ProtocolError> {
        self.expect_state(ReconstructionState::Collecting, "interpolate")?;
        let secret = reconstruct_secret(&self.collected, &config.scheme)?;
        self.state = ReconstructionState::Reconstructed(secret.clone());
        Ok(secret)
    }

    fn expect_state(&self, expected: ReconstructionState, action: &'static str) -> Result<(), ProtocolError> {
        if self.state != expected {
            return Err(ProtocolError::OutOfOrder {
                action,
                state: self.state.name(),
            });
        }
        Ok(())
    }
}

/// A participant of the protocol. It holds its own shares and runs the
/// reconstruction, summation and multiplication sub-protocols with the
/// other participants.
pub struct Participant {
    id: PeerId,
    config: ProtocolConfig,
    network: Network,
    coordinator: Coordinator,
    rng: StdRng,
    results: Vec<(String, BigInt)>,
}

impl Participant {
    pub fn new(config: ProtocolConfig, network: Network) -> Result<Self, ProtocolError> {
        Self::with_rng(config, network, StdRng::from_entropy())
    }

    pub fn with_rng(config: ProtocolConfig, network: Network, rng: StdRng) -> Result<Self, ProtocolError> {
        config.validate()?;
        let id = network.id();
        if !config.scheme.peers().contains(&id) {
            return Err(ProtocolError::MissingEvaluationPoint(id));
        }
        Ok(Self {
            id,
            config,
            network,
            coordinator: Coordinator::new(),
            rng,
            results: Vec::new(),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// The identity mapping shared by every participant for summation and
    /// multiplication.
    pub fn identity_mapping(&self) -> IdentityMapping {
        IdentityMapping::new(self.config.scheme.num_peers)
    }

    /// Named results computed so far, in order.
    pub fn results(&self) -> &[(String, BigInt)] {
        &self.results
    }

    pub fn record(&mut self, label: &str, value: BigInt) {
        log::info!("participant {}: {label} = {value}", self.id);
        self.results.push((label.to_string(), value));
    }

    /// Blocks until `from` sends this participant its share.
    pub fn await_own_share(&mut self, from: PeerId) -> Result<Share, ProtocolError> {
        let share = recv_share(&mut self.network, from)?;
        if share.owner != self.id {
            return Err(ProtocolError::UnexpectedShareOwner {
                expected: self.id,
                got: share.owner,
            });
        }
        log::info!(
            "participant {} received share {} at x = {}",
            self.id,
            share.value,
            share.x
        );
        Ok(share)
    }

    /// Runs a reconstruction round for a single share. Returns `None` when
    /// another participant is the designated reconstructor.
    pub fn reconstruct(&mut self, own: &Share, role: ReconstructionRole) -> Result<Option<BigInt>, ProtocolError> {
        let mut secrets = self.reconstruct_many(std::slice::from_ref(own), role)?;
        Ok(secrets.pop().flatten())
    }

    /// Runs one reconstruction round per share, sharing a single broadcast and
    /// collection phase among all of them.
    pub fn reconstruct_many(
        &mut self,
        own: &[Share],
        role: ReconstructionRole,
    ) -> Result<Vec<Option<BigInt>>, ProtocolError> {
        let mut rounds = Vec::with_capacity(own.len());
        for share in own {
            let mut round = Reconstruction::new(self.id, role);
            round.accept_own_share(share.clone())?;
            rounds.push(round);
        }

        for round in &rounds {
            let (share, targets) = round.outgoing(self.config.scheme.peers())?;
            let packet = Message::Share(share.clone()).to_packet();
            for peer in targets {
                self.network.send_to(&packet, peer)?;
            }
        }
        for round in rounds.iter_mut() {
            round.broadcast_done()?;
        }

        if rounds
            .iter()
            .all(|round| *round.state() == ReconstructionState::Sent)
        {
            log::info!("participant {} sent its shares", self.id);
            return Ok(vec![None; rounds.len()]);
        }

        // Each peer sent its shares in round order.
        for peer in self.config.scheme.peers() {
            for round in rounds.iter_mut() {
                let share = recv_share(&mut self.network, peer)?;
                round.collect(peer, share)?;
            }
        }

        rounds
            .iter_mut()
            .map(|round| round.finish(&self.config).map(Some))
            .collect()
    }

    /// Reveals a shared value to every participant.
    pub fn open(&mut self, own: &Share) -> Result<BigInt, ProtocolError> {
        let mut values = self.open_many(std::slice::from_ref(own))?;
        values.pop().ok_or(ProtocolError::OutOfOrder {
            action: "open",
            state: "empty",
        })
    }

    /// Reveals several shared values in a single round.
    pub fn open_many(&mut self, own: &[Share]) -> Result<Vec<BigInt>, ProtocolError> {
        self.reconstruct_many(own, ReconstructionRole::Everyone)?
            .into_iter()
            .map(|value| {
                value.ok_or(ProtocolError::OutOfOrder {
                    action: "open",
                    state: "sent",
                })
            })
            .collect()
    }

    /// Shares a private value among all participants. Private values are only
    /// ever combined with other shares, so they use the identity points.
    pub fn share_private_value(&mut self, value: &BigInt, mapping: &IdentityMapping) -> Result<(), ProtocolError> {
        log::info!("participant {} sharing its private value", self.id);
        let (_, shares) = compute_shares(
            value,
            mapping,
            self.config.scheme.degree,
            self.config.coefficient_bits,
            &mut self.rng,
        );
        send_shares(&mut self.network, &shares, self.config.send_retries)
    }

    /// Receives one share from each party of `from`, in order. Every share
    /// must belong to this participant.
    pub fn collect_shares(&mut self, from: &[PeerId]) -> Result<Vec<Share>, ProtocolError> {
        from.iter().map(|peer| self.await_own_share(*peer)).collect()
    }

    /// Summation protocol: every participant shares its private value, adds
    /// up the shares it receives and reconstructs the sum of all values.
    pub fn sum_private_values(
        &mut self,
        value: &BigInt,
        mapping: &IdentityMapping,
    ) -> Result<BigInt, ProtocolError> {
        self.share_private_value(value, mapping)?;
        let contributors: Vec<PeerId> = self.config.scheme.peers().collect();
        let shares = self.collect_shares(&contributors)?;

        let sum = sum_shares(&shares)?.ok_or(ProtocolError::OutOfOrder {
            action: "sum",
            state: "no shares were received",
        })?;
        log::debug!("participant {} holds the share {} of the sum", self.id, sum.value);
        self.open(&sum)
    }

    /// Signals the dealer and receives this participant's batch of triple
    /// shares over the bulk lane.
    pub fn receive_triple_batch(&mut self) -> Result<TripleBatch, ProtocolError> {
        self.signal_dealer()?;
        let packet = self.network.recv_bulk_from(DEALER_ID)?;
        let text = packet
            .as_text()
            .map_err(|_| crate::mpc::message::WireError::NotUtf8)?;
        let batch = TripleBatch::decode(text, self.id, self.id as u64)?;
        if batch.is_empty() {
            return Err(ProtocolError::TriplePoolExhausted);
        }
        log::info!(
            "participant {} received a batch of {} triple shares",
            self.id,
            batch.len()
        );
        Ok(batch)
    }

    /// Signals the dealer and receives the shares of one fresh triple.
    pub fn request_triple(&mut self) -> Result<TripleShare, ProtocolError> {
        self.signal_dealer()?;
        let a = self.await_own_share(DEALER_ID)?;
        let b = self.await_own_share(DEALER_ID)?;
        let c = self.await_own_share(DEALER_ID)?;
        TripleShare::from_shares(a, b, c)
    }

    /// Tells the dealer this participant is ready for its next step.
    pub fn signal_dealer(&mut self) -> Result<(), ProtocolError> {
        self.coordinator.signal_ready(&mut self.network, DEALER_ID)
    }

    /// Waits until every participant reached the same point.
    pub fn barrier(&mut self) -> Result<(), ProtocolError> {
        self.coordinator.barrier(&mut self.network)
    }

    pub fn close(mut self) -> std::io::Result<()> {
        self.network.close()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use num_bigint::BigInt;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::{Participant, Reconstruction, ReconstructionRole, ReconstructionState};
    use crate::{
        config::{ProtocolConfig, SchemeConfig},
        math::InterpolationError,
        mpc::{
            compute_shares, mapping::IdentityMapping, send_shares, share::Share, ProtocolError,
        },
        net::{Network, Packet, DEALER_ID},
    };

    /// Runs `body` for every participant in its own thread. Returns the dealer
    /// network, which nobody drives, along with the results ordered by ID.
    fn run_participants<T, F>(config: &ProtocolConfig, body: F) -> (Network, Vec<T>)
    where
        T: Send + 'static,
        F: Fn(&mut Participant) -> T + Send + Sync + Clone + 'static,
    {
        let mut networks = Network::in_memory(config.scheme.num_peers, Duration::from_secs(5));
        let dealer = networks.remove(DEALER_ID);
        let handles: Vec<_> = networks
            .into_iter()
            .map(|network| {
                let config = config.clone();
                let body = body.clone();
                thread::spawn(move || {
                    let seed = network.id() as u64;
                    let mut participant =
                        Participant::with_rng(config, network, StdRng::seed_from_u64(seed)).unwrap();
                    body(&mut participant)
                })
            })
            .collect();
        let results = handles.into_iter().map(|h| h.join().unwrap()).collect();
        (dealer, results)
    }

    #[test]
    fn state_machine_transitions() {
        let mut round = Reconstruction::new(2, ReconstructionRole::Everyone);
        assert_eq!(round.state(), &ReconstructionState::AwaitingOwnShare);
        assert!(matches!(
            round.collect(1, Share::new(1.into(), 1, 1)),
            Err(ProtocolError::OutOfOrder { .. })
        ));
        assert!(matches!(
            round.accept_own_share(Share::new(1.into(), 3, 3)),
            Err(ProtocolError::UnexpectedShareOwner { expected: 2, got: 3 })
        ));

        round.accept_own_share(Share::new(1.into(), 2, 2)).unwrap();
        assert_eq!(round.state(), &ReconstructionState::Broadcasting);
        let (_, targets) = round.outgoing(1..=5).unwrap();
        assert_eq!(targets, vec![1, 2, 3, 4, 5]);
        round.broadcast_done().unwrap();
        assert_eq!(round.state(), &ReconstructionState::Collecting);

        // f(x) = 7 for every x.
        for peer in 1..=3 {
            round.collect(peer, Share::new(7.into(), peer, peer as u64)).unwrap();
        }
        assert_eq!(round.finish(&ProtocolConfig::default()).unwrap(), BigInt::from(7));
        assert_eq!(round.state(), &ReconstructionState::Reconstructed(7.into()));
    }

    #[test]
    fn collected_share_must_come_from_its_owner() {
        let mut round = Reconstruction::new(1, ReconstructionRole::Everyone);
        round.accept_own_share(Share::new(1.into(), 1, 1)).unwrap();
        round.broadcast_done().unwrap();
        assert!(matches!(
            round.collect(2, Share::new(1.into(), 4, 4)),
            Err(ProtocolError::UnexpectedShareOwner { expected: 2, got: 4 })
        ));
    }

    #[test]
    fn designated_round_ends_in_sent() {
        let mut round = Reconstruction::new(1, ReconstructionRole::Designated(3));
        round.accept_own_share(Share::new(1.into(), 1, 1)).unwrap();
        let (_, targets) = round.outgoing(1..=5).unwrap();
        assert_eq!(targets, vec![3]);
        round.broadcast_done().unwrap();
        assert_eq!(round.state(), &ReconstructionState::Sent);
    }

    #[test]
    fn duplicate_points_are_degenerate() {
        let mut round = Reconstruction::new(1, ReconstructionRole::Everyone);
        round.accept_own_share(Share::new(1.into(), 1, 1)).unwrap();
        round.broadcast_done().unwrap();
        for peer in 1..=3 {
            round.collect(peer, Share::new(peer.into(), peer, 1)).unwrap();
        }
        assert!(matches!(
            round.finish(&ProtocolConfig::default()),
            Err(ProtocolError::Interpolation(
                InterpolationError::DegenerateInterpolation { .. }
            ))
        ));
    }

    #[test]
    fn every_participant_reconstructs() {
        let config = ProtocolConfig::default();
        let mut rng = StdRng::seed_from_u64(99);
        let (_, shares) = compute_shares(&BigInt::from(40), &IdentityMapping::new(5), 2, 80, &mut rng);

        let (_dealer, secrets) = run_participants(&config, move |participant| {
            let own = shares[participant.id() - 1].clone();
            participant
                .reconstruct(&own, ReconstructionRole::Everyone)
                .unwrap()
        });
        assert!(secrets.iter().all(|s| s == &Some(BigInt::from(40))));
    }

    #[test]
    fn only_designated_participant_reconstructs() {
        let config = ProtocolConfig::default();
        let mut rng = StdRng::seed_from_u64(98);
        let (_, shares) = compute_shares(&BigInt::from(40), &IdentityMapping::new(5), 2, 80, &mut rng);

        let (_dealer, secrets) = run_participants(&config, move |participant| {
            let own = shares[participant.id() - 1].clone();
            participant
                .reconstruct(&own, ReconstructionRole::Designated(3))
                .unwrap()
        });
        assert_eq!(secrets, vec![None, None, Some(BigInt::from(40)), None, None]);
    }

    #[test]
    fn own_share_comes_from_the_dealer() {
        let config = ProtocolConfig::default();
        let mut networks = Network::in_memory(5, Duration::from_secs(5));
        let mut rng = StdRng::seed_from_u64(97);
        let (_, shares) = compute_shares(&BigInt::from(40), &IdentityMapping::new(5), 2, 80, &mut rng);
        send_shares(&mut networks[DEALER_ID], &shares, 0).unwrap();

        let network = networks.remove(2);
        let mut participant = Participant::with_rng(config, network, StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(participant.await_own_share(DEALER_ID).unwrap(), shares[1]);
    }

    #[test]
    fn summation_of_private_values() {
        let config = ProtocolConfig::default();
        let (_dealer, sums) = run_participants(&config, |participant| {
            let value = BigInt::from([11, 15, 28, 31, 21][participant.id() - 1]);
            let mapping = participant.identity_mapping();
            participant.sum_private_values(&value, &mapping).unwrap()
        });
        assert!(sums.iter().all(|sum| sum == &BigInt::from(106)));
    }

    #[test]
    fn summation_of_random_private_values() {
        let mut rng = StdRng::seed_from_u64(95);
        for _ in 0..4 {
            let num_peers = rng.gen_range(3..=9);
            let degree = rng.gen_range(1..num_peers);
            let config = ProtocolConfig {
                scheme: SchemeConfig::new(degree, num_peers, degree + 1).unwrap(),
                ..ProtocolConfig::default()
            };
            let values: Vec<BigInt> = (0..num_peers).map(|_| BigInt::from(rng.gen::<i64>())).collect();
            let expected: BigInt = values.iter().sum();

            let (_dealer, sums) = run_participants(&config, move |participant| {
                let value = values[participant.id() - 1].clone();
                let mapping = participant.identity_mapping();
                participant.sum_private_values(&value, &mapping).unwrap()
            });
            assert!(sums.iter().all(|sum| sum == &expected));
        }
    }

    #[test]
    fn empty_triple_batch_is_exhausted() {
        let mut networks = Network::in_memory(5, Duration::from_secs(5));
        networks[DEALER_ID].send_bulk_to(&Packet::from_text(""), 4).unwrap();
        let network = networks.remove(4);
        let mut participant =
            Participant::with_rng(ProtocolConfig::default(), network, StdRng::seed_from_u64(4)).unwrap();
        assert!(matches!(
            participant.receive_triple_batch(),
            Err(ProtocolError::TriplePoolExhausted)
        ));
    }

    #[test]
    fn batched_opening_reveals_every_value() {
        let config = ProtocolConfig::default();
        let mut rng = StdRng::seed_from_u64(96);
        let mapping = IdentityMapping::new(5);
        let first = compute_shares(&BigInt::from(-3), &mapping, 2, 80, &mut rng).1;
        let second = compute_shares(&BigInt::from(1000), &mapping, 2, 80, &mut rng).1;

        let (_dealer, opened) = run_participants(&config, move |participant| {
            let index = participant.id() - 1;
            let own = [first[index].clone(), second[index].clone()];
            participant.open_many(&own).unwrap()
        });
        for values in opened {
            assert_eq!(values, vec![BigInt::from(-3), BigInt::from(1000)]);
        }
    }

    #[test]
    fn missing_peer_aborts_with_timeout() {
        let config = ProtocolConfig {
            recv_timeout_ms: 50,
            ..ProtocolConfig::default()
        };
        let mut networks = Network::in_memory(5, config.recv_timeout());
        // Keep the other networks alive but silent.
        let network = networks.remove(1);
        let mut participant = Participant::with_rng(config, network, StdRng::seed_from_u64(1)).unwrap();
        let result = participant.reconstruct(&Share::new(5.into(), 1, 1), ReconstructionRole::Everyone);
        assert!(matches!(result, Err(ProtocolError::TransportTimeout { peer: 2 })));
    }
}
