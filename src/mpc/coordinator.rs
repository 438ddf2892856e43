//! Barrier discipline between the dealer and the participants.
//!
//! Every step that consumes a value produced by another party is preceded by
//! an explicit acknowledgement: the waiting side blocks until it has received a
//! continue token from every party it depends on. Each receive is bounded by
//! the network timeout, so a missing party aborts the run instead of hanging it.

use crate::{
    mpc::{
        message::{recv_continue, Message},
        ProtocolError,
    },
    net::{Network, PeerId},
};

/// Tracks the phases a party went through.
#[derive(Debug, Default)]
pub struct Coordinator {
    phase: usize,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed phases.
    pub fn phase(&self) -> usize {
        self.phase
    }

    /// Tells `to` that this party is ready for the next phase.
    pub fn signal_ready(&self, network: &mut Network, to: PeerId) -> Result<(), ProtocolError> {
        log::debug!("signalling party {to} that phase {} is done", self.phase);
        network.send_to(&Message::Continue.to_packet(), to)?;
        Ok(())
    }

    /// Blocks until every party in `from` has signalled it is ready.
    pub fn await_ready<I>(&mut self, network: &mut Network, from: I) -> Result<(), ProtocolError>
    where
        I: IntoIterator<Item = PeerId>,
    {
        for peer in from {
            recv_continue(network, peer)?;
            log::debug!("party {peer} is ready");
        }
        self.phase += 1;
        log::debug!("all parties ready, entering phase {}", self.phase);
        Ok(())
    }

    /// All-to-all barrier among the participants: no participant leaves the
    /// barrier before every participant has entered it.
    pub fn barrier(&mut self, network: &mut Network) -> Result<(), ProtocolError> {
        log::debug!("participant {} entering barrier {}", network.id(), self.phase);
        network.broadcast_to_peers(&Message::Continue.to_packet())?;
        let peers = network.peers();
        self.await_ready(network, peers)
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::Coordinator;
    use crate::{
        mpc::{message::Message, ProtocolError},
        net::{Network, DEALER_ID},
    };

    #[test]
    fn barrier_releases_once_everyone_arrived() {
        let networks = Network::in_memory(4, Duration::from_secs(5));
        let handles: Vec<_> = networks
            .into_iter()
            .skip(1)
            .map(|mut network| {
                thread::spawn(move || {
                    let mut coordinator = Coordinator::new();
                    // Stagger the arrivals.
                    thread::sleep(Duration::from_millis(10 * network.id() as u64));
                    coordinator.barrier(&mut network).unwrap();
                    coordinator.barrier(&mut network).unwrap();
                    coordinator.phase()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
    }

    #[test]
    fn dealer_waits_for_every_participant() {
        let mut networks = Network::in_memory(3, Duration::from_millis(50));
        let coordinator = Coordinator::new();
        coordinator.signal_ready(&mut networks[1], DEALER_ID).unwrap();
        coordinator.signal_ready(&mut networks[2], DEALER_ID).unwrap();

        let mut dealer = Coordinator::new();
        let result = dealer.await_ready(&mut networks[DEALER_ID], 1..=3);
        assert!(matches!(
            result,
            Err(ProtocolError::TransportTimeout { peer: 3 })
        ));
        assert_eq!(dealer.phase(), 0);
    }

    #[test]
    fn shares_are_not_mistaken_for_acknowledgements() {
        let mut networks = Network::in_memory(2, Duration::from_secs(1));
        networks[1]
            .send_to(&Message::Share(crate::mpc::share::Share::new(1.into(), 1, 1)).to_packet(), DEALER_ID)
            .unwrap();
        let mut dealer = Coordinator::new();
        assert!(matches!(
            dealer.await_ready(&mut networks[DEALER_ID], [1]),
            Err(ProtocolError::Wire(_))
        ));
    }
}
