pub mod channel;

use crate::config::NetworkConfig;
use crate::net::channel::{Channel, TcpChannel};
use channel::{ChannelError, LoopBackChannel, MemoryChannel, NullChannel};
use std::{
    cmp::Ordering,
    io::{self},
    net::TcpListener,
    ops::RangeInclusive,
    str::Utf8Error,
    time::Duration,
};
use thiserror::Error;

/// Index of a node in the network. The dealer is node 0 and the participants
/// are nodes `1..=num_peers`.
pub type PeerId = usize;

/// Node index of the trusted dealer.
pub const DEALER_ID: PeerId = 0;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("party id {0} not found")]
    PartyIdNotFound(PeerId),

    #[error("unexpected handshake from party {0}")]
    UnexpectedHandshake(PeerId),

    #[error("can not listen on {address}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("error setting up the channel with party {peer}")]
    Setup {
        peer: PeerId,
        #[source]
        source: io::Error,
    },

    #[error("channel with party {peer} failed")]
    Channel {
        peer: PeerId,
        #[source]
        source: ChannelError,
    },
}

impl NetworkError {
    /// The party a receive was waiting on when it ran out of time, if that is
    /// what failed.
    pub fn timed_out_peer(&self) -> Option<PeerId> {
        match self {
            Self::Channel {
                peer,
                source: ChannelError::Timeout(_),
            } => Some(*peer),
            _ => None,
        }
    }
}

/// Payload of one frame on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet(Vec<u8>);

impl Packet {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self(buffer)
    }

    /// Creates a packet carrying a text payload.
    pub fn from_text(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Interprets the packet as UTF-8 text.
    pub fn as_text(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Channels of one node to every node of the network, indexed by node.
///
/// Two lanes are kept: the share lane connects every pair of nodes and carries
/// shares and barrier tokens, the bulk lane only connects the dealer with each
/// participant and carries triple batches.
pub struct Network {
    id: PeerId,
    share_channels: Vec<Box<dyn Channel>>,
    bulk_channels: Vec<Box<dyn Channel>>,
    recv_timeout: Duration,
}

impl Network {
    /// Creates a new TCP network for the node `id` among the dealer and
    /// `num_peers` participants.
    pub fn create(
        id: PeerId,
        num_peers: usize,
        config: &NetworkConfig,
        recv_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        log::info!("setting up the network of node {id} among {num_peers} peers and the dealer");
        let n_nodes = num_peers + 1;
        if id >= n_nodes {
            return Err(NetworkError::PartyIdNotFound(id));
        }

        let share_listener = bind(&config.share_bind_address(id))?;
        let bulk_listener = if id != DEALER_ID {
            Some(bind(&config.bulk_bind_address(id))?)
        } else {
            None
        };

        let mut share_channels = null_channels(n_nodes);
        for i in 0..n_nodes {
            match i.cmp(&id) {
                Ordering::Less => {
                    log::info!("opening share lane to node {i}");
                    let channel = TcpChannel::connect(
                        id,
                        &config.share_address(i),
                        config.connect_timeout(),
                        config.connect_retry(),
                    )
                    .map_err(|err| setup_error(i, err))?;
                    share_channels[i] = Box::new(channel);
                }
                Ordering::Greater => {
                    log::info!("waiting for a node above {id} to open its share lane");
                    let (channel, remote_id) = TcpChannel::accept(
                        &share_listener,
                        config.connect_timeout(),
                        config.connect_retry(),
                    )
                        .map_err(|err| setup_error(i, err))?;
                    if remote_id <= id || remote_id >= n_nodes {
                        return Err(NetworkError::UnexpectedHandshake(remote_id));
                    }
                    share_channels[remote_id] = Box::new(channel);
                }
                Ordering::Equal => {
                    log::debug!("node {id} talks to itself through a loop-back channel");
                    share_channels[i] = Box::new(LoopBackChannel::default());
                }
            }
        }

        let mut bulk_channels = null_channels(n_nodes);
        match bulk_listener {
            None => {
                for peer in 1..n_nodes {
                    log::info!("opening bulk lane to peer ID {peer}");
                    let channel = TcpChannel::connect(
                        id,
                        &config.bulk_address(peer),
                        config.connect_timeout(),
                        config.connect_retry(),
                    )
                    .map_err(|err| setup_error(peer, err))?;
                    bulk_channels[peer] = Box::new(channel);
                }
            }
            Some(listener) => {
                log::info!("waiting for the dealer to open the bulk lane");
                let (channel, remote_id) = TcpChannel::accept(
                    &listener,
                    config.connect_timeout(),
                    config.connect_retry(),
                )
                    .map_err(|err| setup_error(DEALER_ID, err))?;
                if remote_id != DEALER_ID {
                    return Err(NetworkError::UnexpectedHandshake(remote_id));
                }
                bulk_channels[DEALER_ID] = Box::new(channel);
            }
        }

        Ok(Self {
            id,
            share_channels,
            bulk_channels,
            recv_timeout,
        })
    }

    /// Creates the networks of the dealer and `num_peers` participants connected
    /// through in-memory channels. The network at index `i` belongs to node `i`.
    pub fn in_memory(num_peers: usize, recv_timeout: Duration) -> Vec<Self> {
        let n_nodes = num_peers + 1;
        let mut share: Vec<Vec<Box<dyn Channel>>> = (0..n_nodes).map(|_| null_channels(n_nodes)).collect();
        let mut bulk: Vec<Vec<Box<dyn Channel>>> = (0..n_nodes).map(|_| null_channels(n_nodes)).collect();

        for i in 0..n_nodes {
            share[i][i] = Box::new(LoopBackChannel::default());
            for j in i + 1..n_nodes {
                let (left, right) = MemoryChannel::pair();
                share[i][j] = Box::new(left);
                share[j][i] = Box::new(right);
            }
        }
        for peer in 1..n_nodes {
            let (left, right) = MemoryChannel::pair();
            bulk[DEALER_ID][peer] = Box::new(left);
            bulk[peer][DEALER_ID] = Box::new(right);
        }

        share
            .into_iter()
            .zip(bulk)
            .enumerate()
            .map(|(id, (share_channels, bulk_channels))| Self {
                id,
                share_channels,
                bulk_channels,
                recv_timeout,
            })
            .collect()
    }

    /// Node index of the owner of this network.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Number of participants, without the dealer.
    pub fn num_peers(&self) -> usize {
        self.share_channels.len() - 1
    }

    /// Node indices of the participants.
    pub fn peers(&self) -> RangeInclusive<PeerId> {
        1..=self.num_peers()
    }

    /// Sends a packet of information to a given party over the share lane.
    pub fn send_to(&mut self, packet: &Packet, party_id: PeerId) -> Result<usize, NetworkError> {
        let channel = self
            .share_channels
            .get_mut(party_id)
            .ok_or(NetworkError::PartyIdNotFound(party_id))?;
        channel.send(packet).map_err(|source| NetworkError::Channel {
            peer: party_id,
            source,
        })
    }

    /// Receives a packet from a given party over the share lane.
    pub fn recv_from(&mut self, party_id: PeerId) -> Result<Packet, NetworkError> {
        let timeout = self.recv_timeout;
        let channel = self
            .share_channels
            .get_mut(party_id)
            .ok_or(NetworkError::PartyIdNotFound(party_id))?;
        channel.recv(timeout).map_err(|source| NetworkError::Channel {
            peer: party_id,
            source,
        })
    }

    /// Sends a packet to every participant, including this node if it is one.
    pub fn broadcast_to_peers(&mut self, packet: &Packet) -> Result<(), NetworkError> {
        for peer in self.peers() {
            self.send_to(packet, peer)?;
        }
        Ok(())
    }

    /// Sends a packet over the bulk lane.
    pub fn send_bulk_to(&mut self, packet: &Packet, party_id: PeerId) -> Result<usize, NetworkError> {
        let channel = self
            .bulk_channels
            .get_mut(party_id)
            .ok_or(NetworkError::PartyIdNotFound(party_id))?;
        channel.send(packet).map_err(|source| NetworkError::Channel {
            peer: party_id,
            source,
        })
    }

    /// Receives a packet over the bulk lane.
    pub fn recv_bulk_from(&mut self, party_id: PeerId) -> Result<Packet, NetworkError> {
        let timeout = self.recv_timeout;
        let channel = self
            .bulk_channels
            .get_mut(party_id)
            .ok_or(NetworkError::PartyIdNotFound(party_id))?;
        channel.recv(timeout).map_err(|source| NetworkError::Channel {
            peer: party_id,
            source,
        })
    }

    /// Closes every channel of both lanes.
    pub fn close(&mut self) -> io::Result<()> {
        for channel in self
            .share_channels
            .iter_mut()
            .chain(self.bulk_channels.iter_mut())
        {
            channel.close()?;
        }
        Ok(())
    }
}

fn null_channels(n_nodes: usize) -> Vec<Box<dyn Channel>> {
    (0..n_nodes)
        .map(|_| Box::new(NullChannel) as Box<dyn Channel>)
        .collect()
}

fn bind(address: &str) -> Result<TcpListener, NetworkError> {
    let listener = TcpListener::bind(address).map_err(|source| {
        log::error!("can not listen on {address}: {source}");
        NetworkError::Bind {
            address: address.to_string(),
            source,
        }
    })?;
    log::info!("listening on {:?}", listener.local_addr());
    Ok(listener)
}

fn setup_error(peer: PeerId, source: io::Error) -> NetworkError {
    log::error!("error setting up the channel with party {peer}: {source}");
    NetworkError::Setup { peer, source }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::{Network, NetworkError, Packet, DEALER_ID};
    use crate::config::{Addressing, NetworkConfig};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn in_memory_network_connects_every_pair() {
        let mut networks = Network::in_memory(3, TIMEOUT);
        assert_eq!(networks.len(), 4);
        assert_eq!(networks[2].id(), 2);
        assert_eq!(networks[2].num_peers(), 3);

        networks[1].send_to(&Packet::from_text("from 1"), 3).unwrap();
        networks[3].send_to(&Packet::from_text("to self"), 3).unwrap();
        assert_eq!(networks[3].recv_from(1).unwrap().as_text().unwrap(), "from 1");
        assert_eq!(networks[3].recv_from(3).unwrap().as_text().unwrap(), "to self");
    }

    #[test]
    fn broadcast_reaches_peers_but_not_dealer() {
        let mut networks = Network::in_memory(3, Duration::from_millis(20));
        networks[2].broadcast_to_peers(&Packet::from_text("hi")).unwrap();
        for peer in 1..=3 {
            assert_eq!(networks[peer].recv_from(2).unwrap().as_text().unwrap(), "hi");
        }
        assert_eq!(networks[DEALER_ID].recv_from(2).unwrap_err().timed_out_peer(), Some(2));
    }

    #[test]
    fn bulk_lane_only_links_dealer_and_peers() {
        let mut networks = Network::in_memory(2, TIMEOUT);
        networks[DEALER_ID]
            .send_bulk_to(&Packet::from_text("1;2;2"), 2)
            .unwrap();
        assert_eq!(
            networks[2].recv_bulk_from(DEALER_ID).unwrap().as_text().unwrap(),
            "1;2;2"
        );
        assert!(matches!(
            networks[1].send_bulk_to(&Packet::from_text("nope"), 2),
            Err(NetworkError::Channel { peer: 2, .. })
        ));
        assert!(matches!(
            networks[1].recv_from(9),
            Err(NetworkError::PartyIdNotFound(9))
        ));
    }

    #[test]
    fn tcp_network_on_localhost() {
        let config = NetworkConfig {
            addressing: Addressing::Localhost {
                share_base_port: 47100,
                bulk_base_port: 47200,
            },
            connect_timeout_ms: 10_000,
            connect_retry_ms: 20,
        };
        let num_peers = 2;

        let handles: Vec<_> = (0..=num_peers)
            .map(|id| {
                let config = config.clone();
                thread::spawn(move || {
                    let mut network = Network::create(id, num_peers, &config, TIMEOUT).unwrap();
                    if id == DEALER_ID {
                        for peer in network.peers() {
                            network
                                .send_bulk_to(&Packet::from_text("batch"), peer)
                                .unwrap();
                        }
                    } else {
                        network.broadcast_to_peers(&Packet::from_text(&id.to_string())).unwrap();
                        for peer in network.peers() {
                            let packet = network.recv_from(peer).unwrap();
                            assert_eq!(packet.as_text().unwrap(), peer.to_string());
                        }
                        let batch = network.recv_bulk_from(DEALER_ID).unwrap();
                        assert_eq!(batch.as_text().unwrap(), "batch");
                        network.send_to(&Packet::from_text("continue"), DEALER_ID).unwrap();
                    }
                    if id == DEALER_ID {
                        for peer in network.peers() {
                            assert_eq!(network.recv_from(peer).unwrap().as_text().unwrap(), "continue");
                        }
                    }
                    network.close().unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
