use std::{fs::File, io::BufReader, ops::RangeInclusive, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::{PeerId, DEALER_ID};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid scheme: {0}")]
    InvalidScheme(String),

    #[error("invalid protocol configuration: {0}")]
    InvalidProtocol(String),

    #[error("error reading the configuration file")]
    Io(#[from] std::io::Error),

    #[error("error parsing the configuration file")]
    Parse(#[from] serde_json::Error),
}

/// Parameters of the threshold sharing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeConfig {
    /// Degree of the sharing polynomials.
    pub degree: usize,
    /// Number of participants holding shares.
    pub num_peers: usize,
    /// Number of shares needed to reconstruct a secret.
    pub threshold: usize,
}

impl SchemeConfig {
    pub fn new(degree: usize, num_peers: usize, threshold: usize) -> Result<Self, ConfigError> {
        let scheme = Self {
            degree,
            num_peers,
            threshold,
        };
        scheme.validate()?;
        Ok(scheme)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.degree == 0 {
            return Err(ConfigError::InvalidScheme(
                "the degree must be at least 1".to_string(),
            ));
        }
        if self.threshold != self.degree + 1 {
            return Err(ConfigError::InvalidScheme(format!(
                "a degree {} polynomial needs a threshold of {}, got {}",
                self.degree,
                self.degree + 1,
                self.threshold
            )));
        }
        if self.num_peers < self.threshold {
            return Err(ConfigError::InvalidScheme(format!(
                "{} peers can not meet a threshold of {}",
                self.num_peers, self.threshold
            )));
        }
        Ok(())
    }

    /// IDs of the participants, starting at 1.
    pub fn peers(&self) -> RangeInclusive<PeerId> {
        1..=self.num_peers
    }
}

impl Default for SchemeConfig {
    fn default() -> Self {
        Self {
            degree: 2,
            num_peers: 5,
            threshold: 3,
        }
    }
}

/// Scheduling of the Beaver multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// One product at a time, triples drawn from a pool shipped up front.
    Naive,
    /// All products at once, triples requested from the dealer on demand.
    Batched,
}

/// Parameters shared by the dealer and the participants of a protocol run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub scheme: SchemeConfig,
    /// Bit width of the random polynomial coefficients.
    pub coefficient_bits: u64,
    /// Bit width of the random `a` and `b` values of a Beaver triple.
    pub triple_bits: u64,
    /// Number of triples precomputed by the dealer for the naive strategy.
    pub triple_pool_size: usize,
    /// Upper bound for every blocking receive, in milliseconds.
    pub recv_timeout_ms: u64,
    /// How many times a failed share delivery is retried.
    pub send_retries: usize,
    /// Multiplication strategies to run, in order.
    pub strategies: Vec<StrategyKind>,
    /// When set, only this participant reconstructs the dealer's secret.
    pub designated_reconstructor: Option<PeerId>,
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheme.validate()?;
        if self.triple_pool_size == 0 {
            return Err(ConfigError::InvalidProtocol(
                "the triple pool can not be empty".to_string(),
            ));
        }
        if self.strategies.is_empty() {
            return Err(ConfigError::InvalidProtocol(
                "at least one multiplication strategy is needed".to_string(),
            ));
        }
        if let Some(id) = self.designated_reconstructor {
            if !self.scheme.peers().contains(&id) {
                return Err(ConfigError::InvalidProtocol(format!(
                    "designated reconstructor {id} is not a participant"
                )));
            }
        }
        Ok(())
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            scheme: SchemeConfig::default(),
            coefficient_bits: 80,
            triple_bits: 20,
            triple_pool_size: 1 << 12,
            recv_timeout_ms: 10_000,
            send_retries: 2,
            strategies: vec![StrategyKind::Naive, StrategyKind::Batched],
            designated_reconstructor: None,
        }
    }
}

/// How the nodes of the network find each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Addressing {
    /// Every node runs on the local host and node `i` listens on `base + i`.
    Localhost {
        share_base_port: u16,
        bulk_base_port: u16,
    },
    /// Every node runs on its own host. Participant `i` is reachable as
    /// `<service_prefix>_<i>` and the dealer as `dealer_name`.
    Named {
        service_prefix: String,
        dealer_name: String,
        share_port: u16,
        bulk_port: u16,
    },
}

impl Default for Addressing {
    fn default() -> Self {
        Self::Localhost {
            share_base_port: 5000,
            bulk_base_port: 6000,
        }
    }
}

/// Network configuration of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub addressing: Addressing,
    /// Time to keep trying to connect to a peer that is not listening yet,
    /// and to wait for a peer expected to connect.
    pub connect_timeout_ms: u64,
    /// Time to sleep between connection trials and between polls of a
    /// listener.
    pub connect_retry_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addressing: Addressing::default(),
            connect_timeout_ms: 100_000,
            connect_retry_ms: 500,
        }
    }
}

impl NetworkConfig {
    pub fn named(service_prefix: &str, dealer_name: &str) -> Self {
        Self {
            addressing: Addressing::Named {
                service_prefix: service_prefix.to_string(),
                dealer_name: dealer_name.to_string(),
                share_port: 5760,
                bulk_port: 4874,
            },
            ..Self::default()
        }
    }

    /// Logical host name of a node.
    pub fn host_name(&self, node: PeerId) -> String {
        match &self.addressing {
            Addressing::Localhost { .. } => "127.0.0.1".to_string(),
            Addressing::Named {
                service_prefix,
                dealer_name,
                ..
            } => {
                if node == DEALER_ID {
                    dealer_name.clone()
                } else {
                    format!("{service_prefix}_{node}")
                }
            }
        }
    }

    /// Address to reach the share lane of a node.
    pub fn share_address(&self, node: PeerId) -> String {
        format!("{}:{}", self.host_name(node), self.share_port(node))
    }

    /// Address to reach the bulk lane of a node.
    pub fn bulk_address(&self, node: PeerId) -> String {
        format!("{}:{}", self.host_name(node), self.bulk_port(node))
    }

    /// Address a node binds its share listener to.
    pub fn share_bind_address(&self, node: PeerId) -> String {
        format!("{}:{}", self.bind_host(), self.share_port(node))
    }

    /// Address a node binds its bulk listener to.
    pub fn bulk_bind_address(&self, node: PeerId) -> String {
        format!("{}:{}", self.bind_host(), self.bulk_port(node))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    fn bind_host(&self) -> &'static str {
        match self.addressing {
            Addressing::Localhost { .. } => "127.0.0.1",
            Addressing::Named { .. } => "0.0.0.0",
        }
    }

    fn share_port(&self, node: PeerId) -> u16 {
        match &self.addressing {
            Addressing::Localhost {
                share_base_port, ..
            } => share_base_port + node as u16,
            Addressing::Named { share_port, .. } => *share_port,
        }
    }

    fn bulk_port(&self, node: PeerId) -> u16 {
        match &self.addressing {
            Addressing::Localhost { bulk_base_port, .. } => bulk_base_port + node as u16,
            Addressing::Named { bulk_port, .. } => *bulk_port,
        }
    }
}

/// Contents of the JSON configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub protocol: ProtocolConfig,
    pub network: NetworkConfig,
}

impl Config {
    /// Loads the configuration from a JSON file. Missing fields take their
    /// default values.
    pub fn new(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)?;
        config.protocol.validate()?;
        Ok(config)
    }
}
