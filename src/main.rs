mod config;
mod demo;
mod math;
mod mpc;
mod net;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{Config, NetworkConfig, SchemeConfig, StrategyKind};
use mpc::{dealer::Dealer, participant::Participant};
use net::{Network, PeerId, DEALER_ID};
use num_bigint::BigInt;

/// Node of a threshold secret-sharing network running the sharing, summation
/// and Beaver multiplication protocols.
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Multiplication strategy to run. May be repeated; overrides the
    /// strategies of the configuration file.
    #[arg(short, long, value_enum, global = true)]
    strategy: Vec<StrategyKind>,
    /// Degree of the sharing polynomials. Overrides the configuration file.
    #[arg(long, global = true)]
    degree: Option<usize>,
    /// Number of participants. Overrides the configuration file.
    #[arg(long, global = true)]
    peers: Option<usize>,
    /// Reach participant `i` at the host `<PREFIX>_<i>` instead of the local
    /// host.
    #[arg(long, value_name = "PREFIX", global = true)]
    named: Option<String>,
    /// Host name of the dealer when `--named` is given.
    #[arg(long, default_value = "dealer", global = true)]
    dealer_name: String,
    /// Log every share and protocol step.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Runs the trusted dealer.
    Dealer {
        /// The secret to share.
        #[arg(long, default_value_t = BigInt::from(demo::DEFAULT_SECRET))]
        secret: BigInt,
    },
    /// Runs a participant.
    Peer {
        /// ID of the participant, starting at 1.
        #[arg(short, long)]
        id: PeerId,
        /// The private value of the participant.
        #[arg(long)]
        input: Option<BigInt>,
    },
    /// Runs the dealer and every participant in this process.
    Simulate {
        #[arg(long, default_value_t = BigInt::from(demo::DEFAULT_SECRET))]
        secret: BigInt,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut config = match &args.config {
        Some(path) => Config::new(path)
            .with_context(|| format!("loading the configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if !args.strategy.is_empty() {
        config.protocol.strategies = args.strategy.clone();
    }
    if args.degree.is_some() || args.peers.is_some() {
        let degree = args.degree.unwrap_or(config.protocol.scheme.degree);
        let num_peers = args.peers.unwrap_or(config.protocol.scheme.num_peers);
        config.protocol.scheme = SchemeConfig::new(degree, num_peers, degree + 1)?;
    }
    if let Some(prefix) = &args.named {
        config.network = NetworkConfig {
            connect_timeout_ms: config.network.connect_timeout_ms,
            connect_retry_ms: config.network.connect_retry_ms,
            ..NetworkConfig::named(prefix, &args.dealer_name)
        };
    }
    config.protocol.validate()?;

    let num_peers = config.protocol.scheme.num_peers;
    let recv_timeout = config.protocol.recv_timeout();

    match args.role {
        Role::Dealer { secret } => {
            let network = Network::create(DEALER_ID, num_peers, &config.network, recv_timeout)?;
            let dealer = Dealer::new(config.protocol, network)?;
            demo::run_dealer(dealer, &secret)?;
        }
        Role::Peer { id, input } => {
            if !config.protocol.scheme.peers().contains(&id) {
                anyhow::bail!("participant IDs go from 1 to {num_peers}, got {id}");
            }
            let network = Network::create(id, num_peers, &config.network, recv_timeout)?;
            let participant = Participant::new(config.protocol, network)?;
            let input = input.unwrap_or_else(|| demo::default_private_value(id));
            let report = demo::run_peer(participant, &input)?;
            log::info!("{report}");
        }
        Role::Simulate { secret } => {
            for report in demo::simulate(config.protocol, secret)? {
                log::info!("{report}");
            }
        }
    }

    Ok(())
}
