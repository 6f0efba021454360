//! Strand CLI
//!
//! A small driver for the Strand network stack: generate an identity, run an echo
//! daemon, and ping peers directly or through a relay.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use strand_core::peer::TEMP_ADDR_TTL;
use strand_core::{Multiaddr, PeerId, Peerstore};
use strand_crypto::{KeyType, PrivateKey};
use strand_net::{Conn, Network, Notifiee, Stream, handler_fn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroize;

use config::Config;

/// Protocol served by `strand daemon`
const ECHO_PROTOCOL: &str = "/strand/echo";

/// Strand - peer-to-peer networking toolkit
#[derive(Parser)]
#[command(name = "strand")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity key
    Keygen {
        /// Output file for the private key (defaults to the configured key file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Listen for peers and echo every `/strand/echo` stream
    Daemon {
        /// Listen address (repeatable, overrides the configuration file)
        #[arg(short, long)]
        listen: Vec<Multiaddr>,
    },

    /// Echo a payload off a peer
    Ping {
        /// Address of the peer
        addr: Multiaddr,

        /// Peer id
        peer: PeerId,

        /// Payload to send
        #[arg(short, long, default_value = "beep boop")]
        message: String,

        /// Number of round trips
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },

    /// Echo a payload off a peer through a relay
    RelayPing {
        /// Address of the relay
        via_addr: Multiaddr,

        /// Peer id of the relay
        via_peer: PeerId,

        /// Peer id of the destination, connected to the relay
        dst_peer: PeerId,

        /// Payload to send
        #[arg(short, long, default_value = "beep boop")]
        message: String,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if cli.config.is_some() {
        Config::load(&config_path)?
    } else {
        Config::load_or_default(&config_path)?
    };
    config.validate()?;

    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .compact()
        .init();

    match cli.command {
        Commands::Keygen { output, force } => {
            let path = output.unwrap_or_else(|| config.node.key_file.clone());
            generate_key(&path, force)?;
        }
        Commands::Daemon { listen } => {
            run_daemon(listen, config).await?;
        }
        Commands::Ping {
            addr,
            peer,
            message,
            count,
        } => {
            ping(addr, peer, &message, count, config).await?;
        }
        Commands::RelayPing {
            via_addr,
            via_peer,
            dst_peer,
            message,
        } => {
            relay_ping(via_addr, via_peer, dst_peer, &message, config).await?;
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Identity
// ═══════════════════════════════════════════════════════════════════════════

/// Generate a key, write it hex-encoded to `path` and print the peer id.
fn generate_key(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", path.display());
    }
    let (key, _, id) = strand_core::peer::generate(KeyType::Ed25519);
    write_key(path, &key)?;

    println!("Peer ID: {id}");
    println!("Private key saved to: {}", path.display());
    Ok(())
}

fn write_key(path: &Path, key: &PrivateKey) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut bytes = key.to_bytes();
    let mut encoded = hex::encode(&bytes);
    bytes.zeroize();
    let written = std::fs::write(path, &encoded);
    encoded.zeroize();
    written.with_context(|| format!("writing {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn read_key(path: &Path) -> anyhow::Result<PrivateKey> {
    let mut encoded =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let decoded = hex::decode(encoded.trim());
    encoded.zeroize();
    let mut bytes = decoded.with_context(|| format!("decoding {}", path.display()))?;
    let key = PrivateKey::from_bytes(&bytes);
    bytes.zeroize();
    Ok(key?)
}

/// The configured identity, or a throwaway one when no key file exists.
fn load_identity(config: &Config) -> anyhow::Result<PrivateKey> {
    let path = &config.node.key_file;
    if path.exists() {
        return read_key(path);
    }
    tracing::warn!(path = %path.display(), "no key file, using an ephemeral identity");
    Ok(strand_core::peer::generate(KeyType::Ed25519).0)
}

// ═══════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════

/// Logs peers as they come and go.
struct PeerLogger;

impl Notifiee for PeerLogger {
    fn connected(&self, _net: &Network, conn: &Arc<dyn Conn>) {
        tracing::info!(
            peer = %conn.remote_peer(),
            addr = %conn.remote_multiaddr(),
            "peer connected"
        );
    }

    fn disconnected(&self, _net: &Network, conn: &Arc<dyn Conn>) {
        let stats = conn.stats();
        tracing::info!(
            peer = %conn.remote_peer(),
            read = stats.bytes_read,
            written = stats.bytes_written,
            "peer disconnected"
        );
    }
}

async fn run_daemon(listen: Vec<Multiaddr>, mut config: Config) -> anyhow::Result<()> {
    if !listen.is_empty() {
        config.network.listen_addrs = listen;
    }
    if config.network.listen_addrs.is_empty() {
        config.network.listen_addrs = vec!["/ip4/0.0.0.0/tcp/4001".parse()?];
    }

    let key = load_identity(&config)?;
    let net = Network::new(key, Arc::new(Peerstore::new()), config.network)
        .await
        .context("starting network")?;
    net.notify(Arc::new(PeerLogger));
    net.set_handler(
        ECHO_PROTOCOL,
        handler_fn(|mut s: Stream| async move {
            let peer = s.remote_peer().short();
            let mut buf = Vec::new();
            if let Err(e) = s.read_to_end(&mut buf).await {
                tracing::debug!(%peer, error = %e, "echo read failed");
                return;
            }
            let _ = s.write_all(&buf).await;
            let _ = s.shutdown().await;
            tracing::debug!(%peer, bytes = buf.len(), "echoed");
        }),
    )?;

    println!("Strand Daemon");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Peer ID: {}", net.local_peer());
    for addr in net.interface_listen_addresses()? {
        println!("Listening: {addr}");
    }
    println!("\nPress Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    net.close().await?;
    Ok(())
}

/// A dial-only network for the client commands.
async fn client(config: Config) -> anyhow::Result<Network> {
    let key = load_identity(&config)?;
    let mut network = config.network;
    network.listen_addrs.clear();
    Ok(Network::new(key, Arc::new(Peerstore::new()), network).await?)
}

/// Write `payload`, half-close and read back the echo.
async fn echo_round(stream: &mut Stream, payload: &[u8]) -> anyhow::Result<()> {
    stream.write_all(payload).await?;
    stream.shutdown().await?;
    let mut back = Vec::with_capacity(payload.len());
    stream.read_to_end(&mut back).await?;
    if back != payload {
        anyhow::bail!(
            "echo mismatch: sent {} bytes, got {} bytes back",
            payload.len(),
            back.len()
        );
    }
    Ok(())
}

async fn ping(
    addr: Multiaddr,
    peer: PeerId,
    message: &str,
    count: u32,
    config: Config,
) -> anyhow::Result<()> {
    let net = client(config).await?;
    net.peerstore().add_address(&peer, &addr, TEMP_ADDR_TTL);

    let result = async {
        for seq in 0..count {
            let start = Instant::now();
            let mut stream = net
                .new_stream(ECHO_PROTOCOL, &peer)
                .await
                .with_context(|| format!("opening stream to {peer}"))?;
            echo_round(&mut stream, message.as_bytes()).await?;
            println!(
                "{} bytes from {}: seq={} time={:.2?}",
                message.len(),
                peer.short(),
                seq,
                start.elapsed()
            );
        }
        anyhow::Ok(())
    }
    .await;

    net.close().await?;
    result
}

async fn relay_ping(
    via_addr: Multiaddr,
    via_peer: PeerId,
    dst_peer: PeerId,
    message: &str,
    config: Config,
) -> anyhow::Result<()> {
    let net = client(config).await?;
    net.peerstore().add_address(&via_peer, &via_addr, TEMP_ADDR_TTL);

    let result = async {
        let start = Instant::now();
        let mut stream = net
            .relay()
            .open_relayed(&via_peer, &dst_peer, ECHO_PROTOCOL)
            .await
            .with_context(|| format!("opening relayed stream via {via_peer}"))?;
        echo_round(&mut stream, message.as_bytes()).await?;
        println!(
            "{} bytes from {} via {}: time={:.2?}",
            message.len(),
            dst_peer.short(),
            via_peer.short(),
            start.elapsed()
        );
        anyhow::Ok(())
    }
    .await;

    net.close().await?;
    result
}
