use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use bitpiece::{
    bencode, download_piece,
    message::generate_peer_id,
    tracker::{self, AnnounceRequest},
    PeerSession, PieceTarget, SessionConfig, Torrent,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a bencoded value and print it
    Decode { value: String },
    /// Print tracker, length, info hash and piece hashes
    Info { torrent: PathBuf },
    /// Ask the tracker for peers
    Peers { torrent: PathBuf },
    /// Handshake with one peer and print its peer id
    Handshake { torrent: PathBuf, peer: SocketAddr },
    /// Download and verify a single piece
    #[command(name = "download_piece")]
    DownloadPiece {
        #[arg(short, long)]
        output: PathBuf,
        torrent: PathBuf,
        piece: u32,
        /// Peer to download from instead of the first one the tracker lists
        #[arg(long)]
        peer: Option<SocketAddr>,
    },
}

fn read_torrent(path: &Path) -> Result<Torrent> {
    Torrent::read(path).with_context(|| format!("reading torrent {}", path.display()))
}

fn first_peer(torrent: &Torrent, peer_id: [u8; 20]) -> Result<SocketAddr> {
    let url = torrent.announce_url()?;
    let request = AnnounceRequest::new(torrent.info_hash(), peer_id, torrent.size);
    let peers = tracker::announce(&url, &request).context("announcing to tracker")?;
    match peers.first() {
        Some(peer) => Ok(*peer),
        None => bail!("tracker {} returned no peers", url),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::default();
    let peer_id = generate_peer_id(&config.client_tag, &mut rand::thread_rng());

    match cli.command {
        Commands::Decode { value } => {
            let decoded = bencode::decode(value.as_bytes()).context("decoding bencoded value")?;
            println!("{}", decoded);
        }
        Commands::Info { torrent } => {
            let torrent = read_torrent(&torrent)?;
            println!("Tracker URL: {}", torrent.announce_url()?);
            println!("Length: {}", torrent.size);
            println!("Info Hash: {}", hex::encode(torrent.info_hash()));
            println!("Piece Length: {}", torrent.piece_len);
            println!("Piece Hashes:");
            for hash in torrent.piece_hashes() {
                println!("{}", hex::encode(hash));
            }
        }
        Commands::Peers { torrent } => {
            let torrent = read_torrent(&torrent)?;
            let url = torrent.announce_url()?;
            let request = AnnounceRequest::new(torrent.info_hash(), peer_id, torrent.size);
            for peer in tracker::announce(&url, &request).context("announcing to tracker")? {
                println!("{}", peer);
            }
        }
        Commands::Handshake { torrent, peer } => {
            let torrent = read_torrent(&torrent)?;
            let mut session = PeerSession::connect(peer, torrent.info_hash(), peer_id, config)?;
            let handshake = session.handshake().context("handshaking with peer")?;
            println!("Peer ID: {}", hex::encode(handshake.peer_id));
        }
        Commands::DownloadPiece {
            output,
            torrent,
            piece,
            peer,
        } => {
            let torrent = read_torrent(&torrent)?;
            let target = PieceTarget::from_torrent(&torrent, piece)?;
            let peer = match peer {
                Some(peer) => peer,
                None => first_peer(&torrent, peer_id)?,
            };
            download_piece(peer, torrent.info_hash(), peer_id, &target, &output, config)
                .with_context(|| format!("downloading piece {} from {}", piece, peer))?;
            println!("Piece {} downloaded to {}.", piece, output.display());
        }
    }

    Ok(())
}
