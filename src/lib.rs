//! Minimal BitTorrent client core: a bencode codec, a validated view over
//! `.torrent` metadata, tracker selection, and a blocking single-piece
//! download over the peer wire protocol.

pub mod bencode;
pub mod config;
pub mod download;
pub mod error;
pub mod file;
pub mod message;
pub mod piece;
pub mod torrent_parser;
pub mod tracker;

pub use bencode::Value;
pub use config::SessionConfig;
pub use download::{download_piece, PeerSession, PieceTarget};
pub use error::{BencodeError, PeerError, TorrentError, TrackerError};
pub use torrent_parser::Torrent;
