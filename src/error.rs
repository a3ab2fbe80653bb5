use std::{io, net::SocketAddr, path::PathBuf};
use thiserror::Error;

/// Failures while decoding bencode. Every variant carries the byte offset
/// at which decoding stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input at byte {position}")]
    UnexpectedEnd { position: usize },
    #[error("malformed byte string length at byte {position}")]
    MalformedLength { position: usize },
    #[error("byte string at {position} needs {needed} bytes, {available} available")]
    TruncatedString {
        position: usize,
        needed: usize,
        available: usize,
    },
    #[error("integer starting at byte {position} has no terminating 'e'")]
    UnterminatedInteger { position: usize },
    #[error("invalid integer at byte {position}")]
    InvalidInteger { position: usize },
    #[error("list starting at byte {position} has no terminating 'e'")]
    UnterminatedList { position: usize },
    #[error("dictionary starting at byte {position} has no terminating 'e'")]
    UnterminatedDictionary { position: usize },
    #[error("dictionary key before byte {position} has no value")]
    MissingDictionaryValue { position: usize },
    #[error("dictionary key at byte {position} is not a byte string")]
    NonStringDictionaryKey { position: usize },
    #[error("invalid leading byte 0x{byte:02x} at byte {position}")]
    InvalidLeadingByte { byte: u8, position: usize },
    #[error("trailing data after value at byte {position}")]
    TrailingData { position: usize },
    #[error("nesting too deep at byte {position}")]
    NestingTooDeep { position: usize },
}

#[derive(Error, Debug)]
pub enum TorrentError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("invalid bencode: {0}")]
    Bencode(#[from] BencodeError),
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("invalid field {0}")]
    InvalidField(&'static str),
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("no http(s) tracker found in announce-list or announce")]
    NoTrackerFound,
    #[error("invalid announce url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("tracker responded with status {0}")]
    Status(u16),
    #[error("tracker responded with error: {0}")]
    Failure(String),
    #[error("response contains invalid bencode: {0}")]
    Bencode(#[from] BencodeError),
    #[error("response missing field {0}")]
    MissingField(&'static str),
    #[error("compact peer list length {0} is not a multiple of 6")]
    InvalidPeers(usize),
}

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("could not connect to {addr}: {source}")]
    ConnectionFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("timed out connecting to {0}")]
    ConnectionTimeout(SocketAddr),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("peer did not respond in time")]
    Timeout,
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("invalid handshake: {0}")]
    InvalidHandshake(&'static str),
    #[error("peer answered for a different info hash")]
    InfoHashMismatch,
    #[error("unexpected message while {state}: {detail}")]
    UnexpectedMessage { state: &'static str, detail: String },
    #[error("message of {0} bytes exceeds the frame limit")]
    MessageTooLarge(usize),
    #[error("unexpected block: wanted piece {piece_index} offset {begin}, got piece {got_index} offset {got_begin} ({len} bytes)")]
    UnexpectedBlock {
        piece_index: u32,
        begin: u32,
        got_index: u32,
        got_begin: u32,
        len: usize,
    },
    #[error("piece {index} out of range, torrent has {count} pieces")]
    PieceOutOfRange { index: u32, count: usize },
    #[error("piece {0} failed hash verification")]
    HashMismatch(u32),
    #[error("could not write piece to {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
