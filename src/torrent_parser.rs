use std::{fs, path::Path};

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::{
    bencode::{self, Value},
    error::{TorrentError, TrackerError},
    tracker,
};

pub const HASH_LEN: usize = 20;

/// Validated, read-only view over a decoded `.torrent` file.
#[derive(Debug, Clone)]
pub struct Torrent {
    pub size: u64,
    pub piece_len: u32,
    pub name: Option<String>,
    pub hashes: Vec<[u8; HASH_LEN]>,
    pub torrent: Value,
    info_hash: [u8; HASH_LEN],
}

/// The `info` fields every single-piece download needs.
struct InfoFields<'a> {
    size: u64,
    piece_len: u32,
    pieces: &'a Bytes,
    name: Option<&'a str>,
}

impl<'a> InfoFields<'a> {
    fn extract(info: &'a Value) -> Result<Self, TorrentError> {
        let dict = info.as_dict().ok_or(TorrentError::InvalidField("info"))?;

        let piece_len = dict
            .get(&b"piece length"[..])
            .ok_or(TorrentError::MissingField("piece length"))?
            .as_integer()
            .filter(|&len| len > 0)
            .and_then(|len| u32::try_from(len).ok())
            .ok_or(TorrentError::InvalidField("piece length"))?;

        let pieces = dict
            .get(&b"pieces"[..])
            .ok_or(TorrentError::MissingField("pieces"))?
            .as_bytes()
            .filter(|pieces| pieces.len() % HASH_LEN == 0)
            .ok_or(TorrentError::InvalidField("pieces"))?;

        let size = match (dict.get(&b"length"[..]), dict.get(&b"files"[..])) {
            (Some(length), _) => non_negative(length, "length")?,
            (None, Some(files)) => files_size(files)?,
            (None, None) => return Err(TorrentError::MissingField("length")),
        };

        let name = dict.get(&b"name"[..]).and_then(Value::as_str);

        Ok(InfoFields {
            size,
            piece_len,
            pieces,
            name,
        })
    }
}

fn non_negative(value: &Value, field: &'static str) -> Result<u64, TorrentError> {
    value
        .as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or(TorrentError::InvalidField(field))
}

fn files_size(files: &Value) -> Result<u64, TorrentError> {
    let files = files.as_list().ok_or(TorrentError::InvalidField("files"))?;
    files.iter().try_fold(0u64, |total, file| {
        let length = file
            .get(b"length")
            .ok_or(TorrentError::MissingField("files.length"))?;
        let length = non_negative(length, "files.length")?;
        total
            .checked_add(length)
            .ok_or(TorrentError::InvalidField("files.length"))
    })
}

fn info_dict(torrent: &Value) -> Result<&Value, TorrentError> {
    let root = torrent.as_dict().ok_or(TorrentError::InvalidField("root"))?;
    root.get(&b"info"[..])
        .ok_or(TorrentError::MissingField("info"))
}

fn hash_info(info: &Value) -> [u8; HASH_LEN] {
    Sha1::digest(bencode::encode(info)).into()
}

/// SHA-1 of the canonical encoding of the `info` dictionary.
pub fn compute_info_hash(torrent: &Value) -> Result<[u8; HASH_LEN], TorrentError> {
    let info = info_dict(torrent)?;
    InfoFields::extract(info)?;
    Ok(hash_info(info))
}

impl Torrent {
    pub fn new(torrent: Value) -> Result<Torrent, TorrentError> {
        let info = info_dict(&torrent)?;
        let fields = InfoFields::extract(info)?;
        let info_hash = hash_info(info);

        let hashes = fields
            .pieces
            .chunks_exact(HASH_LEN)
            .map(|chunk| {
                let mut hash = [0u8; HASH_LEN];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let torrent = Torrent {
            size: fields.size,
            piece_len: fields.piece_len,
            name: fields.name.map(str::to_owned),
            hashes,
            info_hash,
            torrent,
        };
        debug!(
            size = torrent.size,
            piece_len = torrent.piece_len,
            pieces = torrent.hashes.len(),
            info_hash = %hex::encode(torrent.info_hash),
            "parsed torrent metadata"
        );
        Ok(torrent)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Torrent, TorrentError> {
        Torrent::new(bencode::decode(bytes)?)
    }

    /// Reads the whole file into memory before decoding.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Torrent, TorrentError> {
        Torrent::from_bytes(&fs::read(path)?)
    }

    pub fn info_hash(&self) -> [u8; HASH_LEN] {
        self.info_hash
    }

    pub fn piece_hashes(&self) -> &[[u8; HASH_LEN]] {
        &self.hashes
    }

    pub fn piece_hash(&self, piece_index: u32) -> Option<&[u8; HASH_LEN]> {
        self.hashes.get(piece_index as usize)
    }

    pub fn num_pieces(&self) -> usize {
        self.hashes.len()
    }

    /// Length of piece `piece_index`; only the last piece may be shorter
    /// than `piece_len`. A hash listed past the end of the content has no
    /// bytes to cover and yields `None`.
    pub fn piece_len(&self, piece_index: u32) -> Option<u32> {
        if piece_index as usize >= self.num_pieces() {
            return None;
        }
        let start = piece_index as u64 * self.piece_len as u64;
        let remaining = self.size.saturating_sub(start);
        match remaining.min(self.piece_len as u64) {
            0 => None,
            len => Some(len as u32),
        }
    }

    pub fn announce_url(&self) -> Result<String, TrackerError> {
        tracker::select_announce_url(&self.torrent)
    }
}
