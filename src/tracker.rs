use std::{
    fmt::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str,
    time::Duration,
};

use tracing::{debug, info};
use url::Url;

use crate::{
    bencode::{self, Value},
    error::TrackerError,
};

const HTTP_SCHEMES: [&[u8]; 2] = [b"http://", b"https://"];
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);

fn is_http(url: &[u8]) -> bool {
    HTTP_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

fn http_url(value: &Value) -> Option<String> {
    value
        .as_bytes()
        .filter(|url| is_http(url))
        .and_then(|url| str::from_utf8(url).ok())
        .map(str::to_owned)
}

/// Picks the first http(s) tracker, scanning `announce-list` tiers in
/// order before falling back to `announce`. A malformed `announce-list` is
/// skipped rather than treated as an error.
pub fn select_announce_url(torrent: &Value) -> Result<String, TrackerError> {
    let from_list = torrent
        .get(b"announce-list")
        .and_then(Value::as_list)
        .into_iter()
        .flatten()
        .filter_map(Value::as_list)
        .flatten()
        .find_map(http_url);

    from_list
        .or_else(|| torrent.get(b"announce").and_then(http_url))
        .ok_or(TrackerError::NoTrackerFound)
}

/// Escapes every byte as `%xx`, which is what trackers expect for the raw
/// 20-byte info hash and peer id.
pub fn urlencode_bytes(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 3), |mut out, b| {
        let _ = write!(out, "%{:02x}", b);
        out
    })
}

pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

impl AnnounceRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], left: u64) -> Self {
        AnnounceRequest {
            info_hash,
            peer_id,
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left,
        }
    }

    pub fn query(&self) -> String {
        format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            urlencode_bytes(&self.info_hash),
            urlencode_bytes(&self.peer_id),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
        )
    }

    /// Appends the announce parameters to `announce_url`, keeping any query
    /// the tracker URL already carries.
    pub fn url(&self, announce_url: &str) -> Result<Url, TrackerError> {
        let mut url = Url::parse(announce_url)?;
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, self.query()),
            _ => self.query(),
        };
        url.set_query(Some(&query));
        Ok(url)
    }
}

/// Performs the HTTP announce and returns the peers the tracker lists.
pub fn announce(
    announce_url: &str,
    request: &AnnounceRequest,
) -> Result<Vec<SocketAddr>, TrackerError> {
    let url = request.url(announce_url)?;
    info!(tracker = %announce_url, "announcing");

    let response = reqwest::blocking::Client::builder()
        .timeout(ANNOUNCE_TIMEOUT)
        .build()?
        .get(url)
        .send()?;
    if !response.status().is_success() {
        return Err(TrackerError::Status(response.status().as_u16()));
    }

    let body = response.bytes()?;
    parse_announce_response(&body)
}

pub fn parse_announce_response(body: &[u8]) -> Result<Vec<SocketAddr>, TrackerError> {
    let response = bencode::decode(body)?;
    if response.as_dict().is_none() {
        return Err(TrackerError::MissingField("root"));
    }

    if let Some(reason) = response.get(b"failure reason").and_then(Value::as_bytes) {
        return Err(TrackerError::Failure(
            String::from_utf8_lossy(reason).into_owned(),
        ));
    }

    if let Some(interval) = response.get(b"interval").and_then(Value::as_integer) {
        debug!(interval, "tracker re-announce interval");
    }

    match response.get(b"peers") {
        Some(Value::ByteString(compact)) => parse_compact_peers(compact),
        Some(Value::List(peers)) => Ok(peers.iter().filter_map(parse_peer_dict).collect()),
        _ => Err(TrackerError::MissingField("peers")),
    }
}

fn parse_compact_peers(compact: &[u8]) -> Result<Vec<SocketAddr>, TrackerError> {
    if compact.len() % 6 != 0 {
        return Err(TrackerError::InvalidPeers(compact.len()));
    }
    Ok(compact
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect())
}

fn parse_peer_dict(peer: &Value) -> Option<SocketAddr> {
    let ip = peer.get(b"ip")?.as_str()?.parse::<IpAddr>().ok()?;
    let port = u16::try_from(peer.get(b"port")?.as_integer()?).ok()?;
    Some(SocketAddr::new(ip, port))
}
