//! Peer session configuration.

use std::time::Duration;

/// Bytes requested per `request` message; the last block of a piece may be
/// shorter.
pub const BLOCK_SIZE: u32 = 16384;

/// Settings for one single-piece peer session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on TCP connection establishment.
    pub connect_timeout: Duration,

    /// Bound on every individual send/receive once connected.
    pub io_timeout: Duration,

    pub block_size: u32,

    /// Reject a handshake whose info hash differs from ours. Off by default:
    /// the peer's hash is read but not compared.
    pub verify_info_hash: bool,

    /// Eight-byte prefix of the generated peer id.
    pub client_tag: [u8; 8],
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(10),
            block_size: BLOCK_SIZE,
            verify_info_hash: false,
            client_tag: *b"-BP0001-",
        }
    }
}

impl SessionConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_verify_info_hash(mut self, verify: bool) -> Self {
        self.verify_info_hash = verify;
        self
    }
}
