//! Single-piece download from one peer over the peer wire protocol.
//!
//! A [`PeerSession`] owns its `TcpStream` for exactly one piece fetch. The
//! exchange is strictly sequential:
//!
//! ```text
//! Connecting -> HandshakeSent -> HandshakeVerified -> AwaitingBitfield
//!   -> Interested -> AwaitingUnchoke -> Unchoked -> RequestingBlocks
//!   -> PieceAssembled -> HashVerified
//! ```
//!
//! Every I/O call is blocking and bounded by the configured timeouts. Any
//! failure is terminal for the session; dropping the session shuts the
//! socket down and closes it.

use std::{
    fmt,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    path::Path,
};

use bytes::{Buf, Bytes};
use tracing::{debug, info, warn};

use crate::{
    config::SessionConfig,
    error::PeerError,
    file,
    message::{
        build_handshake, build_interested, build_request, has_piece, Handshake, Message,
        HANDSHAKE_LEN,
    },
    piece::Piece,
    torrent_parser::Torrent,
};

/// Largest frame accepted from a peer; enough for any block or bitfield.
pub const MAX_MESSAGE_LEN: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    HandshakeSent,
    HandshakeVerified,
    AwaitingBitfield,
    Interested,
    AwaitingUnchoke,
    Unchoked,
    RequestingBlocks,
    PieceAssembled,
    HashVerified,
}

impl State {
    fn as_str(self) -> &'static str {
        match self {
            State::Connecting => "connecting",
            State::HandshakeSent => "handshake sent",
            State::HandshakeVerified => "handshake verified",
            State::AwaitingBitfield => "awaiting bitfield",
            State::Interested => "interested",
            State::AwaitingUnchoke => "awaiting unchoke",
            State::Unchoked => "unchoked",
            State::RequestingBlocks => "requesting blocks",
            State::PieceAssembled => "piece assembled",
            State::HashVerified => "hash verified",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The piece to fetch and the digest it must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceTarget {
    pub piece_index: u32,
    pub length: u32,
    pub hash: [u8; 20],
}

impl PieceTarget {
    pub fn from_torrent(torrent: &Torrent, piece_index: u32) -> Result<Self, PeerError> {
        match (torrent.piece_len(piece_index), torrent.piece_hash(piece_index)) {
            (Some(length), Some(hash)) => Ok(PieceTarget {
                piece_index,
                length,
                hash: *hash,
            }),
            _ => Err(PeerError::PieceOutOfRange {
                index: piece_index,
                count: torrent.num_pieces(),
            }),
        }
    }
}

fn map_io(err: io::Error) -> PeerError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::WriteZero
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => PeerError::ConnectionClosed,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => PeerError::Timeout,
        _ => PeerError::Io(err),
    }
}

fn map_connect(addr: SocketAddr, err: io::Error) -> PeerError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => PeerError::ConnectionTimeout(addr),
        _ => PeerError::ConnectionFailed { addr, source: err },
    }
}

/// Fills `buf` completely. Running out of input before that is
/// `ConnectionClosed`; a socket timeout is `Timeout`.
pub fn read_exact<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<(), PeerError> {
    reader.read_exact(buf).map_err(map_io)
}

/// Reads one `[u32 big-endian length][payload]` frame and returns the payload.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Bytes, PeerError> {
    let mut prefix = [0u8; 4];
    read_exact(reader, &mut prefix)?;
    let len = (&prefix[..]).get_u32() as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(PeerError::MessageTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    read_exact(reader, &mut payload)?;
    Ok(Bytes::from(payload))
}

pub struct PeerSession {
    stream: TcpStream,
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    config: SessionConfig,
    state: State,
}

impl PeerSession {
    /// Opens the TCP connection (bounded by `connect_timeout`) and applies
    /// `io_timeout` to every later read and write.
    pub fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        config: SessionConfig,
    ) -> Result<PeerSession, PeerError> {
        debug!(peer = %addr, state = %State::Connecting, "opening connection");
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout)
            .map_err(|e| map_connect(addr, e))?;
        stream.set_read_timeout(Some(config.io_timeout))?;
        stream.set_write_timeout(Some(config.io_timeout))?;

        info!(peer = %addr, "connected to peer");
        Ok(PeerSession {
            stream,
            addr,
            info_hash,
            peer_id,
            config,
            state: State::Connecting,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    fn transition(&mut self, next: State) {
        debug!(peer = %self.addr, from = %self.state, to = %next, "session state");
        self.state = next;
    }

    fn send(&mut self, buf: &[u8]) -> Result<(), PeerError> {
        self.stream.write_all(buf).map_err(map_io)
    }

    fn unexpected(&self, detail: String) -> PeerError {
        PeerError::UnexpectedMessage {
            state: self.state.as_str(),
            detail,
        }
    }

    /// Exchanges the 68-byte handshake. The protocol header of the reply
    /// must match; its info hash is only compared when
    /// `verify_info_hash` is set.
    pub fn handshake(&mut self) -> Result<Handshake, PeerError> {
        self.send(&build_handshake(&self.info_hash, &self.peer_id))?;
        self.transition(State::HandshakeSent);

        let mut reply = [0u8; HANDSHAKE_LEN];
        read_exact(&mut self.stream, &mut reply)?;
        let handshake = Handshake::parse(&reply)?;

        if handshake.info_hash != self.info_hash {
            if self.config.verify_info_hash {
                return Err(PeerError::InfoHashMismatch);
            }
            debug!(peer = %self.addr, "peer handshake carries a different info hash");
        }

        self.transition(State::HandshakeVerified);
        info!(peer = %self.addr, peer_id = %hex::encode(handshake.peer_id), "handshake complete");
        Ok(handshake)
    }

    /// The first message after the handshake must be a bitfield. Its
    /// contents do not gate the request; a peer missing the piece is only
    /// logged.
    fn await_bitfield(&mut self, piece_index: u32) -> Result<(), PeerError> {
        self.transition(State::AwaitingBitfield);
        let payload = read_frame(&mut self.stream)?;
        match Message::parse(payload)? {
            Message::Bitfield(bitfield) => {
                if !has_piece(&bitfield, piece_index) {
                    warn!(peer = %self.addr, piece_index, "bitfield does not advertise the piece");
                }
                Ok(())
            }
            other => Err(self.unexpected(format!("expected bitfield, got {}", other.name()))),
        }
    }

    fn send_interested(&mut self) -> Result<(), PeerError> {
        self.send(&build_interested())?;
        self.transition(State::Interested);
        Ok(())
    }

    fn await_unchoke(&mut self) -> Result<(), PeerError> {
        self.transition(State::AwaitingUnchoke);
        let payload = read_frame(&mut self.stream)?;
        match Message::parse(payload)? {
            Message::Unchoke => {
                self.transition(State::Unchoked);
                Ok(())
            }
            other => Err(self.unexpected(format!("expected unchoke, got {}", other.name()))),
        }
    }

    /// Requests the piece one block at a time, waiting for each block
    /// before asking for the next.
    fn request_blocks(&mut self, target: &PieceTarget) -> Result<Piece, PeerError> {
        self.transition(State::RequestingBlocks);
        let mut piece = Piece::new(target.piece_index, target.length);

        while let Some(request) = piece.next_request(self.config.block_size) {
            self.send(&build_request(target.piece_index, request.begin, request.length))?;

            let payload = read_frame(&mut self.stream)?;
            match Message::parse(payload)? {
                Message::Piece(block) => piece.add_block(&block)?,
                other => {
                    return Err(self.unexpected(format!("expected piece, got {}", other.name())))
                }
            }
        }

        self.transition(State::PieceAssembled);
        Ok(piece)
    }

    /// Runs everything after the handshake and returns the verified piece.
    pub fn fetch_piece(&mut self, target: &PieceTarget) -> Result<Vec<u8>, PeerError> {
        self.await_bitfield(target.piece_index)?;
        self.send_interested()?;
        self.await_unchoke()?;
        let piece = self.request_blocks(target)?;

        if !piece.verify(&target.hash) {
            return Err(PeerError::HashMismatch(target.piece_index));
        }
        self.transition(State::HashVerified);
        info!(peer = %self.addr, piece_index = target.piece_index, bytes = piece.len(), "piece verified");
        Ok(piece.into_data())
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        debug!(peer = %self.addr, state = %self.state, "closing connection");
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Connects to `addr`, downloads and verifies one piece, and writes it to
/// `output`. Nothing is written unless the hash matches.
pub fn download_piece(
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    target: &PieceTarget,
    output: &Path,
    config: SessionConfig,
) -> Result<(), PeerError> {
    let mut session = PeerSession::connect(addr, info_hash, peer_id, config)?;
    session.handshake()?;
    let data = session.fetch_piece(target)?;
    drop(session);

    file::write_piece(output, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_frames() {
        let mut wire = Cursor::new(vec![0, 0, 0, 2, 5, 0xff, 0, 0, 0, 0]);
        assert_eq!(read_frame(&mut wire).unwrap(), Bytes::from_static(&[5, 0xff]));
        assert_eq!(read_frame(&mut wire).unwrap(), Bytes::new());
        assert!(matches!(read_frame(&mut wire), Err(PeerError::ConnectionClosed)));
    }

    #[test]
    fn short_payload_is_connection_closed() {
        let mut wire = Cursor::new(vec![0, 0, 0, 9, 7, 0, 0]);
        assert!(matches!(read_frame(&mut wire), Err(PeerError::ConnectionClosed)));

        let mut prefix_only = Cursor::new(vec![0, 0]);
        assert!(matches!(
            read_frame(&mut prefix_only),
            Err(PeerError::ConnectionClosed)
        ));
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut wire = Cursor::new(vec![0x7f, 0xff, 0xff, 0xff]);
        assert!(matches!(
            read_frame(&mut wire),
            Err(PeerError::MessageTooLarge(0x7fff_ffff))
        ));
    }

    #[test]
    fn timeouts_are_distinct_from_closes() {
        assert!(matches!(
            map_io(io::Error::from(io::ErrorKind::WouldBlock)),
            PeerError::Timeout
        ));
        assert!(matches!(
            map_io(io::Error::from(io::ErrorKind::ConnectionReset)),
            PeerError::ConnectionClosed
        ));
    }

    #[test]
    fn connect_timeouts_are_distinct_from_failures() {
        let addr: SocketAddr = "192.0.2.1:6881".parse().unwrap();
        assert!(matches!(
            map_connect(addr, io::Error::from(io::ErrorKind::TimedOut)),
            PeerError::ConnectionTimeout(a) if a == addr
        ));
        assert!(matches!(
            map_connect(addr, io::Error::from(io::ErrorKind::ConnectionRefused)),
            PeerError::ConnectionFailed { addr: a, .. } if a == addr
        ));
    }
}
