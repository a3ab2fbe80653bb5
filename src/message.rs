use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;

use crate::error::PeerError;

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

pub const CHOKE: u8 = 0;
pub const UNCHOKE: u8 = 1;
pub const INTERESTED: u8 = 2;
pub const NOT_INTERESTED: u8 = 3;
pub const HAVE: u8 = 4;
pub const BITFIELD: u8 = 5;
pub const REQUEST: u8 = 6;
pub const PIECE: u8 = 7;

/// Client tag followed by uniformly random bytes. The RNG is a parameter so
/// tests can pin the id.
pub fn generate_peer_id<R: RngCore + ?Sized>(client_tag: &[u8; 8], rng: &mut R) -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[..8].copy_from_slice(client_tag);
    rng.fill_bytes(&mut peer_id[8..]);
    peer_id
}

pub fn build_handshake(info_hash: &[u8; 20], peer_id: &[u8; 20]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
    buf.put_u8(PROTOCOL.len() as u8);
    buf.put_slice(PROTOCOL);
    //reserved
    buf.put_u64(0);
    buf.put_slice(info_hash);
    buf.put_slice(peer_id);
    buf
}

pub fn build_interested() -> BytesMut {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u32(1);
    buf.put_u8(INTERESTED);
    buf
}

pub fn build_request(piece_index: u32, begin: u32, length: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(17);
    //length: 13
    buf.put_u32(13);
    buf.put_u8(REQUEST);
    buf.put_u32(piece_index);
    buf.put_u32(begin);
    buf.put_u32(length);
    buf
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Checks the protocol header; the reserved bytes are ignored.
    pub fn parse(buf: &[u8; HANDSHAKE_LEN]) -> Result<Handshake, PeerError> {
        let mut buf = &buf[..];
        if buf.get_u8() as usize != PROTOCOL.len() {
            return Err(PeerError::InvalidHandshake("protocol name length"));
        }
        if &buf[..PROTOCOL.len()] != PROTOCOL {
            return Err(PeerError::InvalidHandshake("protocol name"));
        }
        buf.advance(PROTOCOL.len() + 8);

        let mut handshake = Handshake {
            info_hash: [0; 20],
            peer_id: [0; 20],
        };
        buf.copy_to_slice(&mut handshake.info_hash);
        buf.copy_to_slice(&mut handshake.peer_id);
        Ok(handshake)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceMessage {
    pub piece_index: u32,
    pub block_begin: u32,
    pub block: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bytes),
    Request { piece_index: u32, begin: u32, length: u32 },
    Piece(PieceMessage),
    Other(u8),
}

impl Message {
    /// Parses a frame payload (the bytes after the length prefix).
    pub fn parse(mut payload: Bytes) -> Result<Message, PeerError> {
        if payload.is_empty() {
            return Ok(Message::KeepAlive);
        }
        let id = payload.get_u8();
        let malformed = |name: &str, len: usize| PeerError::UnexpectedMessage {
            state: "parsing",
            detail: format!("{} with {} byte payload", name, len),
        };

        let message = match id {
            CHOKE | UNCHOKE | INTERESTED | NOT_INTERESTED if payload.has_remaining() => {
                return Err(malformed("state message", payload.len()))
            }
            CHOKE => Message::Choke,
            UNCHOKE => Message::Unchoke,
            INTERESTED => Message::Interested,
            NOT_INTERESTED => Message::NotInterested,
            HAVE if payload.len() == 4 => Message::Have(payload.get_u32()),
            HAVE => return Err(malformed("have", payload.len())),
            BITFIELD => Message::Bitfield(payload),
            REQUEST if payload.len() == 12 => Message::Request {
                piece_index: payload.get_u32(),
                begin: payload.get_u32(),
                length: payload.get_u32(),
            },
            REQUEST => return Err(malformed("request", payload.len())),
            PIECE if payload.len() >= 8 => Message::Piece(PieceMessage {
                piece_index: payload.get_u32(),
                block_begin: payload.get_u32(),
                block: payload,
            }),
            PIECE => return Err(malformed("piece", payload.len())),
            other => Message::Other(other),
        };
        Ok(message)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "keep-alive",
            Message::Choke => "choke",
            Message::Unchoke => "unchoke",
            Message::Interested => "interested",
            Message::NotInterested => "not interested",
            Message::Have(_) => "have",
            Message::Bitfield(_) => "bitfield",
            Message::Request { .. } => "request",
            Message::Piece(_) => "piece",
            Message::Other(_) => "unknown",
        }
    }
}

/// Whether a bitfield payload advertises `piece_index` (high bit first).
pub fn has_piece(bitfield: &[u8], piece_index: u32) -> bool {
    let byte = (piece_index / 8) as usize;
    let bit = 7 - (piece_index % 8);
    bitfield.get(byte).map_or(false, |b| (b >> bit) & 1 == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn handshake_layout() {
        let info_hash = [0xaa; 20];
        let peer_id = [0xbb; 20];
        let buf = build_handshake(&info_hash, &peer_id);
        assert_eq!(buf.len(), HANDSHAKE_LEN);
        assert_eq!(buf[0], 19);
        assert_eq!(&buf[1..20], PROTOCOL);
        assert_eq!(&buf[20..28], &[0u8; 8]);
        assert_eq!(&buf[28..48], &info_hash);
        assert_eq!(&buf[48..68], &peer_id);

        let reply: [u8; HANDSHAKE_LEN] = buf[..].try_into().unwrap();
        assert_eq!(
            Handshake::parse(&reply).unwrap(),
            Handshake { info_hash, peer_id }
        );
    }

    #[test]
    fn rejects_bad_handshake_header() {
        let mut reply: [u8; HANDSHAKE_LEN] = build_handshake(&[1; 20], &[2; 20])[..]
            .try_into()
            .unwrap();
        reply[0] = 18;
        assert!(matches!(
            Handshake::parse(&reply),
            Err(PeerError::InvalidHandshake(_))
        ));

        reply[0] = 19;
        reply[5] = b'X';
        assert!(matches!(
            Handshake::parse(&reply),
            Err(PeerError::InvalidHandshake("protocol name"))
        ));
    }

    #[test]
    fn fixed_messages() {
        assert_eq!(&build_interested()[..], &[0, 0, 0, 1, 2]);
        assert_eq!(
            &build_request(1, 16384, 100)[..],
            &[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0, 100]
        );
    }

    #[test]
    fn parses_payloads() {
        assert_eq!(Message::parse(Bytes::new()).unwrap(), Message::KeepAlive);
        assert_eq!(
            Message::parse(Bytes::from_static(&[1])).unwrap(),
            Message::Unchoke
        );
        assert!(Message::parse(Bytes::from_static(&[1, 0])).is_err());
        assert_eq!(
            Message::parse(Bytes::from_static(&[5, 0b1010_0000])).unwrap(),
            Message::Bitfield(Bytes::from_static(&[0b1010_0000]))
        );
        assert_eq!(
            Message::parse(Bytes::from_static(&[7, 0, 0, 0, 2, 0, 0, 0x40, 0, 9, 8])).unwrap(),
            Message::Piece(PieceMessage {
                piece_index: 2,
                block_begin: 16384,
                block: Bytes::from_static(&[9, 8]),
            })
        );
        assert!(Message::parse(Bytes::from_static(&[7, 0, 0, 0, 2])).is_err());
        assert_eq!(
            Message::parse(Bytes::from_static(&[4, 0, 0, 1, 0])).unwrap(),
            Message::Have(256)
        );
        assert_eq!(
            Message::parse(Bytes::from_static(&[20, 1, 2])).unwrap(),
            Message::Other(20)
        );
    }

    #[test]
    fn bitfield_lookup() {
        let bitfield = [0b1000_0001, 0b0100_0000];
        assert!(has_piece(&bitfield, 0));
        assert!(!has_piece(&bitfield, 1));
        assert!(has_piece(&bitfield, 7));
        assert!(has_piece(&bitfield, 9));
        assert!(!has_piece(&bitfield, 16));
    }

    #[test]
    fn peer_id_is_seeded() {
        let a = generate_peer_id(b"-BP0001-", &mut StdRng::seed_from_u64(7));
        let b = generate_peer_id(b"-BP0001-", &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        assert_eq!(&a[..8], b"-BP0001-");
        assert_ne!(a, generate_peer_id(b"-BP0001-", &mut StdRng::seed_from_u64(8)));
    }
}
