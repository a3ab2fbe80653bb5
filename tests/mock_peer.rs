//! Blocking mock peer for exercising a full single-piece session over
//! loopback TCP.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bitpiece::message::PROTOCOL;

/// How the mock deviates from a well-behaved seeder.
#[derive(Clone)]
pub struct MockPeerConfig {
    pub data: Vec<u8>,
    pub piece_len: u32,
    /// Info hash echoed in the handshake reply.
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    /// First byte of the handshake reply.
    pub protocol_len: u8,
    pub send_bitfield: bool,
    /// Flip one bit in the first block served.
    pub corrupt: bool,
    /// Added to the offset echoed in piece messages.
    pub offset_skew: u32,
    /// Frame sent in reply to interested.
    pub after_interested: Vec<u8>,
    /// Send nothing after the handshake and wait for the client to leave.
    pub silent_after_handshake: bool,
    /// Close the connection right after the handshake.
    pub hangup_after_handshake: bool,
}

impl MockPeerConfig {
    pub fn new(info_hash: [u8; 20], data: Vec<u8>, piece_len: u32) -> Self {
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(b"-MO0001-");
        Self {
            data,
            piece_len,
            info_hash,
            peer_id,
            protocol_len: 19,
            send_bitfield: true,
            corrupt: false,
            offset_skew: 0,
            after_interested: frame(&[1]),
            silent_after_handshake: false,
            hangup_after_handshake: false,
        }
    }
}

/// What the mock saw from the client.
#[derive(Debug, Default)]
pub struct Received {
    pub handshake: Vec<u8>,
    pub interested: Vec<u8>,
    pub requests: Vec<(u32, u32, u32)>,
    /// The client closed the connection (read returned EOF).
    pub saw_eof: bool,
}

pub struct MockPeer {
    pub addr: SocketAddr,
    handle: JoinHandle<Received>,
}

impl MockPeer {
    pub fn spawn(config: MockPeerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            serve(&mut stream, &config)
        });
        MockPeer { addr, handle }
    }

    pub fn join(self) -> Received {
        self.handle.join().unwrap()
    }
}

pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = (payload.len() as u32).to_be_bytes().to_vec();
    buf.extend_from_slice(payload);
    buf
}

fn wait_for_eof(stream: &mut TcpStream, received: &mut Received) {
    let mut rest = Vec::new();
    received.saw_eof = stream.read_to_end(&mut rest).is_ok();
}

fn serve(stream: &mut TcpStream, config: &MockPeerConfig) -> Received {
    let mut received = Received::default();

    let mut handshake = [0u8; 68];
    if stream.read_exact(&mut handshake).is_err() {
        return received;
    }
    received.handshake = handshake.to_vec();

    let mut reply = vec![config.protocol_len];
    reply.extend_from_slice(PROTOCOL);
    reply.extend_from_slice(&[0u8; 8]);
    reply.extend_from_slice(&config.info_hash);
    reply.extend_from_slice(&config.peer_id);
    stream.write_all(&reply).unwrap();

    if config.hangup_after_handshake {
        return received;
    }
    if config.silent_after_handshake {
        wait_for_eof(stream, &mut received);
        return received;
    }

    if !config.send_bitfield {
        // unchoke where a bitfield belongs
        let _ = stream.write_all(&frame(&[1]));
        wait_for_eof(stream, &mut received);
        return received;
    }
    if config.protocol_len != 19 {
        wait_for_eof(stream, &mut received);
        return received;
    }

    let _ = stream.write_all(&frame(&[5, 0xff, 0xff]));

    let mut interested = [0u8; 5];
    if stream.read_exact(&mut interested).is_err() {
        received.saw_eof = true;
        return received;
    }
    received.interested = interested.to_vec();
    let _ = stream.write_all(&config.after_interested);

    let mut first_block = true;
    loop {
        let mut request = [0u8; 17];
        if stream.read_exact(&mut request).is_err() {
            received.saw_eof = true;
            return received;
        }
        let field = |at: usize| u32::from_be_bytes(request[at..at + 4].try_into().unwrap());
        let (index, begin, length) = (field(5), field(9), field(13));
        received.requests.push((index, begin, length));

        let start = index as usize * config.piece_len as usize + begin as usize;
        let mut block = config.data[start..start + length as usize].to_vec();
        if config.corrupt && first_block {
            block[0] ^= 0x01;
        }
        first_block = false;

        let mut payload = vec![7];
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&(begin + config.offset_skew).to_be_bytes());
        payload.extend_from_slice(&block);
        if stream.write_all(&frame(&payload)).is_err() {
            return received;
        }
    }
}
