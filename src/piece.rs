use sha1::{Digest, Sha1};

use crate::{error::PeerError, message::PieceMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub begin: u32,
    pub length: u32,
}

/// Buffer for one piece, filled front to back as blocks arrive.
pub struct Piece {
    pub piece_index: u32,
    data: Vec<u8>,
    completed: usize,
}

impl Piece {
    pub fn new(piece_index: u32, length: u32) -> Self {
        Self {
            piece_index,
            data: vec![0; length as usize],
            completed: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_done(&self) -> bool {
        self.completed == self.data.len()
    }

    /// The block to ask for next: `min(block_size, remaining)` bytes at the
    /// first offset not yet filled.
    pub fn next_request(&self, block_size: u32) -> Option<BlockRequest> {
        if self.is_done() {
            return None;
        }
        let remaining = (self.data.len() - self.completed) as u32;
        Some(BlockRequest {
            begin: self.completed as u32,
            length: remaining.min(block_size),
        })
    }

    /// Copies a received block into place. It must belong to this piece,
    /// start exactly where the last block ended, carry data, and fit.
    pub fn add_block(&mut self, block: &PieceMessage) -> Result<(), PeerError> {
        let begin = self.completed;
        let end = begin + block.block.len();
        if block.piece_index != self.piece_index
            || block.block_begin as usize != begin
            || block.block.is_empty()
            || end > self.data.len()
        {
            return Err(PeerError::UnexpectedBlock {
                piece_index: self.piece_index,
                begin: begin as u32,
                got_index: block.piece_index,
                got_begin: block.block_begin,
                len: block.block.len(),
            });
        }

        self.data[begin..end].copy_from_slice(&block.block);
        self.completed = end;
        Ok(())
    }

    pub fn verify(&self, expected: &[u8; 20]) -> bool {
        Sha1::digest(&self.data).as_slice() == expected
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
