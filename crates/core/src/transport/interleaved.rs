//! RTSP interleaved binary framing (RFC 2326 §10.12).
//!
//! RTP and RTCP packets share the RTSP TCP connection, each prefixed with:
//!
//! ```text
//! +------+---------+----------------+
//! | 0x24 | channel | length (BE16)  |  followed by `length` payload bytes
//! +------+---------+----------------+
//! ```

/// First byte of every interleaved frame (`'$'`).
pub const INTERLEAVED_MAGIC: u8 = b'$';

pub const INTERLEAVED_HEADER_SIZE: usize = 4;

/// Decoded interleaved frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterleavedHeader {
    pub channel: u8,
    pub length: u16,
}

impl InterleavedHeader {
    pub fn new(channel: u8, length: u16) -> Self {
        Self { channel, length }
    }

    pub fn to_bytes(self) -> [u8; INTERLEAVED_HEADER_SIZE] {
        let len = self.length.to_be_bytes();
        [INTERLEAVED_MAGIC, self.channel, len[0], len[1]]
    }

    /// Parse a header from the first four bytes of `buf`.
    ///
    /// Returns `None` if fewer than four bytes are available or the magic
    /// byte is wrong.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        match buf {
            [INTERLEAVED_MAGIC, channel, hi, lo, ..] => Some(Self {
                channel: *channel,
                length: u16::from_be_bytes([*hi, *lo]),
            }),
            _ => None,
        }
    }

    /// Header plus payload size.
    pub fn frame_len(self) -> usize {
        INTERLEAVED_HEADER_SIZE + self.length as usize
    }
}
