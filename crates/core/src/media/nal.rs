//! H.264 Annex-B NAL unit extraction.
//!
//! An Annex-B byte stream delimits NAL units with start codes:
//!
//! ```text
//! 00 00 00 01 | 67 42 00 1e ... | 00 00 01 | 68 ce 38 80 | 00 00 00 01 | 65 88 ...
//!  start code |   SPS           |  start   |   PPS       |             |  IDR slice
//! ```
//!
//! [`NalReader`] pulls one unit at a time from a seekable stream, reading in
//! bounded chunks and seeking back so every call starts exactly on a start
//! code. Units are returned in a [`PrependBuffer`] that keeps headroom in
//! front of the payload for the interleave marker and RTP header, so the
//! packetizer can frame small NALs without copying them.

use std::io::{Read, Seek, SeekFrom};

use crate::error::NalError;

/// Headroom reserved in front of every NAL payload.
///
/// Must cover the 4-byte interleave marker plus the 12-byte RTP header.
pub const BUF_PREPEND_SIZE: usize = 20;

/// Default number of bytes read from the stream per scan step.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

const MIN_CHUNK_SIZE: usize = 16;

/// Byte buffer with reserved space in front of the logical start.
///
/// The payload lives in `data[head..]`. [`prepend`](Self::prepend) moves
/// `head` backwards, [`append`](Self::append) grows the tail, doubling the
/// allocation when it runs out of room.
#[derive(Debug, Clone)]
pub struct PrependBuffer {
    data: Vec<u8>,
    head: usize,
}

impl PrependBuffer {
    /// Create an empty buffer with `headroom` bytes reserved in front.
    pub fn with_headroom(headroom: usize) -> Self {
        Self::with_capacity(headroom, 0)
    }

    pub fn with_capacity(headroom: usize, capacity: usize) -> Self {
        let mut data = Vec::with_capacity(headroom + capacity);
        data.resize(headroom, 0);
        Self {
            data,
            head: headroom,
        }
    }

    /// Copy `payload` into a new buffer with the given headroom.
    pub fn from_payload(headroom: usize, payload: &[u8]) -> Self {
        let mut buf = Self::with_capacity(headroom, payload.len());
        buf.append(payload);
        buf
    }

    /// Bytes still available in front of the logical start.
    pub fn headroom(&self) -> usize {
        self.head
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes from the logical start to the end, including anything prepended.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    pub fn append(&mut self, bytes: &[u8]) {
        let free = self.data.capacity() - self.data.len();
        if bytes.len() > free {
            let grow = self.data.capacity().max(bytes.len());
            self.data.reserve_exact(grow);
        }
        self.data.extend_from_slice(bytes);
    }

    /// Write `header` immediately before the logical start.
    ///
    /// Returns `false` without touching the buffer if the headroom is too
    /// small.
    pub fn prepend(&mut self, header: &[u8]) -> bool {
        if header.len() > self.head {
            return false;
        }
        self.head -= header.len();
        self.data[self.head..self.head + header.len()].copy_from_slice(header);
        true
    }
}

/// `nal_unit_type` values from H.264 Table 7-1 that this server cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// Coded slice of a non-IDR picture.
    Slice,
    /// Data partition A.
    Dpa,
    /// Data partition B.
    Dpb,
    /// Data partition C.
    Dpc,
    /// Coded slice of an IDR picture.
    Idr,
    /// Supplemental enhancement information.
    Sei,
    /// Sequence parameter set.
    Sps,
    /// Picture parameter set.
    Pps,
    /// Access unit delimiter.
    Aud,
    /// End of sequence.
    EndOfSequence,
    /// End of stream.
    EndOfStream,
    /// Filler data.
    Filler,
    /// Anything else (0, 13..=31).
    Other(u8),
}

impl NalUnitType {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x1f {
            1 => Self::Slice,
            2 => Self::Dpa,
            3 => Self::Dpb,
            4 => Self::Dpc,
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::Filler,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::Dpa => 2,
            Self::Dpb => 3,
            Self::Dpc => 4,
            Self::Idr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::Filler => 12,
            Self::Other(v) => v,
        }
    }

    /// SPS, PPS and SEI share the timestamp of the picture that follows them.
    pub fn is_parameter_set(self) -> bool {
        matches!(self, Self::Sps | Self::Pps | Self::Sei)
    }
}

/// The one-byte NAL unit header.
///
/// ```text
/// +---------------+
/// |0|1|2|3|4|5|6|7|
/// +-+-+-+-+-+-+-+-+
/// |F|NRI|  Type   |
/// +---------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub forbidden_zero_bit: bool,
    pub nal_ref_idc: u8,
    pub nal_unit_type: NalUnitType,
}

impl NalHeader {
    pub fn parse(byte: u8) -> Self {
        Self {
            forbidden_zero_bit: byte & 0x80 != 0,
            nal_ref_idc: (byte >> 5) & 0x03,
            nal_unit_type: NalUnitType::from_u8(byte),
        }
    }
}

/// One extracted NAL unit, start code stripped.
#[derive(Debug, Clone)]
pub struct NalUnit {
    pub buffer: PrependBuffer,
    /// `None` when two start codes were adjacent.
    pub header: Option<NalHeader>,
}

impl NalUnit {
    pub fn payload(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn unit_type(&self) -> Option<NalUnitType> {
        self.header.map(|h| h.nal_unit_type)
    }
}

/// Pulls NAL units out of an Annex-B stream one at a time.
pub struct NalReader<R> {
    inner: R,
    chunk: Vec<u8>,
}

impl<R: Read + Seek> NalReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_chunk_size(inner, DEFAULT_CHUNK_SIZE)
    }

    /// Use a custom scan chunk size (clamped to at least 16 bytes).
    pub fn with_chunk_size(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            chunk: vec![0; chunk_size.max(MIN_CHUNK_SIZE)],
        }
    }

    /// Fill the scratch chunk. Returns the byte count and whether the
    /// stream hit EOF before the chunk was full.
    fn fill_chunk(&mut self) -> Result<(usize, bool), NalError> {
        let mut filled = 0;
        while filled < self.chunk.len() {
            match self.inner.read(&mut self.chunk[filled..]) {
                Ok(0) => return Ok((filled, true)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(NalError::Io(e)),
            }
        }
        Ok((filled, false))
    }

    /// Extract the next NAL unit.
    ///
    /// Fails with [`NalError::Empty`] at end of stream and
    /// [`NalError::Malformed`] when the read position is not on a start code.
    pub fn next_nalu(&mut self) -> Result<NalUnit, NalError> {
        let (mut len, mut eof) = self.fill_chunk()?;
        if len < 3 {
            return Err(NalError::Empty);
        }
        let start_code_len = match start_code_at(&self.chunk[..len], 0) {
            Some(sc) => sc,
            None => return Err(NalError::Malformed),
        };

        let mut buffer = PrependBuffer::with_capacity(BUF_PREPEND_SIZE, len);
        let mut from = start_code_len;
        let mut pos = start_code_len;

        loop {
            while pos < len && start_code_at(&self.chunk[..len], pos).is_none() {
                pos += 1;
            }

            if pos < len {
                buffer.append(&self.chunk[from..pos]);
                let over_read = (len - pos) as i64;
                self.inner.seek(SeekFrom::Current(-over_read))?;
                break;
            }

            if eof {
                buffer.append(&self.chunk[from..len]);
                break;
            }

            // A start code may straddle the chunk edge: leave its first
            // three bytes for the next read.
            let keep = len - 3;
            buffer.append(&self.chunk[from..keep]);
            self.inner.seek(SeekFrom::Current(-3))?;
            (len, eof) = self.fill_chunk()?;
            from = 0;
            pos = 0;
        }

        let header = buffer.as_slice().first().map(|b| NalHeader::parse(*b));
        tracing::trace!(
            size = buffer.len(),
            nal_type = ?header.map(|h| h.nal_unit_type),
            "NAL unit extracted"
        );
        Ok(NalUnit { buffer, header })
    }
}

/// Length of the start code beginning at `pos`, preferring the 4-byte form.
fn start_code_at(data: &[u8], pos: usize) -> Option<usize> {
    let rest = &data[pos..];
    if rest.len() >= 4 && rest[..4] == [0, 0, 0, 1] {
        Some(4)
    } else if rest.len() >= 3 && rest[..3] == [0, 0, 1] {
        Some(3)
    } else {
        None
    }
}
