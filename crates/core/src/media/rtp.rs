use crate::error::Result;
use crate::random::RandomSource;
use crate::transport::{Delivery, MediaTransport};

use super::nal::{BUF_PREPEND_SIZE, PrependBuffer};
use super::{AvPacket, AvPacketInfo, RtpSink};

pub const RTP_HEADER_SIZE: usize = 12;

/// Largest RTP payload sent in one packet. Bigger NAL units use FU-A.
pub const MAX_PAYLOAD: usize = 1400;

const RTP_VERSION: u8 = 2;

/// FU-A NAL unit type (RFC 6184 §5.8).
const FU_A_TYPE: u8 = 28;
const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;
const FU_HEAD_SIZE: usize = 2;

/// RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Padding, extension and CSRC count are carried for decoding but always
/// written as zero by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32, marker: bool) -> Self {
        Self {
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        }
    }

    pub fn to_bytes(&self) -> [u8; RTP_HEADER_SIZE] {
        let mut header = [0u8; RTP_HEADER_SIZE];
        header[0] = (RTP_VERSION << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | (self.csrc_count & 0x0f);
        header[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7f);
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Decode the fixed header. Returns `None` for short input or a version
    /// other than 2.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < RTP_HEADER_SIZE || buf[0] >> 6 != RTP_VERSION {
            return None;
        }
        Some(Self {
            padding: buf[0] & 0x20 != 0,
            extension: buf[0] & 0x10 != 0,
            csrc_count: buf[0] & 0x0f,
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7f,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// H.264 RTP sink (RFC 6184).
///
/// - **Single NAL Unit** (§5.6): payloads up to [`MAX_PAYLOAD`] bytes are
///   framed in place. The RTP header, and for TCP the interleave marker,
///   go into the packet's headroom.
///
/// - **FU-A** (§5.8): larger NAL units drop their header byte and are cut
///   into fragments, each led by a 2-byte FU head:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]
///   FU header:     [S|E|R|NAL_Type]
///   ```
///
/// The sequence number starts at a random value and advances once per
/// packet. Packet and octet totals feed the RTCP sender report.
pub struct H264RtpSink {
    transport: MediaTransport,
    sequence: u16,
    packets: u32,
    octets: u32,
}

impl H264RtpSink {
    pub fn new(transport: MediaTransport, rng: &dyn RandomSource) -> Self {
        let sequence = rng.next_u32() as u16;
        tracing::debug!(initial_seq = sequence, "RTP sink created");
        Self::with_sequence(transport, sequence)
    }

    pub fn with_sequence(transport: MediaTransport, sequence: u16) -> Self {
        Self {
            transport,
            sequence,
            packets: 0,
            octets: 0,
        }
    }

    /// Write the RTP header into `buf`'s headroom and hand it to the
    /// transport.
    fn emit(&mut self, mut buf: PrependBuffer, info: &AvPacketInfo, marker: bool) -> Result<()> {
        let header = RtpHeader::new(
            info.payload_type,
            self.sequence,
            info.timestamp,
            info.ssrc,
            marker,
        );
        self.sequence = self.sequence.wrapping_add(1);

        if !buf.prepend(&header.to_bytes()) {
            // Headroom was consumed elsewhere; fall back to a copy.
            buf = PrependBuffer::from_payload(BUF_PREPEND_SIZE, buf.as_slice());
            buf.prepend(&header.to_bytes());
        }
        let rtp_len = buf.len();
        if self.transport.send_prepended(&mut buf)? == Delivery::Dropped {
            tracing::trace!(seq = header.sequence, len = rtp_len, "RTP packet dropped");
            return Ok(());
        }

        self.packets = self.packets.wrapping_add(1);
        self.octets = self.octets.wrapping_add(rtp_len as u32);
        tracing::trace!(
            seq = header.sequence,
            ts = header.timestamp,
            marker,
            len = rtp_len,
            "RTP packet sent"
        );
        Ok(())
    }
}

impl RtpSink for H264RtpSink {
    fn send_single(&mut self, packet: AvPacket, info: &AvPacketInfo) -> Result<()> {
        self.emit(packet.buffer, info, true)
    }

    fn send_fragmented(&mut self, packet: AvPacket, info: &AvPacketInfo) -> Result<()> {
        let nal = packet.payload();
        let Some((&nal_header, mut rest)) = nal.split_first() else {
            return Ok(());
        };

        let fu_indicator = (nal_header & 0xe0) | FU_A_TYPE;
        let nal_type = nal_header & 0x1f;
        let mut fu_header = FU_START | nal_type;
        let mut fragments = 0usize;

        while rest.len() + FU_HEAD_SIZE > MAX_PAYLOAD {
            let (chunk, tail) = rest.split_at(MAX_PAYLOAD - FU_HEAD_SIZE);
            let mut buf = PrependBuffer::with_capacity(BUF_PREPEND_SIZE, MAX_PAYLOAD);
            buf.append(&[fu_indicator, fu_header]);
            buf.append(chunk);
            self.emit(buf, info, false)?;

            fu_header &= !FU_START;
            rest = tail;
            fragments += 1;
        }

        fu_header |= FU_END;
        let mut buf = PrependBuffer::with_capacity(BUF_PREPEND_SIZE, rest.len() + FU_HEAD_SIZE);
        buf.append(&[fu_indicator, fu_header]);
        buf.append(rest);
        self.emit(buf, info, true)?;

        tracing::trace!(
            nal_type,
            nal_size = nal.len(),
            fragments = fragments + 1,
            "FU-A fragmented NAL unit"
        );
        Ok(())
    }

    fn next_sequence(&self) -> u16 {
        self.sequence
    }

    fn packet_count(&self) -> u32 {
        self.packets
    }

    fn octet_count(&self) -> u32 {
        self.octets
    }
}
