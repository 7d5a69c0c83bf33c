//! RTCP message codec (RFC 3550 §6).
//!
//! Every RTCP packet starts with the same 8-byte header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|   RC    |      PT       |             length            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         SSRC of sender                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `length` counts 32-bit words minus one, so a packet spans
//! `(length + 1) * 4` bytes. Several packets are usually stacked into one
//! compound datagram; [`parse_compound`] walks them.
//!
//! The server sends SR and BYE when a stream ends and decodes RR, SDES
//! and BYE from clients. Encoders and decoders exist for all four.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::RtcpError;

pub const RTCP_VERSION: u8 = 2;
pub const RTCP_HEADER_SIZE: usize = 8;
pub const SENDER_INFO_SIZE: usize = 20;
pub const REPORT_BLOCK_SIZE: usize = 24;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 0x83AA_7E80;

/// SDES item type terminating a chunk's item list.
pub const SDES_END: u8 = 0;
/// SDES canonical name item.
pub const SDES_CNAME: u8 = 1;

type CodecResult<T> = std::result::Result<T, RtcpError>;

/// RTCP packet types registered with IANA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpPacketType {
    /// Full INTRA-frame request (RFC 2032).
    Fir = 192,
    /// Negative acknowledgement (RFC 2032).
    Nack = 193,
    /// SMPTE time-code mapping (RFC 5484).
    Smptetc = 194,
    /// Extended inter-arrival jitter report (RFC 5450).
    Ij = 195,
    Sr = 200,
    Rr = 201,
    Sdes = 202,
    Bye = 203,
    App = 204,
    /// Generic RTP feedback (RFC 4585).
    Rtpfb = 205,
    /// Payload-specific feedback (RFC 4585).
    Psfb = 206,
    /// Extended report (RFC 3611).
    Xr = 207,
    /// AVB RTCP packet (IEEE 1733).
    Avb = 208,
    /// Receiver summary information (RFC 5760).
    Rsi = 209,
    /// Port mapping (RFC 6284).
    Token = 210,
    /// IDMS settings (RFC 7272).
    Idms = 211,
    /// Reporting group reporting sources (RFC 8861).
    Rgrs = 212,
}

impl RtcpPacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            192 => Self::Fir,
            193 => Self::Nack,
            194 => Self::Smptetc,
            195 => Self::Ij,
            200 => Self::Sr,
            201 => Self::Rr,
            202 => Self::Sdes,
            203 => Self::Bye,
            204 => Self::App,
            205 => Self::Rtpfb,
            206 => Self::Psfb,
            207 => Self::Xr,
            208 => Self::Avb,
            209 => Self::Rsi,
            210 => Self::Token,
            211 => Self::Idms,
            212 => Self::Rgrs,
            _ => return None,
        })
    }
}

/// Common RTCP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    pub version: u8,
    pub padding: bool,
    /// Reception report count, source count or subtype (5 bits).
    pub count: u8,
    pub packet_type: u8,
    /// Packet length in 32-bit words minus one.
    pub length: u16,
    pub ssrc: u32,
}

impl RtcpHeader {
    pub fn new(packet_type: RtcpPacketType, count: u8, length: u16, ssrc: u32) -> Self {
        Self {
            version: RTCP_VERSION,
            padding: false,
            count,
            packet_type: packet_type as u8,
            length,
            ssrc,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.version == RTCP_VERSION && self.length > 0
    }

    /// Total bytes this packet occupies, header included.
    pub fn packet_size(&self) -> usize {
        (self.length as usize + 1) * 4
    }

    pub fn parse(buf: &mut impl Buf) -> CodecResult<Self> {
        ensure(buf.remaining(), RTCP_HEADER_SIZE)?;
        let first = buf.get_u8();
        Ok(Self {
            version: first >> 6,
            padding: first & 0x20 != 0,
            count: first & 0x1f,
            packet_type: buf.get_u8(),
            length: buf.get_u16(),
            ssrc: buf.get_u32(),
        })
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8((self.version << 6) | ((self.padding as u8) << 5) | (self.count & 0x1f));
        buf.put_u8(self.packet_type);
        buf.put_u16(self.length);
        buf.put_u32(self.ssrc);
    }
}

fn ensure(available: usize, required: usize) -> CodecResult<()> {
    if available < required {
        return Err(RtcpError::BufferTooSmall {
            required,
            available,
        });
    }
    Ok(())
}

fn expect_type(header: &RtcpHeader, expected: RtcpPacketType) -> CodecResult<()> {
    if header.packet_type != expected as u8 {
        return Err(RtcpError::UnexpectedType(header.packet_type));
    }
    Ok(())
}

/// Bytes of `packet` covered by its declared length.
fn declared<'a>(header: &RtcpHeader, packet: &'a [u8]) -> CodecResult<&'a [u8]> {
    let size = header.packet_size();
    ensure(packet.len(), size)?;
    Ok(&packet[..size])
}

fn length_field(total_bytes: usize) -> u16 {
    (total_bytes / 4 - 1) as u16
}

/// 64-bit NTP wall-clock timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    /// Seconds since 1900-01-01.
    pub seconds: u32,
    /// Fraction of a second in units of 2^-32.
    pub fraction: u32,
}

impl NtpTimestamp {
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_unix(since_epoch)
    }

    pub fn from_unix(since_epoch: Duration) -> Self {
        let seconds = since_epoch.as_secs() + NTP_UNIX_OFFSET;
        let fraction = (u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000;
        Self {
            seconds: seconds as u32,
            fraction: fraction as u32,
        }
    }
}

/// Sender information block of an SR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderInfo {
    pub ntp_msw: u32,
    pub ntp_lsw: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderInfo {
    pub fn parse(buf: &mut impl Buf) -> CodecResult<Self> {
        ensure(buf.remaining(), SENDER_INFO_SIZE)?;
        Ok(Self {
            ntp_msw: buf.get_u32(),
            ntp_lsw: buf.get_u32(),
            rtp_timestamp: buf.get_u32(),
            packet_count: buf.get_u32(),
            octet_count: buf.get_u32(),
        })
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.ntp_msw);
        buf.put_u32(self.ntp_lsw);
        buf.put_u32(self.rtp_timestamp);
        buf.put_u32(self.packet_count);
        buf.put_u32(self.octet_count);
    }
}

/// Reception report block carried by SR and RR packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportBlock {
    pub ssrc: u32,
    /// Fraction lost since the last report, in 1/256 units.
    pub fraction_lost: u8,
    /// Cumulative packets lost (24-bit on the wire).
    pub cumulative_lost: u32,
    pub highest_seq: u32,
    pub jitter: u32,
    pub last_sr: u32,
    /// Delay since last SR in 1/65536 seconds.
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    pub fn parse(buf: &mut impl Buf) -> CodecResult<Self> {
        ensure(buf.remaining(), REPORT_BLOCK_SIZE)?;
        let ssrc = buf.get_u32();
        let lost = buf.get_u32();
        Ok(Self {
            ssrc,
            fraction_lost: (lost >> 24) as u8,
            cumulative_lost: lost & 0x00ff_ffff,
            highest_seq: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sr: buf.get_u32(),
            delay_since_last_sr: buf.get_u32(),
        })
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.ssrc);
        buf.put_u32((u32::from(self.fraction_lost) << 24) | (self.cumulative_lost & 0x00ff_ffff));
        buf.put_u32(self.highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }
}

fn parse_blocks(buf: &mut impl Buf, count: u8) -> CodecResult<Vec<ReportBlock>> {
    (0..count).map(|_| ReportBlock::parse(buf)).collect()
}

/// Sender report (PT 200).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderReport {
    pub ssrc: u32,
    pub sender_info: SenderInfo,
    pub report_blocks: Vec<ReportBlock>,
}

impl SenderReport {
    pub fn serialize(&self) -> BytesMut {
        let size = RTCP_HEADER_SIZE + SENDER_INFO_SIZE + REPORT_BLOCK_SIZE * self.report_blocks.len();
        let mut buf = BytesMut::with_capacity(size);
        RtcpHeader::new(
            RtcpPacketType::Sr,
            self.report_blocks.len() as u8,
            length_field(size),
            self.ssrc,
        )
        .write(&mut buf);
        self.sender_info.write(&mut buf);
        for block in &self.report_blocks {
            block.write(&mut buf);
        }
        buf
    }

    pub fn deserialize(packet: &[u8]) -> CodecResult<Self> {
        let header = RtcpHeader::parse(&mut &packet[..])?;
        expect_type(&header, RtcpPacketType::Sr)?;
        let mut body = &declared(&header, packet)?[RTCP_HEADER_SIZE..];
        let sender_info = SenderInfo::parse(&mut body)?;
        let report_blocks = parse_blocks(&mut body, header.count)?;
        Ok(Self {
            ssrc: header.ssrc,
            sender_info,
            report_blocks,
        })
    }
}

/// Receiver report (PT 201).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub report_blocks: Vec<ReportBlock>,
}

impl ReceiverReport {
    pub fn serialize(&self) -> BytesMut {
        let size = RTCP_HEADER_SIZE + REPORT_BLOCK_SIZE * self.report_blocks.len();
        let mut buf = BytesMut::with_capacity(size);
        RtcpHeader::new(
            RtcpPacketType::Rr,
            self.report_blocks.len() as u8,
            length_field(size),
            self.ssrc,
        )
        .write(&mut buf);
        for block in &self.report_blocks {
            block.write(&mut buf);
        }
        buf
    }

    pub fn deserialize(packet: &[u8]) -> CodecResult<Self> {
        let header = RtcpHeader::parse(&mut &packet[..])?;
        expect_type(&header, RtcpPacketType::Rr)?;
        let mut body = &declared(&header, packet)?[RTCP_HEADER_SIZE..];
        let report_blocks = parse_blocks(&mut body, header.count)?;
        Ok(Self {
            ssrc: header.ssrc,
            report_blocks,
        })
    }
}

/// One SDES item (type, text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    pub kind: u8,
    pub text: String,
}

/// SDES chunk: the items describing one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub items: Vec<SdesItem>,
}

impl SdesChunk {
    fn encoded_len(&self) -> usize {
        let raw = 4 + self.items.iter().map(|i| 2 + i.text.len().min(255)).sum::<usize>() + 1;
        raw.next_multiple_of(4)
    }
}

/// Source description (PT 202).
///
/// Unlike the other types, the word after the first four header bytes is
/// the SSRC of the first chunk rather than a sender SSRC.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescription {
    pub chunks: Vec<SdesChunk>,
}

impl SourceDescription {
    pub fn cname(ssrc: u32, cname: &str) -> Self {
        Self {
            chunks: vec![SdesChunk {
                ssrc,
                items: vec![SdesItem {
                    kind: SDES_CNAME,
                    text: cname.to_string(),
                }],
            }],
        }
    }

    pub fn serialize(&self) -> BytesMut {
        let size = 4 + self.chunks.iter().map(SdesChunk::encoded_len).sum::<usize>();
        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8((RTCP_VERSION << 6) | (self.chunks.len() as u8 & 0x1f));
        buf.put_u8(RtcpPacketType::Sdes as u8);
        buf.put_u16(length_field(size));
        for chunk in &self.chunks {
            let start = buf.len();
            buf.put_u32(chunk.ssrc);
            for item in &chunk.items {
                let text = &item.text.as_bytes()[..item.text.len().min(255)];
                buf.put_u8(item.kind);
                buf.put_u8(text.len() as u8);
                buf.put_slice(text);
            }
            buf.put_u8(SDES_END);
            while (buf.len() - start) % 4 != 0 {
                buf.put_u8(SDES_END);
            }
        }
        buf
    }

    pub fn deserialize(packet: &[u8]) -> CodecResult<Self> {
        let header = RtcpHeader::parse(&mut &packet[..])?;
        expect_type(&header, RtcpPacketType::Sdes)?;
        let mut body = &declared(&header, packet)?[4..];
        let total = body.len();
        let mut chunks = Vec::with_capacity(header.count as usize);

        while chunks.len() < header.count as usize && body.remaining() >= 4 {
            let ssrc = body.get_u32();
            let mut items = Vec::new();
            loop {
                ensure(body.remaining(), 1)?;
                let kind = body.get_u8();
                if kind == SDES_END {
                    break;
                }
                ensure(body.remaining(), 1)?;
                let len = body.get_u8() as usize;
                ensure(body.remaining(), len)?;
                let text = String::from_utf8_lossy(&body[..len]).into_owned();
                body.advance(len);
                items.push(SdesItem { kind, text });
            }
            // Chunks end on a word boundary; the gap is filled with END bytes.
            let consumed = total - body.remaining();
            let pad = (consumed.next_multiple_of(4) - consumed).min(body.remaining());
            body.advance(pad);
            chunks.push(SdesChunk { ssrc, items });
        }

        Ok(Self { chunks })
    }
}

/// Goodbye (PT 203) for a single source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Goodbye {
    pub ssrc: u32,
}

impl Goodbye {
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(RTCP_HEADER_SIZE);
        RtcpHeader::new(RtcpPacketType::Bye, 1, length_field(RTCP_HEADER_SIZE), self.ssrc)
            .write(&mut buf);
        buf
    }

    /// Decode a BYE. Additional sources and a reason string are ignored.
    pub fn deserialize(packet: &[u8]) -> CodecResult<Self> {
        let header = RtcpHeader::parse(&mut &packet[..])?;
        expect_type(&header, RtcpPacketType::Bye)?;
        Ok(Self { ssrc: header.ssrc })
    }
}

/// One decoded packet of a compound RTCP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Goodbye(Goodbye),
    /// Recognized by length only; the body is skipped.
    Other(RtcpHeader),
}

/// Walk a compound RTCP buffer and decode every packet in it.
///
/// Decoding is best-effort: an invalid header is logged and the walk
/// continues, a packet that fails to decode is logged and skipped, and a
/// packet whose declared length runs past the buffer ends the walk.
pub fn parse_compound(data: &[u8]) -> Vec<RtcpPacket> {
    let mut packets = Vec::new();
    let mut rest = data;

    while rest.len() >= RTCP_HEADER_SIZE {
        let header = match RtcpHeader::parse(&mut &rest[..]) {
            Ok(header) => header,
            Err(_) => break,
        };
        if !header.is_valid() {
            tracing::warn!(
                version = header.version,
                packet_type = header.packet_type,
                length = header.length,
                "invalid RTCP header"
            );
        }

        let size = header.packet_size();
        if size > rest.len() {
            tracing::warn!(
                packet_type = header.packet_type,
                size,
                available = rest.len(),
                "truncated RTCP packet"
            );
            break;
        }
        let packet = &rest[..size];

        let decoded = match RtcpPacketType::from_u8(header.packet_type) {
            Some(RtcpPacketType::Sr) => SenderReport::deserialize(packet).map(RtcpPacket::SenderReport),
            Some(RtcpPacketType::Rr) => {
                ReceiverReport::deserialize(packet).map(RtcpPacket::ReceiverReport)
            }
            Some(RtcpPacketType::Sdes) => {
                SourceDescription::deserialize(packet).map(RtcpPacket::SourceDescription)
            }
            Some(RtcpPacketType::Bye) => Goodbye::deserialize(packet).map(RtcpPacket::Goodbye),
            _ => Ok(RtcpPacket::Other(header)),
        };
        match decoded {
            Ok(p) => packets.push(p),
            Err(e) => tracing::warn!(
                packet_type = header.packet_type,
                error = %e,
                "RTCP packet decode failed"
            ),
        }

        rest = &rest[size..];
    }

    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(ssrc: u32) -> ReportBlock {
        ReportBlock {
            ssrc,
            fraction_lost: 12,
            cumulative_lost: 0x01_0203,
            highest_seq: 70_000,
            jitter: 42,
            last_sr: 0xDEAD_BEEF,
            delay_since_last_sr: 65_536,
        }
    }

    #[test]
    fn sender_report_layout_and_decode() {
        let sr = SenderReport {
            ssrc: 0x1122_3344,
            sender_info: SenderInfo {
                ntp_msw: 0xE000_0000,
                ntp_lsw: 0x8000_0000,
                rtp_timestamp: 123_456,
                packet_count: 99,
                octet_count: 123_400,
            },
            report_blocks: Vec::new(),
        };
        let bytes = sr.serialize();
        assert_eq!(bytes.len(), 28);
        assert_eq!(bytes[0], 0x80);
        assert_eq!(bytes[1], 200);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 6);
        assert_eq!(&bytes[4..8], &0x1122_3344u32.to_be_bytes());
        assert_eq!(&bytes[24..28], &123_400u32.to_be_bytes());
        assert_eq!(SenderReport::deserialize(&bytes), Ok(sr));
    }

    #[test]
    fn sender_report_with_blocks() {
        let sr = SenderReport {
            ssrc: 1,
            sender_info: SenderInfo::default(),
            report_blocks: vec![block(2), block(3)],
        };
        let bytes = sr.serialize();
        assert_eq!(bytes[0] & 0x1f, 2);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), (28 + 48) / 4 - 1);
        assert_eq!(SenderReport::deserialize(&bytes), Ok(sr));
    }

    #[test]
    fn bye_layout() {
        let bytes = Goodbye { ssrc: 0xCAFE_BABE }.serialize();
        assert_eq!(&bytes[..], &[0x81, 203, 0, 1, 0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(
            Goodbye::deserialize(&bytes),
            Ok(Goodbye { ssrc: 0xCAFE_BABE })
        );
    }

    #[test]
    fn receiver_report_decode() {
        let mut raw = vec![0x81, 201, 0, 7];
        raw.extend_from_slice(&0x0A0B_0C0Du32.to_be_bytes());
        raw.extend_from_slice(&0x5000_0001u32.to_be_bytes());
        raw.extend_from_slice(&[0x40, 0x00, 0x00, 0x05]);
        raw.extend_from_slice(&1000u32.to_be_bytes());
        raw.extend_from_slice(&17u32.to_be_bytes());
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.extend_from_slice(&0u32.to_be_bytes());

        let rr = ReceiverReport::deserialize(&raw).unwrap();
        assert_eq!(rr.ssrc, 0x0A0B_0C0D);
        assert_eq!(rr.report_blocks.len(), 1);
        let b = rr.report_blocks[0];
        assert_eq!(b.ssrc, 0x5000_0001);
        assert_eq!(b.fraction_lost, 0x40);
        assert_eq!(b.cumulative_lost, 5);
        assert_eq!(b.highest_seq, 1000);
        assert_eq!(b.jitter, 17);
        assert_eq!(rr.serialize().to_vec(), raw);
    }

    #[test]
    fn receiver_report_short_block_fails() {
        let raw = [0x81, 201, 0, 1, 0, 0, 0, 1];
        assert!(matches!(
            ReceiverReport::deserialize(&raw),
            Err(RtcpError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn sdes_decode_with_padding() {
        // CNAME "abc": ssrc(4) + 1 + 1 + 3 + END(1) = 10, padded to 12.
        let mut raw = vec![0x81, 202, 0, 3];
        raw.extend_from_slice(&0x0102_0304u32.to_be_bytes());
        raw.extend_from_slice(&[SDES_CNAME, 3, b'a', b'b', b'c', 0, 0, 0]);

        let sdes = SourceDescription::deserialize(&raw).unwrap();
        assert_eq!(sdes, SourceDescription::cname(0x0102_0304, "abc"));
        assert_eq!(sdes.serialize().to_vec(), raw);
    }

    #[test]
    fn sdes_multiple_chunks() {
        let sdes = SourceDescription {
            chunks: vec![
                SdesChunk {
                    ssrc: 1,
                    items: vec![
                        SdesItem {
                            kind: SDES_CNAME,
                            text: "user@host".into(),
                        },
                        SdesItem {
                            kind: 6,
                            text: "tool".into(),
                        },
                    ],
                },
                SdesChunk {
                    ssrc: 0x0000_00FF,
                    items: vec![],
                },
            ],
        };
        let bytes = sdes.serialize();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(SourceDescription::deserialize(&bytes), Ok(sdes));
    }

    #[test]
    fn compound_walk() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(
            &ReceiverReport {
                ssrc: 7,
                report_blocks: vec![block(9)],
            }
            .serialize(),
        );
        buf.extend_from_slice(&SourceDescription::cname(7, "client").serialize());
        buf.extend_from_slice(&Goodbye { ssrc: 7 }.serialize());

        let packets = parse_compound(&buf);
        assert_eq!(packets.len(), 3);
        assert!(matches!(&packets[0], RtcpPacket::ReceiverReport(rr) if rr.report_blocks[0] == block(9)));
        assert!(matches!(&packets[1], RtcpPacket::SourceDescription(s) if s.chunks[0].items[0].text == "client"));
        assert_eq!(packets[2], RtcpPacket::Goodbye(Goodbye { ssrc: 7 }));
    }

    #[test]
    fn compound_skips_unknown_and_stops_on_truncation() {
        let mut buf = BytesMut::new();
        RtcpHeader::new(RtcpPacketType::App, 0, 2, 5).write(&mut buf);
        buf.put_u32(0x6E61_6D65);
        buf.extend_from_slice(&Goodbye { ssrc: 5 }.serialize());
        // Declares 16 bytes but only 8 follow.
        RtcpHeader::new(RtcpPacketType::Rr, 0, 3, 5).write(&mut buf);

        let packets = parse_compound(&buf);
        assert_eq!(packets.len(), 2);
        assert!(matches!(packets[0], RtcpPacket::Other(h) if h.packet_type == 204));
        assert_eq!(packets[1], RtcpPacket::Goodbye(Goodbye { ssrc: 5 }));
    }

    #[test]
    fn invalid_header_is_not_fatal() {
        let mut buf = BytesMut::new();
        // Zero length: only four bytes are consumed and decoding fails.
        buf.put_slice(&[0x80, 201, 0, 0]);
        buf.extend_from_slice(&Goodbye { ssrc: 3 }.serialize());

        let packets = parse_compound(&buf);
        assert_eq!(packets, vec![RtcpPacket::Goodbye(Goodbye { ssrc: 3 })]);
    }

    #[test]
    fn ntp_conversion() {
        let ts = NtpTimestamp::from_unix(Duration::new(1, 500_000_000));
        assert_eq!(ts.seconds, 2_208_988_801);
        assert_eq!(ts.fraction, 0x8000_0000);
    }

    #[test]
    fn packet_type_table() {
        assert_eq!(RtcpPacketType::from_u8(200), Some(RtcpPacketType::Sr));
        assert_eq!(RtcpPacketType::from_u8(212), Some(RtcpPacketType::Rgrs));
        assert_eq!(RtcpPacketType::from_u8(196), None);
    }
}
