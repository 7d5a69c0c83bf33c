//! Media sources, RTP packetization and RTCP.
//!
//! The pipeline for one track:
//!
//! ```text
//! FrameSource ──AvPacket──▶ RtpSink ──RTP──▶ MediaTransport (UDP / interleaved TCP)
//!      ▲                                              │
//!      │ new_frame_source / new_rtp_sink              ▼
//! MediaSubsession (SDP lines, codec parameters)    client
//! ```
//!
//! ## RTP overview (RFC 3550)
//!
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpHeader`]):
//!
//! - **Sequence number** (16-bit, wrapping): incremented once per packet,
//!   including every FU-A fragment.
//! - **Timestamp** (32-bit): media clock, 90 kHz for video.
//! - **SSRC** (32-bit): chosen randomly per frame source.
//! - **Marker bit**: set on the last packet of a NAL unit.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |

pub mod h264;
pub mod nal;
pub mod rtcp;
pub mod rtp;

use std::time::Duration;

use crate::error::{NalError, Result};
use crate::random::RandomSource;
use crate::transport::MediaTransport;

use nal::{NalUnitType, PrependBuffer};
use rtp::{MAX_PAYLOAD, RtpHeader};

/// RTP clock ticks per frame when the frame rate is unknown (90 kHz / 25).
pub const DEFAULT_TIMESTAMP_STEP: u32 = 3600;

/// Pacing between frames when the frame rate is unknown.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(40);

/// One encoded unit handed from a [`FrameSource`] to an [`RtpSink`].
///
/// The buffer keeps headroom in front of the payload so headers can be
/// written in place.
#[derive(Debug, Clone)]
pub struct AvPacket {
    pub buffer: PrependBuffer,
    pub nal_type: NalUnitType,
}

impl AvPacket {
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn prepend_size(&self) -> usize {
        self.buffer.headroom()
    }

    pub fn payload(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}

/// Per-send metadata that is not part of the encoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvPacketInfo {
    pub ssrc: u32,
    pub timestamp: u32,
    pub payload_type: u8,
}

/// Produces encoded frames one at a time.
pub trait FrameSource: Send {
    /// Pull the next frame. Any error ends the stream.
    fn next_frame(&mut self) -> std::result::Result<AvPacket, NalError>;

    /// SSRC used for everything this source emits.
    fn ssrc(&self) -> u32;
}

/// Turns [`AvPacket`]s into RTP packets on a bound transport.
pub trait RtpSink: Send {
    /// Send a payload of at most [`MAX_PAYLOAD`] bytes as one RTP packet.
    fn send_single(&mut self, packet: AvPacket, info: &AvPacketInfo) -> Result<()>;

    /// Split a payload larger than [`MAX_PAYLOAD`] across several packets.
    fn send_fragmented(&mut self, packet: AvPacket, info: &AvPacketInfo) -> Result<()>;

    fn send(&mut self, packet: AvPacket, info: &AvPacketInfo) -> Result<()> {
        if packet.size() <= MAX_PAYLOAD {
            self.send_single(packet, info)
        } else {
            self.send_fragmented(packet, info)
        }
    }

    /// Send raw payload bytes, taking metadata from a prepared header.
    ///
    /// The sink still assigns the sequence number and marker bit.
    fn send_raw(&mut self, data: &[u8], header: &RtpHeader) -> Result<()> {
        let packet = AvPacket {
            buffer: PrependBuffer::from_payload(nal::BUF_PREPEND_SIZE, data),
            nal_type: NalUnitType::from_u8(data.first().copied().unwrap_or(0)),
        };
        let info = AvPacketInfo {
            ssrc: header.ssrc,
            timestamp: header.timestamp,
            payload_type: header.payload_type,
        };
        self.send(packet, &info)
    }

    /// Sequence number the next packet will carry.
    fn next_sequence(&self) -> u16;

    /// Packets sent so far (RTCP SR sender info).
    fn packet_count(&self) -> u32;

    /// RTP bytes sent so far (RTCP SR sender info).
    fn octet_count(&self) -> u32;
}

/// Codec-specific half of a media session: one track.
pub trait MediaSubsession: Send + Sync {
    fn payload_type(&self) -> u8;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// Nominal frames per second; `0` when unknown.
    fn fps(&self) -> u32;

    /// RTP timestamp increment per frame.
    fn timestamp_step(&self) -> u32 {
        match self.fps() {
            0 => DEFAULT_TIMESTAMP_STEP,
            fps => self.clock_rate() / fps,
        }
    }

    /// Delay between two paced frames.
    fn frame_interval(&self) -> Duration {
        match self.fps() {
            0 => DEFAULT_FRAME_INTERVAL,
            fps => Duration::from_nanos(1_000_000_000 / u64::from(fps)),
        }
    }

    /// SDP media section (`m=` line and its attributes) for this track.
    fn sdp_lines(&self, track_id: &str) -> Vec<String>;

    fn new_frame_source(&self, rng: &dyn RandomSource) -> Result<Box<dyn FrameSource>>;

    fn new_rtp_sink(&self, transport: MediaTransport, rng: &dyn RandomSource)
    -> Box<dyn RtpSink>;
}
