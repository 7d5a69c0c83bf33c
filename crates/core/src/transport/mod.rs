//! Network transport for RTSP signaling and RTP/RTCP media.
//!
//! - **TCP** ([`tcp`]): one task per RTSP connection. The same stream also
//!   carries `$`-framed RTP/RTCP when the client negotiates
//!   `RTP/AVP/TCP` ([`interleaved`]).
//! - **UDP** ([`udp`]): a bound RTP/RTCP port pair per SETUP'd track,
//!   probed at random even ports.
//!
//! [`MediaTransport`] hides the difference from the RTP sink and the RTCP
//! sender: both just hand it finished packets.

pub mod interleaved;
pub mod tcp;
pub mod udp;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::error::{Result, RtspError};
use crate::media::nal::PrependBuffer;

pub use interleaved::{INTERLEAVED_HEADER_SIZE, InterleavedHeader};
pub use tcp::ConnectionHandle;
pub use udp::UdpPair;

/// Fate of a packet handed to a transport.
///
/// A packet is `Dropped` when the socket or the connection's write queue
/// has no room. The RTP sink leaves dropped packets out of its sender
/// report totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped,
}

/// Where a track's RTP or RTCP packets go.
///
/// A value is bound to exactly one of the two transports.
#[derive(Debug, Clone)]
pub enum MediaTransport {
    /// `$`-framed on the RTSP connection.
    Interleaved {
        connection: ConnectionHandle,
        channel: u8,
    },
    /// Datagrams from a bound server port to the client's port.
    Udp {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
}

impl MediaTransport {
    /// Send the packet held in `buf`, writing any framing into its headroom.
    pub fn send_prepended(&self, buf: &mut PrependBuffer) -> Result<Delivery> {
        match self {
            Self::Interleaved {
                connection,
                channel,
            } => {
                let header = InterleavedHeader::new(*channel, frame_length(buf.len())?);
                if !buf.prepend(&header.to_bytes()) {
                    return Err(RtspError::Io(io::Error::other(
                        "no headroom for interleave marker",
                    )));
                }
                connection.send(Bytes::copy_from_slice(buf.as_slice()))
            }
            Self::Udp { socket, peer } => send_datagram(socket, *peer, buf.as_slice()),
        }
    }

    /// Send a finished packet, framing it with a copy if needed.
    pub fn send_packet(&self, packet: &[u8]) -> Result<Delivery> {
        match self {
            Self::Interleaved {
                connection,
                channel,
            } => {
                let header = InterleavedHeader::new(*channel, frame_length(packet.len())?);
                let mut frame = Vec::with_capacity(header.frame_len());
                frame.extend_from_slice(&header.to_bytes());
                frame.extend_from_slice(packet);
                connection.send(Bytes::from(frame))
            }
            Self::Udp { socket, peer } => send_datagram(socket, *peer, packet),
        }
    }
}

fn frame_length(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| {
        RtspError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "packet too large for interleaved frame",
        ))
    })
}

fn send_datagram(socket: &UdpSocket, peer: SocketAddr, data: &[u8]) -> Result<Delivery> {
    match socket.try_send_to(data, peer) {
        Ok(_) => Ok(Delivery::Sent),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            tracing::trace!(%peer, len = data.len(), "UDP socket busy, packet dropped");
            Ok(Delivery::Dropped)
        }
        Err(e) => Err(e.into()),
    }
}
