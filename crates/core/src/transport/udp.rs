use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RtspError};
use crate::random::RandomSource;

/// Lowest port handed out for RTP.
pub const MIN_RTP_PORT: u16 = 1024;

/// Highest (even) port handed out for RTP; RTCP takes the next one.
pub const MAX_RTP_PORT: u16 = 65534;

/// Largest datagram read from a client.
const RECV_BUFFER_SIZE: usize = 2048;

/// An RTP socket on an even port and its RTCP sibling on `port + 1`.
#[derive(Debug, Clone)]
pub struct UdpPair {
    pub rtp: Arc<UdpSocket>,
    pub rtcp: Arc<UdpSocket>,
}

impl UdpPair {
    /// Probe random even ports until both sockets bind.
    ///
    /// Gives up with [`RtspError::PortRangeExhausted`] after
    /// `max_attempts` tries.
    pub fn bind_random(
        ip: IpAddr,
        rng: &dyn RandomSource,
        max_attempts: usize,
    ) -> Result<Self> {
        for attempt in 1..=max_attempts {
            let port = random_even_port(rng);
            match Self::bind(ip, port) {
                Ok(pair) => {
                    tracing::debug!(rtp_port = port, attempt, "bound RTP/RTCP port pair");
                    return Ok(pair);
                }
                Err(e) => {
                    tracing::trace!(rtp_port = port, attempt, error = %e, "port pair unavailable");
                }
            }
        }
        Err(RtspError::PortRangeExhausted {
            attempts: max_attempts,
        })
    }

    /// Bind `rtp_port` and `rtp_port + 1` on `ip`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(ip: IpAddr, rtp_port: u16) -> io::Result<Self> {
        let rtcp_port = rtp_port
            .checked_add(1)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no room for RTCP port"))?;
        let rtp = bind_socket(SocketAddr::new(ip, rtp_port))?;
        let rtcp = bind_socket(SocketAddr::new(ip, rtcp_port))?;
        Ok(Self {
            rtp: Arc::new(rtp),
            rtcp: Arc::new(rtcp),
        })
    }

    pub fn rtp_port(&self) -> u16 {
        self.rtp.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn rtcp_port(&self) -> u16 {
        self.rtcp.local_addr().map(|a| a.port()).unwrap_or(0)
    }
}

fn bind_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = std::net::UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}

/// Uniformly pick an even port in `MIN_RTP_PORT..=MAX_RTP_PORT`.
fn random_even_port(rng: &dyn RandomSource) -> u16 {
    let slots = u32::from((MAX_RTP_PORT - MIN_RTP_PORT) / 2 + 1);
    let slot = (rng.next_u32() % slots) as u16;
    MIN_RTP_PORT + slot * 2
}

/// Wildcard address in the same family as `peer`.
pub fn unspecified_for(peer: IpAddr) -> IpAddr {
    match peer {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Read datagrams from `socket` and hand each to `on_packet` until
/// `cancel` fires.
pub async fn recv_loop<F>(socket: Arc<UdpSocket>, cancel: CancellationToken, mut on_packet: F)
where
    F: FnMut(&[u8], SocketAddr),
{
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => on_packet(&buf[..len], from),
                Err(e) => {
                    // ICMP port unreachable surfaces here on some platforms.
                    tracing::trace!(error = %e, "UDP receive error");
                }
            },
        }
    }
}
