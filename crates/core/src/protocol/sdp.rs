//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- <unix-time> 1 IN IP4 <addr>              ← origin (IP6 for v6)
//! s=<session-name>                             ← session name
//! t=0 0                                        ← timing (unbounded)
//! a=control:*                                  ← aggregate control
//! a=range:npt=now-                             ← open-ended range
//! m=video 0 RTP/AVP 96                         ← one section per track
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1;...
//! a=framerate:25
//! a=control:track0
//! ```
//!
//! The media sections come from each track's
//! [`MediaSubsession::sdp_lines`](crate::media::MediaSubsession::sdp_lines).

use std::net::Ipv6Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::media_session::MediaSession;

/// Generate an SDP session description for `session`.
///
/// `ip` is an address literal or host name; IPv6 literals are tagged `IP6`.
pub fn generate_sdp(session: &MediaSession, ip: &str, session_name: &str, unix_time: u64) -> String {
    let addr_type = if ip.parse::<Ipv6Addr>().is_ok() { "IP6" } else { "IP4" };
    let mut sdp: Vec<String> = vec![
        "v=0".to_string(),
        format!("o=- {unix_time} 1 IN {addr_type} {ip}"),
        format!("s={session_name}"),
        "t=0 0".to_string(),
        "a=control:*".to_string(),
        "a=range:npt=now-".to_string(),
    ];
    for (track_id, subsession) in session.tracks() {
        sdp.extend(subsession.sdp_lines(track_id));
    }

    tracing::trace!(session = session.name(), "SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

/// Seconds since the Unix epoch, for the origin line.
pub fn unix_time_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
