//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! An RTSP session is created by the first SETUP on a connection and lives
//! until TEARDOWN or disconnect. It holds:
//!
//! - A numeric session id (random 24 bits, decimal in the `Session` header).
//! - One [`StreamState`] per SETUP'd track, in SETUP order.
//! - The binding table that routes inbound UDP ports and interleaved
//!   channels to a track's RTP or RTCP handler.
//! - A parent [`CancellationToken`]; every stream gets a child token.
//!
//! ## Stream lifecycle
//!
//! ```text
//! SETUP          -> Idle -> Bound
//! PLAY           -> Playing
//! TEARDOWN       -> TornDown
//! TCP disconnect -> TornDown (via cleanup)
//! ```

pub mod stream;
pub mod transport;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::media::MediaSubsession;
use crate::random::RandomSource;
use crate::transport::udp::{self, UdpPair};
use crate::transport::{ConnectionHandle, MediaTransport};

pub use stream::{RtpInfo, StreamPhase, StreamState, StreamStats};
pub use transport::TransportHeader;

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Where an inbound packet arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKey {
    /// Local UDP port.
    Port(u16),
    /// Interleaved channel on the RTSP connection.
    Channel(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Rtp,
    Rtcp,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub kind: PacketKind,
    pub stream: Arc<StreamState>,
}

/// Routes inbound packets to streams.
///
/// Shared with the UDP receive tasks, hence the `Arc<RwLock<_>>`.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    bindings: Arc<RwLock<HashMap<BindingKey, Binding>>>,
}

impl BindingTable {
    pub fn insert(&self, key: BindingKey, kind: PacketKind, stream: Arc<StreamState>) {
        self.bindings.write().insert(key, Binding { kind, stream });
    }

    pub fn get(&self, key: BindingKey) -> Option<Binding> {
        self.bindings.read().get(&key).cloned()
    }

    /// Drop every binding that points at `stream`.
    pub fn remove_stream(&self, stream: &Arc<StreamState>) {
        self.bindings
            .write()
            .retain(|_, binding| !Arc::ptr_eq(&binding.stream, stream));
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Deliver one inbound packet. RTP from clients is not expected and is
    /// dropped.
    pub fn dispatch(&self, key: BindingKey, data: &[u8]) {
        match self.get(key) {
            Some(Binding {
                kind: PacketKind::Rtcp,
                stream,
            }) => stream.handle_rtcp(data),
            Some(Binding {
                kind: PacketKind::Rtp,
                stream,
            }) => {
                tracing::trace!(?key, track = stream.track_id(), len = data.len(), "inbound RTP discarded");
            }
            None => tracing::trace!(?key, len = data.len(), "packet for unbound port or channel"),
        }
    }
}

/// Result of a UDP SETUP: the bound server port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPorts {
    pub rtp: u16,
    pub rtcp: u16,
}

/// A single RTSP session (RFC 2326 §3).
#[derive(Debug)]
pub struct RtspSession {
    id: String,
    timeout_secs: u64,
    streams: IndexMap<String, Arc<StreamState>>,
    bindings: BindingTable,
    cancel: CancellationToken,
}

impl RtspSession {
    pub fn new(rng: &dyn RandomSource, timeout_secs: u64) -> Self {
        let id = (rng.next_u32() & 0x00ff_ffff).to_string();
        tracing::debug!(session_id = %id, "session created");
        Self {
            id,
            timeout_secs,
            streams: IndexMap::new(),
            bindings: BindingTable::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    ///
    /// Example: `"4711;timeout=60"`
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }

    /// Whether a client's `Session` header refers to this session.
    ///
    /// Parameters after `;` are ignored.
    pub fn matches_header(&self, value: &str) -> bool {
        value.split(';').next().map(str::trim) == Some(self.id.as_str())
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn stream(&self, track_id: &str) -> Option<&Arc<StreamState>> {
        self.streams.get(track_id)
    }

    pub fn streams(&self) -> impl Iterator<Item = &Arc<StreamState>> {
        self.streams.values()
    }

    /// Bind a UDP port pair for `track_id` and stream to the client's
    /// `client_rtp`/`client_rtcp` ports.
    ///
    /// Must be called from within a tokio runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn setup_udp(
        &mut self,
        track_id: &str,
        subsession: Arc<dyn MediaSubsession>,
        client_ip: IpAddr,
        client_rtp: u16,
        client_rtcp: u16,
        rng: &dyn RandomSource,
        max_port_attempts: usize,
    ) -> Result<ServerPorts> {
        let pair = UdpPair::bind_random(udp::unspecified_for(client_ip), rng, max_port_attempts)?;
        let ports = ServerPorts {
            rtp: pair.rtp_port(),
            rtcp: pair.rtcp_port(),
        };

        let stream = self.new_stream(track_id, subsession);
        stream.bind(
            MediaTransport::Udp {
                socket: pair.rtp.clone(),
                peer: SocketAddr::new(client_ip, client_rtp),
            },
            MediaTransport::Udp {
                socket: pair.rtcp.clone(),
                peer: SocketAddr::new(client_ip, client_rtcp),
            },
            rng,
        )?;
        self.retire_stream(track_id);

        self.bindings
            .insert(BindingKey::Port(ports.rtp), PacketKind::Rtp, stream.clone());
        self.bindings
            .insert(BindingKey::Port(ports.rtcp), PacketKind::Rtcp, stream.clone());
        self.spawn_receiver(pair.rtp, BindingKey::Port(ports.rtp), &stream);
        self.spawn_receiver(pair.rtcp, BindingKey::Port(ports.rtcp), &stream);

        tracing::info!(
            session_id = %self.id,
            track = track_id,
            client = %client_ip,
            client_rtp,
            server_rtp = ports.rtp,
            "UDP transport configured"
        );
        self.streams.insert(track_id.to_string(), stream);
        Ok(ports)
    }

    /// Stream `track_id` as `$` frames on the RTSP connection.
    pub fn setup_interleaved(
        &mut self,
        track_id: &str,
        subsession: Arc<dyn MediaSubsession>,
        connection: ConnectionHandle,
        rtp_channel: u8,
        rtcp_channel: u8,
        rng: &dyn RandomSource,
    ) -> Result<()> {
        let stream = self.new_stream(track_id, subsession);
        stream.bind(
            MediaTransport::Interleaved {
                connection: connection.clone(),
                channel: rtp_channel,
            },
            MediaTransport::Interleaved {
                connection,
                channel: rtcp_channel,
            },
            rng,
        )?;
        self.retire_stream(track_id);

        self.bindings.insert(
            BindingKey::Channel(rtp_channel),
            PacketKind::Rtp,
            stream.clone(),
        );
        self.bindings.insert(
            BindingKey::Channel(rtcp_channel),
            PacketKind::Rtcp,
            stream.clone(),
        );

        tracing::info!(
            session_id = %self.id,
            track = track_id,
            rtp_channel,
            rtcp_channel,
            "interleaved transport configured"
        );
        self.streams.insert(track_id.to_string(), stream);
        Ok(())
    }

    fn new_stream(&self, track_id: &str, subsession: Arc<dyn MediaSubsession>) -> Arc<StreamState> {
        Arc::new(StreamState::new(
            track_id,
            subsession,
            self.cancel.child_token(),
        ))
    }

    /// Stop an earlier SETUP of `track_id` once its replacement is bound.
    ///
    /// The entry stays in the map so the replacement keeps its position.
    fn retire_stream(&mut self, track_id: &str) {
        if let Some(old) = self.streams.get(track_id) {
            tracing::debug!(session_id = %self.id, track = track_id, "replacing earlier SETUP");
            old.teardown();
            self.bindings.remove_stream(old);
        }
    }

    fn spawn_receiver(
        &self,
        socket: Arc<tokio::net::UdpSocket>,
        key: BindingKey,
        stream: &StreamState,
    ) {
        let bindings = self.bindings.clone();
        tokio::spawn(udp::recv_loop(
            socket,
            stream.cancel_token().clone(),
            move |data, _from| bindings.dispatch(key, data),
        ));
    }

    /// Start every bound stream. Returns `(track_id, RtpInfo)` for each
    /// stream that is playing.
    pub fn play(&self) -> Vec<(String, RtpInfo)> {
        let started: Vec<_> = self
            .streams
            .iter()
            .filter_map(|(track, stream)| stream.play().map(|info| (track.clone(), info)))
            .collect();
        tracing::debug!(session_id = %self.id, tracks = started.len(), "session playing");
        started
    }

    /// Stop all streams and release their bindings.
    pub fn teardown(&mut self) {
        for stream in self.streams.values() {
            stream.teardown();
        }
        self.cancel.cancel();
        self.streams.clear();
        self.bindings.bindings.write().clear();
        tracing::debug!(session_id = %self.id, "session torn down");
    }
}

impl Drop for RtspSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
