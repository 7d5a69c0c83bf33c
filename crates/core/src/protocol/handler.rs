use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::error::RtspError;
use crate::media_session::{MediaSession, MediaSessionRegistry};
use crate::protocol::request::{RtspMethod, RtspRequest};
use crate::protocol::response::{RtspResponse, StatusCode};
use crate::protocol::sdp;
use crate::random::RandomSource;
use crate::server::ServerConfig;
use crate::session::transport::TransportHeader;
use crate::session::{BindingKey, RtspSession};
use crate::transport::ConnectionHandle;

/// Methods advertised in the OPTIONS reply.
pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, TEARDOWN, PLAY";

/// Handles RTSP method requests for a single TCP connection.
///
/// Owns the connection's RTSP session, so closing the connection tears it
/// down.
pub struct MethodHandler {
    registry: MediaSessionRegistry,
    client_addr: SocketAddr,
    config: Arc<ServerConfig>,
    rng: Arc<dyn RandomSource>,
    /// Writer for interleaved media; set once the connection task starts.
    connection: Option<ConnectionHandle>,
    /// Media session picked by OPTIONS, DESCRIBE or SETUP.
    media_session: Option<Arc<MediaSession>>,
    session: Option<RtspSession>,
}

impl MethodHandler {
    pub fn new(
        registry: MediaSessionRegistry,
        client_addr: SocketAddr,
        config: Arc<ServerConfig>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        MethodHandler {
            registry,
            client_addr,
            config,
            rng,
            connection: None,
            media_session: None,
            session: None,
        }
    }

    pub fn attach(&mut self, connection: ConnectionHandle) {
        self.connection = Some(connection);
    }

    pub fn session(&self) -> Option<&RtspSession> {
        self.session.as_ref()
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;

        match request.method {
            RtspMethod::Options => self.handle_options(request),
            RtspMethod::Describe => self.handle_describe(request),
            RtspMethod::Setup => self.handle_setup(request),
            RtspMethod::Play => self.handle_play(request),
            RtspMethod::Teardown => self.handle_teardown(request),
            RtspMethod::Pause
            | RtspMethod::Record
            | RtspMethod::Announce
            | RtspMethod::Redirect
            | RtspMethod::GetParameter
            | RtspMethod::SetParameter => {
                tracing::debug!(method = %request.method, cseq, "method not allowed");
                RtspResponse::new(StatusCode::MethodNotAllowed)
                    .with_cseq(cseq)
                    .add_header("Allow", PUBLIC_METHODS)
            }
        }
    }

    /// Route an interleaved frame from the client through the session's
    /// channel bindings.
    pub fn on_interleaved(&self, channel: u8, payload: &[u8]) {
        match &self.session {
            Some(session) => session
                .bindings()
                .dispatch(BindingKey::Channel(channel), payload),
            None => tracing::trace!(channel, "interleaved frame without a session"),
        }
    }

    /// Tear down the session, if any. Called when the connection ends.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            tracing::info!(
                session_id = session.id(),
                client = %self.client_addr,
                "session cleaned up on disconnect"
            );
            session.teardown();
        }
    }

    /// Look up the media session named by the request URL and remember it.
    fn select_media_session(&mut self, request: &RtspRequest) -> Option<Arc<MediaSession>> {
        let (session, _) = self.registry.resolve(&request.url.path)?;
        self.media_session = Some(session.clone());
        Some(session)
    }

    fn handle_options(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;
        if self.select_media_session(request).is_none() {
            tracing::warn!(path = %request.url.path, "OPTIONS for unknown media session");
            return RtspResponse::new(StatusCode::NotAcceptable).with_cseq(cseq);
        }
        RtspResponse::ok()
            .with_cseq(cseq)
            .add_header("Public", PUBLIC_METHODS)
    }

    /// Host for the SDP origin line: the configured public host, the URL
    /// host if it is an IP literal, or the wildcard address.
    fn sdp_host(&self, request: &RtspRequest) -> String {
        if let Some(host) = &self.config.public_host {
            return host.clone();
        }
        match request.url.host.parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => "0.0.0.0".to_string(),
        }
    }

    fn handle_describe(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;

        let accepts_sdp = request.get_header("Accept").is_some_and(|accept| {
            accept
                .split(',')
                .filter_map(|ty| ty.split(';').next())
                .any(|ty| ty.trim().eq_ignore_ascii_case("application/sdp"))
        });
        if !accepts_sdp {
            tracing::warn!(accept = ?request.get_header("Accept"), "DESCRIBE without application/sdp");
            return RtspResponse::new(StatusCode::UnsupportedMediaType).with_cseq(cseq);
        }

        let Some(media_session) = self.select_media_session(request) else {
            tracing::warn!(path = %request.url.path, "DESCRIBE for unknown media session");
            return RtspResponse::not_found().with_cseq(cseq);
        };

        let sdp = sdp::generate_sdp(
            &media_session,
            &self.sdp_host(request),
            &self.config.session_name,
            sdp::unix_time_now(),
        );

        let mut base = request.uri.clone();
        if !base.ends_with('/') {
            base.push('/');
        }

        RtspResponse::ok()
            .with_cseq(cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &base)
            .with_body(sdp)
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;

        let Some((media_session, track)) = self.registry.resolve(&request.url.path) else {
            tracing::warn!(path = %request.url.path, "SETUP for unknown media session");
            return RtspResponse::not_found().with_cseq(cseq);
        };
        if let Some(active) = &self.media_session
            && !Arc::ptr_eq(active, &media_session)
        {
            tracing::debug!(
                from = active.name(),
                to = media_session.name(),
                "SETUP switches media session"
            );
        }
        self.media_session = Some(media_session.clone());

        let Some(subsession) = track
            .as_deref()
            .and_then(|track| media_session.subsession(track))
        else {
            tracing::warn!(path = %request.url.path, "SETUP for unknown track");
            return RtspResponse::not_found().with_cseq(cseq);
        };
        let track_id = track.unwrap_or_default();

        let Some(transport) = request
            .get_header("Transport")
            .and_then(TransportHeader::parse)
        else {
            tracing::warn!(transport = ?request.get_header("Transport"), "SETUP with unsupported transport");
            return RtspResponse::new(StatusCode::UnsupportedTransport).with_cseq(cseq);
        };

        let session = self.session.get_or_insert_with(|| {
            RtspSession::new(self.rng.as_ref(), self.config.session_timeout_secs)
        });

        let result = match transport {
            TransportHeader::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => session
                .setup_udp(
                    &track_id,
                    subsession,
                    self.client_addr.ip(),
                    client_rtp_port,
                    client_rtcp_port,
                    self.rng.as_ref(),
                    self.config.max_port_attempts,
                )
                .map(|ports| Some((ports.rtp, ports.rtcp))),
            TransportHeader::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => match &self.connection {
                Some(connection) => session
                    .setup_interleaved(
                        &track_id,
                        subsession,
                        connection.clone(),
                        rtp_channel,
                        rtcp_channel,
                        self.rng.as_ref(),
                    )
                    .map(|()| None),
                None => Err(RtspError::ConnectionClosed),
            },
        };

        match result {
            Ok(server_ports) => {
                tracing::info!(
                    session_id = session.id(),
                    media_session = media_session.name(),
                    track = %track_id,
                    "track set up"
                );
                RtspResponse::ok()
                    .with_cseq(cseq)
                    .add_header("Transport", &transport.response_value(server_ports))
                    .add_header("Session", &session.session_header_value())
            }
            Err(e @ RtspError::PortRangeExhausted { .. }) => {
                tracing::error!(error = %e, "failed to bind RTP/RTCP ports");
                RtspResponse::new(StatusCode::InternalServerError).with_cseq(cseq)
            }
            Err(e) => {
                tracing::error!(error = %e, track = %track_id, "SETUP failed");
                RtspResponse::new(StatusCode::InternalServerError).with_cseq(cseq)
            }
        }
    }

    /// The connection's session, if the request's `Session` header (when
    /// present) names it.
    fn current_session(&self, request: &RtspRequest) -> Option<&RtspSession> {
        let session = self.session.as_ref()?;
        match request.get_header("Session") {
            Some(value) if !session.matches_header(value) => None,
            _ => Some(session),
        }
    }

    fn handle_play(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;
        let Some(session) = self.current_session(request) else {
            tracing::warn!(session = ?request.get_header("Session"), "PLAY for unknown session");
            return RtspResponse::new(StatusCode::SessionNotFound).with_cseq(cseq);
        };

        let started = session.play();
        tracing::info!(session_id = session.id(), tracks = started.len(), "session playing");

        let base = request.uri.trim_end_matches('/');
        let rtp_info = started
            .iter()
            .map(|(track, info)| {
                format!(
                    "url={base}/{track};seq={};rtptime={}",
                    info.sequence, info.timestamp
                )
            })
            .collect::<Vec<_>>()
            .join(",");

        let mut response = RtspResponse::ok()
            .with_cseq(cseq)
            .add_header("Range", "npt=0.000-")
            .add_header("Session", &session.session_header_value());
        if !rtp_info.is_empty() {
            response = response.add_header("RTP-Info", &rtp_info);
        }
        response
    }

    fn handle_teardown(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq;
        if self.current_session(request).is_none() {
            tracing::warn!(session = ?request.get_header("Session"), "TEARDOWN for unknown session");
            return RtspResponse::new(StatusCode::SessionNotFound).with_cseq(cseq);
        }
        if let Some(mut session) = self.session.take() {
            tracing::info!(session_id = session.id(), "session terminated via TEARDOWN");
            session.teardown();
        }
        RtspResponse::ok().with_cseq(cseq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::h264::H264FileSubsession;
    use crate::random::SeededRandom;
    use crate::session::StreamPhase;
    use std::io::Write;

    struct Fixture {
        _file: tempfile::NamedTempFile,
        handler: MethodHandler,
        _rx: tokio::sync::mpsc::Receiver<bytes::Bytes>,
    }

    fn fixture() -> Fixture {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e, 0, 0, 0, 1, 0x65, 0x88])
            .unwrap();
        file.flush().unwrap();

        let registry = MediaSessionRegistry::new();
        let mut live = MediaSession::new("live");
        live.add_subsession(Arc::new(
            H264FileSubsession::open(file.path(), 25, 90_000).unwrap(),
        ));
        registry.add(live);

        let client: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let mut handler = MethodHandler::new(
            registry,
            client,
            Arc::new(ServerConfig::default()),
            Arc::new(SeededRandom::new(11)),
        );
        let (connection, rx) = ConnectionHandle::channel(client);
        handler.attach(connection);
        Fixture {
            _file: file,
            handler,
            _rx: rx,
        }
    }

    fn request(method: &str, path: &str, cseq: u32, headers: &[(&str, &str)]) -> RtspRequest {
        let mut raw = format!("{method} rtsp://127.0.0.1:8554/{path} RTSP/1.0\r\nCSeq: {cseq}\r\n");
        for (name, value) in headers {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        raw.push_str("\r\n");
        RtspRequest::parse(&raw).unwrap()
    }

    #[test]
    fn options_known_and_unknown() {
        let mut f = fixture();
        let resp = f.handler.handle(&request("OPTIONS", "live", 1, &[]));
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(resp.get_header("CSeq"), Some("1"));
        assert_eq!(resp.get_header("Public"), Some(PUBLIC_METHODS));

        let resp = f.handler.handle(&request("OPTIONS", "nope", 2, &[]));
        assert_eq!(resp.status, StatusCode::NotAcceptable);
    }

    #[test]
    fn describe_requires_sdp() {
        let mut f = fixture();
        let resp = f.handler.handle(&request("DESCRIBE", "live", 2, &[]));
        assert_eq!(resp.status, StatusCode::UnsupportedMediaType);

        let accept = [("Accept", "application/sdp")];
        let resp = f.handler.handle(&request("DESCRIBE", "nope", 3, &accept));
        assert_eq!(resp.status, StatusCode::NotFound);

        let resp = f.handler.handle(&request(
            "DESCRIBE",
            "live",
            4,
            &[("Accept", "application/rtsl, application/sdp")],
        ));
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(resp.get_header("Content-Type"), Some("application/sdp"));
        assert_eq!(
            resp.get_header("Content-Base"),
            Some("rtsp://127.0.0.1:8554/live/")
        );
        let body = resp.body.as_deref().unwrap();
        assert!(body.contains("o=- "));
        assert!(body.contains(" 1 IN IP4 127.0.0.1\r\n"));
        assert!(body.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(body.contains("a=control:track0\r\n"));
        assert!(resp.serialize().contains(&format!("Content-Length: {}\r\n", body.len())));
    }

    #[test]
    fn describe_over_ipv6_url() {
        let mut f = fixture();
        let raw = "DESCRIBE rtsp://[::1]:8554/live RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n";
        let resp = f.handler.handle(&RtspRequest::parse(raw).unwrap());
        assert_eq!(resp.status, StatusCode::Ok);
        assert!(resp.body.as_deref().unwrap().contains(" 1 IN IP6 ::1\r\n"));
    }

    #[test]
    fn setup_rejections() {
        let mut f = fixture();
        let tcp = [("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")];
        assert_eq!(
            f.handler.handle(&request("SETUP", "live/track5", 3, &tcp)).status,
            StatusCode::NotFound
        );
        assert_eq!(
            f.handler.handle(&request("SETUP", "other/track0", 3, &tcp)).status,
            StatusCode::NotFound
        );
        assert_eq!(
            f.handler.handle(&request("SETUP", "live/track0", 3, &[])).status,
            StatusCode::UnsupportedTransport
        );
        assert_eq!(
            f.handler
                .handle(&request(
                    "SETUP",
                    "live/track0",
                    3,
                    &[("Transport", "RTP/AVP;multicast")]
                ))
                .status,
            StatusCode::UnsupportedTransport
        );
        assert!(f.handler.session().is_none());
    }

    #[tokio::test]
    async fn setup_play_teardown_interleaved() {
        let mut f = fixture();
        let tcp = [("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")];
        let resp = f.handler.handle(&request("SETUP", "live/track0", 3, &tcp));
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(
            resp.get_header("Transport"),
            Some("RTP/AVP/TCP;unicast;interleaved=0-1")
        );
        let session_header = resp.get_header("Session").unwrap().to_string();
        let id = session_header.split(';').next().unwrap().to_string();
        assert!(session_header.ends_with(";timeout=60"));
        assert!(id.parse::<u32>().unwrap() <= 0x00ff_ffff);

        let resp = f
            .handler
            .handle(&request("PLAY", "live", 4, &[("Session", "999999999")]));
        assert_eq!(resp.status, StatusCode::SessionNotFound);

        let resp = f.handler.handle(&request("PLAY", "live", 5, &[("Session", id.as_str())]));
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(resp.get_header("Range"), Some("npt=0.000-"));
        assert_eq!(resp.get_header("Session"), Some(session_header.as_str()));
        let rtp_info = resp.get_header("RTP-Info").unwrap();
        assert!(rtp_info.starts_with("url=rtsp://127.0.0.1:8554/live/track0;seq="));

        let stream = f.handler.session().unwrap().stream("track0").unwrap().clone();
        assert_eq!(stream.phase(), StreamPhase::Playing);

        let resp = f.handler.handle(&request("TEARDOWN", "live", 6, &[("Session", id.as_str())]));
        assert_eq!(resp.status, StatusCode::Ok);
        assert_eq!(stream.phase(), StreamPhase::TornDown);
        assert!(f.handler.session().is_none());

        let resp = f.handler.handle(&request("TEARDOWN", "live", 7, &[]));
        assert_eq!(resp.status, StatusCode::SessionNotFound);
        let resp = f.handler.handle(&request("PLAY", "live", 8, &[]));
        assert_eq!(resp.status, StatusCode::SessionNotFound);
    }

    #[tokio::test]
    async fn setup_udp_reports_server_ports() {
        let mut f = fixture();
        let udp = [("Transport", "RTP/AVP;unicast;client_port=50000-50001")];
        let resp = f.handler.handle(&request("SETUP", "live/track0", 3, &udp));
        assert_eq!(resp.status, StatusCode::Ok);

        let transport = resp.get_header("Transport").unwrap();
        let ports = transport
            .strip_prefix("RTP/AVP;unicast;client_port=50000-50001;server_port=")
            .unwrap();
        let (rtp, rtcp) = ports.split_once('-').unwrap();
        let rtp: u16 = rtp.parse().unwrap();
        let rtcp: u16 = rtcp.parse().unwrap();
        assert_eq!(rtp % 2, 0);
        assert_eq!(rtcp, rtp + 1);

        f.handler.close();
        assert!(f.handler.session().is_none());
    }

    #[test]
    fn unsupported_methods_get_405() {
        let mut f = fixture();
        for method in ["PAUSE", "GET_PARAMETER", "SET_PARAMETER", "RECORD", "ANNOUNCE", "REDIRECT"] {
            let resp = f.handler.handle(&request(method, "live", 9, &[]));
            assert_eq!(resp.status, StatusCode::MethodNotAllowed, "{method}");
            assert_eq!(resp.get_header("CSeq"), Some("9"));
        }
    }
}
