use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RtspError};
use crate::media_session::{MediaSession, MediaSessionRegistry};
use crate::random::{RandomSource, ThreadRandom};
use crate::session::DEFAULT_SESSION_TIMEOUT_SECS;
use crate::transport::tcp;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8554";

/// Default cap on random UDP port probes per SETUP.
pub const DEFAULT_MAX_PORT_ATTEMPTS: usize = 64;

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the RTSP listener binds to.
    pub bind_addr: String,
    /// Public host advertised in the SDP `o=` line.
    /// When `None`, the host is taken from the request URL if it is an IP
    /// address.
    pub public_host: Option<String>,
    /// SDP session name (`s=`).
    pub session_name: String,
    /// Advertised in the `Session` header.
    pub session_timeout_secs: u64,
    /// Random even-port probes before SETUP gives up with 500.
    pub max_port_attempts: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            public_host: None,
            session_name: "rtsp-file-server".to_string(),
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            max_port_attempts: DEFAULT_MAX_PORT_ATTEMPTS,
        }
    }
}

/// High-level RTSP server orchestrator.
///
/// Owns the media session registry and the listener lifecycle. Connection
/// handling lives in [`transport::tcp`](crate::transport::tcp); media
/// delivery runs in per-track play tasks.
pub struct Server {
    config: Arc<ServerConfig>,
    registry: MediaSessionRegistry,
    rng: Arc<dyn RandomSource>,
    shutdown: Option<CancellationToken>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(ServerConfig {
            bind_addr: bind_addr.to_string(),
            ..ServerConfig::default()
        })
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: MediaSessionRegistry::new(),
            rng: Arc::new(ThreadRandom),
            shutdown: None,
            local_addr: None,
        }
    }

    /// Replace the randomness used for session ids, SSRCs, sequence
    /// numbers and port probing.
    pub fn with_random(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    /// Register a media session. Can be called before or after `start`.
    pub fn add_media_session(&self, session: MediaSession) -> Arc<MediaSession> {
        self.registry.add(session)
    }

    pub fn registry(&self) -> &MediaSessionRegistry {
        &self.registry
    }

    /// Bind the listener and start accepting clients in a background task.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when binding port 0.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        tracing::info!(
            addr = %local_addr,
            media_sessions = self.registry.len(),
            "RTSP server listening"
        );

        tokio::spawn(tcp::accept_loop(
            listener,
            self.registry.clone(),
            self.config.clone(),
            self.rng.clone(),
            shutdown.clone(),
        ));

        self.shutdown = Some(shutdown);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stop accepting clients and close every connection.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
            tracing::info!("server stopping");
        }
        self.local_addr = None;
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.local_addr.ok_or(RtspError::NotStarted)
    }

    /// Returns the server's protocol configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
