use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::media_session::MediaSessionRegistry;
use crate::protocol::{MethodHandler, RtspRequest};
use crate::random::RandomSource;
use crate::server::ServerConfig;

use super::Delivery;
use super::interleaved::{INTERLEAVED_HEADER_SIZE, INTERLEAVED_MAGIC, InterleavedHeader};

/// Largest request head accepted before the connection is dropped.
const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// Largest `Content-Length` accepted on a request.
const MAX_REQUEST_BODY: usize = 64 * 1024;

/// Frames queued for a connection's writer before new media is dropped.
pub const WRITE_QUEUE_CAPACITY: usize = 512;

const READ_BUFFER_SIZE: usize = 4096;

/// Accept RTSP clients until `shutdown` fires.
///
/// Each connection runs in its own task with a child token, so stopping the
/// server also ends every connection.
pub async fn accept_loop(
    listener: TcpListener,
    registry: MediaSessionRegistry,
    config: Arc<ServerConfig>,
    rng: Arc<dyn RandomSource>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let handler = MethodHandler::new(
                        registry.clone(),
                        peer_addr,
                        config.clone(),
                        rng.clone(),
                    );
                    tokio::spawn(Connection::handle(
                        stream,
                        peer_addr,
                        handler,
                        shutdown.child_token(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "TCP accept error"),
            },
        }
    }
    tracing::debug!("accept loop exited");
}

/// Non-owning handle for writing to an RTSP connection.
///
/// Responses and interleaved RTP/RTCP frames are queued to the
/// connection's writer task. The queue is bounded: when a client stops
/// reading, further frames are dropped instead of piling up. Once the
/// connection is gone every send fails with
/// [`RtspError::ConnectionClosed`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Bytes>,
    peer_addr: SocketAddr,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end its writer drains.
    pub fn channel(peer_addr: SocketAddr) -> (Self, mpsc::Receiver<Bytes>) {
        Self::with_capacity(peer_addr, WRITE_QUEUE_CAPACITY)
    }

    pub fn with_capacity(peer_addr: SocketAddr, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, peer_addr }, rx)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue `data` for the writer without waiting.
    pub fn send(&self, data: Bytes) -> Result<Delivery> {
        match self.tx.try_send(data) {
            Ok(()) => Ok(Delivery::Sent),
            Err(TrySendError::Full(data)) => {
                tracing::debug!(
                    peer = %self.peer_addr,
                    len = data.len(),
                    "write queue full, frame dropped"
                );
                Ok(Delivery::Dropped)
            }
            Err(TrySendError::Closed(_)) => Err(RtspError::ConnectionClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One unit read off an RTSP connection.
#[derive(Debug)]
pub enum Inbound {
    Request(RtspRequest),
    /// `$`-framed RTP or RTCP from the client.
    Interleaved { channel: u8, payload: Bytes },
}

/// Splits the byte stream of an RTSP connection into requests and
/// interleaved frames.
///
/// After a `$` header has been read the decoder remembers it and waits
/// for exactly `length` more bytes before returning to text parsing.
#[derive(Debug, Default)]
pub struct InboundDecoder {
    pending_frame: Option<InterleavedHeader>,
}

impl InboundDecoder {
    /// Take the next complete unit out of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Errors are
    /// connection-fatal.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Inbound>> {
        if let Some(header) = self.pending_frame {
            let len = header.length as usize;
            if buf.len() < len {
                return Ok(None);
            }
            self.pending_frame = None;
            return Ok(Some(Inbound::Interleaved {
                channel: header.channel,
                payload: buf.split_to(len).freeze(),
            }));
        }

        // Stray line breaks between messages.
        while matches!(buf.first(), Some(b'\r' | b'\n')) {
            buf.advance(1);
        }

        match buf.first() {
            None => Ok(None),
            Some(&INTERLEAVED_MAGIC) => {
                let Some(header) = InterleavedHeader::parse(buf) else {
                    return Ok(None);
                };
                buf.advance(INTERLEAVED_HEADER_SIZE);
                self.pending_frame = Some(header);
                self.decode(buf)
            }
            Some(_) => Self::decode_request(buf),
        }
    }

    fn decode_request(buf: &mut BytesMut) -> Result<Option<Inbound>> {
        let Some(head_len) = find_head_end(buf) else {
            if buf.len() > MAX_REQUEST_HEAD {
                return Err(RtspError::parse(ParseErrorKind::InvalidEncoding));
            }
            return Ok(None);
        };

        let head = std::str::from_utf8(&buf[..head_len])
            .map_err(|_| RtspError::parse(ParseErrorKind::InvalidEncoding))?;
        let request = RtspRequest::parse(head)?;

        let body_len = request
            .get_header("Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        if body_len > MAX_REQUEST_BODY {
            return Err(RtspError::parse(ParseErrorKind::BodyTooLarge));
        }
        if buf.len() < head_len + body_len {
            return Ok(None);
        }
        buf.advance(head_len + body_len);
        if body_len > 0 {
            tracing::trace!(body_len, method = %request.method, "request body skipped");
        }
        Ok(Some(Inbound::Request(request)))
    }
}

/// Length of the request head including its terminating blank line.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    reader: tokio::net::tcp::OwnedReadHalf,
    buf: BytesMut,
    decoder: InboundDecoder,
    handler: MethodHandler,
    connection: ConnectionHandle,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    async fn handle(
        stream: TcpStream,
        peer_addr: SocketAddr,
        mut handler: MethodHandler,
        shutdown: CancellationToken,
    ) {
        tracing::info!(%peer_addr, "client connected");

        let (reader, writer) = stream.into_split();
        let (connection, rx) = ConnectionHandle::channel(peer_addr);
        tokio::spawn(write_loop(writer, rx, peer_addr));
        handler.attach(connection.clone());

        let mut conn = Connection {
            reader,
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            decoder: InboundDecoder::default(),
            handler,
            connection,
            peer_addr,
        };

        let reason = conn.run(&shutdown).await;
        conn.handler.close();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// Request/response loop. Returns the reason for exiting.
    async fn run(&mut self, shutdown: &CancellationToken) -> &'static str {
        loop {
            loop {
                match self.decoder.decode(&mut self.buf) {
                    Ok(Some(Inbound::Request(request))) => {
                        if !self.respond(&request) {
                            return "write error";
                        }
                    }
                    Ok(Some(Inbound::Interleaved { channel, payload })) => {
                        self.handler.on_interleaved(channel, &payload);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(peer = %self.peer_addr, error = %e, "malformed request");
                        return "protocol error";
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return "server shutting down",
                read = self.reader.read_buf(&mut self.buf) => match read {
                    Ok(0) => return "connection closed by client",
                    Ok(_) => {}
                    Err(_) => return "read error",
                },
            }
        }
    }

    /// Queue the response. A full write queue means the client has stopped
    /// reading, so the connection is given up.
    fn respond(&mut self, request: &RtspRequest) -> bool {
        tracing::debug!(
            peer = %self.peer_addr,
            method = %request.method,
            uri = %request.uri,
            cseq = request.cseq,
            "request"
        );

        let response = self.handler.handle(request);

        tracing::debug!(
            peer = %self.peer_addr,
            status = response.status.code(),
            "response"
        );

        matches!(
            self.connection.send(Bytes::from(response.serialize())),
            Ok(Delivery::Sent)
        )
    }
}

/// Drain queued responses and frames onto the socket.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    peer_addr: SocketAddr,
) {
    while let Some(data) = rx.recv().await {
        if let Err(e) = writer.write_all(&data).await {
            tracing::debug!(%peer_addr, error = %e, "write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
