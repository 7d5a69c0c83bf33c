//! Error types for the RTSP file server.

use std::fmt;

/// Errors that can occur while serving RTSP clients.
///
/// Variants map to the failure classes of the server:
///
/// - **Protocol**: [`Parse`](Self::Parse), malformed RTSP messages. These
///   close the offending connection without a response.
/// - **Media**: [`Nal`](Self::Nal), reading the H.264 file.
/// - **Transport**: [`Io`](Self::Io),
///   [`PortRangeExhausted`](Self::PortRangeExhausted),
///   [`ConnectionClosed`](Self::ConnectionClosed).
/// - **Server**: [`AlreadyRunning`](Self::AlreadyRunning),
///   [`NotStarted`](Self::NotStarted).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Random RTP/RTCP port probing gave up after the configured attempts.
    #[error("no free RTP/RTCP port pair after {attempts} attempts")]
    PortRangeExhausted { attempts: usize },

    /// The RTSP connection behind a sink or RTCP channel has gone away.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to read H.264 data from a frame source.
    #[error("NAL extraction failed: {0}")]
    Nal(#[from] NalError),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl RtspError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        RtspError::Parse { kind }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Request URI is not `rtsp://host[:port]/suffix`.
    InvalidUrl,
    /// Protocol version token was not `RTSP/1.0`.
    UnsupportedVersion,
    /// Method token is not an RTSP method.
    UnknownMethod,
    /// No parseable `CSeq` header.
    MissingCSeq,
    /// Request was not valid UTF-8 or its head grew past the size limit.
    InvalidEncoding,
    /// `Content-Length` is larger than the server accepts.
    BodyTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidUrl => write!(f, "invalid request URL"),
            Self::UnsupportedVersion => write!(f, "unsupported RTSP version"),
            Self::UnknownMethod => write!(f, "unknown method"),
            Self::MissingCSeq => write!(f, "missing CSeq header"),
            Self::InvalidEncoding => write!(f, "invalid request encoding"),
            Self::BodyTooLarge => write!(f, "request body too large"),
        }
    }
}

/// Outcome of a failed [`NalReader::next_nalu`](crate::media::nal::NalReader::next_nalu).
///
/// Every variant ends the stream; they differ only in how they are logged.
#[derive(Debug, thiserror::Error)]
pub enum NalError {
    /// Fewer than three bytes left: normal end of stream.
    #[error("end of stream")]
    Empty,
    /// The data at the read position does not start with a start code.
    #[error("missing Annex-B start code")]
    Malformed,
    /// Reading or seeking the underlying stream failed.
    #[error("stream I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// RTCP decode failure for a single packet.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RtcpError {
    #[error("buffer too small: need {required} bytes, have {available}")]
    BufferTooSmall { required: usize, available: usize },
    #[error("unexpected packet type {0}")]
    UnexpectedType(u8),
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
