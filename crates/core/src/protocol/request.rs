use std::fmt;

use crate::error::{ParseErrorKind, RtspError};

/// RTSP methods recognized by the parser (RFC 2326 §10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtspMethod {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Record,
    Announce,
    Teardown,
    Redirect,
    GetParameter,
    SetParameter,
}

impl RtspMethod {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "OPTIONS" => Self::Options,
            "DESCRIBE" => Self::Describe,
            "SETUP" => Self::Setup,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "RECORD" => Self::Record,
            "ANNOUNCE" => Self::Announce,
            "TEARDOWN" => Self::Teardown,
            "REDIRECT" => Self::Redirect,
            "GET_PARAMETER" => Self::GetParameter,
            "SET_PARAMETER" => Self::SetParameter,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Record => "RECORD",
            Self::Announce => "ANNOUNCE",
            Self::Teardown => "TEARDOWN",
            Self::Redirect => "REDIRECT",
            Self::GetParameter => "GET_PARAMETER",
            Self::SetParameter => "SET_PARAMETER",
        }
    }
}

impl fmt::Display for RtspMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `rtsp://host[:port]/path` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspUrl {
    pub host: String,
    pub port: u16,
    /// Everything after the first `/` following the authority. Never empty.
    pub path: String,
}

impl RtspUrl {
    pub const DEFAULT_PORT: u16 = 554;

    /// Parse an absolute RTSP URL.
    ///
    /// ```
    /// use rtsp::protocol::request::RtspUrl;
    ///
    /// let url = RtspUrl::parse("rtsp://10.0.0.1:8554/live/track0").unwrap();
    /// assert_eq!(url.host, "10.0.0.1");
    /// assert_eq!(url.port, 8554);
    /// assert_eq!(url.path, "live/track0");
    ///
    /// assert_eq!(RtspUrl::parse("rtsp://camera/live").unwrap().port, 554);
    /// assert!(RtspUrl::parse("rtsp://camera/").is_none());
    /// assert!(RtspUrl::parse("http://camera/live").is_none());
    /// ```
    pub fn parse(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("rtsp://")?;
        let (authority, path) = rest.split_once('/')?;
        if path.is_empty() {
            return None;
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']')?;
            match after.strip_prefix(':') {
                Some(port) => (host, port.parse().ok()?),
                None if after.is_empty() => (host, Self::DEFAULT_PORT),
                None => return None,
            }
        } else {
            match authority.split_once(':') {
                Some((host, port)) => (host, port.parse().ok()?),
                None => (authority, Self::DEFAULT_PORT),
            }
        };
        if host.is_empty() {
            return None;
        }

        Some(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. A request body,
/// if any, is consumed by the connection and not kept here.
#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: RtspMethod,
    /// Request-URI as received (e.g. `rtsp://host:port/live/track0`).
    pub uri: String,
    pub url: RtspUrl,
    /// Protocol version; always `RTSP/1.0`.
    pub version: String,
    /// Sequence number echoed in the response (RFC 2326 §12.17).
    pub cseq: u32,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    /// Parse the request line and headers.
    ///
    /// Lines without a colon are skipped. A missing or non-numeric `CSeq`
    /// is an error, as are unknown methods and versions other than
    /// `RTSP/1.0`.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines().skip_while(|line| line.trim().is_empty());

        let request_line = lines
            .next()
            .ok_or(RtspError::parse(ParseErrorKind::EmptyRequest))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, uri, version] = parts[..] else {
            return Err(RtspError::parse(ParseErrorKind::InvalidRequestLine));
        };

        let method = RtspMethod::from_token(method)
            .ok_or(RtspError::parse(ParseErrorKind::UnknownMethod))?;
        let url = RtspUrl::parse(uri).ok_or(RtspError::parse(ParseErrorKind::InvalidUrl))?;
        if version != "RTSP/1.0" {
            return Err(RtspError::parse(ParseErrorKind::UnsupportedVersion));
        }

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                tracing::trace!(line, "skipping header line without colon");
                continue;
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let cseq = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("CSeq"))
            .and_then(|(_, value)| value.parse::<u32>().ok())
            .ok_or(RtspError::parse(ParseErrorKind::MissingCSeq))?;

        Ok(RtspRequest {
            method,
            uri: uri.to_string(),
            url,
            version: version.to_string(),
            cseq,
            headers,
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
