/// Client transport request from the RTSP `Transport` header (RFC 2326 §12.39).
///
/// Two forms are understood:
///
/// ```text
/// Transport: RTP/AVP;unicast;client_port=8000-8001        → Udp
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1          → Interleaved
/// ```
///
/// Multicast and the other transport parameters are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHeader {
    /// RTP and RTCP over UDP to the client's port pair.
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
    /// RTP and RTCP as `$` frames on the RTSP connection.
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// Only the first transport spec of a comma-separated list is used.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(
    ///     th,
    ///     TransportHeader::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 }
    /// );
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
    /// assert_eq!(th, TransportHeader::Interleaved { rtp_channel: 0, rtcp_channel: 1 });
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let spec = header.split(',').next()?.trim();
        let mut parts = spec.split(';').map(str::trim);
        let protocol = parts.next()?;

        match protocol.to_ascii_uppercase().as_str() {
            "RTP/AVP/TCP" => {
                let (rtp, rtcp) = find_range(parts, "interleaved=")?;
                Some(Self::Interleaved {
                    rtp_channel: rtp,
                    rtcp_channel: rtcp,
                })
            }
            "RTP/AVP" | "RTP/AVP/UDP" => {
                let (rtp, rtcp) = find_range(parts, "client_port=")?;
                Some(Self::Udp {
                    client_rtp_port: rtp,
                    client_rtcp_port: rtcp,
                })
            }
            _ => None,
        }
    }

    /// `Transport` header value for the SETUP reply.
    ///
    /// `server_ports` is the bound RTP/RTCP pair for UDP and ignored for
    /// interleaved transport.
    pub fn response_value(&self, server_ports: Option<(u16, u16)>) -> String {
        match *self {
            Self::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => {
                let mut value =
                    format!("RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port}");
                if let Some((rtp, rtcp)) = server_ports {
                    value.push_str(&format!(";server_port={rtp}-{rtcp}"));
                }
                value
            }
            Self::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}"),
        }
    }
}

/// Find `key=A-B` (or `key=A`, meaning `A-(A+1)`) among the parameters.
fn find_range<'a, T>(parts: impl Iterator<Item = &'a str>, key: &str) -> Option<(T, T)>
where
    T: Copy + std::str::FromStr + TryFrom<u32>,
    u32: From<T>,
{
    for part in parts {
        let Some(range) = part.strip_prefix(key) else {
            continue;
        };
        return match range.split_once('-') {
            Some((first, second)) => Some((first.parse().ok()?, second.parse().ok()?)),
            None => {
                let first: T = range.parse().ok()?;
                let second = T::try_from(u32::from(first) + 1).ok()?;
                Some((first, second))
            }
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_udp_transport() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(
            th,
            TransportHeader::Udp {
                client_rtp_port: 5000,
                client_rtcp_port: 5001
            }
        );
        assert_eq!(
            TransportHeader::parse("RTP/AVP/UDP;unicast;client_port=6000"),
            Some(TransportHeader::Udp {
                client_rtp_port: 6000,
                client_rtcp_port: 6001
            })
        );
    }

    #[test]
    fn parse_interleaved_transport() {
        let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
        assert_eq!(
            th,
            TransportHeader::Interleaved {
                rtp_channel: 2,
                rtcp_channel: 3
            }
        );
    }

    #[test]
    fn first_spec_of_list_wins() {
        let th = TransportHeader::parse(
            "RTP/AVP/TCP;unicast;interleaved=0-1,RTP/AVP;unicast;client_port=5000-5001",
        )
        .unwrap();
        assert!(matches!(th, TransportHeader::Interleaved { .. }));
    }

    #[test]
    fn rejects_incomplete_transport() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
        assert!(TransportHeader::parse("RTP/AVP/TCP;unicast").is_none());
        assert!(TransportHeader::parse("RAW/RAW/UDP;client_port=1-2").is_none());
        assert!(TransportHeader::parse("RTP/AVP;client_port=abc-def").is_none());
        assert!(TransportHeader::parse("RTP/AVP/TCP;interleaved=255").is_none());
        assert!(TransportHeader::parse("").is_none());
    }

    #[test]
    fn response_values() {
        let udp = TransportHeader::Udp {
            client_rtp_port: 8000,
            client_rtcp_port: 8001,
        };
        assert_eq!(
            udp.response_value(Some((40000, 40001))),
            "RTP/AVP;unicast;client_port=8000-8001;server_port=40000-40001"
        );

        let tcp = TransportHeader::Interleaved {
            rtp_channel: 0,
            rtcp_channel: 1,
        };
        assert_eq!(
            tcp.response_value(None),
            "RTP/AVP/TCP;unicast;interleaved=0-1"
        );
    }
}
