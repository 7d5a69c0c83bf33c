use std::fs::File;
use std::path::{Path, PathBuf};

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{NalError, Result};
use crate::random::RandomSource;
use crate::transport::MediaTransport;

use super::nal::{NalReader, NalUnitType};
use super::rtp::H264RtpSink;
use super::{AvPacket, FrameSource, MediaSubsession, RtpSink};

/// Dynamic payload type used for H.264.
pub const H264_PAYLOAD_TYPE: u8 = 96;

/// 90 kHz video clock (RFC 6184 §8.1).
pub const H264_CLOCK_RATE: u32 = 90_000;

pub const DEFAULT_FPS: u32 = 25;

/// How many leading NAL units are inspected for SPS/PPS.
const PARAMETER_SET_PROBE_LIMIT: usize = 32;

/// One H.264 track backed by an Annex-B file.
///
/// Every SETUP opens the file again, so each client streams from the
/// start.
///
/// ## SDP lines (RFC 6184 §8.2.1)
///
/// ```text
/// m=video 0 RTP/AVP 96
/// a=rtpmap:96 H264/90000
/// a=fmtp:96 packetization-mode=1;profile-level-id=42001e;sprop-parameter-sets=Z0IAHg==,aM44gA==
/// a=framerate:25
/// a=control:track0
/// ```
///
/// `a=rtpmap` defines the payload type and must precede `a=fmtp`. The
/// profile and parameter sets are only present when the file starts with
/// an SPS/PPS pair.
#[derive(Debug)]
pub struct H264FileSubsession {
    path: PathBuf,
    fps: u32,
    clock_rate: u32,
    payload_type: u8,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264FileSubsession {
    /// Open `path` and probe its parameter sets.
    ///
    /// Fails if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, fps: u32, clock_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut subsession = Self {
            path,
            fps,
            clock_rate,
            payload_type: H264_PAYLOAD_TYPE,
            sps: None,
            pps: None,
        };
        subsession.probe_parameter_sets()?;
        tracing::info!(
            path = %subsession.path.display(),
            fps,
            clock_rate,
            sps = subsession.sps.is_some(),
            pps = subsession.pps.is_some(),
            "H.264 file subsession ready"
        );
        Ok(subsession)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn probe_parameter_sets(&mut self) -> Result<()> {
        let mut reader = NalReader::new(File::open(&self.path)?);
        for _ in 0..PARAMETER_SET_PROBE_LIMIT {
            let nal = match reader.next_nalu() {
                Ok(nal) => nal,
                Err(e @ NalError::Io(_)) => return Err(e.into()),
                Err(_) => break,
            };
            match nal.unit_type() {
                Some(NalUnitType::Sps) if self.sps.is_none() => {
                    self.sps = Some(nal.payload().to_vec());
                }
                Some(NalUnitType::Pps) if self.pps.is_none() => {
                    self.pps = Some(nal.payload().to_vec());
                }
                _ => {}
            }
            if self.sps.is_some() && self.pps.is_some() {
                break;
            }
        }
        Ok(())
    }

    /// `profile_idc`, constraint flags and `level_idc` from the SPS.
    fn profile_level_id(&self) -> Option<String> {
        match self.sps.as_deref() {
            Some([_, profile, constraints, level, ..]) => {
                Some(format!("{profile:02x}{constraints:02x}{level:02x}"))
            }
            _ => None,
        }
    }

    fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }
}

impl MediaSubsession for H264FileSubsession {
    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn sdp_lines(&self, track_id: &str) -> Vec<String> {
        let pt = self.payload_type;
        let mut fmtp = format!("a=fmtp:{pt} packetization-mode=1");
        if let Some(pl) = self.profile_level_id() {
            fmtp.push_str(&format!(";profile-level-id={pl}"));
        }
        if let Some(sprop) = self.sprop_parameter_sets() {
            fmtp.push_str(&format!(";sprop-parameter-sets={sprop}"));
        }

        vec![
            format!("m=video 0 RTP/AVP {pt}"),
            format!("a=rtpmap:{pt} H264/{}", self.clock_rate),
            fmtp,
            format!("a=framerate:{}", self.fps),
            format!("a=control:{track_id}"),
        ]
    }

    fn new_frame_source(&self, rng: &dyn RandomSource) -> Result<Box<dyn FrameSource>> {
        let source = H264FileSource::open(&self.path, rng.next_u32())?;
        Ok(Box::new(source))
    }

    fn new_rtp_sink(
        &self,
        transport: MediaTransport,
        rng: &dyn RandomSource,
    ) -> Box<dyn RtpSink> {
        Box::new(H264RtpSink::new(transport, rng))
    }
}

/// Reads NAL units from an Annex-B file, one per frame.
pub struct H264FileSource {
    reader: NalReader<File>,
    ssrc: u32,
}

impl H264FileSource {
    pub fn open(path: &Path, ssrc: u32) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: NalReader::new(file),
            ssrc,
        })
    }
}

impl FrameSource for H264FileSource {
    fn next_frame(&mut self) -> std::result::Result<AvPacket, NalError> {
        loop {
            let nal = self.reader.next_nalu()?;
            let Some(header) = nal.header else {
                tracing::trace!("skipping empty NAL unit");
                continue;
            };
            return Ok(AvPacket {
                buffer: nal.buffer,
                nal_type: header.nal_unit_type,
            });
        }
    }

    fn ssrc(&self) -> u32 {
        self.ssrc
    }
}
