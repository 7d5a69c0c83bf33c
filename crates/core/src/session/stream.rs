//! Per-track delivery state: frame source, RTP sink and the play task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{NalError, Result};
use crate::media::rtcp::{
    self, Goodbye, NtpTimestamp, ReportBlock, RtcpPacket, SenderInfo, SenderReport,
};
use crate::media::{AvPacketInfo, FrameSource, MediaSubsession, RtpSink};
use crate::random::RandomSource;
use crate::transport::{Delivery, MediaTransport};

/// Lifecycle of one track within an RTSP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Created by SETUP, transport not yet attached.
    Idle,
    /// Source and sink exist; waiting for PLAY.
    Bound,
    /// The play task is running (or has run to the end of the file).
    Playing,
    /// TEARDOWN or disconnect. Terminal.
    TornDown,
}

/// Sequence number and timestamp of the first RTP packet, for `RTP-Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpInfo {
    pub sequence: u16,
    pub timestamp: u32,
}

/// Delivery counters, shared between the play task and the session.
#[derive(Debug, Default)]
pub struct StreamStats {
    frames: AtomicU64,
    packets: AtomicU64,
    rtcp_packets: AtomicU64,
    finished: AtomicBool,
    last_receiver_report: Mutex<Option<ReportBlock>>,
}

impl StreamStats {
    /// Frames pulled from the source and sent.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// RTP packets emitted, counting every FU-A fragment.
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// RTCP packets received from the client.
    pub fn rtcp_packets(&self) -> u64 {
        self.rtcp_packets.load(Ordering::Relaxed)
    }

    /// Whether the play task has reached the end of the source.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn last_receiver_report(&self) -> Option<ReportBlock> {
        *self.last_receiver_report.lock()
    }
}

/// Result of one [`Pump::play_once`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlayStep {
    /// Pull again after `delay`, advancing the timestamp if `update_ts`.
    Next { delay: Duration, update_ts: bool },
    Finished,
}

/// Everything the play task owns exclusively.
pub(crate) struct Pump {
    source: Box<dyn FrameSource>,
    sink: Box<dyn RtpSink>,
    rtcp: MediaTransport,
    payload_type: u8,
    timestamp: u32,
    timestamp_step: u32,
    interval: Duration,
    stats: Arc<StreamStats>,
}

impl Pump {
    pub(crate) fn new(
        subsession: &dyn MediaSubsession,
        rtp: MediaTransport,
        rtcp: MediaTransport,
        rng: &dyn RandomSource,
        stats: Arc<StreamStats>,
    ) -> Result<Self> {
        let source = subsession.new_frame_source(rng)?;
        let sink = subsession.new_rtp_sink(rtp, rng);
        Ok(Self {
            source,
            sink,
            rtcp,
            payload_type: subsession.payload_type(),
            timestamp: rng.next_u32() & 0x00ff_ffff,
            timestamp_step: subsession.timestamp_step(),
            interval: subsession.frame_interval(),
            stats,
        })
    }

    /// Values the first packet will carry.
    pub(crate) fn rtp_info(&self) -> RtpInfo {
        RtpInfo {
            sequence: self.sink.next_sequence(),
            timestamp: self.timestamp.wrapping_add(self.timestamp_step),
        }
    }

    /// Pull one frame and send it.
    ///
    /// Parameter sets (SPS/PPS/SEI) share the timestamp of the frame that
    /// follows them and are sent without pacing.
    pub(crate) fn play_once(&mut self, update_ts: bool) -> PlayStep {
        let packet = match self.source.next_frame() {
            Ok(packet) => packet,
            Err(e) => {
                match e {
                    NalError::Empty => tracing::info!(ssrc = self.source.ssrc(), "end of stream"),
                    e => tracing::warn!(ssrc = self.source.ssrc(), error = %e, "frame source failed"),
                }
                self.send_goodbye();
                return PlayStep::Finished;
            }
        };

        if update_ts {
            self.timestamp = self.timestamp.wrapping_add(self.timestamp_step);
        }

        let nal_type = packet.nal_type;
        let info = AvPacketInfo {
            ssrc: self.source.ssrc(),
            timestamp: self.timestamp,
            payload_type: self.payload_type,
        };

        let before = self.sink.packet_count();
        if let Err(e) = self.sink.send(packet, &info) {
            tracing::debug!(ssrc = info.ssrc, error = %e, "RTP send failed, stopping playback");
            return PlayStep::Finished;
        }
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        self.stats.packets.fetch_add(
            u64::from(self.sink.packet_count().wrapping_sub(before)),
            Ordering::Relaxed,
        );

        if nal_type.is_parameter_set() {
            PlayStep::Next {
                delay: Duration::ZERO,
                update_ts: false,
            }
        } else {
            PlayStep::Next {
                delay: self.interval,
                update_ts: true,
            }
        }
    }

    /// SR followed by BYE as one compound packet.
    fn goodbye_packet(&self, now: NtpTimestamp) -> BytesMut {
        let ssrc = self.source.ssrc();
        let report = SenderReport {
            ssrc,
            sender_info: SenderInfo {
                ntp_msw: now.seconds,
                ntp_lsw: now.fraction,
                rtp_timestamp: self.timestamp,
                packet_count: self.sink.packet_count(),
                octet_count: self.sink.octet_count(),
            },
            report_blocks: Vec::new(),
        };
        let mut compound = report.serialize();
        compound.extend_from_slice(&Goodbye { ssrc }.serialize());
        compound
    }

    fn send_goodbye(&self) {
        let compound = self.goodbye_packet(NtpTimestamp::now());
        match self.rtcp.send_packet(&compound) {
            Ok(Delivery::Sent) => tracing::debug!(
                ssrc = self.source.ssrc(),
                packets = self.sink.packet_count(),
                octets = self.sink.octet_count(),
                "sent RTCP SR + BYE"
            ),
            Ok(Delivery::Dropped) => tracing::debug!("RTCP BYE dropped, transport busy"),
            Err(e) => tracing::debug!(error = %e, "failed to send RTCP BYE"),
        }
    }
}

/// Drive a pump until the source ends or `cancel` fires.
async fn run_playback(mut pump: Pump, cancel: CancellationToken, track_id: String) {
    let mut update_ts = true;
    loop {
        if cancel.is_cancelled() {
            tracing::debug!(track = %track_id, "playback cancelled");
            return;
        }
        match pump.play_once(update_ts) {
            PlayStep::Finished => break,
            PlayStep::Next {
                delay,
                update_ts: next,
            } => {
                update_ts = next;
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                    continue;
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(track = %track_id, "playback cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    pump.stats.finished.store(true, Ordering::Release);
    tracing::info!(
        track = %track_id,
        frames = pump.stats.frames(),
        packets = pump.stats.packets(),
        "playback finished"
    );
}

/// One SETUP'd track of an RTSP session.
pub struct StreamState {
    track_id: String,
    subsession: Arc<dyn MediaSubsession>,
    phase: Mutex<StreamPhase>,
    pump: Mutex<Option<Pump>>,
    rtp_info: Mutex<Option<RtpInfo>>,
    cancel: CancellationToken,
    stats: Arc<StreamStats>,
}

impl StreamState {
    /// A new idle stream. `cancel` should be a child of the session token.
    pub fn new(
        track_id: impl Into<String>,
        subsession: Arc<dyn MediaSubsession>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            subsession,
            phase: Mutex::new(StreamPhase::Idle),
            pump: Mutex::new(None),
            rtp_info: Mutex::new(None),
            cancel,
            stats: Arc::new(StreamStats::default()),
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn phase(&self) -> StreamPhase {
        *self.phase.lock()
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    /// Token cancelled on teardown; UDP receive tasks listen on it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Attach transports and open the frame source.
    pub fn bind(
        &self,
        rtp: MediaTransport,
        rtcp: MediaTransport,
        rng: &dyn RandomSource,
    ) -> Result<()> {
        let mut phase = self.phase.lock();
        if *phase != StreamPhase::Idle {
            tracing::warn!(track = %self.track_id, phase = ?*phase, "stream already bound");
            return Ok(());
        }
        let pump = Pump::new(self.subsession.as_ref(), rtp, rtcp, rng, self.stats.clone())?;
        *self.rtp_info.lock() = Some(pump.rtp_info());
        *self.pump.lock() = Some(pump);
        *phase = StreamPhase::Bound;
        tracing::debug!(track = %self.track_id, "stream bound");
        Ok(())
    }

    /// Start the play task. Must be called from within a tokio runtime.
    ///
    /// Returns the first packet's sequence and timestamp, or `None` when
    /// the stream is not bound. Calling it again while playing starts
    /// nothing new.
    pub fn play(&self) -> Option<RtpInfo> {
        let mut phase = self.phase.lock();
        match *phase {
            StreamPhase::Bound => {}
            StreamPhase::Playing => return *self.rtp_info.lock(),
            StreamPhase::Idle | StreamPhase::TornDown => return None,
        }
        let pump = self.pump.lock().take()?;
        *phase = StreamPhase::Playing;
        tracing::info!(track = %self.track_id, "playback started");
        tokio::spawn(run_playback(
            pump,
            self.cancel.clone(),
            self.track_id.clone(),
        ));
        *self.rtp_info.lock()
    }

    /// Stop playback and release the source. Idempotent.
    pub fn teardown(&self) {
        let mut phase = self.phase.lock();
        if *phase == StreamPhase::TornDown {
            return;
        }
        self.cancel.cancel();
        self.pump.lock().take();
        *phase = StreamPhase::TornDown;
        tracing::debug!(track = %self.track_id, "stream torn down");
    }

    /// Inbound RTCP from the client.
    pub fn handle_rtcp(&self, data: &[u8]) {
        for packet in rtcp::parse_compound(data) {
            self.stats.rtcp_packets.fetch_add(1, Ordering::Relaxed);
            match packet {
                RtcpPacket::ReceiverReport(rr) => {
                    tracing::debug!(
                        track = %self.track_id,
                        ssrc = rr.ssrc,
                        blocks = rr.report_blocks.len(),
                        "RTCP receiver report"
                    );
                    if let Some(block) = rr.report_blocks.last() {
                        *self.stats.last_receiver_report.lock() = Some(*block);
                    }
                }
                RtcpPacket::SourceDescription(sdes) => {
                    tracing::debug!(track = %self.track_id, chunks = sdes.chunks.len(), "RTCP SDES");
                }
                RtcpPacket::Goodbye(bye) => {
                    tracing::debug!(track = %self.track_id, ssrc = bye.ssrc, "RTCP BYE");
                }
                RtcpPacket::SenderReport(sr) => {
                    tracing::debug!(track = %self.track_id, ssrc = sr.ssrc, "RTCP sender report");
                }
                RtcpPacket::Other(header) => {
                    tracing::trace!(
                        track = %self.track_id,
                        packet_type = header.packet_type,
                        "RTCP packet ignored"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamState")
            .field("track_id", &self.track_id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::h264::H264FileSubsession;
    use crate::media::rtcp::{RtcpHeader, RtcpPacketType};
    use crate::media::rtp::RtpHeader;
    use crate::random::SeededRandom;
    use crate::transport::{ConnectionHandle, INTERLEAVED_HEADER_SIZE};
    use bytes::Bytes;
    use std::io::Write;
    use tokio::sync::mpsc::Receiver;

    const SPS: [u8; 4] = [0x67, 0x42, 0x00, 0x1e];
    const PPS: [u8; 4] = [0x68, 0xce, 0x38, 0x80];
    const IDR: [u8; 3] = [0x65, 0x88, 0x80];
    const SLICE: [u8; 3] = [0x41, 0x9a, 0x02];

    fn h264_file(units: &[&[u8]]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for unit in units {
            file.write_all(&[0, 0, 0, 1]).unwrap();
            file.write_all(unit).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn transports() -> (MediaTransport, MediaTransport, Receiver<Bytes>) {
        let (connection, rx) = ConnectionHandle::channel("127.0.0.1:5000".parse().unwrap());
        let rtp = MediaTransport::Interleaved {
            connection: connection.clone(),
            channel: 0,
        };
        let rtcp = MediaTransport::Interleaved {
            connection,
            channel: 1,
        };
        (rtp, rtcp, rx)
    }

    fn rtp_header(frame: &[u8]) -> RtpHeader {
        assert_eq!(frame[1], 0, "expected RTP channel");
        RtpHeader::parse(&frame[INTERLEAVED_HEADER_SIZE..]).unwrap()
    }

    #[test]
    fn parameter_sets_share_timestamp_and_skip_pacing() {
        let file = h264_file(&[&SPS, &PPS, &IDR, &SLICE]);
        let sub = H264FileSubsession::open(file.path(), 25, 90_000).unwrap();
        let (rtp, rtcp, mut rx) = transports();
        let stats = Arc::new(StreamStats::default());
        let mut pump = Pump::new(&sub, rtp, rtcp, &SeededRandom::new(3), stats.clone()).unwrap();
        let info = pump.rtp_info();

        let zero = PlayStep::Next {
            delay: Duration::ZERO,
            update_ts: false,
        };
        let paced = PlayStep::Next {
            delay: Duration::from_millis(40),
            update_ts: true,
        };
        assert_eq!(pump.play_once(true), zero);
        assert_eq!(pump.play_once(false), zero);
        assert_eq!(pump.play_once(false), paced);
        assert_eq!(pump.play_once(true), paced);
        assert_eq!(pump.play_once(true), PlayStep::Finished);

        let headers: Vec<RtpHeader> = (0..4).map(|_| rtp_header(&rx.try_recv().unwrap())).collect();
        assert_eq!(headers[0].sequence, info.sequence);
        assert_eq!(headers[0].timestamp, info.timestamp);
        assert_eq!(headers[1].timestamp, info.timestamp);
        assert_eq!(headers[2].timestamp, info.timestamp);
        assert_eq!(headers[3].timestamp, info.timestamp.wrapping_add(3600));
        assert!(info.timestamp.wrapping_sub(3600) <= 0x00ff_ffff);
        assert_eq!(stats.frames(), 4);
        assert_eq!(stats.packets(), 4);

        // SR + BYE on the RTCP channel.
        let bye = rx.try_recv().unwrap();
        assert_eq!(bye[1], 1);
        let packets = rtcp::parse_compound(&bye[INTERLEAVED_HEADER_SIZE..]);
        assert_eq!(packets.len(), 2);
        match &packets[0] {
            RtcpPacket::SenderReport(sr) => {
                assert_eq!(sr.ssrc, headers[0].ssrc);
                assert_eq!(sr.sender_info.packet_count, 4);
                assert_eq!(sr.sender_info.rtp_timestamp, headers[3].timestamp);
                assert_eq!(sr.sender_info.octet_count, 4 * 12 + 4 + 4 + 3 + 3);
            }
            other => panic!("expected SR, got {other:?}"),
        }
        assert!(matches!(&packets[1], RtcpPacket::Goodbye(bye) if bye.ssrc == headers[0].ssrc));
    }

    #[test]
    fn goodbye_compound_layout() {
        let file = h264_file(&[&IDR]);
        let sub = H264FileSubsession::open(file.path(), 25, 90_000).unwrap();
        let (rtp, rtcp, _rx) = transports();
        let pump = Pump::new(&sub, rtp, rtcp, &SeededRandom::new(9), Arc::default()).unwrap();

        let compound = pump.goodbye_packet(NtpTimestamp {
            seconds: 1,
            fraction: 2,
        });
        assert_eq!(compound.len(), 28 + 8);
        let mut buf = &compound[..];
        let sr = RtcpHeader::parse(&mut buf).unwrap();
        assert_eq!(sr.packet_type, RtcpPacketType::Sr as u8);
        assert_eq!(sr.length, 6);
        let bye = RtcpHeader::parse(&mut &compound[28..]).unwrap();
        assert_eq!(bye.packet_type, RtcpPacketType::Bye as u8);
        assert_eq!(bye.count, 1);
    }

    #[test]
    fn closed_connection_stops_playback() {
        let file = h264_file(&[&IDR, &SLICE]);
        let sub = H264FileSubsession::open(file.path(), 25, 90_000).unwrap();
        let (rtp, rtcp, rx) = transports();
        drop(rx);
        let mut pump = Pump::new(&sub, rtp, rtcp, &SeededRandom::new(1), Arc::default()).unwrap();
        assert_eq!(pump.play_once(true), PlayStep::Finished);
    }

    #[test]
    fn handle_rtcp_records_receiver_report() {
        let file = h264_file(&[&IDR]);
        let sub: Arc<dyn MediaSubsession> =
            Arc::new(H264FileSubsession::open(file.path(), 25, 90_000).unwrap());
        let stream = StreamState::new("track0", sub, CancellationToken::new());

        let block = ReportBlock {
            ssrc: 0x1234,
            fraction_lost: 3,
            cumulative_lost: 7,
            highest_seq: 1000,
            jitter: 5,
            last_sr: 0,
            delay_since_last_sr: 0,
        };
        let rr = rtcp::ReceiverReport {
            ssrc: 0xABCD,
            report_blocks: vec![block],
        };
        let mut compound = rr.serialize();
        compound.extend_from_slice(&Goodbye { ssrc: 0xABCD }.serialize());

        stream.handle_rtcp(&compound);
        assert_eq!(stream.stats().rtcp_packets(), 2);
        assert_eq!(stream.stats().last_receiver_report(), Some(block));
    }

    #[tokio::test]
    async fn play_then_teardown() {
        let file = h264_file(&[&SPS, &PPS, &IDR, &SLICE, &SLICE]);
        let sub: Arc<dyn MediaSubsession> =
            Arc::new(H264FileSubsession::open(file.path(), 1000, 90_000).unwrap());
        let stream = StreamState::new("track0", sub, CancellationToken::new());
        assert_eq!(stream.phase(), StreamPhase::Idle);
        assert!(stream.play().is_none());

        let (rtp, rtcp, mut rx) = transports();
        stream.bind(rtp, rtcp, &SeededRandom::new(5)).unwrap();
        assert_eq!(stream.phase(), StreamPhase::Bound);

        let info = stream.play().unwrap();
        assert_eq!(stream.phase(), StreamPhase::Playing);
        assert_eq!(stream.play(), Some(info));

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rtp_header(&first).sequence, info.sequence);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !stream.stats().is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(stream.stats().frames(), 5);

        stream.teardown();
        assert_eq!(stream.phase(), StreamPhase::TornDown);
        assert!(stream.cancel_token().is_cancelled());
        assert!(stream.play().is_none());
        stream.teardown();
    }

    #[tokio::test]
    async fn teardown_cancels_running_playback() {
        let units: Vec<&[u8]> = std::iter::repeat_n(&SLICE[..], 50).collect();
        let file = h264_file(&units);
        let sub: Arc<dyn MediaSubsession> =
            Arc::new(H264FileSubsession::open(file.path(), 10, 90_000).unwrap());
        let stream = StreamState::new("track0", sub, CancellationToken::new());
        let (rtp, rtcp, mut rx) = transports();
        stream.bind(rtp, rtcp, &SeededRandom::new(5)).unwrap();
        stream.play().unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        stream.teardown();

        // The task drops its sink once cancelled, closing the channel.
        tokio::time::timeout(Duration::from_secs(5), async {
            while rx.recv().await.is_some() {}
        })
        .await
        .unwrap();
        assert!(stream.stats().frames() < 50);
        assert!(!stream.stats().is_finished());
    }
}
