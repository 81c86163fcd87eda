use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{EngineCallbacks, PacketizationEngine, SendRequest};
use crate::error::{PacketizerError, Result};
use crate::media::codec::CodecDescriptor;
use crate::media::rtcp::{self, NtpTimestamp, ReportBlock, RtcpPacket};
use crate::media::rtp::{RTP_HEADER_LEN, RtpHeader};
use crate::media::{Payloader, payloader_for};
use crate::scheduler::PeriodicModule;

/// Smallest MTU [`RtpEngineConfig::validate`] accepts: the fixed header,
/// the longest payload descriptor, and a few bytes of media.
pub const MIN_MTU: usize = RTP_HEADER_LEN + 16;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct RtpEngineConfig {
    /// Maximum RTP packet size including the 12-byte header.
    pub mtu: usize,
    /// Interval between Sender Reports.
    pub report_interval: Duration,
}

impl Default for RtpEngineConfig {
    fn default() -> Self {
        Self {
            mtu: 1200,
            report_interval: Duration::from_secs(1),
        }
    }
}

impl RtpEngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mtu < MIN_MTU {
            return Err(PacketizerError::MtuTooSmall { mtu: self.mtu });
        }
        Ok(())
    }
}

/// Packet and octet counters reported in Sender Reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStatistics {
    pub packets: u32,
    pub octets: u32,
    pub retransmitted: u32,
}

struct RegisteredPayload {
    descriptor: CodecDescriptor,
    payloader: Box<dyn Payloader>,
}

struct EngineState {
    header: RtpHeader,
    payloads: HashMap<u8, RegisteredPayload>,
    /// Sent packets by sequence number, oldest first.
    history: VecDeque<(u16, Vec<u8>)>,
    nack_enabled: bool,
    history_depth: usize,
    fec: Option<(u8, u8)>,
    remb_enabled: bool,
    stats: SendStatistics,
    last_rtp_timestamp: u32,
    next_report: Instant,
}

impl EngineState {
    fn remember(&mut self, sequence: u16, packet: &[u8]) {
        if !self.nack_enabled || self.history_depth == 0 {
            return;
        }
        while self.history.len() >= self.history_depth {
            self.history.pop_front();
        }
        self.history.push_back((sequence, packet.to_vec()));
    }

    fn lookup(&self, sequence: u16) -> Option<&[u8]> {
        self.history
            .iter()
            .rev()
            .find(|(seq, _)| *seq == sequence)
            .map(|(_, packet)| packet.as_slice())
    }
}

/// Follow-up work collected while parsing RTCP, run after the state lock is released.
#[derive(Default)]
struct FeedbackActions {
    intra_requests: Vec<u32>,
    estimates: Vec<u32>,
    reports: Vec<(u8, u64)>,
}

/// Reference RTP sender.
///
/// Payloads frames with the codec-specific [`Payloader`] registered for
/// their payload type, keeps a bounded history for NACK retransmission, and
/// emits a Sender Report every [`RtpEngineConfig::report_interval`] from
/// [`PeriodicModule::process`].
///
/// RED/ULPFEC settings are recorded but not applied: packets always go out
/// unprotected.
pub struct RtpEngine {
    config: RtpEngineConfig,
    ssrc: u32,
    state: Mutex<EngineState>,
    callbacks: EngineCallbacks,
}

impl RtpEngine {
    /// Engine with a random SSRC and initial sequence number.
    pub fn new(config: RtpEngineConfig, callbacks: EngineCallbacks) -> Self {
        Self::with_header(config, callbacks, RtpHeader::random())
    }

    pub fn with_header(config: RtpEngineConfig, callbacks: EngineCallbacks, header: RtpHeader) -> Self {
        let ssrc = header.ssrc;
        let next_report = Instant::now() + config.report_interval;
        Self {
            config,
            ssrc,
            state: Mutex::new(EngineState {
                header,
                payloads: HashMap::new(),
                history: VecDeque::new(),
                nack_enabled: false,
                history_depth: 0,
                fec: None,
                remb_enabled: false,
                stats: SendStatistics::default(),
                last_rtp_timestamp: 0,
                next_report,
            }),
            callbacks,
        }
    }

    pub fn statistics(&self) -> SendStatistics {
        self.state.lock().stats
    }

    pub fn registered_payload(&self, payload_type: u8) -> Option<CodecDescriptor> {
        self.state
            .lock()
            .payloads
            .get(&payload_type)
            .map(|p| p.descriptor.clone())
    }

    fn report_targets_us(&self, block: &ReportBlock) -> bool {
        block.ssrc == self.ssrc
    }

    fn handle_reports(&self, reports: &[ReportBlock], actions: &mut FeedbackActions) {
        let now = NtpTimestamp::now().compact();
        for block in reports.iter().filter(|b| self.report_targets_us(b)) {
            let rtt_ms = block
                .round_trip_time(now)
                .map_or(0, |rtt| rtt.as_millis() as u64);
            actions.reports.push((block.fraction_lost, rtt_ms));
        }
    }
}

impl PeriodicModule for RtpEngine {
    fn time_until_next_process(&self) -> Duration {
        self.state
            .lock()
            .next_report
            .saturating_duration_since(Instant::now())
    }

    fn process(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        if now < state.next_report {
            return;
        }
        state.next_report = now + self.config.report_interval;

        // Nothing to report before the first packet goes out.
        if state.stats.packets == 0 {
            return;
        }

        let report = rtcp::sender_report(
            self.ssrc,
            NtpTimestamp::now(),
            state.last_rtp_timestamp,
            state.stats.packets,
            state.stats.octets,
        );
        if !self.callbacks.transport.send_rtcp(&report) {
            tracing::trace!(ssrc = self.ssrc, "sender report not delivered");
        }
    }
}

impl PacketizationEngine for RtpEngine {
    fn send_frame(&self, request: &SendRequest<'_>) -> Result<()> {
        let mut state = self.state.lock();
        let payloads = {
            let registered = state
                .payloads
                .get(&request.payload_type)
                .ok_or(PacketizerError::PayloadNotRegistered(request.payload_type))?;
            registered.payloader.payload_frame(
                request.payload,
                request.fragmentation,
                &request.codec_header,
                self.config.mtu.saturating_sub(RTP_HEADER_LEN),
            )
        };
        if payloads.is_empty() && !request.payload.is_empty() {
            return Err(PacketizerError::MtuTooSmall {
                mtu: self.config.mtu,
            });
        }

        let count = payloads.len();
        for (i, payload) in payloads.into_iter().enumerate() {
            let sequence = state.header.sequence();
            let header = state
                .header
                .write(request.payload_type, i + 1 == count, request.timestamp);

            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
            packet.extend_from_slice(&header);
            packet.extend_from_slice(&payload);

            state.remember(sequence, &packet);
            state.stats.packets = state.stats.packets.wrapping_add(1);
            state.stats.octets = state.stats.octets.wrapping_add(payload.len() as u32);

            // Sent under the lock so concurrent frames never interleave.
            self.callbacks.transport.send_rtp(&packet);
        }
        state.last_rtp_timestamp = request.timestamp;

        tracing::trace!(
            payload_type = request.payload_type,
            kind = ?request.kind,
            timestamp = request.timestamp,
            capture_time_ms = request.capture_time_ms,
            packets = count,
            "frame sent"
        );
        Ok(())
    }

    fn register_send_payload(&self, codec: &CodecDescriptor) -> Result<()> {
        let payload_type = codec.payload_type;
        if payload_type > 127 {
            return Err(PacketizerError::PayloadRejected {
                payload_type,
                reason: "outside the 7-bit payload type range",
            });
        }
        // RFC 5761 §4: these collide with RTCP SR/RR when multiplexed.
        if (72..=76).contains(&payload_type) {
            return Err(PacketizerError::PayloadRejected {
                payload_type,
                reason: "collides with RTCP packet types",
            });
        }

        let mut state = self.state.lock();
        if let Some((red, fec)) = state.fec
            && (payload_type == red || payload_type == fec)
        {
            return Err(PacketizerError::PayloadRejected {
                payload_type,
                reason: "reserved for RED/ULPFEC",
            });
        }

        state.payloads.insert(
            payload_type,
            RegisteredPayload {
                descriptor: codec.clone(),
                payloader: payloader_for(codec.kind),
            },
        );
        tracing::debug!(
            ssrc = format_args!("{:#010X}", self.ssrc),
            payload_type,
            codec = codec.name,
            clock_rate = codec.clock_rate,
            "send payload registered"
        );
        Ok(())
    }

    fn ingest_control_packet(&self, packet: &[u8]) -> Result<usize> {
        let packets = rtcp::parse_compound(packet)?;
        let mut actions = FeedbackActions::default();
        let mut retransmit = Vec::new();

        {
            let mut state = self.state.lock();
            for rtcp_packet in &packets {
                match rtcp_packet {
                    RtcpPacket::PictureLossIndication { media_ssrc, .. }
                    | RtcpPacket::FullIntraRequest { media_ssrc, .. }
                        if *media_ssrc == self.ssrc =>
                    {
                        actions.intra_requests.push(*media_ssrc);
                    }
                    RtcpPacket::Nack {
                        media_ssrc, lost, ..
                    } if *media_ssrc == self.ssrc && state.nack_enabled => {
                        for seq in lost {
                            match state.lookup(*seq) {
                                Some(p) => retransmit.push(p.to_vec()),
                                None => tracing::trace!(seq, "NACKed packet no longer in history"),
                            }
                        }
                    }
                    RtcpPacket::Remb { bitrate_bps, .. } if state.remb_enabled => {
                        actions
                            .estimates
                            .push(u32::try_from(*bitrate_bps).unwrap_or(u32::MAX));
                    }
                    RtcpPacket::ReceiverReport { reports, .. }
                    | RtcpPacket::SenderReport { reports, .. } => {
                        self.handle_reports(reports, &mut actions);
                    }
                    _ => {}
                }
            }

            for p in &retransmit {
                self.callbacks.transport.send_rtp(p);
            }
            state.stats.retransmitted = state
                .stats
                .retransmitted
                .wrapping_add(retransmit.len() as u32);
        }

        if !retransmit.is_empty() {
            tracing::debug!(packets = retransmit.len(), "retransmitted on NACK");
        }
        for ssrc in actions.intra_requests {
            self.callbacks.intra_frame_observer.on_received_intra_frame_request(ssrc);
        }
        for bps in actions.estimates {
            self.callbacks.bandwidth_observer.on_estimated_bitrate(bps);
        }
        for (loss, rtt_ms) in actions.reports {
            self.callbacks.bandwidth_observer.on_receiver_report(loss, rtt_ms);
        }

        Ok(packet.len())
    }

    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn set_retransmission_store(&self, enabled: bool, history_depth: usize) {
        let mut state = self.state.lock();
        state.nack_enabled = enabled;
        state.history_depth = history_depth;
        if !enabled {
            state.history.clear();
        }
        while state.history.len() > history_depth {
            state.history.pop_front();
        }
        tracing::debug!(enabled, history_depth, "retransmission store configured");
    }

    fn set_forward_error_correction(&self, enabled: bool, red_payload_type: u8, fec_payload_type: u8) {
        let mut state = self.state.lock();
        state.fec = enabled.then_some((red_payload_type, fec_payload_type));
        if enabled {
            tracing::warn!(
                red_payload_type,
                fec_payload_type,
                "FEC requested but not supported, sending unprotected"
            );
        }
    }

    fn set_receiver_estimated_bandwidth(&self, enabled: bool) {
        self.state.lock().remb_enabled = enabled;
        tracing::debug!(enabled, "REMB handling configured");
    }
}
