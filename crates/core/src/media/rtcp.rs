//! RTCP feedback subset (RFC 3550 §6, RFC 4585 §6, draft-alvestrand-rmcat-remb).
//!
//! Only what a video sender consumes is decoded:
//!
//! | Packet | PT | FMT | Use |
//! |--------|----|-----|-----|
//! | SR / RR | 200 / 201 | | loss fraction and RTT from report blocks |
//! | Generic NACK | 205 | 1 | retransmission |
//! | PLI | 206 | 1 | key frame request |
//! | FIR | 206 | 4 | key frame request |
//! | REMB | 206 | 15 | receiver bandwidth estimate |
//!
//! Everything else is surfaced as [`RtcpPacket::Other`] and ignored.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{PacketizerError, RtcpErrorKind, Result};

pub const PT_SR: u8 = 200;
pub const PT_RR: u8 = 201;
pub const PT_RTPFB: u8 = 205;
pub const PT_PSFB: u8 = 206;

const FMT_NACK: u8 = 1;
const FMT_PLI: u8 = 1;
const FMT_FIR: u8 = 4;
const FMT_AFB: u8 = 15;

const REPORT_BLOCK_LEN: usize = 24;
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

/// One reception report block (RFC 3550 §6.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBlock {
    pub ssrc: u32,
    /// Loss since the previous report, as a fixed point fraction of 256.
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub highest_seq: u32,
    pub jitter: u32,
    /// Middle 32 bits of the NTP time of the last SR received from us.
    pub last_sr: u32,
    /// Delay since that SR, in 1/65536 seconds.
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    fn parse(b: &[u8]) -> Self {
        Self {
            ssrc: read_u32(b, 0),
            fraction_lost: b[4],
            cumulative_lost: u32::from_be_bytes([0, b[5], b[6], b[7]]),
            highest_seq: read_u32(b, 8),
            jitter: read_u32(b, 12),
            last_sr: read_u32(b, 16),
            delay_since_last_sr: read_u32(b, 20),
        }
    }

    /// Round trip time derived from LSR/DLSR, given the current compact NTP time.
    ///
    /// Returns `None` when the receiver has not seen a Sender Report yet.
    pub fn round_trip_time(&self, now_compact_ntp: u32) -> Option<Duration> {
        if self.last_sr == 0 {
            return None;
        }
        let rtt = now_compact_ntp
            .wrapping_sub(self.last_sr)
            .wrapping_sub(self.delay_since_last_sr);
        // Values in the upper half are clock skew, not a real RTT.
        if rtt > u32::MAX / 2 {
            return None;
        }
        Some(Duration::from_micros(u64::from(rtt) * 1_000_000 / 65_536))
    }
}

/// A decoded RTCP packet from a compound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport {
        ssrc: u32,
        reports: Vec<ReportBlock>,
    },
    ReceiverReport {
        ssrc: u32,
        reports: Vec<ReportBlock>,
    },
    PictureLossIndication {
        sender_ssrc: u32,
        media_ssrc: u32,
    },
    FullIntraRequest {
        sender_ssrc: u32,
        media_ssrc: u32,
    },
    Nack {
        sender_ssrc: u32,
        media_ssrc: u32,
        lost: Vec<u16>,
    },
    Remb {
        sender_ssrc: u32,
        bitrate_bps: u64,
        ssrcs: Vec<u32>,
    },
    Other {
        packet_type: u8,
    },
}

fn read_u32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn malformed(kind: RtcpErrorKind) -> PacketizerError {
    PacketizerError::MalformedRtcp { kind }
}

/// Quick check used to demultiplex RTCP from RTP on a shared socket (RFC 5761 §4).
pub fn is_rtcp(data: &[u8]) -> bool {
    data.len() >= 4 && data[0] >> 6 == 2 && (192..=223).contains(&data[1])
}

/// Parse every packet in a compound RTCP datagram.
///
/// The whole datagram is rejected if any common header is invalid.
pub fn parse_compound(data: &[u8]) -> Result<Vec<RtcpPacket>> {
    let mut packets = Vec::new();
    let mut offset = 0usize;

    if data.is_empty() {
        return Err(malformed(RtcpErrorKind::Truncated));
    }

    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < 4 {
            return Err(malformed(RtcpErrorKind::Truncated));
        }
        if rest[0] >> 6 != 2 {
            return Err(malformed(RtcpErrorKind::BadVersion));
        }
        let count = rest[0] & 0x1f;
        let packet_type = rest[1];
        if !(192..=223).contains(&packet_type) {
            return Err(malformed(RtcpErrorKind::NotRtcp));
        }
        let total = (usize::from(u16::from_be_bytes([rest[2], rest[3]])) + 1) * 4;
        if total > rest.len() {
            return Err(malformed(RtcpErrorKind::LengthOverflow));
        }

        packets.push(parse_packet(count, packet_type, &rest[4..total]));
        offset += total;
    }

    Ok(packets)
}

fn parse_report_blocks(body: &[u8], count: u8) -> Vec<ReportBlock> {
    body.chunks_exact(REPORT_BLOCK_LEN)
        .take(usize::from(count))
        .map(ReportBlock::parse)
        .collect()
}

fn parse_packet(count: u8, packet_type: u8, body: &[u8]) -> RtcpPacket {
    let other = RtcpPacket::Other { packet_type };
    match packet_type {
        PT_SR if body.len() >= 24 => RtcpPacket::SenderReport {
            ssrc: read_u32(body, 0),
            reports: parse_report_blocks(&body[24..], count),
        },
        PT_RR if body.len() >= 4 => RtcpPacket::ReceiverReport {
            ssrc: read_u32(body, 0),
            reports: parse_report_blocks(&body[4..], count),
        },
        PT_RTPFB if count == FMT_NACK && body.len() >= 8 => {
            let lost = body[8..]
                .chunks_exact(4)
                .flat_map(|fci| {
                    let pid = u16::from_be_bytes([fci[0], fci[1]]);
                    let blp = u16::from_be_bytes([fci[2], fci[3]]);
                    std::iter::once(pid).chain(
                        (0..16u16)
                            .filter(move |bit| blp & (1 << bit) != 0)
                            .map(move |bit| pid.wrapping_add(bit + 1)),
                    )
                })
                .collect();
            RtcpPacket::Nack {
                sender_ssrc: read_u32(body, 0),
                media_ssrc: read_u32(body, 4),
                lost,
            }
        }
        PT_PSFB if count == FMT_PLI && body.len() >= 8 => RtcpPacket::PictureLossIndication {
            sender_ssrc: read_u32(body, 0),
            media_ssrc: read_u32(body, 4),
        },
        // FIR targets the SSRC carried in its FCI, not the common header.
        PT_PSFB if count == FMT_FIR && body.len() >= 16 => RtcpPacket::FullIntraRequest {
            sender_ssrc: read_u32(body, 0),
            media_ssrc: read_u32(body, 8),
        },
        PT_PSFB if count == FMT_AFB && body.len() >= 16 && &body[8..12] == b"REMB" => {
            let num_ssrc = usize::from(body[12]);
            let exp = u32::from(body[13] >> 2);
            let mantissa =
                (u64::from(body[13] & 0x03) << 16) | (u64::from(body[14]) << 8) | u64::from(body[15]);
            let ssrcs = body[16..]
                .chunks_exact(4)
                .take(num_ssrc)
                .map(|s| read_u32(s, 0))
                .collect();
            RtcpPacket::Remb {
                sender_ssrc: read_u32(body, 0),
                bitrate_bps: remb_bitrate(mantissa, exp),
                ssrcs,
            }
        }
        _ => other,
    }
}

/// `mantissa * 2^exp`, saturating when set bits would shift out.
fn remb_bitrate(mantissa: u64, exp: u32) -> u64 {
    if mantissa.leading_zeros() < exp {
        u64::MAX
    } else {
        mantissa << exp
    }
}

/// 64-bit NTP timestamp (RFC 3550 §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_unix(since_epoch)
    }

    pub fn from_unix(since_epoch: Duration) -> Self {
        let seconds = (since_epoch.as_secs() + NTP_UNIX_OFFSET_SECS) as u32;
        let fraction = ((u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000) as u32;
        Self { seconds, fraction }
    }

    /// Middle 32 bits, as echoed back in the LSR field of report blocks.
    pub fn compact(&self) -> u32 {
        (self.seconds << 16) | (self.fraction >> 16)
    }
}

/// Serialize a Sender Report without report blocks (RFC 3550 §6.4.1).
pub fn sender_report(
    ssrc: u32,
    ntp: NtpTimestamp,
    rtp_timestamp: u32,
    packet_count: u32,
    octet_count: u32,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(28);
    buf.push(2 << 6);
    buf.push(PT_SR);
    buf.extend_from_slice(&6u16.to_be_bytes());
    buf.extend_from_slice(&ssrc.to_be_bytes());
    buf.extend_from_slice(&ntp.seconds.to_be_bytes());
    buf.extend_from_slice(&ntp.fraction.to_be_bytes());
    buf.extend_from_slice(&rtp_timestamp.to_be_bytes());
    buf.extend_from_slice(&packet_count.to_be_bytes());
    buf.extend_from_slice(&octet_count.to_be_bytes());
    buf
}
