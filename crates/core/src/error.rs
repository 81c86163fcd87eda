//! Error types for the frame packetizer.

use std::fmt;

use crate::frame::FrameFormat;

/// Errors that can occur while packetizing frames or handling feedback.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Bitstream**: [`MalformedBitstream`](Self::MalformedBitstream): an
///   Annex B buffer without usable start codes.
/// - **Negotiation**: [`UnsupportedFormat`](Self::UnsupportedFormat),
///   [`NegotiationFailed`](Self::NegotiationFailed),
///   [`PayloadRejected`](Self::PayloadRejected).
/// - **Engine**: [`PayloadNotRegistered`](Self::PayloadNotRegistered),
///   [`MtuTooSmall`](Self::MtuTooSmall),
///   [`MalformedRtcp`](Self::MalformedRtcp),
///   [`EngineClosed`](Self::EngineClosed).
/// - **Scheduler**: [`AlreadyRunning`](Self::AlreadyRunning).
///
/// None of these escape [`VideoFramePacketizer`](crate::VideoFramePacketizer):
/// it logs them and reports a [`FrameOutcome`](crate::FrameOutcome) or a byte
/// count instead.
#[derive(Debug, thiserror::Error)]
pub enum PacketizerError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Annex B scan could not find a NAL unit at `offset`.
    #[error("malformed bitstream at offset {offset}: {kind}")]
    MalformedBitstream {
        offset: usize,
        kind: BitstreamErrorKind,
    },

    /// The frame format has no RTP payload mapping (e.g. raw I420).
    #[error("unsupported frame format: {0}")]
    UnsupportedFormat(FrameFormat),

    /// A previous negotiation for this exact format/resolution failed.
    #[error("negotiation previously failed for {format} {width}x{height}")]
    NegotiationFailed {
        format: FrameFormat,
        width: u32,
        height: u32,
    },

    /// The engine refused to register a send payload.
    #[error("payload type {payload_type} rejected: {reason}")]
    PayloadRejected {
        payload_type: u8,
        reason: &'static str,
    },

    /// The MTU leaves no room for payload after the RTP and codec headers.
    #[error("MTU of {mtu} bytes cannot carry any payload")]
    MtuTooSmall { mtu: usize },

    /// A frame was handed to the engine for a payload type it never registered.
    #[error("payload type {0} not registered")]
    PayloadNotRegistered(u8),

    /// Inbound RTCP could not be parsed.
    #[error("malformed RTCP: {kind}")]
    MalformedRtcp { kind: RtcpErrorKind },

    /// The engine has already been released by teardown.
    #[error("packetization engine closed")]
    EngineClosed,

    /// [`Scheduler::start`](crate::scheduler::Scheduler::start) was called while already running.
    #[error("scheduler already running")]
    AlreadyRunning,
}

/// Specific kind of Annex B scan failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitstreamErrorKind {
    /// No `00 00 01` / `00 00 00 01` start code in the remaining bytes.
    MissingStartCode,
    /// A start code was immediately followed by another start code or the end of data.
    EmptyUnit,
}

impl fmt::Display for BitstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStartCode => write!(f, "missing start code"),
            Self::EmptyUnit => write!(f, "empty NAL unit"),
        }
    }
}

/// Specific kind of RTCP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpErrorKind {
    /// Fewer than 4 bytes remain for a common header.
    Truncated,
    /// Version field is not 2.
    BadVersion,
    /// Header length points past the end of the datagram.
    LengthOverflow,
    /// Packet type is outside the RTCP range (192–223).
    NotRtcp,
}

impl fmt::Display for RtcpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated header"),
            Self::BadVersion => write!(f, "bad version"),
            Self::LengthOverflow => write!(f, "length exceeds datagram"),
            Self::NotRtcp => write!(f, "not an RTCP packet type"),
        }
    }
}

/// Convenience alias for `Result<T, PacketizerError>`.
pub type Result<T> = std::result::Result<T, PacketizerError>;
