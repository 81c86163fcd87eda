//! The packetization engine seam.
//!
//! An engine turns frames into RTP packets, keeps retransmission state, and
//! parses inbound RTCP. It talks back to the packetizer through three
//! narrow callbacks collected in [`EngineCallbacks`]:
//!
//! | Callback | Direction | Carries |
//! |----------|-----------|---------|
//! | [`OutgoingTransport`] | engine → sink | serialized RTP and RTCP |
//! | [`IntraFrameObserver`] | engine → producer | PLI / FIR from receivers |
//! | [`BandwidthObserver`] | engine → controller | REMB and receiver reports |
//!
//! [`RtpEngine`] is the bundled implementation.

pub mod rtp;

use std::sync::Arc;

use crate::bitrate::BandwidthObserver;
use crate::error::Result;
use crate::media::codec::{CodecDescriptor, CodecHeader, FrameKind};
use crate::media::fragment::FragmentationMap;
use crate::scheduler::PeriodicModule;

pub use rtp::{RtpEngine, RtpEngineConfig};

/// One frame handed to [`PacketizationEngine::send_frame`].
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    pub kind: FrameKind,
    pub payload_type: u8,
    /// 90 kHz RTP timestamp.
    pub timestamp: u32,
    pub capture_time_ms: i64,
    pub payload: &'a [u8],
    /// NAL boundaries for Annex B codecs, `None` for VPx.
    pub fragmentation: Option<&'a FragmentationMap>,
    pub codec_header: CodecHeader,
}

/// Where the engine writes serialized packets.
pub trait OutgoingTransport: Send + Sync {
    /// Returns false when the packet could not be handed off.
    fn send_rtp(&self, packet: &[u8]) -> bool;

    fn send_rtcp(&self, packet: &[u8]) -> bool;
}

/// Receives remote key-frame requests.
pub trait IntraFrameObserver: Send + Sync {
    fn on_received_intra_frame_request(&self, ssrc: u32);
}

/// Callbacks handed to the engine factory at construction.
#[derive(Clone)]
pub struct EngineCallbacks {
    pub transport: Arc<dyn OutgoingTransport>,
    pub intra_frame_observer: Arc<dyn IntraFrameObserver>,
    pub bandwidth_observer: Arc<dyn BandwidthObserver>,
}

/// RTP/RTCP engine driven by the packetizer.
///
/// Sends and RTCP ingestion happen concurrently under a shared lock, so
/// implementations synchronize their own state.
pub trait PacketizationEngine: PeriodicModule {
    fn send_frame(&self, request: &SendRequest<'_>) -> Result<()>;

    fn register_send_payload(&self, codec: &CodecDescriptor) -> Result<()>;

    /// Parse a compound RTCP datagram. Returns the number of bytes consumed.
    fn ingest_control_packet(&self, packet: &[u8]) -> Result<usize>;

    fn ssrc(&self) -> u32;

    fn set_retransmission_store(&self, enabled: bool, history_depth: usize);

    fn set_forward_error_correction(&self, enabled: bool, red_payload_type: u8, fec_payload_type: u8);

    fn set_receiver_estimated_bandwidth(&self, enabled: bool);
}
