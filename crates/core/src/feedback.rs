//! Feedback toward the producer and RTCP ingress from the sink.
//!
//! Outbound, every reason to want a fresh key frame ends up as one
//! [`FeedbackMsg`] delivered to the upstream [`FeedbackReceiver`]. Inbound,
//! [`ControlPacketIngress`] is what a sink's feedback source calls with raw
//! RTCP bytes.

use std::sync::Arc;

use crate::bitrate::NetworkObserver;
use crate::engine::{IntraFrameObserver, PacketizationEngine};
use crate::sync::Guarded;
use crate::transport::RtcpFeedbackSink;

/// Shared, replaceable handle to the engine.
pub(crate) type EngineSlot = Arc<Guarded<Option<Arc<dyn PacketizationEngine>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackType {
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackCommand {
    RequestKeyFrame,
}

/// Application-level feedback sent to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackMsg {
    pub kind: FeedbackType,
    pub command: FeedbackCommand,
}

impl FeedbackMsg {
    pub const fn request_key_frame() -> Self {
        Self {
            kind: FeedbackType::Video,
            command: FeedbackCommand::RequestKeyFrame,
        }
    }
}

/// The upstream producer (usually an encoder).
///
/// Called with no packetizer lock held, from the frame thread or a sink's
/// feedback thread.
pub trait FeedbackReceiver: Send + Sync {
    fn on_feedback(&self, msg: FeedbackMsg);
}

/// Why a key frame was requested. Logged only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFrameReason {
    AwaitingKeyFrame,
    RemoteIntraRequest,
    Reenabled,
    Forced,
}

/// Sends key-frame requests to the producer.
#[derive(Clone)]
pub struct FeedbackChannel {
    upstream: Arc<dyn FeedbackReceiver>,
}

impl FeedbackChannel {
    pub fn new(upstream: Arc<dyn FeedbackReceiver>) -> Self {
        Self { upstream }
    }

    pub fn request_key_frame(&self, reason: KeyFrameReason) {
        tracing::debug!(?reason, "requesting key frame");
        self.upstream.on_feedback(FeedbackMsg::request_key_frame());
    }
}

impl IntraFrameObserver for FeedbackChannel {
    fn on_received_intra_frame_request(&self, ssrc: u32) {
        tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "remote intra frame request");
        self.request_key_frame(KeyFrameReason::RemoteIntraRequest);
    }
}

/// Routes inbound RTCP into the current engine.
#[derive(Clone)]
pub struct ControlPacketIngress {
    engine: EngineSlot,
}

impl ControlPacketIngress {
    pub(crate) fn new(engine: EngineSlot) -> Self {
        Self { engine }
    }
}

impl RtcpFeedbackSink for ControlPacketIngress {
    /// Bytes consumed, or 0 when parsing failed or the engine is gone.
    ///
    /// The engine handle is cloned out of the slot and the packet is ingested
    /// with no lock held, so a producer reacting to a key-frame request may
    /// call straight back into the packetizer.
    fn deliver_feedback(&self, packet: &[u8]) -> usize {
        let Some(engine) = self.engine.with_read(Option::clone) else {
            tracing::trace!("feedback after close dropped");
            return 0;
        };
        match engine.ingest_control_packet(packet) {
            Ok(consumed) => consumed,
            Err(e) => {
                tracing::warn!(error = %e, len = packet.len(), "dropping control packet");
                0
            }
        }
    }
}

/// Network change notifications are logged, not forwarded to the producer.
#[derive(Debug, Default)]
pub struct NetworkChangeLog;

impl NetworkObserver for NetworkChangeLog {
    fn on_network_changed(&self, target_bitrate_bps: u32, fraction_loss: u8, rtt_ms: u64) {
        tracing::debug!(target_bitrate_bps, fraction_loss, rtt_ms, "network changed");
    }
}
