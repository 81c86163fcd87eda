//! Downstream media sink seams.
//!
//! A [`MediaSink`] receives serialized RTP and RTCP from the engine. Sinks
//! that can hear back from receivers expose a [`FeedbackSource`], which the
//! packetizer wires to an [`RtcpFeedbackSink`] on bind and clears on unbind.
//!
//! - [`binding`]: the swap-safe slot holding the current sink.
//! - [`udp`]: a sink over one UDP socket, with RTCP read back on the same port.

pub mod binding;
pub mod udp;

use std::sync::Arc;

pub use binding::TransportBinding;
pub use udp::UdpSink;

/// Destination for serialized packets.
pub trait MediaSink: Send + Sync {
    fn deliver_encoded_video(&self, data: &[u8]);

    /// SSRC of the stream this sink carries.
    fn set_ssrc(&self, ssrc: u32);

    /// Inbound feedback path, if the sink has one.
    fn feedback_source(&self) -> Option<Arc<dyn FeedbackSource>>;
}

/// Produces inbound RTCP for whoever is attached.
pub trait FeedbackSource: Send + Sync {
    fn set_feedback_sink(&self, sink: Option<Arc<dyn RtcpFeedbackSink>>);
}

/// Consumes inbound RTCP.
pub trait RtcpFeedbackSink: Send + Sync {
    /// Returns the number of bytes consumed, 0 on failure.
    fn deliver_feedback(&self, packet: &[u8]) -> usize;
}
