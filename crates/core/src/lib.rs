//! Video frame packetizer.
//!
//! Sits between a video encoder and an RTP engine: holds frames back until
//! the first key frame, (re)negotiates the send codec and bitrate envelope
//! when the format or resolution changes, splits Annex B payloads into NAL
//! units, and hands everything to a [`PacketizationEngine`]. Receiver
//! feedback flows the other way, ending as key-frame requests to the
//! producer and bandwidth signals to a [`BitrateController`].
//!
//! The engine, bitrate controller, scheduler, and media sink are traits.
//! [`RtpEngine`], [`BoundedBitrateController`], [`ThreadScheduler`], and
//! [`UdpSink`] are minimal implementations of each.

pub mod bitrate;
pub mod config;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod frame;
pub mod gate;
pub mod media;
pub mod negotiator;
pub mod packetizer;
pub mod scheduler;
pub mod sync;
pub mod transport;

pub use bitrate::{BitrateBounds, BitrateController, BoundedBitrateController};
pub use config::PacketizerConfig;
pub use engine::{PacketizationEngine, RtpEngine, RtpEngineConfig};
pub use error::{PacketizerError, Result};
pub use feedback::{FeedbackCommand, FeedbackMsg, FeedbackReceiver, FeedbackType};
pub use frame::{Frame, FrameFormat, VideoFrameInfo};
pub use gate::GateState;
pub use packetizer::{FrameOutcome, VideoFramePacketizer};
pub use scheduler::{Scheduler, ThreadScheduler};
pub use transport::{MediaSink, UdpSink};
