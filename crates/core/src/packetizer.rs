//! The frame packetizer: gate, negotiate, fragment, send.
//!
//! ```text
//! Frame ──► enabled? ──► KeyFrameGate ──► CodecNegotiator ──► fragment_annex_b ──► engine.send_frame
//!                             │                 (on change)        (H.264/H.265)      (read lock)
//!                             └──► FeedbackReceiver (key frame request)
//! ```
//!
//! ## Locking
//!
//! | Lock | Held by |
//! |------|---------|
//! | stream state (`Mutex`) | gate decision and negotiation |
//! | engine slot (`RwLock`) | read: sends and RTCP ingestion; write: registration and teardown |
//! | transport binding (`RwLock`) | read: delivery; write: bind and unbind |
//!
//! Negotiation takes the engine write lock while the stream mutex is held.
//! Sends take the engine read lock only after the stream mutex is released,
//! so a slow send never blocks the gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::bitrate::{BitrateBounds, BitrateController, NetworkObserver};
use crate::config::PacketizerConfig;
use crate::engine::{
    EngineCallbacks, IntraFrameObserver, PacketizationEngine, RtpEngine, RtpEngineConfig,
    SendRequest,
};
use crate::error::{PacketizerError, Result};
use crate::feedback::{
    ControlPacketIngress, EngineSlot, FeedbackChannel, FeedbackReceiver, KeyFrameReason,
    NetworkChangeLog,
};
use crate::frame::Frame;
use crate::gate::{GateDecision, GateState, KeyFrameGate};
use crate::media::codec::{CodecDescriptor, CodecHeader, FrameKind};
use crate::media::fragment::fragment_annex_b;
use crate::negotiator::{CodecNegotiator, StreamFormat};
use crate::scheduler::{ModuleId, Scheduler};
use crate::sync::Guarded;
use crate::transport::{MediaSink, RtcpFeedbackSink, TransportBinding};

/// What happened to a frame passed to [`VideoFramePacketizer::on_encoded_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Handed to the engine.
    Sent,
    /// Dropped silently because sending is disabled.
    Disabled,
    /// Dropped while waiting for the first key frame. A key frame was requested.
    AwaitingKeyFrame,
    /// The format has no RTP mapping.
    UnsupportedFormat,
    /// The engine rejected the codec for this format and resolution.
    NegotiationFailed,
    /// The Annex B payload could not be split into NAL units.
    MalformedBitstream,
    /// The engine failed to send the frame.
    SendFailed,
    /// The packetizer has been closed.
    Closed,
}

struct StreamState {
    gate: KeyFrameGate,
    negotiator: CodecNegotiator,
}

/// Sender side of one video stream.
///
/// Frames arrive from the producer on one thread while RTCP feedback,
/// transport changes, and control calls arrive on others. All methods take
/// `&self`.
pub struct VideoFramePacketizer {
    engine: EngineSlot,
    binding: Arc<TransportBinding>,
    ingress: Arc<ControlPacketIngress>,
    stream: Mutex<StreamState>,
    enabled: AtomicBool,
    closed: AtomicBool,
    controller: Arc<dyn BitrateController>,
    scheduler: Box<dyn Scheduler>,
    module: Mutex<Option<ModuleId>>,
    feedback: FeedbackChannel,
}

impl VideoFramePacketizer {
    /// Build a packetizer around the engine returned by `factory`.
    ///
    /// The engine is configured from `config`, the controller gets the
    /// initial bitrate envelope, and the engine is registered with a freshly
    /// started `scheduler`.
    pub fn new<E, F>(
        config: &PacketizerConfig,
        upstream: Arc<dyn FeedbackReceiver>,
        controller: Arc<dyn BitrateController>,
        scheduler: Box<dyn Scheduler>,
        factory: F,
    ) -> Result<Self>
    where
        E: PacketizationEngine + 'static,
        F: FnOnce(EngineCallbacks) -> Arc<E>,
    {
        let binding = Arc::new(TransportBinding::new());
        let feedback = FeedbackChannel::new(upstream);

        let engine = factory(EngineCallbacks {
            transport: binding.clone(),
            intra_frame_observer: Arc::new(feedback.clone()),
            bandwidth_observer: controller.bandwidth_observer(),
        });

        engine.set_retransmission_store(config.nack_history_depth > 0, config.nack_history_depth);
        engine.set_forward_error_correction(
            config.fec_enabled(),
            config.red_payload_type,
            config.ulpfec_payload_type,
        );
        engine.set_receiver_estimated_bandwidth(config.receiver_estimated_bandwidth);

        controller.set_start_bitrate_bps(config.initial_start_bitrate_kbps.saturating_mul(1000));
        controller.set_bitrate_bounds_bps(0, 0);
        let network_log: Arc<dyn NetworkObserver> = Arc::new(NetworkChangeLog);
        controller.set_network_observer(Some(network_log));

        scheduler.start()?;
        let module = scheduler.register_module(engine.clone());

        let ssrc = engine.ssrc();
        let engine: Arc<dyn PacketizationEngine> = engine;
        let engine: EngineSlot = Arc::new(Guarded::new(Some(engine)));
        let ingress = Arc::new(ControlPacketIngress::new(engine.clone()));

        tracing::info!(ssrc = format_args!("{:#010X}", ssrc), "video packetizer created");

        Ok(Self {
            engine,
            binding,
            ingress,
            stream: Mutex::new(StreamState {
                gate: KeyFrameGate::new(),
                negotiator: CodecNegotiator::new(),
            }),
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            controller,
            scheduler,
            module: Mutex::new(Some(module)),
            feedback,
        })
    }

    /// Build a packetizer around the bundled [`RtpEngine`].
    ///
    /// Fails with [`PacketizerError::MtuTooSmall`] before anything is started
    /// when `engine_config` cannot carry media.
    pub fn with_rtp_engine(
        config: &PacketizerConfig,
        engine_config: RtpEngineConfig,
        upstream: Arc<dyn FeedbackReceiver>,
        controller: Arc<dyn BitrateController>,
        scheduler: Box<dyn Scheduler>,
    ) -> Result<Self> {
        engine_config.validate()?;
        Self::new(config, upstream, controller, scheduler, |callbacks| {
            Arc::new(RtpEngine::new(engine_config, callbacks))
        })
    }

    /// Gate, negotiate, fragment, and send one frame.
    pub fn on_encoded_frame(&self, frame: &Frame<'_>) -> FrameOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return FrameOutcome::Closed;
        }
        if !self.enabled.load(Ordering::SeqCst) {
            tracing::trace!(timestamp = frame.timestamp, "disabled, frame dropped");
            return FrameOutcome::Disabled;
        }

        let descriptor = {
            let mut stream = self.stream.lock();
            if stream.gate.admit(frame.is_key_frame()) == GateDecision::RequestKeyFrame {
                drop(stream);
                tracing::debug!(timestamp = frame.timestamp, "key frame has not arrived, frame dropped");
                self.feedback.request_key_frame(KeyFrameReason::AwaitingKeyFrame);
                return FrameOutcome::AwaitingKeyFrame;
            }

            match stream
                .negotiator
                .ensure(StreamFormat::of(frame), |codec, bounds| self.apply_codec(codec, bounds))
            {
                Ok(negotiated) => negotiated.descriptor,
                Err(PacketizerError::UnsupportedFormat(format)) => {
                    tracing::warn!(%format, "no payload mapping, frame dropped");
                    return FrameOutcome::UnsupportedFormat;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "send codec negotiation failed, frame dropped");
                    return FrameOutcome::NegotiationFailed;
                }
            }
        };

        self.send(frame, &descriptor)
    }

    /// Push bounds to the controller and register the payload with the engine.
    fn apply_codec(&self, codec: &CodecDescriptor, bounds: BitrateBounds) -> Result<()> {
        self.controller.set_start_bitrate_bps(bounds.start_bps());
        self.controller
            .set_bitrate_bounds_bps(bounds.min_bps(), bounds.max_bps());

        self.engine.with_write(|engine| match engine {
            Some(engine) => engine.register_send_payload(codec),
            None => Err(PacketizerError::EngineClosed),
        })
    }

    fn send(&self, frame: &Frame<'_>, descriptor: &CodecDescriptor) -> FrameOutcome {
        debug_assert_eq!(
            descriptor.frame_format(),
            frame.format,
            "send codec does not match the frame"
        );
        let fragmentation = if frame.format.is_nal_based() {
            match fragment_annex_b(frame.payload) {
                Ok(map) => Some(map),
                Err(e) => {
                    tracing::warn!(error = %e, len = frame.len(), "malformed Annex B frame dropped");
                    return FrameOutcome::MalformedBitstream;
                }
            }
        } else {
            None
        };

        let kind = if frame.is_key_frame() {
            FrameKind::Key
        } else {
            FrameKind::Delta
        };
        let request = SendRequest {
            kind,
            payload_type: descriptor.payload_type,
            timestamp: frame.timestamp,
            capture_time_ms: frame.capture_time_ms(),
            payload: frame.payload,
            fragmentation: fragmentation.as_ref(),
            codec_header: CodecHeader::for_frame(descriptor.kind, kind),
        };

        let result = self.engine.with_read(|engine| match engine {
            Some(engine) => engine.send_frame(&request),
            None => Err(PacketizerError::EngineClosed),
        });

        match result {
            Ok(()) => FrameOutcome::Sent,
            Err(PacketizerError::EngineClosed) => FrameOutcome::Closed,
            Err(e) => {
                tracing::warn!(error = %e, "engine failed to send frame");
                FrameOutcome::SendFailed
            }
        }
    }

    /// A receiver asked for a key frame (PLI/FIR).
    pub fn on_received_intra_frame_request(&self, ssrc: u32) {
        self.feedback.on_received_intra_frame_request(ssrc);
    }

    /// Accepted and logged. Per-receiver rate changes are not forwarded to the producer.
    pub fn on_network_changed(&self, target_bitrate_bps: u32, fraction_loss: u8, rtt_ms: u64) {
        NetworkChangeLog.on_network_changed(target_bitrate_bps, fraction_loss, rtt_ms);
    }

    /// Hand inbound RTCP to the engine. Returns the bytes consumed, 0 on failure.
    pub fn deliver_feedback(&self, packet: &[u8]) -> usize {
        self.ingress.deliver_feedback(packet)
    }

    /// Enable or disable sending.
    ///
    /// Re-enabling requests one key frame so receivers can resume decoding.
    /// The gate is not reset.
    pub fn set_enabled(&self, enabled: bool) {
        let was_enabled = self.enabled.swap(enabled, Ordering::SeqCst);
        tracing::debug!(enabled, "packetizer enabled state set");
        if enabled && !was_enabled {
            self.feedback.request_key_frame(KeyFrameReason::Reenabled);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Ask the producer for a key frame.
    pub fn request_key_frame(&self) {
        self.feedback.request_key_frame(KeyFrameReason::Forced);
    }

    /// Attach `sink`, replacing any current one.
    ///
    /// The sink learns the engine's SSRC and, if it has a feedback source,
    /// starts routing RTCP into the engine.
    pub fn bind_transport(&self, sink: Arc<dyn MediaSink>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PacketizerError::EngineClosed);
        }
        let ssrc = self
            .engine
            .with_read(|engine| engine.as_ref().map(|e| e.ssrc()))
            .ok_or(PacketizerError::EngineClosed)?;
        // A concurrent close() may have shut the binding since the check above.
        self.binding.bind(sink, ssrc, self.ingress.clone())
    }

    /// Detach the current sink. Idempotent.
    pub fn unbind_transport(&self) {
        self.binding.unbind();
    }

    pub fn is_transport_bound(&self) -> bool {
        self.binding.is_bound()
    }

    /// SSRC of the outgoing stream, `None` after close.
    pub fn ssrc(&self) -> Option<u32> {
        self.engine
            .with_read(|engine| engine.as_ref().map(|e| e.ssrc()))
    }

    pub fn gate_state(&self) -> GateState {
        self.stream.lock().gate.state()
    }

    /// The codec negotiated for the current stream, if any.
    pub fn active_codec(&self) -> Option<CodecDescriptor> {
        self.stream
            .lock()
            .negotiator
            .active()
            .map(|(_, descriptor)| descriptor.clone())
    }

    /// Tear down. Idempotent, also run on drop.
    ///
    /// The sink and its feedback wiring go first, then the network observer,
    /// then the engine leaves the scheduler, the scheduler stops, and finally
    /// the engine is released under the write lock.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.binding.shut_down();
        self.controller.set_network_observer(None);
        if let Some(module) = self.module.lock().take() {
            self.scheduler.deregister_module(module);
        }
        self.scheduler.stop();
        let released = self.engine.with_write(Option::take);
        drop(released);

        tracing::info!("video packetizer closed");
    }
}

impl Drop for VideoFramePacketizer {
    fn drop(&mut self) {
        self.close();
    }
}
