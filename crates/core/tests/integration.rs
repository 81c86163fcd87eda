//! Integration tests: the packetizer driven end to end against recording
//! collaborators, plus one run over the bundled RTP engine and UDP sink.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use packetizer::bitrate::{BandwidthObserver, NetworkObserver};
use packetizer::engine::{EngineCallbacks, IntraFrameObserver, OutgoingTransport, SendRequest};
use packetizer::media::codec::{CodecDescriptor, FrameKind};
use packetizer::scheduler::{ModuleId, PeriodicModule};
use packetizer::transport::{FeedbackSource, RtcpFeedbackSink};
use packetizer::{
    BitrateController, BoundedBitrateController, FeedbackMsg, FeedbackReceiver, Frame,
    FrameFormat, FrameOutcome, GateState, MediaSink, PacketizationEngine, PacketizerConfig,
    PacketizerError, Result, RtpEngine, RtpEngineConfig, Scheduler, ThreadScheduler, UdpSink,
    VideoFramePacketizer, VideoFrameInfo,
};

type Log = Arc<Mutex<Vec<String>>>;

// ── Recording collaborators ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct SentFrame {
    kind: FrameKind,
    payload_type: u8,
    timestamp: u32,
    capture_time_ms: i64,
    fragments: Option<Vec<(usize, usize)>>,
}

struct MockEngine {
    callbacks: EngineCallbacks,
    sent: Mutex<Vec<SentFrame>>,
    registered: Mutex<Vec<CodecDescriptor>>,
    reject_payload: Option<u8>,
    nack: Mutex<Option<(bool, usize)>>,
    fec: Mutex<Option<(bool, u8, u8)>>,
    remb: Mutex<Option<bool>>,
    log: Log,
}

impl MockEngine {
    fn new(callbacks: EngineCallbacks, log: Log, reject_payload: Option<u8>) -> Self {
        Self {
            callbacks,
            sent: Mutex::new(Vec::new()),
            registered: Mutex::new(Vec::new()),
            reject_payload,
            nack: Mutex::new(None),
            fec: Mutex::new(None),
            remb: Mutex::new(None),
            log,
        }
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.log.lock().push("engine released".into());
    }
}

impl PeriodicModule for MockEngine {
    fn time_until_next_process(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn process(&self) {}
}

impl PacketizationEngine for MockEngine {
    fn send_frame(&self, request: &SendRequest<'_>) -> Result<()> {
        self.sent.lock().push(SentFrame {
            kind: request.kind,
            payload_type: request.payload_type,
            timestamp: request.timestamp,
            capture_time_ms: request.capture_time_ms,
            fragments: request
                .fragmentation
                .map(|m| m.iter().map(|f| (f.offset, f.length)).collect()),
        });
        // Exercise the outgoing path so sinks see traffic.
        self.callbacks.transport.send_rtp(request.payload);
        Ok(())
    }

    fn register_send_payload(&self, codec: &CodecDescriptor) -> Result<()> {
        if self.reject_payload == Some(codec.payload_type) {
            return Err(PacketizerError::PayloadRejected {
                payload_type: codec.payload_type,
                reason: "test rejection",
            });
        }
        self.registered.lock().push(codec.clone());
        Ok(())
    }

    fn ingest_control_packet(&self, packet: &[u8]) -> Result<usize> {
        if packet.first() == Some(&0xFF) {
            return Err(PacketizerError::MalformedRtcp {
                kind: packetizer::error::RtcpErrorKind::BadVersion,
            });
        }
        Ok(packet.len())
    }

    fn ssrc(&self) -> u32 {
        0x1234_5678
    }

    fn set_retransmission_store(&self, enabled: bool, history_depth: usize) {
        *self.nack.lock() = Some((enabled, history_depth));
    }

    fn set_forward_error_correction(&self, enabled: bool, red: u8, fec: u8) {
        *self.fec.lock() = Some((enabled, red, fec));
    }

    fn set_receiver_estimated_bandwidth(&self, enabled: bool) {
        *self.remb.lock() = Some(enabled);
    }
}

struct MockController {
    log: Log,
    start: Mutex<Vec<u32>>,
    bounds: Mutex<Vec<(u32, u32)>>,
    observer: Mutex<Option<Arc<dyn NetworkObserver>>>,
}

struct NoopBandwidth;

impl BandwidthObserver for NoopBandwidth {
    fn on_estimated_bitrate(&self, _bitrate_bps: u32) {}
    fn on_receiver_report(&self, _fraction_loss: u8, _rtt_ms: u64) {}
}

impl BitrateController for MockController {
    fn set_start_bitrate_bps(&self, start_bps: u32) {
        self.start.lock().push(start_bps);
    }

    fn set_bitrate_bounds_bps(&self, min_bps: u32, max_bps: u32) {
        self.bounds.lock().push((min_bps, max_bps));
    }

    fn bandwidth_observer(&self) -> Arc<dyn BandwidthObserver> {
        Arc::new(NoopBandwidth)
    }

    fn set_network_observer(&self, observer: Option<Arc<dyn NetworkObserver>>) {
        if observer.is_none() {
            self.log.lock().push("network observer cleared".into());
        }
        *self.observer.lock() = observer;
    }
}

struct MockScheduler {
    log: Log,
    modules: Mutex<Vec<(ModuleId, Arc<dyn PeriodicModule>)>>,
    next_id: Mutex<u64>,
}

impl Scheduler for MockScheduler {
    fn start(&self) -> Result<()> {
        self.log.lock().push("scheduler started".into());
        Ok(())
    }

    fn stop(&self) {
        self.log.lock().push("scheduler stopped".into());
    }

    fn register_module(&self, module: Arc<dyn PeriodicModule>) -> ModuleId {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            ModuleId::new(*next)
        };
        self.modules.lock().push((id, module));
        self.log.lock().push("module registered".into());
        id
    }

    fn deregister_module(&self, id: ModuleId) {
        self.modules.lock().retain(|(m, _)| *m != id);
        self.log.lock().push("module deregistered".into());
    }
}

#[derive(Default)]
struct Upstream(Mutex<Vec<FeedbackMsg>>);

impl FeedbackReceiver for Upstream {
    fn on_feedback(&self, msg: FeedbackMsg) {
        self.0.lock().push(msg);
    }
}

impl Upstream {
    fn count(&self) -> usize {
        self.0.lock().len()
    }
}

struct MockSource {
    log: Log,
    sink: Mutex<Option<Arc<dyn RtcpFeedbackSink>>>,
}

impl FeedbackSource for MockSource {
    fn set_feedback_sink(&self, sink: Option<Arc<dyn RtcpFeedbackSink>>) {
        if sink.is_none() {
            self.log.lock().push("feedback detached".into());
        }
        *self.sink.lock() = sink;
    }
}

struct MockSink {
    data: Mutex<Vec<Vec<u8>>>,
    ssrc: Mutex<Option<u32>>,
    source: Arc<MockSource>,
}

impl MockSink {
    fn new(log: Log) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(Vec::new()),
            ssrc: Mutex::new(None),
            source: Arc::new(MockSource {
                log,
                sink: Mutex::new(None),
            }),
        })
    }
}

impl MediaSink for MockSink {
    fn deliver_encoded_video(&self, data: &[u8]) {
        self.data.lock().push(data.to_vec());
    }

    fn set_ssrc(&self, ssrc: u32) {
        *self.ssrc.lock() = Some(ssrc);
    }

    fn feedback_source(&self) -> Option<Arc<dyn FeedbackSource>> {
        Some(self.source.clone())
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

struct Harness {
    packetizer: VideoFramePacketizer,
    engine: Weak<MockEngine>,
    controller: Arc<MockController>,
    upstream: Arc<Upstream>,
    log: Log,
}

impl Harness {
    fn new() -> Self {
        Self::with(PacketizerConfig::default(), None)
    }

    fn with(config: PacketizerConfig, reject_payload: Option<u8>) -> Self {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let controller = Arc::new(MockController {
            log: log.clone(),
            start: Mutex::new(Vec::new()),
            bounds: Mutex::new(Vec::new()),
            observer: Mutex::new(None),
        });
        let scheduler = Box::new(MockScheduler {
            log: log.clone(),
            modules: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        });
        let upstream = Arc::new(Upstream::default());
        let mut engine = Weak::new();

        let engine_log = log.clone();
        let packetizer = VideoFramePacketizer::new(
            &config,
            upstream.clone(),
            controller.clone(),
            scheduler,
            |callbacks| {
                let e = Arc::new(MockEngine::new(callbacks, engine_log, reject_payload));
                engine = Arc::downgrade(&e);
                e
            },
        )
        .unwrap();

        Self {
            packetizer,
            engine,
            controller,
            upstream,
            log,
        }
    }

    fn engine(&self) -> Arc<MockEngine> {
        self.engine.upgrade().unwrap()
    }

    fn sends(&self) -> usize {
        self.engine().sent.lock().len()
    }

    fn negotiations(&self) -> usize {
        self.engine().registered.lock().len()
    }
}

fn video(width: u32, height: u32, is_key_frame: bool) -> VideoFrameInfo {
    VideoFrameInfo {
        width,
        height,
        is_key_frame,
    }
}

fn h264_frame(is_key_frame: bool) -> Vec<u8> {
    let mut data = vec![0, 0, 0, 1, 0x67, 1, 2, 3, 4, 5, 6];
    data.extend_from_slice(&[0, 0, 0, 1, 0x68, 1, 2, 3]);
    data.extend_from_slice(&[0, 0, 1]);
    data.push(if is_key_frame { 0x65 } else { 0x41 });
    data.extend_from_slice(&[9; 9]);
    data
}

// ── Construction and teardown ───────────────────────────────────────────

#[test]
fn construction_configures_engine_and_controller() {
    let h = Harness::new();
    let engine = h.engine();
    assert_eq!(*engine.nack.lock(), Some((true, 600)));
    assert_eq!(*engine.fec.lock(), Some((false, 116, 117)));
    assert_eq!(*engine.remb.lock(), Some(true));
    assert_eq!(*h.controller.start.lock(), vec![300_000]);
    assert_eq!(*h.controller.bounds.lock(), vec![(0, 0)]);
    assert!(h.controller.observer.lock().is_some());
    assert_eq!(
        *h.log.lock(),
        vec!["scheduler started".to_string(), "module registered".to_string()]
    );
    assert_eq!(h.packetizer.ssrc(), Some(0x1234_5678));
    assert_eq!(h.packetizer.gate_state(), GateState::AwaitingKeyFrame);
}

#[test]
fn fec_enabled_when_red_or_ulpfec() {
    let config = PacketizerConfig {
        enable_ulpfec: true,
        ..PacketizerConfig::default()
    };
    let h = Harness::with(config, None);
    assert_eq!(*h.engine().fec.lock(), Some((true, 116, 117)));
}

#[test]
fn teardown_order() {
    let h = Harness::new();
    let sink = MockSink::new(h.log.clone());
    h.packetizer.bind_transport(sink.clone()).unwrap();
    h.log.lock().clear();

    h.packetizer.close();
    h.packetizer.close();

    assert_eq!(
        *h.log.lock(),
        vec![
            "feedback detached".to_string(),
            "network observer cleared".to_string(),
            "module deregistered".to_string(),
            "scheduler stopped".to_string(),
            "engine released".to_string(),
        ]
    );
    assert!(h.engine.upgrade().is_none());
    assert_eq!(h.packetizer.ssrc(), None);

    let data = h264_frame(true);
    let frame = Frame::new(FrameFormat::H264, &data, 0, video(640, 480, true));
    assert_eq!(h.packetizer.on_encoded_frame(&frame), FrameOutcome::Closed);
    assert_eq!(h.packetizer.deliver_feedback(&[0x80, 201, 0, 0]), 0);
    assert!(h.packetizer.bind_transport(sink).is_err());
}

// ── Key-frame gate ──────────────────────────────────────────────────────

#[test]
fn delta_then_key_frame() {
    let h = Harness::new();

    let delta = h264_frame(false);
    let outcome = h.packetizer.on_encoded_frame(&Frame::new(
        FrameFormat::H264,
        &delta,
        3000,
        video(640, 480, false),
    ));
    assert_eq!(outcome, FrameOutcome::AwaitingKeyFrame);
    assert_eq!(h.upstream.count(), 1);
    assert_eq!(h.upstream.0.lock()[0], FeedbackMsg::request_key_frame());
    assert_eq!(h.sends(), 0);

    let key = h264_frame(true);
    let outcome = h.packetizer.on_encoded_frame(&Frame::new(
        FrameFormat::H264,
        &key,
        6000,
        video(640, 480, true),
    ));
    assert_eq!(outcome, FrameOutcome::Sent);
    assert_eq!(h.upstream.count(), 1);
    assert_eq!(h.packetizer.gate_state(), GateState::Streaming);

    let sent = h.engine().sent.lock().clone();
    assert_eq!(
        sent,
        vec![SentFrame {
            kind: FrameKind::Key,
            payload_type: 127,
            timestamp: 6000,
            capture_time_ms: 66,
            fragments: Some(vec![(4, 7), (15, 4), (22, 10)]),
        }]
    );
}

#[test]
fn k_delta_frames_give_k_requests() {
    let h = Harness::new();
    let delta = h264_frame(false);
    for i in 0..5 {
        let frame = Frame::new(FrameFormat::H264, &delta, i * 3000, video(640, 480, false));
        assert_eq!(h.packetizer.on_encoded_frame(&frame), FrameOutcome::AwaitingKeyFrame);
    }
    assert_eq!(h.upstream.count(), 5);
    assert_eq!(h.sends(), 0);
    assert_eq!(h.negotiations(), 0);
}

#[test]
fn gate_stays_open() {
    let h = Harness::new();
    let key = h264_frame(true);
    let delta = h264_frame(false);
    h.packetizer
        .on_encoded_frame(&Frame::new(FrameFormat::H264, &key, 0, video(640, 480, true)));

    // A resolution change and a rebind do not close the gate.
    h.packetizer.bind_transport(MockSink::new(h.log.clone())).unwrap();
    let outcome = h.packetizer.on_encoded_frame(&Frame::new(
        FrameFormat::H264,
        &delta,
        3000,
        video(1280, 720, false),
    ));
    assert_eq!(outcome, FrameOutcome::Sent);
    assert_eq!(h.engine().sent.lock()[1].kind, FrameKind::Delta);
    assert_eq!(h.upstream.count(), 0);
}

// ── Enable / disable ────────────────────────────────────────────────────

#[test]
fn disabled_drops_silently() {
    let h = Harness::new();
    h.packetizer.set_enabled(false);
    let key = h264_frame(true);
    for _ in 0..3 {
        let frame = Frame::new(FrameFormat::H264, &key, 0, video(640, 480, true));
        assert_eq!(h.packetizer.on_encoded_frame(&frame), FrameOutcome::Disabled);
    }
    assert_eq!(h.sends(), 0);
    assert_eq!(h.upstream.count(), 0);
    assert_eq!(h.packetizer.gate_state(), GateState::AwaitingKeyFrame);
}

#[test]
fn reenable_requests_one_key_frame() {
    let h = Harness::new();
    h.packetizer.set_enabled(true);
    assert_eq!(h.upstream.count(), 0, "already enabled");

    h.packetizer.set_enabled(false);
    h.packetizer.set_enabled(true);
    assert_eq!(h.upstream.count(), 1);
    h.packetizer.set_enabled(true);
    assert_eq!(h.upstream.count(), 1);
    assert!(h.packetizer.is_enabled());
}

#[test]
fn explicit_and_remote_key_frame_requests() {
    let h = Harness::new();
    h.packetizer.request_key_frame();
    h.packetizer.on_received_intra_frame_request(0x1234_5678);
    h.engine()
        .callbacks
        .intra_frame_observer
        .on_received_intra_frame_request(0x1234_5678);
    assert_eq!(h.upstream.count(), 3);

    h.packetizer.on_network_changed(500_000, 10, 40);
    assert_eq!(h.upstream.count(), 3);
}

// ── Negotiation ─────────────────────────────────────────────────────────

#[test]
fn negotiation_once_per_triple() {
    let h = Harness::new();
    let key = h264_frame(true);

    for (w, hgt) in [(640, 480), (640, 480), (1280, 720), (1280, 720)] {
        let frame = Frame::new(FrameFormat::H264, &key, 0, video(w, hgt, true));
        assert_eq!(h.packetizer.on_encoded_frame(&frame), FrameOutcome::Sent);
    }
    assert_eq!(h.negotiations(), 2);

    // Initial envelope, then one start/bounds pair per negotiation.
    let start = h.controller.start.lock().clone();
    assert_eq!(start, vec![300_000, 800_000, 2_000_000]);
    assert!(start[2] > start[1]);
    let bounds = h.controller.bounds.lock().clone();
    assert_eq!(bounds, vec![(0, 0), (200_000, 1_600_000), (500_000, 4_000_000)]);
    for (&target, &(min, max)) in start[1..].iter().zip(&bounds[1..]) {
        assert!(min * 4 <= target && target <= max / 2);
    }
}

#[test]
fn vp8_sent_without_fragmentation() {
    let h = Harness::new();
    let frame_data = vec![0x9d; 64];
    let frame = Frame::new(FrameFormat::Vp8, &frame_data, 9000, video(640, 480, true));
    assert_eq!(h.packetizer.on_encoded_frame(&frame), FrameOutcome::Sent);

    let sent = h.engine().sent.lock()[0].clone();
    assert_eq!(sent.payload_type, 100);
    assert_eq!(sent.fragments, None);
    assert_eq!(h.controller.start.lock()[1], 720_000);
    assert_eq!(h.packetizer.active_codec().unwrap().name, "VP8");
}

#[test]
fn unsupported_format_dropped() {
    let h = Harness::new();
    let raw = vec![0u8; 64];
    let frame = Frame::new(FrameFormat::I420, &raw, 0, video(640, 480, true));
    // Reported the same way every time, never as a failed negotiation.
    for _ in 0..2 {
        assert_eq!(h.packetizer.on_encoded_frame(&frame), FrameOutcome::UnsupportedFormat);
    }
    assert_eq!(h.sends(), 0);
    assert_eq!(h.negotiations(), 0);
    assert!(h.packetizer.active_codec().is_none());
}

#[test]
fn rejected_codec_not_retried() {
    let h = Harness::with(PacketizerConfig::default(), Some(121));
    let key = h264_frame(true);
    let h265 = Frame::new(FrameFormat::H265, &key, 0, video(640, 480, true));

    assert_eq!(h.packetizer.on_encoded_frame(&h265), FrameOutcome::NegotiationFailed);
    assert_eq!(h.packetizer.on_encoded_frame(&h265), FrameOutcome::NegotiationFailed);
    // Bounds were pushed once, for the single attempt.
    assert_eq!(h.controller.bounds.lock().len(), 2);
    assert_eq!(h.sends(), 0);

    let h264 = Frame::new(FrameFormat::H264, &key, 0, video(640, 480, true));
    assert_eq!(h.packetizer.on_encoded_frame(&h264), FrameOutcome::Sent);
}

#[test]
fn malformed_bitstream_dropped() {
    let h = Harness::new();
    let garbage = vec![0x65, 1, 2, 3];
    let frame = Frame::new(FrameFormat::H264, &garbage, 0, video(640, 480, true));
    assert_eq!(h.packetizer.on_encoded_frame(&frame), FrameOutcome::MalformedBitstream);
    assert_eq!(h.sends(), 0);
}

// ── Transport binding and feedback ──────────────────────────────────────

#[test]
fn bind_propagates_ssrc_and_routes_feedback() {
    let h = Harness::new();
    let sink = MockSink::new(h.log.clone());
    h.packetizer.bind_transport(sink.clone()).unwrap();
    assert_eq!(*sink.ssrc.lock(), Some(0x1234_5678));

    let ingress = sink.source.sink.lock().clone().unwrap();
    assert_eq!(ingress.deliver_feedback(&[0x80, 201, 0, 1, 0, 0, 0, 1]), 8);
    assert_eq!(ingress.deliver_feedback(&[0xFF, 0, 0, 0]), 0);
    assert_eq!(h.packetizer.deliver_feedback(&[0x80, 201, 0, 0]), 4);

    let key = h264_frame(true);
    h.packetizer
        .on_encoded_frame(&Frame::new(FrameFormat::H264, &key, 0, video(640, 480, true)));
    assert_eq!(sink.data.lock().len(), 1);

    h.packetizer.unbind_transport();
    h.packetizer.unbind_transport();
    assert!(sink.source.sink.lock().is_none());
    assert!(!h.packetizer.is_transport_bound());

    // Sends still succeed with nothing bound.
    assert_eq!(
        h.packetizer
            .on_encoded_frame(&Frame::new(FrameFormat::H264, &key, 0, video(640, 480, true))),
        FrameOutcome::Sent
    );
    assert_eq!(sink.data.lock().len(), 1);
}

#[test]
fn concurrent_rebind_never_loses_data() {
    let h = Arc::new(Harness::new());
    let first = MockSink::new(h.log.clone());
    let second = MockSink::new(h.log.clone());
    h.packetizer.bind_transport(first.clone()).unwrap();

    let key = h264_frame(true);
    h.packetizer
        .on_encoded_frame(&Frame::new(FrameFormat::H264, &key, 0, video(640, 480, true)));
    let baseline = first.data.lock().len();

    let done = Arc::new(AtomicBool::new(false));
    let rebinder = {
        let h = h.clone();
        let (first, second) = (first.clone(), second.clone());
        let done = done.clone();
        thread::spawn(move || {
            let mut flip = false;
            while !done.load(Ordering::SeqCst) {
                let sink: Arc<dyn MediaSink> = if flip { first.clone() } else { second.clone() };
                h.packetizer.bind_transport(sink).unwrap();
                flip = !flip;
            }
        })
    };

    const FRAMES: usize = 500;
    for i in 0..FRAMES {
        let frame = Frame::new(FrameFormat::H264, &key, i as u32, video(640, 480, true));
        assert_eq!(h.packetizer.on_encoded_frame(&frame), FrameOutcome::Sent);
    }
    done.store(true, Ordering::SeqCst);
    rebinder.join().unwrap();

    let delivered: Vec<Vec<u8>> = first.data.lock()[baseline..]
        .iter()
        .chain(second.data.lock().iter())
        .cloned()
        .collect();
    assert_eq!(delivered.len(), FRAMES);
    assert!(delivered.iter().all(|d| *d == key));
}

#[test]
fn bind_racing_close_never_outlives_teardown() {
    for _ in 0..200 {
        let h = Arc::new(Harness::new());
        let sink = MockSink::new(h.log.clone());
        let binder = {
            let h = h.clone();
            let sink = sink.clone();
            thread::spawn(move || {
                let _ = h.packetizer.bind_transport(sink);
            })
        };
        h.packetizer.close();
        binder.join().unwrap();

        assert!(!h.packetizer.is_transport_bound());
        assert!(sink.source.sink.lock().is_none());
    }
}

// ── Bundled engine ──────────────────────────────────────────────────────

fn pli_for(ssrc: u32) -> Vec<u8> {
    let mut pli = vec![0x81, 206, 0, 2];
    pli.extend_from_slice(&1u32.to_be_bytes());
    pli.extend_from_slice(&ssrc.to_be_bytes());
    pli
}

#[test]
fn undersized_mtu_rejected() {
    let small = RtpEngineConfig {
        mtu: 12,
        ..RtpEngineConfig::default()
    };
    let built = VideoFramePacketizer::with_rtp_engine(
        &PacketizerConfig::default(),
        small.clone(),
        Arc::new(Upstream::default()),
        Arc::new(BoundedBitrateController::new()),
        Box::new(ThreadScheduler::default()),
    );
    assert!(matches!(built, Err(PacketizerError::MtuTooSmall { mtu: 12 })));

    // An engine built around the check still refuses to report a silent send.
    let packetizer = VideoFramePacketizer::new(
        &PacketizerConfig::default(),
        Arc::new(Upstream::default()),
        Arc::new(BoundedBitrateController::new()),
        Box::new(ThreadScheduler::default()),
        |callbacks| Arc::new(RtpEngine::new(small, callbacks)),
    )
    .unwrap();
    let sink = MockSink::new(Arc::new(Mutex::new(Vec::new())));
    packetizer.bind_transport(sink.clone()).unwrap();

    let key = h264_frame(true);
    let frame = Frame::new(FrameFormat::H264, &key, 0, video(640, 480, true));
    assert_eq!(packetizer.on_encoded_frame(&frame), FrameOutcome::SendFailed);
    assert!(sink.data.lock().is_empty());
}

/// Producer that answers a key-frame request by encoding at a new size.
#[derive(Default)]
struct ReactiveProducer {
    packetizer: OnceLock<Weak<VideoFramePacketizer>>,
    outcomes: Mutex<Vec<FrameOutcome>>,
}

impl FeedbackReceiver for ReactiveProducer {
    fn on_feedback(&self, _msg: FeedbackMsg) {
        let Some(packetizer) = self.packetizer.get().and_then(Weak::upgrade) else {
            return;
        };
        let key = h264_frame(true);
        let frame = Frame::new(FrameFormat::H264, &key, 3000, video(1280, 720, true));
        let outcome = packetizer.on_encoded_frame(&frame);
        self.outcomes.lock().push(outcome);
    }
}

#[test]
fn producer_may_reenter_from_intra_request() {
    let producer = Arc::new(ReactiveProducer::default());
    let packetizer = Arc::new(
        VideoFramePacketizer::with_rtp_engine(
            &PacketizerConfig::default(),
            RtpEngineConfig::default(),
            producer.clone(),
            Arc::new(BoundedBitrateController::new()),
            Box::new(ThreadScheduler::default()),
        )
        .unwrap(),
    );
    assert!(producer.packetizer.set(Arc::downgrade(&packetizer)).is_ok());

    let key = h264_frame(true);
    let frame = Frame::new(FrameFormat::H264, &key, 0, video(640, 480, true));
    assert_eq!(packetizer.on_encoded_frame(&frame), FrameOutcome::Sent);

    let pli = pli_for(packetizer.ssrc().unwrap());
    // Renegotiating 1280x720 inside the callback takes the engine write lock.
    assert_eq!(packetizer.deliver_feedback(&pli), pli.len());
    assert_eq!(*producer.outcomes.lock(), vec![FrameOutcome::Sent]);
    assert_eq!(packetizer.active_codec().unwrap().name, "H264");
    packetizer.close();
}

// ── Bundled engine over UDP ─────────────────────────────────────────────

#[test]
fn rtp_engine_over_udp() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let upstream = Arc::new(Upstream::default());
    let controller = Arc::new(BoundedBitrateController::new());
    let packetizer = VideoFramePacketizer::with_rtp_engine(
        &PacketizerConfig::default(),
        RtpEngineConfig::default(),
        upstream.clone(),
        controller.clone(),
        Box::new(ThreadScheduler::new(Duration::from_millis(5))),
    )
    .unwrap();

    let sink = Arc::new(UdpSink::bind("127.0.0.1:0", receiver.local_addr().unwrap()).unwrap());
    packetizer.bind_transport(sink.clone()).unwrap();
    let ssrc = packetizer.ssrc().unwrap();

    let key = h264_frame(true);
    let frame = Frame::new(FrameFormat::H264, &key, 90_000, video(640, 480, true));
    assert_eq!(packetizer.on_encoded_frame(&frame), FrameOutcome::Sent);
    assert_eq!(controller.bounds_bps(), (200_000, 1_600_000));

    // SPS, PPS, and IDR each fit in one packet; the marker is on the last.
    let mut buf = [0u8; 1500];
    let mut packets = Vec::new();
    while packets.len() < 3 {
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        // Skip Sender Reports that may interleave.
        if buf[1] == 200 {
            continue;
        }
        packets.push(buf[..len].to_vec());
    }
    for p in &packets {
        assert_eq!(u32::from_be_bytes([p[8], p[9], p[10], p[11]]), ssrc);
        assert_eq!(p[1] & 0x7f, 127);
    }
    assert_eq!(packets[0][12] & 0x1f, 7);
    assert_eq!(packets[2][12] & 0x1f, 5);
    assert_eq!(packets[2][1] & 0x80, 0x80);

    // A PLI from the receiver turns into a key-frame request.
    receiver
        .send_to(&pli_for(ssrc), sink.local_addr().unwrap())
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while upstream.count() == 0 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(upstream.count(), 1);

    packetizer.close();
    sink.close();
}
