//! Bitrate envelope derivation and the bandwidth-estimation seams.
//!
//! On every format or resolution change the packetizer derives
//! [`BitrateBounds`] from the frame size and pushes them into a
//! [`BitrateController`] in bits per second. The controller algorithm itself
//! is external. [`BoundedBitrateController`] is a minimal stand-in that clamps
//! whatever the engine observes.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::FrameFormat;

/// Headroom above the target the sender may burst to.
pub const TRANSMISSION_MAXBITRATE_MULTIPLIER: u32 = 2;

/// VP8 reaches the same quality as the others at 90% of the table rate.
pub const VP8_BITRATE_PERCENT: u32 = 90;

/// `(max pixel count, kbps)`, ascending. Sizes above the last row use its rate.
const RESOLUTION_BITRATE_TABLE: &[(u32, u32)] = &[
    (176 * 144, 100),    // QCIF
    (320 * 240, 256),    // QVGA
    (352 * 288, 300),    // CIF
    (640 * 480, 800),    // VGA
    (1280 * 720, 2000),  // 720p
    (1920 * 1080, 4000), // 1080p
    (2560 * 1440, 8000), // 1440p
    (3840 * 2160, 16000), // 2160p
];

/// Target bitrate in kbps for a frame size.
///
/// Non-decreasing in pixel count.
pub fn bitrate_for_resolution(width: u32, height: u32) -> u32 {
    let pixels = width.saturating_mul(height);
    RESOLUTION_BITRATE_TABLE
        .iter()
        .find(|(max_pixels, _)| pixels <= *max_pixels)
        .or(RESOLUTION_BITRATE_TABLE.last())
        .map_or(0, |(_, kbps)| *kbps)
}

/// Start/min/max sending rate in kbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitrateBounds {
    pub start_kbps: u32,
    pub min_kbps: u32,
    pub max_kbps: u32,
}

impl BitrateBounds {
    /// Derive bounds for a stream: start at the target, allow down to a
    /// quarter of it and up to [`TRANSMISSION_MAXBITRATE_MULTIPLIER`] times.
    pub fn for_stream(format: FrameFormat, width: u32, height: u32) -> Self {
        let base = bitrate_for_resolution(width, height);
        let target = match format {
            FrameFormat::Vp8 => base * VP8_BITRATE_PERCENT / 100,
            _ => base,
        };
        Self {
            start_kbps: target,
            min_kbps: target / 4,
            max_kbps: target * TRANSMISSION_MAXBITRATE_MULTIPLIER,
        }
    }

    pub fn start_bps(&self) -> u32 {
        self.start_kbps.saturating_mul(1000)
    }

    pub fn min_bps(&self) -> u32 {
        self.min_kbps.saturating_mul(1000)
    }

    pub fn max_bps(&self) -> u32 {
        self.max_kbps.saturating_mul(1000)
    }
}

/// Receives raw bandwidth signals extracted from RTCP by the engine.
pub trait BandwidthObserver: Send + Sync {
    /// Receiver estimated maximum bitrate (REMB).
    fn on_estimated_bitrate(&self, bitrate_bps: u32);

    /// A receiver report block. `fraction_loss` is in 1/256 units.
    fn on_receiver_report(&self, fraction_loss: u8, rtt_ms: u64);
}

/// Notified when the controller settles on a new target.
pub trait NetworkObserver: Send + Sync {
    fn on_network_changed(&self, target_bitrate_bps: u32, fraction_loss: u8, rtt_ms: u64);
}

/// External bandwidth-estimation controller.
pub trait BitrateController: Send + Sync {
    fn set_start_bitrate_bps(&self, start_bps: u32);

    /// `0` for either bound means unbounded.
    fn set_bitrate_bounds_bps(&self, min_bps: u32, max_bps: u32);

    /// Handle the engine feeds RTCP-derived signals into.
    fn bandwidth_observer(&self) -> Arc<dyn BandwidthObserver>;

    fn set_network_observer(&self, observer: Option<Arc<dyn NetworkObserver>>);
}

#[derive(Default)]
struct ControllerState {
    start_bps: u32,
    min_bps: u32,
    max_bps: u32,
    fraction_loss: u8,
    rtt_ms: u64,
    estimate_bps: Option<u32>,
    observer: Option<Arc<dyn NetworkObserver>>,
}

impl ControllerState {
    fn clamp(&self, bps: u32) -> u32 {
        let floored = bps.max(self.min_bps);
        if self.max_bps > 0 {
            floored.min(self.max_bps)
        } else {
            floored
        }
    }
}

/// Clamps observed estimates into the configured envelope.
///
/// Every REMB or receiver report produces one `on_network_changed` call on
/// the attached observer with the clamped target.
#[derive(Clone, Default)]
pub struct BoundedBitrateController {
    state: Arc<Mutex<ControllerState>>,
}

impl BoundedBitrateController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current `(min_bps, max_bps)`.
    pub fn bounds_bps(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.min_bps, state.max_bps)
    }

    pub fn start_bps(&self) -> u32 {
        self.state.lock().start_bps
    }

    /// Current clamped target: the last estimate, or the start bitrate.
    pub fn target_bps(&self) -> u32 {
        let state = self.state.lock();
        state.clamp(state.estimate_bps.unwrap_or(state.start_bps))
    }

    pub fn has_network_observer(&self) -> bool {
        self.state.lock().observer.is_some()
    }

    fn notify(&self, update: impl FnOnce(&mut ControllerState)) {
        let (observer, target, loss, rtt) = {
            let mut state = self.state.lock();
            update(&mut state);
            let target = state.clamp(state.estimate_bps.unwrap_or(state.start_bps));
            (state.observer.clone(), target, state.fraction_loss, state.rtt_ms)
        };
        // Called outside the lock so observers may query the controller.
        if let Some(observer) = observer {
            observer.on_network_changed(target, loss, rtt);
        }
    }
}

impl BitrateController for BoundedBitrateController {
    fn set_start_bitrate_bps(&self, start_bps: u32) {
        tracing::debug!(start_bps, "start bitrate set");
        self.state.lock().start_bps = start_bps;
    }

    fn set_bitrate_bounds_bps(&self, min_bps: u32, max_bps: u32) {
        tracing::debug!(min_bps, max_bps, "bitrate bounds set");
        let mut state = self.state.lock();
        state.min_bps = min_bps;
        state.max_bps = max_bps;
    }

    fn bandwidth_observer(&self) -> Arc<dyn BandwidthObserver> {
        Arc::new(self.clone())
    }

    fn set_network_observer(&self, observer: Option<Arc<dyn NetworkObserver>>) {
        self.state.lock().observer = observer;
    }
}

impl BandwidthObserver for BoundedBitrateController {
    fn on_estimated_bitrate(&self, bitrate_bps: u32) {
        tracing::trace!(bitrate_bps, "REMB estimate");
        self.notify(|state| state.estimate_bps = Some(bitrate_bps));
    }

    fn on_receiver_report(&self, fraction_loss: u8, rtt_ms: u64) {
        tracing::trace!(fraction_loss, rtt_ms, "receiver report");
        self.notify(|state| {
            state.fraction_loss = fraction_loss;
            state.rtt_ms = rtt_ms;
        });
    }
}
