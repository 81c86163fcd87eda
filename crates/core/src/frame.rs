//! Encoded video frames as delivered by the upstream producer.

use std::fmt;

/// 90 kHz RTP video clock ticks per millisecond.
pub const TICKS_PER_MS: u32 = 90;

/// Bitstream format of an encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    Vp8,
    Vp9,
    H264,
    H265,
    /// Raw planar YUV. Has no RTP payload mapping in this crate.
    I420,
    Unknown,
}

impl FrameFormat {
    /// Whether the bitstream is Annex B NAL units (and needs a fragmentation map).
    pub fn is_nal_based(self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::H264 => "H264",
            Self::H265 => "H265",
            Self::I420 => "I420",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Per-frame video metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoFrameInfo {
    pub width: u32,
    pub height: u32,
    pub is_key_frame: bool,
}

/// One encoded frame, borrowed from the producer for the duration of a single
/// [`on_encoded_frame`](crate::VideoFramePacketizer::on_encoded_frame) call.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub format: FrameFormat,
    pub payload: &'a [u8],
    /// Presentation timestamp in 90 kHz units.
    pub timestamp: u32,
    pub video: VideoFrameInfo,
}

impl<'a> Frame<'a> {
    pub fn new(format: FrameFormat, payload: &'a [u8], timestamp: u32, video: VideoFrameInfo) -> Self {
        Self {
            format,
            payload,
            timestamp,
            video,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Capture time derived from the 90 kHz timestamp.
    pub fn capture_time_ms(&self) -> i64 {
        i64::from(self.timestamp / TICKS_PER_MS)
    }

    pub fn is_key_frame(&self) -> bool {
        self.video.is_key_frame
    }
}
