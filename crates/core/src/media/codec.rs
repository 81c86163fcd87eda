//! Codec descriptors and per-frame codec headers handed to the engine.

use crate::frame::FrameFormat;

/// RTP payload types used for video sends.
pub mod payload_type {
    pub const VP8: u8 = 100;
    pub const VP9: u8 = 101;
    /// Redundant coding (RFC 2198).
    pub const RED: u8 = 116;
    /// Uneven-level protection FEC (RFC 5109).
    pub const ULPFEC: u8 = 117;
    pub const H265: u8 = 121;
    pub const H264: u8 = 127;
}

/// Video clock rate for every supported payload (RFC 3551 §4).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Codec family of an RTP video payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Vp8,
    Vp9,
    H264,
    H265,
}

impl CodecKind {
    /// Frame format this codec carries unchanged (no transcoding).
    pub fn frame_format(self) -> FrameFormat {
        match self {
            Self::Vp8 => FrameFormat::Vp8,
            Self::Vp9 => FrameFormat::Vp9,
            Self::H264 => FrameFormat::H264,
            Self::H265 => FrameFormat::H265,
        }
    }
}

/// The payload mapping registered with the engine for the active stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub payload_type: u8,
    pub kind: CodecKind,
    /// Encoding name as it would appear in `a=rtpmap`.
    pub name: &'static str,
    pub clock_rate: u32,
}

impl CodecDescriptor {
    /// Map a frame format to its send descriptor.
    ///
    /// Returns `None` for formats without an RTP mapping (raw I420, unknown).
    pub fn for_format(format: FrameFormat) -> Option<Self> {
        let (kind, name, pt) = match format {
            FrameFormat::Vp8 => (CodecKind::Vp8, "VP8", payload_type::VP8),
            FrameFormat::Vp9 => (CodecKind::Vp9, "VP9", payload_type::VP9),
            FrameFormat::H264 => (CodecKind::H264, "H264", payload_type::H264),
            FrameFormat::H265 => (CodecKind::H265, "H265", payload_type::H265),
            FrameFormat::I420 | FrameFormat::Unknown => return None,
        };
        Some(Self {
            payload_type: pt,
            kind,
            name,
            clock_rate: VIDEO_CLOCK_RATE,
        })
    }

    pub fn frame_format(&self) -> FrameFormat {
        self.kind.frame_format()
    }
}

/// Whether a frame can be decoded on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Key,
    Delta,
}

/// VP8 payload descriptor fields (RFC 7741 §4.2) the sender controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vp8Header {
    pub non_reference: bool,
    /// 15-bit picture ID, omitted when `None`.
    pub picture_id: Option<u16>,
    pub partition_id: u8,
    pub beginning_of_partition: bool,
}

impl Default for Vp8Header {
    fn default() -> Self {
        Self {
            non_reference: false,
            picture_id: None,
            partition_id: 0,
            beginning_of_partition: true,
        }
    }
}

/// VP9 payload descriptor fields (draft-ietf-payload-vp9) the sender controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vp9Header {
    /// Inter-picture predicted frame; false on key frames.
    pub inter_pic_predicted: bool,
    pub picture_id: Option<u16>,
}

/// Codec-specific header accompanying a frame send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecHeader {
    Vp8(Vp8Header),
    Vp9(Vp9Header),
    H264,
    H265,
}

impl CodecHeader {
    /// Initial header for a frame of `kind` sent as `codec`.
    pub fn for_frame(codec: CodecKind, kind: FrameKind) -> Self {
        match codec {
            CodecKind::Vp8 => Self::Vp8(Vp8Header::default()),
            CodecKind::Vp9 => Self::Vp9(Vp9Header {
                inter_pic_predicted: kind == FrameKind::Delta,
                picture_id: None,
            }),
            CodecKind::H264 => Self::H264,
            CodecKind::H265 => Self::H265,
        }
    }

    pub fn codec(&self) -> CodecKind {
        match self {
            Self::Vp8(_) => CodecKind::Vp8,
            Self::Vp9(_) => CodecKind::Vp9,
            Self::H264 => CodecKind::H264,
            Self::H265 => CodecKind::H265,
        }
    }
}
