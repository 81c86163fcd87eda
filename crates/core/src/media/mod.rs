//! Codec payloading and RTP/RTCP wire formats.
//!
//! The [`Payloader`] trait turns one encoded frame into RTP payloads (header
//! excluded). The engine prefixes each payload with the shared
//! [`rtp::RtpHeader`] so sequence numbers stay continuous across codecs.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded video frame is split into one or more RTP packets. Every
//! packet carries a 12-byte fixed header with a wrapping 16-bit sequence
//! number, the 90 kHz frame timestamp, a random SSRC, and a marker bit on the
//! last packet of the frame.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Fragmentation |
//! |-------|--------|-----|---------------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | Annex B map + FU-A |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) | Annex B map + FU |
//! | VP8 | [`vpx`] | [RFC 7741](https://tools.ietf.org/html/rfc7741) | MTU split + descriptor |
//! | VP9 | [`vpx`] | [RFC 9628](https://tools.ietf.org/html/rfc9628) | MTU split + descriptor |

pub mod codec;
pub mod fragment;
pub mod h264;
pub mod h265;
pub mod rtcp;
pub mod rtp;
pub mod vpx;

use codec::{CodecHeader, CodecKind};
use fragment::FragmentationMap;

/// Codec-specific RTP payloader.
///
/// Payloaders are stateless: sequence numbers, timestamps, and the marker
/// bit belong to the engine.
pub trait Payloader: Send + Sync {
    fn codec(&self) -> CodecKind;

    /// Split one frame into RTP payloads, each at most `mtu` bytes.
    ///
    /// `fragmentation` carries the NAL boundaries for Annex B codecs. When it
    /// is `None` the whole payload is treated as a single unit.
    fn payload_frame(
        &self,
        payload: &[u8],
        fragmentation: Option<&FragmentationMap>,
        header: &CodecHeader,
        mtu: usize,
    ) -> Vec<Vec<u8>>;
}

/// Payloader for a codec family.
pub fn payloader_for(kind: CodecKind) -> Box<dyn Payloader> {
    match kind {
        CodecKind::H264 => Box::new(h264::H264Payloader),
        CodecKind::H265 => Box::new(h265::H265Payloader),
        CodecKind::Vp8 => Box::new(vpx::Vp8Payloader),
        CodecKind::Vp9 => Box::new(vpx::Vp9Payloader),
    }
}
