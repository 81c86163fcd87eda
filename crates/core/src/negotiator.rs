//! Send codec (re)negotiation on format or resolution change.

use crate::bitrate::BitrateBounds;
use crate::error::{PacketizerError, Result};
use crate::frame::{Frame, FrameFormat};
use crate::media::codec::CodecDescriptor;

/// The `(format, width, height)` triple a send codec is negotiated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamFormat {
    pub format: FrameFormat,
    pub width: u32,
    pub height: u32,
}

impl StreamFormat {
    pub fn of(frame: &Frame<'_>) -> Self {
        Self {
            format: frame.format,
            width: frame.video.width,
            height: frame.video.height,
        }
    }
}

/// Result of [`CodecNegotiator::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub descriptor: CodecDescriptor,
    /// Whether this call performed a (re)negotiation.
    pub renegotiated: bool,
}

/// Tracks the active send codec and the last triple that failed.
///
/// Each distinct triple is negotiated at most once in sequence: repeats of
/// the active triple are free, and repeats of a failed triple fail fast until
/// the stream moves to a different triple. Formats with no payload mapping
/// are rejected up front and never remembered.
#[derive(Debug, Default)]
pub struct CodecNegotiator {
    active: Option<(StreamFormat, CodecDescriptor)>,
    rejected: Option<StreamFormat>,
}

impl CodecNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&(StreamFormat, CodecDescriptor)> {
        self.active.as_ref()
    }

    /// Make sure a send codec is registered for `stream`.
    ///
    /// On a change, `apply` receives the new descriptor and bounds and must
    /// push them into the controller and engine. The active triple is only
    /// replaced when `apply` succeeds.
    pub fn ensure(
        &mut self,
        stream: StreamFormat,
        apply: impl FnOnce(&CodecDescriptor, BitrateBounds) -> Result<()>,
    ) -> Result<Negotiated> {
        if let Some((active, descriptor)) = &self.active
            && *active == stream
        {
            self.rejected = None;
            return Ok(Negotiated {
                descriptor: descriptor.clone(),
                renegotiated: false,
            });
        }

        if self.rejected == Some(stream) {
            return Err(PacketizerError::NegotiationFailed {
                format: stream.format,
                width: stream.width,
                height: stream.height,
            });
        }

        // Not memoized: an unmapped format is reported as such on every frame.
        let Some(descriptor) = CodecDescriptor::for_format(stream.format) else {
            return Err(PacketizerError::UnsupportedFormat(stream.format));
        };

        let bounds = BitrateBounds::for_stream(stream.format, stream.width, stream.height);
        tracing::debug!(
            codec = descriptor.name,
            payload_type = descriptor.payload_type,
            width = stream.width,
            height = stream.height,
            start_kbps = bounds.start_kbps,
            min_kbps = bounds.min_kbps,
            max_kbps = bounds.max_kbps,
            "negotiating send codec"
        );

        if let Err(e) = apply(&descriptor, bounds) {
            self.rejected = Some(stream);
            return Err(e);
        }

        self.rejected = None;
        self.active = Some((stream, descriptor.clone()));
        Ok(Negotiated {
            descriptor,
            renegotiated: true,
        })
    }
}
