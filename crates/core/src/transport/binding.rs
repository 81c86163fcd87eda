use std::sync::Arc;

use super::{FeedbackSource, MediaSink, RtcpFeedbackSink};
use crate::engine::OutgoingTransport;
use crate::error::{PacketizerError, Result};
use crate::sync::Guarded;

struct BoundSink {
    sink: Arc<dyn MediaSink>,
    feedback: Option<Arc<dyn FeedbackSource>>,
}

impl BoundSink {
    fn detach(self) {
        if let Some(source) = self.feedback {
            source.set_feedback_sink(None);
        }
    }
}

#[derive(Default)]
struct Slot {
    bound: Option<BoundSink>,
    shut_down: bool,
}

/// Slot holding at most one downstream sink.
///
/// Bind and unbind take the write lock, delivery takes the read lock, so a
/// delivery always reaches either the old sink or the new one in full. Once
/// [`shut_down`](Self::shut_down) has run, no bind can land.
#[derive(Default)]
pub struct TransportBinding {
    slot: Guarded<Slot>,
}

impl TransportBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the bound sink.
    ///
    /// The previous sink's feedback source is detached first. The new sink
    /// learns `ssrc` and, if it has a feedback source, is wired to `feedback`.
    /// Fails with [`PacketizerError::EngineClosed`] after shutdown.
    pub fn bind(
        &self,
        sink: Arc<dyn MediaSink>,
        ssrc: u32,
        feedback: Arc<dyn RtcpFeedbackSink>,
    ) -> Result<()> {
        self.slot.with_write(|slot| {
            if slot.shut_down {
                return Err(PacketizerError::EngineClosed);
            }
            if let Some(previous) = slot.bound.take() {
                tracing::debug!("replacing bound sink");
                previous.detach();
            }
            sink.set_ssrc(ssrc);
            let source = sink.feedback_source();
            if let Some(source) = &source {
                source.set_feedback_sink(Some(feedback));
            }
            slot.bound = Some(BoundSink {
                sink,
                feedback: source,
            });
            Ok(())
        })?;
        tracing::info!(ssrc = format_args!("{:#010X}", ssrc), "transport bound");
        Ok(())
    }

    /// Detach the current sink. Returns false when nothing was bound.
    pub fn unbind(&self) -> bool {
        let previous = self.slot.with_write(|slot| slot.bound.take());
        Self::release(previous)
    }

    /// Detach the current sink and refuse every later bind.
    pub fn shut_down(&self) -> bool {
        let previous = self.slot.with_write(|slot| {
            slot.shut_down = true;
            slot.bound.take()
        });
        Self::release(previous)
    }

    fn release(previous: Option<BoundSink>) -> bool {
        match previous {
            Some(bound) => {
                bound.detach();
                tracing::info!("transport unbound");
                true
            }
            None => false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.slot.with_read(|slot| slot.bound.is_some())
    }

    /// Forward bytes to the bound sink. Returns false when none is bound.
    pub fn deliver_encoded_data(&self, data: &[u8]) -> bool {
        self.slot.with_read(|slot| match &slot.bound {
            Some(bound) => {
                bound.sink.deliver_encoded_video(data);
                true
            }
            None => false,
        })
    }
}

impl OutgoingTransport for TransportBinding {
    fn send_rtp(&self, packet: &[u8]) -> bool {
        self.deliver_encoded_data(packet)
    }

    fn send_rtcp(&self, packet: &[u8]) -> bool {
        self.deliver_encoded_data(packet)
    }
}
