//! Key-frame gate.
//!
//! A receiver cannot decode delta frames until it has seen a key frame, so
//! nothing is forwarded before the first one:
//!
//! ```text
//! AwaitingKeyFrame --(key frame)--> Streaming
//!        |
//!        +--(delta frame)--> drop + request key frame
//! ```
//!
//! `Streaming` is terminal. Later loss recovery goes through explicit
//! key-frame requests (PLI/FIR), never back through the gate.

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    AwaitingKeyFrame,
    Streaming,
}

/// What to do with a frame offered to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Forward,
    /// Drop the frame and ask the producer for a key frame.
    RequestKeyFrame,
}

#[derive(Debug, Default)]
pub struct KeyFrameGate {
    state: GateState,
}

impl KeyFrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Offer a frame and latch `Streaming` on the first key frame.
    pub fn admit(&mut self, is_key_frame: bool) -> GateDecision {
        match self.state {
            GateState::Streaming => GateDecision::Forward,
            GateState::AwaitingKeyFrame if is_key_frame => {
                tracing::debug!("first key frame, gate open");
                self.state = GateState::Streaming;
                GateDecision::Forward
            }
            GateState::AwaitingKeyFrame => GateDecision::RequestKeyFrame,
        }
    }
}
