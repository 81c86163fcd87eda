use rand::RngExt;

/// Size of the RTP fixed header without CSRCs.
pub const RTP_HEADER_LEN: usize = 12;

/// Generic RTP fixed header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// One instance is shared by every payload type an engine sends, so the
/// sequence space stays continuous across codec switches. The timestamp is
/// taken from each frame rather than advanced internally.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
}

impl RtpHeader {
    /// Create a new RTP header state with explicit SSRC and initial sequence number.
    pub fn new(ssrc: u32, initial_sequence: u16) -> Self {
        tracing::debug!(
            ssrc = format_args!("{:#010X}", ssrc),
            initial_sequence,
            "RTP header state created"
        );
        Self {
            ssrc,
            sequence: initial_sequence,
        }
    }

    /// Create with a random SSRC and a random initial sequence number.
    ///
    /// Per RFC 3550 §5.1 and §8.1, both should be chosen randomly to make
    /// known-plaintext attacks and SSRC collisions unlikely.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let ssrc = rng.random::<u32>();
        let sequence = rng.random::<u16>();
        Self::new(ssrc, sequence)
    }

    /// Sequence number the next [`write`](Self::write) call will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Serialize the fixed header for the next packet and consume one
    /// sequence number. `marker` flags the last packet of a frame.
    pub fn write(&mut self, payload_type: u8, marker: bool, timestamp: u32) -> [u8; RTP_HEADER_LEN] {
        let [s0, s1] = self.sequence.to_be_bytes();
        let [t0, t1, t2, t3] = timestamp.to_be_bytes();
        let [c0, c1, c2, c3] = self.ssrc.to_be_bytes();
        let pt_byte = (u8::from(marker) << 7) | (payload_type & 0x7f);

        self.sequence = self.sequence.wrapping_add(1);
        [0x80, pt_byte, s0, s1, t0, t1, t2, t3, c0, c1, c2, c3]
    }
}

/// Read the sequence number out of a serialized RTP packet.
pub fn packet_sequence(packet: &[u8]) -> Option<u16> {
    packet.get(2..4).map(|b| u16::from_be_bytes([b[0], b[1]]))
}
