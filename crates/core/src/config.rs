use crate::media::codec::payload_type;

/// Packetizer configuration applied to the engine at construction.
#[derive(Debug, Clone)]
pub struct PacketizerConfig {
    /// Redundant coding (RFC 2198).
    pub enable_red: bool,
    /// Uneven-level protection FEC (RFC 5109).
    pub enable_ulpfec: bool,
    pub red_payload_type: u8,
    pub ulpfec_payload_type: u8,
    /// Sent packets kept for NACK retransmission. 0 disables the store.
    pub nack_history_depth: usize,
    /// Feed REMB from receivers into the bitrate controller.
    pub receiver_estimated_bandwidth: bool,
    /// Start bitrate before the first negotiation.
    pub initial_start_bitrate_kbps: u32,
}

impl Default for PacketizerConfig {
    fn default() -> Self {
        Self {
            enable_red: false,
            enable_ulpfec: false,
            red_payload_type: payload_type::RED,
            ulpfec_payload_type: payload_type::ULPFEC,
            nack_history_depth: 600,
            receiver_estimated_bandwidth: true,
            initial_start_bitrate_kbps: 300,
        }
    }
}

impl PacketizerConfig {
    pub fn fec_enabled(&self) -> bool {
        self.enable_red || self.enable_ulpfec
    }
}
