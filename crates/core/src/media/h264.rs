use super::Payloader;
use super::codec::{CodecHeader, CodecKind};
use super::fragment::FragmentationMap;

/// FU-A NAL unit type (RFC 6184 §5.8).
const FU_A: u8 = 28;

/// H.264 RTP payloader (RFC 6184).
///
/// Turns the NAL units of one access unit into RTP payloads. Supports two
/// packetization modes from RFC 6184:
///
/// - **Single NAL Unit** (§5.6): NALs that fit within the MTU are sent
///   as-is in a single RTP payload.
///
/// - **FU-A Fragmentation** (§5.8): NALs exceeding the MTU are split
///   across multiple RTP payloads. Each fragment carries a 2-byte FU
///   header (FU indicator + FU header) before the NAL payload:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to MTU - 2 bytes)
///   ```
///
///   - **S** (start): set on the first fragment
///   - **E** (end): set on the last fragment
///   - **NAL_Type**: the original NAL unit type from the first byte
///
/// NAL boundaries come from the [`FragmentationMap`] built by the packetizer,
/// so start codes never reach the wire.
#[derive(Debug, Default, Clone, Copy)]
pub struct H264Payloader;

impl H264Payloader {
    /// Payload a single NAL unit into one or more RTP payloads.
    ///
    /// If the NAL fits within `mtu`, it is sent as a Single NAL Unit
    /// payload (RFC 6184 §5.6). Otherwise, FU-A fragmentation is used
    /// (RFC 6184 §5.8).
    pub fn payload_nal(nal_unit: &[u8], mtu: usize) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();

        if nal_unit.is_empty() || mtu <= 2 {
            return payloads;
        }

        if nal_unit.len() <= mtu {
            payloads.push(nal_unit.to_vec());
            return payloads;
        }

        let nal_header = nal_unit[0];
        let nal_type = nal_header & 0x1f;
        let nri = nal_header & 0x60;

        // FU indicator: NRI from original NAL, type = 28 (FU-A)
        let fu_indicator = nri | FU_A;
        let payload = &nal_unit[1..];

        let max_fragment = mtu - 2;
        let mut offset = 0usize;
        let mut first = true;

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last_fragment = remaining <= max_fragment;
            let chunk_size = std::cmp::min(max_fragment, remaining);
            let chunk = &payload[offset..offset + chunk_size];

            // FU header: S=start, E=end, R=0, Type=original NAL type
            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };
            let fu_header = start_bit | end_bit | nal_type;

            let mut fragment = Vec::with_capacity(2 + chunk.len());
            fragment.push(fu_indicator);
            fragment.push(fu_header);
            fragment.extend_from_slice(chunk);
            payloads.push(fragment);

            offset += chunk_size;
            first = false;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments = payloads.len(),
            "FU-A fragmented NAL unit"
        );

        payloads
    }
}

impl Payloader for H264Payloader {
    fn codec(&self) -> CodecKind {
        CodecKind::H264
    }

    fn payload_frame(
        &self,
        payload: &[u8],
        fragmentation: Option<&FragmentationMap>,
        _header: &CodecHeader,
        mtu: usize,
    ) -> Vec<Vec<u8>> {
        match fragmentation {
            Some(map) => map
                .slices(payload)
                .flat_map(|nal| Self::payload_nal(nal, mtu))
                .collect(),
            None => Self::payload_nal(payload, mtu),
        }
    }
}
