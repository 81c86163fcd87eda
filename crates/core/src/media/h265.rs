//! H.265 (HEVC) RTP payloader (RFC 7798).
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header** (vs 1-byte in H.264).
//!   The NAL type is in bits 1..6 of the first byte.
//!
//! - **FU format** (§4.4.3): a 2-byte payload header with type 49, followed
//!   by a 1-byte FU header `[S|E|FuType(6)]`. The original 2-byte NAL header
//!   is not repeated in fragments.

use super::Payloader;
use super::codec::{CodecHeader, CodecKind};
use super::fragment::FragmentationMap;

/// Fragmentation unit payload header type (RFC 7798 §4.4.3).
const FU_TYPE: u8 = 49;

#[derive(Debug, Default, Clone, Copy)]
pub struct H265Payloader;

impl H265Payloader {
    /// NAL unit type from the first header byte.
    pub fn nal_type(first_byte: u8) -> u8 {
        (first_byte >> 1) & 0x3f
    }

    /// Payload one NAL unit, using FUs when it exceeds `mtu`.
    pub fn payload_nal(nal_unit: &[u8], mtu: usize) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();

        if nal_unit.is_empty() || mtu <= 3 {
            return payloads;
        }

        if nal_unit.len() <= mtu {
            payloads.push(nal_unit.to_vec());
            return payloads;
        }

        let nal_type = Self::nal_type(nal_unit[0]);
        // Keep F and the high LayerId bit, replace the type with 49.
        let payload_hdr0 = (nal_unit[0] & 0x81) | (FU_TYPE << 1);
        let payload_hdr1 = nal_unit[1];
        let body = &nal_unit[2..];

        let max_fragment = mtu - 3;
        let mut offset = 0usize;

        while offset < body.len() {
            let remaining = body.len() - offset;
            let chunk_size = remaining.min(max_fragment);
            let start_bit = if offset == 0 { 0x80 } else { 0x00 };
            let end_bit = if remaining <= max_fragment { 0x40 } else { 0x00 };

            let mut fragment = Vec::with_capacity(3 + chunk_size);
            fragment.push(payload_hdr0);
            fragment.push(payload_hdr1);
            fragment.push(start_bit | end_bit | nal_type);
            fragment.extend_from_slice(&body[offset..offset + chunk_size]);
            payloads.push(fragment);

            offset += chunk_size;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments = payloads.len(),
            "H.265 FU fragmented NAL unit"
        );

        payloads
    }
}

impl Payloader for H265Payloader {
    fn codec(&self) -> CodecKind {
        CodecKind::H265
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
