//! Splitting an Annex B elementary stream file into access units.

use packetizer::media::fragment::{fragment_annex_b, find_nal_unit};
use packetizer::{FrameFormat, Result};

/// One coded picture with its leading parameter sets and SEI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// Annex B bytes, start codes included.
    pub data: Vec<u8>,
    pub is_key_frame: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NalRole {
    /// Parameter set, SEI, or delimiter: starts a new access unit after a picture.
    Prefix,
    /// Slice data. `first` marks the first slice of a picture.
    Slice { first: bool, key: bool },
    Other,
}

/// NAL header type for `format`.
pub fn nal_type(format: FrameFormat, nal: &[u8]) -> u8 {
    match (format, nal.first()) {
        (FrameFormat::H265, Some(b)) => (b >> 1) & 0x3f,
        (_, Some(b)) => b & 0x1f,
        (_, None) => 0,
    }
}

fn classify(format: FrameFormat, nal: &[u8]) -> NalRole {
    let t = nal_type(format, nal);
    match format {
        FrameFormat::H265 => match t {
            // first_slice_segment_in_pic_flag follows the 2-byte header.
            0..=31 => NalRole::Slice {
                first: nal.get(2).is_some_and(|b| b & 0x80 != 0),
                key: (16..=21).contains(&t),
            },
            32..=35 | 39 => NalRole::Prefix,
            _ => NalRole::Other,
        },
        _ => match t {
            // first_mb_in_slice == 0 is coded as a single '1' bit.
            1..=5 => NalRole::Slice {
                first: nal.get(1).is_some_and(|b| b & 0x80 != 0),
                key: t == 5,
            },
            6..=9 => NalRole::Prefix,
            _ => NalRole::Other,
        },
    }
}

/// Group the NAL units of `stream` into access units.
pub fn split_access_units(format: FrameFormat, stream: &[u8]) -> Result<Vec<AccessUnit>> {
    // Rejects streams with no start code or with empty units.
    fragment_annex_b(stream)?;

    let mut units = Vec::new();
    let mut current: Option<AccessUnit> = None;
    let mut has_slice = false;
    let mut cursor = 0;

    while let Some(bounds) = find_nal_unit(stream, cursor) {
        let role = classify(format, &stream[bounds.start..bounds.end]);
        let boundary = match role {
            NalRole::Prefix => has_slice,
            NalRole::Slice { first, .. } => has_slice && first,
            NalRole::Other => false,
        };
        if boundary && let Some(done) = current.take() {
            units.push(done);
            has_slice = false;
        }

        let unit = current.get_or_insert_with(|| AccessUnit {
            data: Vec::new(),
            is_key_frame: false,
        });
        unit.data
            .extend_from_slice(&stream[bounds.start_code..bounds.end]);
        if let NalRole::Slice { key, .. } = role {
            has_slice = true;
            unit.is_key_frame |= key;
        }
        cursor = bounds.end;
    }

    units.extend(current);
    Ok(units)
}
