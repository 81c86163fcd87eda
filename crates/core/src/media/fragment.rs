//! Annex B NAL unit scanning.
//!
//! H.264 and H.265 byte-stream bitstreams delimit NAL units with start codes:
//! - 4-byte: `0x00 0x00 0x00 0x01`
//! - 3-byte: `0x00 0x00 0x01`
//!
//! [`fragment_annex_b`] walks a frame payload and produces a
//! [`FragmentationMap`] of `(offset, length)` pairs that point at the NAL
//! payloads (start codes excluded). Order is bitstream order, so parameter
//! sets stay ahead of the slices that reference them.

use crate::error::{BitstreamErrorKind, PacketizerError, Result};

/// One NAL unit inside a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub offset: usize,
    pub length: usize,
}

impl Fragment {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Ordered NAL unit boundaries for a single frame payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentationMap {
    fragments: Vec<Fragment>,
}

impl FragmentationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, offset: usize, length: usize) {
        self.fragments.push(Fragment { offset, length });
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    /// Borrow each fragment's bytes out of `payload`.
    ///
    /// `payload` must be the buffer this map was built from.
    pub fn slices<'a>(&'a self, payload: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.fragments
            .iter()
            .map(move |f| &payload[f.offset..f.end()])
    }
}

/// Position of one NAL unit found by [`find_nal_unit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnitBounds {
    /// Index of the first start code byte.
    pub start_code: usize,
    /// Index of the first NAL byte (just past the start code).
    pub start: usize,
    /// One past the last NAL byte.
    pub end: usize,
}

/// Locate the next `00 00 01` at or after `from`.
fn find_three_byte_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    (from..data.len() - 2).find(|&i| data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1)
}

/// Find the next start code at or after `from`, returning `(start_code_index, nal_start_index)`.
///
/// A zero byte immediately before a 3-byte code is folded into a 4-byte code.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let pos = find_three_byte_code(data, from)?;
    let sc_start = if pos > from && data[pos - 1] == 0 {
        pos - 1
    } else {
        pos
    };
    Some((sc_start, pos + 3))
}

/// Find the next NAL unit whose start code begins at or after `from`.
///
/// Leading bytes before the start code are skipped. The unit ends where the
/// next start code begins, or at the end of `data`.
pub fn find_nal_unit(data: &[u8], from: usize) -> Option<NalUnitBounds> {
    let (start_code, start) = find_start_code(data, from)?;
    let end = find_start_code(data, start)
        .map(|(next_sc, _)| next_sc)
        .unwrap_or(data.len());
    Some(NalUnitBounds {
        start_code,
        start,
        end,
    })
}

/// Build the fragmentation map for an Annex B frame payload.
///
/// Fails (and yields nothing) when the remaining bytes hold no start code or
/// a start code carries an empty unit. A partial map is never returned.
pub fn fragment_annex_b(data: &[u8]) -> Result<FragmentationMap> {
    let mut map = FragmentationMap::new();
    let mut cursor = 0usize;

    while cursor < data.len() {
        let nal = find_nal_unit(data, cursor).ok_or(PacketizerError::MalformedBitstream {
            offset: cursor,
            kind: BitstreamErrorKind::MissingStartCode,
        })?;

        if nal.start >= nal.end {
            return Err(PacketizerError::MalformedBitstream {
                offset: nal.start_code,
                kind: BitstreamErrorKind::EmptyUnit,
            });
        }

        map.push(nal.start, nal.end - nal.start);
        cursor = nal.end;
    }

    if map.is_empty() {
        return Err(PacketizerError::MalformedBitstream {
            offset: 0,
            kind: BitstreamErrorKind::MissingStartCode,
        });
    }

    tracing::trace!(
        nal_count = map.len(),
        frame_bytes = data.len(),
        "Annex B payload fragmented"
    );

    Ok(map)
}
