//! VP8 (RFC 7741) and VP9 (RFC 9628) RTP payloaders.
//!
//! VPx frames are self-delimited, so they skip Annex B fragmentation and are
//! split at MTU boundaries. Each RTP payload starts with a payload descriptor
//! built from the frame's [`CodecHeader`].

use super::Payloader;
use super::codec::{CodecHeader, CodecKind, Vp8Header, Vp9Header};
use super::fragment::FragmentationMap;

/// Encode a 15-bit picture ID with the M (extended) bit set.
fn push_picture_id(buf: &mut Vec<u8>, picture_id: u16) {
    buf.push(0x80 | ((picture_id >> 8) as u8 & 0x7f));
    buf.push(picture_id as u8);
}

/// Split `frame` into chunks of at most `mtu - descriptor_len` bytes and
/// prefix each with the descriptor produced by `descriptor(first, last)`.
fn chunk_with_descriptor(
    frame: &[u8],
    mtu: usize,
    descriptor_len: usize,
    mut descriptor: impl FnMut(bool, bool) -> Vec<u8>,
) -> Vec<Vec<u8>> {
    if frame.is_empty() || mtu <= descriptor_len {
        return Vec::new();
    }
    let max_chunk = mtu - descriptor_len;
    let count = frame.len().div_ceil(max_chunk);

    frame
        .chunks(max_chunk)
        .enumerate()
        .map(|(i, chunk)| {
            let mut payload = descriptor(i == 0, i + 1 == count);
            payload.extend_from_slice(chunk);
            payload
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Vp8Payloader;

impl Vp8Payloader {
    /// Payload descriptor (RFC 7741 §4.2):
    ///
    /// ```text
    ///  0 1 2 3 4 5 6 7
    /// +-+-+-+-+-+-+-+-+
    /// |X|R|N|S|R| PID |
    /// +-+-+-+-+-+-+-+-+
    /// |I|L|T|K| RSV   |  (present when X = 1)
    /// +-+-+-+-+-+-+-+-+
    /// |M| PictureID   |  (present when I = 1)
    /// +-+-+-+-+-+-+-+-+
    /// ```
    pub fn descriptor(header: &Vp8Header, first: bool) -> Vec<u8> {
        let mut byte0 = header.partition_id & 0x07;
        if header.non_reference {
            byte0 |= 0x20;
        }
        if first && header.beginning_of_partition {
            byte0 |= 0x10;
        }
        match header.picture_id {
            Some(pid) => {
                let mut desc = vec![byte0 | 0x80, 0x80];
                push_picture_id(&mut desc, pid);
                desc
            }
            None => vec![byte0],
        }
    }
}

impl Payloader for Vp8Payloader {
    fn codec(&self) -> CodecKind {
        CodecKind::Vp8
    }

    fn payload_frame(
        &self,
        payload: &[u8],
        _fragmentation: Option<&FragmentationMap>,
        header: &CodecHeader,
        mtu: usize,
    ) -> Vec<Vec<u8>> {
        let header = match header {
            CodecHeader::Vp8(h) => *h,
            _ => Vp8Header::default(),
        };
        let len = Self::descriptor(&header, true).len();
        chunk_with_descriptor(payload, mtu, len, |first, _| {
            Self::descriptor(&header, first)
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Vp9Payloader;

impl Vp9Payloader {
    /// Non-flexible payload descriptor without layer indices:
    ///
    /// ```text
    ///  0 1 2 3 4 5 6 7
    /// +-+-+-+-+-+-+-+-+
    /// |I|P|L|F|B|E|V|Z|
    /// +-+-+-+-+-+-+-+-+
    /// |M| PictureID   |  (present when I = 1)
    /// +-+-+-+-+-+-+-+-+
    /// ```
    pub fn descriptor(header: &Vp9Header, first: bool, last: bool) -> Vec<u8> {
        let mut byte0 = 0u8;
        if header.picture_id.is_some() {
            byte0 |= 0x80;
        }
        if header.inter_pic_predicted {
            byte0 |= 0x40;
        }
        if first {
            byte0 |= 0x08;
        }
        if last {
            byte0 |= 0x04;
        }
        let mut desc = vec![byte0];
        if let Some(pid) = header.picture_id {
            push_picture_id(&mut desc, pid);
        }
        desc
    }
}

impl Payloader for Vp9Payloader {
    fn codec(&self) -> CodecKind {
        CodecKind::Vp9
    }

    fn payload_frame(
        &self,
        payload: &[u8],
        _fragmentation: Option<&FragmentationMap>,
        header: &CodecHeader,
        mtu: usize,
    ) -> Vec<Vec<u8>> {
        let header = match header {
            CodecHeader::Vp9(h) => *h,
            _ => Vp9Header::default(),
        };
        let len = Self::descriptor(&header, true, true).len();
        chunk_with_descriptor(payload, mtu, len, |first, last| {
            Self::descriptor(&header, first, last)
        })
    }
}
