//! decoding of the `IN_FORMATS` plane property blob
//!
//! the blob is a `drm_format_modifier_blob` header followed by a format list
//! and a modifier list, both located through offsets relative to the header.
//! only the modifier list is decoded.

use std::{fmt, io};

const HEADER_LEN: usize = 24;
const MODIFIER_LEN: usize = 24;

/// `DRM_FORMAT_MOD_VENDOR_ARM`
pub const VENDOR_ARM: u64 = 0x08;
/// `AFBC_FORMAT_MOD_BLOCK_SIZE_16x16`
pub const AFBC_BLOCK_SIZE_16X16: u64 = 1;
/// `AFBC_FORMAT_MOD_SPARSE`
pub const AFBC_SPARSE: u64 = 1 << 6;

/// ARM frame buffer compression, 16x16 superblocks, sparse layout
pub const AFBC_MODIFIER: u64 = (VENDOR_ARM << 56) | AFBC_SPARSE | AFBC_BLOCK_SIZE_16X16;

/// offset of the modifier inside one `drm_format_modifier` entry
const MODIFIER_VALUE_AT: usize = 16;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InFormats {
    pub modifiers: Vec<u64>,
}

impl InFormats {
    pub fn parse(blob: &[u8]) -> Result<Self, BlobError> {
        if blob.len() < HEADER_LEN {
            return Err(BlobError::Truncated);
        }

        let count_modifiers = read_u32(blob, 16)? as usize;
        let modifiers_offset = read_u32(blob, 20)? as usize;

        let modifiers = (0..count_modifiers)
            .map(|i| read_u64(blob, modifiers_offset + i * MODIFIER_LEN + MODIFIER_VALUE_AT))
            .collect::<Result<_, _>>()?;

        Ok(Self { modifiers })
    }

    pub fn has_modifier(&self, modifier: u64) -> bool {
        self.modifiers.contains(&modifier)
    }

    pub fn has_afbc(&self) -> bool {
        self.has_modifier(AFBC_MODIFIER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobError {
    Truncated,
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::Truncated => f.write_str("IN_FORMATS blob is truncated"),
        }
    }
}

impl std::error::Error for BlobError {}

impl From<BlobError> for io::Error {
    fn from(err: BlobError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

fn read_u32(blob: &[u8], at: usize) -> Result<u32, BlobError> {
    let bytes = blob.get(at..at + 4).ok_or(BlobError::Truncated)?;
    Ok(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64(blob: &[u8], at: usize) -> Result<u64, BlobError> {
    let bytes = blob.get(at..at + 8).ok_or(BlobError::Truncated)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_ne_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARGB8888: u32 = 0x3432_5241;
    const ABGR8888: u32 = 0x3432_4241;

    fn blob(formats: &[u32], modifiers: &[(u64, u64)]) -> Vec<u8> {
        let formats_offset = HEADER_LEN as u32;
        let modifiers_offset = formats_offset + (formats.len() as u32) * 4;

        let mut out = vec![];
        for field in [1, 0, formats.len() as u32, formats_offset, modifiers.len() as u32, modifiers_offset] {
            out.extend_from_slice(&field.to_ne_bytes());
        }
        for format in formats {
            out.extend_from_slice(&format.to_ne_bytes());
        }
        for (mask, modifier) in modifiers {
            out.extend_from_slice(&mask.to_ne_bytes());
            out.extend_from_slice(&0u32.to_ne_bytes());
            out.extend_from_slice(&0u32.to_ne_bytes());
            out.extend_from_slice(&modifier.to_ne_bytes());
        }
        out
    }

    #[test]
    fn afbc_modifier_value() {
        assert_eq!(AFBC_MODIFIER, 0x0800_0000_0000_0041);
    }

    #[test]
    fn parses_modifier_list() {
        let data = blob(&[ARGB8888, ABGR8888], &[(0b11, 0), (0b10, AFBC_MODIFIER)]);
        let parsed = InFormats::parse(&data).unwrap();

        assert_eq!(parsed.modifiers, vec![0, AFBC_MODIFIER]);
        assert!(parsed.has_afbc());
        assert!(parsed.has_modifier(0));
    }

    #[test]
    fn linear_only_plane_has_no_afbc() {
        let data = blob(&[ARGB8888], &[(0b1, 0)]);
        assert!(!InFormats::parse(&data).unwrap().has_afbc());
    }

    #[test]
    fn rejects_truncated_blob() {
        let mut data = blob(&[ARGB8888], &[(0b1, AFBC_MODIFIER)]);
        data.truncate(data.len() - 4);
        assert_eq!(InFormats::parse(&data), Err(BlobError::Truncated));
        assert_eq!(InFormats::parse(&[0; 8]), Err(BlobError::Truncated));
    }
}
