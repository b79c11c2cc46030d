//! Raw perf ring buffer ABI: record types, header layout, size bounds.
//!
//! The record stream layout is a fixed kernel wire format; everything here is
//! decoded explicitly from bytes at named offsets rather than by casting
//! pointers at the mapped buffer.

/// Record type values found in `RecordHeader::kind`.
pub const PERF_RECORD_LOST: u32 = 2;
pub const PERF_RECORD_THROTTLE: u32 = 5;
pub const PERF_RECORD_UNTHROTTLE: u32 = 6;
pub const PERF_RECORD_SAMPLE: u32 = 9;
/// Device-specific event record; the payload begins with a sub-event id.
pub const PERF_RECORD_DEVICE: u32 = 13;

/// Sub-event ids carried by `PERF_RECORD_DEVICE` records from the i915 OA unit.
pub const I915_OA_DEVICE_BUFFER_OVERFLOW: u32 = 1;
pub const I915_OA_DEVICE_REPORT_LOST: u32 = 2;

/// Every record starts with `{ type: u32, misc: u16, size: u16 }`.
pub const RECORD_HEADER_SIZE: usize = 8;

/// The largest raw OA counter snapshot across all report formats.
pub const MAX_OA_REPORT_SIZE: usize = 256;

/// Upper bound on a well-formed record: header, raw_size word, the largest
/// OA snapshot, and alignment padding. Records claiming to be larger are
/// spurious and get skipped rather than copied out.
pub const MAX_RECORD_SIZE: usize = RECORD_HEADER_SIZE + 4 + MAX_OA_REPORT_SIZE + 4;

/// Byte offset of the `raw_size` word inside a sample record.
pub const SAMPLE_RAW_SIZE_OFFSET: usize = RECORD_HEADER_SIZE;
/// Byte offset of the raw OA report inside a sample record.
pub const SAMPLE_REPORT_OFFSET: usize = RECORD_HEADER_SIZE + 4;

/// The shared header page that fronts the mapped region. The kernel's
/// `data_head` and the consumer's `data_tail` cursors live here.
pub use perf_event_open_sys::bindings::perf_event_mmap_page;

/// Common record header, decoded field-by-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: u32,
    pub misc: u16,
    pub size: u16,
}

impl RecordHeader {
    /// Decode a header from its first 8 bytes.
    pub fn parse(bytes: &[u8; RECORD_HEADER_SIZE]) -> Self {
        RecordHeader {
            kind: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            misc: u16::from_le_bytes([bytes[4], bytes[5]]),
            size: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Encode a header into its wire form (used by the synthetic producer).
    pub fn to_bytes(self) -> [u8; RECORD_HEADER_SIZE] {
        let mut out = [0u8; RECORD_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.kind.to_le_bytes());
        out[4..6].copy_from_slice(&self.misc.to_le_bytes());
        out[6..8].copy_from_slice(&self.size.to_le_bytes());
        out
    }
}

/// Read a little-endian u32 at `offset` within `bytes`.
pub fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Read a little-endian u64 at `offset` within `bytes`.
pub fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = RecordHeader {
            kind: PERF_RECORD_SAMPLE,
            misc: 0,
            size: 268,
        };
        let bytes = header.to_bytes();
        assert_eq!(RecordHeader::parse(&bytes), header);
    }

    #[test]
    fn test_read_helpers() {
        let mut bytes = [0u8; 16];
        bytes[4..8].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        bytes[8..16].copy_from_slice(&0x0123_4567_89ab_cdefu64.to_le_bytes());
        assert_eq!(read_u32(&bytes, 4), 0xdead_beef);
        assert_eq!(read_u64(&bytes, 8), 0x0123_4567_89ab_cdef);
    }
}
