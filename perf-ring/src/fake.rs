//! Synthetic ring producer: the kernel's write side, in miniature.
//!
//! Backs a [`RingReader`] with a plain heap allocation and writes records the
//! way the kernel does — split across the wrap point when necessary, head
//! published with release ordering. Used by unit and integration tests and by
//! the demo binaries; also handy for exercising a full pipeline on machines
//! with no GPU at all.
//!
//! The producer does not respect the consumer tail, which matches the
//! kernel's overwrite ("flight recorder") mode. Non-overwrite tests simply
//! avoid writing more than the buffer holds between drains.

use std::ptr;
use std::sync::atomic::{fence, Ordering};

use crate::ring_buffer::RingReader;
use crate::sys::{self, perf_event_mmap_page, RecordHeader};

/// Header page size used for the synthetic region.
const PAGE: usize = 4096;

pub struct FakeRing {
    /// Backing store for header page + data region. Allocated as u64s so the
    /// cursor fields in the header page are 8-byte aligned for the volatile
    /// accesses both sides perform.
    mem: Box<[u64]>,
    buffer_size: u64,
    head: u64,
}

impl FakeRing {
    /// `buffer_size` must be a power of two.
    pub fn new(buffer_size: u64) -> Self {
        assert!(
            buffer_size.is_power_of_two(),
            "ring size must be a power of two"
        );
        let words = (PAGE + buffer_size as usize) / 8;
        FakeRing {
            mem: vec![0u64; words].into_boxed_slice(),
            buffer_size,
            head: 0,
        }
    }

    fn base(&mut self) -> *mut u8 {
        self.mem.as_mut_ptr() as *mut u8
    }

    /// A reader over this region. The returned reader borrows the backing
    /// memory by raw pointer; keep the `FakeRing` alive for as long as the
    /// reader is in use.
    pub fn reader(&mut self) -> RingReader {
        let base = self.base();
        unsafe {
            RingReader::from_raw(base, self.buffer_size, PAGE, false)
                .expect("size validated in FakeRing::new")
        }
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    /// The consumer tail as last committed through the shared page.
    pub fn tail(&self) -> u64 {
        let page = self.mem.as_ptr() as *const perf_event_mmap_page;
        unsafe { ptr::read_volatile(ptr::addr_of!((*page).data_tail)) }
    }

    fn publish_head(&mut self) {
        let page = self.base() as *mut perf_event_mmap_page;
        fence(Ordering::Release);
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*page).data_head), self.head) };
    }

    fn write_at(&mut self, cursor: u64, bytes: &[u8]) {
        let mask = (self.buffer_size - 1) as usize;
        let data = unsafe {
            std::slice::from_raw_parts_mut(self.base().add(PAGE), self.buffer_size as usize)
        };
        for (i, &b) in bytes.iter().enumerate() {
            data[(cursor as usize + i) & mask] = b;
        }
    }

    /// Append raw bytes as-is and publish the new head.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.write_at(self.head, bytes);
        self.head += bytes.len() as u64;
        self.publish_head();
    }

    /// Append one record of the given type. The payload is padded so record
    /// sizes stay 8-byte aligned, as the kernel guarantees.
    pub fn push_record(&mut self, kind: u32, payload: &[u8]) {
        let size = (sys::RECORD_HEADER_SIZE + payload.len() + 7) & !7;
        let header = RecordHeader {
            kind,
            misc: 0,
            size: size as u16,
        };
        let mut record = Vec::with_capacity(size);
        record.extend_from_slice(&header.to_bytes());
        record.extend_from_slice(payload);
        record.resize(size, 0);
        self.push_bytes(&record);
    }

    /// Append a sample record wrapping one raw OA report.
    pub fn push_sample(&mut self, report: &[u8]) {
        let mut payload = Vec::with_capacity(4 + report.len());
        payload.extend_from_slice(&(report.len() as u32).to_le_bytes());
        payload.extend_from_slice(report);
        self.push_record(sys::PERF_RECORD_SAMPLE, &payload);
    }

    /// Append a lost-records notification.
    pub fn push_lost(&mut self, n_lost: u64) {
        let mut payload = [0u8; 16];
        payload[8..16].copy_from_slice(&n_lost.to_le_bytes());
        self.push_record(sys::PERF_RECORD_LOST, &payload);
    }

    /// Append a device sub-event record (OA overflow / report lost).
    pub fn push_device_event(&mut self, sub_event: u32) {
        self.push_record(sys::PERF_RECORD_DEVICE, &sub_event.to_le_bytes());
    }

    /// Append a bare header claiming `claimed_size` bytes without writing a
    /// body. Produces the corrupt shapes the reader must reject.
    pub fn push_bogus_header(&mut self, kind: u32, claimed_size: u16) {
        let header = RecordHeader {
            kind,
            misc: 0,
            size: claimed_size,
        };
        self.push_bytes(&header.to_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::RecordKind;

    #[test]
    fn test_records_roundtrip() {
        let mut fake = FakeRing::new(4096);
        let mut ring = fake.reader();

        let report = [0xabu8; 64];
        fake.push_sample(&report);
        fake.push_lost(7);
        fake.push_device_event(sys::I915_OA_DEVICE_REPORT_LOST);

        let mut kinds = Vec::new();
        let mut payload = Vec::new();
        let summary = ring
            .drain(|record| {
                kinds.push(record.kind);
                if let Some(r) = record.oa_report() {
                    payload = r.to_vec();
                }
            })
            .unwrap();

        assert_eq!(
            kinds,
            vec![
                RecordKind::Sample,
                RecordKind::Lost(7),
                RecordKind::OaReportLost
            ]
        );
        assert_eq!(payload, report);
        assert_eq!(summary.samples, 1);
        assert_eq!(summary.lost_events, 7);
        // Tail held at the sample so the next batch can pair with it.
        assert_eq!(summary.committed_tail, 0);
    }

    #[test]
    fn test_sample_record_is_aligned() {
        let mut fake = FakeRing::new(4096);
        fake.push_sample(&[0u8; 256]);
        assert_eq!(fake.head() % 8, 0);
    }
}
