//! Lock-free ring buffer consumer for a kernel-shared mmap'd region.
//!
//! The producer (kernel) writes variable-length records into a power-of-two
//! circular buffer and publishes `data_head`; we parse records and publish
//! `data_tail` once their bytes are no longer needed. Cursors increase
//! monotonically without wrapping; the physical offset is `cursor & mask`.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{fence, Ordering};

use thiserror::Error;
use tracing::{debug, warn};

use crate::sys::{self, perf_event_mmap_page, RecordHeader};

/// Errors surfaced by ring buffer mapping and record parsing.
///
/// Corruption errors abort the current batch: the already-written region can
/// no longer be walked (each record's position depends on the size of the one
/// before it), so the batch is discarded and parsing resumes at the producer
/// head on the next poll.
#[derive(Debug, Error)]
pub enum RingError {
    #[error("ring buffer size {0} is not a power of two")]
    BadBufferSize(u64),
    #[error("failed to map {size} bytes of perf ring buffer: {source}")]
    Map {
        size: usize,
        #[source]
        source: io::Error,
    },
    #[error("record header with size 0 at ring offset {offset}")]
    ZeroSizeRecord { offset: u64 },
    #[error(
        "record of {size} bytes at ring offset {offset} overshoots the producer head \
         ({available} bytes available)"
    )]
    RecordBeyondHead {
        offset: u64,
        size: u16,
        available: u64,
    },
}

/// Classified record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Carries one raw OA counter snapshot.
    Sample,
    /// The producer dropped this many records before this point.
    Lost(u64),
    Throttle,
    Unthrottle,
    /// The OA unit's internal buffer overflowed; all pending reports lost.
    OaBufferOverflow,
    /// A single OA report could not be written.
    OaReportLost,
    Unknown(u32),
}

/// One record handed to the [`RingReader::drain`] callback.
///
/// `bytes` covers the whole record including its header. When the record
/// straddled the end of the circular buffer it has been reassembled into a
/// scratch buffer, so `bytes` is always contiguous — but only valid for the
/// duration of the callback.
pub struct Record<'a> {
    pub header: RecordHeader,
    pub kind: RecordKind,
    pub bytes: &'a [u8],
}

impl Record<'_> {
    /// The raw OA report payload of a sample record.
    pub fn oa_report(&self) -> Option<&[u8]> {
        if self.kind != RecordKind::Sample || self.bytes.len() < sys::SAMPLE_REPORT_OFFSET {
            return None;
        }
        let raw_size = sys::read_u32(self.bytes, sys::SAMPLE_RAW_SIZE_OFFSET) as usize;
        let start = sys::SAMPLE_REPORT_OFFSET;
        let end = (start + raw_size).min(self.bytes.len());
        Some(&self.bytes[start..end])
    }
}

/// Counters describing one drain pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainSummary {
    /// Records dispatched to the callback.
    pub records: u32,
    /// Sample records among them.
    pub samples: u32,
    /// Producer-side dropped records reported via `Lost` records.
    pub lost_events: u64,
    /// Tail value published at the end of the pass.
    pub committed_tail: u64,
}

/// Consumer view of a mapped perf ring buffer.
///
/// The first page of the mapping is the shared header page carrying the
/// `data_head`/`data_tail` cursors; the data region follows.
pub struct RingReader {
    base: *mut u8,
    buffer_size: u64,
    page_size: usize,
    owned: bool,
}

// The region is only accessed from the owning thread; producer-side writes
// are synchronized through data_head/data_tail with fences.
unsafe impl Send for RingReader {}

impl RingReader {
    /// Map `n_pages` of ring data (plus the header page) from a perf fd.
    pub fn open(fd: RawFd, n_pages: usize) -> Result<Self, RingError> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let buffer_size = (n_pages * page_size) as u64;
        if !buffer_size.is_power_of_two() {
            return Err(RingError::BadBufferSize(buffer_size));
        }
        let mmap_size = page_size + buffer_size as usize;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mmap_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(RingError::Map {
                size: mmap_size,
                source: io::Error::last_os_error(),
            });
        }
        // Safety: we just mapped page_size + buffer_size bytes at base.
        unsafe { Self::from_raw(base as *mut u8, buffer_size, page_size, true) }
    }

    /// Wrap an already-mapped (or test-allocated) region.
    ///
    /// # Safety
    /// `base` must point to `page_size + buffer_size` valid bytes laid out as
    /// a header page followed by the data region, and must outlive the reader.
    /// Pass `owned = true` only for regions created with `mmap` that the
    /// reader should unmap on drop.
    pub unsafe fn from_raw(
        base: *mut u8,
        buffer_size: u64,
        page_size: usize,
        owned: bool,
    ) -> Result<Self, RingError> {
        if !buffer_size.is_power_of_two() {
            return Err(RingError::BadBufferSize(buffer_size));
        }
        Ok(RingReader {
            base,
            buffer_size,
            page_size,
            owned,
        })
    }

    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    fn page(&self) -> *mut perf_event_mmap_page {
        self.base as *mut perf_event_mmap_page
    }

    /// Load the producer head. The acquire fence pairs with the producer's
    /// release publish: every payload byte written before the head update is
    /// visible after this load.
    pub fn read_head(&self) -> u64 {
        let head = unsafe { ptr::read_volatile(ptr::addr_of!((*self.page()).data_head)) };
        fence(Ordering::Acquire);
        head
    }

    /// Current consumer tail. Only this reader writes it, so a plain volatile
    /// load suffices.
    pub fn tail(&self) -> u64 {
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.page()).data_tail)) }
    }

    /// Publish a new consumer tail. The release fence orders all payload
    /// reads before the store — once the producer observes the new tail it
    /// may overwrite everything behind it.
    pub fn commit_tail(&self, tail: u64) {
        fence(Ordering::Release);
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.page()).data_tail), tail) };
    }

    /// Unread byte count `(head - tail) & (buffer_size - 1)`.
    ///
    /// NB: an exactly-full buffer yields 0 here, indistinguishable from
    /// empty. Fullness is detected by the flight-recorder tracker (a record
    /// wrapping the buffer end), never from this count.
    pub fn available(&self, head: u64, tail: u64) -> u64 {
        head.wrapping_sub(tail) & (self.buffer_size - 1)
    }

    /// True if there are unread bytes.
    pub fn has_data(&self) -> bool {
        let head = self.read_head();
        self.available(head, self.tail()) != 0
    }

    pub(crate) fn data(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self.base.add(self.page_size), self.buffer_size as usize)
        }
    }

    /// Read the record header at a virtual tail position, reassembling it if
    /// it straddles the buffer end.
    pub(crate) fn header_at(&self, tail: u64) -> RecordHeader {
        let data = self.data();
        let mask = (self.buffer_size - 1) as usize;
        let offset = (tail as usize) & mask;
        let mut buf = [0u8; sys::RECORD_HEADER_SIZE];
        if offset + sys::RECORD_HEADER_SIZE <= data.len() {
            buf.copy_from_slice(&data[offset..offset + sys::RECORD_HEADER_SIZE]);
        } else {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = data[(offset + i) & mask];
            }
        }
        RecordHeader::parse(&buf)
    }

    /// Walk all pending records, invoking `on_record` for each.
    ///
    /// The committed tail is left at the start of the newest sample record —
    /// not past it — so the next drain re-reads that sample and can pair it
    /// with the first sample of the following batch. Non-sample records after
    /// the held-back sample are re-dispatched on the next pass; they are
    /// log-only types, so this is harmless.
    ///
    /// A corrupt header (zero size, or a size overshooting the head) makes
    /// the rest of the region unparseable; the whole batch is discarded (tail
    /// set to head) and the error returned.
    pub fn drain<F>(&mut self, mut on_record: F) -> Result<DrainSummary, RingError>
    where
        F: FnMut(Record<'_>),
    {
        let head = self.read_head();
        let mut tail = self.tail();
        let mask = (self.buffer_size - 1) as usize;
        let mut scratch = [0u8; sys::MAX_RECORD_SIZE];
        let mut summary = DrainSummary {
            committed_tail: tail,
            ..Default::default()
        };
        let mut last_sample_start: Option<u64> = None;

        while self.available(head, tail) > 0 {
            let header = self.header_at(tail);
            let size = header.size as u64;

            if header.size == 0 {
                self.commit_tail(head);
                summary.committed_tail = head;
                return Err(RingError::ZeroSizeRecord {
                    offset: tail & mask as u64,
                });
            }
            if size > head.wrapping_sub(tail) {
                self.commit_tail(head);
                summary.committed_tail = head;
                return Err(RingError::RecordBeyondHead {
                    offset: tail & mask as u64,
                    size: header.size,
                    available: head.wrapping_sub(tail),
                });
            }

            let data = self.data();
            let offset = (tail as usize) & mask;
            let bytes: &[u8] = if offset + size as usize <= data.len() {
                &data[offset..offset + size as usize]
            } else {
                if size as usize > sys::MAX_RECORD_SIZE {
                    warn!(
                        size = header.size,
                        "skipping spurious record larger than any known layout"
                    );
                    tail = tail.wrapping_add(size);
                    continue;
                }
                let before = data.len() - offset;
                scratch[..before].copy_from_slice(&data[offset..]);
                scratch[before..size as usize].copy_from_slice(&data[..size as usize - before]);
                &scratch[..size as usize]
            };

            let kind = classify(header, bytes);
            match kind {
                RecordKind::Sample => {
                    summary.samples += 1;
                    last_sample_start = Some(tail);
                }
                RecordKind::Lost(n) => {
                    summary.lost_events += n;
                    debug!(lost = n, "producer dropped records");
                }
                RecordKind::Throttle => debug!("sampling throttled"),
                RecordKind::Unthrottle => debug!("sampling unthrottled"),
                RecordKind::OaBufferOverflow => warn!("OA buffer overflow, reports lost"),
                RecordKind::OaReportLost => warn!("OA report lost"),
                RecordKind::Unknown(t) => debug!(record_type = t, "unrecognized record type"),
            }
            on_record(Record {
                header,
                kind,
                bytes,
            });

            summary.records += 1;
            tail = tail.wrapping_add(size);
        }

        let commit = last_sample_start.unwrap_or(tail);
        self.commit_tail(commit);
        summary.committed_tail = commit;
        Ok(summary)
    }
}

impl Drop for RingReader {
    fn drop(&mut self) {
        if self.owned {
            let mmap_size = self.page_size + self.buffer_size as usize;
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, mmap_size);
            }
        }
    }
}

fn classify(header: RecordHeader, bytes: &[u8]) -> RecordKind {
    match header.kind {
        sys::PERF_RECORD_SAMPLE => RecordKind::Sample,
        sys::PERF_RECORD_LOST => {
            // Layout: header, u64 id, u64 count of lost records.
            let n = if bytes.len() >= 24 {
                sys::read_u64(bytes, 16)
            } else {
                0
            };
            RecordKind::Lost(n)
        }
        sys::PERF_RECORD_THROTTLE => RecordKind::Throttle,
        sys::PERF_RECORD_UNTHROTTLE => RecordKind::Unthrottle,
        sys::PERF_RECORD_DEVICE if bytes.len() >= 12 => {
            match sys::read_u32(bytes, sys::RECORD_HEADER_SIZE) {
                sys::I915_OA_DEVICE_BUFFER_OVERFLOW => RecordKind::OaBufferOverflow,
                sys::I915_OA_DEVICE_REPORT_LOST => RecordKind::OaReportLost,
                _ => RecordKind::Unknown(header.kind),
            }
        }
        other => RecordKind::Unknown(other),
    }
}
