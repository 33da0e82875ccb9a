//! Flash-backed durable log sink: word-aligned writes, erase-before-cross,
//! and wraparound at the end of the reserved log region.
//!
//! Grounded on the teacher's `lib::ringbuf` wraparound arithmetic, combined
//! with the spec's flash constraints (writes must be aligned to
//! [`crate::config::FLASH_WRITE_ALIGN`] and a sector must be erased before
//! any byte inside it is overwritten).

use super::{ByteSink, LINE_CAP};
use crate::config::FLASH_WRITE_ALIGN;

/// Platform hook for the two flash primitives the log pipeline needs.
/// `program` must only be called on a range that has been `erase`d (or is
/// already all-0xFF) since its last program.
pub trait FlashDevice: Send + Sync {
    fn sector_size(&self) -> usize;
    fn region_size(&self) -> usize;
    fn erase_sector(&self, sector_index: usize);
    fn program(&self, offset: usize, bytes: &[u8]);
}

/// Tracks the write cursor across a reserved flash region, erasing each
/// sector exactly once before the cursor first enters it, and wrapping back
/// to offset 0 (re-erasing sector 0) when the region is full.
pub struct FlashWriter<'a> {
    device: &'a dyn FlashDevice,
    cursor: usize,
    erased_up_to_sector: usize,
}

impl<'a> FlashWriter<'a> {
    pub fn new(device: &'a dyn FlashDevice) -> Self {
        Self { device, cursor: 0, erased_up_to_sector: 0 }
    }

    fn sector_of(&self, offset: usize) -> usize {
        offset / self.device.sector_size()
    }

    fn ensure_erased(&mut self, up_to_offset: usize) {
        let target_sector = self.sector_of(up_to_offset.min(self.device.region_size() - 1));
        while self.erased_up_to_sector <= target_sector {
            self.device.erase_sector(self.erased_up_to_sector);
            self.erased_up_to_sector += 1;
        }
    }

    /// Pad `payload` up to the next [`FLASH_WRITE_ALIGN`] boundary with
    /// zero bytes and program it at the current cursor, erasing sectors as
    /// the cursor crosses into them and wrapping to offset 0 when the
    /// region is exhausted. Payloads longer than [`LINE_CAP`] are rejected
    /// rather than silently truncated - the log pipeline already bounds
    /// every record to `max_message_size.min(LINE_CAP)` before it reaches
    /// here, so this can only trigger on a direct misuse of the writer.
    pub fn write_aligned(&mut self, payload: &[u8]) {
        if payload.len() > LINE_CAP {
            return;
        }
        let aligned_len = align_up(payload.len(), FLASH_WRITE_ALIGN);
        if self.cursor + aligned_len > self.device.region_size() {
            self.cursor = 0;
            self.erased_up_to_sector = 0;
        }
        self.ensure_erased(self.cursor + aligned_len);

        let mut staging = [0u8; LINE_CAP];
        staging[..payload.len()].copy_from_slice(payload);
        self.device.program(self.cursor, &staging[..aligned_len]);
        self.cursor += aligned_len;
    }
}

fn align_up(len: usize, align: usize) -> usize {
    (len + align - 1) / align * align
}

/// Best-effort convenience used by the drain path when the flash sink is a
/// plain [`ByteSink`] rather than a structured [`FlashDevice`] (e.g. in
/// tests, or a target where the flash driver is exposed only as a byte
/// stream writer). Pads to the alignment boundary with zero bytes; callers
/// needing real sector-erase semantics should drive a [`FlashWriter`]
/// directly instead.
pub fn write_record(sink: &dyn ByteSink, payload: &[u8]) {
    if payload.len() > LINE_CAP {
        return;
    }
    let aligned_len = align_up(payload.len(), FLASH_WRITE_ALIGN);
    let mut staging = [0u8; LINE_CAP];
    staging[..payload.len()].copy_from_slice(payload);
    sink.write(&staging[..aligned_len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    struct FakeFlash {
        sector_size: usize,
        region_size: usize,
        erases: RefCell<heapless::Vec<usize, 64>>,
        programs: RefCell<heapless::Vec<(usize, usize), 64>>,
    }

    impl FlashDevice for FakeFlash {
        fn sector_size(&self) -> usize { self.sector_size }
        fn region_size(&self) -> usize { self.region_size }
        fn erase_sector(&self, sector_index: usize) {
            let _ = self.erases.borrow_mut().push(sector_index);
        }
        fn program(&self, offset: usize, bytes: &[u8]) {
            let _ = self.programs.borrow_mut().push((offset, bytes.len()));
        }
    }

    #[test]
    fn writes_are_aligned_up() {
        let dev = FakeFlash {
            sector_size: 64,
            region_size: 1024,
            erases: RefCell::new(heapless::Vec::new()),
            programs: RefCell::new(heapless::Vec::new()),
        };
        let mut w = FlashWriter::new(&dev);
        w.write_aligned(b"abc"); // len 3 -> aligned to 4
        assert_eq!(dev.programs.borrow()[0].1, 4);
    }

    #[test]
    fn crossing_a_sector_boundary_erases_it_once() {
        let dev = FakeFlash {
            sector_size: 16,
            region_size: 256,
            erases: RefCell::new(heapless::Vec::new()),
            programs: RefCell::new(heapless::Vec::new()),
        };
        let mut w = FlashWriter::new(&dev);
        for _ in 0..5 {
            w.write_aligned(b"1234"); // 4 bytes each, 4 writes per 16-byte sector
        }
        // Sector 0 holds 4 records, sector 1 gets the 5th.
        assert_eq!(dev.erases.borrow().as_slice(), &[0, 1]);
    }

    #[test]
    fn region_exhaustion_wraps_and_reerases_sector_zero() {
        let dev = FakeFlash {
            sector_size: 16,
            region_size: 16,
            erases: RefCell::new(heapless::Vec::new()),
            programs: RefCell::new(heapless::Vec::new()),
        };
        let mut w = FlashWriter::new(&dev);
        w.write_aligned(b"1234567890123456"); // fills the whole region
        w.write_aligned(b"abcd"); // must wrap
        assert_eq!(dev.erases.borrow().as_slice(), &[0, 0]);
    }
}
