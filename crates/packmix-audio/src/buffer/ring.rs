//! Lock-free sample ring for streamed voices.
//!
//! The decode worker is the only producer and the mixer is the only consumer
//! of a given ring. Rings are allocated once per voice slot and reused across
//! voices; [`SampleRing::reset`] is called by the producer while the slot's
//! consumer is gated off by the stream generation.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Single-producer, single-consumer ring of interleaved f32 samples.
pub struct SampleRing {
    slots: Box<[UnsafeCell<f32>]>,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
    /// Power of two.
    capacity: usize,
    mask: usize,
}

impl SampleRing {
    /// Create a ring holding at least `capacity` samples (rounded up to a power of two).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity).map(|_| UnsafeCell::new(0.0)).collect();

        Self {
            slots,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples ready to be read.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Samples that can be written without overwriting unread data.
    pub fn free(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    fn base(&self) -> *mut f32 {
        UnsafeCell::raw_get(self.slots.as_ptr())
    }

    /// Producer side. Returns the number of samples written.
    pub fn write(&self, samples: &[f32]) -> usize {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Acquire);

        let space = self.capacity - write_pos.wrapping_sub(read_pos);
        let to_write = samples.len().min(space);
        if to_write == 0 {
            return 0;
        }

        let start = write_pos & self.mask;
        let first = to_write.min(self.capacity - start);
        let base = self.base();

        // SAFETY: `start + first <= capacity` and `to_write - first < start`, so both
        // copies stay inside the allocation. The region between write_pos and
        // read_pos + capacity is owned by the single producer until write_pos is
        // published below.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::copy_nonoverlapping(samples.as_ptr(), base.add(start), first);
            std::ptr::copy_nonoverlapping(samples.as_ptr().add(first), base, to_write - first);
        }

        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Consumer side. Returns the number of samples read into `output`.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);

        let to_read = output.len().min(write_pos.wrapping_sub(read_pos));
        if to_read == 0 {
            return 0;
        }

        let start = read_pos & self.mask;
        let first = to_read.min(self.capacity - start);
        let base = self.base();

        // SAFETY: bounds as in `write`. Samples between read_pos and write_pos were
        // published by the producer's release store and are not touched by it again
        // until read_pos moves past them.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(start), output.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(base, output.as_mut_ptr().add(first), to_read - first);
        }

        self.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Drop everything buffered. Producer side, only while no consumer is reading.
    pub fn reset(&self) {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        self.read_pos.store(write_pos, Ordering::Release);
    }
}

// SAFETY: the positions are atomics and each sample cell is accessed by at most
// one side at a time, as established by the acquire/release pairs above.
#[allow(unsafe_code)]
unsafe impl Send for SampleRing {}
#[allow(unsafe_code)]
unsafe impl Sync for SampleRing {}
