//! Lock-free ring buffer for handing capture samples to the output callback
//!
//! The input callback owns the [`RingProducer`], the output callback owns the
//! [`RingConsumer`]. Neither side ever blocks or allocates.
//!
//! Performance characteristics:
//! - Wait-free for the single producer and the single consumer
//! - Cache-padded positions, no false sharing between the two callbacks
//! - Samples stored as `f32` bits in atomics, no `unsafe`

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Storage shared by both halves
///
/// Positions grow monotonically (wrapping) and are masked on access, so the
/// full capacity is usable.
struct LockFreeRingBuffer {
    slots: Box<[AtomicU32]>,

    /// Write position (cache-padded to prevent false sharing)
    write_pos: CachePadded<AtomicUsize>,

    /// Read position (cache-padded to prevent false sharing)
    read_pos: CachePadded<AtomicUsize>,

    /// Mask for fast modulo operation (capacity - 1)
    mask: usize,
}

impl LockFreeRingBuffer {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn fill_level(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        write_pos.wrapping_sub(read_pos)
    }
}

/// Writing half, moved into the input callback
pub struct RingProducer {
    shared: Arc<LockFreeRingBuffer>,
}

/// Reading half, moved into the output callback
pub struct RingConsumer {
    shared: Arc<LockFreeRingBuffer>,
}

/// Create a single-producer single-consumer ring
///
/// Capacity will be rounded up to the next power of 2.
pub fn ring_buffer(capacity: usize) -> (RingProducer, RingConsumer) {
    let capacity = capacity.max(2).next_power_of_two();
    let shared = Arc::new(LockFreeRingBuffer {
        slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
        write_pos: CachePadded::new(AtomicUsize::new(0)),
        read_pos: CachePadded::new(AtomicUsize::new(0)),
        mask: capacity - 1,
    });

    (
        RingProducer {
            shared: Arc::clone(&shared),
        },
        RingConsumer { shared },
    )
}

impl RingProducer {
    /// Write samples to the buffer
    ///
    /// Returns the number of samples actually written; the rest is dropped
    /// when the consumer falls behind.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let ring = &*self.shared;
        let write_pos = ring.write_pos.load(Ordering::Relaxed);
        let read_pos = ring.read_pos.load(Ordering::Acquire);

        let available = ring.capacity() - write_pos.wrapping_sub(read_pos);
        let to_write = samples.len().min(available);

        for (i, &sample) in samples[..to_write].iter().enumerate() {
            let pos = write_pos.wrapping_add(i) & ring.mask;
            ring.slots[pos].store(sample.to_bits(), Ordering::Relaxed);
        }

        // Release makes the slot stores visible before the new position
        ring.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);

        to_write
    }

    pub fn available_write(&self) -> usize {
        self.shared.capacity() - self.shared.fill_level()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

impl RingConsumer {
    /// Read samples from the buffer
    ///
    /// Returns the number of samples actually read.
    pub fn read(&mut self, buffer: &mut [f32]) -> usize {
        let ring = &*self.shared;
        let read_pos = ring.read_pos.load(Ordering::Relaxed);
        let write_pos = ring.write_pos.load(Ordering::Acquire);

        let available = write_pos.wrapping_sub(read_pos);
        let to_read = buffer.len().min(available);

        for (i, out) in buffer[..to_read].iter_mut().enumerate() {
            let pos = read_pos.wrapping_add(i) & ring.mask;
            *out = f32::from_bits(ring.slots[pos].load(Ordering::Relaxed));
        }

        ring.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);

        to_read
    }

    /// Drop the oldest samples so that at most `keep` remain
    ///
    /// Bounds capture latency when the input device runs ahead of the
    /// output device. Returns the number of samples discarded.
    pub fn discard_excess(&mut self, keep: usize) -> usize {
        let ring = &*self.shared;
        let read_pos = ring.read_pos.load(Ordering::Relaxed);
        let write_pos = ring.write_pos.load(Ordering::Acquire);

        let excess = write_pos.wrapping_sub(read_pos).saturating_sub(keep);
        if excess > 0 {
            ring.read_pos
                .store(read_pos.wrapping_add(excess), Ordering::Release);
        }
        excess
    }

    pub fn available_read(&self) -> usize {
        self.shared.fill_level()
    }

    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}
