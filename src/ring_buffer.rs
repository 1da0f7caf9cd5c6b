//! Lock-free single-producer/single-consumer byte ring
//!
//! The receive interrupt owns the [`Producer`] half and the main loop owns the
//! [`Consumer`] half. Indices are published with release stores, so each side
//! only ever sees slots the other side has finished with. One slot is always
//! kept empty to tell "full" apart from "empty".

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Not enough room for the whole request; nothing was written.
    Overflow { requested: usize, writable: usize },
    /// Not enough buffered data for the whole request; nothing was read.
    Underflow { requested: usize, available: usize },
}

pub struct RingBuffer<const N: usize> {
    data: UnsafeCell<[u8; N]>,
    write_idx: AtomicUsize,
    read_idx: AtomicUsize,
}

// Slots in [read_idx, write_idx) belong to the consumer, the rest to the
// producer. The split handles make sure there is at most one of each.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    // Capacity must be a power of 2 for masking
    const MASK: usize = {
        assert!(N >= 2 && N.is_power_of_two(), "ring buffer capacity must be a power of two");
        N - 1
    };

    pub const fn new() -> Self {
        let _ = Self::MASK;
        Self {
            data: UnsafeCell::new([0; N]),
            write_idx: AtomicUsize::new(0),
            read_idx: AtomicUsize::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes currently buffered.
    pub fn data_len(&self) -> usize {
        let write = self.write_idx.load(Ordering::Acquire);
        let read = self.read_idx.load(Ordering::Acquire);
        write.wrapping_sub(read) & Self::MASK
    }

    /// `capacity - data_len`. Includes the reserved slot, so a buffer
    /// reporting 1 here cannot take another byte.
    pub fn free_len(&self) -> usize {
        N - self.data_len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_len() == 0
    }

    pub fn write(&mut self, byte: u8) -> Result<(), BufferError> {
        self.push(byte)
    }

    pub fn read(&mut self) -> Option<u8> {
        self.pop()
    }

    pub fn write_many(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.push_many(bytes)
    }

    pub fn read_many(&mut self, out: &mut [u8]) -> Result<(), BufferError> {
        self.pop_many(out)
    }

    /// Splits the ring into its interrupt-side and foreground-side handles.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let ring: &RingBuffer<N> = self;
        (
            Producer {
                ring,
                _not_sync: PhantomData,
            },
            Consumer {
                ring,
                _not_sync: PhantomData,
            },
        )
    }

    fn slot(&self, idx: usize) -> *mut u8 {
        // idx is always masked by the callers
        unsafe { self.data.get().cast::<u8>().add(idx) }
    }

    fn push(&self, byte: u8) -> Result<(), BufferError> {
        let write = self.write_idx.load(Ordering::Relaxed);
        let read = self.read_idx.load(Ordering::Acquire);
        let next = (write + 1) & Self::MASK;
        if next == read {
            return Err(BufferError::Overflow {
                requested: 1,
                writable: 0,
            });
        }

        unsafe { self.slot(write).write(byte) };
        self.write_idx.store(next, Ordering::Release);
        Ok(())
    }

    fn pop(&self) -> Option<u8> {
        let read = self.read_idx.load(Ordering::Relaxed);
        let write = self.write_idx.load(Ordering::Acquire);
        if read == write {
            return None;
        }

        let byte = unsafe { self.slot(read).read() };
        self.read_idx.store((read + 1) & Self::MASK, Ordering::Release);
        Some(byte)
    }

    fn push_many(&self, bytes: &[u8]) -> Result<(), BufferError> {
        let write = self.write_idx.load(Ordering::Relaxed);
        let read = self.read_idx.load(Ordering::Acquire);
        let writable = Self::MASK - (write.wrapping_sub(read) & Self::MASK);
        if bytes.len() > writable {
            return Err(BufferError::Overflow {
                requested: bytes.len(),
                writable,
            });
        }

        let mut idx = write;
        for &byte in bytes {
            unsafe { self.slot(idx).write(byte) };
            idx = (idx + 1) & Self::MASK;
        }
        // Publish the whole run at once
        self.write_idx.store(idx, Ordering::Release);
        Ok(())
    }

    fn pop_many(&self, out: &mut [u8]) -> Result<(), BufferError> {
        let read = self.read_idx.load(Ordering::Relaxed);
        let write = self.write_idx.load(Ordering::Acquire);
        let available = write.wrapping_sub(read) & Self::MASK;
        if out.len() > available {
            return Err(BufferError::Underflow {
                requested: out.len(),
                available,
            });
        }

        let mut idx = read;
        for byte in out.iter_mut() {
            *byte = unsafe { self.slot(idx).read() };
            idx = (idx + 1) & Self::MASK;
        }
        self.read_idx.store(idx, Ordering::Release);
        Ok(())
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing half, owned by the receive interrupt.
pub struct Producer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
    _not_sync: PhantomData<*const ()>,
}

unsafe impl<const N: usize> Send for Producer<'_, N> {}

impl<const N: usize> Producer<'_, N> {
    /// Never blocks. A full ring rejects the byte and keeps what it holds.
    #[inline]
    pub fn write(&mut self, byte: u8) -> Result<(), BufferError> {
        self.ring.push(byte)
    }

    pub fn write_many(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.ring.push_many(bytes)
    }

    pub fn free_len(&self) -> usize {
        self.ring.free_len()
    }
}

/// Reading half, owned by the main loop.
pub struct Consumer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
    _not_sync: PhantomData<*const ()>,
}

unsafe impl<const N: usize> Send for Consumer<'_, N> {}

impl<const N: usize> Consumer<'_, N> {
    #[inline]
    pub fn read(&mut self) -> Option<u8> {
        self.ring.pop()
    }

    pub fn read_many(&mut self, out: &mut [u8]) -> Result<(), BufferError> {
        self.ring.pop_many(out)
    }

    pub fn data_len(&self) -> usize {
        self.ring.data_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
