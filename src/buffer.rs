//! Growable circular byte buffer with blocking reads.
//!
//! Each registered channel owns one [`ByteBuffer`]. The receive loop is the
//! only writer and a single caller thread reads from it, so the buffer is
//! built for one producer and one consumer: writes never block (the backing
//! store grows instead) and reads block until data or the end marker arrives.

use crate::error::{MuxError, Result};
use parking_lot::{Condvar, Mutex};

/// Cursor and storage state, always accessed under the buffer's mutex.
#[derive(Debug)]
struct Ring {
    storage: Vec<u8>,
    /// Position of the next byte to read
    read_pos: usize,
    /// Position of the next byte to write
    write_pos: usize,
    /// Number of unread bytes
    len: usize,
    /// Set once no more writes will happen
    end_of_data: bool,
}

impl Ring {
    fn size(&self) -> usize {
        self.storage.len()
    }

    fn writable(&self) -> usize {
        self.size() - self.len
    }

    /// Copies the unread region into `dst` without consuming it.
    fn copy_unread(&self, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.len);
        let first = self.len.min(self.size() - self.read_pos);
        dst[..first].copy_from_slice(&self.storage[self.read_pos..self.read_pos + first]);
        dst[first..].copy_from_slice(&self.storage[..self.len - first]);
    }

    /// Reallocates so that `incoming` more bytes fit, moving the unread
    /// region to the front of the new storage.
    fn grow(&mut self, incoming: usize, max_size: usize) -> Result<()> {
        let required = self.len + incoming;
        if required > max_size {
            return Err(MuxError::BufferOverflow {
                requested: required,
                max: max_size,
            });
        }

        let new_size = (self.size() * 2).max(required).min(max_size);
        let mut storage = vec![0u8; new_size];
        self.copy_unread(&mut storage[..self.len]);

        tracing::debug!(
            old_size = self.size(),
            new_size,
            unread = self.len,
            "growing byte buffer"
        );

        self.storage = storage;
        self.read_pos = 0;
        self.write_pos = self.len;
        Ok(())
    }

    fn push(&mut self, data: &[u8]) {
        let size = self.size();
        let tail = data.len().min(size - self.write_pos);
        self.storage[self.write_pos..self.write_pos + tail].copy_from_slice(&data[..tail]);
        // Wrapped write: the rest goes to the head of the array
        self.storage[..data.len() - tail].copy_from_slice(&data[tail..]);
        self.write_pos = (self.write_pos + data.len()) % size;
        self.len += data.len();
    }

    fn pop(&mut self, dest: &mut [u8]) -> usize {
        let size = self.size();
        let count = dest.len().min(self.len);
        let tail = count.min(size - self.read_pos);
        dest[..tail].copy_from_slice(&self.storage[self.read_pos..self.read_pos + tail]);
        dest[tail..count].copy_from_slice(&self.storage[..count - tail]);
        self.read_pos = (self.read_pos + count) % size;
        self.len -= count;
        count
    }
}

/// A growable, circular, blocking byte queue with an end-of-data marker.
#[derive(Debug)]
pub struct ByteBuffer {
    ring: Mutex<Ring>,
    readable: Condvar,
    max_size: usize,
}

impl ByteBuffer {
    /// Creates a buffer of `initial_size` bytes that may grow up to `max_size`.
    pub fn new(initial_size: usize, max_size: usize) -> Result<Self> {
        if initial_size == 0 {
            return Err(MuxError::Config(
                "Initial buffer size cannot be 0".to_string(),
            ));
        }
        if max_size < initial_size {
            return Err(MuxError::Config(
                "Max buffer size must be at least as large as initial buffer size".to_string(),
            ));
        }

        Ok(Self {
            ring: Mutex::new(Ring {
                storage: vec![0u8; initial_size],
                read_pos: 0,
                write_pos: 0,
                len: 0,
                end_of_data: false,
            }),
            readable: Condvar::new(),
            max_size,
        })
    }

    /// Current size of the backing storage.
    pub fn size(&self) -> usize {
        self.ring.lock().size()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn available_readable_bytes(&self) -> usize {
        self.ring.lock().len
    }

    pub fn available_writable_bytes(&self) -> usize {
        self.ring.lock().writable()
    }

    pub fn read_water_mark(&self) -> usize {
        self.ring.lock().read_pos
    }

    pub fn write_water_mark(&self) -> usize {
        self.ring.lock().write_pos
    }

    /// True once [`write_end`](Self::write_end) has been called.
    pub fn is_write_ended(&self) -> bool {
        self.ring.lock().end_of_data
    }

    /// Appends `data`, growing the backing storage when it does not fit.
    ///
    /// Never blocks. Fails with [`MuxError::BufferOverflow`] when the unread
    /// bytes plus `data` would exceed the maximum size, in which case nothing
    /// is written, and with [`MuxError::Closed`] after the end marker is set.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut ring = self.ring.lock();
        if ring.end_of_data {
            return Err(MuxError::Closed);
        }
        if data.len() > ring.writable() {
            ring.grow(data.len(), self.max_size)?;
        }
        ring.push(data);
        drop(ring);

        self.readable.notify_one();
        Ok(())
    }

    /// Copies up to `dest.len()` bytes out of the buffer.
    ///
    /// Returns whatever is available without waiting for more. Blocks only
    /// while the buffer is empty and the end marker is unset; returns 0 once
    /// the buffer is drained after [`write_end`](Self::write_end).
    pub fn read(&self, dest: &mut [u8]) -> usize {
        if dest.is_empty() {
            return 0;
        }

        let mut ring = self.ring.lock();
        while ring.len == 0 {
            if ring.end_of_data {
                return 0;
            }
            self.readable.wait(&mut ring);
        }
        ring.pop(dest)
    }

    /// Marks the end of data and wakes any blocked reader. Idempotent.
    pub fn write_end(&self) {
        let mut ring = self.ring.lock();
        ring.end_of_data = true;
        drop(ring);

        self.readable.notify_all();
    }
}
