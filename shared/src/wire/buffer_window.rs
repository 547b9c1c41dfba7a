use std::io::{self, Read};

/// Pre-allocated byte buffer with explicit read (`lo`) and write (`hi`) cursors.
/// Bytes in `lo..hi` are filled but not yet consumed.
pub struct BufferWindow {
    data: Vec<u8>,
    lo: usize,
    hi: usize,
}

impl BufferWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            lo: 0,
            hi: 0,
        }
    }

    pub fn available(&self) -> usize {
        self.hi - self.lo
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self) {
        self.lo = 0;
        self.hi = 0;
    }

    /// Reads once from `source` into the free tail. Returns the number of bytes read,
    /// `0` meaning end of stream.
    pub fn fill_from<R: Read>(&mut self, source: &mut R) -> io::Result<usize> {
        if self.lo == self.hi {
            self.clear();
        }
        let read = source.read(&mut self.data[self.hi..])?;
        self.hi += read;
        Ok(read)
    }

    /// Copies up to `dst.len()` filled bytes out, returns how many were copied
    pub fn take_into(&mut self, dst: &mut [u8]) -> usize {
        let count = dst.len().min(self.available());
        dst[..count].copy_from_slice(&self.data[self.lo..self.lo + count]);
        self.lo += count;
        count
    }

    /// Empties the window and makes `len` bytes writable through the returned slice
    pub fn reset_for(&mut self, len: usize) -> &mut [u8] {
        if self.data.len() < len {
            self.data.resize(len, 0);
        }
        self.lo = 0;
        self.hi = len;
        &mut self.data[..len]
    }
}
