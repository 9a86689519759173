// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hmpi project

//! Growable unmanaged buffer for staging native payloads.
//!
//! [`NativeBuffer`] owns one raw memory block with stream-like read, write
//! and seek on top. Allocation prefers the transport's native allocator so
//! the memory is immediately usable for native transfers; when that is
//! disabled by configuration or reports exhaustion, the general allocator
//! takes over. The block is freed exactly once, by whichever allocator
//! produced it, and never after the transport has been shut down.
//!
//! Invariant at all times: `0 <= position <= length <= capacity`.
//!
//! Buffers are not safe for concurrent mutation; sharing across call sites
//! needs caller-supplied synchronization.

use crate::config;
use crate::error::{Error, Result};
use crate::transport::{self, Transport};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ptr::NonNull;
use std::sync::Arc;

/// Alignment for general-allocator blocks; matches what malloc guarantees,
/// so native hand-off works from either provenance.
const GENERAL_ALIGN: usize = 16;

/// Which allocator produced the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provenance {
    Native,
    General,
}

/// Resizable unmanaged memory block with stream-like access.
pub struct NativeBuffer {
    /// Null iff `capacity == 0`.
    ptr: *mut u8,
    capacity: usize,
    len: usize,
    pos: usize,
    provenance: Provenance,
    transport: Arc<dyn Transport>,
}

// SAFETY: the buffer exclusively owns its block; all mutation goes through
// `&mut self`. It is deliberately not Sync.
unsafe impl Send for NativeBuffer {}

impl NativeBuffer {
    /// Empty buffer on the global transport. Allocates on first write.
    #[must_use]
    pub fn new() -> Self {
        Self::on_transport(transport::global())
    }

    /// Empty buffer staging through `transport`'s allocator.
    #[must_use]
    pub fn on_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            capacity: 0,
            len: 0,
            pos: 0,
            provenance: Provenance::General,
            transport,
        }
    }

    /// Buffer with `capacity` bytes pre-reserved on the global transport.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buf = Self::new();
        buf.reserve(capacity)?;
        Ok(buf)
    }

    /// Bytes currently allocated.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Logical bytes in use.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the logical length is zero.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cursor for sequential access.
    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Raw pointer to the block for native hand-off.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Mutable raw pointer to the block for native hand-off.
    #[inline]
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    /// The logical contents as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: ptr is non-null whenever len > 0 (len <= capacity and
        // capacity > 0 implies an allocated block) and the first `len`
        // bytes are initialized by writes or zeroed by set_len.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Allocate a fresh block, native allocator first.
    fn allocate(&self, bytes: usize) -> Result<(NonNull<u8>, Provenance)> {
        if config::native_alloc_enabled() {
            if let Some(ptr) = self.transport.alloc(bytes) {
                return Ok((ptr, Provenance::Native));
            }
            log::debug!("[BUF] native allocator unavailable for {bytes} bytes, using general");
        }
        let layout = std::alloc::Layout::from_size_align(bytes.max(1), GENERAL_ALIGN)
            .map_err(|_| Error::OutOfMemory)?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { std::alloc::alloc(layout) };
        NonNull::new(raw)
            .map(|ptr| (ptr, Provenance::General))
            .ok_or(Error::OutOfMemory)
    }

    /// Free the current block through the allocator that produced it.
    ///
    /// The teardown flag gates the native path: after transport shutdown
    /// the block is leaked rather than handed to a shut-down runtime.
    fn release_block(&mut self) {
        if self.capacity == 0 {
            return;
        }
        let ptr = self.ptr;
        self.ptr = std::ptr::null_mut();
        let capacity = self.capacity;
        self.capacity = 0;
        match self.provenance {
            Provenance::Native => {
                if self.transport.finalized() {
                    log::trace!("[BUF] leaking {capacity} native bytes after shutdown");
                    return;
                }
                // SAFETY: ptr came from transport.alloc and is released
                // exactly once (self.ptr was nulled above).
                unsafe {
                    self.transport.free(NonNull::new_unchecked(ptr));
                }
            }
            Provenance::General => {
                // SAFETY: the same size/align pair was validated when the
                // block was allocated; ptr came from std::alloc::alloc with
                // this exact layout and is released exactly once.
                unsafe {
                    let layout = std::alloc::Layout::from_size_align_unchecked(
                        capacity.max(1),
                        GENERAL_ALIGN,
                    );
                    std::alloc::dealloc(ptr, layout);
                }
            }
        }
    }

    /// Reserve exactly `new_capacity` bytes.
    ///
    /// Always allocates a fresh block, copies `min(len, new_capacity)`
    /// bytes across, and frees the old block exactly once. Shrinking
    /// truncates the logical length and clamps the cursor.
    pub fn reserve(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity == 0 {
            self.release_block();
            self.len = 0;
            self.pos = 0;
            return Ok(());
        }
        let (fresh, provenance) = self.allocate(new_capacity)?;
        let preserved = self.len.min(new_capacity);
        if preserved > 0 {
            // SAFETY: both blocks hold at least `preserved` bytes and are
            // distinct allocations.
            unsafe {
                std::ptr::copy_nonoverlapping(self.ptr, fresh.as_ptr(), preserved);
            }
        }
        self.release_block();
        self.ptr = fresh.as_ptr();
        self.capacity = new_capacity;
        self.provenance = provenance;
        self.len = preserved;
        self.pos = self.pos.min(self.len);
        Ok(())
    }

    /// Set the logical length, growing capacity when needed.
    ///
    /// Newly exposed bytes are zeroed; shrinking clamps the cursor.
    pub fn set_len(&mut self, new_len: usize) -> Result<()> {
        if new_len > self.capacity {
            self.reserve(new_len)?;
        }
        if new_len > self.len {
            // SAFETY: capacity >= new_len > len; the gap is within the
            // allocated block.
            unsafe {
                std::ptr::write_bytes(self.ptr.add(self.len), 0, new_len - self.len);
            }
        }
        self.len = new_len;
        self.pos = self.pos.min(self.len);
        Ok(())
    }

    /// Write `data` at the cursor, growing geometrically past capacity.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let required = self.pos + data.len();
        if required > self.capacity {
            // One reallocation, amortized by the growth factor; the very
            // first allocation starts at the configured default capacity.
            let target = if self.capacity == 0 {
                required.max(config::DEFAULT_BUFFER_CAPACITY)
            } else {
                required.max(self.capacity * config::GROWTH_FACTOR)
            };
            self.reserve(target)?;
        }
        // SAFETY: capacity >= required; data and the block cannot overlap
        // (the block is unmanaged memory this buffer exclusively owns).
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(self.pos), data.len());
        }
        self.pos = required;
        self.len = self.len.max(self.pos);
        Ok(())
    }

    /// Read into `out` from the cursor, clamped to the remaining bytes.
    ///
    /// Returns how many bytes were copied; an over-read returns fewer bytes
    /// rather than failing.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> usize {
        let available = self.len - self.pos;
        let n = out.len().min(available);
        if n > 0 {
            // SAFETY: pos + n <= len <= capacity.
            unsafe {
                std::ptr::copy_nonoverlapping(self.ptr.add(self.pos), out.as_mut_ptr(), n);
            }
        }
        self.pos += n;
        n
    }

    /// Move the cursor to `pos`, which must not pass the logical length.
    pub fn set_position(&mut self, pos: usize) -> io::Result<()> {
        if pos > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "position past logical length",
            ));
        }
        self.pos = pos;
        Ok(())
    }

    /// Release the block. Idempotent; also runs on drop.
    pub fn dispose(&mut self) {
        self.release_block();
        self.len = 0;
        self.pos = 0;
    }
}

impl Default for NativeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .field("provenance", &self.provenance)
            .finish()
    }
}

impl Write for NativeBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(|e| match e {
            Error::OutOfMemory => io::Error::new(io::ErrorKind::OutOfMemory, e),
            other => io::Error::other(other),
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for NativeBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf))
    }
}

impl Seek for NativeBuffer {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target: i128 = match from {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(d) => self.pos as i128 + i128::from(d),
            SeekFrom::End(d) => self.len as i128 + i128::from(d),
        };
        let target = usize::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;
        self.set_position(target)?;
        Ok(self.pos as u64)
    }
}
