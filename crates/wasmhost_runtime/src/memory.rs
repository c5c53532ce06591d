//! Bounds-checked access to an instance's linear memory.
//!
//! A [`MemoryView`] borrows the instance mutably, so it cannot be held across a call into
//! the guest. Every access therefore sees the memory as it is after the latest call,
//! including any relocation caused by `memory.grow`.

use std::ops::Range;

use crate::error::MemoryError;
use crate::instance::Instance;
use crate::types::GuestAddress;
use crate::DEFAULT_MEMORY;

/// Size of a WebAssembly page in bytes.
pub const PAGE_SIZE: usize = 65536;

pub struct MemoryView<'a> {
    bytes: &'a mut [u8],
}

impl<'a> MemoryView<'a> {
    fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.bytes
    }

    fn range(&self, address: GuestAddress, len: usize) -> Result<Range<usize>, MemoryError> {
        let start = address.offset();
        start
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .map(|end| start..end)
            .ok_or(MemoryError::OutOfBounds {
                address,
                len,
                size: self.bytes.len(),
            })
    }

    pub fn read(&self, address: GuestAddress, len: usize) -> Result<&[u8], MemoryError> {
        let range = self.range(address, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, address: GuestAddress, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(address, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Bytes from `address` up to, not including, the next NUL.
    pub fn read_cstring_bytes(&self, address: GuestAddress) -> Result<&[u8], MemoryError> {
        let tail = self.read(address, self.bytes.len().saturating_sub(address.offset()))?;
        let len = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or(MemoryError::UnterminatedString { address })?;
        Ok(&tail[..len])
    }

    pub fn read_cstring(&self, address: GuestAddress) -> Result<String, MemoryError> {
        let bytes = self.read_cstring_bytes(address)?.to_vec();
        String::from_utf8(bytes).map_err(|source| MemoryError::InvalidUtf8 { address, source })
    }
}

impl Instance {
    /// View of the export named `memory`.
    pub fn memory(&mut self) -> Result<MemoryView<'_>, MemoryError> {
        self.memory_named(DEFAULT_MEMORY)
    }

    pub fn memory_named(&mut self, name: &str) -> Result<MemoryView<'_>, MemoryError> {
        self.inner
            .memory(name)
            .map(MemoryView::new)
            .ok_or_else(|| MemoryError::MissingMemory(name.to_string()))
    }

    /// Current size of `memory` in bytes.
    pub fn memory_size(&mut self) -> Result<usize, MemoryError> {
        Ok(self.memory()?.size())
    }

    /// Grows `memory` by `delta` pages and returns the previous size in pages.
    pub fn grow_memory(&mut self, delta: u64) -> Result<u64, MemoryError> {
        let previous = self
            .inner
            .grow_memory(DEFAULT_MEMORY, delta)
            .ok_or_else(|| MemoryError::MissingMemory(DEFAULT_MEMORY.to_string()))?
            .map_err(|message| MemoryError::GrowFailed {
                name: DEFAULT_MEMORY.to_string(),
                delta,
                message,
            })?;
        tracing::debug!("grew memory from {previous} pages by {delta}");
        Ok(previous)
    }

    pub fn read_bytes(&mut self, address: GuestAddress, len: usize) -> Result<Vec<u8>, MemoryError> {
        Ok(self.memory()?.read(address, len)?.to_vec())
    }

    pub fn write_bytes(&mut self, address: GuestAddress, data: &[u8]) -> Result<(), MemoryError> {
        self.memory()?.write(address, data)
    }

    pub fn read_cstring(&mut self, address: GuestAddress) -> Result<String, MemoryError> {
        self.memory()?.read_cstring(address)
    }
}
