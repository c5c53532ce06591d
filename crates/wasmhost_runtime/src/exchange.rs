//! Passing strings across the boundary through the guest's own allocator.
//!
//! The guest owns every buffer: the host never writes into memory it did not get from a
//! guest export, and every buffer it receives is handed back to the matching free export.

use crate::error::{Error, MemoryError, Result};
use crate::instance::Instance;
use crate::types::{GuestAddress, Value};

impl Instance {
    /// Calls `produce`, copies out the NUL-terminated string at the returned address and
    /// releases it with `free`.
    ///
    /// `free` runs exactly once after a successful `produce`, also when the bytes turn out
    /// not to be a valid string.
    pub fn take_string(&mut self, produce: &str, free: &str) -> Result<String> {
        let address = self.call_for_address(produce, &[])?;
        self.record_allocation(address);
        let text = self.read_cstring(address);
        self.free_guest(free, address)?;
        let text = text?;
        tracing::debug!("took {} bytes from `{produce}` at {address}", text.len());
        Ok(text)
    }

    /// Copies `text` plus a terminating NUL into a buffer obtained from `alloc`.
    ///
    /// The caller owns the returned buffer and releases it with [`Instance::free_guest`].
    /// When the guest hands back a buffer that cannot hold the string, the address is
    /// dropped from tracking and reported in the [`MemoryError::OutOfBounds`] error so the
    /// caller can still free it.
    pub fn put_string(&mut self, alloc: &str, text: &str) -> Result<GuestAddress> {
        let len = i32::try_from(text.len() + 1)
            .map_err(|_| MemoryError::StringTooLong { len: text.len() })?;
        // Fail before allocating when there is nothing to write into.
        self.memory()?;
        let address = self.call_for_address(alloc, &[Value::I32(len)])?;
        self.record_allocation(address);

        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        if let Err(err) = self.write_bytes(address, &bytes) {
            tracing::warn!("`{alloc}` returned {address}, which cannot hold {} bytes", bytes.len());
            if let Some(live) = self.allocations.as_mut() {
                live.remove(&address);
            }
            return Err(err.into());
        }
        tracing::debug!("put {} bytes at {address} via `{alloc}`", text.len());
        Ok(address)
    }

    /// Hands `address` back to the guest's `free` export.
    ///
    /// With allocation tracking enabled, addresses the host never received or already
    /// freed are rejected without calling the guest. An address stays tracked until the
    /// guest's `free` returns successfully, so a failed call can be retried.
    pub fn free_guest(&mut self, free: &str, address: GuestAddress) -> Result<()> {
        if let Some(live) = self.allocations.as_ref() {
            if !live.contains(&address) {
                return Err(MemoryError::UnknownAllocation(address).into());
            }
        }
        self.invoke(free, &[Value::I32(address.as_i32())])?;
        if let Some(live) = self.allocations.as_mut() {
            live.remove(&address);
        }
        Ok(())
    }

    /// Number of guest buffers handed out and not yet freed, when tracking is enabled.
    pub fn live_allocations(&self) -> Option<usize> {
        self.allocations.as_ref().map(|live| live.len())
    }

    fn record_allocation(&mut self, address: GuestAddress) {
        if let Some(live) = self.allocations.as_mut() {
            live.insert(address);
        }
    }

    fn call_for_address(&mut self, name: &str, args: &[Value]) -> Result<GuestAddress> {
        match self.invoke(name, args)?.as_slice() {
            [Value::I32(raw)] => Ok(GuestAddress::from_i32(*raw)),
            other => Err(Error::UnexpectedResult {
                name: name.to_string(),
                found: format!("{other:?}"),
            }),
        }
    }
}
