//! Shared memories backing the invocation parameters.
//!
//! A [`SharedBuffer`] owns one transport handle and releases it exactly once,
//! when dropped. Caller memory is registered when the transport accepts it;
//! otherwise the library allocates a shared memory and copies.

use tracing::{trace, warn};
use zeroize::Zeroizing;

use crate::{
    ModuleError, ModuleResult,
    core::serializer::Serializer,
    transport::{MemRef, MemRefData, ShmDirection, ShmHandle, Transport},
};

enum Storage<'a> {
    Owned(Zeroizing<Vec<u8>>),
    Borrowed(&'a [u8]),
    BorrowedMut(&'a mut [u8]),
}

impl Storage<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(data) => data,
            Storage::Borrowed(data) => data,
            Storage::BorrowedMut(data) => data,
        }
    }
}

pub(crate) struct SharedBuffer<'a, T: Transport> {
    transport: &'a T,
    handle: Option<ShmHandle>,
    direction: ShmDirection,
    storage: Storage<'a>,
    /// Exposed size before an invocation, produced size after it.
    size: usize,
}

impl<'a, T: Transport> SharedBuffer<'a, T> {
    /// A zeroed shared memory owned by the library.
    pub(crate) fn alloc(transport: &'a T, size: usize, direction: ShmDirection) -> ModuleResult<Self> {
        let handle = transport
            .allocate_shared_memory(size, direction)
            .map_err(|e| {
                warn!("shared memory allocation of {size} bytes failed: {e}");
                ModuleError::HostMemory(size)
            })?;
        trace!("allocated {size} bytes shared memory {handle:?}");
        Ok(Self {
            transport,
            handle: Some(handle),
            direction,
            storage: Storage::Owned(Zeroizing::new(vec![0_u8; size])),
            size,
        })
    }

    /// A shared memory owned by the library, initialized with `bytes`.
    pub(crate) fn alloc_with(
        transport: &'a T,
        bytes: &[u8],
        direction: ShmDirection,
    ) -> ModuleResult<Self> {
        let mut buffer = Self::alloc(transport, bytes.len(), direction)?;
        if let Storage::Owned(data) = &mut buffer.storage {
            data.copy_from_slice(bytes);
        }
        Ok(buffer)
    }

    /// Control buffer holding the scalar arguments of a command. The trusted
    /// application writes its status word back into it.
    pub(crate) fn control(transport: &'a T, arguments: &Serializer) -> ModuleResult<Self> {
        Self::alloc_with(transport, arguments.as_bytes(), ShmDirection::InOut)
    }

    /// Share caller input memory without copy.
    pub(crate) fn register(transport: &'a T, buffer: &'a [u8]) -> ModuleResult<Self> {
        let handle = transport.register_shared_memory(buffer)?;
        Ok(Self {
            transport,
            handle: Some(handle),
            direction: ShmDirection::Input,
            storage: Storage::Borrowed(buffer),
            size: buffer.len(),
        })
    }

    /// Share caller output memory without copy.
    pub(crate) fn register_mut(
        transport: &'a T,
        buffer: &'a mut [u8],
        direction: ShmDirection,
    ) -> ModuleResult<Self> {
        let handle = transport.register_writable_memory(buffer, direction)?;
        let size = buffer.len();
        Ok(Self {
            transport,
            handle: Some(handle),
            direction,
            storage: Storage::BorrowedMut(buffer),
            size,
        })
    }

    /// Share caller input memory, copying it into an allocated shared memory
    /// if the transport refuses to register it.
    pub(crate) fn register_or_copy(transport: &'a T, buffer: &'a [u8]) -> ModuleResult<Self> {
        match Self::register(transport, buffer) {
            Ok(shared) => Ok(shared),
            Err(e) => {
                warn!(
                    "cannot register {} bytes input buffer ({e}), falling back to a copy",
                    buffer.len()
                );
                Self::alloc_with(transport, buffer, ShmDirection::Input)
            }
        }
    }

    /// Output memory of the caller, or a zero sized allocation when the caller
    /// only queries the output size.
    pub(crate) fn output(transport: &'a T, buffer: &'a mut [u8]) -> ModuleResult<Self> {
        if buffer.is_empty() {
            Self::alloc(transport, 0, ShmDirection::Output)
        } else {
            Self::register_mut(transport, buffer, ShmDirection::Output)
        }
    }

    pub(crate) const fn direction(&self) -> ShmDirection {
        self.direction
    }

    pub(crate) const fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    /// Capacity of the memory backing the buffer.
    pub(crate) fn capacity(&self) -> usize {
        self.storage.as_slice().len()
    }

    /// Whole backing memory.
    pub(crate) fn data(&self) -> &[u8] {
        self.storage.as_slice()
    }

    /// The produced bytes, bounded by the capacity.
    pub(crate) fn produced(&self) -> &[u8] {
        let data = self.storage.as_slice();
        &data[..self.size.min(data.len())]
    }

    /// View of the buffer for one invocation.
    pub(crate) fn memref(&mut self) -> MemRef<'_> {
        let handle = self.handle.unwrap_or(ShmHandle(u64::MAX));
        let data = match (&mut self.storage, self.direction) {
            (Storage::Borrowed(data), _) => MemRefData::Input(*data),
            (Storage::Owned(data), ShmDirection::Input) => MemRefData::Input(data.as_slice()),
            (Storage::Owned(data), ShmDirection::Output) => MemRefData::Output(data.as_mut_slice()),
            (Storage::Owned(data), ShmDirection::InOut) => MemRefData::InOut(data.as_mut_slice()),
            (Storage::BorrowedMut(data), ShmDirection::Input) => MemRefData::Input(&**data),
            (Storage::BorrowedMut(data), ShmDirection::Output) => MemRefData::Output(&mut **data),
            (Storage::BorrowedMut(data), ShmDirection::InOut) => MemRefData::InOut(&mut **data),
        };
        MemRef {
            handle,
            data,
            size: self.size,
        }
    }
}

impl<T: Transport> Drop for SharedBuffer<'_, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            trace!("releasing shared memory {handle:?}");
            self.transport.release_shared_memory(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock_ta::MockTa;

    #[test]
    fn refused_registration_copies_the_input() {
        let transport = MockTa::default();
        transport.refuse_registration(true);
        let input = [1_u8, 2, 3];
        let mut shared = SharedBuffer::register_or_copy(&transport, &input).unwrap();
        assert_eq!(shared.data(), &input);
        assert!(matches!(shared.memref().data, MemRefData::Input(data) if data == [1, 2, 3]));
        drop(shared);
        assert_eq!(transport.shm_counts(), (1, 0, 1, 1));
        assert!(transport.shm_balanced());
    }

    #[test]
    fn size_queries_use_an_empty_allocation() {
        let transport = MockTa::default();
        let mut caller = [0_u8; 0];
        let mut shared = SharedBuffer::output(&transport, &mut caller).unwrap();
        assert_eq!(shared.capacity(), 0);
        assert!(matches!(shared.memref().data, MemRefData::Output(_)));
        drop(shared);

        let mut caller = [0_u8; 8];
        let shared = SharedBuffer::output(&transport, &mut caller).unwrap();
        assert_eq!((shared.capacity(), shared.size()), (8, 8));
        drop(shared);
        assert_eq!(transport.shm_counts(), (1, 1, 0, 2));
    }

    #[test]
    fn caller_output_is_registered_writable() {
        let transport = MockTa::default();
        let input = [1_u8; 4];
        drop(SharedBuffer::register(&transport, &input).unwrap());
        assert_eq!(transport.writable_registrations(), 0);

        let mut caller = [0_u8; 4];
        let mut shared = SharedBuffer::output(&transport, &mut caller).unwrap();
        assert!(matches!(shared.memref().data, MemRefData::Output(_)));
        drop(shared);
        assert_eq!(transport.writable_registrations(), 1);
        assert_eq!(transport.shm_counts(), (0, 2, 0, 2));
    }

    #[test]
    fn produced_bytes_never_exceed_the_capacity() {
        let transport = MockTa::default();
        let mut shared = SharedBuffer::alloc_with(&transport, b"abcd", ShmDirection::InOut).unwrap();
        shared.set_size(2);
        assert_eq!(shared.produced(), b"ab");
        shared.set_size(64);
        assert_eq!(shared.produced(), b"abcd");
    }

    #[test]
    fn allocation_failure_is_host_memory() {
        let transport = MockTa::default();
        transport.refuse_allocation(true);
        assert!(matches!(
            SharedBuffer::alloc(&transport, 16, ShmDirection::Output),
            Err(ModuleError::HostMemory(16))
        ));
        assert!(transport.shm_balanced());
    }
}
