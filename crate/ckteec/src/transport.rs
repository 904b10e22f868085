//! Boundary with the secure world.
//!
//! A [`Transport`] opens the logical connection to the trusted application,
//! hands out direction-tagged shared memories and performs one blocking
//! invocation at a time. Everything above it (codecs, invocation engine,
//! orchestrators) is transport agnostic.

use thiserror::Error;

/// Opaque identifier of a shared memory handed out by a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShmHandle(pub u64);

/// Direction of a shared memory as seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmDirection {
    Input,
    Output,
    InOut,
}

impl ShmDirection {
    #[must_use]
    pub const fn is_output(self) -> bool {
        matches!(self, Self::Output | Self::InOut)
    }
}

/// Bytes exposed through a memory reference for the duration of one invocation.
#[derive(Debug)]
pub enum MemRefData<'a> {
    Input(&'a [u8]),
    Output(&'a mut [u8]),
    InOut(&'a mut [u8]),
}

impl MemRefData<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            MemRefData::Input(data) => data.len(),
            MemRefData::Output(data) | MemRefData::InOut(data) => data.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn direction(&self) -> ShmDirection {
        match self {
            MemRefData::Input(_) => ShmDirection::Input,
            MemRefData::Output(_) => ShmDirection::Output,
            MemRefData::InOut(_) => ShmDirection::InOut,
        }
    }
}

/// A memory reference parameter.
///
/// `size` holds the exposed size when the invocation starts. On return, the
/// transport overwrites it with the size produced (or required) by the
/// trusted application for output references.
#[derive(Debug)]
pub struct MemRef<'a> {
    pub handle: ShmHandle,
    pub data: MemRefData<'a>,
    pub size: usize,
}

#[derive(Debug, Default)]
pub enum Parameter<'a> {
    #[default]
    None,
    MemRef(MemRef<'a>),
}

impl Parameter<'_> {
    /// Size reported for this parameter, if it is a memory reference.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        match self {
            Parameter::None => None,
            Parameter::MemRef(memref) => Some(memref.size),
        }
    }
}

/// The four parameter slots of one invocation.
#[derive(Debug, Default)]
pub struct Operation<'a> {
    pub params: [Parameter<'a>; 4],
}

/// Outcome of the transport itself, independently of what the trusted
/// application reports in the control buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("generic transport error")]
    Generic,
    #[error("access denied")]
    AccessDenied,
    #[error("operation cancelled")]
    Cancel,
    #[error("bad format")]
    BadFormat,
    #[error("bad parameters")]
    BadParameters,
    #[error("bad state")]
    BadState,
    #[error("item not found")]
    ItemNotFound,
    #[error("not implemented")]
    NotImplemented,
    #[error("not supported")]
    NotSupported,
    #[error("out of memory")]
    OutOfMemory,
    #[error("system busy")]
    Busy,
    #[error("communication with the trusted application failed")]
    Communication,
    #[error("security violation")]
    Security,
    #[error("output buffer too short")]
    ShortBuffer,
    #[error("trusted application is dead")]
    TargetDead,
    #[error("transport error code {0:#010x}")]
    Other(u32),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// The secure-world invocation primitive.
///
/// Implementations must be usable from several threads: the library never
/// serializes calls on behalf of its callers.
pub trait Transport: Send + Sync {
    /// Open the logical context and the session with the trusted application.
    fn open(&self) -> TransportResult<()>;

    /// Close what [`Transport::open`] opened. Closing twice is a no-op.
    fn close(&self);

    /// Allocate a shared memory of `size` bytes owned by the transport.
    fn allocate_shared_memory(
        &self,
        size: usize,
        direction: ShmDirection,
    ) -> TransportResult<ShmHandle>;

    /// Register caller input memory so that it can be shared without copy.
    ///
    /// The caller keeps `buffer` alive and unmoved until the handle is
    /// released, and passes the very same memory again at invocation time.
    fn register_shared_memory(&self, buffer: &[u8]) -> TransportResult<ShmHandle>;

    /// Register caller memory the trusted application writes into, under the
    /// same conditions as [`Transport::register_shared_memory`].
    fn register_writable_memory(
        &self,
        buffer: &mut [u8],
        direction: ShmDirection,
    ) -> TransportResult<ShmHandle>;

    /// Release a shared memory obtained by allocation or registration.
    fn release_shared_memory(&self, handle: ShmHandle);

    /// Perform one blocking invocation of `command`.
    ///
    /// On return, the `size` of every output memory reference holds the
    /// size produced by the trusted application. This also holds when
    /// [`TransportError::ShortBuffer`] is returned.
    fn invoke(&self, command: u32, operation: &mut Operation<'_>) -> TransportResult<()>;
}
