use std::{
    collections::HashMap,
    env,
    ffi::c_void,
    ptr,
    sync::{Mutex, MutexGuard},
};

use cosmian_ckteec::{
    ContextConfig, MemRefData, Operation, Parameter, ShmDirection, ShmHandle, TeeLoginMethod,
    Transport, TransportError, TransportResult,
};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    TeecError, TeecResult,
    teec_lib::{
        TEEC_MEM_INPUT, TEEC_MEM_OUTPUT, TEEC_MEMREF_PARTIAL_INOUT, TEEC_MEMREF_PARTIAL_INPUT,
        TEEC_MEMREF_PARTIAL_OUTPUT, TEEC_NONE, TEEC_SUCCESS, TeecContext, TeecLib, TeecOperation,
        TeecSession, TeecSharedMemory, TeecUuid, param_types,
    },
};

/// Environment variable overriding [`TEEC_LIBRARY`].
pub const ENV_TEEC_LIBRARY: &str = "CKTEEC_TEEC_LIBRARY";

/// Default location of the OP-TEE client library.
pub const TEEC_LIBRARY: &str = "/usr/lib/libteec.so.2";

/// Map a `TEEC_Result` to the transport outcome.
#[must_use]
pub fn transport_error(code: u32) -> TransportError {
    match code {
        0xFFFF_0000 => TransportError::Generic,
        0xFFFF_0001 => TransportError::AccessDenied,
        0xFFFF_0002 => TransportError::Cancel,
        0xFFFF_0005 => TransportError::BadFormat,
        0xFFFF_0006 => TransportError::BadParameters,
        0xFFFF_0007 => TransportError::BadState,
        0xFFFF_0008 => TransportError::ItemNotFound,
        0xFFFF_0009 => TransportError::NotImplemented,
        0xFFFF_000A => TransportError::NotSupported,
        0xFFFF_000C => TransportError::OutOfMemory,
        0xFFFF_000D => TransportError::Busy,
        0xFFFF_000E => TransportError::Communication,
        0xFFFF_000F => TransportError::Security,
        0xFFFF_0010 => TransportError::ShortBuffer,
        0xFFFF_3024 => TransportError::TargetDead,
        other => TransportError::Other(other),
    }
}

fn check(function: &'static str, code: u32, origin: u32) -> TeecResult<()> {
    if code == TEEC_SUCCESS {
        Ok(())
    } else {
        Err(TeecError::Teec {
            function,
            code,
            origin,
        })
    }
}

const fn memory_flags(direction: ShmDirection) -> u32 {
    match direction {
        ShmDirection::Input => TEEC_MEM_INPUT,
        ShmDirection::Output => TEEC_MEM_OUTPUT,
        ShmDirection::InOut => TEEC_MEM_INPUT | TEEC_MEM_OUTPUT,
    }
}

const fn parameter_type(direction: ShmDirection) -> u32 {
    match direction {
        ShmDirection::Input => TEEC_MEMREF_PARTIAL_INPUT,
        ShmDirection::Output => TEEC_MEMREF_PARTIAL_OUTPUT,
        ShmDirection::InOut => TEEC_MEMREF_PARTIAL_INOUT,
    }
}

/// Copy up to `length` bytes of `data` into a memory owned by the client
/// library. Empty or unmapped memories are left alone.
fn copy_to_shared(shm: &TeecSharedMemory, data: &[u8], length: usize) {
    let length = length.min(data.len()).min(shm.size);
    if length == 0 || shm.buffer.is_null() {
        return;
    }
    // SAFETY: `shm.buffer` maps at least `shm.size` bytes.
    unsafe {
        ptr::copy_nonoverlapping(data.as_ptr(), shm.buffer.cast::<u8>(), length);
    }
}

/// Copy up to `length` bytes out of a memory owned by the client library,
/// returning the number of bytes copied.
fn copy_from_shared(shm: &TeecSharedMemory, data: &mut [u8], length: usize) -> usize {
    let length = length.min(data.len()).min(shm.size);
    if length == 0 || shm.buffer.is_null() {
        return 0;
    }
    // SAFETY: `shm.buffer` maps at least `shm.size` bytes.
    unsafe {
        ptr::copy_nonoverlapping(shm.buffer.cast::<u8>().cast_const(), data.as_mut_ptr(), length);
    }
    length
}

/// Context and session with the trusted application. Boxed: the client
/// library keeps pointers to both.
struct OpenSession {
    context: Box<TeecContext>,
    session: Box<TeecSession>,
}

struct SharedMemory {
    raw: Box<TeecSharedMemory>,
    /// Owned by the client library: bytes are copied in and out around
    /// every invocation.
    allocated: bool,
}

#[derive(Default)]
struct Inner {
    open: Option<OpenSession>,
    memories: HashMap<ShmHandle, SharedMemory>,
    next_handle: u64,
}

impl Inner {
    fn context(&mut self) -> TransportResult<*mut TeecContext> {
        self.open
            .as_mut()
            .map(|open| ptr::from_mut(open.context.as_mut()))
            .ok_or(TransportError::BadState)
    }

    fn insert(&mut self, memory: SharedMemory) -> ShmHandle {
        self.next_handle += 1;
        let handle = ShmHandle(self.next_handle);
        self.memories.insert(handle, memory);
        handle
    }
}

/// Snapshot of one memory reference taken under the lock.
#[derive(Clone, Copy)]
struct Exposed {
    raw: *mut TeecSharedMemory,
    allocated: bool,
}

/// [`Transport`] over the GlobalPlatform TEE Client API.
pub struct TeecTransport {
    lib: TeecLib,
    ta_uuid: Uuid,
    login: TeeLoginMethod,
    inner: Mutex<Inner>,
}

// The raw structures are only reached through the mutex or, during an
// invocation, through pointers to boxes that stay alive until released.
// The TEE client API itself is thread safe.
unsafe impl Send for TeecTransport {}
unsafe impl Sync for TeecTransport {}

impl TeecTransport {
    #[must_use]
    pub fn new(lib: TeecLib, ta_uuid: Uuid, login: TeeLoginMethod) -> Self {
        Self {
            lib,
            ta_uuid,
            login,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Load the client library named by `CKTEEC_TEEC_LIBRARY`, or the
    /// default OP-TEE one, and target the trusted application of `config`.
    pub fn from_config(config: &ContextConfig) -> TeecResult<Self> {
        let path = env::var(ENV_TEEC_LIBRARY).unwrap_or_else(|_| TEEC_LIBRARY.to_owned());
        debug!("loading the TEE client library {path}");
        let lib = TeecLib::instantiate(&path)?;
        Ok(Self::new(lib, config.ta_uuid, config.login))
    }

    fn lock(&self) -> TransportResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| TransportError::BadState)
    }

    fn open_session(&self) -> TeecResult<OpenSession> {
        let mut context = Box::new(TeecContext::zeroed());
        let mut session = Box::new(TeecSession::zeroed());
        let destination = TeecUuid::from(&self.ta_uuid);
        let mut origin = 0;
        unsafe {
            check(
                "TEEC_InitializeContext",
                (self.lib.TEEC_InitializeContext)(ptr::null(), context.as_mut()),
                0,
            )?;
            let rv = (self.lib.TEEC_OpenSession)(
                context.as_mut(),
                session.as_mut(),
                &destination,
                self.login.id(),
                ptr::null(),
                ptr::null_mut(),
                &mut origin,
            );
            if let Err(e) = check("TEEC_OpenSession", rv, origin) {
                (self.lib.TEEC_FinalizeContext)(context.as_mut());
                return Err(e);
            }
        }
        Ok(OpenSession { context, session })
    }

    fn share(
        &self,
        mut raw: Box<TeecSharedMemory>,
        allocated: bool,
    ) -> TransportResult<ShmHandle> {
        let mut inner = self.lock()?;
        let context = inner.context()?;
        let (function, call) = if allocated {
            ("TEEC_AllocateSharedMemory", self.lib.TEEC_AllocateSharedMemory)
        } else {
            ("TEEC_RegisterSharedMemory", self.lib.TEEC_RegisterSharedMemory)
        };
        let rv = unsafe { call(context, raw.as_mut()) };
        check(function, rv, 0).map_err(|e| {
            debug!("{e}");
            TransportError::from(e)
        })?;
        Ok(inner.insert(SharedMemory { raw, allocated }))
    }

    fn release_all(&self, inner: &mut Inner) {
        for (handle, mut memory) in inner.memories.drain() {
            warn!("releasing the leaked shared memory {handle:?}");
            unsafe { (self.lib.TEEC_ReleaseSharedMemory)(memory.raw.as_mut()) };
        }
    }
}

impl Transport for TeecTransport {
    fn open(&self) -> TransportResult<()> {
        let mut inner = self.lock()?;
        if inner.open.is_some() {
            return Err(TransportError::BadState);
        }
        let open = self.open_session().map_err(|e| {
            debug!("TEEC session with {}: {e}", self.ta_uuid);
            TransportError::from(e)
        })?;
        debug!("session opened with the trusted application {}", self.ta_uuid);
        inner.open = Some(open);
        Ok(())
    }

    fn close(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        self.release_all(&mut inner);
        if let Some(mut open) = inner.open.take() {
            unsafe {
                (self.lib.TEEC_CloseSession)(open.session.as_mut());
                (self.lib.TEEC_FinalizeContext)(open.context.as_mut());
            }
            debug!("session closed with the trusted application {}", self.ta_uuid);
        }
    }

    fn allocate_shared_memory(
        &self,
        size: usize,
        direction: ShmDirection,
    ) -> TransportResult<ShmHandle> {
        let raw = Box::new(TeecSharedMemory::new(
            ptr::null_mut(),
            size,
            memory_flags(direction),
        ));
        self.share(raw, true)
    }

    fn register_shared_memory(&self, buffer: &[u8]) -> TransportResult<ShmHandle> {
        // the client library never writes into input memories
        let raw = Box::new(TeecSharedMemory::new(
            buffer.as_ptr().cast_mut().cast::<c_void>(),
            buffer.len(),
            TEEC_MEM_INPUT,
        ));
        self.share(raw, false)
    }

    fn register_writable_memory(
        &self,
        buffer: &mut [u8],
        direction: ShmDirection,
    ) -> TransportResult<ShmHandle> {
        let raw = Box::new(TeecSharedMemory::new(
            buffer.as_mut_ptr().cast::<c_void>(),
            buffer.len(),
            memory_flags(direction),
        ));
        self.share(raw, false)
    }

    fn release_shared_memory(&self, handle: ShmHandle) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match inner.memories.remove(&handle) {
            Some(mut memory) => unsafe {
                (self.lib.TEEC_ReleaseSharedMemory)(memory.raw.as_mut());
            },
            None => warn!("release of the unknown shared memory {handle:?}"),
        }
    }

    fn invoke(&self, command: u32, operation: &mut Operation<'_>) -> TransportResult<()> {
        let mut exposed = [None; 4];
        let session = {
            let mut inner = self.lock()?;
            for (slot, param) in exposed.iter_mut().zip(&operation.params) {
                if let Parameter::MemRef(memref) = param {
                    let memory = inner
                        .memories
                        .get_mut(&memref.handle)
                        .ok_or(TransportError::BadParameters)?;
                    *slot = Some(Exposed {
                        raw: ptr::from_mut(memory.raw.as_mut()),
                        allocated: memory.allocated,
                    });
                }
            }
            inner
                .open
                .as_mut()
                .map(|open| ptr::from_mut(open.session.as_mut()))
                .ok_or(TransportError::BadState)?
        };

        let mut raw_operation = TeecOperation::default();
        let mut types = [TEEC_NONE; 4];
        for (index, param) in operation.params.iter().enumerate() {
            let (Parameter::MemRef(memref), Some(memory)) = (param, exposed[index]) else {
                continue;
            };
            let data = match &memref.data {
                MemRefData::Input(data) => *data,
                MemRefData::Output(data) | MemRefData::InOut(data) => &**data,
            };
            // SAFETY: the box behind `memory.raw` is only freed on release,
            // which the owner of the handle does after this invocation.
            let shm = unsafe { &*memory.raw };
            if memref.size > data.len() || memref.size > shm.size {
                return Err(TransportError::BadParameters);
            }
            let direction = memref.data.direction();
            if memory.allocated {
                if direction != ShmDirection::Output {
                    copy_to_shared(shm, data, memref.size);
                }
            } else if !ptr::eq(shm.buffer.cast_const().cast(), data.as_ptr()) {
                return Err(TransportError::BadParameters);
            }
            types[index] = parameter_type(direction);
            raw_operation.params[index].memref.parent = memory.raw;
            raw_operation.params[index].memref.size = memref.size;
            raw_operation.params[index].memref.offset = 0;
        }
        raw_operation.param_types = param_types(types);

        trace!("TEEC_InvokeCommand {command:#x}");
        let mut origin = 0;
        let rv = unsafe {
            (self.lib.TEEC_InvokeCommand)(session, command, &mut raw_operation, &mut origin)
        };

        for (index, param) in operation.params.iter_mut().enumerate() {
            let (Parameter::MemRef(memref), Some(memory)) = (param, exposed[index]) else {
                continue;
            };
            let produced = unsafe { raw_operation.params[index].memref.size };
            let data = match &mut memref.data {
                MemRefData::Input(_) => continue,
                MemRefData::Output(data) | MemRefData::InOut(data) => &mut **data,
            };
            memref.size = produced;
            if rv == TEEC_SUCCESS && memory.allocated {
                let shm = unsafe { &*memory.raw };
                let copied = copy_from_shared(shm, data, produced);
                trace!("copied {copied} of {produced} produced bytes");
            }
        }

        check("TEEC_InvokeCommand", rv, origin).map_err(|e| {
            let error = TransportError::from(e);
            if error != TransportError::ShortBuffer {
                debug!("command {command:#x}: {error}");
            }
            error
        })
    }
}

impl Drop for TeecTransport {
    fn drop(&mut self) {
        self.close();
    }
}
