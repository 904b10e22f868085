//! Raw GlobalPlatform TEE Client API, resolved at run time from the
//! client library shipped with the TEE (`libteec.so` on OP-TEE).
//!
//! Only the fields the client actually reads are spelled out. The
//! implementation-defined parts of the structures are kept as opaque
//! storage, sized generously so that the library may write them.

use std::{
    ffi::{OsStr, c_char, c_void},
    ptr,
};

use libloading::Library;
use uuid::Uuid;

use crate::TeecResult;

pub(crate) const TEEC_SUCCESS: u32 = 0x0000_0000;

pub(crate) const TEEC_NONE: u32 = 0x0;
pub(crate) const TEEC_MEMREF_PARTIAL_INPUT: u32 = 0xD;
pub(crate) const TEEC_MEMREF_PARTIAL_OUTPUT: u32 = 0xE;
pub(crate) const TEEC_MEMREF_PARTIAL_INOUT: u32 = 0xF;

pub(crate) const TEEC_MEM_INPUT: u32 = 0x1;
pub(crate) const TEEC_MEM_OUTPUT: u32 = 0x2;

/// `TEEC_PARAM_TYPES`
pub(crate) const fn param_types(types: [u32; 4]) -> u32 {
    types[0] | types[1] << 4 | types[2] << 8 | types[3] << 12
}

#[repr(C)]
pub(crate) struct TeecContext {
    _implementation: [u64; 8],
}

impl TeecContext {
    pub(crate) const fn zeroed() -> Self {
        Self {
            _implementation: [0; 8],
        }
    }
}

#[repr(C)]
pub(crate) struct TeecSession {
    _implementation: [u64; 8],
}

impl TeecSession {
    pub(crate) const fn zeroed() -> Self {
        Self {
            _implementation: [0; 8],
        }
    }
}

#[repr(C)]
pub(crate) struct TeecUuid {
    time_low: u32,
    time_mid: u16,
    time_hi_and_version: u16,
    clock_seq_and_node: [u8; 8],
}

impl From<&Uuid> for TeecUuid {
    fn from(uuid: &Uuid) -> Self {
        let (time_low, time_mid, time_hi_and_version, clock_seq_and_node) = uuid.as_fields();
        Self {
            time_low,
            time_mid,
            time_hi_and_version,
            clock_seq_and_node: *clock_seq_and_node,
        }
    }
}

#[repr(C)]
pub(crate) struct TeecSharedMemory {
    pub(crate) buffer: *mut c_void,
    pub(crate) size: usize,
    pub(crate) flags: u32,
    _id: i32,
    _implementation: [u64; 8],
}

impl TeecSharedMemory {
    pub(crate) const fn new(buffer: *mut c_void, size: usize, flags: u32) -> Self {
        Self {
            buffer,
            size,
            flags,
            _id: 0,
            _implementation: [0; 8],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct TeecRegisteredMemoryReference {
    pub(crate) parent: *mut TeecSharedMemory,
    pub(crate) size: usize,
    pub(crate) offset: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct TeecTempMemoryReference {
    buffer: *mut c_void,
    size: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct TeecValue {
    a: u32,
    b: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union TeecParameter {
    _tmpref: TeecTempMemoryReference,
    pub(crate) memref: TeecRegisteredMemoryReference,
    _value: TeecValue,
}

#[repr(C)]
pub(crate) struct TeecOperation {
    started: u32,
    pub(crate) param_types: u32,
    pub(crate) params: [TeecParameter; 4],
    session: *mut TeecSession,
}

impl Default for TeecOperation {
    fn default() -> Self {
        let unused = TeecParameter {
            memref: TeecRegisteredMemoryReference {
                parent: ptr::null_mut(),
                size: 0,
                offset: 0,
            },
        };
        Self {
            started: 0,
            param_types: param_types([TEEC_NONE; 4]),
            params: [unused; 4],
            session: ptr::null_mut(),
        }
    }
}

type TeecInitializeContext =
    unsafe extern "C" fn(name: *const c_char, context: *mut TeecContext) -> u32;
type TeecFinalizeContext = unsafe extern "C" fn(context: *mut TeecContext);
type TeecOpenSession = unsafe extern "C" fn(
    context: *mut TeecContext,
    session: *mut TeecSession,
    destination: *const TeecUuid,
    connection_method: u32,
    connection_data: *const c_void,
    operation: *mut TeecOperation,
    return_origin: *mut u32,
) -> u32;
type TeecCloseSession = unsafe extern "C" fn(session: *mut TeecSession);
type TeecInvokeCommand = unsafe extern "C" fn(
    session: *mut TeecSession,
    command_id: u32,
    operation: *mut TeecOperation,
    return_origin: *mut u32,
) -> u32;
type TeecSharedMemoryCall =
    unsafe extern "C" fn(context: *mut TeecContext, shm: *mut TeecSharedMemory) -> u32;
type TeecReleaseSharedMemory = unsafe extern "C" fn(shm: *mut TeecSharedMemory);

#[allow(non_snake_case)]
pub struct TeecLib {
    _library: Library,
    pub(crate) TEEC_InitializeContext: TeecInitializeContext,
    pub(crate) TEEC_FinalizeContext: TeecFinalizeContext,
    pub(crate) TEEC_OpenSession: TeecOpenSession,
    pub(crate) TEEC_CloseSession: TeecCloseSession,
    pub(crate) TEEC_InvokeCommand: TeecInvokeCommand,
    pub(crate) TEEC_AllocateSharedMemory: TeecSharedMemoryCall,
    pub(crate) TEEC_RegisterSharedMemory: TeecSharedMemoryCall,
    pub(crate) TEEC_ReleaseSharedMemory: TeecReleaseSharedMemory,
}

impl TeecLib {
    /// Load the TEE client library at `path` and resolve the client API.
    pub fn instantiate<P: AsRef<OsStr>>(path: P) -> TeecResult<Self> {
        unsafe {
            let library = Library::new(path)?;
            Ok(Self {
                TEEC_InitializeContext: *library.get(b"TEEC_InitializeContext")?,
                TEEC_FinalizeContext: *library.get(b"TEEC_FinalizeContext")?,
                TEEC_OpenSession: *library.get(b"TEEC_OpenSession")?,
                TEEC_CloseSession: *library.get(b"TEEC_CloseSession")?,
                TEEC_InvokeCommand: *library.get(b"TEEC_InvokeCommand")?,
                TEEC_AllocateSharedMemory: *library.get(b"TEEC_AllocateSharedMemory")?,
                TEEC_RegisterSharedMemory: *library.get(b"TEEC_RegisterSharedMemory")?,
                TEEC_ReleaseSharedMemory: *library.get(b"TEEC_ReleaseSharedMemory")?,
                _library: library,
            })
        }
    }
}
