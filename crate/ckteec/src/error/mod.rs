use cosmian_pkcs11_sys::{
    CK_RV, CKR_ARGUMENTS_BAD, CKR_BUFFER_TOO_SMALL, CKR_CRYPTOKI_ALREADY_INITIALIZED,
    CKR_CRYPTOKI_NOT_INITIALIZED, CKR_DEVICE_ERROR, CKR_DEVICE_MEMORY, CKR_FUNCTION_FAILED,
    CKR_FUNCTION_NOT_SUPPORTED, CKR_GENERAL_ERROR, CKR_HOST_MEMORY, CKR_MECHANISM_INVALID,
    CKR_MECHANISM_PARAM_INVALID, CKR_SESSION_PARALLEL_NOT_SUPPORTED,
};
use thiserror::Error;

use crate::{
    ta::TaStatus,
    transport::TransportError,
};

pub(crate) mod result;
pub use result::{ModuleResult, ModuleResultHelper};

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("ckteec error: {0}")]
    Default(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ModuleError>,
    },

    // Local validation errors.
    #[error("bad arguments: {0}")]
    BadArguments(String),
    #[error("cryptoki library has already been initialized")]
    CryptokiAlreadyInitialized,
    #[error("cryptoki library has not been initialized")]
    CryptokiNotInitialized,
    #[error("function failed: {0}")]
    FunctionFailed(String),
    #[error("function not supported")]
    FunctionNotSupported,
    #[error("cannot allocate {0} bytes of shared memory")]
    HostMemory(usize),
    #[error("{0:#x} is not a valid mechanism")]
    MechanismInvalid(u32),
    #[error("invalid mechanism parameters: {0}")]
    MechanismParamInvalid(String),
    #[error("token does not support parallel sessions")]
    SessionParallelNotSupported,

    // Short buffer protocol.
    #[error("buffer too small, {required} bytes required")]
    BufferTooSmall { required: usize },
    #[error("one or more attribute buffers are too small")]
    AttributeBufferTooSmall,

    // Errors reported by, or about, the trusted application.
    #[error("trusted application returned {0}")]
    Ta(TaStatus),
    #[error("trusted application returned an unknown status {0:#010x}")]
    UnknownTaStatus(u32),
    #[error("device error: {0}")]
    DeviceError(String),
    #[error(transparent)]
    Transport(#[from] TransportError),

    // Other errors.
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
    #[error(transparent)]
    TryFromSlice(#[from] std::array::TryFromSliceError),
}

impl ModuleError {
    /// Map a status word read from the control buffer.
    ///
    /// `required` is the updated size of the output, reported with
    /// `BufferTooSmall`.
    pub(crate) fn check_ta_status(word: u32, required: usize) -> ModuleResult<()> {
        match TaStatus::from_repr(word) {
            Some(TaStatus::Ok) => Ok(()),
            Some(TaStatus::BufferTooSmall) => Err(Self::BufferTooSmall { required }),
            Some(status) => Err(Self::Ta(status)),
            None => Err(Self::UnknownTaStatus(word)),
        }
    }

    /// The trusted application status behind this error, if any.
    #[must_use]
    pub fn ta_status(&self) -> Option<TaStatus> {
        match self {
            Self::Ta(status) => Some(*status),
            Self::BufferTooSmall { .. } => Some(TaStatus::BufferTooSmall),
            Self::Context { source, .. } => source.ta_status(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_buffer_too_small(&self) -> bool {
        match self {
            Self::BufferTooSmall { .. }
            | Self::AttributeBufferTooSmall
            | Self::Transport(TransportError::ShortBuffer) => true,
            Self::Context { source, .. } => source.is_buffer_too_small(),
            _ => false,
        }
    }
}

impl From<TransportError> for CK_RV {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ShortBuffer => CKR_BUFFER_TOO_SMALL,
            TransportError::OutOfMemory => CKR_DEVICE_MEMORY,
            TransportError::BadParameters => CKR_ARGUMENTS_BAD,
            TransportError::Generic
            | TransportError::AccessDenied
            | TransportError::Cancel
            | TransportError::BadFormat
            | TransportError::BadState
            | TransportError::ItemNotFound
            | TransportError::NotImplemented
            | TransportError::NotSupported
            | TransportError::Busy
            | TransportError::Communication
            | TransportError::Security
            | TransportError::TargetDead
            | TransportError::Other(_) => CKR_DEVICE_ERROR,
        }
    }
}

impl From<ModuleError> for CK_RV {
    fn from(e: ModuleError) -> Self {
        match e {
            ModuleError::Context { source, .. } => (*source).into(),
            ModuleError::BadArguments(_) => CKR_ARGUMENTS_BAD,
            ModuleError::CryptokiAlreadyInitialized => CKR_CRYPTOKI_ALREADY_INITIALIZED,
            ModuleError::CryptokiNotInitialized => CKR_CRYPTOKI_NOT_INITIALIZED,
            ModuleError::FunctionFailed(_) => CKR_FUNCTION_FAILED,
            ModuleError::FunctionNotSupported => CKR_FUNCTION_NOT_SUPPORTED,
            ModuleError::HostMemory(_) => CKR_HOST_MEMORY,
            ModuleError::MechanismInvalid(_) => CKR_MECHANISM_INVALID,
            ModuleError::MechanismParamInvalid(_) => CKR_MECHANISM_PARAM_INVALID,
            ModuleError::SessionParallelNotSupported => CKR_SESSION_PARALLEL_NOT_SUPPORTED,
            ModuleError::BufferTooSmall { .. } | ModuleError::AttributeBufferTooSmall => {
                CKR_BUFFER_TOO_SMALL
            }
            ModuleError::Ta(status) => status.into(),
            ModuleError::DeviceError(_) => CKR_DEVICE_ERROR,
            ModuleError::Transport(e) => e.into(),

            ModuleError::Default(_)
            | ModuleError::UnknownTaStatus(_)
            | ModuleError::TryFromInt(_)
            | ModuleError::TryFromSlice(_) => CKR_GENERAL_ERROR,
        }
    }
}

/// Return early with an error if a condition is not satisfied.
///
/// This macro is equivalent to `if !$cond { return Err(From::from($err)); }`.
#[macro_export]
macro_rules! ckteec_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::ckteec_error!($msg));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::core::result::Result::Err($crate::ckteec_error!($fmt, $($arg)*));
        }
    };
}

/// Construct a default error from a string.
#[macro_export]
macro_rules! ckteec_error {
    ($msg:literal) => {
        $crate::ModuleError::Default(::core::format_args!($msg).to_string())
    };
    ($err:expr $(,)?) => ({
        $crate::ModuleError::Default($err.to_string())
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::ModuleError::Default(::core::format_args!($fmt, $($arg)*).to_string())
    };
}

/// Return early with an error.
#[macro_export]
macro_rules! ckteec_bail {
    ($msg:literal) => {
        return ::core::result::Result::Err($crate::ckteec_error!($msg))
    };
    ($err:expr $(,)?) => {
        return ::core::result::Result::Err($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        return ::core::result::Result::Err($crate::ckteec_error!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use cosmian_pkcs11_sys::{CKR_OPERATION_ACTIVE, CKR_PIN_INCORRECT};

    use super::*;

    #[test]
    fn status_words_translate() {
        ModuleError::check_ta_status(0, 0).unwrap();
        assert!(matches!(
            ModuleError::check_ta_status(4, 16),
            Err(ModuleError::BufferTooSmall { required: 16 })
        ));
        assert!(matches!(
            ModuleError::check_ta_status(0x1a, 0),
            Err(ModuleError::Ta(TaStatus::OperationActive))
        ));
        assert!(matches!(
            ModuleError::check_ta_status(0x06, 0),
            Err(ModuleError::UnknownTaStatus(0x06))
        ));
    }

    #[test]
    fn every_error_has_a_return_value() {
        let errors = vec![
            (ModuleError::Default("x".to_owned()), CKR_GENERAL_ERROR),
            (
                ModuleError::Context {
                    context: "ctx".to_owned(),
                    source: Box::new(ModuleError::Ta(TaStatus::PinIncorrect)),
                },
                CKR_PIN_INCORRECT,
            ),
            (ModuleError::BadArguments("x".to_owned()), CKR_ARGUMENTS_BAD),
            (
                ModuleError::CryptokiAlreadyInitialized,
                CKR_CRYPTOKI_ALREADY_INITIALIZED,
            ),
            (
                ModuleError::CryptokiNotInitialized,
                CKR_CRYPTOKI_NOT_INITIALIZED,
            ),
            (
                ModuleError::FunctionFailed("x".to_owned()),
                CKR_FUNCTION_FAILED,
            ),
            (ModuleError::FunctionNotSupported, CKR_FUNCTION_NOT_SUPPORTED),
            (ModuleError::HostMemory(12), CKR_HOST_MEMORY),
            (ModuleError::MechanismInvalid(0x99), CKR_MECHANISM_INVALID),
            (
                ModuleError::MechanismParamInvalid("x".to_owned()),
                CKR_MECHANISM_PARAM_INVALID,
            ),
            (
                ModuleError::SessionParallelNotSupported,
                CKR_SESSION_PARALLEL_NOT_SUPPORTED,
            ),
            (
                ModuleError::BufferTooSmall { required: 3 },
                CKR_BUFFER_TOO_SMALL,
            ),
            (ModuleError::AttributeBufferTooSmall, CKR_BUFFER_TOO_SMALL),
            (
                ModuleError::Ta(TaStatus::OperationActive),
                CKR_OPERATION_ACTIVE,
            ),
            (ModuleError::UnknownTaStatus(0x4242), CKR_GENERAL_ERROR),
            (ModuleError::DeviceError("x".to_owned()), CKR_DEVICE_ERROR),
            (
                ModuleError::Transport(TransportError::ShortBuffer),
                CKR_BUFFER_TOO_SMALL,
            ),
            (
                ModuleError::Transport(TransportError::OutOfMemory),
                CKR_DEVICE_MEMORY,
            ),
            (
                ModuleError::Transport(TransportError::BadParameters),
                CKR_ARGUMENTS_BAD,
            ),
            (
                ModuleError::Transport(TransportError::TargetDead),
                CKR_DEVICE_ERROR,
            ),
        ];
        for (error, expected) in errors {
            // exhaustive on purpose: a new variant must be added to this table
            match &error {
                ModuleError::Default(_)
                | ModuleError::Context { .. }
                | ModuleError::BadArguments(_)
                | ModuleError::CryptokiAlreadyInitialized
                | ModuleError::CryptokiNotInitialized
                | ModuleError::FunctionFailed(_)
                | ModuleError::FunctionNotSupported
                | ModuleError::HostMemory(_)
                | ModuleError::MechanismInvalid(_)
                | ModuleError::MechanismParamInvalid(_)
                | ModuleError::SessionParallelNotSupported
                | ModuleError::BufferTooSmall { .. }
                | ModuleError::AttributeBufferTooSmall
                | ModuleError::Ta(_)
                | ModuleError::UnknownTaStatus(_)
                | ModuleError::DeviceError(_)
                | ModuleError::Transport(_)
                | ModuleError::TryFromInt(_)
                | ModuleError::TryFromSlice(_) => {}
            }
            assert_eq!(CK_RV::from(error), expected);
        }
    }

    #[test]
    fn buffer_too_small_is_detected_through_context() {
        let error = ModuleError::Context {
            context: "encrypt update".to_owned(),
            source: Box::new(ModuleError::BufferTooSmall { required: 16 }),
        };
        assert!(error.is_buffer_too_small());
        assert_eq!(error.ta_status(), Some(TaStatus::BufferTooSmall));
    }
}
