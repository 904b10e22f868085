//! PKCS#11 Cryptoki client library backed by a trusted application.
//!
//! The library holds no key material and performs no cryptography: every
//! operation of a [`Context`] is serialized into the ABI of the PKCS#11
//! trusted application and invoked through a [`Transport`].

pub use config::{ContextConfig, TeeLoginMethod};
pub use context::Context;
pub use self::core::{
    attribute::{
        Attribute, AttributeType, KeyType, ObjectClass, TemplateStatus, UNAVAILABLE_INFORMATION,
        decode_template, encode_template, guess_key_type,
    },
    info::{
        LibraryInfo, MechanismFlags, MechanismInfo, SessionFlags, SessionInfo, SessionState,
        SlotFlags, SlotInfo, TaVersion, TokenFlags, TokenInfo, UserType, Version,
    },
    mechanism::{
        AesCbcEncryptDataParams, AesCcmParams, AesCtrParams, AesGcmParams, Ecdh1DeriveParams,
        EcdhAesKeyWrapParams, KeyDerivationFunction, MaskGenerationFunction, Mechanism,
        MechanismParams, MechanismType, RsaAesKeyWrapParams, RsaOaepParams, RsaPssParams,
    },
};
pub use error::{ModuleError, ModuleResult, ModuleResultHelper};
pub use logging::{ENV_LOG_FILTER, initialize_logging, library_filter};
pub use ta::{PKCS11_TA_UUID, TaCommand, TaStatus};
pub use transport::{
    MemRef, MemRefData, Operation, Parameter, ShmDirection, ShmHandle, Transport, TransportError,
    TransportResult,
};

pub mod config;
mod context;
pub mod core;
mod error;
mod invoke;
mod logging;
mod processing;
mod shm;
pub mod ta;
mod token;
pub mod transport;

#[cfg(test)]
mod tests;

pub type SlotId = u32;
pub type SessionHandle = u32;
pub type ObjectHandle = u32;
