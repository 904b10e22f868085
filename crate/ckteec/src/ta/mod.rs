//! Identifiers of the PKCS#11 trusted application ABI.

pub use commands::TaCommand;
pub use status::TaStatus;
use uuid::Uuid;

mod commands;
mod status;

/// UUID of the PKCS#11 trusted application
pub const PKCS11_TA_UUID: Uuid = Uuid::from_fields(
    0xfd02_c9da,
    0x306c,
    0x48c7,
    &[0xa4, 0x9c, 0xbb, 0xd8, 0x27, 0xae, 0x86, 0xee],
);

/// Version of the TA ABI this library speaks
pub const TA_VERSION_MAJOR: u8 = 0;
pub const TA_VERSION_MINOR: u8 = 1;
pub const TA_VERSION_PATCH: u8 = 0;

/// Length of the status word found at the head of an output control buffer
pub(crate) const STATUS_WORD_SIZE: usize = 4;
