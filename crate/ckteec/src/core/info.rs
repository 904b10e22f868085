use std::{
    fmt,
    fmt::{Display, Formatter},
};

use strum::{Display as StrumDisplay, FromRepr};

use crate::{ModuleError, ModuleResult, core::serializer::Deserializer};

pub const SLOT_DESCRIPTION_SIZE: usize = 64;
pub const MANUFACTURER_ID_SIZE: usize = 32;
pub const TOKEN_LABEL_SIZE: usize = 32;
pub const TOKEN_MODEL_SIZE: usize = 16;
pub const TOKEN_SERIAL_NUMBER_SIZE: usize = 16;
pub const UTC_TIME_SIZE: usize = 16;
pub const LIBRARY_DESCRIPTION_SIZE: usize = 32;

pub const SLOT_INFO_SIZE: usize = SLOT_DESCRIPTION_SIZE + MANUFACTURER_ID_SIZE + 4 + 2 + 2;
pub const TOKEN_INFO_SIZE: usize = TOKEN_LABEL_SIZE
    + MANUFACTURER_ID_SIZE
    + TOKEN_MODEL_SIZE
    + TOKEN_SERIAL_NUMBER_SIZE
    + 11 * 4
    + 2
    + 2
    + UTC_TIME_SIZE;
pub const SESSION_INFO_SIZE: usize = 4 * 4;
pub const MECHANISM_INFO_SIZE: usize = 3 * 4;
pub const TA_VERSION_SIZE: usize = 3 * 4;

/// Cryptoki revision implemented by the library.
pub const CRYPTOKI_VERSION: Version = Version { major: 2, minor: 40 };
const LIBRARY_MANUFACTURER: &str = "Cosmian";
const LIBRARY_DESCRIPTION: &str = "TEE PKCS#11 Cryptoki library";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    fn from_wire(bytes: [u8; 2]) -> Self {
        Self {
            major: bytes[0],
            minor: bytes[1],
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Text of a blank padded fixed size field.
fn padded_str(field: &[u8]) -> String {
    String::from_utf8_lossy(field)
        .trim_end_matches([' ', '\0'])
        .to_owned()
}

/// Blank pad `value` into a fixed size field.
pub(crate) fn pad_field<const N: usize>(value: &str) -> ModuleResult<[u8; N]> {
    let bytes = value.as_bytes();
    if bytes.len() > N {
        return Err(ModuleError::BadArguments(format!(
            "{value:?} does not fit in {N} bytes"
        )));
    }
    let mut field = [b' '; N];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

fn check_record_size(record: &str, data: &[u8], expected: usize) -> ModuleResult<()> {
    if data.len() != expected {
        return Err(ModuleError::DeviceError(format!(
            "{record} record is {} bytes, expected {expected}",
            data.len()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SlotFlags(u32);

bitflags::bitflags! {
    impl SlotFlags: u32 {
        const TokenPresent = 1 << 0;
        const RemovableDevice = 1 << 1;
        const HwSlot = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct TokenFlags(u32);

bitflags::bitflags! {
    impl TokenFlags: u32 {
        const Rng = 1 << 0;
        const WriteProtected = 1 << 1;
        const LoginRequired = 1 << 2;
        const UserPinInitialized = 1 << 3;
        const RestoreKeyNotNeeded = 1 << 4;
        const ClockOnToken = 1 << 5;
        const ProtectedAuthenticationPath = 1 << 6;
        const DualCryptoOperations = 1 << 7;
        const TokenInitialized = 1 << 8;
        const UserPinCountLow = 1 << 9;
        const UserPinFinalTry = 1 << 10;
        const UserPinLocked = 1 << 11;
        const UserPinToBeChanged = 1 << 12;
        const SoPinCountLow = 1 << 13;
        const SoPinFinalTry = 1 << 14;
        const SoPinLocked = 1 << 15;
        const SoPinToBeChanged = 1 << 16;
        const ErrorState = 1 << 17;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct MechanismFlags(u32);

bitflags::bitflags! {
    impl MechanismFlags: u32 {
        const Hw = 1 << 0;
        const Encrypt = 1 << 8;
        const Decrypt = 1 << 9;
        const Digest = 1 << 10;
        const Sign = 1 << 11;
        const SignRecover = 1 << 12;
        const Verify = 1 << 13;
        const VerifyRecover = 1 << 14;
        const Generate = 1 << 15;
        const GenerateKeyPair = 1 << 16;
        const Wrap = 1 << 17;
        const Unwrap = 1 << 18;
        const Derive = 1 << 19;
        const EcFp = 1 << 20;
        const EcF2m = 1 << 21;
        const EcEcParameters = 1 << 22;
        const EcNamedCurve = 1 << 23;
        const EcUncompress = 1 << 24;
        const EcCompress = 1 << 25;
    }
}

/// Session flags as passed to `open_session` and reported in [`SessionInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SessionFlags(u32);

bitflags::bitflags! {
    impl SessionFlags: u32 {
        const RwSession = 1 << 1;
        const SerialSession = 1 << 2;
    }
}

#[derive(Debug, StrumDisplay, FromRepr, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u32)]
pub enum SessionState {
    RoPublicSession = 0,
    RoUserFunctions = 1,
    RwPublicSession = 2,
    RwUserFunctions = 3,
    RwSoFunctions = 4,
}

#[derive(Debug, StrumDisplay, FromRepr, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u32)]
pub enum UserType {
    So = 0x000,
    User = 0x001,
    ContextSpecific = 0x002,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot_description: [u8; SLOT_DESCRIPTION_SIZE],
    pub manufacturer_id: [u8; MANUFACTURER_ID_SIZE],
    pub flags: SlotFlags,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

impl SlotInfo {
    pub(crate) fn from_wire(data: &[u8]) -> ModuleResult<Self> {
        check_record_size("slot info", data, SLOT_INFO_SIZE)?;
        let mut de = Deserializer::new(data);
        Ok(Self {
            slot_description: de.take_array()?,
            manufacturer_id: de.take_array()?,
            flags: SlotFlags::from_bits_retain(de.take_u32()?),
            hardware_version: Version::from_wire(de.take_array()?),
            firmware_version: Version::from_wire(de.take_array()?),
        })
    }

    #[must_use]
    pub fn description(&self) -> String {
        padded_str(&self.slot_description)
    }

    #[must_use]
    pub fn manufacturer(&self) -> String {
        padded_str(&self.manufacturer_id)
    }
}

impl Display for SlotInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Slot Description: {}\nManufacturer ID: {}\nFlags: {:#x}\nHardware Version: \
             {}\nFirmware Version: {}",
            self.description(),
            self.manufacturer(),
            self.flags.bits(),
            self.hardware_version,
            self.firmware_version
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub label: [u8; TOKEN_LABEL_SIZE],
    pub manufacturer_id: [u8; MANUFACTURER_ID_SIZE],
    pub model: [u8; TOKEN_MODEL_SIZE],
    pub serial_number: [u8; TOKEN_SERIAL_NUMBER_SIZE],
    pub flags: TokenFlags,
    pub max_session_count: u32,
    pub session_count: u32,
    pub max_rw_session_count: u32,
    pub rw_session_count: u32,
    pub max_pin_len: u32,
    pub min_pin_len: u32,
    pub total_public_memory: u32,
    pub free_public_memory: u32,
    pub total_private_memory: u32,
    pub free_private_memory: u32,
    pub hardware_version: Version,
    pub firmware_version: Version,
    pub utc_time: [u8; UTC_TIME_SIZE],
}

impl TokenInfo {
    pub(crate) fn from_wire(data: &[u8]) -> ModuleResult<Self> {
        check_record_size("token info", data, TOKEN_INFO_SIZE)?;
        let mut de = Deserializer::new(data);
        Ok(Self {
            label: de.take_array()?,
            manufacturer_id: de.take_array()?,
            model: de.take_array()?,
            serial_number: de.take_array()?,
            flags: TokenFlags::from_bits_retain(de.take_u32()?),
            max_session_count: de.take_u32()?,
            session_count: de.take_u32()?,
            max_rw_session_count: de.take_u32()?,
            rw_session_count: de.take_u32()?,
            max_pin_len: de.take_u32()?,
            min_pin_len: de.take_u32()?,
            total_public_memory: de.take_u32()?,
            free_public_memory: de.take_u32()?,
            total_private_memory: de.take_u32()?,
            free_private_memory: de.take_u32()?,
            hardware_version: Version::from_wire(de.take_array()?),
            firmware_version: Version::from_wire(de.take_array()?),
            utc_time: de.take_array()?,
        })
    }

    #[must_use]
    pub fn label(&self) -> String {
        padded_str(&self.label)
    }

    #[must_use]
    pub fn manufacturer(&self) -> String {
        padded_str(&self.manufacturer_id)
    }

    #[must_use]
    pub fn serial_number(&self) -> String {
        padded_str(&self.serial_number)
    }
}

impl Display for TokenInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Label: {}\nManufacturer ID: {}\nModel: {}\nSerial Number: {}\nFlags: {:#x}\nSessions: \
             {}/{}\nPIN length: {}..={}",
            self.label(),
            self.manufacturer(),
            padded_str(&self.model),
            self.serial_number(),
            self.flags.bits(),
            self.session_count,
            self.max_session_count,
            self.min_pin_len,
            self.max_pin_len
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub slot_id: u32,
    /// Raw state word, see [`SessionInfo::state`].
    pub state: u32,
    pub flags: SessionFlags,
    pub device_error: u32,
}

impl SessionInfo {
    pub(crate) fn from_wire(data: &[u8]) -> ModuleResult<Self> {
        check_record_size("session info", data, SESSION_INFO_SIZE)?;
        let mut de = Deserializer::new(data);
        Ok(Self {
            slot_id: de.take_u32()?,
            state: de.take_u32()?,
            flags: SessionFlags::from_bits_retain(de.take_u32()?),
            device_error: de.take_u32()?,
        })
    }

    #[must_use]
    pub fn state(&self) -> Option<SessionState> {
        SessionState::from_repr(self.state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MechanismInfo {
    pub min_key_size: u32,
    pub max_key_size: u32,
    pub flags: MechanismFlags,
}

impl MechanismInfo {
    pub(crate) fn from_wire(data: &[u8]) -> ModuleResult<Self> {
        check_record_size("mechanism info", data, MECHANISM_INFO_SIZE)?;
        let mut de = Deserializer::new(data);
        Ok(Self {
            min_key_size: de.take_u32()?,
            max_key_size: de.take_u32()?,
            flags: MechanismFlags::from_bits_retain(de.take_u32()?),
        })
    }
}

/// Version reported by the trusted application on ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl TaVersion {
    pub(crate) fn from_wire(data: &[u8]) -> ModuleResult<Self> {
        check_record_size("TA version", data, TA_VERSION_SIZE)?;
        let mut de = Deserializer::new(data);
        Ok(Self {
            major: de.take_u32()?,
            minor: de.take_u32()?,
            patch: de.take_u32()?,
        })
    }
}

impl Display for TaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Library information, produced locally without contacting the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryInfo {
    pub cryptoki_version: Version,
    pub manufacturer_id: [u8; MANUFACTURER_ID_SIZE],
    pub flags: u32,
    pub library_description: [u8; LIBRARY_DESCRIPTION_SIZE],
    pub library_version: Version,
}

impl LibraryInfo {
    pub(crate) fn local(library_version: Version) -> ModuleResult<Self> {
        Ok(Self {
            cryptoki_version: CRYPTOKI_VERSION,
            manufacturer_id: pad_field(LIBRARY_MANUFACTURER)?,
            // reserved, always zero
            flags: 0,
            library_description: pad_field(LIBRARY_DESCRIPTION)?,
            library_version,
        })
    }
}

impl Display for LibraryInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cryptoki Version: {}\nManufacturer ID: {}\nFlags: {}\nLibrary Description: \
             {}\nLibrary Version: {}",
            self.cryptoki_version,
            padded_str(&self.manufacturer_id),
            self.flags,
            padded_str(&self.library_description),
            self.library_version
        )
    }
}
