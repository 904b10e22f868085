use strum::{Display, FromRepr};

/// Commands understood by the PKCS#11 trusted application.
///
/// The numeric values are part of the TA ABI.
#[derive(Debug, Display, FromRepr, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u32)]
pub enum TaCommand {
    Ping = 0,
    SlotList = 1,
    SlotInfo = 2,
    TokenInfo = 3,
    MechanismIds = 4,
    MechanismInfo = 5,
    InitToken = 6,
    InitPin = 7,
    SetPin = 8,
    Login = 9,
    Logout = 10,
    OpenRoSession = 11,
    OpenRwSession = 12,
    CloseSession = 13,
    SessionInfo = 14,
    CloseAllSessions = 15,
    GetSessionState = 16,
    SetSessionState = 17,
    ImportObject = 18,
    CopyObject = 19,
    DestroyObject = 20,
    FindObjectsInit = 21,
    FindObjects = 22,
    FindObjectsFinal = 23,
    GetObjectSize = 24,
    GetAttributeValue = 25,
    SetAttributeValue = 26,
    GenerateKey = 27,
    EncryptInit = 28,
    DecryptInit = 29,
    EncryptUpdate = 30,
    DecryptUpdate = 31,
    EncryptFinal = 32,
    DecryptFinal = 33,
    EncryptOneshot = 34,
    DecryptOneshot = 35,
    SignInit = 36,
    VerifyInit = 37,
    SignUpdate = 38,
    VerifyUpdate = 39,
    SignFinal = 40,
    VerifyFinal = 41,
    SignOneshot = 42,
    VerifyOneshot = 43,
    DeriveKey = 44,
    GenerateKeyPair = 45,
}

impl TaCommand {
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// The control buffer of these commands holds a PIN and must not be logged.
    #[must_use]
    pub const fn carries_pin(self) -> bool {
        matches!(
            self,
            Self::InitToken | Self::InitPin | Self::SetPin | Self::Login
        )
    }
}
