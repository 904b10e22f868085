use cosmian_pkcs11_sys::{
    CK_RV, CKR_ACTION_PROHIBITED, CKR_ARGUMENTS_BAD, CKR_ATTRIBUTE_READ_ONLY,
    CKR_ATTRIBUTE_SENSITIVE, CKR_ATTRIBUTE_TYPE_INVALID, CKR_ATTRIBUTE_VALUE_INVALID,
    CKR_BUFFER_TOO_SMALL, CKR_CURVE_NOT_SUPPORTED, CKR_DEVICE_MEMORY, CKR_DOMAIN_PARAMS_INVALID,
    CKR_FUNCTION_FAILED, CKR_FUNCTION_NOT_SUPPORTED, CKR_GENERAL_ERROR,
    CKR_KEY_FUNCTION_NOT_PERMITTED, CKR_KEY_HANDLE_INVALID, CKR_KEY_SIZE_RANGE,
    CKR_MECHANISM_INVALID, CKR_MECHANISM_PARAM_INVALID, CKR_OBJECT_HANDLE_INVALID, CKR_OK,
    CKR_OPERATION_ACTIVE, CKR_OPERATION_NOT_INITIALIZED, CKR_PIN_EXPIRED, CKR_PIN_INCORRECT,
    CKR_PIN_INVALID, CKR_PIN_LEN_RANGE, CKR_PIN_LOCKED, CKR_PIN_TOO_WEAK,
    CKR_SESSION_EXISTS, CKR_SESSION_HANDLE_INVALID, CKR_SESSION_READ_ONLY,
    CKR_SESSION_READ_ONLY_EXISTS, CKR_SESSION_READ_WRITE_SO_EXISTS, CKR_SIGNATURE_INVALID,
    CKR_SLOT_ID_INVALID, CKR_TEMPLATE_INCOMPLETE, CKR_TEMPLATE_INCONSISTENT,
    CKR_TOKEN_NOT_PRESENT, CKR_TOKEN_NOT_RECOGNIZED, CKR_TOKEN_WRITE_PROTECTED,
    CKR_USER_ALREADY_LOGGED_IN, CKR_USER_ANOTHER_ALREADY_LOGGED_IN, CKR_USER_NOT_LOGGED_IN,
    CKR_USER_PIN_NOT_INITIALIZED, CKR_USER_TOO_MANY_TYPES, CKR_USER_TYPE_INVALID,
};
use strum::{Display, FromRepr};

/// Fine grain status word returned by the trusted application in the first
/// 4 bytes of the control buffer.
#[derive(Debug, Display, FromRepr, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u32)]
pub enum TaStatus {
    Ok = 0x0000,
    GeneralError = 0x0001,
    DeviceMemory = 0x0002,
    ArgumentsBad = 0x0003,
    BufferTooSmall = 0x0004,
    FunctionFailed = 0x0005,
    SignatureInvalid = 0x0007,
    AttributeTypeInvalid = 0x0008,
    AttributeValueInvalid = 0x0009,
    ObjectHandleInvalid = 0x000a,
    KeyHandleInvalid = 0x000b,
    MechanismInvalid = 0x000c,
    SessionHandleInvalid = 0x000d,
    SlotIdInvalid = 0x000e,
    MechanismParamInvalid = 0x000f,
    TemplateInconsistent = 0x0010,
    TemplateIncomplete = 0x0011,
    PinIncorrect = 0x0012,
    PinLocked = 0x0013,
    PinExpired = 0x0014,
    PinInvalid = 0x0015,
    PinLenRange = 0x0016,
    SessionExists = 0x0017,
    SessionReadOnly = 0x0018,
    SessionReadWriteSoExists = 0x0019,
    OperationActive = 0x001a,
    KeyFunctionNotPermitted = 0x001b,
    OperationNotInitialized = 0x001c,
    TokenWriteProtected = 0x001d,
    TokenNotPresent = 0x001e,
    TokenNotRecognized = 0x001f,
    ActionProhibited = 0x0020,
    AttributeReadOnly = 0x0021,
    PinTooWeak = 0x0022,
    CurveNotSupported = 0x0023,
    DomainParamsInvalid = 0x0024,
    UserAlreadyLoggedIn = 0x0025,
    UserAnotherAlreadyLoggedIn = 0x0026,
    UserNotLoggedIn = 0x0027,
    UserPinNotInitialized = 0x0028,
    UserTooManyTypes = 0x0029,
    UserTypeInvalid = 0x002a,
    SessionReadOnlyExists = 0x002b,
    KeySizeRange = 0x002c,
    AttributeSensitive = 0x002d,
    /// Library local extension: the requested item does not exist.
    NotFound = 0x1000,
    /// Library local extension: the command is not implemented by the TA.
    NotImplemented = 0x1001,
    Undefined = 0xFFFF_FFFF,
}

impl TaStatus {
    /// Statuses for which an attribute frame returned by the TA is still
    /// meaningful and must be decoded.
    #[must_use]
    pub const fn carries_attributes(self) -> bool {
        matches!(
            self,
            Self::Ok
                | Self::BufferTooSmall
                | Self::AttributeTypeInvalid
                | Self::AttributeSensitive
                | Self::NotFound
        )
    }
}

impl From<TaStatus> for CK_RV {
    fn from(status: TaStatus) -> Self {
        match status {
            TaStatus::Ok => CKR_OK,
            TaStatus::GeneralError => CKR_GENERAL_ERROR,
            TaStatus::DeviceMemory => CKR_DEVICE_MEMORY,
            TaStatus::ArgumentsBad => CKR_ARGUMENTS_BAD,
            TaStatus::BufferTooSmall => CKR_BUFFER_TOO_SMALL,
            TaStatus::FunctionFailed => CKR_FUNCTION_FAILED,
            TaStatus::SignatureInvalid => CKR_SIGNATURE_INVALID,
            TaStatus::AttributeTypeInvalid => CKR_ATTRIBUTE_TYPE_INVALID,
            TaStatus::AttributeValueInvalid => CKR_ATTRIBUTE_VALUE_INVALID,
            TaStatus::ObjectHandleInvalid => CKR_OBJECT_HANDLE_INVALID,
            TaStatus::KeyHandleInvalid => CKR_KEY_HANDLE_INVALID,
            TaStatus::MechanismInvalid => CKR_MECHANISM_INVALID,
            TaStatus::SessionHandleInvalid => CKR_SESSION_HANDLE_INVALID,
            TaStatus::SlotIdInvalid => CKR_SLOT_ID_INVALID,
            TaStatus::MechanismParamInvalid => CKR_MECHANISM_PARAM_INVALID,
            TaStatus::TemplateInconsistent => CKR_TEMPLATE_INCONSISTENT,
            TaStatus::TemplateIncomplete => CKR_TEMPLATE_INCOMPLETE,
            TaStatus::PinIncorrect => CKR_PIN_INCORRECT,
            TaStatus::PinLocked => CKR_PIN_LOCKED,
            TaStatus::PinExpired => CKR_PIN_EXPIRED,
            TaStatus::PinInvalid => CKR_PIN_INVALID,
            TaStatus::PinLenRange => CKR_PIN_LEN_RANGE,
            TaStatus::SessionExists => CKR_SESSION_EXISTS,
            TaStatus::SessionReadOnly => CKR_SESSION_READ_ONLY,
            TaStatus::SessionReadWriteSoExists => CKR_SESSION_READ_WRITE_SO_EXISTS,
            TaStatus::OperationActive => CKR_OPERATION_ACTIVE,
            TaStatus::KeyFunctionNotPermitted => CKR_KEY_FUNCTION_NOT_PERMITTED,
            TaStatus::OperationNotInitialized => CKR_OPERATION_NOT_INITIALIZED,
            TaStatus::TokenWriteProtected => CKR_TOKEN_WRITE_PROTECTED,
            TaStatus::TokenNotPresent => CKR_TOKEN_NOT_PRESENT,
            TaStatus::TokenNotRecognized => CKR_TOKEN_NOT_RECOGNIZED,
            TaStatus::ActionProhibited => CKR_ACTION_PROHIBITED,
            TaStatus::AttributeReadOnly => CKR_ATTRIBUTE_READ_ONLY,
            TaStatus::PinTooWeak => CKR_PIN_TOO_WEAK,
            TaStatus::CurveNotSupported => CKR_CURVE_NOT_SUPPORTED,
            TaStatus::DomainParamsInvalid => CKR_DOMAIN_PARAMS_INVALID,
            TaStatus::UserAlreadyLoggedIn => CKR_USER_ALREADY_LOGGED_IN,
            TaStatus::UserAnotherAlreadyLoggedIn => CKR_USER_ANOTHER_ALREADY_LOGGED_IN,
            TaStatus::UserNotLoggedIn => CKR_USER_NOT_LOGGED_IN,
            TaStatus::UserPinNotInitialized => CKR_USER_PIN_NOT_INITIALIZED,
            TaStatus::UserTooManyTypes => CKR_USER_TOO_MANY_TYPES,
            TaStatus::UserTypeInvalid => CKR_USER_TYPE_INVALID,
            TaStatus::SessionReadOnlyExists => CKR_SESSION_READ_ONLY_EXISTS,
            TaStatus::KeySizeRange => CKR_KEY_SIZE_RANGE,
            TaStatus::AttributeSensitive => CKR_ATTRIBUTE_SENSITIVE,
            TaStatus::NotImplemented => CKR_FUNCTION_NOT_SUPPORTED,
            TaStatus::NotFound | TaStatus::Undefined => CKR_GENERAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_words_round_trip_through_repr() {
        for word in (0x00..=0x2d).chain([0x1000, 0x1001, 0xFFFF_FFFF]) {
            if word == 0x06 {
                // no status is assigned to that value
                assert!(TaStatus::from_repr(word).is_none());
                continue;
            }
            let status = TaStatus::from_repr(word).expect("known status word");
            assert_eq!(status as u32, word);
        }
        assert!(TaStatus::from_repr(0x2e).is_none());
        assert!(TaStatus::from_repr(0x1002).is_none());
    }

    #[test]
    fn status_words_map_to_same_named_return_values() {
        assert_eq!(CK_RV::from(TaStatus::Ok), CKR_OK);
        assert_eq!(CK_RV::from(TaStatus::PinLocked), CKR_PIN_LOCKED);
        assert_eq!(
            CK_RV::from(TaStatus::OperationNotInitialized),
            CKR_OPERATION_NOT_INITIALIZED
        );
        assert_eq!(
            CK_RV::from(TaStatus::AttributeSensitive),
            CKR_ATTRIBUTE_SENSITIVE
        );
        assert_eq!(
            CK_RV::from(TaStatus::NotImplemented),
            CKR_FUNCTION_NOT_SUPPORTED
        );
        assert_eq!(CK_RV::from(TaStatus::NotFound), CKR_GENERAL_ERROR);
        assert_eq!(CK_RV::from(TaStatus::Undefined), CKR_GENERAL_ERROR);
    }
}
