use std::borrow::Cow;

use strum::{Display, FromRepr};
use tracing::trace;
use zeroize::Zeroizing;

use crate::{
    ModuleError, ModuleResult,
    core::{
        mechanism::MechanismType,
        serializer::{Deserializer, Serializer, wire_len},
    },
};

/// Length of an attribute whose value is unavailable: sensitive, unknown to
/// the object or not yet fetched. Distinct from a genuine empty value.
pub const UNAVAILABLE_INFORMATION: u32 = u32::MAX;

/// `{id, size}`
const ATTRIBUTE_HEAD_SIZE: u32 = 8;

/// Attribute identifiers of the TA ABI.
#[derive(Debug, Display, FromRepr, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u32)]
pub enum AttributeType {
    Token = 0x00,
    Private = 0x01,
    Trusted = 0x02,
    Sensitive = 0x03,
    Encrypt = 0x04,
    Decrypt = 0x05,
    Wrap = 0x06,
    Unwrap = 0x07,
    Sign = 0x08,
    SignRecover = 0x09,
    Verify = 0x0a,
    VerifyRecover = 0x0b,
    Derive = 0x0c,
    Extractable = 0x0d,
    Local = 0x0e,
    NeverExtractable = 0x0f,
    AlwaysSensitive = 0x10,
    Modifiable = 0x11,
    Copyable = 0x12,
    Destroyable = 0x13,
    AlwaysAuthenticate = 0x14,
    WrapWithTrusted = 0x15,
    Label = 0x40,
    Value = 0x41,
    ValueLen = 0x42,
    WrapTemplate = 0x43,
    UnwrapTemplate = 0x44,
    DeriveTemplate = 0x45,
    StartDate = 0x46,
    EndDate = 0x47,
    ObjectId = 0x48,
    Application = 0x49,
    MechanismType = 0x4a,
    Id = 0x4b,
    AllowedMechanisms = 0x4c,
    Class = 0x4d,
    KeyType = 0x4e,
    EcPoint = 0x4f,
    EcParams = 0x50,
    Modulus = 0x51,
    ModulusBits = 0x52,
    PublicExponent = 0x53,
    PrivateExponent = 0x54,
    Prime1 = 0x55,
    Prime2 = 0x56,
    Exponent1 = 0x57,
    Exponent2 = 0x58,
    Coefficient = 0x59,
    Subject = 0x5a,
    PublicKeyInfo = 0x5b,
    EcPointX = 0x8880_0001,
    EcPointY = 0x8880_0002,
}

impl AttributeType {
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Display, FromRepr, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u32)]
pub enum ObjectClass {
    SecretKey = 0x000,
    PublicKey = 0x001,
    PrivateKey = 0x002,
    OtpKey = 0x003,
    Certificate = 0x004,
    Data = 0x005,
    DomainParameters = 0x006,
    HwFeature = 0x007,
    Mechanism = 0x008,
}

#[derive(Debug, Display, FromRepr, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u32)]
pub enum KeyType {
    Aes = 0x000,
    GenericSecret = 0x001,
    Md5Hmac = 0x002,
    Sha1Hmac = 0x003,
    Sha224Hmac = 0x004,
    Sha256Hmac = 0x005,
    Sha384Hmac = 0x006,
    Sha512Hmac = 0x007,
    Ec = 0x008,
    Rsa = 0x009,
    Dsa = 0x00a,
    Dh = 0x00b,
}

/// One entry of an attribute template: a type, an optional value buffer and
/// a length.
///
/// For templates sent to the token, `len` is the number of meaningful bytes of
/// `value`. For templates filled by the token, `value` is the caller buffer
/// (its length is the capacity) and `len` receives the actual length, the
/// required length when the buffer is too small, or
/// [`UNAVAILABLE_INFORMATION`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attribute_type: AttributeType,
    pub value: Option<Zeroizing<Vec<u8>>>,
    pub len: u32,
}

impl Attribute {
    pub fn new(attribute_type: AttributeType, value: impl Into<Vec<u8>>) -> Self {
        let value = value.into();
        let len = u32::try_from(value.len()).unwrap_or(UNAVAILABLE_INFORMATION);
        Self {
            attribute_type,
            value: Some(Zeroizing::new(value)),
            len,
        }
    }

    /// Boolean attributes are a single byte on the wire.
    #[must_use]
    pub fn from_bool(attribute_type: AttributeType, value: bool) -> Self {
        Self::new(attribute_type, vec![u8::from(value)])
    }

    #[must_use]
    pub fn from_u32(attribute_type: AttributeType, value: u32) -> Self {
        Self::new(attribute_type, value.to_ne_bytes())
    }

    #[must_use]
    pub fn class(class: ObjectClass) -> Self {
        Self::from_u32(AttributeType::Class, class as u32)
    }

    #[must_use]
    pub fn key_type(key_type: KeyType) -> Self {
        Self::from_u32(AttributeType::KeyType, key_type as u32)
    }

    /// An entry to be filled by the token, backed by a buffer of `capacity` bytes.
    #[must_use]
    pub fn with_capacity(attribute_type: AttributeType, capacity: usize) -> Self {
        let mut attribute = Self::new(attribute_type, vec![0_u8; capacity]);
        attribute.len = u32::try_from(capacity).unwrap_or(UNAVAILABLE_INFORMATION);
        attribute
    }

    /// An entry without buffer: only the length of the value is queried.
    #[must_use]
    pub const fn query(attribute_type: AttributeType) -> Self {
        Self {
            attribute_type,
            value: None,
            len: 0,
        }
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.len != UNAVAILABLE_INFORMATION
    }

    /// The meaningful bytes of the value, if the buffer holds them.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        let value = self.value.as_ref()?;
        let len = usize::try_from(self.len).ok()?;
        if !self.is_available() || len > value.len() {
            return None;
        }
        Some(&value[..len])
    }

    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        self.value()
            .and_then(|value| <[u8; 4]>::try_from(value).ok())
            .map(u32::from_ne_bytes)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.value() {
            Some([byte]) => Some(*byte != 0),
            _ => None,
        }
    }

    /// Bytes sent on the wire for this entry when the template carries values.
    fn wire_value(&self) -> ModuleResult<&[u8]> {
        if self.len == 0 {
            return Ok(&[]);
        }
        let Some(value) = self.value.as_ref() else {
            return Err(ModuleError::BadArguments(format!(
                "attribute {} claims {} bytes without a value",
                self.attribute_type, self.len
            )));
        };
        let len = usize::try_from(self.len)?;
        if !self.is_available() || len > value.len() {
            return Err(ModuleError::BadArguments(format!(
                "attribute {} claims {} bytes but holds {}",
                self.attribute_type,
                self.len,
                value.len()
            )));
        }
        Ok(&value[..len])
    }
}

/// Outcome of filling a template from a frame returned by the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateStatus {
    /// Every entry was either filled, sized or marked unavailable.
    Complete,
    /// At least one entry buffer was too small; its `len` holds the required size.
    Short,
}

#[derive(Clone, Copy)]
enum TemplateContent {
    /// Entries carry their value.
    Values,
    /// Entries carry zeroed room matching the caller buffer capacity.
    Capacities,
}

fn serialize_entries(
    serializer: &mut Serializer,
    attributes: &[Attribute],
    content: TemplateContent,
) -> ModuleResult<()> {
    let mut entries: Vec<(u32, Cow<'_, [u8]>)> = Vec::with_capacity(attributes.len());
    let mut attrs_size: u32 = 0;
    for attribute in attributes {
        let bytes = match content {
            TemplateContent::Values => Cow::Borrowed(attribute.wire_value()?),
            TemplateContent::Capacities => Cow::Owned(vec![
                0_u8;
                attribute.value.as_ref().map_or(0, |value| value.len())
            ]),
        };
        let size = wire_len(bytes.len(), "attribute")?;
        attrs_size = attrs_size
            .checked_add(ATTRIBUTE_HEAD_SIZE)
            .and_then(|total| total.checked_add(size))
            .ok_or_else(|| {
                ModuleError::BadArguments("attribute template size overflows 32 bits".to_owned())
            })?;
        entries.push((attribute.attribute_type.id(), bytes));
    }
    serializer
        .add_u32(attrs_size)
        .add_u32(wire_len(attributes.len(), "attribute template")?);
    for (id, bytes) in entries {
        serializer
            .add_u32(id)
            .add_sized_bytes(&bytes, "attribute")?;
    }
    Ok(())
}

/// Append the frame of a template whose entries carry their values.
pub(crate) fn serialize_template(
    serializer: &mut Serializer,
    attributes: &[Attribute],
) -> ModuleResult<()> {
    serialize_entries(serializer, attributes, TemplateContent::Values)
}

/// Append the frame of a template to be filled by the token.
///
/// Entries without a buffer are sent with a zero size, which the token
/// answers with the value length.
pub(crate) fn serialize_request_template(
    serializer: &mut Serializer,
    attributes: &[Attribute],
) -> ModuleResult<()> {
    serialize_entries(serializer, attributes, TemplateContent::Capacities)
}

/// Encode a template into a `{attrs_size, attrs_count}` headed frame.
pub fn encode_template(attributes: &[Attribute]) -> ModuleResult<Zeroizing<Vec<u8>>> {
    let mut serializer = Serializer::new();
    serialize_template(&mut serializer, attributes)?;
    Ok(serializer.finish())
}

/// Walk a frame and return its `(id, value)` entries in order.
///
/// A `None` value stands for an entry sent with the unavailable sentinel.
fn parse_frame(frame: &[u8]) -> ModuleResult<Vec<(u32, Option<&[u8]>)>> {
    let mut head = Deserializer::new(frame);
    let attrs_size = head.take_u32()?;
    let attrs_count = head.take_u32()?;
    if u64::from(attrs_count) * u64::from(ATTRIBUTE_HEAD_SIZE) > u64::from(attrs_size) {
        return Err(ModuleError::DeviceError(format!(
            "{attrs_count} attributes cannot fit in {attrs_size} bytes"
        )));
    }
    let mut body = Deserializer::new(head.take_bytes(usize::try_from(attrs_size)?)?);
    let mut entries = Vec::with_capacity(usize::try_from(attrs_count)?);
    for _ in 0..attrs_count {
        let id = body.take_u32()?;
        let size = body.take_u32()?;
        if size == UNAVAILABLE_INFORMATION {
            entries.push((id, None));
        } else {
            entries.push((id, Some(body.take_bytes(usize::try_from(size)?)?)));
        }
    }
    if body.remaining() != 0 {
        return Err(ModuleError::DeviceError(format!(
            "{} trailing bytes in attribute frame",
            body.remaining()
        )));
    }
    Ok(entries)
}

/// Fill the caller template from a frame returned by the token.
///
/// Each requested entry is searched by type in the frame. Processing never
/// stops on a short entry so that every correctly sized entry is filled.
pub fn decode_template(
    frame: &[u8],
    template: &mut [Attribute],
) -> ModuleResult<TemplateStatus> {
    let entries = parse_frame(frame)?;
    let mut status = TemplateStatus::Complete;
    for attribute in template.iter_mut() {
        let found = entries
            .iter()
            .find(|(id, _)| *id == attribute.attribute_type.id())
            .map(|(_, value)| *value);
        match found {
            None | Some(None) => {
                trace!("attribute {} is unavailable", attribute.attribute_type);
                attribute.len = UNAVAILABLE_INFORMATION;
            }
            Some(Some(value)) => {
                let len = wire_len(value.len(), "attribute")?;
                match attribute.value.as_mut() {
                    None => attribute.len = len,
                    Some(buffer) if buffer.len() >= value.len() => {
                        buffer[..value.len()].copy_from_slice(value);
                        attribute.len = len;
                    }
                    Some(buffer) => {
                        trace!(
                            "attribute {} needs {} bytes, {} provided",
                            attribute.attribute_type,
                            value.len(),
                            buffer.len()
                        );
                        attribute.len = len;
                        status = TemplateStatus::Short;
                    }
                }
            }
        }
    }
    Ok(status)
}

/// Complete a key pair template with the key type implied by the mechanism
/// when the caller did not provide one.
#[must_use]
pub fn guess_key_type(
    mechanism_type: MechanismType,
    template: &[Attribute],
) -> Cow<'_, [Attribute]> {
    if template
        .iter()
        .any(|attribute| attribute.attribute_type == AttributeType::KeyType)
    {
        return Cow::Borrowed(template);
    }
    let key_type = match mechanism_type {
        MechanismType::EcKeyPairGen => KeyType::Ec,
        MechanismType::RsaPkcsKeyPairGen => KeyType::Rsa,
        _ => return Cow::Borrowed(template),
    };
    let mut completed = template.to_vec();
    completed.push(Attribute::key_type(key_type));
    Cow::Owned(completed)
}
