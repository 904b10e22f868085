//! Mechanism identifiers and their parameter blobs.
//!
//! A mechanism travels as `{id, params_size, params}`. The layout of `params`
//! is fixed per mechanism id and is selected through
//! [`MechanismType::params_layout`]; adding a mechanism means adding a
//! variant here and a layout arm, nothing else.

use strum::{Display, FromRepr};
use zeroize::Zeroizing;

use crate::{
    ModuleError, ModuleResult,
    core::serializer::{Deserializer, Serializer},
};

pub const AES_BLOCK_SIZE: usize = 16;
pub const GMAC_IV_SIZE: usize = 12;

#[derive(Debug, Display, FromRepr, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u32)]
pub enum MechanismType {
    AesEcb = 0x000,
    AesCbc = 0x001,
    AesCbcPad = 0x002,
    AesCts = 0x003,
    AesCtr = 0x004,
    AesGcm = 0x005,
    AesCcm = 0x006,
    AesGmac = 0x007,
    AesCmac = 0x008,
    AesCmacGeneral = 0x009,
    AesEcbEncryptData = 0x00a,
    AesCbcEncryptData = 0x00b,
    AesKeyGen = 0x00c,
    GenericSecretKeyGen = 0x00d,
    Md5Hmac = 0x00e,
    Sha1Hmac = 0x00f,
    Sha224Hmac = 0x010,
    Sha256Hmac = 0x011,
    Sha384Hmac = 0x012,
    Sha512Hmac = 0x013,
    AesXcbcMac = 0x014,
    EcKeyPairGen = 0x015,
    Ecdsa = 0x016,
    EcdsaSha1 = 0x017,
    EcdsaSha224 = 0x018,
    EcdsaSha256 = 0x019,
    EcdsaSha384 = 0x01a,
    EcdsaSha512 = 0x01b,
    Ecdh1Derive = 0x01c,
    Ecdh1CofactorDerive = 0x01d,
    EcmqvDerive = 0x01e,
    EcdhAesKeyWrap = 0x01f,
    RsaPkcsKeyPairGen = 0x020,
    RsaPkcs = 0x021,
    Rsa9796 = 0x022,
    RsaX509 = 0x023,
    Sha1RsaPkcs = 0x024,
    RsaPkcsOaep = 0x025,
    Sha1RsaPkcsPss = 0x026,
    Sha256RsaPkcs = 0x027,
    Sha384RsaPkcs = 0x028,
    Sha512RsaPkcs = 0x029,
    Sha256RsaPkcsPss = 0x02a,
    Sha384RsaPkcsPss = 0x02b,
    Sha512RsaPkcsPss = 0x02c,
    Sha224RsaPkcs = 0x02d,
    Sha224RsaPkcsPss = 0x02e,
    RsaAesKeyWrap = 0x02f,
    RsaPkcsPss = 0x030,
    Md5 = 0x031,
    Sha1 = 0x032,
    Sha224 = 0x033,
    Sha256 = 0x034,
    Sha384 = 0x035,
    Sha512 = 0x036,
    DhPkcsDerive = 0x037,
}

/// Shape of the parameter blob expected for a mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsLayout {
    None,
    AesIv,
    AesCtr,
    AesGcm,
    AesCcm,
    AesGmac,
    MacGeneral,
    KeyDerivationString,
    AesCbcEncryptData,
    Ecdh1Derive,
    EcdhAesKeyWrap,
    RsaOaep,
    RsaPss,
    RsaAesKeyWrap,
    /// Known to the TA but without a client side parameter layout.
    Unsupported,
}

impl MechanismType {
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn params_layout(self) -> ParamsLayout {
        match self {
            Self::AesCbc | Self::AesCbcPad | Self::AesCts => ParamsLayout::AesIv,
            Self::AesCtr => ParamsLayout::AesCtr,
            Self::AesGcm => ParamsLayout::AesGcm,
            Self::AesCcm => ParamsLayout::AesCcm,
            Self::AesGmac => ParamsLayout::AesGmac,
            Self::AesCmacGeneral => ParamsLayout::MacGeneral,
            Self::AesEcbEncryptData => ParamsLayout::KeyDerivationString,
            Self::AesCbcEncryptData => ParamsLayout::AesCbcEncryptData,
            Self::Ecdh1Derive | Self::Ecdh1CofactorDerive => ParamsLayout::Ecdh1Derive,
            Self::EcdhAesKeyWrap => ParamsLayout::EcdhAesKeyWrap,
            Self::RsaPkcsOaep => ParamsLayout::RsaOaep,
            Self::RsaPkcsPss
            | Self::Sha1RsaPkcsPss
            | Self::Sha224RsaPkcsPss
            | Self::Sha256RsaPkcsPss
            | Self::Sha384RsaPkcsPss
            | Self::Sha512RsaPkcsPss => ParamsLayout::RsaPss,
            Self::RsaAesKeyWrap => ParamsLayout::RsaAesKeyWrap,
            Self::EcmqvDerive | Self::Rsa9796 | Self::DhPkcsDerive => ParamsLayout::Unsupported,
            Self::AesEcb
            | Self::AesCmac
            | Self::AesKeyGen
            | Self::GenericSecretKeyGen
            | Self::Md5Hmac
            | Self::Sha1Hmac
            | Self::Sha224Hmac
            | Self::Sha256Hmac
            | Self::Sha384Hmac
            | Self::Sha512Hmac
            | Self::AesXcbcMac
            | Self::EcKeyPairGen
            | Self::Ecdsa
            | Self::EcdsaSha1
            | Self::EcdsaSha224
            | Self::EcdsaSha256
            | Self::EcdsaSha384
            | Self::EcdsaSha512
            | Self::RsaPkcsKeyPairGen
            | Self::RsaPkcs
            | Self::RsaX509
            | Self::Sha1RsaPkcs
            | Self::Sha224RsaPkcs
            | Self::Sha256RsaPkcs
            | Self::Sha384RsaPkcs
            | Self::Sha512RsaPkcs
            | Self::Md5
            | Self::Sha1
            | Self::Sha224
            | Self::Sha256
            | Self::Sha384
            | Self::Sha512 => ParamsLayout::None,
        }
    }
}

impl TryFrom<u32> for MechanismType {
    type Error = ModuleError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Self::from_repr(id).ok_or(ModuleError::MechanismInvalid(id))
    }
}

#[derive(Debug, Display, FromRepr, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u32)]
pub enum KeyDerivationFunction {
    Null = 0x0000,
    Sha1Kdf = 0x0001,
    Sha1KdfAsn1 = 0x0002,
    Sha1KdfConcatenate = 0x0003,
    Sha224Kdf = 0x0004,
    Sha256Kdf = 0x0005,
    Sha384Kdf = 0x0006,
    Sha512Kdf = 0x0007,
    CpdiversifyKdf = 0x0008,
}

#[derive(Debug, Display, FromRepr, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u32)]
pub enum MaskGenerationFunction {
    Mgf1Sha1 = 0x0001,
    Mgf1Sha256 = 0x0002,
    Mgf1Sha384 = 0x0003,
    Mgf1Sha512 = 0x0004,
    Mgf1Sha224 = 0x0005,
}

/// OAEP encoding parameter source: the label is given explicitly.
pub const OAEP_SOURCE_DATA_SPECIFIED: u32 = 0x0001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesCtrParams {
    pub counter_bits: u32,
    pub iv: [u8; AES_BLOCK_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesGcmParams {
    pub iv: Vec<u8>,
    pub aad: Vec<u8>,
    pub tag_bits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesCcmParams {
    pub data_len: u32,
    pub nonce: Vec<u8>,
    pub aad: Vec<u8>,
    pub mac_len: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesCbcEncryptDataParams {
    pub iv: [u8; AES_BLOCK_SIZE],
    pub data: Zeroizing<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ecdh1DeriveParams {
    pub kdf: KeyDerivationFunction,
    pub shared_data: Vec<u8>,
    pub public_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdhAesKeyWrapParams {
    pub aes_key_bits: u32,
    pub kdf: KeyDerivationFunction,
    pub shared_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaOaepParams {
    pub hash: MechanismType,
    pub mgf: MaskGenerationFunction,
    pub source: u32,
    pub source_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPssParams {
    pub hash: MechanismType,
    pub mgf: MaskGenerationFunction,
    pub salt_len: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaAesKeyWrapParams {
    pub aes_key_bits: u32,
    pub oaep: RsaOaepParams,
}

/// Native form of the mechanism parameters, one variant per [`ParamsLayout`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MechanismParams {
    #[default]
    None,
    AesIv([u8; AES_BLOCK_SIZE]),
    AesCtr(AesCtrParams),
    AesGcm(AesGcmParams),
    AesCcm(AesCcmParams),
    AesGmac([u8; GMAC_IV_SIZE]),
    /// Output length in bytes of a general length MAC.
    MacGeneral(u32),
    /// Data encrypted to derive a key.
    KeyDerivationString(Zeroizing<Vec<u8>>),
    AesCbcEncryptData(AesCbcEncryptDataParams),
    Ecdh1Derive(Ecdh1DeriveParams),
    EcdhAesKeyWrap(EcdhAesKeyWrapParams),
    RsaOaep(RsaOaepParams),
    RsaPss(RsaPssParams),
    RsaAesKeyWrap(RsaAesKeyWrapParams),
}

impl MechanismParams {
    #[must_use]
    pub const fn layout(&self) -> ParamsLayout {
        match self {
            Self::None => ParamsLayout::None,
            Self::AesIv(_) => ParamsLayout::AesIv,
            Self::AesCtr(_) => ParamsLayout::AesCtr,
            Self::AesGcm(_) => ParamsLayout::AesGcm,
            Self::AesCcm(_) => ParamsLayout::AesCcm,
            Self::AesGmac(_) => ParamsLayout::AesGmac,
            Self::MacGeneral(_) => ParamsLayout::MacGeneral,
            Self::KeyDerivationString(_) => ParamsLayout::KeyDerivationString,
            Self::AesCbcEncryptData(_) => ParamsLayout::AesCbcEncryptData,
            Self::Ecdh1Derive(_) => ParamsLayout::Ecdh1Derive,
            Self::EcdhAesKeyWrap(_) => ParamsLayout::EcdhAesKeyWrap,
            Self::RsaOaep(_) => ParamsLayout::RsaOaep,
            Self::RsaPss(_) => ParamsLayout::RsaPss,
            Self::RsaAesKeyWrap(_) => ParamsLayout::RsaAesKeyWrap,
        }
    }

    fn serialize(&self, serializer: &mut Serializer) -> ModuleResult<()> {
        match self {
            Self::None => {}
            Self::AesIv(iv) => {
                serializer.add_bytes(iv);
            }
            Self::AesCtr(params) => {
                serializer.add_u32(params.counter_bits).add_bytes(&params.iv);
            }
            Self::AesGcm(params) => {
                serializer
                    .add_sized_bytes(&params.iv, "GCM IV")?
                    .add_sized_bytes(&params.aad, "GCM AAD")?
                    .add_u32(params.tag_bits);
            }
            Self::AesCcm(params) => {
                serializer
                    .add_u32(params.data_len)
                    .add_sized_bytes(&params.nonce, "CCM nonce")?
                    .add_sized_bytes(&params.aad, "CCM AAD")?
                    .add_u32(params.mac_len);
            }
            Self::AesGmac(iv) => {
                serializer.add_bytes(iv);
            }
            Self::MacGeneral(len) => {
                serializer.add_u32(*len);
            }
            Self::KeyDerivationString(data) => {
                serializer.add_sized_bytes(data, "derivation data")?;
            }
            Self::AesCbcEncryptData(params) => {
                serializer
                    .add_bytes(&params.iv)
                    .add_sized_bytes(&params.data, "derivation data")?;
            }
            Self::Ecdh1Derive(params) => {
                serializer
                    .add_u32(params.kdf as u32)
                    .add_sized_bytes(&params.shared_data, "ECDH shared data")?
                    .add_sized_bytes(&params.public_data, "ECDH public data")?;
            }
            Self::EcdhAesKeyWrap(params) => {
                serializer
                    .add_u32(params.aes_key_bits)
                    .add_u32(params.kdf as u32)
                    .add_sized_bytes(&params.shared_data, "ECDH shared data")?;
            }
            Self::RsaOaep(params) => serialize_oaep(serializer, params)?,
            Self::RsaPss(params) => {
                serializer
                    .add_u32(params.hash.id())
                    .add_u32(params.mgf as u32)
                    .add_u32(params.salt_len);
            }
            Self::RsaAesKeyWrap(params) => {
                serializer.add_u32(params.aes_key_bits);
                serialize_oaep(serializer, &params.oaep)?;
            }
        }
        Ok(())
    }

    fn deserialize(layout: ParamsLayout, blob: &[u8]) -> ModuleResult<Self> {
        let mut de = Deserializer::new(blob);
        let params = match layout {
            ParamsLayout::None => Self::None,
            ParamsLayout::AesIv => Self::AesIv(de.take_array()?),
            ParamsLayout::AesCtr => Self::AesCtr(AesCtrParams {
                counter_bits: de.take_u32()?,
                iv: de.take_array()?,
            }),
            ParamsLayout::AesGcm => Self::AesGcm(AesGcmParams {
                iv: de.take_sized_bytes()?.to_vec(),
                aad: de.take_sized_bytes()?.to_vec(),
                tag_bits: de.take_u32()?,
            }),
            ParamsLayout::AesCcm => Self::AesCcm(AesCcmParams {
                data_len: de.take_u32()?,
                nonce: de.take_sized_bytes()?.to_vec(),
                aad: de.take_sized_bytes()?.to_vec(),
                mac_len: de.take_u32()?,
            }),
            ParamsLayout::AesGmac => Self::AesGmac(de.take_array()?),
            ParamsLayout::MacGeneral => Self::MacGeneral(de.take_u32()?),
            ParamsLayout::KeyDerivationString => {
                Self::KeyDerivationString(Zeroizing::new(de.take_sized_bytes()?.to_vec()))
            }
            ParamsLayout::AesCbcEncryptData => {
                Self::AesCbcEncryptData(AesCbcEncryptDataParams {
                    iv: de.take_array()?,
                    data: Zeroizing::new(de.take_sized_bytes()?.to_vec()),
                })
            }
            ParamsLayout::Ecdh1Derive => Self::Ecdh1Derive(Ecdh1DeriveParams {
                kdf: take_kdf(&mut de)?,
                shared_data: de.take_sized_bytes()?.to_vec(),
                public_data: de.take_sized_bytes()?.to_vec(),
            }),
            ParamsLayout::EcdhAesKeyWrap => Self::EcdhAesKeyWrap(EcdhAesKeyWrapParams {
                aes_key_bits: de.take_u32()?,
                kdf: take_kdf(&mut de)?,
                shared_data: de.take_sized_bytes()?.to_vec(),
            }),
            ParamsLayout::RsaOaep => Self::RsaOaep(take_oaep(&mut de)?),
            ParamsLayout::RsaPss => Self::RsaPss(RsaPssParams {
                hash: take_hash(&mut de)?,
                mgf: take_mgf(&mut de)?,
                salt_len: de.take_u32()?,
            }),
            ParamsLayout::RsaAesKeyWrap => Self::RsaAesKeyWrap(RsaAesKeyWrapParams {
                aes_key_bits: de.take_u32()?,
                oaep: take_oaep(&mut de)?,
            }),
            ParamsLayout::Unsupported => {
                return Err(ModuleError::MechanismParamInvalid(
                    "no parameter layout".to_owned(),
                ));
            }
        };
        if de.remaining() != 0 {
            return Err(ModuleError::MechanismParamInvalid(format!(
                "{} trailing bytes in {layout:?} parameters",
                de.remaining()
            )));
        }
        Ok(params)
    }
}

fn serialize_oaep(serializer: &mut Serializer, params: &RsaOaepParams) -> ModuleResult<()> {
    serializer
        .add_u32(params.hash.id())
        .add_u32(params.mgf as u32)
        .add_u32(params.source)
        .add_sized_bytes(&params.source_data, "OAEP source data")?;
    Ok(())
}

fn take_kdf(de: &mut Deserializer<'_>) -> ModuleResult<KeyDerivationFunction> {
    let id = de.take_u32()?;
    KeyDerivationFunction::from_repr(id).ok_or_else(|| {
        ModuleError::MechanismParamInvalid(format!("unknown key derivation function {id:#x}"))
    })
}

fn take_mgf(de: &mut Deserializer<'_>) -> ModuleResult<MaskGenerationFunction> {
    let id = de.take_u32()?;
    MaskGenerationFunction::from_repr(id).ok_or_else(|| {
        ModuleError::MechanismParamInvalid(format!("unknown mask generation function {id:#x}"))
    })
}

fn take_hash(de: &mut Deserializer<'_>) -> ModuleResult<MechanismType> {
    let id = de.take_u32()?;
    MechanismType::from_repr(id).ok_or_else(|| {
        ModuleError::MechanismParamInvalid(format!("unknown hash mechanism {id:#x}"))
    })
}

fn take_oaep(de: &mut Deserializer<'_>) -> ModuleResult<RsaOaepParams> {
    Ok(RsaOaepParams {
        hash: take_hash(de)?,
        mgf: take_mgf(de)?,
        source: de.take_u32()?,
        source_data: de.take_sized_bytes()?.to_vec(),
    })
}

/// A mechanism and its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mechanism {
    pub mechanism_type: MechanismType,
    pub params: MechanismParams,
}

impl Mechanism {
    /// A mechanism taking no parameter.
    #[must_use]
    pub const fn new(mechanism_type: MechanismType) -> Self {
        Self {
            mechanism_type,
            params: MechanismParams::None,
        }
    }

    #[must_use]
    pub const fn with_params(mechanism_type: MechanismType, params: MechanismParams) -> Self {
        Self {
            mechanism_type,
            params,
        }
    }

    /// Check the parameters against the layout registered for the mechanism.
    fn check_layout(&self) -> ModuleResult<()> {
        let expected = self.mechanism_type.params_layout();
        if expected == ParamsLayout::Unsupported {
            return Err(ModuleError::MechanismInvalid(self.mechanism_type.id()));
        }
        if self.params.layout() != expected {
            return Err(ModuleError::MechanismParamInvalid(format!(
                "{} expects {expected:?} parameters, got {:?}",
                self.mechanism_type,
                self.params.layout()
            )));
        }
        Ok(())
    }

    /// Append the `{id, params_size, params}` blob.
    pub(crate) fn serialize(&self, serializer: &mut Serializer) -> ModuleResult<()> {
        self.check_layout()?;
        let mut params = Serializer::new();
        self.params.serialize(&mut params)?;
        serializer
            .add_u32(self.mechanism_type.id())
            .add_sized_bytes(params.as_bytes(), "mechanism parameters")?;
        Ok(())
    }

    pub fn encode(&self) -> ModuleResult<Zeroizing<Vec<u8>>> {
        let mut serializer = Serializer::new();
        self.serialize(&mut serializer)?;
        Ok(serializer.finish())
    }

    pub fn decode(blob: &[u8]) -> ModuleResult<Self> {
        let mut de = Deserializer::new(blob);
        let mechanism_type = MechanismType::try_from(de.take_u32()?)?;
        let layout = mechanism_type.params_layout();
        if layout == ParamsLayout::Unsupported {
            return Err(ModuleError::MechanismInvalid(mechanism_type.id()));
        }
        let params = de
            .take_sized_bytes()
            .map_err(|e| ModuleError::MechanismParamInvalid(e.to_string()))?;
        if de.remaining() != 0 {
            return Err(ModuleError::MechanismParamInvalid(format!(
                "{} trailing bytes after mechanism parameters",
                de.remaining()
            )));
        }
        let params = MechanismParams::deserialize(layout, params).map_err(|e| match e {
            ModuleError::MechanismParamInvalid(_) => e,
            other => ModuleError::MechanismParamInvalid(other.to_string()),
        })?;
        Ok(Self {
            mechanism_type,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(blob: &[u8]) -> Vec<u32> {
        blob.chunks(4)
            .map(|chunk| u32::from_ne_bytes(chunk.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn parameterless_mechanism_blob() {
        let blob = Mechanism::new(MechanismType::AesKeyGen).encode().unwrap();
        assert_eq!(words(&blob), vec![0x00c, 0]);
    }

    #[test]
    fn cbc_carries_a_16_bytes_iv() {
        let blob = Mechanism::with_params(MechanismType::AesCbcPad, MechanismParams::AesIv([7; 16]))
            .encode()
            .unwrap();
        assert_eq!(blob.len(), 8 + 16);
        assert_eq!(&blob[4..8], &16_u32.to_ne_bytes());
        assert_eq!(&blob[8..], &[7; 16]);
    }

    #[test]
    fn ctr_layout() {
        let blob = Mechanism::with_params(
            MechanismType::AesCtr,
            MechanismParams::AesCtr(AesCtrParams {
                counter_bits: 32,
                iv: [1; 16],
            }),
        )
        .encode()
        .unwrap();
        assert_eq!(&blob[4..8], &20_u32.to_ne_bytes());
        assert_eq!(&blob[8..12], &32_u32.to_ne_bytes());
    }

    #[test]
    fn gcm_layout() {
        let mechanism = Mechanism::with_params(
            MechanismType::AesGcm,
            MechanismParams::AesGcm(AesGcmParams {
                iv: vec![0xAA; 12],
                aad: b"header".to_vec(),
                tag_bits: 128,
            }),
        );
        let blob = mechanism.encode().unwrap();
        let params_size = 4 + 12 + 4 + 6 + 4;
        assert_eq!(blob.len(), 8 + params_size);
        assert_eq!(&blob[4..8], &u32::try_from(params_size).unwrap().to_ne_bytes());
        assert_eq!(&blob[8..12], &12_u32.to_ne_bytes());
        assert_eq!(&blob[24..28], &6_u32.to_ne_bytes());
        assert_eq!(&blob[28..34], b"header");
        assert_eq!(&blob[34..38], &128_u32.to_ne_bytes());
        assert_eq!(Mechanism::decode(&blob).unwrap(), mechanism);
    }

    #[test]
    fn ccm_layout() {
        let mechanism = Mechanism::with_params(
            MechanismType::AesCcm,
            MechanismParams::AesCcm(AesCcmParams {
                data_len: 64,
                nonce: vec![3; 7],
                aad: Vec::new(),
                mac_len: 16,
            }),
        );
        let blob = mechanism.encode().unwrap();
        assert_eq!(blob.len(), 8 + 4 + 4 + 7 + 4 + 4);
        assert_eq!(Mechanism::decode(&blob).unwrap(), mechanism);
    }

    #[test]
    fn oaep_and_rsa_aes_key_wrap_share_fields() {
        let oaep = RsaOaepParams {
            hash: MechanismType::Sha256,
            mgf: MaskGenerationFunction::Mgf1Sha256,
            source: OAEP_SOURCE_DATA_SPECIFIED,
            source_data: b"label".to_vec(),
        };
        let plain = Mechanism::with_params(
            MechanismType::RsaPkcsOaep,
            MechanismParams::RsaOaep(oaep.clone()),
        )
        .encode()
        .unwrap();
        let wrap = Mechanism::with_params(
            MechanismType::RsaAesKeyWrap,
            MechanismParams::RsaAesKeyWrap(RsaAesKeyWrapParams {
                aes_key_bits: 256,
                oaep,
            }),
        )
        .encode()
        .unwrap();
        assert_eq!(&plain[8..12], &MechanismType::Sha256.id().to_ne_bytes());
        assert_eq!(&wrap[8..12], &256_u32.to_ne_bytes());
        assert_eq!(&wrap[12..], &plain[8..]);
    }

    #[test]
    fn pss_layout() {
        let blob = Mechanism::with_params(
            MechanismType::Sha256RsaPkcsPss,
            MechanismParams::RsaPss(RsaPssParams {
                hash: MechanismType::Sha256,
                mgf: MaskGenerationFunction::Mgf1Sha256,
                salt_len: 32,
            }),
        )
        .encode()
        .unwrap();
        assert_eq!(words(&blob), vec![0x02a, 12, 0x034, 2, 32]);
    }

    #[test]
    fn ecdh_layout() {
        let mechanism = Mechanism::with_params(
            MechanismType::Ecdh1Derive,
            MechanismParams::Ecdh1Derive(Ecdh1DeriveParams {
                kdf: KeyDerivationFunction::Null,
                shared_data: Vec::new(),
                public_data: vec![4; 65],
            }),
        );
        let blob = mechanism.encode().unwrap();
        assert_eq!(blob.len(), 8 + 4 + 4 + 4 + 65);
        assert_eq!(Mechanism::decode(&blob).unwrap(), mechanism);
    }

    #[test]
    fn parameters_must_match_the_layout() {
        let error = Mechanism::with_params(MechanismType::AesCbc, MechanismParams::None)
            .encode()
            .unwrap_err();
        assert!(matches!(error, ModuleError::MechanismParamInvalid(_)));
        let error = Mechanism::with_params(MechanismType::AesEcb, MechanismParams::AesIv([0; 16]))
            .encode()
            .unwrap_err();
        assert!(matches!(error, ModuleError::MechanismParamInvalid(_)));
    }

    #[test]
    fn mechanisms_without_layout_are_rejected() {
        for mechanism_type in [
            MechanismType::EcmqvDerive,
            MechanismType::Rsa9796,
            MechanismType::DhPkcsDerive,
        ] {
            assert!(matches!(
                Mechanism::new(mechanism_type).encode(),
                Err(ModuleError::MechanismInvalid(id)) if id == mechanism_type.id()
            ));
        }
    }

    #[test]
    fn decoding_rejects_unknown_ids_and_bad_sizes() {
        let mut blob = Serializer::new();
        blob.add_u32(0x4242).add_u32(0);
        assert!(matches!(
            Mechanism::decode(&blob.finish()),
            Err(ModuleError::MechanismInvalid(0x4242))
        ));

        // CBC with an 8 bytes IV
        let mut blob = Serializer::new();
        blob.add_u32(MechanismType::AesCbc.id()).add_u32(8).add_bytes(&[0; 8]);
        assert!(matches!(
            Mechanism::decode(&blob.finish()),
            Err(ModuleError::MechanismParamInvalid(_))
        ));

        // declared size larger than the blob
        let mut blob = Serializer::new();
        blob.add_u32(MechanismType::AesGmac.id()).add_u32(12).add_bytes(&[0; 4]);
        assert!(matches!(
            Mechanism::decode(&blob.finish()),
            Err(ModuleError::MechanismParamInvalid(_))
        ));

        // bytes after the parameters
        let mut blob = Serializer::new();
        blob.add_u32(MechanismType::AesEcb.id()).add_u32(0).add_u32(0);
        assert!(matches!(
            Mechanism::decode(&blob.finish()),
            Err(ModuleError::MechanismParamInvalid(_))
        ));
    }

    #[test]
    fn every_registered_mechanism_has_a_layout() {
        for id in 0..=0x37 {
            let mechanism_type = MechanismType::try_from(id).unwrap();
            assert_eq!(mechanism_type.id(), id);
            let _layout = mechanism_type.params_layout();
        }
        assert!(MechanismType::try_from(0x38).is_err());
    }
}
