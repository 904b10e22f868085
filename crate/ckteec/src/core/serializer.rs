//! Packed little helpers to build and walk TA wire buffers.
//!
//! Every integer of the TA ABI is a 32-bit word in host byte order: the
//! trusted application runs on the same CPU as the client.

use zeroize::Zeroizing;

use crate::{ModuleError, ModuleResult};

/// Convert a host length to its 32-bit wire representation.
pub(crate) fn wire_len(len: usize, what: &str) -> ModuleResult<u32> {
    u32::try_from(len)
        .map_err(|_| ModuleError::BadArguments(format!("{what} length {len} overflows 32 bits")))
}

/// Append-only buffer for control and template frames.
///
/// The content is zeroized on drop since control buffers carry PINs.
#[derive(Default)]
pub(crate) struct Serializer {
    buffer: Zeroizing<Vec<u8>>,
}

impl Serializer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Zeroizing::new(Vec::with_capacity(capacity)),
        }
    }

    pub(crate) fn add_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub(crate) fn add_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Append a 32-bit length prefix followed by the bytes.
    pub(crate) fn add_sized_bytes(&mut self, bytes: &[u8], what: &str) -> ModuleResult<&mut Self> {
        self.add_u32(wire_len(bytes.len(), what)?);
        Ok(self.add_bytes(bytes))
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn finish(self) -> Zeroizing<Vec<u8>> {
        self.buffer
    }
}

/// Bounds checked reader over a TA output buffer.
pub(crate) struct Deserializer<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Deserializer<'a> {
    pub(crate) const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub(crate) fn take_bytes(&mut self, len: usize) -> ModuleResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                ModuleError::DeviceError(format!(
                    "reading {len} bytes at offset {} overflows a {} bytes buffer",
                    self.position,
                    self.data.len()
                ))
            })?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub(crate) fn take_array<const N: usize>(&mut self) -> ModuleResult<[u8; N]> {
        Ok(self.take_bytes(N)?.try_into()?)
    }

    pub(crate) fn take_u32(&mut self) -> ModuleResult<u32> {
        Ok(u32::from_ne_bytes(self.take_array::<4>()?))
    }

    /// Read a 32-bit length prefix followed by that many bytes.
    pub(crate) fn take_sized_bytes(&mut self) -> ModuleResult<&'a [u8]> {
        let len = usize::try_from(self.take_u32()?)?;
        self.take_bytes(len)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

/// Split a buffer into 32-bit words, as returned for handle and id arrays.
pub(crate) fn u32_array(data: &[u8]) -> ModuleResult<Vec<u32>> {
    if data.len() % 4 != 0 {
        return Err(ModuleError::DeviceError(format!(
            "{} bytes is not an array of 32-bit words",
            data.len()
        )));
    }
    let mut de = Deserializer::new(data);
    let mut words = Vec::with_capacity(data.len() / 4);
    while de.remaining() > 0 {
        words.push(de.take_u32()?);
    }
    Ok(words)
}
