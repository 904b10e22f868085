//! Object management and cryptographic processing.

use tracing::debug;

use crate::{
    ModuleError, ModuleResult, ObjectHandle, SessionHandle, ckteec_ensure,
    context::Context,
    core::{
        attribute::{
            Attribute, TemplateStatus, decode_template, guess_key_type,
            serialize_request_template, serialize_template,
        },
        mechanism::Mechanism,
        serializer::{Serializer, u32_array},
    },
    invoke::{invoke_ctrl, invoke_in, invoke_in_in, invoke_in_out, invoke_out},
    shm::SharedBuffer,
    ta::{TaCommand, TaStatus},
    transport::{ShmDirection, Transport},
};

const WORD_SIZE: usize = 4;

/// Control arguments starting with the session handle.
pub(crate) fn session_arguments(session: SessionHandle) -> Serializer {
    let mut arguments = Serializer::with_capacity(WORD_SIZE);
    arguments.add_u32(session);
    arguments
}

pub(crate) fn invoke_with_arguments<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    arguments: &Serializer,
) -> ModuleResult<()> {
    let mut ctrl = SharedBuffer::control(ctx.transport(), arguments)?;
    invoke_ctrl(ctx, command, &mut ctrl)
}

/// Invoke a command returning exactly one 32-bit word, named `what` in
/// errors.
pub(crate) fn invoke_for_u32<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    arguments: &Serializer,
    what: &str,
) -> ModuleResult<u32> {
    let mut ctrl = SharedBuffer::control(ctx.transport(), arguments)?;
    let mut out = SharedBuffer::alloc(ctx.transport(), WORD_SIZE, ShmDirection::Output)?;
    invoke_out(ctx, command, Some(&mut ctrl), &mut out)?;
    if out.size() != WORD_SIZE {
        return Err(ModuleError::DeviceError(format!(
            "{command}: {} bytes returned for {what}",
            out.size()
        )));
    }
    Ok(u32::from_ne_bytes(out.produced().try_into()?))
}

/// Invoke a command producing a variable amount of bytes into `output`.
///
/// An empty `output` is a size query: nothing is written and
/// `BufferTooSmall` carries the required size, unless nothing is pending.
pub(crate) fn invoke_for_bytes<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    arguments: &Serializer,
    input: Option<&[u8]>,
    output: &mut [u8],
) -> ModuleResult<usize> {
    let capacity = output.len();
    let mut ctrl = SharedBuffer::control(ctx.transport(), arguments)?;
    let mut out = SharedBuffer::output(ctx.transport(), output)?;
    match input {
        Some(input) => {
            let mut input = SharedBuffer::register_or_copy(ctx.transport(), input)?;
            invoke_in_out(ctx, command, &mut ctrl, &mut input, &mut out)?;
        }
        None => invoke_out(ctx, command, Some(&mut ctrl), &mut out)?,
    }
    let produced = out.size();
    if produced > capacity {
        debug!("{command}: {produced} bytes reported for a {capacity} bytes buffer");
        return Err(ModuleError::BufferTooSmall { required: produced });
    }
    Ok(produced)
}

pub(crate) fn invoke_with_input<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    arguments: &Serializer,
    input: &[u8],
) -> ModuleResult<()> {
    let mut ctrl = SharedBuffer::control(ctx.transport(), arguments)?;
    let mut input = SharedBuffer::register_or_copy(ctx.transport(), input)?;
    invoke_in(ctx, command, &mut ctrl, &mut input)
}

/// Commands of one cipher direction.
#[derive(Debug, Clone, Copy)]
enum Cipher {
    Encrypt,
    Decrypt,
}

impl Cipher {
    const fn init(self) -> TaCommand {
        match self {
            Self::Encrypt => TaCommand::EncryptInit,
            Self::Decrypt => TaCommand::DecryptInit,
        }
    }

    const fn update(self) -> TaCommand {
        match self {
            Self::Encrypt => TaCommand::EncryptUpdate,
            Self::Decrypt => TaCommand::DecryptUpdate,
        }
    }

    const fn finish(self) -> TaCommand {
        match self {
            Self::Encrypt => TaCommand::EncryptFinal,
            Self::Decrypt => TaCommand::DecryptFinal,
        }
    }

    const fn oneshot(self) -> TaCommand {
        match self {
            Self::Encrypt => TaCommand::EncryptOneshot,
            Self::Decrypt => TaCommand::DecryptOneshot,
        }
    }
}

impl<T: Transport> Context<T> {
    /// Create an object from a template.
    pub fn create_object(
        &self,
        session: SessionHandle,
        template: &[Attribute],
    ) -> ModuleResult<ObjectHandle> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        serialize_template(&mut arguments, template)?;
        invoke_for_u32(self, TaCommand::ImportObject, &arguments, "a handle")
    }

    /// Copy an object, overriding the attributes of `template`.
    pub fn copy_object(
        &self,
        session: SessionHandle,
        object: ObjectHandle,
        template: &[Attribute],
    ) -> ModuleResult<ObjectHandle> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        arguments.add_u32(object);
        serialize_template(&mut arguments, template)?;
        invoke_for_u32(self, TaCommand::CopyObject, &arguments, "a handle")
    }

    pub fn destroy_object(&self, session: SessionHandle, object: ObjectHandle) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        arguments.add_u32(object);
        invoke_with_arguments(self, TaCommand::DestroyObject, &arguments)
    }

    pub fn find_objects_init(
        &self,
        session: SessionHandle,
        template: &[Attribute],
    ) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        serialize_template(&mut arguments, template)?;
        invoke_with_arguments(self, TaCommand::FindObjectsInit, &arguments)
    }

    /// Fetch at most `max_count` handles of the active search.
    pub fn find_objects(
        &self,
        session: SessionHandle,
        max_count: usize,
    ) -> ModuleResult<Vec<ObjectHandle>> {
        self.ensure_initialized()?;
        let size = max_count.checked_mul(WORD_SIZE).ok_or_else(|| {
            ModuleError::BadArguments(format!("cannot fetch {max_count} handles"))
        })?;
        let mut ctrl = SharedBuffer::control(self.transport(), &session_arguments(session))?;
        let mut out = SharedBuffer::alloc(self.transport(), size, ShmDirection::Output)?;
        invoke_out(self, TaCommand::FindObjects, Some(&mut ctrl), &mut out)?;
        u32_array(out.produced())
    }

    pub fn find_objects_final(&self, session: SessionHandle) -> ModuleResult<()> {
        self.ensure_initialized()?;
        invoke_with_arguments(self, TaCommand::FindObjectsFinal, &session_arguments(session))
    }

    /// Byte size of an object as stored by the token.
    pub fn get_object_size(&self, session: SessionHandle, object: ObjectHandle) -> ModuleResult<u32> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        arguments.add_u32(object);
        invoke_for_u32(self, TaCommand::GetObjectSize, &arguments, "an object size")
    }

    /// Fill `template` with the attribute values of an object.
    ///
    /// Every entry that fits its buffer is filled, even when other entries
    /// are short (`AttributeBufferTooSmall`), sensitive or unknown to the
    /// object (their length is then [`crate::UNAVAILABLE_INFORMATION`]).
    pub fn get_attribute_value(
        &self,
        session: SessionHandle,
        object: ObjectHandle,
        template: &mut [Attribute],
    ) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let mut request = Serializer::new();
        serialize_request_template(&mut request, template)?;
        let mut arguments = session_arguments(session);
        arguments.add_u32(object).add_bytes(request.as_bytes());

        let mut frame_size = request.len();
        let mut retried = false;
        loop {
            let mut ctrl = SharedBuffer::control(self.transport(), &arguments)?;
            let mut out = SharedBuffer::alloc(self.transport(), frame_size, ShmDirection::Output)?;
            let status = match invoke_out(
                self,
                TaCommand::GetAttributeValue,
                Some(&mut ctrl),
                &mut out,
            ) {
                Ok(()) if out.size() <= frame_size => None,
                // the frame size may be reported along with a success
                Ok(()) => Some(ModuleError::BufferTooSmall {
                    required: out.size(),
                }),
                Err(e) => Some(e),
            };
            let status = match status {
                Some(ModuleError::BufferTooSmall { required }) if required > frame_size => {
                    if retried {
                        return Err(ModuleError::DeviceError(format!(
                            "attribute frame grew again to {required} bytes"
                        )));
                    }
                    debug!("attribute frame needs {required} bytes, retrying");
                    retried = true;
                    frame_size = required;
                    continue;
                }
                Some(e) if e.ta_status().is_some_and(TaStatus::carries_attributes) => Some(e),
                Some(e) => return Err(e),
                None => None,
            };
            if decode_template(out.data(), template)? == TemplateStatus::Short {
                return Err(ModuleError::AttributeBufferTooSmall);
            }
            return match status {
                None | Some(ModuleError::BufferTooSmall { .. }) => Ok(()),
                Some(e) => Err(e),
            };
        }
    }

    pub fn set_attribute_value(
        &self,
        session: SessionHandle,
        object: ObjectHandle,
        template: &[Attribute],
    ) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        arguments.add_u32(object);
        serialize_template(&mut arguments, template)?;
        invoke_with_arguments(self, TaCommand::SetAttributeValue, &arguments)
    }

    /// Generate a secret key or domain parameters.
    pub fn generate_key(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism,
        template: &[Attribute],
    ) -> ModuleResult<ObjectHandle> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        mechanism.serialize(&mut arguments)?;
        serialize_template(&mut arguments, template)?;
        invoke_for_u32(self, TaCommand::GenerateKey, &arguments, "a handle")
    }

    /// Generate a key pair, returning the public then the private key handle.
    ///
    /// A template without `KEY_TYPE` gets the type implied by the mechanism.
    pub fn generate_key_pair(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> ModuleResult<(ObjectHandle, ObjectHandle)> {
        self.ensure_initialized()?;
        let public_template = guess_key_type(mechanism.mechanism_type, public_template);
        let private_template = guess_key_type(mechanism.mechanism_type, private_template);
        let mut arguments = session_arguments(session);
        mechanism.serialize(&mut arguments)?;
        serialize_template(&mut arguments, &public_template)?;
        serialize_template(&mut arguments, &private_template)?;

        let mut ctrl = SharedBuffer::control(self.transport(), &arguments)?;
        let mut out = SharedBuffer::alloc(self.transport(), 2 * WORD_SIZE, ShmDirection::Output)?;
        let outcome = invoke_out(self, TaCommand::GenerateKeyPair, Some(&mut ctrl), &mut out);
        // a malformed handle pair is a general error, whatever the status
        ckteec_ensure!(
            out.size() == 2 * WORD_SIZE,
            "key pair generation returned {} bytes of handles",
            out.size()
        );
        outcome?;
        let handles = u32_array(out.produced())?;
        Ok((handles[0], handles[1]))
    }

    /// Derive a key from `base_key`.
    pub fn derive_key(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism,
        base_key: ObjectHandle,
        template: &[Attribute],
    ) -> ModuleResult<ObjectHandle> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        mechanism.serialize(&mut arguments)?;
        arguments.add_u32(base_key);
        serialize_template(&mut arguments, template)?;
        invoke_for_u32(self, TaCommand::DeriveKey, &arguments, "a handle")
    }

    fn cipher_init(
        &self,
        cipher: Cipher,
        session: SessionHandle,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        arguments.add_u32(key);
        mechanism.serialize(&mut arguments)?;
        invoke_with_arguments(self, cipher.init(), &arguments)
    }

    fn cipher_update(
        &self,
        cipher: Cipher,
        session: SessionHandle,
        input: &[u8],
        output: &mut [u8],
    ) -> ModuleResult<usize> {
        self.ensure_initialized()?;
        invoke_for_bytes(
            self,
            cipher.update(),
            &session_arguments(session),
            Some(input),
            output,
        )
    }

    fn cipher_final(
        &self,
        cipher: Cipher,
        session: SessionHandle,
        output: &mut [u8],
    ) -> ModuleResult<usize> {
        self.ensure_initialized()?;
        invoke_for_bytes(self, cipher.finish(), &session_arguments(session), None, output)
    }

    fn cipher_oneshot(
        &self,
        cipher: Cipher,
        session: SessionHandle,
        input: &[u8],
        output: &mut [u8],
    ) -> ModuleResult<usize> {
        self.ensure_initialized()?;
        invoke_for_bytes(
            self,
            cipher.oneshot(),
            &session_arguments(session),
            Some(input),
            output,
        )
    }

    pub fn encrypt_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> ModuleResult<()> {
        self.cipher_init(Cipher::Encrypt, session, mechanism, key)
    }

    /// Returns the number of bytes written to `output`.
    pub fn encrypt_update(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: &mut [u8],
    ) -> ModuleResult<usize> {
        self.cipher_update(Cipher::Encrypt, session, data, output)
    }

    pub fn encrypt_final(&self, session: SessionHandle, output: &mut [u8]) -> ModuleResult<usize> {
        self.cipher_final(Cipher::Encrypt, session, output)
    }

    /// Single part encryption, terminating the operation.
    pub fn encrypt(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: &mut [u8],
    ) -> ModuleResult<usize> {
        self.cipher_oneshot(Cipher::Encrypt, session, data, output)
    }

    pub fn decrypt_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> ModuleResult<()> {
        self.cipher_init(Cipher::Decrypt, session, mechanism, key)
    }

    pub fn decrypt_update(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: &mut [u8],
    ) -> ModuleResult<usize> {
        self.cipher_update(Cipher::Decrypt, session, data, output)
    }

    pub fn decrypt_final(&self, session: SessionHandle, output: &mut [u8]) -> ModuleResult<usize> {
        self.cipher_final(Cipher::Decrypt, session, output)
    }

    pub fn decrypt(
        &self,
        session: SessionHandle,
        data: &[u8],
        output: &mut [u8],
    ) -> ModuleResult<usize> {
        self.cipher_oneshot(Cipher::Decrypt, session, data, output)
    }

    fn sign_verify_init(
        &self,
        command: TaCommand,
        session: SessionHandle,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        arguments.add_u32(key);
        mechanism.serialize(&mut arguments)?;
        invoke_with_arguments(self, command, &arguments)
    }

    pub fn sign_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> ModuleResult<()> {
        self.sign_verify_init(TaCommand::SignInit, session, mechanism, key)
    }

    pub fn sign_update(&self, session: SessionHandle, data: &[u8]) -> ModuleResult<()> {
        self.ensure_initialized()?;
        invoke_with_input(self, TaCommand::SignUpdate, &session_arguments(session), data)
    }

    /// Returns the signature length written to `signature`.
    pub fn sign_final(&self, session: SessionHandle, signature: &mut [u8]) -> ModuleResult<usize> {
        self.ensure_initialized()?;
        invoke_for_bytes(
            self,
            TaCommand::SignFinal,
            &session_arguments(session),
            None,
            signature,
        )
    }

    pub fn sign(
        &self,
        session: SessionHandle,
        data: &[u8],
        signature: &mut [u8],
    ) -> ModuleResult<usize> {
        self.ensure_initialized()?;
        invoke_for_bytes(
            self,
            TaCommand::SignOneshot,
            &session_arguments(session),
            Some(data),
            signature,
        )
    }

    pub fn verify_init(
        &self,
        session: SessionHandle,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> ModuleResult<()> {
        self.sign_verify_init(TaCommand::VerifyInit, session, mechanism, key)
    }

    pub fn verify_update(&self, session: SessionHandle, data: &[u8]) -> ModuleResult<()> {
        self.ensure_initialized()?;
        invoke_with_input(self, TaCommand::VerifyUpdate, &session_arguments(session), data)
    }

    /// Fails with `Ta(SignatureInvalid)` when the signature does not verify.
    pub fn verify_final(&self, session: SessionHandle, signature: &[u8]) -> ModuleResult<()> {
        self.ensure_initialized()?;
        invoke_with_input(
            self,
            TaCommand::VerifyFinal,
            &session_arguments(session),
            signature,
        )
    }

    pub fn verify(&self, session: SessionHandle, data: &[u8], signature: &[u8]) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let mut ctrl = SharedBuffer::control(self.transport(), &session_arguments(session))?;
        let mut data = SharedBuffer::register_or_copy(self.transport(), data)?;
        let mut signature = SharedBuffer::register_or_copy(self.transport(), signature)?;
        invoke_in_in(self, TaCommand::VerifyOneshot, &mut ctrl, &mut data, &mut signature)
    }
}
