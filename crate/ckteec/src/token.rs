//! Slot, token and session management.

use tracing::{debug, warn};

use crate::{
    ModuleError, ModuleResult, ModuleResultHelper, SessionHandle, SlotId,
    context::Context,
    core::{
        info::{
            MechanismInfo, SessionFlags, SessionInfo, SlotInfo, TaVersion, TokenInfo, UserType,
            MECHANISM_INFO_SIZE, SESSION_INFO_SIZE, SLOT_INFO_SIZE, TA_VERSION_SIZE,
            TOKEN_INFO_SIZE, TOKEN_LABEL_SIZE, pad_field,
        },
        mechanism::MechanismType,
        serializer::{Serializer, u32_array, wire_len},
    },
    invoke::invoke_out,
    processing::{
        invoke_for_bytes, invoke_for_u32, invoke_with_arguments, invoke_with_input,
        session_arguments,
    },
    shm::SharedBuffer,
    ta::{TA_VERSION_MAJOR, TaCommand},
    transport::{ShmDirection, Transport},
};

fn slot_arguments(slot: SlotId) -> Serializer {
    let mut arguments = Serializer::with_capacity(4);
    arguments.add_u32(slot);
    arguments
}

/// Invoke a command answering a fixed size record.
fn fetch_record<T: Transport, R>(
    ctx: &Context<T>,
    command: TaCommand,
    arguments: &Serializer,
    size: usize,
    parse: impl FnOnce(&[u8]) -> ModuleResult<R>,
) -> ModuleResult<R> {
    let mut ctrl = SharedBuffer::control(ctx.transport(), arguments)?;
    let mut out = SharedBuffer::alloc(ctx.transport(), size, ShmDirection::Output)?;
    invoke_out(ctx, command, Some(&mut ctrl), &mut out)?;
    parse(out.produced()).with_context(|| format!("decoding the {command} record"))
}

/// Query the size of a variable length list, then fetch it.
fn fetch_list<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    arguments: Option<&Serializer>,
) -> ModuleResult<Vec<u32>> {
    let mut size = 0;
    loop {
        let mut ctrl = arguments
            .map(|arguments| SharedBuffer::control(ctx.transport(), arguments))
            .transpose()?;
        let mut out = SharedBuffer::alloc(ctx.transport(), size, ShmDirection::Output)?;
        let required = match invoke_out(ctx, command, ctrl.as_mut(), &mut out) {
            Ok(()) if out.size() <= out.capacity() => return u32_array(out.produced()),
            // a size query may succeed while reporting the list size
            Ok(()) => out.size(),
            Err(ModuleError::BufferTooSmall { required }) => required,
            Err(e) => return Err(e),
        };
        // a list growing between the query and the fetch is not retried
        if size != 0 || required == 0 {
            return Err(ModuleError::BufferTooSmall { required });
        }
        debug!("{command}: fetching {required} bytes");
        size = required;
    }
}

impl<T: Transport> Context<T> {
    /// Check the trusted application answers, returning its version when it
    /// reports one.
    pub fn ping(&self) -> ModuleResult<Option<TaVersion>> {
        self.ensure_initialized()?;
        let mut out = SharedBuffer::alloc(self.transport(), TA_VERSION_SIZE, ShmDirection::Output)?;
        invoke_out(self, TaCommand::Ping, None, &mut out)?;
        match out.size() {
            0 => Ok(None),
            TA_VERSION_SIZE => {
                let version = TaVersion::from_wire(out.produced())?;
                if version.major != u32::from(TA_VERSION_MAJOR) {
                    warn!("trusted application version {version} may not be compatible");
                }
                Ok(Some(version))
            }
            size => Err(ModuleError::DeviceError(format!(
                "ping returned {size} bytes of version"
            ))),
        }
    }

    /// Ids of the slots served by the trusted application.
    pub fn slot_list(&self) -> ModuleResult<Vec<SlotId>> {
        self.ensure_initialized()?;
        fetch_list(self, TaCommand::SlotList, None)
    }

    pub fn slot_info(&self, slot: SlotId) -> ModuleResult<SlotInfo> {
        self.ensure_initialized()?;
        fetch_record(
            self,
            TaCommand::SlotInfo,
            &slot_arguments(slot),
            SLOT_INFO_SIZE,
            SlotInfo::from_wire,
        )
    }

    pub fn token_info(&self, slot: SlotId) -> ModuleResult<TokenInfo> {
        self.ensure_initialized()?;
        fetch_record(
            self,
            TaCommand::TokenInfo,
            &slot_arguments(slot),
            TOKEN_INFO_SIZE,
            TokenInfo::from_wire,
        )
    }

    /// Mechanisms supported by the token of `slot`.
    pub fn mechanism_list(&self, slot: SlotId) -> ModuleResult<Vec<MechanismType>> {
        self.ensure_initialized()?;
        fetch_list(self, TaCommand::MechanismIds, Some(&slot_arguments(slot)))?
            .into_iter()
            .map(|id| {
                MechanismType::try_from(id).map_err(|_| {
                    ModuleError::DeviceError(format!("token reported unknown mechanism {id:#x}"))
                })
            })
            .collect()
    }

    pub fn mechanism_info(
        &self,
        slot: SlotId,
        mechanism_type: MechanismType,
    ) -> ModuleResult<MechanismInfo> {
        self.ensure_initialized()?;
        let mut arguments = slot_arguments(slot);
        arguments.add_u32(mechanism_type.id());
        fetch_record(
            self,
            TaCommand::MechanismInfo,
            &arguments,
            MECHANISM_INFO_SIZE,
            MechanismInfo::from_wire,
        )
    }

    /// (Re)initialize the token of `slot` with a security officer PIN and a
    /// label of at most 32 bytes.
    pub fn init_token(&self, slot: SlotId, so_pin: &[u8], label: &str) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let label = pad_field::<TOKEN_LABEL_SIZE>(label)?;
        let mut arguments = slot_arguments(slot);
        arguments
            .add_u32(wire_len(so_pin.len(), "PIN")?)
            .add_bytes(&label)
            .add_bytes(so_pin);
        invoke_with_arguments(self, TaCommand::InitToken, &arguments)
    }

    /// Set the user PIN, from a security officer session.
    pub fn init_pin(&self, session: SessionHandle, pin: &[u8]) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        arguments.add_sized_bytes(pin, "PIN")?;
        invoke_with_arguments(self, TaCommand::InitPin, &arguments)
    }

    /// Change the PIN of the user logged in `session`.
    pub fn set_pin(&self, session: SessionHandle, old_pin: &[u8], new_pin: &[u8]) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        arguments
            .add_u32(wire_len(old_pin.len(), "old PIN")?)
            .add_u32(wire_len(new_pin.len(), "new PIN")?)
            .add_bytes(old_pin)
            .add_bytes(new_pin);
        invoke_with_arguments(self, TaCommand::SetPin, &arguments)
    }

    pub fn login(&self, session: SessionHandle, user_type: UserType, pin: &[u8]) -> ModuleResult<()> {
        self.ensure_initialized()?;
        let mut arguments = session_arguments(session);
        arguments
            .add_u32(user_type as u32)
            .add_sized_bytes(pin, "PIN")?;
        invoke_with_arguments(self, TaCommand::Login, &arguments)
    }

    pub fn logout(&self, session: SessionHandle) -> ModuleResult<()> {
        self.ensure_initialized()?;
        invoke_with_arguments(self, TaCommand::Logout, &session_arguments(session))
    }

    /// Open a session on the token of `slot`.
    ///
    /// Only serial sessions exist: `flags` must hold `SerialSession` and
    /// nothing but `RwSession` besides it.
    pub fn open_session(&self, slot: SlotId, flags: SessionFlags) -> ModuleResult<SessionHandle> {
        self.ensure_initialized()?;
        if !SessionFlags::all().contains(flags) {
            return Err(ModuleError::BadArguments(format!(
                "invalid session flags {:#x}",
                flags.bits()
            )));
        }
        if !flags.contains(SessionFlags::SerialSession) {
            return Err(ModuleError::SessionParallelNotSupported);
        }
        let command = if flags.contains(SessionFlags::RwSession) {
            TaCommand::OpenRwSession
        } else {
            TaCommand::OpenRoSession
        };
        let session = invoke_for_u32(self, command, &slot_arguments(slot), "a session handle")?;
        debug!("session {session} opened on slot {slot}");
        Ok(session)
    }

    pub fn close_session(&self, session: SessionHandle) -> ModuleResult<()> {
        self.ensure_initialized()?;
        invoke_with_arguments(self, TaCommand::CloseSession, &session_arguments(session))
    }

    pub fn close_all_sessions(&self, slot: SlotId) -> ModuleResult<()> {
        self.ensure_initialized()?;
        invoke_with_arguments(self, TaCommand::CloseAllSessions, &slot_arguments(slot))
    }

    pub fn session_info(&self, session: SessionHandle) -> ModuleResult<SessionInfo> {
        self.ensure_initialized()?;
        fetch_record(
            self,
            TaCommand::SessionInfo,
            &session_arguments(session),
            SESSION_INFO_SIZE,
            SessionInfo::from_wire,
        )
    }

    /// Save the cryptographic operation state of `session` into `state`.
    ///
    /// An empty `state` queries the size of the state.
    pub fn get_operation_state(&self, session: SessionHandle, state: &mut [u8]) -> ModuleResult<usize> {
        self.ensure_initialized()?;
        invoke_for_bytes(
            self,
            TaCommand::GetSessionState,
            &session_arguments(session),
            None,
            state,
        )
    }

    pub fn set_operation_state(&self, session: SessionHandle, state: &[u8]) -> ModuleResult<()> {
        self.ensure_initialized()?;
        invoke_with_input(self, TaCommand::SetSessionState, &session_arguments(session), state)
    }
}
