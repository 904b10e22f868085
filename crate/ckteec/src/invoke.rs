//! Generic command invocation.
//!
//! One call maps a command, a control buffer and up to three I/O buffers onto
//! exactly one transport invocation, then interprets the transport outcome,
//! the status word embedded in the control buffer and the output sizes.

use tracing::{debug, error, trace};

use crate::{
    ModuleError, ModuleResult,
    context::Context,
    shm::SharedBuffer,
    ta::{STATUS_WORD_SIZE, TaCommand, TaStatus},
    transport::{Operation, Parameter, Transport, TransportError},
};

fn expose<'b, T: Transport>(buffer: Option<&'b mut SharedBuffer<'_, T>>) -> Parameter<'b> {
    match buffer {
        None => Parameter::None,
        // empty inputs are not exposed, empty outputs are size queries
        Some(buffer) if !buffer.direction().is_output() && buffer.size() == 0 => Parameter::None,
        Some(buffer) => Parameter::MemRef(buffer.memref()),
    }
}

fn update_output<T: Transport>(buffer: Option<&mut SharedBuffer<'_, T>>, size: Option<usize>) {
    if let (Some(buffer), Some(size)) = (buffer, size) {
        if buffer.direction().is_output() {
            buffer.set_size(size);
        }
    }
}

/// Invoke `command` with the control buffer in slot 0 and `io1` to `io3` in
/// slots 1 to 3.
///
/// On `BufferTooSmall`, `required` is the size reported for the first output
/// buffer, whose size is updated as well.
pub(crate) fn invoke_ta<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    mut ctrl: Option<&mut SharedBuffer<'_, T>>,
    mut io1: Option<&mut SharedBuffer<'_, T>>,
    mut io2: Option<&mut SharedBuffer<'_, T>>,
    mut io3: Option<&mut SharedBuffer<'_, T>>,
) -> ModuleResult<()> {
    if let Some(ctrl) = ctrl.as_deref() {
        if command.carries_pin() {
            trace!("{command}: {} bytes of control", ctrl.size());
        } else {
            trace!("{command}: control {}", hex::encode(ctrl.produced()));
        }
    }
    let is_output = [
        false,
        io1.as_deref().is_some_and(|b| b.direction().is_output()),
        io2.as_deref().is_some_and(|b| b.direction().is_output()),
        io3.as_deref().is_some_and(|b| b.direction().is_output()),
    ];

    let mut operation = Operation {
        params: [
            expose(ctrl.as_deref_mut()),
            expose(io1.as_deref_mut()),
            expose(io2.as_deref_mut()),
            expose(io3.as_deref_mut()),
        ],
    };
    let outcome = ctx.transport().invoke(command.id(), &mut operation);
    let sizes = operation.params.each_ref().map(Parameter::size);

    let required = (1..4)
        .find(|slot| is_output[*slot])
        .and_then(|slot| sizes[slot])
        .unwrap_or(0);
    let mut update_outputs = || {
        update_output(io1.as_deref_mut(), sizes[1]);
        update_output(io2.as_deref_mut(), sizes[2]);
        update_output(io3.as_deref_mut(), sizes[3]);
    };

    match outcome {
        Ok(()) => {}
        Err(TransportError::ShortBuffer) => {
            update_outputs();
            debug!("{command}: short buffer, {required} bytes required");
            return Err(ModuleError::BufferTooSmall { required });
        }
        Err(e) => {
            error!("{command}: invocation failed: {e}");
            return Err(e.into());
        }
    }

    // a status word is only present when exactly 4 bytes came back
    let word = match (ctrl.as_deref(), sizes[0]) {
        (Some(ctrl), Some(STATUS_WORD_SIZE)) => {
            let bytes = ctrl.data().get(..STATUS_WORD_SIZE).ok_or_else(|| {
                ModuleError::DeviceError(format!(
                    "{command}: status word does not fit a {} bytes control buffer",
                    ctrl.capacity()
                ))
            })?;
            u32::from_ne_bytes(bytes.try_into()?)
        }
        _ => TaStatus::Ok as u32,
    };
    if word == TaStatus::Ok as u32 || word == TaStatus::BufferTooSmall as u32 {
        update_outputs();
    }
    ModuleError::check_ta_status(word, required).inspect_err(|e| {
        debug!("{command}: {e}");
    })
}

pub(crate) fn invoke_ctrl<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    ctrl: &mut SharedBuffer<'_, T>,
) -> ModuleResult<()> {
    invoke_ta(ctx, command, Some(ctrl), None, None, None)
}

pub(crate) fn invoke_in<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    ctrl: &mut SharedBuffer<'_, T>,
    input: &mut SharedBuffer<'_, T>,
) -> ModuleResult<()> {
    invoke_ta(ctx, command, Some(ctrl), Some(input), None, None)
}

pub(crate) fn invoke_out<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    ctrl: Option<&mut SharedBuffer<'_, T>>,
    output: &mut SharedBuffer<'_, T>,
) -> ModuleResult<()> {
    invoke_ta(ctx, command, ctrl, None, Some(output), None)
}

pub(crate) fn invoke_in_out<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    ctrl: &mut SharedBuffer<'_, T>,
    input: &mut SharedBuffer<'_, T>,
    output: &mut SharedBuffer<'_, T>,
) -> ModuleResult<()> {
    invoke_ta(ctx, command, Some(ctrl), Some(input), Some(output), None)
}

/// Two inputs: slot 2 carries a second input instead of an output.
pub(crate) fn invoke_in_in<T: Transport>(
    ctx: &Context<T>,
    command: TaCommand,
    ctrl: &mut SharedBuffer<'_, T>,
    input1: &mut SharedBuffer<'_, T>,
    input2: &mut SharedBuffer<'_, T>,
) -> ModuleResult<()> {
    invoke_ta(ctx, command, Some(ctrl), Some(input1), Some(input2), None)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        config::ContextConfig,
        transport::{MemRefData, ShmDirection, ShmHandle, TransportResult},
    };

    /// Replays one canned reply per invocation.
    #[derive(Default)]
    struct Scripted {
        reply: Mutex<Reply>,
        seen: Mutex<Vec<(u32, [Option<usize>; 4])>>,
    }

    #[derive(Default, Clone)]
    struct Reply {
        outcome: Option<TransportError>,
        ctrl_size: Option<usize>,
        status: u32,
        output: Vec<u8>,
        output_size: Option<usize>,
    }

    impl Scripted {
        fn replying(reply: Reply) -> Context<Self> {
            let ctx = Context::new(
                Self {
                    reply: Mutex::new(reply),
                    ..Self::default()
                },
                ContextConfig::default(),
            );
            ctx.initialize().unwrap();
            ctx
        }
    }

    impl Transport for Scripted {
        fn open(&self) -> TransportResult<()> {
            Ok(())
        }

        fn close(&self) {}

        fn allocate_shared_memory(
            &self,
            _size: usize,
            _direction: ShmDirection,
        ) -> TransportResult<ShmHandle> {
            Ok(ShmHandle(1))
        }

        fn register_shared_memory(&self, _buffer: &[u8]) -> TransportResult<ShmHandle> {
            Ok(ShmHandle(2))
        }

        fn register_writable_memory(
            &self,
            _buffer: &mut [u8],
            _direction: ShmDirection,
        ) -> TransportResult<ShmHandle> {
            Ok(ShmHandle(3))
        }

        fn release_shared_memory(&self, _handle: ShmHandle) {}

        fn invoke(&self, command: u32, operation: &mut Operation<'_>) -> TransportResult<()> {
            let reply = self.reply.lock().unwrap().clone();
            self.seen
                .lock()
                .unwrap()
                .push((command, operation.params.each_ref().map(Parameter::size)));
            for param in &mut operation.params {
                let Parameter::MemRef(memref) = param else {
                    continue;
                };
                match &mut memref.data {
                    MemRefData::InOut(ctrl) => {
                        if ctrl.len() >= 4 {
                            ctrl[..4].copy_from_slice(&reply.status.to_ne_bytes());
                        }
                        if let Some(size) = reply.ctrl_size {
                            memref.size = size;
                        }
                    }
                    MemRefData::Output(out) => {
                        let len = reply.output.len().min(out.len());
                        out[..len].copy_from_slice(&reply.output[..len]);
                        if let Some(size) = reply.output_size {
                            memref.size = size;
                        }
                    }
                    MemRefData::Input(_) => {}
                }
            }
            reply.outcome.map_or(Ok(()), Err)
        }
    }

    #[test]
    fn status_word_is_read_from_a_4_bytes_control() {
        let ctx = Scripted::replying(Reply {
            ctrl_size: Some(4),
            status: TaStatus::PinIncorrect as u32,
            ..Reply::default()
        });
        let mut ctrl = SharedBuffer::alloc_with(ctx.transport(), &[0; 8], ShmDirection::InOut).unwrap();
        assert!(matches!(
            invoke_ctrl(&ctx, TaCommand::Login, &mut ctrl),
            Err(ModuleError::Ta(TaStatus::PinIncorrect))
        ));
    }

    #[test]
    fn control_of_another_size_means_success() {
        let ctx = Scripted::replying(Reply {
            ctrl_size: Some(8),
            status: TaStatus::PinIncorrect as u32,
            ..Reply::default()
        });
        let mut ctrl = SharedBuffer::alloc_with(ctx.transport(), &[0; 8], ShmDirection::InOut).unwrap();
        invoke_ctrl(&ctx, TaCommand::Login, &mut ctrl).unwrap();
    }

    #[test]
    fn transport_short_buffer_reports_required_size() {
        let ctx = Scripted::replying(Reply {
            outcome: Some(TransportError::ShortBuffer),
            output_size: Some(48),
            ..Reply::default()
        });
        let mut out = SharedBuffer::alloc(ctx.transport(), 0, ShmDirection::Output).unwrap();
        assert!(matches!(
            invoke_out(&ctx, TaCommand::SlotList, None, &mut out),
            Err(ModuleError::BufferTooSmall { required: 48 })
        ));
        assert_eq!(out.size(), 48);
    }

    #[test]
    fn embedded_short_buffer_updates_output() {
        let ctx = Scripted::replying(Reply {
            ctrl_size: Some(4),
            status: TaStatus::BufferTooSmall as u32,
            output_size: Some(32),
            ..Reply::default()
        });
        let mut ctrl = SharedBuffer::alloc_with(ctx.transport(), &[0; 4], ShmDirection::InOut).unwrap();
        let mut out = SharedBuffer::alloc(ctx.transport(), 16, ShmDirection::Output).unwrap();
        assert!(matches!(
            invoke_out(&ctx, TaCommand::EncryptFinal, Some(&mut ctrl), &mut out),
            Err(ModuleError::BufferTooSmall { required: 32 })
        ));
        assert_eq!(out.size(), 32);
    }

    #[test]
    fn outputs_are_not_updated_on_failure() {
        let ctx = Scripted::replying(Reply {
            ctrl_size: Some(4),
            status: TaStatus::OperationNotInitialized as u32,
            output_size: Some(3),
            ..Reply::default()
        });
        let mut ctrl = SharedBuffer::alloc_with(ctx.transport(), &[0; 4], ShmDirection::InOut).unwrap();
        let mut out = SharedBuffer::alloc(ctx.transport(), 16, ShmDirection::Output).unwrap();
        assert!(invoke_out(&ctx, TaCommand::EncryptFinal, Some(&mut ctrl), &mut out).is_err());
        assert_eq!(out.size(), 16);
    }

    #[test]
    fn produced_size_is_reported() {
        let ctx = Scripted::replying(Reply {
            output: b"abc".to_vec(),
            output_size: Some(3),
            ..Reply::default()
        });
        let mut ctrl = SharedBuffer::alloc_with(ctx.transport(), &[0; 4], ShmDirection::InOut).unwrap();
        let mut out = SharedBuffer::alloc(ctx.transport(), 16, ShmDirection::Output).unwrap();
        invoke_out(&ctx, TaCommand::EncryptFinal, Some(&mut ctrl), &mut out).unwrap();
        assert_eq!(out.produced(), b"abc");
    }

    #[test]
    fn empty_inputs_are_not_exposed_but_empty_outputs_are() {
        let ctx = Scripted::replying(Reply::default());
        let mut ctrl = SharedBuffer::alloc_with(ctx.transport(), &[0; 4], ShmDirection::InOut).unwrap();
        let mut input = SharedBuffer::register(ctx.transport(), &[]).unwrap();
        let mut out = SharedBuffer::alloc(ctx.transport(), 0, ShmDirection::Output).unwrap();
        invoke_in_out(&ctx, TaCommand::EncryptUpdate, &mut ctrl, &mut input, &mut out).unwrap();
        let seen = ctx.transport().seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(30, [Some(4), None, Some(0), None])]);
    }

    #[test]
    fn other_transport_failures_are_translated() {
        let ctx = Scripted::replying(Reply {
            outcome: Some(TransportError::TargetDead),
            ..Reply::default()
        });
        let mut ctrl = SharedBuffer::alloc_with(ctx.transport(), &[0; 4], ShmDirection::InOut).unwrap();
        assert!(matches!(
            invoke_ctrl(&ctx, TaCommand::Logout, &mut ctrl),
            Err(ModuleError::Transport(TransportError::TargetDead))
        ));
    }
}
