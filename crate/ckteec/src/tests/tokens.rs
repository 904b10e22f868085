use cosmian_pkcs11_sys::{CK_RV, CKR_PIN_INCORRECT, CKR_SESSION_HANDLE_INVALID};
use serial_test::serial;
use tracing::level_filters::LevelFilter;

use super::{initialized_context, mock_ta::{MockTa, SO_PIN, USER_PIN}, open_rw_session};
use crate::{
    Context, ContextConfig, MechanismType, ModuleError, ModuleResult, SessionFlags, SessionState,
    TaCommand, TaStatus, UserType, core::info::CRYPTOKI_VERSION, logging::log_init,
};

#[test]
#[serial]
fn context_lifecycle() -> ModuleResult<()> {
    log_init(LevelFilter::INFO);
    let ctx = Context::new(MockTa::default(), ContextConfig::default());
    assert!(matches!(
        ctx.slot_list(),
        Err(ModuleError::CryptokiNotInitialized)
    ));
    assert!(matches!(
        ctx.finalize(),
        Err(ModuleError::CryptokiNotInitialized)
    ));

    ctx.initialize()?;
    assert!(ctx.is_initialized());
    assert!(ctx.transport().is_open());
    assert!(matches!(
        ctx.initialize(),
        Err(ModuleError::CryptokiAlreadyInitialized)
    ));

    ctx.finalize()?;
    assert!(!ctx.transport().is_open());
    assert!(matches!(
        ctx.open_session(0, SessionFlags::SerialSession),
        Err(ModuleError::CryptokiNotInitialized)
    ));
    assert!(ctx.transport().commands().is_empty());

    // a finalized context can be initialized again
    ctx.initialize()?;
    assert_eq!(ctx.slot_list()?, vec![0]);
    Ok(())
}

#[test]
#[serial]
fn library_info_is_local() -> ModuleResult<()> {
    let ctx = initialized_context();
    let info = ctx.get_info()?;
    assert_eq!(info.cryptoki_version, CRYPTOKI_VERSION);
    assert!(info.manufacturer_id.starts_with(b"Cosmian "));
    assert_eq!(info.library_description.len(), 32);
    assert_eq!(info.flags, 0);
    assert_eq!(info.library_version.to_string(), "0.1");
    assert!(ctx.transport().commands().is_empty());
    Ok(())
}

#[test]
#[serial]
fn ping_reports_the_ta_version() -> ModuleResult<()> {
    let ctx = initialized_context();
    let version = ctx.ping()?.unwrap();
    assert_eq!((version.major, version.minor, version.patch), (0, 1, 0));

    ctx.transport().set_report_version(false);
    assert!(ctx.ping()?.is_none());
    assert!(ctx.transport().shm_balanced());
    Ok(())
}

#[test]
#[serial]
fn slot_list_queries_then_fetches() -> ModuleResult<()> {
    let ctx = initialized_context();
    assert_eq!(ctx.slot_list()?, vec![0]);
    assert_eq!(
        ctx.transport().commands(),
        vec![TaCommand::SlotList.id(), TaCommand::SlotList.id()]
    );
    assert!(ctx.transport().shm_balanced());
    Ok(())
}

#[test]
#[serial]
fn list_size_reported_with_a_success_is_fetched() -> ModuleResult<()> {
    let ctx = initialized_context();
    ctx.transport().report_short_as_success(true);
    assert_eq!(ctx.slot_list()?, vec![0]);
    assert_eq!(
        ctx.transport().commands(),
        vec![TaCommand::SlotList.id(), TaCommand::SlotList.id()]
    );
    let mechanisms = ctx.mechanism_list(0)?;
    assert_eq!(mechanisms.len(), 5);
    assert!(mechanisms.contains(&MechanismType::EcKeyPairGen));
    assert!(ctx.transport().shm_balanced());
    Ok(())
}

#[test]
#[serial]
fn slot_and_token_information() -> ModuleResult<()> {
    let ctx = initialized_context();
    let slot = ctx.slot_info(0)?;
    assert_eq!(slot.description(), "OP-TEE PKCS11 TA");
    assert_eq!(slot.manufacturer(), "Linaro");

    let token = ctx.token_info(0)?;
    assert_eq!(token.manufacturer(), "Linaro");
    assert_eq!(token.max_pin_len, 128);
    assert_eq!(token.min_pin_len, 4);

    assert!(matches!(
        ctx.slot_info(7),
        Err(ModuleError::Ta(TaStatus::SlotIdInvalid))
    ));
    Ok(())
}

#[test]
#[serial]
fn init_token_pads_the_label() -> ModuleResult<()> {
    let ctx = initialized_context();
    ctx.init_token(0, SO_PIN, "my token")?;
    assert_eq!(ctx.token_info(0)?.label(), "my token");

    let ctrl = ctx.transport().last_control(TaCommand::InitToken).unwrap();
    assert_eq!(ctrl.len(), 4 + 4 + 32 + SO_PIN.len());
    assert_eq!(&ctrl[..4], &0_u32.to_ne_bytes());
    assert_eq!(&ctrl[4..8], &u32::try_from(SO_PIN.len())?.to_ne_bytes());
    assert_eq!(&ctrl[8..40], b"my token                        ");
    assert_eq!(&ctrl[40..], SO_PIN);

    let invocations = ctx.transport().commands().len();
    assert!(matches!(
        ctx.init_token(0, SO_PIN, &"x".repeat(33)),
        Err(ModuleError::BadArguments(_))
    ));
    assert_eq!(ctx.transport().commands().len(), invocations);
    Ok(())
}

#[test]
#[serial]
fn mechanism_list_and_info() -> ModuleResult<()> {
    let ctx = initialized_context();
    let mechanisms = ctx.mechanism_list(0)?;
    assert!(mechanisms.contains(&MechanismType::AesCbcPad));
    assert_eq!(mechanisms.len(), 5);

    let info = ctx.mechanism_info(0, MechanismType::AesCbcPad)?;
    assert_eq!((info.min_key_size, info.max_key_size), (128, 256));

    assert!(matches!(
        ctx.mechanism_info(0, MechanismType::Md5),
        Err(ModuleError::Ta(TaStatus::MechanismInvalid))
    ));

    ctx.transport().set_mechanisms(vec![0x0002, 0x8000_0000]);
    assert!(matches!(
        ctx.mechanism_list(0),
        Err(ModuleError::DeviceError(_))
    ));
    assert!(ctx.transport().shm_balanced());
    Ok(())
}

#[test]
#[serial]
fn empty_mechanism_list() -> ModuleResult<()> {
    let ctx = initialized_context();
    ctx.transport().set_mechanisms(Vec::new());
    assert!(ctx.mechanism_list(0)?.is_empty());
    // the query answered the whole list
    assert_eq!(ctx.transport().commands(), vec![TaCommand::MechanismIds.id()]);
    Ok(())
}

#[test]
#[serial]
fn open_session_flags() -> ModuleResult<()> {
    let ctx = initialized_context();
    assert!(matches!(
        ctx.open_session(0, SessionFlags::RwSession),
        Err(ModuleError::SessionParallelNotSupported)
    ));
    assert!(matches!(
        ctx.open_session(0, SessionFlags::from_bits_retain(1 << 2 | 1 << 7)),
        Err(ModuleError::BadArguments(_))
    ));
    assert!(ctx.transport().commands().is_empty());

    let ro = ctx.open_session(0, SessionFlags::SerialSession)?;
    let rw = open_rw_session(&ctx)?;
    assert_ne!(ro, rw);
    assert_eq!(
        ctx.transport().commands(),
        vec![TaCommand::OpenRoSession.id(), TaCommand::OpenRwSession.id()]
    );

    let info = ctx.session_info(ro)?;
    assert_eq!(info.slot_id, 0);
    assert_eq!(info.state(), Some(SessionState::RoPublicSession));
    assert_eq!(info.flags, SessionFlags::SerialSession);
    let info = ctx.session_info(rw)?;
    assert_eq!(info.state(), Some(SessionState::RwPublicSession));
    assert!(info.flags.contains(SessionFlags::RwSession));
    Ok(())
}

#[test]
#[serial]
fn login_and_logout() -> ModuleResult<()> {
    let ctx = initialized_context();
    let session = open_rw_session(&ctx)?;

    let error = ctx.login(session, UserType::User, b"wrong").unwrap_err();
    assert!(matches!(error, ModuleError::Ta(TaStatus::PinIncorrect)));
    assert_eq!(CK_RV::from(error), CKR_PIN_INCORRECT);

    ctx.login(session, UserType::User, USER_PIN)?;
    assert_eq!(
        ctx.session_info(session)?.state(),
        Some(SessionState::RwUserFunctions)
    );
    assert!(matches!(
        ctx.login(session, UserType::User, USER_PIN),
        Err(ModuleError::Ta(TaStatus::UserAlreadyLoggedIn))
    ));

    ctx.set_pin(session, USER_PIN, b"54321")?;
    ctx.logout(session)?;
    assert!(matches!(
        ctx.login(session, UserType::User, USER_PIN),
        Err(ModuleError::Ta(TaStatus::PinIncorrect))
    ));
    ctx.login(session, UserType::User, b"54321")?;
    ctx.logout(session)?;
    assert!(matches!(
        ctx.logout(session),
        Err(ModuleError::Ta(TaStatus::UserNotLoggedIn))
    ));
    assert!(ctx.transport().shm_balanced());
    Ok(())
}

#[test]
#[serial]
fn security_officer_sets_the_user_pin() -> ModuleResult<()> {
    let ctx = initialized_context();
    let session = open_rw_session(&ctx)?;
    assert!(matches!(
        ctx.init_pin(session, b"0000"),
        Err(ModuleError::Ta(TaStatus::UserNotLoggedIn))
    ));
    ctx.login(session, UserType::So, SO_PIN)?;
    assert_eq!(
        ctx.session_info(session)?.state(),
        Some(SessionState::RwSoFunctions)
    );
    ctx.init_pin(session, b"0000")?;
    ctx.logout(session)?;
    ctx.login(session, UserType::User, b"0000")?;
    Ok(())
}

#[test]
#[serial]
fn closing_sessions() -> ModuleResult<()> {
    let ctx = initialized_context();
    let first = open_rw_session(&ctx)?;
    let second = open_rw_session(&ctx)?;
    ctx.close_session(first)?;
    assert!(matches!(
        ctx.close_session(first),
        Err(ModuleError::Ta(TaStatus::SessionHandleInvalid))
    ));
    ctx.session_info(second)?;

    ctx.close_all_sessions(0)?;
    let error = ctx.session_info(second).unwrap_err();
    assert_eq!(CK_RV::from(error), CKR_SESSION_HANDLE_INVALID);
    assert!(ctx.transport().shm_balanced());
    Ok(())
}
