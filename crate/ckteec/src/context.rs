use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::{
    ModuleError, ModuleResult,
    config::{ContextConfig, LOG_FILE_NAME},
    core::info::{LibraryInfo, Version},
    logging::initialize_logging,
    ta::{TA_VERSION_MAJOR, TA_VERSION_MINOR},
    transport::Transport,
};

/// A library context bound to one transport.
///
/// Every operation of the library is a method of the context, which must be
/// initialized first. Session, object and slot handles are only meaningful
/// for the context that obtained them.
pub struct Context<T: Transport> {
    transport: T,
    config: ContextConfig,
    initialized: AtomicBool,
}

impl<T: Transport> Context<T> {
    pub fn new(transport: T, config: ContextConfig) -> Self {
        Self {
            transport,
            config,
            initialized: AtomicBool::new(false),
        }
    }

    /// Open the transport towards the trusted application.
    pub fn initialize(&self) -> ModuleResult<()> {
        if let Some(level) = self.config.logging_level {
            initialize_logging(LOG_FILE_NAME, self.config.log_home.clone(), level);
        }
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ModuleError::CryptokiAlreadyInitialized);
        }
        if let Err(e) = self.transport.open() {
            self.initialized.store(false, Ordering::Release);
            warn!("cannot open the trusted application {}: {e}", self.config.ta_uuid);
            return Err(ModuleError::FunctionFailed(format!(
                "cannot open the trusted application: {e}"
            )));
        }
        debug!("context initialized on TA {}", self.config.ta_uuid);
        Ok(())
    }

    pub fn finalize(&self) -> ModuleResult<()> {
        if self
            .initialized
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ModuleError::CryptokiNotInitialized);
        }
        self.transport.close();
        debug!("context finalized");
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_initialized(&self) -> ModuleResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ModuleError::CryptokiNotInitialized)
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// General information about the library, answered locally.
    pub fn get_info(&self) -> ModuleResult<LibraryInfo> {
        self.ensure_initialized()?;
        LibraryInfo::local(Version {
            major: TA_VERSION_MAJOR,
            minor: TA_VERSION_MINOR,
        })
    }
}

impl<T: Transport> Drop for Context<T> {
    fn drop(&mut self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            self.transport.close();
        }
    }
}
