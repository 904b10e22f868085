use std::{env, path::PathBuf, str::FromStr};

use tracing::{level_filters::LevelFilter, warn};
use uuid::Uuid;

use crate::{ModuleError, ModuleResult, ta::PKCS11_TA_UUID};

pub const ENV_LOGGING_LEVEL: &str = "CKTEEC_LOGGING_LEVEL";
pub const ENV_LOG_HOME: &str = "CKTEEC_LOG_HOME";
pub const ENV_TA_UUID: &str = "CKTEEC_TA_UUID";

/// Name of the log file written in the log home.
pub const LOG_FILE_NAME: &str = "ckteec.log";

/// Identity presented when opening the session with the trusted application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeeLoginMethod {
    #[default]
    Public,
    User,
    Group,
    Application,
}

impl TeeLoginMethod {
    /// GlobalPlatform `TEEC_LOGIN_*` value.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::Public => 0,
            Self::User => 1,
            Self::Group => 2,
            Self::Application => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    pub ta_uuid: Uuid,
    pub login: TeeLoginMethod,
    /// No file logging when `None`.
    pub logging_level: Option<LevelFilter>,
    /// Defaults to `$HOME/.cosmian`.
    pub log_home: Option<PathBuf>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ta_uuid: PKCS11_TA_UUID,
            login: TeeLoginMethod::Public,
            logging_level: None,
            log_home: None,
        }
    }
}

impl ContextConfig {
    /// Default configuration overridden by the `CKTEEC_*` environment variables.
    pub fn from_env() -> ModuleResult<Self> {
        let mut config = Self::default();
        if let Ok(level) = env::var(ENV_LOGGING_LEVEL) {
            match LevelFilter::from_str(&level) {
                Ok(level) => config.logging_level = Some(level),
                Err(e) => warn!("ignoring {ENV_LOGGING_LEVEL}={level}: {e}"),
            }
        }
        if let Ok(log_home) = env::var(ENV_LOG_HOME) {
            config.log_home = Some(PathBuf::from(log_home));
        }
        if let Ok(uuid) = env::var(ENV_TA_UUID) {
            config.ta_uuid = Uuid::parse_str(&uuid).map_err(|e| {
                ModuleError::BadArguments(format!("invalid {ENV_TA_UUID} {uuid:?}: {e}"))
            })?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn default_targets_the_pkcs11_ta() {
        let config = ContextConfig::default();
        assert_eq!(
            config.ta_uuid.to_string(),
            "fd02c9da-306c-48c7-a49c-bbd827ae86ee"
        );
        assert_eq!(config.login.id(), 0);
        assert!(config.logging_level.is_none());
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        unsafe {
            env::set_var(ENV_LOGGING_LEVEL, "debug");
            env::set_var(ENV_LOG_HOME, "/tmp/ckteec");
            env::set_var(ENV_TA_UUID, "00000000-0000-0000-0000-000000000001");
        }
        let config = ContextConfig::from_env().unwrap();
        assert_eq!(config.logging_level, Some(LevelFilter::DEBUG));
        assert_eq!(config.log_home, Some(PathBuf::from("/tmp/ckteec")));
        assert_eq!(config.ta_uuid, Uuid::from_u128(1));

        unsafe {
            env::set_var(ENV_TA_UUID, "not a uuid");
        }
        assert!(matches!(
            ContextConfig::from_env(),
            Err(ModuleError::BadArguments(_))
        ));
        unsafe {
            env::remove_var(ENV_LOGGING_LEVEL);
            env::remove_var(ENV_LOG_HOME);
            env::remove_var(ENV_TA_UUID);
        }
    }
}
