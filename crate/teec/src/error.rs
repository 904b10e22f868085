use cosmian_ckteec::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TeecError {
    #[error("{0}")]
    Default(String),

    #[error("TEE client library: {0}")]
    Library(#[from] libloading::Error),

    #[error("{function} failed with {code:#010x} (origin {origin})")]
    Teec {
        function: &'static str,
        code: u32,
        origin: u32,
    },
}

impl From<TeecError> for TransportError {
    fn from(e: TeecError) -> Self {
        match e {
            TeecError::Teec { code, .. } => crate::transport::transport_error(code),
            TeecError::Default(_) | TeecError::Library(_) => Self::Generic,
        }
    }
}

pub type TeecResult<T> = Result<T, TeecError>;
