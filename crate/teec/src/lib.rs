//! [`Transport`](cosmian_ckteec::Transport) over the GlobalPlatform TEE
//! Client API, loaded at run time from the OP-TEE client library.

pub use error::{TeecError, TeecResult};
pub use teec_lib::TeecLib;
pub use transport::{ENV_TEEC_LIBRARY, TEEC_LIBRARY, TeecTransport, transport_error};

mod error;
mod teec_lib;
mod transport;
