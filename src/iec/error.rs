//! Uniform error type of the simulation stack.
//!
//! Every client/server operation reports one of these; the RPC layer passes
//! the `Display` form through to callers unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum IedError {
    #[error("not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    ConnectionFailed(String),
    #[error("connection rejected by server")]
    ConnectionRejected,
    #[error("request timeout")]
    Timeout,
    #[error("object does not exist")]
    ObjectDoesNotExist,
    #[error("object access unsupported")]
    ObjectAccessUnsupported,
    #[error("type inconsistent")]
    TypeInconsistent,
    #[error("service error: {0}")]
    ServiceError(String),
}
