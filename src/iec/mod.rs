//! In-process IEC 61850 simulation stack.
//!
//! Provides the collaborator surface the control plane depends on: the
//! dynamic model tree with data sets and control blocks, a server that
//! listens for client sessions on the instance's address, and an outbound
//! client session. Server and client talk a private length-prefixed
//! MessagePack session protocol; the real MMS/GOOSE/SV encodings are out of
//! scope for the simulator.

pub mod client;
pub mod error;
pub mod model;
pub mod server;
pub mod value;
pub mod wire;

pub use client::IedConnection;
pub use error::IedError;
pub use model::{DaType, Fc, IedModel, SharedModel};
pub use server::{ConnectionHandler, IedServer, IedServerConfig};
pub use value::{MmsType, MmsValue};
