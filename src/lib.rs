//! iecsim - a multi-tenant IEC 61850 simulator control plane.
//!
//! A long-running daemon that accepts MessagePack RPC over a Unix domain
//! socket and, in response, instantiates, drives and tears down simulated
//! IEC 61850 servers (IEDs) and outbound client sessions. Every request is
//! scoped to an `instance_id`, so one daemon simulates a fleet of IEDs on
//! disjoint IP aliases and ports while holding several client connections.
//!
//! # Architecture
//! - `ipc`: length-prefixed MessagePack framing and the socket transport
//!   (acceptor + worker pool)
//! - `actions`: request dispatch and the `server.*` / `client.*` handlers
//! - `registry`: the shared backend context owning all instances
//! - `model`: dynamic IED model builder
//! - `iec`: the in-process IEC 61850 simulation stack
//! - `network`: interface enumeration and labeled IP alias management
//! - `config` / `system`: flags, logging, process wiring

pub mod actions;
pub mod config;
pub mod errors;
pub mod iec;
pub mod ipc;
pub mod model;
pub mod network;
pub mod registry;
pub mod system;
