//! Translation of wire-level model descriptions into live IED model trees.

mod builder;

pub use builder::{build_model, BuiltModel};
