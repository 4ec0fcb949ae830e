//! vmscope-core
//!
//! Core library for introspecting the runtime metadata of a managed-code VM
//! embedded in a host process.
//!
//! The VM's own structures are read through a [`native::NativeAccessor`] and
//! wrapped into a navigable object model (domain, assemblies, images,
//! classes, methods, types). Generic definitions can be closed through the
//! [`services::generics`] resolver, and the whole model can be serialized to
//! disk with the [`services::dump`] pipeline.
//!
//! All substantive logic lives here so it is testable without a live
//! process; the CLI is a thin frontend.

pub mod compat;
pub mod config;
pub mod error;
pub mod model;
pub mod native;
pub mod services;

pub use error::{MetaError, MetaResult};

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
