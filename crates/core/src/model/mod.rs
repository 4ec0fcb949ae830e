//! Runtime metadata object model.
//!
//! Every entity is a non-owning view over a VM handle. Derived values are
//! read through the [`NativeAccessor`](crate::native::NativeAccessor) on
//! first use and cached for the lifetime of the view; clones share the cache.
//! Equality and hashing are by handle.

use std::cell::OnceCell;

use crate::error::MetaResult;

mod assembly;
mod class;
mod domain;
mod field;
mod image;
mod method;
mod object;
mod session;
mod ty;

pub use assembly::Assembly;
pub use class::{Class, ClassKind};
pub use domain::Domain;
pub use field::Field;
pub use image::Image;
pub use method::{Method, Parameter};
pub use object::{Array, Object};
pub use session::Session;
pub use ty::{Type, TypeEnum};

/// Compute-once accessor for a fallible derived field.
pub(crate) fn memo<T>(cell: &OnceCell<T>, init: impl FnOnce() -> MetaResult<T>) -> MetaResult<&T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = init()?;
    Ok(cell.get_or_init(|| value))
}

/// Implements handle-based identity for an entity with an `inner.handle`.
macro_rules! handle_identity {
    ($entity:ident) => {
        impl PartialEq for $entity<'_> {
            fn eq(&self, other: &Self) -> bool {
                self.handle() == other.handle()
            }
        }

        impl Eq for $entity<'_> {}

        impl std::hash::Hash for $entity<'_> {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.handle().hash(state);
            }
        }

        impl std::fmt::Debug for $entity<'_> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($entity), self.handle())
            }
        }
    };
}

pub(crate) use handle_identity;
