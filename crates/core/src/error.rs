use std::path::PathBuf;

use thiserror::Error;

use crate::native::Handle;

/// Error type for metadata introspection and dumping.
///
/// A failed name lookup is not an error: lookups return `Option` and callers
/// check for `None`.
#[derive(Debug, Error)]
pub enum MetaError {
    /// A required native handle was null where the model expects an object.
    #[error("Invalid {kind} handle {handle}")]
    InvalidHandle { kind: &'static str, handle: Handle },

    /// The detected VM build maps to no known class-layout strategy.
    #[error("Unsupported VM layout for build {0}")]
    UnsupportedLayout(String),

    /// The VM presented a class table that does not match its detected layout.
    #[error("{layout} class table of image {image} has no class at index {index}")]
    LayoutMismatch { layout: &'static str, image: String, index: u32 },

    /// The VM build identifier could not be parsed.
    #[error("Invalid VM version string: {0}")]
    InvalidVersion(String),

    /// Inflation was requested for a class or method that is not an open generic.
    #[error("{0} is not an open generic definition")]
    NotGeneric(String),

    /// The number of type arguments does not match the generic parameter count.
    #[error("{name} expects {expected} type arguments, got {found}")]
    GenericArity { name: String, expected: u32, found: usize },

    /// The VM does not export an entry point this build is expected to have.
    #[error("VM entry point {0} is not available")]
    MissingExport(&'static str),

    /// Any other failure reported by the native accessor.
    #[error("Native accessor error: {0}")]
    Accessor(String),

    /// A VM snapshot description could not be loaded.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Destination file could not be created, written or flushed.
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience result type for metadata operations.
pub type MetaResult<T> = Result<T, MetaError>;

impl MetaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
