use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;
use vmscope_core::config::DumperConfig;
use vmscope_core::model::Session;
use vmscope_core::native::SnapshotAccessor;

/// Canonicalize a path if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(root: &str) -> Result<PathBuf> {
    let path = Path::new(root);
    if path == Path::new(".") {
        Ok(env::current_dir().context("Failed to get current directory")?)
    } else {
        // Paths that do not exist yet (e.g. a fresh output dir) are joined
        // with the current dir instead.
        match path.canonicalize() {
            Ok(p) => Ok(p),
            Err(_) => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                Ok(cwd.join(path))
            }
        }
    }
}

/// Load the dumper config from `path`, or the defaults when none is given.
pub fn load_config(path: Option<&str>) -> Result<DumperConfig> {
    match path {
        Some(path) => DumperConfig::load(Path::new(path))
            .with_context(|| format!("Failed to load config from {path}")),
        None => Ok(DumperConfig::default()),
    }
}

/// Attach a session to the VM described by the snapshot at `snapshot`.
pub fn open_session(snapshot: &str, config: &DumperConfig) -> Result<Session> {
    let accessor = SnapshotAccessor::from_path(Path::new(snapshot))
        .with_context(|| format!("Failed to load VM snapshot from {snapshot}"))?;
    debug!(snapshot, "loaded VM snapshot");
    Session::from_config(accessor, config)
        .with_context(|| format!("Failed to attach to VM described by {snapshot}"))
}
