use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compat::{ClassLayout, VmVersion};
use crate::error::{MetaError, MetaResult};

/// Defaults for where a dump is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Destination directory. Defaults to the host's persistent data path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// Destination file base name, without extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Serializable session configuration.
///
/// Typically stored as JSON next to the snapshot or passed with `--config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DumperConfig {
    /// Overrides the build identifier reported by the VM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_version: Option<String>,
    /// Overrides the type-enum byte offset used by the legacy class layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_enum_offset: Option<usize>,
    #[serde(default)]
    pub output: OutputConfig,
}

impl DumperConfig {
    pub fn load(path: &Path) -> MetaResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| MetaError::io(path, e))?;
        serde_json::from_str(&raw)
            .map_err(|e| MetaError::Config(format!("{}: {e}", path.display())))
    }

    /// Resolve the class layout for a VM reporting `reported_version`.
    pub fn resolve_layout(
        &self,
        reported_version: &str,
        pointer_size: usize,
    ) -> MetaResult<(VmVersion, ClassLayout)> {
        let version = VmVersion::parse(self.vm_version.as_deref().unwrap_or(reported_version))?;
        let layout = match ClassLayout::detect(&version, pointer_size)? {
            ClassLayout::Legacy { type_enum_offset } => ClassLayout::Legacy {
                type_enum_offset: self.type_enum_offset.unwrap_or(type_enum_offset),
            },
            ClassLayout::Current => ClassLayout::Current,
        };
        Ok((version, layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_offset_only_affects_legacy() {
        let config = DumperConfig { type_enum_offset: Some(12), ..Default::default() };
        let (_, layout) = config.resolve_layout("2017.4.1f1", 8).unwrap();
        assert_eq!(layout, ClassLayout::Legacy { type_enum_offset: 12 });
        let (_, layout) = config.resolve_layout("2020.1.0f1", 8).unwrap();
        assert_eq!(layout, ClassLayout::Current);
    }

    #[test]
    fn version_override_wins() {
        let config = DumperConfig { vm_version: Some("2017.1.0".into()), ..Default::default() };
        let (version, layout) = config.resolve_layout("2022.3.1f1", 4).unwrap();
        assert_eq!(version, VmVersion::new(2017, 1, 0));
        assert_eq!(layout, ClassLayout::Legacy { type_enum_offset: 6 });
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<DumperConfig>(r#"{"layout": "legacy"}"#);
        assert!(err.is_err());
    }
}
