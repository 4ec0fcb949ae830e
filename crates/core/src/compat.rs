//! VM build detection and class-table layout selection.
//!
//! The layout is chosen once per session from the VM build identifier and is
//! never re-evaluated. There is no runtime fallback between strategies: a VM
//! that presents the other layout is reported as corrupted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};
use crate::model::Type;

/// Oldest build the legacy class-range strategy understands.
pub const OLDEST_SUPPORTED: VmVersion = VmVersion::new(5, 3, 0);

/// First build exposing the per-image class accessor.
pub const CURRENT_LAYOUT_SINCE: VmVersion = VmVersion::new(2018, 3, 0);

/// Parsed VM build identifier, e.g. `2019.4.31f1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Release suffix such as `f1` or `p3`, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl VmVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch, suffix: None }
    }

    pub fn parse(raw: &str) -> MetaResult<Self> {
        let invalid = || MetaError::InvalidVersion(raw.to_string());
        let trimmed = raw.trim();
        let mut parts = trimmed.splitn(3, '.');

        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let minor = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;

        let (patch, suffix) = match parts.next() {
            None => (0, None),
            Some(rest) => {
                let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
                if digits_end == 0 {
                    return Err(invalid());
                }
                let patch = rest[..digits_end].parse().map_err(|_| invalid())?;
                let suffix = &rest[digits_end..];
                (patch, (!suffix.is_empty()).then(|| suffix.to_string()))
            }
        };

        Ok(Self { major, minor, patch, suffix })
    }

    fn key(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }

    pub fn is_below(&self, other: &VmVersion) -> bool {
        self.key() < other.key()
    }
}

impl FromStr for VmVersion {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(suffix) = &self.suffix {
            f.write_str(suffix)?;
        }
        Ok(())
    }
}

/// Strategy for locating the classes owned by an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ClassLayout {
    /// Classes occupy `[class_start, class_start + class_count)` in the
    /// global class table and are resolved through a synthesized type
    /// descriptor whose type-enum byte lives at `type_enum_offset`.
    Legacy { type_enum_offset: usize },
    /// Classes are fetched one at a time with the per-image accessor.
    Current,
}

impl ClassLayout {
    /// Select the layout for a detected build.
    pub fn detect(version: &VmVersion, pointer_size: usize) -> MetaResult<Self> {
        if version.is_below(&OLDEST_SUPPORTED) {
            return Err(MetaError::UnsupportedLayout(version.to_string()));
        }
        if version.is_below(&CURRENT_LAYOUT_SINCE) {
            Ok(Self::Legacy { type_enum_offset: Type::type_enum_offset(pointer_size) })
        } else {
            Ok(Self::Current)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Legacy { .. } => "legacy",
            Self::Current => "current",
        }
    }

    /// Size of the scratch descriptor used by the legacy strategy: room for
    /// the pointer-sized index and the type-enum byte, pointer aligned.
    pub fn descriptor_size(&self, pointer_size: usize) -> usize {
        match self {
            Self::Legacy { type_enum_offset } => {
                let needed = (type_enum_offset + 1).max(pointer_size);
                needed.div_ceil(pointer_size) * pointer_size
            }
            Self::Current => 0,
        }
    }
}
