use std::cell::OnceCell;

use tracing::debug;

use crate::compat::{ClassLayout, VmVersion};
use crate::config::DumperConfig;
use crate::error::{MetaError, MetaResult};
use crate::model::{memo, Class, Domain, Image};
use crate::native::{Handle, NativeAccessor};

/// One inspection session over a VM.
///
/// Holds the accessor and the class layout selected at attach time. Entities
/// borrow the session, so nothing outlives it.
pub struct Session {
    api: Box<dyn NativeAccessor>,
    version: VmVersion,
    layout: ClassLayout,
    /// Scratch type descriptor for the legacy layout, reused by every image.
    descriptor: OnceCell<Handle>,
    object_class: OnceCell<Handle>,
    type_class: OnceCell<Handle>,
}

impl Session {
    /// Attach with layout detection from the VM's own build identifier.
    pub fn attach(accessor: impl NativeAccessor + 'static) -> MetaResult<Self> {
        Self::from_config(accessor, &DumperConfig::default())
    }

    pub fn from_config(
        accessor: impl NativeAccessor + 'static,
        config: &DumperConfig,
    ) -> MetaResult<Self> {
        let reported = accessor.vm_version()?;
        let (version, layout) = config.resolve_layout(&reported, accessor.pointer_size())?;
        debug!(%version, layout = layout.name(), "attached to VM");
        Ok(Self::with_layout(accessor, version, layout))
    }

    /// Attach with an explicitly chosen layout.
    pub fn with_layout(
        accessor: impl NativeAccessor + 'static,
        version: VmVersion,
        layout: ClassLayout,
    ) -> Self {
        Self {
            api: Box::new(accessor),
            version,
            layout,
            descriptor: OnceCell::new(),
            object_class: OnceCell::new(),
            type_class: OnceCell::new(),
        }
    }

    pub fn api(&self) -> &dyn NativeAccessor {
        self.api.as_ref()
    }

    pub fn version(&self) -> &VmVersion {
        &self.version
    }

    pub fn layout(&self) -> ClassLayout {
        self.layout
    }

    pub fn domain(&self) -> MetaResult<Domain<'_>> {
        Domain::new(self, self.api.domain_get()?)
    }

    pub fn corlib(&self) -> MetaResult<Image<'_>> {
        Image::new(self, self.api.corlib()?)
    }

    /// `System.Object`, the stand-in for any reference type.
    pub fn object_class(&self) -> MetaResult<Class<'_>> {
        let handle = memo(&self.object_class, || self.corlib_class("System", "Object"))?;
        Class::new(self, *handle)
    }

    /// `System.Type`, the element class of type-argument arrays.
    pub fn type_class(&self) -> MetaResult<Class<'_>> {
        let handle = memo(&self.type_class, || self.corlib_class("System", "Type"))?;
        Class::new(self, *handle)
    }

    fn corlib_class(&self, namespace: &str, name: &str) -> MetaResult<Handle> {
        let corlib = self.api.corlib()?.require("corlib image")?;
        self.api.class_from_name(corlib, namespace, name)?.require("corlib class")
    }

    /// Scratch buffer for legacy class resolution, allocated on first use.
    pub(crate) fn class_descriptor(&self) -> MetaResult<Handle> {
        let size = self.layout.descriptor_size(self.api.pointer_size());
        if size == 0 {
            return Err(MetaError::Accessor(
                "type descriptors are only used by the legacy layout".into(),
            ));
        }
        memo(&self.descriptor, || self.api.alloc(size)?.require("descriptor")).copied()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("version", &self.version)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
