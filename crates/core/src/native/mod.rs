//! Native accessor capability.
//!
//! Everything the object model knows about the VM comes through the
//! [`NativeAccessor`] trait: typed reads of native memory and calls into the
//! VM's exported entry points. Implementations range from a live process
//! reader to the in-memory [`snapshot::SnapshotAccessor`] used by the CLI
//! and tests.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};

pub mod snapshot;

pub use snapshot::{SnapshotAccessor, VmSnapshot};

/// Opaque native address identifying one VM metadata object.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Handle(u64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub const fn new(address: u64) -> Self {
        Self(address)
    }

    pub const fn address(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Reject a null handle where an object of `kind` is required.
    pub fn require(self, kind: &'static str) -> MetaResult<Self> {
        if self.is_null() {
            Err(MetaError::InvalidHandle { kind, handle: self })
        } else {
            Ok(self)
        }
    }

    /// `None` for a null handle.
    pub fn non_null(self) -> Option<Self> {
        (!self.is_null()).then_some(self)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Typed access to VM memory and runtime entry points.
///
/// Calls that return a [`Handle`] may return [`Handle::NULL`]; the entity
/// layer decides whether null is acceptable. Accessors never mutate VM
/// metadata except through `alloc`/`write_bytes` scratch memory and the
/// generic instantiation primitives.
pub trait NativeAccessor {
    /// Size of a native pointer in bytes.
    fn pointer_size(&self) -> usize;
    /// Base address of the module holding the VM's compiled code.
    fn module_base(&self) -> u64;
    /// Build identifier of the VM (e.g. `2019.4.31f1`).
    fn vm_version(&self) -> MetaResult<String>;

    fn alloc(&self, size: usize) -> MetaResult<Handle>;
    fn write_bytes(&self, at: Handle, bytes: &[u8]) -> MetaResult<()>;

    fn domain_get(&self) -> MetaResult<Handle>;
    fn domain_assemblies(&self, domain: Handle) -> MetaResult<Vec<Handle>>;
    fn assembly_image(&self, assembly: Handle) -> MetaResult<Handle>;
    fn corlib(&self) -> MetaResult<Handle>;

    fn image_name(&self, image: Handle) -> MetaResult<String>;
    fn image_class_count(&self, image: Handle) -> MetaResult<u32>;
    fn image_class_start(&self, image: Handle) -> MetaResult<u32>;
    fn image_get_class(&self, image: Handle, index: u32) -> MetaResult<Handle>;
    /// Resolve the class (or element class) described by a type descriptor.
    fn class_from_type(&self, descriptor: Handle) -> MetaResult<Handle>;
    fn class_from_name(&self, image: Handle, namespace: &str, name: &str) -> MetaResult<Handle>;

    fn class_name(&self, class: Handle) -> MetaResult<String>;
    fn class_namespace(&self, class: Handle) -> MetaResult<String>;
    fn class_image(&self, class: Handle) -> MetaResult<Handle>;
    fn class_parent(&self, class: Handle) -> MetaResult<Handle>;
    fn class_declaring_type(&self, class: Handle) -> MetaResult<Handle>;
    fn class_interfaces(&self, class: Handle) -> MetaResult<Vec<Handle>>;
    fn class_fields(&self, class: Handle) -> MetaResult<Vec<Handle>>;
    fn class_methods(&self, class: Handle) -> MetaResult<Vec<Handle>>;
    fn class_type(&self, class: Handle) -> MetaResult<Handle>;
    fn class_flags(&self, class: Handle) -> MetaResult<u32>;
    fn class_is_valuetype(&self, class: Handle) -> MetaResult<bool>;
    fn class_is_enum(&self, class: Handle) -> MetaResult<bool>;
    fn class_is_interface(&self, class: Handle) -> MetaResult<bool>;
    fn class_is_generic(&self, class: Handle) -> MetaResult<bool>;
    fn class_is_inflated(&self, class: Handle) -> MetaResult<bool>;
    fn class_generic_parameter_count(&self, class: Handle) -> MetaResult<u32>;

    fn type_name(&self, ty: Handle) -> MetaResult<String>;
    fn type_enum(&self, ty: Handle) -> MetaResult<u8>;
    fn type_class(&self, ty: Handle) -> MetaResult<Handle>;
    /// Reflection object (`System.Type` instance) for a type.
    fn type_object(&self, ty: Handle) -> MetaResult<Handle>;

    fn field_name(&self, field: Handle) -> MetaResult<String>;
    fn field_type(&self, field: Handle) -> MetaResult<Handle>;
    fn field_offset(&self, field: Handle) -> MetaResult<i32>;
    fn field_flags(&self, field: Handle) -> MetaResult<u32>;

    fn method_name(&self, method: Handle) -> MetaResult<String>;
    fn method_class(&self, method: Handle) -> MetaResult<Handle>;
    fn method_return_type(&self, method: Handle) -> MetaResult<Handle>;
    fn method_flags(&self, method: Handle) -> MetaResult<u32>;
    fn method_parameter_count(&self, method: Handle) -> MetaResult<u32>;
    fn method_parameter_name(&self, method: Handle, index: u32) -> MetaResult<String>;
    fn method_parameter_type(&self, method: Handle, index: u32) -> MetaResult<Handle>;
    fn method_is_generic(&self, method: Handle) -> MetaResult<bool>;
    fn method_is_inflated(&self, method: Handle) -> MetaResult<bool>;
    fn method_generic_parameter_count(&self, method: Handle) -> MetaResult<u32>;
    /// Absolute address of the compiled body, or 0 when there is none.
    fn method_pointer(&self, method: Handle) -> MetaResult<u64>;
    fn method_invoke(&self, method: Handle, instance: Handle, args: &[Handle])
        -> MetaResult<Handle>;

    fn object_class(&self, object: Handle) -> MetaResult<Handle>;
    fn string_chars(&self, string: Handle) -> MetaResult<String>;
    fn array_new(&self, element_class: Handle, length: u32) -> MetaResult<Handle>;
    fn array_length(&self, array: Handle) -> MetaResult<u32>;
    fn array_get(&self, array: Handle, index: u32) -> MetaResult<Handle>;
    fn array_set(&self, array: Handle, index: u32, value: Handle) -> MetaResult<()>;

    /// Close an open generic class over an array of reflection type objects.
    /// The VM materializes the instantiation if it does not exist yet.
    fn class_inflate(&self, class: Handle, type_arguments: Handle) -> MetaResult<Handle>;
    /// Look up an already registered instantiation of a generic method.
    fn method_find_inflated(&self, method: Handle, type_arguments: Handle) -> MetaResult<Handle>;
    /// Synthesize an instantiation without registering it with the VM.
    fn method_inflate_raw(&self, method: Handle, type_arguments: Handle) -> MetaResult<Handle>;
}
