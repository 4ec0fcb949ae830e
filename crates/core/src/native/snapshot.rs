//! In-memory VM backed by a serialized description.
//!
//! A [`VmSnapshot`] lists assemblies, classes, fields and methods the way a
//! VM would report them. [`SnapshotAccessor`] lays the description out as an
//! arena of native-looking handles and answers every [`NativeAccessor`] call
//! from it, including legacy type-descriptor resolution through scratch
//! memory and generic instantiation.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compat::{VmVersion, CURRENT_LAYOUT_SINCE};
use crate::error::{MetaError, MetaResult};
use crate::model::{Type, TypeEnum};
use crate::native::{Handle, NativeAccessor};

const HANDLE_BASE: u64 = 0x1000_0000;
const HANDLE_STRIDE: u64 = 0x40;
const SCRATCH_BASE: u64 = 0x7f00_0000_0000;
const SCRATCH_ALIGN: u64 = 0x10;

const CORLIB_IMAGE: &str = "mscorlib.dll";

const TYPE_ATTRIBUTE_INTERFACE: u32 = 0x0020;
const TYPE_ATTRIBUTE_ABSTRACT: u32 = 0x0080;
const TYPE_ATTRIBUTE_SEALED: u32 = 0x0100;
const METHOD_ATTRIBUTE_STATIC: u32 = 0x0010;
const METHOD_ATTRIBUTE_VIRTUAL: u32 = 0x0040;
const METHOD_ATTRIBUTE_ABSTRACT: u32 = 0x0400;
const FIELD_ATTRIBUTE_STATIC: u32 = 0x0010;
const FIELD_ATTRIBUTE_INIT_ONLY: u32 = 0x0020;
const FIELD_ATTRIBUTE_LITERAL: u32 = 0x0040;

fn default_pointer_size() -> usize {
    8
}

fn default_return_type() -> String {
    "System.Void".to_string()
}

/// Serialized description of a VM's loaded metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmSnapshot {
    /// Build identifier reported by the VM.
    pub vm_version: String,
    #[serde(default = "default_pointer_size")]
    pub pointer_size: usize,
    /// Base address of the module holding compiled code.
    #[serde(default)]
    pub module_base: u64,
    /// Assemblies in registration order.
    #[serde(default)]
    pub assemblies: Vec<AssemblyDesc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssemblyDesc {
    /// Image file name, e.g. `Assembly-CSharp.dll`.
    pub image: String,
    #[serde(default)]
    pub classes: Vec<ClassDesc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKindDesc {
    #[default]
    Class,
    Struct,
    Enum,
    Interface,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassDesc {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub kind: ClassKindDesc,
    /// Names of the class's own type parameters; non-empty for open generics.
    #[serde(default)]
    pub generic_parameters: Vec<String>,
    /// Full name of the base class. Classes default to `System.Object`.
    #[serde(default)]
    pub parent: Option<String>,
    /// Full name of the enclosing class for nested classes.
    #[serde(default)]
    pub declaring_type: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_sealed: bool,
    #[serde(default)]
    pub fields: Vec<FieldDesc>,
    #[serde(default)]
    pub methods: Vec<MethodDesc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default)]
    pub is_literal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// An instantiation of a generic method the VM already compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstantiationDesc {
    pub arguments: Vec<String>,
    pub address: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDesc {
    pub name: String,
    #[serde(default = "default_return_type")]
    pub return_type: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDesc>,
    #[serde(default)]
    pub generic_parameters: Vec<String>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub is_abstract: bool,
    /// Absolute address of the compiled body. For generic methods, the
    /// address of the shared reference-type instantiation.
    #[serde(default)]
    pub address: Option<u64>,
    #[serde(default)]
    pub instantiations: Vec<InstantiationDesc>,
    /// String returned when the method is invoked.
    #[serde(default)]
    pub result: Option<String>,
}

impl VmSnapshot {
    /// Load a snapshot from JSON, or YAML for `.yaml`/`.yml` files.
    pub fn from_path(path: &Path) -> MetaResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| MetaError::io(path, e))?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            serde_yaml::from_str(&raw)
                .map_err(|e| MetaError::Snapshot(format!("{}: {e}", path.display())))
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| MetaError::Snapshot(format!("{}: {e}", path.display())))
        }
    }
}

#[derive(Debug, Clone)]
struct ImageNode {
    name: String,
    classes: Vec<Handle>,
    class_start: u32,
}

#[derive(Debug, Clone)]
struct ClassNode {
    name: String,
    namespace: String,
    full_name: String,
    image: Handle,
    parent: Handle,
    declaring: Handle,
    interfaces: Vec<Handle>,
    fields: Vec<Handle>,
    methods: Vec<Handle>,
    ty: Handle,
    flags: u32,
    kind: ClassKindDesc,
    generic_parameters: Vec<String>,
    generic_definition: Handle,
}

#[derive(Debug, Clone)]
struct TypeNode {
    name: String,
    type_enum: TypeEnum,
    class: Handle,
    object: Handle,
}

#[derive(Debug, Clone)]
struct FieldNode {
    name: String,
    ty: Handle,
    offset: i32,
    flags: u32,
}

#[derive(Debug, Clone)]
struct MethodNode {
    name: String,
    class: Handle,
    return_type: Handle,
    parameters: Vec<(String, Handle)>,
    flags: u32,
    generic_parameters: Vec<String>,
    inflated: bool,
    address: Option<u64>,
    instantiations: Vec<InstantiationDesc>,
    result: Option<String>,
}

#[derive(Debug, Clone)]
enum ObjectNode {
    TypeObject(Handle),
    String(String),
    Array { element_class: Handle, items: Vec<Handle> },
}

#[derive(Debug, Clone)]
enum Node {
    Domain,
    Assembly(Handle),
    Image(ImageNode),
    Class(ClassNode),
    Type(TypeNode),
    Field(FieldNode),
    Method(MethodNode),
    Object(ObjectNode),
}

#[derive(Debug, Default)]
struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    fn push(&mut self, node: Node) -> Handle {
        let handle = Handle::new(HANDLE_BASE + self.nodes.len() as u64 * HANDLE_STRIDE);
        self.nodes.push(node);
        handle
    }

    fn index(handle: Handle) -> Option<usize> {
        let offset = handle.address().checked_sub(HANDLE_BASE)?;
        (offset % HANDLE_STRIDE == 0).then(|| (offset / HANDLE_STRIDE) as usize)
    }

    fn get(&self, handle: Handle) -> Option<&Node> {
        self.nodes.get(Self::index(handle)?)
    }

    fn get_mut(&mut self, handle: Handle) -> Option<&mut Node> {
        let index = Self::index(handle)?;
        self.nodes.get_mut(index)
    }

    fn image(&self, handle: Handle) -> MetaResult<&ImageNode> {
        match self.get(handle) {
            Some(Node::Image(image)) => Ok(image),
            _ => Err(unknown(handle, "image")),
        }
    }

    fn class(&self, handle: Handle) -> MetaResult<&ClassNode> {
        match self.get(handle) {
            Some(Node::Class(class)) => Ok(class),
            _ => Err(unknown(handle, "class")),
        }
    }

    fn class_mut(&mut self, handle: Handle) -> MetaResult<&mut ClassNode> {
        match self.get_mut(handle) {
            Some(Node::Class(class)) => Ok(class),
            _ => Err(unknown(handle, "class")),
        }
    }

    fn ty(&self, handle: Handle) -> MetaResult<&TypeNode> {
        match self.get(handle) {
            Some(Node::Type(ty)) => Ok(ty),
            _ => Err(unknown(handle, "type")),
        }
    }

    fn field(&self, handle: Handle) -> MetaResult<&FieldNode> {
        match self.get(handle) {
            Some(Node::Field(field)) => Ok(field),
            _ => Err(unknown(handle, "field")),
        }
    }

    fn method(&self, handle: Handle) -> MetaResult<&MethodNode> {
        match self.get(handle) {
            Some(Node::Method(method)) => Ok(method),
            _ => Err(unknown(handle, "method")),
        }
    }

    fn object(&self, handle: Handle) -> MetaResult<&ObjectNode> {
        match self.get(handle) {
            Some(Node::Object(object)) => Ok(object),
            _ => Err(unknown(handle, "object")),
        }
    }

    fn object_mut(&mut self, handle: Handle) -> MetaResult<&mut ObjectNode> {
        match self.get_mut(handle) {
            Some(Node::Object(object)) => Ok(object),
            _ => Err(unknown(handle, "object")),
        }
    }

    /// Replace open type parameters with the matching type arguments.
    fn substitute(
        &self,
        ty: Handle,
        class: (&[String], &[Handle]),
        method: (&[String], &[Handle]),
    ) -> Handle {
        let Ok(node) = self.ty(ty) else { return ty };
        let (names, arguments) = match node.type_enum {
            TypeEnum::Var => class,
            TypeEnum::MVar => method,
            _ => return ty,
        };
        names
            .iter()
            .position(|name| *name == node.name)
            .and_then(|index| arguments.get(index).copied())
            .unwrap_or(ty)
    }
}

fn unknown(handle: Handle, kind: &str) -> MetaError {
    MetaError::Accessor(format!("{handle} is not a known {kind}"))
}

/// Well-known corlib classes the accessor needs for object bookkeeping.
#[derive(Debug, Default, Clone, Copy)]
struct WellKnown {
    object: Handle,
    value_type: Handle,
    enumeration: Handle,
    type_class: Handle,
    string: Handle,
}

/// [`NativeAccessor`] over a [`VmSnapshot`].
#[derive(Debug)]
pub struct SnapshotAccessor {
    vm_version: String,
    legacy: bool,
    pointer_size: usize,
    module_base: u64,
    domain: Handle,
    assemblies: Vec<Handle>,
    corlib: Handle,
    global_classes: Vec<Handle>,
    well_known: WellKnown,
    arena: RefCell<Arena>,
    class_instances: RefCell<HashMap<(Handle, Vec<Handle>), Handle>>,
    method_instances: RefCell<HashMap<(Handle, Vec<Handle>), Handle>>,
    scratch: RefCell<HashMap<u64, Vec<u8>>>,
    next_scratch: Cell<u64>,
}

impl SnapshotAccessor {
    pub fn new(snapshot: VmSnapshot) -> MetaResult<Self> {
        if !matches!(snapshot.pointer_size, 4 | 8) {
            return Err(MetaError::Snapshot(format!(
                "unsupported pointer size {}",
                snapshot.pointer_size
            )));
        }
        let legacy = VmVersion::parse(&snapshot.vm_version)
            .map(|version| version.is_below(&CURRENT_LAYOUT_SINCE))
            .unwrap_or(false);
        let loaded = Loader::default().load(&snapshot)?;
        debug!(
            assemblies = loaded.assemblies.len(),
            classes = loaded.global_classes.len(),
            legacy,
            "snapshot loaded"
        );

        Ok(Self {
            vm_version: snapshot.vm_version,
            legacy,
            pointer_size: snapshot.pointer_size,
            module_base: snapshot.module_base,
            domain: loaded.domain,
            assemblies: loaded.assemblies,
            corlib: loaded.corlib,
            global_classes: loaded.global_classes,
            well_known: loaded.well_known,
            arena: RefCell::new(loaded.arena),
            class_instances: RefCell::new(HashMap::new()),
            method_instances: RefCell::new(HashMap::new()),
            scratch: RefCell::new(HashMap::new()),
            next_scratch: Cell::new(SCRATCH_BASE),
        })
    }

    pub fn from_path(path: &Path) -> MetaResult<Self> {
        Self::new(VmSnapshot::from_path(path)?)
    }

    fn arena(&self) -> Ref<'_, Arena> {
        self.arena.borrow()
    }

    fn arena_mut(&self) -> RefMut<'_, Arena> {
        self.arena.borrow_mut()
    }

    /// Type handles carried by an array of reflection type objects.
    fn type_arguments(&self, array: Handle) -> MetaResult<Vec<Handle>> {
        let arena = self.arena();
        let ObjectNode::Array { items, .. } = arena.object(array)? else {
            return Err(MetaError::Accessor(format!("{array} is not an array")));
        };
        items
            .iter()
            .map(|item| match arena.object(*item)? {
                ObjectNode::TypeObject(ty) => Ok(*ty),
                _ => Err(MetaError::Accessor(format!("{item} is not a type object"))),
            })
            .collect()
    }

    fn new_string(&self, value: String) -> Handle {
        self.arena_mut().push(Node::Object(ObjectNode::String(value)))
    }

    /// Register a closed copy of generic method `method` on `arena`.
    fn push_method_instance(
        arena: &mut Arena,
        method: Handle,
        arguments: &[Handle],
        address: Option<u64>,
    ) -> MetaResult<Handle> {
        let definition = arena.method(method)?.clone();
        let scope = (definition.generic_parameters.as_slice(), arguments);
        let return_type = arena.substitute(definition.return_type, (&[], &[]), scope);
        let parameters = definition
            .parameters
            .iter()
            .map(|(name, ty)| (name.clone(), arena.substitute(*ty, (&[], &[]), scope)))
            .collect();
        Ok(arena.push(Node::Method(MethodNode {
            return_type,
            parameters,
            generic_parameters: Vec::new(),
            inflated: true,
            address,
            instantiations: Vec::new(),
            ..definition
        })))
    }
}

impl NativeAccessor for SnapshotAccessor {
    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn module_base(&self) -> u64 {
        self.module_base
    }

    fn vm_version(&self) -> MetaResult<String> {
        Ok(self.vm_version.clone())
    }

    fn alloc(&self, size: usize) -> MetaResult<Handle> {
        let address = self.next_scratch.get();
        let reserved = (size as u64).max(1).div_ceil(SCRATCH_ALIGN) * SCRATCH_ALIGN;
        self.next_scratch.set(address + reserved);
        self.scratch.borrow_mut().insert(address, vec![0; size]);
        Ok(Handle::new(address))
    }

    fn write_bytes(&self, at: Handle, bytes: &[u8]) -> MetaResult<()> {
        let mut scratch = self.scratch.borrow_mut();
        let buffer = scratch
            .get_mut(&at.address())
            .ok_or_else(|| MetaError::Accessor(format!("{at} is not allocated scratch memory")))?;
        if bytes.len() > buffer.len() {
            return Err(MetaError::Accessor(format!(
                "write of {} bytes overflows {}-byte buffer at {at}",
                bytes.len(),
                buffer.len()
            )));
        }
        buffer[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn domain_get(&self) -> MetaResult<Handle> {
        Ok(self.domain)
    }

    fn domain_assemblies(&self, domain: Handle) -> MetaResult<Vec<Handle>> {
        if domain != self.domain {
            return Err(unknown(domain, "domain"));
        }
        Ok(self.assemblies.clone())
    }

    fn assembly_image(&self, assembly: Handle) -> MetaResult<Handle> {
        match self.arena().get(assembly) {
            Some(Node::Assembly(image)) => Ok(*image),
            _ => Err(unknown(assembly, "assembly")),
        }
    }

    fn corlib(&self) -> MetaResult<Handle> {
        Ok(self.corlib)
    }

    fn image_name(&self, image: Handle) -> MetaResult<String> {
        Ok(self.arena().image(image)?.name.clone())
    }

    fn image_class_count(&self, image: Handle) -> MetaResult<u32> {
        Ok(self.arena().image(image)?.classes.len() as u32)
    }

    fn image_class_start(&self, image: Handle) -> MetaResult<u32> {
        let start = self.arena().image(image)?.class_start;
        Ok(if self.legacy { start } else { 0 })
    }

    fn image_get_class(&self, image: Handle, index: u32) -> MetaResult<Handle> {
        if self.legacy {
            return Err(MetaError::MissingExport("il2cpp_image_get_class"));
        }
        let arena = self.arena();
        Ok(arena.image(image)?.classes.get(index as usize).copied().unwrap_or(Handle::NULL))
    }

    fn class_from_type(&self, descriptor: Handle) -> MetaResult<Handle> {
        if let Some(Node::Type(ty)) = self.arena().get(descriptor) {
            return Ok(ty.class);
        }

        let scratch = self.scratch.borrow();
        let bytes = scratch
            .get(&descriptor.address())
            .ok_or_else(|| unknown(descriptor, "type descriptor"))?;
        let type_enum_at = Type::type_enum_offset(self.pointer_size);
        let (Some(index_bytes), Some(&raw_enum)) =
            (bytes.get(..self.pointer_size), bytes.get(type_enum_at))
        else {
            return Ok(Handle::NULL);
        };
        if !matches!(TypeEnum::from_raw(raw_enum), TypeEnum::Class | TypeEnum::ValueType) {
            return Ok(Handle::NULL);
        }

        let mut index = [0u8; 8];
        index[..self.pointer_size].copy_from_slice(index_bytes);
        let index = u64::from_le_bytes(index);
        Ok(usize::try_from(index)
            .ok()
            .and_then(|index| self.global_classes.get(index).copied())
            .unwrap_or(Handle::NULL))
    }

    fn class_from_name(&self, image: Handle, namespace: &str, name: &str) -> MetaResult<Handle> {
        let arena = self.arena();
        for class in &arena.image(image)?.classes {
            let node = arena.class(*class)?;
            if node.namespace == namespace && node.name == name {
                return Ok(*class);
            }
        }
        Ok(Handle::NULL)
    }

    fn class_name(&self, class: Handle) -> MetaResult<String> {
        Ok(self.arena().class(class)?.name.clone())
    }

    fn class_namespace(&self, class: Handle) -> MetaResult<String> {
        Ok(self.arena().class(class)?.namespace.clone())
    }

    fn class_image(&self, class: Handle) -> MetaResult<Handle> {
        Ok(self.arena().class(class)?.image)
    }

    fn class_parent(&self, class: Handle) -> MetaResult<Handle> {
        Ok(self.arena().class(class)?.parent)
    }

    fn class_declaring_type(&self, class: Handle) -> MetaResult<Handle> {
        Ok(self.arena().class(class)?.declaring)
    }

    fn class_interfaces(&self, class: Handle) -> MetaResult<Vec<Handle>> {
        Ok(self.arena().class(class)?.interfaces.clone())
    }

    fn class_fields(&self, class: Handle) -> MetaResult<Vec<Handle>> {
        Ok(self.arena().class(class)?.fields.clone())
    }

    fn class_methods(&self, class: Handle) -> MetaResult<Vec<Handle>> {
        Ok(self.arena().class(class)?.methods.clone())
    }

    fn class_type(&self, class: Handle) -> MetaResult<Handle> {
        Ok(self.arena().class(class)?.ty)
    }

    fn class_flags(&self, class: Handle) -> MetaResult<u32> {
        Ok(self.arena().class(class)?.flags)
    }

    fn class_is_valuetype(&self, class: Handle) -> MetaResult<bool> {
        let kind = self.arena().class(class)?.kind;
        Ok(matches!(kind, ClassKindDesc::Struct | ClassKindDesc::Enum))
    }

    fn class_is_enum(&self, class: Handle) -> MetaResult<bool> {
        Ok(self.arena().class(class)?.kind == ClassKindDesc::Enum)
    }

    fn class_is_interface(&self, class: Handle) -> MetaResult<bool> {
        Ok(self.arena().class(class)?.kind == ClassKindDesc::Interface)
    }

    fn class_is_generic(&self, class: Handle) -> MetaResult<bool> {
        let arena = self.arena();
        let node = arena.class(class)?;
        Ok(!node.generic_parameters.is_empty() && node.generic_definition.is_null())
    }

    fn class_is_inflated(&self, class: Handle) -> MetaResult<bool> {
        Ok(!self.arena().class(class)?.generic_definition.is_null())
    }

    fn class_generic_parameter_count(&self, class: Handle) -> MetaResult<u32> {
        Ok(self.arena().class(class)?.generic_parameters.len() as u32)
    }

    fn type_name(&self, ty: Handle) -> MetaResult<String> {
        Ok(self.arena().ty(ty)?.name.clone())
    }

    fn type_enum(&self, ty: Handle) -> MetaResult<u8> {
        Ok(self.arena().ty(ty)?.type_enum.raw())
    }

    fn type_class(&self, ty: Handle) -> MetaResult<Handle> {
        Ok(self.arena().ty(ty)?.class)
    }

    fn type_object(&self, ty: Handle) -> MetaResult<Handle> {
        let mut arena = self.arena_mut();
        let existing = arena.ty(ty)?.object;
        if !existing.is_null() {
            return Ok(existing);
        }
        let object = arena.push(Node::Object(ObjectNode::TypeObject(ty)));
        if let Some(Node::Type(node)) = arena.get_mut(ty) {
            node.object = object;
        }
        Ok(object)
    }

    fn field_name(&self, field: Handle) -> MetaResult<String> {
        Ok(self.arena().field(field)?.name.clone())
    }

    fn field_type(&self, field: Handle) -> MetaResult<Handle> {
        Ok(self.arena().field(field)?.ty)
    }

    fn field_offset(&self, field: Handle) -> MetaResult<i32> {
        Ok(self.arena().field(field)?.offset)
    }

    fn field_flags(&self, field: Handle) -> MetaResult<u32> {
        Ok(self.arena().field(field)?.flags)
    }

    fn method_name(&self, method: Handle) -> MetaResult<String> {
        Ok(self.arena().method(method)?.name.clone())
    }

    fn method_class(&self, method: Handle) -> MetaResult<Handle> {
        Ok(self.arena().method(method)?.class)
    }

    fn method_return_type(&self, method: Handle) -> MetaResult<Handle> {
        Ok(self.arena().method(method)?.return_type)
    }

    fn method_flags(&self, method: Handle) -> MetaResult<u32> {
        Ok(self.arena().method(method)?.flags)
    }

    fn method_parameter_count(&self, method: Handle) -> MetaResult<u32> {
        Ok(self.arena().method(method)?.parameters.len() as u32)
    }

    fn method_parameter_name(&self, method: Handle, index: u32) -> MetaResult<String> {
        let arena = self.arena();
        arena
            .method(method)?
            .parameters
            .get(index as usize)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| MetaError::Accessor(format!("{method} has no parameter {index}")))
    }

    fn method_parameter_type(&self, method: Handle, index: u32) -> MetaResult<Handle> {
        let arena = self.arena();
        arena
            .method(method)?
            .parameters
            .get(index as usize)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| MetaError::Accessor(format!("{method} has no parameter {index}")))
    }

    fn method_is_generic(&self, method: Handle) -> MetaResult<bool> {
        Ok(!self.arena().method(method)?.generic_parameters.is_empty())
    }

    fn method_is_inflated(&self, method: Handle) -> MetaResult<bool> {
        Ok(self.arena().method(method)?.inflated)
    }

    fn method_generic_parameter_count(&self, method: Handle) -> MetaResult<u32> {
        Ok(self.arena().method(method)?.generic_parameters.len() as u32)
    }

    fn method_pointer(&self, method: Handle) -> MetaResult<u64> {
        let arena = self.arena();
        let node = arena.method(method)?;
        let open_class = arena.class(node.class).map(|class| {
            !class.generic_parameters.is_empty() && class.generic_definition.is_null()
        })?;
        if open_class || !node.generic_parameters.is_empty() {
            return Ok(0);
        }
        Ok(node.address.unwrap_or(0))
    }

    fn method_invoke(
        &self,
        method: Handle,
        _instance: Handle,
        _args: &[Handle],
    ) -> MetaResult<Handle> {
        let result = self.arena().method(method)?.result.clone();
        Ok(result.map(|value| self.new_string(value)).unwrap_or(Handle::NULL))
    }

    fn object_class(&self, object: Handle) -> MetaResult<Handle> {
        Ok(match self.arena().object(object)? {
            ObjectNode::TypeObject(_) => self.well_known.type_class,
            ObjectNode::String(_) => self.well_known.string,
            ObjectNode::Array { element_class, .. } => *element_class,
        })
    }

    fn string_chars(&self, string: Handle) -> MetaResult<String> {
        match self.arena().object(string)? {
            ObjectNode::String(value) => Ok(value.clone()),
            _ => Err(MetaError::Accessor(format!("{string} is not a string"))),
        }
    }

    fn array_new(&self, element_class: Handle, length: u32) -> MetaResult<Handle> {
        let mut arena = self.arena_mut();
        arena.class(element_class)?;
        Ok(arena.push(Node::Object(ObjectNode::Array {
            element_class,
            items: vec![Handle::NULL; length as usize],
        })))
    }

    fn array_length(&self, array: Handle) -> MetaResult<u32> {
        match self.arena().object(array)? {
            ObjectNode::Array { items, .. } => Ok(items.len() as u32),
            _ => Err(MetaError::Accessor(format!("{array} is not an array"))),
        }
    }

    fn array_get(&self, array: Handle, index: u32) -> MetaResult<Handle> {
        match self.arena().object(array)? {
            ObjectNode::Array { items, .. } => items.get(index as usize).copied().ok_or_else(|| {
                MetaError::Accessor(format!("index {index} out of bounds for {array}"))
            }),
            _ => Err(MetaError::Accessor(format!("{array} is not an array"))),
        }
    }

    fn array_set(&self, array: Handle, index: u32, value: Handle) -> MetaResult<()> {
        let mut arena = self.arena_mut();
        match arena.object_mut(array)? {
            ObjectNode::Array { items, .. } => {
                let slot = items.get_mut(index as usize).ok_or_else(|| {
                    MetaError::Accessor(format!("index {index} out of bounds for {array}"))
                })?;
                *slot = value;
                Ok(())
            }
            _ => Err(MetaError::Accessor(format!("{array} is not an array"))),
        }
    }

    fn class_inflate(&self, class: Handle, type_arguments: Handle) -> MetaResult<Handle> {
        let arguments = self.type_arguments(type_arguments)?;
        let key = (class, arguments.clone());
        if let Some(existing) = self.class_instances.borrow().get(&key) {
            return Ok(*existing);
        }

        let mut arena = self.arena_mut();
        let definition = arena.class(class)?.clone();
        if definition.generic_parameters.is_empty() || !definition.generic_definition.is_null() {
            return Err(MetaError::Accessor(format!(
                "{} is not a generic definition",
                definition.full_name
            )));
        }
        if definition.generic_parameters.len() != arguments.len() {
            return Err(MetaError::Accessor(format!(
                "{} takes {} type arguments",
                definition.full_name,
                definition.generic_parameters.len()
            )));
        }

        let argument_names = arguments
            .iter()
            .map(|ty| arena.ty(*ty).map(|node| node.name.clone()))
            .collect::<MetaResult<Vec<_>>>()?;
        let type_name = format!("{}<{}>", definition.full_name, argument_names.join(", "));
        let scope = (definition.generic_parameters.as_slice(), arguments.as_slice());

        let inflated = arena.push(Node::Class(ClassNode {
            generic_definition: class,
            fields: Vec::new(),
            methods: Vec::new(),
            ..definition.clone()
        }));
        let ty = arena.push(Node::Type(TypeNode {
            name: type_name,
            type_enum: TypeEnum::GenericInst,
            class: inflated,
            object: Handle::NULL,
        }));

        let mut fields = Vec::with_capacity(definition.fields.len());
        for field in &definition.fields {
            let node = arena.field(*field)?.clone();
            let ty = arena.substitute(node.ty, scope, (&[], &[]));
            fields.push(arena.push(Node::Field(FieldNode { ty, ..node })));
        }

        let mut methods = Vec::with_capacity(definition.methods.len());
        for method in &definition.methods {
            let node = arena.method(*method)?.clone();
            let return_type = arena.substitute(node.return_type, scope, (&[], &[]));
            let parameters = node
                .parameters
                .iter()
                .map(|(name, ty)| (name.clone(), arena.substitute(*ty, scope, (&[], &[]))))
                .collect();
            methods.push(arena.push(Node::Method(MethodNode {
                class: inflated,
                return_type,
                parameters,
                inflated: true,
                ..node
            })));
        }

        let node = arena.class_mut(inflated)?;
        node.ty = ty;
        node.fields = fields;
        node.methods = methods;
        drop(arena);

        self.class_instances.borrow_mut().insert(key, inflated);
        Ok(inflated)
    }

    fn method_find_inflated(&self, method: Handle, type_arguments: Handle) -> MetaResult<Handle> {
        let arguments = self.type_arguments(type_arguments)?;
        let key = (method, arguments.clone());
        if let Some(existing) = self.method_instances.borrow().get(&key) {
            return Ok(*existing);
        }

        let mut arena = self.arena_mut();
        let argument_names = arguments
            .iter()
            .map(|ty| arena.ty(*ty).map(|node| node.name.clone()))
            .collect::<MetaResult<Vec<_>>>()?;
        let compiled = arena.method(method)?.instantiations.iter().find_map(|instantiation| {
            let matches = instantiation.arguments.len() == argument_names.len()
                && instantiation
                    .arguments
                    .iter()
                    .zip(&argument_names)
                    .all(|(declared, actual)| normalize_type_name(declared) == actual.as_str());
            matches.then_some(instantiation.address)
        });
        let Some(address) = compiled else { return Ok(Handle::NULL) };

        let inflated = Self::push_method_instance(&mut arena, method, &arguments, Some(address))?;
        drop(arena);
        self.method_instances.borrow_mut().insert(key, inflated);
        Ok(inflated)
    }

    fn method_inflate_raw(&self, method: Handle, type_arguments: Handle) -> MetaResult<Handle> {
        let arguments = self.type_arguments(type_arguments)?;
        let mut arena = self.arena_mut();
        let definition = arena.method(method)?;
        if definition.generic_parameters.len() != arguments.len() {
            return Err(MetaError::Accessor(format!(
                "{} takes {} type arguments",
                definition.name,
                definition.generic_parameters.len()
            )));
        }
        let address = definition.address;
        Self::push_method_instance(&mut arena, method, &arguments, address)
    }
}

/// Expand C# keyword aliases to their corlib names.
fn normalize_type_name(name: &str) -> &str {
    match name.trim() {
        "void" => "System.Void",
        "bool" => "System.Boolean",
        "char" => "System.Char",
        "sbyte" => "System.SByte",
        "byte" => "System.Byte",
        "short" => "System.Int16",
        "ushort" => "System.UInt16",
        "int" => "System.Int32",
        "uint" => "System.UInt32",
        "long" => "System.Int64",
        "ulong" => "System.UInt64",
        "float" => "System.Single",
        "double" => "System.Double",
        "string" => "System.String",
        "object" => "System.Object",
        other => other,
    }
}

/// Type enum implied by a type name that does not name a described class.
fn classify_type_name(name: &str) -> TypeEnum {
    match name {
        "System.Void" => TypeEnum::Void,
        "System.Boolean" => TypeEnum::Boolean,
        "System.Char" => TypeEnum::Char,
        "System.SByte" => TypeEnum::I1,
        "System.Byte" => TypeEnum::U1,
        "System.Int16" => TypeEnum::I2,
        "System.UInt16" => TypeEnum::U2,
        "System.Int32" => TypeEnum::I4,
        "System.UInt32" => TypeEnum::U4,
        "System.Int64" => TypeEnum::I8,
        "System.UInt64" => TypeEnum::U8,
        "System.Single" => TypeEnum::R4,
        "System.Double" => TypeEnum::R8,
        "System.String" => TypeEnum::String,
        "System.IntPtr" => TypeEnum::I,
        "System.UIntPtr" => TypeEnum::U,
        "System.Object" => TypeEnum::Object,
        _ if name.ends_with("[]") => TypeEnum::SzArray,
        _ if name.ends_with('*') => TypeEnum::Ptr,
        _ if name.ends_with('&') => TypeEnum::ByRef,
        _ if name.contains('<') => TypeEnum::GenericInst,
        _ => TypeEnum::Class,
    }
}

/// Classes synthesized when the snapshot does not describe a corlib.
fn builtin_corlib() -> Vec<ClassDesc> {
    let class = |name: &str, parent: Option<&str>, is_abstract: bool, is_sealed: bool| ClassDesc {
        namespace: "System".to_string(),
        name: name.to_string(),
        parent: parent.map(str::to_string),
        is_abstract,
        is_sealed,
        ..ClassDesc::default()
    };
    vec![
        class("Object", None, false, false),
        class("ValueType", Some("System.Object"), true, false),
        class("Enum", Some("System.ValueType"), true, false),
        class("Type", Some("System.Object"), true, false),
        class("String", Some("System.Object"), false, true),
    ]
}

struct Loaded {
    arena: Arena,
    domain: Handle,
    assemblies: Vec<Handle>,
    corlib: Handle,
    global_classes: Vec<Handle>,
    well_known: WellKnown,
}

/// Lays a snapshot description out as arena nodes.
#[derive(Default)]
struct Loader {
    arena: Arena,
    /// Types by full name; the first class registered under a name wins.
    types: HashMap<String, Handle>,
    classes: HashMap<String, Handle>,
    pending: Vec<(Handle, ClassDesc)>,
}

impl Loader {
    fn load(mut self, snapshot: &VmSnapshot) -> MetaResult<Loaded> {
        let domain = self.arena.push(Node::Domain);
        let mut assemblies = Vec::with_capacity(snapshot.assemblies.len());
        let mut global_classes = Vec::new();
        let mut corlib = Handle::NULL;

        for assembly in &snapshot.assemblies {
            let class_start = global_classes.len() as u32;
            let image = self.declare_image(&assembly.image, &assembly.classes, class_start);
            global_classes.extend(self.arena.image(image)?.classes.iter().copied());
            assemblies.push(self.arena.push(Node::Assembly(image)));
            if assembly.image == CORLIB_IMAGE {
                corlib = image;
            }
        }
        if corlib.is_null() {
            corlib = self.declare_image(CORLIB_IMAGE, &builtin_corlib(), 0);
        }

        let well_known = WellKnown {
            object: self.class_named("System.Object"),
            value_type: self.class_named("System.ValueType"),
            enumeration: self.class_named("System.Enum"),
            type_class: self.class_named("System.Type"),
            string: self.class_named("System.String"),
        };

        for (class, desc) in std::mem::take(&mut self.pending) {
            self.link_class(class, &desc, &well_known)?;
        }

        Ok(Loaded { arena: self.arena, domain, assemblies, corlib, global_classes, well_known })
    }

    fn class_named(&self, name: &str) -> Handle {
        self.classes.get(name).copied().unwrap_or(Handle::NULL)
    }

    fn declare_image(&mut self, name: &str, classes: &[ClassDesc], class_start: u32) -> Handle {
        let image = self.arena.push(Node::Image(ImageNode {
            name: name.to_string(),
            classes: Vec::new(),
            class_start,
        }));
        let handles: Vec<Handle> =
            classes.iter().map(|desc| self.declare_class(image, desc)).collect();
        if let Some(Node::Image(node)) = self.arena.get_mut(image) {
            node.classes = handles;
        }
        image
    }

    fn declare_class(&mut self, image: Handle, desc: &ClassDesc) -> Handle {
        let full_name = match (&desc.declaring_type, desc.namespace.is_empty()) {
            (Some(declaring), _) => format!("{declaring}.{}", desc.name),
            (None, true) => desc.name.clone(),
            (None, false) => format!("{}.{}", desc.namespace, desc.name),
        };
        let type_name = if desc.generic_parameters.is_empty() {
            full_name.clone()
        } else {
            format!("{full_name}<{}>", desc.generic_parameters.join(", "))
        };

        let mut flags = 0;
        if desc.kind == ClassKindDesc::Interface {
            flags |= TYPE_ATTRIBUTE_INTERFACE | TYPE_ATTRIBUTE_ABSTRACT;
        }
        if desc.is_abstract {
            flags |= TYPE_ATTRIBUTE_ABSTRACT;
        }
        if desc.is_sealed || matches!(desc.kind, ClassKindDesc::Struct | ClassKindDesc::Enum) {
            flags |= TYPE_ATTRIBUTE_SEALED;
        }

        let class = self.arena.push(Node::Class(ClassNode {
            name: desc.name.clone(),
            namespace: desc.namespace.clone(),
            full_name: full_name.clone(),
            image,
            parent: Handle::NULL,
            declaring: Handle::NULL,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            ty: Handle::NULL,
            flags,
            kind: desc.kind,
            generic_parameters: desc.generic_parameters.clone(),
            generic_definition: Handle::NULL,
        }));

        let type_enum = match classify_type_name(&full_name) {
            TypeEnum::Class | TypeEnum::GenericInst => match desc.kind {
                ClassKindDesc::Struct | ClassKindDesc::Enum => TypeEnum::ValueType,
                _ => TypeEnum::Class,
            },
            builtin => builtin,
        };
        let ty = self.arena.push(Node::Type(TypeNode {
            name: type_name,
            type_enum,
            class,
            object: Handle::NULL,
        }));
        if let Ok(node) = self.arena.class_mut(class) {
            node.ty = ty;
        }

        self.classes.entry(full_name.clone()).or_insert(class);
        self.types.entry(full_name).or_insert(ty);
        self.pending.push((class, desc.clone()));
        class
    }

    fn link_class(
        &mut self,
        class: Handle,
        desc: &ClassDesc,
        well_known: &WellKnown,
    ) -> MetaResult<()> {
        let class_scope = desc.generic_parameters.as_slice();

        let parent = match (&desc.parent, desc.kind) {
            (Some(parent), _) => self.class_named(normalize_type_name(parent)),
            (None, ClassKindDesc::Class) if class != well_known.object => well_known.object,
            (None, ClassKindDesc::Struct) => well_known.value_type,
            (None, ClassKindDesc::Enum) => well_known.enumeration,
            _ => Handle::NULL,
        };
        let declaring = desc
            .declaring_type
            .as_deref()
            .map(|name| self.class_named(name))
            .unwrap_or(Handle::NULL);
        let interfaces = desc
            .interfaces
            .iter()
            .map(|name| self.class_named(normalize_type_name(name)))
            .filter(|handle| !handle.is_null())
            .collect();

        let mut fields = Vec::with_capacity(desc.fields.len());
        for field in &desc.fields {
            let mut flags = 0;
            if field.is_static || field.is_literal {
                flags |= FIELD_ATTRIBUTE_STATIC;
            }
            if field.is_read_only {
                flags |= FIELD_ATTRIBUTE_INIT_ONLY;
            }
            if field.is_literal {
                flags |= FIELD_ATTRIBUTE_LITERAL;
            }
            let ty = self.intern_type(&field.ty, class_scope, &[]);
            fields.push(self.arena.push(Node::Field(FieldNode {
                name: field.name.clone(),
                ty,
                offset: field.offset,
                flags,
            })));
        }

        let mut methods = Vec::with_capacity(desc.methods.len());
        for method in &desc.methods {
            let method_scope = method.generic_parameters.as_slice();
            let mut flags = 0;
            if method.is_static {
                flags |= METHOD_ATTRIBUTE_STATIC;
            }
            if method.is_virtual || method.is_abstract {
                flags |= METHOD_ATTRIBUTE_VIRTUAL;
            }
            if method.is_abstract {
                flags |= METHOD_ATTRIBUTE_ABSTRACT;
            }
            let return_type = self.intern_type(&method.return_type, class_scope, method_scope);
            let parameters = method
                .parameters
                .iter()
                .map(|param| {
                    (param.name.clone(), self.intern_type(&param.ty, class_scope, method_scope))
                })
                .collect();
            methods.push(self.arena.push(Node::Method(MethodNode {
                name: method.name.clone(),
                class,
                return_type,
                parameters,
                flags,
                generic_parameters: method.generic_parameters.clone(),
                inflated: false,
                address: if method.is_abstract { None } else { method.address },
                instantiations: method.instantiations.clone(),
                result: method.result.clone(),
            })));
        }

        let node = self.arena.class_mut(class)?;
        node.parent = parent;
        node.declaring = declaring;
        node.interfaces = interfaces;
        node.fields = fields;
        node.methods = methods;
        Ok(())
    }

    fn intern_type(
        &mut self,
        name: &str,
        class_scope: &[String],
        method_scope: &[String],
    ) -> Handle {
        let name = normalize_type_name(name);
        let (key, type_enum) = if method_scope.iter().any(|param| param == name) {
            (format!("!!{name}"), TypeEnum::MVar)
        } else if class_scope.iter().any(|param| param == name) {
            (format!("!{name}"), TypeEnum::Var)
        } else {
            (name.to_string(), classify_type_name(name))
        };

        if let Some(existing) = self.types.get(&key) {
            return *existing;
        }
        let ty = self.arena.push(Node::Type(TypeNode {
            name: name.to_string(),
            type_enum,
            class: Handle::NULL,
            object: Handle::NULL,
        }));
        self.types.insert(key, ty);
        ty
    }
}
