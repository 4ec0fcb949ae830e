use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::error::MetaResult;
use crate::model::assembly::IMAGE_EXTENSION;
use crate::model::{handle_identity, memo, Field, Image, Method, Session, Type};
use crate::native::Handle;
use crate::services::generics::GenericResolver;

const TYPE_ATTRIBUTE_ABSTRACT: u32 = 0x0080;
const TYPE_ATTRIBUTE_SEALED: u32 = 0x0100;

const INDENT: &str = "    ";

/// Declaration keyword of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Struct,
    Enum,
    Interface,
}

impl ClassKind {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Interface => "interface",
        }
    }
}

#[derive(Clone)]
pub struct Class<'a> {
    session: &'a Session,
    inner: Rc<ClassInner<'a>>,
}

struct ClassInner<'a> {
    handle: Handle,
    name: OnceCell<String>,
    namespace: OnceCell<String>,
    image: OnceCell<Image<'a>>,
    parent: OnceCell<Option<Class<'a>>>,
    declaring_class: OnceCell<Option<Class<'a>>>,
    interfaces: OnceCell<Vec<Class<'a>>>,
    fields: OnceCell<Vec<Field<'a>>>,
    methods: OnceCell<Vec<Method<'a>>>,
    ty: OnceCell<Type<'a>>,
    flags: OnceCell<u32>,
    kind: OnceCell<ClassKind>,
    is_generic: OnceCell<bool>,
    is_inflated: OnceCell<bool>,
    generic_parameter_count: OnceCell<u32>,
}

handle_identity!(Class);

impl<'a> Class<'a> {
    pub fn new(session: &'a Session, handle: Handle) -> MetaResult<Self> {
        let handle = handle.require("class")?;
        Ok(Self {
            session,
            inner: Rc::new(ClassInner {
                handle,
                name: OnceCell::new(),
                namespace: OnceCell::new(),
                image: OnceCell::new(),
                parent: OnceCell::new(),
                declaring_class: OnceCell::new(),
                interfaces: OnceCell::new(),
                fields: OnceCell::new(),
                methods: OnceCell::new(),
                ty: OnceCell::new(),
                flags: OnceCell::new(),
                kind: OnceCell::new(),
                is_generic: OnceCell::new(),
                is_inflated: OnceCell::new(),
                generic_parameter_count: OnceCell::new(),
            }),
        })
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    pub fn name(&self) -> MetaResult<&str> {
        memo(&self.inner.name, || self.session.api().class_name(self.inner.handle))
            .map(String::as_str)
    }

    pub fn namespace(&self) -> MetaResult<&str> {
        memo(&self.inner.namespace, || self.session.api().class_namespace(self.inner.handle))
            .map(String::as_str)
    }

    /// Name of the backing type: namespace-qualified, with generic arguments.
    pub fn type_name(&self) -> MetaResult<&str> {
        self.ty()?.name()
    }

    pub fn image(&self) -> MetaResult<&Image<'a>> {
        memo(&self.inner.image, || {
            Image::new(self.session, self.session.api().class_image(self.inner.handle)?)
        })
    }

    /// Name of the owning assembly, i.e. the image name without `.dll`.
    pub fn assembly_name(&self) -> MetaResult<&str> {
        let image = self.image()?.name()?;
        Ok(image.strip_suffix(IMAGE_EXTENSION).unwrap_or(image))
    }

    pub fn ty(&self) -> MetaResult<&Type<'a>> {
        memo(&self.inner.ty, || {
            Type::new(self.session, self.session.api().class_type(self.inner.handle)?)
        })
    }

    pub fn parent(&self) -> MetaResult<Option<&Class<'a>>> {
        memo(&self.inner.parent, || {
            self.optional_class(self.session.api().class_parent(self.inner.handle)?)
        })
        .map(Option::as_ref)
    }

    /// Enclosing class of a nested class.
    pub fn declaring_class(&self) -> MetaResult<Option<&Class<'a>>> {
        memo(&self.inner.declaring_class, || {
            self.optional_class(self.session.api().class_declaring_type(self.inner.handle)?)
        })
        .map(Option::as_ref)
    }

    pub fn interfaces(&self) -> MetaResult<&[Class<'a>]> {
        memo(&self.inner.interfaces, || {
            self.session
                .api()
                .class_interfaces(self.inner.handle)?
                .into_iter()
                .map(|handle| Class::new(self.session, handle))
                .collect()
        })
        .map(Vec::as_slice)
    }

    pub fn fields(&self) -> MetaResult<&[Field<'a>]> {
        memo(&self.inner.fields, || {
            self.session
                .api()
                .class_fields(self.inner.handle)?
                .into_iter()
                .map(|handle| Field::new(self.session, handle))
                .collect()
        })
        .map(Vec::as_slice)
    }

    /// Methods in declaration order. Derived from the VM once; an inflated
    /// class reports the methods of its own instantiation.
    pub fn methods(&self) -> MetaResult<&[Method<'a>]> {
        memo(&self.inner.methods, || {
            self.session
                .api()
                .class_methods(self.inner.handle)?
                .into_iter()
                .map(|handle| Method::new(self.session, handle))
                .collect()
        })
        .map(Vec::as_slice)
    }

    /// First method called `name`, optionally with a given parameter count.
    pub fn method(
        &self,
        name: &str,
        parameter_count: Option<u32>,
    ) -> MetaResult<Option<Method<'a>>> {
        for method in self.methods()? {
            if method.name()? != name {
                continue;
            }
            match parameter_count {
                Some(count) if method.parameters()?.len() as u32 != count => continue,
                _ => return Ok(Some(method.clone())),
            }
        }
        Ok(None)
    }

    pub fn field(&self, name: &str) -> MetaResult<Option<Field<'a>>> {
        for field in self.fields()? {
            if field.name()? == name {
                return Ok(Some(field.clone()));
            }
        }
        Ok(None)
    }

    pub fn flags(&self) -> MetaResult<u32> {
        memo(&self.inner.flags, || self.session.api().class_flags(self.inner.handle)).copied()
    }

    pub fn is_abstract(&self) -> MetaResult<bool> {
        Ok(self.flags()? & TYPE_ATTRIBUTE_ABSTRACT != 0)
    }

    pub fn is_sealed(&self) -> MetaResult<bool> {
        Ok(self.flags()? & TYPE_ATTRIBUTE_SEALED != 0)
    }

    pub fn kind(&self) -> MetaResult<ClassKind> {
        memo(&self.inner.kind, || {
            let api = self.session.api();
            let handle = self.inner.handle;
            Ok(if api.class_is_interface(handle)? {
                ClassKind::Interface
            } else if api.class_is_enum(handle)? {
                ClassKind::Enum
            } else if api.class_is_valuetype(handle)? {
                ClassKind::Struct
            } else {
                ClassKind::Class
            })
        })
        .copied()
    }

    pub fn is_value_type(&self) -> MetaResult<bool> {
        Ok(matches!(self.kind()?, ClassKind::Struct | ClassKind::Enum))
    }

    pub fn is_struct(&self) -> MetaResult<bool> {
        Ok(self.kind()? == ClassKind::Struct)
    }

    pub fn is_enum(&self) -> MetaResult<bool> {
        Ok(self.kind()? == ClassKind::Enum)
    }

    pub fn is_interface(&self) -> MetaResult<bool> {
        Ok(self.kind()? == ClassKind::Interface)
    }

    /// True iff this is an open generic definition.
    pub fn is_generic(&self) -> MetaResult<bool> {
        memo(&self.inner.is_generic, || self.session.api().class_is_generic(self.inner.handle))
            .copied()
    }

    /// True for a closed instantiation of a generic definition.
    pub fn is_inflated(&self) -> MetaResult<bool> {
        memo(&self.inner.is_inflated, || self.session.api().class_is_inflated(self.inner.handle))
            .copied()
    }

    pub fn generic_parameter_count(&self) -> MetaResult<u32> {
        memo(&self.inner.generic_parameter_count, || {
            self.session.api().class_generic_parameter_count(self.inner.handle)
        })
        .copied()
    }

    /// Close this generic definition over `type_arguments`.
    pub fn inflate(&self, type_arguments: &[Class<'a>]) -> MetaResult<Class<'a>> {
        GenericResolver::new(self.session).inflate_class(self, type_arguments)
    }

    /// Canonical C#-like declaration block, headed by the owning image.
    pub fn declaration(&self) -> MetaResult<String> {
        let kind = self.kind()?;
        let mut out = format!("// {}\n", self.image()?.name()?);

        if kind == ClassKind::Class {
            match (self.is_abstract()?, self.is_sealed()?) {
                (true, true) => out.push_str("static "),
                (true, false) => out.push_str("abstract "),
                (false, true) => out.push_str("sealed "),
                (false, false) => {}
            }
        }
        out.push_str(kind.keyword());
        out.push(' ');
        out.push_str(self.type_name()?);

        let mut inherited = Vec::new();
        if let Some(parent) = self.parent()? {
            if kind == ClassKind::Class && parent.type_name()? != "System.Object" {
                inherited.push(parent.type_name()?.to_string());
            }
        }
        for interface in self.interfaces()? {
            inherited.push(interface.type_name()?.to_string());
        }
        if !inherited.is_empty() {
            out.push_str(" : ");
            out.push_str(&inherited.join(", "));
        }
        out.push_str("\n{\n");

        let fields = self.fields()?;
        for field in fields {
            out.push_str(INDENT);
            out.push_str(&field.declaration()?);
            out.push('\n');
        }

        let methods = self.methods()?;
        if !fields.is_empty() && !methods.is_empty() {
            out.push('\n');
        }
        for method in methods {
            out.push_str(INDENT);
            out.push_str(&method.declaration()?);
            out.push('\n');
        }

        out.push('}');
        Ok(out)
    }

    fn optional_class(&self, handle: Handle) -> MetaResult<Option<Class<'a>>> {
        handle.non_null().map(|handle| Class::new(self.session, handle)).transpose()
    }
}

impl fmt::Display for Class<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.declaration().map_err(|_| fmt::Error)?)
    }
}
