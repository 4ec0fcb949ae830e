use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::error::MetaResult;
use crate::model::{handle_identity, memo, Class, Object, Session, Type};
use crate::native::Handle;
use crate::services::generics::GenericResolver;

const METHOD_ATTRIBUTE_STATIC: u32 = 0x0010;
const METHOD_ATTRIBUTE_VIRTUAL: u32 = 0x0040;
const METHOD_ATTRIBUTE_ABSTRACT: u32 = 0x0400;

/// One formal parameter of a method.
#[derive(Debug, Clone)]
pub struct Parameter<'a> {
    pub position: u32,
    pub name: String,
    pub ty: Type<'a>,
}

impl fmt::Display for Parameter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.name)
    }
}

#[derive(Clone)]
pub struct Method<'a> {
    session: &'a Session,
    inner: Rc<MethodInner<'a>>,
}

struct MethodInner<'a> {
    handle: Handle,
    name: OnceCell<String>,
    class: OnceCell<Class<'a>>,
    return_type: OnceCell<Type<'a>>,
    parameters: OnceCell<Vec<Parameter<'a>>>,
    flags: OnceCell<u32>,
    is_generic: OnceCell<bool>,
    is_inflated: OnceCell<bool>,
    generic_parameter_count: OnceCell<u32>,
    pointer: OnceCell<u64>,
}

handle_identity!(Method);

impl<'a> Method<'a> {
    pub fn new(session: &'a Session, handle: Handle) -> MetaResult<Self> {
        let handle = handle.require("method")?;
        Ok(Self {
            session,
            inner: Rc::new(MethodInner {
                handle,
                name: OnceCell::new(),
                class: OnceCell::new(),
                return_type: OnceCell::new(),
                parameters: OnceCell::new(),
                flags: OnceCell::new(),
                is_generic: OnceCell::new(),
                is_inflated: OnceCell::new(),
                generic_parameter_count: OnceCell::new(),
                pointer: OnceCell::new(),
            }),
        })
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    pub fn name(&self) -> MetaResult<&str> {
        memo(&self.inner.name, || self.session.api().method_name(self.inner.handle))
            .map(String::as_str)
    }

    /// Declaring class.
    pub fn class(&self) -> MetaResult<&Class<'a>> {
        memo(&self.inner.class, || {
            Class::new(self.session, self.session.api().method_class(self.inner.handle)?)
        })
    }

    pub fn return_type(&self) -> MetaResult<&Type<'a>> {
        memo(&self.inner.return_type, || {
            Type::new(self.session, self.session.api().method_return_type(self.inner.handle)?)
        })
    }

    pub fn parameters(&self) -> MetaResult<&[Parameter<'a>]> {
        memo(&self.inner.parameters, || {
            let api = self.session.api();
            let count = api.method_parameter_count(self.inner.handle)?;
            (0..count)
                .map(|position| {
                    Ok(Parameter {
                        position,
                        name: api.method_parameter_name(self.inner.handle, position)?,
                        ty: Type::new(
                            self.session,
                            api.method_parameter_type(self.inner.handle, position)?,
                        )?,
                    })
                })
                .collect()
        })
        .map(Vec::as_slice)
    }

    pub fn flags(&self) -> MetaResult<u32> {
        memo(&self.inner.flags, || self.session.api().method_flags(self.inner.handle)).copied()
    }

    pub fn is_static(&self) -> MetaResult<bool> {
        Ok(self.flags()? & METHOD_ATTRIBUTE_STATIC != 0)
    }

    pub fn is_virtual(&self) -> MetaResult<bool> {
        Ok(self.flags()? & METHOD_ATTRIBUTE_VIRTUAL != 0)
    }

    pub fn is_abstract(&self) -> MetaResult<bool> {
        Ok(self.flags()? & METHOD_ATTRIBUTE_ABSTRACT != 0)
    }

    /// True for a method with its own unbound type parameters.
    pub fn is_generic(&self) -> MetaResult<bool> {
        memo(&self.inner.is_generic, || self.session.api().method_is_generic(self.inner.handle))
            .copied()
    }

    pub fn is_inflated(&self) -> MetaResult<bool> {
        memo(&self.inner.is_inflated, || self.session.api().method_is_inflated(self.inner.handle))
            .copied()
    }

    pub fn generic_parameter_count(&self) -> MetaResult<u32> {
        memo(&self.inner.generic_parameter_count, || {
            self.session.api().method_generic_parameter_count(self.inner.handle)
        })
        .copied()
    }

    /// Absolute address of the compiled body. `None` for abstract,
    /// not-yet-compiled and externally implemented methods.
    pub fn virtual_address(&self) -> MetaResult<Option<u64>> {
        let pointer = memo(&self.inner.pointer, || {
            self.session.api().method_pointer(self.inner.handle)
        })?;
        Ok((*pointer != 0).then_some(*pointer))
    }

    /// Address relative to the module base. `None` when there is no body or
    /// the body lies below the module.
    pub fn relative_virtual_address(&self) -> MetaResult<Option<u64>> {
        let base = self.session.api().module_base();
        Ok(self.virtual_address()?.and_then(|address| address.checked_sub(base)))
    }

    /// Address column used by dumps and declarations: `0x00001234` for a
    /// module-relative body, `abs:` plus the pointer-width absolute address
    /// for a body outside the module.
    pub fn address_token(&self) -> MetaResult<Option<String>> {
        let Some(address) = self.virtual_address()? else { return Ok(None) };
        let api = self.session.api();
        let token = match address.checked_sub(api.module_base()) {
            Some(rva) => format!("{rva:#010x}"),
            None => {
                let width = 2 + 2 * api.pointer_size();
                format!("abs:{address:#0width$x}")
            }
        };
        Ok(Some(token))
    }

    /// Invoke the method; `None` for a null or void result.
    pub fn invoke(
        &self,
        instance: Option<&Object<'a>>,
        args: &[Object<'a>],
    ) -> MetaResult<Option<Object<'a>>> {
        let instance = instance.map(Object::handle).unwrap_or(Handle::NULL);
        let args: Vec<Handle> = args.iter().map(Object::handle).collect();
        let result = self.session.api().method_invoke(self.inner.handle, instance, &args)?;
        result.non_null().map(|handle| Object::new(self.session, handle)).transpose()
    }

    /// Close this generic method over `type_arguments`.
    pub fn inflate(&self, type_arguments: &[Class<'a>]) -> MetaResult<Method<'a>> {
        GenericResolver::new(self.session).inflate_method(self, type_arguments)
    }

    /// `static System.Void Run(System.Int32 count); // 0x00001234`
    pub fn declaration(&self) -> MetaResult<String> {
        let mut line = String::new();
        if self.is_static()? {
            line.push_str("static ");
        }
        if self.is_abstract()? {
            line.push_str("abstract ");
        } else if self.is_virtual()? {
            line.push_str("virtual ");
        }
        line.push_str(self.return_type()?.name()?);
        line.push(' ');
        line.push_str(self.name()?);
        if self.is_generic()? {
            let count = self.generic_parameter_count()?;
            let params: Vec<String> = (0..count).map(|i| format!("T{i}")).collect();
            line.push_str(&format!("<{}>", params.join(", ")));
        }
        let mut params = Vec::new();
        for parameter in self.parameters()? {
            params.push(format!("{} {}", parameter.ty.name()?, parameter.name));
        }
        line.push_str(&format!("({});", params.join(", ")));
        if let Some(token) = self.address_token()? {
            line.push_str(&format!(" // {token}"));
        }
        Ok(line)
    }
}

impl fmt::Display for Method<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.declaration().map_err(|_| fmt::Error)?)
    }
}
