use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::error::MetaResult;
use crate::model::{handle_identity, memo, Class, Object, Session};
use crate::native::Handle;

/// How a value of a type is represented, as recorded in the type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeEnum {
    End,
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Ptr,
    ByRef,
    ValueType,
    Class,
    Var,
    Array,
    GenericInst,
    TypedByRef,
    I,
    U,
    FnPtr,
    Object,
    SzArray,
    MVar,
    Other(u8),
}

impl TypeEnum {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Self::End,
            0x01 => Self::Void,
            0x02 => Self::Boolean,
            0x03 => Self::Char,
            0x04 => Self::I1,
            0x05 => Self::U1,
            0x06 => Self::I2,
            0x07 => Self::U2,
            0x08 => Self::I4,
            0x09 => Self::U4,
            0x0a => Self::I8,
            0x0b => Self::U8,
            0x0c => Self::R4,
            0x0d => Self::R8,
            0x0e => Self::String,
            0x0f => Self::Ptr,
            0x10 => Self::ByRef,
            0x11 => Self::ValueType,
            0x12 => Self::Class,
            0x13 => Self::Var,
            0x14 => Self::Array,
            0x15 => Self::GenericInst,
            0x16 => Self::TypedByRef,
            0x18 => Self::I,
            0x19 => Self::U,
            0x1b => Self::FnPtr,
            0x1c => Self::Object,
            0x1d => Self::SzArray,
            0x1e => Self::MVar,
            other => Self::Other(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Self::End => 0x00,
            Self::Void => 0x01,
            Self::Boolean => 0x02,
            Self::Char => 0x03,
            Self::I1 => 0x04,
            Self::U1 => 0x05,
            Self::I2 => 0x06,
            Self::U2 => 0x07,
            Self::I4 => 0x08,
            Self::U4 => 0x09,
            Self::I8 => 0x0a,
            Self::U8 => 0x0b,
            Self::R4 => 0x0c,
            Self::R8 => 0x0d,
            Self::String => 0x0e,
            Self::Ptr => 0x0f,
            Self::ByRef => 0x10,
            Self::ValueType => 0x11,
            Self::Class => 0x12,
            Self::Var => 0x13,
            Self::Array => 0x14,
            Self::GenericInst => 0x15,
            Self::TypedByRef => 0x16,
            Self::I => 0x18,
            Self::U => 0x19,
            Self::FnPtr => 0x1b,
            Self::Object => 0x1c,
            Self::SzArray => 0x1d,
            Self::MVar => 0x1e,
            Self::Other(raw) => raw,
        }
    }

    /// Generic parameter placeholders (`T` on a class or a method).
    pub fn is_generic_parameter(self) -> bool {
        matches!(self, Self::Var | Self::MVar)
    }

    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Char
                | Self::I1
                | Self::U1
                | Self::I2
                | Self::U2
                | Self::I4
                | Self::U4
                | Self::I8
                | Self::U8
                | Self::R4
                | Self::R8
                | Self::I
                | Self::U
        )
    }
}

/// A type descriptor over a class.
#[derive(Clone)]
pub struct Type<'a> {
    session: &'a Session,
    inner: Rc<TypeInner>,
}

struct TypeInner {
    handle: Handle,
    name: OnceCell<String>,
    type_enum: OnceCell<TypeEnum>,
    class: OnceCell<Option<Handle>>,
    object: OnceCell<Handle>,
}

handle_identity!(Type);

impl<'a> Type<'a> {
    /// Byte offset of the type-enum field inside a type descriptor: the
    /// pointer-sized data union followed by 16 bits of attributes.
    pub const fn type_enum_offset(pointer_size: usize) -> usize {
        pointer_size + 2
    }

    pub fn new(session: &'a Session, handle: Handle) -> MetaResult<Self> {
        let handle = handle.require("type")?;
        Ok(Self {
            session,
            inner: Rc::new(TypeInner {
                handle,
                name: OnceCell::new(),
                type_enum: OnceCell::new(),
                class: OnceCell::new(),
                object: OnceCell::new(),
            }),
        })
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    /// Fully qualified name, including generic arguments.
    pub fn name(&self) -> MetaResult<&str> {
        memo(&self.inner.name, || self.session.api().type_name(self.inner.handle))
            .map(String::as_str)
    }

    pub fn type_enum(&self) -> MetaResult<TypeEnum> {
        memo(&self.inner.type_enum, || {
            self.session.api().type_enum(self.inner.handle).map(TypeEnum::from_raw)
        })
        .copied()
    }

    /// The class this type describes. Generic parameters have none.
    pub fn class(&self) -> MetaResult<Option<Class<'a>>> {
        let handle = memo(&self.inner.class, || {
            Ok(self.session.api().type_class(self.inner.handle)?.non_null())
        })?;
        handle.map(|handle| Class::new(self.session, handle)).transpose()
    }

    /// The reflection object standing for this type at runtime.
    pub fn object(&self) -> MetaResult<Object<'a>> {
        let handle = memo(&self.inner.object, || {
            self.session.api().type_object(self.inner.handle)?.require("type object")
        })?;
        Object::new(self.session, *handle)
    }
}

impl fmt::Display for Type<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().map_err(|_| fmt::Error)?)
    }
}
