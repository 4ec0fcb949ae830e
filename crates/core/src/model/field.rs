use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::error::MetaResult;
use crate::model::{handle_identity, memo, Session, Type};
use crate::native::Handle;

const FIELD_ATTRIBUTE_STATIC: u32 = 0x0010;
const FIELD_ATTRIBUTE_INIT_ONLY: u32 = 0x0020;
const FIELD_ATTRIBUTE_LITERAL: u32 = 0x0040;

#[derive(Clone)]
pub struct Field<'a> {
    session: &'a Session,
    inner: Rc<FieldInner<'a>>,
}

struct FieldInner<'a> {
    handle: Handle,
    name: OnceCell<String>,
    ty: OnceCell<Type<'a>>,
    offset: OnceCell<i32>,
    flags: OnceCell<u32>,
}

handle_identity!(Field);

impl<'a> Field<'a> {
    pub fn new(session: &'a Session, handle: Handle) -> MetaResult<Self> {
        let handle = handle.require("field")?;
        Ok(Self {
            session,
            inner: Rc::new(FieldInner {
                handle,
                name: OnceCell::new(),
                ty: OnceCell::new(),
                offset: OnceCell::new(),
                flags: OnceCell::new(),
            }),
        })
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    pub fn name(&self) -> MetaResult<&str> {
        memo(&self.inner.name, || self.session.api().field_name(self.inner.handle))
            .map(String::as_str)
    }

    pub fn ty(&self) -> MetaResult<&Type<'a>> {
        memo(&self.inner.ty, || {
            Type::new(self.session, self.session.api().field_type(self.inner.handle)?)
        })
    }

    /// Offset from the start of the instance, or of the static storage block.
    pub fn offset(&self) -> MetaResult<i32> {
        memo(&self.inner.offset, || self.session.api().field_offset(self.inner.handle)).copied()
    }

    pub fn flags(&self) -> MetaResult<u32> {
        memo(&self.inner.flags, || self.session.api().field_flags(self.inner.handle)).copied()
    }

    pub fn is_static(&self) -> MetaResult<bool> {
        Ok(self.flags()? & FIELD_ATTRIBUTE_STATIC != 0)
    }

    pub fn is_literal(&self) -> MetaResult<bool> {
        Ok(self.flags()? & FIELD_ATTRIBUTE_LITERAL != 0)
    }

    pub fn is_read_only(&self) -> MetaResult<bool> {
        Ok(self.flags()? & FIELD_ATTRIBUTE_INIT_ONLY != 0)
    }

    /// `static readonly System.Int32 count; // 0x10`
    pub fn declaration(&self) -> MetaResult<String> {
        let mut line = String::new();
        if self.is_literal()? {
            line.push_str("const ");
        } else {
            if self.is_static()? {
                line.push_str("static ");
            }
            if self.is_read_only()? {
                line.push_str("readonly ");
            }
        }
        line.push_str(self.ty()?.name()?);
        line.push(' ');
        line.push_str(self.name()?);
        line.push(';');
        if !self.is_literal()? {
            line.push_str(&format!(" // {:#x}", self.offset()?));
        }
        Ok(line)
    }
}

impl fmt::Display for Field<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.declaration().map_err(|_| fmt::Error)?)
    }
}
