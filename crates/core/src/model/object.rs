use std::cell::OnceCell;

use crate::error::{MetaError, MetaResult};
use crate::model::{memo, Class, Session};
use crate::native::Handle;

/// A managed object instance.
#[derive(Clone)]
pub struct Object<'a> {
    session: &'a Session,
    handle: Handle,
    class: OnceCell<Handle>,
}

impl<'a> Object<'a> {
    pub fn new(session: &'a Session, handle: Handle) -> MetaResult<Self> {
        Ok(Self { session, handle: handle.require("object")?, class: OnceCell::new() })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn class(&self) -> MetaResult<Class<'a>> {
        let handle = memo(&self.class, || {
            self.session.api().object_class(self.handle)?.require("object class")
        })?;
        Class::new(self.session, *handle)
    }

    /// Contents of a `System.String` instance.
    pub fn to_managed_string(&self) -> MetaResult<String> {
        self.session.api().string_chars(self.handle)
    }
}

impl PartialEq for Object<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl std::fmt::Debug for Object<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Object({})", self.handle)
    }
}

/// A managed single-dimension array.
#[derive(Clone)]
pub struct Array<'a> {
    session: &'a Session,
    handle: Handle,
    length: OnceCell<u32>,
}

impl<'a> Array<'a> {
    pub fn new(session: &'a Session, handle: Handle) -> MetaResult<Self> {
        Ok(Self { session, handle: handle.require("array")?, length: OnceCell::new() })
    }

    /// Allocate an `element_class[]` holding `objects` in order.
    pub fn from_objects(
        session: &'a Session,
        element_class: &Class<'a>,
        objects: &[Object<'a>],
    ) -> MetaResult<Self> {
        let api = session.api();
        let length = u32::try_from(objects.len()).map_err(|_| {
            MetaError::Accessor(format!("array of {} elements is too long", objects.len()))
        })?;
        let array = Self::new(session, api.array_new(element_class.handle(), length)?)?;
        for (index, object) in (0..length).zip(objects) {
            api.array_set(array.handle, index, object.handle())?;
        }
        Ok(array)
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn len(&self) -> MetaResult<u32> {
        memo(&self.length, || self.session.api().array_length(self.handle)).copied()
    }

    pub fn is_empty(&self) -> MetaResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Element at `index`; `None` for a null slot.
    pub fn get(&self, index: u32) -> MetaResult<Option<Object<'a>>> {
        let handle = self.session.api().array_get(self.handle, index)?;
        handle.non_null().map(|handle| Object::new(self.session, handle)).transpose()
    }
}

impl std::fmt::Debug for Array<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Array({})", self.handle)
    }
}
