use std::cell::OnceCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::compat::ClassLayout;
use crate::error::{MetaError, MetaResult};
use crate::model::{handle_identity, memo, Class, Session, TypeEnum};
use crate::native::Handle;

/// A loaded module image and the window of classes it owns.
#[derive(Clone)]
pub struct Image<'a> {
    session: &'a Session,
    inner: Rc<ImageInner<'a>>,
}

struct ImageInner<'a> {
    handle: Handle,
    name: OnceCell<String>,
    class_count: OnceCell<u32>,
    class_start: OnceCell<u32>,
    classes: OnceCell<Vec<Class<'a>>>,
    by_name: OnceCell<HashMap<String, Class<'a>>>,
}

handle_identity!(Image);

impl<'a> Image<'a> {
    pub fn new(session: &'a Session, handle: Handle) -> MetaResult<Self> {
        let handle = handle.require("image")?;
        Ok(Self {
            session,
            inner: Rc::new(ImageInner {
                handle,
                name: OnceCell::new(),
                class_count: OnceCell::new(),
                class_start: OnceCell::new(),
                classes: OnceCell::new(),
                by_name: OnceCell::new(),
            }),
        })
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    pub fn name(&self) -> MetaResult<&str> {
        memo(&self.inner.name, || self.session.api().image_name(self.inner.handle))
            .map(String::as_str)
    }

    pub fn class_count(&self) -> MetaResult<u32> {
        memo(&self.inner.class_count, || self.session.api().image_class_count(self.inner.handle))
            .copied()
    }

    /// First global class-table index owned by this image. Zero means
    /// "unknown" under the current layout.
    pub fn class_start(&self) -> MetaResult<u32> {
        memo(&self.inner.class_start, || self.session.api().image_class_start(self.inner.handle))
            .copied()
    }

    /// Every class owned by the image, in the VM's index order.
    pub fn classes(&self) -> MetaResult<&[Class<'a>]> {
        memo(&self.inner.classes, || match self.session.layout() {
            ClassLayout::Legacy { type_enum_offset } => self.legacy_classes(type_enum_offset),
            ClassLayout::Current => self.current_classes(),
        })
        .map(Vec::as_slice)
    }

    /// Classes keyed by type name. When names collide, the later class wins.
    pub fn classes_by_name(&self) -> MetaResult<&HashMap<String, Class<'a>>> {
        memo(&self.inner.by_name, || {
            let mut table = HashMap::new();
            for class in self.classes()? {
                table.insert(class.type_name()?.to_string(), class.clone());
            }
            Ok(table)
        })
    }

    pub fn class_from_name(&self, namespace: &str, name: &str) -> MetaResult<Option<Class<'a>>> {
        let handle = self.session.api().class_from_name(self.inner.handle, namespace, name)?;
        handle.non_null().map(|handle| Class::new(self.session, handle)).transpose()
    }

    fn current_classes(&self) -> MetaResult<Vec<Class<'a>>> {
        let api = self.session.api();
        let count = self.class_count()?;
        debug!(image = self.name()?, count, "reading classes through the image accessor");
        (0..count)
            .map(|index| {
                let handle = api.image_get_class(self.inner.handle, index)?;
                if handle.is_null() {
                    return Err(self.mismatch("current", index)?);
                }
                Class::new(self.session, handle)
            })
            .collect()
    }

    fn legacy_classes(&self, type_enum_offset: usize) -> MetaResult<Vec<Class<'a>>> {
        let api = self.session.api();
        let pointer_size = api.pointer_size();
        let start = self.class_start()?;
        let count = self.class_count()?;
        let descriptor = self.session.class_descriptor()?;
        let mut buffer = vec![0u8; self.session.layout().descriptor_size(pointer_size)];
        debug!(image = self.name()?, start, count, "reading classes through the global table");

        let Some(end) = start.checked_add(count) else {
            return Err(self.mismatch("legacy", start)?);
        };

        (start..end)
            .map(|index| {
                buffer.fill(0);
                let index_bytes = u64::from(index).to_le_bytes();
                buffer[..pointer_size].copy_from_slice(&index_bytes[..pointer_size]);
                buffer[type_enum_offset] = TypeEnum::Class.raw();
                api.write_bytes(descriptor, &buffer)?;

                let handle = api.class_from_type(descriptor)?;
                if handle.is_null() {
                    return Err(self.mismatch("legacy", index)?);
                }
                Class::new(self.session, handle)
            })
            .collect()
    }

    fn mismatch(&self, layout: &'static str, index: u32) -> MetaResult<MetaError> {
        Ok(MetaError::LayoutMismatch { layout, image: self.name()?.to_string(), index })
    }
}
