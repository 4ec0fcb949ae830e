use std::cell::OnceCell;
use std::rc::Rc;

use crate::error::MetaResult;
use crate::model::{handle_identity, memo, Image, Session};
use crate::native::Handle;

/// Extension stripped from image names to form assembly names.
pub(crate) const IMAGE_EXTENSION: &str = ".dll";

#[derive(Clone)]
pub struct Assembly<'a> {
    session: &'a Session,
    inner: Rc<AssemblyInner<'a>>,
}

struct AssemblyInner<'a> {
    handle: Handle,
    image: OnceCell<Image<'a>>,
    name: OnceCell<String>,
}

handle_identity!(Assembly);

impl<'a> Assembly<'a> {
    pub fn new(session: &'a Session, handle: Handle) -> MetaResult<Self> {
        let handle = handle.require("assembly")?;
        Ok(Self {
            session,
            inner: Rc::new(AssemblyInner { handle, image: OnceCell::new(), name: OnceCell::new() }),
        })
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    pub fn image(&self) -> MetaResult<&Image<'a>> {
        memo(&self.inner.image, || {
            Image::new(self.session, self.session.api().assembly_image(self.inner.handle)?)
        })
    }

    /// Image name without its `.dll` extension.
    pub fn name(&self) -> MetaResult<&str> {
        memo(&self.inner.name, || {
            let image_name = self.image()?.name()?;
            Ok(image_name.strip_suffix(IMAGE_EXTENSION).unwrap_or(image_name).to_string())
        })
        .map(String::as_str)
    }
}
