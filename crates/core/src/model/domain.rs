use std::cell::OnceCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::MetaResult;
use crate::model::{handle_identity, memo, Assembly, Class, Session};
use crate::native::Handle;

/// Root of the VM's type universe.
#[derive(Clone)]
pub struct Domain<'a> {
    session: &'a Session,
    inner: Rc<DomainInner<'a>>,
}

struct DomainInner<'a> {
    handle: Handle,
    assemblies: OnceCell<Vec<Assembly<'a>>>,
    by_name: OnceCell<HashMap<String, Assembly<'a>>>,
}

handle_identity!(Domain);

impl<'a> Domain<'a> {
    pub fn new(session: &'a Session, handle: Handle) -> MetaResult<Self> {
        let handle = handle.require("domain")?;
        Ok(Self {
            session,
            inner: Rc::new(DomainInner {
                handle,
                assemblies: OnceCell::new(),
                by_name: OnceCell::new(),
            }),
        })
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    /// Assemblies in VM registration order.
    pub fn assemblies(&self) -> MetaResult<&[Assembly<'a>]> {
        memo(&self.inner.assemblies, || {
            self.session
                .api()
                .domain_assemblies(self.inner.handle)?
                .into_iter()
                .map(|handle| Assembly::new(self.session, handle))
                .collect()
        })
        .map(Vec::as_slice)
    }

    /// Assembly by name. When names collide, the later assembly wins.
    pub fn assembly(&self, name: &str) -> MetaResult<Option<Assembly<'a>>> {
        let table = memo(&self.inner.by_name, || {
            let mut table = HashMap::new();
            for assembly in self.assemblies()? {
                table.insert(assembly.name()?.to_string(), assembly.clone());
            }
            Ok(table)
        })?;
        Ok(table.get(name).cloned())
    }

    /// Find `Namespace.Name` in the first assembly that defines it.
    pub fn find_class(&self, full_name: &str) -> MetaResult<Option<Class<'a>>> {
        let (namespace, name) = match full_name.rsplit_once('.') {
            Some((namespace, name)) => (namespace, name),
            None => ("", full_name),
        };
        for assembly in self.assemblies()? {
            if let Some(class) = assembly.image()?.class_from_name(namespace, name)? {
                return Ok(Some(class));
            }
        }
        Ok(None)
    }
}
