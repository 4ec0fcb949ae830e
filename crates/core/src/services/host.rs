//! Host application facts read through the VM itself.
//!
//! The host exposes its data directory, identifier and version as static
//! managed getters, so they are obtained by invoking methods found through
//! the same object model that is being dumped.

use std::cell::OnceCell;

use tracing::debug;

use crate::error::MetaResult;
use crate::model::{memo, Class, Session};

/// Assemblies that may define the application class, newest first.
const APPLICATION_ASSEMBLIES: [&str; 2] = ["UnityEngine.CoreModule", "UnityEngine"];
const APPLICATION_NAMESPACE: &str = "UnityEngine";
const APPLICATION_CLASS: &str = "Application";

pub struct HostApplication<'a> {
    session: &'a Session,
    class: OnceCell<Option<Class<'a>>>,
}

impl<'a> HostApplication<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session, class: OnceCell::new() }
    }

    /// The application class, if the host defines one.
    pub fn class(&self) -> MetaResult<Option<&Class<'a>>> {
        memo(&self.class, || {
            let domain = self.session.domain()?;
            for name in APPLICATION_ASSEMBLIES {
                let Some(assembly) = domain.assembly(name)? else { continue };
                let image = assembly.image()?;
                let class = image.class_from_name(APPLICATION_NAMESPACE, APPLICATION_CLASS)?;
                if class.is_some() {
                    return Ok(class);
                }
            }
            debug!("host application class not found");
            Ok(None)
        })
        .map(Option::as_ref)
    }

    /// Writable directory that persists between runs of the host.
    pub fn persistent_data_path(&self) -> MetaResult<Option<String>> {
        self.string_getter("get_persistentDataPath")
    }

    /// Bundle identifier, e.g. `com.company.product`.
    pub fn identifier(&self) -> MetaResult<Option<String>> {
        match self.string_getter("get_identifier")? {
            Some(identifier) => Ok(Some(identifier)),
            None => self.string_getter("get_bundleIdentifier"),
        }
    }

    pub fn version(&self) -> MetaResult<Option<String>> {
        self.string_getter("get_version")
    }

    fn string_getter(&self, getter: &str) -> MetaResult<Option<String>> {
        let Some(class) = self.class()? else { return Ok(None) };
        let Some(method) = class.method(getter, Some(0))? else { return Ok(None) };
        let value = method.invoke(None, &[])?.map(|object| object.to_managed_string()).transpose()?;
        Ok(value.filter(|value| !value.is_empty()))
    }
}
