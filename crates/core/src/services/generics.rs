//! Generic instantiation.
//!
//! Open generic classes and methods are closed by passing the VM an array of
//! reflection type objects. Classes are materialized by the VM itself.
//! Methods are looked up in the VM's instantiation cache first and otherwise
//! raw-inflated: the synthesized instantiation is good for names and code
//! addresses but is not registered back into the VM.

use tracing::debug;

use crate::error::{MetaError, MetaResult};
use crate::model::{Array, Class, Method, Session};

pub struct GenericResolver<'a> {
    session: &'a Session,
}

impl<'a> GenericResolver<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// `count` copies of `System.Object`, a valid argument for any
    /// reference-type parameter.
    pub fn placeholder_arguments(&self, count: u32) -> MetaResult<Vec<Class<'a>>> {
        let object = self.session.object_class()?;
        Ok(vec![object; count as usize])
    }

    pub fn inflate_class(
        &self,
        class: &Class<'a>,
        type_arguments: &[Class<'a>],
    ) -> MetaResult<Class<'a>> {
        let name = class.type_name()?;
        if !class.is_generic()? {
            return Err(MetaError::NotGeneric(name.to_string()));
        }
        check_arity(name, class.generic_parameter_count()?, type_arguments)?;

        let arguments = self.argument_array(type_arguments)?;
        let handle = self.session.api().class_inflate(class.handle(), arguments.handle())?;
        let inflated = Class::new(self.session, handle)?;
        debug!(generic = name, inflated = inflated.type_name()?, "inflated class");
        Ok(inflated)
    }

    pub fn inflate_method(
        &self,
        method: &Method<'a>,
        type_arguments: &[Class<'a>],
    ) -> MetaResult<Method<'a>> {
        let name = method.name()?;
        if !method.is_generic()? {
            return Err(MetaError::NotGeneric(name.to_string()));
        }
        check_arity(name, method.generic_parameter_count()?, type_arguments)?;

        let api = self.session.api();
        let arguments = self.argument_array(type_arguments)?;
        let registered = api.method_find_inflated(method.handle(), arguments.handle())?;
        let handle = match registered.non_null() {
            Some(handle) => handle,
            None => {
                debug!(method = name, "no registered instantiation, raw-inflating");
                api.method_inflate_raw(method.handle(), arguments.handle())?
            }
        };
        Method::new(self.session, handle)
    }

    /// A closed stand-in for `class`: itself when not generic, otherwise an
    /// instantiation over placeholder arguments.
    pub fn representative_class(&self, class: &Class<'a>) -> MetaResult<Class<'a>> {
        if !class.is_generic()? {
            return Ok(class.clone());
        }
        let arguments = self.placeholder_arguments(class.generic_parameter_count()?)?;
        self.inflate_class(class, &arguments)
    }

    /// A closed stand-in for `method`. Methods of a class that was itself
    /// generic already carry the class substitution and are left alone.
    pub fn representative_method(
        &self,
        method: &Method<'a>,
        class_was_generic: bool,
    ) -> MetaResult<Method<'a>> {
        if class_was_generic || !method.is_generic()? {
            return Ok(method.clone());
        }
        let arguments = self.placeholder_arguments(method.generic_parameter_count()?)?;
        self.inflate_method(method, &arguments)
    }

    fn argument_array(&self, type_arguments: &[Class<'a>]) -> MetaResult<Array<'a>> {
        let objects = type_arguments
            .iter()
            .map(|class| class.ty()?.object())
            .collect::<MetaResult<Vec<_>>>()?;
        Array::from_objects(self.session, &self.session.type_class()?, &objects)
    }
}

fn check_arity(name: &str, expected: u32, type_arguments: &[Class<'_>]) -> MetaResult<()> {
    if type_arguments.len() != expected as usize {
        return Err(MetaError::GenericArity {
            name: name.to_string(),
            expected,
            found: type_arguments.len(),
        });
    }
    Ok(())
}
