use helm_protocol::{ContentDescriptor, MethodDescriptor};

use crate::{Error, Result, Schema};

/// A named, typed slot: a method parameter or a method result.
#[derive(Debug)]
pub struct Content<T> {
    pub name: String,
    pub schema: Schema<T>,
}

impl<T> Clone for Content<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            schema: self.schema.clone(),
        }
    }
}

impl<T> Content<T> {
    pub fn new(name: impl Into<String>, schema: Schema<T>) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    pub fn to_descriptor(&self) -> ContentDescriptor {
        ContentDescriptor {
            name: self.name.clone(),
            schema: self.schema.descriptor().clone(),
        }
    }
}

pub type ParamSchema<T> = Content<T>;
pub type ResultSchema<T> = Content<T>;

/// Immutable description of a method: what it does, what it takes, what it
/// returns.
#[derive(Debug)]
pub struct MethodInfo<P, R> {
    description: String,
    params: Option<ParamSchema<P>>,
    result: Option<ResultSchema<R>>,
}

impl<P, R> MethodInfo<P, R> {
    pub fn new(
        description: impl Into<String>,
        params: Option<ParamSchema<P>>,
        result: Option<ResultSchema<R>>,
    ) -> Self {
        Self {
            description: description.into(),
            params,
            result,
        }
    }

    /// Build a descriptor for a method that answers with a result. Fails when
    /// no result schema was declared.
    pub fn responding(
        description: impl Into<String>,
        params: Option<ParamSchema<P>>,
        result: Option<ResultSchema<R>>,
    ) -> Result<Self> {
        if result.is_none() {
            return Err(Error::Descriptor("No response defined"));
        }
        Ok(Self::new(description, params, result))
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params(&self) -> Option<&ParamSchema<P>> {
        self.params.as_ref()
    }

    pub fn result(&self) -> Option<&ResultSchema<R>> {
        self.result.as_ref()
    }

    /// Type-erased form for discovery.
    pub fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor {
            description: self.description.clone(),
            params: self.params.as_ref().map(Content::to_descriptor),
            result: self.result.as_ref().map(Content::to_descriptor),
        }
    }
}
