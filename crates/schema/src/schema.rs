use std::{fmt, marker::PhantomData, sync::Arc};

use {
    helm_protocol::{COMPONENT_REF_PREFIX, TypeDescriptor},
    serde::{Serialize, de::DeserializeOwned},
    serde_json::Value,
};

use crate::{Error, Result};

/// A typed encode/decode contract for values of type `T`.
///
/// The descriptor is what clients see in the discovery document; the serde
/// implementation of `T` is what actually moves values on and off the wire.
/// Descriptors are shared behind an `Arc` so interned schemas compare by
/// identity.
pub struct Schema<T> {
    descriptor: Arc<TypeDescriptor>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Schema<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schema").field(&self.descriptor).finish()
    }
}

impl<T> Schema<T> {
    pub fn from_descriptor(descriptor: TypeDescriptor) -> Self {
        Self::from_shared(Arc::new(descriptor))
    }

    pub(crate) fn from_shared(descriptor: Arc<TypeDescriptor>) -> Self {
        Self {
            descriptor,
            _marker: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// The shared descriptor. Two schemas handed out by the same
    /// [`SchemaRegistry`](crate::SchemaRegistry) for an identical shape
    /// point at the same allocation.
    pub fn shared(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    /// A schema with a single JSON type, e.g. `"string"`.
    pub fn literal(json_type: &str) -> Self {
        Self::literals(&[json_type])
    }

    /// A schema accepting any of several JSON types.
    pub fn literals(json_types: &[&str]) -> Self {
        Self::from_descriptor(TypeDescriptor {
            types: json_types.iter().map(|t| (*t).to_string()).collect(),
            ..Default::default()
        })
    }

    /// A string schema restricted to a fixed set of values.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_descriptor(TypeDescriptor {
            types: vec!["string".into()],
            enum_values: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        })
    }

    pub fn object() -> Self {
        Self::literal("object")
    }

    /// Add (or replace) a documented property. Only meaningful on object schemas.
    pub fn with_property<U>(self, name: &str, schema: &Schema<U>) -> Self {
        let mut descriptor = (*self.descriptor).clone();
        descriptor.types = vec!["object".into()];
        descriptor
            .properties
            .insert(name.to_string(), schema.descriptor().clone());
        Self::from_descriptor(descriptor)
    }

    /// A `$ref` to a named component.
    pub fn reference(name: &str) -> Self {
        Self::from_descriptor(TypeDescriptor {
            reference: Some(format!("{COMPONENT_REF_PREFIX}{name}")),
            ..Default::default()
        })
    }

    /// A schema for a list of `T`.
    pub fn array(&self) -> Schema<Vec<T>> {
        Schema::from_descriptor(TypeDescriptor {
            types: vec!["array".into()],
            items: Some(Box::new(self.descriptor().clone())),
            ..Default::default()
        })
    }
}

impl<T: Serialize + DeserializeOwned> Schema<T> {
    pub fn encode(&self, value: &T) -> Result<Value> {
        serde_json::to_value(value).map_err(Error::Encode)
    }

    pub fn decode(&self, raw: Value) -> Result<T> {
        serde_json::from_value(raw).map_err(Error::Decode)
    }
}

pub fn boolean() -> Schema<bool> {
    Schema::literal("boolean")
}

pub fn integer() -> Schema<i64> {
    Schema::literal("integer")
}

pub fn number() -> Schema<f64> {
    Schema::literal("number")
}

pub fn string() -> Schema<String> {
    Schema::literal("string")
}
