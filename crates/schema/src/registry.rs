use std::{collections::HashMap, sync::Arc};

use helm_protocol::TypeDescriptor;

use crate::{Error, Result, Schema};

struct NamedSchema {
    name: String,
    descriptor: Arc<TypeDescriptor>,
}

/// Named schema components plus an interning cache for descriptors.
///
/// One registry is built per server at startup. Components are listed in
/// registration order.
#[derive(Default)]
pub struct SchemaRegistry {
    named: Vec<NamedSchema>,
    by_name: HashMap<String, usize>,
    interned: HashMap<TypeDescriptor, Arc<TypeDescriptor>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a schema sharing the cached descriptor for its shape.
    pub fn intern<T>(&mut self, schema: &Schema<T>) -> Schema<T> {
        Schema::from_shared(self.intern_descriptor(schema.descriptor()))
    }

    fn intern_descriptor(&mut self, descriptor: &TypeDescriptor) -> Arc<TypeDescriptor> {
        if let Some(cached) = self.interned.get(descriptor) {
            return Arc::clone(cached);
        }
        let shared = Arc::new(descriptor.clone());
        self.interned.insert(descriptor.clone(), Arc::clone(&shared));
        shared
    }

    /// Register `schema` as the component `name` and return a `$ref` to it.
    ///
    /// Describing the same name with the same shape again is a no-op that
    /// returns the cached reference; a different shape under an existing
    /// name is an error.
    pub fn describe<T>(&mut self, name: &str, schema: &Schema<T>) -> Result<Schema<T>> {
        let descriptor = self.intern_descriptor(schema.descriptor());
        match self.by_name.get(name).copied() {
            Some(idx) if Arc::ptr_eq(&self.named[idx].descriptor, &descriptor) => {},
            Some(_) => return Err(Error::SchemaConflict(name.to_string())),
            None => {
                self.by_name.insert(name.to_string(), self.named.len());
                self.named.push(NamedSchema {
                    name: name.to_string(),
                    descriptor,
                });
            },
        }
        Ok(self.intern(&Schema::reference(name)))
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.by_name
            .get(name)
            .map(|&idx| self.named[idx].descriptor.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Named components in registration order.
    pub fn components(&self) -> impl Iterator<Item = (&str, &TypeDescriptor)> {
        self.named
            .iter()
            .map(|entry| (entry.name.as_str(), entry.descriptor.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }
}
