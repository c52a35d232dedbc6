//! Typed schemas, method names and method descriptors.
//!
//! A [`Schema<T>`] pairs a JSON-schema fragment (used for discovery) with a
//! serde contract for `T` (used on the wire). [`SchemaRegistry`] names and
//! deduplicates schemas so the discovery document stays deterministic.

pub mod descriptor;
pub mod error;
pub mod name;
pub mod registry;
pub mod schema;

pub use {
    descriptor::{Content, MethodInfo, ParamSchema, ResultSchema},
    error::{Error, Result},
    name::MethodName,
    registry::SchemaRegistry,
    schema::{Schema, boolean, integer, number, string},
};
