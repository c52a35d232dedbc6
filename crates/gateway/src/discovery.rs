use std::collections::BTreeMap;

use {
    helm_protocol::{
        Components, DiscoveryDocument, DiscoveryInfo, MethodDoc, OPENRPC_VERSION, TypeDescriptor,
    },
    helm_schema::{Schema, SchemaRegistry},
};

use crate::{
    error::{Error, Result},
    incoming::{IncomingMethod, IncomingRegistry},
    outgoing::OutgoingRegistry,
};

/// Name of the built-in discovery method.
pub const RPC_DISCOVER: &str = "rpc.discover";

/// Describe every discoverable method, incoming first, in registration order.
///
/// `external` schemas are merged into the components; a name also present in
/// `schemas` takes the registry's definition.
pub fn build_discovery_document<C>(
    info: &DiscoveryInfo,
    incoming: &IncomingRegistry<C>,
    outgoing: &OutgoingRegistry,
    schemas: &SchemaRegistry,
    external: &BTreeMap<String, TypeDescriptor>,
) -> DiscoveryDocument {
    let incoming_docs = incoming
        .iter()
        .filter(|method| method.attributes().discoverable)
        .map(|method| MethodDoc::new(method.name().to_string(), method.descriptor()));
    let outgoing_docs = outgoing
        .iter()
        .filter(|entry| entry.discoverable)
        .map(|entry| MethodDoc::new(entry.name.to_string(), &entry.descriptor));

    let mut components = external.clone();
    for (name, descriptor) in schemas.components() {
        components.insert(name.to_string(), descriptor.clone());
    }

    DiscoveryDocument {
        openrpc: OPENRPC_VERSION.to_string(),
        info: info.clone(),
        methods: incoming_docs.chain(outgoing_docs).collect(),
        components: Components {
            schemas: components,
        },
    }
}

/// Check that every `$ref` reachable from a discoverable method, or from a
/// listed component, names a component the document will contain.
pub fn check_references<C>(
    incoming: &IncomingRegistry<C>,
    outgoing: &OutgoingRegistry,
    schemas: &SchemaRegistry,
    external: &BTreeMap<String, TypeDescriptor>,
) -> Result<()> {
    let incoming = incoming
        .iter()
        .filter(|method| method.attributes().discoverable)
        .map(|method| (method.name().to_string(), method.descriptor().clone()));
    let outgoing = outgoing
        .iter()
        .filter(|entry| entry.discoverable)
        .map(|entry| (entry.name.to_string(), entry.descriptor.clone()));
    for (owner, descriptor) in incoming.chain(outgoing) {
        for content in descriptor.params.iter().chain(descriptor.result.iter()) {
            check_descriptor(&owner, &content.schema, schemas, external)?;
        }
    }
    for (name, descriptor) in schemas.components().chain(
        external
            .iter()
            .map(|(name, descriptor)| (name.as_str(), descriptor)),
    ) {
        check_descriptor(&format!("schema {name}"), descriptor, schemas, external)?;
    }
    Ok(())
}

fn check_descriptor(
    owner: &str,
    descriptor: &TypeDescriptor,
    schemas: &SchemaRegistry,
    external: &BTreeMap<String, TypeDescriptor>,
) -> Result<()> {
    match descriptor
        .referenced_components()
        .into_iter()
        .find(|name| !schemas.contains(name) && !external.contains_key(*name))
    {
        Some(missing) => Err(Error::Registration(format!(
            "{owner} references undefined schema {missing}"
        ))),
        None => Ok(()),
    }
}

/// The built-in `rpc.discover` method. Hidden from its own output and never
/// marshalled to the main thread.
pub fn discover_method<C: 'static>() -> Result<IncomingMethod<C>> {
    IncomingMethod::parameterless(RPC_DISCOVER, |ctx, _remote| Ok(ctx.discover()))
        .description("Describe the methods this server exposes")
        .result("result", Schema::<DiscoveryDocument>::literal("object"))
        .no_main_thread()
        .not_discoverable()
        .build()
}
