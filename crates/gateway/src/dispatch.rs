//! Routing of incoming calls to their handlers.

use std::{
    collections::BTreeMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use {
    helm_protocol::{DiscoveryDocument, DiscoveryInfo, TypeDescriptor},
    helm_schema::{MethodName, SchemaRegistry},
    serde_json::Value,
    tracing::{debug, error},
};

use crate::{
    connection::ConnectionId,
    discovery::{build_discovery_document, check_references, discover_method},
    error::{Error, Result},
    incoming::{Handler, IncomingMethod, IncomingRegistry},
    main_thread::MainThreadHandle,
    outgoing::OutgoingRegistry,
};

/// What a handler can see besides its params.
pub struct Context<'a, C> {
    dispatcher: &'a Dispatcher<C>,
}

impl<'a, C> Context<'a, C> {
    /// The embedding application's state.
    pub fn app(&self) -> &'a C {
        &self.dispatcher.app
    }

    pub fn discover(&self) -> DiscoveryDocument {
        self.dispatcher.discover()
    }

    pub fn dispatcher(&self) -> &'a Dispatcher<C> {
        self.dispatcher
    }
}

/// Owns the registries and runs incoming calls against them.
///
/// Built once at startup and shared behind an `Arc`; registries are
/// read-only after that.
pub struct Dispatcher<C> {
    app: Arc<C>,
    incoming: IncomingRegistry<C>,
    outgoing: OutgoingRegistry,
    schemas: SchemaRegistry,
    external_schemas: BTreeMap<String, TypeDescriptor>,
    info: DiscoveryInfo,
    main_thread: Option<MainThreadHandle>,
}

impl<C: Send + Sync + 'static> Dispatcher<C> {
    /// Build a dispatcher. Registers `rpc.discover` unless the registry
    /// already has a method by that name. Fails if a discoverable method
    /// references a schema that is not registered.
    pub fn new(
        app: Arc<C>,
        mut incoming: IncomingRegistry<C>,
        outgoing: OutgoingRegistry,
        schemas: SchemaRegistry,
    ) -> Result<Self> {
        let discover = discover_method()?;
        if !incoming.contains(discover.name()) {
            incoming.register(discover)?;
        }
        check_references(&incoming, &outgoing, &schemas, &BTreeMap::new())?;
        Ok(Self {
            app,
            incoming,
            outgoing,
            schemas,
            external_schemas: BTreeMap::new(),
            info: DiscoveryInfo {
                title: "Helm Management Server".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            main_thread: None,
        })
    }

    pub fn with_info(mut self, info: DiscoveryInfo) -> Self {
        self.info = info;
        self
    }

    /// Schemas owned by the embedder, listed alongside the registry's.
    pub fn with_external_schemas(
        mut self,
        schemas: BTreeMap<String, TypeDescriptor>,
    ) -> Result<Self> {
        check_references(&self.incoming, &self.outgoing, &self.schemas, &schemas)?;
        self.external_schemas = schemas;
        Ok(self)
    }

    /// Route `run_on_main_thread` handlers through `handle`. Without one they
    /// run inline on the connection task.
    pub fn with_main_thread(mut self, handle: MainThreadHandle) -> Self {
        self.main_thread = Some(handle);
        self
    }

    /// Dispatch one call and return its encoded result.
    pub async fn dispatch(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        remote: ConnectionId,
    ) -> Result<Value> {
        let entry = self.resolve(method)?;
        match &self.main_thread {
            Some(main) if entry.attributes().run_on_main_thread => {
                let this = Arc::clone(self);
                main.run(move || this.invoke(&entry, params, remote))
                    .await
                    .and_then(|outcome| outcome)
            },
            _ => self.invoke(&entry, params, remote),
        }
    }
}

impl<C> Dispatcher<C> {
    pub fn app(&self) -> &Arc<C> {
        &self.app
    }

    pub fn incoming(&self) -> &IncomingRegistry<C> {
        &self.incoming
    }

    pub fn outgoing(&self) -> &OutgoingRegistry {
        &self.outgoing
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn discover(&self) -> DiscoveryDocument {
        build_discovery_document(
            &self.info,
            &self.incoming,
            &self.outgoing,
            &self.schemas,
            &self.external_schemas,
        )
    }

    fn resolve(&self, method: &str) -> Result<Arc<IncomingMethod<C>>> {
        let name = MethodName::parse(method)
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        self.incoming
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::MethodNotFound(name.to_string()))
    }

    /// Run the handler on the current thread. A panicking handler becomes an
    /// internal error.
    fn invoke(
        &self,
        entry: &IncomingMethod<C>,
        params: Option<Value>,
        remote: ConnectionId,
    ) -> Result<Value> {
        let ctx = Context { dispatcher: self };
        catch_unwind(AssertUnwindSafe(|| call_handler(&ctx, entry, params, remote)))
            .unwrap_or_else(|_| {
                error!(method = %entry.name(), %remote, "handler panicked");
                Err(Error::Internal(
                    "Unknown error handling request - check server logs".into(),
                ))
            })
    }
}

fn call_handler<C>(
    ctx: &Context<'_, C>,
    entry: &IncomingMethod<C>,
    params: Option<Value>,
    remote: ConnectionId,
) -> Result<Value> {
    match entry.handler() {
        Handler::Parameterless(handler) => {
            match params {
                None => {},
                Some(Value::Array(items)) if items.is_empty() => {},
                Some(_) => {
                    return Err(Error::Protocol(
                        "Expected no params, or an empty array".into(),
                    ));
                },
            }
            handler(ctx, remote)
        },
        Handler::Parameterized { param_name, invoke } => {
            let raw = match params {
                Some(Value::Object(mut named)) => named.remove(param_name).ok_or_else(|| {
                    Error::Protocol(format!(
                        "Params passed by-name, but expected param [{param_name}] does not exist"
                    ))
                })?,
                Some(Value::Array(items)) => {
                    let Ok([single]) = <[Value; 1]>::try_from(items) else {
                        return Err(Error::Protocol(
                            "Expected exactly one element in the params array".into(),
                        ));
                    };
                    single
                },
                _ => {
                    return Err(Error::Protocol("Expected params as array or named".into()));
                },
            };
            debug!(method = %entry.name(), %remote, "invoking handler");
            invoke(ctx, raw, remote)
        },
    }
}
