//! Methods the server answers.
//!
//! Handlers are written against typed params and results. [`IncomingMethodBuilder::build`]
//! erases them into closures that decode the raw param, run the handler and
//! encode the result, so the dispatcher only ever sees JSON values.

use std::{collections::HashMap, sync::Arc};

use {
    helm_protocol::MethodDescriptor,
    helm_schema::{Content, MethodInfo, MethodName, Schema},
    serde::{Serialize, de::DeserializeOwned},
    serde_json::Value,
};

use crate::{
    connection::ConnectionId,
    dispatch::Context,
    error::{Error, Result},
};

type ParameterlessFn<C> = dyn Fn(&Context<'_, C>, ConnectionId) -> Result<Value> + Send + Sync;
type ParameterizedFn<C> =
    dyn Fn(&Context<'_, C>, Value, ConnectionId) -> Result<Value> + Send + Sync;

/// Type-erased handler.
pub enum Handler<C> {
    Parameterless(Box<ParameterlessFn<C>>),
    Parameterized {
        /// Key looked up when params arrive by name.
        param_name: String,
        invoke: Box<ParameterizedFn<C>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub run_on_main_thread: bool,
    pub discoverable: bool,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            run_on_main_thread: true,
            discoverable: true,
        }
    }
}

pub struct IncomingMethod<C> {
    name: MethodName,
    descriptor: MethodDescriptor,
    attributes: Attributes,
    handler: Handler<C>,
}

impl<C> std::fmt::Debug for IncomingMethod<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingMethod")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

impl<C: 'static> IncomingMethod<C> {
    /// Start a method that takes no params.
    pub fn parameterless<R, F>(name: &str, handler: F) -> IncomingMethodBuilder<C, (), R>
    where
        R: Serialize + DeserializeOwned + 'static,
        F: Fn(&Context<'_, C>, ConnectionId) -> Result<R> + Send + Sync + 'static,
    {
        IncomingMethodBuilder::new(name, TypedHandler::Parameterless(Box::new(handler)))
    }

    /// Start a method that takes exactly one param.
    pub fn parameterized<P, R, F>(name: &str, handler: F) -> IncomingMethodBuilder<C, P, R>
    where
        P: DeserializeOwned + Serialize + 'static,
        R: Serialize + DeserializeOwned + 'static,
        F: Fn(&Context<'_, C>, P, ConnectionId) -> Result<R> + Send + Sync + 'static,
    {
        IncomingMethodBuilder::new(name, TypedHandler::Parameterized(Box::new(handler)))
    }
}

impl<C> IncomingMethod<C> {
    pub fn name(&self) -> &MethodName {
        &self.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    pub fn handler(&self) -> &Handler<C> {
        &self.handler
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

type TypedParameterless<C, R> =
    dyn Fn(&Context<'_, C>, ConnectionId) -> Result<R> + Send + Sync;
type TypedParameterized<C, P, R> =
    dyn Fn(&Context<'_, C>, P, ConnectionId) -> Result<R> + Send + Sync;

enum TypedHandler<C, P, R> {
    Parameterless(Box<TypedParameterless<C, R>>),
    Parameterized(Box<TypedParameterized<C, P, R>>),
}

pub struct IncomingMethodBuilder<C, P, R> {
    name: String,
    description: String,
    param: Option<Content<P>>,
    result: Option<Content<R>>,
    attributes: Attributes,
    handler: TypedHandler<C, P, R>,
}

impl<C, P, R> IncomingMethodBuilder<C, P, R>
where
    C: 'static,
    P: DeserializeOwned + Serialize + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    fn new(name: &str, handler: TypedHandler<C, P, R>) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            param: None,
            result: None,
            attributes: Attributes::default(),
            handler,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn param(mut self, name: impl Into<String>, schema: Schema<P>) -> Self {
        self.param = Some(Content::new(name, schema));
        self
    }

    pub fn result(mut self, name: impl Into<String>, schema: Schema<R>) -> Self {
        self.result = Some(Content::new(name, schema));
        self
    }

    /// Run the handler on the dispatching task instead of the main thread.
    pub fn no_main_thread(mut self) -> Self {
        self.attributes.run_on_main_thread = false;
        self
    }

    /// Hide the method from the discovery document.
    pub fn not_discoverable(mut self) -> Self {
        self.attributes.discoverable = false;
        self
    }

    pub fn build(self) -> Result<IncomingMethod<C>> {
        let name = MethodName::parse(&self.name)?;
        let info = MethodInfo::responding(self.description, self.param, self.result)?;
        let descriptor = info.descriptor();
        let Some(result) = info.result().cloned() else {
            return Err(Error::Registration("No response defined".into()));
        };

        let handler = match self.handler {
            TypedHandler::Parameterless(handler) => {
                if info.params().is_some() {
                    return Err(Error::Registration(format!(
                        "{name}: parameterless method declares a param"
                    )));
                }
                Handler::Parameterless(erase_parameterless(move |ctx, remote| {
                    let value = handler(ctx, remote)?;
                    Ok(result.schema.encode(&value)?)
                }))
            },
            TypedHandler::Parameterized(handler) => {
                let Some(param) = info.params().cloned() else {
                    return Err(Error::Registration(format!(
                        "{name}: parameterized method declares no param"
                    )));
                };
                Handler::Parameterized {
                    param_name: param.name.clone(),
                    invoke: erase_parameterized(move |ctx, raw, remote| {
                        let params = param.schema.decode(raw)?;
                        let value = handler(ctx, params, remote)?;
                        Ok(result.schema.encode(&value)?)
                    }),
                }
            },
        };

        Ok(IncomingMethod {
            name,
            descriptor,
            attributes: self.attributes,
            handler,
        })
    }

    pub fn register(self, registry: &mut IncomingRegistry<C>) -> Result<()> {
        registry.register(self.build()?)
    }
}

fn erase_parameterless<C, F>(f: F) -> Box<ParameterlessFn<C>>
where
    F: Fn(&Context<'_, C>, ConnectionId) -> Result<Value> + Send + Sync + 'static,
{
    Box::new(f)
}

fn erase_parameterized<C, F>(f: F) -> Box<ParameterizedFn<C>>
where
    F: Fn(&Context<'_, C>, Value, ConnectionId) -> Result<Value> + Send + Sync + 'static,
{
    Box::new(f)
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Incoming methods by name, in registration order.
pub struct IncomingRegistry<C> {
    methods: Vec<Arc<IncomingMethod<C>>>,
    by_name: HashMap<MethodName, usize>,
}

impl<C> Default for IncomingRegistry<C> {
    fn default() -> Self {
        Self {
            methods: Vec::new(),
            by_name: HashMap::new(),
        }
    }
}

impl<C> IncomingRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: IncomingMethod<C>) -> Result<()> {
        if self.by_name.contains_key(&method.name) {
            return Err(Error::Registration(format!(
                "duplicate incoming method {}",
                method.name
            )));
        }
        self.by_name.insert(method.name.clone(), self.methods.len());
        self.methods.push(Arc::new(method));
        Ok(())
    }

    pub fn get(&self, name: &MethodName) -> Option<&Arc<IncomingMethod<C>>> {
        self.by_name.get(name).map(|&idx| &self.methods[idx])
    }

    pub fn contains(&self, name: &MethodName) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IncomingMethod<C>> {
        self.methods.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        super::*,
        helm_schema::{integer, string},
    };

    fn echo() -> IncomingMethodBuilder<(), String, String> {
        IncomingMethod::parameterized("echo", |_ctx, msg: String, _remote| Ok(msg))
            .description("Echo a message")
            .param("msg", string())
            .result("msg", string())
    }

    #[test]
    fn defaults_run_on_main_thread_and_are_discoverable() {
        let method = echo().build().unwrap();
        assert_eq!(method.attributes(), Attributes {
            run_on_main_thread: true,
            discoverable: true,
        });
        assert_eq!(method.name().to_string(), "helm:echo");
        assert_eq!(method.descriptor().description, "Echo a message");
    }

    #[test]
    fn attribute_overrides() {
        let method = echo().no_main_thread().not_discoverable().build().unwrap();
        assert!(!method.attributes().run_on_main_thread);
        assert!(!method.attributes().discoverable);
    }

    #[test]
    fn missing_result_is_rejected() {
        let err = IncomingMethod::<()>::parameterized("echo", |_, msg: String, _| Ok(msg))
            .param("msg", string())
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "registration: No response defined");
    }

    #[test]
    fn parameterized_without_param_is_rejected() {
        let err = IncomingMethod::<()>::parameterized("echo", |_, msg: String, _| Ok(msg))
            .result("msg", string())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Registration(_)));
    }

    #[test]
    fn invalid_name_is_rejected() {
        let err = IncomingMethod::<()>::parameterless("Bad Name", |_, _| Ok(1_i64))
            .result("n", integer())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Registration(_)));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = IncomingRegistry::new();
        echo().register(&mut registry).unwrap();
        let err = echo().register(&mut registry).unwrap_err();
        assert!(err.to_string().contains("duplicate incoming method helm:echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_keeps_order() {
        let mut registry = IncomingRegistry::<()>::new();
        IncomingMethod::parameterless("zeta", |_, _| Ok(1_i64))
            .result("n", integer())
            .register(&mut registry)
            .unwrap();
        echo().register(&mut registry).unwrap();
        let names: Vec<_> = registry.iter().map(|m| m.name().path().to_string()).collect();
        assert_eq!(names, vec!["zeta", "echo"]);
        assert!(registry.contains(&MethodName::parse("helm:echo").unwrap()));
    }
}
