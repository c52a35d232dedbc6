//! Methods the server sends to clients: notifications and server-initiated
//! calls.

use std::{collections::HashSet, sync::Arc};

use {
    helm_protocol::{MethodDescriptor, NOTIFICATION_PREFIX},
    helm_schema::{Content, MethodInfo, MethodName, Schema},
    serde::{Serialize, de::DeserializeOwned},
    serde_json::Value,
};

use crate::error::{Error, Result};

/// Shape of an outgoing method, derived from which schemas it declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingKind {
    /// No params, no result.
    Simple,
    /// Params, no result.
    Notification,
    /// No params, a result.
    ResultOnly,
    /// Params and a result.
    Full,
}

impl OutgoingKind {
    fn of(has_params: bool, has_result: bool) -> Self {
        match (has_params, has_result) {
            (false, false) => Self::Simple,
            (true, false) => Self::Notification,
            (false, true) => Self::ResultOnly,
            (true, true) => Self::Full,
        }
    }

    pub fn has_params(self) -> bool {
        matches!(self, Self::Notification | Self::Full)
    }

    pub fn expects_result(self) -> bool {
        matches!(self, Self::ResultOnly | Self::Full)
    }
}

/// Typed handle to a registered outgoing method.
pub struct OutgoingMethod<P, R> {
    name: MethodName,
    info: Arc<MethodInfo<P, R>>,
    kind: OutgoingKind,
}

impl<P, R> Clone for OutgoingMethod<P, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            info: Arc::clone(&self.info),
            kind: self.kind,
        }
    }
}

impl<P, R> std::fmt::Debug for OutgoingMethod<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingMethod")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl OutgoingMethod<(), ()> {
    /// Start a notification. The path is placed under `notification/`.
    pub fn notification(path: &str) -> OutgoingMethodBuilder<(), ()> {
        OutgoingMethodBuilder::new(Intent::Notification, path)
    }

    /// Start a server-initiated call. A result must be declared.
    pub fn request(path: &str) -> OutgoingMethodBuilder<(), ()> {
        OutgoingMethodBuilder::new(Intent::Request, path)
    }
}

impl<P, R> OutgoingMethod<P, R>
where
    P: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    pub fn name(&self) -> &MethodName {
        &self.name
    }

    pub fn kind(&self) -> OutgoingKind {
        self.kind
    }

    pub fn descriptor(&self) -> MethodDescriptor {
        self.info.descriptor()
    }

    pub fn encode_params(&self, params: &P) -> Result<Value> {
        let Some(content) = self.info.params() else {
            return Err(Error::Protocol(format!("{} does not take params", self.name)));
        };
        Ok(content.schema.encode(params)?)
    }

    pub fn decode_result(&self, raw: Value) -> Result<R> {
        let Some(content) = self.info.result() else {
            return Err(Error::Protocol(format!("{} does not return a result", self.name)));
        };
        content
            .schema
            .decode(raw)
            .map_err(|e| Error::Encoding(format!("{}: {e}", self.name)))
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Notification,
    Request,
}

pub struct OutgoingMethodBuilder<P, R> {
    intent: Intent,
    path: String,
    description: String,
    param: Option<Content<P>>,
    result: Option<Content<R>>,
    discoverable: bool,
}

impl<P, R> OutgoingMethodBuilder<P, R>
where
    P: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    fn new(intent: Intent, path: &str) -> Self {
        Self {
            intent,
            path: path.to_string(),
            description: String::new(),
            param: None,
            result: None,
            discoverable: true,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn param<Q>(self, name: impl Into<String>, schema: Schema<Q>) -> OutgoingMethodBuilder<Q, R> {
        OutgoingMethodBuilder {
            intent: self.intent,
            path: self.path,
            description: self.description,
            param: Some(Content::new(name, schema)),
            result: self.result,
            discoverable: self.discoverable,
        }
    }

    pub fn result<S>(self, name: impl Into<String>, schema: Schema<S>) -> OutgoingMethodBuilder<P, S> {
        OutgoingMethodBuilder {
            intent: self.intent,
            path: self.path,
            description: self.description,
            param: self.param,
            result: Some(Content::new(name, schema)),
            discoverable: self.discoverable,
        }
    }

    pub fn not_discoverable(mut self) -> Self {
        self.discoverable = false;
        self
    }

    fn resolve_name(&self) -> Result<MethodName> {
        let name = MethodName::parse(&self.path)?;
        match self.intent {
            Intent::Notification if !name.is_notification() => Ok(MethodName::new(
                name.namespace(),
                &format!("{NOTIFICATION_PREFIX}{}", name.path()),
            )?),
            Intent::Request if name.is_notification() => Err(Error::Registration(format!(
                "{name}: request paths may not use the {NOTIFICATION_PREFIX} prefix"
            ))),
            _ => Ok(name),
        }
    }

    pub fn register(self, registry: &mut OutgoingRegistry) -> Result<OutgoingMethod<P, R>> {
        let name = self.resolve_name()?;
        let info = match self.intent {
            Intent::Request => MethodInfo::responding(self.description, self.param, self.result)?,
            Intent::Notification if self.result.is_some() => {
                return Err(Error::Registration(format!(
                    "{name}: notifications cannot declare a result"
                )));
            },
            Intent::Notification => MethodInfo::new(self.description, self.param, self.result),
        };
        let kind = OutgoingKind::of(info.params().is_some(), info.result().is_some());
        registry.insert(OutgoingEntry {
            name: name.clone(),
            descriptor: info.descriptor(),
            kind,
            discoverable: self.discoverable,
        })?;
        Ok(OutgoingMethod {
            name,
            info: Arc::new(info),
            kind,
        })
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Erased registry entry, enough to describe the method.
#[derive(Debug, Clone)]
pub struct OutgoingEntry {
    pub name: MethodName,
    pub descriptor: MethodDescriptor,
    pub kind: OutgoingKind,
    pub discoverable: bool,
}

#[derive(Debug, Default)]
pub struct OutgoingRegistry {
    entries: Vec<OutgoingEntry>,
    names: HashSet<MethodName>,
}

impl OutgoingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, entry: OutgoingEntry) -> Result<()> {
        if !self.names.insert(entry.name.clone()) {
            return Err(Error::Registration(format!(
                "duplicate outgoing method {}",
                entry.name
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, name: &MethodName) -> Option<&OutgoingEntry> {
        self.entries.iter().find(|entry| &entry.name == name)
    }

    /// Entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &OutgoingEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        super::*,
        helm_schema::{boolean, integer, string},
        serde_json::json,
    };

    #[test]
    fn variants_follow_declared_schemas() {
        let mut registry = OutgoingRegistry::new();
        let simple = OutgoingMethod::notification("server/started")
            .register(&mut registry)
            .unwrap();
        let note = OutgoingMethod::notification("players/joined")
            .param("player", string())
            .register(&mut registry)
            .unwrap();
        let result_only = OutgoingMethod::request("client/ping")
            .result("pong", string())
            .register(&mut registry)
            .unwrap();
        let full = OutgoingMethod::request("client/confirm")
            .param("question", string())
            .result("accepted", boolean())
            .register(&mut registry)
            .unwrap();

        assert_eq!(simple.kind(), OutgoingKind::Simple);
        assert_eq!(note.kind(), OutgoingKind::Notification);
        assert_eq!(result_only.kind(), OutgoingKind::ResultOnly);
        assert_eq!(full.kind(), OutgoingKind::Full);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn notification_paths_get_prefixed_once() {
        let mut registry = OutgoingRegistry::new();
        let a = OutgoingMethod::notification("server/started")
            .register(&mut registry)
            .unwrap();
        let b = OutgoingMethod::notification("notification/server/stopping")
            .register(&mut registry)
            .unwrap();
        assert_eq!(a.name().to_string(), "helm:notification/server/started");
        assert_eq!(b.name().to_string(), "helm:notification/server/stopping");
        assert!(a.name().is_notification());
    }

    #[test]
    fn requests_may_not_use_the_notification_prefix() {
        let mut registry = OutgoingRegistry::new();
        let err = OutgoingMethod::request("notification/client/ping")
            .result("pong", string())
            .register(&mut registry)
            .unwrap_err();
        assert!(matches!(err, Error::Registration(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn explicit_namespace_is_kept() {
        let mut registry = OutgoingRegistry::new();
        let m = OutgoingMethod::notification("acme:jobs/done")
            .register(&mut registry)
            .unwrap();
        assert_eq!(m.name().to_string(), "acme:notification/jobs/done");
    }

    #[test]
    fn request_without_result_is_rejected() {
        let mut registry = OutgoingRegistry::new();
        let err = OutgoingMethod::request("client/ping")
            .register(&mut registry)
            .unwrap_err();
        assert_eq!(err.to_string(), "registration: No response defined");
        assert!(registry.is_empty());
    }

    #[test]
    fn notification_with_result_is_rejected() {
        let mut registry = OutgoingRegistry::new();
        let err = OutgoingMethod::notification("server/started")
            .result("n", integer())
            .register(&mut registry)
            .unwrap_err();
        assert!(matches!(err, Error::Registration(_)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = OutgoingRegistry::new();
        OutgoingMethod::notification("server/started")
            .register(&mut registry)
            .unwrap();
        assert!(
            OutgoingMethod::notification("server/started")
                .register(&mut registry)
                .is_err()
        );
    }

    #[test]
    fn encode_and_decode_respect_variant() {
        let mut registry = OutgoingRegistry::new();
        let note = OutgoingMethod::notification("players/joined")
            .param("player", string())
            .register(&mut registry)
            .unwrap();
        assert_eq!(note.encode_params(&"steve".to_string()).unwrap(), json!("steve"));
        assert!(matches!(note.decode_result(json!(null)), Err(Error::Protocol(_))));

        let ping = OutgoingMethod::request("client/ping")
            .result("pong", integer())
            .register(&mut registry)
            .unwrap();
        assert!(matches!(ping.encode_params(&()), Err(Error::Protocol(_))));
        assert_eq!(ping.decode_result(json!(7)).unwrap(), 7);
        assert!(ping.decode_result(json!("seven")).is_err());
    }

    #[test]
    fn descriptors_are_kept_for_discovery() {
        let mut registry = OutgoingRegistry::new();
        OutgoingMethod::notification("players/joined")
            .description("A player joined")
            .param("player", string())
            .register(&mut registry)
            .unwrap();
        let entry = registry
            .get(&MethodName::parse("notification/players/joined").unwrap())
            .unwrap();
        assert_eq!(entry.descriptor.description, "A player joined");
        assert!(entry.descriptor.result.is_none());
        assert!(entry.discoverable);
    }
}
