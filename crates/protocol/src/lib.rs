//! Management JSON-RPC protocol definitions.
//!
//! All communication uses JSON-RPC 2.0 text frames over a WebSocket. Both
//! peers may send requests: the client calls server methods, and the server
//! pushes notifications or calls methods on the client.
//!
//! Frame kinds:
//! - [`RequestFrame`]: a call (with `id`) or a notification (without `id`)
//! - [`ResponseFrame`]: a result or an error, correlated by `id`
//!
//! The discovery document types ([`DiscoveryDocument`] and friends) describe
//! every discoverable method in an OpenRPC-shaped manifest.

use std::collections::BTreeMap;

use {
    serde::{Deserialize, Deserializer, Serialize, Serializer},
    serde_json::{Map, Value},
};

// ── Constants ────────────────────────────────────────────────────────────────

pub const JSONRPC_VERSION: &str = "2.0";
pub const OPENRPC_VERSION: &str = "1.3.2";
/// WebSocket subprotocol used when the token travels in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "helm-v1";
/// Namespace assumed for method names given without one.
pub const DEFAULT_NAMESPACE: &str = "helm";
/// Path prefix of fire-and-forget outgoing methods.
pub const NOTIFICATION_PREFIX: &str = "notification/";
pub const MAX_PAYLOAD_BYTES: usize = 524_288; // 512 KB
pub const TICK_INTERVAL_MS: u64 = 1_000;
pub const REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const OUTBOUND_BUFFER: usize = 256;

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ── Error shape ──────────────────────────────────────────────────────────────

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Standard error for `code` with a human-readable detail in `data`.
    pub fn with_detail(code: i32, detail: impl Into<String>) -> Self {
        Self {
            code,
            message: standard_message(code).to_string(),
            data: Some(Value::String(detail.into())),
        }
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::with_detail(error_codes::PARSE_ERROR, detail)
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::with_detail(error_codes::INVALID_REQUEST, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::with_detail(error_codes::INTERNAL_ERROR, detail)
    }
}

/// Canonical JSON-RPC message for a reserved code.
pub fn standard_message(code: i32) -> &'static str {
    match code {
        error_codes::PARSE_ERROR => "Parse error",
        error_codes::INVALID_REQUEST => "Invalid Request",
        error_codes::METHOD_NOT_FOUND => "Method not found",
        error_codes::INVALID_PARAMS => "Invalid params",
        _ => "Internal error",
    }
}

// ── Request ids ──────────────────────────────────────────────────────────────

/// A JSON-RPC request id. Only strings, numbers and `null` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    Number(serde_json::Number),
    String(String),
    Null,
}

impl Id {
    /// Convert a raw `id` member. Returns `None` for booleans, arrays and objects.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Null => Some(Self::Null),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Null => Value::Null,
        }
    }
}

impl From<u64> for Id {
    fn from(id: u64) -> Self {
        Self::Number(id.into())
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom("request id must be a string, a number or null")
        })
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// A call or notification, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub jsonrpc: String, // always "2.0"
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

impl RequestFrame {
    /// A call expecting a response correlated by `id`.
    pub fn call(id: impl Into<Id>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: Some(Value::Array(params)),
            id: Some(id.into()),
        }
    }

    /// A fire-and-forget notification.
    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: Some(Value::Array(params)),
            id: None,
        }
    }
}

/// A result or an error for a previously received call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub jsonrpc: String, // always "2.0"
    pub id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl ResponseFrame {
    pub fn ok(id: Id, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Id, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

// ── Inbound classification ───────────────────────────────────────────────────

/// What a decoded inbound JSON object turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A call (`id` is `Some`) or a notification (`id` is `None`).
    Request {
        id: Option<Id>,
        method: String,
        params: Option<Value>,
    },
    /// A result for a call this side initiated.
    Response { id: Value, result: Value },
    /// An error for a call this side initiated, or an unsolicited error.
    Error { id: Option<Value>, error: Value },
    /// Anything else. `id` is echoed back in the error response.
    Invalid { id: Value, reason: String },
}

impl Inbound {
    pub fn classify(frame: &Map<String, Value>) -> Self {
        let id = frame.get("id");
        let method = frame.get("method");
        let result = frame.get("result");
        let error = frame.get("error");
        let params = frame.get("params").cloned();

        match (method, result, error) {
            (Some(Value::String(method)), None, None) => match id {
                None => Self::Request {
                    id: None,
                    method: method.clone(),
                    params,
                },
                Some(raw) => match Id::from_value(raw) {
                    Some(id) => Self::Request {
                        id: Some(id),
                        method: method.clone(),
                        params,
                    },
                    None => Self::Invalid {
                        id: Value::Null,
                        reason: "Invalid request id - only String, Number and NULL supported"
                            .into(),
                    },
                },
            },
            (None, Some(result), None) if id.is_some() => Self::Response {
                id: id.cloned().unwrap_or(Value::Null),
                result: result.clone(),
            },
            (None, None, Some(error)) => Self::Error {
                id: id.cloned(),
                error: error.clone(),
            },
            _ => Self::Invalid {
                id: id.cloned().unwrap_or(Value::Null),
                reason: "Expected exactly one of method, result or error".into(),
            },
        }
    }
}

// ── Schema descriptors ───────────────────────────────────────────────────────

/// Wire shape of a JSON schema fragment used in discovery documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "one_or_many::serialize",
        deserialize_with = "one_or_many::deserialize"
    )]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<TypeDescriptor>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, TypeDescriptor>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

impl TypeDescriptor {
    /// Names of every component referenced from this descriptor, recursively.
    pub fn referenced_components(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Some(name) = self
            .reference
            .as_deref()
            .and_then(|r| r.strip_prefix(COMPONENT_REF_PREFIX))
        {
            out.push(name);
        }
        if let Some(items) = &self.items {
            items.collect_refs(out);
        }
        for property in self.properties.values() {
            property.collect_refs(out);
        }
    }
}

/// Prefix of `$ref` values pointing into `components.schemas`.
pub const COMPONENT_REF_PREFIX: &str = "#/components/schemas/";

mod one_or_many {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(types: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        match types {
            [single] => single.serialize(serializer),
            many => many.serialize(serializer),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        })
    }
}

/// A named parameter or result slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    pub name: String,
    pub schema: TypeDescriptor,
}

/// Type-erased description of one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ContentDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ContentDescriptor>,
}

// ── Discovery document ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub title: String,
    pub version: String,
}

/// One entry of [`DiscoveryDocument::methods`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDoc {
    pub name: String,
    pub description: String,
    pub params: Vec<ContentDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ContentDescriptor>,
}

impl MethodDoc {
    pub fn new(name: impl Into<String>, descriptor: &MethodDescriptor) -> Self {
        Self {
            name: name.into(),
            description: descriptor.description.clone(),
            params: descriptor.params.iter().cloned().collect(),
            result: descriptor.result.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    pub schemas: BTreeMap<String, TypeDescriptor>,
}

/// Self-describing manifest of every discoverable method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub openrpc: String,
    pub info: DiscoveryInfo,
    pub methods: Vec<MethodDoc>,
    pub components: Components,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, serde_json::json};

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    // ── Classification ─────────────────────────────────────────────────

    #[test]
    fn classify_call_with_numeric_id() {
        let frame = object(json!({"jsonrpc":"2.0","method":"echo","params":["hi"],"id":1}));
        match Inbound::classify(&frame) {
            Inbound::Request { id, method, params } => {
                assert_eq!(id, Some(Id::from(1)));
                assert_eq!(method, "echo");
                assert_eq!(params, Some(json!(["hi"])));
            },
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn classify_notification_without_id() {
        let frame = object(json!({"method":"echo"}));
        assert!(matches!(
            Inbound::classify(&frame),
            Inbound::Request { id: None, .. }
        ));
    }

    #[test]
    fn classify_explicit_null_id_is_a_call() {
        let frame = object(json!({"method":"echo","id":null}));
        assert!(matches!(
            Inbound::classify(&frame),
            Inbound::Request {
                id: Some(Id::Null),
                ..
            }
        ));
    }

    #[test]
    fn classify_rejects_object_id() {
        let frame = object(json!({"method":"echo","id":{"nested":true}}));
        assert!(matches!(
            Inbound::classify(&frame),
            Inbound::Invalid { .. }
        ));
    }

    #[test]
    fn classify_response_and_error() {
        let frame = object(json!({"jsonrpc":"2.0","id":7,"result":true}));
        assert_eq!(Inbound::classify(&frame), Inbound::Response {
            id: json!(7),
            result: json!(true),
        });

        let frame = object(json!({"id":7,"error":{"code":-1,"message":"nope"}}));
        assert!(matches!(Inbound::classify(&frame), Inbound::Error {
            id: Some(_),
            ..
        }));
    }

    #[test]
    fn classify_method_and_result_is_invalid() {
        let frame = object(json!({"method":"echo","result":1,"id":3}));
        assert_eq!(Inbound::classify(&frame), Inbound::Invalid {
            id: json!(3),
            reason: "Expected exactly one of method, result or error".into(),
        });
    }

    // ── Frames ─────────────────────────────────────────────────────────

    #[test]
    fn notification_frame_omits_id() {
        let frame = RequestFrame::notification("helm:notification/server/started", vec![]);
        let json = serde_json::to_value(&frame).unwrap();
        assert!(!json.as_object().unwrap().contains_key("id"));
        assert_eq!(json["params"], json!([]));
    }

    #[test]
    fn error_response_carries_standard_message_and_detail() {
        let frame = ResponseFrame::err(
            Id::from(3),
            ErrorObject::with_detail(error_codes::INVALID_PARAMS, "bad"),
        );
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["error"]["code"], -32602);
        assert_eq!(json["error"]["message"], "Invalid params");
        assert_eq!(json["error"]["data"], "bad");
        assert!(!json.as_object().unwrap().contains_key("result"));
    }

    #[test]
    fn id_rejects_boolean() {
        assert!(serde_json::from_value::<Id>(json!(true)).is_err());
        assert_eq!(serde_json::from_value::<Id>(json!("a")).unwrap(), Id::String("a".into()));
    }

    // ── Descriptors ────────────────────────────────────────────────────

    #[test]
    fn single_type_serializes_as_string() {
        let desc = TypeDescriptor {
            types: vec!["string".into()],
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&desc).unwrap(), json!({"type":"string"}));

        let desc = TypeDescriptor {
            types: vec!["boolean".into(), "integer".into()],
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&desc).unwrap(),
            json!({"type":["boolean","integer"]})
        );
    }

    #[test]
    fn type_descriptor_parses_both_type_forms() {
        let one: TypeDescriptor = serde_json::from_value(json!({"type":"string"})).unwrap();
        assert_eq!(one.types, vec!["string"]);
        let many: TypeDescriptor =
            serde_json::from_value(json!({"type":["boolean","integer"]})).unwrap();
        assert_eq!(many.types.len(), 2);
    }

    #[test]
    fn referenced_components_walks_items_and_properties() {
        let player = TypeDescriptor {
            reference: Some(format!("{COMPONENT_REF_PREFIX}player")),
            ..Default::default()
        };
        let desc = TypeDescriptor {
            types: vec!["object".into()],
            properties: BTreeMap::from([("players".into(), TypeDescriptor {
                types: vec!["array".into()],
                items: Some(Box::new(player)),
                ..Default::default()
            })]),
            ..Default::default()
        };
        assert_eq!(desc.referenced_components(), vec!["player"]);
    }
}
