use {
    helm_protocol::{ErrorObject, error_codes},
    thiserror::Error,
};

use crate::connection::{ConnectionEvent, ConnectionState};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    /// The params had the wrong shape for the method.
    #[error("{0}")]
    Protocol(String),

    #[error("{0}")]
    ParamDecode(String),

    #[error("{0}")]
    Encoding(String),

    /// Raised by a method handler.
    #[error("{0}")]
    Handler(String),

    #[error("{0}")]
    Internal(String),

    #[error("RPC method {method} timed out waiting for response")]
    Timeout { method: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(ErrorObject),

    #[error("registration: {0}")]
    Registration(String),

    #[error("connection in state {from:?} cannot handle {event:?}")]
    IllegalTransition {
        from: ConnectionState,
        event: ConnectionEvent,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Tls(#[from] rustls::Error),
}

impl Error {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// The JSON-RPC error sent back for a failed call.
    pub fn to_error_object(&self) -> ErrorObject {
        let code = match self {
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::Protocol(_) | Self::ParamDecode(_) => error_codes::INVALID_PARAMS,
            Self::Remote(remote) => return remote.clone(),
            _ => error_codes::INTERNAL_ERROR,
        };
        ErrorObject::with_detail(code, self.to_string())
    }
}

impl From<helm_schema::Error> for Error {
    fn from(err: helm_schema::Error) -> Self {
        match err {
            helm_schema::Error::Decode(e) => Self::ParamDecode(e.to_string()),
            helm_schema::Error::Encode(e) => Self::Encoding(e.to_string()),
            other => Self::Registration(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_error_kind() {
        let cases = [
            (Error::MethodNotFound("helm:nope".into()), -32601),
            (Error::InvalidRequest("bad".into()), -32600),
            (Error::Protocol("shape".into()), -32602),
            (Error::ParamDecode("invalid type".into()), -32602),
            (Error::Encoding("nan".into()), -32603),
            (Error::handler("boom"), -32603),
        ];
        for (err, code) in cases {
            assert_eq!(err.to_error_object().code, code, "{err}");
        }
    }

    #[test]
    fn method_not_found_detail_names_method() {
        let object = Error::MethodNotFound("helm:nope".into()).to_error_object();
        assert_eq!(object.message, "Method not found");
        assert_eq!(
            object.data,
            Some(serde_json::Value::String("Method not found: helm:nope".into()))
        );
    }

    #[test]
    fn schema_errors_map_by_direction() {
        let decode = serde_json::from_str::<i64>("\"x\"").unwrap_err();
        let err: Error = helm_schema::Error::Decode(decode).into();
        assert!(matches!(err, Error::ParamDecode(_)));

        let err: Error = helm_schema::Error::Descriptor("No response defined").into();
        assert_eq!(err.to_string(), "registration: No response defined");
    }
}
