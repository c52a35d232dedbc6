use std::collections::HashSet;

use {
    axum::{
        Json,
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Response},
    },
    helm_protocol::SUBPROTOCOL,
    secrecy::{ExposeSecret, Secret},
    sha2::{Digest, Sha256},
};

const BEARER_PREFIX: &str = "Bearer ";

/// Result of checking an upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// `echo_subprotocol` is set when the token came in through
    /// `Sec-WebSocket-Protocol`, which then has to be answered.
    Accepted { echo_subprotocol: bool },
    Rejected(&'static str),
}

/// Bearer-token check for the WebSocket upgrade.
///
/// Browsers cannot set `Authorization` on a WebSocket, so the token may also
/// arrive as the second entry of `Sec-WebSocket-Protocol: helm-v1, <token>`.
/// That path is only accepted from allowed origins.
pub struct BearerAuth {
    token: Secret<String>,
    allowed_origins: HashSet<String>,
}

impl BearerAuth {
    pub fn new<I, S>(token: Secret<String>, allowed_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            token,
            allowed_origins: allowed_origins
                .into_iter()
                .map(Into::into)
                .filter(|origin: &String| !origin.is_empty())
                .collect(),
        }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome {
        if let Some(token) = bearer_token(headers) {
            return if self.token_matches(token) {
                AuthOutcome::Accepted {
                    echo_subprotocol: false,
                }
            } else {
                AuthOutcome::Rejected("Invalid API key")
            };
        }
        let Some(token) = protocol_token(headers) else {
            return AuthOutcome::Rejected("Missing API key");
        };
        if !self.origin_allowed(headers) {
            return AuthOutcome::Rejected("Origin Not Allowed");
        }
        if self.token_matches(token) {
            AuthOutcome::Accepted {
                echo_subprotocol: true,
            }
        } else {
            AuthOutcome::Rejected("Invalid API key")
        }
    }

    /// Compares SHA-256 digests of both sides. Empty tokens never match.
    pub fn token_matches(&self, candidate: &str) -> bool {
        let expected = self.token.expose_secret();
        if candidate.is_empty() || expected.is_empty() {
            return false;
        }
        Sha256::digest(expected.as_bytes()) == Sha256::digest(candidate.as_bytes())
    }

    fn origin_allowed(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|origin| !origin.is_empty() && self.allowed_origins.contains(origin))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
}

fn protocol_token(headers: &HeaderMap) -> Option<&str> {
    let (protocol, token) = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())?
        .split_once(',')?;
    (protocol.trim() == SUBPROTOCOL).then(|| token.trim())
}

/// The 401 sent instead of the upgrade.
pub fn unauthorized(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::CONNECTION, "close")],
        Json(serde_json::json!({ "error": "Unauthorized", "message": reason })),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn auth() -> BearerAuth {
        BearerAuth::new(Secret::new("s3cret".to_string()), ["https://panel.example"])
    }

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), value.parse().unwrap());
        }
        map
    }

    #[test]
    fn valid_bearer_token() {
        let h = headers(&[(header::AUTHORIZATION, "Bearer s3cret")]);
        assert_eq!(auth().authenticate(&h), AuthOutcome::Accepted {
            echo_subprotocol: false
        });
    }

    #[test]
    fn wrong_bearer_token() {
        let h = headers(&[(header::AUTHORIZATION, "Bearer nope")]);
        assert_eq!(auth().authenticate(&h), AuthOutcome::Rejected("Invalid API key"));
    }

    #[test]
    fn empty_bearer_token() {
        let h = headers(&[(header::AUTHORIZATION, "Bearer ")]);
        assert_eq!(auth().authenticate(&h), AuthOutcome::Rejected("Invalid API key"));
    }

    #[test]
    fn missing_credentials() {
        assert_eq!(
            auth().authenticate(&HeaderMap::new()),
            AuthOutcome::Rejected("Missing API key")
        );
        let basic = headers(&[(header::AUTHORIZATION, "Basic abc")]);
        assert_eq!(auth().authenticate(&basic), AuthOutcome::Rejected("Missing API key"));
    }

    #[test]
    fn subprotocol_token_from_allowed_origin() {
        let h = headers(&[
            (header::SEC_WEBSOCKET_PROTOCOL, "helm-v1, s3cret"),
            (header::ORIGIN, "https://panel.example"),
        ]);
        assert_eq!(auth().authenticate(&h), AuthOutcome::Accepted {
            echo_subprotocol: true
        });
    }

    #[test]
    fn subprotocol_token_requires_origin() {
        let missing = headers(&[(header::SEC_WEBSOCKET_PROTOCOL, "helm-v1, s3cret")]);
        assert_eq!(auth().authenticate(&missing), AuthOutcome::Rejected("Origin Not Allowed"));

        let foreign = headers(&[
            (header::SEC_WEBSOCKET_PROTOCOL, "helm-v1, s3cret"),
            (header::ORIGIN, "https://evil.example"),
        ]);
        assert_eq!(auth().authenticate(&foreign), AuthOutcome::Rejected("Origin Not Allowed"));
    }

    #[test]
    fn other_subprotocols_are_not_credentials() {
        let h = headers(&[
            (header::SEC_WEBSOCKET_PROTOCOL, "chat, s3cret"),
            (header::ORIGIN, "https://panel.example"),
        ]);
        assert_eq!(auth().authenticate(&h), AuthOutcome::Rejected("Missing API key"));
    }

    #[test]
    fn empty_configured_token_matches_nothing() {
        let auth = BearerAuth::new(Secret::new(String::new()), Vec::<String>::new());
        assert!(!auth.token_matches(""));
        assert!(!auth.token_matches("anything"));
    }

    #[test]
    fn unauthorized_response_is_401() {
        let response = unauthorized("Missing API key");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }
}
