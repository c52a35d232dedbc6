use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid method name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("schema '{0}' is already registered with a different definition")]
    SchemaConflict(String),

    #[error("{0}")]
    Decode(#[source] serde_json::Error),

    #[error("{0}")]
    Encode(#[source] serde_json::Error),

    #[error("{0}")]
    Descriptor(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_shows_serde_message() {
        let json_err = serde_json::from_value::<u32>(serde_json::json!("x")).unwrap_err();
        let expected = json_err.to_string();
        let err = Error::Decode(json_err);
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn invalid_name_mentions_input() {
        let err = Error::InvalidName {
            name: "Bad Name".into(),
            reason: "illegal character",
        };
        assert!(err.to_string().contains("Bad Name"));
    }
}
