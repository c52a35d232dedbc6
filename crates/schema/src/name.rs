use std::{fmt, str::FromStr};

use helm_protocol::{DEFAULT_NAMESPACE, NOTIFICATION_PREFIX};

use crate::{Error, Result};

/// A namespaced method identifier, `namespace:path`.
///
/// Names given without a namespace resolve to [`DEFAULT_NAMESPACE`], so
/// `"echo"` and `"helm:echo"` name the same method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodName {
    namespace: String,
    path: String,
}

impl MethodName {
    pub fn new(namespace: &str, path: &str) -> Result<Self> {
        let full = || format!("{namespace}:{path}");
        if namespace.is_empty() || !namespace.chars().all(is_namespace_char) {
            return Err(Error::InvalidName {
                name: full(),
                reason: "namespace must be non-empty [a-z0-9_.-]",
            });
        }
        if path.is_empty() || !path.chars().all(is_path_char) {
            return Err(Error::InvalidName {
                name: full(),
                reason: "path must be non-empty [a-z0-9_./-]",
            });
        }
        Ok(Self {
            namespace: namespace.to_string(),
            path: path.to_string(),
        })
    }

    /// Parse `namespace:path` or a bare `path`.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(':') {
            Some((namespace, path)) => Self::new(namespace, path),
            None => Self::new(DEFAULT_NAMESPACE, raw),
        }
    }

    /// A name in the default namespace.
    pub fn local(path: &str) -> Result<Self> {
        Self::new(DEFAULT_NAMESPACE, path)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the path sits under the reserved `notification/` segment.
    pub fn is_notification(&self) -> bool {
        self.path.starts_with(NOTIFICATION_PREFIX)
    }
}

fn is_namespace_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '_' | '.' | '-')
}

fn is_path_char(c: char) -> bool {
    is_namespace_char(c) || c == '/'
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl FromStr for MethodName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
