// Secret resolution for credentials referenced from configuration

use crate::errors::SecretError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where a secret lives: `{ env = "NAME" }`, `{ file = "path" }` or `{ value = "..." }`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum SecretRef {
    Env(String),
    File(PathBuf),
    Value(String),
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretRef::Env(name) => write!(f, "SecretRef::Env({})", name),
            SecretRef::File(path) => write!(f, "SecretRef::File({})", path.display()),
            SecretRef::Value(_) => write!(f, "SecretRef::Value(***)"),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretRef::Env(name) => write!(f, "env:{}", name),
            SecretRef::File(path) => write!(f, "file:{}", path.display()),
            SecretRef::Value(_) => write!(f, "inline value"),
        }
    }
}

/// Turns a secret reference into plaintext.
/// Implementations must fail rather than return an empty secret.
pub trait SecretProvider: Send + Sync {
    fn resolve(&self, secret: &SecretRef) -> Result<String, SecretError>;
}

/// Environment variables, files (trailing newline trimmed) and inline values
#[derive(Debug, Default, Clone)]
pub struct DefaultSecretProvider;

impl SecretProvider for DefaultSecretProvider {
    fn resolve(&self, secret: &SecretRef) -> Result<String, SecretError> {
        let value = match secret {
            SecretRef::Env(name) => std::env::var(name)
                .map_err(|_| SecretError::Unavailable(secret.to_string()))?,
            SecretRef::File(path) => std::fs::read_to_string(path)
                .map_err(|e| SecretError::Io {
                    path: path.clone(),
                    source: e,
                })?
                .trim_end_matches(['\r', '\n'])
                .to_string(),
            SecretRef::Value(value) => value.clone(),
        };

        if value.trim().is_empty() {
            return Err(SecretError::Unavailable(secret.to_string()));
        }
        Ok(value)
    }
}
