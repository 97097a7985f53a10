//! Principal extraction from call metadata.
//!
//! Upstream gateways forward the authenticated user as a JSON object in a
//! single metadata entry (key `user` by default). An absent or empty entry
//! means the call is anonymous.

use crate::error::ViewError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tonic::metadata::MetadataMap;

/// User identity forwarded in call metadata.
///
/// Unknown keys are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextUser {
    pub id: Option<i64>,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ContextUser {
    fn default() -> Self {
        Self {
            id: None,
            username: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            is_staff: false,
            is_superuser: false,
            is_active: true,
            extra: Map::new(),
        }
    }
}

impl fmt::Display for ContextUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full_name = format!("{} {}", self.first_name, self.last_name);
        let full_name = full_name.trim();
        if full_name.is_empty() {
            write!(f, "{}", self.username)
        } else {
            write!(f, "{full_name}")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Principal {
    #[default]
    Anonymous,
    User(ContextUser),
}

impl Principal {
    /// Reads the principal stored under `key`.
    ///
    /// `""`, `{}` and `null` are anonymous.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::InvalidPrincipal`] when the entry is not ASCII,
    /// not JSON, or not a JSON object describing a user.
    pub fn from_metadata(metadata: &MetadataMap, key: &str) -> Result<Self, ViewError> {
        let Some(raw) = metadata.get(key) else {
            return Ok(Self::Anonymous);
        };
        let raw = raw.to_str().map_err(|e| ViewError::InvalidPrincipal {
            reason: e.to_string(),
        })?;
        Self::from_json(raw)
    }

    /// Decodes a principal from its JSON payload.
    ///
    /// # Errors
    ///
    /// See [`Principal::from_metadata`].
    pub fn from_json(raw: &str) -> Result<Self, ViewError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::Anonymous);
        }

        let value: Value = serde_json::from_str(raw).map_err(|e| ViewError::InvalidPrincipal {
            reason: e.to_string(),
        })?;

        match &value {
            Value::Null => return Ok(Self::Anonymous),
            Value::Object(map) if map.is_empty() => return Ok(Self::Anonymous),
            Value::Object(_) => {}
            other => {
                return Err(ViewError::InvalidPrincipal {
                    reason: format!("expected a JSON object, found `{other}`"),
                });
            }
        }

        serde_json::from_value(value)
            .map(Self::User)
            .map_err(|e| ViewError::InvalidPrincipal {
                reason: e.to_string(),
            })
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    pub fn user(&self) -> Option<&ContextUser> {
        match self {
            Self::Anonymous => None,
            Self::User(user) => Some(user),
        }
    }
}
