//! Serialization of resolved rows into response messages.

use crate::{data::Row, error::ViewError};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Maps a resolved row to the payload of a response message.
pub trait Serializer: Send + Sync + 'static {
    /// # Errors
    ///
    /// Any failure surfaces as an internal error on the call.
    fn serialize(&self, row: &Row) -> anyhow::Result<Value>;
}

impl<F> Serializer for F
where
    F: Fn(&Row) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn serialize(&self, row: &Row) -> anyhow::Result<Value> {
        self(row)
    }
}

/// Passes rows through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySerializer;

impl Serializer for IdentitySerializer {
    fn serialize(&self, row: &Row) -> anyhow::Result<Value> {
        Ok(Value::Object(row.clone()))
    }
}

/// Builds a response message from a serialized payload.
///
/// `null` entries are dropped first, so absent and null fields both keep the
/// message's defaults. Keys the message does not know are ignored.
///
/// # Errors
///
/// Returns [`ViewError::Serialization`] when a present field has a type the
/// message cannot hold.
pub fn to_message<M>(payload: Value) -> Result<M, ViewError>
where
    M: DeserializeOwned,
{
    Ok(serde_json::from_value(strip_nulls(payload))?)
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}
