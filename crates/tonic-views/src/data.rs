//! Opaque data sources backing the views.
//!
//! Rows are JSON objects. A view asks its source for the full collection on
//! every call, so sources must not hand back a cached snapshot unless that is
//! what the author wants.

use serde_json::{Map, Value};
use std::sync::Arc;

pub type Row = Map<String, Value>;

pub trait DataSource: Send + Sync + 'static {
    /// Evaluates the collection. Called once per call.
    ///
    /// # Errors
    ///
    /// Any failure surfaces as an internal error on the call.
    fn rows(&self) -> anyhow::Result<Vec<Row>>;
}

impl<F> DataSource for F
where
    F: Fn() -> anyhow::Result<Vec<Row>> + Send + Sync + 'static,
{
    fn rows(&self) -> anyhow::Result<Vec<Row>> {
        self()
    }
}

/// A fixed in-memory collection.
#[derive(Debug, Clone, Default)]
pub struct StaticRows(Arc<[Row]>);

impl StaticRows {
    /// Builds the collection from JSON values. Non-object values are skipped.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self(
            values
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(row) => Some(row),
                    _ => None,
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl DataSource for StaticRows {
    fn rows(&self) -> anyhow::Result<Vec<Row>> {
        Ok(self.0.to_vec())
    }
}
