use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use super::error::RequestError;

/// Identity of a cached read: endpoint name plus canonical JSON arguments.
///
/// Object keys are sorted recursively before rendering, so two argument
/// values that differ only in property order produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    endpoint: String,
    args: String,
}

impl CacheKey {
    /// Builds the key for `endpoint` called with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidArguments`] if `args` cannot be
    /// represented as JSON (for example a map with non-string keys).
    pub fn new<A: Serialize + ?Sized>(endpoint: &str, args: &A) -> Result<Self, RequestError> {
        let value = serde_json::to_value(args).map_err(|e| RequestError::InvalidArguments {
            message: e.to_string(),
        })?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            args: canonical(value).to_string(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The canonical JSON rendering of the arguments.
    #[must_use]
    pub fn args(&self) -> &str {
        &self.args
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.args)
    }
}

// serde_json's map order depends on the `preserve_order` feature, which any
// crate in the graph may turn on, so ordering is done explicitly here.
fn canonical(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonical(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}
