//! Read-only property retrieval seam.
//!
//! The traversal engine only ever asks "give me these property paths of
//! this managed object". `VcenterSession` answers over HTTP, `MockInventory`
//! answers from memory.

use crate::error::{VcenterError, VcenterResult};
use crate::types::ManagedObjectReference;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Property values of one object, keyed by the requested path.
///
/// Paths the server reported as unset are simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    obj: Option<ManagedObjectReference>,
    values: Map<String, Value>,
}

impl PropertySet {
    pub fn new(obj: ManagedObjectReference) -> Self {
        Self {
            obj: Some(obj),
            values: Map::new(),
        }
    }

    pub fn insert(&mut self, path: impl Into<String>, value: Value) {
        self.values.insert(path.into(), value);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.values.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn describe(&self) -> String {
        self.obj
            .as_ref()
            .map(|o| o.to_string())
            .unwrap_or_else(|| "<unknown>".into())
    }

    /// Decode a property that must be present.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> VcenterResult<T> {
        let value = self.values.get(path).ok_or_else(|| {
            VcenterError::property(format!("{}: property '{path}' not returned", self.describe()))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            VcenterError::property(format!("{}: cannot decode '{path}': {e}", self.describe()))
        })
    }

    /// Decode a property that may legitimately be unset.
    pub fn get_opt<T: DeserializeOwned>(&self, path: &str) -> VcenterResult<Option<T>> {
        match self.values.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.get(path).map(Some),
        }
    }

    /// Decode an array property, treating unset as empty.
    pub fn get_list<T: DeserializeOwned>(&self, path: &str) -> VcenterResult<Vec<T>> {
        Ok(self.get_opt::<Vec<T>>(path)?.unwrap_or_default())
    }
}

/// Batched, read-only property retrieval against a managed-object graph.
#[async_trait::async_trait]
pub trait PropertySource: Send + Sync {
    /// Fetch `paths` of `obj` in one round-trip.
    ///
    /// Fails with `PropertyRetrieval` when the object no longer exists or
    /// the server rejects the query.
    async fn retrieve(
        &self,
        obj: &ManagedObjectReference,
        paths: &[&str],
    ) -> VcenterResult<PropertySet>;
}
