//! Row types returned by the store. Kept apart from the `sharebook-types`
//! models so the storage layer does not depend on any one document shape.

use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A stored document: its key and its JSON object body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Deserialize the body into a model, with the document id exposed as
    /// an `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut data = self.data.clone();
        data.insert("id".to_string(), Value::String(self.id.clone()));

        serde_json::from_value(Value::Object(data))
            .map_err(|e| anyhow!("Corrupt document {}/{}: {}", self.collection, self.id, e))
    }
}

pub struct CredentialRow {
    pub user_id: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}
