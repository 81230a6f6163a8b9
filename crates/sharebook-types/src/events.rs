use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// Emitted by the document store after every committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub doc_id: String,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(collection: &str, doc_id: &str, kind: ChangeKind) -> Self {
        Self {
            collection: collection.to_string(),
            doc_id: doc_id.to_string(),
            kind,
        }
    }

    /// Whether a live query over `collection` has to be re-evaluated.
    pub fn touches(&self, collection: &str) -> bool {
        self.collection == collection
    }
}
