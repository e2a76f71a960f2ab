//! In-memory search-index engine.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{IndexError, IndexOp, SearchApi};

#[derive(Default)]
struct SearchState {
    /// physical index -> (document id -> document)
    indices: HashMap<String, HashMap<String, Value>>,
    /// physical index -> mapping supplied at creation
    mappings: HashMap<String, Value>,
    /// alias -> physical index
    aliases: HashMap<String, String>,
}

/// In-memory implementation of [`SearchApi`].
#[derive(Default)]
pub struct InMemorySearch {
    state: Mutex<SearchState>,
}

impl InMemorySearch {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the documents of the index behind `alias`. Test hook.
    pub fn documents(&self, alias: &str) -> HashMap<String, Value> {
        let state = self.state.lock();
        state
            .aliases
            .get(alias)
            .and_then(|index| state.indices.get(index))
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the mapping the index behind `alias` was created with. Test hook.
    pub fn mapping(&self, alias: &str) -> Option<Value> {
        let state = self.state.lock();
        let index = state.aliases.get(alias)?;
        state.mappings.get(index).cloned()
    }

    /// Pre-creates a physical index with no alias. Test hook for the
    /// zero-downtime reindexing path.
    pub fn seed_index(&self, index: &str) {
        let mut state = self.state.lock();
        state.indices.entry(index.to_string()).or_default();
    }
}

#[async_trait]
impl SearchApi for InMemorySearch {
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError> {
        Ok(self.state.lock().indices.contains_key(index))
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool, IndexError> {
        Ok(self.state.lock().aliases.contains_key(alias))
    }

    async fn create_index(&self, index: &str, mapping: Value) -> Result<(), IndexError> {
        let mut state = self.state.lock();
        state.indices.entry(index.to_string()).or_default();
        state.mappings.entry(index.to_string()).or_insert(mapping);
        Ok(())
    }

    async fn attach_alias(&self, index: &str, alias: &str) -> Result<(), IndexError> {
        let mut state = self.state.lock();
        if !state.indices.contains_key(index) {
            return Err(IndexError::Internal(format!(
                "cannot alias missing index {index}"
            )));
        }
        state.aliases.insert(alias.to_string(), index.to_string());
        Ok(())
    }

    async fn bulk(&self, operations: Vec<IndexOp>) -> Result<(), IndexError> {
        let mut state = self.state.lock();
        for operation in &operations {
            let alias = match operation {
                IndexOp::Upsert { alias, .. } | IndexOp::Delete { alias, .. } => alias,
            };
            if !state.aliases.contains_key(alias) {
                return Err(IndexError::UnknownAlias {
                    alias: alias.clone(),
                });
            }
        }
        for operation in operations {
            match operation {
                IndexOp::Upsert {
                    alias,
                    id,
                    document,
                } => {
                    let index = state.aliases[&alias].clone();
                    state
                        .indices
                        .get_mut(&index)
                        .expect("aliased index present")
                        .insert(id, document);
                }
                IndexOp::Delete { alias, id } => {
                    let index = state.aliases[&alias].clone();
                    state
                        .indices
                        .get_mut(&index)
                        .expect("aliased index present")
                        .remove(&id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_bulk_upsert_and_delete() {
        let search = InMemorySearch::new();
        search.create_index("patient", json!({})).await.unwrap();
        search.attach_alias("patient", "patient-alias").await.unwrap();

        search
            .bulk(vec![IndexOp::Upsert {
                alias: "patient-alias".to_string(),
                id: "1".to_string(),
                document: json!({"id": "1"}),
            }])
            .await
            .unwrap();
        assert_eq!(search.documents("patient-alias").len(), 1);

        search
            .bulk(vec![IndexOp::Delete {
                alias: "patient-alias".to_string(),
                id: "1".to_string(),
            }])
            .await
            .unwrap();
        assert!(search.documents("patient-alias").is_empty());
    }

    #[tokio::test]
    async fn test_bulk_requires_alias() {
        let search = InMemorySearch::new();
        let err = search
            .bulk(vec![IndexOp::Delete {
                alias: "nope-alias".to_string(),
                id: "1".to_string(),
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::UnknownAlias { .. }));
    }
}
