//! Elasticsearch index engine.

use async_trait::async_trait;
use elasticsearch::http::request::JsonBody;
use elasticsearch::http::transport::Transport;
use elasticsearch::indices::{
    IndicesCreateParts, IndicesExistsAliasParts, IndicesExistsParts, IndicesPutAliasParts,
};
use elasticsearch::{BulkParts, Elasticsearch};
use serde_json::{json, Value};
use tracing::debug;

use super::{IndexError, IndexOp, SearchApi};

/// Elasticsearch-backed implementation of [`SearchApi`].
pub struct ElasticsearchIndex {
    client: Elasticsearch,
}

impl ElasticsearchIndex {
    /// Creates an engine over an existing client.
    pub fn new(client: Elasticsearch) -> Self {
        Self { client }
    }

    /// Creates an engine for a single-node cluster at `url`.
    pub fn from_url(url: &str) -> Result<Self, IndexError> {
        let transport = Transport::single_node(url)
            .map_err(|e| IndexError::Internal(format!("failed to build transport: {e}")))?;
        Ok(Self::new(Elasticsearch::new(transport)))
    }
}

#[async_trait]
impl SearchApi for ElasticsearchIndex {
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(map_transport_error)?;
        Ok(response.status_code().is_success())
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool, IndexError> {
        let response = self
            .client
            .indices()
            .exists_alias(IndicesExistsAliasParts::Name(&[alias]))
            .send()
            .await
            .map_err(map_transport_error)?;
        Ok(response.status_code().is_success())
    }

    async fn create_index(&self, index: &str, mapping: Value) -> Result<(), IndexError> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(mapping)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Racing another writer on the same index is fine.
            if body.contains("resource_already_exists_exception") {
                return Ok(());
            }
            return Err(IndexError::Internal(format!(
                "failed to create index {index} (status {status}): {body}"
            )));
        }
        debug!(index, "created search index");
        Ok(())
    }

    async fn attach_alias(&self, index: &str, alias: &str) -> Result<(), IndexError> {
        let response = self
            .client
            .indices()
            .put_alias(IndicesPutAliasParts::IndexName(&[index], alias))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status_code();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Internal(format!(
                "failed to attach alias {alias} to {index} (status {status}): {body}"
            )));
        }
        debug!(index, alias, "attached search alias");
        Ok(())
    }

    async fn bulk(&self, operations: Vec<IndexOp>) -> Result<(), IndexError> {
        if operations.is_empty() {
            return Ok(());
        }

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(operations.len() * 2);
        for operation in &operations {
            match operation {
                IndexOp::Upsert {
                    alias,
                    id,
                    document,
                } => {
                    body.push(json!({"index": {"_index": alias, "_id": id}}).into());
                    body.push(document.clone().into());
                }
                IndexOp::Delete { alias, id } => {
                    body.push(json!({"delete": {"_index": alias, "_id": id}}).into());
                }
            }
        }

        let response = self
            .client
            .bulk(BulkParts::None)
            .body(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status_code();
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| IndexError::Internal(format!("unreadable bulk response: {e}")))?;

        if !status.is_success() {
            return Err(IndexError::Internal(format!(
                "bulk request failed with status {status}"
            )));
        }

        if parsed["errors"].as_bool().unwrap_or(false) {
            let ids = parsed["items"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            let action = item.as_object()?.values().next()?;
                            if action.get("error").is_some() {
                                action["_id"].as_str().map(str::to_string)
                            } else {
                                None
                            }
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            return Err(IndexError::BulkFailed { ids });
        }

        Ok(())
    }
}

fn map_transport_error(err: elasticsearch::Error) -> IndexError {
    IndexError::Unavailable(err.to_string())
}
