//! §6.1: `InMemoryVectorStore`, a `HashMap`-backed `VectorStoreClient` used
//! by tests and by the CLI's `--backend memory` mode. Stands in for a real
//! embedding database; no embeddings are computed here, `query` does a
//! plain substring match, which is enough to exercise every pipeline that
//! only cares about CRUD over chunks and metadata.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::model::Metadata;
use crate::vectorstore::{GetResult, VectorStoreClient, WhereClause};

#[derive(Debug, Clone, Default)]
struct ChunkRecord {
    content: String,
    metadata: Metadata,
}

#[derive(Debug, Clone, Default)]
struct CollectionData {
    metadata: Metadata,
    chunks: HashMap<String, ChunkRecord>,
    /// Preserves the order chunks were first added in, so `get`/`list`
    /// results are deterministic across runs.
    order: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: Mutex<HashMap<String, CollectionData>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collection<T>(&self, name: &str, f: impl FnOnce(&CollectionData) -> T) -> Result<T> {
        let guard = self.collections.lock().unwrap();
        let data = guard
            .get(name)
            .ok_or_else(|| SyncError::BackendUnavailable(format!("collection not found: {name}")))?;
        Ok(f(data))
    }

    fn with_collection_mut<T>(&self, name: &str, f: impl FnOnce(&mut CollectionData) -> T) -> Result<T> {
        let mut guard = self.collections.lock().unwrap();
        let data = guard
            .get_mut(name)
            .ok_or_else(|| SyncError::BackendUnavailable(format!("collection not found: {name}")))?;
        Ok(f(data))
    }
}

fn matches_where(metadata: &Metadata, where_clause: &Option<WhereClause>) -> bool {
    let Some(clause) = where_clause else {
        return true;
    };
    clause.0.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

#[async_trait]
impl VectorStoreClient for InMemoryVectorStore {
    async fn list_collections(&self, offset: Option<u64>, limit: Option<u64>) -> Result<Vec<String>> {
        let guard = self.collections.lock().unwrap();
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        let offset = offset.unwrap_or(0) as usize;
        let names = names.into_iter().skip(offset);
        Ok(match limit {
            Some(n) => names.take(n as usize).collect(),
            None => names.collect(),
        })
    }

    async fn create_collection(&self, name: &str, metadata: Option<Metadata>) -> Result<()> {
        let mut guard = self.collections.lock().unwrap();
        let entry = guard.entry(name.to_string()).or_default();
        if let Some(m) = metadata {
            entry.metadata = m;
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.lock().unwrap().remove(name);
        Ok(())
    }

    async fn get_collection(&self, name: &str) -> Result<Option<Metadata>> {
        Ok(self.collections.lock().unwrap().get(name).map(|c| c.metadata.clone()))
    }

    async fn collection_count(&self, name: &str) -> Result<u64> {
        self.with_collection(name, |c| c.chunks.len() as u64)
    }

    async fn add(
        &self,
        collection: &str,
        contents: Vec<String>,
        ids: Vec<String>,
        metadatas: Vec<Metadata>,
        allow_duplicate_ids: bool,
        mark_as_local_change: bool,
    ) -> Result<()> {
        if contents.len() != ids.len() || ids.len() != metadatas.len() {
            return Err(SyncError::Other(anyhow::anyhow!(
                "add: contents/ids/metadatas length mismatch ({}, {}, {})",
                contents.len(),
                ids.len(),
                metadatas.len()
            )));
        }

        self.with_collection_mut(collection, |data| -> Result<()> {
            for ((id, content), mut metadata) in ids.into_iter().zip(contents).zip(metadatas) {
                if !allow_duplicate_ids && data.chunks.contains_key(&id) {
                    return Err(SyncError::Other(anyhow::anyhow!("duplicate chunk id: {id}")));
                }
                metadata.insert("is_local_change".to_string(), Value::Bool(mark_as_local_change));
                if !data.chunks.contains_key(&id) {
                    data.order.push(id.clone());
                }
                data.chunks.insert(id, ChunkRecord { content, metadata });
            }
            Ok(())
        })?
    }

    async fn get(
        &self,
        collection: &str,
        ids: Option<Vec<String>>,
        where_clause: Option<WhereClause>,
        limit: Option<u64>,
    ) -> Result<GetResult> {
        self.with_collection(collection, |data| {
            let candidate_ids: Vec<&String> = match &ids {
                Some(wanted) => wanted.iter().filter(|id| data.chunks.contains_key(*id)).collect(),
                None => data.order.iter().collect(),
            };

            let mut result = GetResult::default();
            for id in candidate_ids {
                let record = &data.chunks[id];
                if !matches_where(&record.metadata, &where_clause) {
                    continue;
                }
                result.ids.push(id.clone());
                result.documents.push(record.content.clone());
                result.metadatas.push(record.metadata.clone());
                if let Some(n) = limit {
                    if result.ids.len() as u64 >= n {
                        break;
                    }
                }
            }
            result
        })
    }

    async fn update(
        &self,
        collection: &str,
        ids: Vec<String>,
        documents: Option<Vec<String>>,
        metadatas: Option<Vec<Metadata>>,
        mark_as_local_change: bool,
    ) -> Result<()> {
        if let Some(docs) = &documents {
            if docs.len() != ids.len() {
                return Err(SyncError::Other(anyhow::anyhow!("update: documents/ids length mismatch")));
            }
        }
        if let Some(metas) = &metadatas {
            if metas.len() != ids.len() {
                return Err(SyncError::Other(anyhow::anyhow!("update: metadatas/ids length mismatch")));
            }
        }

        self.with_collection_mut(collection, |data| {
            for (i, id) in ids.iter().enumerate() {
                let record = data.chunks.entry(id.clone()).or_insert_with(|| {
                    data.order.push(id.clone());
                    ChunkRecord::default()
                });
                if let Some(docs) = &documents {
                    record.content = docs[i].clone();
                }
                if let Some(metas) = &metadatas {
                    for (k, v) in metas[i].iter() {
                        record.metadata.insert(k.clone(), v.clone());
                    }
                }
                record.metadata.insert("is_local_change".to_string(), Value::Bool(mark_as_local_change));
            }
        })
    }

    async fn delete(&self, collection: &str, ids: Vec<String>) -> Result<()> {
        self.with_collection_mut(collection, |data| {
            for id in &ids {
                data.chunks.remove(id);
            }
            data.order.retain(|id| !ids.contains(id));
        })
    }

    async fn query(
        &self,
        collection: &str,
        query_texts: Vec<String>,
        n_results: u64,
        where_clause: Option<WhereClause>,
        where_document: Option<String>,
    ) -> Result<GetResult> {
        self.with_collection(collection, |data| {
            let mut scored: Vec<(&String, &ChunkRecord, usize)> = data
                .order
                .iter()
                .filter_map(|id| data.chunks.get(id).map(|r| (id, r)))
                .filter(|(_, r)| matches_where(&r.metadata, &where_clause))
                .filter(|(_, r)| where_document.as_ref().map_or(true, |needle| r.content.contains(needle.as_str())))
                .map(|(id, r)| {
                    let score = query_texts.iter().filter(|q| r.content.contains(q.as_str())).count();
                    (id, r, score)
                })
                .collect();
            scored.sort_by(|a, b| b.2.cmp(&a.2));

            let mut result = GetResult::default();
            for (id, record, _) in scored.into_iter().take(n_results as usize) {
                result.ids.push(id.clone());
                result.documents.push(record.content.clone());
                result.metadatas.push(record.metadata.clone());
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let store = InMemoryVectorStore::new();
        store.create_collection("col1", None).await.unwrap();
        store
            .add("col1", vec!["hello".into()], vec!["d1_chunk_0".into()], vec![Metadata::new()], false, false)
            .await
            .unwrap();

        let got = store.get("col1", None, None, None).await.unwrap();
        assert_eq!(got.ids, vec!["d1_chunk_0"]);
        assert_eq!(got.documents, vec!["hello"]);
    }

    #[tokio::test]
    async fn add_rejects_duplicate_id_unless_allowed() {
        let store = InMemoryVectorStore::new();
        store.create_collection("col1", None).await.unwrap();
        store
            .add("col1", vec!["a".into()], vec!["x".into()], vec![Metadata::new()], false, false)
            .await
            .unwrap();

        let err = store
            .add("col1", vec!["b".into()], vec!["x".into()], vec![Metadata::new()], false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Other(_)));

        store
            .add("col1", vec!["b".into()], vec!["x".into()], vec![Metadata::new()], true, false)
            .await
            .unwrap();
        let got = store.get("col1", Some(vec!["x".into()]), None, None).await.unwrap();
        assert_eq!(got.documents, vec!["b"]);
    }

    #[tokio::test]
    async fn where_clause_filters_on_is_local_change() {
        let store = InMemoryVectorStore::new();
        store.create_collection("col1", None).await.unwrap();
        store
            .add("col1", vec!["a".into()], vec!["a".into()], vec![Metadata::new()], false, true)
            .await
            .unwrap();
        store
            .add("col1", vec!["b".into()], vec!["b".into()], vec![Metadata::new()], false, false)
            .await
            .unwrap();

        let flagged = store.get("col1", None, Some(WhereClause::is_local_change(true)), None).await.unwrap();
        assert_eq!(flagged.ids, vec!["a"]);
    }

    #[tokio::test]
    async fn operations_on_missing_collection_fail() {
        let store = InMemoryVectorStore::new();
        let err = store.get("missing", None, None, None).await.unwrap_err();
        assert!(matches!(err, SyncError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.create_collection("col1", None).await.unwrap();
        store.delete("col1", vec!["nonexistent".into()]).await.unwrap();
    }
}
