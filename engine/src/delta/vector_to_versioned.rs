//! C5: Delta Detector (Vector→Versioned).
//!
//! Produces `LocalChanges` from the vector store's point of view: what's
//! been added, edited, or removed there that the versioning engine doesn't
//! know about yet.

use std::collections::HashSet;
use std::sync::Arc;

use crate::chunk::{self, ChunkParams};
use crate::deletions::DeletionTracker;
use crate::error::{Result, SyncError};
use crate::model::{Chunk, DeletedDoc, Document, LocalChanges, Metadata};
use crate::vectorstore::{VectorStoreClient, WhereClause};
use crate::versioning::VersioningEngineClient;

pub struct VectorToVersionedDetector {
    vector_store: Arc<dyn VectorStoreClient>,
    versioning: Arc<dyn VersioningEngineClient>,
    chunk_params: ChunkParams,
}

impl VectorToVersionedDetector {
    pub fn new(vector_store: Arc<dyn VectorStoreClient>, versioning: Arc<dyn VersioningEngineClient>, chunk_params: ChunkParams) -> Self {
        Self { vector_store, versioning, chunk_params }
    }

    /// Runs the five-step algorithm of §4.5 for one collection, plus step 5's
    /// deletion union against C3's pending document-deletion records.
    pub async fn detect(&self, repo: &str, collection: &str, deletions: &DeletionTracker) -> Result<LocalChanges> {
        let mut changes = LocalChanges::empty();
        let mut modified_ids: HashSet<String> = HashSet::new();
        let mut new_ids: HashSet<String> = HashSet::new();

        // Step 1: flagged scan.
        let flagged_docs = self.reassembled_documents(collection, Some(WhereClause::is_local_change(true))).await?;

        // Step 2: fallback scan, only if step 1 produced nothing.
        let candidates: Vec<Document> = if flagged_docs.is_empty() {
            let all_docs = self.reassembled_documents(collection, None).await?;
            let versioned_ids = self.versioned_doc_ids(collection).await?;
            all_docs.into_iter().filter(|d| !versioned_ids.contains(&d.doc_id)).collect()
        } else {
            flagged_docs
        };

        // Step 3: classification against the versioning engine.
        let candidate_ids: Vec<String> = candidates.iter().map(|d| d.doc_id.clone()).collect();
        let existing = self.existing_doc_ids(collection, &candidate_ids).await?;

        for doc in candidates {
            if existing.contains(&doc.doc_id) {
                if modified_ids.insert(doc.doc_id.clone()) {
                    changes.modified.push(doc);
                }
            } else if new_ids.insert(doc.doc_id.clone()) {
                changes.new.push(doc);
            }
        }

        // Step 4: hash comparison over documents present on both sides.
        let all_vector_docs = self.reassembled_documents(collection, None).await?;
        let versioned_hashes = self.versioned_doc_hashes(collection).await?;
        for doc in all_vector_docs {
            if new_ids.contains(&doc.doc_id) {
                // Already classified `new` in step 3; a hash mismatch can't
                // apply because the versioning engine has no row for it.
                continue;
            }
            if let Some(versioned_hash) = versioned_hashes.get(&doc.doc_id) {
                if versioned_hash != &doc.content_hash && modified_ids.insert(doc.doc_id.clone()) {
                    changes.modified.push(doc);
                }
            }
        }

        // Step 5: deletions — pending C3 records union documents present in
        // the versioning engine but absent from the vector store.
        let vector_ids = self.all_vector_doc_ids(collection).await?;
        let mut deleted_ids: HashSet<String> = HashSet::new();

        for record in deletions.get_pending_document_deletions(repo, collection)? {
            if let Some(doc_id) = record.doc_id {
                if deleted_ids.insert(doc_id.clone()) {
                    changes.deleted.push(DeletedDoc {
                        doc_id,
                        collection_name: collection.to_string(),
                        original_content_hash: record.original_content_hash,
                    });
                }
            }
        }

        for (doc_id, hash) in versioned_hashes.iter() {
            if !vector_ids.contains(doc_id) && deleted_ids.insert(doc_id.clone()) {
                changes.deleted.push(DeletedDoc {
                    doc_id: doc_id.clone(),
                    collection_name: collection.to_string(),
                    original_content_hash: Some(hash.clone()),
                });
            }
        }

        // Early-exit rule restated: if nothing was found across every step
        // the result is already `LocalChanges::empty()` by construction.
        Ok(changes)
    }

    pub fn has_changes(changes: &LocalChanges) -> bool {
        !changes.is_empty()
    }

    /// Full reassembled dump of a vector collection, used by the
    /// initialize/full-sync pipelines that need every document rather than
    /// just the delta.
    pub async fn all_documents(&self, collection: &str) -> Result<Vec<Document>> {
        self.reassembled_documents(collection, None).await
    }

    async fn reassembled_documents(&self, collection: &str, where_clause: Option<WhereClause>) -> Result<Vec<Document>> {
        let got = match self.vector_store.get(collection, None, where_clause, None).await {
            Ok(got) => got,
            Err(SyncError::BackendUnavailable(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut by_doc: std::collections::HashMap<String, Vec<Chunk>> = std::collections::HashMap::new();
        for ((id, content), metadata) in got.ids.into_iter().zip(got.documents).zip(got.metadatas) {
            let Some((base_id, index)) = chunk::parse_chunk_id(&id) else { continue };
            let total_chunks = metadata
                .get("total_chunks")
                .and_then(|v| v.as_u64())
                .unwrap_or(1) as u32;
            let source_hash = metadata.get("content_hash").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            by_doc.entry(base_id.clone()).or_default().push(Chunk {
                chunk_id: id,
                content,
                chunk_index: index,
                total_chunks,
                source_id: base_id,
                collection_name: collection.to_string(),
                content_hash: source_hash,
                dolt_commit: None,
                is_local_change: metadata.get("is_local_change").and_then(|v| v.as_bool()).unwrap_or(false),
                metadata,
            });
        }

        let mut docs = Vec::new();
        for (_, chunks) in by_doc {
            match chunk::reassemble(chunks, self.chunk_params.chunk_overlap) {
                Ok(doc) => docs.push(doc),
                Err(_) => continue,
            }
        }
        docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        Ok(docs)
    }

    async fn all_vector_doc_ids(&self, collection: &str) -> Result<HashSet<String>> {
        let docs = self.reassembled_documents(collection, None).await?;
        Ok(docs.into_iter().map(|d| d.doc_id).collect())
    }

    async fn versioned_doc_ids(&self, collection: &str) -> Result<HashSet<String>> {
        Ok(self.versioned_doc_hashes(collection).await?.into_keys().collect())
    }

    async fn versioned_doc_hashes(&self, collection: &str) -> Result<std::collections::HashMap<String, String>> {
        let rows = match self
            .versioning
            .query(
                "SELECT doc_id, content_hash FROM documents WHERE collection_name = ?1",
                &[crate::row::RowValue::Text(collection.to_string())],
            )
            .await
        {
            Ok(rows) => rows,
            Err(SyncError::TableNotFound) => return Ok(std::collections::HashMap::new()),
            Err(e) => return Err(e),
        };
        Ok(rows
            .iter()
            .filter_map(|r| Some((r.get_string("doc_id")?, r.get_string("content_hash")?)))
            .collect())
    }

    async fn existing_doc_ids(&self, collection: &str, candidate_ids: &[String]) -> Result<HashSet<String>> {
        if candidate_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let all = self.versioned_doc_ids(collection).await?;
        Ok(candidate_ids.iter().filter(|id| all.contains(*id)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory_vector_store::InMemoryVectorStore;
    use crate::backend::sqlite_versioning::SqliteVersioningClient;
    use crate::row::{RowValue, Statement};
    use serde_json::json;

    async fn seed_vector_doc(store: &InMemoryVectorStore, collection: &str, doc_id: &str, content: &str, local_change: bool) {
        let doc = Document {
            doc_id: doc_id.to_string(),
            collection_name: collection.to_string(),
            content: content.to_string(),
            content_hash: chunk::content_hash(content),
            title: None,
            doc_type: None,
            metadata: Metadata::new(),
        };
        let chunks = chunk::chunk(&doc, ChunkParams::default());
        let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let metas: Vec<Metadata> = chunks
            .iter()
            .map(|c| {
                let mut m = Metadata::new();
                m.insert("total_chunks".into(), json!(c.total_chunks));
                m.insert("content_hash".into(), json!(c.content_hash));
                m
            })
            .collect();
        store.create_collection(collection, None).await.ok();
        store.add(collection, contents, ids, metas, false, local_change).await.unwrap();
    }

    #[tokio::test]
    async fn fallback_scan_finds_unversioned_document() {
        let store = Arc::new(InMemoryVectorStore::new());
        let versioning: Arc<dyn VersioningEngineClient> = Arc::new(SqliteVersioningClient::open_in_memory().unwrap());
        seed_vector_doc(&store, "col1", "d1", "hello", false).await;

        let detector = VectorToVersionedDetector::new(store, versioning, ChunkParams::default());
        let deletions = DeletionTracker::open_in_memory().unwrap();
        let changes = detector.detect("/repo", "col1", &deletions).await.unwrap();

        assert_eq!(changes.new.len(), 1);
        assert_eq!(changes.new[0].doc_id, "d1");
        assert!(changes.modified.is_empty());
    }

    #[tokio::test]
    async fn flagged_scan_classifies_existing_document_as_modified() {
        let store = Arc::new(InMemoryVectorStore::new());
        let versioning: Arc<dyn VersioningEngineClient> = Arc::new(SqliteVersioningClient::open_in_memory().unwrap());
        versioning
            .execute(&Statement::new(
                "INSERT INTO documents (doc_id, collection_name, content, content_hash) VALUES ('d1','col1','old',?1)",
                vec![RowValue::Text(chunk::content_hash("old"))],
            ))
            .await
            .unwrap();
        seed_vector_doc(&store, "col1", "d1", "hello world", true).await;

        let detector = VectorToVersionedDetector::new(store, versioning, ChunkParams::default());
        let deletions = DeletionTracker::open_in_memory().unwrap();
        let changes = detector.detect("/repo", "col1", &deletions).await.unwrap();

        assert!(changes.new.is_empty());
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.modified[0].doc_id, "d1");
    }

    #[tokio::test]
    async fn unchanged_document_produces_no_changes() {
        let store = Arc::new(InMemoryVectorStore::new());
        let versioning: Arc<dyn VersioningEngineClient> = Arc::new(SqliteVersioningClient::open_in_memory().unwrap());
        versioning
            .execute(&Statement::new(
                "INSERT INTO documents (doc_id, collection_name, content, content_hash) VALUES ('d1','col1','hello',?1)",
                vec![RowValue::Text(chunk::content_hash("hello"))],
            ))
            .await
            .unwrap();
        seed_vector_doc(&store, "col1", "d1", "hello", false).await;

        let detector = VectorToVersionedDetector::new(store, versioning, ChunkParams::default());
        let deletions = DeletionTracker::open_in_memory().unwrap();
        let changes = detector.detect("/repo", "col1", &deletions).await.unwrap();

        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn deletion_union_includes_c3_records_and_vector_absence() {
        let store = Arc::new(InMemoryVectorStore::new());
        let versioning: Arc<dyn VersioningEngineClient> = Arc::new(SqliteVersioningClient::open_in_memory().unwrap());
        versioning
            .execute(&Statement::new(
                "INSERT INTO documents (doc_id, collection_name, content, content_hash) VALUES ('d1','col1','hello',?1)",
                vec![RowValue::Text(chunk::content_hash("hello"))],
            ))
            .await
            .unwrap();
        store.create_collection("col1", None).await.unwrap();

        let detector = VectorToVersionedDetector::new(store, versioning, ChunkParams::default());
        let deletions = DeletionTracker::open_in_memory().unwrap();
        deletions.record_document_deletion("/repo", "col1", "d2", None).unwrap();

        let changes = detector.detect("/repo", "col1", &deletions).await.unwrap();
        let ids: HashSet<String> = changes.deleted.iter().map(|d| d.doc_id.clone()).collect();
        assert!(ids.contains("d1"));
        assert!(ids.contains("d2"));
    }

    #[tokio::test]
    async fn fresh_repository_with_no_documents_table_is_treated_as_empty() {
        let store = Arc::new(InMemoryVectorStore::new());
        store.create_collection("col1", None).await.unwrap();
        let versioning: Arc<dyn VersioningEngineClient> = Arc::new(SqliteVersioningClient::open_in_memory().unwrap());

        let detector = VectorToVersionedDetector::new(store, versioning, ChunkParams::default());
        let deletions = DeletionTracker::open_in_memory().unwrap();
        let changes = detector.detect("/repo", "col1", &deletions).await.unwrap();
        assert!(changes.is_empty());
    }
}
