//! C6: Stager.
//!
//! Applies a `LocalChanges` set, or a handful of collection-level
//! operations out of C3, to the versioning engine's SQL tables through
//! parameterised statements, then stages the affected tables via the
//! versioning engine's index-add primitive. Never builds a SQL string out
//! of user data; every value that varies per call travels in
//! `Statement::params`.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{Collection, DeletedDoc, DeletionOperationType, DeletionRecord, Document, LocalChanges};
use crate::row::{RowValue, Statement};
use crate::versioning::VersioningEngineClient;

pub struct Stager {
    versioning: Arc<dyn VersioningEngineClient>,
}

impl Stager {
    pub fn new(versioning: Arc<dyn VersioningEngineClient>) -> Self {
        Self { versioning }
    }

    /// Inserts/updates/deletes `documents` rows for one collection's
    /// `LocalChanges`, then stages the `documents` table.
    pub async fn apply_local_changes(&self, changes: &LocalChanges) -> Result<()> {
        for doc in &changes.new {
            self.insert_document(doc).await?;
        }
        for doc in &changes.modified {
            self.update_document(doc).await?;
        }
        for deleted in &changes.deleted {
            self.delete_document(deleted).await?;
        }
        if !changes.is_empty() {
            self.versioning.add("documents").await?;
        }
        Ok(())
    }

    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        let metadata_json = serde_json::to_string(&doc.metadata).unwrap_or_else(|_| "{}".to_string());
        self.versioning
            .execute(&Statement::new(
                "INSERT INTO documents (doc_id, collection_name, content, content_hash, title, doc_type, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(doc_id, collection_name) DO UPDATE SET
                    content = excluded.content,
                    content_hash = excluded.content_hash,
                    title = excluded.title,
                    doc_type = excluded.doc_type,
                    metadata = excluded.metadata",
                vec![
                    RowValue::Text(doc.doc_id.clone()),
                    RowValue::Text(doc.collection_name.clone()),
                    RowValue::Text(doc.content.clone()),
                    RowValue::Text(doc.content_hash.clone()),
                    doc.title.clone().map(RowValue::Text).unwrap_or(RowValue::Null),
                    doc.doc_type.clone().map(RowValue::Text).unwrap_or(RowValue::Null),
                    RowValue::Text(metadata_json),
                ],
            ))
            .await
    }

    pub async fn update_document(&self, doc: &Document) -> Result<()> {
        // An update and an insert are the same upsert statement here; kept
        // as a separate method because callers name the two cases
        // differently (§4.6) and a real versioning engine may distinguish
        // them at the index-add layer.
        self.insert_document(doc).await
    }

    pub async fn delete_document(&self, deleted: &DeletedDoc) -> Result<()> {
        self.versioning
            .execute(&Statement::new(
                "DELETE FROM documents WHERE doc_id = ?1 AND collection_name = ?2",
                vec![RowValue::Text(deleted.doc_id.clone()), RowValue::Text(deleted.collection_name.clone())],
            ))
            .await
    }

    pub async fn upsert_collection_row(&self, collection: &Collection) -> Result<()> {
        let metadata_json = serde_json::to_string(&collection.metadata).unwrap_or_else(|_| "{}".to_string());
        self.versioning
            .execute(&Statement::new(
                "INSERT INTO collections
                    (collection_name, display_name, description, embedding_model, chunk_size, chunk_overlap, document_count, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(collection_name) DO UPDATE SET
                    display_name = excluded.display_name,
                    description = excluded.description,
                    embedding_model = excluded.embedding_model,
                    chunk_size = excluded.chunk_size,
                    chunk_overlap = excluded.chunk_overlap,
                    document_count = excluded.document_count,
                    metadata = excluded.metadata",
                vec![
                    RowValue::Text(collection.collection_name.clone()),
                    collection.display_name.clone().map(RowValue::Text).unwrap_or(RowValue::Null),
                    collection.description.clone().map(RowValue::Text).unwrap_or(RowValue::Null),
                    collection.embedding_model.clone().map(RowValue::Text).unwrap_or(RowValue::Null),
                    RowValue::Integer(collection.chunk_size as i64),
                    RowValue::Integer(collection.chunk_overlap as i64),
                    RowValue::Integer(collection.document_count as i64),
                    RowValue::Text(metadata_json),
                ],
            ))
            .await?;
        self.versioning.add("collections").await
    }

    /// Applies pending collection-level operations from C3's ledger.
    /// Deletions cascade to their documents before the collection row is
    /// removed; a rename touches both the `collections` row and every
    /// `documents.collection_name` foreign reference; duplicate operations
    /// against a collection already deleted earlier in this batch are
    /// skipped.
    pub async fn apply_collection_operations(&self, ops: &[DeletionRecord]) -> Result<()> {
        let mut deleted: HashSet<String> = HashSet::new();
        let mut touched_documents = false;
        let mut touched_collections = false;

        for op in ops {
            if deleted.contains(&op.collection_name) {
                continue;
            }
            match op.operation_type {
                DeletionOperationType::Deletion => {
                    self.versioning
                        .execute(&Statement::new(
                            "DELETE FROM documents WHERE collection_name = ?1",
                            vec![RowValue::Text(op.collection_name.clone())],
                        ))
                        .await?;
                    self.versioning
                        .execute(&Statement::new(
                            "DELETE FROM collections WHERE collection_name = ?1",
                            vec![RowValue::Text(op.collection_name.clone())],
                        ))
                        .await?;
                    deleted.insert(op.collection_name.clone());
                    touched_documents = true;
                    touched_collections = true;
                }
                DeletionOperationType::Rename => {
                    let Some(new_name) = op.new_name_or_metadata.clone() else { continue };
                    self.versioning
                        .execute(&Statement::new(
                            "UPDATE documents SET collection_name = ?1 WHERE collection_name = ?2",
                            vec![RowValue::Text(new_name.clone()), RowValue::Text(op.collection_name.clone())],
                        ))
                        .await?;
                    self.versioning
                        .execute(&Statement::new(
                            "UPDATE collections SET collection_name = ?1 WHERE collection_name = ?2",
                            vec![RowValue::Text(new_name), RowValue::Text(op.collection_name.clone())],
                        ))
                        .await?;
                    touched_documents = true;
                    touched_collections = true;
                }
                DeletionOperationType::MetadataUpdate => {
                    let Some(metadata) = op.new_name_or_metadata.clone() else { continue };
                    self.versioning
                        .execute(&Statement::new(
                            "UPDATE collections SET metadata = ?1 WHERE collection_name = ?2",
                            vec![RowValue::Text(metadata), RowValue::Text(op.collection_name.clone())],
                        ))
                        .await?;
                    touched_collections = true;
                }
                DeletionOperationType::DocumentDelete => {
                    // Not a collection-level operation; `apply_local_changes`
                    // is responsible for single-document deletes.
                }
            }
        }

        if touched_documents {
            self.versioning.add("documents").await?;
        }
        if touched_collections {
            self.versioning.add("collections").await?;
        }
        Ok(())
    }
}
