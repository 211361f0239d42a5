//! §6: the vector-store client capability set. An abstract async trait;
//! the only implementation shipped in this crate is the reference
//! `backend::memory_vector_store::InMemoryVectorStore` (§6.1). A real
//! client speaking to an actual embedding database implements the same
//! trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::Metadata;

#[derive(Debug, Clone, Default)]
pub struct GetResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
}

#[derive(Debug, Clone, Default)]
pub struct WhereClause(pub Metadata);

impl WhereClause {
    pub fn is_local_change(value: bool) -> Self {
        let mut m = Metadata::new();
        m.insert("is_local_change".to_string(), Value::Bool(value));
        Self(m)
    }
}

#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    async fn list_collections(&self, offset: Option<u64>, limit: Option<u64>) -> Result<Vec<String>>;
    async fn create_collection(&self, name: &str, metadata: Option<Metadata>) -> Result<()>;
    async fn delete_collection(&self, name: &str) -> Result<()>;
    async fn get_collection(&self, name: &str) -> Result<Option<Metadata>>;
    async fn collection_count(&self, name: &str) -> Result<u64>;

    #[allow(clippy::too_many_arguments)]
    async fn add(
        &self,
        collection: &str,
        contents: Vec<String>,
        ids: Vec<String>,
        metadatas: Vec<Metadata>,
        allow_duplicate_ids: bool,
        mark_as_local_change: bool,
    ) -> Result<()>;

    async fn get(
        &self,
        collection: &str,
        ids: Option<Vec<String>>,
        where_clause: Option<WhereClause>,
        limit: Option<u64>,
    ) -> Result<GetResult>;

    async fn update(
        &self,
        collection: &str,
        ids: Vec<String>,
        documents: Option<Vec<String>>,
        metadatas: Option<Vec<Metadata>>,
        mark_as_local_change: bool,
    ) -> Result<()>;

    async fn delete(&self, collection: &str, ids: Vec<String>) -> Result<()>;

    async fn query(
        &self,
        collection: &str,
        query_texts: Vec<String>,
        n_results: u64,
        where_clause: Option<WhereClause>,
        where_document: Option<String>,
    ) -> Result<GetResult>;
}
