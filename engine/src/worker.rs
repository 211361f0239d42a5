//! §5.1: a single dedicated task owns the vector-store client handle and
//! drains a bounded request channel, giving single-producer/multi-consumer
//! serialization of the handle without a mutex held across an `.await`
//! anywhere else in the pipeline. Tracks queue depth and throttles its
//! warning to at most once per five seconds, per the monitoring hook named
//! in §9.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{Result, SyncError};
use crate::model::Metadata;
use crate::vectorstore::{GetResult, VectorStoreClient, WhereClause};

type Reply<T> = oneshot::Sender<Result<T>>;

enum Request {
    ListCollections(Option<u64>, Option<u64>, Reply<Vec<String>>),
    CreateCollection(String, Option<Metadata>, Reply<()>),
    DeleteCollection(String, Reply<()>),
    GetCollection(String, Reply<Option<Metadata>>),
    CollectionCount(String, Reply<u64>),
    Add(String, Vec<String>, Vec<String>, Vec<Metadata>, bool, bool, Reply<()>),
    Get(String, Option<Vec<String>>, Option<WhereClause>, Option<u64>, Reply<GetResult>),
    Update(String, Vec<String>, Option<Vec<String>>, Option<Vec<Metadata>>, bool, Reply<()>),
    Delete(String, Vec<String>, Reply<()>),
    Query(String, Vec<String>, u64, Option<WhereClause>, Option<String>, Reply<GetResult>),
}

struct QueueDepth {
    depth: AtomicU64,
    threshold: u64,
    last_warn: Mutex<Option<Instant>>,
}

/// Front for a `VectorStoreClient`: every call site sends a request plus a
/// reply channel and awaits the reply; the underlying client is only ever
/// touched from within the worker task.
#[derive(Clone)]
pub struct VectorStoreWorker {
    tx: mpsc::Sender<Request>,
    depth: Arc<QueueDepth>,
}

impl VectorStoreWorker {
    pub fn spawn(client: Arc<dyn VectorStoreClient>, queue_capacity: usize, warn_threshold: u64) -> Self {
        let (tx, mut rx) = mpsc::channel::<Request>(queue_capacity);
        let depth = Arc::new(QueueDepth {
            depth: AtomicU64::new(0),
            threshold: warn_threshold,
            last_warn: Mutex::new(None),
        });

        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                match req {
                    Request::ListCollections(offset, limit, reply) => {
                        let _ = reply.send(client.list_collections(offset, limit).await);
                    }
                    Request::CreateCollection(name, meta, reply) => {
                        let _ = reply.send(client.create_collection(&name, meta).await);
                    }
                    Request::DeleteCollection(name, reply) => {
                        let _ = reply.send(client.delete_collection(&name).await);
                    }
                    Request::GetCollection(name, reply) => {
                        let _ = reply.send(client.get_collection(&name).await);
                    }
                    Request::CollectionCount(name, reply) => {
                        let _ = reply.send(client.collection_count(&name).await);
                    }
                    Request::Add(collection, contents, ids, metadatas, allow_dup, mark_local, reply) => {
                        let _ = reply.send(client.add(&collection, contents, ids, metadatas, allow_dup, mark_local).await);
                    }
                    Request::Get(collection, ids, where_clause, limit, reply) => {
                        let _ = reply.send(client.get(&collection, ids, where_clause, limit).await);
                    }
                    Request::Update(collection, ids, documents, metadatas, mark_local, reply) => {
                        let _ = reply.send(client.update(&collection, ids, documents, metadatas, mark_local).await);
                    }
                    Request::Delete(collection, ids, reply) => {
                        let _ = reply.send(client.delete(&collection, ids).await);
                    }
                    Request::Query(collection, texts, n, where_clause, where_doc, reply) => {
                        let _ = reply.send(client.query(&collection, texts, n, where_clause, where_doc).await);
                    }
                }
            }
        });

        Self { tx, depth }
    }

    async fn send<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let depth_now = self.depth.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.maybe_warn(depth_now).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        let req = build(reply_tx);
        self.tx
            .send(req)
            .await
            .map_err(|_| SyncError::BackendUnavailable("vector store worker channel closed".into()))?;
        let result = reply_rx
            .await
            .map_err(|_| SyncError::BackendUnavailable("vector store worker dropped reply".into()))?;
        self.depth.depth.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn maybe_warn(&self, depth_now: u64) {
        if depth_now < self.depth.threshold {
            return;
        }
        let mut last_warn = self.depth.last_warn.lock().await;
        let should_warn = match *last_warn {
            None => true,
            Some(t) => t.elapsed() >= Duration::from_secs(5),
        };
        if should_warn {
            tracing::warn!(depth = depth_now, threshold = self.depth.threshold, "vector store worker queue depth high");
            *last_warn = Some(Instant::now());
        }
    }

    pub async fn list_collections(&self, offset: Option<u64>, limit: Option<u64>) -> Result<Vec<String>> {
        self.send(|r| Request::ListCollections(offset, limit, r)).await
    }

    pub async fn create_collection(&self, name: &str, metadata: Option<Metadata>) -> Result<()> {
        let name = name.to_string();
        self.send(|r| Request::CreateCollection(name, metadata, r)).await
    }

    pub async fn delete_collection(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.send(|r| Request::DeleteCollection(name, r)).await
    }

    pub async fn get_collection(&self, name: &str) -> Result<Option<Metadata>> {
        let name = name.to_string();
        self.send(|r| Request::GetCollection(name, r)).await
    }

    pub async fn collection_count(&self, name: &str) -> Result<u64> {
        let name = name.to_string();
        self.send(|r| Request::CollectionCount(name, r)).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add(
        &self,
        collection: &str,
        contents: Vec<String>,
        ids: Vec<String>,
        metadatas: Vec<Metadata>,
        allow_duplicate_ids: bool,
        mark_as_local_change: bool,
    ) -> Result<()> {
        let collection = collection.to_string();
        self.send(|r| Request::Add(collection, contents, ids, metadatas, allow_duplicate_ids, mark_as_local_change, r))
            .await
    }

    pub async fn get(
        &self,
        collection: &str,
        ids: Option<Vec<String>>,
        where_clause: Option<WhereClause>,
        limit: Option<u64>,
    ) -> Result<GetResult> {
        let collection = collection.to_string();
        self.send(|r| Request::Get(collection, ids, where_clause, limit, r)).await
    }

    pub async fn update(
        &self,
        collection: &str,
        ids: Vec<String>,
        documents: Option<Vec<String>>,
        metadatas: Option<Vec<Metadata>>,
        mark_as_local_change: bool,
    ) -> Result<()> {
        let collection = collection.to_string();
        self.send(|r| Request::Update(collection, ids, documents, metadatas, mark_as_local_change, r)).await
    }

    pub async fn delete(&self, collection: &str, ids: Vec<String>) -> Result<()> {
        let collection = collection.to_string();
        self.send(|r| Request::Delete(collection, ids, r)).await
    }

    pub async fn query(
        &self,
        collection: &str,
        query_texts: Vec<String>,
        n_results: u64,
        where_clause: Option<WhereClause>,
        where_document: Option<String>,
    ) -> Result<GetResult> {
        let collection = collection.to_string();
        self.send(|r| Request::Query(collection, query_texts, n_results, where_clause, where_document, r)).await
    }
}

/// The worker is itself a valid `VectorStoreClient`: detectors and pipelines
/// written against the trait can be handed `Arc::new(worker.clone())`
/// without knowing a worker sits in front of the real backend.
#[async_trait]
impl VectorStoreClient for VectorStoreWorker {
    async fn list_collections(&self, offset: Option<u64>, limit: Option<u64>) -> Result<Vec<String>> {
        VectorStoreWorker::list_collections(self, offset, limit).await
    }

    async fn create_collection(&self, name: &str, metadata: Option<Metadata>) -> Result<()> {
        VectorStoreWorker::create_collection(self, name, metadata).await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        VectorStoreWorker::delete_collection(self, name).await
    }

    async fn get_collection(&self, name: &str) -> Result<Option<Metadata>> {
        VectorStoreWorker::get_collection(self, name).await
    }

    async fn collection_count(&self, name: &str) -> Result<u64> {
        VectorStoreWorker::collection_count(self, name).await
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
        VectorStoreWorker::add(self, collection, contents, ids, metadatas, allow_duplicate_ids, mark_as_local_change).await
    }

    async fn get(
        &self,
        collection: &str,
        ids: Option<Vec<String>>,
        where_clause: Option<WhereClause>,
        limit: Option<u64>,
    ) -> Result<GetResult> {
        VectorStoreWorker::get(self, collection, ids, where_clause, limit).await
    }

    async fn update(
        &self,
        collection: &str,
        ids: Vec<String>,
        documents: Option<Vec<String>>,
        metadatas: Option<Vec<Metadata>>,
        mark_as_local_change: bool,
    ) -> Result<()> {
        VectorStoreWorker::update(self, collection, ids, documents, metadatas, mark_as_local_change).await
    }

    async fn delete(&self, collection: &str, ids: Vec<String>) -> Result<()> {
        VectorStoreWorker::delete(self, collection, ids).await
    }

    async fn query(
        &self,
        collection: &str,
        query_texts: Vec<String>,
        n_results: u64,
        where_clause: Option<WhereClause>,
        where_document: Option<String>,
    ) -> Result<GetResult> {
        VectorStoreWorker::query(self, collection, query_texts, n_results, where_clause, where_document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory_vector_store::InMemoryVectorStore;

    #[tokio::test]
    async fn round_trips_through_the_worker() {
        let store = Arc::new(InMemoryVectorStore::new());
        let worker = VectorStoreWorker::spawn(store, 16, 64);

        worker.create_collection("col1", None).await.unwrap();
        worker
            .add("col1", vec!["hello".into()], vec!["d1".into()], vec![Metadata::new()], false, false)
            .await
            .unwrap();

        let got = worker.get("col1", Some(vec!["d1".into()]), None, None).await.unwrap();
        assert_eq!(got.documents, vec!["hello".to_string()]);
    }
}
