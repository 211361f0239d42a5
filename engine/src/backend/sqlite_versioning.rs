//! §6.1: `SqliteVersioningClient`, a reference `VersioningEngineClient`
//! backed by a local `rusqlite` database. Stands in for a Dolt-like
//! SQL-schema versioning engine: it keeps a live working copy of the
//! `documents`/`collections` tables plus a `branches`/`commits` history,
//! and snapshots the whole working copy into `commit_snapshots` on every
//! commit rather than computing a structural row-level diff. That is
//! sufficient to drive every C4/C6/C7 pipeline exercised by this crate but
//! is not a general-purpose diff engine (see `DESIGN.md`).

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params_from_iter, types::ValueRef, Connection};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::model::{Collection, Document};
use crate::row::{Row, RowValue, Statement};
use crate::versioning::{
    CheckoutOutcome, CommitOutcome, DiffKind, DiffRow, MergeOutcome, PushOutcome, StatusReport, VersioningConflict,
    VersioningEngineClient, UNCOMMITTED_CHANGES_DIAGNOSTIC,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    doc_id TEXT NOT NULL,
    collection_name TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    title TEXT,
    doc_type TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (doc_id, collection_name)
);

CREATE TABLE IF NOT EXISTS collections (
    collection_name TEXT PRIMARY KEY,
    display_name TEXT,
    description TEXT,
    embedding_model TEXT,
    chunk_size INTEGER NOT NULL DEFAULT 512,
    chunk_overlap INTEGER NOT NULL DEFAULT 50,
    document_count INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS document_sync_log (
    doc_id TEXT NOT NULL,
    collection_name TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    chroma_chunk_ids TEXT NOT NULL DEFAULT '[]',
    sync_direction TEXT NOT NULL,
    sync_action TEXT NOT NULL,
    synced_at INTEGER NOT NULL,
    PRIMARY KEY (doc_id, collection_name, sync_direction)
);

CREATE TABLE IF NOT EXISTS chroma_sync_state (
    collection_name TEXT PRIMARY KEY,
    last_sync_commit TEXT,
    last_sync_at INTEGER,
    document_count INTEGER NOT NULL DEFAULT 0,
    chunk_count INTEGER NOT NULL DEFAULT 0,
    embedding_model TEXT,
    sync_status TEXT NOT NULL DEFAULT 'in_progress',
    local_changes_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS branches (
    name TEXT PRIMARY KEY,
    head_commit TEXT
);

CREATE TABLE IF NOT EXISTS commits (
    hash TEXT PRIMARY KEY,
    parent TEXT,
    message TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS commit_snapshots (
    commit_hash TEXT PRIMARY KEY,
    documents_json TEXT NOT NULL,
    collections_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS repo_meta (
    key TEXT PRIMARY KEY,
    value TEXT
);
"#;

impl rusqlite::ToSql for RowValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value};
        Ok(match self {
            RowValue::Null => ToSqlOutput::Owned(Value::Null),
            RowValue::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
            RowValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            RowValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(if *b { 1 } else { 0 })),
            RowValue::Json(v) => ToSqlOutput::Owned(Value::Text(v.to_string())),
        })
    }
}

fn value_ref_to_row_value(v: ValueRef) -> RowValue {
    match v {
        ValueRef::Null => RowValue::Null,
        ValueRef::Integer(i) => RowValue::Integer(i),
        ValueRef::Real(f) => RowValue::Text(f.to_string()),
        ValueRef::Text(t) => RowValue::Text(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => RowValue::Text(String::from_utf8_lossy(b).to_string()),
    }
}

/// Internal state that mirrors git's index/working-tree split closely
/// enough to drive `status()`: `dirty` tracks whether the live tables
/// differ from the last commit; `staged` tracks whether `add`/`add_all`
/// has been called since.
struct Flags {
    dirty: bool,
    staged: bool,
    conflicts: Vec<VersioningConflict>,
}

pub struct SqliteVersioningClient {
    conn: Mutex<Connection>,
    flags: Mutex<Flags>,
}

impl SqliteVersioningClient {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            flags: Mutex::new(Flags { dirty: false, staged: false, conflicts: Vec::new() }),
        })
    }

    fn current_branch_sync(conn: &Connection) -> Result<String> {
        let branch: Option<String> = conn
            .query_row("SELECT value FROM repo_meta WHERE key = 'current_branch'", [], |r| r.get(0))
            .ok();
        Ok(branch.unwrap_or_else(|| "main".to_string()))
    }

    fn set_current_branch(conn: &Connection, branch: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO repo_meta (key, value) VALUES ('current_branch', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [branch],
        )?;
        Ok(())
    }

    fn branch_head(conn: &Connection, branch: &str) -> Result<Option<String>> {
        let head: Option<Option<String>> = conn
            .query_row("SELECT head_commit FROM branches WHERE name = ?1", [branch], |r| r.get(0))
            .ok();
        Ok(head.flatten())
    }

    fn set_branch_head(conn: &Connection, branch: &str, commit_hash: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO branches (name, head_commit) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET head_commit = excluded.head_commit",
            (branch, commit_hash),
        )?;
        Ok(())
    }

    fn load_documents(conn: &Connection) -> Result<Vec<Document>> {
        let mut stmt = conn.prepare(
            "SELECT doc_id, collection_name, content, content_hash, title, doc_type, metadata FROM documents",
        )?;
        let rows = stmt.query_map([], |r| {
            let metadata_json: String = r.get(6)?;
            Ok(Document {
                doc_id: r.get(0)?,
                collection_name: r.get(1)?,
                content: r.get(2)?,
                content_hash: r.get(3)?,
                title: r.get(4)?,
                doc_type: r.get(5)?,
                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn load_collections(conn: &Connection) -> Result<Vec<Collection>> {
        let mut stmt = conn.prepare(
            "SELECT collection_name, display_name, description, embedding_model, chunk_size, chunk_overlap,
                    document_count, metadata FROM collections",
        )?;
        let rows = stmt.query_map([], |r| {
            let metadata_json: String = r.get(7)?;
            Ok(Collection {
                collection_name: r.get(0)?,
                display_name: r.get(1)?,
                description: r.get(2)?,
                embedding_model: r.get(3)?,
                chunk_size: r.get::<_, i64>(4)? as u32,
                chunk_overlap: r.get::<_, i64>(5)? as u32,
                document_count: r.get::<_, i64>(6)? as u64,
                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn write_documents(conn: &Connection, docs: &[Document]) -> Result<()> {
        conn.execute("DELETE FROM documents", [])?;
        for d in docs {
            conn.execute(
                "INSERT INTO documents (doc_id, collection_name, content, content_hash, title, doc_type, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    &d.doc_id,
                    &d.collection_name,
                    &d.content,
                    &d.content_hash,
                    &d.title,
                    &d.doc_type,
                    serde_json::to_string(&d.metadata).unwrap_or_else(|_| "{}".to_string()),
                ),
            )?;
        }
        Ok(())
    }

    fn write_collections(conn: &Connection, cols: &[Collection]) -> Result<()> {
        conn.execute("DELETE FROM collections", [])?;
        for c in cols {
            conn.execute(
                "INSERT INTO collections
                    (collection_name, display_name, description, embedding_model, chunk_size, chunk_overlap, document_count, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                (
                    &c.collection_name,
                    &c.display_name,
                    &c.description,
                    &c.embedding_model,
                    c.chunk_size as i64,
                    c.chunk_overlap as i64,
                    c.document_count as i64,
                    serde_json::to_string(&c.metadata).unwrap_or_else(|_| "{}".to_string()),
                ),
            )?;
        }
        Ok(())
    }

    fn snapshot_for(conn: &Connection, commit_hash: &str) -> Result<Option<(Vec<Document>, Vec<Collection>)>> {
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT documents_json, collections_json FROM commit_snapshots WHERE commit_hash = ?1",
                [commit_hash],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();
        match row {
            None => Ok(None),
            Some((docs_json, cols_json)) => {
                let docs: Vec<Document> = serde_json::from_str(&docs_json).unwrap_or_default();
                let cols: Vec<Collection> = serde_json::from_str(&cols_json).unwrap_or_default();
                Ok(Some((docs, cols)))
            }
        }
    }

    /// Resolves `reference` to a concrete commit hash: a known branch name
    /// resolves to that branch's head; otherwise `reference` is treated as
    /// a raw commit hash.
    fn resolve_commit(conn: &Connection, reference: &str) -> Result<Option<String>> {
        if let Some(head) = Self::branch_head(conn, reference)? {
            return Ok(Some(head));
        }
        let exists: Option<String> =
            conn.query_row("SELECT hash FROM commits WHERE hash = ?1", [reference], |r| r.get(0)).ok();
        Ok(exists)
    }

    fn ancestors(conn: &Connection, commit_hash: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut current = Some(commit_hash.to_string());
        while let Some(hash) = current {
            chain.push(hash.clone());
            current = conn.query_row("SELECT parent FROM commits WHERE hash = ?1", [&hash], |r| r.get(0)).ok().flatten();
        }
        Ok(chain)
    }

    fn lowest_common_ancestor(conn: &Connection, a: &str, b: &str) -> Result<Option<String>> {
        let ancestors_b = Self::ancestors(conn, b)?;
        for hash in Self::ancestors(conn, a)? {
            if ancestors_b.contains(&hash) {
                return Ok(Some(hash));
            }
        }
        Ok(None)
    }

    fn document_to_row(d: &Document) -> Row {
        let mut row = Row::new();
        row.set("doc_id", d.doc_id.clone());
        row.set("collection_name", d.collection_name.clone());
        row.set("content", d.content.clone());
        row.set("content_hash", d.content_hash.clone());
        if let Some(t) = &d.title {
            row.set("title", t.clone());
        }
        if let Some(t) = &d.doc_type {
            row.set("doc_type", t.clone());
        }
        row.set("metadata", RowValue::Json(serde_json::to_value(&d.metadata).unwrap_or_default()));
        row
    }
}

#[async_trait]
impl VersioningEngineClient for SqliteVersioningClient {
    async fn query(&self, sql: &str, params: &[RowValue]) -> Result<Vec<Row>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map(params_from_iter(params.iter()), |r| {
            let mut row = Row::new();
            for (i, name) in columns.iter().enumerate() {
                row.0.insert(name.clone(), value_ref_to_row_value(r.get_ref(i)?));
            }
            Ok(row)
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn execute(&self, stmt: &Statement) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(&stmt.sql, params_from_iter(stmt.params.iter()))?;
        }
        let mut flags = self.flags.lock().unwrap();
        flags.dirty = true;
        Ok(())
    }

    async fn current_branch(&self) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        Self::current_branch_sync(&conn)
    }

    async fn head_commit(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let branch = Self::current_branch_sync(&conn)?;
        Self::branch_head(&conn, &branch)
    }

    async fn status(&self) -> Result<StatusReport> {
        let flags = self.flags.lock().unwrap();
        Ok(StatusReport {
            has_staged_changes: flags.staged,
            has_unstaged_changes: flags.dirty && !flags.staged,
        })
    }

    async fn add(&self, _table: &str) -> Result<()> {
        self.flags.lock().unwrap().staged = true;
        Ok(())
    }

    async fn add_all(&self) -> Result<()> {
        self.flags.lock().unwrap().staged = true;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<CommitOutcome> {
        let conn = self.conn.lock().unwrap();
        let branch = Self::current_branch_sync(&conn)?;
        let parent = Self::branch_head(&conn, &branch)?;

        let docs = Self::load_documents(&conn)?;
        let cols = Self::load_collections(&conn)?;
        let docs_json = serde_json::to_string(&docs).unwrap_or_else(|_| "[]".to_string());
        let cols_json = serde_json::to_string(&cols).unwrap_or_else(|_| "[]".to_string());

        let hash = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO commits (hash, parent, message, created_at) VALUES (?1, ?2, ?3, ?4)",
            (&hash, &parent, message, Utc::now().timestamp()),
        )?;
        conn.execute(
            "INSERT INTO commit_snapshots (commit_hash, documents_json, collections_json) VALUES (?1, ?2, ?3)",
            (&hash, docs_json, cols_json),
        )?;
        Self::set_branch_head(&conn, &branch, &hash)?;
        drop(conn);

        let mut flags = self.flags.lock().unwrap();
        flags.dirty = false;
        flags.staged = false;

        Ok(CommitOutcome { success: true, hash: Some(hash), message: Some(message.to_string()) })
    }

    async fn checkout(&self, reference: &str, create_new: bool) -> Result<CheckoutOutcome> {
        let conn = self.conn.lock().unwrap();

        if create_new {
            let current = Self::current_branch_sync(&conn)?;
            let head = Self::branch_head(&conn, &current)?;
            if let Some(h) = &head {
                Self::set_branch_head(&conn, reference, h)?;
            } else {
                conn.execute(
                    "INSERT INTO branches (name, head_commit) VALUES (?1, NULL) ON CONFLICT(name) DO NOTHING",
                    [reference],
                )?;
            }
            Self::set_current_branch(&conn, reference)?;
            return Ok(CheckoutOutcome { success: true, error: None });
        }

        {
            let flags = self.flags.lock().unwrap();
            if flags.dirty {
                return Ok(CheckoutOutcome { success: false, error: Some(UNCOMMITTED_CHANGES_DIAGNOSTIC.to_string()) });
            }
        }

        let Some(target_commit) = Self::resolve_commit(&conn, reference)? else {
            // A branch that exists but has no commits yet resolves to an
            // empty working copy rather than an error.
            if conn
                .query_row::<i64, _, _>("SELECT 1 FROM branches WHERE name = ?1", [reference], |r| r.get(0))
                .is_ok()
            {
                Self::write_documents(&conn, &[])?;
                Self::write_collections(&conn, &[])?;
                Self::set_current_branch(&conn, reference)?;
                return Ok(CheckoutOutcome { success: true, error: None });
            }
            return Ok(CheckoutOutcome { success: false, error: Some(format!("unknown ref: {reference}")) });
        };

        let (docs, cols) = Self::snapshot_for(&conn, &target_commit)?.unwrap_or_default();
        Self::write_documents(&conn, &docs)?;
        Self::write_collections(&conn, &cols)?;

        if Self::branch_head(&conn, reference)?.is_some()
            || conn.query_row::<i64, _, _>("SELECT 1 FROM branches WHERE name = ?1", [reference], |r| r.get(0)).is_ok()
        {
            Self::set_current_branch(&conn, reference)?;
        }
        // else: `reference` was a raw commit hash (detached); current_branch is left unchanged.

        drop(conn);
        let mut flags = self.flags.lock().unwrap();
        flags.dirty = false;
        flags.staged = false;

        Ok(CheckoutOutcome { success: true, error: None })
    }

    async fn reset_hard(&self, reference: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let branch = Self::current_branch_sync(&conn)?;
        let target = if reference == "HEAD" {
            Self::branch_head(&conn, &branch)?
        } else {
            Self::resolve_commit(&conn, reference)?
        };
        let (docs, cols) = match target {
            Some(hash) => Self::snapshot_for(&conn, &hash)?.unwrap_or_default(),
            None => (Vec::new(), Vec::new()),
        };
        Self::write_documents(&conn, &docs)?;
        Self::write_collections(&conn, &cols)?;
        drop(conn);

        let mut flags = self.flags.lock().unwrap();
        flags.dirty = false;
        flags.staged = false;
        Ok(())
    }

    async fn reset_soft(&self, reference: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let branch = Self::current_branch_sync(&conn)?;
        let Some(target) = Self::resolve_commit(&conn, reference)? else {
            return Err(SyncError::Other(anyhow::anyhow!("unknown ref: {reference}")));
        };
        Self::set_branch_head(&conn, &branch, &target)?;
        drop(conn);

        let mut flags = self.flags.lock().unwrap();
        flags.dirty = true;
        flags.staged = false;
        Ok(())
    }

    async fn merge(&self, reference: &str) -> Result<MergeOutcome> {
        let conn = self.conn.lock().unwrap();
        let branch = Self::current_branch_sync(&conn)?;
        let ours_commit = Self::branch_head(&conn, &branch)?;
        let Some(theirs_commit) = Self::resolve_commit(&conn, reference)? else {
            return Ok(MergeOutcome { success: false, has_conflicts: false, message: Some(format!("unknown ref: {reference}")) });
        };

        let Some(ours_commit) = ours_commit else {
            // Nothing committed on our side yet: fast-forward.
            let (docs, cols) = Self::snapshot_for(&conn, &theirs_commit)?.unwrap_or_default();
            Self::write_documents(&conn, &docs)?;
            Self::write_collections(&conn, &cols)?;
            Self::set_branch_head(&conn, &branch, &theirs_commit)?;
            drop(conn);
            let mut flags = self.flags.lock().unwrap();
            flags.dirty = false;
            flags.staged = false;
            return Ok(MergeOutcome { success: true, has_conflicts: false, message: Some("fast-forward".to_string()) });
        };

        let lca = Self::lowest_common_ancestor(&conn, &ours_commit, &theirs_commit)?;
        let base_docs = match &lca {
            Some(hash) => Self::snapshot_for(&conn, hash)?.map(|(d, _)| d).unwrap_or_default(),
            None => Vec::new(),
        };
        let ours_docs = Self::load_documents(&conn)?;
        let (theirs_docs, theirs_cols) = Self::snapshot_for(&conn, &theirs_commit)?.unwrap_or_default();

        use std::collections::HashMap;
        let key = |d: &Document| (d.doc_id.clone(), d.collection_name.clone());
        let base_map: HashMap<_, _> = base_docs.iter().map(|d| (key(d), d)).collect();
        let ours_map: HashMap<_, _> = ours_docs.iter().map(|d| (key(d), d)).collect();
        let theirs_map: HashMap<_, _> = theirs_docs.iter().map(|d| (key(d), d)).collect();

        let mut all_keys: Vec<(String, String)> = ours_map.keys().chain(theirs_map.keys()).cloned().collect();
        all_keys.sort();
        all_keys.dedup();

        let mut merged: Vec<Document> = Vec::new();
        let mut conflicts = Vec::new();
        for k in all_keys {
            let base = base_map.get(&k).copied();
            let ours = ours_map.get(&k).copied();
            let theirs = theirs_map.get(&k).copied();

            let ours_hash = ours.map(|d| d.content_hash.as_str());
            let theirs_hash = theirs.map(|d| d.content_hash.as_str());
            let base_hash = base.map(|d| d.content_hash.as_str());

            if ours_hash == theirs_hash {
                if let Some(d) = ours.or(theirs) {
                    merged.push(d.clone());
                }
                continue;
            }
            if ours_hash == base_hash {
                if let Some(d) = theirs {
                    merged.push(d.clone());
                }
                continue;
            }
            if theirs_hash == base_hash {
                if let Some(d) = ours {
                    merged.push(d.clone());
                }
                continue;
            }

            conflicts.push(VersioningConflict {
                doc_id: k.0.clone(),
                ours: ours.map(document_to_conflict_row).unwrap_or_default(),
                theirs: theirs.map(document_to_conflict_row).unwrap_or_default(),
            });
        }

        if !conflicts.is_empty() {
            drop(conn);
            self.flags.lock().unwrap().conflicts = conflicts;
            return Ok(MergeOutcome { success: false, has_conflicts: true, message: Some("merge produced conflicts".to_string()) });
        }

        Self::write_documents(&conn, &merged)?;
        Self::write_collections(&conn, &theirs_cols)?;

        let hash = Uuid::new_v4().to_string();
        let message = format!("merge {reference} into {branch}");
        conn.execute(
            "INSERT INTO commits (hash, parent, message, created_at) VALUES (?1, ?2, ?3, ?4)",
            (&hash, &ours_commit, &message, Utc::now().timestamp()),
        )?;
        let docs_json = serde_json::to_string(&merged).unwrap_or_else(|_| "[]".to_string());
        let cols_json = serde_json::to_string(&theirs_cols).unwrap_or_else(|_| "[]".to_string());
        conn.execute(
            "INSERT INTO commit_snapshots (commit_hash, documents_json, collections_json) VALUES (?1, ?2, ?3)",
            (&hash, docs_json, cols_json),
        )?;
        Self::set_branch_head(&conn, &branch, &hash)?;
        drop(conn);

        let mut flags = self.flags.lock().unwrap();
        flags.dirty = false;
        flags.staged = false;
        flags.conflicts.clear();

        Ok(MergeOutcome { success: true, has_conflicts: false, message: Some(hash) })
    }

    async fn pull(&self, _remote: &str) -> Result<()> {
        // Wire protocol to a real remote is out of scope (spec non-goal);
        // the reference backend has no remote to pull from.
        Ok(())
    }

    async fn push(&self, _remote: &str, _branch: &str) -> Result<PushOutcome> {
        Ok(PushOutcome { success: true, message: Some("no-op: remote wire protocol is out of scope".to_string()) })
    }

    async fn fetch(&self) -> Result<()> {
        Ok(())
    }

    async fn clone_repo(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn is_initialized(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM commits", [], |r| r.get(0))?;
        Ok(count > 0)
    }

    async fn get_conflicts(&self, table: &str) -> Result<Vec<VersioningConflict>> {
        if table != "documents" {
            return Ok(Vec::new());
        }
        Ok(self.flags.lock().unwrap().conflicts.clone())
    }

    async fn diff(&self, from_commit: &str, to_commit: &str, table: &str) -> Result<Vec<DiffRow>> {
        if table != "documents" {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let from_docs = if from_commit.is_empty() {
            Vec::new()
        } else {
            Self::snapshot_for(&conn, from_commit)?.map(|(d, _)| d).unwrap_or_default()
        };
        let to_docs = Self::snapshot_for(&conn, to_commit)?.map(|(d, _)| d).unwrap_or_default();
        drop(conn);

        use std::collections::HashMap;
        let key = |d: &Document| (d.doc_id.clone(), d.collection_name.clone());
        let from_map: HashMap<_, _> = from_docs.iter().map(|d| (key(d), d)).collect();
        let to_map: HashMap<_, _> = to_docs.iter().map(|d| (key(d), d)).collect();

        let mut result = Vec::new();
        for (k, d) in &to_map {
            match from_map.get(k) {
                None => result.push(DiffRow { kind: DiffKind::Added, row: Self::document_to_row(d) }),
                Some(prev) if prev.content_hash != d.content_hash => {
                    result.push(DiffRow { kind: DiffKind::Modified, row: Self::document_to_row(d) })
                }
                _ => {}
            }
        }
        for (k, d) in &from_map {
            if !to_map.contains_key(k) {
                result.push(DiffRow { kind: DiffKind::Removed, row: Self::document_to_row(d) });
            }
        }
        Ok(result)
    }
}

fn document_to_conflict_row(d: &Document) -> Row {
    SqliteVersioningClient::document_to_row(d)
}
