//! C1: Chunker / Reassembler.
//!
//! Splits a document's content into deterministically-named, overlapping
//! chunks and reverses the process. Counting is done in `char`s, not bytes,
//! so a window boundary never lands inside a multi-byte UTF-8 sequence.

use sha2::{Digest, Sha256};

use crate::error::{Result, SyncError};
use crate::model::{Chunk, Document, Metadata};

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

const CHUNK_ID_SEP: &str = "_chunk_";

/// Canonical content hash: SHA-256 over the UTF-8 bytes of `content`,
/// lowercase hex encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn chunk_id(doc_id: &str, index: u32) -> String {
    format!("{doc_id}{CHUNK_ID_SEP}{index}")
}

/// Splits `c` on the **last** occurrence of `_chunk_`, per invariant 2.
/// Returns `(base_doc_id, index)`.
pub fn parse_chunk_id(id: &str) -> Option<(String, u32)> {
    let pos = id.rfind(CHUNK_ID_SEP)?;
    let (base, rest) = id.split_at(pos);
    let index_str = &rest[CHUNK_ID_SEP.len()..];
    let index: u32 = index_str.parse().ok()?;
    Some((base.to_string(), index))
}

/// A safe over-estimate of how many chunk ids a document of this many
/// characters could have produced, used to bulk-delete a candidate range
/// without first querying the previous chunk count.
pub fn chunk_id_upper_bound(content_len_chars: usize, chunk_size: usize, chunk_overlap: usize) -> usize {
    let stride = chunk_size.saturating_sub(chunk_overlap).max(1);
    let estimate = content_len_chars.div_ceil(stride) + 2;
    estimate.max(10)
}

/// Candidate chunk ids `doc_id_chunk_0 .. doc_id_chunk_{upper_bound-1}`,
/// for bulk deletion when the true `total_chunks` of a previous version is
/// unknown.
pub fn chunk_ids(doc_id: &str, upper_bound: usize) -> Vec<String> {
    (0..upper_bound as u32).map(|i| chunk_id(doc_id, i)).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Splits `doc.content` into `≤ params.chunk_size`-char windows overlapping
/// by `params.chunk_overlap` chars. Deterministic given `(content,
/// chunk_size, chunk_overlap)`.
pub fn chunk(doc: &Document, params: ChunkParams) -> Vec<Chunk> {
    let hash = content_hash(&doc.content);
    let chars: Vec<char> = doc.content.chars().collect();

    if chars.is_empty() {
        return vec![make_chunk(doc, &hash, String::new(), 0, 1, &doc.metadata)];
    }

    let stride = params.chunk_size.saturating_sub(params.chunk_overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + params.chunk_size).min(chars.len());
        windows.push((start, end));
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    let total = windows.len() as u32;
    windows
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| {
            let text: String = chars[start..end].iter().collect();
            make_chunk(doc, &hash, text, i as u32, total, &doc.metadata)
        })
        .collect()
}

fn make_chunk(doc: &Document, hash: &str, text: String, index: u32, total: u32, metadata: &Metadata) -> Chunk {
    Chunk {
        chunk_id: chunk_id(&doc.doc_id, index),
        content: text,
        chunk_index: index,
        total_chunks: total,
        source_id: doc.doc_id.clone(),
        collection_name: doc.collection_name.clone(),
        content_hash: hash.to_string(),
        dolt_commit: None,
        is_local_change: false,
        metadata: metadata.clone(),
    }
}

/// Orders `chunks` by `chunk_index`, trims the trailing overlap off every
/// non-terminal chunk, concatenates, and verifies the result against
/// `content_hash`. Fails if `total_chunks` disagrees across chunks, or any
/// index is missing or duplicated.
pub fn reassemble(mut chunks: Vec<Chunk>, chunk_overlap: usize) -> Result<Document> {
    if chunks.is_empty() {
        return Err(SyncError::ReassemblyError("no chunks supplied".into()));
    }

    chunks.sort_by_key(|c| c.chunk_index);

    let total = chunks[0].total_chunks;
    if chunks.iter().any(|c| c.total_chunks != total) {
        return Err(SyncError::ReassemblyError("inconsistent total_chunks across chunks".into()));
    }
    if chunks.len() as u32 != total {
        return Err(SyncError::ReassemblyError(format!(
            "expected {total} chunks, got {}",
            chunks.len()
        )));
    }
    for (i, c) in chunks.iter().enumerate() {
        if c.chunk_index != i as u32 {
            return Err(SyncError::ReassemblyError(format!(
                "missing or duplicated chunk_index (expected {i}, got {})",
                c.chunk_index
            )));
        }
    }

    let last = chunks.len() - 1;
    let mut content = String::new();
    for (i, c) in chunks.iter().enumerate() {
        if i == last {
            content.push_str(&c.content);
        } else {
            let chars: Vec<char> = c.content.chars().collect();
            let keep = chars.len().saturating_sub(chunk_overlap);
            content.extend(chars[..keep].iter());
        }
    }

    let expected_hash = &chunks[0].content_hash;
    let actual_hash = content_hash(&content);
    if &actual_hash != expected_hash {
        return Err(SyncError::ReassemblyError(format!(
            "reassembled content_hash {actual_hash} does not match recorded {expected_hash}"
        )));
    }

    let first = &chunks[0];
    Ok(Document {
        doc_id: first.source_id.clone(),
        collection_name: first.collection_name.clone(),
        content,
        content_hash: actual_hash,
        title: first
            .metadata
            .get("title")
            .and_then(|v| v.as_str())
            .map(String::from),
        doc_type: first
            .metadata
            .get("doc_type")
            .and_then(|v| v.as_str())
            .map(String::from),
        metadata: first.metadata.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(content: &str) -> Document {
        Document {
            doc_id: "d1".into(),
            collection_name: "col1".into(),
            content: content.to_string(),
            content_hash: content_hash(content),
            title: None,
            doc_type: None,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn chunk_id_parses_base_and_index() {
        assert_eq!(parse_chunk_id("d1_chunk_0"), Some(("d1".to_string(), 0)));
        assert_eq!(parse_chunk_id("d1_chunk_12"), Some(("d1".to_string(), 12)));
    }

    #[test]
    fn chunk_id_with_chunk_in_doc_id_splits_on_last_occurrence() {
        // doc id itself contains "_chunk_"; must split on the LAST one.
        assert_eq!(
            parse_chunk_id("weird_chunk_doc_chunk_3"),
            Some(("weird_chunk_doc".to_string(), 3))
        );
    }

    #[test]
    fn round_trip_small_document() {
        let d = doc("hello world");
        let chunks = chunk(&d, ChunkParams::default());
        let reassembled = reassemble(chunks, DEFAULT_CHUNK_OVERLAP).unwrap();
        assert_eq!(reassembled.content, d.content);
        assert_eq!(reassembled.content_hash, d.content_hash);
    }

    #[test]
    fn round_trip_multi_chunk_document() {
        let content: String = (0..3000).map(|i| char::from((b'a' + (i % 26) as u8)) as char).collect();
        let d = doc(&content);
        let params = ChunkParams { chunk_size: 512, chunk_overlap: 50 };
        let chunks = chunk(&d, params);
        assert!(chunks.len() > 1);
        let reassembled = reassemble(chunks, params.chunk_overlap).unwrap();
        assert_eq!(reassembled.content, d.content);
    }

    #[test]
    fn chunking_is_deterministic() {
        let content: String = (0..5000).map(|i| char::from((b'a' + (i % 26) as u8)) as char).collect();
        let d = doc(&content);
        let a = chunk(&d, ChunkParams::default());
        let b = chunk(&d, ChunkParams::default());
        assert_eq!(a, b);
    }

    #[test]
    fn empty_document_is_single_empty_chunk() {
        let d = doc("");
        let chunks = chunk(&d, ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "");
        assert_eq!(chunks[0].total_chunks, 1);
    }

    #[test]
    fn multibyte_content_never_splits_a_char() {
        let content: String = "日本語".repeat(400);
        let d = doc(&content);
        let params = ChunkParams { chunk_size: 100, chunk_overlap: 10 };
        let chunks = chunk(&d, params);
        for c in &chunks {
            assert!(c.content.chars().count() <= params.chunk_size);
        }
        let reassembled = reassemble(chunks, params.chunk_overlap).unwrap();
        assert_eq!(reassembled.content, d.content);
    }

    #[test]
    fn reassemble_rejects_missing_index() {
        let d = doc("abcdefghij");
        let mut chunks = chunk(&d, ChunkParams { chunk_size: 3, chunk_overlap: 1 });
        chunks.remove(1);
        let err = reassemble(chunks, 1).unwrap_err();
        assert!(matches!(err, SyncError::ReassemblyError(_)));
    }

    #[test]
    fn reassemble_rejects_inconsistent_total_chunks() {
        let d = doc("abcdefghij");
        let mut chunks = chunk(&d, ChunkParams { chunk_size: 3, chunk_overlap: 1 });
        chunks[0].total_chunks += 1;
        let err = reassemble(chunks, 1).unwrap_err();
        assert!(matches!(err, SyncError::ReassemblyError(_)));
    }

    #[test]
    fn chunk_id_upper_bound_covers_actual_chunk_count() {
        let content: String = (0..10_000).map(|i| char::from((b'a' + (i % 26) as u8)) as char).collect();
        let d = doc(&content);
        let params = ChunkParams::default();
        let actual = chunk(&d, params).len();
        let bound = chunk_id_upper_bound(content.chars().count(), params.chunk_size, params.chunk_overlap);
        assert!(bound >= actual, "upper bound {bound} should cover actual {actual} chunks");
    }
}
