//! Reassembly of `chunked_content` frames
//!
//! Large payloads (images) arrive as base64 slices spread over several
//! frames. [`ChunkReassembler`] collects them per content id and, once the
//! declared number of slices is present, emits a single composite event.

use std::collections::{BTreeMap, HashMap};

use base64::Engine as _;

use crate::error::ChatError;
use crate::protocol::{ChatEvent, ChunkedContent, Image};

/// In-progress assembly of one content id. Never persisted.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Declared number of slices.
    pub total_chunks: usize,
    /// Received slices keyed by index.
    pub chunks: BTreeMap<usize, String>,
    /// MIME type of the reassembled payload.
    pub mime_type: String,
    /// Kind of the reassembled content.
    pub content_type: String,
}

impl ChunkRecord {
    fn is_complete(&self) -> bool {
        self.chunks.len() == self.total_chunks
    }
}

/// Collects chunk slices per content id.
///
/// # Examples
///
/// ```
/// use chatstream::chunks::ChunkReassembler;
/// use chatstream::protocol::{ChatEvent, ChunkedContent};
///
/// let mut reassembler = ChunkReassembler::default();
/// let chunk = |index: usize, data: &str| ChunkedContent {
///     id: "img".to_string(),
///     content_type: "image".to_string(),
///     chunk_index: index,
///     total_chunks: 2,
///     mime_type: "image/png".to_string(),
///     data: data.to_string(),
/// };
///
/// assert!(reassembler.ingest(chunk(1, "bG8=")).unwrap().is_none());
/// let event = reassembler.ingest(chunk(0, "aGVs")).unwrap().unwrap();
/// assert!(matches!(event, ChatEvent::Image(ref image) if image.url == "data:image/png;base64,aGVsbG8="));
/// ```
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    records: HashMap<String, ChunkRecord>,
}

impl ChunkReassembler {
    /// Store one slice; return the composite event when the id completes.
    ///
    /// A repeated `(id, chunk_index)` replaces the earlier slice and is not
    /// counted twice.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Chunk`] when the slice index is out of range,
    /// the declared total is zero, or the completed payload fails
    /// validation. On validation failure the record is discarded.
    pub fn ingest(&mut self, chunk: ChunkedContent) -> Result<Option<ChatEvent>, ChatError> {
        let ChunkedContent {
            id,
            content_type,
            chunk_index,
            total_chunks,
            mime_type,
            data,
        } = chunk;

        if total_chunks == 0 {
            return Err(ChatError::Chunk(format!(
                "content `{}` declares zero chunks",
                id
            )));
        }

        let record = self.records.entry(id.clone()).or_insert_with(|| ChunkRecord {
            total_chunks,
            chunks: BTreeMap::new(),
            mime_type,
            content_type,
        });

        if chunk_index >= record.total_chunks {
            let total = record.total_chunks;
            if record.chunks.is_empty() {
                self.records.remove(&id);
            }
            return Err(ChatError::Chunk(format!(
                "chunk {} of content `{}` is outside the declared {} chunks",
                chunk_index, id, total
            )));
        }

        record.chunks.insert(chunk_index, data);
        tracing::debug!(
            "Received chunk {}/{} for content `{}`",
            record.chunks.len(),
            record.total_chunks,
            id
        );

        if !record.is_complete() {
            return Ok(None);
        }

        let Some(record) = self.records.remove(&id) else {
            return Ok(None);
        };
        assemble(id, record).map(Some)
    }

    /// Ids that have received some but not all slices.
    pub fn pending_ids(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Whether any assembly is in progress.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn assemble(id: String, record: ChunkRecord) -> Result<ChatEvent, ChatError> {
    // BTreeMap iteration is in index order, independent of arrival order.
    let payload: String = record.chunks.into_values().collect();

    base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| ChatError::Chunk(format!("content `{}` is not valid base64: {}", id, e)))?;

    match record.content_type.as_str() {
        "image" => Ok(ChatEvent::Image(Image {
            url: format!("data:{};base64,{}", record.mime_type, payload),
            id,
        })),
        other => Err(ChatError::Chunk(format!(
            "content `{}` has unsupported type `{}`",
            id, other
        ))),
    }
}
