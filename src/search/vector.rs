use crate::llm::embeddings::EmbeddingScheme;
use crate::models::{Chunk, ScoredChunk};

/// A stored vector entry
#[derive(Debug, Clone)]
struct VectorEntry {
    chunk: Chunk,
    embedding: Vec<f32>,
}

/// In-memory cosine-similarity index over one repository's chunks.
///
/// Every vector shares the dimension of the first one accepted, and the
/// index remembers which embedding scheme produced them.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    scheme: EmbeddingScheme,
    dims: Option<usize>,
    entries: Vec<VectorEntry>,
}

impl VectorIndex {
    pub fn new(scheme: EmbeddingScheme) -> Self {
        Self {
            scheme,
            dims: None,
            entries: Vec::new(),
        }
    }

    pub fn scheme(&self) -> &EmbeddingScheme {
        &self.scheme
    }

    /// Vector dimension, or `None` while the index is empty.
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add one chunk. Returns `false` (and stores nothing) when the vector is
    /// empty or its dimension disagrees with the index.
    pub fn insert(&mut self, chunk: Chunk, embedding: Vec<f32>) -> bool {
        if embedding.is_empty() {
            return false;
        }
        match self.dims {
            Some(d) if d != embedding.len() => return false,
            Some(_) => {}
            None => self.dims = Some(embedding.len()),
        }
        self.entries.push(VectorEntry { chunk, embedding });
        true
    }

    /// The `limit` most similar chunks, best first. Equal scores are ordered
    /// by file path, then ordinal, so results are reproducible.
    pub fn search(&self, query_embedding: &[f32], limit: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(f32, &VectorEntry)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(query_embedding, &e.embedding), e))
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.chunk.file_path.cmp(&b.1.chunk.file_path))
                .then_with(|| a.1.chunk.ordinal.cmp(&b.1.chunk.ordinal))
        });
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(score, e)| ScoredChunk {
                chunk: e.chunk.clone(),
                score,
            })
            .collect()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        let sim = dot / denom;
        if sim.is_nan() {
            0.0
        } else {
            sim
        }
    }
}
