//! Similarity-based retrieval over the loaded vector index.
//!
//! The retriever embeds a free-text query with the same capability that
//! built the index and returns the top-K nearest chunks as a
//! [`RetrievedContext`], closest first. Snippets are truncated to a fixed
//! maximum length for prompt-size control, after ranking so truncation
//! never changes the order.

use anyhow::Result;
use std::sync::Arc;

use crate::embedding::{embed_query, Embedder};
use crate::index::VectorIndex;
use crate::models::{RetrievedContext, RetrievedPassage};

pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    max_snippet_chars: usize,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("index", &self.index)
            .field("max_snippet_chars", &self.max_snippet_chars)
            .finish()
    }
}

impl Retriever {
    /// Pair an index with the embedding capability used to build it.
    ///
    /// Rejects a dimensionality disagreement up front: a query embedded in
    /// a different space than the stored vectors would rank garbage.
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        max_snippet_chars: usize,
    ) -> Result<Self> {
        if embedder.dims() != index.dims() {
            anyhow::bail!(
                "Embedder dimensionality ({}) does not match index ({})",
                embedder.dims(),
                index.dims()
            );
        }
        Ok(Self {
            index,
            embedder,
            max_snippet_chars,
        })
    }

    /// Return the `k` chunks nearest to `text`, ranked by descending
    /// similarity. An empty index yields the empty-context sentinel, not
    /// an error. No relevance threshold is applied; top-k is always
    /// returned when available.
    pub async fn query(&self, text: &str, k: usize) -> Result<RetrievedContext> {
        if self.index.is_empty() {
            return Ok(RetrievedContext::empty());
        }

        let query_vec = embed_query(self.embedder.as_ref(), text).await?;

        let passages = self
            .index
            .search(&query_vec, k)
            .into_iter()
            .map(|scored| RetrievedPassage {
                source: scored.record.chunk.meta.source.clone(),
                category: scored.record.chunk.meta.category.clone(),
                snippet: truncate_chars(&scored.record.chunk.text, self.max_snippet_chars),
                score: scored.similarity,
            })
            .collect();

        Ok(RetrievedContext { passages })
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
