//! Vector index: build, atomic persistence, load, and nearest-neighbor
//! search.
//!
//! The index is a flat collection of embedded chunks persisted as a SQLite
//! database inside the configured index directory. It is rebuilt wholesale
//! when the corpus changes; there is no incremental update path. At query
//! time the whole index is loaded once into memory and shared read-only
//! across concurrent runs, so search needs no locking.
//!
//! Persistence is atomic: a build writes into a `<dir>.tmp` staging
//! directory and swaps it into place only after the database is fully
//! written, so an interrupted build never leaves a partially written
//! index behind.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::chunk::split_document;
use crate::config::ChunkingConfig;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::models::{Chunk, Document, DocumentMeta, EmbeddingRecord};

/// Database file name within the index directory.
const INDEX_DB: &str = "index.sqlite";

/// Why a persisted index could not be loaded. Callers degrade to
/// "retrieval disabled" on either variant rather than aborting.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no vector index found at {0}")]
    NotFound(PathBuf),
    #[error("vector index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Metadata recorded alongside the vectors at build time.
#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub model: String,
    pub dims: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub document_count: usize,
    pub chunk_count: usize,
    pub built_at: i64,
}

/// Summary of a completed build, for status output.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub model: String,
    pub dims: usize,
}

/// An embedding record scored against a query vector.
#[derive(Debug)]
pub struct ScoredRecord<'a> {
    pub record: &'a EmbeddingRecord,
    pub similarity: f32,
}

/// The in-memory vector index: an ordered collection of embedded chunks
/// with uniform dimensionality.
#[derive(Debug)]
pub struct VectorIndex {
    records: Vec<EmbeddingRecord>,
    model: String,
    dims: usize,
}

impl VectorIndex {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Return the `k` records nearest to `query_vec`, ranked by descending
    /// cosine similarity. The sort is stable, so ties keep insertion
    /// order. An empty index returns an empty result, never an error.
    pub fn search(&self, query_vec: &[f32], k: usize) -> Vec<ScoredRecord<'_>> {
        let mut scored: Vec<ScoredRecord> = self
            .records
            .iter()
            .map(|record| ScoredRecord {
                similarity: cosine_similarity(query_vec, &record.vector),
                record,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }

    /// Load a persisted index into memory.
    ///
    /// `expected_model` and `expected_dims` come from the configured
    /// embedding capability; a disagreement means queries would be
    /// embedded in a different space than the stored vectors, which is a
    /// correctness bug, so the load is rejected as corrupt.
    pub async fn load(
        dir: &Path,
        expected_model: &str,
        expected_dims: usize,
    ) -> Result<Self, IndexError> {
        let db_path = dir.join(INDEX_DB);
        if !db_path.exists() {
            return Err(IndexError::NotFound(dir.to_path_buf()));
        }

        let corrupt = |reason: String| IndexError::Corrupt {
            path: dir.to_path_buf(),
            reason,
        };

        let pool = open_pool(&db_path, false)
            .await
            .map_err(|e| corrupt(e.to_string()))?;

        let meta = read_meta_row(&pool)
            .await
            .map_err(|e| corrupt(e.to_string()))?;

        if meta.model != expected_model || meta.dims != expected_dims {
            pool.close().await;
            return Err(corrupt(format!(
                "embedding model mismatch: index built with {} ({} dims), configured {} ({} dims)",
                meta.model, meta.dims, expected_model, expected_dims
            )));
        }

        let rows = sqlx::query(
            "SELECT id, source, category, path, chunk_index, text, hash, embedding \
             FROM records ORDER BY position",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| corrupt(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            if vector.len() != meta.dims {
                pool.close().await;
                return Err(corrupt(format!(
                    "record vector has {} dims, index metadata says {}",
                    vector.len(),
                    meta.dims
                )));
            }

            records.push(EmbeddingRecord {
                chunk: Chunk {
                    id: row.get("id"),
                    index: row.get("chunk_index"),
                    text: row.get("text"),
                    hash: row.get("hash"),
                    meta: DocumentMeta {
                        source: row.get("source"),
                        category: row.get("category"),
                        path: row.get("path"),
                    },
                },
                vector,
            });
        }

        pool.close().await;

        Ok(Self {
            records,
            model: meta.model,
            dims: meta.dims,
        })
    }
}

/// Read only the index metadata, without loading vectors. Used by
/// `rfp stats`.
pub async fn read_meta(dir: &Path) -> Result<IndexMeta, IndexError> {
    let db_path = dir.join(INDEX_DB);
    if !db_path.exists() {
        return Err(IndexError::NotFound(dir.to_path_buf()));
    }
    let corrupt = |reason: String| IndexError::Corrupt {
        path: dir.to_path_buf(),
        reason,
    };

    let pool = open_pool(&db_path, false)
        .await
        .map_err(|e| corrupt(e.to_string()))?;
    let meta = read_meta_row(&pool)
        .await
        .map_err(|e| corrupt(e.to_string()));
    pool.close().await;
    meta
}

/// Chunk, embed, and persist the whole corpus as a fresh index.
///
/// The build fails outright if any embedding batch fails — a partial
/// index would silently corrupt retrieval, so none is ever written. The
/// completed database is staged in `<dir>.tmp` and renamed into place.
pub async fn build_index(
    documents: &[Document],
    embedder: &dyn Embedder,
    chunking: &ChunkingConfig,
    batch_size: usize,
    dir: &Path,
) -> Result<BuildReport> {
    let chunks: Vec<Chunk> = documents
        .iter()
        .flat_map(|doc| split_document(doc, chunking.chunk_size, chunking.chunk_overlap))
        .collect();

    // Embed everything before touching the filesystem.
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let batch_vectors = embedder
            .embed(&texts)
            .await
            .context("Embedding failed; aborting build (no partial index is written)")?;
        vectors.extend(batch_vectors);
    }

    let staging = staging_dir(dir);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)
            .with_context(|| format!("Failed to clear staging dir {}", staging.display()))?;
    }
    std::fs::create_dir_all(&staging)
        .with_context(|| format!("Failed to create staging dir {}", staging.display()))?;

    let db_path = staging.join(INDEX_DB);
    let pool = open_pool(&db_path, true).await?;
    create_schema(&pool).await?;

    let meta = IndexMeta {
        model: embedder.model_name().to_string(),
        dims: embedder.dims(),
        chunk_size: chunking.chunk_size,
        chunk_overlap: chunking.chunk_overlap,
        document_count: documents.len(),
        chunk_count: chunks.len(),
        built_at: Utc::now().timestamp(),
    };
    write_records(&pool, &meta, &chunks, &vectors).await?;
    pool.close().await;

    // Swap the staging directory into place.
    if dir.exists() {
        std::fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to remove previous index at {}", dir.display()))?;
    }
    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&staging, dir).with_context(|| {
        format!(
            "Failed to move staged index {} into place at {}",
            staging.display(),
            dir.display()
        )
    })?;

    Ok(BuildReport {
        documents: documents.len(),
        chunks: chunks.len(),
        model: meta.model,
        dims: meta.dims,
    })
}

fn staging_dir(dir: &Path) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "index".to_string());
    name.push_str(".tmp");
    dir.with_file_name(name)
}

async fn open_pool(db_path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            chunk_size INTEGER NOT NULL,
            chunk_overlap INTEGER NOT NULL,
            document_count INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            built_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            source TEXT NOT NULL,
            category TEXT NOT NULL,
            path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn write_records(
    pool: &SqlitePool,
    meta: &IndexMeta,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO index_meta (model, dims, chunk_size, chunk_overlap, document_count, chunk_count, built_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&meta.model)
    .bind(meta.dims as i64)
    .bind(meta.chunk_size as i64)
    .bind(meta.chunk_overlap as i64)
    .bind(meta.document_count as i64)
    .bind(meta.chunk_count as i64)
    .bind(meta.built_at)
    .execute(&mut *tx)
    .await?;

    for (position, (chunk, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
        sqlx::query(
            "INSERT INTO records (id, position, source, category, path, chunk_index, text, hash, embedding) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(position as i64)
        .bind(&chunk.meta.source)
        .bind(&chunk.meta.category)
        .bind(&chunk.meta.path)
        .bind(chunk.index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn read_meta_row(pool: &SqlitePool) -> Result<IndexMeta> {
    let row = sqlx::query(
        "SELECT model, dims, chunk_size, chunk_overlap, document_count, chunk_count, built_at \
         FROM index_meta LIMIT 1",
    )
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| anyhow::anyhow!("index_meta table is empty"))?;

    let dims: i64 = row.get("dims");
    let chunk_size: i64 = row.get("chunk_size");
    let chunk_overlap: i64 = row.get("chunk_overlap");
    let document_count: i64 = row.get("document_count");
    let chunk_count: i64 = row.get("chunk_count");

    Ok(IndexMeta {
        model: row.get("model"),
        dims: dims as usize,
        chunk_size: chunk_size as usize,
        chunk_overlap: chunk_overlap as usize,
        document_count: document_count as usize,
        chunk_count: chunk_count as usize,
        built_at: row.get("built_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Deterministic test embedder: hashed bag-of-words vectors.
    struct HashEmbedder {
        dims: usize,
    }

    fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        for token in text.to_lowercase().split_whitespace() {
            let mut h: usize = 0;
            for b in token.bytes() {
                h = h.wrapping_mul(31).wrapping_add(b as usize);
            }
            v[h % dims] += 1.0;
        }
        v
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        fn model_name(&self) -> &str {
            "hash-test"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| hash_embed(t, self.dims)).collect())
        }
    }

    /// Embedder that always fails, to exercise the no-partial-index rule.
    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("capability outage")
        }
    }

    fn doc(path: &str, body: &str) -> Document {
        let source = path.rsplit('/').next().unwrap_or(path).to_string();
        let category = path.split('/').next().unwrap_or("").to_string();
        Document {
            body: body.to_string(),
            meta: DocumentMeta {
                source,
                category,
                path: path.to_string(),
            },
        }
    }

    fn chunking() -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: 80,
            chunk_overlap: 10,
        }
    }

    #[tokio::test]
    async fn test_build_load_roundtrip_preserves_query_results() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("vectorstore");
        let embedder = HashEmbedder { dims: 32 };

        let docs = vec![
            doc(
                "compliance/veeva_policy.txt",
                "All trials must use Veeva Vault for document management.",
            ),
            doc(
                "wins/oncology.txt",
                "Phase III oncology trial with adaptive design across 40 countries.",
            ),
        ];

        let report = build_index(&docs, &embedder, &chunking(), 16, &dir)
            .await
            .unwrap();
        assert_eq!(report.documents, 2);
        assert!(report.chunks >= 2);

        let index = VectorIndex::load(&dir, "hash-test", 32).await.unwrap();
        assert_eq!(index.len(), report.chunks);
        assert_eq!(index.dims(), 32);

        let query = hash_embed("Veeva Vault compliance", 32);
        let results = index.search(&query, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.chunk.meta.source, "veeva_policy.txt");
        assert_eq!(results[0].record.chunk.meta.category, "compliance");

        // Reload and verify the same query yields the same ranking.
        let reloaded = VectorIndex::load(&dir, "hash-test", 32).await.unwrap();
        let again = reloaded.search(&query, 2);
        let first = index.search(&query, 2);
        let ids_a: Vec<&str> = first.iter().map(|s| s.record.chunk.id.as_str()).collect();
        let ids_b: Vec<&str> = again.iter().map(|s| s.record.chunk.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn test_load_missing_index_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = VectorIndex::load(&tmp.path().join("absent"), "hash-test", 32)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_rejects_dims_mismatch_as_corrupt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("vectorstore");
        let embedder = HashEmbedder { dims: 16 };
        let docs = vec![doc("wins/a.txt", "Some corpus text to index.")];
        build_index(&docs, &embedder, &chunking(), 16, &dir)
            .await
            .unwrap();

        let err = VectorIndex::load(&dir, "hash-test", 32).await.unwrap_err();
        match err {
            IndexError::Corrupt { reason, .. } => assert!(reason.contains("mismatch")),
            other => panic!("expected Corrupt, got {:?}", other),
        }

        // Model mismatch is equally fatal.
        let err = VectorIndex::load(&dir, "other-model", 16).await.unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_failed_embedding_leaves_no_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("vectorstore");
        let docs = vec![doc("wins/a.txt", "text that will never be embedded")];

        let err = build_index(&docs, &FailingEmbedder, &chunking(), 16, &dir)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no partial index"));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("vectorstore");
        let embedder = HashEmbedder { dims: 8 };

        build_index(
            &[doc("wins/a.txt", "first corpus snapshot")],
            &embedder,
            &chunking(),
            16,
            &dir,
        )
        .await
        .unwrap();

        build_index(
            &[
                doc("wins/a.txt", "second corpus snapshot"),
                doc("wins/b.txt", "with one more document"),
            ],
            &embedder,
            &chunking(),
            16,
            &dir,
        )
        .await
        .unwrap();

        let meta = read_meta(&dir).await.unwrap();
        assert_eq!(meta.document_count, 2);
        assert!(!staging_dir(&dir).exists());
    }

    #[tokio::test]
    async fn test_empty_index_search_returns_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("vectorstore");
        let embedder = HashEmbedder { dims: 8 };

        build_index(&[], &embedder, &chunking(), 16, &dir)
            .await
            .unwrap();

        let index = VectorIndex::load(&dir, "hash-test", 8).await.unwrap();
        assert!(index.is_empty());
        assert!(index.search(&vec![1.0; 8], 5).is_empty());
    }

    #[test]
    fn test_stable_tie_break_keeps_insertion_order() {
        let mk = |id: &str, vector: Vec<f32>| EmbeddingRecord {
            chunk: Chunk {
                id: id.to_string(),
                index: 0,
                text: id.to_string(),
                hash: String::new(),
                meta: DocumentMeta {
                    source: format!("{}.txt", id),
                    category: "t".to_string(),
                    path: format!("t/{}.txt", id),
                },
            },
            vector,
        };

        let index = VectorIndex {
            records: vec![
                mk("first", vec![1.0, 0.0]),
                mk("second", vec![1.0, 0.0]),
                mk("third", vec![0.0, 1.0]),
            ],
            model: "hash-test".to_string(),
            dims: 2,
        };

        let results = index.search(&[1.0, 0.0], 3);
        let ids: Vec<&str> = results.iter().map(|s| s.record.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }
}
