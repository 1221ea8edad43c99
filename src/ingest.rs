//! Knowledge-base ingestion.
//!
//! Loads local markdown and text documents into the vector index:
//! walk → chunk → embed (in batches) → upsert into the industry namespace.
//!
//! Chunk ids are derived from `<parent-dir>_<file-stem>` and the chunk
//! index, so re-running ingestion over the same tree replaces vectors
//! instead of duplicating them.

use std::path::{Path, PathBuf};

use advisory_core::chunk::{chunk_text, estimate_chunk_tokens, DEFAULT_MAX_TOKENS};
use advisory_core::models::Chunk;
use advisory_core::retrieval::resolve_namespace;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::vector::{self, Metadata, VectorIndex, VectorRecord};

const EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

/// A source document read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub doc_id: String,
    pub title: String,
    pub source_url: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub documents: usize,
    pub chunks: usize,
    pub upserted: usize,
}

/// `<parent-dir>_<file-stem>` with whitespace replaced by `_`.
pub fn doc_id_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|s| s.to_string_lossy().to_string());
    let raw = match parent {
        Some(parent) => format!("{}_{}", parent, stem),
        None => stem,
    };
    raw.split_whitespace().collect::<Vec<_>>().join("_")
}

/// First markdown heading, else the file stem.
fn title_for(path: &Path, text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        })
}

/// Read every markdown/text file under `root`, in path order. Empty
/// files are skipped.
pub fn scan_documents(root: &Path) -> Result<Vec<SourceDocument>> {
    if !root.is_dir() {
        bail!("Ingest root is not a directory: {}", root.display());
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| EXTENSIONS.contains(&x.to_lowercase().as_str()))
        })
        .collect();
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if text.trim().is_empty() {
            debug!(path = %path.display(), "skipping empty document");
            continue;
        }
        let absolute = path.canonicalize().unwrap_or_else(|_| path.clone());
        docs.push(SourceDocument {
            doc_id: doc_id_for(&path),
            title: title_for(&path, &text),
            source_url: format!("file://{}", absolute.display()),
            text,
        });
    }
    Ok(docs)
}

fn chunk_metadata(doc: &SourceDocument, chunk: &Chunk, industry: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("text".into(), Value::from(chunk.text.as_str()));
    metadata.insert("industry".into(), Value::from(industry));
    metadata.insert("source_url".into(), Value::from(doc.source_url.as_str()));
    metadata.insert("doc_id".into(), Value::from(doc.doc_id.as_str()));
    metadata.insert("title".into(), Value::from(doc.title.as_str()));
    metadata.insert(
        "token_count".into(),
        Value::from(estimate_chunk_tokens(&chunk.text)),
    );
    metadata.insert("chunk_index".into(), Value::from(chunk.chunk_index));
    metadata
}

/// Chunk, embed, and upsert `docs` into the namespace for `industry`.
pub async fn ingest_documents(
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    docs: &[SourceDocument],
    industry: &str,
    batch_size: usize,
) -> Result<IngestSummary> {
    let namespace = resolve_namespace(industry);
    let mut pending: Vec<(Chunk, Metadata)> = Vec::new();
    for doc in docs {
        for chunk in chunk_text(&doc.doc_id, &doc.text, DEFAULT_MAX_TOKENS) {
            let metadata = chunk_metadata(doc, &chunk, &namespace);
            pending.push((chunk, metadata));
        }
    }

    let mut summary = IngestSummary {
        documents: docs.len(),
        chunks: pending.len(),
        upserted: 0,
    };

    for (batch_no, batch) in pending.chunks(batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
        let vectors = embedder
            .embed(&texts)
            .await
            .with_context(|| format!("Failed to embed batch {}", batch_no + 1))?;
        if vectors.len() != batch.len() {
            bail!(
                "Embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
        }

        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .map(|((chunk, metadata), values)| VectorRecord {
                id: chunk.id.clone(),
                values,
                metadata: metadata.clone(),
            })
            .collect();
        summary.upserted += index.upsert(&namespace, records).await?;
        debug!(namespace = %namespace, batch = batch_no + 1, "upserted batch");
    }

    info!(
        namespace = %namespace,
        documents = summary.documents,
        chunks = summary.chunks,
        "ingestion complete"
    );
    Ok(summary)
}

/// CLI entry point for `advisor ingest`.
pub async fn run_ingest(config: &Config, dir: &Path, industry: &str, dry_run: bool) -> Result<()> {
    let docs = scan_documents(dir)?;
    let namespace = resolve_namespace(industry);

    if dry_run {
        let chunks: usize = docs
            .iter()
            .map(|d| chunk_text(&d.doc_id, &d.text, DEFAULT_MAX_TOKENS).len())
            .sum();
        println!("ingest {} → {} (dry-run)", dir.display(), namespace);
        println!("  documents found: {}", docs.len());
        println!("  estimated chunks: {}", chunks);
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Ingestion requires an embedding provider. Set [embedding] provider in config.");
    }
    let embedder = embedding::create_provider(&config.embedding)?;
    let index = vector::create_index(&config.vector)?;

    let summary = ingest_documents(
        embedder.as_ref(),
        index.as_ref(),
        &docs,
        industry,
        config.embedding.batch_size,
    )
    .await?;

    println!("ingest {} → {}", dir.display(), namespace);
    println!("  documents: {}", summary.documents);
    println!("  chunks: {}", summary.chunks);
    println!("  vectors upserted: {}", summary.upserted);
    println!("ok");
    Ok(())
}
