//! Cached, time-bounded retrieval.
//!
//! [`CachedRetrieval`] sits in front of [`KnowledgeBase`] on the request
//! path. It never returns an error: a failed or timed-out lookup falls back
//! to the last cached result for the same key (even if expired), and then
//! to an empty list.
//!
//! ```text
//!  query ──▶ result cache (5 min) ──hit──▶ return
//!                 │ miss
//!                 ▼
//!          timeout(KnowledgeBase) ──ok, non-empty──▶ store + return
//!                 │ error / timeout
//!                 ▼
//!          stale entry ──▶ or []
//! ```
//!
//! Query embeddings are cached separately by query text (1 h), so a
//! repeated query with different options skips the embedding call.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use advisory_core::models::RetrievedDocument;
use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::knowledge::{KnowledgeBase, RetrievalOptions};
use crate::llm::ChatProvider;
use crate::vector::VectorIndex;

const WARMUP_BATCH: usize = 5;
const WARMUP_PAUSE: Duration = Duration::from_millis(100);
const HEALTH_PROBE: (&str, &str) = ("agriculture", "AI crop monitoring");

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub top_k: usize,
    pub min_score: f32,
    pub include_all_industries: bool,
    pub use_cache: bool,
    pub timeout: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.3,
            include_all_industries: false,
            use_cache: true,
            timeout: Duration::from_millis(2000),
        }
    }
}

impl SearchOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            min_score: config.min_score,
            timeout: Duration::from_millis(config.timeout_ms),
            ..Self::default()
        }
    }

    pub fn fast() -> Self {
        Self {
            top_k: 3,
            min_score: 0.4,
            timeout: Duration::from_millis(1000),
            ..Self::default()
        }
    }

    pub fn comprehensive() -> Self {
        Self {
            top_k: 8,
            min_score: 0.2,
            include_all_industries: true,
            timeout: Duration::from_millis(5000),
            ..Self::default()
        }
    }

    fn cache_key(&self, industry: &str, query: &str) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            industry, query, self.top_k, self.min_score, self.include_all_industries
        )
    }

    fn to_retrieval(&self) -> RetrievalOptions {
        RetrievalOptions {
            top_k: self.top_k,
            min_score: self.min_score,
            include_all_industries: self.include_all_industries,
            filter: None,
        }
    }
}

/// Named option presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProfile {
    Fast,
    Default,
    Comprehensive,
}

impl FromStr for SearchProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(SearchProfile::Fast),
            "default" => Ok(SearchProfile::Default),
            "comprehensive" => Ok(SearchProfile::Comprehensive),
            other => bail!(
                "Unknown search profile: '{}'. Must be fast, default, or comprehensive.",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Classify a probe: over 2 s or failed is unhealthy; over 1 s or empty
/// is degraded.
pub fn classify_health(latency_ms: u64, result_count: usize, failed: bool) -> HealthStatus {
    if failed || latency_ms > 2000 {
        HealthStatus::Unhealthy
    } else if latency_ms > 1000 || result_count == 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub embedding_cache_size: usize,
    pub result_cache_size: usize,
}

#[derive(Debug, Clone)]
pub struct BatchQuery {
    pub industry: String,
    pub query: String,
    pub options: Option<SearchOptions>,
}

/// Embedder that remembers query vectors by text.
struct CachingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Arc<TtlCache<String, Vec<f32>>>,
}

#[async_trait]
impl EmbeddingProvider for CachingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let cached: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.cache.get_live(t)).collect();
        let missing: Vec<String> = texts
            .iter()
            .zip(&cached)
            .filter(|(_, hit)| hit.is_none())
            .map(|(t, _)| t.clone())
            .collect();

        let mut fresh = if missing.is_empty() {
            Vec::new().into_iter()
        } else {
            let vectors = self.inner.embed(&missing).await?;
            for (text, vector) in missing.iter().zip(&vectors) {
                self.cache.insert(text.clone(), vector.clone());
            }
            vectors.into_iter()
        };

        let mut out = Vec::with_capacity(texts.len());
        for hit in cached {
            match hit {
                Some(v) => out.push(v),
                None => match fresh.next() {
                    Some(v) => out.push(v),
                    None => bail!("embedding provider returned too few vectors"),
                },
            }
        }
        Ok(out)
    }
}

pub struct CachedRetrieval {
    kb: KnowledgeBase,
    results: TtlCache<String, Vec<RetrievedDocument>>,
    embeddings: Arc<TtlCache<String, Vec<f32>>>,
    defaults: SearchOptions,
    sweep_interval: Duration,
}

impl CachedRetrieval {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        chat: Arc<dyn ChatProvider>,
        expansion_model: &str,
        config: &RetrievalConfig,
    ) -> Self {
        let embeddings = Arc::new(TtlCache::new(Duration::from_secs(config.embedding_ttl_secs)));
        let caching = Arc::new(CachingEmbedder {
            inner: embedder,
            cache: embeddings.clone(),
        });
        Self {
            kb: KnowledgeBase::new(caching, index, chat, expansion_model),
            results: TtlCache::new(Duration::from_secs(config.result_ttl_secs)),
            embeddings,
            defaults: SearchOptions::from_config(config),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        }
    }

    /// The uncached client, for multi-namespace, related, and expanded search.
    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn default_options(&self) -> &SearchOptions {
        &self.defaults
    }

    pub fn options_for(&self, profile: SearchProfile) -> SearchOptions {
        match profile {
            SearchProfile::Fast => SearchOptions::fast(),
            SearchProfile::Default => self.defaults.clone(),
            SearchProfile::Comprehensive => SearchOptions::comprehensive(),
        }
    }

    pub async fn get_relevant_docs(
        &self,
        industry: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> Vec<RetrievedDocument> {
        self.lookup(industry, query, opts).await.0
    }

    pub async fn fast_search(&self, industry: &str, query: &str) -> Vec<RetrievedDocument> {
        self.get_relevant_docs(industry, query, &SearchOptions::fast())
            .await
    }

    pub async fn comprehensive_search(&self, industry: &str, query: &str) -> Vec<RetrievedDocument> {
        self.get_relevant_docs(industry, query, &SearchOptions::comprehensive())
            .await
    }

    /// Results plus the upstream error, if one occurred.
    async fn lookup(
        &self,
        industry: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> (Vec<RetrievedDocument>, Option<String>) {
        let key = opts.cache_key(industry, query);

        if opts.use_cache {
            if let Some(hit) = self.results.get_live(&key) {
                debug!(%key, "retrieval cache hit");
                return (hit, None);
            }
        }

        let outcome = tokio::time::timeout(
            opts.timeout,
            self.kb
                .get_relevant_docs(industry, query, &opts.to_retrieval()),
        )
        .await;

        let error = match outcome {
            Ok(Ok(results)) => {
                if opts.use_cache && !results.is_empty() {
                    self.results.insert(key, results.clone());
                }
                return (results, None);
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!("query timed out after {} ms", opts.timeout.as_millis()),
        };

        warn!(industry, query, error = %error, "retrieval failed");
        match self.results.get_stale(&key) {
            Some(stale) => {
                warn!(industry, query, "returning stale cached results");
                (stale, Some(error))
            }
            None => (Vec::new(), Some(error)),
        }
    }

    /// Run every query concurrently. A failed query yields an empty list.
    pub async fn batch_search(&self, queries: &[BatchQuery]) -> Vec<Vec<RetrievedDocument>> {
        join_all(queries.iter().map(|q| {
            let opts = q.options.clone().unwrap_or_else(|| self.defaults.clone());
            async move { self.get_relevant_docs(&q.industry, &q.query, &opts).await }
        }))
        .await
    }

    /// Pre-populate the cache, five queries at a time.
    pub async fn warmup(&self, queries: &[(String, String)]) {
        info!(count = queries.len(), "warming up retrieval cache");
        let batches: Vec<_> = queries.chunks(WARMUP_BATCH).collect();
        for (i, batch) in batches.iter().enumerate() {
            join_all(
                batch
                    .iter()
                    .map(|(industry, query)| self.get_relevant_docs(industry, query, &self.defaults)),
            )
            .await;
            if i + 1 < batches.len() {
                tokio::time::sleep(WARMUP_PAUSE).await;
            }
        }
        info!("retrieval cache warmup completed");
    }

    pub async fn health_check(&self) -> HealthReport {
        let started = tokio::time::Instant::now();
        let (industry, query) = HEALTH_PROBE;
        let (results, error) = self.lookup(industry, query, &SearchOptions::fast()).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let status = classify_health(latency_ms, results.len(), error.is_some());

        let error = error.or_else(|| match status {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded => Some("Performance or quality issues".to_string()),
            HealthStatus::Unhealthy => Some("High latency detected".to_string()),
        });
        HealthReport {
            status,
            latency_ms,
            error,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            embedding_cache_size: self.embeddings.len(),
            result_cache_size: self.results.len(),
        }
    }

    pub fn clear_cache(&self) {
        self.embeddings.clear();
        self.results.clear();
    }

    /// Drop expired entries from both caches.
    pub fn sweep_expired(&self) -> usize {
        self.embeddings.sweep() + self.results.sweep()
    }

    /// Sweep both caches every `retrieval.sweep_interval_secs`.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = this.sweep_expired();
                if removed > 0 {
                    debug!(removed, "swept expired retrieval cache entries");
                }
            }
        })
    }
}
