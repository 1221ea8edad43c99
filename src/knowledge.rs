//! Knowledge-base retrieval over the vector index.
//!
//! [`KnowledgeBase`] embeds a query, searches one or more industry
//! namespaces, and shapes the matches into [`RetrievedDocument`]s. It is
//! the uncached layer: failures to embed or to query the requested
//! namespace surface as [`AdvisorError::Upstream`]. Secondary namespaces
//! (`all_industries`, the other industries of a cross-industry search) are
//! best effort: their failures are logged and treated as empty.
//!
//! | Operation | Default `top_k` |
//! |-----------|-----------------|
//! | [`KnowledgeBase::get_relevant_docs`] | 5 |
//! | [`KnowledgeBase::search_across_industries`] | 10 |
//! | [`KnowledgeBase::related_documents`] | 5 |
//! | [`KnowledgeBase::expanded_search`] | 8 |

use std::sync::Arc;

use advisory_core::models::{ConversationTurn, DocMetadata, RetrievedDocument};
use advisory_core::retrieval::{
    expansion_system_prompt, expansion_user_prompt, merge_ranked, parse_expansions, per_part,
    resolve_namespace, ALL_INDUSTRIES,
};
use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::AdvisorError;
use crate::llm::{ChatProvider, CompletionOptions};
use crate::vector::{IndexStats, Metadata, VectorIndex, VectorMatch};

/// Options shared by every retrieval operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub min_score: f32,
    /// Also search the `all_industries` namespace at half the budget.
    pub include_all_industries: bool,
    pub filter: Option<Metadata>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.3,
            include_all_industries: false,
            filter: None,
        }
    }
}

impl RetrievalOptions {
    pub fn with_top_k(top_k: usize) -> Self {
        Self {
            top_k,
            ..Self::default()
        }
    }
}

pub struct KnowledgeBase {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatProvider>,
    expansion: CompletionOptions,
}

impl KnowledgeBase {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        chat: Arc<dyn ChatProvider>,
        expansion_model: &str,
    ) -> Self {
        Self {
            embedder,
            index,
            chat,
            expansion: CompletionOptions::new(expansion_model, 0.7, 200),
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>> {
        embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(|e| AdvisorError::Upstream(format!("failed to embed query: {:#}", e)).into())
    }

    /// Query a secondary namespace; errors become an empty result.
    async fn query_namespace(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Metadata>,
        fallback_industry: &str,
    ) -> Vec<RetrievedDocument> {
        match self.index.query(namespace, vector, top_k, filter).await {
            Ok(matches) => matches
                .into_iter()
                .map(|m| to_document(m, fallback_industry))
                .collect(),
            Err(e) => {
                warn!(namespace, error = %e, "namespace query failed");
                Vec::new()
            }
        }
    }

    pub async fn get_relevant_docs(
        &self,
        industry: &str,
        query: &str,
        opts: &RetrievalOptions,
    ) -> Result<Vec<RetrievedDocument>> {
        let vector = self.embed(query).await?;
        let namespace = resolve_namespace(industry);
        let filter = opts.filter.as_ref().filter(|f| !f.is_empty());

        let mut results: Vec<RetrievedDocument> = self
            .index
            .query(&namespace, &vector, opts.top_k, filter)
            .await
            .map_err(|e| {
                AdvisorError::Upstream(format!("namespace {} query failed: {:#}", namespace, e))
            })?
            .into_iter()
            .map(|m| to_document(m, industry))
            .collect();

        if opts.include_all_industries && namespace != ALL_INDUSTRIES {
            let general = self
                .query_namespace(
                    ALL_INDUSTRIES,
                    &vector,
                    per_part(opts.top_k, 2),
                    filter,
                    ALL_INDUSTRIES,
                )
                .await;
            results.extend(general);
        }

        Ok(merge_ranked(results, opts.min_score, opts.top_k))
    }

    /// Search several namespaces at `ceil(top_k / n)` each. An empty
    /// `industries` list searches every namespace in the index.
    pub async fn search_across_industries(
        &self,
        query: &str,
        industries: &[String],
        opts: &RetrievalOptions,
    ) -> Result<Vec<RetrievedDocument>> {
        let industries = if industries.is_empty() {
            self.available_industries().await
        } else {
            industries.to_vec()
        };
        if industries.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embed(query).await?;
        let per_namespace = per_part(opts.top_k, industries.len());

        let mut results = Vec::new();
        for industry in &industries {
            let namespace = resolve_namespace(industry);
            results.extend(
                self.query_namespace(&namespace, &vector, per_namespace, None, industry)
                    .await,
            );
        }

        Ok(merge_ranked(results, opts.min_score, opts.top_k))
    }

    /// Documents similar to `doc_id`, excluding it.
    pub async fn related_documents(
        &self,
        doc_id: &str,
        industry: &str,
        opts: &RetrievalOptions,
    ) -> Result<Vec<RetrievedDocument>> {
        let namespace = resolve_namespace(industry);
        let records = self
            .index
            .fetch(&namespace, &[doc_id.to_string()])
            .await
            .context("failed to fetch source document")?;

        let text = records
            .get(doc_id)
            .and_then(|r| r.metadata.get("text"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AdvisorError::NotFound(format!("document {} not found or has no content", doc_id))
            })?
            .to_string();

        let widened = RetrievalOptions {
            top_k: opts.top_k + 1,
            ..opts.clone()
        };
        let mut results = self.get_relevant_docs(industry, &text, &widened).await?;
        results.retain(|d| d.id != doc_id);
        results.truncate(opts.top_k);
        Ok(results)
    }

    /// Search with the original query plus up to three model-generated
    /// expansions, merging the results.
    pub async fn expanded_search(
        &self,
        query: &str,
        industry: &str,
        opts: &RetrievalOptions,
    ) -> Result<Vec<RetrievedDocument>> {
        let queries = self.expanded_queries(query, industry).await;
        let per_query = RetrievalOptions {
            top_k: per_part(opts.top_k, queries.len()),
            ..opts.clone()
        };

        let mut results = Vec::new();
        for q in &queries {
            match self.get_relevant_docs(industry, q, &per_query).await {
                Ok(docs) => results.extend(docs),
                Err(e) => {
                    warn!(error = %e, "expanded search failed, falling back to plain retrieval");
                    return self.get_relevant_docs(industry, query, opts).await;
                }
            }
        }

        Ok(merge_ranked(results, opts.min_score, opts.top_k))
    }

    /// The original query first, then any expansions.
    async fn expanded_queries(&self, query: &str, industry: &str) -> Vec<String> {
        let messages = [
            ConversationTurn::system(expansion_system_prompt(industry)),
            ConversationTurn::user(expansion_user_prompt(query)),
        ];
        let mut queries = vec![query.to_string()];
        match self.chat.complete(&messages, &self.expansion).await {
            Ok(reply) => {
                let expansions = parse_expansions(&reply);
                debug!(count = expansions.len(), "generated expanded queries");
                queries.extend(expansions);
            }
            Err(e) => warn!(error = %e, "could not generate expanded queries, using original"),
        }
        queries
    }

    /// Namespaces present in the index; empty on error.
    pub async fn available_industries(&self) -> Vec<String> {
        match self.index.describe_stats().await {
            Ok(stats) => stats.namespaces.into_keys().collect(),
            Err(e) => {
                warn!(error = %e, "could not list namespaces");
                Vec::new()
            }
        }
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.index.describe_stats().await
    }
}

/// Shape a raw match. Missing metadata falls back to the queried industry.
fn to_document(m: VectorMatch, fallback_industry: &str) -> RetrievedDocument {
    let str_field = |key: &str| {
        m.metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let num_field = |key: &str| {
        m.metadata
            .get(key)
            .and_then(Value::as_u64)
            .map(|n| n as u32)
    };

    RetrievedDocument {
        content: str_field("text").unwrap_or_default(),
        score: m.score,
        metadata: DocMetadata {
            industry: str_field("industry").unwrap_or_else(|| fallback_industry.to_string()),
            source_url: str_field("source_url"),
            doc_id: str_field("doc_id"),
            title: str_field("title"),
            token_count: num_field("token_count"),
            chunk_index: num_field("chunk_index"),
        },
        id: m.id,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Deterministic embedder and chat stub shared by retrieval tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use crate::embedding::EmbeddingProvider;
    use crate::llm::{ChatProvider, CompletionOptions, FragmentStream};
    use crate::vector::{Metadata, VectorRecord};
    use advisory_core::models::ConversationTurn;

    /// Maps a text to a 3-d vector by keyword, so similarity is predictable.
    pub fn keyword_vector(text: &str) -> Vec<f32> {
        let t = text.to_lowercase();
        vec![
            if t.contains("crop") { 1.0 } else { 0.05 },
            if t.contains("solar") { 1.0 } else { 0.05 },
            if t.contains("patient") { 1.0 } else { 0.05 },
        ]
    }

    #[derive(Default)]
    pub struct KeywordEmbedder {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("embedding service down");
            }
            Ok(texts.iter().map(|t| keyword_vector(t)).collect())
        }
    }

    pub struct CannedChat(pub Option<String>);

    #[async_trait]
    impl ChatProvider for CannedChat {
        async fn complete(&self, _: &[ConversationTurn], _: &CompletionOptions) -> Result<String> {
            match &self.0 {
                Some(reply) => Ok(reply.clone()),
                None => bail!("model unavailable"),
            }
        }
        async fn stream(&self, _: &[ConversationTurn], _: &CompletionOptions) -> Result<FragmentStream> {
            bail!("not used")
        }
    }

    pub fn chunk_record(id: &str, text: &str, industry: &str) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("text".into(), text.into());
        metadata.insert("industry".into(), industry.into());
        metadata.insert("doc_id".into(), id.into());
        VectorRecord {
            id: id.into(),
            values: keyword_vector(text),
            metadata,
        }
    }
}
