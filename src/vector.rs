//! Vector index abstraction.
//!
//! The knowledge base lives in a vector index partitioned into namespaces
//! (one per industry). [`VectorIndex`] is the narrow surface the rest of
//! the crate needs:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | `upsert` | Write chunk vectors with metadata (ingestion) |
//! | `query` | Nearest neighbours in one namespace |
//! | `fetch` | Records by id (related-document search) |
//! | `describe_stats` | Namespaces and vector counts |
//!
//! Two implementations: [`PineconeIndex`] speaks the Pinecone data-plane
//! HTTP API, [`InMemoryVectorIndex`] scores by cosine similarity in
//! process and is used for local runs and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::VectorConfig;
use crate::embedding::cosine_similarity;

/// Metadata attached to each record. Chunk text is stored under `text`.
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub dimension: usize,
    pub total_vector_count: u64,
    pub namespaces: BTreeMap<String, u64>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records; returns the number written.
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<usize>;

    /// Up to `top_k` matches, best first. `filter` is an equality filter
    /// over metadata fields.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<VectorMatch>>;

    async fn fetch(&self, namespace: &str, ids: &[String]) -> Result<HashMap<String, VectorRecord>>;

    async fn describe_stats(&self) -> Result<IndexStats>;
}

// ============ In-memory index ============

/// Process-local index scored by cosine similarity.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    namespaces: RwLock<HashMap<String, BTreeMap<String, VectorRecord>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `true` when every filter field equals the record's field. Accepts
/// both `{"field": v}` and `{"field": {"$eq": v}}`.
fn matches_filter(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter.iter().all(|(field, expected)| {
        let expected = expected
            .as_object()
            .and_then(|o| o.get("$eq"))
            .unwrap_or(expected);
        metadata.get(field) == Some(expected)
    })
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<usize> {
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        let ns = namespaces.entry(namespace.to_string()).or_default();
        let count = records.len();
        for record in records {
            ns.insert(record.id.clone(), record);
        }
        Ok(count)
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<VectorMatch>> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<VectorMatch> = ns
            .values()
            .filter(|r| matches_filter(&r.metadata, filter))
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values).max(0.0),
                metadata: r.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn fetch(&self, namespace: &str, ids: &[String]) -> Result<HashMap<String, VectorRecord>> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| ns.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        let mut stats = IndexStats::default();
        for (name, records) in namespaces.iter() {
            if stats.dimension == 0 {
                stats.dimension = records.values().next().map_or(0, |r| r.values.len());
            }
            stats.total_vector_count += records.len() as u64;
            stats.namespaces.insert(name.clone(), records.len() as u64);
        }
        Ok(stats)
    }
}

// ============ Pinecone ============

/// Pinecone data-plane client. Requires `PINECONE_API_KEY`.
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, VectorRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    total_vector_count: u64,
    #[serde(default)]
    namespaces: BTreeMap<String, NamespaceSummary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceSummary {
    #[serde(default)]
    vector_count: u64,
}

impl PineconeIndex {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| anyhow!("vector.host required for pinecone provider"))?;
        let api_key = std::env::var("PINECONE_API_KEY")
            .map_err(|_| anyhow!("PINECONE_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let host = if host.starts_with("http") {
            host
        } else {
            format!("https://{}", host)
        };
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(&self, path: &str, body: Value) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("pinecone request {} failed", path))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Pinecone API error {}: {}", status, text);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<usize> {
        let count = records.len();
        let resp: Value = self
            .post(
                "/vectors/upsert",
                serde_json::json!({ "vectors": records, "namespace": namespace }),
            )
            .await?;
        Ok(resp
            .get("upsertedCount")
            .and_then(|c| c.as_u64())
            .map_or(count, |c| c as usize))
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<VectorMatch>> {
        let mut body = serde_json::json!({
            "namespace": namespace,
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = Value::Object(filter.clone());
        }
        let resp: QueryResponse = self.post("/query", body).await?;
        Ok(resp.matches)
    }

    async fn fetch(&self, namespace: &str, ids: &[String]) -> Result<HashMap<String, VectorRecord>> {
        let mut query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        query.push(("namespace", namespace));
        let response = self
            .client
            .get(format!("{}/vectors/fetch", self.host))
            .header("Api-Key", &self.api_key)
            .query(&query)
            .send()
            .await
            .context("pinecone fetch failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Pinecone API error {}: {}", status, text);
        }
        let resp: FetchResponse = response.json().await?;
        Ok(resp.vectors)
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        let resp: StatsResponse = self
            .post("/describe_index_stats", serde_json::json!({}))
            .await?;
        Ok(IndexStats {
            dimension: resp.dimension,
            total_vector_count: resp.total_vector_count,
            namespaces: resp
                .namespaces
                .into_iter()
                .map(|(k, v)| (k, v.vector_count))
                .collect(),
        })
    }
}

/// Create the index named by `vector.provider`.
pub fn create_index(config: &VectorConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorIndex::new())),
        "pinecone" => Ok(Arc::new(PineconeIndex::new(config)?)),
        other => bail!("Unknown vector provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, values: Vec<f32>, industry: &str) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("text".into(), Value::String(format!("text {}", id)));
        metadata.insert("industry".into(), Value::String(industry.into()));
        VectorRecord {
            id: id.into(),
            values,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_query_ranks_by_cosine() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(
                "agriculture",
                vec![
                    record("near", vec![1.0, 0.1], "agriculture"),
                    record("far", vec![0.0, 1.0], "agriculture"),
                    record("mid", vec![1.0, 1.0], "agriculture"),
                ],
            )
            .await
            .unwrap();

        let matches = index.query("agriculture", &[1.0, 0.0], 2, None).await.unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(matches[0].score > matches[1].score);
    }

    #[tokio::test]
    async fn test_query_unknown_namespace_is_empty() {
        let index = InMemoryVectorIndex::new();
        assert!(index.query("mining", &[1.0], 3, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filter_and_fetch() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(
                "general",
                vec![
                    record("a", vec![1.0, 0.0], "agriculture"),
                    record("b", vec![1.0, 0.0], "medical"),
                ],
            )
            .await
            .unwrap();

        let mut filter = Metadata::new();
        filter.insert("industry".into(), serde_json::json!({"$eq": "medical"}));
        let matches = index
            .query("general", &[1.0, 0.0], 5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "b");

        let fetched = index
            .fetch("general", &["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert!(fetched.contains_key("a"));
    }

    #[tokio::test]
    async fn test_describe_stats() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert("agriculture", vec![record("a", vec![1.0, 0.0, 0.0], "agriculture")])
            .await
            .unwrap();
        index
            .upsert(
                "medical",
                vec![
                    record("b", vec![0.0, 1.0, 0.0], "medical"),
                    record("c", vec![0.0, 0.0, 1.0], "medical"),
                ],
            )
            .await
            .unwrap();
        let stats = index.describe_stats().await.unwrap();
        assert_eq!(stats.dimension, 3);
        assert_eq!(stats.total_vector_count, 3);
        assert_eq!(stats.namespaces.get("medical"), Some(&2));
    }
}
