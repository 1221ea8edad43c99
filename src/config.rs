use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use advisory_core::ratelimit::{RateLimitTier, TierSet};

use crate::error::AdvisorError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Shared secret that authenticates `x-api-key` callers. Usually left
    /// unset here and supplied through `api_secret_env`.
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
}

impl ServerConfig {
    /// The configured secret, else the one in `api_secret_env`. `None`
    /// means no caller can authenticate.
    pub fn api_secret(&self) -> Option<String> {
        self.api_secret
            .clone()
            .or_else(|| std::env::var(&self.api_secret_env).ok())
            .filter(|s| !s.trim().is_empty())
    }
}

fn default_api_secret_env() -> String {
    "ADVISOR_API_SECRET".to_string()
}

// ============ LLM ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    /// Default model for non-streamed completions.
    #[serde(default = "default_completion_model")]
    pub completion_model: String,
    /// Model used to stream chat turns.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    #[serde(default = "default_chat_model")]
    pub rationale_model: String,
    #[serde(default = "default_chat_model")]
    pub expansion_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            base_url: default_openai_base_url(),
            completion_model: default_completion_model(),
            chat_model: default_chat_model(),
            summary_model: default_summary_model(),
            rationale_model: default_chat_model(),
            expansion_model: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_concurrency: default_max_concurrency(),
            stream_timeout_secs: default_stream_timeout_secs(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_completion_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_summary_model() -> String {
    "gpt-4.1-nano".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_max_concurrency() -> usize {
    60
}
fn default_stream_timeout_secs() -> u64 {
    30
}
fn default_llm_timeout_secs() -> u64 {
    60
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            base_url: default_openai_base_url(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    50
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

// ============ Vector index ============

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `memory` or `pinecone`.
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    /// Index host, e.g. `https://smec-ai-knowledge-base-abc123.svc.us-east1-gcp.pinecone.io`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            host: None,
            index_name: default_index_name(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_vector_provider() -> String {
    "memory".to_string()
}
fn default_index_name() -> String {
    "smec-ai-knowledge-base".to_string()
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
    #[serde(default = "default_embedding_ttl_secs")]
    pub embedding_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Insert knowledge-base excerpts into chat prompts when the turn
    /// names an industry.
    #[serde(default = "default_true")]
    pub ground_chat: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            timeout_ms: default_timeout_ms(),
            result_ttl_secs: default_result_ttl_secs(),
            embedding_ttl_secs: default_embedding_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            ground_chat: default_true(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_min_score() -> f32 {
    0.3
}
fn default_timeout_ms() -> u64 {
    2000
}
fn default_result_ttl_secs() -> u64 {
    300
}
fn default_embedding_ttl_secs() -> u64 {
    3600
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

// ============ Conversation ============

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Turns kept verbatim when a history is compressed.
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            keep_recent: default_keep_recent(),
        }
    }
}

fn default_token_budget() -> usize {
    advisory_core::compress::DEFAULT_TOKEN_BUDGET
}
fn default_keep_recent() -> usize {
    advisory_core::compress::KEEP_RECENT
}

// ============ Rate limiting ============

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// `memory` or `sqlite`.
    #[serde(default = "default_rate_limit_backend")]
    pub backend: String,
    #[serde(default = "default_unauthenticated")]
    pub unauthenticated: TierConfig,
    #[serde(default = "default_authenticated")]
    pub authenticated: TierConfig,
    #[serde(default = "default_conversation")]
    pub conversation: TierConfig,
    /// How often expired windows and security events are swept.
    #[serde(default = "default_rate_limit_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: default_rate_limit_backend(),
            unauthenticated: default_unauthenticated(),
            authenticated: default_authenticated(),
            conversation: default_conversation(),
            sweep_interval_secs: default_rate_limit_sweep_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn tiers(&self) -> TierSet {
        TierSet {
            unauthenticated: self.unauthenticated.into(),
            authenticated: self.authenticated.into(),
            conversation: self.conversation.into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TierConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl From<TierConfig> for RateLimitTier {
    fn from(t: TierConfig) -> Self {
        RateLimitTier::new(t.max_requests, t.window_secs)
    }
}

fn default_rate_limit_backend() -> String {
    "memory".to_string()
}
fn default_rate_limit_sweep_secs() -> u64 {
    300
}
fn default_unauthenticated() -> TierConfig {
    TierConfig {
        max_requests: 5,
        window_secs: 60,
    }
}
fn default_authenticated() -> TierConfig {
    TierConfig {
        max_requests: 60,
        window_secs: 60,
    }
}
fn default_conversation() -> TierConfig {
    TierConfig {
        max_requests: 20,
        window_secs: 60,
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config).map_err(|e| AdvisorError::Config(format!("{:#}", e)))?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // LLM
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.llm.max_concurrency == 0 {
        bail!("llm.max_concurrency must be >= 1");
    }
    if config.llm.stream_timeout_secs == 0 {
        bail!("llm.stream_timeout_secs must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }

    // Vector index
    match config.vector.provider.as_str() {
        "memory" => {}
        "pinecone" => {
            if config.vector.host.as_deref().unwrap_or("").is_empty() {
                bail!("vector.host must be set when provider is 'pinecone'");
            }
        }
        other => bail!(
            "Unknown vector provider: '{}'. Must be memory or pinecone.",
            other
        ),
    }

    // Retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_score) {
        bail!("retrieval.min_score must be in [0.0, 1.0]");
    }
    if config.retrieval.timeout_ms == 0 {
        bail!("retrieval.timeout_ms must be >= 1");
    }

    if config.conversation.token_budget == 0 {
        bail!("conversation.token_budget must be > 0");
    }
    if config.conversation.keep_recent == 0 {
        bail!("conversation.keep_recent must be >= 1");
    }

    // Rate limiting
    match config.rate_limit.backend.as_str() {
        "memory" | "sqlite" => {}
        other => bail!(
            "Unknown rate_limit backend: '{}'. Must be memory or sqlite.",
            other
        ),
    }
    for (name, tier) in [
        ("unauthenticated", config.rate_limit.unauthenticated),
        ("authenticated", config.rate_limit.authenticated),
        ("conversation", config.rate_limit.conversation),
    ] {
        if tier.max_requests == 0 || tier.window_secs == 0 {
            bail!(
                "rate_limit.{} must have max_requests >= 1 and window_secs >= 1",
                name
            );
        }
    }
    if config.rate_limit.sweep_interval_secs == 0 {
        bail!("rate_limit.sweep_interval_secs must be >= 1");
    }

    Ok(())
}
