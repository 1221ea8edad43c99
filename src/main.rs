//! # Advisor CLI (`advisor`)
//!
//! The `advisor` binary runs the advisory chat service and exposes its
//! pipeline from the command line: database setup, chat turns,
//! assessments, knowledge-base search and ingestion, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! advisor --config ./config/advisor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `advisor init` | Create the SQLite database and tables |
//! | `advisor serve` | Start the HTTP API server |
//! | `advisor chat "<message>"` | Run one chat turn, streaming the answer |
//! | `advisor assess --industry ...` | Rank AI opportunities for a business profile |
//! | `advisor recommend --industry ...` | Recommend services for a business profile |
//! | `advisor search <industry> "<query>"` | Search the knowledge base |
//! | `advisor ingest <dir> --industry <label>` | Chunk, embed, and upsert documents |
//! | `advisor stats` | Show database and index statistics |
//! | `advisor health` | Probe retrieval latency and quality |
//!
//! ## Examples
//!
//! ```bash
//! advisor init
//! advisor ingest ./kb/agriculture --industry agriculture
//! advisor chat "We run a 40-hectare wheat farm" --industry agriculture
//! advisor assess --industry agriculture --size small --digital-maturity developing \
//!     --budget medium --technical-capacity limited
//! advisor serve
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use advisory_chat::assessment::Assessor;
use advisory_chat::chat::ChatService;
use advisory_chat::config::{self, Config};
use advisory_chat::conversation_store::SqliteConversationLog;
use advisory_chat::orchestrator::Orchestrator;
use advisory_chat::retrieval::{CachedRetrieval, SearchProfile};
use advisory_chat::server::{self, Services};
use advisory_chat::validation::validate_chat_message;
use advisory_chat::{db, ingest, migrate, stats};
use advisory_core::models::BusinessProfile;
use advisory_core::store::memory::InMemoryStateStore;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use tracing_subscriber::EnvFilter;

/// Advisor: an LLM-backed advisory chat service for small and medium
/// enterprises.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/advisor.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "advisor",
    about = "Advisor: staged AI advisory chat with knowledge-base retrieval and opportunity assessment",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/advisor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and tables. Safe to run repeatedly.
    Init,

    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// Run one chat turn and stream the answer to stdout.
    Chat {
        /// The message to send.
        message: String,

        /// Continue an existing conversation. A new one is started when omitted.
        #[arg(long)]
        guid: Option<String>,

        /// Ground the answer with knowledge-base excerpts for this industry.
        #[arg(long)]
        industry: Option<String>,
    },

    /// Rank AI opportunities for a business profile.
    Assess {
        #[command(flatten)]
        profile: ProfileArgs,

        /// Skip model-written rationales.
        #[arg(long)]
        no_rationale: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Recommend services for a business profile.
    Recommend {
        #[command(flatten)]
        profile: ProfileArgs,
    },

    /// Search the knowledge base.
    Search {
        /// Industry label (e.g. `agriculture`, `healthcare`, `clean-energy`).
        industry: String,

        query: String,

        /// Option preset: fast, default, or comprehensive.
        #[arg(long, default_value = "default")]
        profile: String,

        /// Override the number of results.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Chunk, embed, and upsert a directory of markdown/text documents.
    Ingest {
        dir: PathBuf,

        /// Industry label the documents belong to.
        #[arg(long)]
        industry: String,

        /// Show document and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show database and vector index statistics.
    Stats,

    /// Probe retrieval latency and result quality.
    Health,
}

/// Business profile fields, in their kebab-case wire values.
#[derive(Args)]
struct ProfileArgs {
    /// agriculture, clean-energy, medical, or enabling-capabilities.
    #[arg(long)]
    industry: String,
    /// small or medium.
    #[arg(long)]
    size: String,
    /// basic, developing, or advanced.
    #[arg(long)]
    digital_maturity: String,
    /// low, medium, or high.
    #[arg(long)]
    budget: String,
    /// none, limited, or strong.
    #[arg(long)]
    technical_capacity: String,
    /// immediate, short-term, or long-term.
    #[arg(long)]
    timeline: Option<String>,
    /// Repeatable.
    #[arg(long = "pain-point")]
    pain_points: Vec<String>,
    /// Repeatable.
    #[arg(long = "goal")]
    goals: Vec<String>,
}

impl ProfileArgs {
    fn to_profile(&self) -> Result<BusinessProfile> {
        let value = serde_json::json!({
            "industry": self.industry,
            "size": self.size,
            "digitalMaturity": self.digital_maturity,
            "budget": self.budget,
            "technicalCapacity": self.technical_capacity,
            "timeline": self.timeline,
            "currentPainPoints": self.pain_points,
            "businessGoals": self.goals,
        });
        serde_json::from_value(value).context("Invalid business profile")
    }
}

fn build_retrieval(cfg: &Config, services: &Services) -> Arc<CachedRetrieval> {
    Arc::new(CachedRetrieval::new(
        services.embedder.clone(),
        services.index.clone(),
        services.chat.clone(),
        &cfg.llm.expansion_model,
        &cfg.retrieval,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Chat {
            message,
            guid,
            industry,
        } => {
            let message = validate_chat_message(&serde_json::json!({
                "content": message,
                "guid": guid,
                "industry": industry,
            }))?;

            let services = Services::from_config(&cfg)?;
            let pool = db::connect(&cfg).await?;
            migrate::create_tables(&pool).await?;

            let orchestrator = Arc::new(Orchestrator::new(
                &cfg,
                services.chat.clone(),
                Arc::new(InMemoryStateStore::new()),
            ));
            let chat = ChatService::new(
                &cfg,
                orchestrator,
                build_retrieval(&cfg, &services),
                Arc::new(SqliteConversationLog::new(pool.clone())),
            );

            let turn = chat.prepare(&message).await?;
            let mut stdout = std::io::stdout();
            let generation = chat
                .generate(&turn, |fragment| {
                    let _ = write!(stdout, "{}", fragment);
                    let _ = stdout.flush();
                })
                .await;
            println!();
            println!();
            println!("conversation: {}", turn.guid);
            println!("stage: {}", turn.stage);
            for question in turn.follow_up_questions.iter().take(3) {
                println!("  ? {}", question);
            }
            pool.close().await;
            if let Some(err) = generation.error() {
                return Err(err.into());
            }
        }
        Commands::Assess {
            profile,
            no_rationale,
            json,
        } => {
            let profile = profile.to_profile()?;
            let services = Services::from_config(&cfg)?;
            let assessor = Assessor::new(services.chat, &cfg.llm.rationale_model);
            let report = assessor.assess(&profile, !no_rationale).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Top opportunities for {} {}:", profile.size.as_str(), profile.industry.as_str());
                for (i, assessed) in report.opportunities.iter().enumerate() {
                    println!(
                        "{}. {} (composite {:.2})",
                        i + 1,
                        assessed.opportunity.title,
                        assessed.score.composite
                    );
                    if let Some(rationale) = &assessed.rationale {
                        println!("   {}", rationale);
                    }
                }
                println!();
                println!("Recommended services:");
                for rec in &report.recommendations {
                    println!(
                        "  [{:?}] {} ({}) → {}",
                        rec.priority, rec.service.name, rec.match_score, rec.cta_url
                    );
                }
            }
        }
        Commands::Recommend { profile } => {
            let profile = profile.to_profile()?;
            let services = Services::from_config(&cfg)?;
            let assessor = Assessor::new(services.chat, &cfg.llm.rationale_model);
            let recommendations = assessor.recommend(&profile);
            println!("{}", serde_json::to_string_pretty(&recommendations)?);
        }
        Commands::Search {
            industry,
            query,
            profile,
            limit,
        } => {
            let profile: SearchProfile = profile.parse()?;
            let services = Services::from_config(&cfg)?;
            let retrieval = build_retrieval(&cfg, &services);
            let mut options = retrieval.options_for(profile);
            if let Some(limit) = limit {
                options.top_k = limit.max(1);
            }

            let results = retrieval.get_relevant_docs(&industry, &query, &options).await;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, doc) in results.iter().enumerate() {
                let label = doc
                    .metadata
                    .title
                    .as_deref()
                    .or(doc.metadata.doc_id.as_deref())
                    .unwrap_or(&doc.id);
                println!("{}. [{:.2}] {}", i + 1, doc.score, label);
                let preview: String = doc.content.chars().take(200).collect();
                println!("   {}", preview.replace('\n', " "));
            }
        }
        Commands::Ingest {
            dir,
            industry,
            dry_run,
        } => {
            ingest::run_ingest(&cfg, &dir, &industry, dry_run).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Health => {
            let services = Services::from_config(&cfg)?;
            let retrieval = build_retrieval(&cfg, &services);
            let report = retrieval.health_check().await;
            println!("retrieval: {}", report.status);
            println!("  latency: {} ms", report.latency_ms);
            if let Some(error) = report.error {
                println!("  note: {}", error);
            }
        }
    }

    Ok(())
}
