//! Service statistics.
//!
//! Summarises what the service holds: conversation and message counts,
//! live rate-limit entries, and the vector index's per-namespace vector
//! counts. Used by `advisor stats`.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::vector::{self, IndexStats};

/// Counts read from the service database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub conversations: i64,
    pub messages: i64,
    pub rate_limit_entries: i64,
    pub last_activity: Option<i64>,
}

pub async fn database_stats(pool: &SqlitePool) -> Result<DatabaseStats> {
    let conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
        .fetch_one(pool)
        .await?;
    let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(pool)
        .await?;
    let rate_limit_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rate_limit_entries")
        .fetch_one(pool)
        .await?;
    let last_activity: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM conversations")
        .fetch_one(pool)
        .await?;

    Ok(DatabaseStats {
        conversations,
        messages,
        rate_limit_entries,
        last_activity,
    })
}

/// Run the stats command: query the database and index, print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::create_tables(&pool).await?;
    let stats = database_stats(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Advisor — Service Stats");
    println!("=======================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    println!();
    println!("  Conversations:  {}", stats.conversations);
    println!("  Messages:       {}", stats.messages);
    println!("  Rate windows:   {} entries", stats.rate_limit_entries);
    println!(
        "  Last activity:  {}",
        stats
            .last_activity
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    println!();
    match vector::create_index(&config.vector) {
        Ok(index) => match index.describe_stats().await {
            Ok(index_stats) => print_index_stats(&config.vector.provider, &index_stats),
            Err(e) => println!("  Vector index:   unavailable ({})", e),
        },
        Err(e) => println!("  Vector index:   not configured ({})", e),
    }
    println!();
    Ok(())
}

fn print_index_stats(provider: &str, stats: &IndexStats) {
    println!(
        "  Vector index:   {} ({} vectors, {} dims)",
        provider, stats.total_vector_count, stats.dimension
    );
    if stats.namespaces.is_empty() {
        return;
    }
    println!();
    println!("  {:<28} {:>10}", "NAMESPACE", "VECTORS");
    println!("  {}", "-".repeat(40));
    for (namespace, count) in &stats.namespaces {
        println!("  {:<28} {:>10}", namespace, count);
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
