//! Token-budget estimation and history compression.
//!
//! Long conversations are bounded before they reach the model:
//!
//! ```text
//!   [system] [t1] [t2] ... [tN-4] [tN-3] [tN-2] [tN-1] [tN]
//!      │      └──── middle ────┘   └──────── tail ───────┘
//!      │              │                       │
//!      ▼              ▼                       ▼
//!   [system] [system: "Previous conversation summary: …"] [tail × 4]
//! ```
//!
//! The middle section is summarised by one auxiliary model call through
//! the [`Summarizer`] trait. Compression is best effort: when the
//! summariser fails, the history is truncated to its last six turns
//! instead of failing the request.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ConversationTurn, Role};

/// Approximate characters-per-token ratio used for budget checks.
const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count above which the orchestrator compresses.
pub const DEFAULT_TOKEN_BUDGET: usize = 8000;

/// Number of trailing turns kept verbatim.
pub const KEEP_RECENT: usize = 4;

/// Number of trailing turns kept when summarisation fails.
pub const FALLBACK_TAIL: usize = 6;

/// Instruction sent as the system message of the summary call.
pub const SUMMARY_INSTRUCTION: &str =
    "Summarize the following conversation history concisely, preserving key context and decisions:";

/// Prefix of the synthetic system turn carrying the summary.
pub const SUMMARY_PREFIX: &str = "Previous conversation summary: ";

/// Used when the summariser returns an empty body.
pub const SUMMARY_UNAVAILABLE: &str = "Previous conversation context unavailable.";

/// Produces a short summary of a conversation transcript.
///
/// The transcript is one `role: content` line per turn. Implementations
/// make a single model call and should share the global model
/// concurrency cap.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String>;
}

/// Cheap token estimate: characters of all contents joined by a space,
/// divided by four, rounded up. Not suitable for billing.
pub fn estimate_tokens(history: &[ConversationTurn]) -> usize {
    if history.is_empty() {
        return 0;
    }
    let chars: usize = history.iter().map(|t| t.content.chars().count()).sum();
    let separators = history.len() - 1;
    (chars + separators).div_ceil(CHARS_PER_TOKEN)
}

/// True when the estimated size of `history` exceeds `budget`.
pub fn exceeds_budget(history: &[ConversationTurn], budget: usize) -> bool {
    estimate_tokens(history) > budget
}

/// Render turns as the transcript handed to a [`Summarizer`].
pub fn transcript(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Bound a history by summarising everything between the leading system
/// turn and the last [`KEEP_RECENT`] turns.
///
/// Histories of four turns or fewer are returned unchanged. The last four
/// turns of the output always equal the last four turns of the input,
/// except on summariser failure where the last [`FALLBACK_TAIL`] turns
/// are returned.
pub async fn compress(
    history: &[ConversationTurn],
    summarizer: &dyn Summarizer,
) -> Vec<ConversationTurn> {
    compress_keeping(history, summarizer, KEEP_RECENT).await
}

/// [`compress`] with a configurable number of verbatim trailing turns.
pub async fn compress_keeping(
    history: &[ConversationTurn],
    summarizer: &dyn Summarizer,
    keep_recent: usize,
) -> Vec<ConversationTurn> {
    if history.len() <= keep_recent {
        return history.to_vec();
    }

    let leading_system = history.first().filter(|t| t.role == Role::System);
    let middle_start = if leading_system.is_some() { 1 } else { 0 };
    let tail_start = history.len() - keep_recent;

    if middle_start >= tail_start {
        return history.to_vec();
    }

    let middle = &history[middle_start..tail_start];
    let tail = &history[tail_start..];

    match summarizer.summarize(&transcript(middle)).await {
        Ok(summary) => {
            let summary = if summary.trim().is_empty() {
                SUMMARY_UNAVAILABLE.to_string()
            } else {
                summary
            };
            let mut out = Vec::with_capacity(keep_recent + 2);
            if let Some(system) = leading_system {
                out.push(system.clone());
            }
            out.push(ConversationTurn::system(format!(
                "{}{}",
                SUMMARY_PREFIX, summary
            )));
            out.extend_from_slice(tail);
            out
        }
        Err(_) => {
            let start = history.len().saturating_sub(FALLBACK_TAIL);
            history[start..].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedSummary {
        text: &'static str,
        calls: AtomicUsize,
        seen: Mutex<Option<String>>,
    }

    impl FixedSummary {
        fn new(text: &'static str) -> Self {
            Self {
                text,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Summarizer for FixedSummary {
        async fn summarize(&self, transcript: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen.lock().unwrap() = Some(transcript.to_string());
            Ok(self.text.to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl Summarizer for Failing {
        async fn summarize(&self, _transcript: &str) -> Result<String> {
            anyhow::bail!("upstream unavailable")
        }
    }

    fn long_history(turns: usize) -> Vec<ConversationTurn> {
        let mut history = vec![ConversationTurn::system("persona")];
        for i in 0..turns {
            if i % 2 == 0 {
                history.push(ConversationTurn::user(format!("user {}", i)));
            } else {
                history.push(ConversationTurn::assistant(format!("assistant {}", i)));
            }
        }
        history
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(&[]), 0);
        // "abcd" -> 1 token
        assert_eq!(estimate_tokens(&[ConversationTurn::user("abcd")]), 1);
        // "abcd abcd" = 9 chars -> 3 tokens
        let h = vec![ConversationTurn::user("abcd"), ConversationTurn::assistant("abcd")];
        assert_eq!(estimate_tokens(&h), 3);
    }

    #[test]
    fn test_exceeds_budget() {
        let h = vec![ConversationTurn::user("x".repeat(32_004))];
        assert!(exceeds_budget(&h, DEFAULT_TOKEN_BUDGET));
        let h = vec![ConversationTurn::user("x".repeat(32_000))];
        assert!(!exceeds_budget(&h, DEFAULT_TOKEN_BUDGET));
    }

    #[tokio::test]
    async fn test_short_history_unchanged() {
        let summarizer = FixedSummary::new("never");
        for n in 0..=KEEP_RECENT {
            let history: Vec<_> = (0..n)
                .map(|i| ConversationTurn::user(format!("m{}", i)))
                .collect();
            let out = compress(&history, &summarizer).await;
            assert_eq!(out, history);
        }
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compress_keeps_system_summary_and_tail() {
        let history = long_history(10);
        let summarizer = FixedSummary::new("they farm wheat");
        let out = compress(&history, &summarizer).await;

        assert_eq!(out.len(), 2 + KEEP_RECENT);
        assert_eq!(out[0], history[0]);
        assert_eq!(out[1].role, Role::System);
        assert_eq!(out[1].content, "Previous conversation summary: they farm wheat");
        assert_eq!(&out[2..], &history[history.len() - KEEP_RECENT..]);

        let seen = summarizer.seen.lock().unwrap().clone().unwrap();
        assert!(seen.starts_with("user: user 0"));
        assert!(!seen.contains("persona"));
        assert_eq!(seen.lines().count(), history.len() - 1 - KEEP_RECENT);
    }

    #[tokio::test]
    async fn test_compress_without_leading_system_summarises_from_start() {
        let history: Vec<_> = (0..7)
            .map(|i| ConversationTurn::user(format!("m{}", i)))
            .collect();
        let summarizer = FixedSummary::new("s");
        let out = compress(&history, &summarizer).await;
        assert_eq!(out.len(), 1 + KEEP_RECENT);
        assert_eq!(out[0].role, Role::System);
        assert!(summarizer.seen.lock().unwrap().as_ref().unwrap().contains("m0"));
        assert_eq!(&out[1..], &history[3..]);
    }

    #[tokio::test]
    async fn test_compress_keeping_custom_tail() {
        let history = long_history(10);
        let out = compress_keeping(&history, &FixedSummary::new("s"), 2).await;
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], history[0]);
        assert_eq!(&out[2..], &history[history.len() - 2..]);
    }

    #[tokio::test]
    async fn test_empty_summary_uses_placeholder() {
        let history = long_history(8);
        let out = compress(&history, &FixedSummary::new("  ")).await;
        assert_eq!(
            out[1].content,
            format!("{}{}", SUMMARY_PREFIX, SUMMARY_UNAVAILABLE)
        );
    }

    #[tokio::test]
    async fn test_summariser_failure_truncates_to_last_six() {
        let history = long_history(12);
        let out = compress(&history, &Failing).await;
        assert_eq!(out.len(), FALLBACK_TAIL);
        assert_eq!(&out[..], &history[history.len() - FALLBACK_TAIL..]);
    }

    #[tokio::test]
    async fn test_five_turns_with_system_has_no_middle() {
        let history = long_history(4);
        assert_eq!(history.len(), 5);
        let summarizer = FixedSummary::new("unused");
        let out = compress(&history, &summarizer).await;
        assert_eq!(out, history);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }
}
