//! Conversation orchestration.
//!
//! [`Orchestrator::process_conversation`] turns the stored history of a
//! conversation into the message list sent to the model:
//!
//! 1. Load (or create) the conversation's [`ConversationState`].
//! 2. Derive the stage from the number of user turns.
//! 3. Estimate tokens and store the updated state.
//! 4. Compress the history when it exceeds the token budget.
//! 5. Put the stage system prompt at position 0.
//! 6. Attach the stage's follow-up questions.
//!
//! Every model call goes through the shared concurrency-capped provider.

use std::sync::Arc;

use advisory_core::compress::{
    compress_keeping, estimate_tokens, exceeds_budget, Summarizer, SUMMARY_INSTRUCTION, SUMMARY_PREFIX,
};
use advisory_core::models::{ConversationState, ConversationTurn, Role, Stage};
use advisory_core::stage::{build_system_prompt, determine_stage, follow_up_questions};
use advisory_core::store::StateStore;
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::Config;
use crate::llm::{ChatProvider, CompletionOptions, FragmentStream};

/// The model-ready view of a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedConversation {
    /// Always starts with the stage system prompt.
    pub prompt_messages: Vec<ConversationTurn>,
    pub stage: Stage,
    pub follow_up_questions: Vec<String>,
}

/// Summarises conversation middles with a cheaper model.
pub struct LlmSummarizer {
    chat: Arc<dyn ChatProvider>,
    options: CompletionOptions,
}

impl LlmSummarizer {
    pub fn new(chat: Arc<dyn ChatProvider>, model: &str) -> Self {
        Self {
            chat,
            options: CompletionOptions::new(model, 0.3, 200),
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        let messages = [
            ConversationTurn::system(SUMMARY_INSTRUCTION),
            ConversationTurn::user(transcript),
        ];
        self.chat.complete(&messages, &self.options).await
    }
}

pub struct Orchestrator {
    chat: Arc<dyn ChatProvider>,
    states: Arc<dyn StateStore>,
    summarizer: Arc<dyn Summarizer>,
    token_budget: usize,
    keep_recent: usize,
    completion: CompletionOptions,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        chat: Arc<dyn ChatProvider>,
        states: Arc<dyn StateStore>,
    ) -> Self {
        let summarizer = Arc::new(LlmSummarizer::new(chat.clone(), &config.llm.summary_model));
        Self {
            chat,
            states,
            summarizer,
            token_budget: config.conversation.token_budget,
            keep_recent: config.conversation.keep_recent,
            completion: CompletionOptions::completion(&config.llm),
        }
    }

    /// Replace the summariser (tests, alternative backends).
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub async fn process_conversation(
        &self,
        conversation_id: &str,
        history: &[ConversationTurn],
    ) -> Result<PreparedConversation> {
        let mut state = self
            .states
            .get(conversation_id)
            .await?
            .unwrap_or_default();

        let stage = determine_stage(history);
        let token_count = estimate_tokens(history);
        if state.stage != stage {
            info!(conversation_id, from = %state.stage, to = %stage, "conversation stage changed");
        }

        state = ConversationState {
            stage,
            token_count,
            message_history: history.to_vec(),
        };
        self.states.put(conversation_id, state).await?;

        let mut prompt_messages = if exceeds_budget(history, self.token_budget) {
            debug!(
                conversation_id,
                token_count,
                budget = self.token_budget,
                "compressing conversation history"
            );
            compress_keeping(history, self.summarizer.as_ref(), self.keep_recent).await
        } else {
            history.to_vec()
        };
        place_system_prompt(&mut prompt_messages, build_system_prompt(stage));

        Ok(PreparedConversation {
            prompt_messages,
            stage,
            follow_up_questions: follow_up_questions(stage)
                .iter()
                .map(|q| q.to_string())
                .collect(),
        })
    }

    /// Non-streamed completion. `None` uses the configured defaults.
    pub async fn create_chat_completion(
        &self,
        messages: &[ConversationTurn],
        options: Option<&CompletionOptions>,
    ) -> Result<String> {
        self.chat
            .complete(messages, options.unwrap_or(&self.completion))
            .await
    }

    pub async fn stream_chat_completion(
        &self,
        messages: &[ConversationTurn],
        options: Option<&CompletionOptions>,
    ) -> Result<FragmentStream> {
        self.chat
            .stream(messages, options.unwrap_or(&self.completion))
            .await
    }

    pub async fn conversation_state(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        self.states.get(conversation_id).await
    }

    pub async fn clear_state(&self, conversation_id: &str) -> Result<bool> {
        self.states.delete(conversation_id).await
    }

    pub async fn clear_all_states(&self) -> Result<()> {
        self.states.clear().await
    }
}

/// Overwrite a leading system turn with `prompt`, or insert it when the
/// history starts with a user turn, an assistant turn, or a compression
/// summary.
fn place_system_prompt(messages: &mut Vec<ConversationTurn>, prompt: String) {
    let replace = messages
        .first()
        .is_some_and(|t| t.role == Role::System && !t.content.starts_with(SUMMARY_PREFIX));
    if replace {
        messages[0] = ConversationTurn::system(prompt);
    } else {
        messages.insert(0, ConversationTurn::system(prompt));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use advisory_core::store::memory::InMemoryStateStore;
    use anyhow::bail;

    struct EchoChat;

    #[async_trait]
    impl ChatProvider for EchoChat {
        async fn complete(&self, messages: &[ConversationTurn], o: &CompletionOptions) -> Result<String> {
            Ok(format!("{}:{}", o.model, messages.len()))
        }
        async fn stream(&self, _: &[ConversationTurn], _: &CompletionOptions) -> Result<FragmentStream> {
            bail!("not used")
        }
    }

    struct StaticSummary;

    #[async_trait]
    impl Summarizer for StaticSummary {
        async fn summarize(&self, _: &str) -> Result<String> {
            Ok("they farm wheat".into())
        }
    }

    fn config(budget: usize, keep_recent: usize) -> Config {
        let toml = format!(
            "[db]\npath = \"/tmp/x.sqlite\"\n[server]\nbind = \"127.0.0.1:0\"\n[conversation]\ntoken_budget = {}\nkeep_recent = {}\n",
            budget, keep_recent
        );
        toml::from_str(&toml).unwrap()
    }

    fn orchestrator(budget: usize) -> Orchestrator {
        orchestrator_keeping(budget, 4)
    }

    fn orchestrator_keeping(budget: usize, keep_recent: usize) -> Orchestrator {
        Orchestrator::new(
            &config(budget, keep_recent),
            Arc::new(EchoChat),
            Arc::new(InMemoryStateStore::new()),
        )
        .with_summarizer(Arc::new(StaticSummary))
    }

    fn alternating(user_turns: usize) -> Vec<ConversationTurn> {
        let mut history = Vec::new();
        for i in 0..user_turns {
            history.push(ConversationTurn::user(format!("question {}", i)));
            history.push(ConversationTurn::assistant(format!("answer {}", i)));
        }
        history.pop();
        history
    }

    #[tokio::test]
    async fn test_first_turn_is_discovery_with_system_prompt() {
        let orch = orchestrator(8000);
        let prepared = orch
            .process_conversation("c1", &[ConversationTurn::user("Hi, I run a farm")])
            .await
            .unwrap();
        assert_eq!(prepared.stage, Stage::Discovery);
        assert_eq!(prepared.prompt_messages.len(), 2);
        assert_eq!(prepared.prompt_messages[0].role, Role::System);
        assert_eq!(prepared.prompt_messages[0].content, build_system_prompt(Stage::Discovery));
        assert_eq!(prepared.prompt_messages[1].content, "Hi, I run a farm");
        assert_eq!(prepared.follow_up_questions.len(), 5);
    }

    #[tokio::test]
    async fn test_existing_system_turn_is_overwritten() {
        let orch = orchestrator(8000);
        let mut history = vec![ConversationTurn::system("old prompt")];
        history.extend(alternating(3));
        let prepared = orch.process_conversation("c2", &history).await.unwrap();
        assert_eq!(prepared.stage, Stage::Exploration);
        assert_eq!(prepared.prompt_messages.len(), history.len());
        assert_eq!(
            prepared.prompt_messages[0].content,
            build_system_prompt(Stage::Exploration)
        );
    }

    #[tokio::test]
    async fn test_state_is_recorded_and_cleared() {
        let orch = orchestrator(8000);
        let history = alternating(6);
        orch.process_conversation("c3", &history).await.unwrap();

        let state = orch.conversation_state("c3").await.unwrap().unwrap();
        assert_eq!(state.stage, Stage::Solution);
        assert_eq!(state.message_history, history);
        assert_eq!(state.token_count, estimate_tokens(&history));

        assert!(orch.clear_state("c3").await.unwrap());
        assert!(orch.conversation_state("c3").await.unwrap().is_none());

        orch.process_conversation("c4", &history).await.unwrap();
        orch.clear_all_states().await.unwrap();
        assert!(orch.conversation_state("c4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_over_budget_history_is_compressed() {
        let orch = orchestrator(10);
        let history = alternating(8);
        let prepared = orch.process_conversation("c5", &history).await.unwrap();

        assert_eq!(prepared.stage, Stage::Implementation);
        // stage prompt, summary, last four turns
        assert_eq!(prepared.prompt_messages.len(), 6);
        assert_eq!(
            prepared.prompt_messages[0].content,
            build_system_prompt(Stage::Implementation)
        );
        assert_eq!(
            prepared.prompt_messages[1].content,
            format!("{}they farm wheat", SUMMARY_PREFIX)
        );
        assert_eq!(&prepared.prompt_messages[2..], &history[history.len() - 4..]);
    }

    #[tokio::test]
    async fn test_compression_honours_keep_recent() {
        let orch = orchestrator_keeping(10, 2);
        let history = alternating(8);
        let prepared = orch.process_conversation("c6", &history).await.unwrap();

        assert_eq!(prepared.prompt_messages.len(), 4);
        assert_eq!(
            prepared.prompt_messages[1].content,
            format!("{}they farm wheat", SUMMARY_PREFIX)
        );
        assert_eq!(&prepared.prompt_messages[2..], &history[history.len() - 2..]);
    }

    #[tokio::test]
    async fn test_completion_defaults() {
        let orch = orchestrator(8000);
        let reply = orch
            .create_chat_completion(&[ConversationTurn::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(reply, "gpt-4.1-mini:1");

        let custom = CompletionOptions::new("other", 0.1, 5);
        let reply = orch
            .create_chat_completion(&[ConversationTurn::user("hi")], Some(&custom))
            .await
            .unwrap();
        assert_eq!(reply, "other:1");
    }
}
