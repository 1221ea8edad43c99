//! The chat turn pipeline.
//!
//! One turn, end to end:
//!
//! ```text
//! ChatMessage ─▶ persist user turn ─▶ load history ─▶ orchestrate
//!                                                         │
//!                      (industry given) ground with excerpts
//!                                                         │
//!        SSE frames ◀─ stream model answer (wall-clock bounded)
//!                                                         │
//!                                       persist assistant turn
//! ```
//!
//! # Wire format
//!
//! The answer is framed as server-sent events, each record followed by a
//! blank line:
//!
//! ```text
//! data: {"content":"<fragment>"}
//! data: {"content":"","stage":"discovery","followUpQuestions":["..."]}
//! data: [DONE]
//! ```
//!
//! The stream always ends with the control record and `[DONE]`. When the
//! model fails or times out before producing anything, [`FALLBACK_REPLY`]
//! is sent as the only content fragment. Non-streaming callers get the
//! failure back on [`Generation`] and [`ChatReply`].

use std::sync::Arc;
use std::time::Duration;

use advisory_core::models::{ConversationTurn, Role, Stage};
use advisory_core::retrieval::excerpts_prompt;
use advisory_core::stage::DISPLAYED_FOLLOW_UPS;
use anyhow::Result;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::conversation_store::ConversationLog;
use crate::error::AdvisorError;
use crate::llm::CompletionOptions;
use crate::orchestrator::Orchestrator;
use crate::retrieval::CachedRetrieval;
use crate::validation::ChatMessage;

pub const FALLBACK_REPLY: &str =
    "I'm sorry, I wasn't able to generate a response just now. Please try again in a moment.";

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

pub fn content_frame(fragment: &str) -> String {
    format!("data: {}\n\n", json!({ "content": fragment }))
}

pub fn control_frame(stage: Stage, follow_ups: &[String]) -> String {
    let shown: Vec<&String> = follow_ups.iter().take(DISPLAYED_FOLLOW_UPS).collect();
    format!(
        "data: {}\n\n",
        json!({
            "content": "",
            "stage": stage.as_str(),
            "followUpQuestions": shown,
        })
    )
}

/// A turn ready for generation.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    pub guid: String,
    pub stage: Stage,
    pub follow_up_questions: Vec<String>,
    pub prompt_messages: Vec<ConversationTurn>,
}

/// The persisted assistant reply and, if the model failed or timed out,
/// the reason. A failed generation still has content: whatever was
/// streamed, else [`FALLBACK_REPLY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub content: String,
    pub failure: Option<String>,
}

impl Generation {
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }

    /// The failure as [`AdvisorError::GenerationFailed`].
    pub fn error(&self) -> Option<AdvisorError> {
        self.failure.clone().map(AdvisorError::GenerationFailed)
    }
}

/// Result of a non-streamed turn.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub guid: String,
    pub content: String,
    pub stage: Stage,
    pub follow_up_questions: Vec<String>,
    /// `content` is a fallback or partial answer.
    pub generation_failed: bool,
}

pub struct ChatService {
    orchestrator: Arc<Orchestrator>,
    retrieval: Option<Arc<CachedRetrieval>>,
    log: Arc<dyn ConversationLog>,
    options: CompletionOptions,
    stream_timeout: Duration,
}

impl ChatService {
    pub fn new(
        config: &Config,
        orchestrator: Arc<Orchestrator>,
        retrieval: Arc<CachedRetrieval>,
        log: Arc<dyn ConversationLog>,
    ) -> Self {
        Self {
            orchestrator,
            retrieval: config.retrieval.ground_chat.then_some(retrieval),
            log,
            options: CompletionOptions::chat(&config.llm),
            stream_timeout: Duration::from_secs(config.llm.stream_timeout_secs),
        }
    }

    pub fn log(&self) -> &Arc<dyn ConversationLog> {
        &self.log
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Persist the user turn and build the model prompt.
    ///
    /// A message without a guid starts a new conversation.
    pub async fn prepare(&self, message: &ChatMessage) -> Result<PreparedTurn> {
        let guid = message
            .guid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.log.append(&guid, Role::User, &message.content).await?;
        let history: Vec<ConversationTurn> = self
            .log
            .messages(&guid)
            .await?
            .iter()
            .map(|m| m.to_turn())
            .collect();

        let prepared = self
            .orchestrator
            .process_conversation(&guid, &history)
            .await?;
        let mut prompt_messages = prepared.prompt_messages;

        if let (Some(retrieval), Some(industry)) = (&self.retrieval, &message.industry) {
            let docs = retrieval.fast_search(industry, &message.content).await;
            if let Some(block) = excerpts_prompt(&docs) {
                debug!(guid = %guid, industry = %industry, passages = docs.len(), "grounding chat turn");
                prompt_messages.insert(1, ConversationTurn::system(block));
            }
        }

        Ok(PreparedTurn {
            guid,
            stage: prepared.stage,
            follow_up_questions: prepared.follow_up_questions,
            prompt_messages,
        })
    }

    /// Stream the answer, call `on_fragment` for each piece of text, and
    /// persist the assistant turn.
    ///
    /// Model errors and the wall-clock timeout are reported in
    /// [`Generation::failure`]; [`FALLBACK_REPLY`] is emitted when nothing
    /// was generated yet.
    pub async fn generate<F>(&self, turn: &PreparedTurn, mut on_fragment: F) -> Generation
    where
        F: FnMut(&str) + Send,
    {
        let deadline = Instant::now() + self.stream_timeout;
        let mut reply = String::new();
        let mut failure = None;

        match timeout_at(
            deadline,
            self.orchestrator
                .stream_chat_completion(&turn.prompt_messages, Some(&self.options)),
        )
        .await
        {
            Ok(Ok(mut stream)) => loop {
                match timeout_at(deadline, stream.next()).await {
                    Ok(Some(Ok(fragment))) => {
                        if !fragment.is_empty() {
                            on_fragment(&fragment);
                            reply.push_str(&fragment);
                        }
                    }
                    Ok(Some(Err(e))) => {
                        warn!(guid = %turn.guid, error = %e, "chat stream failed mid-answer");
                        failure = Some(format!("stream failed mid-answer: {:#}", e));
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(guid = %turn.guid, "chat stream timed out");
                        failure = Some(format!(
                            "stream timed out after {}s",
                            self.stream_timeout.as_secs()
                        ));
                        break;
                    }
                }
            },
            Ok(Err(e)) => {
                error!(guid = %turn.guid, error = %e, "chat generation failed");
                failure = Some(format!("{:#}", e));
            }
            Err(_) => {
                warn!(guid = %turn.guid, "chat generation timed out before first fragment");
                failure = Some(format!(
                    "timed out after {}s before the first fragment",
                    self.stream_timeout.as_secs()
                ));
            }
        }

        if reply.is_empty() {
            failure.get_or_insert_with(|| "model returned an empty answer".to_string());
            on_fragment(FALLBACK_REPLY);
            reply.push_str(FALLBACK_REPLY);
        }

        if let Err(e) = self.log.append(&turn.guid, Role::Assistant, &reply).await {
            error!(guid = %turn.guid, error = %e, "failed to persist assistant turn");
        }
        Generation {
            content: reply,
            failure,
        }
    }

    /// Generate on a background task and return the SSE frames.
    pub fn stream_turn(self: &Arc<Self>, turn: PreparedTurn) -> UnboundedReceiverStream<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = self.clone();
        tokio::spawn(async move {
            service
                .generate(&turn, |fragment| {
                    // A closed receiver means the client left; keep generating
                    // so the assistant turn is still persisted.
                    let _ = tx.send(content_frame(fragment));
                })
                .await;
            let _ = tx.send(control_frame(turn.stage, &turn.follow_up_questions));
            let _ = tx.send(DONE_FRAME.to_string());
        });
        UnboundedReceiverStream::new(rx)
    }

    /// Run a whole turn without streaming.
    pub async fn respond(&self, message: &ChatMessage) -> Result<ChatReply> {
        let turn = self.prepare(message).await?;
        let generation = self.generate(&turn, |_| {}).await;
        Ok(ChatReply {
            guid: turn.guid,
            generation_failed: generation.failed(),
            content: generation.content,
            stage: turn.stage,
            follow_up_questions: turn
                .follow_up_questions
                .into_iter()
                .take(DISPLAYED_FOLLOW_UPS)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation_store::{ConversationRecord, StoredMessage};
    use crate::knowledge::test_support::{chunk_record, CannedChat, KeywordEmbedder};
    use crate::llm::{ChatProvider, FragmentStream};
    use crate::vector::{InMemoryVectorIndex, VectorIndex};
    use advisory_core::store::memory::InMemoryStateStore;
    use anyhow::bail;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryLog {
        messages: Mutex<Vec<(String, Role, String)>>,
    }

    #[async_trait]
    impl ConversationLog for MemoryLog {
        async fn ensure_conversation(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn conversation(&self, _: &str) -> Result<Option<ConversationRecord>> {
            Ok(None)
        }
        async fn save_conversation(
            &self,
            _: &str,
            _: Option<&str>,
            _: Option<&str>,
        ) -> Result<ConversationRecord> {
            bail!("not used")
        }
        async fn append(&self, guid: &str, role: Role, content: &str) -> Result<()> {
            self.messages
                .lock()
                .unwrap()
                .push((guid.to_string(), role, content.to_string()));
            Ok(())
        }
        async fn messages(&self, guid: &str) -> Result<Vec<StoredMessage>> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|(g, _, _)| g == guid)
                .map(|(_, role, content)| StoredMessage {
                    role: *role,
                    content: content.clone(),
                    created_at: String::new(),
                })
                .collect())
        }
    }

    enum Behaviour {
        Fragments(Vec<&'static str>),
        Fail,
        Hang,
    }

    struct ScriptedChat {
        behaviour: Behaviour,
        seen: Mutex<Vec<Vec<ConversationTurn>>>,
    }

    impl ScriptedChat {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedChat {
        async fn complete(&self, _: &[ConversationTurn], _: &CompletionOptions) -> Result<String> {
            Ok("summary".into())
        }
        async fn stream(
            &self,
            messages: &[ConversationTurn],
            _: &CompletionOptions,
        ) -> Result<FragmentStream> {
            self.seen.lock().unwrap().push(messages.to_vec());
            match &self.behaviour {
                Behaviour::Fragments(parts) => {
                    let items: Vec<Result<String>> =
                        parts.iter().map(|p| Ok(p.to_string())).collect();
                    Ok(stream::iter(items).boxed())
                }
                Behaviour::Fail => bail!("upstream 503"),
                Behaviour::Hang => Ok(stream::pending().boxed()),
            }
        }
    }

    fn config(ground: bool) -> Config {
        toml::from_str(&format!(
            "[db]\npath = \"/tmp/x.sqlite\"\n[server]\nbind = \"127.0.0.1:0\"\n\
             [llm]\nstream_timeout_secs = 30\n[retrieval]\nground_chat = {}\nmin_score = 0.1\n",
            ground
        ))
        .unwrap()
    }

    async fn service(chat: Arc<ScriptedChat>, ground: bool) -> (Arc<ChatService>, Arc<MemoryLog>) {
        let config = config(ground);
        let index = Arc::new(InMemoryVectorIndex::new());
        index
            .upsert(
                "agriculture",
                vec![chunk_record("drones_chunk_000", "drone crop monitoring", "agriculture")],
            )
            .await
            .unwrap();
        let retrieval = Arc::new(CachedRetrieval::new(
            Arc::new(KeywordEmbedder::default()),
            index,
            Arc::new(CannedChat(None)),
            "expansion",
            &config.retrieval,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            &config,
            chat,
            Arc::new(InMemoryStateStore::new()),
        ));
        let log = Arc::new(MemoryLog::default());
        let svc = ChatService::new(&config, orchestrator, retrieval, log.clone());
        (Arc::new(svc), log)
    }

    fn message(content: &str, industry: Option<&str>) -> ChatMessage {
        ChatMessage {
            content: content.to_string(),
            guid: Some("6f1c2d3e-4a5b-4c6d-8e9f-0a1b2c3d4e5f".to_string()),
            industry: industry.map(str::to_string),
        }
    }

    async fn collect(svc: &Arc<ChatService>, msg: &ChatMessage) -> Vec<String> {
        let turn = svc.prepare(msg).await.unwrap();
        svc.stream_turn(turn).collect().await
    }

    #[tokio::test]
    async fn test_stream_frames_and_persistence() {
        let chat = ScriptedChat::new(Behaviour::Fragments(vec!["Hello", "", " there"]));
        let (svc, log) = service(chat, false).await;

        let frames = collect(&svc, &message("Hi, I run a farm", None)).await;
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], "data: {\"content\":\"Hello\"}\n\n");
        assert_eq!(frames[1], "data: {\"content\":\" there\"}\n\n");
        assert!(frames[2].contains("\"stage\":\"discovery\""));
        assert_eq!(frames[3], DONE_FRAME);

        let control: serde_json::Value =
            serde_json::from_str(frames[2].trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(control["followUpQuestions"].as_array().unwrap().len(), 3);
        assert_eq!(control["content"], "");

        let stored = log.messages.lock().unwrap().clone();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].1, Role::Assistant);
        assert_eq!(stored[1].2, "Hello there");
    }

    #[tokio::test]
    async fn test_generation_failure_streams_fallback() {
        let (svc, log) = service(ScriptedChat::new(Behaviour::Fail), false).await;
        let frames = collect(&svc, &message("Hello", None)).await;
        assert_eq!(frames[0], content_frame(FALLBACK_REPLY));
        assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));
        assert_eq!(log.messages.lock().unwrap()[1].2, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_generation_failure_is_reported() {
        let (svc, log) = service(ScriptedChat::new(Behaviour::Fail), false).await;
        let turn = svc.prepare(&message("Hello", None)).await.unwrap();
        let generation = svc.generate(&turn, |_| {}).await;
        assert!(generation.failed());
        assert_eq!(generation.content, FALLBACK_REPLY);
        assert!(matches!(
            generation.error(),
            Some(AdvisorError::GenerationFailed(reason)) if reason.contains("upstream 503")
        ));
        assert_eq!(log.messages.lock().unwrap()[1].2, FALLBACK_REPLY);

        let reply = svc.respond(&message("Still there?", None)).await.unwrap();
        assert!(reply.generation_failed);
        assert_eq!(reply.content, FALLBACK_REPLY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_still_ends_with_done() {
        let (svc, _log) = service(ScriptedChat::new(Behaviour::Hang), false).await;
        let frames = collect(&svc, &message("Hello", None)).await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], content_frame(FALLBACK_REPLY));
        assert_eq!(frames[2], DONE_FRAME);

        let turn = svc.prepare(&message("Hello again", None)).await.unwrap();
        let generation = svc.generate(&turn, |_| {}).await;
        assert!(generation.failure.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_grounding_inserts_excerpts_after_system_prompt() {
        let chat = ScriptedChat::new(Behaviour::Fragments(vec!["ok"]));
        let (svc, _log) = service(chat.clone(), true).await;
        svc.respond(&message("drone crop monitoring", Some("agriculture")))
            .await
            .unwrap();

        let seen = chat.seen.lock().unwrap();
        let prompt = &seen[0];
        assert_eq!(prompt[0].role, Role::System);
        assert_eq!(prompt[1].role, Role::System);
        assert!(prompt[1].content.contains("drone crop monitoring"));
        assert_eq!(prompt[2], ConversationTurn::user("drone crop monitoring"));
    }

    #[tokio::test]
    async fn test_new_conversation_gets_guid() {
        let chat = ScriptedChat::new(Behaviour::Fragments(vec!["Welcome"]));
        let (svc, _log) = service(chat, false).await;
        let mut msg = message("Hello", None);
        msg.guid = None;
        let reply = svc.respond(&msg).await.unwrap();
        assert!(crate::validation::is_valid_uuid(&reply.guid));
        assert_eq!(reply.content, "Welcome");
        assert!(!reply.generation_failed);
        assert_eq!(reply.stage, Stage::Discovery);
        assert_eq!(reply.follow_up_questions.len(), 3);
    }
}
