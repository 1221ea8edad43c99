//! Request payload validation.
//!
//! Validators take the raw JSON body so every problem can be reported at
//! once, as a list of `{path, message}` issues, instead of failing on the
//! first type error. A failed validation becomes
//! [`AdvisorError::Validation`] and a 400 response.

use advisory_core::models::{ConversationTurn, Role};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::AdvisorError;

pub const MAX_CONTENT_CHARS: usize = 4000;
pub const MAX_TITLE_CHARS: usize = 150;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validated chat turn submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Trimmed message text.
    pub content: String,
    pub guid: Option<String>,
    pub industry: Option<String>,
}

/// A validated conversation create/update payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub messages: Vec<ConversationTurn>,
}

pub fn is_valid_uuid(value: &str) -> bool {
    UUID_RE.is_match(value)
}

pub fn validate_guid(value: &str) -> Result<(), AdvisorError> {
    if is_valid_uuid(value) {
        Ok(())
    } else {
        Err(AdvisorError::validation("guid", "Invalid GUID format"))
    }
}

fn root_object(data: &Value) -> Result<&serde_json::Map<String, Value>, AdvisorError> {
    data.as_object()
        .ok_or_else(|| AdvisorError::validation("root", "Input must be an object"))
}

/// Validate `{content | message, guid?, industry?}`.
pub fn validate_chat_message(data: &Value) -> Result<ChatMessage, AdvisorError> {
    let obj = root_object(data)?;
    let mut issues = Vec::new();

    let content = obj
        .get("content")
        .filter(|v| !v.is_null())
        .or_else(|| obj.get("message"));
    let content = match content.and_then(Value::as_str) {
        None => {
            issues.push(ValidationIssue::new("content", "Content must be a string"));
            None
        }
        Some(text) if text.trim().is_empty() => {
            issues.push(ValidationIssue::new("content", "Content cannot be empty"));
            None
        }
        Some(text) if text.chars().count() > MAX_CONTENT_CHARS => {
            issues.push(ValidationIssue::new(
                "content",
                format!("Content must be at most {} characters", MAX_CONTENT_CHARS),
            ));
            None
        }
        Some(text) => Some(text.trim().to_string()),
    };

    let guid = match obj.get("guid") {
        None | Some(Value::Null) => None,
        Some(Value::String(g)) if is_valid_uuid(g) => Some(g.clone()),
        Some(_) => {
            issues.push(ValidationIssue::new("guid", "Invalid GUID format"));
            None
        }
    };

    let industry = match obj.get("industry") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(_) => {
            issues.push(ValidationIssue::new(
                "industry",
                "Industry must be a non-empty string",
            ));
            None
        }
    };

    match content {
        Some(content) if issues.is_empty() => Ok(ChatMessage {
            content,
            guid,
            industry,
        }),
        _ => Err(AdvisorError::Validation(issues)),
    }
}

/// Validate `{title?, description?, messages?: [{role, content}]}`.
pub fn validate_conversation(data: &Value) -> Result<ConversationPayload, AdvisorError> {
    let obj = root_object(data)?;
    let mut issues = Vec::new();

    let title = optional_text(obj.get("title"), "title", "Title", MAX_TITLE_CHARS, &mut issues);
    let description = optional_text(
        obj.get("description"),
        "description",
        "Description",
        MAX_DESCRIPTION_CHARS,
        &mut issues,
    );

    let mut messages = Vec::new();
    match obj.get("messages") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let Some(msg) = item.as_object() else {
                    issues.push(ValidationIssue::new(
                        format!("messages.{}", i),
                        "Message must be an object",
                    ));
                    continue;
                };
                let content = msg
                    .get("content")
                    .and_then(Value::as_str)
                    .filter(|c| c.chars().count() <= MAX_CONTENT_CHARS);
                if content.is_none() {
                    issues.push(ValidationIssue::new(
                        format!("messages.{}.content", i),
                        format!(
                            "Message content must be a string of at most {} characters",
                            MAX_CONTENT_CHARS
                        ),
                    ));
                }
                let role = msg
                    .get("role")
                    .and_then(Value::as_str)
                    .and_then(|r| r.parse::<Role>().ok());
                if role.is_none() {
                    issues.push(ValidationIssue::new(
                        format!("messages.{}.role", i),
                        "Message role must be user, assistant, or system",
                    ));
                }
                if let (Some(role), Some(content)) = (role, content) {
                    messages.push(ConversationTurn::new(role, content));
                }
            }
        }
        Some(_) => issues.push(ValidationIssue::new("messages", "Messages must be an array")),
    }

    if issues.is_empty() {
        Ok(ConversationPayload {
            title,
            description,
            messages,
        })
    } else {
        Err(AdvisorError::Validation(issues))
    }
}

fn optional_text(
    value: Option<&Value>,
    path: &str,
    label: &str,
    max_chars: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.chars().count() <= max_chars => Some(s.clone()),
        Some(Value::String(_)) => {
            issues.push(ValidationIssue::new(
                path,
                format!("{} must be at most {} characters", label, max_chars),
            ));
            None
        }
        Some(_) => {
            issues.push(ValidationIssue::new(path, format!("{} must be a string", label)));
            None
        }
    }
}
