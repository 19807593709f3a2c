//! Assembly of "ask about this bill" chat requests. The model transport is
//! supplied by the caller through [`ChatBackend`].

use crate::config::ChatConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("missing or invalid parameters: {0}")]
    BadRequest(String),

    #[error("no content received from AI assistant")]
    EmptyReply,

    #[error("API quota exceeded")]
    QuotaExceeded,

    #[error("input text or conversation history is too long for the AI model")]
    ContextTooLong,

    #[error("failed to get response from AI assistant: {0}")]
    Backend(#[from] anyhow::Error),
}

impl ChatError {
    pub fn status(&self) -> u16 {
        match self {
            ChatError::BadRequest(_) | ChatError::ContextTooLong => 400,
            ChatError::QuotaExceeded => 429,
            ChatError::EmptyReply | ChatError::Backend(_) => 500,
        }
    }

    /// Map a provider error message onto the user-facing categories.
    pub fn from_backend_message(message: &str) -> ChatError {
        if message.contains("insufficient_quota") {
            ChatError::QuotaExceeded
        } else if message.contains("context_length_exceeded") {
            ChatError::ContextTooLong
        } else {
            ChatError::Backend(anyhow::anyhow!(message.to_string()))
        }
    }
}

pub trait ChatBackend {
    fn complete(&self, request: &ChatRequest) -> Result<Option<String>, ChatError>;
}

/// Validate a raw `{ billText, messages }` body.
pub fn parse_chat_payload(body: &Value) -> Result<(String, Vec<ChatMessage>), ChatError> {
    let invalid = || {
        ChatError::BadRequest(r#""billText" (string) and "messages" (array) are required"#.to_string())
    };

    let bill_text = body
        .get("billText")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .ok_or_else(invalid)?;
    let messages = body
        .get("messages")
        .filter(|messages| messages.is_array())
        .ok_or_else(invalid)?;
    let messages: Vec<ChatMessage> = serde_json::from_value(messages.clone())
        .map_err(|err| ChatError::BadRequest(format!("bad message: {err}")))?;

    Ok((bill_text.to_string(), messages))
}

pub fn system_prompt(bill_text: &str) -> ChatMessage {
    ChatMessage::new(
        "system",
        format!(
            "You are a helpful assistant specialized in explaining legislative documents. \
             Analyze the following bill text and answer the user's questions based ONLY on \
             this text unless explicitly asked for general knowledge clarification. Be clear \
             and concise.\n\nBILL TEXT:\n\"\"\"\n{bill_text}\n\"\"\""
        ),
    )
}

/// System prompt followed by at most `max_history` of the newest messages.
pub fn build_chat_request(
    bill_text: &str,
    messages: &[ChatMessage],
    config: &ChatConfig,
) -> Result<ChatRequest, ChatError> {
    if bill_text.is_empty() {
        return Err(ChatError::BadRequest("billText is empty".to_string()));
    }

    let keep_from = messages.len().saturating_sub(config.max_history);
    if keep_from > 0 {
        debug!("trimmed chat history to {} messages", messages.len() - keep_from);
    }

    let mut all = Vec::with_capacity(messages.len() - keep_from + 1);
    all.push(system_prompt(bill_text));
    all.extend_from_slice(&messages[keep_from..]);

    Ok(ChatRequest {
        model: config.model.clone(),
        messages: all,
    })
}

pub fn relay_chat<B: ChatBackend>(
    backend: &B,
    bill_text: &str,
    messages: &[ChatMessage],
    config: &ChatConfig,
) -> Result<String, ChatError> {
    let request = build_chat_request(bill_text, messages, config)?;
    debug!("sending {} chat messages", request.messages.len());

    let reply = backend.complete(&request)?;
    match reply.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => {
            error!("assistant response missing content");
            Err(ChatError::EmptyReply)
        }
    }
}
