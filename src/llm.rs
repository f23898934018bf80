//! Language model collaborator and the tool-call directive protocol
//!
//! The model is an opaque remote contract: a list of chat messages in,
//! response text out. A response may embed a tool-call directive — a
//! single line of the form
//!
//! ```text
//! TOOL_CALL: inventory_lookup {"item": "organic almond milk"}
//! ```
//!
//! recognized by [`parse_directive`]. Everything else is a plain
//! user-facing reply. The directive format is injected into the system
//! prompt for personas that have allowed tools, see
//! [`directive_instructions`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::{Role, Turn};
use crate::{Error, Result};

/// Directive marker scanned for in model responses
const DIRECTIVE_PREFIX: &str = "TOOL_CALL:";

/// One message of a chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// "system", "user", or "assistant"
    pub role: &'static str,
    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// System message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }

    /// User message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }

    /// Assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant", content: content.into() }
    }
}

/// Map session history to chat messages
///
/// Tool turns ride along as assistant content: the directive protocol is
/// text-embedded, so the model sees tool data as part of the exchange.
#[must_use]
pub fn history_to_messages(history: &[Turn]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|turn| match turn.role {
            Role::User => ChatMessage::user(&turn.content),
            Role::Assistant | Role::Tool => ChatMessage::assistant(&turn.content),
        })
        .collect()
}

/// A parsed tool-call directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDirective {
    /// Requested tool name
    pub tool: String,
    /// Argument object (may be empty)
    pub arguments: serde_json::Value,
}

/// Scan response text for a tool-call directive
///
/// The first line starting with `TOOL_CALL:` wins. The remainder of the
/// line is a tool name optionally followed by a JSON argument object;
/// unparseable arguments fall back to an empty object so the invoker can
/// still reject or run the tool.
#[must_use]
pub fn parse_directive(text: &str) -> Option<ToolDirective> {
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix(DIRECTIVE_PREFIX) else {
            continue;
        };
        let rest = rest.trim();
        let (tool, args) = match rest.split_once(char::is_whitespace) {
            Some((tool, args)) => (tool, args.trim()),
            None => (rest, ""),
        };
        if tool.is_empty() {
            continue;
        }
        let arguments = if args.is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(args).unwrap_or_else(|e| {
                tracing::warn!(tool, error = %e, "unparseable directive arguments");
                serde_json::Value::Object(serde_json::Map::new())
            })
        };
        return Some(ToolDirective { tool: tool.to_string(), arguments });
    }
    None
}

/// System-prompt suffix teaching a persona the directive format
///
/// `tools` is (name, usage hint) for each tool the persona may call.
#[must_use]
pub fn directive_instructions(tools: &[(String, String)]) -> String {
    let mut out = String::from(
        "\n\nWhen you need factual data before answering, reply with a single line:\n\
         TOOL_CALL: <tool_name> <json_arguments>\n\
         and nothing else. You will receive the result and then give your spoken \
         answer. Available tools:\n",
    );
    for (name, hint) in tools {
        out.push_str(&format!("- {name}: {hint}\n"));
    }
    out
}

/// Language model contract: prompt in, response text out
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion
    ///
    /// # Errors
    ///
    /// Returns `Error::Model` on timeout, transport, or provider failure.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// OpenAI chat completions client
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiChat {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the API key is empty, or if the HTTP
    /// client cannot be built.
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for chat".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { client, api_key, model })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest { model: &self.model, messages };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Model(format!("completion timed out: {e}"))
                } else {
                    Error::Model(format!("completion transport failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!("completion API error {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Model(format!("malformed completion response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default()
            .trim()
            .to_string();

        tracing::debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}
