//! Core type definitions for Case Nexus.
//!
//! The type system separates three concerns, mirroring the original SDK's
//! split between internal types and wire format:
//!
//! - **Call configuration**: [`CallOptions`] / [`CallOptionsBuilder`] configure
//!   one Streaming Runner invocation (system prompt, thinking budget, output
//!   cap, tools, model/connection settings).
//! - **Conversation segments**: [`ContentBlock`] and [`Message`] are the
//!   provider-agnostic representation the Tool Loop appends to; a
//!   [`ContentBlock::Thinking`] variant carries the model's reasoning trace
//!   as a first-class, separately-streamed channel (spec §1, §4.4).
//! - **Wire format**: [`ProviderRequest`] / [`ProviderStreamEvent`] model a
//!   Messages-style streaming API with interleaved thinking and tool use:
//!   `message_start`, `content_block_start` / `_delta` / `_stop` (block
//!   types `text`, `thinking`, `tool_use`), `message_delta`, `message_stop`.

use crate::tools::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// CALL OPTIONS
// ============================================================================

/// Configuration for a single Streaming Runner invocation.
///
/// Unlike a stateful chat client, each Case Nexus workflow issues one or more
/// independent calls with their own system prompt and thinking budget — the
/// Workflow Engine owns conversation state (§4.6), not this struct.
#[derive(Clone)]
pub struct CallOptions {
    system_prompt: String,
    model: String,
    base_url: String,
    api_key: String,
    thinking_budget: u32,
    max_output_tokens: u32,
    temperature: f32,
    timeout: u64,
    tools: Vec<Arc<Tool>>,
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("thinking_budget", &self.thinking_budget)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("tools", &format!("{} tools", self.tools.len()))
            .finish()
    }
}

impl CallOptions {
    pub fn builder() -> CallOptionsBuilder {
        CallOptionsBuilder::default()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn thinking_budget(&self) -> u32 {
        self.thinking_budget
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    pub fn tools(&self) -> &[Arc<Tool>] {
        &self.tools
    }
}

/// Builder for [`CallOptions`].
#[derive(Default)]
pub struct CallOptionsBuilder {
    system_prompt: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    thinking_budget: Option<u32>,
    max_output_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout: Option<u64>,
    tools: Vec<Arc<Tool>>,
}

impl CallOptionsBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Thinking budget in tokens. Workflows use values such as 60K (health
    /// check), 40K (deep analysis), smaller for short calls (hearing prep,
    /// client letter) per spec §4.6.
    pub fn thinking_budget(mut self, tokens: u32) -> Self {
        self.thinking_budget = Some(tokens);
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn tool(mut self, tool: Arc<Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn build(self) -> crate::Result<CallOptions> {
        let model = self
            .model
            .ok_or_else(|| crate::Error::config("model is required"))?;
        let base_url = self
            .base_url
            .ok_or_else(|| crate::Error::config("base_url is required"))?;

        if model.trim().is_empty() {
            return Err(crate::Error::invalid_input("model cannot be empty"));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(crate::Error::invalid_input(
                "base_url must start with http:// or https://",
            ));
        }

        let temperature = self.temperature.unwrap_or(1.0);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(crate::Error::invalid_input(
                "temperature must be between 0.0 and 2.0",
            ));
        }

        Ok(CallOptions {
            system_prompt: self.system_prompt.unwrap_or_default(),
            model,
            base_url,
            api_key: self.api_key.unwrap_or_default(),
            thinking_budget: self.thinking_budget.unwrap_or(0),
            max_output_tokens: self.max_output_tokens.unwrap_or(8192),
            temperature,
            timeout: self.timeout.unwrap_or(180),
            tools: self.tools,
        })
    }
}

// ============================================================================
// CONVERSATION SEGMENTS
// ============================================================================

/// Role of a message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    /// A tool result. The wire serializer folds `Tool`-role messages into a
    /// `user` message carrying `tool_result` content blocks, matching how
    /// tool results are conventionally threaded back into the conversation.
    Tool,
}

/// One block of message content. Carries the interleaved-thinking channel
/// (`Thinking`) as a first-class variant alongside text, images, and tool
/// use/result, per spec §1 and §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Thinking(ThinkingBlock),
    Image(ImageBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

/// Plain text content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// The model's reasoning trace, streamed separately from its visible
/// response. Re-submitted verbatim as part of conversation history by the
/// Tool Loop, never paraphrased or dropped (spec §4.4, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub thinking: String,
}

impl ThinkingBlock {
    pub fn new(thinking: impl Into<String>) -> Self {
        Self {
            thinking: thinking.into(),
        }
    }
}

/// A model-issued request to execute a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolUseBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// The result of executing a tool, threaded back into the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: true,
        }
    }
}

/// Image detail / resolution hint for multimodal evidence analysis.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    #[default]
    Auto,
}

/// An image content block: a case evidence photograph, a dashcam/body-cam
/// still, or a video's poster frame (spec §4.6 (5) Evidence Analysis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlock {
    url: String,
    detail: ImageDetail,
}

impl ImageBlock {
    pub fn from_url(url: impl Into<String>) -> crate::Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(crate::Error::invalid_input("image URL cannot be empty"));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") && !url.starts_with("data:") {
            return Err(crate::Error::invalid_input(
                "image URL must start with http://, https://, or data:",
            ));
        }
        Ok(Self {
            url,
            detail: ImageDetail::default(),
        })
    }

    pub fn from_base64(data: impl AsRef<str>, mime_type: impl AsRef<str>) -> crate::Result<Self> {
        let data = data.as_ref();
        let mime_type = mime_type.as_ref();
        if data.is_empty() {
            return Err(crate::Error::invalid_input("image data cannot be empty"));
        }
        if mime_type.is_empty() {
            return Err(crate::Error::invalid_input("mime type cannot be empty"));
        }
        Ok(Self {
            url: format!("data:{};base64,{}", mime_type, data),
            detail: ImageDetail::default(),
        })
    }

    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn detail(&self) -> ImageDetail {
        self.detail
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, vec![ContentBlock::Text(TextBlock::new(text))])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![ContentBlock::Text(TextBlock::new(text))])
    }

    pub fn user_with_image(text: impl Into<String>, image: ImageBlock) -> Self {
        Self::new(
            MessageRole::User,
            vec![ContentBlock::Text(TextBlock::new(text)), ContentBlock::Image(image)],
        )
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool_result(result: ToolResultBlock) -> Self {
        Self::new(MessageRole::Tool, vec![ContentBlock::ToolResult(result)])
    }

    /// Concatenation of every `Text` block's contents, ignoring thinking,
    /// tool use, and image blocks. Used when building prior-phase context for
    /// the Adversarial Simulation workflow (spec §4.6 (3), §8 S4).
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

// ============================================================================
// WIRE FORMAT — Messages-style streaming API with interleaved thinking
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProviderToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ProviderContentPart {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    Image {
        source: ProviderImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProviderImageSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProviderMessage {
    pub role: &'static str,
    pub content: Vec<ProviderContentPart>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ThinkingConfig {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub budget_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProviderRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ProviderMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ProviderToolSpec>,
}

/// Token usage reported at the end of a streamed call. `thinking_tokens` is
/// the provider's own count of tokens spent in the separate thinking channel
/// (spec §4.10 "authoritative SDK-reported counts"), not derived by counting
/// characters on our end.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub thinking_tokens: u64,
}

/// One Server-Sent Event from the provider's streaming endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ProviderStreamEvent {
    MessageStart {
        #[serde(default)]
        message: MessageStartPayload,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlockStartPayload,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentBlockDeltaPayload,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaPayload,
        #[serde(default)]
        usage: Usage,
    },
    MessageStop,
    Ping,
    Error {
        error: ProviderErrorPayload,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MessageStartPayload {
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlockStartPayload {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlockDeltaPayload {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MessageDeltaPayload {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProviderErrorPayload {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_options_requires_model_and_base_url() {
        let err = CallOptions::builder().base_url("http://x").build().unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));

        let err = CallOptions::builder().model("m").build().unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn call_options_rejects_bad_base_url_scheme() {
        let err = CallOptions::builder()
            .model("m")
            .base_url("ftp://x")
            .build()
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidInput(_)));
    }

    #[test]
    fn call_options_defaults() {
        let opts = CallOptions::builder()
            .model("m")
            .base_url("https://api.example.com")
            .build()
            .unwrap();
        assert_eq!(opts.thinking_budget(), 0);
        assert_eq!(opts.max_output_tokens(), 8192);
        assert_eq!(opts.temperature(), 1.0);
    }

    #[test]
    fn message_text_ignores_non_text_blocks() {
        let msg = Message::new(
            MessageRole::Assistant,
            vec![
                ContentBlock::Thinking(ThinkingBlock::new("reasoning...")),
                ContentBlock::Text(TextBlock::new("the answer is 4")),
            ],
        );
        assert_eq!(msg.text(), "the answer is 4");
    }

    #[test]
    fn content_block_serde_round_trips_thinking() {
        let block = ContentBlock::Thinking(ThinkingBlock::new("because X implies Y"));
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"thinking\""));
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        match back {
            ContentBlock::Thinking(t) => assert_eq!(t.thinking, "because X implies Y"),
            _ => panic!("expected thinking block"),
        }
    }

    #[test]
    fn image_block_validates_url_scheme() {
        assert!(ImageBlock::from_url("").is_err());
        assert!(ImageBlock::from_url("ftp://x").is_err());
        assert!(ImageBlock::from_url("https://example.com/cam.jpg").is_ok());
    }
}
