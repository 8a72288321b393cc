use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

/// Running summary of earlier turns, owned by a session and only read or
/// rewritten by the conversation model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationMemory {
    summary: String,
}

impl ConversationMemory {
    pub fn summary(&self) -> &str {
        &self.summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    /// Tokens consumed by every model call made for this reply.
    pub total_tokens: u64,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to reach the model API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model API request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse model API response: {0}")]
    Decode(String),
    #[error("model API returned no content")]
    EmptyReply,
}

/// A hosted conversation that keeps its own memory between turns.
#[async_trait]
pub trait ConversationModel: Send + Sync {
    async fn converse(
        &self,
        memory: &mut ConversationMemory,
        utterance: &str,
    ) -> Result<ModelReply, ModelError>;
}

// Structures matching the OpenAI /chat/completions endpoint
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize, Deserialize, Debug)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

/// A conversation chain backed by summary memory: each turn answers from the
/// summary plus the new input, then folds the exchange into the summary.
#[derive(Debug, Clone)]
pub struct SummaryChain {
    client: Client,
    api_key: String,
    model: String,
    completions_url: String,
}

impl SummaryChain {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            completions_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<(String, u64), ModelError> {
        let request_payload = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages,
        };

        let response = self
            .client
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&request_payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Chat completion request failed");
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))?;

        let tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ModelError::EmptyReply)?;

        Ok((text, tokens))
    }
}

fn reply_messages(summary: &str, utterance: &str) -> Vec<ChatMessage> {
    let history = if summary.is_empty() {
        "(no earlier conversation)"
    } else {
        summary
    };
    let system = format!(
        "You are HAMA, a friendly schedule assistant talking with a human. \
        Answer helpfully and concisely. If you do not know something, say so.\n\n\
        Summary of the conversation so far:\n{}",
        history
    );
    vec![
        ChatMessage {
            role: "system".to_string(),
            content: system,
        },
        ChatMessage {
            role: "user".to_string(),
            content: utterance.to_string(),
        },
    ]
}

fn summary_messages(summary: &str, utterance: &str, reply: &str) -> Vec<ChatMessage> {
    let prompt = format!(
        "Progressively summarize the conversation. Extend the current summary with \
        the new lines and return only the new summary.\n\n\
        Current summary:\n{}\n\nNew lines of conversation:\nHuman: {}\nAI: {}\n\nNew summary:",
        summary, utterance, reply
    );
    vec![ChatMessage {
        role: "user".to_string(),
        content: prompt,
    }]
}

#[async_trait]
impl ConversationModel for SummaryChain {
    #[instrument(skip(self, memory, utterance), fields(model = %self.model))]
    async fn converse(
        &self,
        memory: &mut ConversationMemory,
        utterance: &str,
    ) -> Result<ModelReply, ModelError> {
        let (text, reply_tokens) = self
            .complete(reply_messages(&memory.summary, utterance))
            .await?;
        debug!(tokens = reply_tokens, "Received model reply");

        let mut total_tokens = reply_tokens;
        match self
            .complete(summary_messages(&memory.summary, utterance, &text))
            .await
        {
            Ok((summary, summary_tokens)) => {
                debug!(tokens = summary_tokens, "Updated conversation summary");
                memory.summary = summary;
                total_tokens += summary_tokens;
            }
            Err(e) => warn!("Keeping previous conversation summary: {}", e),
        }

        Ok(ModelReply { text, total_tokens })
    }
}
