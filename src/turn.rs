//! The conversation turn handler: relays one utterance and records the
//! exchange in the session transcript.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::llm_interaction::{ConversationModel, ModelError};
use crate::webhook::{self, extract_reply, RelayError, WebhookClient, WebhookPayload};
use crate::ConversationSession;

/// Which collaborator produces the AI reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReplySource {
    /// The webhook response body is the reply; no model call is made.
    #[default]
    Webhook,
    /// The hosted model answers; the webhook is only notified.
    Model,
}

impl fmt::Display for ReplySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplySource::Webhook => write!(f, "webhook"),
            ReplySource::Model => write!(f, "model"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input; nothing was sent or recorded.
    Skipped,
    Completed { reply: String, usage: u64 },
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("the conversation model failed: {0}")]
    Model(#[from] ModelError),
    #[error("reply source is the model but no model is configured")]
    ModelNotConfigured,
}

pub struct TurnHandler {
    webhook: WebhookClient,
    model: Option<Arc<dyn ConversationModel>>,
    reply_source: ReplySource,
}

impl TurnHandler {
    /// Webhook replies only.
    pub fn webhook_only(webhook: WebhookClient) -> Self {
        Self {
            webhook,
            model: None,
            reply_source: ReplySource::Webhook,
        }
    }

    /// Model replies, webhook notified on every turn.
    pub fn with_model(webhook: WebhookClient, model: Arc<dyn ConversationModel>) -> Self {
        Self {
            webhook,
            model: Some(model),
            reply_source: ReplySource::Model,
        }
    }

    pub fn reply_source(&self) -> ReplySource {
        self.reply_source
    }

    /// Runs one turn. On success exactly one human and one ai message are
    /// appended. A model failure leaves the session untouched.
    #[instrument(skip(self, utterance, session), fields(session_id = %session.session_id(), source = %self.reply_source))]
    pub async fn submit_turn(
        &self,
        utterance: &str,
        session: &mut ConversationSession,
    ) -> Result<TurnOutcome, TurnError> {
        if utterance.trim().is_empty() {
            session.pending_input.clear();
            return Ok(TurnOutcome::Skipped);
        }

        let payload = WebhookPayload {
            user_input: utterance.to_string(),
            session_id: session.session_id().to_string(),
        };
        let relayed = self.webhook.relay(&payload).await;

        let (reply, usage) = match self.reply_source {
            ReplySource::Webhook => (webhook_reply(relayed), 0),
            ReplySource::Model => {
                match &relayed {
                    Ok(body) => info!(%body, "Webhook notified"),
                    Err(e) => warn!("Webhook notification failed: {}", e),
                }
                let model = self.model.as_ref().ok_or(TurnError::ModelNotConfigured)?;
                let answer = model.converse(session.memory_mut(), utterance).await?;
                (answer.text, answer.total_tokens)
            }
        };

        session.record_turn(utterance, reply.clone(), usage);
        info!(usage, total = session.token_count(), "Turn completed");
        Ok(TurnOutcome::Completed { reply, usage })
    }
}

fn webhook_reply(relayed: Result<serde_json::Value, RelayError>) -> String {
    match relayed {
        Ok(body) => extract_reply(&body).into_message(),
        Err(RelayError::InvalidJson { raw }) => webhook::unexpected_structure(&raw),
        Err(e) => {
            warn!("Webhook relay failed: {}", e);
            webhook::unavailable(&e)
        }
    }
}
