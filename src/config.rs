use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use tracing::info;

use crate::constants;
use crate::llm_interaction::SummaryChain;
use crate::turn::{ReplySource, TurnHandler};
use crate::webhook::WebhookClient;

/// Relay settings shared by every subcommand.
#[derive(Args, Clone)]
pub struct Settings {
    #[arg(long, env = "HAMA_WEBHOOK_URL", default_value = constants::DEFAULT_WEBHOOK_URL, help = "Automation webhook receiving every utterance.")]
    pub webhook_url: String,
    #[arg(long, env = "HAMA_REPLY_SOURCE", value_enum, default_value_t = ReplySource::Webhook, help = "Which service answers the user.")]
    pub reply_source: ReplySource,
    #[arg(long, env = "HAMA_CHAT_MODEL", default_value = constants::DEFAULT_CHAT_MODEL, help = "Chat model used when the model answers.")]
    pub model: String,
    #[arg(long, env = "OPENAI_BASE_URL", default_value = constants::DEFAULT_OPENAI_BASE_URL, help = "Base URL of the OpenAI-compatible API.")]
    pub openai_base_url: String,
    #[arg(skip = constants::OPENAI_API_KEY.clone())]
    pub openai_api_key: Option<String>,
}

// The API key is redacted; settings end up in the startup log line.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("webhook_url", &self.webhook_url)
            .field("reply_source", &self.reply_source)
            .field("model", &self.model)
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Settings {
    pub fn build_turn_handler(&self) -> Result<TurnHandler> {
        let webhook = WebhookClient::new(self.webhook_url.clone());
        let handler = match self.reply_source {
            ReplySource::Webhook => TurnHandler::webhook_only(webhook),
            ReplySource::Model => {
                let Some(api_key) = self.openai_api_key.clone() else {
                    bail!("OPENAI_API_KEY must be set when the reply source is the model");
                };
                let chain = SummaryChain::new(api_key, self.model.clone(), &self.openai_base_url);
                TurnHandler::with_model(webhook, Arc::new(chain))
            }
        };
        info!(
            webhook = %self.webhook_url,
            source = %self.reply_source,
            "Turn handler configured"
        );
        Ok(handler)
    }
}
