use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Body POSTed to the automation webhook on every turn.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WebhookPayload {
    pub user_input: String,
    pub session_id: String,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook returned a non-JSON body")]
    InvalidJson { raw: String },
}

/// What the webhook response resolves to as a chat reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookReply {
    Text(String),
    /// No usable reply field; carries the rendered body for the placeholder.
    Unexpected(String),
}

impl WebhookReply {
    pub fn into_message(self) -> String {
        match self {
            WebhookReply::Text(text) => text,
            WebhookReply::Unexpected(body) => unexpected_structure(&body),
        }
    }
}

pub fn unexpected_structure(body: &str) -> String {
    format!("(unexpected response structure): {}", body)
}

pub fn unavailable(error: &RelayError) -> String {
    format!("(webhook unavailable): {}", error)
}

/// Pulls the reply out of a webhook response. A `text` key wins over `output`
/// whenever it is present; if its value is not a string the reply is the
/// placeholder. n8n may answer with an array of items, in which case the
/// first item is used.
pub fn extract_reply(body: &Value) -> WebhookReply {
    let object = match body {
        Value::Object(map) => Some(map),
        Value::Array(items) => items.first().and_then(Value::as_object),
        _ => None,
    };

    let reply = object
        .and_then(|map| map.get("text").or_else(|| map.get("output")))
        .and_then(Value::as_str);

    match reply {
        Some(text) => WebhookReply::Text(text.to_string()),
        None => WebhookReply::Unexpected(body.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    url: String,
}

impl WebhookClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    /// Sends one payload and returns the decoded JSON body. The status code is
    /// only logged: an error status with a JSON body still counts as a response.
    #[instrument(skip(self, payload), fields(session_id = %payload.session_id))]
    pub async fn relay(&self, payload: &WebhookPayload) -> Result<Value, RelayError> {
        debug!(?payload, url = %self.url, "Sending payload to webhook");

        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        let raw = response.text().await?;

        debug!(%status, %raw, "Webhook responded");
        if !status.is_success() {
            warn!(%status, "Webhook returned a non-success status");
        }

        serde_json::from_str(&raw).map_err(|e| {
            warn!("Failed to parse webhook response as JSON: {}", e);
            RelayError::InvalidJson { raw }
        })
    }
}
