pub mod chat;
pub mod config;
pub mod constants;
pub mod llm_interaction;
pub mod turn;
pub mod web_server;
pub mod webhook;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm_interaction::ConversationMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Human,
    Ai,
}

/// One utterance in the transcript. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub origin: Origin,
    pub text: String,
}

impl Message {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            origin: Origin::Human,
            text: text.into(),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            origin: Origin::Ai,
            text: text.into(),
        }
    }
}

/// Per-user conversation state. Lives in memory only and is dropped when the
/// session ends.
#[derive(Debug)]
pub struct ConversationSession {
    session_id: String,
    transcript: Vec<Message>,
    token_count: u64,
    pub pending_input: String,
    memory: ConversationMemory,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            transcript: Vec::new(),
            token_count: 0,
            pending_input: String::new(),
            memory: ConversationMemory::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut ConversationMemory {
        &mut self.memory
    }

    /// Records a completed turn: the human line first, then the reply.
    pub(crate) fn record_turn(&mut self, utterance: &str, reply: String, usage: u64) {
        self.transcript.push(Message::human(utterance));
        self.transcript.push(Message::ai(reply));
        self.token_count = self.token_count.saturating_add(usage);
        self.pending_input.clear();
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}
