use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hama::llm_interaction::{ConversationMemory, ConversationModel, ModelError, ModelReply};
use hama::turn::{ReplySource, TurnError, TurnHandler, TurnOutcome};
use hama::webhook::WebhookClient;
use hama::{ConversationSession, Message, Origin};
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Answers every utterance with a canned reply and a fixed token cost.
struct CannedModel {
    tokens: u64,
    calls: AtomicUsize,
}

impl CannedModel {
    fn new(tokens: u64) -> Self {
        Self {
            tokens,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConversationModel for CannedModel {
    async fn converse(
        &self,
        _memory: &mut ConversationMemory,
        utterance: &str,
    ) -> Result<ModelReply, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ModelReply {
            text: format!("Noted: {}", utterance),
            total_tokens: self.tokens,
        })
    }
}

struct FailingModel;

#[async_trait]
impl ConversationModel for FailingModel {
    async fn converse(
        &self,
        _memory: &mut ConversationMemory,
        _utterance: &str,
    ) -> Result<ModelReply, ModelError> {
        Err(ModelError::Status {
            status: 401,
            body: "invalid api key".to_string(),
        })
    }
}

async fn webhook_answering(body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

const UNREACHABLE_WEBHOOK: &str = "http://127.0.0.1:1/webhook/hama";

#[test_log::test(tokio::test)]
async fn test_webhook_reply_is_recorded() {
    let server = webhook_answering(json!({"text": "Meeting scheduled."})).await;
    let handler = TurnHandler::webhook_only(WebhookClient::new(server.uri()));
    let mut session = ConversationSession::new();
    session.pending_input = "Schedule a meeting tomorrow".to_string();

    let outcome = handler
        .submit_turn("Schedule a meeting tomorrow", &mut session)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            reply: "Meeting scheduled.".to_string(),
            usage: 0
        }
    );
    assert_eq!(
        session.transcript(),
        &[
            Message::human("Schedule a meeting tomorrow"),
            Message::ai("Meeting scheduled.")
        ]
    );
    assert_eq!(session.token_count(), 0);
    assert_eq!(session.pending_input, "");
}

#[tokio::test]
async fn test_unexpected_webhook_shape_becomes_placeholder() {
    let server = webhook_answering(json!({"unexpected_field": 1})).await;
    let handler = TurnHandler::webhook_only(WebhookClient::new(server.uri()));
    let mut session = ConversationSession::new();

    handler.submit_turn("Hello", &mut session).await.unwrap();

    let reply = &session.transcript()[1];
    assert_eq!(reply.origin, Origin::Ai);
    assert!(reply.text.starts_with("(unexpected response structure)"));
    assert!(reply.text.contains("unexpected_field"));
}

#[test_log::test(tokio::test)]
async fn test_webhook_connection_error_still_completes_turn() {
    let handler = TurnHandler::webhook_only(WebhookClient::new(UNREACHABLE_WEBHOOK));
    let mut session = ConversationSession::new();

    let outcome = handler.submit_turn("Hello", &mut session).await;

    assert!(outcome.is_ok());
    assert_eq!(session.transcript().len(), 2);
    assert!(session.transcript()[1].text.starts_with("(webhook unavailable)"));
}

#[tokio::test]
async fn test_session_id_is_sent_unchanged_every_turn() {
    let server = webhook_answering(json!({"output": "ok"})).await;
    let handler = TurnHandler::webhook_only(WebhookClient::new(server.uri()));
    let mut session = ConversationSession::new();
    let session_id = session.session_id().to_string();

    for utterance in ["first", "second", "third"] {
        handler.submit_turn(utterance, &mut session).await.unwrap();
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    for (request, utterance) in requests.iter().zip(["first", "second", "third"]) {
        let body: serde_json::Value = request.body_json().unwrap();
        assert_eq!(body, json!({"user_input": utterance, "session_id": session_id}));
    }
    assert_eq!(session.session_id(), session_id);
    assert_eq!(session.transcript().len(), 6);
}

#[tokio::test]
async fn test_blank_input_sends_nothing() {
    let server = webhook_answering(json!({"text": "unused"})).await;
    let handler = TurnHandler::webhook_only(WebhookClient::new(server.uri()));
    let mut session = ConversationSession::new();

    let outcome = handler.submit_turn(" \t\n", &mut session).await.unwrap();

    assert_eq!(outcome, TurnOutcome::Skipped);
    assert!(session.transcript().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_model_reply_and_usage_accumulate() {
    let server = webhook_answering(json!({"text": "ignored in model mode"})).await;
    let model = Arc::new(CannedModel::new(42));
    let handler = TurnHandler::with_model(WebhookClient::new(server.uri()), model.clone());
    let mut session = ConversationSession::new();
    assert_eq!(handler.reply_source(), ReplySource::Model);

    handler.submit_turn("Lunch at noon", &mut session).await.unwrap();
    handler.submit_turn("Move it to one", &mut session).await.unwrap();

    assert_eq!(session.token_count(), 84);
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(session.transcript()[1], Message::ai("Noted: Lunch at noon"));
    assert_eq!(session.transcript()[3], Message::ai("Noted: Move it to one"));
    // The webhook is still notified on every turn.
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_webhook_failure_does_not_suppress_model() {
    let model = Arc::new(CannedModel::new(10));
    let handler = TurnHandler::with_model(WebhookClient::new(UNREACHABLE_WEBHOOK), model.clone());
    let mut session = ConversationSession::new();

    handler.submit_turn("Hello", &mut session).await.unwrap();

    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.transcript()[1], Message::ai("Noted: Hello"));
    assert_eq!(session.token_count(), 10);
}

#[tokio::test]
async fn test_model_failure_is_surfaced_and_nothing_recorded() {
    let server = webhook_answering(json!({"text": "ok"})).await;
    let handler = TurnHandler::with_model(WebhookClient::new(server.uri()), Arc::new(FailingModel));
    let mut session = ConversationSession::new();
    session.pending_input = "Cancel my 3pm".to_string();

    let err = handler
        .submit_turn("Cancel my 3pm", &mut session)
        .await
        .unwrap_err();

    assert!(matches!(err, TurnError::Model(ModelError::Status { status: 401, .. })));
    assert!(session.transcript().is_empty());
    assert_eq!(session.token_count(), 0);
    assert_eq!(session.pending_input, "Cancel my 3pm");
}
