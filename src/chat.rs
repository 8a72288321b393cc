// Terminal chat: the same turn handler as the web UI, driven from stdin.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info};

use crate::turn::{TurnHandler, TurnOutcome};
use crate::ConversationSession;

const QUIT_COMMAND: &str = "/quit";

/// Reads utterances line by line until EOF or `/quit`, printing each reply.
/// Returns the finished session so callers can inspect the transcript.
pub async fn run_chat<R, W>(handler: &TurnHandler, input: R, mut output: W) -> Result<ConversationSession>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = ConversationSession::new();
    info!(session_id = %session.session_id(), "Starting chat session...");
    output
        .write_all(b"Type a message, or /quit to leave.\n> ")
        .await?;
    output.flush().await?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == QUIT_COMMAND {
            break;
        }
        session.pending_input = line.clone();

        let text = match handler.submit_turn(&line, &mut session).await {
            Ok(TurnOutcome::Completed { reply, .. }) => {
                format!("hama: {}\n[tokens used: {}]\n", reply, session.token_count())
            }
            Ok(TurnOutcome::Skipped) => String::new(),
            Err(e) => {
                error!("Turn failed: {}", e);
                format!("error: {}\n", e)
            }
        };
        output.write_all(text.as_bytes()).await?;
        output.write_all(b"> ").await?;
        output.flush().await?;
    }

    output.write_all(b"\n").await?;
    output.flush().await?;
    info!(turns = session.transcript().len() / 2, "Chat session finished");
    Ok(session)
}
