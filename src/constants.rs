// Defaults for the relay targets. The CLI flags read their environment
// overrides (HAMA_WEBHOOK_URL, HAMA_CHAT_MODEL, OPENAI_BASE_URL) through clap.

use std::env;
use std::time::Duration;

/// The n8n workflow that receives every utterance.
pub const DEFAULT_WEBHOOK_URL: &str =
    "https://n8n.1000.school/webhook/7ea84bd5-4ca5-4991-a636-59fb4a8cdc64";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_PAGE_TITLE: &str = "일정 관리 도우미 HAMA 🦛";
pub const DEFAULT_PORT: u16 = 8501;

/// Name of the cookie carrying the session id in the web UI.
pub const SESSION_COOKIE: &str = "hama_session";

/// Web sessions idle longer than this are dropped; also the cookie Max-Age.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// Use lazy_static to read the environment once.
lazy_static::lazy_static! {
    // Secret; never exposed as a CLI flag.
    pub static ref OPENAI_API_KEY: Option<String> = env::var("OPENAI_API_KEY").ok().filter(|key| !key.trim().is_empty());
}
