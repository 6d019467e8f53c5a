//! Session types: conversation turns and the per-user state they
//! accumulate into.

use serde::{Deserialize, Serialize};

/// How many turns a session retains. Older turns are dropped first and
/// are irretrievably lost — a cost/latency trade-off, not a cache.
pub const HISTORY_LIMIT: usize = 20;

/// Speaker role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    /// Message sent by the user
    User,
    /// Reply produced by the model
    Assistant,
}

impl ChatRole {
    /// Wire representation used in completion requests.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a conversation, tagged with its speaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: ChatRole,
    pub content: String,
}

impl Turn {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Per-user accumulated conversational and preference state.
///
/// Created lazily on first interaction and kept in memory for the
/// process lifetime. `system_prompt` and `model` are overrides; `None`
/// falls back to the process-wide defaults held by the manager.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Chronological turns, at most [`HISTORY_LIMIT`] after any update.
    pub history: Vec<Turn>,
    /// Custom system prompt, if the user installed one.
    pub system_prompt: Option<String>,
    /// Selected catalog key, if the user picked a model.
    pub model: Option<String>,
}

impl Session {
    /// Append a turn and trim the window to the most recent
    /// [`HISTORY_LIMIT`] entries.
    pub fn push(&mut self, role: ChatRole, content: impl Into<String>) {
        self.history.push(Turn::new(role, content));
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }
}
