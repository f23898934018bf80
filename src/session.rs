//! Conversation sessions
//!
//! One session per active persona, exclusively owned by that persona's
//! worker task. History is bounded two ways: a turn-count cap and an
//! age-based expiration, so the context window sent to the model stays
//! small and recent.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A transcribed radio utterance
    User,
    /// A persona reply
    Assistant,
    /// A tool result (or tool failure) folded into the exchange
    Tool,
}

/// One turn of a conversation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Turn {
    /// When the turn was appended
    pub timestamp: DateTime<Utc>,

    /// Who produced it
    pub role: Role,

    /// Turn content
    pub content: String,
}

impl Turn {
    /// Create a turn stamped now
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            role,
            content: content.into(),
        }
    }
}

/// Per-turn orchestration state
///
/// The session itself persists across turns; this tracks where the
/// current turn is in the two-pass protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// Waiting for a routed transcript
    #[default]
    Idle,
    /// A prompt is out to the language model
    AwaitingModel,
    /// A tool call is in flight
    AwaitingTool,
    /// Reply ready; synthesizing and enqueueing playback
    Finalizing,
}

/// A persona's conversation state
#[derive(Debug)]
pub struct ConversationSession {
    /// Owning persona
    pub persona_name: String,

    /// Ordered turns, oldest first
    history: Vec<Turn>,

    /// Current turn state
    pub state: TurnState,

    history_limit: usize,
    context_expiration: Duration,
}

impl ConversationSession {
    /// Open a session for a persona
    #[must_use]
    pub fn new(persona_name: impl Into<String>, history_limit: usize, expiration_secs: u64) -> Self {
        Self {
            persona_name: persona_name.into(),
            history: Vec::new(),
            state: TurnState::default(),
            history_limit,
            context_expiration: Duration::seconds(i64::try_from(expiration_secs).unwrap_or(300)),
        }
    }

    /// Append a turn and trim history to the configured bounds
    pub fn push(&mut self, turn: Turn) {
        self.history.push(turn);
        self.trim();
    }

    /// Current history, oldest first
    #[must_use]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Evict turns past the age cutoff, then past the count cap
    fn trim(&mut self) {
        let cutoff = Utc::now() - self.context_expiration;
        self.history.retain(|turn| turn.timestamp >= cutoff);

        if self.history.len() > self.history_limit {
            let excess = self.history.len() - self.history_limit;
            self.history.drain(..excess);
        }
    }
}
