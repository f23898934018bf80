//! Activation matching: which persona answers an utterance
//!
//! Case-insensitive substring match of activation phrases, with sticky
//! routing to the currently open session so a multi-turn exchange does
//! not need the wake phrase on every transmission.
//!
//! Tie-break when several personas' phrases appear in one utterance, in
//! order: the currently open session, the longest matched phrase, then
//! registry declaration order. This ordering is deterministic so routing
//! is reproducible.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::persona::PersonaRegistry;

/// How a transcript was routed to a persona
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVia {
    /// An activation phrase was present in the utterance
    Activation,
    /// Routed to the open session without an explicit phrase
    Sticky,
}

/// A routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Selected persona name
    pub persona: String,
    /// How the selection was made
    pub via: MatchVia,
}

/// Matches transcripts against activation phrases
pub struct ActivationMatcher<'a> {
    registry: &'a PersonaRegistry,
}

impl<'a> ActivationMatcher<'a> {
    /// Create a matcher over the loaded registry
    #[must_use]
    pub fn new(registry: &'a PersonaRegistry) -> Self {
        Self { registry }
    }

    /// Decide which persona (if any) should handle the transcript
    ///
    /// `open_session` is the persona whose session is currently open,
    /// if one is. `None` means the transcript is marked seen and dropped.
    #[must_use]
    pub fn route(&self, text: &str, open_session: Option<&str>) -> Option<Match> {
        let lowered = text.to_lowercase();

        // All (persona, phrase) pairs present in the utterance,
        // scanned in declaration order
        let mut hits: Vec<(&str, &str)> = Vec::new();
        for profile in self.registry.profiles() {
            for phrase in &profile.activation_phrases {
                if lowered.contains(&phrase.to_lowercase()) {
                    hits.push((profile.name.as_str(), phrase.as_str()));
                }
            }
        }

        if hits.is_empty() {
            return open_session.map(|persona| {
                tracing::debug!(persona, "sticky routing to open session");
                Match {
                    persona: persona.to_string(),
                    via: MatchVia::Sticky,
                }
            });
        }

        // Prefer the open session when its phrase is among the hits
        if let Some(open) = open_session
            && hits.iter().any(|(persona, _)| *persona == open)
        {
            return Some(Match {
                persona: open.to_string(),
                via: MatchVia::Activation,
            });
        }

        // Longest matched phrase wins; declaration order breaks the rest.
        // max_by_key takes the last maximum, so scan in reverse to keep
        // the earliest-declared persona on equal phrase length.
        let (persona, phrase) = hits
            .iter()
            .rev()
            .max_by_key(|(_, phrase)| phrase.len())
            .copied()?;

        tracing::info!(persona, phrase, "activation phrase matched");
        Some(Match {
            persona: persona.to_string(),
            via: MatchVia::Activation,
        })
    }
}

/// Remembers recent persona replies so a transcription of our own
/// transmission is never answered again
///
/// Audio can leak past the feedback lock's VOX tail and come back
/// through the receiver as a fresh transcript. A transcript that
/// matches a recently spoken reply is an echo, not a caller.
pub struct EchoGuard {
    window: Duration,
    replies: VecDeque<(Instant, String)>,
}

impl EchoGuard {
    /// Replies kept regardless of age
    const CAPACITY: usize = 8;

    /// Create a guard that forgets replies older than `window`
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            replies: VecDeque::new(),
        }
    }

    /// Record a reply that is about to go on the air
    pub fn remember(&mut self, reply: &str) {
        self.forget_expired();
        self.replies.push_back((Instant::now(), normalize(reply)));
        if self.replies.len() > Self::CAPACITY {
            self.replies.pop_front();
        }
    }

    /// Whether the transcript matches a recently spoken reply
    pub fn is_echo(&mut self, transcript: &str) -> bool {
        self.forget_expired();
        let text = normalize(transcript);
        self.replies.iter().any(|(_, reply)| *reply == text)
    }

    fn forget_expired(&mut self) {
        while let Some((spoken_at, _)) = self.replies.front() {
            if spoken_at.elapsed() <= self.window {
                break;
            }
            self.replies.pop_front();
        }
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
