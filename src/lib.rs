//! Dispatch Gateway - AI dispatch personas on a two-way radio channel
//!
//! This library provides the core functionality for the dispatch gateway:
//! - Radio audio capture and VOX-style utterance segmentation
//! - Speech-to-text and the durable transcript queue
//! - Activation-phrase routing to persona sessions
//! - Two-pass tool-augmented exchanges with the language model
//! - Speech synthesis and serialized, feedback-locked playback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Receiver process                     │
//! │   Capture  │  Segmenter  │  STT  │  Junk filter      │
//! └────────────────────┬─────────────────────────────────┘
//!                      │  transcript files
//! ┌────────────────────▼─────────────────────────────────┐
//! │                Transmitter process                    │
//! │   Matcher  │  Sessions  │  LLM + Tools  │  TTS       │
//! └────────────────────┬─────────────────────────────────┘
//!                      │  playback queue
//! ┌────────────────────▼─────────────────────────────────┐
//! │      Radio TX  (feedback lock shared with RX)         │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod feedback;
pub mod llm;
pub mod matcher;
pub mod orchestrator;
pub mod persona;
pub mod playback;
pub mod record;
pub mod receiver;
pub mod session;
pub mod tools;
pub mod transcript;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result, ToolError};
pub use feedback::{FeedbackLock, LockGuard};
pub use llm::{ChatMessage, LanguageModel, OpenAiChat, ToolDirective};
pub use matcher::{ActivationMatcher, EchoGuard, Match, MatchVia};
pub use orchestrator::Orchestrator;
pub use persona::{PersonaProfile, PersonaRegistry};
pub use playback::{AudioSink, PlaybackJob, PlaybackQueue};
pub use record::{ConversationLog, RecordEntry};
pub use receiver::Receiver;
pub use session::{ConversationSession, Role, Turn, TurnState};
pub use tools::{InventoryLookupTool, Tool, ToolRegistry};
pub use transcript::{TranscriptRecord, TranscriptStore};
