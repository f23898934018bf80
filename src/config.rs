//! Configuration for the dispatch gateway
//!
//! Layered: built-in defaults, then an optional TOML file at
//! `~/.config/dispatch-gateway/config.toml`, then environment variables
//! for credentials and path overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Environment variable holding the OpenAI API key (LLM, Whisper, TTS)
const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable holding the UnrealSpeech API key (optional TTS)
const UNREALSPEECH_KEY_ENV: &str = "UNREALSPEECH_API_KEY";

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory (transcript queue, lock file, conversation record)
    pub data_dir: PathBuf,

    /// Pending transcript records written by the receiver
    pub transcriptions_dir: PathBuf,

    /// Consumed transcript records
    pub processed_dir: PathBuf,

    /// Append-only conversation record (JSONL)
    pub conversation_log: PathBuf,

    /// Feedback lock file shared between receiver and transmitter
    pub lock_path: PathBuf,

    /// Root directory holding persona profile directories
    pub personas_dir: PathBuf,

    /// API keys
    pub api_keys: ApiKeys,

    /// Language model settings
    pub llm: LlmConfig,

    /// Speech-to-text settings
    pub stt: SttConfig,

    /// Text-to-speech settings
    pub tts: TtsConfig,

    /// Audio capture / utterance segmentation settings
    pub capture: CaptureConfig,

    /// Conversation session settings
    pub session: SessionConfig,

    /// Playback queue settings
    pub playback: PlaybackConfig,

    /// Per-tool execution timeout in seconds
    pub tool_timeout_secs: u64,

    /// Transcript consumer poll backoff bounds in milliseconds
    pub poll_min_ms: u64,
    pub poll_max_ms: u64,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// OpenAI API key (chat completions, Whisper, TTS)
    pub openai: Option<String>,

    /// UnrealSpeech API key (alternative TTS provider)
    pub unrealspeech: Option<String>,
}

/// Language model settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat completion model identifier
    pub model: String,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

/// Speech-to-text settings
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Whisper model identifier
    pub model: String,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

/// Text-to-speech settings
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Provider name: "openai" or "unrealspeech"
    pub provider: String,

    /// OpenAI TTS model identifier
    pub model: String,

    /// Voice used when a persona has no mapping for the provider
    pub default_voice: String,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

/// Audio capture / utterance segmentation settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// RMS energy above which a chunk counts as speech
    pub audio_threshold: f32,

    /// Trailing silence that ends an utterance, in seconds
    pub silence_secs: f32,

    /// Minimum utterance length worth transcribing, in seconds
    pub min_utterance_secs: f32,

    /// Hard cap on utterance length, in seconds
    pub max_utterance_secs: f32,

    /// Audio retained from before speech onset, in seconds
    pub pre_roll_secs: f32,
}

/// Conversation session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum turns retained in a session history
    pub history_limit: usize,

    /// Age after which history turns are evicted, in seconds
    pub context_expiration_secs: u64,

    /// Idle time after which a sticky session closes, in seconds
    pub conversation_timeout_secs: u64,

    /// Spoken when the model or a tool fails and no persona fallback is set
    pub fallback_utterance: String,
}

/// Playback queue settings
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Bounded queue capacity
    pub queue_size: usize,

    /// Delay after playback before releasing the lock, covering
    /// VOX dropout on the transmit radio, in milliseconds
    pub vox_tail_ms: u64,

    /// Feedback lock held longer than this is force-released
    pub lock_stale_secs: u64,
}

/// Optional on-disk overrides, all fields optional
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    personas_dir: Option<PathBuf>,
    lock_path: Option<PathBuf>,
    llm_model: Option<String>,
    llm_timeout_secs: Option<u64>,
    stt_model: Option<String>,
    tts_provider: Option<String>,
    tts_model: Option<String>,
    default_voice: Option<String>,
    audio_threshold: Option<f32>,
    silence_secs: Option<f32>,
    min_utterance_secs: Option<f32>,
    max_utterance_secs: Option<f32>,
    pre_roll_secs: Option<f32>,
    history_limit: Option<usize>,
    context_expiration_secs: Option<u64>,
    conversation_timeout_secs: Option<u64>,
    fallback_utterance: Option<String>,
    queue_size: Option<usize>,
    vox_tail_ms: Option<u64>,
    lock_stale_secs: Option<u64>,
    tool_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from defaults, the optional config file, and
    /// the environment
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the config file exists but cannot be
    /// parsed, or `Error::Toml` on malformed TOML.
    pub fn load() -> Result<Self> {
        let file = load_file_config(&config_file_path())?;
        Ok(Self::from_parts(file))
    }

    /// Load configuration from an explicit config file path (tests)
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let file = load_file_config(path)?;
        Ok(Self::from_parts(file))
    }

    fn from_parts(file: FileConfig) -> Self {
        let data_dir = std::env::var("DISPATCH_DATA_DIR")
            .map(PathBuf::from)
            .ok()
            .or(file.data_dir)
            .unwrap_or_else(default_data_dir);

        let personas_dir = file
            .personas_dir
            .unwrap_or_else(|| PathBuf::from("personas"));
        let lock_path = file
            .lock_path
            .unwrap_or_else(|| data_dir.join("tx_rx.lock"));

        Self {
            transcriptions_dir: data_dir.join("transcriptions"),
            processed_dir: data_dir.join("processed_transcriptions"),
            conversation_log: data_dir.join("conversation_log.jsonl"),
            lock_path,
            personas_dir,
            data_dir,
            api_keys: ApiKeys {
                openai: std::env::var(OPENAI_KEY_ENV).ok(),
                unrealspeech: std::env::var(UNREALSPEECH_KEY_ENV).ok(),
            },
            llm: LlmConfig {
                model: file.llm_model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
                timeout_secs: file.llm_timeout_secs.unwrap_or(30),
            },
            stt: SttConfig {
                model: file.stt_model.unwrap_or_else(|| "whisper-1".to_string()),
                timeout_secs: 30,
            },
            tts: TtsConfig {
                provider: file.tts_provider.unwrap_or_else(|| "openai".to_string()),
                model: file.tts_model.unwrap_or_else(|| "tts-1".to_string()),
                default_voice: file.default_voice.unwrap_or_else(|| "onyx".to_string()),
                timeout_secs: 30,
            },
            capture: CaptureConfig {
                audio_threshold: file.audio_threshold.unwrap_or(0.001),
                silence_secs: file.silence_secs.unwrap_or(1.0),
                min_utterance_secs: file.min_utterance_secs.unwrap_or(0.5),
                max_utterance_secs: file.max_utterance_secs.unwrap_or(30.0),
                pre_roll_secs: file.pre_roll_secs.unwrap_or(0.5),
            },
            session: SessionConfig {
                history_limit: file.history_limit.unwrap_or(20),
                context_expiration_secs: file.context_expiration_secs.unwrap_or(300),
                conversation_timeout_secs: file.conversation_timeout_secs.unwrap_or(300),
                fallback_utterance: file.fallback_utterance.unwrap_or_else(|| {
                    "Unable to reach dispatch data, stand by.".to_string()
                }),
            },
            playback: PlaybackConfig {
                queue_size: file.queue_size.unwrap_or(10),
                vox_tail_ms: file.vox_tail_ms.unwrap_or(1000),
                lock_stale_secs: file.lock_stale_secs.unwrap_or(30),
            },
            tool_timeout_secs: file.tool_timeout_secs.unwrap_or(10),
            poll_min_ms: 250,
            poll_max_ms: 2000,
        }
    }

    /// Directory holding persona files for the named profile
    #[must_use]
    pub fn profile_dir(&self, profile: &str) -> PathBuf {
        self.personas_dir.join(profile)
    }

    /// OpenAI API key, or a fatal config error
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the key is not set.
    pub fn require_openai_key(&self) -> Result<&str> {
        self.api_keys
            .openai
            .as_deref()
            .ok_or_else(|| Error::Config(format!("{OPENAI_KEY_ENV} is not set")))
    }

    /// Create the data directories this process writes to
    ///
    /// # Errors
    ///
    /// Returns error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.transcriptions_dir)?;
        std::fs::create_dir_all(&self.processed_dir)?;
        Ok(())
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let parsed = toml::from_str(&raw)?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(parsed)
}

/// Default config file location: `~/.config/dispatch-gateway/config.toml`
fn config_file_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".config/dispatch-gateway/config.toml"),
        |d| d.config_dir().join("dispatch-gateway").join("config.toml"),
    )
}

/// Default data directory: `~/.local/share/dispatch-gateway/`
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("data"),
        |d| d.data_dir().join("dispatch-gateway"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config_file() {
        let config = Config::from_parts(FileConfig::default());
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.tts.provider, "openai");
        assert_eq!(config.session.history_limit, 20);
        assert_eq!(config.playback.queue_size, 10);
        assert_eq!(config.playback.lock_stale_secs, 30);
        assert!(config.transcriptions_dir.starts_with(&config.data_dir));
    }

    #[test]
    fn file_values_override_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            llm_model = "gpt-4o"
            history_limit = 8
            vox_tail_ms = 250
            fallback_utterance = "say again, over"
            "#,
        )
        .unwrap();
        let config = Config::from_parts(file);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.session.history_limit, 8);
        assert_eq!(config.playback.vox_tail_ms, 250);
        assert_eq!(config.session.fallback_utterance, "say again, over");
    }

    #[test]
    fn profile_dir_joins_personas_root() {
        let config = Config::from_parts(FileConfig {
            personas_dir: Some(PathBuf::from("/opt/personas")),
            ..FileConfig::default()
        });
        assert_eq!(
            config.profile_dir("grocery_store"),
            PathBuf::from("/opt/personas/grocery_store")
        );
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        // FileConfig is not deny_unknown_fields; stray keys are tolerated
        // so older config files keep working
        let parsed: std::result::Result<FileConfig, _> =
            toml::from_str("no_such_key = true");
        assert!(parsed.is_ok());
    }
}
