//! Voice processing module
//!
//! Handles radio audio capture, utterance segmentation, transcription,
//! speech synthesis, and output-device playback.

mod capture;
mod segment;
mod sink;
mod stt;
mod tts;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use segment::{SegmenterState, UtteranceSegmenter};
pub use sink::CpalSink;
pub use stt::{Transcriber, WhisperTranscriber};
pub use tts::{SpeechSynthesizer, TextToSpeech};

/// Synthesized or captured audio with its container format
#[derive(Debug, Clone)]
pub struct AudioPayload {
    /// Encoded audio bytes
    pub bytes: Vec<u8>,
    /// Container format of `bytes`
    pub format: AudioFormat,
}

/// Audio container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// MPEG layer 3 (TTS provider output)
    Mp3,
    /// RIFF WAV, 16-bit PCM
    Wav,
}
