//! Receiver: radio capture to published transcripts
//!
//! Owns the capture device and the segmenter, and publishes every real
//! utterance to the transcript store. While the feedback lock is held the
//! incoming audio is our own transmission, so captured samples are
//! discarded and any partial segment is thrown away.

use std::time::Duration;

use crate::config::Config;
use crate::feedback::FeedbackLock;
use crate::transcript::{TranscriptRecord, TranscriptStore};
use crate::voice::{samples_to_wav, AudioCapture, Transcriber, UtteranceSegmenter, SAMPLE_RATE};
use crate::Result;

/// How often captured samples are drained from the device buffer
const CAPTURE_POLL: Duration = Duration::from_millis(100);

/// Transcripts with no conversational content, produced by STT models
/// when fed static or silence
const JUNK_TRANSCRIPTS: &[&str] = &[".", ". . .", "you"];

/// Capture-side pipeline: audio in, transcript files out
pub struct Receiver {
    capture: AudioCapture,
    segmenter: UtteranceSegmenter,
    transcriber: Box<dyn Transcriber>,
    store: TranscriptStore,
    lock: FeedbackLock,
    source_channel: String,
}

impl Receiver {
    /// Build the receiver from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the capture device or transcript store cannot be
    /// opened.
    pub fn new(config: &Config, transcriber: Box<dyn Transcriber>) -> Result<Self> {
        let capture = AudioCapture::new()?;
        let segmenter = UtteranceSegmenter::new(
            SAMPLE_RATE,
            config.capture.audio_threshold,
            config.capture.silence_secs,
            config.capture.min_utterance_secs,
            config.capture.max_utterance_secs,
            config.capture.pre_roll_secs,
        );
        let store = TranscriptStore::open(&config.transcriptions_dir, &config.processed_dir)?;
        let lock = FeedbackLock::new(&config.lock_path, config.playback.lock_stale_secs);

        Ok(Self {
            capture,
            segmenter,
            transcriber,
            store,
            lock,
            source_channel: "radio".to_string(),
        })
    }

    /// Run the capture loop until the task is cancelled
    ///
    /// # Errors
    ///
    /// Returns error if the capture stream cannot be started; STT and
    /// store failures are logged and the loop continues.
    pub async fn run(&mut self) -> Result<()> {
        self.capture.start()?;
        tracing::info!("receiver listening");

        loop {
            tokio::time::sleep(CAPTURE_POLL).await;

            let samples = self.capture.take_buffer();

            if self.lock.is_held() {
                // Our own transmission is on the air
                self.segmenter.reset();
                continue;
            }

            if samples.is_empty() {
                continue;
            }

            let Some(segment) = self.segmenter.push(&samples) else {
                continue;
            };

            if let Err(e) = self.handle_segment(&segment).await {
                tracing::error!(error = %e, "segment discarded");
            }
        }
    }

    /// Transcribe one closed segment and publish it
    async fn handle_segment(&self, segment: &[f32]) -> Result<()> {
        let wav = samples_to_wav(segment, SAMPLE_RATE)?;
        let raw = self.transcriber.transcribe(&wav).await?;
        let text = raw.trim();

        if is_junk(text) {
            tracing::debug!(transcript = %text, "junk transcript dropped");
            return Ok(());
        }

        let record = TranscriptRecord::new(text, &self.source_channel);
        self.store.write(&record).await?;
        tracing::info!(transcript = %text, id = %record.id, "transcript published");
        Ok(())
    }
}

/// Whether a transcript carries no conversational content
#[must_use]
pub fn is_junk(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    let lowered = text.to_lowercase();
    JUNK_TRANSCRIPTS.contains(&lowered.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn junk_transcripts_are_filtered() {
        assert!(is_junk(""));
        assert!(is_junk("."));
        assert!(is_junk(". . ."));
        assert!(is_junk("you"));
        assert!(is_junk("You"));
    }

    #[test]
    fn real_utterances_pass() {
        assert!(!is_junk("Hey Dude, you got your ears on?"));
        assert!(!is_junk("you there"));
        assert!(!is_junk("10-4"));
    }
}
