//! VOX-style utterance segmentation
//!
//! Gates the raw capture stream on RMS energy and cuts it into discrete
//! utterances: a segment opens when energy crosses the threshold, closes
//! after sustained silence, and is force-cut at the maximum duration so a
//! stuck squelch cannot grow a segment without bound. A short pre-roll
//! ring buffer is prepended so the attack of the first word survives.

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech, maintaining the pre-roll buffer
    Idle,
    /// Inside an utterance, accumulating
    Capturing,
}

/// Cuts a continuous sample stream into energy-gated utterances
pub struct UtteranceSegmenter {
    threshold: f32,
    silence_samples: usize,
    min_samples: usize,
    max_samples: usize,
    pre_roll_samples: usize,

    state: SegmenterState,
    pre_roll: Vec<f32>,
    buffer: Vec<f32>,
    silence_counter: usize,
}

impl UtteranceSegmenter {
    /// Create a segmenter
    ///
    /// Durations are in seconds of audio at `sample_rate`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(
        sample_rate: u32,
        threshold: f32,
        silence_secs: f32,
        min_utterance_secs: f32,
        max_utterance_secs: f32,
        pre_roll_secs: f32,
    ) -> Self {
        let rate = sample_rate as f32;
        Self {
            threshold,
            silence_samples: (silence_secs * rate) as usize,
            min_samples: (min_utterance_secs * rate) as usize,
            max_samples: (max_utterance_secs * rate) as usize,
            pre_roll_samples: (pre_roll_secs * rate) as usize,
            state: SegmenterState::Idle,
            pre_roll: Vec::new(),
            buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed a chunk of samples; returns a completed utterance if one closed
    ///
    /// Segments shorter than the minimum duration are dropped as squelch
    /// noise. A segment reaching the maximum duration is cut immediately.
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let is_speech = rms_energy(samples) > self.threshold;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Capturing;
                    self.buffer = std::mem::take(&mut self.pre_roll);
                    self.buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!("utterance opened");
                } else {
                    self.pre_roll.extend_from_slice(samples);
                    let excess = self.pre_roll.len().saturating_sub(self.pre_roll_samples);
                    if excess > 0 {
                        self.pre_roll.drain(..excess);
                    }
                }
                None
            }
            SegmenterState::Capturing => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.buffer.len() >= self.max_samples {
                    tracing::debug!(samples = self.buffer.len(), "utterance force-cut at max duration");
                    return self.close();
                }

                if self.silence_counter >= self.silence_samples {
                    return self.close();
                }

                None
            }
        }
    }

    /// Discard any partial segment and return to idle
    ///
    /// Called while the feedback lock is held so our own transmission
    /// never becomes a segment.
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.buffer.clear();
        self.pre_roll.clear();
        self.silence_counter = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    fn close(&mut self) -> Option<Vec<f32>> {
        let segment = std::mem::take(&mut self.buffer);
        let trailing_silence = self.silence_counter;
        self.state = SegmenterState::Idle;
        self.silence_counter = 0;

        // Trailing silence is part of the segment but not of its length
        // for the minimum check, or the silence window alone would pass it
        let voiced = segment.len().saturating_sub(trailing_silence);
        if voiced < self.min_samples {
            tracing::trace!(samples = voiced, "segment below minimum, dropped");
            return None;
        }
        tracing::debug!(samples = segment.len(), "utterance closed");
        Some(segment)
    }
}

/// RMS energy of a sample chunk
#[allow(clippy::cast_precision_loss)]
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
