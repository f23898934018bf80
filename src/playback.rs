//! Playback queue: serialized, non-overlapping radio transmissions
//!
//! Jobs are played strictly in enqueue order by a single drain task —
//! the one hard mutual-exclusion boundary in the system. The drain task
//! holds the feedback lock for exactly the duration of each playback
//! plus a trailing VOX-dropout delay, so the capture side never hears
//! our own transmission. A failed job is dropped, not retried: a stale
//! replayed utterance would only confuse the listener.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::feedback::FeedbackLock;
use crate::voice::AudioPayload;
use crate::{Error, Result};

/// A synthesized reply waiting for the transmitter
#[derive(Debug)]
pub struct PlaybackJob {
    /// Synthesized audio
    pub audio: AudioPayload,

    /// Persona that produced the reply (for logs)
    pub persona_name: String,

    /// When the job entered the queue
    pub enqueued_at: DateTime<Utc>,
}

impl PlaybackJob {
    /// Create a job enqueued now
    #[must_use]
    pub fn new(audio: AudioPayload, persona_name: impl Into<String>) -> Self {
        Self {
            audio,
            persona_name: persona_name.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Plays one audio payload to completion
///
/// The production sink drives the transmit radio via the default output
/// device; tests substitute a recording sink.
#[async_trait]
pub trait AudioSink: Send {
    /// Play the payload, returning when playback has finished
    ///
    /// # Errors
    ///
    /// Returns error on device or decode failure.
    async fn play(&mut self, audio: &AudioPayload) -> Result<()>;
}

/// Sending half of the playback queue
#[derive(Clone)]
pub struct PlaybackQueue {
    tx: mpsc::Sender<PlaybackJob>,
}

impl PlaybackQueue {
    /// Start the queue and its drain task
    ///
    /// Returns the enqueue handle and the drain task handle; the task
    /// exits once every enqueue handle is dropped and the queue empties,
    /// which is how shutdown drains without leaving the lock held.
    #[must_use]
    pub fn spawn(
        mut sink: Box<dyn AudioSink>,
        lock: FeedbackLock,
        queue_size: usize,
        vox_tail: std::time::Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<PlaybackJob>(queue_size.max(1));

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let waited_ms = Utc::now()
                    .signed_duration_since(job.enqueued_at)
                    .num_milliseconds();
                tracing::info!(
                    persona = %job.persona_name,
                    queued_ms = waited_ms,
                    "transmitting reply"
                );

                let guard = match lock.acquire().await {
                    Ok(guard) => guard,
                    Err(e) => {
                        tracing::error!(error = %e, "cannot acquire feedback lock; job dropped");
                        continue;
                    }
                };

                if let Err(e) = sink.play(&job.audio).await {
                    tracing::error!(
                        persona = %job.persona_name,
                        error = %e,
                        "playback failed; job dropped"
                    );
                } else {
                    // Keep the lock through the VOX dropout so the tail of
                    // our transmission is not captured
                    tokio::time::sleep(vox_tail).await;
                }

                drop(guard);
            }
            tracing::debug!("playback queue drained");
        });

        (Self { tx }, handle)
    }

    /// Enqueue a job for FIFO transmission
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if the queue is full or shut down.
    pub async fn enqueue(&self, job: PlaybackJob) -> Result<()> {
        self.tx
            .try_send(job)
            .map_err(|e| Error::Playback(format!("queue rejected job: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::voice::AudioFormat;

    /// Sink that records play order and asserts non-overlap via the lock
    struct RecordingSink {
        played: Arc<Mutex<Vec<String>>>,
        lock: FeedbackLock,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&mut self, audio: &AudioPayload) -> Result<()> {
            // The drain task must hold the lock while we play
            assert!(self.lock.is_held());
            let label = String::from_utf8_lossy(&audio.bytes).into_owned();
            if self.fail_on.as_deref() == Some(label.as_str()) {
                return Err(Error::Playback("device error".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.played.lock().unwrap().push(label);
            Ok(())
        }
    }

    fn payload(label: &str) -> AudioPayload {
        AudioPayload {
            bytes: label.as_bytes().to_vec(),
            format: AudioFormat::Mp3,
        }
    }

    #[allow(clippy::type_complexity)]
    fn harness(
        fail_on: Option<&str>,
    ) -> (tempfile::TempDir, PlaybackQueue, JoinHandle<()>, Arc<Mutex<Vec<String>>>, FeedbackLock)
    {
        let dir = tempfile::tempdir().unwrap();
        let lock = FeedbackLock::new(&dir.path().join("tx.lock"), 30);
        let played = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            played: Arc::clone(&played),
            lock: lock.clone(),
            fail_on: fail_on.map(ToString::to_string),
        };
        let (queue, handle) =
            PlaybackQueue::spawn(Box::new(sink), lock.clone(), 10, Duration::from_millis(1));
        (dir, queue, handle, played, lock)
    }

    #[tokio::test]
    async fn jobs_play_in_enqueue_order() {
        let (_dir, queue, handle, played, lock) = harness(None);

        for label in ["j1", "j2", "j3"] {
            queue.enqueue(PlaybackJob::new(payload(label), "dispatch")).await.unwrap();
        }
        drop(queue);
        handle.await.unwrap();

        assert_eq!(*played.lock().unwrap(), ["j1", "j2", "j3"]);
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn failed_job_is_dropped_and_queue_continues() {
        let (_dir, queue, handle, played, lock) = harness(Some("bad"));

        queue.enqueue(PlaybackJob::new(payload("ok1"), "dispatch")).await.unwrap();
        queue.enqueue(PlaybackJob::new(payload("bad"), "dispatch")).await.unwrap();
        queue.enqueue(PlaybackJob::new(payload("ok2"), "dispatch")).await.unwrap();
        drop(queue);
        handle.await.unwrap();

        assert_eq!(*played.lock().unwrap(), ["ok1", "ok2"]);
        // Lock released even after the failure
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn lock_is_released_between_jobs() {
        let (_dir, queue, handle, _played, lock) = harness(None);

        queue.enqueue(PlaybackJob::new(payload("only"), "dispatch")).await.unwrap();
        drop(queue);
        handle.await.unwrap();
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn concurrent_producers_never_interleave() {
        let (_dir, queue, handle, played, _lock) = harness(None);

        // Two sessions enqueue at nearly the same instant; the queue
        // serializes them FIFO by arrival
        let a = queue.clone();
        let b = queue.clone();
        let ta = tokio::spawn(async move {
            a.enqueue(PlaybackJob::new(payload("dispatch-reply"), "dispatch")).await
        });
        let tb = tokio::spawn(async move {
            b.enqueue(PlaybackJob::new(payload("logistics-reply"), "logistics")).await
        });
        ta.await.unwrap().unwrap();
        tb.await.unwrap().unwrap();

        drop(queue);
        handle.await.unwrap();

        let played = played.lock().unwrap();
        assert_eq!(played.len(), 2);
        assert!(played.contains(&"dispatch-reply".to_string()));
        assert!(played.contains(&"logistics-reply".to_string()));
    }
}
