//! Radio audio capture
//!
//! Pulls mono samples off the radio line-in into a shared buffer that
//! the receiver loop drains on its own schedule. The device is resolved
//! once at construction and reused for every stream start.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Capture sample rate; 16 kHz mono is what the STT models expect
pub const SAMPLE_RATE: u32 = 16000;

/// Mono capture from the default input device
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device at the capture rate
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if there is no input device or it does not
    /// support 16 kHz mono.
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;
        let config = mono_config(&device)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start streaming samples into the buffer; idempotent
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the input stream cannot be built or
    /// started.
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| tracing::error!(error = %err, "audio capture error"),
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop the input stream
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
    }

    /// Drain everything captured since the last call
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// The capture sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Find a mono input config supporting the capture rate
fn mono_config(device: &Device) -> Result<StreamConfig> {
    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no mono input config at 16 kHz".to_string()))?;
    Ok(supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config())
}

/// Encode f32 samples as 16-bit PCM WAV for the STT APIs
///
/// # Errors
///
/// Returns `Error::Audio` if WAV encoding fails.
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_err)?;
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let quantized = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer.write_sample(quantized).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;

    Ok(cursor.into_inner())
}

fn wav_err(e: hound::Error) -> Error {
    Error::Audio(e.to_string())
}
