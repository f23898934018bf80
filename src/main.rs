use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dispatch_gateway::playback::AudioSink;
use dispatch_gateway::voice::{
    samples_to_wav, AudioCapture, AudioFormat, AudioPayload, CpalSink, SpeechSynthesizer,
    TextToSpeech, WhisperTranscriber,
};
use dispatch_gateway::{
    Config, InventoryLookupTool, OpenAiChat, Orchestrator, PersonaRegistry, Receiver, ToolRegistry,
};

/// Dispatch - AI dispatch personas on a two-way radio channel
#[derive(Parser)]
#[command(name = "dispatch", version, about)]
struct Cli {
    /// Persona profile to load (directory under the personas root)
    #[arg(short, long, env = "DISPATCH_PROFILE", default_value = "default")]
    profile: String,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Full debug logging (same as -vv)
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the receiver: capture radio audio and publish transcripts
    Receiver,
    /// Run the transmitter: consume transcripts and speak replies
    Transmitter,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Dispatch radio check, how copy?")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_filter(cli.verbose, cli.debug)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Log filter from verbosity; `--debug` forces full debug output
fn log_filter(verbose: u8, debug: bool) -> &'static str {
    if debug {
        return "debug";
    }
    match verbose {
        0 => "info,dispatch_gateway=info",
        1 => "info,dispatch_gateway=debug",
        2 => "debug",
        _ => "trace",
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;

    match cli.command {
        Command::Receiver => run_receiver(&config).await,
        Command::Transmitter => run_transmitter(config, &cli.profile).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

/// Run the capture-side pipeline until interrupted
#[allow(clippy::future_not_send)]
async fn run_receiver(config: &Config) -> anyhow::Result<()> {
    config.ensure_dirs()?;
    let api_key = config.require_openai_key()?.to_string();

    let transcriber = WhisperTranscriber::new(
        api_key,
        config.stt.model.clone(),
        config.stt.timeout_secs,
    )?;
    let mut receiver = Receiver::new(config, Box::new(transcriber))?;

    tracing::info!("dispatch receiver starting");
    tokio::select! {
        result = receiver.run() => result.map_err(Into::into),
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("receiver stopped");
            Ok(())
        }
    }
}

/// Run the transmit-side pipeline until interrupted
async fn run_transmitter(config: Config, profile: &str) -> anyhow::Result<()> {
    config.ensure_dirs()?;
    let api_key = config.require_openai_key()?.to_string();

    let registry = PersonaRegistry::load(&config.profile_dir(profile))?;
    tracing::info!(profile, personas = registry.len(), "loaded persona profile");

    let model = OpenAiChat::new(
        api_key,
        config.llm.model.clone(),
        config.llm.timeout_secs,
    )?;
    let synthesizer = build_synthesizer(&config)?;

    let mut tools = ToolRegistry::new(config.tool_timeout_secs);
    tools.register(Arc::new(InventoryLookupTool));

    let sink = CpalSink::new()?;

    let orchestrator = Orchestrator::new(
        config,
        registry,
        Arc::new(model),
        synthesizer,
        tools,
        Box::new(sink),
    )?;

    tracing::info!("dispatch transmitter ready");
    orchestrator.run().await.map_err(Into::into)
}

/// TTS backend selected by configuration
fn build_synthesizer(config: &Config) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    match config.tts.provider.as_str() {
        "openai" => {
            let key = config.require_openai_key()?.to_string();
            Ok(Arc::new(TextToSpeech::new_openai(
                key,
                config.tts.model.clone(),
                config.tts.timeout_secs,
            )?))
        }
        "unrealspeech" => {
            let key = config
                .api_keys
                .unrealspeech
                .clone()
                .ok_or_else(|| anyhow::anyhow!("UNREALSPEECH_API_KEY is not set"))?;
            Ok(Arc::new(TextToSpeech::new_unrealspeech(
                key,
                config.tts.timeout_secs,
            )?))
        }
        other => anyhow::bail!("unknown TTS provider: {other}"),
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Key up your radio or speak into the input!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your input is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is the radio line-out plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut sink = CpalSink::new()?;

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let payload = AudioPayload {
        bytes: samples_to_wav(&samples, sample_rate)?,
        format: AudioFormat::Wav,
    };
    sink.play(&payload).await?;

    println!("\n---");
    println!("If you heard the tone, your output is working!");

    Ok(())
}

/// Test TTS output end to end
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = build_synthesizer(config)?;

    println!("Synthesizing speech...");
    let audio = synthesizer
        .synthesize(text, &config.tts.default_voice)
        .await?;
    println!("Got {} bytes of audio data", audio.bytes.len());

    println!("Playing audio...");
    let mut sink = CpalSink::new()?;
    sink.play(&audio).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn debug_flag_is_accepted_on_both_sides() {
        let cli = Cli::try_parse_from(["dispatch", "--debug", "receiver"]).unwrap();
        assert!(cli.debug);

        let cli =
            Cli::try_parse_from(["dispatch", "--profile", "grocery_store", "--debug", "transmitter"])
                .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.profile, "grocery_store");
    }

    #[test]
    fn debug_flag_forces_debug_filter() {
        assert_eq!(log_filter(0, true), "debug");
        assert_eq!(log_filter(3, true), "debug");
    }

    #[test]
    fn verbosity_counts_map_to_filters() {
        assert_eq!(log_filter(0, false), "info,dispatch_gateway=info");
        assert_eq!(log_filter(1, false), "info,dispatch_gateway=debug");
        assert_eq!(log_filter(2, false), "debug");
        assert_eq!(log_filter(5, false), "trace");
    }
}
