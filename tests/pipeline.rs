//! End-to-end orchestration tests over mock collaborators
//!
//! Drives the transmitter pipeline from transcript files to played
//! audio with a scripted model, a pass-through synthesizer, and a
//! recording sink.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use dispatch_gateway::llm::{ChatMessage, LanguageModel};
use dispatch_gateway::playback::AudioSink;
use dispatch_gateway::voice::{AudioFormat, AudioPayload, SpeechSynthesizer};
use dispatch_gateway::{
    Config, Error, InventoryLookupTool, Orchestrator, PersonaRegistry, Result, ToolRegistry,
    TranscriptRecord, TranscriptStore,
};

/// Scripted model response
enum Response {
    Reply(&'static str),
    Fail,
}

/// Model that answers by matching the latest message against a script
struct ScriptedModel {
    script: Vec<(&'static str, Response)>,
    calls: Calls,
}

type Calls = Arc<Mutex<Vec<Vec<ChatMessage>>>>;

impl ScriptedModel {
    fn new(script: Vec<(&'static str, Response)>) -> (Arc<Self>, Calls) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let model = Arc::new(Self { script, calls: Arc::clone(&calls) });
        (model, calls)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        for (needle, response) in &self.script {
            if last.contains(needle) {
                return match response {
                    Response::Reply(text) => Ok((*text).to_string()),
                    Response::Fail => Err(Error::Model("scripted failure".to_string())),
                };
            }
        }
        Err(Error::Model(format!("unscripted prompt: {last}")))
    }
}

/// Synthesizer that passes the reply text through as audio bytes
struct TextPassthrough;

#[async_trait]
impl SpeechSynthesizer for TextPassthrough {
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<AudioPayload> {
        Ok(AudioPayload { bytes: text.as_bytes().to_vec(), format: AudioFormat::Mp3 })
    }
}

/// Sink that records what would have gone on the air
struct RecordingSink {
    played: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&mut self, audio: &AudioPayload) -> Result<()> {
        let text = String::from_utf8_lossy(&audio.bytes).into_owned();
        self.played.lock().unwrap().push(text);
        Ok(())
    }
}

fn write_persona(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join(format!("{name}.json")), body).unwrap();
}

struct Harness {
    _dir: tempfile::TempDir,
    orchestrator: Orchestrator,
    store: TranscriptStore,
    played: Arc<Mutex<Vec<String>>>,
    config: Config,
}

fn harness(script: Vec<(&'static str, Response)>) -> (Harness, Calls) {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let personas_dir = dir.path().join("personas");
    let profile_dir = personas_dir.join("test");
    std::fs::create_dir_all(&profile_dir).unwrap();

    write_persona(
        &profile_dir,
        "the_dude",
        r#"{
            "prompt": "You are The Dude, a laid-back trucker on channel 19.",
            "activation_phrases": ["hey dude", "dude"],
            "voices": {"openai": "onyx"},
            "fallback": "Like, the system is down, man."
        }"#,
    );
    write_persona(
        &profile_dir,
        "warehouse_worker",
        r#"{
            "prompt": "You are the warehouse worker for a grocery store.",
            "activation_phrases": ["warehouse"],
            "voices": {"openai": "ash"},
            "allowed_tools": ["inventory_lookup"]
        }"#,
    );

    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "data_dir = \"{}\"\npersonas_dir = \"{}\"\nvox_tail_ms = 1\n",
            data_dir.display(),
            personas_dir.display()
        ),
    )
    .unwrap();
    let config = Config::load_from(&config_path).unwrap();

    let registry = PersonaRegistry::load(&config.profile_dir("test")).unwrap();
    let (model, calls) = ScriptedModel::new(script);

    let mut tools = ToolRegistry::new(config.tool_timeout_secs);
    tools.register(Arc::new(InventoryLookupTool));

    let played = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink { played: Arc::clone(&played) };

    let store = TranscriptStore::open(&config.transcriptions_dir, &config.processed_dir).unwrap();
    let orchestrator = Orchestrator::new(
        config.clone(),
        registry,
        model,
        Arc::new(TextPassthrough),
        tools,
        Box::new(sink),
    )
    .unwrap();

    (
        Harness { _dir: dir, orchestrator, store, played, config },
        calls,
    )
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn plain_turn_is_routed_and_spoken() {
    let (mut h, _calls) = harness(vec![("ears on", Response::Reply("10-4, good buddy."))]);

    let record = TranscriptRecord::new("Hey Dude, you got your ears on?", "radio");
    h.store.write(&record).await.unwrap();

    let routed = h.orchestrator.process_pending().await.unwrap();
    assert_eq!(routed, 1);

    let played = Arc::clone(&h.played);
    wait_until("reply playback", move || !played.lock().unwrap().is_empty()).await;
    assert_eq!(*h.played.lock().unwrap(), ["10-4, good buddy."]);

    // Consumed record is archived, not retried
    assert!(h.store.poll().await.unwrap().is_empty());

    // Both sides of the exchange are in the conversation record
    let log = Arc::new(h.config.conversation_log.clone());
    wait_until("conversation record", move || {
        std::fs::read_to_string(log.as_ref())
            .map(|raw| raw.lines().count() == 2)
            .unwrap_or(false)
    })
    .await;
    let raw = std::fs::read_to_string(&h.config.conversation_log).unwrap();
    assert!(raw.contains("caller"));
    assert!(raw.contains("the_dude"));
}

#[tokio::test]
async fn tool_directive_runs_two_passes() {
    let (mut h, calls) = harness(vec![
        (
            "almond milk",
            Response::Reply(r#"TOOL_CALL: inventory_lookup {"item": "organic almond milk"}"#),
        ),
        ("[inventory_lookup]", Response::Reply("Ten units over in aisle five.")),
    ]);

    let record = TranscriptRecord::new("Warehouse, how much almond milk we got?", "radio");
    h.store.write(&record).await.unwrap();
    h.orchestrator.process_pending().await.unwrap();

    let played = Arc::clone(&h.played);
    wait_until("reply playback", move || !played.lock().unwrap().is_empty()).await;

    // Only the spoken reply hits the air, never the directive
    assert_eq!(*h.played.lock().unwrap(), ["Ten units over in aisle five."]);

    // Two completions, the second seeing the tool result
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    let second_last = calls[1].last().unwrap();
    assert!(second_last.content.contains("10 in aisle 5"));
}

#[tokio::test]
async fn second_directive_is_forced_to_raw_text() {
    const DIRECTIVE: &str = r#"TOOL_CALL: inventory_lookup {"item": "organic almond milk"}"#;
    let (mut h, calls) = harness(vec![
        ("almond milk", Response::Reply(DIRECTIVE)),
        // The model misbehaves and asks for the tool again in pass two
        ("[inventory_lookup]", Response::Reply(DIRECTIVE)),
    ]);

    let record = TranscriptRecord::new("Warehouse, how much almond milk we got?", "radio");
    h.store.write(&record).await.unwrap();
    h.orchestrator.process_pending().await.unwrap();

    let played = Arc::clone(&h.played);
    wait_until("raw-text playback", move || !played.lock().unwrap().is_empty()).await;

    // The raw directive text is finalized as-is
    assert_eq!(*h.played.lock().unwrap(), [DIRECTIVE]);

    // Exactly two completions: there is never a third pass
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn model_failure_speaks_persona_fallback() {
    let (mut h, _calls) = harness(vec![("ears on", Response::Fail)]);

    let record = TranscriptRecord::new("Hey Dude, you got your ears on?", "radio");
    h.store.write(&record).await.unwrap();
    h.orchestrator.process_pending().await.unwrap();

    let played = Arc::clone(&h.played);
    wait_until("fallback playback", move || !played.lock().unwrap().is_empty()).await;
    assert_eq!(*h.played.lock().unwrap(), ["Like, the system is down, man."]);
}

#[tokio::test]
async fn failed_exchange_leaves_error_marker_in_history() {
    let (mut h, calls) = harness(vec![
        ("ears on", Response::Fail),
        ("still there", Response::Reply("Back with you.")),
    ]);

    h.store
        .write(&TranscriptRecord::new("Hey Dude, you got your ears on?", "radio"))
        .await
        .unwrap();
    h.orchestrator.process_pending().await.unwrap();

    let played = Arc::clone(&h.played);
    wait_until("fallback playback", move || h_played_len(&played) >= 1).await;

    // The next turn's context shows the degraded exchange, not just a
    // reply that looks real
    h.store
        .write(&TranscriptRecord::new("you still there?", "radio"))
        .await
        .unwrap();
    h.orchestrator.process_pending().await.unwrap();

    let played = Arc::clone(&h.played);
    wait_until("second reply", move || h_played_len(&played) >= 2).await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls[1]
        .iter()
        .any(|m| m.content.starts_with("[error]") && m.content.contains("scripted failure")));
    assert!(calls[1]
        .iter()
        .any(|m| m.content == "Like, the system is down, man."));
}

#[tokio::test]
async fn own_transmission_echo_is_not_reanswered() {
    let (mut h, _calls) = harness(vec![("ears on", Response::Reply("10-4, good buddy."))]);

    h.store
        .write(&TranscriptRecord::new("Hey Dude, you got your ears on?", "radio"))
        .await
        .unwrap();
    h.orchestrator.process_pending().await.unwrap();

    let played = Arc::clone(&h.played);
    wait_until("reply playback", move || h_played_len(&played) >= 1).await;

    // Our own transmission leaks past the VOX tail and comes back as a
    // fresh transcript; it must not be answered
    h.store
        .write(&TranscriptRecord::new("10-4, good buddy.", "radio"))
        .await
        .unwrap();
    let routed = h.orchestrator.process_pending().await.unwrap();
    assert_eq!(routed, 0);

    // Marked seen, never re-examined
    assert!(h.store.poll().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h_played_len(&h.played), 1);
}

#[tokio::test]
async fn unaddressed_transcript_is_marked_and_dropped() {
    let (mut h, _calls) = harness(Vec::new());

    let record = TranscriptRecord::new("anyone out there tonight?", "radio");
    h.store.write(&record).await.unwrap();

    let routed = h.orchestrator.process_pending().await.unwrap();
    assert_eq!(routed, 0);

    // Marked seen so it is never re-examined
    assert!(h.store.poll().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.played.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sticky_followup_reaches_the_open_session() {
    let (mut h, _calls) = harness(vec![
        ("ears on", Response::Reply("Go ahead.")),
        ("still with me", Response::Reply("Still here, good buddy.")),
    ]);

    h.store
        .write(&TranscriptRecord::new("Hey Dude, you got your ears on?", "radio"))
        .await
        .unwrap();
    h.orchestrator.process_pending().await.unwrap();

    let played = Arc::clone(&h.played);
    wait_until("first reply", move || h_played_len(&played) >= 1).await;

    // Follow-up with no activation phrase rides the open session
    h.store
        .write(&TranscriptRecord::new("you still with me?", "radio"))
        .await
        .unwrap();
    let routed = h.orchestrator.process_pending().await.unwrap();
    assert_eq!(routed, 1);

    let played = Arc::clone(&h.played);
    wait_until("second reply", move || h_played_len(&played) >= 2).await;
    assert_eq!(
        *h.played.lock().unwrap(),
        ["Go ahead.", "Still here, good buddy."]
    );
}

#[tokio::test]
async fn concurrent_sessions_both_complete() {
    let (mut h, _calls) = harness(vec![
        ("ears on", Response::Reply("10-4.")),
        ("coffee", Response::Reply("Plenty of coffee back here.")),
    ]);

    h.store
        .write(&TranscriptRecord::new("Hey Dude, you got your ears on?", "radio"))
        .await
        .unwrap();
    h.store
        .write(&TranscriptRecord::new("Warehouse, we got signature coffee?", "radio"))
        .await
        .unwrap();

    let routed = h.orchestrator.process_pending().await.unwrap();
    assert_eq!(routed, 2);

    let played = Arc::clone(&h.played);
    wait_until("both replies", move || h_played_len(&played) >= 2).await;

    let played = h.played.lock().unwrap();
    assert!(played.contains(&"10-4.".to_string()));
    assert!(played.contains(&"Plenty of coffee back here.".to_string()));
}

fn h_played_len(played: &Arc<Mutex<Vec<String>>>) -> usize {
    played.lock().unwrap().len()
}
