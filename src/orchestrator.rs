//! Orchestrator: transcripts in, spoken replies out
//!
//! Consumes the transcript queue, routes each utterance to a persona,
//! runs the two-pass tool-augmented exchange with the language model,
//! and hands synthesized replies to the playback queue.
//!
//! Concurrency shape: one consumer loop owns routing and the session
//! table; each active persona gets a worker task that exclusively owns
//! that persona's conversation history. Workers never share state, so
//! two personas can be mid-exchange at once while playback stays
//! serialized behind the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::feedback::FeedbackLock;
use crate::llm::{
    directive_instructions, history_to_messages, parse_directive, ChatMessage, LanguageModel,
};
use crate::matcher::{ActivationMatcher, EchoGuard};
use crate::persona::{PersonaProfile, PersonaRegistry};
use crate::playback::{AudioSink, PlaybackJob, PlaybackQueue};
use crate::record::ConversationLog;
use crate::session::{ConversationSession, Role, Turn, TurnState};
use crate::tools::ToolRegistry;
use crate::transcript::{TranscriptRecord, TranscriptStore};
use crate::voice::SpeechSynthesizer;
use crate::Result;

/// Capacity of each session worker's inbox
const SESSION_INBOX: usize = 32;

/// Speaker label for transcribed radio utterances in the record
const CALLER: &str = "caller";

/// How long a spoken reply is treated as a possible echo of our own
/// transmission
const ECHO_WINDOW: Duration = Duration::from_secs(60);

/// Shared per-turn collaborators, one instance for all workers
struct TurnContext {
    model: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    tools: ToolRegistry,
    queue: PlaybackQueue,
    log: ConversationLog,
    echoes: std::sync::Mutex<EchoGuard>,
    tts_provider: String,
    default_voice: String,
    global_fallback: String,
}

/// A running session worker
struct SessionHandle {
    tx: mpsc::Sender<TranscriptRecord>,
    task: JoinHandle<()>,
}

/// The sticky conversation target
struct ActiveSession {
    persona: String,
    last_routed: Instant,
}

/// Transmitter-side pipeline driver
pub struct Orchestrator {
    config: Config,
    registry: PersonaRegistry,
    store: TranscriptStore,
    ctx: Arc<TurnContext>,
    queue_task: JoinHandle<()>,
    sessions: HashMap<String, SessionHandle>,
    active: Option<ActiveSession>,
}

impl Orchestrator {
    /// Assemble the pipeline from configuration and collaborators
    ///
    /// Starts the playback drain task immediately. Any lock file left by
    /// a previous run is cleared first.
    ///
    /// # Errors
    ///
    /// Returns error if the transcript store cannot be opened.
    pub fn new(
        config: Config,
        registry: PersonaRegistry,
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        tools: ToolRegistry,
        sink: Box<dyn AudioSink>,
    ) -> Result<Self> {
        let store = TranscriptStore::open(&config.transcriptions_dir, &config.processed_dir)?;
        let lock = FeedbackLock::new(&config.lock_path, config.playback.lock_stale_secs);
        lock.clear_startup_leftover();

        let (queue, queue_task) = PlaybackQueue::spawn(
            sink,
            lock,
            config.playback.queue_size,
            Duration::from_millis(config.playback.vox_tail_ms),
        );

        let ctx = Arc::new(TurnContext {
            model,
            synthesizer,
            tools,
            queue,
            log: ConversationLog::new(&config.conversation_log),
            echoes: std::sync::Mutex::new(EchoGuard::new(ECHO_WINDOW)),
            tts_provider: config.tts.provider.clone(),
            default_voice: config.tts.default_voice.clone(),
            global_fallback: config.session.fallback_utterance.clone(),
        });

        Ok(Self {
            config,
            registry,
            store,
            ctx,
            queue_task,
            sessions: HashMap::new(),
            active: None,
        })
    }

    /// Consume transcripts until interrupted, then drain and stop
    ///
    /// The poll interval doubles while the queue is empty and snaps back
    /// to the minimum as soon as a transcript arrives.
    ///
    /// # Errors
    ///
    /// Returns error if the interrupt signal cannot be installed.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(
            personas = self.registry.len(),
            "orchestrator running"
        );

        let min = Duration::from_millis(self.config.poll_min_ms);
        let max = Duration::from_millis(self.config.poll_max_ms);
        let mut backoff = min;

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    tracing::info!("interrupt received, draining");
                    break;
                }
                () = tokio::time::sleep(backoff) => {
                    match self.process_pending().await {
                        Ok(0) => backoff = (backoff * 2).min(max),
                        Ok(_) => backoff = min,
                        Err(e) => {
                            tracing::error!(error = %e, "transcript poll failed");
                            backoff = (backoff * 2).min(max);
                        }
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One poll pass: route every pending transcript
    ///
    /// Returns the number of transcripts routed to a session.
    ///
    /// # Errors
    ///
    /// Returns error if the pending directory cannot be listed.
    pub async fn process_pending(&mut self) -> Result<usize> {
        let records = self.store.poll().await?;
        let mut routed = 0;

        for record in records {
            if self.dispatch(&record).await {
                routed += 1;
            }
            self.store.mark_processed(&record).await;
        }
        Ok(routed)
    }

    /// Route one transcript; returns whether it reached a session
    async fn dispatch(&mut self, record: &TranscriptRecord) -> bool {
        if let Ok(mut echoes) = self.ctx.echoes.lock()
            && echoes.is_echo(&record.text)
        {
            tracing::debug!(id = %record.id, transcript = %record.text, "own transmission echo dropped");
            return false;
        }

        let open = self.open_session();
        let matcher = ActivationMatcher::new(&self.registry);
        let Some(m) = matcher.route(&record.text, open.as_deref()) else {
            tracing::debug!(id = %record.id, transcript = %record.text, "no persona addressed");
            return false;
        };

        let Some(profile) = self.registry.get(&m.persona).cloned() else {
            // Sticky target vanished from the registry; drop the session
            tracing::warn!(persona = %m.persona, "routed to unknown persona");
            self.active = None;
            return false;
        };

        self.active = Some(ActiveSession {
            persona: m.persona.clone(),
            last_routed: Instant::now(),
        });

        let tx = self.session_inbox(profile);
        match tx.send(record.clone()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(persona = %m.persona, error = %e, "session worker gone");
                self.sessions.remove(&m.persona);
                false
            }
        }
    }

    /// Persona with the open sticky session, if it has not timed out
    fn open_session(&self) -> Option<String> {
        let active = self.active.as_ref()?;
        let timeout = Duration::from_secs(self.config.session.conversation_timeout_secs);
        if active.last_routed.elapsed() < timeout {
            Some(active.persona.clone())
        } else {
            None
        }
    }

    /// Inbox for a persona's worker, spawning the worker on first use
    fn session_inbox(&mut self, profile: PersonaProfile) -> mpsc::Sender<TranscriptRecord> {
        let name = profile.name.clone();
        let handle = self.sessions.entry(name).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(SESSION_INBOX);
            let session = ConversationSession::new(
                &profile.name,
                self.config.session.history_limit,
                self.config.session.context_expiration_secs,
            );
            tracing::info!(persona = %profile.name, "session opened");
            let task = tokio::spawn(run_session(profile, session, rx, Arc::clone(&self.ctx)));
            SessionHandle { tx, task }
        });
        handle.tx.clone()
    }

    /// Close session inboxes, wait for in-flight turns, drain playback
    async fn shutdown(self) {
        let mut tasks = Vec::new();
        for (persona, handle) in self.sessions {
            drop(handle.tx);
            tasks.push((persona, handle.task));
        }
        for (persona, task) in tasks {
            if let Err(e) = task.await {
                tracing::error!(persona = %persona, error = %e, "session worker panicked");
            }
        }

        // Last queue handle drops here; the drain task plays out what is
        // left and releases the lock before exiting
        drop(self.ctx);
        if let Err(e) = self.queue_task.await {
            tracing::error!(error = %e, "playback task panicked");
        }
        tracing::info!("orchestrator stopped");
    }
}

/// Worker loop: exclusive owner of one persona's conversation
async fn run_session(
    persona: PersonaProfile,
    mut session: ConversationSession,
    mut rx: mpsc::Receiver<TranscriptRecord>,
    ctx: Arc<TurnContext>,
) {
    while let Some(record) = rx.recv().await {
        handle_turn(&persona, &mut session, &record, &ctx).await;
    }
    tracing::info!(persona = %persona.name, "session closed");
}

/// Process one routed transcript end to end
async fn handle_turn(
    persona: &PersonaProfile,
    session: &mut ConversationSession,
    record: &TranscriptRecord,
    ctx: &TurnContext,
) {
    tracing::info!(
        persona = %persona.name,
        transcript = %record.text,
        "turn started"
    );

    session.state = TurnState::AwaitingModel;
    session.push(Turn::new(Role::User, &record.text));
    if let Err(e) = ctx.log.append(CALLER, &record.text) {
        tracing::warn!(error = %e, "conversation record append failed");
    }

    let reply = match converse(persona, session, ctx).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(persona = %persona.name, error = %e, "exchange failed, speaking fallback");
            // The marker keeps the failure visible in later turns'
            // context; the fallback alone would read like a real reply
            session.push(Turn::new(Role::Tool, format!("[error] {e}")));
            persona
                .fallback
                .clone()
                .unwrap_or_else(|| ctx.global_fallback.clone())
        }
    };

    session.state = TurnState::Finalizing;
    session.push(Turn::new(Role::Assistant, &reply));
    if let Err(e) = ctx.log.append(&persona.name, &reply) {
        tracing::warn!(error = %e, "conversation record append failed");
    }
    if let Ok(mut echoes) = ctx.echoes.lock() {
        echoes.remember(&reply);
    }

    let voice = persona
        .voice_for(&ctx.tts_provider)
        .unwrap_or(&ctx.default_voice)
        .to_string();

    match ctx.synthesizer.synthesize(&reply, &voice).await {
        Ok(audio) => {
            if let Err(e) = ctx.queue.enqueue(PlaybackJob::new(audio, &persona.name)).await {
                tracing::error!(persona = %persona.name, error = %e, "reply dropped");
            }
        }
        Err(e) => {
            // Nothing to play and no way to speak a fallback either
            tracing::error!(persona = %persona.name, error = %e, "synthesis failed, reply dropped");
        }
    }

    session.state = TurnState::Idle;
}

/// Two-pass exchange with the model
///
/// Pass one may answer directly or emit a tool-call directive. A
/// directive triggers the tool, whose outcome is folded into history as
/// a tool turn, and pass two produces the spoken reply. A directive in
/// pass two is a protocol violation: it is logged and the raw text is
/// finalized as-is, there is never a third pass.
async fn converse(
    persona: &PersonaProfile,
    session: &mut ConversationSession,
    ctx: &TurnContext,
) -> Result<String> {
    let allowed = ctx.tools.usage_for(persona);
    let mut system = persona.prompt.clone();
    if !allowed.is_empty() {
        system.push_str(&directive_instructions(&allowed));
    }

    let first = ctx.model.complete(&prompt(&system, session)).await?;
    let Some(directive) = parse_directive(&first) else {
        return Ok(first);
    };

    session.state = TurnState::AwaitingTool;
    tracing::info!(
        persona = %persona.name,
        tool = %directive.tool,
        "tool directive received"
    );

    let outcome = match ctx
        .tools
        .invoke(persona, &directive.tool, &directive.arguments)
        .await
    {
        Ok(result) => format!("[{}] {result}", directive.tool),
        Err(e) => {
            let e = crate::Error::from(e);
            tracing::warn!(persona = %persona.name, error = %e, "tool failed, folding error");
            format!("[{}] error: {e}", directive.tool)
        }
    };
    session.push(Turn::new(Role::Tool, outcome));

    session.state = TurnState::AwaitingModel;
    let second = ctx.model.complete(&prompt(&system, session)).await?;

    if parse_directive(&second).is_some() {
        let violation =
            crate::Error::Protocol("tool directive after tool result".to_string());
        tracing::warn!(
            persona = %persona.name,
            error = %violation,
            "finalizing raw text"
        );
    }
    Ok(second)
}

/// System prompt plus current history as a chat request
fn prompt(system: &str, session: &ConversationSession) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(history_to_messages(session.history()));
    messages
}
