//! Per-session conversation orchestrator.
//!
//! Each session runs as one task owning a phase machine, a rolling
//! history, and at most one in-flight operation (generation or
//! synthesis). Events are processed strictly in arrival order.
//! Barge-in cancels the in-flight operation and waits for it to fully
//! unwind before the phase changes, so no stale reply can leak into
//! the next exchange. Speaking ends only when the transport
//! acknowledges playback, so a barge-in during the playback tail still
//! discards the cut-off reply. Every provider call is bounded by the
//! configured per-call timeout; failures degrade to a spoken apology
//! instead of wedging the session.

use std::sync::Arc;
use std::time::Duration;

use parley_core::{ConversationTurn, RetrievalConfig, SessionConfig};
use parley_knowledge::{RetrievalEngine, SearchResult};
use parley_providers::{DynLanguageModel, Prompt, SpeechSynthesizer};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AgentError;
use crate::events::{AgentOutput, SessionEvent};
use crate::history::ConversationHistory;
use crate::phase::{PhaseMachine, SessionPhase};

/// Spoken when generation fails or times out.
pub const FALLBACK_APOLOGY: &str =
    "Sorry, I ran into a problem answering that. Could you say that again?";

/// Spoken when the user asks a question before any article is loaded.
pub const NO_KNOWLEDGE_REPLY: &str =
    "I don't have any articles loaded yet, so there is nothing I can answer questions about.";

const SYSTEM_INSTRUCTIONS: &str = "You are a helpful voice assistant. Answer questions \
using the provided article knowledge. Keep replies short and conversational; they will \
be spoken aloud. If the knowledge does not cover the question, say so briefly.";

const EVENT_BUFFER: usize = 64;

/// Factory for per-session event loops sharing one set of providers.
pub struct SessionOrchestrator<S: SpeechSynthesizer + 'static> {
    model: Arc<dyn DynLanguageModel>,
    synthesizer: Arc<S>,
    retrieval: Arc<RetrievalEngine>,
    session_config: SessionConfig,
    retrieval_config: RetrievalConfig,
    voice: String,
}

impl<S: SpeechSynthesizer + 'static> SessionOrchestrator<S> {
    pub fn new(
        model: Arc<dyn DynLanguageModel>,
        synthesizer: Arc<S>,
        retrieval: Arc<RetrievalEngine>,
        session_config: SessionConfig,
        retrieval_config: RetrievalConfig,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            model,
            synthesizer,
            retrieval,
            session_config,
            retrieval_config,
            voice: voice.into(),
        }
    }

    /// Start a new session task.
    ///
    /// Returns the control handle and the stream of agent outputs
    /// (turn texts and audio frames) for the transport to deliver.
    pub fn spawn_session(&self) -> (SessionHandle, mpsc::Receiver<AgentOutput>) {
        let id = Uuid::new_v4();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (output_tx, output_rx) = mpsc::channel(EVENT_BUFFER);
        let phase = PhaseMachine::new();

        let task = SessionTask {
            id,
            phase: phase.clone(),
            events: event_rx,
            output: output_tx,
            model: Arc::clone(&self.model),
            synthesizer: Arc::clone(&self.synthesizer),
            retrieval: Arc::clone(&self.retrieval),
            session_config: self.session_config.clone(),
            retrieval_config: self.retrieval_config.clone(),
            voice: self.voice.clone(),
            history: ConversationHistory::new(
                self.session_config.history_budget,
                self.session_config.history_unit,
            ),
            in_flight: None,
            awaiting_playback: false,
        };
        let join = tokio::spawn(task.run());

        (
            SessionHandle {
                id,
                events: event_tx,
                phase,
                join,
            },
            output_rx,
        )
    }
}

/// Control handle for one running session.
pub struct SessionHandle {
    id: Uuid,
    events: mpsc::Sender<SessionEvent>,
    phase: PhaseMachine,
    join: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current conversational phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase.current()
    }

    /// A sender for feeding events into the session.
    pub fn events(&self) -> mpsc::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Deliver one event to the session loop.
    pub async fn send(&self, event: SessionEvent) -> Result<(), AgentError> {
        self.events
            .send(event)
            .await
            .map_err(|_| AgentError::SessionClosed)
    }

    /// Request shutdown and wait for the session task to finish.
    pub async fn shutdown(self) {
        let _ = self.events.send(SessionEvent::Shutdown).await;
        let _ = self.join.await;
    }
}

/// One in-flight generation or synthesis operation.
struct InFlight {
    cancel: watch::Sender<bool>,
    join: JoinHandle<FlightOutcome>,
}

#[derive(Debug)]
enum FlightOutcome {
    Generated { text: String },
    GenerationFailed { reason: String },
    Spoken,
    SpeechFailed { reason: String },
    Cancelled,
}

struct SessionTask<S: SpeechSynthesizer + 'static> {
    id: Uuid,
    phase: PhaseMachine,
    events: mpsc::Receiver<SessionEvent>,
    output: mpsc::Sender<AgentOutput>,
    model: Arc<dyn DynLanguageModel>,
    synthesizer: Arc<S>,
    retrieval: Arc<RetrievalEngine>,
    session_config: SessionConfig,
    retrieval_config: RetrievalConfig,
    voice: String,
    history: ConversationHistory,
    in_flight: Option<InFlight>,
    /// All frames queued; Speaking until the transport acknowledges.
    awaiting_playback: bool,
}

impl<S: SpeechSynthesizer + 'static> SessionTask<S> {
    async fn run(mut self) {
        tracing::info!(session_id = %self.id, "Session started");

        let greeting = self.session_config.greeting.trim().to_string();
        if !greeting.is_empty() {
            self.speak_agent_turn(greeting).await;
        }

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    None | Some(SessionEvent::Shutdown) => {
                        self.cancel_in_flight().await;
                        break;
                    }
                    Some(event) => self.handle_event(event).await,
                },
                outcome = Self::next_outcome(&mut self.in_flight) => {
                    self.handle_outcome(outcome).await;
                }
            }
        }

        tracing::info!(session_id = %self.id, "Session closed");
    }

    /// Resolves when the in-flight operation finishes; pending forever
    /// when there is none.
    async fn next_outcome(in_flight: &mut Option<InFlight>) -> FlightOutcome {
        match in_flight {
            Some(flight) => {
                let outcome = (&mut flight.join).await.unwrap_or_else(|e| {
                    FlightOutcome::GenerationFailed {
                        reason: format!("In-flight task failed: {}", e),
                    }
                });
                *in_flight = None;
                outcome
            }
            None => std::future::pending().await,
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SpeechStart { .. } => match self.phase.current() {
                SessionPhase::Idle => {
                    let _ = self.phase.transition(SessionPhase::Listening);
                }
                SessionPhase::Speaking => self.barge_in(true).await,
                SessionPhase::Thinking => self.barge_in(false).await,
                SessionPhase::Listening => {}
            },
            SessionEvent::SpeechEnd { .. } => {
                tracing::debug!(session_id = %self.id, "Speech ended, awaiting final transcript");
            }
            SessionEvent::TranscriptFinal { text } => self.accept_transcript(text).await,
            SessionEvent::RecognitionFailed { reason } => {
                tracing::warn!(session_id = %self.id, reason = %reason, "Recognition failed");
                if self.phase.current() == SessionPhase::Listening
                    && self.phase.transition(SessionPhase::Thinking).is_ok()
                {
                    self.handle_outcome(FlightOutcome::GenerationFailed { reason })
                        .await;
                }
            }
            SessionEvent::PlaybackComplete => {
                if self.awaiting_playback && self.phase.current() == SessionPhase::Speaking {
                    tracing::debug!(session_id = %self.id, "Playback acknowledged");
                    self.awaiting_playback = false;
                    let _ = self.phase.transition(SessionPhase::Idle);
                } else {
                    tracing::debug!(
                        session_id = %self.id,
                        phase = %self.phase.current(),
                        "Ignoring stray playback acknowledgement"
                    );
                }
            }
            SessionEvent::Shutdown => {}
        }
    }

    /// User started talking over the agent: cancel whatever is in
    /// flight, wait for it to unwind, then start listening.
    async fn barge_in(&mut self, interrupting_speech: bool) {
        tracing::info!(session_id = %self.id, "Barge-in, cancelling in-flight work");
        self.cancel_in_flight().await;
        self.awaiting_playback = false;
        if interrupting_speech {
            // The cut-off reply was never fully delivered. This also
            // covers the playback tail, where frames are queued but
            // the transport has not acknowledged yet.
            self.history.pop_interrupted_reply();
        }
        if let Err(e) = self.phase.transition(SessionPhase::Listening) {
            tracing::warn!(session_id = %self.id, error = %e, "Barge-in transition rejected");
        }
    }

    async fn cancel_in_flight(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            let _ = flight.cancel.send(true);
            // The phase must not change until the task has fully
            // unwound and released its provider streams.
            let _ = flight.join.await;
        }
    }

    async fn accept_transcript(&mut self, text: String) {
        if self.phase.current() != SessionPhase::Listening {
            tracing::warn!(
                session_id = %self.id,
                phase = %self.phase.current(),
                "Dropping transcript received outside Listening"
            );
            return;
        }
        let text = text.trim().to_string();
        if text.is_empty() {
            tracing::debug!(session_id = %self.id, "Empty transcript, back to Idle");
            let _ = self.phase.transition(SessionPhase::Idle);
            return;
        }

        self.history.push(ConversationTurn::user(&text));
        if self.phase.transition(SessionPhase::Thinking).is_err() {
            return;
        }
        self.start_generation(text);
    }

    fn start_generation(&mut self, transcript: String) {
        debug_assert!(self.in_flight.is_none(), "generation started with work in flight");
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let join = tokio::spawn(run_generation(GenerationJob {
            model: Arc::clone(&self.model),
            retrieval: Arc::clone(&self.retrieval),
            history: self.history.turns().to_vec(),
            transcript,
            top_k: self.retrieval_config.top_k,
            digest_budget: self.retrieval_config.digest_budget_chars,
            timeout_ms: self.session_config.call_timeout_ms,
            cancel: cancel_rx,
        }));
        self.in_flight = Some(InFlight {
            cancel: cancel_tx,
            join,
        });
    }

    /// Record an agent turn and start synthesizing it.
    async fn speak_agent_turn(&mut self, text: String) {
        self.history.push(ConversationTurn::agent(&text));
        let _ = self
            .output
            .send(AgentOutput::AgentTurn { text: text.clone() })
            .await;
        match self.phase.transition(SessionPhase::Speaking) {
            Ok(()) => self.start_speech(text),
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Cannot start speaking");
                self.phase.reset();
            }
        }
    }

    fn start_speech(&mut self, text: String) {
        debug_assert!(self.in_flight.is_none(), "synthesis started with work in flight");
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let join = tokio::spawn(run_speech(
            Arc::clone(&self.synthesizer),
            self.voice.clone(),
            text,
            self.output.clone(),
            self.session_config.call_timeout_ms,
            cancel_rx,
        ));
        self.in_flight = Some(InFlight {
            cancel: cancel_tx,
            join,
        });
    }

    async fn handle_outcome(&mut self, outcome: FlightOutcome) {
        match outcome {
            FlightOutcome::Generated { text } => {
                self.speak_agent_turn(text).await;
            }
            FlightOutcome::GenerationFailed { reason } => {
                tracing::warn!(
                    session_id = %self.id,
                    reason = %reason,
                    "Generation failed, issuing fallback turn"
                );
                self.speak_agent_turn(FALLBACK_APOLOGY.to_string()).await;
            }
            FlightOutcome::Spoken => {
                // Stay in Speaking until the transport confirms the
                // queued audio was actually played. The marker is sent
                // after `awaiting_playback` is set, so an ack can never
                // race ahead of it.
                tracing::debug!(session_id = %self.id, "Speech queued, awaiting playback");
                self.awaiting_playback = true;
                let _ = self.output.send(AgentOutput::SpeechComplete).await;
            }
            FlightOutcome::SpeechFailed { reason } => {
                tracing::warn!(session_id = %self.id, reason = %reason, "Synthesis failed");
                // No audio will arrive; surface the apology as text so
                // the transport can still show the degraded turn.
                let _ = self
                    .output
                    .send(AgentOutput::AgentTurn {
                        text: FALLBACK_APOLOGY.to_string(),
                    })
                    .await;
                let _ = self.phase.transition(SessionPhase::Idle);
            }
            FlightOutcome::Cancelled => {
                // The canceller already handled the phase.
            }
        }
    }
}

struct GenerationJob {
    model: Arc<dyn DynLanguageModel>,
    retrieval: Arc<RetrievalEngine>,
    history: Vec<ConversationTurn>,
    transcript: String,
    top_k: usize,
    digest_budget: usize,
    timeout_ms: u64,
    cancel: watch::Receiver<bool>,
}

async fn run_generation(job: GenerationJob) -> FlightOutcome {
    let GenerationJob {
        model,
        retrieval,
        history,
        transcript,
        top_k,
        digest_budget,
        timeout_ms,
        mut cancel,
    } = job;

    let work = async {
        if retrieval.store().snapshot().is_empty() {
            return Ok(NO_KNOWLEDGE_REPLY.to_string());
        }
        let results = retrieval
            .search(&transcript, top_k)
            .await
            .map_err(|e| format!("Retrieval failed: {}", e))?;
        let prompt = compose_prompt(
            &retrieval.digest(digest_budget),
            &history,
            &transcript,
            &results,
        );
        model
            .complete_boxed(&prompt)
            .await
            .map_err(|e| format!("Completion failed: {}", e))
    };

    tokio::select! {
        _ = cancel.changed() => FlightOutcome::Cancelled,
        result = tokio::time::timeout(Duration::from_millis(timeout_ms), work) => match result {
            Ok(Ok(text)) => FlightOutcome::Generated { text },
            Ok(Err(reason)) => FlightOutcome::GenerationFailed { reason },
            Err(_) => FlightOutcome::GenerationFailed {
                reason: format!("Generation timed out after {} ms", timeout_ms),
            },
        },
    }
}

async fn run_speech<S: SpeechSynthesizer>(
    synthesizer: Arc<S>,
    voice: String,
    text: String,
    output: mpsc::Sender<AgentOutput>,
    timeout_ms: u64,
    mut cancel: watch::Receiver<bool>,
) -> FlightOutcome {
    let (frame_tx, mut frame_rx) = mpsc::channel(8);
    let synth = async move { synthesizer.synthesize(&text, &voice, frame_tx).await };
    let mut synth = std::pin::pin!(tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        synth
    ));
    let mut synth_done = false;
    let mut failure: Option<String> = None;

    loop {
        tokio::select! {
            // Dropping the synthesis future and frame receiver closes
            // the provider stream immediately.
            _ = cancel.changed() => return FlightOutcome::Cancelled,
            frame = frame_rx.recv() => match frame {
                Some(frame) => {
                    if output.send(AgentOutput::Audio(frame)).await.is_err() {
                        return FlightOutcome::Cancelled;
                    }
                }
                None => break,
            },
            result = &mut synth, if !synth_done => {
                synth_done = true;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => failure = Some(e.to_string()),
                    Err(_) => failure = Some(format!("Synthesis timed out after {} ms", timeout_ms)),
                }
            }
        }
    }

    match failure {
        Some(reason) => FlightOutcome::SpeechFailed { reason },
        None => FlightOutcome::Spoken,
    }
}

/// Assemble the completion prompt from the digest, retrieved chunks,
/// rolling history, and the current transcript.
fn compose_prompt(
    digest: &str,
    history: &[ConversationTurn],
    transcript: &str,
    results: &[SearchResult],
) -> Prompt {
    let mut user = transcript.to_string();
    if !results.is_empty() {
        user.push_str("\n\nRelevant excerpts:\n");
        for result in results {
            user.push_str(&format!("[{}] {}\n", result.title, result.chunk.text));
        }
    }
    // The transcript is already the final history entry; the model gets
    // it as the user message instead.
    let mut history = history.to_vec();
    if let Some(last) = history.last() {
        if last.role == parley_core::TurnRole::User && last.text == transcript {
            history.pop();
        }
    }

    Prompt {
        system: format!("{}\n\n{}", SYSTEM_INSTRUCTIONS, digest),
        history,
        user,
    }
}

// ====== Tests ======

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_core::HistoryUnit;
    use parley_knowledge::KnowledgeStore;
    use parley_providers::{LanguageModel, MockLanguageModel, MockSpeechSynthesizer};

    fn session_config() -> SessionConfig {
        SessionConfig {
            history_budget: 20,
            history_unit: HistoryUnit::Turns,
            call_timeout_ms: 2_000,
            greeting: String::new(),
        }
    }

    async fn seeded_store(model: &MockLanguageModel) -> Arc<KnowledgeStore> {
        let store = Arc::new(KnowledgeStore::new());
        let id = parley_core::article_id_for_url("https://example.com/rust");
        let chunk_text = "Rust guarantees memory safety without garbage collection.";
        store
            .upsert(
                parley_core::ArticleRecord {
                    id,
                    url: "https://example.com/rust".to_string(),
                    title: "Rust Intro".to_string(),
                    raw_text: String::new(),
                    summary: "An introduction to Rust.".to_string(),
                    key_points: vec![],
                    topics: Default::default(),
                    ingested_at: Utc::now(),
                },
                vec![parley_core::KnowledgeChunk {
                    id: Uuid::new_v4(),
                    article_id: id,
                    text: chunk_text.to_string(),
                    embedding: model.embed(chunk_text).await.unwrap(),
                    position: 0,
                }],
            )
            .unwrap();
        store
    }

    fn orchestrator_with(
        model: MockLanguageModel,
        synthesizer: MockSpeechSynthesizer,
        store: Arc<KnowledgeStore>,
        config: SessionConfig,
    ) -> SessionOrchestrator<MockSpeechSynthesizer> {
        let model: Arc<dyn DynLanguageModel> = Arc::new(model);
        let retrieval = Arc::new(RetrievalEngine::new(store, Arc::clone(&model)));
        SessionOrchestrator::new(
            model,
            Arc::new(synthesizer),
            retrieval,
            config,
            RetrievalConfig::default(),
            "test-voice",
        )
    }

    async fn wait_for_phase(handle: &SessionHandle, phase: SessionPhase) {
        for _ in 0..400 {
            if handle.phase() == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never reached {}, stuck at {}", phase, handle.phase());
    }

    /// Next agent turn text, skipping audio frames.
    async fn next_turn(outputs: &mut mpsc::Receiver<AgentOutput>) -> String {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), outputs.recv())
                .await
                .expect("timed out waiting for agent turn")
            {
                Some(AgentOutput::AgentTurn { text }) => return text,
                Some(AgentOutput::Audio(_)) | Some(AgentOutput::SpeechComplete) => continue,
                None => panic!("output channel closed"),
            }
        }
    }

    /// Drain frames up to the end-of-speech marker, then acknowledge
    /// playback the way a transport would.
    async fn finish_playback(handle: &SessionHandle, outputs: &mut mpsc::Receiver<AgentOutput>) {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), outputs.recv())
                .await
                .expect("timed out waiting for end of speech")
            {
                Some(AgentOutput::SpeechComplete) => break,
                Some(_) => continue,
                None => panic!("output channel closed"),
            }
        }
        handle.send(SessionEvent::PlaybackComplete).await.unwrap();
    }

    async fn say(handle: &SessionHandle, text: &str) {
        handle
            .send(SessionEvent::SpeechStart {
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        handle
            .send(SessionEvent::SpeechEnd {
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        handle
            .send(SessionEvent::TranscriptFinal {
                text: text.to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn basic_exchange_reaches_idle_with_a_reply() {
        let model = MockLanguageModel::new();
        let store = seeded_store(&model).await;
        model.push_response("Rust keeps memory safe without a garbage collector.");
        let orchestrator =
            orchestrator_with(model, MockSpeechSynthesizer::new(), store, session_config());

        let (handle, mut outputs) = orchestrator.spawn_session();
        say(&handle, "How does Rust handle memory?").await;

        let reply = next_turn(&mut outputs).await;
        assert_eq!(reply, "Rust keeps memory safe without a garbage collector.");
        finish_playback(&handle, &mut outputs).await;
        wait_for_phase(&handle, SessionPhase::Idle).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn reply_is_followed_by_audio() {
        let model = MockLanguageModel::new();
        let store = seeded_store(&model).await;
        model.push_response("Short answer.");
        let orchestrator =
            orchestrator_with(model, MockSpeechSynthesizer::new(), store, session_config());

        let (handle, mut outputs) = orchestrator.spawn_session();
        say(&handle, "Tell me something").await;

        let mut saw_turn = false;
        let mut audio_frames = 0;
        for _ in 0..10 {
            match tokio::time::timeout(Duration::from_secs(2), outputs.recv()).await {
                Ok(Some(AgentOutput::AgentTurn { .. })) => saw_turn = true,
                Ok(Some(AgentOutput::Audio(_))) => audio_frames += 1,
                _ => break,
            }
            if saw_turn && audio_frames >= 2 {
                break;
            }
        }
        assert!(saw_turn);
        // "Short answer." synthesizes to one frame per word.
        assert!(audio_frames >= 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn barge_in_during_speech_cancels_playback() {
        let model = MockLanguageModel::new();
        let store = seeded_store(&model).await;
        model.push_response("a long reply with very many words to keep the stream busy for a while");
        let synthesizer =
            MockSpeechSynthesizer::new().with_frame_delay(Duration::from_millis(20));
        let orchestrator = orchestrator_with(model, synthesizer, store, session_config());

        let (handle, mut outputs) = orchestrator.spawn_session();
        say(&handle, "Go on at length").await;

        // Wait until the reply is being spoken.
        let _ = next_turn(&mut outputs).await;
        wait_for_phase(&handle, SessionPhase::Speaking).await;

        handle
            .send(SessionEvent::SpeechStart {
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        wait_for_phase(&handle, SessionPhase::Listening).await;

        // The interrupted session must still answer the follow-up.
        handle
            .send(SessionEvent::TranscriptFinal {
                text: "What about safety?".to_string(),
            })
            .await
            .unwrap();
        let reply = next_turn(&mut outputs).await;
        assert!(!reply.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn transcript_during_thinking_is_dropped() {
        let model = MockLanguageModel::new().with_latency(Duration::from_millis(100));
        let store = seeded_store(&model).await;
        model.push_response("only reply");
        let orchestrator =
            orchestrator_with(model, MockSpeechSynthesizer::new(), store, session_config());

        let (handle, mut outputs) = orchestrator.spawn_session();
        say(&handle, "first question").await;
        // Arrives while the first generation is still in flight.
        handle
            .send(SessionEvent::TranscriptFinal {
                text: "second question".to_string(),
            })
            .await
            .unwrap();

        let reply = next_turn(&mut outputs).await;
        assert_eq!(reply, "only reply");
        finish_playback(&handle, &mut outputs).await;
        wait_for_phase(&handle, SessionPhase::Idle).await;
        // No second turn appears; drain any leftover audio frames.
        loop {
            match tokio::time::timeout(Duration::from_millis(200), outputs.recv()).await {
                Ok(Some(AgentOutput::Audio(_))) => continue,
                Ok(Some(AgentOutput::AgentTurn { text })) => {
                    panic!("unexpected second turn: {text}")
                }
                _ => break,
            }
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn generation_timeout_produces_apology() {
        let model = MockLanguageModel::new().with_latency(Duration::from_millis(500));
        let store = seeded_store(&model).await;
        let mut config = session_config();
        config.call_timeout_ms = 50;
        let orchestrator =
            orchestrator_with(model, MockSpeechSynthesizer::new(), store, config);

        let (handle, mut outputs) = orchestrator.spawn_session();
        say(&handle, "This will take too long").await;

        let reply = next_turn(&mut outputs).await;
        assert_eq!(reply, FALLBACK_APOLOGY);
        finish_playback(&handle, &mut outputs).await;
        wait_for_phase(&handle, SessionPhase::Idle).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn empty_store_gets_no_knowledge_reply() {
        let model = MockLanguageModel::new();
        let store = Arc::new(KnowledgeStore::new());
        let orchestrator =
            orchestrator_with(model, MockSpeechSynthesizer::new(), store, session_config());

        let (handle, mut outputs) = orchestrator.spawn_session();
        say(&handle, "What do you know?").await;

        assert_eq!(next_turn(&mut outputs).await, NO_KNOWLEDGE_REPLY);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn empty_transcript_returns_to_idle() {
        let model = MockLanguageModel::new();
        let store = seeded_store(&model).await;
        let orchestrator =
            orchestrator_with(model, MockSpeechSynthesizer::new(), store, session_config());

        let (handle, _outputs) = orchestrator.spawn_session();
        say(&handle, "   ").await;
        wait_for_phase(&handle, SessionPhase::Idle).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn greeting_is_spoken_first() {
        let model = MockLanguageModel::new();
        let store = seeded_store(&model).await;
        let mut config = session_config();
        config.greeting = "Welcome aboard.".to_string();
        let orchestrator =
            orchestrator_with(model, MockSpeechSynthesizer::new(), store, config);

        let (handle, mut outputs) = orchestrator.spawn_session();
        assert_eq!(next_turn(&mut outputs).await, "Welcome aboard.");
        finish_playback(&handle, &mut outputs).await;
        wait_for_phase(&handle, SessionPhase::Idle).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn recognition_failure_produces_apology() {
        let model = MockLanguageModel::new();
        let store = seeded_store(&model).await;
        let orchestrator =
            orchestrator_with(model, MockSpeechSynthesizer::new(), store, session_config());

        let (handle, mut outputs) = orchestrator.spawn_session();
        handle
            .send(SessionEvent::SpeechStart {
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        handle
            .send(SessionEvent::RecognitionFailed {
                reason: "stream reset".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(next_turn(&mut outputs).await, FALLBACK_APOLOGY);
        finish_playback(&handle, &mut outputs).await;
        wait_for_phase(&handle, SessionPhase::Idle).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_while_speaking_unwinds_cleanly() {
        let model = MockLanguageModel::new();
        let store = seeded_store(&model).await;
        model.push_response("a reply with enough words to still be streaming");
        let synthesizer =
            MockSpeechSynthesizer::new().with_frame_delay(Duration::from_millis(20));
        let orchestrator = orchestrator_with(model, synthesizer, store, session_config());

        let (handle, mut outputs) = orchestrator.spawn_session();
        say(&handle, "speak at length").await;
        let _ = next_turn(&mut outputs).await;
        wait_for_phase(&handle, SessionPhase::Speaking).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn speaking_holds_until_playback_acknowledged() {
        let model = MockLanguageModel::new();
        let store = seeded_store(&model).await;
        model.push_response("Short reply.");
        let orchestrator =
            orchestrator_with(model, MockSpeechSynthesizer::new(), store, session_config());

        let (handle, mut outputs) = orchestrator.spawn_session();
        say(&handle, "Say something").await;
        let _ = next_turn(&mut outputs).await;

        // Drain everything up to the end-of-speech marker but do not
        // acknowledge playback.
        loop {
            match tokio::time::timeout(Duration::from_secs(2), outputs.recv())
                .await
                .expect("timed out waiting for end of speech")
            {
                Some(AgentOutput::SpeechComplete) => break,
                Some(_) => continue,
                None => panic!("output channel closed"),
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.phase(), SessionPhase::Speaking);

        handle.send(SessionEvent::PlaybackComplete).await.unwrap();
        wait_for_phase(&handle, SessionPhase::Idle).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn barge_in_during_playback_tail_starts_listening() {
        let model = MockLanguageModel::new();
        let store = seeded_store(&model).await;
        model.push_response("Reply awaiting playback.");
        let orchestrator =
            orchestrator_with(model, MockSpeechSynthesizer::new(), store, session_config());

        let (handle, mut outputs) = orchestrator.spawn_session();
        say(&handle, "Say something").await;
        let _ = next_turn(&mut outputs).await;
        // All frames queued, no acknowledgement yet: still Speaking.
        loop {
            match tokio::time::timeout(Duration::from_secs(2), outputs.recv())
                .await
                .expect("timed out waiting for end of speech")
            {
                Some(AgentOutput::SpeechComplete) => break,
                Some(_) => continue,
                None => panic!("output channel closed"),
            }
        }
        assert_eq!(handle.phase(), SessionPhase::Speaking);

        // The user talks over the playback tail.
        handle
            .send(SessionEvent::SpeechStart {
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        wait_for_phase(&handle, SessionPhase::Listening).await;

        // A late acknowledgement from the abandoned playback is ignored.
        handle.send(SessionEvent::PlaybackComplete).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.phase(), SessionPhase::Listening);

        // The interrupted session still answers the follow-up.
        handle
            .send(SessionEvent::TranscriptFinal {
                text: "What else?".to_string(),
            })
            .await
            .unwrap();
        assert!(!next_turn(&mut outputs).await.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn synthesis_failure_surfaces_apology_text() {
        let model = MockLanguageModel::new();
        let store = seeded_store(&model).await;
        model.push_response("This reply will not be voiced.");
        let synthesizer = MockSpeechSynthesizer::new().failing_times(1);
        let orchestrator = orchestrator_with(model, synthesizer, store, session_config());

        let (handle, mut outputs) = orchestrator.spawn_session();
        say(&handle, "Trigger a synthesis failure").await;

        assert_eq!(next_turn(&mut outputs).await, "This reply will not be voiced.");
        assert_eq!(next_turn(&mut outputs).await, FALLBACK_APOLOGY);
        wait_for_phase(&handle, SessionPhase::Idle).await;
        handle.shutdown().await;
    }

    #[test]
    fn prompt_contains_digest_history_and_excerpts() {
        let history = vec![
            ConversationTurn::user("earlier question"),
            ConversationTurn::agent("earlier answer"),
            ConversationTurn::user("current question"),
        ];
        let results = vec![SearchResult {
            chunk: parley_core::KnowledgeChunk {
                id: Uuid::new_v4(),
                article_id: Uuid::new_v4(),
                text: "retrieved chunk text".to_string(),
                embedding: vec![],
                position: 0,
            },
            title: "Some Article".to_string(),
            score: 0.9,
        }];

        let prompt = compose_prompt("digest text", &history, "current question", &results);
        assert!(prompt.system.contains("digest text"));
        assert!(prompt.user.starts_with("current question"));
        assert!(prompt.user.contains("[Some Article] retrieved chunk text"));
        // The current transcript is not duplicated into history.
        assert_eq!(prompt.history.len(), 2);
    }
}
