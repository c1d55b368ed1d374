//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use voiceloop::agent::{Reply, ReplyGenerator};
use voiceloop::conversation::{ConversationEngine, ConversationEvent, EngineSettings};
use voiceloop::voice::{
    RecognitionEvent, RecognitionOptions, RecognitionSink, Recognizer, SYNTHESIS_START_TIMEOUT,
    SpeakOptions, SpeakOutcome, Synthesizer, VoiceDescriptor, VoiceGender, await_playback,
};
use voiceloop::{Error, Result};

/// Recognizer driven by the test through [`MockRecognizer::emit`]
pub struct MockRecognizer {
    granted: AtomicBool,
    listening: AtomicBool,
    sink: Mutex<Option<RecognitionSink>>,
    fail_next_start: Mutex<Option<Error>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self {
            granted: AtomicBool::new(true),
            listening: AtomicBool::new(false),
            sink: Mutex::new(None),
            fail_next_start: Mutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn denying_permission() -> Self {
        let recognizer = Self::new();
        recognizer.granted.store(false, Ordering::SeqCst);
        recognizer
    }

    pub fn fail_next_start(&self, error: Error) {
        *self.fail_next_start.lock().unwrap() = Some(error);
    }

    /// Report an event as the platform would
    pub fn emit(&self, event: RecognitionEvent) {
        let sink = self.sink.lock().unwrap().clone();
        sink.expect("recognizer was never started").send(event).ok();
    }

    pub fn transcript(&self, text: &str) {
        self.emit(RecognitionEvent::FinalTranscript(text.to_string()));
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn request_permission(&self) -> Result<bool> {
        Ok(self.granted.load(Ordering::SeqCst))
    }

    async fn start(&self, _options: &RecognitionOptions, sink: RecognitionSink) -> Result<()> {
        if let Some(error) = self.fail_next_start.lock().unwrap().take() {
            return Err(error);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.listening.store(true, Ordering::SeqCst);
        sink.send(RecognitionEvent::ListeningStarted).ok();
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.listening.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

/// How the mock synthesizer plays utterances
#[derive(Debug, Clone, Copy)]
pub enum Playback {
    /// Starts at once and completes after the given duration
    CompleteAfter(Duration),
    /// Never confirms playback start
    NeverStart,
}

/// Synthesizer that records what it was asked to say
pub struct MockSynthesizer {
    playback: Playback,
    gesture_required: bool,
    spoken: Mutex<Vec<(String, SpeakOptions)>>,
    stops: AtomicUsize,
    voices: Mutex<Vec<VoiceDescriptor>>,
    updates: watch::Sender<u64>,
    held: Mutex<Vec<(oneshot::Sender<()>, oneshot::Sender<SpeakOutcome>)>>,
}

impl MockSynthesizer {
    pub fn new(playback: Playback) -> Self {
        Self {
            playback,
            gesture_required: false,
            spoken: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            voices: Mutex::new(sample_voices()),
            updates: watch::channel(0).0,
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn requiring_gesture(playback: Playback) -> Self {
        Self {
            gesture_required: true,
            ..Self::new(playback)
        }
    }

    /// Replace the catalogue and announce the change
    pub fn set_voices(&self, voices: Vec<VoiceDescriptor>) {
        *self.voices.lock().unwrap() = voices;
        self.updates.send_modify(|version| *version += 1);
    }

    pub fn spoken(&self) -> Vec<(String, SpeakOptions)> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn requires_user_gesture(&self) -> bool {
        self.gesture_required
    }

    async fn speak(&self, text: &str, options: &SpeakOptions) -> SpeakOutcome {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), options.clone()));

        let (started_tx, started_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();
        match self.playback {
            Playback::CompleteAfter(duration) => {
                tokio::spawn(async move {
                    started_tx.send(()).ok();
                    tokio::time::sleep(duration).await;
                    finished_tx.send(SpeakOutcome::Completed).ok();
                });
            }
            Playback::NeverStart => {
                self.held.lock().unwrap().push((started_tx, finished_tx));
            }
        }

        await_playback(started_rx, finished_rx, SYNTHESIS_START_TIMEOUT).await
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.held.lock().unwrap().clear();
        Ok(())
    }

    async fn list_voices(&self) -> Vec<VoiceDescriptor> {
        self.voices.lock().unwrap().clone()
    }

    fn voice_updates(&self) -> Option<watch::Receiver<u64>> {
        Some(self.updates.subscribe())
    }
}

/// Reply generator with a canned answer
pub struct MockReplies {
    answer: std::result::Result<String, String>,
    delay: Duration,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockReplies {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            answer: Err(reason.to_string()),
            ..Self::answering("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `(text, session_id)` pairs received so far
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyGenerator for MockReplies {
    async fn generate_reply(&self, text: &str, session_id: &str) -> Result<Reply> {
        self.requests
            .lock()
            .unwrap()
            .push((text.to_string(), session_id.to_string()));
        tokio::time::sleep(self.delay).await;
        match &self.answer {
            Ok(answer) => Ok(Reply::new(answer.clone())),
            Err(reason) => Err(Error::Reply(reason.clone())),
        }
    }
}

pub fn voice(id: &str, name: &str, language: &str, gender: Option<VoiceGender>) -> VoiceDescriptor {
    VoiceDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        language: language.to_string(),
        local: true,
        gender,
    }
}

/// A small catalogue in which "Samantha" is the default pick
pub fn sample_voices() -> Vec<VoiceDescriptor> {
    vec![
        voice("daniel", "Daniel", "en-GB", Some(VoiceGender::Male)),
        voice("samantha", "Samantha", "en-US", Some(VoiceGender::Female)),
        voice("amelie", "Amelie", "fr-CA", Some(VoiceGender::Female)),
    ]
}

/// Engine wired to mocks, plus handles to inspect them
pub struct Harness {
    pub engine: ConversationEngine,
    pub recognizer: Arc<MockRecognizer>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub replies: Arc<MockReplies>,
}

impl Harness {
    pub fn new(recognizer: MockRecognizer, synthesizer: MockSynthesizer, replies: MockReplies) -> Self {
        let recognizer = Arc::new(recognizer);
        let synthesizer = Arc::new(synthesizer);
        let replies = Arc::new(replies);
        let engine = ConversationEngine::new(
            Arc::clone(&recognizer) as Arc<dyn Recognizer>,
            Arc::clone(&synthesizer) as Arc<dyn Synthesizer>,
            Arc::clone(&replies) as Arc<dyn ReplyGenerator>,
            EngineSettings::default(),
        );
        Self {
            engine,
            recognizer,
            synthesizer,
            replies,
        }
    }

    /// Start a conversation, returning its event stream
    pub async fn start(&self, session_id: &str) -> mpsc::UnboundedReceiver<ConversationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.engine
            .start_conversation(session_id, Arc::new(tx))
            .await
            .expect("conversation should start");
        rx
    }
}

/// Let spawned tasks run while virtual time moves forward by `ms`
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Everything emitted so far
pub fn drain(events: &mut mpsc::UnboundedReceiver<ConversationEvent>) -> Vec<ConversationEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
