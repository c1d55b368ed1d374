//! Conversation engine
//!
//! Owns one conversation at a time. A driver task holds the
//! [`ConversationMachine`] and consumes a single input queue fed by the
//! recognizer, the reply, speech and timer tasks, and the caller. Each input is
//! handled to completion before the next one is taken.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::callbacks::{ConversationCallbacks, dispatch};
use super::machine::{ConversationMachine, Effect, Input, Phase, TurnTiming};
use crate::agent::ReplyGenerator;
use crate::voice::{
    RecognitionErrorKind, RecognitionEvent, RecognitionOptions, Recognizer, SpeakOptions,
    SpeakOutcome, Synthesizer, VoiceDescriptor, VoiceSelector,
};
use crate::{Error, Result};

/// Engine settings that hold for every conversation
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub timing: TurnTiming,
    pub recognition: RecognitionOptions,
    /// Prosody and language for every utterance
    pub speak: SpeakOptions,
    pub selector: VoiceSelector,
    /// Voice name or id to use over the automatic pick, when present
    pub pinned_voice: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timing: TurnTiming::default(),
            recognition: RecognitionOptions::default(),
            speak: SpeakOptions::default(),
            selector: VoiceSelector::default(),
            pinned_voice: None,
        }
    }
}

/// Snapshot read by the probes
#[derive(Debug, Default)]
struct Status {
    phase: Phase,
    active: bool,
    session_id: Option<String>,
    has_mic_permission: bool,
    has_synthesis_permission: bool,
    user_has_interacted: bool,
    voices: Vec<VoiceDescriptor>,
    selected_voice: Option<VoiceDescriptor>,
    voice_override: bool,
}

#[derive(Debug, Default)]
struct Shared {
    status: Mutex<Status>,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Voice catalogue upkeep, shared with the catalogue watcher task
#[derive(Clone)]
struct VoiceCatalog {
    synthesizer: Arc<dyn Synthesizer>,
    shared: Arc<Shared>,
    selector: VoiceSelector,
    pinned: Option<String>,
}

impl VoiceCatalog {
    async fn refresh(&self) {
        let voices = self.synthesizer.list_voices().await;
        let mut status = self.shared.status();

        let keep = status.voice_override
            && status
                .selected_voice
                .as_ref()
                .is_some_and(|selected| voices.iter().any(|v| v.id == selected.id));

        if !keep {
            let pinned = self
                .pinned
                .as_deref()
                .and_then(|name| VoiceSelector::find(&voices, name));
            status.voice_override = pinned.is_some();
            status.selected_voice = pinned
                .or_else(|| self.selector.pick_default(&voices))
                .cloned();
        }

        tracing::debug!(
            count = voices.len(),
            selected = status.selected_voice.as_ref().map(|v| v.name.as_str()),
            "voice catalogue refreshed"
        );
        status.voices = voices;
    }
}

struct DriverHandle {
    inputs: mpsc::UnboundedSender<Input>,
    task: JoinHandle<()>,
}

/// Turn-based voice conversation engine
pub struct ConversationEngine {
    recognizer: Arc<dyn Recognizer>,
    synthesizer: Arc<dyn Synthesizer>,
    replies: Arc<dyn ReplyGenerator>,
    settings: EngineSettings,
    shared: Arc<Shared>,
    driver: tokio::sync::Mutex<Option<DriverHandle>>,
    voice_watch: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("recognizer", &self.recognizer.name())
            .field("synthesizer", &self.synthesizer.name())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl ConversationEngine {
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        synthesizer: Arc<dyn Synthesizer>,
        replies: Arc<dyn ReplyGenerator>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            recognizer,
            synthesizer,
            replies,
            settings,
            shared: Arc::new(Shared::default()),
            driver: tokio::sync::Mutex::new(None),
            voice_watch: Mutex::new(None),
        }
    }

    fn catalog(&self) -> VoiceCatalog {
        VoiceCatalog {
            synthesizer: Arc::clone(&self.synthesizer),
            shared: Arc::clone(&self.shared),
            selector: self.settings.selector.clone(),
            pinned: self.settings.pinned_voice.clone(),
        }
    }

    /// Request permissions, load voices and follow catalogue changes
    ///
    /// # Errors
    ///
    /// Returns error if a platform permission query fails
    pub async fn initialize(&self) -> Result<()> {
        let mic = self.recognizer.request_permission().await?;
        let synthesis = self.synthesizer.request_permission().await?;
        {
            let mut status = self.shared.status();
            status.has_mic_permission |= mic;
            status.has_synthesis_permission |= synthesis;
        }
        tracing::info!(
            microphone = mic,
            synthesis,
            recognizer = self.recognizer.name(),
            synthesizer = self.synthesizer.name(),
            "conversation engine initialized"
        );

        // Subscribe first so a catalogue answering the refresh is not missed
        let updates = self.synthesizer.voice_updates();
        self.refresh_voices().await;

        let mut watch = self.voice_watch.lock().unwrap_or_else(PoisonError::into_inner);
        if watch.is_none()
            && let Some(mut updates) = updates
        {
            let catalog = self.catalog();
            *watch = Some(tokio::spawn(async move {
                while updates.changed().await.is_ok() {
                    catalog.refresh().await;
                }
            }));
        }
        Ok(())
    }

    /// Begin a conversation
    ///
    /// Any previous conversation is stopped first. Resolves once the first
    /// listening attempt has been made.
    ///
    /// # Errors
    ///
    /// Returns `PermissionRequired` without microphone permission, or the
    /// recognizer's error if listening could not start
    pub async fn start_conversation(
        &self,
        session_id: impl Into<String>,
        callbacks: Arc<dyn ConversationCallbacks>,
    ) -> Result<()> {
        if !self.has_microphone_permission() {
            return Err(Error::PermissionRequired(
                "microphone permission has not been granted".to_string(),
            ));
        }

        self.stop_conversation().await;

        let session_id = session_id.into();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (recognition_tx, recognition_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let mut status = self.shared.status();
            status.session_id = Some(session_id.clone());
            status.active = true;
            status.phase = Phase::Idle;
        }

        let driver = Driver {
            machine: ConversationMachine::new(self.settings.timing),
            recognizer: Arc::clone(&self.recognizer),
            synthesizer: Arc::clone(&self.synthesizer),
            replies: Arc::clone(&self.replies),
            callbacks,
            session_id: session_id.clone(),
            recognition_options: self.settings.recognition.clone(),
            speak_options: self.settings.speak.clone(),
            shared: Arc::clone(&self.shared),
            inputs: inputs_tx.clone(),
            recognition: recognition_tx,
            ready: Some(ready_tx),
            reply_task: None,
            speak_task: None,
            timer_task: None,
        };

        let task = tokio::spawn(driver.run(inputs_rx, recognition_rx));
        inputs_tx.send(Input::Start).ok();
        *self.driver.lock().await = Some(DriverHandle {
            inputs: inputs_tx,
            task,
        });

        tracing::info!(session_id = %session_id, "conversation started");
        ready_rx
            .await
            .map_err(|_| Error::Conversation("conversation ended before listening".to_string()))?
    }

    /// End the current conversation; safe to call at any time
    pub async fn stop_conversation(&self) {
        let Some(driver) = self.driver.lock().await.take() else {
            return;
        };

        driver.inputs.send(Input::Stop).ok();
        if let Err(e) = driver.task.await
            && !e.is_cancelled()
        {
            tracing::error!(error = %e, "conversation driver failed");
        }
    }

    #[must_use]
    pub fn is_conversation_active(&self) -> bool {
        self.shared.status().active
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.phase() == Phase::Listening
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.phase() == Phase::Processing
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.phase() == Phase::Speaking
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.status().phase
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared.status().session_id.clone()
    }

    #[must_use]
    pub fn has_microphone_permission(&self) -> bool {
        self.shared.status().has_mic_permission
    }

    #[must_use]
    pub fn has_synthesis_permission(&self) -> bool {
        self.shared.status().has_synthesis_permission
    }

    #[must_use]
    pub fn available_voices(&self) -> Vec<VoiceDescriptor> {
        self.shared.status().voices.clone()
    }

    #[must_use]
    pub fn current_voice(&self) -> Option<VoiceDescriptor> {
        self.shared.status().selected_voice.clone()
    }

    /// Select a voice by name or id; `false` leaves the selection unchanged
    pub fn set_voice(&self, name: &str) -> bool {
        let mut status = self.shared.status();
        let Some(voice) = VoiceSelector::find(&status.voices, name).cloned() else {
            tracing::debug!(name, "voice not found");
            return false;
        };

        tracing::info!(voice = %voice.name, "voice selected");
        status.selected_voice = Some(voice);
        status.voice_override = true;
        true
    }

    /// Reload the voice catalogue from the synthesizer
    pub async fn refresh_voices(&self) {
        self.catalog().refresh().await;
    }

    /// Record that the user interacted, unblocking gesture-gated synthesis
    pub fn note_user_interaction(&self) {
        self.shared.status().user_has_interacted = true;
    }
}

impl Drop for ConversationEngine {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.task.abort();
        }
        if let Some(watch) = self
            .voice_watch
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watch.abort();
        }
    }
}

/// The task that runs one conversation
struct Driver {
    machine: ConversationMachine,
    recognizer: Arc<dyn Recognizer>,
    synthesizer: Arc<dyn Synthesizer>,
    replies: Arc<dyn ReplyGenerator>,
    callbacks: Arc<dyn ConversationCallbacks>,
    session_id: String,
    recognition_options: RecognitionOptions,
    speak_options: SpeakOptions,
    shared: Arc<Shared>,
    inputs: mpsc::UnboundedSender<Input>,
    recognition: mpsc::UnboundedSender<RecognitionEvent>,
    ready: Option<oneshot::Sender<Result<()>>>,
    reply_task: Option<JoinHandle<()>>,
    speak_task: Option<JoinHandle<()>>,
    timer_task: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<Input>,
        mut recognition: mpsc::UnboundedReceiver<RecognitionEvent>,
    ) {
        while self.machine.phase() != Phase::Ended {
            let input = tokio::select! {
                Some(input) = inputs.recv() => input,
                Some(event) = recognition.recv() => Input::Recognition(event),
                else => break,
            };
            self.step(input).await;
        }

        self.cancel_pending();
        {
            let mut status = self.shared.status();
            status.phase = Phase::Ended;
            status.active = false;
            status.session_id = None;
        }
        if let Some(ready) = self.ready.take() {
            ready
                .send(Err(Error::Conversation(
                    "conversation ended before listening".to_string(),
                )))
                .ok();
        }
        tracing::info!(session_id = %self.session_id, "conversation ended");
    }

    async fn step(&mut self, input: Input) {
        let mut queue = VecDeque::from([input]);

        while let Some(input) = queue.pop_front() {
            tracing::trace!(?input, phase = ?self.machine.phase(), "conversation input");
            let effects = self.machine.handle(input);
            self.publish_phase();

            for effect in effects {
                // A follow-up input supersedes the rest of the batch
                if let Some(follow_up) = self.execute(effect).await {
                    queue.push_back(follow_up);
                    break;
                }
            }
        }
    }

    fn publish_phase(&self) {
        let mut status = self.shared.status();
        status.phase = self.machine.phase();
        status.active = self.machine.is_active();
    }

    async fn execute(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::StartRecognition => return self.start_recognition().await,
            Effect::StopRecognition => {
                if let Err(e) = self.recognizer.stop().await {
                    tracing::warn!(error = %e, "failed to stop recognition");
                }
            }
            Effect::StopSynthesis => {
                if let Err(e) = self.synthesizer.stop().await {
                    tracing::warn!(error = %e, "failed to stop synthesis");
                }
            }
            Effect::RequestReply { transcript } => self.request_reply(transcript),
            Effect::Speak { text } => return self.speak(text),
            Effect::ScheduleResume { ticket, delay } => {
                abort(self.timer_task.take());
                let inputs = self.inputs.clone();
                self.timer_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inputs.send(Input::ResumeDue { ticket }).ok();
                }));
            }
            Effect::CancelPending => self.cancel_pending(),
            Effect::Emit(event) => {
                tracing::debug!(?event, "conversation event");
                dispatch(self.callbacks.as_ref(), &event);
            }
        }
        None
    }

    async fn start_recognition(&mut self) -> Option<Input> {
        let result = self
            .recognizer
            .start(&self.recognition_options, self.recognition.clone())
            .await;

        match result {
            Ok(()) => {
                if let Some(ready) = self.ready.take() {
                    ready.send(Ok(())).ok();
                }
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to start recognition");
                let kind = match &e {
                    Error::PermissionDenied(_) => RecognitionErrorKind::PermissionDenied,
                    other => RecognitionErrorKind::Other(other.to_string()),
                };
                if let Some(ready) = self.ready.take() {
                    ready.send(Err(e)).ok();
                }
                Some(Input::Recognition(RecognitionEvent::Error(kind)))
            }
        }
    }

    fn request_reply(&mut self, transcript: String) {
        abort(self.reply_task.take());
        let replies = Arc::clone(&self.replies);
        let session_id = self.session_id.clone();
        let inputs = self.inputs.clone();

        self.reply_task = Some(tokio::spawn(async move {
            let input = match replies.generate_reply(&transcript, &session_id).await {
                Ok(reply) => Input::ReplyReady(reply),
                Err(e) => {
                    tracing::warn!(error = %e, "reply generation failed");
                    Input::ReplyFailed(e.to_string())
                }
            };
            inputs.send(input).ok();
        }));
    }

    fn speak(&mut self, text: String) -> Option<Input> {
        let mut options = self.speak_options.clone();
        {
            let status = self.shared.status();
            if !status.has_synthesis_permission {
                tracing::warn!("no synthesis permission, skipping speech");
                return Some(Input::SpeechFinished(SpeakOutcome::Unavailable));
            }
            if self.synthesizer.requires_user_gesture() && !status.user_has_interacted {
                tracing::warn!("synthesis blocked until the user interacts, skipping speech");
                return Some(Input::SpeechFinished(SpeakOutcome::Unavailable));
            }
            if let Some(voice) = &status.selected_voice {
                options.voice_id = Some(voice.id.clone());
            }
        }

        abort(self.speak_task.take());
        let synthesizer = Arc::clone(&self.synthesizer);
        let inputs = self.inputs.clone();
        self.speak_task = Some(tokio::spawn(async move {
            let outcome = synthesizer.speak(&text, &options).await;
            inputs.send(Input::SpeechFinished(outcome)).ok();
        }));
        None
    }

    fn cancel_pending(&mut self) {
        abort(self.reply_task.take());
        abort(self.speak_task.take());
        abort(self.timer_task.take());
    }
}

fn abort(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
    }
}
