//! Hosted speech adapters
//!
//! Speech recognition and synthesis provided by an embedding host (a web view
//! running browser speech APIs, for instance). The adapters talk to the host
//! through a [`HostLink`]: commands flow out, events flow back in. Both are
//! plain serde types with a JSON encoding so any transport can carry them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use super::{
    RecognitionErrorKind, RecognitionEvent, RecognitionOptions, RecognitionSink, Recognizer,
    SpeakOptions, SpeakOutcome, Synthesizer, VoiceDescriptor, await_playback,
};
use crate::config::HostConfig;
use crate::{Error, Result};

/// Command sent to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostCommand {
    RequestMicrophone,
    StartRecognition {
        language: String,
        continuous: bool,
        interim_results: bool,
    },
    StopRecognition,
    Speak {
        utterance_id: u64,
        text: String,
        rate: f32,
        pitch: f32,
        volume: f32,
        language: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
    },
    CancelSpeech,
    ListVoices,
}

/// Event reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    MicrophonePermission {
        granted: bool,
    },
    RecognitionStart,
    RecognitionResult {
        transcript: String,
        #[serde(default)]
        is_final: bool,
    },
    SpeechStart,
    SpeechEnd,
    RecognitionError {
        error: String,
    },
    RecognitionEnd,
    UtteranceStart {
        utterance_id: u64,
    },
    UtteranceEnd {
        utterance_id: u64,
    },
    UtteranceError {
        utterance_id: u64,
        error: String,
    },
    VoicesChanged {
        voices: Vec<VoiceDescriptor>,
    },
}

/// Encode a command as one line of JSON
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode_command(command: &HostCommand) -> Result<String> {
    Ok(serde_json::to_string(command)?)
}

/// Map a host recognition error code; `None` means the error is ignored
#[must_use]
pub fn classify_recognition_error(code: &str) -> Option<RecognitionErrorKind> {
    match code {
        "not-allowed" | "service-not-allowed" => Some(RecognitionErrorKind::PermissionDenied),
        "no-speech" => Some(RecognitionErrorKind::NoSpeech),
        // Raised by our own stop request
        "aborted" => None,
        other => Some(RecognitionErrorKind::Other(other.to_string())),
    }
}

/// Map a host utterance error code to an outcome
#[must_use]
pub fn classify_utterance_error(code: &str) -> SpeakOutcome {
    match code {
        "interrupted" | "canceled" => SpeakOutcome::Cancelled,
        other => SpeakOutcome::Degraded(other.to_string()),
    }
}

#[derive(Default)]
struct RecognitionState {
    wants_listening: bool,
    options: Option<RecognitionOptions>,
    sink: Option<RecognitionSink>,
}

struct PendingUtterance {
    started: Option<oneshot::Sender<()>>,
    finished: oneshot::Sender<SpeakOutcome>,
}

struct HostState {
    commands: mpsc::UnboundedSender<HostCommand>,
    recognition: Mutex<RecognitionState>,
    permission: Mutex<Option<oneshot::Sender<bool>>>,
    /// Last word from the host was a microphone refusal
    microphone_denied: AtomicBool,
    utterances: Mutex<HashMap<u64, PendingUtterance>>,
    voices: Mutex<Vec<VoiceDescriptor>>,
    voice_updates: watch::Sender<u64>,
    next_utterance: AtomicU64,
    permission_timeout: Duration,
    start_timeout: Duration,
}

impl HostState {
    fn send(&self, command: HostCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Bridge("host disconnected".to_string()))
    }

    fn recognition(&self) -> std::sync::MutexGuard<'_, RecognitionState> {
        self.recognition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn utterances(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingUtterance>> {
        self.utterances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: RecognitionEvent) {
        let sink = self.recognition().sink.clone();
        if let Some(sink) = sink {
            sink.send(event).ok();
        }
    }

    fn finish_utterance(&self, utterance_id: u64, outcome: SpeakOutcome) {
        let pending = self.utterances().remove(&utterance_id);
        match pending {
            Some(pending) => {
                pending.finished.send(outcome).ok();
            }
            None => tracing::trace!(utterance_id, "event for unknown utterance"),
        }
    }

    fn deliver(&self, event: HostEvent) {
        tracing::trace!(?event, "host event");

        match event {
            HostEvent::MicrophonePermission { granted } => {
                self.microphone_denied.store(!granted, Ordering::Relaxed);
                let waiter = self
                    .permission
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(waiter) = waiter {
                    waiter.send(granted).ok();
                }
            }
            HostEvent::RecognitionStart => self.emit(RecognitionEvent::ListeningStarted),
            HostEvent::RecognitionResult {
                transcript,
                is_final,
            } => {
                let transcript = transcript.trim();
                if is_final && !transcript.is_empty() {
                    self.emit(RecognitionEvent::FinalTranscript(transcript.to_string()));
                }
            }
            HostEvent::SpeechStart => self.emit(RecognitionEvent::SpeechStarted),
            HostEvent::SpeechEnd => self.emit(RecognitionEvent::SpeechEnded),
            HostEvent::RecognitionError { error } => {
                let Some(kind) = classify_recognition_error(&error) else {
                    tracing::debug!(%error, "ignoring host recognition error");
                    return;
                };
                if kind == RecognitionErrorKind::PermissionDenied {
                    self.microphone_denied.store(true, Ordering::Relaxed);
                }
                let sink = {
                    let mut recognition = self.recognition();
                    recognition.wants_listening = false;
                    recognition.sink.take()
                };
                tracing::debug!(%kind, "host recognition error");
                if let Some(sink) = sink {
                    sink.send(RecognitionEvent::Error(kind)).ok();
                }
            }
            HostEvent::RecognitionEnd => {
                let restart = {
                    let recognition = self.recognition();
                    recognition
                        .wants_listening
                        .then(|| recognition.options.clone())
                        .flatten()
                };
                if let Some(options) = restart {
                    tracing::debug!("host recognition session expired, restarting");
                    if let Err(e) = self.send(start_command(&options)) {
                        tracing::warn!(error = %e, "failed to restart recognition");
                    }
                }
            }
            HostEvent::UtteranceStart { utterance_id } => {
                if let Some(pending) = self.utterances().get_mut(&utterance_id)
                    && let Some(started) = pending.started.take()
                {
                    started.send(()).ok();
                }
            }
            HostEvent::UtteranceEnd { utterance_id } => {
                self.finish_utterance(utterance_id, SpeakOutcome::Completed);
            }
            HostEvent::UtteranceError {
                utterance_id,
                error,
            } => {
                self.finish_utterance(utterance_id, classify_utterance_error(&error));
            }
            HostEvent::VoicesChanged { voices } => {
                tracing::debug!(count = voices.len(), "host voices changed");
                *self.voices.lock().unwrap_or_else(PoisonError::into_inner) = voices;
                self.voice_updates.send_modify(|generation| *generation += 1);
            }
        }
    }
}

fn start_command(options: &RecognitionOptions) -> HostCommand {
    HostCommand::StartRecognition {
        language: options.language.clone(),
        continuous: true,
        interim_results: false,
    }
}

/// Host side of the bridge
///
/// The transport reads [`HostCommand`]s from `commands` and hands everything
/// the host reports to `events`.
pub struct HostLink {
    pub commands: mpsc::UnboundedReceiver<HostCommand>,
    pub events: HostEvents,
}

impl std::fmt::Debug for HostLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLink").finish_non_exhaustive()
    }
}

/// Cloneable entry point for host events
#[derive(Clone)]
pub struct HostEvents {
    state: Arc<HostState>,
}

impl HostEvents {
    /// Deliver one event from the host
    pub fn deliver(&self, event: HostEvent) {
        self.state.deliver(event);
    }

    /// Decode and deliver one JSON-encoded event
    ///
    /// # Errors
    ///
    /// Returns error if the line is not a valid event
    pub fn deliver_json(&self, line: &str) -> Result<()> {
        let event: HostEvent = serde_json::from_str(line)?;
        self.deliver(event);
        Ok(())
    }
}

/// Create a connected recognizer, synthesizer and host link
#[must_use]
pub fn connect(
    config: &HostConfig,
    start_timeout: Duration,
) -> (HostedRecognizer, HostedSynthesizer, HostLink) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (voice_updates, _) = watch::channel(0);

    let state = Arc::new(HostState {
        commands: commands_tx,
        recognition: Mutex::new(RecognitionState::default()),
        permission: Mutex::new(None),
        microphone_denied: AtomicBool::new(false),
        utterances: Mutex::new(HashMap::new()),
        voices: Mutex::new(Vec::new()),
        voice_updates,
        next_utterance: AtomicU64::new(1),
        permission_timeout: config.permission_timeout,
        start_timeout,
    });

    (
        HostedRecognizer {
            state: Arc::clone(&state),
        },
        HostedSynthesizer {
            state: Arc::clone(&state),
        },
        HostLink {
            commands: commands_rx,
            events: HostEvents { state },
        },
    )
}

/// Continuous recognition performed by the host
pub struct HostedRecognizer {
    state: Arc<HostState>,
}

#[async_trait]
impl Recognizer for HostedRecognizer {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn request_permission(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        *self
            .state
            .permission
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.state.send(HostCommand::RequestMicrophone)?;

        match tokio::time::timeout(self.state.permission_timeout, rx).await {
            Ok(Ok(granted)) => {
                tracing::info!(granted, "microphone permission answered");
                Ok(granted)
            }
            Ok(Err(_)) => Ok(false),
            Err(_) => {
                tracing::warn!("host never answered microphone permission request");
                Ok(false)
            }
        }
    }

    async fn start(&self, options: &RecognitionOptions, sink: RecognitionSink) -> Result<()> {
        if self.state.microphone_denied.load(Ordering::Relaxed) {
            return Err(Error::PermissionDenied(
                "the host refused microphone access".to_string(),
            ));
        }

        {
            let mut recognition = self.state.recognition();
            if recognition.wants_listening {
                tracing::debug!("already listening");
                return Ok(());
            }
            recognition.wants_listening = true;
            recognition.options = Some(options.clone());
            recognition.sink = Some(sink);
        }

        if let Err(e) = self.state.send(start_command(options)) {
            let mut recognition = self.state.recognition();
            recognition.wants_listening = false;
            recognition.sink = None;
            return Err(e);
        }
        tracing::debug!(language = %options.language, "hosted recognition requested");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        {
            let mut recognition = self.state.recognition();
            if !recognition.wants_listening {
                return Ok(());
            }
            recognition.wants_listening = false;
            recognition.sink = None;
        }
        self.state.send(HostCommand::StopRecognition)
    }

    fn is_listening(&self) -> bool {
        self.state.recognition().wants_listening
    }
}

/// Speech synthesis performed by the host
pub struct HostedSynthesizer {
    state: Arc<HostState>,
}

#[async_trait]
impl Synthesizer for HostedSynthesizer {
    fn name(&self) -> &'static str {
        "hosted"
    }

    fn requires_user_gesture(&self) -> bool {
        true
    }

    async fn speak(&self, text: &str, options: &SpeakOptions) -> SpeakOutcome {
        let utterance_id = self.state.next_utterance.fetch_add(1, Ordering::Relaxed);
        let (started_tx, started_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();
        self.state.utterances().insert(
            utterance_id,
            PendingUtterance {
                started: Some(started_tx),
                finished: finished_tx,
            },
        );

        let command = HostCommand::Speak {
            utterance_id,
            text: text.to_string(),
            rate: options.rate,
            pitch: options.pitch,
            volume: options.volume,
            language: options.language.clone(),
            voice: options.voice_id.clone(),
        };
        if let Err(e) = self.state.send(command) {
            tracing::warn!(error = %e, "cannot reach host synthesis");
            self.state.utterances().remove(&utterance_id);
            return SpeakOutcome::Unavailable;
        }

        let outcome = await_playback(started_rx, finished_rx, self.state.start_timeout).await;
        if outcome == SpeakOutcome::TimedOut {
            self.state.utterances().remove(&utterance_id);
            self.state.send(HostCommand::CancelSpeech).ok();
        }
        outcome
    }

    async fn stop(&self) -> Result<()> {
        let pending: Vec<PendingUtterance> =
            self.state.utterances().drain().map(|(_, p)| p).collect();
        if pending.is_empty() {
            return Ok(());
        }

        for utterance in pending {
            utterance.finished.send(SpeakOutcome::Cancelled).ok();
        }
        self.state.send(HostCommand::CancelSpeech)
    }

    async fn list_voices(&self) -> Vec<VoiceDescriptor> {
        let voices = self
            .state
            .voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if voices.is_empty() {
            // The host answers with a voicesChanged event
            self.state.send(HostCommand::ListVoices).ok();
        }
        voices
    }

    fn voice_updates(&self) -> Option<watch::Receiver<u64>> {
        Some(self.state.voice_updates.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> (HostedRecognizer, HostedSynthesizer, HostLink) {
        connect(&HostConfig::default(), Duration::from_millis(2000))
    }

    #[test]
    fn test_command_wire_format() {
        let json = encode_command(&HostCommand::StartRecognition {
            language: "en-US".to_string(),
            continuous: true,
            interim_results: false,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"startRecognition","language":"en-US","continuous":true,"interimResults":false}"#
        );

        assert_eq!(
            encode_command(&HostCommand::CancelSpeech).unwrap(),
            r#"{"type":"cancelSpeech"}"#
        );
    }

    #[test]
    fn test_event_wire_format() {
        let event: HostEvent = serde_json::from_str(
            r#"{"type":"recognitionResult","transcript":"hello","isFinal":true}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            HostEvent::RecognitionResult {
                transcript: "hello".to_string(),
                is_final: true
            }
        );

        let event: HostEvent =
            serde_json::from_str(r#"{"type":"utteranceError","utteranceId":3,"error":"network"}"#)
                .unwrap();
        assert_eq!(
            event,
            HostEvent::UtteranceError {
                utterance_id: 3,
                error: "network".to_string()
            }
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            classify_recognition_error("not-allowed"),
            Some(RecognitionErrorKind::PermissionDenied)
        );
        assert_eq!(
            classify_recognition_error("service-not-allowed"),
            Some(RecognitionErrorKind::PermissionDenied)
        );
        assert_eq!(
            classify_recognition_error("no-speech"),
            Some(RecognitionErrorKind::NoSpeech)
        );
        assert_eq!(classify_recognition_error("aborted"), None);
        assert_eq!(
            classify_recognition_error("network"),
            Some(RecognitionErrorKind::Other("network".to_string()))
        );

        assert_eq!(classify_utterance_error("interrupted"), SpeakOutcome::Cancelled);
        assert_eq!(
            classify_utterance_error("not-allowed"),
            SpeakOutcome::Degraded("not-allowed".to_string())
        );
    }

    #[tokio::test]
    async fn test_interim_results_dropped() {
        let (recognizer, _synth, mut link) = link();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recognizer
            .start(&RecognitionOptions::default(), tx)
            .await
            .unwrap();
        assert!(matches!(
            link.commands.recv().await,
            Some(HostCommand::StartRecognition { .. })
        ));

        link.events.deliver(HostEvent::RecognitionResult {
            transcript: "hel".to_string(),
            is_final: false,
        });
        link.events.deliver(HostEvent::RecognitionResult {
            transcript: "  hello  ".to_string(),
            is_final: true,
        });

        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::FinalTranscript("hello".to_string()))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_stops_restart_on_end() {
        let (recognizer, _synth, mut link) = link();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recognizer
            .start(&RecognitionOptions::default(), tx)
            .await
            .unwrap();
        link.commands.recv().await;

        link.events.deliver(HostEvent::RecognitionError {
            error: "no-speech".to_string(),
        });
        link.events.deliver(HostEvent::RecognitionEnd);

        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::Error(RecognitionErrorKind::NoSpeech))
        );
        assert!(!recognizer.is_listening());
        assert!(link.commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_refused_after_denial() {
        let (recognizer, _synth, mut link) = link();
        let options = RecognitionOptions::default();
        link.events
            .deliver(HostEvent::MicrophonePermission { granted: false });

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = recognizer.start(&options, tx.clone()).await;
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
        assert!(!recognizer.is_listening());
        assert!(link.commands.try_recv().is_err());

        link.events
            .deliver(HostEvent::MicrophonePermission { granted: true });
        recognizer.start(&options, tx).await.unwrap();
        assert!(recognizer.is_listening());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (recognizer, _synth, mut link) = link();
        let (tx, _rx) = mpsc::unbounded_channel();
        let options = RecognitionOptions::default();
        recognizer.start(&options, tx.clone()).await.unwrap();
        recognizer.start(&options, tx).await.unwrap();

        assert!(link.commands.try_recv().is_ok());
        assert!(link.commands.try_recv().is_err());

        recognizer.stop().await.unwrap();
        recognizer.stop().await.unwrap();
        assert_eq!(link.commands.try_recv().ok(), Some(HostCommand::StopRecognition));
        assert!(link.commands.try_recv().is_err());
    }
}
