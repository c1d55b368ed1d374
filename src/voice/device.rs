//! Device-native speech adapters
//!
//! Recognition captures the default microphone, segments utterances with an
//! energy gate and transcribes each one with a cloud STT provider. Synthesis
//! renders text with a cloud TTS provider and plays it on the default output
//! device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::playback::{CancelFlag, CancelSlot, decode_mp3};
use super::{
    AudioCapture, AudioPlayback, RecognitionErrorKind, RecognitionEvent, RecognitionOptions,
    RecognitionSink, Recognizer, SAMPLE_RATE, SegmentEvent, SpeakOptions, SpeakOutcome,
    SpeechSegmenter, SpeechToText, Synthesizer, TextToSpeech, VoiceDescriptor, await_playback,
    await_render, probe_input, probe_output, samples_to_wav,
};
use crate::config::DeviceConfig;
use crate::{Error, Result};

/// Microphone recognition through a cloud STT provider
pub struct DeviceRecognizer {
    stt: Arc<SpeechToText>,
    settings: DeviceConfig,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceRecognizer {
    #[must_use]
    pub fn new(stt: SpeechToText, settings: DeviceConfig) -> Self {
        Self {
            stt: Arc::new(stt),
            settings,
            session: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Recognizer for DeviceRecognizer {
    fn name(&self) -> &'static str {
        "device"
    }

    async fn request_permission(&self) -> Result<bool> {
        let probe = tokio::task::spawn_blocking(probe_input)
            .await
            .map_err(|e| Error::Audio(e.to_string()))?;

        match probe {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(error = %e, "microphone unavailable");
                Ok(false)
            }
        }
    }

    async fn start(&self, options: &RecognitionOptions, sink: RecognitionSink) -> Result<()> {
        if self.is_listening() {
            tracing::debug!("already listening");
            return Ok(());
        }

        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let capture = tokio::task::spawn_blocking(move || AudioCapture::start(samples_tx))
            .await
            .map_err(|e| Error::Audio(e.to_string()))??;

        let session = ListenSession {
            capture,
            samples: samples_rx,
            stt: Arc::clone(&self.stt),
            language: options.language.clone(),
            settings: self.settings.clone(),
            sink,
        };
        let handle = tokio::spawn(session.run());

        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        tracing::info!(language = %options.language, "device recognition started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let handle = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            // Dropping the session future releases the capture stream
            handle.abort();
            tracing::debug!("device recognition stopped");
        }
        Ok(())
    }

    fn is_listening(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// One listening session; ends after a transcript attempt, a timeout or an error
struct ListenSession {
    capture: AudioCapture,
    samples: mpsc::UnboundedReceiver<Vec<f32>>,
    stt: Arc<SpeechToText>,
    language: String,
    settings: DeviceConfig,
    sink: RecognitionSink,
}

impl ListenSession {
    async fn run(mut self) {
        self.sink.send(RecognitionEvent::ListeningStarted).ok();

        let mut segmenter = SpeechSegmenter::new(self.settings.energy_threshold);
        let no_speech = tokio::time::sleep(self.settings.no_speech_timeout);
        tokio::pin!(no_speech);

        loop {
            tokio::select! {
                chunk = self.samples.recv() => {
                    let Some(chunk) = chunk else {
                        self.fail(RecognitionErrorKind::Other("audio capture ended".to_string()));
                        return;
                    };

                    match segmenter.push(&chunk) {
                        Some(SegmentEvent::SpeechStarted) => {
                            self.sink.send(RecognitionEvent::SpeechStarted).ok();
                        }
                        Some(SegmentEvent::Discarded) => {
                            self.sink.send(RecognitionEvent::SpeechEnded).ok();
                        }
                        Some(SegmentEvent::SpeechEnded(utterance)) => {
                            self.sink.send(RecognitionEvent::SpeechEnded).ok();
                            self.capture.stop();
                            let event = self.transcribe(&utterance).await;
                            self.sink.send(event).ok();
                            return;
                        }
                        None => {}
                    }
                }
                () = &mut no_speech, if !segmenter.in_speech() => {
                    tracing::debug!("no speech before timeout");
                    self.fail(RecognitionErrorKind::NoSpeech);
                    return;
                }
            }
        }
    }

    async fn transcribe(&self, utterance: &[f32]) -> RecognitionEvent {
        let wav = match samples_to_wav(utterance, SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => return RecognitionEvent::Error(RecognitionErrorKind::Other(e.to_string())),
        };

        match self.stt.transcribe(&wav, &self.language).await {
            Ok(text) if text.is_empty() => {
                RecognitionEvent::Error(RecognitionErrorKind::NoSpeech)
            }
            Ok(text) => RecognitionEvent::FinalTranscript(text),
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                RecognitionEvent::Error(RecognitionErrorKind::Other(e.to_string()))
            }
        }
    }

    fn fail(&mut self, kind: RecognitionErrorKind) {
        self.capture.stop();
        self.sink.send(RecognitionEvent::Error(kind)).ok();
    }
}

/// Speaker playback of cloud TTS audio
pub struct DeviceSynthesizer {
    tts: Arc<TextToSpeech>,
    render_timeout: Duration,
    start_timeout: Duration,
    current: CancelSlot,
    voices: tokio::sync::Mutex<Option<Vec<VoiceDescriptor>>>,
}

impl DeviceSynthesizer {
    /// `render_timeout` bounds fetching and decoding the audio;
    /// `start_timeout` bounds the output device starting to play it
    #[must_use]
    pub fn new(tts: TextToSpeech, render_timeout: Duration, start_timeout: Duration) -> Self {
        Self {
            tts: Arc::new(tts),
            render_timeout,
            start_timeout,
            current: Mutex::new(None),
            voices: tokio::sync::Mutex::new(None),
        }
    }

    fn cancel_current(&self) -> bool {
        let flag = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        flag.is_some_and(|flag| {
            flag.store(true, Ordering::Relaxed);
            true
        })
    }

    fn clear_if_current(&self, flag: &CancelFlag) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, flag)) {
            *current = None;
        }
    }
}

#[async_trait]
impl Synthesizer for DeviceSynthesizer {
    fn name(&self) -> &'static str {
        "device"
    }

    async fn request_permission(&self) -> Result<bool> {
        let probe = tokio::task::spawn_blocking(probe_output)
            .await
            .map_err(|e| Error::Audio(e.to_string()))?;

        match probe {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(error = %e, "speaker unavailable");
                Ok(false)
            }
        }
    }

    async fn speak(&self, text: &str, options: &SpeakOptions) -> SpeakOutcome {
        if text.trim().is_empty() {
            return SpeakOutcome::Completed;
        }
        self.cancel_current();

        let render = async {
            let audio = self
                .tts
                .synthesize(text, options.voice_id.as_deref(), options.rate)
                .await?;
            decode_mp3(&audio)
        };
        let samples = match await_render(render, self.render_timeout).await {
            Ok(samples) => samples,
            Err(outcome) => return outcome,
        };

        let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&cancel));

        let (started_tx, started_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();
        let volume = options.volume;
        let flag = Arc::clone(&cancel);

        tokio::task::spawn_blocking(move || {
            let playback = match AudioPlayback::new() {
                Ok(playback) => playback,
                Err(e) => {
                    finished_tx.send(SpeakOutcome::Degraded(e.to_string())).ok();
                    return;
                }
            };

            let outcome = match playback.play_blocking(samples, volume, &flag, move || {
                started_tx.send(()).ok();
            }) {
                Ok(true) => SpeakOutcome::Completed,
                Ok(false) => SpeakOutcome::Cancelled,
                Err(e) => SpeakOutcome::Degraded(e.to_string()),
            };
            finished_tx.send(outcome).ok();
        });

        let outcome = await_playback(started_rx, finished_rx, self.start_timeout).await;
        if outcome == SpeakOutcome::TimedOut {
            cancel.store(true, Ordering::Relaxed);
        }
        self.clear_if_current(&cancel);

        tracing::debug!(?outcome, "utterance finished");
        outcome
    }

    async fn stop(&self) -> Result<()> {
        if self.cancel_current() {
            tracing::debug!("device synthesis cancelled");
        }
        Ok(())
    }

    async fn list_voices(&self) -> Vec<VoiceDescriptor> {
        let mut cache = self.voices.lock().await;
        if let Some(voices) = cache.as_ref() {
            return voices.clone();
        }

        match self.tts.list_voices().await {
            Ok(voices) => {
                tracing::debug!(count = voices.len(), "loaded voice catalogue");
                *cache = Some(voices.clone());
                voices
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to list voices");
                Vec::new()
            }
        }
    }
}
