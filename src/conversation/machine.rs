//! Turn-taking state machine
//!
//! Pure: [`ConversationMachine::handle`] maps an input to the effects the
//! engine must carry out. Nothing here touches adapters, tasks or clocks, so
//! every transition is testable on its own.

use std::time::Duration;

use super::ConversationEvent;
use crate::agent::Reply;
use crate::voice::{RecognitionEvent, SpeakOutcome, normalize};

/// Where the conversation is within a turn
///
/// A single value, so listening, processing and speaking are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Between turns (or not started)
    #[default]
    Idle,
    Listening,
    /// Waiting on the reply generator
    Processing,
    Speaking,
    Ended,
}

/// Delays before listening resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTiming {
    /// After silence or an empty transcript
    pub no_speech_restart: Duration,
    /// After the reply was spoken
    pub resume_after_speech: Duration,
}

impl Default for TurnTiming {
    fn default() -> Self {
        Self {
            no_speech_restart: Duration::from_millis(1000),
            resume_after_speech: Duration::from_millis(500),
        }
    }
}

/// Something that happened to the conversation
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Start,
    Recognition(RecognitionEvent),
    ReplyReady(Reply),
    ReplyFailed(String),
    SpeechFinished(SpeakOutcome),
    ResumeDue { ticket: u64 },
    Stop,
}

/// Work the engine carries out for a transition, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartRecognition,
    StopRecognition,
    StopSynthesis,
    RequestReply { transcript: String },
    Speak { text: String },
    ScheduleResume { ticket: u64, delay: Duration },
    /// Abort reply, speech and timer tasks
    CancelPending,
    Emit(ConversationEvent),
}

/// State of one conversation
#[derive(Debug, Default)]
pub struct ConversationMachine {
    phase: Phase,
    started: bool,
    timing: TurnTiming,
    user_text: Option<String>,
    next_ticket: u64,
    pending_ticket: Option<u64>,
}

impl ConversationMachine {
    #[must_use]
    pub fn new(timing: TurnTiming) -> Self {
        Self {
            timing,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Started and not yet ended
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.started && self.phase != Phase::Ended
    }

    /// Apply one input
    ///
    /// Inputs that do not fit the current phase are dropped and yield no
    /// effects; nothing is queued for later.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        if self.phase == Phase::Ended {
            tracing::trace!(?input, "conversation ended, input dropped");
            return Vec::new();
        }

        match input {
            Input::Start => self.on_start(),
            Input::Stop => self.on_stop(),
            Input::Recognition(event) => self.on_recognition(event),
            Input::ReplyReady(reply) => self.on_reply(reply),
            Input::ReplyFailed(reason) => self.on_reply_failed(reason),
            Input::SpeechFinished(outcome) => self.on_speech_finished(&outcome),
            Input::ResumeDue { ticket } => self.on_resume(ticket),
        }
    }

    fn on_start(&mut self) -> Vec<Effect> {
        if self.started {
            tracing::debug!("conversation already started");
            return Vec::new();
        }
        self.started = true;
        self.listen()
    }

    fn on_stop(&mut self) -> Vec<Effect> {
        if !self.started {
            return Vec::new();
        }
        self.phase = Phase::Ended;
        self.pending_ticket = None;
        vec![
            Effect::CancelPending,
            Effect::StopRecognition,
            Effect::StopSynthesis,
            Effect::Emit(ConversationEvent::ConversationEnd),
        ]
    }

    fn on_recognition(&mut self, event: RecognitionEvent) -> Vec<Effect> {
        if self.phase != Phase::Listening {
            tracing::debug!(?event, phase = ?self.phase, "recognition event while not listening, dropped");
            return Vec::new();
        }

        match event {
            RecognitionEvent::ListeningStarted => Vec::new(),
            RecognitionEvent::SpeechStarted => vec![Effect::Emit(ConversationEvent::SpeechStart)],
            RecognitionEvent::SpeechEnded => vec![Effect::Emit(ConversationEvent::SpeechEnd)],
            RecognitionEvent::FinalTranscript(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return self.rest(self.timing.no_speech_restart);
                }

                self.phase = Phase::Processing;
                self.user_text = Some(text.to_string());
                vec![
                    Effect::StopRecognition,
                    Effect::Emit(ConversationEvent::Results {
                        transcripts: vec![text.to_string()],
                    }),
                    Effect::Emit(ConversationEvent::AiThinking),
                    Effect::RequestReply {
                        transcript: text.to_string(),
                    },
                ]
            }
            RecognitionEvent::Error(kind) if !kind.is_fatal() => {
                self.rest(self.timing.no_speech_restart)
            }
            RecognitionEvent::Error(kind) => {
                tracing::warn!(error = %kind, "recognition failed, ending conversation");
                self.phase = Phase::Ended;
                self.pending_ticket = None;
                vec![
                    Effect::CancelPending,
                    Effect::StopRecognition,
                    Effect::Emit(ConversationEvent::Error {
                        reason: kind.to_string(),
                    }),
                    Effect::Emit(ConversationEvent::ConversationEnd),
                ]
            }
        }
    }

    fn on_reply(&mut self, reply: Reply) -> Vec<Effect> {
        if self.phase != Phase::Processing {
            return Vec::new();
        }
        if reply.content.trim().is_empty() {
            return self.on_reply_failed("the assistant returned an empty reply".to_string());
        }

        let user_text = self.user_text.take().unwrap_or_default();
        let spoken = normalize(&reply.content);
        let response = Effect::Emit(ConversationEvent::AiResponse {
            reply: reply.content,
            user_text,
        });

        if spoken.is_empty() {
            let mut effects = vec![response];
            effects.extend(self.rest(self.timing.resume_after_speech));
            return effects;
        }

        self.phase = Phase::Speaking;
        vec![
            response,
            Effect::Emit(ConversationEvent::AiSpeaking),
            Effect::Speak { text: spoken },
        ]
    }

    fn on_reply_failed(&mut self, reason: String) -> Vec<Effect> {
        if self.phase != Phase::Processing {
            return Vec::new();
        }
        self.user_text = None;

        let mut effects = vec![Effect::Emit(ConversationEvent::Error { reason })];
        effects.extend(self.listen());
        effects
    }

    fn on_speech_finished(&mut self, outcome: &SpeakOutcome) -> Vec<Effect> {
        if self.phase != Phase::Speaking {
            return Vec::new();
        }
        if !outcome.was_heard() {
            tracing::warn!(?outcome, "reply was not fully spoken");
        }
        self.rest(self.timing.resume_after_speech)
    }

    fn on_resume(&mut self, ticket: u64) -> Vec<Effect> {
        if self.phase != Phase::Idle || self.pending_ticket != Some(ticket) {
            tracing::trace!(ticket, "stale resume timer");
            return Vec::new();
        }
        self.pending_ticket = None;
        self.listen()
    }

    fn listen(&mut self) -> Vec<Effect> {
        self.phase = Phase::Listening;
        vec![
            Effect::StartRecognition,
            Effect::Emit(ConversationEvent::Listening),
        ]
    }

    fn rest(&mut self, delay: Duration) -> Vec<Effect> {
        self.phase = Phase::Idle;
        self.next_ticket += 1;
        self.pending_ticket = Some(self.next_ticket);
        vec![Effect::ScheduleResume {
            ticket: self.next_ticket,
            delay,
        }]
    }
}
