//! Conversation notifications

use serde::Serialize;
use tokio::sync::mpsc;

/// Something the caller is told about during a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ConversationEvent {
    /// Listening (re)started
    Listening,
    /// Final transcripts of the user's turn
    Results { transcripts: Vec<String> },
    /// The user started talking
    SpeechStart,
    /// The user stopped talking
    SpeechEnd,
    /// Something went wrong; the reason is user-presentable
    Error { reason: String },
    /// Waiting on the reply generator
    AiThinking,
    /// The raw reply and the utterance it answers
    AiResponse { reply: String, user_text: String },
    /// The reply is being spoken
    AiSpeaking,
    /// The conversation is over
    ConversationEnd,
}

/// Caller-supplied conversation event sink
///
/// Every method defaults to doing nothing.
pub trait ConversationCallbacks: Send + Sync {
    fn on_listening(&self) {}
    fn on_results(&self, _transcripts: &[String]) {}
    fn on_speech_start(&self) {}
    fn on_speech_end(&self) {}
    fn on_error(&self, _reason: &str) {}
    fn on_ai_thinking(&self) {}
    fn on_ai_response(&self, _reply: &str, _user_text: &str) {}
    fn on_ai_speaking(&self) {}
    fn on_conversation_end(&self) {}
}

/// Route an event to the matching callback
pub fn dispatch(callbacks: &dyn ConversationCallbacks, event: &ConversationEvent) {
    match event {
        ConversationEvent::Listening => callbacks.on_listening(),
        ConversationEvent::Results { transcripts } => callbacks.on_results(transcripts),
        ConversationEvent::SpeechStart => callbacks.on_speech_start(),
        ConversationEvent::SpeechEnd => callbacks.on_speech_end(),
        ConversationEvent::Error { reason } => callbacks.on_error(reason),
        ConversationEvent::AiThinking => callbacks.on_ai_thinking(),
        ConversationEvent::AiResponse { reply, user_text } => {
            callbacks.on_ai_response(reply, user_text);
        }
        ConversationEvent::AiSpeaking => callbacks.on_ai_speaking(),
        ConversationEvent::ConversationEnd => callbacks.on_conversation_end(),
    }
}

/// Events as a stream: each callback becomes a [`ConversationEvent`]
impl ConversationCallbacks for mpsc::UnboundedSender<ConversationEvent> {
    fn on_listening(&self) {
        self.send(ConversationEvent::Listening).ok();
    }

    fn on_results(&self, transcripts: &[String]) {
        self.send(ConversationEvent::Results {
            transcripts: transcripts.to_vec(),
        })
        .ok();
    }

    fn on_speech_start(&self) {
        self.send(ConversationEvent::SpeechStart).ok();
    }

    fn on_speech_end(&self) {
        self.send(ConversationEvent::SpeechEnd).ok();
    }

    fn on_error(&self, reason: &str) {
        self.send(ConversationEvent::Error {
            reason: reason.to_string(),
        })
        .ok();
    }

    fn on_ai_thinking(&self) {
        self.send(ConversationEvent::AiThinking).ok();
    }

    fn on_ai_response(&self, reply: &str, user_text: &str) {
        self.send(ConversationEvent::AiResponse {
            reply: reply.to_string(),
            user_text: user_text.to_string(),
        })
        .ok();
    }

    fn on_ai_speaking(&self) {
        self.send(ConversationEvent::AiSpeaking).ok();
    }

    fn on_conversation_end(&self) {
        self.send(ConversationEvent::ConversationEnd).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_round_trips_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = [
            ConversationEvent::Listening,
            ConversationEvent::Results {
                transcripts: vec!["hi".to_string()],
            },
            ConversationEvent::AiResponse {
                reply: "hello".to_string(),
                user_text: "hi".to_string(),
            },
            ConversationEvent::ConversationEnd,
        ];

        for event in &events {
            dispatch(&tx, event);
        }
        for event in events {
            assert_eq!(rx.try_recv().unwrap(), event);
        }
    }

    #[test]
    fn test_event_json() {
        let json = serde_json::to_string(&ConversationEvent::AiResponse {
            reply: "ok".to_string(),
            user_text: "go".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"aiResponse","reply":"ok","userText":"go"}"#);
    }
}
