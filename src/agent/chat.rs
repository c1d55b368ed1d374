//! OpenAI-compatible chat completions client

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{Reply, ReplyGenerator};
use crate::config::ChatConfig;
use crate::{Error, Result};

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

/// Reply generator backed by a chat completions endpoint
///
/// Keeps a bounded history per session so follow-up questions have context.
pub struct ChatService {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    max_history: usize,
    histories: Arc<RwLock<HashMap<String, VecDeque<ChatMessage>>>>,
}

impl ChatService {
    /// Create a client from chat configuration
    #[must_use]
    pub fn new(config: &ChatConfig, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_history: config.max_history,
            histories: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Messages sent for `text` given the session's history
    #[must_use]
    pub fn build_messages(&self, history: &VecDeque<ChatMessage>, text: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new("system", &self.system_prompt));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::new("user", text));
        messages
    }

    /// Current history for a session
    pub async fn history(&self, session_id: &str) -> VecDeque<ChatMessage> {
        self.histories
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Record a completed exchange, dropping the oldest messages past the bound
    pub async fn record_exchange(&self, session_id: &str, user: &str, assistant: &str) {
        let mut histories = self.histories.write().await;
        let history = histories.entry(session_id.to_string()).or_default();
        history.push_back(ChatMessage::new("user", user));
        history.push_back(ChatMessage::new("assistant", assistant));
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    /// Forget a session's history
    pub async fn clear_session(&self, session_id: &str) {
        self.histories.write().await.remove(session_id);
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model,
            messages,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Reply(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Reply(format!("chat API error {status}: {body}")));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Reply(format!("invalid chat response: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::Reply("chat response had no choices".to_string()))
    }
}

#[async_trait]
impl ReplyGenerator for ChatService {
    async fn generate_reply(&self, text: &str, session_id: &str) -> Result<Reply> {
        let history = self.history(session_id).await;
        let messages = self.build_messages(&history, text);

        tracing::debug!(
            session_id,
            model = %self.model,
            messages = messages.len(),
            "requesting reply"
        );
        let content = self.complete(&messages).await?;
        self.record_exchange(session_id, text, &content).await;

        tracing::info!(session_id, chars = content.len(), "reply received");
        Ok(Reply::new(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(max_history: usize) -> ChatService {
        ChatService::new(
            &ChatConfig {
                base_url: "http://localhost:9/v1/".to_string(),
                model: "test-model".to_string(),
                system_prompt: "Be brief.".to_string(),
                max_history,
                timeout: std::time::Duration::from_secs(5),
            },
            None,
        )
    }

    #[test]
    fn test_build_messages() {
        let chat = service(10);
        let mut history = VecDeque::new();
        history.push_back(ChatMessage::new("user", "hi"));
        history.push_back(ChatMessage::new("assistant", "hello"));

        let messages = chat.build_messages(&history, "check my calendar");
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(messages[0].content, "Be brief.");
        assert_eq!(messages[3].content, "check my calendar");
    }

    #[test]
    fn test_request_body() {
        let messages = vec![ChatMessage::new("user", "hi")];
        let body = serde_json::to_value(CompletionRequest {
            model: "m",
            messages: &messages,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})
        );
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let chat = service(4);
        for i in 0..3 {
            chat.record_exchange("s1", &format!("q{i}"), &format!("a{i}"))
                .await;
        }

        let history = chat.history("s1").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "q1");
        assert_eq!(history[3].content, "a2");
        assert!(chat.history("other").await.is_empty());

        chat.clear_session("s1").await;
        assert!(chat.history("s1").await.is_empty());
    }

    #[test]
    fn test_base_url_trimmed() {
        assert_eq!(service(2).base_url, "http://localhost:9/v1");
    }
}
