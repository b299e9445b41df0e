use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{
    boundary::AssistantChat,
    error::{ReportError, Result},
};

pub const ASSISTANT_ERROR_REPLY: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            is_error: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            is_error: false,
        }
    }

    fn failure() -> Self {
        Self {
            role: MessageRole::Assistant,
            content: ASSISTANT_ERROR_REPLY.to_string(),
            is_error: true,
        }
    }
}

#[derive(Debug, Default)]
struct Transcript {
    messages: Vec<ChatMessage>,
    pending: bool,
}

/// Transcript with the general health assistant. Independent of any report.
#[derive(Clone)]
pub struct AssistantConversation {
    transcript: Arc<Mutex<Transcript>>,
    chat: Arc<dyn AssistantChat>,
}

impl AssistantConversation {
    pub fn new(chat: Arc<dyn AssistantChat>) -> Self {
        Self {
            transcript: Arc::new(Mutex::new(Transcript::default())),
            chat,
        }
    }

    /// Send a message and append both it and the reply to the transcript.
    /// A failed call appends an error reply instead of failing.
    pub async fn send(&self, message: &str) -> Result<ChatMessage> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ReportError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }

        {
            let mut transcript = self.transcript.lock().await;
            if transcript.pending {
                return Err(ReportError::Busy(
                    "the assistant is still answering".to_string(),
                ));
            }
            transcript.pending = true;
            transcript.messages.push(ChatMessage::user(message));
        }

        let reply = match self.chat.chat(message).await {
            Ok(content) => ChatMessage::assistant(content),
            Err(e) => {
                error!("Assistant chat failed: {}", e);
                ChatMessage::failure()
            }
        };

        let mut transcript = self.transcript.lock().await;
        transcript.pending = false;
        transcript.messages.push(reply.clone());
        info!("Assistant transcript has {} messages", transcript.messages.len());

        Ok(reply)
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.transcript.lock().await.messages.clone()
    }

    pub async fn is_pending(&self) -> bool {
        self.transcript.lock().await.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct EchoChat;

    #[async_trait]
    impl AssistantChat for EchoChat {
        async fn chat(&self, message: &str) -> Result<String> {
            Ok(format!("You said: {}", message))
        }
    }

    struct DownChat;

    #[async_trait]
    impl AssistantChat for DownChat {
        async fn chat(&self, _message: &str) -> Result<String> {
            Err(ReportError::TransportFailure("connection refused".to_string()))
        }
    }

    struct SlowChat {
        release: Notify,
    }

    #[async_trait]
    impl AssistantChat for SlowChat {
        async fn chat(&self, _message: &str) -> Result<String> {
            self.release.notified().await;
            Ok("done".to_string())
        }
    }

    #[tokio::test]
    async fn test_messages_are_appended_in_order() {
        let conversation = AssistantConversation::new(Arc::new(EchoChat));
        let reply = conversation.send("hello").await.unwrap();
        assert_eq!(reply, ChatMessage::assistant("You said: hello"));

        let messages = conversation.messages().await;
        assert_eq!(
            messages,
            vec![
                ChatMessage::user("hello"),
                ChatMessage::assistant("You said: hello"),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let conversation = AssistantConversation::new(Arc::new(EchoChat));
        assert!(matches!(
            conversation.send("  ").await,
            Err(ReportError::InvalidInput(_))
        ));
        assert!(conversation.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_appends_error_reply() {
        let conversation = AssistantConversation::new(Arc::new(DownChat));
        let reply = conversation.send("hello").await.unwrap();
        assert!(reply.is_error);
        assert_eq!(reply.content, ASSISTANT_ERROR_REPLY);
        assert!(!conversation.is_pending().await);
        assert_eq!(conversation.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn test_send_while_pending_is_busy() {
        let chat = Arc::new(SlowChat {
            release: Notify::new(),
        });
        let conversation = AssistantConversation::new(chat.clone());

        let first = {
            let conversation = conversation.clone();
            tokio::spawn(async move { conversation.send("first").await })
        };
        while !conversation.is_pending().await {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            conversation.send("second").await,
            Err(ReportError::Busy(_))
        ));

        chat.release.notify_one();
        assert_eq!(first.await.unwrap().unwrap().content, "done");
    }
}
