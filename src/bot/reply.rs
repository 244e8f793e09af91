//! Outbound helpers bound to one conversation.
//!
//! [`StatusMessage`] and [`TypingHeartbeat`] are the transient signals shown
//! while a collaborator call is in flight. Both are best-effort: failing to
//! delete a status message or to send a typing action is logged and never
//! reaches the user.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::channels::{Channel, Keyboard, MessageHandle, OutgoingImage, OutgoingMessage};
use crate::error::{AgentError, ChannelError};

/// A channel plus the conversation replies go to.
#[derive(Clone)]
pub struct Reply {
    channel: Arc<dyn Channel>,
    conversation_id: String,
}

impl Reply {
    pub fn new(channel: Arc<dyn Channel>, conversation_id: impl Into<String>) -> Self {
        Self {
            channel,
            conversation_id: conversation_id.into(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn text(&self, text: impl Into<String>) -> Result<MessageHandle, ChannelError> {
        self.channel
            .send_message(&self.conversation_id, OutgoingMessage::text(text))
            .await
    }

    pub async fn with_buttons(
        &self,
        text: impl Into<String>,
        buttons: Keyboard,
    ) -> Result<MessageHandle, ChannelError> {
        self.channel
            .send_message(
                &self.conversation_id,
                OutgoingMessage::text(text).with_buttons(buttons),
            )
            .await
    }

    pub async fn image(&self, image: OutgoingImage) -> Result<MessageHandle, ChannelError> {
        self.channel.send_image(&self.conversation_id, image).await
    }

    /// Delete a message, logging failures.
    pub async fn delete_quietly(&self, handle: &MessageHandle) {
        if let Err(e) = self
            .channel
            .delete_message(&self.conversation_id, handle)
            .await
        {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                message_id = %handle,
                "Failed to delete status message: {}",
                e
            );
        }
    }

    /// Start a typing heartbeat that lasts until the guard is dropped.
    pub fn typing(&self, interval: Duration) -> TypingHeartbeat {
        TypingHeartbeat::start(
            Arc::clone(&self.channel),
            self.conversation_id.clone(),
            interval,
        )
    }
}

/// An ephemeral "working" message.
///
/// Call [`StatusMessage::clear`] on every path once the work is done.
pub struct StatusMessage {
    reply: Reply,
    handle: Option<MessageHandle>,
}

impl StatusMessage {
    pub async fn send(reply: &Reply, text: &str) -> Result<Self, ChannelError> {
        let handle = reply.text(text).await?;
        Ok(Self {
            reply: reply.clone(),
            handle: Some(handle),
        })
    }

    /// Swap the current status for a new one.
    pub async fn replace(&mut self, text: &str) -> Result<(), ChannelError> {
        self.clear().await;
        self.handle = Some(self.reply.text(text).await?);
        Ok(())
    }

    pub async fn clear(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.reply.delete_quietly(&handle).await;
        }
    }
}

/// Periodic typing signal, aborted on drop.
pub struct TypingHeartbeat {
    task: JoinHandle<()>,
}

impl TypingHeartbeat {
    pub fn start(channel: Arc<dyn Channel>, conversation_id: String, every: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                // First tick fires immediately.
                ticker.tick().await;
                if let Err(e) = channel.send_typing(&conversation_id).await {
                    tracing::debug!(%conversation_id, "Typing signal failed: {}", e);
                }
            }
        });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TypingHeartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bound an agent call by `timeout`.
pub async fn agent_with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout { timeout }),
    }
}
