//! Delivery surfaces.
//!
//! A [`Channel`] turns a transport (Telegram, a local terminal) into a
//! stream of [`IncomingEvent`]s and renders outgoing messages, images and
//! transient status messages.

mod health;
mod repl;
mod telegram;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use uuid::Uuid;

use crate::error::ChannelError;

pub use self::health::{HealthServer, start_health_server};
pub use self::repl::ReplChannel;
pub use self::telegram::{BotCommand, TelegramChannel};

/// Stream of inbound events produced by [`Channel::start`].
pub type EventStream = Pin<Box<dyn Stream<Item = IncomingEvent> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A typed message.
    Text,
    /// An inline keyboard press carrying a structured payload.
    Button,
}

/// One inbound user action.
#[derive(Debug, Clone)]
pub struct IncomingEvent {
    pub id: Uuid,
    pub channel: String,
    pub conversation_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub kind: EventKind,
    /// Message text, or the button's callback payload.
    pub payload: String,
    /// Transport id used to acknowledge a button press.
    pub callback_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl IncomingEvent {
    fn new(
        channel: impl Into<String>,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: EventKind,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            user_name: None,
            kind,
            payload: payload.into(),
            callback_id: None,
            received_at: Utc::now(),
        }
    }

    /// A typed message.
    pub fn text(
        channel: impl Into<String>,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(channel, conversation_id, user_id, EventKind::Text, text)
    }

    /// A button press.
    pub fn button(
        channel: impl Into<String>,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::new(channel, conversation_id, user_id, EventKind::Button, payload)
    }

    pub fn with_callback_id(mut self, callback_id: impl Into<String>) -> Self {
        self.callback_id = Some(callback_id.into());
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn is_button(&self) -> bool {
        self.kind == EventKind::Button
    }
}

/// Inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub payload: String,
}

impl Button {
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// Rows of buttons, top to bottom.
pub type Keyboard = Vec<Vec<Button>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub buttons: Keyboard,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(mut self, buttons: Keyboard) -> Self {
        self.buttons = buttons;
        self
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingImage {
    pub bytes: Bytes,
    pub filename: String,
    pub caption: String,
    pub buttons: Keyboard,
}

/// Transport handle for a sent message, used to delete it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub String);

impl std::fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A delivery surface.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable name used in logs and errors.
    fn name(&self) -> &str;

    /// Begin receiving events.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        message: OutgoingMessage,
    ) -> Result<MessageHandle, ChannelError>;

    async fn delete_message(
        &self,
        conversation_id: &str,
        handle: &MessageHandle,
    ) -> Result<(), ChannelError>;

    async fn send_image(
        &self,
        conversation_id: &str,
        image: OutgoingImage,
    ) -> Result<MessageHandle, ChannelError>;

    /// Emit a short-lived "typing" signal.
    async fn send_typing(&self, conversation_id: &str) -> Result<(), ChannelError>;

    /// Acknowledge a button press so the client stops its progress spinner.
    ///
    /// No-op for text events.
    async fn acknowledge(
        &self,
        event: &IncomingEvent,
        text: Option<&str>,
    ) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
