//! Telegram Bot API channel (long polling).
//!
//! Updates are pulled with `getUpdates`; replies go out through
//! `sendMessage`, `sendPhoto` and friends. The bot token is part of every
//! request URL, so transport errors are always stripped of their URL before
//! they reach a log line.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use crate::channels::{
    Channel, EventStream, IncomingEvent, Keyboard, MessageHandle, OutgoingImage, OutgoingMessage,
};
use crate::config::TelegramConfig;
use crate::error::ChannelError;

const CHANNEL_NAME: &str = "telegram";

/// Telegram rejects longer message texts.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Telegram rejects longer photo captions.
const MAX_CAPTION_CHARS: usize = 1024;

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(3);

/// Slash command advertised in the client's command menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Me {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineKeyboardButton<'a>>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

fn keyboard_markup(buttons: &Keyboard) -> Option<InlineKeyboardMarkup<'_>> {
    if buttons.is_empty() {
        return None;
    }
    Some(InlineKeyboardMarkup {
        inline_keyboard: buttons
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| InlineKeyboardButton {
                        text: &b.label,
                        callback_data: &b.payload,
                    })
                    .collect()
            })
            .collect(),
    })
}

/// Convert one update into an event, applying the owner restriction.
///
/// Returns `None` for update types the bot does not handle (edits, photos,
/// stickers, channel posts) and for senders other than the owner.
pub(crate) fn update_to_event(update: Update, owner_id: Option<i64>) -> Option<IncomingEvent> {
    let allowed = |user: &User| owner_id.is_none_or(|owner| owner == user.id);

    if let Some(query) = update.callback_query {
        if !allowed(&query.from) {
            tracing::debug!(user_id = query.from.id, "Ignoring callback from non-owner");
            return None;
        }
        let conversation_id = query
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(query.from.id);
        let mut event = IncomingEvent::button(
            CHANNEL_NAME,
            conversation_id.to_string(),
            query.from.id.to_string(),
            query.data.unwrap_or_default(),
        )
        .with_callback_id(query.id);
        if let Some(name) = display_name(&query.from) {
            event = event.with_user_name(name);
        }
        return Some(event);
    }

    let message = update.message?;
    let from = message.from?;
    let text = message.text?;
    if !allowed(&from) {
        tracing::debug!(user_id = from.id, "Ignoring message from non-owner");
        return None;
    }

    let mut event = IncomingEvent::text(
        CHANNEL_NAME,
        message.chat.id.to_string(),
        from.id.to_string(),
        text,
    );
    if let Some(name) = display_name(&from) {
        event = event.with_user_name(name);
    }
    Some(event)
}

fn display_name(user: &User) -> Option<String> {
    user.username.clone().or_else(|| user.first_name.clone())
}

/// Split text into Telegram-sized chunks on char boundaries.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Thin Bot API client shared by the channel and its polling task.
struct BotApi {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl BotApi {
    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.base_url,
            self.token.expose_secret(),
            method
        )
    }

    fn transport_error(&self, method: &str, e: reqwest::Error) -> ChannelError {
        ChannelError::Http(format!("{method}: {}", e.without_url()))
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, ChannelError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(method, e))?;
        self.parse(method, response).await
    }

    async fn call_multipart<T>(
        &self,
        method: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T, ChannelError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(method, e))?;
        self.parse(method, response).await
    }

    async fn parse<T>(&self, method: &str, response: reqwest::Response) -> Result<T, ChannelError>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
            ChannelError::InvalidMessage(format!(
                "{method} returned an unreadable body (HTTP {status}): {}",
                e.without_url()
            ))
        })?;

        if envelope.ok {
            return envelope.result.ok_or_else(|| {
                ChannelError::InvalidMessage(format!("{method} returned ok without a result"))
            });
        }

        let description = envelope
            .description
            .unwrap_or_else(|| format!("HTTP {status}"));
        Err(match envelope.error_code.unwrap_or(status.as_u16()) {
            401 | 403 => ChannelError::AuthFailed {
                name: CHANNEL_NAME.to_string(),
                reason: description,
            },
            429 => ChannelError::RateLimited {
                name: CHANNEL_NAME.to_string(),
                retry_after: envelope
                    .parameters
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs),
            },
            _ => ChannelError::SendFailed {
                name: CHANNEL_NAME.to_string(),
                reason: format!("{method}: {description}"),
            },
        })
    }
}

/// Telegram channel backed by Bot API long polling.
pub struct TelegramChannel {
    api: Arc<BotApi>,
    owner_id: Option<i64>,
    poll_timeout_secs: u64,
    commands: Vec<BotCommand>,
    shutdown_tx: watch::Sender<bool>,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Result<Self, ChannelError> {
        // The long poll itself must finish before the client gives up.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 30))
            .build()
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            api: Arc::new(BotApi {
                client,
                base_url: config.api_base_url.clone(),
                token: config.bot_token.clone(),
            }),
            owner_id: config.owner_id,
            poll_timeout_secs: config.poll_timeout_secs,
            commands: Vec::new(),
            shutdown_tx,
        })
    }

    /// Commands registered with `setMyCommands` when the channel starts.
    pub fn with_commands(mut self, commands: &[(&str, &str)]) -> Self {
        self.commands = commands
            .iter()
            .map(|(command, description)| BotCommand {
                command: command.to_string(),
                description: description.to_string(),
            })
            .collect();
        self
    }

    fn message_id(handle: &MessageHandle) -> Result<i64, ChannelError> {
        handle.0.parse().map_err(|_| {
            ChannelError::InvalidMessage(format!("not a Telegram message id: {}", handle.0))
        })
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let me: Me = self
            .api
            .call("getMe", &serde_json::json!({}))
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(
            bot = me.username.as_deref().unwrap_or("unknown"),
            "Telegram bot authenticated"
        );

        // Long polling fails while a webhook is registered.
        let _: bool = self
            .api
            .call(
                "deleteWebhook",
                &serde_json::json!({ "drop_pending_updates": false }),
            )
            .await?;

        if !self.commands.is_empty()
            && let Err(e) = self
                .api
                .call::<_, bool>(
                    "setMyCommands",
                    &serde_json::json!({ "commands": self.commands }),
                )
                .await
        {
            tracing::warn!("Failed to register bot commands: {}", e);
        }

        let (tx, rx) = mpsc::channel(64);
        let api = Arc::clone(&self.api);
        let owner_id = self.owner_id;
        let poll_timeout = self.poll_timeout_secs;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            loop {
                let request = serde_json::json!({
                    "offset": offset,
                    "timeout": poll_timeout,
                    "allowed_updates": ["message", "callback_query"],
                });

                let result = tokio::select! {
                    r = api.call::<_, Vec<Update>>("getUpdates", &request) => r,
                    _ = shutdown_rx.changed() => break,
                };

                match result {
                    Ok(updates) => {
                        for update in updates {
                            offset = offset.max(update.update_id + 1);
                            let Some(event) = update_to_event(update, owner_id) else {
                                continue;
                            };
                            if tx.send(event).await.is_err() {
                                tracing::debug!("Event receiver dropped, stopping poller");
                                return;
                            }
                        }
                    }
                    Err(ChannelError::RateLimited { retry_after, .. }) => {
                        let wait = retry_after.unwrap_or(POLL_ERROR_BACKOFF);
                        tracing::warn!("getUpdates rate limited, waiting {:?}", wait);
                        tokio::time::sleep(wait).await;
                    }
                    Err(e) => {
                        tracing::warn!("getUpdates failed: {}", e);
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    }
                }
            }
            tracing::info!("Telegram poller stopped");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        message: OutgoingMessage,
    ) -> Result<MessageHandle, ChannelError> {
        let chunks = split_message(&message.text, MAX_MESSAGE_CHARS);
        let last = chunks.len().saturating_sub(1);
        let mut handle = None;

        for (i, chunk) in chunks.iter().enumerate() {
            let mut body = serde_json::json!({
                "chat_id": conversation_id,
                "text": chunk,
            });
            // Buttons ride on the final chunk.
            if i == last && let Some(markup) = keyboard_markup(&message.buttons) {
                body["reply_markup"] = serde_json::to_value(markup)
                    .map_err(|e| ChannelError::InvalidMessage(e.to_string()))?;
            }
            let sent: SentMessage = self.api.call("sendMessage", &body).await?;
            handle = Some(MessageHandle(sent.message_id.to_string()));
        }

        handle.ok_or_else(|| ChannelError::InvalidMessage("empty message".to_string()))
    }

    async fn delete_message(
        &self,
        conversation_id: &str,
        handle: &MessageHandle,
    ) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": conversation_id,
            "message_id": Self::message_id(handle)?,
        });
        self.api
            .call::<_, bool>("deleteMessage", &body)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::DeleteFailed {
                name: CHANNEL_NAME.to_string(),
                message_id: handle.0.clone(),
                reason: e.to_string(),
            })
    }

    async fn send_image(
        &self,
        conversation_id: &str,
        image: OutgoingImage,
    ) -> Result<MessageHandle, ChannelError> {
        let photo = reqwest::multipart::Part::bytes(image.bytes.to_vec())
            .file_name(image.filename.clone())
            .mime_str("image/png")
            .map_err(|e| ChannelError::InvalidMessage(format!("photo part: {}", e.without_url())))?;

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", conversation_id.to_string())
            .text("caption", truncate_chars(&image.caption, MAX_CAPTION_CHARS))
            .part("photo", photo);

        if let Some(markup) = keyboard_markup(&image.buttons) {
            let encoded = serde_json::to_string(&markup)
                .map_err(|e| ChannelError::InvalidMessage(e.to_string()))?;
            form = form.text("reply_markup", encoded);
        }

        let sent: SentMessage = self.api.call_multipart("sendPhoto", form).await?;
        Ok(MessageHandle(sent.message_id.to_string()))
    }

    async fn send_typing(&self, conversation_id: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "chat_id": conversation_id, "action": "typing" });
        self.api
            .call::<_, bool>("sendChatAction", &body)
            .await
            .map(|_| ())
    }

    async fn acknowledge(
        &self,
        event: &IncomingEvent,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        let Some(callback_id) = event.callback_id.as_deref() else {
            return Ok(());
        };
        let mut body = serde_json::json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = serde_json::Value::String(text.to_string());
        }
        self.api
            .call::<_, bool>("answerCallbackQuery", &body)
            .await
            .map(|_| ())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.api
            .call::<_, Me>("getMe", &serde_json::json!({}))
            .await
            .map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        let _ = self.shutdown_tx.send(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Button, EventKind};

    fn parse_update(json: &str) -> Update {
        serde_json::from_str(json).expect("valid update")
    }

    #[test]
    fn text_message_becomes_text_event() {
        let update = parse_update(
            r#"{"update_id":10,"message":{"message_id":5,"chat":{"id":-100},"from":{"id":42,"username":"alice","first_name":"Alice"},"text":"/gen a cat"}}"#,
        );

        let event = update_to_event(update, None).expect("event");
        assert_eq!(event.kind, EventKind::Text);
        assert_eq!(event.conversation_id, "-100");
        assert_eq!(event.user_id, "42");
        assert_eq!(event.payload, "/gen a cat");
        assert_eq!(event.user_name.as_deref(), Some("alice"));
        assert!(event.callback_id.is_none());
    }

    #[test]
    fn callback_query_becomes_button_event() {
        let update = parse_update(
            r#"{"update_id":11,"callback_query":{"id":"cbq-1","from":{"id":42,"first_name":"Alice"},"message":{"message_id":9,"chat":{"id":42}},"data":"mint_specific:img-1"}}"#,
        );

        let event = update_to_event(update, None).expect("event");
        assert_eq!(event.kind, EventKind::Button);
        assert_eq!(event.conversation_id, "42");
        assert_eq!(event.payload, "mint_specific:img-1");
        assert_eq!(event.callback_id.as_deref(), Some("cbq-1"));
        assert_eq!(event.user_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn non_text_messages_are_skipped() {
        let update = parse_update(
            r#"{"update_id":12,"message":{"message_id":5,"chat":{"id":1},"from":{"id":1}}}"#,
        );
        assert!(update_to_event(update, None).is_none());

        let edited = parse_update(r#"{"update_id":13,"edited_message":{"message_id":1}}"#);
        assert!(update_to_event(edited, None).is_none());
    }

    #[test]
    fn owner_restriction_filters_other_users() {
        let update = parse_update(
            r#"{"update_id":14,"message":{"message_id":5,"chat":{"id":7},"from":{"id":7},"text":"hi"}}"#,
        );
        assert!(update_to_event(update, Some(42)).is_none());

        let owner = parse_update(
            r#"{"update_id":15,"message":{"message_id":5,"chat":{"id":42},"from":{"id":42},"text":"hi"}}"#,
        );
        assert!(update_to_event(owner, Some(42)).is_some());
    }

    #[test]
    fn keyboard_markup_shape() {
        let buttons = vec![vec![
            Button::new("Standard Image", "genstandard:a%20cat"),
            Button::new("Transparent Image", "gentransparent:a%20cat"),
        ]];
        let json = serde_json::to_value(keyboard_markup(&buttons).unwrap()).unwrap();
        assert_eq!(json["inline_keyboard"][0][1]["text"], "Transparent Image");
        assert_eq!(
            json["inline_keyboard"][0][0]["callback_data"],
            "genstandard:a%20cat"
        );
        assert!(keyboard_markup(&Vec::new()).is_none());
    }

    #[test]
    fn api_error_envelope_parses_retry_after() {
        let envelope: ApiResponse<bool> = serde_json::from_str(
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests","parameters":{"retry_after":7}}"#,
        )
        .unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.error_code, Some(429));
        assert_eq!(envelope.parameters.and_then(|p| p.retry_after), Some(7));
    }

    #[test]
    fn long_messages_split_on_char_boundaries() {
        let text = "é".repeat(10);
        let chunks = split_message(&text, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], "éé");
        assert_eq!(truncate_chars("abcdefgh", 6), "abc...");
    }
}
