//! Conversational dispatch.
//!
//! Each inbound event runs in its own task. Events of the same conversation
//! are serialized by the session store's per-conversation lock, held for the
//! whole handling of the event, so a pending action is never read and
//! written by two events at once.

mod callbacks;
mod commands;
mod flows;
pub mod render;
mod reply;
pub mod router;

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinSet;

use crate::channels::{Channel, IncomingEvent};
use crate::config::BotConfig;
use crate::error::{AgentError, ChannelError, Error};
use crate::services::{
    ConversationalAgent, ImageFetcher, ImageGenerator, ImageStore, MetadataPinner, WalletService,
};
use crate::session::SessionStore;

pub use self::commands::{BOT_COMMANDS, command_suggestions, unknown_command_message};
pub use self::reply::{Reply, StatusMessage, TypingHeartbeat, agent_with_timeout};
pub use self::router::{ButtonAction, Command, Route, Router, WalletAction};

/// Collaborators the bot delegates to.
pub struct BotDeps {
    pub images: Arc<dyn ImageGenerator>,
    pub store: Arc<dyn ImageStore>,
    pub wallets: Arc<dyn WalletService>,
    pub agent: Arc<dyn ConversationalAgent>,
    pub fetcher: Arc<dyn ImageFetcher>,
    /// `None` disables collection creation.
    pub pinner: Option<Arc<dyn MetadataPinner>>,
}

pub struct Bot {
    deps: BotDeps,
    config: BotConfig,
    sessions: Arc<SessionStore>,
    router: Router,
}

impl Bot {
    pub fn new(deps: BotDeps, config: BotConfig) -> Self {
        Self {
            deps,
            config,
            sessions: Arc::new(SessionStore::new()),
            router: Router::new(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Consume `channel` events until the stream ends or Ctrl-C.
    pub async fn run(self: Arc<Self>, channel: Arc<dyn Channel>) -> Result<(), ChannelError> {
        let mut events = channel.start().await?;
        let mut tasks = JoinSet::new();
        tracing::info!(channel = channel.name(), "Bot started");

        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else {
                        tracing::info!(channel = channel.name(), "Event stream ended");
                        break;
                    };
                    let bot = Arc::clone(&self);
                    let channel = Arc::clone(&channel);
                    tasks.spawn(async move { bot.handle_event(channel, event).await });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Event task failed: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown requested");
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Event task failed: {}", e);
            }
        }
        channel.shutdown().await
    }

    /// Handle one event to completion. Never fails: handler errors are
    /// logged and answered with a single apology message.
    pub async fn handle_event(&self, channel: Arc<dyn Channel>, event: IncomingEvent) {
        // Button routing ignores pending state, so presses are acknowledged
        // before waiting on an earlier event of the same conversation.
        if event.is_button() {
            let ack = self
                .router
                .parse_button(&event.payload)
                .and_then(|action| action.ack_text());
            if let Err(e) = channel.acknowledge(&event, ack).await {
                tracing::warn!(event_id = %event.id, "Failed to acknowledge button: {}", e);
            }
        }

        let _turn = self.sessions.lock_conversation(&event.conversation_id).await;

        let pending = self.sessions.pending(&event.conversation_id).await;
        let route = self.router.route(&event, &pending);
        tracing::debug!(
            conversation_id = %event.conversation_id,
            event_id = %event.id,
            ?route,
            "Routed event"
        );

        let reply = Reply::new(channel, event.conversation_id.clone());
        let failure_text = failure_text(&route);
        if let Err(e) = self.dispatch(&reply, &event, route).await {
            tracing::error!(
                conversation_id = %event.conversation_id,
                user_id = %event.user_id,
                code = e.code(),
                domain = ?e.domain(),
                retryable = e.is_retryable(),
                "Handler failed: {}",
                e
            );
            let text = match e {
                Error::Agent(AgentError::Timeout { .. }) => render::TIMED_OUT,
                _ => failure_text,
            };
            if let Err(e) = reply.text(text).await {
                tracing::warn!(conversation_id = %event.conversation_id, "Failed to send error message: {}", e);
            }
        }
    }

    async fn dispatch(
        &self,
        reply: &Reply,
        event: &IncomingEvent,
        route: Route,
    ) -> Result<(), Error> {
        let user_id = event.user_id.as_str();
        match route {
            Route::Continue { pending, text } => {
                self.continue_pending(reply, user_id, pending, &text).await
            }
            Route::Command(command) => self.handle_command(reply, user_id, command).await,
            Route::Button(action) => self.handle_button(reply, user_id, action).await,
            Route::Fallback(text) => self.handle_free_text(reply, user_id, &text).await,
            Route::Ignore => {
                tracing::debug!(payload = %event.payload, "Ignoring unroutable event");
                Ok(())
            }
        }
    }
}

/// Apology sent when the handler for `route` fails.
fn failure_text(route: &Route) -> &'static str {
    match route {
        Route::Button(ButtonAction::Generate { .. })
        | Route::Command(Command::Transparent { .. }) => {
            "Sorry, there was an error generating your image. Please try again later."
        }
        Route::Button(ButtonAction::ViewImages) | Route::Command(Command::MyImages) => {
            "Sorry, there was an error fetching your images. Please try again later."
        }
        Route::Button(ButtonAction::OpenWallet) | Route::Command(Command::Wallet) => {
            "Sorry, there was an error opening your wallet settings. Please try again later."
        }
        Route::Button(ButtonAction::Wallet(action)) => match action {
            WalletAction::Create => {
                "Sorry, there was an error creating your wallet. Please try again later."
            }
            WalletAction::View => {
                "Sorry, there was an error viewing your wallet. Please try again later."
            }
            WalletAction::Export => {
                "Sorry, there was an error exporting your wallet. Please try again later."
            }
            WalletAction::Delegate => {
                "Sorry, there was an error enabling the server session. Please try again later."
            }
            WalletAction::Revoke => {
                "Sorry, there was an error revoking the server session. Please try again later."
            }
        },
        Route::Button(ButtonAction::CreateCollection { .. }) => {
            "Sorry, there was an error creating the NFT collection. Please try again later."
        }
        Route::Continue { .. } | Route::Fallback(_) => {
            "Sorry, there was an error processing your message. Please try again later."
        }
        _ => render::GENERIC_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_text_per_route() {
        assert!(
            failure_text(&Route::Button(ButtonAction::Generate {
                prompt: "x".to_string(),
                transparent: false
            }))
            .contains("generating your image")
        );
        assert!(failure_text(&Route::Fallback("hi".to_string())).contains("processing your message"));
        assert!(
            failure_text(&Route::Button(ButtonAction::Wallet(WalletAction::Revoke)))
                .contains("revoking")
        );
        assert_eq!(
            failure_text(&Route::Command(Command::Help)),
            render::GENERIC_ERROR
        );
    }
}
