//! Event routing.
//!
//! Text is routed to a pending continuation first, then to explicit
//! commands, then to the conversational agent. Buttons are matched against
//! their payload and never captured by a pending continuation.

use crate::channels::{EventKind, IncomingEvent};
use crate::session::PendingAction;

/// Explicit `/command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    /// `/gen <prompt>` or `/generate <prompt>`. The prompt may be empty.
    Generate { prompt: String },
    /// `/transparent <prompt>`.
    Transparent { prompt: String },
    MyImages,
    Wallet,
    /// Anything else; carries the command name as typed, without the `/`.
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletAction {
    Create,
    View,
    Export,
    Delegate,
    Revoke,
}

/// A recognised button payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    RequestImage,
    OpenWallet,
    ViewImages,
    ShowHelp,
    BackToMenu,
    Wallet(WalletAction),
    CancelMintSpecific,
    Generate { prompt: String, transparent: bool },
    CreateCollection { image_id: String },
    MintSpecific { image_id: String },
}

impl ButtonAction {
    /// Short text shown by the client while the press is handled.
    pub fn ack_text(&self) -> Option<&'static str> {
        match self {
            Self::Generate {
                transparent: false, ..
            } => Some("Generating standard image..."),
            Self::Generate {
                transparent: true, ..
            } => Some("Generating transparent image..."),
            Self::Wallet(WalletAction::Create) => Some("Creating wallet..."),
            Self::Wallet(WalletAction::View) => Some("Fetching wallet address..."),
            Self::Wallet(WalletAction::Export) => Some("Exporting wallet..."),
            Self::Wallet(WalletAction::Delegate) => Some("Enabling server session..."),
            Self::Wallet(WalletAction::Revoke) => Some("Revoking server session..."),
            Self::CreateCollection { .. } => Some("Starting NFT Collection creation..."),
            Self::MintSpecific { .. } => Some("Mint to Specific Collection..."),
            _ => None,
        }
    }
}

/// Where an event goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Text answering the conversation's pending action.
    Continue { pending: PendingAction, text: String },
    Command(Command),
    Button(ButtonAction),
    /// Free text for the conversational agent.
    Fallback(String),
    /// Stale or malformed input. Buttons are still acknowledged.
    Ignore,
}

pub const REQUEST_IMAGE: &str = "request_image";
pub const OPEN_WALLET: &str = "open_wallet";
pub const VIEW_IMAGES: &str = "view_images";
pub const SHOW_HELP: &str = "show_help";
pub const BACK_TO_MENU: &str = "back_to_menu";
pub const WALLET_CREATE: &str = "wallet:create";
pub const WALLET_VIEW: &str = "wallet:view";
pub const WALLET_EXPORT: &str = "wallet:export";
pub const WALLET_DELEGATE: &str = "wallet:delegate";
pub const WALLET_REVOKE: &str = "wallet:revoke";
pub const CANCEL_MINT_SPECIFIC: &str = "cancel_mint_specific";

pub const GEN_STANDARD_PREFIX: &str = "genstandard";
pub const GEN_TRANSPARENT_PREFIX: &str = "gentransparent";
pub const CREATE_COLLECTION_PREFIX: &str = "create_collection";
pub const MINT_SPECIFIC_PREFIX: &str = "mint_specific";

/// Routes events using the conversation's current pending action.
pub struct Router {
    command_prefix: String,
}

impl Router {
    pub fn new() -> Self {
        Self {
            command_prefix: "/".to_string(),
        }
    }

    pub fn route(&self, event: &IncomingEvent, pending: &PendingAction) -> Route {
        match event.kind {
            EventKind::Button => self
                .parse_button(&event.payload)
                .map(Route::Button)
                .unwrap_or(Route::Ignore),
            EventKind::Text => self.route_text(&event.payload, pending),
        }
    }

    fn route_text(&self, text: &str, pending: &PendingAction) -> Route {
        // Pending continuations see the raw text, commands included.
        if !pending.is_none() {
            return Route::Continue {
                pending: pending.clone(),
                text: text.to_string(),
            };
        }

        let content = text.trim();
        if content.is_empty() {
            return Route::Ignore;
        }
        if let Some(rest) = content.strip_prefix(&self.command_prefix) {
            return Route::Command(parse_command(rest));
        }
        Route::Fallback(content.to_string())
    }

    /// The image prompt in a reply to the prompt request. A leading `/gen`
    /// or `/generate` (with an optional `@bot` suffix) is dropped.
    pub fn image_prompt(&self, text: &str) -> String {
        let content = text.trim();
        if let Some(rest) = content.strip_prefix(&self.command_prefix)
            && let Command::Generate { prompt } = parse_command(rest)
        {
            return prompt;
        }
        content.to_string()
    }

    /// Parse a button payload. `None` means the payload is unroutable.
    pub fn parse_button(&self, payload: &str) -> Option<ButtonAction> {
        let action = match payload {
            REQUEST_IMAGE => ButtonAction::RequestImage,
            OPEN_WALLET => ButtonAction::OpenWallet,
            VIEW_IMAGES => ButtonAction::ViewImages,
            SHOW_HELP => ButtonAction::ShowHelp,
            BACK_TO_MENU => ButtonAction::BackToMenu,
            WALLET_CREATE => ButtonAction::Wallet(WalletAction::Create),
            WALLET_VIEW => ButtonAction::Wallet(WalletAction::View),
            WALLET_EXPORT => ButtonAction::Wallet(WalletAction::Export),
            WALLET_DELEGATE => ButtonAction::Wallet(WalletAction::Delegate),
            WALLET_REVOKE => ButtonAction::Wallet(WalletAction::Revoke),
            CANCEL_MINT_SPECIFIC => ButtonAction::CancelMintSpecific,
            _ => {
                let (prefix, argument) = payload.split_once(':')?;
                if argument.is_empty() {
                    return None;
                }
                match prefix {
                    GEN_STANDARD_PREFIX => ButtonAction::Generate {
                        prompt: decode_argument(argument)?,
                        transparent: false,
                    },
                    GEN_TRANSPARENT_PREFIX => ButtonAction::Generate {
                        prompt: decode_argument(argument)?,
                        transparent: true,
                    },
                    CREATE_COLLECTION_PREFIX => ButtonAction::CreateCollection {
                        image_id: argument.to_string(),
                    },
                    MINT_SPECIFIC_PREFIX => ButtonAction::MintSpecific {
                        image_id: argument.to_string(),
                    },
                    _ => return None,
                }
            }
        };
        Some(action)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// URL-decode a free-text argument. Blank or invalid UTF-8 is unroutable.
fn decode_argument(argument: &str) -> Option<String> {
    let decoded = urlencoding::decode(argument).ok()?;
    let decoded = decoded.trim();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded.to_string())
    }
}

/// Parse the text after the command prefix.
fn parse_command(without_prefix: &str) -> Command {
    let (head, rest) = match without_prefix.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (without_prefix, ""),
    };
    // `/gen@mintbot` in group chats.
    let name = head.split('@').next().unwrap_or(head).to_lowercase();

    match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "gen" | "generate" => Command::Generate {
            prompt: rest.to_string(),
        },
        "transparent" => Command::Transparent {
            prompt: rest.to_string(),
        },
        "myimages" => Command::MyImages,
        "wallet" => Command::Wallet,
        _ => Command::Unknown(head.to_string()),
    }
}
