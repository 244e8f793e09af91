//! Interactive REPL channel with line editing and markdown rendering.
//!
//! A local stand-in for Telegram, handy for exercising flows without a bot
//! token. Uses rustyline for line editing, history, and tab-completion.
//! Uses termimad for rendering bot messages inline.
//!
//! ## Input
//!
//! - plain text and `/commands` are sent as text messages
//! - `@<n>` presses the n-th button of the most recent keyboard
//! - `@<payload>` presses a button with an arbitrary payload
//! - `/debug` toggles typing and acknowledgement output
//! - `/quit` or `/exit` leaves the REPL

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustyline::completion::Completer;
use rustyline::config::Config;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{CompletionType, Editor, Helper};
use termimad::MadSkin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::channels::{
    Button, Channel, EventStream, IncomingEvent, Keyboard, MessageHandle, OutgoingImage,
    OutgoingMessage,
};
use crate::error::ChannelError;

const CHANNEL_NAME: &str = "repl";

/// The REPL is a single local conversation.
const REPL_CONVERSATION: &str = "repl";
const REPL_USER: &str = "repl-user";

/// Slash commands available in the REPL.
const SLASH_COMMANDS: &[&str] = &[
    "/start",
    "/help",
    "/gen",
    "/generate",
    "/transparent",
    "/myimages",
    "/wallet",
    "/debug",
    "/quit",
    "/exit",
];

/// Rustyline helper for slash-command tab completion.
struct ReplHelper;

impl Completer for ReplHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if !line.starts_with('/') {
            return Ok((0, vec![]));
        }

        let prefix = &line[..pos];
        let matches: Vec<String> = SLASH_COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .map(|cmd| cmd.to_string())
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if !line.starts_with('/') || pos < line.len() {
            return None;
        }

        SLASH_COMMANDS
            .iter()
            .find(|cmd| cmd.starts_with(line) && **cmd != line)
            .map(|cmd| cmd[line.len()..].to_string())
    }
}

impl Highlighter for ReplHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("\x1b[90m{hint}\x1b[0m"))
    }
}

impl Validator for ReplHelper {}
impl Helper for ReplHelper {}

/// Build a termimad skin with our color scheme.
fn make_skin() -> MadSkin {
    let mut skin = MadSkin::default();
    skin.set_headers_fg(termimad::crossterm::style::Color::Yellow);
    skin.bold.set_fg(termimad::crossterm::style::Color::White);
    skin.italic
        .set_fg(termimad::crossterm::style::Color::Magenta);
    skin.inline_code
        .set_fg(termimad::crossterm::style::Color::Green);
    skin
}

fn terminal_width() -> usize {
    crossterm::terminal::size()
        .map(|(w, _)| w as usize)
        .unwrap_or(80)
}

/// What a line of input means.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplInput {
    Empty,
    Quit,
    ToggleDebug,
    Text(String),
    Press(String),
    /// `@<n>` with no such button on screen.
    UnknownButton(usize),
}

fn parse_input(line: &str, buttons: &[Button]) -> ReplInput {
    let line = line.trim();
    if line.is_empty() {
        return ReplInput::Empty;
    }

    match line.to_lowercase().as_str() {
        "/quit" | "/exit" => return ReplInput::Quit,
        "/debug" => return ReplInput::ToggleDebug,
        _ => {}
    }

    let Some(target) = line.strip_prefix('@') else {
        return ReplInput::Text(line.to_string());
    };
    let target = target.trim();

    if let Ok(index) = target.parse::<usize>() {
        return match index.checked_sub(1).and_then(|i| buttons.get(i)) {
            Some(button) => ReplInput::Press(button.payload.clone()),
            None => ReplInput::UnknownButton(index),
        };
    }
    ReplInput::Press(target.to_string())
}

/// Numbered button lines shown under a message.
fn format_buttons(buttons: &Keyboard) -> Vec<String> {
    buttons
        .iter()
        .flatten()
        .enumerate()
        .map(|(i, b)| {
            format!(
                "  \x1b[1;36m[{}]\x1b[0m {} \x1b[90m@{}\x1b[0m",
                i + 1,
                b.label,
                b.payload
            )
        })
        .collect()
}

/// Get the history file path (~/.mintbot/history).
fn history_path() -> std::path::PathBuf {
    crate::bootstrap::mintbot_home().join("history")
}

/// REPL channel with line editing and markdown rendering.
pub struct ReplChannel {
    /// Optional single message to send (for -m flag).
    single_message: Option<String>,
    /// Debug mode flag (shared with input thread).
    debug_mode: Arc<AtomicBool>,
    /// Buttons of the most recent keyboard, flattened (shared with input thread).
    last_buttons: Arc<Mutex<Vec<Button>>>,
    next_message_id: AtomicU64,
}

impl ReplChannel {
    /// Create a new REPL channel.
    pub fn new() -> Self {
        Self {
            single_message: None,
            debug_mode: Arc::new(AtomicBool::new(false)),
            last_buttons: Arc::new(Mutex::new(Vec::new())),
            next_message_id: AtomicU64::new(1),
        }
    }

    /// Create a REPL channel that sends a single message and exits.
    pub fn with_message(message: String) -> Self {
        Self {
            single_message: Some(message),
            ..Self::new()
        }
    }

    fn is_debug(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    fn next_handle(&self) -> MessageHandle {
        MessageHandle(self.next_message_id.fetch_add(1, Ordering::Relaxed).to_string())
    }

    fn remember_buttons(&self, buttons: &Keyboard) {
        if buttons.is_empty() {
            return;
        }
        let mut last = self
            .last_buttons
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = buttons.iter().flatten().cloned().collect();
    }

    fn print_buttons(&self, buttons: &Keyboard) {
        for line in format_buttons(buttons) {
            println!("{line}");
        }
        self.remember_buttons(buttons);
    }
}

impl Default for ReplChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for ReplChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let single_message = self.single_message.clone();
        let debug_mode = Arc::clone(&self.debug_mode);
        let last_buttons = Arc::clone(&self.last_buttons);

        std::thread::spawn(move || {
            // Single message mode: send it and return
            if let Some(msg) = single_message {
                let incoming = IncomingEvent::text(CHANNEL_NAME, REPL_CONVERSATION, REPL_USER, msg);
                let _ = tx.blocking_send(incoming);
                return;
            }

            let config = match Config::builder().history_ignore_dups(true) {
                Ok(builder) => builder
                    .auto_add_history(true)
                    .completion_type(CompletionType::List)
                    .build(),
                Err(e) => {
                    eprintln!("Failed to configure line editor: {e}");
                    return;
                }
            };

            let mut rl = match Editor::with_config(config) {
                Ok(editor) => editor,
                Err(e) => {
                    eprintln!("Failed to initialize line editor: {e}");
                    return;
                }
            };

            rl.set_helper(Some(ReplHelper));

            let hist_path = history_path();
            if let Some(parent) = hist_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = rl.load_history(&hist_path);

            println!("\x1b[1mmintbot\x1b[0m  /start for the menu, @<n> presses a button, /quit to exit");
            println!();

            loop {
                let prompt = if debug_mode.load(Ordering::Relaxed) {
                    "\x1b[33m[debug]\x1b[0m \x1b[1;36m\u{203A}\x1b[0m "
                } else {
                    "\x1b[1;36m\u{203A}\x1b[0m "
                };

                match rl.readline(prompt) {
                    Ok(line) => {
                        let buttons = last_buttons
                            .lock()
                            .map(|b| b.clone())
                            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());

                        let event = match parse_input(&line, &buttons) {
                            ReplInput::Empty => continue,
                            ReplInput::Quit => break,
                            ReplInput::ToggleDebug => {
                                let current = debug_mode.load(Ordering::Relaxed);
                                debug_mode.store(!current, Ordering::Relaxed);
                                if !current {
                                    println!("\x1b[90mdebug mode on\x1b[0m");
                                } else {
                                    println!("\x1b[90mdebug mode off\x1b[0m");
                                }
                                continue;
                            }
                            ReplInput::UnknownButton(n) => {
                                println!("\x1b[31mno button [{n}] on screen\x1b[0m");
                                continue;
                            }
                            ReplInput::Text(text) => {
                                IncomingEvent::text(CHANNEL_NAME, REPL_CONVERSATION, REPL_USER, text)
                            }
                            ReplInput::Press(payload) => IncomingEvent::button(
                                CHANNEL_NAME,
                                REPL_CONVERSATION,
                                REPL_USER,
                                payload,
                            )
                            .with_callback_id(uuid::Uuid::new_v4().to_string()),
                        };

                        if tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                    Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                    Err(e) => {
                        eprintln!("Input error: {e}");
                        break;
                    }
                }
            }

            let _ = rl.save_history(&history_path());
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn send_message(
        &self,
        _conversation_id: &str,
        message: OutgoingMessage,
    ) -> Result<MessageHandle, ChannelError> {
        let width = terminal_width();
        eprintln!("\x1b[90m{}\x1b[0m", "\u{2500}".repeat(width.min(80)));

        let skin = make_skin();
        let text = termimad::FmtText::from(&skin, &message.text, Some(width));
        print!("{text}");
        self.print_buttons(&message.buttons);
        println!();

        Ok(self.next_handle())
    }

    async fn delete_message(
        &self,
        _conversation_id: &str,
        handle: &MessageHandle,
    ) -> Result<(), ChannelError> {
        if self.is_debug() {
            eprintln!("  \x1b[90m(message {handle} removed)\x1b[0m");
        }
        Ok(())
    }

    async fn send_image(
        &self,
        _conversation_id: &str,
        image: OutgoingImage,
    ) -> Result<MessageHandle, ChannelError> {
        eprintln!(
            "  \x1b[35m\u{25A3} {}\x1b[0m \x1b[90m({} bytes)\x1b[0m",
            image.filename,
            image.bytes.len()
        );
        println!("{}", image.caption);
        self.print_buttons(&image.buttons);
        println!();
        Ok(self.next_handle())
    }

    async fn send_typing(&self, _conversation_id: &str) -> Result<(), ChannelError> {
        if self.is_debug() {
            eprintln!("  \x1b[90m\u{25CB} typing...\x1b[0m");
        }
        Ok(())
    }

    async fn acknowledge(
        &self,
        _event: &IncomingEvent,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        if let Some(text) = text {
            eprintln!("  \x1b[90m{text}\x1b[0m");
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buttons() -> Vec<Button> {
        vec![
            Button::new("Create NFT Collection", "create_collection:img-1"),
            Button::new("Mint to Specific Collection", "mint_specific:img-1"),
        ]
    }

    #[test]
    fn numbered_press_uses_last_keyboard() {
        assert_eq!(
            parse_input("@2", &buttons()),
            ReplInput::Press("mint_specific:img-1".to_string())
        );
        assert_eq!(parse_input("@3", &buttons()), ReplInput::UnknownButton(3));
        assert_eq!(parse_input("@0", &buttons()), ReplInput::UnknownButton(0));
    }

    #[test]
    fn raw_payload_press() {
        assert_eq!(
            parse_input("@ wallet:view", &[]),
            ReplInput::Press("wallet:view".to_string())
        );
    }

    #[test]
    fn local_commands_and_text() {
        assert_eq!(parse_input("  ", &[]), ReplInput::Empty);
        assert_eq!(parse_input("/QUIT", &[]), ReplInput::Quit);
        assert_eq!(parse_input("/debug", &[]), ReplInput::ToggleDebug);
        assert_eq!(
            parse_input("/gen a red fox", &[]),
            ReplInput::Text("/gen a red fox".to_string())
        );
    }

    #[test]
    fn button_lines_are_numbered_across_rows() {
        let keyboard = vec![
            vec![Button::new("A", "a")],
            vec![Button::new("B", "b"), Button::new("C", "c")],
        ];
        let lines = format_buttons(&keyboard);
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("[3]"));
        assert!(lines[2].contains("@c"));
    }

    #[tokio::test]
    async fn keyboard_is_remembered_for_presses() {
        let channel = ReplChannel::new();
        channel.remember_buttons(&vec![buttons()]);
        let remembered = channel.last_buttons.lock().unwrap().clone();
        assert_eq!(remembered.len(), 2);
        assert_eq!(remembered[0].payload, "create_collection:img-1");
    }
}
