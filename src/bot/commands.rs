//! Slash-command handlers and command suggestions.

use std::cmp::max;

use crate::bot::reply::Reply;
use crate::bot::router::Command;
use crate::bot::{Bot, render};
use crate::error::Error;

/// Commands registered with the transport's command menu.
pub const BOT_COMMANDS: &[(&str, &str)] = &[
    ("gen", "Generate an image from a prompt"),
    (
        "transparent",
        "Generate an image with transparent background",
    ),
    ("myimages", "View your generated images"),
    ("wallet", "Manage your Solana wallet"),
    ("help", "Show available commands"),
];

const COMMAND_SUGGESTIONS: &[&str] = &[
    "start",
    "help",
    "gen",
    "generate",
    "transparent",
    "myimages",
    "wallet",
];

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, a_ch) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, b_ch) in b_chars.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr[j + 1] = (curr[j] + 1).min(prev[j + 1] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Closest known commands to `command`, best first, at most three.
pub fn command_suggestions(command: &str) -> Vec<&'static str> {
    let normalized = command.trim().trim_start_matches('/').to_ascii_lowercase();
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<(&'static str, usize)> = COMMAND_SUGGESTIONS
        .iter()
        .map(|candidate| (*candidate, levenshtein_distance(&normalized, candidate)))
        .collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let threshold = if normalized.len() <= 4 {
        1
    } else if normalized.len() <= 8 {
        2
    } else {
        max(3, normalized.len() / 3)
    };

    ranked
        .into_iter()
        .filter(|(candidate, distance)| {
            *distance <= threshold
                || candidate.starts_with(&normalized)
                || normalized.starts_with(*candidate)
        })
        .take(3)
        .map(|(candidate, _)| candidate)
        .collect()
}

pub fn unknown_command_message(command: &str) -> String {
    let suggestions = command_suggestions(command);
    match suggestions.as_slice() {
        [] => format!("Unknown command: {}. Try /help", command),
        [only] => format!(
            "Unknown command: {}. Did you mean /{}? Try /help",
            command, only
        ),
        many => {
            let formatted = many
                .iter()
                .map(|suggestion| format!("/{}", suggestion))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "Unknown command: {}. Did you mean one of: {}? Try /help",
                command, formatted
            )
        }
    }
}

impl Bot {
    pub(super) async fn handle_command(
        &self,
        reply: &Reply,
        user_id: &str,
        command: Command,
    ) -> Result<(), Error> {
        match command {
            Command::Start => {
                reply.with_buttons(render::WELCOME, render::main_menu()).await?;
            }
            Command::Help => {
                reply.with_buttons(render::HELP, render::back_to_menu()).await?;
            }
            Command::Generate { prompt } => {
                if prompt.is_empty() {
                    reply.text(render::GEN_USAGE).await?;
                } else {
                    self.offer_image_types(reply, &prompt).await?;
                }
            }
            Command::Transparent { prompt } => {
                if prompt.is_empty() {
                    reply.text(render::TRANSPARENT_USAGE).await?;
                } else {
                    self.generate_image(reply, user_id, &prompt, true).await?;
                }
            }
            Command::MyImages => self.show_images(reply, user_id).await?,
            Command::Wallet => self.show_wallet_menu(reply, user_id).await?,
            Command::Unknown(name) => {
                reply.text(unknown_command_message(&name)).await?;
            }
        }
        Ok(())
    }

    /// "Standard" / "Transparent BG" choice for a prompt.
    pub(super) async fn offer_image_types(&self, reply: &Reply, prompt: &str) -> Result<(), Error> {
        reply
            .with_buttons(
                render::image_type_prompt(prompt),
                render::image_type_keyboard(prompt),
            )
            .await?;
        Ok(())
    }
}
