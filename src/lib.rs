//! mintbot: a Telegram bot that generates images, manages custodial Solana
//! wallets and mints NFTs by delegating to external services.
//!
//! The interesting part is [`bot`]: routing each inbound event against the
//! conversation's pending action, and running the handler that composes the
//! collaborators in [`services`].

pub mod bootstrap;
pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod services;
pub mod session;
pub mod settings;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;
pub use error::{Error, Result};
