#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::return_self_not_must_use
)]

//! courier-bot — Telegram relay for OpenAI chat models.
//!
//! Relays user messages to a hosted chat-completion API while keeping
//! per-user conversation state, selected model, and cost accounting:
//! - [`session::ChatManager`] owns the sessions and mediates every
//!   completion through them
//! - [`provider`] is the unified completion-provider boundary
//! - [`channels`] talks to the Telegram Bot API
//! - [`bot::Router`] turns messages and button clicks into manager calls
//!
//! ## Example
//!
//! ```ignore
//! use courier_bot::session::{ChatManager, TokenCounter};
//!
//! let manager = ChatManager::new(provider, catalog, counter, options)?;
//! let exchange = manager.request_completion("chat-42", "Hello!").await;
//! println!("{} ({} tokens)", exchange.reply, exchange.completion_tokens);
//! ```

pub mod bot;
pub mod catalog;
pub mod channels;
pub mod config;
pub mod logging;
pub mod provider;
pub mod session;

pub use catalog::{ModelCatalog, ModelSpec};
pub use config::Config;
pub use session::{ChatManager, ChatOptions, Exchange};
