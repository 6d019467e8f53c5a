//! Command routing and reply rendering.
//!
//! Sits between the Telegram channel and the [`ChatManager`]: parses
//! slash commands, tracks which users owe a system prompt, renders the
//! accounting footer, and splits long replies into numbered parts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crate::catalog::ModelSpec;
use crate::channels::{CallbackQuery, ChannelMessage, InlineButton, TelegramChannel};
use crate::session::{ChatManager, Exchange};

/// Telegram caps messages at 4096 characters; staying a little under
/// leaves room for the part tag.
const MAX_MESSAGE_LEN: usize = 4000;

/// Pause between parts of a split reply, to keep delivery order stable.
const PART_DELAY: Duration = Duration::from_millis(500);

/// Routes inbound messages and button clicks to the manager and renders
/// the results back into the channel.
pub struct Router {
    channel: Arc<TelegramChannel>,
    manager: Arc<ChatManager>,
    currency_symbol: String,
    /// Users whose next message is consumed as their system prompt.
    awaiting_prompt: StdMutex<HashSet<String>>,
}

impl Router {
    pub fn new(
        channel: Arc<TelegramChannel>,
        manager: Arc<ChatManager>,
        currency_symbol: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            manager,
            currency_symbol: currency_symbol.into(),
            awaiting_prompt: StdMutex::new(HashSet::new()),
        }
    }

    /// Handle one inbound message. Never propagates errors — send
    /// failures are logged and dropped.
    pub async fn handle_message(&self, msg: ChannelMessage) {
        let user_id = msg.sender.clone();
        let text = msg.content.trim();
        if text.is_empty() {
            return;
        }

        if self.take_awaiting_prompt(&user_id) {
            self.install_system_prompt(&user_id, text).await;
            return;
        }

        match command_of(text) {
            Some("/start") => {
                self.reply(&user_id, &welcome_text(msg.sender_name.as_deref()))
                    .await;
                tracing::info!(user_id = %user_id, "User started the bot");
            }
            Some("/reset") => {
                self.manager.reset_history(&user_id).await;
                self.reply(&user_id, "History cleared! Starting with a clean slate 🧠")
                    .await;
                tracing::info!(user_id = %user_id, "User reset history");
            }
            Some("/system") => {
                self.awaiting_prompt
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(user_id.clone());
                self.reply(
                    &user_id,
                    "Send me the system prompt to use from now on.\n\n\
                     For example: 'You are a Python expert who always answers with code'",
                )
                .await;
                tracing::info!(user_id = %user_id, "User requested a system prompt change");
            }
            Some("/reset_system") => {
                self.manager.clear_system_prompt(&user_id).await;
                self.manager.reset_history(&user_id).await;
                self.reply(
                    &user_id,
                    "✅ System prompt reverted to the default. Conversation history was also reset.",
                )
                .await;
                tracing::info!(user_id = %user_id, "User reset the system prompt");
            }
            Some("/model" | "/models") => {
                self.send_model_menu(&user_id).await;
                tracing::info!(user_id = %user_id, "User opened the model menu");
            }
            // Anything else, commands included, goes to the model.
            _ => self.handle_chat(&user_id, text).await,
        }
    }

    /// Handle an inline-keyboard click (`model:<key>` selections).
    pub async fn handle_callback(&self, query: CallbackQuery) {
        let user_id = query.chat_id.clone();

        if let Some(key) = query.data.strip_prefix("model:") {
            if self.manager.select_model(&user_id, key).await {
                let model = self.manager.active_model(&user_id).await;
                let text = model_selected_text(
                    &model,
                    self.manager.usd_rate(),
                    &self.currency_symbol,
                );
                if let Err(e) = self
                    .channel
                    .edit_message_text(&user_id, query.message_id, &text)
                    .await
                {
                    tracing::error!(user_id = %user_id, error = %e, "Failed to edit model message");
                }
                // A model switch starts from a clean context.
                self.manager.reset_history(&user_id).await;
                tracing::info!(user_id = %user_id, model = %model.key, "User changed model");
            } else {
                let _ = self
                    .channel
                    .edit_message_text(&user_id, query.message_id, "❌ Unknown model")
                    .await;
                tracing::error!(user_id = %user_id, key = %key, "Model selection failed");
            }
        }

        if let Err(e) = self.channel.answer_callback_query(&query.id, None, false).await {
            tracing::warn!(error = %e, "Failed to answer callback query");
        }
    }

    async fn install_system_prompt(&self, user_id: &str, prompt: &str) {
        self.manager.apply_system_prompt(user_id, prompt).await;
        self.reply(
            user_id,
            &format!(
                "✅ System prompt installed! Conversation history was reset so it \
                 takes effect immediately.\n\nInstalled prompt: _{prompt}_"
            ),
        )
        .await;
        tracing::info!(user_id = %user_id, "User installed a system prompt");
    }

    async fn handle_chat(&self, user_id: &str, text: &str) {
        // Show "typing…" while the completion is in flight.
        if let Err(e) = self.channel.send_chat_action(user_id, "typing").await {
            tracing::debug!(user_id = %user_id, error = %e, "Chat action failed");
        }

        tracing::info!(
            user_id = %user_id,
            preview = %text.chars().take(20).collect::<String>(),
            "Relaying message"
        );

        let exchange = self.manager.request_completion(user_id, text).await;
        let footer = accounting_footer(&exchange, &self.currency_symbol);

        let combined = format!("{}\n\n{footer}", exchange.reply);
        if combined.len() <= MAX_MESSAGE_LEN {
            self.reply(user_id, &combined).await;
        } else {
            let parts = split_message(&exchange.reply, MAX_MESSAGE_LEN);
            let total = parts.len();
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(PART_DELAY).await;
                }
                let mut text = part.clone();
                if i == total - 1 {
                    text.push_str("\n\n");
                    text.push_str(&footer);
                }
                text.push_str(&format!("\n\n[Part {}/{total}]", i + 1));
                self.reply(user_id, &text).await;
            }
        }

        tracing::info!(user_id = %user_id, "Reply sent");
    }

    async fn send_model_menu(&self, user_id: &str) {
        let current = self.manager.active_model(user_id).await;
        let keyboard = model_keyboard(self.manager.list_models());

        if let Err(e) = self
            .channel
            .send_with_inline_keyboard(user_id, &model_menu_text(&current), keyboard)
            .await
        {
            tracing::error!(user_id = %user_id, error = %e, "Failed to send model menu");
        }
    }

    fn take_awaiting_prompt(&self, user_id: &str) -> bool {
        self.awaiting_prompt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id)
    }

    async fn reply(&self, user_id: &str, text: &str) {
        use crate::channels::Channel;
        if let Err(e) = self.channel.send(text, user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to send reply");
        }
    }
}

/// First token of a slash command, with any `@botname` suffix removed.
fn command_of(text: &str) -> Option<&str> {
    if !text.starts_with('/') {
        return None;
    }
    let token = text.split_whitespace().next().unwrap_or(text);
    token.split('@').next()
}

fn welcome_text(name: Option<&str>) -> String {
    let greeting = match name {
        Some(name) => format!("Hey, {name}! 🤖"),
        None => "Hey! 🤖".to_string(),
    };
    format!(
        "{greeting}\n\n\
         Send me a message and I'll relay it to the model, keeping your \
         conversation context between messages.\n\n\
         /reset — clear the conversation history\n\
         /system — set a custom system prompt\n\
         /reset_system — revert to the default system prompt\n\
         /model — choose a model"
    )
}

fn model_menu_text(current: &ModelSpec) -> String {
    format!(
        "🤖 Choose a model to chat with:\n\n\
         Current model: *{}*\n\
         Price per 1M tokens:\n\
         - input: ${:.2}\n\
         - output: ${:.2}",
        current.display_name, current.input_price, current.output_price
    )
}

fn model_selected_text(model: &ModelSpec, usd_rate: f64, symbol: &str) -> String {
    let input_per_1k = model.input_price / 1000.0;
    let output_per_1k = model.output_price / 1000.0;
    format!(
        "✅ Model changed to *{}*\n\n\
         Price per 1K tokens:\n\
         - input: ${:.4} ({symbol}{:.4})\n\
         - output: ${:.4} ({symbol}{:.4})\n\n\
         Conversation history was reset.",
        model.display_name,
        input_per_1k,
        input_per_1k * usd_rate,
        output_per_1k,
        output_per_1k * usd_rate,
    )
}

/// One keyboard row per catalog entry, prices shown per 1K tokens.
fn model_keyboard(models: &[ModelSpec]) -> Vec<Vec<InlineButton>> {
    models
        .iter()
        .map(|model| {
            let label = format!(
                "{} (${:.4}/${:.4} per 1K)",
                model.display_name,
                model.input_price / 1000.0,
                model.output_price / 1000.0
            );
            vec![InlineButton::new(label, format!("model:{}", model.key))]
        })
        .collect()
}

/// The token/cost accounting appended to the final part of a reply.
fn accounting_footer(exchange: &Exchange, symbol: &str) -> String {
    format!(
        "📊 Tokens: {} sent, {} received, {} total\n\
         💰 Cost: {symbol}{:.4} (input {symbol}{:.4} / output {symbol}{:.4})",
        exchange.prompt_tokens,
        exchange.completion_tokens,
        exchange.prompt_tokens + exchange.completion_tokens,
        exchange.total_cost_local,
        exchange.input_cost_local,
        exchange.output_cost_local,
    )
}

/// Split a message into chunks that fit within Telegram's limit,
/// preferring paragraph, line, sentence, then word boundaries, and
/// never cutting inside a UTF-8 sequence.
fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut cut = max_len;
        while cut > 0 && !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // max_len landed inside the very first character
            cut = remaining
                .char_indices()
                .nth(1)
                .map_or(remaining.len(), |(i, _)| i);
        }

        let window = &remaining[..cut];
        let split_pos = window
            .rfind("\n\n")
            .or_else(|| window.rfind('\n'))
            .or_else(|| window.rfind(". "))
            .or_else(|| window.rfind(' '))
            .filter(|&pos| pos > 0)
            .unwrap_or(cut);

        chunks.push(remaining[..split_pos].to_string());
        remaining = remaining[split_pos..].trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(key: &str, input: f64, output: f64) -> ModelSpec {
        ModelSpec {
            key: key.into(),
            display_name: key.into(),
            input_price: input,
            output_price: output,
        }
    }

    #[test]
    fn command_parsing() {
        assert_eq!(command_of("/start"), Some("/start"));
        assert_eq!(command_of("/start@courier_bot"), Some("/start"));
        assert_eq!(command_of("/model gpt-4o"), Some("/model"));
        assert_eq!(command_of("hello"), None);
    }

    #[test]
    fn welcome_mentions_name_when_known() {
        assert!(welcome_text(Some("Alice")).starts_with("Hey, Alice!"));
        assert!(welcome_text(None).starts_with("Hey!"));
        assert!(welcome_text(None).contains("/reset_system"));
    }

    #[test]
    fn keyboard_has_one_row_per_model() {
        let models = vec![spec("gpt-4.1", 2.0, 8.0), spec("gpt-4o", 2.5, 10.0)];
        let keyboard = model_keyboard(&models);
        assert_eq!(keyboard.len(), 2);
        assert_eq!(keyboard[0][0].callback_data, "model:gpt-4.1");
        assert!(keyboard[1][0].text.contains("gpt-4o"));
    }

    #[test]
    fn footer_reports_tokens_and_local_cost() {
        let exchange = Exchange {
            reply: "hi".into(),
            prompt_tokens: 100,
            completion_tokens: 50,
            input_cost_usd: 0.0002,
            output_cost_usd: 0.0004,
            input_cost_local: 0.0214,
            output_cost_local: 0.0428,
            total_cost_local: 0.0642,
        };
        let footer = accounting_footer(&exchange, "₽");
        assert!(footer.contains("100 sent"));
        assert!(footer.contains("50 received"));
        assert!(footer.contains("150 total"));
        assert!(footer.contains("₽0.0642"));
    }

    #[test]
    fn footer_renders_zeros_on_failure() {
        let exchange = Exchange {
            reply: "Oops".into(),
            ..Exchange::default()
        };
        let footer = accounting_footer(&exchange, "₽");
        assert!(footer.contains("0 sent, 0 received, 0 total"));
    }

    #[test]
    fn split_message_short() {
        let result = split_message("Hello, World!", 4000);
        assert_eq!(result, vec!["Hello, World!".to_string()]);
    }

    #[test]
    fn split_message_prefers_line_breaks() {
        let text = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let parts = split_message(&text, 40);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], "a".repeat(30));
        assert_eq!(parts[1], "b".repeat(30));
    }

    #[test]
    fn split_message_preserves_all_content() {
        let text = "word ".repeat(200);
        let parts = split_message(text.trim_end(), 64);
        assert!(parts.len() > 1);
        for part in &parts {
            assert!(part.len() <= 64);
        }
        let rejoined = parts.join(" ");
        assert_eq!(rejoined, text.trim_end());
    }

    #[test]
    fn split_message_respects_utf8_boundaries() {
        // Cyrillic: every char is two bytes, so a naive byte cut panics.
        let text = "привет ".repeat(100);
        let parts = split_message(text.trim_end(), 63);
        assert!(parts.len() > 1);
        for part in &parts {
            assert!(part.len() <= 63);
            assert!(part.chars().all(|c| c == 'п'
                || c == 'р'
                || c == 'и'
                || c == 'в'
                || c == 'е'
                || c == 'т'
                || c == ' '));
        }
    }

    #[test]
    fn selected_text_shows_both_currencies() {
        let model = spec("gpt-4.1", 2.0, 8.0);
        let text = model_selected_text(&model, 100.0, "₽");
        assert!(text.contains("$0.0020"));
        assert!(text.contains("₽0.2000"));
        assert!(text.contains("history was reset"));
    }
}
