//! Telegram channel — long-polls the Bot API for message and
//! callback-query updates.

use super::telegram_format;
use super::traits::{Channel, ChannelMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

// ============================================================================
// Inline Keyboard Types
// ============================================================================

/// A single inline keyboard button
#[derive(Debug, Clone)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Callback query received when user clicks an inline button
#[derive(Debug, Clone)]
pub struct CallbackQuery {
    pub id: String,
    pub from_user_id: String,
    pub from_username: Option<String>,
    pub chat_id: String,
    pub message_id: i64,
    pub data: String,
}

/// Telegram channel backed by the Bot API over plain HTTPS.
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
    /// Optional callback query sender for inline button clicks
    callback_tx: Option<mpsc::Sender<CallbackQuery>>,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
            callback_tx: None,
        }
    }

    /// Attach a callback query sender before starting the listener to
    /// receive inline button clicks.
    pub fn with_callback_sender(mut self, tx: mpsc::Sender<CallbackQuery>) -> Self {
        self.callback_tx = Some(tx);
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    fn is_user_allowed(&self, identity: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == identity)
    }

    fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        identities.into_iter().any(|id| self.is_user_allowed(id))
    }

    /// Show a chat action ("typing") while a completion is in flight.
    pub async fn send_chat_action(&self, chat_id: &str, action: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "action": action
        });

        let resp = self
            .client
            .post(self.api_url("sendChatAction"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram sendChatAction failed: {err}");
        }
        Ok(())
    }

    /// Send a message with inline keyboard buttons
    ///
    /// Returns the `message_id` of the sent message (for later editing)
    pub async fn send_with_inline_keyboard(
        &self,
        chat_id: &str,
        text: &str,
        buttons: Vec<Vec<InlineButton>>,
    ) -> anyhow::Result<i64> {
        let keyboard: Vec<Vec<serde_json::Value>> = buttons
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|btn| {
                        serde_json::json!({
                            "text": btn.text,
                            "callback_data": btn.callback_data
                        })
                    })
                    .collect()
            })
            .collect();

        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "reply_markup": {
                "inline_keyboard": keyboard
            }
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram sendMessage with keyboard failed: {err}");
        }

        let data: serde_json::Value = resp.json().await?;
        let message_id = data
            .get("result")
            .and_then(|r| r.get("message_id"))
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| anyhow::anyhow!("Missing message_id in response"))?;

        tracing::debug!(
            "Telegram message with inline keyboard sent to {chat_id}, message_id={message_id}"
        );
        Ok(message_id)
    }

    /// Answer a callback query (acknowledge button click)
    ///
    /// This removes the loading spinner from the button.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> anyhow::Result<()> {
        let mut body = serde_json::json!({
            "callback_query_id": callback_query_id,
            "show_alert": show_alert
        });

        if let Some(t) = text {
            body["text"] = serde_json::Value::String(t.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("answerCallbackQuery"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram answerCallbackQuery failed: {err}");
        }

        tracing::debug!("Answered callback query {callback_query_id}");
        Ok(())
    }

    /// Edit the text of an existing message (e.g., after a button click)
    pub async fn edit_message_text(
        &self,
        chat_id: &str,
        message_id: i64,
        text: &str,
    ) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "Markdown"
        });

        let resp = self
            .client
            .post(self.api_url("editMessageText"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram editMessageText failed: {err}");
        }

        tracing::debug!("Edited message {message_id} in chat {chat_id}");
        Ok(())
    }

    /// Parse a `callback_query` JSON object into a `CallbackQuery` struct
    #[allow(clippy::unused_self)]
    fn parse_callback_query(&self, callback: &serde_json::Value) -> Option<CallbackQuery> {
        let id = callback.get("id")?.as_str()?.to_string();
        let data = callback.get("data")?.as_str()?.to_string();

        let from = callback.get("from")?;
        let from_user_id = from.get("id")?.as_i64()?.to_string();
        let from_username = from
            .get("username")
            .and_then(|u| u.as_str())
            .map(String::from);

        let message = callback.get("message")?;
        let chat_id = message.get("chat")?.get("id")?.as_i64()?.to_string();
        let message_id = message.get("message_id")?.as_i64()?;

        Some(CallbackQuery {
            id,
            from_user_id,
            from_username,
            chat_id,
            message_id,
            data,
        })
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &str, chat_id: &str) -> anyhow::Result<()> {
        let converted = telegram_format::convert_to_telegram_markdown(message);

        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": converted,
            "parse_mode": "Markdown"
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(());
        }

        let status = resp.status();
        let error_text = resp.text().await.unwrap_or_default();

        // Telegram returns "Bad Request: can't parse entities" when the
        // model's formatting breaks the Markdown parser.
        if status.as_u16() == 400 && error_text.contains("parse entities") {
            tracing::warn!(
                "Telegram Markdown parsing failed, retrying without parse_mode: {error_text}"
            );

            let body_plain = serde_json::json!({
                "chat_id": chat_id,
                "text": message
            });

            let resp_plain = self
                .client
                .post(self.api_url("sendMessage"))
                .json(&body_plain)
                .send()
                .await?;

            if resp_plain.status().is_success() {
                return Ok(());
            }

            let plain_error = resp_plain.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage failed: {plain_error}");
        }

        anyhow::bail!("Telegram sendMessage failed: {error_text}")
    }

    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let url = self.api_url("getUpdates");
            // Listen for both messages and callback_query if callback handler is set
            let allowed_updates = if self.callback_tx.is_some() {
                serde_json::json!(["message", "callback_query"])
            } else {
                serde_json::json!(["message"])
            };
            let body = serde_json::json!({
                "offset": offset,
                "timeout": 30,
                "allowed_updates": allowed_updates
            });

            let resp = match self.client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            let data: serde_json::Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Telegram parse error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                        offset = uid + 1;
                    }

                    // Handle callback_query (inline button clicks)
                    if let Some(callback) = update.get("callback_query") {
                        if let Some(ref callback_tx) = self.callback_tx {
                            if let Some(query) = self.parse_callback_query(callback) {
                                let username = query.from_username.as_deref().unwrap_or("unknown");
                                let identities = [username, query.from_user_id.as_str()];

                                if self.is_any_user_allowed(identities.iter().copied()) {
                                    if callback_tx.send(query).await.is_err() {
                                        tracing::warn!("Callback query receiver dropped");
                                    }
                                } else {
                                    tracing::warn!(
                                        "Ignoring callback from unauthorized user: {username}"
                                    );
                                    // Still answer to remove loading state
                                    let _ = self
                                        .answer_callback_query(&query.id, Some("Unauthorized"), false)
                                        .await;
                                }
                            }
                        }
                        continue;
                    }

                    let Some(message) = update.get("message") else {
                        continue;
                    };

                    let chat_id = message
                        .get("chat")
                        .and_then(|c| c.get("id"))
                        .and_then(serde_json::Value::as_i64)
                        .map(|id| id.to_string())
                        .unwrap_or_default();

                    let from = message.get("from");
                    let username = from
                        .and_then(|f| f.get("username"))
                        .and_then(|u| u.as_str())
                        .unwrap_or("unknown");
                    let user_id_str = from
                        .and_then(|f| f.get("id"))
                        .and_then(serde_json::Value::as_i64)
                        .map(|id| id.to_string());
                    let first_name = from
                        .and_then(|f| f.get("first_name"))
                        .and_then(|n| n.as_str())
                        .map(String::from);

                    let mut identities = vec![username];
                    if let Some(ref id) = user_id_str {
                        identities.push(id.as_str());
                    }

                    if !self.is_any_user_allowed(identities.iter().copied()) {
                        tracing::warn!(
                            "Telegram: ignoring message from unauthorized user: username={username}, user_id={}",
                            user_id_str.as_deref().unwrap_or("unknown")
                        );
                        continue;
                    }

                    // Text only; other message types (photo, voice, ...) are skipped
                    let Some(text) = message.get("text").and_then(|v| v.as_str()) else {
                        continue;
                    };

                    let msg = ChannelMessage {
                        id: Uuid::new_v4().to_string(),
                        sender: chat_id,
                        sender_name: first_name,
                        content: text.to_string(),
                        channel: "telegram".to_string(),
                        timestamp: std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_secs(),
                    };

                    if tx.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_channel_name() {
        let ch = TelegramChannel::new("fake-token".into(), vec!["*".into()]);
        assert_eq!(ch.name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        let ch = TelegramChannel::new("123:ABC".into(), vec![]);
        assert_eq!(
            ch.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn telegram_user_allowed_wildcard() {
        let ch = TelegramChannel::new("t".into(), vec!["*".into()]);
        assert!(ch.is_user_allowed("anyone"));
    }

    #[test]
    fn telegram_user_allowed_specific() {
        let ch = TelegramChannel::new("t".into(), vec!["alice".into(), "bob".into()]);
        assert!(ch.is_user_allowed("alice"));
        assert!(!ch.is_user_allowed("eve"));
    }

    #[test]
    fn telegram_user_denied_empty() {
        let ch = TelegramChannel::new("t".into(), vec![]);
        assert!(!ch.is_user_allowed("anyone"));
    }

    #[test]
    fn telegram_user_exact_match_not_substring() {
        let ch = TelegramChannel::new("t".into(), vec!["alice".into()]);
        assert!(!ch.is_user_allowed("alice_bot"));
        assert!(!ch.is_user_allowed("malice"));
    }

    #[test]
    fn telegram_any_identity_allowed() {
        let ch = TelegramChannel::new("t".into(), vec!["12345".into()]);
        // Username unknown, numeric id matches.
        assert!(ch.is_any_user_allowed(["unknown", "12345"]));
        assert!(!ch.is_any_user_allowed(["unknown", "99999"]));
    }

    #[test]
    fn parse_callback_query_extracts_fields() {
        let ch = TelegramChannel::new("t".into(), vec!["*".into()]);
        let raw = serde_json::json!({
            "id": "cb-1",
            "data": "model:gpt-4o",
            "from": {"id": 42, "username": "alice"},
            "message": {"message_id": 7, "chat": {"id": 42}}
        });
        let query = ch.parse_callback_query(&raw).unwrap();
        assert_eq!(query.id, "cb-1");
        assert_eq!(query.data, "model:gpt-4o");
        assert_eq!(query.from_user_id, "42");
        assert_eq!(query.chat_id, "42");
        assert_eq!(query.message_id, 7);
    }

    #[test]
    fn parse_callback_query_missing_data_is_none() {
        let ch = TelegramChannel::new("t".into(), vec!["*".into()]);
        let raw = serde_json::json!({"id": "cb-1", "from": {"id": 42}});
        assert!(ch.parse_callback_query(&raw).is_none());
    }
}
