//! The session & completion manager.
//!
//! Owns every per-user [`Session`], the model catalog, and the token
//! accounting for each exchange. All completion traffic flows through
//! [`ChatManager::request_completion`], which never fails past its own
//! boundary: any provider error or timeout degrades into a renderable
//! reply with zeroed accounting, so the transport layer always has
//! something to send back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::Mutex;

use crate::catalog::{ModelCatalog, ModelSpec};
use crate::provider::{ChatRequest, Message, Provider};
use crate::session::tokenizer::TokenCounter;
use crate::session::types::{ChatRole, Session};

/// Process-wide knobs for the manager, resolved from config at startup.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Catalog key used when a session has no model override.
    pub default_model: String,
    /// System prompt used when a session has no override.
    pub default_system_prompt: String,
    /// Fixed output-token budget passed to the provider.
    pub max_completion_tokens: i64,
    /// Budget for the whole remote call before degrading to a message.
    pub request_timeout: Duration,
    /// USD → local currency conversion rate for cost display.
    pub usd_rate: f64,
}

/// The full accounting tuple returned for every exchange.
///
/// On failure the reply carries an error notice and every numeric field
/// is zero.
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub reply: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub input_cost_local: f64,
    pub output_cost_local: f64,
    pub total_cost_local: f64,
}

impl Exchange {
    /// The degrade-to-message variant: a renderable notice, zeroed
    /// numbers.
    fn failed(reply: String) -> Self {
        Self {
            reply,
            ..Self::default()
        }
    }
}

/// USD cost of `tokens` at `price_per_million` USD per 1M tokens.
pub fn cost_usd(tokens: i64, price_per_million: f64) -> f64 {
    tokens as f64 / 1_000_000.0 * price_per_million
}

type SessionHandle = Arc<Mutex<Session>>;

/// Per-user session store and completion mediator.
pub struct ChatManager {
    provider: Arc<dyn Provider>,
    catalog: ModelCatalog,
    counter: TokenCounter,
    opts: ChatOptions,
    default_spec: ModelSpec,
    /// Map lock is only ever held to fetch or insert a handle; the
    /// per-user lock inside the handle is what serializes a user's
    /// requests across the remote call.
    sessions: StdMutex<HashMap<String, SessionHandle>>,
}

impl ChatManager {
    pub fn new(
        provider: Arc<dyn Provider>,
        catalog: ModelCatalog,
        counter: TokenCounter,
        opts: ChatOptions,
    ) -> Result<Self> {
        if catalog.is_empty() {
            bail!("model catalog is empty");
        }
        let Some(default_spec) = catalog.get(&opts.default_model).cloned() else {
            bail!("default model '{}' is not in the catalog", opts.default_model);
        };

        Ok(Self {
            provider,
            catalog,
            counter,
            opts,
            default_spec,
            sessions: StdMutex::new(HashMap::new()),
        })
    }

    /// Fetch the session handle for a user, creating it lazily.
    fn session(&self, user_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::default())))
            .clone()
    }

    /// Fetch an existing session handle without creating one.
    fn existing_session(&self, user_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(user_id).cloned()
    }

    fn resolve_spec(&self, key: Option<&str>) -> ModelSpec {
        key.and_then(|k| self.catalog.get(k))
            .cloned()
            .unwrap_or_else(|| self.default_spec.clone())
    }

    /// Relay one user message through the accumulated session state.
    ///
    /// Holds the user's session lock for the entire exchange, remote
    /// call included, so two concurrent messages from the same user
    /// serialize instead of interleaving history mutations. Other
    /// users' requests are unaffected.
    pub async fn request_completion(&self, user_id: &str, text: &str) -> Exchange {
        let handle = self.session(user_id);
        let mut session = handle.lock().await;

        let model = self.resolve_spec(session.model.as_deref());
        let system = session
            .system_prompt
            .clone()
            .unwrap_or_else(|| self.opts.default_system_prompt.clone());

        // The new user turn joins the persisted history before the
        // request is assembled, so it is part of both.
        session.push(ChatRole::User, text);

        let messages: Vec<Message> = session
            .history
            .iter()
            .map(|turn| Message {
                role: turn.role.as_str().to_string(),
                content: turn.content.clone(),
            })
            .collect();

        let prompt_tokens = self.counter.count_prompt(&model.key, &system, &messages);

        let request = ChatRequest {
            model: model.key.clone(),
            messages,
            max_tokens: Some(self.opts.max_completion_tokens),
            temperature: None,
            system: Some(system),
        };

        tracing::info!(
            user_id = %user_id,
            model = %model.key,
            prompt_tokens,
            history_len = session.history.len(),
            "Requesting completion"
        );

        let outcome = tokio::time::timeout(self.opts.request_timeout, self.provider.chat(request)).await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::error!(user_id = %user_id, error = %err, "Completion failed");
                return Exchange::failed(format!("Oops, something went wrong: {err}"));
            }
            Err(_) => {
                let secs = self.opts.request_timeout.as_secs();
                tracing::error!(user_id = %user_id, timeout_secs = secs, "Completion timed out");
                return Exchange::failed(format!(
                    "Oops, something went wrong: request timed out after {secs}s"
                ));
            }
        };

        let reply = response.content.trim().to_string();
        session.push(ChatRole::Assistant, reply.clone());

        // Output tokenization isn't predictable from text alone; the
        // service-reported figure is authoritative.
        let completion_tokens = response.usage.output_tokens;

        let input_cost_usd = cost_usd(prompt_tokens, model.input_price);
        let output_cost_usd = cost_usd(completion_tokens, model.output_price);
        let input_cost_local = input_cost_usd * self.opts.usd_rate;
        let output_cost_local = output_cost_usd * self.opts.usd_rate;

        Exchange {
            reply,
            prompt_tokens,
            completion_tokens,
            input_cost_usd,
            output_cost_usd,
            input_cost_local,
            output_cost_local,
            total_cost_local: input_cost_local + output_cost_local,
        }
    }

    /// Clear a user's conversation history. No-op for unknown users.
    pub async fn reset_history(&self, user_id: &str) {
        if let Some(handle) = self.existing_session(user_id) {
            handle.lock().await.history.clear();
        }
    }

    /// Set the system-prompt override without touching history.
    ///
    /// Prior turns keep flowing into subsequent requests; use
    /// [`Self::apply_system_prompt`] for the usual install-and-restart
    /// behavior.
    pub async fn set_system_prompt(&self, user_id: &str, prompt: impl Into<String>) {
        let handle = self.session(user_id);
        handle.lock().await.system_prompt = Some(prompt.into());
    }

    /// Install a system prompt and clear history in one atomic step, so
    /// the new prompt takes effect from a clean context.
    pub async fn apply_system_prompt(&self, user_id: &str, prompt: impl Into<String>) {
        let handle = self.session(user_id);
        let mut session = handle.lock().await;
        session.system_prompt = Some(prompt.into());
        session.history.clear();
    }

    /// Remove the system-prompt override, reverting to the default.
    pub async fn clear_system_prompt(&self, user_id: &str) {
        if let Some(handle) = self.existing_session(user_id) {
            handle.lock().await.system_prompt = None;
        }
    }

    /// Select a model for a user. Returns false for keys not in the
    /// catalog, leaving the prior selection untouched.
    pub async fn select_model(&self, user_id: &str, model_key: &str) -> bool {
        if !self.catalog.contains(model_key) {
            return false;
        }
        let handle = self.session(user_id);
        handle.lock().await.model = Some(model_key.to_string());
        true
    }

    /// The model a user's next request will use. Never fails; falls
    /// back to the default catalog entry.
    pub async fn active_model(&self, user_id: &str) -> ModelSpec {
        let selected = match self.existing_session(user_id) {
            Some(handle) => handle.lock().await.model.clone(),
            None => None,
        };
        self.resolve_spec(selected.as_deref())
    }

    /// Read-only catalog snapshot for presentation.
    pub fn list_models(&self) -> &[ModelSpec] {
        self.catalog.entries()
    }

    /// USD → local conversion rate in effect.
    pub fn usd_rate(&self) -> f64 {
        self.opts.usd_rate
    }
}
