//! Prompt token counting via `tiktoken-rs`.
//!
//! Models map to an encoding through an explicit table; anything the
//! table doesn't know falls back to `cl100k_base` rather than failing.
//! Completion tokens are never estimated here — the service's own usage
//! report is authoritative for output.

use anyhow::Result;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

use crate::provider::Message;

/// Structural overhead added per message to approximate the request
/// framing the service bills for.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Tokenizer encoding families the counter can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Used by the gpt-4o and gpt-4.1 generations.
    O200k,
    /// Used by gpt-4/gpt-3.5; also the generic fallback.
    Cl100k,
}

/// Model key → encoding. Exact keys only; unlisted models take the
/// fallback.
const MODEL_ENCODINGS: &[(&str, Encoding)] = &[
    ("gpt-4.1", Encoding::O200k),
    ("gpt-4.1-mini", Encoding::O200k),
    ("gpt-4.1-nano", Encoding::O200k),
    ("gpt-4o", Encoding::O200k),
    ("gpt-4o-mini", Encoding::O200k),
    ("o4-mini", Encoding::O200k),
    ("gpt-4", Encoding::Cl100k),
    ("gpt-3.5-turbo", Encoding::Cl100k),
];

/// Resolve the encoding for a model key, falling back to `Cl100k`.
pub fn encoding_for_model(model: &str) -> Encoding {
    MODEL_ENCODINGS
        .iter()
        .find(|(key, _)| *key == model)
        .map_or(Encoding::Cl100k, |(_, enc)| *enc)
}

/// Holds the encoder instances for the process lifetime.
///
/// Building a `CoreBPE` is expensive, so both encodings are constructed
/// once at startup and shared.
pub struct TokenCounter {
    o200k: CoreBPE,
    cl100k: CoreBPE,
}

impl TokenCounter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            o200k: o200k_base()?,
            cl100k: cl100k_base()?,
        })
    }

    fn encoder(&self, encoding: Encoding) -> &CoreBPE {
        match encoding {
            Encoding::O200k => &self.o200k,
            Encoding::Cl100k => &self.cl100k,
        }
    }

    /// Token count of a bare text in the given model's encoding.
    pub fn count_text(&self, model: &str, text: &str) -> usize {
        self.encoder(encoding_for_model(model))
            .encode_ordinary(text)
            .len()
    }

    /// Token count of a full assembled request: the system prompt plus
    /// the conversation turns, each message carrying the fixed
    /// structural overhead.
    pub fn count_prompt(&self, model: &str, system: &str, messages: &[Message]) -> i64 {
        let encoder = self.encoder(encoding_for_model(model));
        let mut total = MESSAGE_OVERHEAD_TOKENS + encoder.encode_ordinary(system).len();
        for message in messages {
            total += MESSAGE_OVERHEAD_TOKENS + encoder.encode_ordinary(&message.content).len();
        }
        total as i64
    }
}
