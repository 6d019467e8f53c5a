pub mod manager;
pub mod tokenizer;
pub mod types;

pub use manager::{ChatManager, ChatOptions, Exchange};
pub use tokenizer::TokenCounter;
pub use types::{ChatRole, Session, Turn, HISTORY_LIMIT};
