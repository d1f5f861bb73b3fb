//! Context window management.
//!
//! Every tick replays an agent's log to the model. When the log outgrows the
//! model budget, [`ContextWindow`] drops a prefix, cutting only where the
//! result is still a valid conversation:
//!
//! - the window always opens with a turn-start (pure-text user message)
//! - every tool result in the window has its request in the window
//!
//! Cursors are persisted per agent in `agent_cursors` so truncation never
//! moves backwards across restarts.

mod tokens;
mod window;

pub use tokens::{CHARS_PER_TOKEN, estimate_json_tokens, estimate_tokens};
pub use window::ContextWindow;
