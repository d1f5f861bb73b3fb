//! Token estimation.

use serde::Serialize;

/// Rough characters-per-token ratio used when no tokenizer is available.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a piece of text, rounding up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate the token count of any serializable value from its JSON form.
///
/// Falls back to zero if the value cannot be serialized, which only happens
/// for maps with non-string keys.
pub fn estimate_json_tokens<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_string(value)
        .map(|json| estimate_tokens(&json))
        .unwrap_or(0)
}
