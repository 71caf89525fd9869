//! Conversational-context retrieval.
//!
//! Produces a bounded, recency-ranked snippet of prior conversation to
//! ground the next model call: the top-K most recent stored turns for the
//! current user whose text matches the new utterance, concatenated under
//! an explicit length cap.

use anyhow::Result;

use crate::store::MessageStore;

/// Top-`k` most recent stored texts for `username` matching `query`,
/// newest first. Read-only; deterministic given store state; empty when
/// nothing matches or the user has no history.
pub async fn retrieve(
    store: &MessageStore,
    username: &str,
    query: &str,
    k: i64,
) -> Result<Vec<String>> {
    let matches = store.search_recent(username, query, k).await?;
    Ok(matches.into_iter().map(|m| m.text).collect())
}

/// Join retrieved texts with single spaces, skipping any text that would
/// push the accumulated length past `max_chars`. Retrieval order is
/// preserved for the texts that fit.
pub fn build_context(texts: &[String], max_chars: usize) -> String {
    let mut out = String::new();
    for text in texts {
        let needed = if out.is_empty() {
            text.len()
        } else {
            text.len() + 1
        };
        if out.len() + needed > max_chars {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(text);
    }
    out
}

/// Retrieved context precedes the new text. No separator when there is no
/// context.
pub fn compose_prompt(context: &str, text: &str) -> String {
    if context.is_empty() {
        text.to_string()
    } else {
        format!("{} {}", context, text)
    }
}
