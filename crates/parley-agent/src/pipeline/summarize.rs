//! History summarization.
//!
//! When a conversation's stored history grows past `HISTORY_BOUND`, the
//! oldest entries are compressed into the rolling summary and discarded,
//! keeping the per-user row small while preserving context. The summary
//! therefore always reflects entries strictly older than what remains.

use tracing::info;

use parley_core::types::{HistoryEntry, Role};
use parley_memory::types::ConversationRecord;
use parley_memory::ConversationStore;

use crate::provider::{ChatRequest, LlmProvider, Message};

use super::PipelineError;

/// How many of the newest entries survive a summarization pass.
pub const RETAINED_AFTER_SUMMARY: usize = 10;

const SUMMARY_TEMPERATURE: f64 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 300;

const SUMMARY_SYSTEM_PROMPT: &str =
    "You compress chat history. Produce a short plain-text summary of the \
     conversation below, folding in the prior summary when one is given. \
     Keep names, decisions, and open questions; drop pleasantries.";

/// Compress everything but the newest `RETAINED_AFTER_SUMMARY` entries of
/// `record` into the summary, then persist the truncated record.
///
/// Errors propagate to the caller, which treats them as fail-open: the
/// over-bound record stays as it was and a later run tries again.
pub async fn summarize_record(
    store: &ConversationStore,
    provider: &dyn LlmProvider,
    model: &str,
    record: &ConversationRecord,
) -> Result<(), PipelineError> {
    if record.history.len() <= RETAINED_AFTER_SUMMARY {
        return Ok(());
    }

    let split = record.history.len() - RETAINED_AFTER_SUMMARY;
    let discarded = &record.history[..split];

    let request = ChatRequest {
        model: model.to_string(),
        system: SUMMARY_SYSTEM_PROMPT.to_string(),
        messages: vec![Message {
            role: Role::User,
            content: summary_input(record.summary.as_deref(), discarded),
        }],
        temperature: SUMMARY_TEMPERATURE,
        max_tokens: SUMMARY_MAX_TOKENS,
    };

    let response = provider.send(&request).await?;

    let mut updated = record.clone();
    updated.summary = Some(response.content);
    updated.history.drain(..split);
    store.save(&updated)?;

    info!(
        user_id = %record.user_id,
        discarded = split,
        retained = updated.history.len(),
        "conversation summarized"
    );
    Ok(())
}

/// Prior summary plus a plain-text transcript of the entries being discarded.
fn summary_input(prior: Option<&str>, discarded: &[HistoryEntry]) -> String {
    let transcript: String = discarded
        .iter()
        .map(|e| format!("{}: {}", e.role.to_string().to_uppercase(), e.text))
        .collect::<Vec<_>>()
        .join("\n");

    match prior {
        Some(s) if !s.is_empty() => {
            format!("Prior summary:\n{s}\n\nOlder messages to fold in:\n{transcript}")
        }
        _ => format!("Messages to summarize:\n{transcript}"),
    }
}
