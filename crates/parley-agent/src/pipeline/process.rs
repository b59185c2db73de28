//! Core message pipeline.
//!
//! `process_message` runs the full turn: load record → append inbound →
//! build prompt (system + summary + recent history) → completion call →
//! append reply → persist → summarize if over bound → return reply text.
//!
//! The caller only handles channel-specific formatting (GroupMe post,
//! LaML envelope). Everything else is here, once.

use tracing::{info, warn};

use parley_core::types::{HistoryEntry, InboundMessage, Role};
use parley_memory::ConversationStore;

use crate::provider::{ChatRequest, LlmProvider, Message};

use super::summarize::summarize_record;
use super::PipelineError;

/// Stored history never exceeds this after a successful pipeline run.
pub const HISTORY_BOUND: usize = 20;
/// At most this many recent entries go into the prompt.
pub const PROMPT_WINDOW: usize = 25;

const REPLY_TEMPERATURE: f64 = 0.7;
const REPLY_MAX_TOKENS: u32 = 300;

/// Channel ID the SMS route files conversations under.
pub const SMS_CHANNEL_ID: &str = "sms";

const GROUP_SYSTEM_PROMPT: &str =
    "You are a helpful assistant responding in a group chat. Keep replies \
     concise and conversational.";

const SMS_SYSTEM_PROMPT: &str =
    "You are a concise, helpful SMS assistant. Keep replies under 600 \
     characters.";

/// What the user sees when the completion API is down.
pub const FALLBACK_REPLY: &str = "Sorry, I had trouble thinking of a response.";

/// Run the pipeline for one inbound message and return the reply text.
///
/// Provider failures map to `PipelineError::Upstream` and leave the stored
/// record untouched; store failures map to `PipelineError::Store`.
pub async fn process_message(
    store: &ConversationStore,
    provider: &dyn LlmProvider,
    model: &str,
    inbound: &InboundMessage,
) -> Result<String, PipelineError> {
    let mut record = store.load_or_create(&inbound.user_id)?;
    record
        .history
        .push(HistoryEntry::now(Role::User, inbound.text.clone()));

    let request = ChatRequest {
        model: model.to_string(),
        system: build_system_prompt(&inbound.channel_id, record.summary.as_deref()),
        messages: prompt_messages(&record.history),
        temperature: REPLY_TEMPERATURE,
        max_tokens: REPLY_MAX_TOKENS,
    };

    let response = provider.send(&request).await?;

    info!(
        user_id = %inbound.user_id,
        channel_id = %inbound.channel_id,
        message_id = %inbound.message_id,
        tokens_in = response.tokens_in,
        tokens_out = response.tokens_out,
        "pipeline: chat complete"
    );

    record
        .history
        .push(HistoryEntry::now(Role::Assistant, response.content.clone()));
    store.save(&record)?;

    // Summarization fails open: an error leaves the record over-bound until
    // the next successful run.
    if record.history.len() > HISTORY_BOUND {
        if let Err(e) = summarize_record(store, provider, model, &record).await {
            warn!(user_id = %inbound.user_id, error = %e, "summarization skipped");
        }
    }

    Ok(response.content)
}

/// Channel-appropriate system instructions, extended with the rolling
/// summary when one exists. SMS gets its own register and length cap.
fn build_system_prompt(channel_id: &str, summary: Option<&str>) -> String {
    let base = if channel_id == SMS_CHANNEL_ID {
        SMS_SYSTEM_PROMPT
    } else {
        GROUP_SYSTEM_PROMPT
    };
    match summary {
        Some(s) if !s.is_empty() => {
            format!("{base}\n\nSummary of the conversation so far:\n{s}")
        }
        _ => base.to_string(),
    }
}

/// The last `PROMPT_WINDOW` history entries as chat messages, oldest first.
fn prompt_messages(history: &[HistoryEntry]) -> Vec<Message> {
    let start = history.len().saturating_sub(PROMPT_WINDOW);
    history[start..]
        .iter()
        .map(|e| Message {
            role: e.role,
            content: e.text.clone(),
        })
        .collect()
}
