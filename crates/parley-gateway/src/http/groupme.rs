//! GroupMe webhook ingress — POST /groupme.
//!
//! GroupMe POSTs one JSON callback per message in the group, including the
//! bot's own posts (sender_type "bot"), which are skipped so the bot never
//! talks to itself. Replies go out through the bot-post API; the webhook
//! response body itself is ignored by GroupMe.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use parley_agent::pipeline::{process_message, PipelineError, FALLBACK_REPLY};
use parley_core::types::InboundMessage;
use parley_groupme::GroupMeCallback;

use crate::app::AppState;

/// POST /groupme
///
/// Runs the pipeline for the sender and posts the reply back to the group.
/// Returns 200 on success (including degraded fallback replies), 500 when
/// the store fails after retries — GroupMe may redeliver the callback.
pub async fn groupme_webhook(
    State(state): State<Arc<AppState>>,
    Json(callback): Json<GroupMeCallback>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    if callback.is_bot() {
        return Ok(StatusCode::OK);
    }

    let text = callback.text.as_deref().unwrap_or("").trim().to_string();
    if text.is_empty() {
        return Ok(StatusCode::OK);
    }

    info!(
        sender = %callback.name,
        group_id = %callback.group_id,
        message_id = %callback.id,
        "groupme webhook arrived"
    );

    let inbound = InboundMessage {
        user_id: callback.sender_id.clone(),
        text,
        channel_id: callback.group_id.clone(),
        message_id: callback.id.clone(),
    };

    let reply = match process_message(
        &state.store,
        state.provider.as_ref(),
        &state.model,
        &inbound,
    )
    .await
    {
        Ok(reply) => reply,
        Err(PipelineError::Upstream(e)) => {
            warn!(message_id = %callback.id, error = %e, "completion failed, sending fallback");
            FALLBACK_REPLY.to_string()
        }
        Err(PipelineError::Store(e)) => {
            warn!(message_id = %callback.id, error = %e, "store failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            ));
        }
    };

    match &state.groupme {
        Some(client) => {
            if let Err(e) = client.post_bot_message(&reply).await {
                warn!(message_id = %callback.id, error = %e, "reply post failed");
            }
        }
        None => warn!("groupme not configured, reply dropped"),
    }

    // Mark the message answered so the poller skips it. The checkpoint
    // itself belongs to the poller: advancing it here would leap over any
    // earlier message whose webhook delivery was lost.
    state.ledger.mark(&callback.id);

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parley_agent::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
    use parley_core::config::ParleyConfig;
    use parley_groupme::MessageLedger;
    use parley_memory::ConversationStore;

    struct CannedProvider;

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: "ack".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
            })
        }
    }

    fn test_state() -> Arc<AppState> {
        let store = Arc::new(
            ConversationStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );
        Arc::new(AppState {
            config: ParleyConfig::default(),
            store,
            provider: Arc::new(CannedProvider),
            model: "gpt-4o-mini".to_string(),
            groupme: None,
            ledger: Arc::new(MessageLedger::new()),
        })
    }

    fn callback(id: &str, sender_type: &str, text: &str) -> GroupMeCallback {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "group_id": "g1",
            "sender_id": "u1",
            "sender_type": sender_type,
            "name": "Al",
            "text": text,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn webhook_never_moves_the_poll_cursor() {
        let state = test_state();
        state.store.advance_checkpoint("g1", "100").unwrap();

        // 102 arrives over the webhook while 101's delivery was lost.
        let status = groupme_webhook(
            State(Arc::clone(&state)),
            Json(callback("102", "user", "hi")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::OK);

        // Cursor still points at 100, so the next poll re-fetches 101.
        assert_eq!(
            state.store.checkpoint("g1").unwrap().as_deref(),
            Some("100")
        );
        // 102 is marked answered; the poller will only advance past it.
        assert!(state.ledger.contains("102"));
    }

    #[tokio::test]
    async fn bot_callbacks_are_skipped() {
        let state = test_state();

        let status = groupme_webhook(
            State(Arc::clone(&state)),
            Json(callback("7", "bot", "echo of my own post")),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(state.store.load("u1").unwrap().is_none());
        assert!(!state.ledger.contains("7"));
    }
}
