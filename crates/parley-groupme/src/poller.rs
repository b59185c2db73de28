//! Background poller — catches messages whose webhook delivery failed.
//!
//! Re-reads the group message list by cursor on a fixed interval and feeds
//! each unseen message through the same pipeline the webhook uses. Messages
//! the webhook already answered (tracked in the shared [`MessageLedger`])
//! only move the cursor. The checkpoint advances only past messages whose
//! pipeline run succeeded, so delivery is at-least-once: a crash mid-batch
//! can double-reply but never loses a message.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use parley_agent::pipeline::{process_message, PipelineError};
use parley_agent::provider::LlmProvider;
use parley_core::config::GroupMeConfig;
use parley_core::types::InboundMessage;
use parley_memory::ConversationStore;

use crate::client::GroupMeClient;
use crate::dedupe::MessageLedger;
use crate::types::GroupMeMessage;

pub struct GroupMePoller {
    client: GroupMeClient,
    store: Arc<ConversationStore>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    group_id: String,
    interval: Duration,
    ledger: Arc<MessageLedger>,
}

impl GroupMePoller {
    pub fn new(
        config: &GroupMeConfig,
        client: GroupMeClient,
        store: Arc<ConversationStore>,
        provider: Arc<dyn LlmProvider>,
        model: String,
        ledger: Arc<MessageLedger>,
    ) -> Self {
        Self {
            client,
            store,
            provider,
            model,
            group_id: config.group_id.clone(),
            interval: Duration::from_secs(config.poll_interval_secs),
            ledger,
        }
    }

    /// Main poll loop. Runs until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(group_id = %self.group_id, interval_secs = self.interval.as_secs(), "poller started");

        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("poller shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One poll cycle: read checkpoint, fetch newer messages, process each
    /// in arrival order, advance the cursor after each success.
    async fn tick(&self) {
        let cursor = match self.store.checkpoint(&self.group_id) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "poller: checkpoint read failed");
                return;
            }
        };

        let Some(cursor) = cursor else {
            self.seed_cursor().await;
            return;
        };

        let messages = match self.client.messages_after(&self.group_id, Some(&cursor)).await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "poller: message fetch failed");
                return;
            }
        };
        if messages.is_empty() {
            return;
        }

        info!(count = messages.len(), "poller: unseen messages");

        for msg in batch_in_arrival_order(messages) {
            // Bot echoes and attachment-only messages just move the cursor.
            let text = msg.text.as_deref().unwrap_or("").trim().to_string();
            if msg.is_bot() || text.is_empty() {
                if self.advance(&msg.id).is_err() {
                    return;
                }
                continue;
            }

            // Already answered through the webhook: cursor only.
            if self.ledger.contains(&msg.id) {
                if self.advance(&msg.id).is_err() {
                    return;
                }
                continue;
            }

            let inbound = InboundMessage {
                user_id: msg.sender_id.clone(),
                text,
                channel_id: self.group_id.clone(),
                message_id: msg.id.clone(),
            };

            match process_message(
                &self.store,
                self.provider.as_ref(),
                &self.model,
                &inbound,
            )
            .await
            {
                Ok(reply) => {
                    self.ledger.mark(&msg.id);
                    if let Err(e) = self.client.post_bot_message(&reply).await {
                        warn!(message_id = %msg.id, error = %e, "poller: reply post failed");
                    }
                }
                Err(PipelineError::Upstream(e)) => {
                    // Leave the cursor on the failed message; the next cycle
                    // retries it.
                    warn!(message_id = %msg.id, error = %e, "poller: completion failed, batch stopped");
                    return;
                }
                Err(PipelineError::Store(e)) => {
                    error!(message_id = %msg.id, error = %e, "poller: store failed, batch stopped");
                    return;
                }
            }

            if self.advance(&msg.id).is_err() {
                return;
            }
        }
    }

    /// First cycle on a fresh channel: record the newest message ID without
    /// replying, so a new deploy doesn't replay the group backlog.
    async fn seed_cursor(&self) {
        match self.client.messages_after(&self.group_id, None).await {
            Ok(messages) => {
                // Without a cursor GroupMe returns the newest page first.
                if let Some(newest) = messages.first() {
                    if self.advance(&newest.id).is_ok() {
                        info!(message_id = %newest.id, "poller: cursor seeded");
                    }
                }
            }
            Err(e) => warn!(error = %e, "poller: cursor seed fetch failed"),
        }
    }

    fn advance(&self, message_id: &str) -> Result<(), ()> {
        self.store
            .advance_checkpoint(&self.group_id, message_id)
            .map_err(|e| {
                error!(message_id, error = %e, "poller: checkpoint advance failed");
            })
    }
}

/// GroupMe returns after_id pages oldest-first, but sort defensively by the
/// numeric message ID so processing order always matches arrival order.
fn batch_in_arrival_order(mut messages: Vec<GroupMeMessage>) -> Vec<GroupMeMessage> {
    messages.sort_by_key(|m| m.id.parse::<u64>().unwrap_or(u64::MAX));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rusqlite::Connection;

    use parley_agent::provider::{ChatRequest, ChatResponse, ProviderError};

    fn msg(id: &str) -> GroupMeMessage {
        GroupMeMessage {
            id: id.to_string(),
            sender_id: "u".to_string(),
            sender_type: "user".to_string(),
            name: "x".to_string(),
            text: Some("hi".to_string()),
        }
    }

    #[test]
    fn batch_is_sorted_ascending_by_id() {
        let sorted = batch_in_arrival_order(vec![msg("30"), msg("10"), msg("20")]);
        let ids: Vec<&str> = sorted.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["10", "20", "30"]);
    }

    #[test]
    fn non_numeric_ids_sort_last() {
        let sorted = batch_in_arrival_order(vec![msg("abc"), msg("5")]);
        assert_eq!(sorted[0].id, "5");
    }

    /// Succeeds unless the latest user message contains `fail_marker`;
    /// records the text of every message it was asked about.
    struct ScriptedProvider {
        fail_marker: Option<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(fail_marker: Option<&'static str>) -> Self {
            Self {
                fail_marker,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let latest = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.seen.lock().unwrap().push(latest.clone());
            if let Some(marker) = self.fail_marker {
                if latest.contains(marker) {
                    return Err(ProviderError::Api {
                        status: 500,
                        message: "scripted failure".to_string(),
                    });
                }
            }
            Ok(ChatResponse {
                content: "ack".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
            })
        }
    }

    /// Local stand-in for the GroupMe API: a fixed three-message page plus
    /// an always-accepting bot-post endpoint.
    async fn serve_canned_group() -> String {
        use axum::routing::{get, post};

        let router = axum::Router::new()
            .route(
                "/v3/groups/{group_id}/messages",
                get(|| async {
                    axum::Json(serde_json::json!({
                        "response": {
                            "count": 3,
                            "messages": [
                                {"id": "101", "group_id": "g1", "sender_id": "u1",
                                 "sender_type": "user", "name": "Al", "text": "hello"},
                                {"id": "102", "group_id": "g1", "sender_id": "u2",
                                 "sender_type": "user", "name": "Bea", "text": "boom"},
                                {"id": "103", "group_id": "g1", "sender_id": "u1",
                                 "sender_type": "user", "name": "Al", "text": "later"}
                            ]
                        },
                        "meta": {"code": 200}
                    }))
                }),
            )
            .route(
                "/v3/bots/post",
                post(|| async { axum::http::StatusCode::CREATED }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn group_config() -> GroupMeConfig {
        GroupMeConfig {
            bot_id: "b1".to_string(),
            group_id: "g1".to_string(),
            access_token: "t".to_string(),
            poll_interval_secs: 60,
        }
    }

    fn poller_under_test(
        base_url: String,
        provider: Arc<dyn LlmProvider>,
        ledger: Arc<MessageLedger>,
    ) -> (GroupMePoller, Arc<ConversationStore>) {
        let config = group_config();
        let client = GroupMeClient::with_base_url(&config, base_url);
        let store =
            Arc::new(ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap());
        store.advance_checkpoint("g1", "100").unwrap();
        let poller = GroupMePoller::new(
            &config,
            client,
            Arc::clone(&store),
            provider,
            "gpt-4o-mini".to_string(),
            ledger,
        );
        (poller, store)
    }

    #[tokio::test]
    async fn cursor_stops_before_failed_message() {
        let base_url = serve_canned_group().await;
        let provider = Arc::new(ScriptedProvider::new(Some("boom")));
        let ledger = Arc::new(MessageLedger::new());
        let (poller, store) =
            poller_under_test(base_url, provider.clone(), Arc::clone(&ledger));

        poller.tick().await;

        // 101 processed and posted; 102 failed, so the batch stopped with
        // the cursor still pointing before it. 103 was never attempted.
        assert_eq!(store.checkpoint("g1").unwrap().as_deref(), Some("101"));
        assert_eq!(provider.seen(), vec!["hello", "boom"]);
        assert!(ledger.contains("101"));
        assert!(!ledger.contains("102"));

        // The next cycle retries from 102.
        poller.tick().await;
        assert_eq!(store.checkpoint("g1").unwrap().as_deref(), Some("101"));
    }

    #[tokio::test]
    async fn webhook_handled_messages_only_move_the_cursor() {
        let base_url = serve_canned_group().await;
        let provider = Arc::new(ScriptedProvider::new(None));
        let ledger = Arc::new(MessageLedger::new());
        ledger.mark("101");
        ledger.mark("102");
        let (poller, store) =
            poller_under_test(base_url, provider.clone(), Arc::clone(&ledger));

        poller.tick().await;

        // 101 and 102 were answered via the webhook, so only 103 reaches
        // the pipeline; the cursor still walks past all three.
        assert_eq!(store.checkpoint("g1").unwrap().as_deref(), Some("103"));
        assert_eq!(provider.seen(), vec!["later"]);
    }
}
