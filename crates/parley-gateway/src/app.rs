use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use parley_agent::provider::LlmProvider;
use parley_core::config::ParleyConfig;
use parley_groupme::{GroupMeClient, MessageLedger};
use parley_memory::ConversationStore;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ParleyConfig,
    pub store: Arc<ConversationStore>,
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    /// Outbound GroupMe client. None when no [groupme] table is configured;
    /// the /groupme route then accepts callbacks but cannot reply.
    pub groupme: Option<GroupMeClient>,
    /// Shared with the poller: message IDs the webhook already answered.
    pub ledger: Arc<MessageLedger>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/groupme", post(crate::http::groupme::groupme_webhook))
        .route("/sms", post(crate::http::sms::sms_webhook))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
