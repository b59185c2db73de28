//! Message pipeline — shared by the webhook handlers and the poller.

pub mod process;
pub mod summarize;

pub use process::{process_message, FALLBACK_REPLY, HISTORY_BOUND, PROMPT_WINDOW, SMS_CHANNEL_ID};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The completion API failed; the caller sends a degraded fallback reply.
    #[error("upstream error: {0}")]
    Upstream(#[from] crate::provider::ProviderError),

    /// The conversation store failed after retries; surfaces as a 5xx.
    #[error("store error: {0}")]
    Store(#[from] parley_memory::StoreError),
}
