pub mod db;
pub mod error;
mod retry;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use store::ConversationStore;
pub use types::ConversationRecord;
