pub mod client;
pub mod dedupe;
pub mod error;
pub mod poller;
pub mod types;

pub use client::GroupMeClient;
pub use dedupe::MessageLedger;
pub use error::GroupMeError;
pub use poller::GroupMePoller;
pub use types::{GroupMeCallback, GroupMeMessage};
