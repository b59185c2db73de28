pub mod groupme;
pub mod health;
pub mod sms;
