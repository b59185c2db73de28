use serde::Deserialize;
use tracing::{debug, warn};

use parley_core::config::GroupMeConfig;

use crate::error::GroupMeError;
use crate::types::GroupMeMessage;

/// REST client for the two GroupMe endpoints the relay needs:
/// bot posts (outbound) and the group message list (polling).
#[derive(Clone)]
pub struct GroupMeClient {
    client: reqwest::Client,
    bot_id: String,
    access_token: String,
    base_url: String,
}

impl GroupMeClient {
    pub fn new(config: &GroupMeConfig) -> Self {
        Self::with_base_url(config, "https://api.groupme.com".to_string())
    }

    pub fn with_base_url(config: &GroupMeConfig, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_id: config.bot_id.clone(),
            access_token: config.access_token.clone(),
            base_url,
        }
    }

    /// Post a message to the group as the bot.
    pub async fn post_bot_message(&self, text: &str) -> Result<(), GroupMeError> {
        let url = format!("{}/v3/bots/post", self.base_url);
        let body = serde_json::json!({
            "bot_id": self.bot_id,
            "text": text,
        });

        debug!(len = text.len(), "posting bot message");

        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %message, "bot post failed");
            return Err(GroupMeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Fetch messages in a group strictly after `after_id`, oldest first.
    ///
    /// With `after_id = None` GroupMe returns the newest page (newest first);
    /// the poller uses that only to seed its cursor. GroupMe answers
    /// 304 Not Modified when there is nothing new.
    pub async fn messages_after(
        &self,
        group_id: &str,
        after_id: Option<&str>,
    ) -> Result<Vec<GroupMeMessage>, GroupMeError> {
        let mut url = format!(
            "{}/v3/groups/{}/messages?token={}",
            self.base_url, group_id, self.access_token
        );
        if let Some(id) = after_id {
            url.push_str("&after_id=");
            url.push_str(id);
        }

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();

        if status.as_u16() == 304 {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), group_id, "message list failed");
            return Err(GroupMeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| GroupMeError::Parse(e.to_string()))?;

        Ok(envelope.response.map(|r| r.messages).unwrap_or_default())
    }
}

// GroupMe API envelope types (private — deserialization only)

#[derive(Deserialize)]
struct Envelope {
    response: Option<MessageList>,
}

#[derive(Deserialize)]
struct MessageList {
    messages: Vec<GroupMeMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_message_list() {
        let json = r#"{
            "response": {
                "count": 2,
                "messages": [
                    {"id":"20","group_id":"g","sender_id":"u2","sender_type":"user","name":"Bea","text":"second"},
                    {"id":"10","group_id":"g","sender_id":"u1","sender_type":"user","name":"Al","text":"first"}
                ]
            },
            "meta": {"code": 200}
        }"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        let messages = env.response.unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "20");
        assert_eq!(messages[1].text.as_deref(), Some("first"));
    }

    #[test]
    fn empty_response_yields_no_messages() {
        let env: Envelope = serde_json::from_str(r#"{"meta":{"code":304}}"#).unwrap();
        assert!(env.response.is_none());
    }
}
