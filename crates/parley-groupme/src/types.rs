use serde::Deserialize;

/// Webhook callback body GroupMe POSTs for every message in the group.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupMeCallback {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub sender_type: String,
    #[serde(default)]
    pub name: String,
    /// Null for attachment-only messages.
    #[serde(default)]
    pub text: Option<String>,
}

impl GroupMeCallback {
    /// Our own posts come back through the webhook with sender_type "bot".
    pub fn is_bot(&self) -> bool {
        self.sender_type == "bot"
    }
}

/// One message from the group message-list API.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupMeMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl GroupMeMessage {
    pub fn is_bot(&self) -> bool {
        self.sender_type == "bot"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_deserializes_groupme_payload() {
        let json = r#"{
            "attachments": [],
            "avatar_url": "https://i.groupme.com/123456789",
            "created_at": 1302623328,
            "group_id": "1234567890",
            "id": "1234567890",
            "name": "John",
            "sender_id": "12345",
            "sender_type": "user",
            "source_guid": "GUID",
            "system": false,
            "text": "Hello world",
            "user_id": "1234567890"
        }"#;
        let cb: GroupMeCallback = serde_json::from_str(json).unwrap();
        assert_eq!(cb.text.as_deref(), Some("Hello world"));
        assert_eq!(cb.sender_id, "12345");
        assert!(!cb.is_bot());
    }

    #[test]
    fn bot_sender_is_detected() {
        let json = r#"{"id":"1","group_id":"g","sender_id":"b1",
                       "sender_type":"bot","name":"parley","text":"hi"}"#;
        let cb: GroupMeCallback = serde_json::from_str(json).unwrap();
        assert!(cb.is_bot());
    }

    #[test]
    fn null_text_is_allowed() {
        let json = r#"{"id":"1","group_id":"g","sender_id":"u",
                       "sender_type":"user","name":"x","text":null}"#;
        let cb: GroupMeCallback = serde_json::from_str(json).unwrap();
        assert!(cb.text.is_none());
    }
}
