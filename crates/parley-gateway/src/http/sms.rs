//! SignalWire SMS ingress — POST /sms.
//!
//! SignalWire posts form-encoded fields (Body, From, MessageSid, ...) and
//! auto-sends whatever the LaML XML response contains, so upstream failures
//! are answered with the fallback text inside the envelope — never a 5xx.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use parley_agent::pipeline::{process_message, PipelineError, FALLBACK_REPLY, SMS_CHANNEL_ID};
use parley_core::types::InboundMessage;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct SmsForm {
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "MessageSid", default)]
    pub message_sid: String,
}

const OPT_OUT_REPLY: &str = "You're opted out. Reply START to opt back in.";
const HELP_REPLY: &str = "AI SMS bot. Text questions to chat. Reply STOP to opt out.";

/// POST /sms
pub async fn sms_webhook(State(state): State<Arc<AppState>>, Form(form): Form<SmsForm>) -> Response {
    if !state.config.sms.enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    let body = form.body.trim();

    // Carrier compliance keywords short-circuit before any completion call.
    if let Some(reply) = compliance_reply(body) {
        return laml_response(reply);
    }

    info!(from = %form.from, sid = %form.message_sid, "sms webhook arrived");

    let inbound = InboundMessage {
        user_id: form.from.clone(),
        text: body.to_string(),
        channel_id: SMS_CHANNEL_ID.to_string(),
        message_id: form.message_sid.clone(),
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
            warn!(sid = %form.message_sid, error = %e, "completion failed, sending fallback");
            FALLBACK_REPLY.to_string()
        }
        Err(PipelineError::Store(e)) => {
            warn!(sid = %form.message_sid, error = %e, "store failed, sending fallback");
            FALLBACK_REPLY.to_string()
        }
    };

    laml_response(&truncate_chars(&reply, state.config.sms.max_reply_chars))
}

/// Static replies for the STOP/HELP keyword set.
fn compliance_reply(body: &str) -> Option<&'static str> {
    match body.to_ascii_uppercase().as_str() {
        "STOP" => Some(OPT_OUT_REPLY),
        "HELP" | "INFO" => Some(HELP_REPLY),
        _ => None,
    }
}

/// LaML XML document SignalWire turns into an outbound SMS.
fn laml_response(text: &str) -> Response {
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Message>{}</Message></Response>"#,
        xml_escape(text)
    );
    ([(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Truncate on a char boundary so multi-byte replies can't split mid-codepoint.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_keyword_is_case_insensitive() {
        assert_eq!(compliance_reply("stop"), Some(OPT_OUT_REPLY));
        assert_eq!(compliance_reply("STOP"), Some(OPT_OUT_REPLY));
    }

    #[test]
    fn help_and_info_share_a_reply() {
        assert_eq!(compliance_reply("help"), Some(HELP_REPLY));
        assert_eq!(compliance_reply("INFO"), Some(HELP_REPLY));
    }

    #[test]
    fn ordinary_text_is_not_a_keyword() {
        assert!(compliance_reply("stop by later?").is_none());
        assert!(compliance_reply("what's up").is_none());
    }

    #[test]
    fn xml_escape_covers_all_five() {
        assert_eq!(
            xml_escape(r#"a&b<c>d"e'f"#),
            "a&amp;b&lt;c&gt;d&quot;e&apos;f"
        );
    }

    #[test]
    fn xml_escape_orders_ampersand_first() {
        // "&lt;" must not become "&amp;lt;".
        assert_eq!(xml_escape("<"), "&lt;");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 600), "short");
    }
}
