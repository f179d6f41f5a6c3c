//! The action vocabulary: what an interpretation can ask the page to do.
//!
//! Two shapes exist on purpose. [`ActionMessage`] is the loose wire form the
//! classifier returns (string kind, free-form params). [`Action`] is the
//! closed domain form the executor dispatches on exhaustively, so adding a
//! kind is a compile-time-checked change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Spoken when a classifier reply cannot be parsed as an action.
pub const PARSE_FALLBACK_SPEECH: &str = "Sorry, I had trouble understanding that.";

/// Wire form of an action, as produced by the classifier and relayed back to
/// the page context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    #[serde(rename = "speakText", default)]
    pub speak_text: String,
}

impl ActionMessage {
    pub fn none(speak_text: impl Into<String>) -> Self {
        Self {
            message_type: Some("command".to_string()),
            action: "none".to_string(),
            params: serde_json::Map::new(),
            speak_text: speak_text.into(),
        }
    }

    fn param_str(&self, name: &str) -> Option<String> {
        self.params.get(name).and_then(Value::as_str).map(String::from)
    }

    /// Lower into the closed domain form. Unknown action strings become
    /// no-ops but keep the model's spoken reply.
    pub fn into_action(self) -> Action {
        let kind = match self.action.as_str() {
            "navigate" => ActionKind::Navigate {
                url: self.param_str("url"),
            },
            "click" => ActionKind::Click {
                selector: self.param_str("selector"),
                xpath: self.param_str("xpath"),
            },
            "describe" => ActionKind::Describe,
            "none" => ActionKind::None,
            "deactivate" => ActionKind::Deactivate,
            "navigateEmail" => ActionKind::NavigateEmail,
            "describePageContext" => ActionKind::DescribePageContext,
            "countUnreadEmails" => ActionKind::CountUnreadEmails,
            other => {
                tracing::warn!(action = other, "unknown action kind from classifier");
                ActionKind::None
            }
        };
        Action {
            kind,
            speak_text: self.speak_text,
        }
    }
}

/// A structured instruction: kind plus the confirmation to speak. Transient;
/// consumed by the executor and discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub speak_text: String,
}

/// Closed set of things the executor knows how to do.
///
/// `Click` needs at least one of selector/xpath and `Navigate` needs a url;
/// both are enforced at execution time with a spoken error rather than at
/// parse time, matching the wire contract's leniency.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    Navigate {
        url: Option<String>,
    },
    Click {
        selector: Option<String>,
        xpath: Option<String>,
    },
    Describe,
    None,
    /// Turn the agent off once the farewell has had time to play.
    Deactivate,
    // Gmail-specific legacy kinds, kept for the local rule matcher flow.
    NavigateEmail,
    DescribePageContext,
    CountUnreadEmails,
}

impl Action {
    pub fn new(kind: ActionKind, speak_text: impl Into<String>) -> Self {
        Self {
            kind,
            speak_text: speak_text.into(),
        }
    }

    pub fn speak_only(speak_text: impl Into<String>) -> Self {
        Self::new(ActionKind::None, speak_text)
    }

    /// The safe default substituted for unparseable classifier replies.
    pub fn fallback() -> Self {
        Self::speak_only(PARSE_FALLBACK_SPEECH)
    }
}

/// Strip markdown fences a model may wrap around its JSON reply.
pub fn strip_fences(reply: &str) -> &str {
    reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Parse a classifier reply into an action, substituting the fallback when
/// the reply is not a JSON action object.
pub fn parse_action(reply: &str) -> Action {
    let cleaned = strip_fences(reply);
    match serde_json::from_str::<ActionMessage>(cleaned) {
        Ok(message) => message.into_action(),
        Err(err) => {
            tracing::warn!(%err, reply = cleaned, "classifier reply was not a JSON action");
            Action::fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_reply_yields_the_fallback_action() {
        let action = parse_action("not json");
        assert_eq!(action.kind, ActionKind::None);
        assert_eq!(action.speak_text, PARSE_FALLBACK_SPEECH);
    }

    #[test]
    fn markdown_fences_are_stripped_before_parsing() {
        let reply = "```json\n{\"action\":\"describe\",\"speakText\":\"Here it is.\"}\n```";
        let action = parse_action(reply);
        assert_eq!(action.kind, ActionKind::Describe);
        assert_eq!(action.speak_text, "Here it is.");
    }

    #[test]
    fn click_params_map_to_selector_and_xpath() {
        let reply = r##"{"action":"click","params":{"selector":"#send","xpath":"/html/body/button"},"speakText":"Clicking send."}"##;
        let action = parse_action(reply);
        assert_eq!(
            action.kind,
            ActionKind::Click {
                selector: Some("#send".to_string()),
                xpath: Some("/html/body/button".to_string()),
            }
        );
    }

    #[test]
    fn navigate_without_url_parses_but_carries_none() {
        let reply = r#"{"action":"navigate","params":{},"speakText":"Off we go."}"#;
        let action = parse_action(reply);
        assert_eq!(action.kind, ActionKind::Navigate { url: None });
    }

    #[test]
    fn unknown_action_string_becomes_a_no_op_but_keeps_the_reply() {
        let reply = r#"{"action":"launchRockets","params":{},"speakText":"Sure."}"#;
        let action = parse_action(reply);
        assert_eq!(action.kind, ActionKind::None);
        assert_eq!(action.speak_text, "Sure.");
    }

    #[test]
    fn legacy_gmail_kinds_round_trip() {
        let reply = r#"{"type":"command","action":"countUnreadEmails","params":{},"speakText":"I'll count your unread emails."}"#;
        let action = parse_action(reply);
        assert_eq!(action.kind, ActionKind::CountUnreadEmails);
    }
}
