//! Server-side brain: turns utterance + page context into an action by way
//! of the OpenAI chat-completions API.
//!
//! Holds the prompt text for both phases. The reply must be exactly one
//! JSON object; anything else degrades to the safe fallback action rather
//! than an error.

use anyhow::{Result, anyhow, bail};
use reqwest::Client;
use serde_json::json;

use crate::action::{self, ActionMessage, PARSE_FALLBACK_SPEECH};
use crate::interpret::{DomPayload, IntentPayload, IntentReply, SinglePayload};
use crate::snapshot;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Well-known navigation targets the classifier may resolve by name.
const NAVIGATION_TARGETS: &[(&str, &str)] = &[
    ("inbox / email / gmail", "https://mail.google.com/mail/u/0/#inbox"),
    ("calendar", "https://calendar.google.com"),
    ("drive", "https://drive.google.com"),
    ("docs", "https://docs.google.com"),
    ("news", "https://news.google.com"),
    ("youtube", "https://www.youtube.com"),
];

const SINGLE_PHASE_SYSTEM: &str = r#"You are a browser voice assistant that controls the page via a content script.
You MUST respond with a single JSON object, no extra text, no markdown.
Shape:
{
  "type": "command",
  "action": "<string>",
  "params": {},
  "speakText": "<string the extension should say aloud>"
}

Valid actions:

* "navigate"            // go to a URL; params: {"url": "<https://...>"}
* "click"               // click an element; params: {"selector": "<css>"} and/or {"xpath": "<xpath>"}
* "describe"            // speak a description of the page; no params
* "navigateEmail"       // navigate to the Gmail inbox page
* "describePageContext" // verbally describe whether the user is in their inbox
* "countUnreadEmails"   // count unread emails in the current view
* "none"                // for small talk or when no browser action is needed

For casual chat or anything unclear: action "none" with a short, friendly speakText.
Do NOT wrap the JSON in backticks or markdown. Return ONLY the JSON object."#;

const INTENT_SYSTEM: &str = r#"You are the intent classifier for a browser voice assistant.
You see the utterance, URL and title but NOT the page content.
You MUST respond with a single JSON object, no extra text, no markdown:
{
  "actionType": "navigate" | "click" | "describe" | "none",
  "needsDOM": <bool>,
  "action": { "action": "...", "params": {...}, "speakText": "..." }
}

Rules:
* "navigate" and "none" never need the DOM: set needsDOM false and include the
  complete action object.
* "click" and "describe" need the page content: set needsDOM true and omit
  "action"; you will receive the DOM in a second round.
Return ONLY the JSON object."#;

const DOM_DESCRIBE_INSTRUCTION: &str = r#"Using the DOM rendering below, describe what the page currently shows in one
or two spoken sentences. Respond with a single JSON object:
{"action":"describe","params":{},"speakText":"<description>"}"#;

const DOM_CLICK_INSTRUCTION: &str = r#"Using the DOM rendering below, pick the single element the user wants
activated. Use the bracketed xpath from the rendering, and a CSS selector too
when an id is available. Respond with a single JSON object:
{"action":"click","params":{"xpath":"<xpath>","selector":"<css, optional>"},"speakText":"<confirmation>"}"#;

pub struct Classifier {
    client: Client,
    api_key: Option<String>,
    model: String,
    api_url: String,
}

impl Classifier {
    /// The key is optional at construction: a missing key fails each request
    /// that needs it, not the server boot.
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.into(),
            api_url: OPENAI_URL.to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("OPENAI_API_KEY").ok(), DEFAULT_MODEL)
    }

    /// Legacy one-shot classification with raw page text.
    pub async fn single_phase(&self, payload: &SinglePayload) -> Result<ActionMessage> {
        let user = format!(
            "User utterance: \"{}\"\n\nPage URL: {}\nPage title: {}\n\nPage text (truncated):\n\"\"\"{}\"\"\"",
            payload.utterance,
            payload.url,
            payload.title,
            payload.page_text.as_deref().unwrap_or("")
        );
        let system = format!("{}\n\n{}", SINGLE_PHASE_SYSTEM, navigation_table());
        let content = self.chat(&system, &user).await?;
        Ok(parse_action_message(&content))
    }

    /// Phase 1: intent only, no DOM attached.
    pub async fn classify_intent(&self, payload: &IntentPayload) -> Result<IntentReply> {
        let user = format!(
            "User utterance: \"{}\"\nPage URL: {}\nPage title: {}",
            payload.utterance, payload.url, payload.title
        );
        let system = format!("{}\n\n{}", INTENT_SYSTEM, navigation_table());
        let content = self.chat(&system, &user).await?;
        Ok(parse_intent_reply(&content))
    }

    /// Phase 2: the DOM-bearing round with an action-specific instruction.
    pub async fn analyze_dom(&self, payload: &DomPayload) -> Result<ActionMessage> {
        let instruction = dom_instruction(&payload.action_type);
        let rendered = snapshot::render_text(&payload.dom);
        let user = format!(
            "User utterance: \"{}\"\nPage URL: {}\nPage title: {}\n\nDOM rendering:\n{}",
            payload.utterance, payload.url, payload.title, rendered
        );
        let content = self.chat(instruction, &user).await?;
        Ok(parse_action_message(&content))
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("OPENAI_API_KEY is not set");
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
                "temperature": 0,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown API error");
            bail!("chat API error ({}): {}", status, message);
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("no content in chat response: {}", body))?;
        tracing::debug!(content, "classifier raw reply");
        Ok(content.to_string())
    }
}

fn navigation_table() -> String {
    let mut table = String::from("Known destinations for \"navigate\":\n");
    for (name, url) in NAVIGATION_TARGETS {
        table.push_str(&format!("* {} -> {}\n", name, url));
    }
    table
}

fn dom_instruction(action_type: &str) -> &'static str {
    match action_type {
        "click" => DOM_CLICK_INSTRUCTION,
        _ => DOM_DESCRIBE_INSTRUCTION,
    }
}

/// Parse a model reply as an action message, substituting the fallback on
/// anything unparseable.
pub fn parse_action_message(content: &str) -> ActionMessage {
    let cleaned = action::strip_fences(content);
    match serde_json::from_str(cleaned) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(%err, reply = cleaned, "model reply was not a JSON action");
            ActionMessage::none(PARSE_FALLBACK_SPEECH)
        }
    }
}

/// Parse a phase-1 reply; unparseable content degrades to a complete no-op
/// intent so the caller never launches a pointless DOM round.
pub fn parse_intent_reply(content: &str) -> IntentReply {
    let cleaned = action::strip_fences(content);
    match serde_json::from_str(cleaned) {
        Ok(reply) => reply,
        Err(err) => {
            tracing::warn!(%err, reply = cleaned, "model reply was not a JSON intent");
            IntentReply {
                action_type: "none".to_string(),
                needs_dom: false,
                action: Some(ActionMessage::none(PARSE_FALLBACK_SPEECH)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_table_lists_the_inbox() {
        let table = navigation_table();
        assert!(table.contains("mail.google.com"));
        assert!(table.contains("calendar.google.com"));
    }

    #[test]
    fn dom_instruction_is_action_specific() {
        assert!(dom_instruction("click").contains("xpath"));
        assert!(dom_instruction("describe").contains("describe"));
        // Unknown action types get the describe instruction.
        assert_eq!(dom_instruction("whatever"), DOM_DESCRIBE_INSTRUCTION);
    }

    #[test]
    fn unparseable_intent_reply_degrades_to_a_no_op() {
        let reply = parse_intent_reply("I think the user wants to click something");
        assert_eq!(reply.action_type, "none");
        assert!(!reply.needs_dom);
        assert_eq!(reply.action.unwrap().speak_text, PARSE_FALLBACK_SPEECH);
    }

    #[test]
    fn fenced_intent_reply_parses() {
        let reply =
            parse_intent_reply("```json\n{\"actionType\":\"click\",\"needsDOM\":true}\n```");
        assert_eq!(reply.action_type, "click");
        assert!(reply.needs_dom);
        assert!(reply.action.is_none());
    }

    #[test]
    fn unparseable_action_reply_degrades_to_the_fallback() {
        let message = parse_action_message("not json");
        assert_eq!(message.action, "none");
        assert_eq!(message.speak_text, PARSE_FALLBACK_SPEECH);
    }
}
