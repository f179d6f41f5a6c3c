//! Local rule matcher: keyword predicates over the utterance plus a
//! synchronously-computed Gmail page context. No network, no model.
//!
//! Predicate order is significant and fixed; the first match wins.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionKind};

use super::{Interpreter, InterpretRequest};

/// One row of the visible email list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailSummary {
    pub sender: String,
    pub subject: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub is_unread: bool,
}

/// The currently open email, when one is expanded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenEmail {
    pub sender: String,
    #[serde(default)]
    pub sender_email: String,
    pub subject: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub body: String,
}

/// What the page looks like right now, as far as the rules care.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GmailContext {
    pub open_email: Option<OpenEmail>,
    #[serde(default)]
    pub email_list: Vec<EmailSummary>,
    #[serde(default)]
    pub unread_count: usize,
    #[serde(default)]
    pub current_view: String,
}

impl GmailContext {
    pub fn total_visible(&self) -> usize {
        self.email_list.len()
    }
}

/// Infer the mailbox view from the URL fragment. Unknown fragments read as
/// the inbox, like the original heuristic.
pub fn view_from_url(url: &str) -> &'static str {
    let fragment = url.split('#').nth(1).unwrap_or("");
    for view in ["inbox", "sent", "drafts", "starred", "search", "label"] {
        if fragment.starts_with(view) {
            return match view {
                "inbox" => "inbox",
                "sent" => "sent",
                "drafts" => "drafts",
                "starred" => "starred",
                "search" => "search",
                _ => "label",
            };
        }
    }
    "inbox"
}

/// Apply the ordered predicate list. Pure; the testable heart of the local
/// strategy.
pub fn match_rules(utterance: &str, ctx: &GmailContext) -> Action {
    let cmd = utterance.to_lowercase();
    let cmd = cmd.trim();

    // Read / summarize the visible list. "unread" contains "read", so the
    // count question is excluded here and left to the next rule.
    if (cmd.contains("read")
        && !cmd.contains("unread")
        && (cmd.contains("email") || cmd.contains("mail")))
        || (cmd.contains("what") && cmd.contains("email") && !cmd.contains("unread"))
    {
        if (cmd.contains("read this") || cmd.contains("what does") || cmd.contains("read the email"))
            && ctx.open_email.is_some()
        {
            return Action::new(
                ActionKind::Describe,
                read_open_email(ctx.open_email.as_ref().unwrap()),
            );
        }
        return Action::new(ActionKind::Describe, summarize_email_list(ctx));
    }

    // Unread count, singular phrasing for exactly one.
    if cmd.contains("unread") || cmd.contains("how many") {
        let speech = match ctx.unread_count {
            0 => "You have no unread emails in your current view.".to_string(),
            1 => "You have 1 unread email.".to_string(),
            n => format!("You have {} unread emails.", n),
        };
        return Action::new(ActionKind::Describe, speech);
    }

    if let Some(open) = ctx.open_email.as_ref() {
        // "read this" and "what does this say" carry no email word, so they
        // skip the list rule above and are handled here.
        if cmd.contains("read this") || cmd.contains("what does") {
            return Action::new(ActionKind::Describe, read_open_email(open));
        }
        if cmd.contains("who") && (cmd.contains("from") || cmd.contains("sent")) {
            return Action::new(
                ActionKind::Describe,
                format!("This email is from {}.", open.sender),
            );
        }
        if cmd.contains("subject") {
            return Action::new(
                ActionKind::Describe,
                format!("The subject is: {}", open.subject),
            );
        }
    }

    // "email number 2" style 1-based lookup.
    if cmd.contains("email") || cmd.contains("number") {
        if let Some(index) = first_integer(cmd) {
            let speech = if index >= 1 && index <= ctx.email_list.len() {
                let email = &ctx.email_list[index - 1];
                format!(
                    "Email {}: From {}. Subject: {}. {}",
                    index, email.sender, email.subject, email.snippet
                )
            } else {
                format!("I can only see emails 1 through {}.", ctx.email_list.len())
            };
            return Action::new(ActionKind::Describe, speech);
        }
    }

    if cmd.contains("where") || cmd.contains("what view") || cmd.contains("which folder") {
        return Action::new(
            ActionKind::Describe,
            format!("You are in your {}.", ctx.current_view),
        );
    }

    if cmd.contains("help") || cmd.contains("what can you") {
        return Action::new(
            ActionKind::Describe,
            "I can read your emails, tell you about unread messages, read an open email, \
             or tell you which email is from whom. Try saying: read my emails, how many \
             unread, or read this email.",
        );
    }

    // Deactivation is deferred by the session so the farewell finishes first.
    if cmd.contains("stop")
        || cmd.contains("goodbye")
        || cmd.contains("turn off")
        || cmd.contains("shut up")
    {
        return Action::new(ActionKind::Deactivate, "Goodbye! Turning off voice agent.");
    }

    // Context-echoing default.
    if ctx.open_email.is_some() {
        return Action::speak_only(format!(
            "I heard: \"{}\". I'm not sure what you'd like me to do. \
             You can say \"read this email\" or \"help\" for options.",
            utterance
        ));
    }
    Action::speak_only(format!(
        "I heard: \"{}\". Try saying \"read my emails\" or \"help\" for available commands.",
        utterance
    ))
}

fn summarize_email_list(ctx: &GmailContext) -> String {
    if ctx.email_list.is_empty() {
        return "I don't see any emails in the current view.".to_string();
    }

    let mut response = format!("You have {} emails visible. ", ctx.total_visible());
    if ctx.unread_count > 0 {
        response.push_str(&format!("{} are unread. ", ctx.unread_count));
    }
    response.push_str("Here are the top emails: ");
    for (i, email) in ctx.email_list.iter().take(3).enumerate() {
        response.push_str(&format!("{}: From {}, {}. ", i + 1, email.sender, email.subject));
    }
    response
}

fn read_open_email(email: &OpenEmail) -> String {
    let mut response = format!("Email from {}. Subject: {}. ", email.sender, email.subject);
    if !email.date.is_empty() {
        response.push_str(&format!("Received {}. ", email.date));
    }
    if !email.body.is_empty() {
        let truncated: String = email.body.chars().take(500).collect();
        response.push_str(&format!("The email says: {}", truncated));
        if email.body.chars().count() > 500 {
            response.push_str("... The email continues.");
        }
    }
    response
}

fn first_integer(text: &str) -> Option<usize> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Reads the Gmail context off a live page.
pub trait GmailContextSource: Send + Sync {
    fn gmail_context(&self) -> Result<GmailContext>;
}

/// The local strategy: rule matching over a fresh page context.
pub struct LocalInterpreter {
    source: Arc<dyn GmailContextSource>,
}

impl LocalInterpreter {
    pub fn new(source: Arc<dyn GmailContextSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Interpreter for LocalInterpreter {
    async fn interpret(&self, request: InterpretRequest) -> Result<Action> {
        let mut ctx = self.source.gmail_context()?;
        if ctx.current_view.is_empty() {
            ctx.current_view = view_from_url(&request.url).to_string();
        }
        Ok(match_rules(&request.utterance, &ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(n: usize) -> Vec<EmailSummary> {
        (1..=n)
            .map(|i| EmailSummary {
                sender: format!("Sender {}", i),
                subject: format!("Subject {}", i),
                snippet: format!("Snippet {}", i),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn unread_count_three_is_plural() {
        let ctx = GmailContext {
            unread_count: 3,
            email_list: list_of(5),
            ..Default::default()
        };
        let action = match_rules("how many unread emails do I have", &ctx);
        assert!(action.speak_text.contains('3'));
        assert!(action.speak_text.contains("unread emails"));
    }

    #[test]
    fn unread_count_one_is_singular() {
        let ctx = GmailContext {
            unread_count: 1,
            email_list: list_of(5),
            ..Default::default()
        };
        let action = match_rules("how many unread emails do I have", &ctx);
        assert!(action.speak_text.contains("1 unread email"));
        assert!(!action.speak_text.contains("1 unread emails"));
    }

    #[test]
    fn numbered_lookup_is_one_based() {
        let ctx = GmailContext {
            email_list: list_of(5),
            ..Default::default()
        };
        let action = match_rules("email number 2", &ctx);
        assert!(action.speak_text.contains("Sender 2"));
        assert!(action.speak_text.contains("Subject 2"));
        assert!(action.speak_text.contains("Snippet 2"));
    }

    #[test]
    fn numbered_lookup_out_of_range_names_the_upper_bound() {
        let ctx = GmailContext {
            email_list: list_of(5),
            ..Default::default()
        };
        let action = match_rules("email number 9", &ctx);
        assert!(action.speak_text.contains("1 through 5"));
    }

    #[test]
    fn who_sent_requires_an_open_email() {
        let mut ctx = GmailContext::default();
        let fallback = match_rules("who is this from", &ctx);
        assert_eq!(fallback.kind, ActionKind::None);

        ctx.open_email = Some(OpenEmail {
            sender: "Ada Lovelace".to_string(),
            subject: "Engines".to_string(),
            ..Default::default()
        });
        let action = match_rules("who is this from", &ctx);
        assert!(action.speak_text.contains("Ada Lovelace"));
    }

    #[test]
    fn what_does_this_say_reads_the_open_email() {
        // No "email"/"mail" word in the utterance at all.
        let ctx = GmailContext {
            open_email: Some(OpenEmail {
                sender: "Ada Lovelace".to_string(),
                subject: "Engines".to_string(),
                body: "The analytical engine weaves patterns.".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        for utterance in ["what does this say", "read this"] {
            let action = match_rules(utterance, &ctx);
            assert_eq!(action.kind, ActionKind::Describe, "{}", utterance);
            assert!(action.speak_text.contains("Ada Lovelace"), "{}", utterance);
            assert!(action.speak_text.contains("analytical engine"), "{}", utterance);
        }
    }

    #[test]
    fn where_am_i_names_the_current_view() {
        let ctx = GmailContext {
            current_view: "drafts".to_string(),
            ..Default::default()
        };
        let action = match_rules("where am I", &ctx);
        assert!(action.speak_text.contains("drafts"));
    }

    #[test]
    fn stop_returns_deactivate_with_a_farewell() {
        let action = match_rules("okay goodbye", &GmailContext::default());
        assert_eq!(action.kind, ActionKind::Deactivate);
        assert!(action.speak_text.contains("Goodbye"));
    }

    #[test]
    fn unmatched_utterance_echoes_back() {
        let action = match_rules("make me a sandwich", &GmailContext::default());
        assert_eq!(action.kind, ActionKind::None);
        assert!(action.speak_text.contains("make me a sandwich"));
    }

    #[test]
    fn rule_order_sends_how_many_unread_to_the_count_rule() {
        // Contains both "email" and a digit-free count phrase; order decides.
        let ctx = GmailContext {
            unread_count: 2,
            email_list: list_of(4),
            ..Default::default()
        };
        let action = match_rules("how many unread emails", &ctx);
        assert!(action.speak_text.contains("2 unread emails"));
    }

    #[test]
    fn view_is_inferred_from_the_url_fragment() {
        assert_eq!(view_from_url("https://mail.google.com/mail/u/0/#sent"), "sent");
        assert_eq!(view_from_url("https://mail.google.com/mail/u/0/#label/foo"), "label");
        assert_eq!(view_from_url("https://mail.google.com/mail/u/0/"), "inbox");
    }
}
