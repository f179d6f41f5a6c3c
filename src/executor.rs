//! Action executor: performs the page effect for one action and reports the
//! confirmation to speak.
//!
//! Click resolution order is CSS selector first, then xpath; evaluation
//! errors from either resolver count as "no match", never as failures of the
//! voice loop.

use anyhow::Result;

use crate::action::{Action, ActionKind};

/// Fixed apology for an unresolvable click target.
pub const CLICK_FAIL_SPEECH: &str = "Sorry, I couldn't find that element.";

/// Spoken when a navigate action arrives without a destination.
pub const NAVIGATE_FAIL_SPEECH: &str = "Sorry, I don't know where to navigate to.";

pub const GMAIL_INBOX_URL: &str = "https://mail.google.com/mail/u/0/#inbox";

/// Where the user is, mail-wise. Feeds the legacy describe-page-context kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLocation {
    Inbox,
    MailButNotInbox,
    NotMail,
}

/// The executor's view of a live page. Click methods return the clicked
/// element's spoken description, `None` when nothing matched; implementations
/// perform scroll-into-view, transient highlight and the 300ms render pause
/// before activating.
pub trait Page {
    fn navigate(&self, url: &str) -> Result<()>;
    fn click_selector(&self, selector: &str) -> Result<Option<String>>;
    fn click_xpath(&self, xpath: &str) -> Result<Option<String>>;
    /// `None` when the current page is not Gmail at all.
    fn unread_count(&self) -> Result<Option<usize>>;
    fn mailbox_location(&self) -> Result<MailboxLocation>;
}

/// Execute one action against the page, returning the text to speak.
/// Exhaustive over the action vocabulary.
pub fn execute(action: &Action, page: &dyn Page) -> String {
    match &action.kind {
        ActionKind::Navigate { url } => match url {
            Some(url) => {
                if let Err(err) = page.navigate(url) {
                    tracing::warn!(%err, url, "navigation failed");
                    return format!("Sorry, I couldn't open {}.", url);
                }
                spoken_or(action, "Navigating.")
            }
            None => NAVIGATE_FAIL_SPEECH.to_string(),
        },

        ActionKind::Click { selector, xpath } => {
            match resolve_click(page, selector.as_deref(), xpath.as_deref()) {
                Some(description) => format!("Clicked {}.", description),
                None => CLICK_FAIL_SPEECH.to_string(),
            }
        }

        // No page effect; the interpreter supplied the words.
        ActionKind::Describe | ActionKind::None | ActionKind::Deactivate => {
            action.speak_text.clone()
        }

        ActionKind::NavigateEmail => {
            if let Err(err) = page.navigate(GMAIL_INBOX_URL) {
                tracing::warn!(%err, "inbox navigation failed");
                return "Sorry, I couldn't open your inbox.".to_string();
            }
            spoken_or(action, "Opening your email inbox.")
        }

        ActionKind::DescribePageContext => match page.mailbox_location() {
            Ok(MailboxLocation::Inbox) => "You are in your email inbox.".to_string(),
            Ok(MailboxLocation::MailButNotInbox) => {
                "You are in your email, but not in the main inbox.".to_string()
            }
            Ok(MailboxLocation::NotMail) | Err(_) => {
                "You are not on your email page.".to_string()
            }
        },

        ActionKind::CountUnreadEmails => match page.unread_count() {
            Ok(Some(0)) => "It looks like you have no unread emails in this view.".to_string(),
            Ok(Some(1)) => "You have one unread email.".to_string(),
            Ok(Some(n)) => format!("You have {} unread emails.", n),
            Ok(None) => {
                "I can only count unread emails when you are on your Gmail page.".to_string()
            }
            Err(err) => {
                tracing::warn!(%err, "unread probe failed");
                "Sorry, I couldn't count your unread emails.".to_string()
            }
        },
    }
}

/// Selector first, xpath second; resolver errors are caught and treated as
/// no-match so a bad selector still falls through to the xpath.
fn resolve_click(page: &dyn Page, selector: Option<&str>, xpath: Option<&str>) -> Option<String> {
    if let Some(selector) = selector {
        match page.click_selector(selector) {
            Ok(Some(description)) => return Some(description),
            Ok(None) => {}
            Err(err) => tracing::debug!(%err, selector, "selector resolution failed"),
        }
    }
    if let Some(xpath) = xpath {
        match page.click_xpath(xpath) {
            Ok(Some(description)) => return Some(description),
            Ok(None) => {}
            Err(err) => tracing::debug!(%err, xpath, "xpath resolution failed"),
        }
    }
    None
}

fn spoken_or(action: &Action, default: &str) -> String {
    if action.speak_text.is_empty() {
        default.to_string()
    } else {
        action.speak_text.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MockPage {
        selector_result: Option<Result<Option<String>, String>>,
        xpath_result: Option<Result<Option<String>, String>>,
        unread: Option<Option<usize>>,
        location: Option<MailboxLocation>,
        navigations: RefCell<Vec<String>>,
        clicks: RefCell<usize>,
    }

    impl Page for MockPage {
        fn navigate(&self, url: &str) -> Result<()> {
            self.navigations.borrow_mut().push(url.to_string());
            Ok(())
        }

        fn click_selector(&self, _selector: &str) -> Result<Option<String>> {
            match self.selector_result.clone() {
                Some(Ok(hit)) => {
                    if hit.is_some() {
                        *self.clicks.borrow_mut() += 1;
                    }
                    Ok(hit)
                }
                Some(Err(message)) => Err(anyhow!(message)),
                None => Ok(None),
            }
        }

        fn click_xpath(&self, _xpath: &str) -> Result<Option<String>> {
            match self.xpath_result.clone() {
                Some(Ok(hit)) => {
                    if hit.is_some() {
                        *self.clicks.borrow_mut() += 1;
                    }
                    Ok(hit)
                }
                Some(Err(message)) => Err(anyhow!(message)),
                None => Ok(None),
            }
        }

        fn unread_count(&self) -> Result<Option<usize>> {
            Ok(self.unread.unwrap_or(None))
        }

        fn mailbox_location(&self) -> Result<MailboxLocation> {
            Ok(self.location.unwrap_or(MailboxLocation::NotMail))
        }
    }

    fn click(selector: Option<&str>, xpath: Option<&str>) -> Action {
        Action::new(
            ActionKind::Click {
                selector: selector.map(String::from),
                xpath: xpath.map(String::from),
            },
            "Clicking.",
        )
    }

    #[test]
    fn unmatched_selector_without_xpath_speaks_the_apology_and_clicks_nothing() {
        let page = MockPage {
            selector_result: Some(Ok(None)),
            ..Default::default()
        };
        let spoken = execute(&click(Some("#submit"), None), &page);
        assert_eq!(spoken, CLICK_FAIL_SPEECH);
        assert_eq!(*page.clicks.borrow(), 0);
    }

    #[test]
    fn selector_error_falls_through_to_the_xpath() {
        let page = MockPage {
            selector_result: Some(Err("invalid selector".to_string())),
            xpath_result: Some(Ok(Some("the send button".to_string()))),
            ..Default::default()
        };
        let spoken = execute(&click(Some("$$bad"), Some("/html/body/button")), &page);
        assert!(spoken.contains("the send button"));
        assert_eq!(*page.clicks.borrow(), 1);
    }

    #[test]
    fn selector_hit_short_circuits_the_xpath() {
        let page = MockPage {
            selector_result: Some(Ok(Some("the compose button".to_string()))),
            xpath_result: Some(Ok(Some("something else".to_string()))),
            ..Default::default()
        };
        let spoken = execute(&click(Some("#compose"), Some("/html/body/div")), &page);
        assert!(spoken.contains("the compose button"));
        assert_eq!(*page.clicks.borrow(), 1);
    }

    #[test]
    fn navigate_without_url_speaks_an_error_and_stays_put() {
        let page = MockPage::default();
        let action = Action::new(ActionKind::Navigate { url: None }, "Off we go.");
        let spoken = execute(&action, &page);
        assert_eq!(spoken, NAVIGATE_FAIL_SPEECH);
        assert!(page.navigations.borrow().is_empty());
    }

    #[test]
    fn navigate_with_url_navigates_and_speaks_the_confirmation() {
        let page = MockPage::default();
        let action = Action::new(
            ActionKind::Navigate {
                url: Some("https://example.com".to_string()),
            },
            "Opening example.",
        );
        let spoken = execute(&action, &page);
        assert_eq!(spoken, "Opening example.");
        assert_eq!(page.navigations.borrow().as_slice(), ["https://example.com"]);
    }

    #[test]
    fn legacy_inbox_navigation_targets_gmail() {
        let page = MockPage::default();
        let action = Action::new(ActionKind::NavigateEmail, "Opening your email inbox.");
        execute(&action, &page);
        assert_eq!(page.navigations.borrow().as_slice(), [GMAIL_INBOX_URL]);
    }

    #[test]
    fn unread_counting_uses_number_phrasing() {
        let one = MockPage {
            unread: Some(Some(1)),
            ..Default::default()
        };
        assert_eq!(
            execute(&Action::new(ActionKind::CountUnreadEmails, ""), &one),
            "You have one unread email."
        );

        let many = MockPage {
            unread: Some(Some(4)),
            ..Default::default()
        };
        assert!(
            execute(&Action::new(ActionKind::CountUnreadEmails, ""), &many)
                .contains("4 unread emails")
        );

        let off_gmail = MockPage {
            unread: Some(None),
            ..Default::default()
        };
        assert!(
            execute(&Action::new(ActionKind::CountUnreadEmails, ""), &off_gmail)
                .contains("only count unread emails")
        );
    }

    #[test]
    fn describe_and_none_pass_the_interpreter_text_through() {
        let page = MockPage::default();
        let action = Action::new(ActionKind::Describe, "The page shows your inbox.");
        assert_eq!(execute(&action, &page), "The page shows your inbox.");
        let action = Action::speak_only("Hello there.");
        assert_eq!(execute(&action, &page), "Hello there.");
    }

    #[test]
    fn mailbox_location_phrasing() {
        let inbox = MockPage {
            location: Some(MailboxLocation::Inbox),
            ..Default::default()
        };
        assert_eq!(
            execute(&Action::new(ActionKind::DescribePageContext, ""), &inbox),
            "You are in your email inbox."
        );
        let elsewhere = MockPage {
            location: Some(MailboxLocation::MailButNotInbox),
            ..Default::default()
        };
        assert!(
            execute(&Action::new(ActionKind::DescribePageContext, ""), &elsewhere)
                .contains("not in the main inbox")
        );
    }
}
