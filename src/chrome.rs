//! Live Chrome session: attach to a running browser on the debug port, or
//! launch one. Implements the page traits the rest of the crate is written
//! against; everything that must run inside the page goes through injected
//! JavaScript.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::cache::DomSource;
use crate::dom::{self, RawDomNode};
use crate::executor::{MailboxLocation, Page};
use crate::interpret::rules::{GmailContext, GmailContextSource};

const DEBUG_PORT_URL: &str = "http://127.0.0.1:9222";

/// Pause between highlight and activation so the scroll and outline render.
const CLICK_RENDER_PAUSE_MS: u64 = 300;

/// Gmail unread-row probe with the aria-label fallback chain. Returns null
/// when the page is not Gmail at all.
const UNREAD_COUNT_JS: &str = r#"
(() => {
  if (!window.location.hostname.includes('mail.google.com')) return null;
  let count = document.querySelectorAll('.zA.zE').length;
  if (count === 0) {
    count = Array.from(document.querySelectorAll('.zA, tr')).filter((row) => {
      const aria = row.getAttribute && row.getAttribute('aria-label');
      return aria && aria.toLowerCase().includes('unread');
    }).length;
  }
  return count;
})()
"#;

const MAILBOX_LOCATION_JS: &str = r#"
(() => {
  if (!window.location.hostname.includes('mail.google.com')) return 'none';
  const hash = window.location.hash || '';
  const labels = document.querySelectorAll("a[title*='Inbox'], a[aria-label*='Inbox']");
  return (hash.includes('#inbox') || labels.length > 0) ? 'inbox' : 'mail';
})()
"#;

/// Reads the open email, the visible list and the view name out of Gmail's
/// markup. Selector chains are heuristics over current Gmail layouts.
const GMAIL_CONTEXT_JS: &str = r#"
(() => {
  const emails = [];
  document.querySelectorAll('tr.zA').forEach((row) => {
    const senderEl = row.querySelector('.yW .bA4 span[email]') ||
                     row.querySelector('.yW span[email]') ||
                     row.querySelector('.yP, .zF');
    const subjectEl = row.querySelector('.bog') || row.querySelector('.y6 span:first-child');
    const snippetEl = row.querySelector('.y2');
    const dateEl = row.querySelector('.xW span') || row.querySelector('.apt span');
    emails.push({
      sender: (senderEl && (senderEl.textContent.trim() || senderEl.getAttribute('email'))) || 'Unknown',
      subject: (subjectEl && subjectEl.textContent.trim()) || 'No subject',
      snippet: (snippetEl && snippetEl.textContent.trim()) || '',
      date: (dateEl && dateEl.textContent.trim()) || '',
      is_unread: row.classList.contains('zE')
    });
  });
  const list = emails.slice(0, 10);

  let open = null;
  if (document.querySelector('.adn.ads') || document.querySelector('.h7')) {
    const subjectEl = document.querySelector('.hP');
    const senderEl = document.querySelector('.gD') || document.querySelector('.go');
    const dateEl = document.querySelector('.g3') || document.querySelector('.g6');
    const bodyEl = document.querySelector('.a3s.aiL') || document.querySelector('.ii.gt');
    open = {
      subject: (subjectEl && subjectEl.textContent.trim()) || 'No subject',
      sender: (senderEl && senderEl.textContent.trim()) || 'Unknown sender',
      sender_email: (senderEl && senderEl.getAttribute('email')) || '',
      date: (dateEl && dateEl.textContent.trim()) || '',
      body: (bodyEl && bodyEl.innerText.trim().slice(0, 1000)) || ''
    };
  }

  const hash = window.location.hash || '';
  let view = 'inbox';
  for (const v of ['inbox', 'sent', 'drafts', 'starred', 'search', 'label']) {
    if (hash.includes('#' + v)) { view = v; break; }
  }

  return JSON.stringify({
    open_email: open,
    email_list: list,
    unread_count: list.filter(e => e.is_unread).length,
    current_view: view
  });
})()
"#;

/// Persistent browser session. Created once, reused for the whole run.
pub struct ChromeSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl ChromeSession {
    /// Attach to an existing Chrome on the debug port, or launch a visible
    /// instance.
    pub fn launch() -> Result<Self> {
        tracing::info!(url = DEBUG_PORT_URL, "attempting to attach to existing Chrome");
        if let Ok(browser) = Browser::connect(DEBUG_PORT_URL.to_string()) {
            tracing::info!("attached to existing Chrome");
            let tab = {
                let tabs_lock = browser.get_tabs();
                let tabs = tabs_lock.lock().unwrap();
                match tabs.first() {
                    Some(tab) => tab.clone(),
                    None => browser.new_tab()?,
                }
            };
            return Ok(Self {
                _browser: browser,
                tab,
            });
        }

        tracing::info!("could not attach, launching Chrome");
        let options = LaunchOptions {
            headless: false,
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
            ],
            idle_browser_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let browser = Browser::new(options).context("browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn url(&self) -> Result<String> {
        dom::current_url(&self.tab)
    }

    pub fn title(&self) -> Result<String> {
        dom::page_title(&self.tab)
    }

    pub fn page_text(&self, max_chars: usize) -> Result<String> {
        dom::page_text(&self.tab, max_chars)
    }

    /// Scroll, highlight, pause for the render, activate, restore.
    fn activate_element(&self, element: &headless_chrome::Element) -> Result<String> {
        let description = element
            .get_inner_text()
            .ok()
            .map(|t| t.trim().chars().take(60).collect::<String>())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "the element".to_string());

        element.scroll_into_view()?;
        element.call_js_fn(
            "function() { this.dataset.vpOutline = this.style.outline; this.style.outline = '3px solid orange'; }",
            vec![],
            false,
        )?;
        std::thread::sleep(Duration::from_millis(CLICK_RENDER_PAUSE_MS));
        element.click()?;
        let _ = element.call_js_fn(
            "function() { this.style.outline = this.dataset.vpOutline || ''; delete this.dataset.vpOutline; }",
            vec![],
            false,
        );
        Ok(description)
    }
}

impl Page for ChromeSession {
    fn navigate(&self, url: &str) -> Result<()> {
        self.tab.navigate_to(url)?;
        self.tab.wait_for_element("body")?;
        Ok(())
    }

    fn click_selector(&self, selector: &str) -> Result<Option<String>> {
        match self.tab.find_element(selector) {
            Ok(element) => Ok(Some(self.activate_element(&element)?)),
            Err(err) => {
                tracing::debug!(%err, selector, "no element for selector");
                Ok(None)
            }
        }
    }

    fn click_xpath(&self, xpath: &str) -> Result<Option<String>> {
        match self.tab.find_element_by_xpath(xpath) {
            Ok(element) => Ok(Some(self.activate_element(&element)?)),
            Err(err) => {
                tracing::debug!(%err, xpath, "no element for xpath");
                Ok(None)
            }
        }
    }

    fn unread_count(&self) -> Result<Option<usize>> {
        let result = self.tab.evaluate(UNREAD_COUNT_JS, false)?;
        Ok(result.value.and_then(|v| v.as_u64()).map(|n| n as usize))
    }

    fn mailbox_location(&self) -> Result<MailboxLocation> {
        let result = self.tab.evaluate(MAILBOX_LOCATION_JS, false)?;
        let location = result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "none".to_string());
        Ok(match location.as_str() {
            "inbox" => MailboxLocation::Inbox,
            "mail" => MailboxLocation::MailButNotInbox,
            _ => MailboxLocation::NotMail,
        })
    }
}

impl DomSource for ChromeSession {
    fn raw_dom(&self) -> Result<RawDomNode> {
        dom::capture_raw(&self.tab)
    }
}

impl GmailContextSource for ChromeSession {
    fn gmail_context(&self) -> Result<GmailContext> {
        let result = self.tab.evaluate(GMAIL_CONTEXT_JS, false)?;
        let raw = result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        Ok(serde_json::from_str(&raw)?)
    }
}
