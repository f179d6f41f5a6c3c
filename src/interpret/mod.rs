//! Command interpretation: free-text utterance (+ optional page context) to a
//! structured action.
//!
//! Two interchangeable strategies satisfy [`Interpreter`]: the local Gmail
//! rule matcher and the remote delegate that ships the request through the
//! relay to a chat-completion classifier. Callers never know which is
//! active.

pub mod remote;
pub mod rules;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionMessage};
use crate::snapshot::Snapshot;

/// Message types on the page-context ↔ relay wire.
pub const MSG_VOICE_COMMAND: &str = "VOICE_COMMAND";
pub const MSG_VOICE_COMMAND_INTENT: &str = "VOICE_COMMAND_INTENT";
pub const MSG_VOICE_COMMAND_DOM: &str = "VOICE_COMMAND_DOM";

/// One interpretation request: the utterance plus whatever page context the
/// caller had on hand. The snapshot reference is taken once per request and
/// never re-read mid-flight.
#[derive(Debug, Clone)]
pub struct InterpretRequest {
    pub utterance: String,
    pub url: String,
    pub title: String,
    pub page_text: Option<String>,
    pub snapshot: Option<Snapshot>,
}

impl InterpretRequest {
    pub fn new(utterance: impl Into<String>) -> Self {
        Self {
            utterance: utterance.into(),
            url: String::new(),
            title: String::new(),
            page_text: None,
            snapshot: None,
        }
    }
}

/// Maps an utterance + context to an action. Implementations must never
/// error for ordinary classifier failures; they substitute a safe spoken
/// fallback instead so the voice loop keeps running.
#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn interpret(&self, request: InterpretRequest) -> anyhow::Result<Action>;
}

/// Phase-1 payload: intent classification without the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPayload {
    pub utterance: String,
    pub url: String,
    pub title: String,
}

/// Phase-2 payload: the DOM-bearing round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomPayload {
    #[serde(rename = "actionType")]
    pub action_type: String,
    pub utterance: String,
    pub url: String,
    pub title: String,
    pub dom: crate::snapshot::SnapshotNode,
    #[serde(rename = "domTimestamp")]
    pub dom_timestamp: u64,
}

/// Single-phase payload: legacy flow with raw page text instead of a tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinglePayload {
    pub utterance: String,
    pub url: String,
    pub title: String,
    #[serde(rename = "pageText", default, skip_serializing_if = "Option::is_none")]
    pub page_text: Option<String>,
}

/// Phase-1 reply: the intent, whether a DOM round is required, and the
/// complete action when it is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentReply {
    #[serde(rename = "actionType")]
    pub action_type: String,
    #[serde(rename = "needsDOM")]
    pub needs_dom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionMessage>,
}
