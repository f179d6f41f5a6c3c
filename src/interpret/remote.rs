//! Remote delegate: two-phase interpretation through the relay.
//!
//! Phase 1 ships only utterance/url/title and asks for the intent; the
//! snapshot rides along only when the classifier says it needs the DOM.
//! Transport or parse trouble degrades to a spoken apology, never an error
//! out of the voice loop.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::action::{Action, ActionMessage};
use crate::snapshot::Snapshot;

use super::{
    DomPayload, IntentPayload, IntentReply, Interpreter, InterpretRequest, MSG_VOICE_COMMAND,
    MSG_VOICE_COMMAND_DOM, MSG_VOICE_COMMAND_INTENT, SinglePayload,
};

/// Spoken when the relay round trip fails outright.
pub const RELAY_ERROR_SPEECH: &str = "Sorry, something went wrong talking to the server.";

/// The page-side view of the relay.
#[async_trait]
pub trait IntentTransport: Send + Sync {
    async fn send_intent(&self, payload: IntentPayload) -> Result<IntentReply>;
    async fn send_dom(&self, payload: DomPayload) -> Result<ActionMessage>;
    async fn send_single(&self, payload: SinglePayload) -> Result<ActionMessage>;
}

/// HTTP transport posting tagged envelopes to the relay endpoint.
pub struct RelayTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl RelayTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        message_type: &str,
        payload: serde_json::Value,
    ) -> Result<T> {
        let body = json!({ "type": message_type, "payload": payload });
        let size_kb = serde_json::to_string(&body).map(|s| s.len()).unwrap_or(0) as f64 / 1024.0;
        tracing::debug!(message_type, size_kb = format!("{:.2}", size_kb), "relay request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl IntentTransport for RelayTransport {
    async fn send_intent(&self, payload: IntentPayload) -> Result<IntentReply> {
        self.post(MSG_VOICE_COMMAND_INTENT, serde_json::to_value(payload)?)
            .await
    }

    async fn send_dom(&self, payload: DomPayload) -> Result<ActionMessage> {
        self.post(MSG_VOICE_COMMAND_DOM, serde_json::to_value(payload)?)
            .await
    }

    async fn send_single(&self, payload: SinglePayload) -> Result<ActionMessage> {
        self.post(MSG_VOICE_COMMAND, serde_json::to_value(payload)?)
            .await
    }
}

/// Whether to run the intent-then-DOM split or the legacy one-shot round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    TwoPhase,
    SinglePhase,
}

/// The remote strategy.
pub struct RemoteInterpreter<T: IntentTransport> {
    transport: T,
    mode: RemoteMode,
}

impl<T: IntentTransport> RemoteInterpreter<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            mode: RemoteMode::TwoPhase,
        }
    }

    pub fn with_mode(transport: T, mode: RemoteMode) -> Self {
        Self { transport, mode }
    }

    async fn two_phase(&self, request: &InterpretRequest) -> Result<Action> {
        let intent = self
            .transport
            .send_intent(IntentPayload {
                utterance: request.utterance.clone(),
                url: request.url.clone(),
                title: request.title.clone(),
            })
            .await?;

        tracing::debug!(
            action_type = intent.action_type,
            needs_dom = intent.needs_dom,
            "intent classified"
        );

        if !intent.needs_dom {
            return Ok(intent
                .action
                .map(ActionMessage::into_action)
                .unwrap_or_else(Action::fallback));
        }

        let Some(snapshot) = request.snapshot.as_ref() else {
            tracing::warn!("classifier asked for the DOM but no snapshot was captured");
            return Ok(Action::fallback());
        };

        let message = self
            .transport
            .send_dom(dom_payload(&intent.action_type, request, snapshot))
            .await?;
        Ok(message.into_action())
    }

    async fn single_phase(&self, request: &InterpretRequest) -> Result<Action> {
        let message = self
            .transport
            .send_single(SinglePayload {
                utterance: request.utterance.clone(),
                url: request.url.clone(),
                title: request.title.clone(),
                page_text: request.page_text.clone(),
            })
            .await?;
        Ok(message.into_action())
    }
}

fn dom_payload(action_type: &str, request: &InterpretRequest, snapshot: &Snapshot) -> DomPayload {
    DomPayload {
        action_type: action_type.to_string(),
        utterance: request.utterance.clone(),
        url: request.url.clone(),
        title: request.title.clone(),
        dom: snapshot.tree.clone(),
        dom_timestamp: snapshot.timestamp_ms(),
    }
}

#[async_trait]
impl<T: IntentTransport> Interpreter for RemoteInterpreter<T> {
    async fn interpret(&self, request: InterpretRequest) -> Result<Action> {
        let result = match self.mode {
            RemoteMode::TwoPhase => self.two_phase(&request).await,
            RemoteMode::SinglePhase => self.single_phase(&request).await,
        };
        match result {
            Ok(action) => Ok(action),
            Err(err) => {
                tracing::warn!(%err, "relay round trip failed");
                Ok(Action::speak_only(RELAY_ERROR_SPEECH))
            }
        }
    }
}
