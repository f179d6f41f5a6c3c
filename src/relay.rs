//! Relay server: forwards structured requests from the page context to the
//! classifier, with payload-size observability and the preflight headers a
//! browser client needs to reach localhost.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{options, post};
use serde_json::{Value, json};

use crate::classifier::Classifier;
use crate::interpret::{
    DomPayload, IntentPayload, MSG_VOICE_COMMAND, MSG_VOICE_COMMAND_DOM,
    MSG_VOICE_COMMAND_INTENT, SinglePayload,
};

/// Body of the 500 response when the classifier fails outright.
pub const SERVER_ERROR_SPEECH: &str = "Sorry, something went wrong on the server.";

/// Requests above this size get a slow-path warning in the log.
pub const LARGE_PAYLOAD_BYTES: usize = 1024 * 1024;

/// A decoded relay request.
#[derive(Debug)]
pub enum RelayRequest {
    Single(SinglePayload),
    Intent(IntentPayload),
    Dom(Box<DomPayload>),
    /// Tagged with something we don't speak; dropped silently.
    Unknown(String),
}

/// Decode a request body. A `type` field selects the two-phase envelope;
/// a flat body is the legacy single-phase shape.
pub fn parse_request(body: &[u8]) -> Result<RelayRequest, String> {
    let value: Value =
        serde_json::from_slice(body).map_err(|err| format!("invalid JSON body: {}", err))?;

    let Some(message_type) = value.get("type").and_then(Value::as_str) else {
        let payload: SinglePayload = serde_json::from_value(value)
            .map_err(|err| format!("invalid voice-command body: {}", err))?;
        if payload.utterance.is_empty() {
            return Err("missing 'utterance' in request body".to_string());
        }
        return Ok(RelayRequest::Single(payload));
    };

    let payload = value.get("payload").cloned().unwrap_or(Value::Null);
    match message_type {
        MSG_VOICE_COMMAND => {
            let payload: SinglePayload = serde_json::from_value(payload)
                .map_err(|err| format!("invalid payload: {}", err))?;
            Ok(RelayRequest::Single(payload))
        }
        MSG_VOICE_COMMAND_INTENT => {
            let payload: IntentPayload = serde_json::from_value(payload)
                .map_err(|err| format!("invalid payload: {}", err))?;
            Ok(RelayRequest::Intent(payload))
        }
        MSG_VOICE_COMMAND_DOM => {
            let payload: DomPayload = serde_json::from_value(payload)
                .map_err(|err| format!("invalid payload: {}", err))?;
            Ok(RelayRequest::Dom(Box::new(payload)))
        }
        other => Ok(RelayRequest::Unknown(other.to_string())),
    }
}

pub fn payload_kb(bytes: usize) -> f64 {
    bytes as f64 / 1024.0
}

pub struct RelayState {
    pub classifier: Classifier,
}

pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/api/voice-command", post(voice_command))
        .route("/api/voice-command", options(preflight))
        .with_state(state)
}

/// Headers for browser clients, including the Private Network Access
/// allowance Chrome requires for public-page → localhost requests.
fn cors_headers() -> [(&'static str, &'static str); 4] {
    [
        ("access-control-allow-origin", "*"),
        ("access-control-allow-methods", "POST, OPTIONS"),
        ("access-control-allow-headers", "Content-Type"),
        ("access-control-allow-private-network", "true"),
    ]
}

async fn preflight() -> Response {
    tracing::debug!("preflight request");
    (StatusCode::OK, cors_headers()).into_response()
}

async fn voice_command(State(state): State<Arc<RelayState>>, body: Bytes) -> Response {
    let size = body.len();
    tracing::info!(size_kb = format!("{:.2}", payload_kb(size)), "voice command received");
    if size > LARGE_PAYLOAD_BYTES {
        tracing::warn!(size_kb = format!("{:.2}", payload_kb(size)), "large payload, may be slow");
    }

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(error, "bad relay request");
            return (
                StatusCode::BAD_REQUEST,
                cors_headers(),
                axum::Json(json!({ "error": error })),
            )
                .into_response();
        }
    };

    let reply = match request {
        RelayRequest::Single(payload) => {
            tracing::info!(utterance = payload.utterance, "single-phase classification");
            state
                .classifier
                .single_phase(&payload)
                .await
                .and_then(|message| Ok(serde_json::to_value(message)?))
        }
        RelayRequest::Intent(payload) => {
            tracing::info!(utterance = payload.utterance, "phase 1: intent classification");
            state
                .classifier
                .classify_intent(&payload)
                .await
                .and_then(|reply| Ok(serde_json::to_value(reply)?))
        }
        RelayRequest::Dom(payload) => {
            tracing::info!(
                action_type = payload.action_type,
                dom_nodes = payload.dom.count_nodes(),
                "phase 2: DOM analysis"
            );
            state
                .classifier
                .analyze_dom(&payload)
                .await
                .and_then(|message| Ok(serde_json::to_value(message)?))
        }
        RelayRequest::Unknown(message_type) => {
            tracing::debug!(message_type, "unrecognized message type dropped");
            return (StatusCode::NO_CONTENT, cors_headers()).into_response();
        }
    };

    match reply {
        Ok(value) => (StatusCode::OK, cors_headers(), axum::Json(value)).into_response(),
        Err(err) => {
            tracing::error!(%err, "classifier call failed");
            let fallback = json!({
                "type": "command",
                "action": "none",
                "params": {},
                "speakText": SERVER_ERROR_SPEECH,
            });
            (StatusCode::INTERNAL_SERVER_ERROR, cors_headers(), axum::Json(fallback))
                .into_response()
        }
    }
}
