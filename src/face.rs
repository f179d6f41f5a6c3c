//! Local web panel for the agent: shows what was heard and spoken, accepts
//! typed utterances as a stand-in for the microphone, and mirrors the
//! active/idle state.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// Events streamed to the panel via SSE.
#[derive(Clone, Debug)]
pub enum FaceEvent {
    Heard { utterance: String },
    Spoke { text: String },
    Action { description: String },
    Status { active: bool },
}

impl FaceEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            FaceEvent::Heard { utterance } => Event::default()
                .event("heard")
                .data(format!("{{\"utterance\":{}}}", serde_json::json!(utterance))),
            FaceEvent::Spoke { text } => Event::default()
                .event("spoke")
                .data(format!("{{\"text\":{}}}", serde_json::json!(text))),
            FaceEvent::Action { description } => Event::default().event("action").data(format!(
                "{{\"description\":{}}}",
                serde_json::json!(description)
            )),
            FaceEvent::Status { active } => Event::default()
                .event("status")
                .data(format!("{{\"active\":{}}}", active)),
        }
    }
}

/// What the panel asks the agent to do.
#[derive(Debug)]
pub enum FaceCommand {
    Utterance(String),
    Toggle,
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<FaceCommand>,
    pub event_tx: broadcast::Sender<FaceEvent>,
}

#[derive(Deserialize)]
struct UtterancePayload {
    utterance: String,
}

/// Start the panel server on localhost. Returns the shared channels.
pub async fn start_server(
    port: u16,
) -> anyhow::Result<(mpsc::Receiver<FaceCommand>, broadcast::Sender<FaceEvent>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<FaceCommand>(8);
    let (event_tx, _) = broadcast::channel::<FaceEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/utterance", post(utterance_handler))
        .route("/toggle", post(toggle_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        ) // Silence 404
        .with_state(state);

    // Try the requested port, fall back to the next nine if in use
    let mut listener = None;
    let mut bound = port;
    for p in port..port + 10 {
        match tokio::net::TcpListener::bind(format!("127.0.0.1:{}", p)).await {
            Ok(l) => {
                listener = Some(l);
                bound = p;
                break;
            }
            Err(_) => continue,
        }
    }
    let Some(listener) = listener else {
        anyhow::bail!(
            "could not bind any port {}-{}; kill the old agent first",
            port,
            port + 9
        );
    };

    tracing::info!(url = format!("http://localhost:{}", bound), "panel running");

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(%err, "panel server stopped");
        }
    });

    Ok((cmd_rx, event_tx))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn utterance_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UtterancePayload>,
) -> &'static str {
    tracing::debug!(utterance = payload.utterance, "panel utterance");
    let _ = state
        .cmd_tx
        .send(FaceCommand::Utterance(payload.utterance))
        .await;
    "ok"
}

async fn toggle_handler(State(state): State<Arc<AppState>>) -> &'static str {
    tracing::debug!("panel toggle");
    let _ = state.cmd_tx.send(FaceCommand::Toggle).await;
    "ok"
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<FaceEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Voice Page Agent</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 24px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  header .dot {
    width: 8px; height: 8px;
    border-radius: 50%;
    background: #555;
  }
  header .dot.active { background: #22c55e; animation: pulse 2s infinite; }
  @keyframes pulse { 0%, 100% { opacity: 1; } 50% { opacity: 0.4; } }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 800px;
    width: 100%;
    margin: 0 auto;
    padding: 24px 32px;
    gap: 16px;
    overflow: hidden;
  }
  #log {
    flex: 1;
    overflow-y: auto;
    display: flex;
    flex-direction: column;
    gap: 8px;
    padding-right: 8px;
  }
  .entry {
    padding: 10px 14px;
    border-radius: 8px;
    font-size: 14px;
    line-height: 1.5;
  }
  .entry.heard { background: #1a1a2e; border-left: 3px solid #6366f1; }
  .entry.spoke { background: #0a1a0a; border-left: 3px solid #22c55e; color: #86efac; }
  .entry.action {
    background: #111118;
    border-left: 3px solid #3b82f6;
    font-family: 'Cascadia Code', 'Fira Code', monospace;
    font-size: 13px;
  }
  .input-area { display: flex; gap: 8px; }
  #utterance {
    flex: 1;
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 16px;
    color: #fff;
    font-size: 16px;
    outline: none;
  }
  #utterance:focus { border-color: #6366f1; }
  #utterance::placeholder { color: #555; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 12px 24px;
    font-size: 15px;
    font-weight: 600;
    cursor: pointer;
  }
  button:hover { background: #4f46e5; }
  button.off { background: #333; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>Voice Page Agent</h1>
    <button id="toggle" class="off" onclick="toggle()">Activate</button>
  </header>
  <div class="main">
    <div id="log"></div>
    <div class="input-area">
      <input type="text" id="utterance" placeholder="Say something (or type it here)..." autofocus />
      <button onclick="send()">Send</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const input = document.getElementById('utterance');
  const dot = document.getElementById('status-dot');
  const toggleBtn = document.getElementById('toggle');

  function addEntry(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  async function send() {
    const text = input.value.trim();
    if (!text) return;
    input.value = '';
    await fetch('/utterance', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({utterance: text}),
    });
  }

  async function toggle() {
    await fetch('/toggle', { method: 'POST' });
  }

  input.addEventListener('keydown', e => {
    if (e.key === 'Enter') send();
  });

  const es = new EventSource('/events');

  es.addEventListener('heard', e => {
    const d = JSON.parse(e.data);
    addEntry('heard', '<strong>Heard:</strong> ' + d.utterance.replace(/</g,'&lt;'));
  });

  es.addEventListener('spoke', e => {
    const d = JSON.parse(e.data);
    addEntry('spoke', '<strong>Said:</strong> ' + d.text.replace(/</g,'&lt;'));
  });

  es.addEventListener('action', e => {
    const d = JSON.parse(e.data);
    addEntry('action', d.description.replace(/</g,'&lt;'));
  });

  es.addEventListener('status', e => {
    const d = JSON.parse(e.data);
    dot.className = d.active ? 'dot active' : 'dot';
    toggleBtn.className = d.active ? '' : 'off';
    toggleBtn.textContent = d.active ? 'Deactivate' : 'Activate';
  });

  addEntry('spoke', 'Agent panel ready. Toggle the agent or press Shift+Space.');
</script>
</body>
</html>
"##;
