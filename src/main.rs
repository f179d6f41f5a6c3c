//! Agent binary: wires the hotkey, the panel, the browser session and the
//! voice state machine together and drives the reducer's effects.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tokio::sync::{broadcast, mpsc};

use voicepage::action::{Action, ActionKind};
use voicepage::cache::{SnapshotCache, StalenessPolicy};
use voicepage::chrome::ChromeSession;
use voicepage::executor;
use voicepage::face::{self, FaceCommand, FaceEvent};
use voicepage::interpret::remote::{RelayTransport, RemoteInterpreter, RemoteMode};
use voicepage::interpret::rules::LocalInterpreter;
use voicepage::interpret::{InterpretRequest, Interpreter};
use voicepage::session::{Event, Session};

/// Cap on the raw page text shipped with a legacy one-shot request.
const PAGE_TEXT_MAX_CHARS: usize = 5000;

#[derive(Parser, Debug)]
#[command(name = "voicepage", about = "Voice-driven page agent")]
struct Args {
    /// Relay endpoint for remote interpretation.
    #[arg(long, default_value = "http://localhost:8080/api/voice-command")]
    relay: String,

    /// Use the local Gmail rule matcher instead of the relay.
    #[arg(long)]
    local: bool,

    /// Legacy one-shot classification instead of the two-phase flow.
    #[arg(long)]
    single_phase: bool,

    /// Panel port; the next nine ports are tried when it is busy.
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

/// Everything the driver loop reacts to.
enum DriverMsg {
    Session(Event),
    /// A scheduled listening start came due; gated through the session.
    MicReady,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voicepage=info".into()),
        )
        .init();

    let args = Args::parse();

    // Panel first so the user sees something immediately.
    let (mut cmd_rx, face_tx) = face::start_server(args.port).await?;

    tracing::info!("launching Chrome");
    let chrome = tokio::task::spawn_blocking(ChromeSession::launch)
        .await
        .map_err(|e| anyhow::anyhow!("browser launch panicked: {}", e))??;
    let chrome = Arc::new(chrome);
    tracing::info!("Chrome ready");

    let interpreter: Arc<dyn Interpreter> = if args.local {
        Arc::new(LocalInterpreter::new(chrome.clone()))
    } else {
        let mode = if args.single_phase {
            RemoteMode::SinglePhase
        } else {
            RemoteMode::TwoPhase
        };
        Arc::new(RemoteInterpreter::with_mode(
            RelayTransport::new(args.relay.clone()),
            mode,
        ))
    };

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<DriverMsg>();

    // The manager must outlive the loop or the registration is dropped.
    let _hotkey_manager = register_toggle_hotkey(msg_tx.clone())?;

    let cache = Arc::new(Mutex::new(SnapshotCache::default()));
    prime_snapshot(chrome.clone(), cache.clone()).await;

    let mut driver = Driver {
        session: Session::new(),
        chrome,
        cache,
        staleness: StalenessPolicy::default(),
        interpreter,
        single_phase: args.single_phase,
        local: args.local,
        face_tx,
        msg_tx,
    };

    tracing::info!("agent ready; press Shift+Space or use the panel toggle");

    loop {
        tokio::select! {
            Some(command) = cmd_rx.recv() => match command {
                FaceCommand::Toggle => driver.apply(Event::ToggleRequested),
                FaceCommand::Utterance(text) => {
                    let _ = driver.face_tx.send(FaceEvent::Heard {
                        utterance: text.clone(),
                    });
                    driver.apply(Event::Transcript(text));
                }
            },
            Some(message) = msg_rx.recv() => match message {
                DriverMsg::Session(event) => driver.apply(event),
                DriverMsg::MicReady => {
                    if driver.session.begin_listening() {
                        driver.apply(Event::RecognitionStarted);
                    }
                }
            },
            else => break,
        }
    }

    Ok(())
}

/// Shift+Space toggles the agent from anywhere. Hotkey events arrive on a
/// crossbeam channel, so a plain thread forwards them into the loop.
fn register_toggle_hotkey(msg_tx: mpsc::UnboundedSender<DriverMsg>) -> Result<GlobalHotKeyManager> {
    let manager = GlobalHotKeyManager::new()
        .map_err(|e| anyhow::anyhow!("hotkey manager init failed: {}", e))?;
    let hotkey = HotKey::new(Some(Modifiers::SHIFT), Code::Space);
    manager
        .register(hotkey)
        .map_err(|e| anyhow::anyhow!("hotkey registration failed: {}", e))?;

    std::thread::spawn(move || {
        let receiver = GlobalHotKeyEvent::receiver();
        while let Ok(event) = receiver.recv() {
            if event.state == HotKeyState::Pressed {
                let _ = msg_tx.send(DriverMsg::Session(Event::ToggleRequested));
            }
        }
    });

    Ok(manager)
}

/// Best-effort first capture so an early DOM-bearing request has something
/// to ride on. The page may still be blank; that is fine.
async fn prime_snapshot(chrome: Arc<ChromeSession>, cache: Arc<Mutex<SnapshotCache>>) {
    let _ = tokio::task::spawn_blocking(move || {
        let mut cache = cache.lock().unwrap();
        if let Err(err) = cache.capture(chrome.as_ref()) {
            tracing::debug!(%err, "initial snapshot skipped");
        }
    })
    .await;
}

struct Driver {
    session: Session,
    chrome: Arc<ChromeSession>,
    cache: Arc<Mutex<SnapshotCache>>,
    staleness: StalenessPolicy,
    interpreter: Arc<dyn Interpreter>,
    single_phase: bool,
    local: bool,
    face_tx: broadcast::Sender<FaceEvent>,
    msg_tx: mpsc::UnboundedSender<DriverMsg>,
}

impl Driver {
    /// Run one event through the reducer and perform the resulting effects.
    fn apply(&mut self, event: Event) {
        let was_active = self.session.is_active();
        let effects = self.session.on_event(event);
        if was_active != self.session.is_active() {
            let _ = self.face_tx.send(FaceEvent::Status {
                active: self.session.is_active(),
            });
        }
        for effect in effects {
            self.perform(effect);
        }
    }

    fn perform(&mut self, effect: voicepage::session::Effect) {
        use voicepage::session::Effect;
        match effect {
            Effect::StartListening { delay_ms } => {
                let msg_tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    let _ = msg_tx.send(DriverMsg::MicReady);
                });
            }

            // The panel's text input is the microphone stand-in; there is no
            // device to close, the session flags gate everything.
            Effect::StopListening | Effect::CancelSpeech => {}

            Effect::Speak(text) => {
                let _ = self.face_tx.send(FaceEvent::Spoke { text: text.clone() });
                self.apply(Event::SynthesisStarted);
                let msg_tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(speech_duration(&text)).await;
                    let _ = msg_tx.send(DriverMsg::Session(Event::SynthesisEnded));
                });
            }

            Effect::Interpret {
                generation,
                utterance,
            } => self.spawn_interpretation(generation, utterance),

            Effect::ScheduleDeactivate { delay_ms } => {
                let msg_tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    let _ = msg_tx.send(DriverMsg::Session(Event::ToggleRequested));
                });
            }
        }
    }

    /// One interpretation round trip: gather page context, classify, execute,
    /// report back tagged with the generation so late replies can be dropped.
    fn spawn_interpretation(&self, generation: u64, utterance: String) {
        let chrome = self.chrome.clone();
        let cache = self.cache.clone();
        let staleness = self.staleness;
        let interpreter = self.interpreter.clone();
        let single_phase = self.single_phase;
        let local = self.local;
        let face_tx = self.face_tx.clone();
        let msg_tx = self.msg_tx.clone();

        tokio::spawn(async move {
            let context_chrome = chrome.clone();
            let request = tokio::task::spawn_blocking(move || {
                build_request(
                    &utterance,
                    context_chrome.as_ref(),
                    &cache,
                    staleness,
                    single_phase,
                    local,
                )
            })
            .await
            .unwrap_or_else(|e| {
                tracing::error!(%e, "context gathering panicked");
                InterpretRequest::new("")
            });

            let action = match interpreter.interpret(request).await {
                Ok(action) => action,
                Err(err) => {
                    tracing::warn!(%err, "interpretation failed");
                    Action::fallback()
                }
            };
            let _ = face_tx.send(FaceEvent::Action {
                description: format!("{:?}", action.kind),
            });
            let deactivate = matches!(action.kind, ActionKind::Deactivate);

            let spoken = tokio::task::spawn_blocking(move || {
                executor::execute(&action, chrome.as_ref())
            })
            .await
            .unwrap_or_else(|e| {
                tracing::error!(%e, "action execution panicked");
                "Sorry, something went wrong performing that action.".to_string()
            });

            let _ = msg_tx.send(DriverMsg::Session(Event::InterpretationFinished {
                generation,
                spoken,
                deactivate,
            }));
        });
    }
}

/// Collect whatever page context the active strategy wants. Context failures
/// degrade to an emptier request, never abort the round.
fn build_request(
    utterance: &str,
    chrome: &ChromeSession,
    cache: &Mutex<SnapshotCache>,
    staleness: StalenessPolicy,
    single_phase: bool,
    local: bool,
) -> InterpretRequest {
    let mut request = InterpretRequest::new(utterance);
    request.url = chrome.url().unwrap_or_default();
    request.title = chrome.title().unwrap_or_default();

    if local {
        return request;
    }

    if single_phase {
        request.page_text = chrome.page_text(PAGE_TEXT_MAX_CHARS).ok();
        return request;
    }

    let mut cache = cache.lock().unwrap();
    match staleness.fresh(&mut cache, chrome, SystemTime::now()) {
        Ok(snapshot) => request.snapshot = Some(snapshot.clone()),
        Err(err) => tracing::warn!(%err, "snapshot capture failed, sending without DOM"),
    }
    request
}

/// Rough spoken duration used to pace the simulated synthesis lifecycle.
fn speech_duration(text: &str) -> Duration {
    let words = text.split_whitespace().count().max(1) as u64;
    Duration::from_millis(600 + words * 280)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_duration_scales_with_word_count() {
        assert!(speech_duration("hi") < speech_duration("this is a longer sentence to say"));
        // Even empty text gets a nonzero floor.
        assert!(speech_duration("") >= Duration::from_millis(600));
    }
}
