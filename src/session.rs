//! Voice I/O session: one state machine owning the listen → interpret → act
//! → speak cycle.
//!
//! All platform callbacks (recognition and synthesis lifecycle, the toggle
//! chord) arrive as [`Event`]s; the reducer returns [`Effect`]s for the
//! driver to perform. Listening and speaking are mutually exclusive: the
//! speaking flag is set synchronously at the moment speech is requested, not
//! when audio actually starts, which closes the race where a late
//! recognition-end callback could restart the microphone mid-utterance.

/// Settle delay between synthesis end and the microphone reopening, so
/// trailing audio is not picked up.
pub const RESUME_AFTER_SPEECH_MS: u64 = 300;

/// Delay between a recognition session ending and its restart.
pub const RESTART_AFTER_END_MS: u64 = 100;

/// Backoff after an unclassified recognition error.
pub const ERROR_RETRY_MS: u64 = 1000;

/// How long the farewell gets before a requested deactivation lands.
pub const DEACTIVATE_DELAY_MS: u64 = 500;

pub const GREETING_SPEECH: &str =
    "Voice agent activated. How can I help you with your emails?";

pub const CAPABILITY_MISSING_SPEECH: &str =
    "Sorry, speech recognition is not available here.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    Interpreting,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// Nothing was said; retried immediately.
    NoSpeech,
    /// Intentional stop; never retried.
    Aborted,
    /// Anything else; retried after a backoff.
    Other,
}

/// Inputs to the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ToggleRequested,
    CapabilityMissing,
    RecognitionStarted,
    Transcript(String),
    RecognitionError(RecognitionErrorKind),
    RecognitionEnded,
    SynthesisStarted,
    SynthesisEnded,
    SynthesisError,
    InterpretationFinished {
        generation: u64,
        spoken: String,
        deactivate: bool,
    },
}

/// Work the driver performs on the reducer's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartListening { delay_ms: u64 },
    StopListening,
    Speak(String),
    CancelSpeech,
    Interpret { generation: u64, utterance: String },
    ScheduleDeactivate { delay_ms: u64 },
}

/// Explicit session state; collaborators get a handle to this, never ambient
/// globals.
#[derive(Debug)]
pub struct Session {
    active: bool,
    listening: bool,
    speaking: bool,
    supported: bool,
    capability_reported: bool,
    phase: Phase,
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            active: false,
            listening: false,
            speaking: false,
            supported: true,
            capability_reported: false,
            phase: Phase::Idle,
            generation: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Gate for actually invoking recognition start. A no-op while speaking
    /// or already listening; the driver must not touch the microphone when
    /// this returns false.
    pub fn begin_listening(&self) -> bool {
        if !self.active || !self.supported || self.listening || self.speaking {
            return false;
        }
        true
    }

    /// The single authoritative transition table.
    pub fn on_event(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::ToggleRequested => self.toggle(),

            Event::CapabilityMissing => {
                self.supported = false;
                self.active = false;
                self.listening = false;
                self.phase = Phase::Idle;
                if self.capability_reported {
                    return vec![];
                }
                self.capability_reported = true;
                self.request_speak(CAPABILITY_MISSING_SPEECH.to_string())
            }

            Event::RecognitionStarted => {
                self.listening = true;
                if self.active && !self.speaking {
                    self.phase = Phase::Listening;
                }
                vec![]
            }

            Event::Transcript(utterance) => {
                if !self.active || self.speaking {
                    return vec![];
                }
                self.generation += 1;
                self.phase = Phase::Interpreting;
                vec![Effect::Interpret {
                    generation: self.generation,
                    utterance,
                }]
            }

            Event::RecognitionError(kind) => {
                self.listening = false;
                if !self.active || self.speaking {
                    return vec![];
                }
                match kind {
                    RecognitionErrorKind::NoSpeech => {
                        vec![Effect::StartListening { delay_ms: 0 }]
                    }
                    RecognitionErrorKind::Aborted => vec![],
                    RecognitionErrorKind::Other => vec![Effect::StartListening {
                        delay_ms: ERROR_RETRY_MS,
                    }],
                }
            }

            Event::RecognitionEnded => {
                self.listening = false;
                if self.active && !self.speaking {
                    vec![Effect::StartListening {
                        delay_ms: RESTART_AFTER_END_MS,
                    }]
                } else {
                    vec![]
                }
            }

            Event::SynthesisStarted => {
                self.speaking = true;
                self.phase = Phase::Speaking;
                vec![]
            }

            Event::SynthesisEnded | Event::SynthesisError => {
                self.speaking = false;
                if self.active {
                    self.phase = Phase::Listening;
                    vec![Effect::StartListening {
                        delay_ms: RESUME_AFTER_SPEECH_MS,
                    }]
                } else {
                    self.phase = Phase::Idle;
                    vec![]
                }
            }

            Event::InterpretationFinished {
                generation,
                spoken,
                deactivate,
            } => {
                if generation != self.generation {
                    tracing::debug!(generation, current = self.generation, "stale reply dropped");
                    return vec![];
                }
                // Deactivation may have happened while the round trip was in
                // flight; its side effects are gated here, not cancelled.
                if !self.active {
                    return vec![];
                }
                let mut effects = self.request_speak(spoken);
                if deactivate {
                    effects.push(Effect::ScheduleDeactivate {
                        delay_ms: DEACTIVATE_DELAY_MS,
                    });
                }
                effects
            }
        }
    }

    fn toggle(&mut self) -> Vec<Effect> {
        if !self.supported {
            return vec![];
        }
        if self.active {
            self.active = false;
            self.listening = false;
            self.speaking = false;
            self.phase = Phase::Idle;
            vec![Effect::CancelSpeech, Effect::StopListening]
        } else {
            self.active = true;
            self.request_speak(GREETING_SPEECH.to_string())
        }
    }

    /// Recognition is stopped before synthesis begins, and the speaking flag
    /// flips here, synchronously with the request.
    fn request_speak(&mut self, text: String) -> Vec<Effect> {
        self.speaking = true;
        self.listening = false;
        self.phase = Phase::Speaking;
        vec![Effect::StopListening, Effect::Speak(text)]
    }
}
