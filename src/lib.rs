//! Voice-driven page agent.
//!
//! A user controls a live web page by voice: an utterance is interpreted
//! (locally against Gmail heuristics, or remotely through a relay server that
//! fronts a chat-completion API) into a structured [`action::Action`], which
//! the executor performs against the page before the response is spoken back.
//! The page context travels as a bounded [`snapshot::Snapshot`] of the
//! visible DOM.

pub mod action;
pub mod cache;
pub mod chrome;
pub mod classifier;
pub mod dom;
pub mod executor;
pub mod face;
pub mod interpret;
pub mod relay;
pub mod session;
pub mod snapshot;
pub mod xpath;

/// Maximum element-tree depth recorded at capture time.
pub const CAPTURE_MAX_DEPTH: usize = 10;

/// Maximum depth of the textual rendering sent to the classifier.
pub const RENDER_MAX_DEPTH: usize = 8;

/// Children rendered literally per node; the rest collapse into a count line.
pub const RENDER_MAX_CHILDREN: usize = 20;
