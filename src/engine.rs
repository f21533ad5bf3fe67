//! Speech-engine capability interface.
//!
//! The underlying synthesis engine is a single, globally shared actor with
//! its own internal queue (in a browser this is `speechSynthesis`). The
//! controller depends only on this trait, which lets tests substitute a
//! scripted double that simulates arbitrary callback timing and ordering,
//! including the engine quirk where cancelling an utterance triggers a
//! spurious error callback.

use tokio::sync::mpsc;

use crate::voices::Voice;

/// Identifier the controller assigns to each synthesis request. Engine
/// callbacks carry it back so late events from a superseded utterance can be
/// told apart from events for the current one.
pub type UtteranceId = u64;

/// One request to vocalize a span of text. Derived from a chunk and the
/// playback state at the moment of speaking; discarded once the engine
/// finishes or the request is superseded.
#[derive(Debug, Clone)]
pub struct UtteranceRequest {
    pub utterance: UtteranceId,
    /// Concatenated chunk text starting at the resume offset.
    pub text: String,
    /// Resolved voice id, if any. `None` leaves the pick to the engine.
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    /// Language tag of the chunk being spoken.
    pub language: Option<String>,
}

/// Asynchronous callback from the engine, tagged with the utterance it
/// belongs to. Delivery order relative to a cancel request is not
/// guaranteed; an end event for an old utterance may arrive after its
/// successor has already started.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub utterance: UtteranceId,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone)]
pub enum EngineEventKind {
    /// The engine reached a word boundary. `char_index` is a character
    /// offset into the *spoken* substring of the utterance's text.
    WordBoundary { char_index: usize },
    /// The utterance finished, was cancelled, or otherwise ended.
    End,
    /// The engine failed. Some engines also fire this spuriously right
    /// after a cancel.
    Error { message: String },
}

/// Channel on which an engine delivers its callbacks.
pub type EngineEvents = mpsc::UnboundedSender<EngineEvent>;

/// Injected capability wrapping the global speech-synthesis actor.
///
/// `speak` must not be assumed synchronous: events arrive later on the
/// provided channel. `cancel` is best-effort and itself apparently
/// asynchronous even on a single thread, hence the controller's short
/// drain wait before issuing the next speak.
pub trait SpeechEngine: Send + Sync {
    /// Whether the environment has the capability at all. Checked once at
    /// setup; a `false` here makes the whole feature decline to activate.
    fn available(&self) -> bool {
        true
    }

    /// Snapshot of the voices known right now. May be empty early in the
    /// page lifetime; the engine announces later arrivals through the
    /// voices-changed hook.
    fn voices(&self) -> Vec<Voice>;

    /// Install the voices-changed notification hook. The catalog installs
    /// this at most once per engine.
    fn set_voices_changed(&self, hook: Box<dyn Fn() + Send + Sync>);

    /// Request synthesis. Boundary/end/error callbacks for this request are
    /// delivered on `events`, tagged with `request.utterance`.
    fn speak(&self, request: UtteranceRequest, events: EngineEvents);

    /// Cancel whatever is speaking or queued. Best-effort.
    fn cancel(&self);

    /// Engine-level pause. Unreliable across implementations; the
    /// controller models pause as stop-with-position instead and never
    /// calls this, but the capability is part of the engine surface.
    fn pause(&self);

    /// Engine-level resume. Same caveat as [`SpeechEngine::pause`].
    fn resume(&self);
}
