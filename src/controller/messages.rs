//! Commands accepted by the controller and the internal event vocabulary
//! the reducer consumes.

use crate::chunker::Chunk;
use crate::engine::{EngineEvent, UtteranceId};
use crate::highlight::NodePosition;

/// UI-originated commands.
#[derive(Debug, Clone)]
pub enum Command {
    Play,
    Stop,
    Next,
    Previous,
    SetProps(PropsPatch),
    /// The host observed a change of the live text selection. `None` means
    /// the selection left the content (or was collapsed away).
    SelectionChanged(Option<NodePosition>),
    /// Swap in a freshly chunkified list after content mutation. The whole
    /// list is replaced; playback stops and the position resets.
    ReplaceChunks(Vec<Chunk>),
    Destroy,
}

/// Partial settings update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct PropsPatch {
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    /// Chosen voice for a language: `(language tag, voice id)`.
    pub language_voice: Option<(String, String)>,
    pub settings_shown: Option<bool>,
}

/// Everything the reducer reacts to, in arrival order on the controller's
/// single event queue.
#[derive(Debug, Clone)]
pub(crate) enum Event {
    Command(Command),
    Engine(EngineEvent),
    /// The inter-chunk pause elapsed. Stale tokens are ignored.
    AdvanceTimerFired { token: u64 },
    /// The speak pipeline failed before reaching the engine (voice catalog
    /// load rejected).
    SpeakFailed { utterance: UtteranceId },
}
