//! Work the reducer asks the runtime to perform. Keeping side effects as
//! data makes the state machine testable without a DOM or an engine.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::UtteranceId;
use crate::highlight::TextRange;

/// A speak request as computed by the reducer. The runtime resolves the
/// voice (which may require awaiting the catalog) and issues it to the
/// engine.
#[derive(Debug, Clone)]
pub(crate) struct SpeakSpec {
    pub utterance: UtteranceId,
    /// Chunk text from the resume offset onward.
    pub text: String,
    pub language: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub voice_preferences: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub(crate) enum Effect {
    Speak(SpeakSpec),
    /// Cancel the in-flight utterance (best-effort; its end/error may still
    /// arrive later and will be ignored by snapshot comparison).
    CancelSpeech,
    /// Arm the inter-chunk pause timer.
    ScheduleAdvance { token: u64, delay: Duration },
    /// Disarm a previously scheduled advance.
    ClearAdvanceTimer,
    /// Drive the page's live selection.
    Selection(SelectionCommand),
    /// Tell the host bus this controller began playing so peers stop.
    AnnounceStarted,
}

/// Selection/highlight side effects the host applies to the page. Each
/// command replaces whatever range was previously applied.
#[derive(Debug, Clone)]
pub enum SelectionCommand {
    /// Highlight the word currently being spoken.
    Highlight(TextRange),
    /// Select a whole chunk (navigation while stopped).
    SelectChunk(TextRange),
    /// Remove any controller-applied range.
    Clear,
}
