//! The explicit transition function of the playback state machine.
//!
//! `Machine::reduce` maps one event to a list of side effects for the
//! runtime to perform. It never touches the engine, timers, or the DOM
//! directly, which keeps every transition testable in isolation.
//!
//! Supersession is decided by snapshot comparison, not callback order: a
//! speak request captures the chunk index, start offset, and offset epoch
//! at issue time, and an end/error event only counts when it carries the
//! current utterance id and none of those moved underneath it. A cancelled
//! utterance's late end (or the spurious error some engines fire on
//! cancel) therefore falls through harmlessly.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::chunker::{Chunk, RootClass};
use crate::config::{MAX_PITCH, MAX_RATE, MIN_PITCH, MIN_RATE, NarrationConfig};
use crate::engine::{EngineEvent, EngineEventKind, UtteranceId};
use crate::highlight::{NodePosition, highlight_for};
use crate::voices::base_language;

use super::effects::{Effect, SelectionCommand, SpeakSpec};
use super::messages::{Command, Event, PropsPatch};
use super::state::{PlaybackState, StateChange};

/// State captured when a speak request is issued, used to disambiguate the
/// engine's asynchronous end/error callbacks.
struct UtteranceSnapshot {
    id: UtteranceId,
    chunk_index: usize,
    start_offset: usize,
    epoch: u64,
}

pub(crate) struct Machine {
    chunks: Vec<Chunk>,
    config: NarrationConfig,
    state: PlaybackState,
    /// Last state delivered to subscribers; the diff against `state` is
    /// what a change notification carries.
    emitted: PlaybackState,
    utterance: Option<UtteranceSnapshot>,
    pending_advance: Option<u64>,
    next_utterance: UtteranceId,
    next_timer: u64,
    /// Bumped on every external offset write (seek, navigation); lets an
    /// end event detect that the position moved underneath it.
    offset_epoch: u64,
    /// Host-reported selection resolved to (chunk index, absolute offset).
    selection: Option<(usize, usize)>,
    /// Start of the last range this controller applied itself, so an echo
    /// of its own highlight is not mistaken for a user seek.
    own_range_start: Option<NodePosition>,
    destroyed: bool,
}

impl Machine {
    pub(crate) fn new(chunks: Vec<Chunk>, config: NarrationConfig) -> Self {
        let config = config.sanitized();
        let state = PlaybackState::initial(&config);
        Machine {
            chunks,
            config,
            emitted: state.clone(),
            state,
            utterance: None,
            pending_advance: None,
            next_utterance: 1,
            next_timer: 1,
            offset_epoch: 0,
            selection: None,
            own_range_start: None,
            destroyed: false,
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub(crate) fn reduce(&mut self, event: Event) -> Vec<Effect> {
        if self.destroyed {
            return Vec::new();
        }
        match event {
            Event::Command(Command::Play) => self.handle_play(),
            Event::Command(Command::Stop) => self.handle_stop(),
            Event::Command(Command::Next) => self.handle_next(),
            Event::Command(Command::Previous) => self.handle_previous(),
            Event::Command(Command::SetProps(patch)) => self.handle_set_props(patch),
            Event::Command(Command::SelectionChanged(position)) => {
                self.handle_selection_changed(position)
            }
            Event::Command(Command::ReplaceChunks(chunks)) => self.handle_replace_chunks(chunks),
            Event::Command(Command::Destroy) => self.handle_destroy(),
            Event::Engine(EngineEvent { utterance, kind }) => match kind {
                EngineEventKind::WordBoundary { char_index } => {
                    self.handle_boundary(utterance, char_index)
                }
                EngineEventKind::End => self.handle_end(utterance),
                EngineEventKind::Error { message } => self.handle_engine_error(utterance, &message),
            },
            Event::AdvanceTimerFired { token } => self.handle_advance_timer(token),
            Event::SpeakFailed { utterance } => {
                self.handle_engine_error(utterance, "voice catalog unavailable")
            }
        }
    }

    /// The state change produced by the last reduce, if any. Word-boundary
    /// bookkeeping updates are excluded by construction: they advance the
    /// emitted snapshot together with the live state.
    pub(crate) fn take_change(&mut self) -> Option<StateChange> {
        let changed = self.emitted.diff(&self.state);
        if changed.is_empty() {
            return None;
        }
        let old = std::mem::replace(&mut self.emitted, self.state.clone());
        Some(StateChange {
            old,
            new: self.state.clone(),
            changed,
        })
    }

    fn handle_play(&mut self) -> Vec<Effect> {
        if self.chunks.is_empty() || self.state.playing {
            return Vec::new();
        }
        if let Some((chunk_index, offset)) = self.selection {
            // Selection-initiated start: play from where the user selected.
            self.state.chunk_index = chunk_index;
            self.set_offset_external(offset);
        } else if self.state.chunk_index + 1 == self.chunks.len() {
            // At the final chunk, play restarts from the beginning.
            self.state.chunk_index = 0;
            self.set_offset_external(0);
        }
        self.state.playing = true;
        info!(
            chunk = self.state.chunk_index,
            offset = self.state.chunk_range_offset,
            "Starting playback"
        );
        let mut effects = vec![Effect::AnnounceStarted];
        effects.extend(self.start_speaking());
        effects
    }

    fn handle_stop(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.pending_advance.take().is_some() {
            effects.push(Effect::ClearAdvanceTimer);
        }
        if self.utterance.take().is_some() {
            effects.push(Effect::CancelSpeech);
        }
        if self.state.playing {
            self.state.playing = false;
            info!(
                chunk = self.state.chunk_index,
                offset = self.state.chunk_range_offset,
                "Playback stopped; position preserved"
            );
            self.own_range_start = None;
            effects.push(Effect::Selection(SelectionCommand::Clear));
        }
        effects
    }

    fn handle_next(&mut self) -> Vec<Effect> {
        if self.state.chunk_index + 1 >= self.chunks.len() {
            return Vec::new();
        }
        self.state.chunk_index += 1;
        self.set_offset_external(0);
        debug!(chunk = self.state.chunk_index, "Advanced to next chunk");
        self.after_seek()
    }

    fn handle_previous(&mut self) -> Vec<Effect> {
        if self.chunks.is_empty() {
            return Vec::new();
        }
        // Near the start of a chunk, previous walks back a whole chunk;
        // further in, it restarts the current one.
        if self.state.chunk_range_offset < self.config.previous_chunk_threshold {
            self.state.chunk_index = self.state.chunk_index.saturating_sub(1);
        }
        self.set_offset_external(0);
        debug!(chunk = self.state.chunk_index, "Moved to previous position");
        self.after_seek()
    }

    fn after_seek(&mut self) -> Vec<Effect> {
        if self.state.playing {
            return self.start_speaking();
        }
        let Some(range) = self
            .chunks
            .get(self.state.chunk_index)
            .and_then(Chunk::full_range)
        else {
            return Vec::new();
        };
        self.own_range_start = Some(range.start);
        vec![Effect::Selection(SelectionCommand::SelectChunk(range))]
    }

    fn handle_set_props(&mut self, patch: PropsPatch) -> Vec<Effect> {
        let mut speech_changed = false;
        if let Some(rate) = patch.rate {
            let rate = rate.clamp(MIN_RATE, MAX_RATE);
            if rate != self.state.rate {
                self.state.rate = rate;
                speech_changed = true;
            }
        }
        if let Some(pitch) = patch.pitch {
            let pitch = pitch.clamp(MIN_PITCH, MAX_PITCH);
            if pitch != self.state.pitch {
                self.state.pitch = pitch;
                speech_changed = true;
            }
        }
        if let Some((language, voice)) = patch.language_voice {
            let base = base_language(&language);
            if self.state.language_voices.get(&base) != Some(&voice) {
                self.state.language_voices.insert(base, voice);
                speech_changed = true;
            }
        }
        if let Some(shown) = patch.settings_shown {
            self.state.settings_shown = shown;
        }
        if speech_changed && self.state.playing {
            info!(
                rate = self.state.rate,
                pitch = self.state.pitch,
                "Speech parameters changed; restarting at current offset"
            );
            return self.start_speaking();
        }
        Vec::new()
    }

    fn handle_selection_changed(&mut self, position: Option<NodePosition>) -> Vec<Effect> {
        let resolved =
            position.and_then(|pos| self.resolve_position(&pos).map(|found| (pos, found)));
        let Some((position, (chunk_index, offset))) = resolved else {
            self.selection = None;
            self.state.contains_selection = false;
            return Vec::new();
        };

        self.state.contains_selection = true;
        self.selection = Some((chunk_index, offset));

        let own = self.own_range_start == Some(position);
        if self.state.playing && !own {
            info!(chunk_index, offset, "User selection moved; seeking playback");
            self.state.chunk_index = chunk_index;
            self.set_offset_external(offset);
            return self.start_speaking();
        }
        Vec::new()
    }

    fn handle_replace_chunks(&mut self, chunks: Vec<Chunk>) -> Vec<Effect> {
        info!(count = chunks.len(), "Replacing chunk list");
        let effects = self.handle_stop();
        self.chunks = chunks;
        self.state.chunk_index = 0;
        self.set_offset_external(0);
        self.selection = None;
        self.state.contains_selection = false;
        effects
    }

    fn handle_destroy(&mut self) -> Vec<Effect> {
        let effects = self.handle_stop();
        self.destroyed = true;
        effects
    }

    fn handle_boundary(&mut self, id: UtteranceId, char_index: usize) -> Vec<Effect> {
        let Some(snapshot) = self.utterance.as_ref() else {
            return Vec::new();
        };
        if snapshot.id != id {
            return Vec::new();
        }
        // Translate from the spoken substring back to the whole chunk.
        let absolute = snapshot.start_offset + char_index;
        let Some(chunk) = self.chunks.get(snapshot.chunk_index) else {
            return Vec::new();
        };
        if absolute >= chunk.char_len() {
            return Vec::new();
        }

        // Bookkeeping, not a user-visible transition: the emitted snapshot
        // advances together with the live state so no notification fires.
        self.state.chunk_range_offset = absolute;
        self.emitted.chunk_range_offset = absolute;

        if self.state.settings_shown {
            return Vec::new();
        }
        match highlight_for(chunk, absolute) {
            Some(range) => {
                self.own_range_start = Some(range.start);
                vec![Effect::Selection(SelectionCommand::Highlight(range))]
            }
            None => Vec::new(),
        }
    }

    fn handle_end(&mut self, id: UtteranceId) -> Vec<Effect> {
        let snapshot = match self.utterance.take() {
            Some(snapshot) if snapshot.id == id => snapshot,
            other => {
                self.utterance = other;
                debug!(utterance = id, "Ignoring end event for superseded utterance");
                return Vec::new();
            }
        };

        // Disambiguate the four end outcomes against the captured snapshot.
        if self.state.chunk_index != snapshot.chunk_index {
            debug!(utterance = id, "Chunk changed during speech; not advancing");
            return Vec::new();
        }
        if self.offset_epoch != snapshot.epoch {
            debug!(utterance = id, "Offset was altered during speech; not advancing");
            return Vec::new();
        }
        if !self.state.playing {
            return Vec::new();
        }

        // Ended with unspoken nodes remaining: something outside this
        // controller cut the utterance off mid-chunk. Stop rather than
        // advance past text that was never spoken.
        let interrupted = self
            .chunks
            .get(self.state.chunk_index)
            .and_then(|chunk| {
                let position = chunk.position_at(self.state.chunk_range_offset)?;
                let last = chunk.nodes().last()?;
                Some(position.node != last.node)
            })
            .unwrap_or(false);
        if interrupted {
            info!(utterance = id, "Utterance interrupted mid-chunk; stopping");
            self.state.playing = false;
            self.own_range_start = None;
            return vec![Effect::Selection(SelectionCommand::Clear)];
        }

        // Normal completion.
        self.own_range_start = None;
        let mut effects = vec![Effect::Selection(SelectionCommand::Clear)];
        if self.state.chunk_index + 1 == self.chunks.len() {
            info!("Playback finished at last chunk");
            self.state.playing = false;
            return effects;
        }
        let token = self.next_timer;
        self.next_timer += 1;
        self.pending_advance = Some(token);
        let delay = self.advance_delay();
        debug!(
            token,
            delay_ms = delay.as_millis() as u64,
            "Chunk complete; scheduling advance"
        );
        effects.push(Effect::ScheduleAdvance { token, delay });
        effects
    }

    fn handle_engine_error(&mut self, id: UtteranceId, message: &str) -> Vec<Effect> {
        let matches_current = self
            .utterance
            .as_ref()
            .is_some_and(|snapshot| snapshot.id == id);
        if !matches_current {
            // Self-initiated cancels provoke spurious errors on some
            // engines; those never carry the current utterance id.
            debug!(utterance = id, "Ignoring error from superseded utterance");
            return Vec::new();
        }
        warn!(utterance = id, message, "Engine reported an error; stopping");
        self.utterance = None;
        let mut effects = Vec::new();
        if self.pending_advance.take().is_some() {
            effects.push(Effect::ClearAdvanceTimer);
        }
        if self.state.playing {
            self.state.playing = false;
            self.own_range_start = None;
            effects.push(Effect::Selection(SelectionCommand::Clear));
        }
        effects
    }

    fn handle_advance_timer(&mut self, token: u64) -> Vec<Effect> {
        if self.pending_advance != Some(token) {
            debug!(token, "Ignoring stale advance timer");
            return Vec::new();
        }
        self.pending_advance = None;
        if !self.state.playing {
            return Vec::new();
        }
        self.state.chunk_index += 1;
        self.state.chunk_range_offset = 0;
        self.start_speaking()
    }

    /// Begin speaking the current chunk at the current offset, superseding
    /// any in-flight utterance and pending advance.
    fn start_speaking(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.pending_advance.take().is_some() {
            effects.push(Effect::ClearAdvanceTimer);
        }
        if self.utterance.take().is_some() {
            effects.push(Effect::CancelSpeech);
        }
        let Some(chunk) = self.chunks.get(self.state.chunk_index) else {
            return effects;
        };
        let id = self.next_utterance;
        self.next_utterance += 1;
        self.utterance = Some(UtteranceSnapshot {
            id,
            chunk_index: self.state.chunk_index,
            start_offset: self.state.chunk_range_offset,
            epoch: self.offset_epoch,
        });
        debug!(
            utterance = id,
            chunk = self.state.chunk_index,
            offset = self.state.chunk_range_offset,
            "Issuing speak request"
        );
        effects.push(Effect::Speak(SpeakSpec {
            utterance: id,
            text: chunk.text_from(self.state.chunk_range_offset).to_string(),
            language: chunk.language().map(str::to_string),
            rate: self.state.rate,
            pitch: self.state.pitch,
            voice_preferences: self.state.language_voices.clone(),
        }));
        effects
    }

    fn advance_delay(&self) -> Duration {
        let (Some(current), Some(next)) = (
            self.chunks.get(self.state.chunk_index),
            self.chunks.get(self.state.chunk_index + 1),
        ) else {
            return Duration::ZERO;
        };
        let base_ms = if current.root() == next.root() {
            0
        } else if current.root_class() == RootClass::Heading
            || next.root_class() == RootClass::Heading
        {
            self.config.heading_pause_ms
        } else if current.root_class() == RootClass::Paragraph
            || next.root_class() == RootClass::Paragraph
        {
            self.config.paragraph_pause_ms
        } else {
            0
        };
        // Faster speech gets a proportionally shorter gap.
        Duration::from_millis((base_ms as f32 / self.state.rate).round() as u64)
    }

    fn set_offset_external(&mut self, offset: usize) {
        self.state.chunk_range_offset = offset;
        self.offset_epoch += 1;
    }

    fn resolve_position(&self, position: &NodePosition) -> Option<(usize, usize)> {
        self.chunks
            .iter()
            .enumerate()
            .find_map(|(index, chunk)| chunk.offset_of(position).map(|offset| (index, offset)))
    }
}
