//! Playback state record and change notifications.

use std::collections::BTreeMap;

use crate::config::NarrationConfig;

/// The controller's externally visible state. Owned exclusively by the
/// controller, mutated only through its reducer; consumers receive
/// immutable snapshots via [`StateChange`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub playing: bool,
    /// Valid range `[0, chunk_count)`.
    pub chunk_index: usize,
    /// Character offset into the current chunk's concatenated text, marking
    /// the last confirmed spoken position.
    pub chunk_range_offset: usize,
    /// Whether the host-reported user selection falls inside a chunk.
    pub contains_selection: bool,
    pub settings_shown: bool,
    pub rate: f32,
    pub pitch: f32,
    /// Base language code to chosen voice id.
    pub language_voices: BTreeMap<String, String>,
}

impl PlaybackState {
    pub(crate) fn initial(config: &NarrationConfig) -> Self {
        PlaybackState {
            playing: false,
            chunk_index: 0,
            chunk_range_offset: 0,
            contains_selection: false,
            settings_shown: false,
            rate: config.default_rate,
            pitch: config.default_pitch,
            language_voices: config.voice_preferences.clone(),
        }
    }

    pub(crate) fn diff(&self, newer: &PlaybackState) -> Vec<Field> {
        let mut changed = Vec::new();
        if self.playing != newer.playing {
            changed.push(Field::Playing);
        }
        if self.chunk_index != newer.chunk_index {
            changed.push(Field::ChunkIndex);
        }
        if self.chunk_range_offset != newer.chunk_range_offset {
            changed.push(Field::ChunkRangeOffset);
        }
        if self.contains_selection != newer.contains_selection {
            changed.push(Field::ContainsSelection);
        }
        if self.settings_shown != newer.settings_shown {
            changed.push(Field::SettingsShown);
        }
        if self.rate != newer.rate {
            changed.push(Field::Rate);
        }
        if self.pitch != newer.pitch {
            changed.push(Field::Pitch);
        }
        if self.language_voices != newer.language_voices {
            changed.push(Field::LanguageVoices);
        }
        changed
    }
}

/// Key for field-scoped reactions to a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Playing,
    ChunkIndex,
    ChunkRangeOffset,
    ContainsSelection,
    SettingsShown,
    Rate,
    Pitch,
    LanguageVoices,
}

/// A state transition as delivered to subscribers: the full new state, the
/// previous state, and which fields changed.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub old: PlaybackState,
    pub new: PlaybackState,
    pub changed: Vec<Field>,
}

impl StateChange {
    /// Whether this change touched `field`, for cheap targeted reactions.
    pub fn has(&self, field: Field) -> bool {
        self.changed.contains(&field)
    }
}
