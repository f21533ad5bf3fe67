//! Text-to-speech narration for web article content.
//!
//! The crate pairs a content chunker, which partitions a DOM subtree's text
//! into language-homogeneous, structurally bounded segments, with a playback
//! controller that drives a shared speech-synthesis engine through those
//! segments: play/stop/seek commands, word-boundary highlighting,
//! inter-chunk pauses, and voice/rate/pitch selection.
//!
//! The synthesis engine itself is injected behind [`engine::SpeechEngine`];
//! the crate never talks to a concrete backend. Hosts parse their content
//! with `scraper`, discover roots via [`host::find_content_roots`] (or the
//! [`host::Narrator`] facade), and wire the controller's state-change and
//! selection subscriptions to their own UI.

pub mod chunker;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod highlight;
pub mod host;
pub mod voices;

#[cfg(test)]
pub(crate) mod testing;

pub use chunker::{Chunk, ChunkNode, ChunkerOptions, ElementFilter, RootClass, chunkify};
pub use config::{NarrationConfig, load_config};
pub use controller::{
    Field, PlaybackController, PlaybackState, PropsPatch, SelectionCommand, StateChange,
};
pub use engine::{
    EngineEvent, EngineEventKind, EngineEvents, SpeechEngine, UtteranceId, UtteranceRequest,
};
pub use error::{Error, Result};
pub use highlight::{NodePosition, TextRange};
pub use host::{BusNotice, CoordinationBus, Narrator, find_content_roots};
pub use voices::{Voice, VoiceCatalog, base_language};
