//! Error types for spoken-page.

use thiserror::Error;

/// Result type alias for spoken-page operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can cross the crate boundary.
///
/// Everything else that can go wrong during playback (superseded utterances,
/// interrupted speech, engine-reported failures) resolves internally to a
/// stopped playback state and is never surfaced as an error; consumers that
/// want diagnostics subscribe to state-change notifications instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The host environment has no speech-synthesis capability at all.
    /// Surfaced once at setup; the feature silently declines to activate.
    #[error("speech synthesis is not available in this environment")]
    EngineUnavailable,

    /// The engine reported zero voices even after its change notification
    /// fired. Propagates as a playback-start failure.
    #[error("speech engine reported no voices")]
    VoiceCatalogEmpty,

    /// A CSS selector in the configuration failed to parse.
    #[error("invalid selector `{0}`")]
    Selector(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
