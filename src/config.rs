//! Configuration for the narration feature.
//!
//! All tunables are centralized here and can be loaded from a TOML file;
//! any missing or invalid entries fall back to defaults so a host can
//! always construct the feature. Values are validated and clamped at
//! construction rather than trusted downstream.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::voices::base_language;

/// Bounds for the speech parameters; engines reject values outside these.
pub const MIN_RATE: f32 = 0.1;
pub const MAX_RATE: f32 = 10.0;
pub const MIN_PITCH: f32 = 0.1;
pub const MAX_PITCH: f32 = 2.0;

/// User-tunable narration settings; deserializable from TOML.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NarrationConfig {
    /// Elements that bound chunks (chunk roots).
    #[serde(default = "default_include_selector")]
    pub include_selector: String,
    /// Elements whose descendant text is never chunked.
    #[serde(default = "default_exclude_selector")]
    pub exclude_selector: String,
    /// How content roots are discovered in the page.
    #[serde(default = "default_content_selector")]
    pub content_selector: String,
    #[serde(default = "default_rate")]
    pub default_rate: f32,
    #[serde(default = "default_pitch")]
    pub default_pitch: f32,
    /// Pause around heading chunks, in milliseconds.
    #[serde(default = "default_heading_pause_ms")]
    pub heading_pause_ms: u64,
    /// Pause around paragraph-like chunks, in milliseconds.
    #[serde(default = "default_paragraph_pause_ms")]
    pub paragraph_pause_ms: u64,
    /// Offsets below this count as "still at the start of the chunk" for
    /// the previous command.
    #[serde(default = "default_previous_chunk_threshold")]
    pub previous_chunk_threshold: usize,
    /// How long to let a cancelled utterance drain before the next speak.
    #[serde(default = "default_cancel_drain_ms")]
    pub cancel_drain_ms: u64,
    /// Base language code to preferred voice id.
    #[serde(default)]
    pub voice_preferences: BTreeMap<String, String>,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        NarrationConfig {
            include_selector: default_include_selector(),
            exclude_selector: default_exclude_selector(),
            content_selector: default_content_selector(),
            default_rate: default_rate(),
            default_pitch: default_pitch(),
            heading_pause_ms: default_heading_pause_ms(),
            paragraph_pause_ms: default_paragraph_pause_ms(),
            previous_chunk_threshold: default_previous_chunk_threshold(),
            cancel_drain_ms: default_cancel_drain_ms(),
            voice_preferences: BTreeMap::new(),
        }
    }
}

impl NarrationConfig {
    /// Check that every selector parses. Called once at setup so selector
    /// typos surface immediately instead of at first playback.
    pub fn validate(&self) -> Result<()> {
        for selector in [
            &self.include_selector,
            &self.exclude_selector,
            &self.content_selector,
        ] {
            Selector::parse(selector).map_err(|_| Error::Selector(selector.clone()))?;
        }
        if self.default_rate <= 0.0 || self.default_pitch <= 0.0 {
            return Err(Error::Config("rate and pitch must be positive".to_string()));
        }
        Ok(())
    }

    /// Copy with rate/pitch clamped into engine bounds and voice-preference
    /// keys normalized to base language codes.
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        config.default_rate = config.default_rate.clamp(MIN_RATE, MAX_RATE);
        config.default_pitch = config.default_pitch.clamp(MIN_PITCH, MAX_PITCH);
        config.voice_preferences = config
            .voice_preferences
            .iter()
            .map(|(language, voice)| (base_language(language), voice.clone()))
            .collect();
        config
    }

    pub fn cancel_drain(&self) -> Duration {
        Duration::from_millis(self.cancel_drain_ms)
    }
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file is absent or malformed.
pub fn load_config(path: &Path) -> NarrationConfig {
    match fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<NarrationConfig>(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded narration config");
                config
            }
            Err(err) => {
                warn!(path = %path.display(), "Invalid narration config, using defaults: {err}");
                NarrationConfig::default()
            }
        },
        Err(_) => NarrationConfig::default(),
    }
}

fn default_include_selector() -> String {
    crate::chunker::DEFAULT_INCLUDE_SELECTOR.to_string()
}

fn default_exclude_selector() -> String {
    crate::chunker::DEFAULT_EXCLUDE_SELECTOR.to_string()
}

fn default_content_selector() -> String {
    ".hentry .entry-content, .h-entry .e-content, [itemprop=\"articleBody\"]".to_string()
}

fn default_rate() -> f32 {
    1.0
}

fn default_pitch() -> f32 {
    1.0
}

fn default_heading_pause_ms() -> u64 {
    1000
}

fn default_paragraph_pause_ms() -> u64 {
    500
}

fn default_previous_chunk_threshold() -> usize {
    10
}

fn default_cancel_drain_ms() -> u64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = NarrationConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.heading_pause_ms, 1000);
        assert_eq!(config.paragraph_pause_ms, 500);
        assert_eq!(config.previous_chunk_threshold, 10);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: NarrationConfig = toml::from_str(
            r#"
            heading_pause_ms = 250

            [voice_preferences]
            "en-GB" = "daniel"
            "#,
        )
        .expect("parse");
        assert_eq!(config.heading_pause_ms, 250);
        assert_eq!(config.paragraph_pause_ms, 500);

        let sanitized = config.sanitized();
        assert_eq!(
            sanitized.voice_preferences.get("en"),
            Some(&"daniel".to_string())
        );
    }

    #[test]
    fn sanitize_clamps_rate_and_pitch() {
        let config = NarrationConfig {
            default_rate: 99.0,
            default_pitch: 0.0001,
            ..NarrationConfig::default()
        };
        let sanitized = config.sanitized();
        assert_eq!(sanitized.default_rate, MAX_RATE);
        assert_eq!(sanitized.default_pitch, MIN_PITCH);
    }

    #[test]
    fn bad_selector_fails_validation() {
        let config = NarrationConfig {
            include_selector: "p[".to_string(),
            ..NarrationConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Selector(_))));
    }
}
