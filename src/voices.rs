//! Voice catalog: a process-wide wrapper around the engine's asynchronously
//! populated voice list.
//!
//! The engine reports voices at some point after startup and announces the
//! arrival through a change notification. The catalog turns that into a
//! single-shot ready signal: `load()` resolves once a non-empty list is
//! known (immediately when already cached) and the change hook is installed
//! at most once no matter how many loads race. Later notifications append
//! voices, never remove them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::engine::SpeechEngine;
use crate::error::{Error, Result};

/// One synthesis voice as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    /// Stable identifier, unique within the engine's list.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Full language tag, e.g. `en-US`.
    pub language: String,
    /// Device-local (non-network) availability. Local voices behave
    /// consistently offline and avoid network-dependent latency, so they
    /// are the preferred selection candidates.
    pub local: bool,
    /// Whether the engine reports this as its default voice.
    pub default: bool,
}

/// Strip any regional subtag: `en-GB` becomes `en`. Lowercased.
pub fn base_language(tag: &str) -> String {
    let base = tag.split('-').next().unwrap_or(tag);
    base.to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatalogStatus {
    Pending,
    Ready,
    Empty,
}

/// Shared, read-mostly catalog of the engine's voices. Safe to share across
/// every controller on the page.
pub struct VoiceCatalog {
    engine: Arc<dyn SpeechEngine>,
    shared: Arc<CatalogShared>,
    hook_installed: AtomicBool,
}

struct CatalogShared {
    voices: Mutex<Vec<Voice>>,
    status: watch::Sender<CatalogStatus>,
}

impl CatalogShared {
    fn absorb(&self, incoming: Vec<Voice>) {
        let mut voices = self.voices.lock().expect("voice list lock poisoned");
        for voice in incoming {
            if !voices.iter().any(|known| known.id == voice.id) {
                voices.push(voice);
            }
        }
        if !voices.is_empty() {
            debug!(count = voices.len(), "Voice catalog populated");
            // send_replace, not send: the status must latch even when no
            // load() is currently subscribed.
            self.status.send_replace(CatalogStatus::Ready);
        }
    }

    fn is_loaded(&self) -> bool {
        *self.status.borrow() == CatalogStatus::Ready
    }
}

impl VoiceCatalog {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Arc<Self> {
        let (status, _) = watch::channel(CatalogStatus::Pending);
        Arc::new(Self {
            engine,
            shared: Arc::new(CatalogShared {
                voices: Mutex::new(Vec::new()),
                status,
            }),
            hook_installed: AtomicBool::new(false),
        })
    }

    /// Non-blocking snapshot check.
    pub fn is_loaded(&self) -> bool {
        self.shared.is_loaded()
    }

    /// Resolve once the engine has a non-empty voice list. Resolves
    /// immediately when voices are already known. Fails with
    /// [`Error::VoiceCatalogEmpty`] when the engine's change notification
    /// fires and the list is still empty.
    pub async fn load(&self) -> Result<Vec<Voice>> {
        if self.is_loaded() {
            return Ok(self.snapshot());
        }

        // Poll once before waiting; voices may already be there.
        let initial = self.engine.voices();
        if !initial.is_empty() {
            self.shared.absorb(initial);
            return Ok(self.snapshot());
        }

        self.install_change_hook();

        let mut rx = self.shared.status.subscribe();
        loop {
            match *rx.borrow_and_update() {
                CatalogStatus::Ready => return Ok(self.snapshot()),
                CatalogStatus::Empty => return Err(Error::VoiceCatalogEmpty),
                CatalogStatus::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::VoiceCatalogEmpty);
            }
        }
    }

    /// Voices whose language matches `base` by prefix on the normalized
    /// base code (`en` matches `en-US` and `en-GB`).
    pub fn voices_for_language(&self, base: &str) -> Vec<Voice> {
        let base = base.to_ascii_lowercase();
        self.shared
            .voices
            .lock()
            .expect("voice list lock poisoned")
            .iter()
            .filter(|voice| voice.language.to_ascii_lowercase().starts_with(&base))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Voice> {
        self.shared
            .voices
            .lock()
            .expect("voice list lock poisoned")
            .clone()
    }

    /// Pick a voice for a chunk language, honoring an explicit per-language
    /// preference first. Ties broken by the engine's reported order.
    ///
    /// 1. the user's chosen voice for the base language, if cataloged;
    /// 2. the engine's default voice when its language matches the base;
    /// 3. the first local voice matching the full tag exactly;
    /// 4. the first local voice matching the base language;
    /// 5. none: the engine picks its own default, with no guarantee on
    ///    language fidelity.
    pub fn select_voice(
        &self,
        preferences: &BTreeMap<String, String>,
        language: &str,
    ) -> Option<Voice> {
        let base = base_language(language);
        let voices = self.shared.voices.lock().expect("voice list lock poisoned");

        if let Some(chosen_id) = preferences.get(&base) {
            if let Some(voice) = voices.iter().find(|voice| &voice.id == chosen_id) {
                return Some(voice.clone());
            }
        }

        if let Some(default) = voices.iter().find(|voice| voice.default) {
            if base_language(&default.language) == base {
                return Some(default.clone());
            }
        }

        let locals = voices.iter().filter(|voice| voice.local);
        if let Some(exact) = locals
            .clone()
            .find(|voice| voice.language.eq_ignore_ascii_case(language))
        {
            return Some(exact.clone());
        }
        locals
            .clone()
            .find(|voice| base_language(&voice.language) == base)
            .cloned()
    }

    fn install_change_hook(&self) {
        if self.hook_installed.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(&self.shared);
        self.engine.set_voices_changed(Box::new(move || {
            let voices = engine.voices();
            if voices.is_empty() {
                if !shared.is_loaded() {
                    warn!("Voices-changed fired with an empty voice list");
                    shared.status.send_replace(CatalogStatus::Empty);
                }
            } else {
                shared.absorb(voices);
            }
        }));
    }
}
