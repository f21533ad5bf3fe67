//! Scripted speech-engine double shared by the test modules.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::engine::{EngineEvents, SpeechEngine, UtteranceRequest};
use crate::voices::Voice;

/// Each speak call is handed to the test as the request plus the event
/// channel the engine would report callbacks on, so tests control timing
/// and ordering entirely, including delivering a stale end after a cancel
/// or the spurious error-on-cancel quirk.
pub(crate) struct FakeEngine {
    available: bool,
    voices: Mutex<Vec<Voice>>,
    hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    hook_installs: AtomicUsize,
    speaks: Mutex<Option<mpsc::UnboundedSender<(UtteranceRequest, EngineEvents)>>>,
    cancels: AtomicUsize,
}

impl FakeEngine {
    pub fn with_voices(voices: Vec<Voice>) -> Arc<Self> {
        Arc::new(Self {
            available: true,
            voices: Mutex::new(voices),
            hook: Mutex::new(None),
            hook_installs: AtomicUsize::new(0),
            speaks: Mutex::new(None),
            cancels: AtomicUsize::new(0),
        })
    }

    /// Engine whose speak calls are forwarded to the returned receiver.
    pub fn manual(
        voices: Vec<Voice>,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<(UtteranceRequest, EngineEvents)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self::with_voices(voices);
        *engine.speaks.lock().expect("speak lock") = Some(tx);
        (engine, rx)
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            available: false,
            voices: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            hook_installs: AtomicUsize::new(0),
            speaks: Mutex::new(None),
            cancels: AtomicUsize::new(0),
        })
    }

    pub fn set_voice_list(&self, voices: Vec<Voice>) {
        *self.voices.lock().expect("voice lock") = voices;
    }

    pub fn fire_voices_changed(&self) {
        let hook = self.hook.lock().expect("hook lock");
        if let Some(hook) = hook.as_ref() {
            hook();
        }
    }

    pub fn hook_installs(&self) -> usize {
        self.hook_installs.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl SpeechEngine for FakeEngine {
    fn available(&self) -> bool {
        self.available
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.lock().expect("voice lock").clone()
    }

    fn set_voices_changed(&self, hook: Box<dyn Fn() + Send + Sync>) {
        self.hook_installs.fetch_add(1, Ordering::SeqCst);
        *self.hook.lock().expect("hook lock") = Some(hook);
    }

    fn speak(&self, request: UtteranceRequest, events: EngineEvents) {
        if let Some(tx) = self.speaks.lock().expect("speak lock").as_ref() {
            let _ = tx.send((request, events));
        }
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self) {}

    fn resume(&self) {}
}

/// Device-local English voice most tests use.
pub(crate) fn english_voice() -> Voice {
    Voice {
        id: "en-local".to_string(),
        name: "English".to_string(),
        language: "en-US".to_string(),
        local: true,
        default: true,
    }
}
