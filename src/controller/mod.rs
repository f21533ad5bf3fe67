//! The playback controller: a state machine coordinating the shared speech
//! engine with chunk navigation, word-boundary highlighting, inter-chunk
//! pausing, and user interruptions.
//!
//! The controller runs as one driver task per content root. Commands and
//! engine callbacks land on a single event queue; the pure reducer in
//! [`reducer`] decides each transition and the runtime performs the
//! resulting effects. Consumers observe it through immutable state
//! snapshots and selection commands.

mod effects;
mod messages;
mod reducer;
mod runtime;
mod state;

pub use effects::SelectionCommand;
pub use messages::PropsPatch;
pub use state::{Field, PlaybackState, StateChange};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

use crate::chunker::Chunk;
use crate::config::NarrationConfig;
use crate::engine::SpeechEngine;
use crate::error::{Error, Result};
use crate::highlight::NodePosition;
use crate::host::CoordinationBus;
use crate::voices::VoiceCatalog;

use messages::{Command, Event};
use reducer::Machine;
use runtime::Runtime;

const CHANNEL_CAPACITY: usize = 32;

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one running playback controller. Dropping the handle does not
/// stop the driver; call [`PlaybackController::destroy`] to tear it down.
pub struct PlaybackController {
    id: u64,
    events: mpsc::UnboundedSender<Event>,
    changes: broadcast::Sender<StateChange>,
    selections: broadcast::Sender<SelectionCommand>,
    playing: watch::Receiver<bool>,
}

impl PlaybackController {
    /// Spawn a controller over a prepared chunk list. Must be called from
    /// within a tokio runtime. Fails when the engine capability is missing
    /// or the configuration is invalid.
    pub fn spawn(
        chunks: Vec<Chunk>,
        engine: Arc<dyn SpeechEngine>,
        catalog: Arc<VoiceCatalog>,
        config: NarrationConfig,
        bus: Option<CoordinationBus>,
    ) -> Result<Self> {
        if !engine.available() {
            debug!("Speech synthesis unavailable; narration declines to activate");
            return Err(Error::EngineUnavailable);
        }
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (changes_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (selections_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (playing_tx, playing_rx) = watch::channel(false);
        let id = NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed);

        let cancel_drain = config.cancel_drain();
        let machine = Machine::new(chunks, config);
        let runtime = Runtime::new(
            machine,
            engine,
            catalog,
            events_tx.clone(),
            changes_tx.clone(),
            selections_tx.clone(),
            playing_tx,
            bus,
            id,
            cancel_drain,
        );
        tokio::spawn(runtime.run(events_rx));

        Ok(PlaybackController {
            id,
            events: events_tx,
            changes: changes_tx,
            selections: selections_tx,
            playing: playing_rx,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn play(&self) {
        self.command(Command::Play);
    }

    pub fn stop(&self) {
        self.command(Command::Stop);
    }

    pub fn next(&self) {
        self.command(Command::Next);
    }

    pub fn previous(&self) {
        self.command(Command::Previous);
    }

    /// Apply a partial settings update (rate, pitch, voice choice,
    /// settings-panel visibility).
    pub fn set_props(&self, patch: PropsPatch) {
        self.command(Command::SetProps(patch));
    }

    /// Report a change of the live text selection. `None` means the
    /// selection left the content.
    pub fn selection_changed(&self, position: Option<NodePosition>) {
        self.command(Command::SelectionChanged(position));
    }

    /// Swap in a freshly chunkified list after content mutation.
    pub fn replace_chunks(&self, chunks: Vec<Chunk>) {
        self.command(Command::ReplaceChunks(chunks));
    }

    /// Tear down the controller: cancels in-flight speech, clears timers,
    /// and ends the driver task.
    pub fn destroy(&self) {
        self.command(Command::Destroy);
    }

    /// Subscribe to state changes. Each message carries the full new state,
    /// the previous state, and the changed fields.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Subscribe to the highlight/selection side effects the host applies
    /// to the page.
    pub fn selection_commands(&self) -> broadcast::Receiver<SelectionCommand> {
        self.selections.subscribe()
    }

    /// Watch the playing flag alone, for cheap targeted reactions.
    pub fn playing(&self) -> watch::Receiver<bool> {
        self.playing.clone()
    }

    fn command(&self, command: Command) {
        // A closed channel means the controller was destroyed; commands
        // after destroy are defined as no-ops.
        let _ = self.events.send(Event::Command(command));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkerOptions, chunkify};
    use crate::engine::{EngineEvent, EngineEventKind, EngineEvents, UtteranceRequest};
    use crate::testing::{FakeEngine, english_voice};
    use scraper::Html;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    const CONTENT: &str =
        r#"<p lang="en-US">Hello world.</p><p lang="en-US">Second part.</p>"#;

    fn chunks_of(html: &str) -> Vec<Chunk> {
        let document = Html::parse_fragment(html);
        chunkify(document.root_element(), &ChunkerOptions::default())
    }

    fn quick_config() -> NarrationConfig {
        NarrationConfig {
            heading_pause_ms: 10,
            paragraph_pause_ms: 10,
            cancel_drain_ms: 0,
            ..NarrationConfig::default()
        }
    }

    async fn next_speak(
        speaks: &mut UnboundedReceiver<(UtteranceRequest, EngineEvents)>,
    ) -> (UtteranceRequest, EngineEvents) {
        timeout(Duration::from_secs(5), speaks.recv())
            .await
            .expect("timed out waiting for a speak request")
            .expect("engine channel closed")
    }

    fn send_end(events: &EngineEvents, utterance: u64) {
        let _ = events.send(EngineEvent {
            utterance,
            kind: EngineEventKind::End,
        });
    }

    async fn wait_playing(receiver: &mut watch::Receiver<bool>, expected: bool) {
        timeout(Duration::from_secs(5), async {
            while *receiver.borrow_and_update() != expected {
                receiver.changed().await.expect("watch closed");
            }
        })
        .await
        .expect("timed out waiting for playing flag");
    }

    #[tokio::test]
    async fn plays_both_chunks_then_stops() {
        let (engine, mut speaks) = FakeEngine::manual(vec![english_voice()]);
        let catalog = VoiceCatalog::new(Arc::clone(&engine) as _);
        let controller = PlaybackController::spawn(
            chunks_of(CONTENT),
            engine,
            catalog,
            quick_config(),
            None,
        )
        .expect("spawn");
        let mut playing = controller.playing();

        controller.play();
        let (first, first_events) = next_speak(&mut speaks).await;
        assert_eq!(first.text, "Hello world.");
        assert_eq!(first.language.as_deref(), Some("en-us"));
        assert_eq!(first.voice.as_deref(), Some("en-local"));
        wait_playing(&mut playing, true).await;

        send_end(&first_events, first.utterance);
        let (second, second_events) = next_speak(&mut speaks).await;
        assert_eq!(second.text, "Second part.");

        send_end(&second_events, second.utterance);
        wait_playing(&mut playing, false).await;
    }

    #[tokio::test]
    async fn state_changes_carry_old_and_new_snapshots() {
        let (engine, mut speaks) = FakeEngine::manual(vec![english_voice()]);
        let catalog = VoiceCatalog::new(Arc::clone(&engine) as _);
        let controller = PlaybackController::spawn(
            chunks_of(CONTENT),
            engine,
            catalog,
            quick_config(),
            None,
        )
        .expect("spawn");
        let mut changes = controller.subscribe();

        controller.play();
        let _ = next_speak(&mut speaks).await;
        let change = timeout(Duration::from_secs(5), changes.recv())
            .await
            .expect("timeout")
            .expect("recv");
        assert!(change.has(Field::Playing));
        assert!(!change.old.playing);
        assert!(change.new.playing);
    }

    #[tokio::test]
    async fn stop_cancels_engine_and_resume_restarts_chunk() {
        let (engine, mut speaks) = FakeEngine::manual(vec![english_voice()]);
        let catalog = VoiceCatalog::new(Arc::clone(&engine) as _);
        let controller = PlaybackController::spawn(
            chunks_of(CONTENT),
            Arc::clone(&engine) as _,
            catalog,
            quick_config(),
            None,
        )
        .expect("spawn");
        let mut playing = controller.playing();

        controller.play();
        let (first, _first_events) = next_speak(&mut speaks).await;
        wait_playing(&mut playing, true).await;

        controller.stop();
        wait_playing(&mut playing, false).await;
        assert_eq!(engine.cancel_count(), 1);

        // Resume picks the same chunk back up; the first utterance was
        // never completed so the position is unchanged.
        controller.play();
        let (resumed, _) = next_speak(&mut speaks).await;
        assert_eq!(resumed.text, first.text);
    }

    #[tokio::test]
    async fn unavailable_engine_declines_activation() {
        let engine = FakeEngine::unavailable();
        let catalog = VoiceCatalog::new(Arc::clone(&engine) as _);
        let result = PlaybackController::spawn(
            chunks_of(CONTENT),
            engine,
            catalog,
            quick_config(),
            None,
        );
        assert!(matches!(result, Err(Error::EngineUnavailable)));
    }

    #[tokio::test]
    async fn empty_voice_catalog_fails_playback_start() {
        let (engine, mut speaks) = FakeEngine::manual(Vec::new());
        let catalog = VoiceCatalog::new(Arc::clone(&engine) as _);
        let controller = PlaybackController::spawn(
            chunks_of(CONTENT),
            Arc::clone(&engine) as _,
            catalog,
            quick_config(),
            None,
        )
        .expect("spawn");
        let mut changes = controller.subscribe();

        controller.play();
        let change = timeout(Duration::from_secs(5), changes.recv())
            .await
            .expect("timeout")
            .expect("recv");
        assert!(change.new.playing);

        // The catalog's change notification fires with no voices: the
        // speak pipeline fails and playback resolves back to stopped.
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.fire_voices_changed();
        let change = timeout(Duration::from_secs(5), changes.recv())
            .await
            .expect("timeout")
            .expect("recv");
        assert!(!change.new.playing);
        assert!(speaks.try_recv().is_err());
    }

    #[tokio::test]
    async fn destroy_ends_the_driver() {
        let (engine, mut speaks) = FakeEngine::manual(vec![english_voice()]);
        let catalog = VoiceCatalog::new(Arc::clone(&engine) as _);
        let controller = PlaybackController::spawn(
            chunks_of(CONTENT),
            Arc::clone(&engine) as _,
            catalog,
            quick_config(),
            None,
        )
        .expect("spawn");

        controller.play();
        let _ = next_speak(&mut speaks).await;
        controller.destroy();

        // Give the driver a moment to wind down, then verify commands are
        // no-ops and the in-flight utterance was cancelled.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.cancel_count() >= 1);
        controller.play();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(speaks.try_recv().is_err());
    }
}
