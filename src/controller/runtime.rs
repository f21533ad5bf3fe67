//! Driver task for one controller: pulls events off the queue, runs them
//! through the reducer, and performs the resulting effects against the
//! engine, the timers, and the subscription channels.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::{SpeechEngine, UtteranceRequest};
use crate::host::{BusNotice, CoordinationBus};
use crate::voices::VoiceCatalog;

use super::effects::{Effect, SelectionCommand, SpeakSpec};
use super::messages::{Command, Event};
use super::reducer::Machine;
use super::state::{Field, StateChange};

pub(crate) struct Runtime {
    machine: Machine,
    engine: Arc<dyn SpeechEngine>,
    catalog: Arc<VoiceCatalog>,
    events: mpsc::UnboundedSender<Event>,
    changes: broadcast::Sender<StateChange>,
    selections: broadcast::Sender<SelectionCommand>,
    playing: watch::Sender<bool>,
    bus: Option<CoordinationBus>,
    controller_id: u64,
    cancel_drain: Duration,
    speak_task: Option<JoinHandle<()>>,
    timer_task: Option<JoinHandle<()>>,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        machine: Machine,
        engine: Arc<dyn SpeechEngine>,
        catalog: Arc<VoiceCatalog>,
        events: mpsc::UnboundedSender<Event>,
        changes: broadcast::Sender<StateChange>,
        selections: broadcast::Sender<SelectionCommand>,
        playing: watch::Sender<bool>,
        bus: Option<CoordinationBus>,
        controller_id: u64,
        cancel_drain: Duration,
    ) -> Self {
        Runtime {
            machine,
            engine,
            catalog,
            events,
            changes,
            selections,
            playing,
            bus,
            controller_id,
            cancel_drain,
            speak_task: None,
            timer_task: None,
        }
    }

    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        let mut peers = self.bus.as_ref().map(CoordinationBus::subscribe);
        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                notice = recv_peer(&mut peers) => match notice {
                    BusNotice::PlaybackStarted { controller }
                        if controller != self.controller_id =>
                    {
                        debug!(controller, "Peer controller started; stopping this one");
                        Event::Command(Command::Stop)
                    }
                    _ => continue,
                },
            };
            self.step(event);
            if self.machine.is_destroyed() {
                break;
            }
        }
        self.abort_tasks();
    }

    fn step(&mut self, event: Event) {
        for effect in self.machine.reduce(event) {
            self.perform(effect);
        }
        if let Some(change) = self.machine.take_change() {
            if change.has(Field::Playing) {
                let _ = self.playing.send(change.new.playing);
            }
            let _ = self.changes.send(change);
        }
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::Speak(spec) => {
                if let Some(task) = self.speak_task.take() {
                    task.abort();
                }
                let engine = Arc::clone(&self.engine);
                let catalog = Arc::clone(&self.catalog);
                let events = self.events.clone();
                let drain = self.cancel_drain;
                self.speak_task =
                    Some(tokio::spawn(speak_pipeline(engine, catalog, events, drain, spec)));
            }
            Effect::CancelSpeech => {
                if let Some(task) = self.speak_task.take() {
                    task.abort();
                }
                self.engine.cancel();
            }
            Effect::ScheduleAdvance { token, delay } => {
                if let Some(task) = self.timer_task.take() {
                    task.abort();
                }
                let events = self.events.clone();
                self.timer_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(Event::AdvanceTimerFired { token });
                }));
            }
            Effect::ClearAdvanceTimer => {
                if let Some(task) = self.timer_task.take() {
                    task.abort();
                }
            }
            Effect::Selection(command) => {
                let _ = self.selections.send(command);
            }
            Effect::AnnounceStarted => {
                if let Some(bus) = &self.bus {
                    bus.announce(BusNotice::PlaybackStarted {
                        controller: self.controller_id,
                    });
                }
            }
        }
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.speak_task.take() {
            task.abort();
        }
        if let Some(task) = self.timer_task.take() {
            task.abort();
        }
    }
}

/// The ordered speak pipeline: wait for voices, let a cancelled utterance
/// drain, resolve the voice, then issue the request and forward the
/// engine's callbacks. The whole pipeline is one abortable task so any
/// superseding speak or cancel kills every remaining stage at once.
async fn speak_pipeline(
    engine: Arc<dyn SpeechEngine>,
    catalog: Arc<VoiceCatalog>,
    events: mpsc::UnboundedSender<Event>,
    drain: Duration,
    spec: SpeakSpec,
) {
    if let Err(err) = catalog.load().await {
        debug!(utterance = spec.utterance, "Voice catalog unavailable: {err}");
        let _ = events.send(Event::SpeakFailed {
            utterance: spec.utterance,
        });
        return;
    }

    // The engine's own cancel is apparently asynchronous even on a single
    // thread; give a just-cancelled utterance a moment to drain before the
    // next speak call.
    if drain.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(drain).await;
    }

    let voice = spec
        .language
        .as_deref()
        .and_then(|language| catalog.select_voice(&spec.voice_preferences, language));
    let request = UtteranceRequest {
        utterance: spec.utterance,
        text: spec.text,
        voice: voice.map(|voice| voice.id),
        rate: spec.rate,
        pitch: spec.pitch,
        language: spec.language,
    };

    let (engine_events, mut engine_rx) = mpsc::unbounded_channel();
    engine.speak(request, engine_events);
    while let Some(event) = engine_rx.recv().await {
        if events.send(Event::Engine(event)).is_err() {
            break;
        }
    }
}

async fn recv_peer(peers: &mut Option<broadcast::Receiver<BusNotice>>) -> BusNotice {
    match peers {
        Some(receiver) => loop {
            match receiver.recv().await {
                Ok(notice) => return notice,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
            }
        },
        None => std::future::pending().await,
    }
}
