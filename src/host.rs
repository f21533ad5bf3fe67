//! Host integration: content-root discovery, one controller per root, and
//! the coordination bus that keeps only one controller speaking at a time.

use std::sync::Arc;

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::chunker::{ChunkerOptions, chunkify};
use crate::config::NarrationConfig;
use crate::controller::PlaybackController;
use crate::engine::SpeechEngine;
use crate::error::{Error, Result};
use crate::voices::VoiceCatalog;

const BUS_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub enum BusNotice {
    PlaybackStarted { controller: u64 },
}

/// Publish/subscribe channel shared by every controller on a page. The
/// speech engine is a single global actor, so a controller that starts
/// playing announces itself here and every peer stops.
#[derive(Clone)]
pub struct CoordinationBus {
    tx: broadcast::Sender<BusNotice>,
}

impl CoordinationBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        CoordinationBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusNotice> {
        self.tx.subscribe()
    }

    pub(crate) fn announce(&self, notice: BusNotice) {
        let _ = self.tx.send(notice);
    }
}

impl Default for CoordinationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the content roots for narration. A root that itself matches the
/// selector is returned as-is; otherwise its matching descendants are.
pub fn find_content_roots<'a>(document: &'a Html, selector: &Selector) -> Vec<ElementRef<'a>> {
    let root = document.root_element();
    if selector.matches(&root) {
        return vec![root];
    }
    document.select(selector).collect()
}

/// Facade owning one controller per discovered content root plus the
/// shared voice catalog and coordination bus.
pub struct Narrator {
    controllers: Vec<(NodeId, PlaybackController)>,
    bus: CoordinationBus,
    catalog: Arc<VoiceCatalog>,
    engine: Arc<dyn SpeechEngine>,
}

impl Narrator {
    /// Set up narration over a parsed document. Fails with
    /// [`Error::EngineUnavailable`] when the environment has no synthesis
    /// capability; the host is expected to decline silently in that case.
    pub fn init(
        document: &Html,
        engine: Arc<dyn SpeechEngine>,
        config: NarrationConfig,
    ) -> Result<Self> {
        if !engine.available() {
            debug!("Speech synthesis unavailable; narration declines to activate");
            return Err(Error::EngineUnavailable);
        }
        config.validate()?;
        let content_selector = Selector::parse(&config.content_selector)
            .map_err(|_| Error::Selector(config.content_selector.clone()))?;
        let options = ChunkerOptions::from_config(&config)?;

        let catalog = VoiceCatalog::new(Arc::clone(&engine));
        let bus = CoordinationBus::new();
        let mut controllers = Vec::new();
        for root in find_content_roots(document, &content_selector) {
            let chunks = chunkify(root, &options);
            if chunks.is_empty() {
                debug!("Skipping content root with no speakable text");
                continue;
            }
            let controller = PlaybackController::spawn(
                chunks,
                Arc::clone(&engine),
                Arc::clone(&catalog),
                config.clone(),
                Some(bus.clone()),
            )?;
            controllers.push((root.id(), controller));
        }
        info!(count = controllers.len(), "Narration initialized");
        Ok(Narrator {
            controllers,
            bus,
            catalog,
            engine,
        })
    }

    pub fn controllers(&self) -> impl Iterator<Item = &PlaybackController> {
        self.controllers.iter().map(|(_, controller)| controller)
    }

    pub fn controller_for_root(&self, root: NodeId) -> Option<&PlaybackController> {
        self.controllers
            .iter()
            .find(|(id, _)| *id == root)
            .map(|(_, controller)| controller)
    }

    pub fn bus(&self) -> &CoordinationBus {
        &self.bus
    }

    pub fn voice_catalog(&self) -> &Arc<VoiceCatalog> {
        &self.catalog
    }

    /// A root removed from the document takes its controller with it.
    pub fn remove_root(&mut self, root: NodeId) {
        if let Some(position) = self.controllers.iter().position(|(id, _)| *id == root) {
            let (_, controller) = self.controllers.remove(position);
            controller.destroy();
        }
    }

    /// Page teardown: destroy every controller and cancel any speech the
    /// engine still has queued.
    pub fn destroy(&mut self) {
        for (_, controller) in self.controllers.drain(..) {
            controller.destroy();
        }
        self.engine.cancel();
    }
}
