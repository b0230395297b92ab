pub mod clock;
pub mod config;
pub mod error;
pub mod ingest;
pub mod live;
pub mod memory;
pub mod notable;
pub mod replay;
pub mod timeline;

use std::sync::Arc;

pub use clock::{ClockRegistry, ClockSnapshot, ClockSyncMessage, ClockTick, PlaybackMode};
pub use config::RewindConfig;
pub use error::EngineError;
pub use ingest::{IngestMessage, Ingestor};
pub use live::{LiveEvent, LiveHub, LiveSubscription};
pub use memory::MemoryEventLog;
pub use replay::{Outbound, PacingMode, ReplayError, ReplayOptions, ReplaySession};
pub use timeline::{StreamPage, TimelineItem, TimelineMerger, TimelinePage, TimelineQuery};

/// The running engine: event log, readers and the shared live state, wired
/// from one configuration.
pub struct Engine {
    config: RewindConfig,
    log: Arc<MemoryEventLog>,
    merger: TimelineMerger,
    clocks: Arc<ClockRegistry>,
    hub: Arc<LiveHub>,
    ingestor: Arc<Ingestor>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("log", &self.log)
            .field("hub", &self.hub)
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    pub fn bootstrap(config: RewindConfig) -> Self {
        let log = Arc::new(MemoryEventLog::new(config.storage.max_events_per_stream));
        let hub = Arc::new(LiveHub::new(config.live.window()));
        let ingestor = Arc::new(Ingestor::new(log.clone(), hub.clone(), config.notable.clone()));
        let merger = TimelineMerger::new(log.clone());

        tracing::info!(
            max_events_per_stream = config.storage.max_events_per_stream,
            live_window_secs = config.live.window_secs,
            "engine ready"
        );

        Engine {
            config,
            log,
            merger,
            clocks: Arc::new(ClockRegistry::new()),
            hub,
            ingestor,
        }
    }

    pub fn config(&self) -> &RewindConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<MemoryEventLog> {
        &self.log
    }

    pub fn merger(&self) -> &TimelineMerger {
        &self.merger
    }

    pub fn clocks(&self) -> &Arc<ClockRegistry> {
        &self.clocks
    }

    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }
}
