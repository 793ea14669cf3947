//! Engine assembly
//!
//! Centralizes the wiring shared by the binary and the integration tests:
//! storage backend, record store, seed key, hub, controller, scheduler.

use crate::{
    common::traits::KeyValueStore,
    config::{BingoConfig, StorageBackend},
    errors::BingoResult,
    game_store::GameStore,
    games::VRFSeedEngine,
    hub::BroadcastHub,
    lifecycle::GameController,
    scheduler::Scheduler,
    storage::{MemoryStorage, OptimizedStorage},
};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

/// A running engine and the background tasks it owns
pub struct Engine {
    pub config: Arc<BingoConfig>,
    pub controller: Arc<GameController>,
    pub hub: BroadcastHub,
    scheduler: Option<JoinHandle<()>>,
    heartbeat: JoinHandle<()>,
}

impl Engine {
    pub fn store(&self) -> &GameStore {
        self.controller.store()
    }

    pub fn seed_public_key(&self) -> &str {
        self.controller.seed_public_key()
    }

    /// Stop the scheduler and every game task. Persisted state is left for the next `recover`.
    pub async fn shutdown(self) {
        self.controller.shutdown().await;
        if let Some(scheduler) = self.scheduler {
            if let Err(e) = scheduler.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        self.heartbeat.abort();
        self.hub.log_stats();
        info!("Engine stopped");
    }
}

pub struct EngineFactory;

impl EngineFactory {
    /// Build and start an engine: recover unfinished games, then start the scheduler
    pub async fn create_engine(config: BingoConfig) -> BingoResult<Engine> {
        config.validate()?;
        let config = Arc::new(config);

        let kv = Self::create_storage(&config)?;
        let store = GameStore::new(kv, config.storage.max_conflict_retries);
        let seeder = Arc::new(VRFSeedEngine::load_or_create(&store)?);
        let hub = BroadcastHub::new(&config.broadcast);

        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let controller = GameController::new(store, hub.clone(), seeder, Arc::clone(&config), finished_tx);

        let resumed = controller.recover()?;
        if resumed > 0 {
            info!(resumed, "Resumed unfinished games");
        }

        let scheduler = if config.scheduler.enabled {
            let scheduler = Scheduler::new(
                Arc::clone(&controller),
                config.scheduler.clone(),
                finished_rx,
                controller.shutdown_signal(),
            );
            Some(scheduler.spawn())
        } else {
            None
        };
        let heartbeat = hub.start_heartbeat();

        info!(
            backend = ?config.storage.backend,
            scheduler = config.scheduler.enabled,
            seed_key = %controller.seed_public_key(),
            "Bingo engine ready"
        );

        Ok(Engine {
            config,
            controller,
            hub,
            scheduler,
            heartbeat,
        })
    }

    /// Engine tuned for tests: in-memory storage, millisecond timings, no scheduler
    pub async fn create_testing() -> BingoResult<Engine> {
        Self::create_engine(BingoConfig::testing()).await
    }

    fn create_storage(config: &BingoConfig) -> BingoResult<Arc<dyn KeyValueStore>> {
        match config.storage.backend {
            StorageBackend::RocksDb => {
                let storage = OptimizedStorage::with_config(&config.storage.data_directory, &config.storage)?;
                Ok(Arc::new(storage))
            }
            StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
        }
    }
}
