//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use beacon_core::storage::KeyValueStore;
use beacon_core::{
    default_data_dir, preferences_path, BeaconEngine, EngineConfig, FileStore, GatewayFactory,
    HttpGatewayFactory, MemoryStore, MonitoringState, StaticConnectivity,
};
use tracing::info;

use crate::host::{HostScanner, LogNotifier};
use crate::settings::ServerSettings;

/// State handed to every handler.
pub type SharedState = AppState;

/// The engine plus the host collaborators the API pokes directly.
#[derive(Clone)]
pub struct AppState {
    /// The engine instance.
    pub engine: BeaconEngine,
    /// Recorded radio requests.
    pub scanner: Arc<HostScanner>,
    /// Online flag set through the API.
    pub connectivity: Arc<StaticConnectivity>,
    started_at: Instant,
}

impl AppState {
    /// Open persisted state under the configured data directory and restore
    /// the engine.
    ///
    /// When nothing was persisted and `settings.engine_config` names a file,
    /// that configuration is applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory or the initial engine
    /// configuration cannot be used.
    pub async fn new(settings: &ServerSettings) -> anyhow::Result<Self> {
        let data_dir = match &settings.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        };
        let store = FileStore::open(preferences_path(&data_dir))?;
        info!(data_dir = %data_dir.display(), "Opened preference store");

        let state = Self::with_parts(Arc::new(store), Arc::new(HttpGatewayFactory));
        let restored = state.engine.restore().await;
        info!(state = %restored, "Engine restored");

        if restored == MonitoringState::Created {
            if let Some(path) = &settings.engine_config {
                let config = EngineConfig::load(path)?;
                state.engine.configure(config).await?;
                info!(path = %path.display(), "Applied initial engine configuration");
            }
        }
        Ok(state)
    }

    /// Assemble state around the given store and gateway factory.
    pub fn with_parts(
        store: Arc<dyn KeyValueStore>,
        gateway_factory: Arc<dyn GatewayFactory>,
    ) -> Self {
        let scanner = Arc::new(HostScanner::new());
        let connectivity = Arc::new(StaticConnectivity::default());
        let engine = BeaconEngine::builder(scanner.clone())
            .store(store)
            .connectivity(connectivity.clone())
            .notifier(Arc::new(LogNotifier))
            .gateway_factory(gateway_factory)
            .build();

        Self {
            engine,
            scanner,
            connectivity,
            started_at: Instant::now(),
        }
    }

    /// In-memory state with the HTTP gateway.
    pub fn in_memory() -> Self {
        Self::with_parts(Arc::new(MemoryStore::new()), Arc::new(HttpGatewayFactory))
    }

    /// Seconds since the state was created.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
