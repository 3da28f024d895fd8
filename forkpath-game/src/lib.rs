//! Forkpath Game Engine
//!
//! Platform-agnostic progression core for a branching binary-choice game.
//! Levels are ordered lists of stages; each stage offers two choices, one of
//! which leads forward. This crate owns the state machine, persistence and
//! economy. Rendering, animation and audio are reached through the traits in
//! [`presentation`] and [`vfx`].

pub mod branch;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod data;
pub mod economy;
pub mod flow;
pub mod headless;
pub mod level;
pub mod presentation;
pub mod settings;
pub mod stage;
pub mod storage;
pub mod vfx;

use thiserror::Error;

// Re-export commonly used types
pub use branch::{BranchContext, RouteTag};
pub use catalog::{CatalogConfig, LevelCatalog};
pub use config::{ConfigError, ConnectivityConfig, FlowConfig, GameConfig};
pub use data::{
    AssetRef, BlueprintError, CatalogData, Choice, CueSet, LevelBlueprint, RouteCues,
    StageBlueprint,
};
pub use economy::{EconomyConfig, EconomyLedger, LedgerError};
pub use flow::{
    BoxedCues, BoxedPresentation, Command, ConnectivityProbe, FlowCounters, FlowState,
    ProgressionController, watch_connectivity,
};
pub use level::LevelUnit;
pub use presentation::{ChoiceSlot, CueSurface, PanelKind, Presentation, SlotBinding, StepFuture};
pub use settings::{SettingKind, Settings};
pub use stage::{Resolution, StageError, StagePhase, StageUnit};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore, StorageError};
pub use vfx::{EffectSurface, VfxDirector, VfxMoment, VfxRule, VfxSpace};

/// Sample catalog shipped with the crate.
pub const BUNDLED_CATALOG_JSON: &str = include_str!("../data/catalog.json");

/// Trait for abstracting catalog and config loading
/// Platform-specific implementations should provide this
pub trait CatalogLoader {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the authored level catalog
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be loaded or parsed.
    fn load_catalog(&self) -> Result<CatalogData, Self::Error>;

    /// Load tuning configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or parsed.
    fn load_config(&self) -> Result<GameConfig, Self::Error>;
}

/// Loader for [`BUNDLED_CATALOG_JSON`] with an optional config override.
#[derive(Debug, Clone, Default)]
pub struct BundledLoader {
    config: GameConfig,
}

impl BundledLoader {
    #[must_use]
    pub const fn with_config(config: GameConfig) -> Self {
        Self { config }
    }
}

impl CatalogLoader for BundledLoader {
    type Error = BlueprintError;

    fn load_catalog(&self) -> Result<CatalogData, Self::Error> {
        CatalogData::from_json(BUNDLED_CATALOG_JSON)
    }

    fn load_config(&self) -> Result<GameConfig, Self::Error> {
        Ok(self.config.clone())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load game data: {0}")]
    Loader(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Blueprint(#[from] BlueprintError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Main game engine: wires loaded data and a store into services
pub struct GameEngine<L, S>
where
    L: CatalogLoader,
    S: KeyValueStore + Clone,
{
    loader: L,
    store: S,
}

impl<L, S> GameEngine<L, S>
where
    L: CatalogLoader,
    S: KeyValueStore + Clone,
{
    /// Create a new game engine with the provided loader and store
    pub const fn new(loader: L, store: S) -> Self {
        Self { loader, store }
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Player toggles over the engine's store.
    #[must_use]
    pub fn settings(&self) -> Settings<S> {
        Settings::new(self.store.clone())
    }

    /// Load, validate, and wire a controller ready for [`ProgressionController::boot`].
    ///
    /// # Errors
    ///
    /// Returns an error if data cannot be loaded, the catalog or config is
    /// invalid, or the ledger cannot be opened.
    pub fn build_controller(
        &self,
        presentation: BoxedPresentation,
        cues: BoxedCues,
        seed: u64,
    ) -> Result<ProgressionController<S>, EngineError> {
        let config = self
            .loader
            .load_config()
            .map_err(|err| EngineError::Loader(Box::new(err)))?;
        config.validate()?;
        let data = self
            .loader
            .load_catalog()
            .map_err(|err| EngineError::Loader(Box::new(err)))?;
        data.validate()?;

        let catalog = LevelCatalog::new(data, self.store.clone(), &config.catalog);
        let ledger = EconomyLedger::open(self.store.clone(), config.economy.clone())?;
        Ok(ProgressionController::new(
            catalog,
            ledger,
            presentation,
            cues,
            config.flow,
            seed,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{RecordingPresentation, ScriptedCues};
    use std::convert::Infallible;

    #[derive(Clone, Default)]
    struct FixtureLoader {
        data: CatalogData,
    }

    impl CatalogLoader for FixtureLoader {
        type Error = Infallible;

        fn load_catalog(&self) -> Result<CatalogData, Self::Error> {
            Ok(self.data.clone())
        }

        fn load_config(&self) -> Result<GameConfig, Self::Error> {
            Ok(GameConfig::default())
        }
    }

    #[test]
    fn bundled_catalog_is_valid() {
        let data = BundledLoader::default().load_catalog().unwrap();
        data.validate().unwrap();
        assert_eq!(data.levels.len(), 3);
    }

    #[tokio::test]
    async fn engine_builds_controller_from_bundled_data() {
        let store = MemoryStore::new();
        let engine = GameEngine::new(BundledLoader::default(), store.clone());
        let mut flow = engine
            .build_controller(
                Box::new(RecordingPresentation::new()),
                Box::new(ScriptedCues::new()),
                11,
            )
            .unwrap();
        assert_eq!(flow.state(), FlowState::Boot);
        assert_eq!(flow.ledger().balance(), constants::DEFAULT_START_BALANCE);

        flow.boot();
        assert_eq!(flow.catalog().level_count(), 3);
        assert!(engine.settings().is_on(SettingKind::Sound));
    }

    #[test]
    fn engine_rejects_empty_catalog() {
        let engine = GameEngine::new(FixtureLoader::default(), MemoryStore::new());
        let err = engine
            .build_controller(
                Box::new(RecordingPresentation::new()),
                Box::new(ScriptedCues::new()),
                0,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Blueprint(BlueprintError::EmptyCatalog)));
    }
}
