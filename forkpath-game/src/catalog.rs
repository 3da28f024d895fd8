//! Ordered level catalog with a persisted current position.
use serde::{Deserialize, Serialize};

use crate::constants::KEY_CURRENT_LEVEL_INDEX;
use crate::data::{CatalogData, LevelBlueprint};
use crate::level::LevelUnit;
use crate::storage::KeyValueStore;

/// Boot-time catalog settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub start_level_index: usize,
    pub use_saved_level_on_boot: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            start_level_index: 0,
            use_saved_level_on_boot: true,
        }
    }
}

/// Owns the level blueprints, the current index, and the single live level.
#[derive(Debug)]
pub struct LevelCatalog<S> {
    levels: Vec<LevelBlueprint>,
    current_index: usize,
    live: Option<LevelUnit>,
    store: S,
}

impl<S: KeyValueStore> LevelCatalog<S> {
    /// Build the catalog and resolve the boot-time level index.
    ///
    /// The saved index wins when present and in range, otherwise the
    /// configured start index is used. The result is clamped.
    pub fn new(data: CatalogData, store: S, config: &CatalogConfig) -> Self {
        let levels = data.levels;
        let saved = if config.use_saved_level_on_boot {
            match store.get_int(KEY_CURRENT_LEVEL_INDEX) {
                Ok(value) => value,
                Err(err) => {
                    log::warn!("failed to read saved level index: {err}");
                    None
                }
            }
        } else {
            None
        };

        let resolved = saved
            .and_then(|index| usize::try_from(index).ok())
            .filter(|index| *index < levels.len())
            .unwrap_or(config.start_level_index);

        let mut catalog = Self {
            levels,
            current_index: 0,
            live: None,
            store,
        };
        catalog.current_index = catalog.clamp(i64::try_from(resolved).unwrap_or(i64::MAX));
        log::debug!(
            "catalog resolved boot level {} of {}",
            catalog.current_index,
            catalog.levels.len()
        );
        catalog
    }

    fn clamp(&self, index: i64) -> usize {
        let Some(last) = self.levels.len().checked_sub(1) else {
            return 0;
        };
        usize::try_from(index.max(0)).map_or(last, |index| index.min(last))
    }

    #[must_use]
    pub const fn level_count(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current_index
    }

    /// Index `next()` would load.
    #[must_use]
    pub const fn next_index(&self) -> usize {
        if self.levels.is_empty() {
            0
        } else {
            (self.current_index + 1) % self.levels.len()
        }
    }

    #[must_use]
    pub const fn live_level(&self) -> Option<&LevelUnit> {
        self.live.as_ref()
    }

    pub const fn live_level_mut(&mut self) -> Option<&mut LevelUnit> {
        self.live.as_mut()
    }

    #[must_use]
    pub fn blueprint(&self, index: usize) -> Option<&LevelBlueprint> {
        self.levels.get(index)
    }

    /// Tear down the live level, persist the clamped index, and instantiate it.
    pub fn load_level(&mut self, index: i64) -> Option<&mut LevelUnit> {
        if let Some(mut old) = self.live.take() {
            old.deactivate_all();
        }
        if self.levels.is_empty() {
            log::error!("cannot load level {index}: catalog is empty");
            return None;
        }

        let clamped = self.clamp(index);
        if i64::try_from(clamped).ok() != Some(index) {
            log::debug!("level index {index} clamped to {clamped}");
        }
        self.current_index = clamped;
        self.persist_index();

        match LevelUnit::from_blueprint(&self.levels[clamped]) {
            Ok(level) => {
                log::debug!("loaded level {clamped} (`{}`)", level.id());
                self.live = Some(level);
                self.live.as_mut()
            }
            Err(err) => {
                log::error!("cannot instantiate level {clamped}: {err}");
                None
            }
        }
    }

    pub fn load_current(&mut self) -> Option<&mut LevelUnit> {
        self.load_level(self.index_arg(self.current_index))
    }

    /// Load the following level, wrapping to the first after the last.
    pub fn next(&mut self) -> Option<&mut LevelUnit> {
        self.load_level(self.index_arg(self.next_index()))
    }

    /// Re-instantiate the current level from its blueprint.
    pub fn replay(&mut self) -> Option<&mut LevelUnit> {
        self.load_current()
    }

    /// Forget the persisted position so the next boot uses the start index.
    pub fn clear_saved_level(&mut self) {
        if let Err(err) = self
            .store
            .remove(KEY_CURRENT_LEVEL_INDEX)
            .and_then(|()| self.store.flush())
        {
            log::error!("failed to clear saved level index: {err}");
        }
    }

    fn index_arg(&self, index: usize) -> i64 {
        i64::try_from(index).unwrap_or_else(|_| {
            log::warn!("level index {index} does not fit the persisted range");
            0
        })
    }

    fn persist_index(&self) {
        let value = self.index_arg(self.current_index);
        if let Err(err) = self
            .store
            .set_int(KEY_CURRENT_LEVEL_INDEX, value)
            .and_then(|()| self.store.flush())
        {
            log::error!("failed to persist level index {value}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Choice, StageBlueprint};
    use crate::storage::MemoryStore;

    fn data(levels: usize) -> CatalogData {
        CatalogData::from_levels(
            (0..levels)
                .map(|i| LevelBlueprint {
                    id: format!("L{i}"),
                    name: String::new(),
                    stages: vec![StageBlueprint::new(
                        "only",
                        Choice::new("a", true),
                        Choice::new("b", false),
                    )],
                })
                .collect(),
        )
    }

    #[test]
    fn boot_prefers_valid_saved_index() {
        let store = MemoryStore::with_values([(KEY_CURRENT_LEVEL_INDEX, 2)]);
        let catalog = LevelCatalog::new(data(3), store, &CatalogConfig::default());
        assert_eq!(catalog.current_index(), 2);
    }

    #[test]
    fn boot_ignores_out_of_range_saved_index() {
        let store = MemoryStore::with_values([(KEY_CURRENT_LEVEL_INDEX, 9)]);
        let config = CatalogConfig {
            start_level_index: 1,
            use_saved_level_on_boot: true,
        };
        let catalog = LevelCatalog::new(data(3), store, &config);
        assert_eq!(catalog.current_index(), 1);
    }

    #[test]
    fn boot_clamps_start_index_and_can_skip_saved_value() {
        let store = MemoryStore::with_values([(KEY_CURRENT_LEVEL_INDEX, 0)]);
        let config = CatalogConfig {
            start_level_index: 7,
            use_saved_level_on_boot: false,
        };
        let catalog = LevelCatalog::new(data(2), store, &config);
        assert_eq!(catalog.current_index(), 1);
    }

    #[test]
    fn load_level_clamps_and_persists() {
        let store = MemoryStore::new();
        let mut catalog = LevelCatalog::new(data(3), store.clone(), &CatalogConfig::default());

        catalog.load_level(-4).unwrap();
        assert_eq!(catalog.current_index(), 0);
        catalog.load_level(40).unwrap();
        assert_eq!(catalog.current_index(), 2);
        assert_eq!(store.get_int(KEY_CURRENT_LEVEL_INDEX).unwrap(), Some(2));
        assert!(store.flush_count() >= 2);
    }

    #[test]
    fn next_wraps_to_first_level() {
        let mut catalog = LevelCatalog::new(data(2), MemoryStore::new(), &CatalogConfig::default());
        catalog.load_level(1).unwrap();
        assert_eq!(catalog.next_index(), 0);
        let level = catalog.next().unwrap();
        assert_eq!(level.id(), "L0");
        assert_eq!(catalog.current_index(), 0);
    }

    #[test]
    fn replay_builds_a_fresh_instance() {
        let mut catalog = LevelCatalog::new(data(1), MemoryStore::new(), &CatalogConfig::default());
        catalog.load_current().unwrap().activate(0).unwrap();
        assert_eq!(catalog.live_level().unwrap().active_index(), Some(0));

        let replayed = catalog.replay().unwrap();
        assert_eq!(replayed.active_index(), None);
    }

    #[test]
    fn empty_catalog_fails_to_load() {
        let mut catalog =
            LevelCatalog::new(CatalogData::empty(), MemoryStore::new(), &CatalogConfig::default());
        assert!(catalog.load_current().is_none());
        assert!(catalog.next().is_none());
        assert_eq!(catalog.current_index(), 0);
    }

    #[test]
    fn clear_saved_level_removes_key() {
        let store = MemoryStore::new();
        let mut catalog = LevelCatalog::new(data(2), store.clone(), &CatalogConfig::default());
        catalog.load_level(1).unwrap();
        catalog.clear_saved_level();
        assert_eq!(store.get_int(KEY_CURRENT_LEVEL_INDEX).unwrap(), None);
    }
}
