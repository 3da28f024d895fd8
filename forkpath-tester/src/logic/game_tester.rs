use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use forkpath_game::constants::KEY_CURRENT_LEVEL_INDEX;
use forkpath_game::headless::{PresentationCall, RecordingPresentation, ScriptedCues};
use forkpath_game::{
    BUNDLED_CATALOG_JSON, BlueprintError, CatalogData, CatalogLoader, ChoiceSlot, ConfigError,
    FlowCounters, FlowState, GameConfig, GameEngine, KeyValueStore, MemoryStore, RouteTag,
    StageUnit,
};
use serde::Serialize;
use thiserror::Error;

use crate::logic::policy::{GameplayStrategy, StageView};

const DEFAULT_MAX_PICKS: u32 = 64;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Catalog(#[from] BlueprintError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Catalog and configuration every simulation runs against.
#[derive(Debug, Clone)]
pub struct TesterAssets {
    catalog: CatalogData,
    config: GameConfig,
}

impl TesterAssets {
    /// Bundled catalog with default tuning, fast-forwarded.
    pub fn load_default() -> Self {
        let catalog = CatalogData::from_json(BUNDLED_CATALOG_JSON).unwrap_or_else(|err| {
            eprintln!("⚠️ Bundled catalog failed to parse: {err}");
            CatalogData::empty()
        });
        Self {
            catalog,
            config: GameConfig::default(),
        }
        .fast_forward()
    }

    /// Load overrides from disk, falling back to bundled data.
    ///
    /// # Errors
    ///
    /// Returns an error if a given file cannot be read or parsed.
    pub fn from_paths(catalog: Option<&Path>, config: Option<&Path>) -> Result<Self, AssetError> {
        let catalog = match catalog {
            Some(path) => CatalogData::from_json(&read(path)?)?,
            None => CatalogData::from_json(BUNDLED_CATALOG_JSON)?,
        };
        let config = match config {
            Some(path) => GameConfig::load(path)?,
            None => GameConfig::default(),
        };
        Ok(Self { catalog, config })
    }

    /// Drop every fixed delay so runs finish instantly.
    #[must_use]
    pub fn fast_forward(mut self) -> Self {
        self.config.flow.boot_loading_secs = 0.0;
        self.config.flow.stage_loading_secs = 0.0;
        self.config.flow.intro_fallback_secs = 0.0;
        for stage in self
            .catalog
            .levels
            .iter_mut()
            .flat_map(|level| level.stages.iter_mut())
        {
            stage.intro_fallback_secs = None;
        }
        self
    }

    #[must_use]
    pub const fn config(&self) -> &GameConfig {
        &self.config
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        self.catalog.levels.len()
    }

    /// Every cue name the catalog references, including route overrides.
    #[must_use]
    pub fn cue_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for stage in self.catalog.levels.iter().flat_map(|level| &level.stages) {
            let sets = std::iter::once(&stage.cues).chain(stage.route_cues.iter().map(|r| &r.cues));
            for set in sets {
                names.extend(
                    [&set.intro, &set.win, &set.lose]
                        .into_iter()
                        .flatten()
                        .cloned(),
                );
            }
        }
        names
    }
}

fn read(path: &Path) -> Result<String, AssetError> {
    fs::read_to_string(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl CatalogLoader for TesterAssets {
    type Error = AssetError;

    fn load_catalog(&self) -> Result<CatalogData, Self::Error> {
        Ok(self.catalog.clone())
    }

    fn load_config(&self) -> Result<GameConfig, Self::Error> {
        Ok(self.config.clone())
    }
}

/// What the harness does when a stage is failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailResponse {
    RetryStage,
    RetryLevel,
}

/// Scripted run definition.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub strategy: GameplayStrategy,
    pub levels_to_play: u32,
    pub max_picks: u32,
    pub on_fail: FailResponse,
    pub start_level: Option<usize>,
    pub expectations: Vec<SimulationExpectation>,
}

impl SimulationPlan {
    #[must_use]
    pub const fn new(strategy: GameplayStrategy) -> Self {
        Self {
            strategy,
            levels_to_play: 1,
            max_picks: DEFAULT_MAX_PICKS,
            on_fail: FailResponse::RetryStage,
            start_level: None,
            expectations: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_levels(mut self, levels: u32) -> Self {
        self.levels_to_play = levels;
        self
    }

    #[must_use]
    pub const fn with_max_picks(mut self, max_picks: u32) -> Self {
        self.max_picks = max_picks;
        self
    }

    #[must_use]
    pub const fn with_fail_response(mut self, response: FailResponse) -> Self {
        self.on_fail = response;
        self
    }

    #[must_use]
    pub const fn starting_at(mut self, level: usize) -> Self {
        self.start_level = Some(level);
        self
    }

    #[must_use]
    pub fn with_expectation(mut self, expectation: impl Into<SimulationExpectation>) -> Self {
        self.expectations.push(expectation.into());
        self
    }
}

/// Assertion hook run after a simulation completes.
type SimulationExpectationFn =
    Arc<dyn Fn(&SimulationSummary) -> Result<()> + Send + Sync + 'static>;

#[derive(Clone)]
pub struct SimulationExpectation(SimulationExpectationFn);

impl std::fmt::Debug for SimulationExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationExpectation").finish()
    }
}

impl SimulationExpectation {
    pub fn evaluate(&self, summary: &SimulationSummary) -> Result<()> {
        (self.0)(summary)
    }
}

impl<F> From<F> for SimulationExpectation
where
    F: Fn(&SimulationSummary) -> Result<()> + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Self(Arc::new(f))
    }
}

/// Notable transition observed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    Picked {
        level: usize,
        stage: usize,
        slot: ChoiceSlot,
        won: bool,
        route: RouteTag,
    },
    StageFailed {
        level: usize,
        stage: usize,
    },
    RetriedStage {
        level: usize,
        stage: usize,
        state_after: FlowState,
    },
    RetriedLevel {
        level: usize,
        stage_after: usize,
        branch_fresh: bool,
    },
    LevelWon {
        level: usize,
        balance: i64,
    },
    Advanced {
        from: usize,
        to: usize,
    },
}

/// Complete record of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationSummary {
    pub seed: u64,
    pub strategy: GameplayStrategy,
    pub final_state: FlowState,
    pub counters: FlowCounters,
    pub levels_completed: u32,
    pub picks: u32,
    pub level_count: usize,
    pub final_level_index: usize,
    pub start_balance: i64,
    pub final_balance: i64,
    pub reward_per_level: i64,
    pub events: Vec<FlowEvent>,
    pub transcript: Vec<PresentationCall>,
    pub cues_played: Vec<String>,
    pub halted: Option<String>,
}

impl SimulationSummary {
    pub fn picks(&self) -> impl Iterator<Item = &FlowEvent> {
        self.events
            .iter()
            .filter(|event| matches!(event, FlowEvent::Picked { .. }))
    }
}

/// Headless deterministic runner for the progression engine.
#[derive(Clone)]
pub struct GameTester {
    verbose: bool,
    assets: Arc<TesterAssets>,
}

impl GameTester {
    pub const fn new(assets: Arc<TesterAssets>, verbose: bool) -> Self {
        Self { verbose, assets }
    }

    pub const fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn level_count(&self) -> usize {
        self.assets.level_count()
    }

    fn scripted_cues(&self) -> ScriptedCues {
        self.assets
            .cue_names()
            .into_iter()
            .fold(ScriptedCues::new(), |cues, name| cues.with_cue(name, 0.0))
    }

    /// Play `plan` against a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller cannot be built.
    pub async fn run_plan(&self, plan: &SimulationPlan, seed: u64) -> Result<SimulationSummary> {
        let store = MemoryStore::new();
        if let Some(level) = plan.start_level {
            store.set_int(KEY_CURRENT_LEVEL_INDEX, i64::try_from(level)?)?;
        }
        let engine = GameEngine::new(self.assets.as_ref().clone(), store);
        let presentation = RecordingPresentation::new();
        let cues = self.scripted_cues();
        let mut flow = engine
            .build_controller(
                Box::new(presentation.clone()),
                Box::new(cues.clone()),
                seed,
            )
            .context("failed to build controller")?;
        let mut policy = plan.strategy.create_policy(seed);
        let start_balance = flow.ledger().balance();

        flow.boot();
        flow.settle().await;

        let mut events = Vec::new();
        let mut picks = 0;
        let mut levels_completed = 0;
        let mut halted = None;

        loop {
            let level = flow.catalog().current_index();
            let stage = flow.stage_index();
            match flow.state() {
                FlowState::Gameplay => {
                    if picks >= plan.max_picks {
                        halted = Some(format!("pick budget of {} exhausted", plan.max_picks));
                        break;
                    }
                    let view = StageView {
                        level_index: level,
                        stage_index: stage,
                        winning_slot: flow.active_stage().and_then(StageUnit::winning_slot),
                    };
                    let decision = policy.pick(&view);
                    if !flow.choose(decision.slot) {
                        halted = Some(format!("pick {:?} ignored at stage {stage}", decision.slot));
                        break;
                    }
                    picks += 1;
                    flow.settle().await;
                    let won = flow.state() != FlowState::Fail;
                    if self.verbose {
                        let outcome = if won { "win".green() } else { "lose".red() };
                        println!(
                            "  🎯 L{level} S{stage} {} picked {:?} -> {outcome} ({})",
                            policy.name(),
                            decision.slot,
                            decision.rationale.as_deref().unwrap_or("-")
                        );
                    }
                    events.push(FlowEvent::Picked {
                        level,
                        stage,
                        slot: decision.slot,
                        won,
                        route: flow.branch().route(),
                    });
                }
                FlowState::Fail => {
                    events.push(FlowEvent::StageFailed { level, stage });
                    match plan.on_fail {
                        FailResponse::RetryStage => {
                            flow.retry_stage();
                            events.push(FlowEvent::RetriedStage {
                                level,
                                stage,
                                state_after: flow.state(),
                            });
                        }
                        FailResponse::RetryLevel => {
                            flow.retry_level();
                            events.push(FlowEvent::RetriedLevel {
                                level,
                                stage_after: flow.stage_index(),
                                branch_fresh: flow.branch().is_fresh(),
                            });
                        }
                    }
                    flow.settle().await;
                }
                FlowState::Win => {
                    levels_completed += 1;
                    events.push(FlowEvent::LevelWon {
                        level,
                        balance: flow.ledger().balance(),
                    });
                    if levels_completed >= plan.levels_to_play {
                        break;
                    }
                    flow.advance_level();
                    events.push(FlowEvent::Advanced {
                        from: level,
                        to: flow.catalog().current_index(),
                    });
                    flow.settle().await;
                }
                FlowState::Boot | FlowState::StageIntro => {
                    halted = Some(format!("flow halted in {}", flow.state()));
                    break;
                }
            }
        }

        Ok(SimulationSummary {
            seed,
            strategy: plan.strategy,
            final_state: flow.state(),
            counters: flow.counters(),
            levels_completed,
            picks,
            level_count: self.assets.level_count(),
            final_level_index: flow.catalog().current_index(),
            start_balance,
            final_balance: flow.ledger().balance(),
            reward_per_level: self.assets.config().economy.reward_per_level,
            events,
            transcript: presentation.calls(),
            cues_played: cues.played(),
            halted,
        })
    }
}
