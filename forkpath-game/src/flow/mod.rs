//! Progression controller: the level and stage state machine.
//!
//! The controller owns one logical timeline. Each suspension point (loading
//! delay, intro cue, reveal sequence, result cue) is held as a single
//! [`StepFuture`] tagged with the flow epoch that created it. Starting a new
//! stage flow drops the pending step and bumps the epoch, so a superseded
//! flow can never deliver a result. Transitions between suspension points
//! run synchronously inside [`ProgressionController::step`] or the command
//! loop in [`ProgressionController::run`].
pub mod connectivity;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::branch::BranchContext;
use crate::catalog::LevelCatalog;
use crate::config::FlowConfig;
use crate::constants::{TIME_SCALE_PAUSED, TIME_SCALE_RUNNING};
use crate::economy::EconomyLedger;
use crate::presentation::{
    ChoiceSlot, CueSurface, PanelKind, Presentation, StepFuture, delay_step,
};
use crate::stage::{ResultSink, StageReport, StageUnit};
use crate::storage::KeyValueStore;
use crate::vfx::{SharedEffectSurface, VfxDirector, VfxMoment};

pub use connectivity::{
    ConnectivityChange, ConnectivityProbe, ConnectivityWatch, watch_connectivity,
};

/// Global flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Boot,
    StageIntro,
    Gameplay,
    Win,
    Fail,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "boot"),
            Self::StageIntro => write!(f, "stage-intro"),
            Self::Gameplay => write!(f, "gameplay"),
            Self::Win => write!(f, "win"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Inputs accepted by [`ProgressionController::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Boot,
    Choose(ChoiceSlot),
    RetryStage,
    RetryLevel,
    AdvanceLevel,
    Pause,
    Resume,
    Connectivity(bool),
    Shutdown,
}

/// Running totals for one controller lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCounters {
    pub stages_cleared: u32,
    pub stages_failed: u32,
    pub levels_won: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    LoadingElapsed { index: usize },
    IntroFinished { index: usize },
    RevealFinished,
    ResultCueFinished { is_win: bool },
}

struct PendingStep {
    epoch: u64,
    next: StepKind,
    future: StepFuture,
}

enum Wake {
    Command(Option<Command>),
    StepDone,
}

async fn poll_pending(pending: &mut Option<PendingStep>) {
    match pending {
        Some(step) => (&mut step.future).await,
        None => std::future::pending().await,
    }
}

fn live_stage<S: KeyValueStore>(catalog: &mut LevelCatalog<S>) -> Option<&mut StageUnit> {
    catalog.live_level_mut()?.active_stage_mut()
}

pub type BoxedPresentation = Box<dyn Presentation + Send>;
pub type BoxedCues = Box<dyn CueSurface + Send>;

/// Orchestrates boot, stage flow, results, retries, and level advance.
pub struct ProgressionController<S> {
    catalog: LevelCatalog<S>,
    ledger: EconomyLedger<S>,
    presentation: BoxedPresentation,
    cues: BoxedCues,
    vfx: VfxDirector,
    config: FlowConfig,
    rng: ChaCha20Rng,
    state: FlowState,
    stage_index: usize,
    branch: BranchContext,
    epoch: u64,
    pending: Option<PendingStep>,
    results_tx: mpsc::UnboundedSender<StageReport>,
    results_rx: mpsc::UnboundedReceiver<StageReport>,
    reward_claimed: bool,
    paused: bool,
    connectivity: ConnectivityWatch,
    counters: FlowCounters,
}

impl<S> fmt::Debug for ProgressionController<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressionController")
            .field("state", &self.state)
            .field("stage_index", &self.stage_index)
            .field("branch", &self.branch)
            .field("epoch", &self.epoch)
            .field("pending", &self.pending.as_ref().map(|step| step.next))
            .field("paused", &self.paused)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl<S: KeyValueStore> ProgressionController<S> {
    #[must_use]
    pub fn new(
        catalog: LevelCatalog<S>,
        ledger: EconomyLedger<S>,
        presentation: BoxedPresentation,
        cues: BoxedCues,
        config: FlowConfig,
        seed: u64,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            catalog,
            ledger,
            presentation,
            cues,
            vfx: VfxDirector::default(),
            config,
            rng: ChaCha20Rng::seed_from_u64(seed),
            state: FlowState::Boot,
            stage_index: 0,
            branch: BranchContext::new(),
            epoch: 0,
            pending: None,
            results_tx,
            results_rx,
            reward_claimed: false,
            paused: false,
            connectivity: ConnectivityWatch::new(),
            counters: FlowCounters::default(),
        }
    }

    /// Attach an effect surface for stage VFX rules.
    #[must_use]
    pub fn with_effects(mut self, surface: SharedEffectSurface) -> Self {
        self.vfx.set_surface(Some(surface));
        self
    }

    #[must_use]
    pub const fn state(&self) -> FlowState {
        self.state
    }

    #[must_use]
    pub const fn stage_index(&self) -> usize {
        self.stage_index
    }

    #[must_use]
    pub const fn branch(&self) -> &BranchContext {
        &self.branch
    }

    #[must_use]
    pub const fn ledger(&self) -> &EconomyLedger<S> {
        &self.ledger
    }

    pub const fn ledger_mut(&mut self) -> &mut EconomyLedger<S> {
        &mut self.ledger
    }

    #[must_use]
    pub const fn catalog(&self) -> &LevelCatalog<S> {
        &self.catalog
    }

    #[must_use]
    pub const fn counters(&self) -> FlowCounters {
        self.counters
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub const fn is_offline(&self) -> bool {
        self.connectivity.is_offline()
    }

    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether a suspension point is waiting to complete.
    #[must_use]
    pub const fn has_pending_step(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of stages in the live level, zero when none is loaded.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.catalog.live_level().map_or(0, |level| level.stage_count())
    }

    #[must_use]
    pub fn active_stage(&self) -> Option<&StageUnit> {
        let level = self.catalog.live_level()?;
        level.stage(level.active_index()?)
    }

    fn set_state(&mut self, next: FlowState) {
        if self.state != next {
            log::debug!("flow {} -> {next}", self.state);
        }
        self.state = next;
    }

    /// Abandon the in-flight stage flow without delivering its result.
    fn cancel_flow(&mut self) {
        if let Some(step) = self.pending.take() {
            log::trace!("cancelling pending {:?} (epoch {})", step.next, step.epoch);
        }
        self.epoch = self.epoch.wrapping_add(1);
        while self.results_rx.try_recv().is_ok() {}
    }

    fn close_stage_panels(&mut self) {
        for kind in PanelKind::STAGE_PANELS {
            self.presentation.close_panel_immediately(kind);
        }
    }

    fn reset_playthrough(&mut self) {
        self.stage_index = 0;
        self.branch = BranchContext::new();
        self.reward_claimed = false;
    }

    /// Load the saved level and start its first stage.
    pub fn boot(&mut self) {
        self.cancel_flow();
        self.set_state(FlowState::Boot);
        self.close_stage_panels();
        if self.catalog.load_current().is_none() {
            log::error!("boot halted: current level could not be loaded");
            return;
        }
        self.reset_playthrough();
        self.begin_stage_flow(0, self.config.boot_loading_secs);
    }

    /// Cancel any in-flight flow, then enter `index` after `loading_secs`.
    fn begin_stage_flow(&mut self, index: usize, loading_secs: f32) {
        self.cancel_flow();
        if loading_secs > 0.0 && loading_secs.is_finite() {
            self.set_state(FlowState::StageIntro);
            self.presentation.open_panel(PanelKind::Loading);
            self.presentation
                .close_panel_after(PanelKind::Loading, loading_secs);
            self.pending = Some(PendingStep {
                epoch: self.epoch,
                next: StepKind::LoadingElapsed { index },
                future: delay_step(loading_secs),
            });
        } else {
            self.enter_stage(index);
        }
    }

    fn enter_stage(&mut self, index: usize) {
        self.set_state(FlowState::StageIntro);
        self.close_stage_panels();
        self.presentation.set_input_enabled(false);

        let Some(level) = self.catalog.live_level_mut() else {
            log::error!("stage flow halted: no live level");
            return;
        };
        let total = level.stage_count();
        let Some(stage) = level.activate(index) else {
            log::error!("stage flow halted: cannot activate stage {index}");
            return;
        };
        stage.bind_presentation();
        let sink = ResultSink::new(self.results_tx.clone(), self.epoch, index);
        let binding = match stage.prepare(sink, &mut self.rng, self.config.shuffle_choices) {
            Ok(binding) => binding,
            Err(err) => {
                log::error!("stage flow halted: {err}");
                return;
            }
        };
        self.vfx.bind(stage.blueprint().vfx.clone());
        let intro = stage.run_intro(
            self.branch.route(),
            &mut *self.cues,
            self.config.intro_fallback_secs,
        );

        self.presentation.bind_choice_slots(&binding);
        self.presentation.set_level_info(
            self.catalog.current_index() + 1,
            self.catalog.next_index() + 1,
        );
        self.presentation.set_stage_progress(index, total);
        self.vfx.emit(VfxMoment::IntroStart);
        log::debug!(
            "entered stage {index}/{total} of level {} (route {})",
            self.catalog.current_index(),
            self.branch.route()
        );
        self.pending = Some(PendingStep {
            epoch: self.epoch,
            next: StepKind::IntroFinished { index },
            future: intro,
        });
    }

    fn arm_gameplay(&mut self, index: usize) {
        self.vfx.emit(VfxMoment::IntroComplete);
        let Some(stage) = live_stage(&mut self.catalog) else {
            log::error!("intro finished for stage {index} but no stage is live");
            return;
        };
        stage.arm_input();
        self.set_state(FlowState::Gameplay);
        self.presentation.open_panel(PanelKind::GamePlay);
        self.presentation.set_input_enabled(true);
    }

    /// Player picked `slot`. Returns `false` when the pick is ignored.
    pub fn choose(&mut self, slot: ChoiceSlot) -> bool {
        if self.state != FlowState::Gameplay {
            log::trace!("pick {slot:?} ignored in {}", self.state);
            return false;
        }
        let Some(stage) = live_stage(&mut self.catalog) else {
            return false;
        };
        let Some(resolution) = stage.choose(slot, &mut self.branch) else {
            return false;
        };
        log::debug!(
            "stage {} picked {slot:?}: win={} route={}",
            self.stage_index,
            resolution.is_win,
            self.branch.route()
        );
        self.presentation.set_input_enabled(false);
        let reveal = stage.reveal(&mut *self.presentation);
        self.pending = Some(PendingStep {
            epoch: self.epoch,
            next: StepKind::RevealFinished,
            future: reveal,
        });
        true
    }

    fn play_result_cue(&mut self) {
        let route = self.branch.route();
        let Some(stage) = live_stage(&mut self.catalog) else {
            return;
        };
        let Some(is_win) = stage.resolution().map(|r| r.is_win) else {
            return;
        };
        match stage.result_cue(route, &*self.cues) {
            Some(name) => {
                self.vfx.emit(VfxMoment::result_start(is_win));
                self.pending = Some(PendingStep {
                    epoch: self.epoch,
                    next: StepKind::ResultCueFinished { is_win },
                    future: self.cues.play_named(&name),
                });
            }
            None => self.deliver_result(),
        }
    }

    fn deliver_result(&mut self) {
        if let Some(stage) = live_stage(&mut self.catalog) {
            stage.complete_resolution();
        }
        self.drain_results();
    }

    fn drain_results(&mut self) {
        while let Ok(report) = self.results_rx.try_recv() {
            if report.epoch != self.epoch || report.stage_index != self.stage_index {
                log::trace!("dropping stale result {report:?}");
                continue;
            }
            self.on_stage_result(report.is_win);
        }
    }

    /// Act on a stage result. Ignored unless gameplay is live.
    pub fn on_stage_result(&mut self, is_win: bool) {
        if self.state != FlowState::Gameplay {
            log::trace!("result ignored in {}", self.state);
            return;
        }
        if !is_win {
            self.counters.stages_failed += 1;
            self.set_state(FlowState::Fail);
            self.presentation.open_panel(PanelKind::Fail);
            self.presentation
                .close_panel_immediately(PanelKind::GamePlay);
            return;
        }

        self.counters.stages_cleared += 1;
        self.stage_index += 1;
        let total = self.stage_count();
        self.presentation.set_stage_progress(self.stage_index, total);
        if self.stage_index >= total {
            self.counters.levels_won += 1;
            self.set_state(FlowState::Win);
            self.presentation.open_panel(PanelKind::Win);
            self.presentation
                .close_panel_immediately(PanelKind::GamePlay);
            self.claim_reward();
        } else {
            self.begin_stage_flow(self.stage_index, self.config.stage_loading_secs);
        }
    }

    fn claim_reward(&mut self) {
        if self.reward_claimed {
            return;
        }
        self.reward_claimed = true;
        self.ledger.reward_level_complete();
        log::debug!("level reward credited; balance {}", self.ledger.balance());
    }

    /// Replay the failed stage.
    pub fn retry_stage(&mut self) {
        if self.state != FlowState::Fail {
            log::warn!("retry stage ignored in {}", self.state);
            return;
        }
        self.presentation.close_panel_immediately(PanelKind::Fail);
        self.begin_stage_flow(self.stage_index, self.config.stage_loading_secs);
    }

    /// Replay the current level from a fresh instance.
    pub fn retry_level(&mut self) {
        if !matches!(self.state, FlowState::Fail | FlowState::Win) {
            log::warn!("retry level ignored in {}", self.state);
            return;
        }
        self.close_stage_panels();
        self.cancel_flow();
        if self.catalog.replay().is_none() {
            log::error!("retry level halted: level could not be reloaded");
            return;
        }
        self.reset_playthrough();
        self.begin_stage_flow(0, self.config.boot_loading_secs);
    }

    /// Move on to the next level, wrapping after the last one.
    pub fn advance_level(&mut self) {
        if self.state != FlowState::Win {
            log::warn!("advance level ignored in {}", self.state);
            return;
        }
        self.presentation.close_panel_immediately(PanelKind::Win);
        self.cancel_flow();
        self.claim_reward();
        if self.catalog.next().is_none() {
            log::error!("advance halted: next level could not be loaded");
            return;
        }
        self.reset_playthrough();
        self.begin_stage_flow(0, self.config.boot_loading_secs);
    }

    pub fn pause(&mut self) {
        self.paused = true;
        self.presentation.set_time_scale(TIME_SCALE_PAUSED);
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.presentation.set_time_scale(TIME_SCALE_RUNNING);
    }

    /// Feed one reachability observation.
    pub fn on_connectivity(&mut self, online: bool) {
        match self.connectivity.observe(online) {
            Some(ConnectivityChange::Lost) => {
                log::warn!("connectivity lost; pausing");
                self.presentation.open_panel(PanelKind::Message);
                self.pause();
            }
            Some(ConnectivityChange::Restored) => {
                log::info!("connectivity restored; resuming");
                self.presentation
                    .close_panel_immediately(PanelKind::Message);
                self.resume();
            }
            None => {}
        }
    }

    /// Apply one command. Returns `false` on [`Command::Shutdown`].
    pub fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Boot => self.boot(),
            Command::Choose(slot) => {
                self.choose(slot);
            }
            Command::RetryStage => self.retry_stage(),
            Command::RetryLevel => self.retry_level(),
            Command::AdvanceLevel => self.advance_level(),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Connectivity(online) => self.on_connectivity(online),
            Command::Shutdown => return false,
        }
        true
    }

    fn complete_step(&mut self, epoch: u64, next: StepKind) {
        if epoch != self.epoch {
            log::trace!("dropping step {next:?} from epoch {epoch}");
            return;
        }
        match next {
            StepKind::LoadingElapsed { index } => self.enter_stage(index),
            StepKind::IntroFinished { index } => self.arm_gameplay(index),
            StepKind::RevealFinished => self.play_result_cue(),
            StepKind::ResultCueFinished { is_win } => {
                self.vfx.emit(VfxMoment::result_complete(is_win));
                self.deliver_result();
            }
        }
    }

    /// Await the pending suspension point and run the transition after it.
    /// Returns `false` when nothing was pending.
    pub async fn step(&mut self) -> bool {
        let Some(PendingStep {
            epoch,
            next,
            future,
        }) = self.pending.take()
        else {
            return false;
        };
        future.await;
        self.complete_step(epoch, next);
        true
    }

    /// Step until the flow waits on input or reaches a result state.
    pub async fn settle(&mut self) {
        while self.step().await {}
    }

    /// Drive the controller from a command channel until it closes or a
    /// [`Command::Shutdown`] arrives. Returns the controller for inspection.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Self {
        loop {
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                () = poll_pending(&mut self.pending) => Wake::StepDone,
            };
            match wake {
                Wake::Command(Some(command)) => {
                    if !self.apply(command) {
                        break;
                    }
                }
                Wake::Command(None) => break,
                Wake::StepDone => {
                    if let Some(step) = self.pending.take() {
                        self.complete_step(step.epoch, step.next);
                    }
                }
            }
        }
        log::debug!("controller loop stopped in {}", self.state);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogConfig;
    use crate::data::{CatalogData, Choice, CueSet, LevelBlueprint, StageBlueprint};
    use crate::economy::EconomyConfig;
    use crate::headless::{PresentationCall, RecordingPresentation, ScriptedCues};
    use crate::storage::MemoryStore;

    fn two_stage_catalog() -> CatalogData {
        CatalogData::from_levels(vec![LevelBlueprint {
            id: "L0".into(),
            name: String::new(),
            stages: vec![
                StageBlueprint::new("s0", Choice::new("a", true), Choice::new("b", false)),
                StageBlueprint::new("s1", Choice::new("a", false), Choice::new("b", true)),
            ],
        }])
    }

    fn quick_flow() -> FlowConfig {
        FlowConfig {
            shuffle_choices: false,
            intro_fallback_secs: 0.0,
            ..FlowConfig::default()
        }
    }

    fn controller(presentation: RecordingPresentation) -> ProgressionController<MemoryStore> {
        controller_with(two_stage_catalog(), quick_flow(), presentation)
    }

    fn controller_with(
        data: CatalogData,
        config: FlowConfig,
        presentation: RecordingPresentation,
    ) -> ProgressionController<MemoryStore> {
        let store = MemoryStore::new();
        let catalog = LevelCatalog::new(data, store.clone(), &CatalogConfig::default());
        let ledger = EconomyLedger::open(store, EconomyConfig::default()).unwrap();
        ProgressionController::new(
            catalog,
            ledger,
            Box::new(presentation),
            Box::new(ScriptedCues::default()),
            config,
            7,
        )
    }

    #[tokio::test]
    async fn boot_reaches_gameplay_with_hud_updates() {
        let presentation = RecordingPresentation::new();
        let mut flow = controller(presentation.clone());
        flow.boot();
        flow.settle().await;

        assert_eq!(flow.state(), FlowState::Gameplay);
        assert_eq!(flow.stage_index(), 0);
        let calls = presentation.calls();
        assert!(calls.contains(&PresentationCall::LevelInfo { current: 1, next: 1 }));
        assert!(calls.contains(&PresentationCall::StageProgress { done: 0, total: 2 }));
        assert!(calls.contains(&PresentationCall::Open(PanelKind::GamePlay)));
    }

    #[tokio::test]
    async fn picks_outside_gameplay_are_ignored() {
        let mut flow = controller(RecordingPresentation::new());
        assert!(!flow.choose(ChoiceSlot::First));
        flow.boot();
        assert_eq!(flow.state(), FlowState::StageIntro);
        assert!(!flow.choose(ChoiceSlot::First));
    }

    #[tokio::test]
    async fn late_result_after_cancel_is_dropped() {
        let mut flow = controller(RecordingPresentation::new());
        flow.boot();
        flow.settle().await;
        assert!(flow.choose(ChoiceSlot::First));
        assert!(flow.has_pending_step());

        // Superseding flow abandons the reveal before it completes.
        flow.boot();
        flow.settle().await;
        assert_eq!(flow.state(), FlowState::Gameplay);
        assert_eq!(flow.stage_index(), 0);
        assert_eq!(flow.counters(), FlowCounters::default());
    }

    #[tokio::test]
    async fn result_handler_ignores_signals_outside_gameplay() {
        let mut flow = controller(RecordingPresentation::new());
        flow.on_stage_result(true);
        assert_eq!(flow.state(), FlowState::Boot);
        assert_eq!(flow.stage_index(), 0);
    }

    #[tokio::test]
    async fn pause_and_resume_drive_time_scale() {
        let presentation = RecordingPresentation::new();
        let mut flow = controller(presentation.clone());
        flow.pause();
        assert!(flow.is_paused());
        flow.resume();
        assert!(!flow.is_paused());
        assert_eq!(
            presentation.calls(),
            vec![
                PresentationCall::TimeScale(TIME_SCALE_PAUSED),
                PresentationCall::TimeScale(TIME_SCALE_RUNNING),
            ]
        );
    }

    #[tokio::test]
    async fn result_cues_unknown_to_surface_complete_immediately() {
        let mut data = two_stage_catalog();
        for stage in &mut data.levels[0].stages {
            stage.cues = CueSet {
                intro: None,
                win: Some("cheer".into()),
                lose: Some("groan".into()),
            };
        }
        let mut flow = controller_with(data, quick_flow(), RecordingPresentation::new());
        flow.boot();
        flow.settle().await;

        assert!(flow.choose(ChoiceSlot::First));
        flow.settle().await;
        assert_eq!(flow.state(), FlowState::Gameplay);
        assert_eq!(flow.stage_index(), 1);

        assert!(flow.choose(ChoiceSlot::First));
        flow.settle().await;
        assert_eq!(flow.state(), FlowState::Fail);
        assert_eq!(flow.counters().stages_cleared, 1);
        assert_eq!(flow.counters().stages_failed, 1);
    }

    #[tokio::test]
    async fn unschedulable_loading_delay_skips_instead_of_panicking() {
        let config = FlowConfig {
            boot_loading_secs: 1e20,
            stage_loading_secs: f32::INFINITY,
            ..quick_flow()
        };
        let mut flow = controller_with(two_stage_catalog(), config, RecordingPresentation::new());
        flow.boot();
        flow.settle().await;
        assert_eq!(flow.state(), FlowState::Gameplay);

        assert!(flow.choose(ChoiceSlot::First));
        flow.settle().await;
        assert_eq!(flow.state(), FlowState::Gameplay);
        assert_eq!(flow.stage_index(), 1);
    }
}
