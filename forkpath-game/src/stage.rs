//! A single binary-choice encounter and its choice-resolution protocol.
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::branch::{BranchContext, RouteTag};
use crate::data::{AssetRef, Choice, StageBlueprint};
use crate::presentation::{
    ChoiceSlot, CueSurface, Presentation, RevealRequest, SlotBinding, StepFuture, delay_step,
    ready_step,
};

/// Lifecycle of one stage activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    Idle,
    IntroPlaying,
    InputArmed,
    Resolving,
    ResultDelivered,
}

/// Errors that stop a stage from being prepared.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("stage `{title}` has no presentation bound")]
    PresentationUnbound { title: String },
    #[error("stage `{title}` is not active")]
    Inactive { title: String },
}

/// Result delivered to whoever prepared the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    /// Flow epoch the stage was prepared under.
    pub epoch: u64,
    pub stage_index: usize,
    pub is_win: bool,
}

/// Result callback handed to [`StageUnit::prepare`].
#[derive(Debug, Clone)]
pub struct ResultSink {
    tx: UnboundedSender<StageReport>,
    epoch: u64,
    stage_index: usize,
}

impl ResultSink {
    #[must_use]
    pub const fn new(tx: UnboundedSender<StageReport>, epoch: u64, stage_index: usize) -> Self {
        Self {
            tx,
            epoch,
            stage_index,
        }
    }

    /// Sink plus the receiving end, for standalone use.
    #[must_use]
    pub fn channel(epoch: u64, stage_index: usize) -> (Self, UnboundedReceiver<StageReport>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(tx, epoch, stage_index), rx)
    }

    fn send(&self, is_win: bool) {
        let report = StageReport {
            epoch: self.epoch,
            stage_index: self.stage_index,
            is_win,
        };
        if self.tx.send(report).is_err() {
            log::debug!("stage result receiver dropped; discarding {report:?}");
        }
    }
}

/// Fair assignment of the two authored choices to UI slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlotLayout {
    swapped: bool,
}

impl SlotLayout {
    #[must_use]
    pub const fn new(swapped: bool) -> Self {
        Self { swapped }
    }

    /// Coin flip between `(A, B)` and `(B, A)`.
    pub fn flip(rng: &mut impl Rng) -> Self {
        Self::new(rng.gen_bool(0.5))
    }

    #[must_use]
    pub const fn is_swapped(self) -> bool {
        self.swapped
    }

    /// Authored choice mapped to `slot`.
    #[must_use]
    pub const fn choice<'a>(self, blueprint: &'a StageBlueprint, slot: ChoiceSlot) -> &'a Choice {
        match (slot, self.swapped) {
            (ChoiceSlot::First, false) | (ChoiceSlot::Second, true) => &blueprint.choice_a,
            (ChoiceSlot::Second, false) | (ChoiceSlot::First, true) => &blueprint.choice_b,
        }
    }
}

/// Outcome of a pick, fixed at the moment of the click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub slot: ChoiceSlot,
    pub is_win: bool,
    pub next_route: RouteTag,
    pub background: Option<AssetRef>,
}

/// Runtime instance of a [`StageBlueprint`].
#[derive(Debug, Clone)]
pub struct StageUnit {
    blueprint: StageBlueprint,
    active: bool,
    presentation_bound: bool,
    layout: Option<SlotLayout>,
    sink: Option<ResultSink>,
    resolution: Option<Resolution>,
    locked: bool,
    result_delivered: bool,
    phase: StagePhase,
}

impl StageUnit {
    #[must_use]
    pub const fn new(blueprint: StageBlueprint) -> Self {
        Self {
            blueprint,
            active: false,
            presentation_bound: false,
            layout: None,
            sink: None,
            resolution: None,
            locked: false,
            result_delivered: false,
            phase: StagePhase::Idle,
        }
    }

    #[must_use]
    pub const fn blueprint(&self) -> &StageBlueprint {
        &self.blueprint
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.blueprint.title
    }

    #[must_use]
    pub const fn phase(&self) -> StagePhase {
        self.phase
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub const fn result_delivered(&self) -> bool {
        self.result_delivered
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn layout(&self) -> Option<SlotLayout> {
        self.layout
    }

    #[must_use]
    pub const fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    /// UI slot currently holding the winning choice, if any.
    #[must_use]
    pub fn winning_slot(&self) -> Option<ChoiceSlot> {
        let layout = self.layout?;
        ChoiceSlot::ALL
            .into_iter()
            .find(|slot| layout.choice(&self.blueprint, *slot).is_winning)
    }

    pub(crate) fn activate(&mut self) {
        self.active = true;
        self.reset();
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
        self.presentation_bound = false;
        self.reset();
    }

    fn reset(&mut self) {
        self.layout = None;
        self.sink = None;
        self.resolution = None;
        self.locked = false;
        self.result_delivered = false;
        self.phase = StagePhase::Idle;
    }

    /// Attach the gameplay presentation; required before [`Self::prepare`].
    pub fn bind_presentation(&mut self) {
        self.presentation_bound = true;
    }

    /// Bind the result sink, clear guards, and pick the slot layout.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the stage idle, if no presentation is bound
    /// or the stage is not the active one.
    pub fn prepare(
        &mut self,
        on_result: ResultSink,
        rng: &mut impl Rng,
        shuffle: bool,
    ) -> Result<SlotBinding, StageError> {
        self.reset();
        if !self.active {
            return Err(StageError::Inactive {
                title: self.blueprint.title.clone(),
            });
        }
        if !self.presentation_bound {
            return Err(StageError::PresentationUnbound {
                title: self.blueprint.title.clone(),
            });
        }

        let layout = if shuffle {
            SlotLayout::flip(rng)
        } else {
            SlotLayout::default()
        };
        self.layout = Some(layout);
        self.sink = Some(on_result);

        Ok(SlotBinding {
            first: layout.choice(&self.blueprint, ChoiceSlot::First).image.clone(),
            second: layout
                .choice(&self.blueprint, ChoiceSlot::Second)
                .image
                .clone(),
        })
    }

    /// Start the intro: the route's intro cue, or an idle fallback.
    pub fn run_intro(
        &mut self,
        route: RouteTag,
        cues: &mut dyn CueSurface,
        fallback_secs: f32,
    ) -> StepFuture {
        self.phase = StagePhase::IntroPlaying;
        match self.blueprint.cues_for(route).intro {
            Some(name) if cues.has_cue(&name) => cues.play_named(&name),
            Some(name) => {
                log::warn!(
                    "stage `{}`: intro cue `{name}` missing; continuing",
                    self.blueprint.title
                );
                ready_step()
            }
            None => delay_step(self.blueprint.intro_fallback_secs.unwrap_or(fallback_secs)),
        }
    }

    /// Make both choices clickable.
    pub fn arm_input(&mut self) {
        self.locked = false;
        if self.layout.is_some() && !self.result_delivered {
            self.phase = StagePhase::InputArmed;
        }
    }

    /// Resolve a pick. Returns `None` when the pick is ignored.
    pub fn choose(&mut self, slot: ChoiceSlot, ctx: &mut BranchContext) -> Option<Resolution> {
        if self.locked || self.result_delivered {
            log::trace!("stage `{}`: ignoring repeated pick", self.blueprint.title);
            return None;
        }
        let Some(layout) = self.layout else {
            log::trace!("stage `{}`: pick before prepare", self.blueprint.title);
            return None;
        };
        if self.phase != StagePhase::InputArmed {
            log::trace!(
                "stage `{}`: pick while {:?}",
                self.blueprint.title,
                self.phase
            );
            return None;
        }
        self.locked = true;
        self.phase = StagePhase::Resolving;

        let choice = layout.choice(&self.blueprint, slot);
        let is_win = choice.is_winning;
        ctx.record_choice(slot.index(), choice.next_route);

        let resolution = Resolution {
            slot,
            is_win,
            next_route: choice.next_route,
            background: self.blueprint.background(is_win).cloned(),
        };
        self.resolution = Some(resolution.clone());
        Some(resolution)
    }

    /// Move-to-center and reveal; skipped when the slots are not bound.
    pub fn reveal(&self, presentation: &mut dyn Presentation) -> StepFuture {
        let Some(resolution) = &self.resolution else {
            return ready_step();
        };
        let request = RevealRequest {
            slot: resolution.slot,
            is_win: resolution.is_win,
            background: resolution.background.clone(),
        };
        presentation
            .play_choice_result_sequence(&request)
            .unwrap_or_else(|| {
                log::warn!(
                    "stage `{}`: choice visuals unbound; skipping reveal",
                    self.blueprint.title
                );
                ready_step()
            })
    }

    /// Result cue for the resolved outcome under `route`, if the surface has it.
    #[must_use]
    pub fn result_cue(&self, route: RouteTag, cues: &dyn CueSurface) -> Option<String> {
        let resolution = self.resolution.as_ref()?;
        let set = self.blueprint.cues_for(route);
        let name = set.result(resolution.is_win)?;
        if cues.has_cue(name) {
            Some(name.to_string())
        } else {
            log::warn!(
                "stage `{}`: result cue `{name}` missing; completing immediately",
                self.blueprint.title
            );
            None
        }
    }

    /// Fire the result callback. Only the first call per activation delivers.
    pub fn complete_resolution(&mut self) -> bool {
        if self.result_delivered {
            return false;
        }
        let Some(resolution) = &self.resolution else {
            return false;
        };
        self.result_delivered = true;
        self.phase = StagePhase::ResultDelivered;
        if let Some(sink) = &self.sink {
            sink.send(resolution.is_win);
        }
        true
    }
}
