//! Collaborator contracts consumed by the progression core.
//!
//! Rendering, tweening, and animation playback live outside this crate.
//! The core only needs to open and close panels, show which asset sits in
//! which slot, and await named sequences to finish.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::constants::MAX_DELAY_SECS;
use crate::data::AssetRef;

/// A suspension point: completes when the awaited presentation step is done.
pub type StepFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A step that is already complete.
#[must_use]
pub fn ready_step() -> StepFuture {
    Box::pin(std::future::ready(()))
}

/// Whether `secs` is a delay that validation accepts.
#[must_use]
pub fn is_valid_delay(secs: f32) -> bool {
    secs.is_finite() && (0.0..=MAX_DELAY_SECS).contains(&secs)
}

/// Sleep length for an authored delay. `None` when there is nothing to wait
/// for or the value cannot be scheduled.
#[must_use]
pub fn delay_duration(secs: f32) -> Option<Duration> {
    if secs <= 0.0 || !is_valid_delay(secs) {
        return None;
    }
    Duration::try_from_secs_f32(secs).ok()
}

/// A step that completes after `secs` of wall-clock time.
///
/// Delays outside the accepted range are logged and complete immediately.
#[must_use]
pub fn delay_step(secs: f32) -> StepFuture {
    match delay_duration(secs) {
        Some(delay) => Box::pin(tokio::time::sleep(delay)),
        None => {
            if !is_valid_delay(secs) {
                log::warn!("delay of {secs}s cannot be scheduled; skipping it");
            }
            ready_step()
        }
    }
}

/// Panels the presentation layer manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelKind {
    Loading,
    GamePlay,
    Win,
    Fail,
    Message,
}

impl PanelKind {
    /// Result-bearing panels closed on every stage entry.
    pub const STAGE_PANELS: [Self; 3] = [Self::GamePlay, Self::Win, Self::Fail];
}

impl fmt::Display for PanelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::GamePlay => write!(f, "gameplay"),
            Self::Win => write!(f, "win"),
            Self::Fail => write!(f, "fail"),
            Self::Message => write!(f, "message"),
        }
    }
}

/// UI-facing position of a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceSlot {
    First,
    Second,
}

impl ChoiceSlot {
    pub const ALL: [Self; 2] = [Self::First, Self::Second];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

impl TryFrom<usize> for ChoiceSlot {
    type Error = usize;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::First),
            1 => Ok(Self::Second),
            other => Err(other),
        }
    }
}

/// Which asset is shown in each slot for the current stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBinding {
    pub first: AssetRef,
    pub second: AssetRef,
}

impl SlotBinding {
    #[must_use]
    pub const fn asset(&self, slot: ChoiceSlot) -> &AssetRef {
        match slot {
            ChoiceSlot::First => &self.first,
            ChoiceSlot::Second => &self.second,
        }
    }
}

/// Request for the pick animation: move to center, then mark right/wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRequest {
    pub slot: ChoiceSlot,
    pub is_win: bool,
    pub background: Option<AssetRef>,
}

/// Panel and HUD surface driven by the progression controller.
pub trait Presentation {
    fn open_panel(&mut self, kind: PanelKind);

    fn close_panel_immediately(&mut self, kind: PanelKind);

    fn close_panel_after(&mut self, kind: PanelKind, seconds: f32);

    /// Show the stage's assets in their slots.
    fn bind_choice_slots(&mut self, binding: &SlotBinding);

    /// Enable or disable both choice affordances.
    fn set_input_enabled(&mut self, enabled: bool);

    /// Play the pick sequence. `None` means the slot visuals are not bound and
    /// the step is skipped.
    fn play_choice_result_sequence(&mut self, request: &RevealRequest) -> Option<StepFuture>;

    fn set_level_info(&mut self, current: usize, next: usize);

    fn set_stage_progress(&mut self, done: usize, total: usize);

    /// Global animation time scale; `0.0` freezes presentation timing.
    fn set_time_scale(&mut self, scale: f32);
}

/// Named animation cue playback.
pub trait CueSurface {
    fn has_cue(&self, name: &str) -> bool;

    /// Start `name`; the returned step completes when the cue finishes.
    fn play_named(&mut self, name: &str) -> StepFuture;
}
