//! In-memory collaborators for running the controller without a front end.
//!
//! Used by the headless tester and by tests. Every handle is cheap to clone
//! and clones share the same transcript, so a caller can keep one copy while
//! the controller owns another.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::constants::TIME_SCALE_RUNNING;
use crate::presentation::{
    CueSurface, PanelKind, Presentation, RevealRequest, SlotBinding, StepFuture, delay_step,
};
use crate::vfx::{EffectSurface, VfxMoment, VfxRule};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One call observed by [`RecordingPresentation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationCall {
    Open(PanelKind),
    Close(PanelKind),
    CloseAfter(PanelKind, f32),
    BindSlots(SlotBinding),
    InputEnabled(bool),
    Reveal(RevealRequest),
    LevelInfo { current: usize, next: usize },
    StageProgress { done: usize, total: usize },
    TimeScale(f32),
}

#[derive(Debug)]
struct PresentationInner {
    calls: Vec<PresentationCall>,
    open: Vec<PanelKind>,
    reveal_secs: f32,
    slots_bound: bool,
    input_enabled: bool,
    time_scale: f32,
}

/// Presentation surface that records every call.
#[derive(Debug, Clone)]
pub struct RecordingPresentation {
    inner: Arc<Mutex<PresentationInner>>,
}

impl Default for RecordingPresentation {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPresentation {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PresentationInner {
                calls: Vec::new(),
                open: Vec::new(),
                reveal_secs: 0.0,
                slots_bound: true,
                input_enabled: false,
                time_scale: TIME_SCALE_RUNNING,
            })),
        }
    }

    /// Make the pick sequence take `secs`.
    #[must_use]
    pub fn with_reveal_secs(self, secs: f32) -> Self {
        lock(&self.inner).reveal_secs = secs;
        self
    }

    /// Simulate missing slot visuals: the pick sequence is skipped.
    #[must_use]
    pub fn without_slot_visuals(self) -> Self {
        lock(&self.inner).slots_bound = false;
        self
    }

    #[must_use]
    pub fn calls(&self) -> Vec<PresentationCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.inner).calls.clear();
    }

    #[must_use]
    pub fn open_panels(&self) -> Vec<PanelKind> {
        lock(&self.inner).open.clone()
    }

    #[must_use]
    pub fn is_open(&self, kind: PanelKind) -> bool {
        lock(&self.inner).open.contains(&kind)
    }

    #[must_use]
    pub fn input_enabled(&self) -> bool {
        lock(&self.inner).input_enabled
    }

    #[must_use]
    pub fn time_scale(&self) -> f32 {
        lock(&self.inner).time_scale
    }

    /// Most recent slot binding shown to the player.
    #[must_use]
    pub fn slots(&self) -> Option<SlotBinding> {
        lock(&self.inner).calls.iter().rev().find_map(|call| match call {
            PresentationCall::BindSlots(binding) => Some(binding.clone()),
            _ => None,
        })
    }

    fn record(&self, call: PresentationCall) {
        lock(&self.inner).calls.push(call);
    }

    fn close(&self, kind: PanelKind) {
        lock(&self.inner).open.retain(|open| *open != kind);
    }
}

impl Presentation for RecordingPresentation {
    fn open_panel(&mut self, kind: PanelKind) {
        {
            let mut inner = lock(&self.inner);
            if !inner.open.contains(&kind) {
                inner.open.push(kind);
            }
        }
        self.record(PresentationCall::Open(kind));
    }

    fn close_panel_immediately(&mut self, kind: PanelKind) {
        self.close(kind);
        self.record(PresentationCall::Close(kind));
    }

    fn close_panel_after(&mut self, kind: PanelKind, seconds: f32) {
        // Headless: no fade, the panel is gone once the timer is scheduled.
        self.close(kind);
        self.record(PresentationCall::CloseAfter(kind, seconds));
    }

    fn bind_choice_slots(&mut self, binding: &SlotBinding) {
        self.record(PresentationCall::BindSlots(binding.clone()));
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        lock(&self.inner).input_enabled = enabled;
        self.record(PresentationCall::InputEnabled(enabled));
    }

    fn play_choice_result_sequence(&mut self, request: &RevealRequest) -> Option<StepFuture> {
        let (bound, secs) = {
            let inner = lock(&self.inner);
            (inner.slots_bound, inner.reveal_secs)
        };
        if !bound {
            return None;
        }
        self.record(PresentationCall::Reveal(request.clone()));
        Some(delay_step(secs))
    }

    fn set_level_info(&mut self, current: usize, next: usize) {
        self.record(PresentationCall::LevelInfo { current, next });
    }

    fn set_stage_progress(&mut self, done: usize, total: usize) {
        self.record(PresentationCall::StageProgress { done, total });
    }

    fn set_time_scale(&mut self, scale: f32) {
        lock(&self.inner).time_scale = scale;
        self.record(PresentationCall::TimeScale(scale));
    }
}

#[derive(Debug, Default)]
struct CueInner {
    durations: BTreeMap<String, f32>,
    played: Vec<String>,
}

/// Cue surface with a fixed set of named cues and durations.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCues {
    inner: Arc<Mutex<CueInner>>,
}

impl ScriptedCues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cue(self, name: impl Into<String>, secs: f32) -> Self {
        lock(&self.inner).durations.insert(name.into(), secs);
        self
    }

    /// Cue names in play order.
    #[must_use]
    pub fn played(&self) -> Vec<String> {
        lock(&self.inner).played.clone()
    }
}

impl CueSurface for ScriptedCues {
    fn has_cue(&self, name: &str) -> bool {
        lock(&self.inner).durations.contains_key(name)
    }

    fn play_named(&mut self, name: &str) -> StepFuture {
        let secs = {
            let mut inner = lock(&self.inner);
            inner.played.push(name.to_string());
            inner.durations.get(name).copied().unwrap_or(0.0)
        };
        delay_step(secs)
    }
}

/// Effect surface that records spawned effects.
#[derive(Debug, Default)]
pub struct RecordingEffects {
    spawned: Mutex<Vec<(VfxMoment, String)>>,
    clears: Mutex<usize>,
}

impl RecordingEffects {
    #[must_use]
    pub fn spawned(&self) -> Vec<(VfxMoment, String)> {
        lock(&self.spawned).clone()
    }

    #[must_use]
    pub fn clear_count(&self) -> usize {
        *lock(&self.clears)
    }
}

impl EffectSurface for RecordingEffects {
    fn spawn(&self, rule: &VfxRule) {
        lock(&self.spawned).push((rule.moment, rule.effect.clone()));
    }

    fn clear_all(&self) {
        *lock(&self.clears) += 1;
    }
}
