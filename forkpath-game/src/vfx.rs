//! Moment-driven visual effect rules.
//!
//! Stages fire [`VfxMoment`]s as their cues start and finish. The
//! [`VfxDirector`] matches them against the stage's rules and asks an
//! [`EffectSurface`] to spawn each effect, optionally after a delay.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::presentation::delay_duration;

/// Points in a stage's cue timeline that may trigger effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VfxMoment {
    IntroStart,
    IntroComplete,
    WinStart,
    WinComplete,
    LoseStart,
    LoseComplete,
}

impl VfxMoment {
    #[must_use]
    pub const fn result_start(is_win: bool) -> Self {
        if is_win { Self::WinStart } else { Self::LoseStart }
    }

    #[must_use]
    pub const fn result_complete(is_win: bool) -> Self {
        if is_win {
            Self::WinComplete
        } else {
            Self::LoseComplete
        }
    }
}

/// Coordinate space an effect spawns into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VfxSpace {
    #[default]
    Ui,
    World,
}

/// One effect bound to a moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VfxRule {
    pub moment: VfxMoment,
    pub effect: String,
    #[serde(default)]
    pub delay_secs: f32,
    #[serde(default)]
    pub space: VfxSpace,
    /// UI anchored position (x, y) or world position (x, y, z).
    #[serde(default)]
    pub position: [f32; 3],
    /// Name of a transform to follow instead of the fixed position.
    #[serde(default)]
    pub follow: Option<String>,
}

/// Collaborator that actually instantiates effects.
pub trait EffectSurface {
    fn spawn(&self, rule: &VfxRule);

    /// Destroy every effect spawned so far.
    fn clear_all(&self);
}

pub type SharedEffectSurface = Arc<dyn EffectSurface + Send + Sync>;

/// Dispatches stage moments to effect rules.
///
/// Each [`VfxDirector::bind`] starts a new run: delayed spawns scheduled by
/// an earlier run are aborted and never reach the surface.
#[derive(Default)]
pub struct VfxDirector {
    surface: Option<SharedEffectSurface>,
    rules: Vec<VfxRule>,
    run_id: u64,
    running: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for VfxDirector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VfxDirector")
            .field("has_surface", &self.surface.is_some())
            .field("rules", &self.rules.len())
            .field("run_id", &self.run_id)
            .field("running", &self.running.len())
            .finish()
    }
}

impl VfxDirector {
    #[must_use]
    pub fn new(surface: Option<SharedEffectSurface>) -> Self {
        Self {
            surface,
            ..Self::default()
        }
    }

    pub fn set_surface(&mut self, surface: Option<SharedEffectSurface>) {
        self.clear();
        self.surface = surface;
    }

    /// Start a new run with `rules`, dropping everything from the last one.
    pub fn bind(&mut self, rules: Vec<VfxRule>) {
        self.clear();
        self.run_id = self.run_id.wrapping_add(1);
        self.rules = rules;
    }

    /// Abort pending delayed spawns and destroy spawned effects.
    pub fn clear(&mut self) {
        for handle in self.running.drain(..) {
            handle.abort();
        }
        if let Some(surface) = &self.surface {
            surface.clear_all();
        }
    }

    #[must_use]
    pub const fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Fire `moment`, spawning every matching rule.
    pub fn emit(&mut self, moment: VfxMoment) {
        let Some(surface) = self.surface.clone() else {
            return;
        };
        self.running.retain(|handle| !handle.is_finished());

        for rule in self.rules.iter().filter(|rule| rule.moment == moment) {
            if rule.effect.is_empty() {
                continue;
            }
            if rule.delay_secs <= 0.0 {
                surface.spawn(rule);
                continue;
            }
            let Ok(runtime) = Handle::try_current() else {
                log::warn!(
                    "no async runtime; dropping delayed effect `{}` for {moment:?}",
                    rule.effect
                );
                continue;
            };
            let Some(delay) = delay_duration(rule.delay_secs) else {
                log::warn!(
                    "effect `{}` has unusable delay {}s; skipping it",
                    rule.effect,
                    rule.delay_secs
                );
                continue;
            };
            let surface = Arc::clone(&surface);
            let rule = rule.clone();
            self.running.push(runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                surface.spawn(&rule);
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        spawned: Mutex<Vec<String>>,
        clears: Mutex<usize>,
    }

    impl EffectSurface for Recorder {
        fn spawn(&self, rule: &VfxRule) {
            self.spawned.lock().unwrap().push(rule.effect.clone());
        }

        fn clear_all(&self) {
            *self.clears.lock().unwrap() += 1;
        }
    }

    fn rule(moment: VfxMoment, effect: &str, delay_secs: f32) -> VfxRule {
        VfxRule {
            moment,
            effect: effect.to_string(),
            delay_secs,
            space: VfxSpace::Ui,
            position: [0.0; 3],
            follow: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_and_delayed_rules_spawn_for_matching_moment() {
        let recorder = Arc::new(Recorder::default());
        let mut director = VfxDirector::new(Some(recorder.clone()));
        director.bind(vec![
            rule(VfxMoment::WinStart, "confetti", 0.0),
            rule(VfxMoment::WinStart, "sparkle", 0.5),
            rule(VfxMoment::LoseStart, "smoke", 0.0),
        ]);

        director.emit(VfxMoment::WinStart);
        assert_eq!(*recorder.spawned.lock().unwrap(), vec!["confetti"]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            *recorder.spawned.lock().unwrap(),
            vec!["confetti", "sparkle"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rebinding_aborts_pending_spawns_from_previous_run() {
        let recorder = Arc::new(Recorder::default());
        let mut director = VfxDirector::new(Some(recorder.clone()));
        director.bind(vec![rule(VfxMoment::IntroStart, "dust", 0.5)]);
        let first_run = director.run_id();
        director.emit(VfxMoment::IntroStart);

        director.bind(Vec::new());
        assert_ne!(director.run_id(), first_run);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(recorder.spawned.lock().unwrap().is_empty());
        assert!(*recorder.clears.lock().unwrap() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unschedulable_delays_are_skipped() {
        let recorder = Arc::new(Recorder::default());
        let mut director = VfxDirector::new(Some(recorder.clone()));
        director.bind(vec![
            rule(VfxMoment::IntroStart, "forever", f32::INFINITY),
            rule(VfxMoment::IntroStart, "nan", f32::NAN),
            rule(VfxMoment::IntroStart, "dust", 0.5),
        ]);

        director.emit(VfxMoment::IntroStart);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*recorder.spawned.lock().unwrap(), vec!["dust"]);
    }

    #[test]
    fn director_without_surface_is_inert() {
        let mut director = VfxDirector::new(None);
        director.bind(vec![rule(VfxMoment::WinComplete, "stars", 0.0)]);
        director.emit(VfxMoment::WinComplete);
        assert_eq!(VfxMoment::result_start(false), VfxMoment::LoseStart);
        assert_eq!(VfxMoment::result_complete(true), VfxMoment::WinComplete);
    }
}
