use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::branch::RouteTag;
use crate::constants::MAX_DELAY_SECS;
use crate::presentation::is_valid_delay;
use crate::vfx::VfxRule;

/// Opaque handle to an authored asset (sprite, background, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(pub String);

impl AssetRef {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One of the two options a stage offers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub image: AssetRef,
    pub is_winning: bool,
    #[serde(default)]
    pub next_route: RouteTag,
}

impl Choice {
    #[must_use]
    pub fn new(image: impl Into<String>, is_winning: bool) -> Self {
        Self {
            image: AssetRef::new(image),
            is_winning,
            next_route: RouteTag::None,
        }
    }

    #[must_use]
    pub fn routed(mut self, route: RouteTag) -> Self {
        self.next_route = route;
        self
    }
}

/// Named animation cues for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CueSet {
    #[serde(default)]
    pub intro: Option<String>,
    #[serde(default)]
    pub win: Option<String>,
    #[serde(default)]
    pub lose: Option<String>,
}

impl CueSet {
    /// Field-wise overlay: entries in `over` win, gaps fall back to `self`.
    #[must_use]
    pub fn overlay(&self, over: &Self) -> Self {
        Self {
            intro: over.intro.clone().or_else(|| self.intro.clone()),
            win: over.win.clone().or_else(|| self.win.clone()),
            lose: over.lose.clone().or_else(|| self.lose.clone()),
        }
    }

    /// Result cue for an outcome.
    #[must_use]
    pub fn result(&self, is_win: bool) -> Option<&str> {
        if is_win {
            self.win.as_deref()
        } else {
            self.lose.as_deref()
        }
    }
}

/// Cue overrides applied while a given route is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCues {
    pub route: RouteTag,
    pub cues: CueSet,
}

/// Authored definition of a single binary-choice stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageBlueprint {
    #[serde(default)]
    pub title: String,
    pub choice_a: Choice,
    pub choice_b: Choice,
    #[serde(default)]
    pub win_background: Option<AssetRef>,
    #[serde(default)]
    pub fail_background: Option<AssetRef>,
    #[serde(default)]
    pub cues: CueSet,
    #[serde(default)]
    pub route_cues: Vec<RouteCues>,
    #[serde(default)]
    pub vfx: Vec<VfxRule>,
    /// Idle time used when no intro cue is configured.
    #[serde(default)]
    pub intro_fallback_secs: Option<f32>,
}

impl StageBlueprint {
    #[must_use]
    pub fn new(title: impl Into<String>, choice_a: Choice, choice_b: Choice) -> Self {
        Self {
            title: title.into(),
            choice_a,
            choice_b,
            win_background: None,
            fail_background: None,
            cues: CueSet::default(),
            route_cues: Vec::new(),
            vfx: Vec::new(),
            intro_fallback_secs: None,
        }
    }

    /// First authored delay outside the schedulable range, as `(field, value)`.
    #[must_use]
    pub fn invalid_delay(&self) -> Option<(&'static str, f32)> {
        if let Some(secs) = self.intro_fallback_secs
            && !is_valid_delay(secs)
        {
            return Some(("intro_fallback_secs", secs));
        }
        self.vfx
            .iter()
            .find(|rule| !is_valid_delay(rule.delay_secs))
            .map(|rule| ("vfx.delay_secs", rule.delay_secs))
    }

    /// At least one choice must lead forward.
    #[must_use]
    pub const fn is_winnable(&self) -> bool {
        self.choice_a.is_winning || self.choice_b.is_winning
    }

    /// Effective cue set for the active route.
    #[must_use]
    pub fn cues_for(&self, route: RouteTag) -> CueSet {
        self.route_cues
            .iter()
            .find(|entry| entry.route == route)
            .map_or_else(|| self.cues.clone(), |entry| self.cues.overlay(&entry.cues))
    }

    /// Result background for an outcome.
    #[must_use]
    pub fn background(&self, is_win: bool) -> Option<&AssetRef> {
        if is_win {
            self.win_background.as_ref()
        } else {
            self.fail_background.as_ref()
        }
    }
}

/// Authored definition of a level: an ordered list of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelBlueprint {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stages: Vec<StageBlueprint>,
}

impl LevelBlueprint {
    /// Check authoring invariants for this level.
    ///
    /// # Errors
    ///
    /// Returns an error if the level has no stages, a stage cannot be won, or
    /// a stage carries a delay that cannot be scheduled.
    pub fn validate(&self) -> Result<(), BlueprintError> {
        if self.stages.is_empty() {
            return Err(BlueprintError::NoStages {
                level: self.id.clone(),
            });
        }
        if let Some(stage) = self.stages.iter().position(|s| !s.is_winnable()) {
            return Err(BlueprintError::Unwinnable {
                level: self.id.clone(),
                stage,
            });
        }
        for (stage, blueprint) in self.stages.iter().enumerate() {
            if let Some((field, value)) = blueprint.invalid_delay() {
                return Err(BlueprintError::InvalidDelay {
                    level: self.id.clone(),
                    stage,
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Authoring errors in catalog data.
#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("level catalog is empty")]
    EmptyCatalog,
    #[error("level `{level}` has no stages")]
    NoStages { level: String },
    #[error("stage {stage} of level `{level}` has no winning choice")]
    Unwinnable { level: String, stage: usize },
    #[error(
        "stage {stage} of level `{level}` has `{field}` = {value}; \
         expected 0 to {max} seconds",
        max = MAX_DELAY_SECS
    )]
    InvalidDelay {
        level: String,
        stage: usize,
        field: &'static str,
        value: f32,
    },
    #[error("catalog JSON is malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Container for every authored level, in play order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogData {
    pub levels: Vec<LevelBlueprint>,
}

impl CatalogData {
    /// Create empty catalog data (useful for tests)
    #[must_use]
    pub fn empty() -> Self {
        Self { levels: Vec::new() }
    }

    /// Load catalog data from a JSON string
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into catalog data.
    pub fn from_json(json: &str) -> Result<Self, BlueprintError> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn from_levels(levels: Vec<LevelBlueprint>) -> Self {
        Self { levels }
    }

    /// Validate every level.
    ///
    /// # Errors
    ///
    /// Returns the first authoring error found.
    pub fn validate(&self) -> Result<(), BlueprintError> {
        if self.levels.is_empty() {
            return Err(BlueprintError::EmptyCatalog);
        }
        self.levels.iter().try_for_each(LevelBlueprint::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_data_from_json() {
        let json = r#"{
            "levels": [
                {
                    "id": "L1",
                    "name": "Crossroads",
                    "stages": [
                        {
                            "title": "Gate",
                            "choice_a": { "image": "gate_left", "is_winning": true, "next_route": "route1" },
                            "choice_b": { "image": "gate_right", "is_winning": false },
                            "cues": { "intro": "intro", "win": "win", "lose": "lose" },
                            "route_cues": [
                                { "route": "route1", "cues": { "win": "win_r1" } }
                            ]
                        }
                    ]
                }
            ]
        }"#;

        let data = CatalogData::from_json(json).unwrap();
        assert_eq!(data.levels.len(), 1);
        let stage = &data.levels[0].stages[0];
        assert_eq!(stage.choice_a.next_route, RouteTag::Route1);
        assert_eq!(stage.choice_b.next_route, RouteTag::None);
        assert!(stage.vfx.is_empty());
        data.validate().unwrap();
    }

    #[test]
    fn route_cues_overlay_default_set() {
        let mut stage = StageBlueprint::new("s", Choice::new("a", true), Choice::new("b", false));
        stage.cues = CueSet {
            intro: Some("intro".into()),
            win: Some("win".into()),
            lose: Some("lose".into()),
        };
        stage.route_cues.push(RouteCues {
            route: RouteTag::Route2,
            cues: CueSet {
                win: Some("win_r2".into()),
                ..CueSet::default()
            },
        });

        let routed = stage.cues_for(RouteTag::Route2);
        assert_eq!(routed.result(true), Some("win_r2"));
        assert_eq!(routed.result(false), Some("lose"));
        assert_eq!(routed.intro.as_deref(), Some("intro"));
        assert_eq!(stage.cues_for(RouteTag::Route1), stage.cues);
    }

    #[test]
    fn validation_flags_unwinnable_and_empty_levels() {
        let losing = StageBlueprint::new("s", Choice::new("a", false), Choice::new("b", false));
        let level = LevelBlueprint {
            id: "bad".into(),
            name: String::new(),
            stages: vec![losing],
        };
        assert!(matches!(
            level.validate(),
            Err(BlueprintError::Unwinnable { stage: 0, .. })
        ));

        let empty = LevelBlueprint {
            id: "hollow".into(),
            name: String::new(),
            stages: Vec::new(),
        };
        assert!(matches!(empty.validate(), Err(BlueprintError::NoStages { .. })));
        assert!(matches!(
            CatalogData::empty().validate(),
            Err(BlueprintError::EmptyCatalog)
        ));
    }

    #[test]
    fn validation_rejects_unschedulable_delays() {
        let json = r#"{
            "levels": [
                {
                    "id": "L1",
                    "stages": [
                        {
                            "choice_a": { "image": "a", "is_winning": true },
                            "choice_b": { "image": "b", "is_winning": false }
                        },
                        {
                            "choice_a": { "image": "a", "is_winning": true },
                            "choice_b": { "image": "b", "is_winning": false },
                            "vfx": [ { "moment": "intro_start", "effect": "dust", "delay_secs": 1e39 } ]
                        }
                    ]
                }
            ]
        }"#;
        let data = CatalogData::from_json(json).unwrap();
        assert!(data.levels[0].stages[1].vfx[0].delay_secs.is_infinite());
        assert!(matches!(
            data.validate(),
            Err(BlueprintError::InvalidDelay {
                stage: 1,
                field: "vfx.delay_secs",
                ..
            })
        ));

        let mut stage = StageBlueprint::new("s", Choice::new("a", true), Choice::new("b", false));
        stage.intro_fallback_secs = Some(-2.0);
        assert_eq!(stage.invalid_delay(), Some(("intro_fallback_secs", -2.0)));
        stage.intro_fallback_secs = Some(MAX_DELAY_SECS + 1.0);
        assert!(stage.invalid_delay().is_some());
        stage.intro_fallback_secs = Some(0.5);
        assert_eq!(stage.invalid_delay(), None);
    }
}
