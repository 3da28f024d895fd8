use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use forkpath_game::ChoiceSlot;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

/// What a policy can see when asked to pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageView {
    pub level_index: usize,
    pub stage_index: usize,
    /// Slot holding a winning choice in the current layout.
    pub winning_slot: Option<ChoiceSlot>,
}

/// Decision returned by a [`PlayerPolicy`]
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub slot: ChoiceSlot,
    pub rationale: Option<String>,
}

impl PolicyDecision {
    #[must_use]
    pub const fn new(slot: ChoiceSlot, rationale: Option<String>) -> Self {
        Self { slot, rationale }
    }
}

/// Policy interface for automated play strategies.
pub trait PlayerPolicy {
    /// Name used for logging/debug output.
    fn name(&self) -> &'static str;

    /// Select a slot for the live stage.
    fn pick(&mut self, view: &StageView) -> PolicyDecision;
}

/// Built-in gameplay strategies for automated runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GameplayStrategy {
    AlwaysWin,
    AlwaysLose,
    LoseThenWin,
    Random,
}

#[derive(Debug, Error)]
#[error("unknown strategy `{0}` (expected always-win, always-lose, lose-then-win, random)")]
pub struct UnknownStrategy(String);

impl GameplayStrategy {
    pub const ALL: [Self; 4] = [
        Self::AlwaysWin,
        Self::AlwaysLose,
        Self::LoseThenWin,
        Self::Random,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AlwaysWin => "always-win",
            Self::AlwaysLose => "always-lose",
            Self::LoseThenWin => "lose-then-win",
            Self::Random => "random",
        }
    }

    #[must_use]
    pub fn create_policy(self, seed: u64) -> Box<dyn PlayerPolicy + Send> {
        match self {
            Self::AlwaysWin => Box::new(AlwaysWinPolicy),
            Self::AlwaysLose => Box::new(AlwaysLosePolicy),
            Self::LoseThenWin => Box::new(LoseThenWinPolicy::default()),
            Self::Random => Box::new(RandomPolicy::new(seed)),
        }
    }
}

impl fmt::Display for GameplayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for GameplayStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

fn winning(view: &StageView) -> ChoiceSlot {
    view.winning_slot.unwrap_or(ChoiceSlot::First)
}

fn losing(view: &StageView) -> ChoiceSlot {
    winning(view).other()
}

struct AlwaysWinPolicy;
struct AlwaysLosePolicy;

#[derive(Default)]
struct LoseThenWinPolicy {
    failed: HashSet<(usize, usize)>,
}

struct RandomPolicy {
    rng: ChaCha20Rng,
}

impl RandomPolicy {
    fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }
}

impl PlayerPolicy for AlwaysWinPolicy {
    fn name(&self) -> &'static str {
        "Always Win"
    }

    fn pick(&mut self, view: &StageView) -> PolicyDecision {
        PolicyDecision::new(winning(view), Some("known winner".to_string()))
    }
}

impl PlayerPolicy for AlwaysLosePolicy {
    fn name(&self) -> &'static str {
        "Always Lose"
    }

    fn pick(&mut self, view: &StageView) -> PolicyDecision {
        PolicyDecision::new(losing(view), Some("known loser".to_string()))
    }
}

impl PlayerPolicy for LoseThenWinPolicy {
    fn name(&self) -> &'static str {
        "Lose Then Win"
    }

    fn pick(&mut self, view: &StageView) -> PolicyDecision {
        // Stages where both choices win cannot be failed; pick either.
        if self.failed.insert((view.level_index, view.stage_index)) {
            PolicyDecision::new(losing(view), Some("first attempt".to_string()))
        } else {
            PolicyDecision::new(winning(view), Some("retry".to_string()))
        }
    }
}

impl PlayerPolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "Random"
    }

    fn pick(&mut self, _view: &StageView) -> PolicyDecision {
        let slot = if self.rng.gen_bool(0.5) {
            ChoiceSlot::First
        } else {
            ChoiceSlot::Second
        };
        PolicyDecision::new(slot, Some("coin flip".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(stage_index: usize, winning_slot: ChoiceSlot) -> StageView {
        StageView {
            level_index: 0,
            stage_index,
            winning_slot: Some(winning_slot),
        }
    }

    #[test]
    fn strategies_parse_from_labels() {
        for strategy in GameplayStrategy::ALL {
            assert_eq!(strategy.label().parse::<GameplayStrategy>().unwrap(), strategy);
        }
        assert!("sideways".parse::<GameplayStrategy>().is_err());
    }

    #[test]
    fn lose_then_win_fails_each_stage_once() {
        let mut policy = GameplayStrategy::LoseThenWin.create_policy(0);
        let stage = view(0, ChoiceSlot::Second);
        assert_eq!(policy.pick(&stage).slot, ChoiceSlot::First);
        assert_eq!(policy.pick(&stage).slot, ChoiceSlot::Second);
        assert_eq!(policy.pick(&view(1, ChoiceSlot::First)).slot, ChoiceSlot::Second);
    }

    #[test]
    fn random_policy_is_seeded() {
        let stage = view(0, ChoiceSlot::First);
        let mut a = GameplayStrategy::Random.create_policy(99);
        let mut b = GameplayStrategy::Random.create_policy(99);
        let picks_a: Vec<_> = (0..16).map(|_| a.pick(&stage).slot).collect();
        let picks_b: Vec<_> = (0..16).map(|_| b.pick(&stage).slot).collect();
        assert_eq!(picks_a, picks_b);
    }

    #[test]
    fn always_policies_follow_layout() {
        let stage = view(3, ChoiceSlot::Second);
        assert_eq!(
            GameplayStrategy::AlwaysWin.create_policy(1).pick(&stage).slot,
            ChoiceSlot::Second
        );
        assert_eq!(
            GameplayStrategy::AlwaysLose.create_policy(1).pick(&stage).slot,
            ChoiceSlot::First
        );
    }
}
