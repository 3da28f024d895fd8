use crate::logic::{GameTester, SimulationPlan};

pub mod progression;
pub mod smoke;

// Logic test scenario
#[derive(Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub plan: SimulationPlan,
}

impl TestScenario {
    #[must_use]
    pub fn simulation(name: impl Into<String>, plan: SimulationPlan) -> Self {
        Self {
            name: name.into(),
            plan,
        }
    }
}

/// Scenario keys expanded by `all`, in run order.
pub const ALL_SCENARIOS: [&str; 7] = [
    "smoke",
    "perfect-run",
    "retry-stage",
    "replay-level",
    "branch-routes",
    "economy",
    "wraparound",
];

pub fn get_scenario(name: &str, game_tester: &GameTester) -> Option<TestScenario> {
    let level_count = game_tester.level_count();
    match name.to_lowercase().as_str() {
        "smoke" => Some(smoke::smoke_scenario()),
        "perfect-run" | "perfect" => Some(progression::perfect_run_scenario(level_count)),
        "retry-stage" | "retry" => Some(progression::retry_stage_scenario()),
        "replay-level" | "replay" => Some(progression::replay_level_scenario()),
        "branch-routes" | "routes" => Some(progression::branch_routes_scenario(level_count)),
        "economy" => Some(progression::economy_scenario()),
        "wraparound" | "wrap" => Some(progression::wraparound_scenario(level_count)),
        _ => None,
    }
}

pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    vec![
        ("smoke", "Smoke Test"),
        ("perfect-run", "Perfect Run Through Every Level"),
        ("retry-stage", "Fail Then Retry Stage"),
        ("replay-level", "Fail Then Replay Level"),
        ("branch-routes", "Branch Route Carry-Over"),
        ("economy", "Economy Stays Flat On Failure"),
        ("wraparound", "Catalog Wraparound"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::TesterAssets;
    use std::sync::Arc;

    fn tester() -> GameTester {
        GameTester::new(Arc::new(TesterAssets::load_default()), false)
    }

    #[test]
    fn every_listed_scenario_resolves() {
        let tester = tester();
        for (key, description) in list_scenarios() {
            let scenario = get_scenario(key, &tester).unwrap();
            assert_eq!(scenario.name, description);
        }
        assert_eq!(ALL_SCENARIOS.len(), list_scenarios().len());
    }

    #[test]
    fn unknown_scenario_is_none() {
        assert!(get_scenario("jetpack", &tester()).is_none());
    }

    #[tokio::test]
    async fn bundled_catalog_passes_every_scenario() {
        let tester = tester();
        for key in ALL_SCENARIOS {
            let scenario = get_scenario(key, &tester).unwrap();
            for seed in [1, 42, 1337] {
                let summary = tester.run_plan(&scenario.plan, seed).await.unwrap();
                for expectation in &scenario.plan.expectations {
                    if let Err(err) = expectation.evaluate(&summary) {
                        panic!("{key} seed {seed}: {err}");
                    }
                }
            }
        }
    }
}
