use anyhow::{Result, ensure};
use forkpath_game::FlowState;
use forkpath_game::headless::PresentationCall;

use super::TestScenario;
use crate::logic::{GameplayStrategy, SimulationPlan, SimulationSummary};

pub fn smoke_scenario() -> TestScenario {
    TestScenario::simulation(
        "Smoke Test",
        SimulationPlan::new(GameplayStrategy::AlwaysWin)
            .with_levels(1)
            .with_expectation(smoke_expectation),
    )
}

fn smoke_expectation(summary: &SimulationSummary) -> Result<()> {
    ensure!(summary.halted.is_none(), "run halted: {:?}", summary.halted);
    ensure!(
        summary.final_state == FlowState::Win,
        "expected Win, ended in {}",
        summary.final_state
    );
    ensure!(summary.levels_completed == 1, "first level not completed");
    ensure!(
        summary.counters.stages_failed == 0,
        "always-win should never fail a stage"
    );
    ensure!(
        summary.final_balance == summary.start_balance + summary.reward_per_level,
        "expected one level reward, balance {} -> {}",
        summary.start_balance,
        summary.final_balance
    );
    let hud_seen = summary
        .transcript
        .iter()
        .any(|call| matches!(call, PresentationCall::LevelInfo { current: 1, .. }));
    ensure!(hud_seen, "HUD never showed level 1");
    Ok(())
}
