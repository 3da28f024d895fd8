use anyhow::{Result, bail, ensure};
use forkpath_game::{FlowState, RouteTag};

use super::TestScenario;
use crate::logic::{FailResponse, FlowEvent, GameplayStrategy, SimulationPlan, SimulationSummary};

fn level_budget(level_count: usize) -> u32 {
    u32::try_from(level_count).unwrap_or(u32::MAX).max(1)
}

pub fn perfect_run_scenario(level_count: usize) -> TestScenario {
    TestScenario::simulation(
        "Perfect Run Through Every Level",
        SimulationPlan::new(GameplayStrategy::AlwaysWin)
            .with_levels(level_budget(level_count))
            .with_expectation(perfect_run_expectation),
    )
}

fn perfect_run_expectation(summary: &SimulationSummary) -> Result<()> {
    ensure!(summary.halted.is_none(), "run halted: {:?}", summary.halted);
    ensure!(
        summary.levels_completed as usize == summary.level_count,
        "completed {} of {} levels",
        summary.levels_completed,
        summary.level_count
    );
    ensure!(
        summary.counters.levels_won == summary.levels_completed,
        "levels_won counter {} disagrees with {} completions",
        summary.counters.levels_won,
        summary.levels_completed
    );
    ensure!(
        summary.counters.stages_failed == 0 && summary.picks == summary.counters.stages_cleared,
        "every pick should clear a stage ({} picks, {} cleared)",
        summary.picks,
        summary.counters.stages_cleared
    );
    let expected = summary.start_balance
        + summary.reward_per_level * i64::from(summary.levels_completed);
    ensure!(
        summary.final_balance == expected,
        "balance {} after {} levels, expected {expected}",
        summary.final_balance,
        summary.levels_completed
    );
    for event in &summary.events {
        if let FlowEvent::Advanced { from, to } = event {
            ensure!(*to == from + 1, "advanced out of order: {from} -> {to}");
        }
    }
    Ok(())
}

pub fn retry_stage_scenario() -> TestScenario {
    TestScenario::simulation(
        "Fail Then Retry Stage",
        SimulationPlan::new(GameplayStrategy::LoseThenWin)
            .with_fail_response(FailResponse::RetryStage)
            .with_expectation(retry_stage_expectation),
    )
}

fn retry_stage_expectation(summary: &SimulationSummary) -> Result<()> {
    ensure!(summary.levels_completed == 1, "level was never won");
    ensure!(summary.counters.stages_failed > 0, "no stage was failed");
    for pair in summary.events.windows(2) {
        if let FlowEvent::StageFailed { stage, .. } = &pair[0] {
            match &pair[1] {
                FlowEvent::RetriedStage {
                    stage: retried,
                    state_after,
                    ..
                } => {
                    ensure!(retried == stage, "retried stage {retried} after failing {stage}");
                    ensure!(
                        *state_after == FlowState::StageIntro,
                        "retry entered {state_after} instead of StageIntro"
                    );
                }
                other => bail!("failure at stage {stage} followed by {other:?}"),
            }
        }
    }
    ensure!(
        summary.final_balance == summary.start_balance + summary.reward_per_level,
        "failures must not change the balance ({} -> {})",
        summary.start_balance,
        summary.final_balance
    );
    Ok(())
}

pub fn replay_level_scenario() -> TestScenario {
    TestScenario::simulation(
        "Fail Then Replay Level",
        SimulationPlan::new(GameplayStrategy::LoseThenWin)
            .with_fail_response(FailResponse::RetryLevel)
            .with_expectation(replay_level_expectation),
    )
}

fn replay_level_expectation(summary: &SimulationSummary) -> Result<()> {
    ensure!(summary.levels_completed == 1, "level was never won");
    let mut replays = 0;
    for event in &summary.events {
        if let FlowEvent::RetriedLevel {
            stage_after,
            branch_fresh,
            ..
        } = event
        {
            replays += 1;
            ensure!(*stage_after == 0, "replay resumed at stage {stage_after}");
            ensure!(*branch_fresh, "replay kept the previous branch context");
        }
    }
    ensure!(
        replays == summary.counters.stages_failed,
        "{replays} replays for {} failures",
        summary.counters.stages_failed
    );
    Ok(())
}

pub fn branch_routes_scenario(level_count: usize) -> TestScenario {
    TestScenario::simulation(
        "Branch Route Carry-Over",
        SimulationPlan::new(GameplayStrategy::Random)
            .with_levels(level_budget(level_count))
            .with_max_picks(256)
            .with_fail_response(FailResponse::RetryStage)
            .with_expectation(branch_routes_expectation),
    )
}

/// Once a level sets a route it stays set until the level is left.
fn branch_routes_expectation(summary: &SimulationSummary) -> Result<()> {
    let mut current: Option<(usize, RouteTag)> = None;
    for event in &summary.events {
        match event {
            FlowEvent::Picked { level, route, .. } => {
                if let Some((seen_level, seen_route)) = current
                    && seen_level == *level
                    && seen_route.is_routed()
                {
                    ensure!(
                        route.is_routed(),
                        "route {seen_route:?} dropped to None in level {level}"
                    );
                }
                current = Some((*level, *route));
            }
            FlowEvent::Advanced { .. } | FlowEvent::RetriedLevel { .. } => current = None,
            _ => {}
        }
    }
    ensure!(!summary.cues_played.is_empty(), "no cues were played");
    Ok(())
}

pub fn economy_scenario() -> TestScenario {
    TestScenario::simulation(
        "Economy Stays Flat On Failure",
        SimulationPlan::new(GameplayStrategy::AlwaysLose)
            .with_max_picks(12)
            .with_expectation(economy_expectation),
    )
}

fn economy_expectation(summary: &SimulationSummary) -> Result<()> {
    ensure!(summary.levels_completed == 0, "always-lose won a level");
    ensure!(
        summary.final_balance == summary.start_balance,
        "balance moved from {} to {} without a win",
        summary.start_balance,
        summary.final_balance
    );
    let failed_picks = summary
        .picks()
        .filter(|event| matches!(event, FlowEvent::Picked { won: false, .. }))
        .count();
    ensure!(
        failed_picks == summary.counters.stages_failed as usize,
        "{failed_picks} losing picks but {} failures counted",
        summary.counters.stages_failed
    );
    Ok(())
}

pub fn wraparound_scenario(level_count: usize) -> TestScenario {
    TestScenario::simulation(
        "Catalog Wraparound",
        SimulationPlan::new(GameplayStrategy::AlwaysWin)
            .starting_at(level_count.saturating_sub(1))
            .with_levels(2)
            .with_expectation(wraparound_expectation),
    )
}

fn wraparound_expectation(summary: &SimulationSummary) -> Result<()> {
    let last = summary.level_count.saturating_sub(1);
    let wrapped = summary
        .events
        .iter()
        .any(|event| matches!(event, FlowEvent::Advanced { from, to: 0 } if *from == last));
    ensure!(wrapped, "never wrapped from level {last} back to 0");
    ensure!(
        summary.levels_completed == 2,
        "completed {} levels across the wrap",
        summary.levels_completed
    );
    ensure!(
        summary.final_level_index == 0,
        "ended on level {} instead of 0",
        summary.final_level_index
    );
    Ok(())
}
