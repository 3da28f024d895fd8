use crate::data::{BlueprintError, LevelBlueprint};
use crate::stage::StageUnit;

/// Live instance of a level: its stages and which one is presented.
#[derive(Debug, Clone)]
pub struct LevelUnit {
    id: String,
    name: String,
    stages: Vec<StageUnit>,
    active_index: Option<usize>,
}

impl LevelUnit {
    /// Instantiate fresh stage units from a blueprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the blueprint has no stages or an unwinnable stage.
    pub fn from_blueprint(blueprint: &LevelBlueprint) -> Result<Self, BlueprintError> {
        blueprint.validate()?;
        Ok(Self {
            id: blueprint.id.clone(),
            name: blueprint.name.clone(),
            stages: blueprint.stages.iter().cloned().map(StageUnit::new).collect(),
            active_index: None,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn stage_count(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub const fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    #[must_use]
    pub fn stage(&self, index: usize) -> Option<&StageUnit> {
        self.stages.get(index)
    }

    pub fn active_stage_mut(&mut self) -> Option<&mut StageUnit> {
        let index = self.active_index?;
        self.stages.get_mut(index)
    }

    /// Make `index` the only live stage, deactivating the previous one first.
    pub fn activate(&mut self, index: usize) -> Option<&mut StageUnit> {
        if index >= self.stages.len() {
            log::error!(
                "level `{}`: stage index {index} out of range (count {})",
                self.id,
                self.stages.len()
            );
            return None;
        }
        if let Some(previous) = self.active_index.take()
            && let Some(stage) = self.stages.get_mut(previous)
        {
            stage.deactivate();
        }
        self.active_index = Some(index);
        let stage = &mut self.stages[index];
        stage.activate();
        Some(stage)
    }

    /// Ensure no stage remains interactive.
    pub fn deactivate_all(&mut self) {
        for stage in &mut self.stages {
            stage.deactivate();
        }
        self.active_index = None;
    }
}
