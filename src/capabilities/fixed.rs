use super::{CapabilityError, Planner, SchemaInfo};

/// Planner returning a caller-supplied task list regardless of schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedPlanner {
    tasks: Vec<String>,
}

impl FixedPlanner {
    pub fn new<I, S>(tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tasks: tasks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }
}

impl Planner for FixedPlanner {
    fn plan(&self, _schema: &SchemaInfo) -> Result<Vec<String>, CapabilityError> {
        if self.tasks.is_empty() {
            return Err(CapabilityError::Failed("no tasks were supplied".to_string()));
        }
        Ok(self.tasks.clone())
    }
}
