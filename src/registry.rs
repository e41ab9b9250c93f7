use std::collections::HashMap;

use crate::error::{PipelineError, Result};
use crate::step::Step;

/// Steps made available to declarative manifests, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Step>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `step` under its own name, returning any step it replaces.
    pub fn register(&mut self, step: Step) -> Option<Step> {
        self.steps.insert(step.name().to_string(), step)
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<Step> {
        self.steps.get(name).cloned().ok_or_else(|| {
            PipelineError::invalid_argument(format!(
                "Not a valid step: '{}'. Consider registering it or defining it under `definitions`. Available steps: {}",
                name,
                self.known_steps().join(", ")
            ))
        })
    }

    pub fn known_steps(&self) -> Vec<String> {
        let mut names: Vec<_> = self.steps.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
