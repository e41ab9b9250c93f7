//! Declarative pipelines loaded from YAML.
//!
//! ```yaml
//! name: release
//! version: 1.0.0
//! description: Cut a release
//! steps:            # a list of step names, or a mapping name -> prerequisites
//!   - fetch
//!   - build
//! definitions:
//!   fetch:
//!     command: ["git", "fetch", "--tags"]
//!   build:
//!     command: ["cargo", "build", "--release"]
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::command::CommandStepSpec;
use crate::error::{PipelineError, Result};
use crate::pipeline::{Pipeline, PipelineMetadata, Steps};
use crate::registry::StepRegistry;
use crate::step::Step;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineManifest {
    pub name: String,
    #[serde(default = "default_pipeline_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Value,
    #[serde(default)]
    pub definitions: IndexMap<String, CommandStepSpec>,
}

fn default_pipeline_version() -> String {
    "0.0.0".to_string()
}

/// Step names as declared in a manifest, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepLayout {
    Sequence(Vec<String>),
    Mapping(IndexMap<String, Vec<String>>),
}

impl StepLayout {
    pub fn is_empty(&self) -> bool {
        match self {
            StepLayout::Sequence(names) => names.is_empty(),
            StepLayout::Mapping(mapping) => mapping.is_empty(),
        }
    }

    /// Every referenced name once, in first-seen order.
    pub fn names(&self) -> Vec<&str> {
        let declared: Vec<&str> = match self {
            StepLayout::Sequence(names) => names.iter().map(String::as_str).collect(),
            StepLayout::Mapping(mapping) => mapping
                .iter()
                .flat_map(|(key, prerequisites)| std::iter::once(key).chain(prerequisites))
                .map(String::as_str)
                .collect(),
        };
        let mut seen = Vec::with_capacity(declared.len());
        for name in declared {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }
}

impl PipelineManifest {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline manifest: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse pipeline manifest: {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn metadata(&self) -> PipelineMetadata {
        PipelineMetadata {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
        }
    }

    /// Interprets the raw `steps` value. A missing `steps` key is an empty
    /// sequence.
    pub fn layout(&self) -> Result<StepLayout> {
        match &self.steps {
            Value::Null => Ok(StepLayout::Sequence(Vec::new())),
            Value::Sequence(items) => items
                .iter()
                .map(step_name)
                .collect::<Result<Vec<_>>>()
                .map(StepLayout::Sequence),
            Value::Mapping(entries) => {
                let mut mapping = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let prerequisites = match value {
                        Value::Null => Vec::new(),
                        Value::String(name) => vec![name.clone()],
                        Value::Sequence(items) => {
                            items.iter().map(step_name).collect::<Result<Vec<_>>>()?
                        }
                        other => {
                            return Err(PipelineError::invalid_argument(format!(
                                "Prerequisites of a step must be a list of step names, found {}",
                                yaml_kind(other)
                            )));
                        }
                    };
                    mapping.insert(step_name(key)?, prerequisites);
                }
                Ok(StepLayout::Mapping(mapping))
            }
            other => Err(PipelineError::invalid_argument(format!(
                "steps must be a sequence or a dependency mapping, found {}",
                yaml_kind(other)
            ))),
        }
    }

    /// Resolves the layout into steps. Names are looked up in `definitions`
    /// first, then in `registry`; each name maps to a single step handle.
    pub fn resolve(&self, registry: &StepRegistry) -> Result<Steps> {
        let layout = self.layout()?;

        let mut resolved: HashMap<&str, Step> = HashMap::new();
        for name in layout.names() {
            let step = match self.definitions.get(name) {
                Some(spec) => spec.to_step(name)?,
                None => registry.resolve(name)?,
            };
            resolved.insert(name, step);
        }
        let lookup = |name: &String| resolved[name.as_str()].clone();

        Ok(match &layout {
            StepLayout::Sequence(names) => Steps::Sequential(names.iter().map(&lookup).collect()),
            StepLayout::Mapping(mapping) => Steps::Graph(
                mapping
                    .iter()
                    .map(|(key, prerequisites)| {
                        (lookup(key), prerequisites.iter().map(&lookup).collect())
                    })
                    .collect(),
            ),
        })
    }

    /// A pipeline whose steps are resolved on first access.
    pub fn into_pipeline(self, registry: &StepRegistry) -> Pipeline {
        let registry = registry.clone();
        let metadata = self.metadata();
        Pipeline::new(metadata, move || self.resolve(&registry))
    }
}

fn step_name(value: &Value) -> Result<String> {
    match value {
        Value::String(name) => Ok(name.clone()),
        other => Err(PipelineError::invalid_argument(format!(
            "Not a valid step: found {}. Reference steps by name, defined under `definitions` or registered in a StepRegistry.",
            yaml_kind(other)
        ))),
    }
}

fn yaml_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
