use serde::Serialize;

use crate::error::PipelineError;
use crate::manifest::{PipelineManifest, StepLayout};
use crate::registry::StepRegistry;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Checks a manifest without running anything, collecting every problem
/// instead of stopping at the first.
pub fn validate_manifest(manifest: &PipelineManifest, registry: &StepRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();

    if manifest.name.trim().is_empty() {
        report.errors.push("Pipeline name cannot be empty".into());
    }

    for (name, spec) in &manifest.definitions {
        if let Err(err) = spec.to_step(name) {
            report.errors.push(err.to_string());
        }
        if registry.contains(name) {
            report.warnings.push(format!(
                "Definition '{name}' shadows a registered step of the same name"
            ));
        }
    }

    let layout = match manifest.layout() {
        Ok(layout) => layout,
        Err(err) => {
            report.errors.push(err.to_string());
            return report;
        }
    };

    if layout.is_empty() {
        report
            .errors
            .push(format!("Pipeline {} has no steps to run.", manifest.name));
        return report;
    }

    report.merge(validate_references(manifest, &layout, registry));

    if report.is_ok()
        && let Err(err) = manifest
            .resolve(registry)
            .and_then(|steps| steps.resolve_order())
    {
        match &err {
            PipelineError::CyclicDependency { .. } => report.errors.push(format!(
                "{err}. Try checking for circular dependencies in your steps."
            )),
            _ => report.errors.push(err.to_string()),
        }
    }

    report
}

fn validate_references(
    manifest: &PipelineManifest,
    layout: &StepLayout,
    registry: &StepRegistry,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let referenced = layout.names();

    for name in &referenced {
        if !manifest.definitions.contains_key(*name) && !registry.contains(name) {
            report.errors.push(format!(
                "Unknown step '{name}': not defined under `definitions` and not registered"
            ));
        }
    }

    for name in manifest.definitions.keys() {
        if !referenced.contains(&name.as_str()) {
            report
                .warnings
                .push(format!("Definition '{name}' is never used by the pipeline"));
        }
    }

    report
}
