pub mod command;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod step;
pub mod validation;

pub use error::{ErrorKind, PipelineError, Result};
pub use manifest::PipelineManifest;
pub use pipeline::{
    IntoSteps, Pipeline, PipelineBuilder, PipelineMetadata, RunReport, StepGraph, StepOrdering,
    StepRecord, Steps, pipeline,
};
pub use registry::StepRegistry;
pub use step::{Step, StepBuilder, step};
