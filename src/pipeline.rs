use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use once_cell::unsync::OnceCell;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::error::{PipelineError, Result};
use crate::graph::DependencyGraph;
use crate::observability::MetricsCollector;
use crate::step::Step;

/// A pipeline's step collection.
#[derive(Debug, Clone)]
pub enum Steps {
    /// Steps run in exactly this order.
    Sequential(Vec<Step>),
    /// Each key depends on the steps listed for it. Execution follows the
    /// reversed topological order of this mapping.
    Graph(IndexMap<Step, Vec<Step>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepOrdering {
    Linear,
    Nonlinear,
}

impl Steps {
    /// Number of declared entries: list items, or mapping keys.
    pub fn len(&self) -> usize {
        match self {
            Steps::Sequential(steps) => steps.len(),
            Steps::Graph(mapping) => mapping.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ordering(&self) -> StepOrdering {
        match self {
            Steps::Sequential(_) => StepOrdering::Linear,
            Steps::Graph(_) => StepOrdering::Nonlinear,
        }
    }

    /// Resolves the execution order.
    pub fn resolve_order(&self) -> Result<Vec<Step>> {
        match self {
            Steps::Sequential(steps) => Ok(steps.clone()),
            Steps::Graph(mapping) => DependencyGraph::from_mapping(mapping).execution_order(),
        }
    }
}

/// Builder for [`Steps::Graph`] collections.
///
/// Declaring the same step twice merges its prerequisite lists.
#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    entries: IndexMap<Step, Vec<Step>>,
}

impl StepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: &Step, prerequisites: &[&Step]) -> Self {
        self.entries
            .entry(step.clone())
            .or_default()
            .extend(prerequisites.iter().map(|&p| p.clone()));
        self
    }

    pub fn build(self) -> Steps {
        Steps::Graph(self.entries)
    }
}

/// Anything a pipeline factory may return.
pub trait IntoSteps {
    fn into_steps(self) -> Result<Steps>;
}

impl IntoSteps for Steps {
    fn into_steps(self) -> Result<Steps> {
        Ok(self)
    }
}

impl IntoSteps for Vec<Step> {
    fn into_steps(self) -> Result<Steps> {
        Ok(Steps::Sequential(self))
    }
}

impl IntoSteps for IndexMap<Step, Vec<Step>> {
    fn into_steps(self) -> Result<Steps> {
        Ok(Steps::Graph(self))
    }
}

impl IntoSteps for StepGraph {
    fn into_steps(self) -> Result<Steps> {
        Ok(self.build())
    }
}

impl<T: IntoSteps> IntoSteps for Result<T> {
    fn into_steps(self) -> Result<Steps> {
        self.and_then(IntoSteps::into_steps)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
}

type StepsFactory = Box<dyn FnOnce() -> Result<Steps>>;

/// A named, versioned collection of steps with a single `run` entry point.
///
/// The step collection comes from a factory that is called on first access
/// and never again; the outcome, including a malformed collection, is cached
/// for the pipeline's lifetime. The cache is not synchronized, so a
/// `Pipeline` stays on the thread that built it.
pub struct Pipeline {
    metadata: PipelineMetadata,
    factory: Cell<Option<StepsFactory>>,
    steps: OnceCell<Result<Steps>>,
    metrics: MetricsCollector,
}

impl Pipeline {
    pub fn new<F, S>(metadata: PipelineMetadata, factory: F) -> Self
    where
        F: FnOnce() -> S + 'static,
        S: IntoSteps,
    {
        Self {
            metadata,
            factory: Cell::new(Some(Box::new(move || factory().into_steps()))),
            steps: OnceCell::new(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    pub fn metadata(&self) -> &PipelineMetadata {
        &self.metadata
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn is_materialized(&self) -> bool {
        self.steps.get().is_some()
    }

    /// The step collection, materialized on first access.
    pub fn steps(&self) -> Result<&Steps> {
        let materialized = self.steps.get_or_init(|| match self.factory.take() {
            Some(factory) => factory(),
            None => Err(PipelineError::invalid_argument(format!(
                "Pipeline {} has no step factory",
                self.metadata.name
            ))),
        });
        materialized.as_ref().map_err(PipelineError::replay)
    }

    pub fn ordering(&self) -> Result<StepOrdering> {
        Ok(self.steps()?.ordering())
    }

    /// Execution order: the declared list, or the reversed topological order
    /// of the dependency mapping.
    pub fn order(&self) -> Result<Vec<Step>> {
        self.steps()?.resolve_order()
    }

    /// Runs every step in order, stopping at the first failure.
    pub fn run(&self) -> Result<()> {
        self.execute().map(|_| ())
    }

    /// Like [`Pipeline::run`], returning timing for each executed step.
    #[instrument(skip(self), fields(pipeline = %self.metadata.name, version = %self.metadata.version))]
    pub fn execute(&self) -> Result<RunReport> {
        let steps = self.steps()?;
        if steps.is_empty() {
            return Err(PipelineError::PipelineEmpty {
                pipeline: self.metadata.name.clone(),
            });
        }

        info!(ordering = ?steps.ordering(), "Running pipeline: {}", self);

        let order = match steps.resolve_order() {
            Ok(order) => order,
            Err(err) => {
                if let PipelineError::CyclicDependency { cycle } = &err {
                    error!(
                        cycle = cycle.as_str(),
                        "Pipeline failed due to an exception in step ordering. \
                         Try checking for circular dependencies in your steps."
                    );
                }
                self.metrics.record_run_failed();
                return Err(err);
            }
        };

        let run_start = Instant::now();
        let started_at = Utc::now();
        let mut records = Vec::with_capacity(order.len());

        for step in &order {
            let span = tracing::span!(tracing::Level::DEBUG, "step", step = step.name());
            let _span_guard = span.enter();

            info!(step = step.name(), "Running step [{}]...", step.name());
            let step_started = Utc::now();
            let mut timer = self.metrics.start_step(step.name());

            if let Err(source) = step.run() {
                timer.fail();
                drop(timer);
                error!(
                    step = step.name(),
                    error = %source,
                    "Pipeline failed due to an exception in step [{}]",
                    step.name()
                );
                self.metrics.record_run_failed();
                self.metrics.record_total_duration(run_start.elapsed());
                return Err(PipelineError::StepFailure {
                    step: step.name().to_string(),
                    source,
                });
            }

            let elapsed = timer.finish();
            info!(
                step = step.name(),
                duration_ms = elapsed.as_secs_f64() * 1_000.0,
                "Step [{}] completed in {} seconds",
                step.name(),
                elapsed.as_secs_f64()
            );
            records.push(StepRecord {
                name: step.name().to_string(),
                version: step.version().to_string(),
                started_at: step_started,
                finished_at: Utc::now(),
                duration_ms: elapsed.as_secs_f64() * 1_000.0,
            });
        }

        self.metrics.record_run_completed();
        self.metrics.record_total_duration(run_start.elapsed());

        Ok(RunReport {
            pipeline: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
            started_at,
            finished_at: Utc::now(),
            steps: records,
        })
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline(name='{}', version='{}')",
            self.metadata.name, self.metadata.version
        )
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("metadata", &self.metadata)
            .field("materialized", &self.is_materialized())
            .finish_non_exhaustive()
    }
}

/// Identity half of a pipeline, waiting for its step factory.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    metadata: PipelineMetadata,
}

impl PipelineBuilder {
    pub fn build<F, S>(self, factory: F) -> Pipeline
    where
        F: FnOnce() -> S + 'static,
        S: IntoSteps,
    {
        Pipeline::new(self.metadata, factory)
    }

    /// Turns a reusable factory into a constructor: every call yields a fresh
    /// pipeline with its own cache.
    pub fn wrap<F, S>(self, factory: F) -> impl Fn() -> Pipeline
    where
        F: Fn() -> S + 'static,
        S: IntoSteps + 'static,
    {
        let factory = Rc::new(factory);
        move || {
            let factory = factory.clone();
            Pipeline::new(self.metadata.clone(), move || factory())
        }
    }
}

/// Declares a pipeline by its identity; finish it with
/// [`PipelineBuilder::build`] or [`PipelineBuilder::wrap`].
pub fn pipeline(
    name: impl Into<String>,
    version: impl Into<String>,
    description: impl Into<String>,
) -> PipelineBuilder {
    PipelineBuilder {
        metadata: PipelineMetadata {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: f64,
}
