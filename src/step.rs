use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Result;

type WorkItem = Box<dyn Fn() -> Result<()> + Send + Sync>;

struct StepInner {
    name: String,
    version: String,
    description: String,
    work: WorkItem,
}

/// A named, versioned unit of work.
///
/// `Step` is a handle: cloning it is cheap and the clone refers to the same
/// step. Equality and hashing follow handle identity, so the same step can be
/// used as a key in a dependency mapping and listed as a prerequisite of
/// another key, while two steps built separately never compare equal even if
/// they share a name.
#[derive(Clone)]
pub struct Step {
    inner: Arc<StepInner>,
}

impl Step {
    pub fn new<F, T>(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        work: F,
    ) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(StepInner {
                name: name.into(),
                version: version.into(),
                description: description.into(),
                work: Box::new(move || work().map(|_| ())),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// Invokes the work item once. Its output is discarded and its error is
    /// returned as-is.
    pub fn run(&self) -> Result<()> {
        (self.inner.work)()
    }

    fn id(&self) -> *const StepInner {
        Arc::as_ptr(&self.inner)
    }
}

impl PartialEq for Step {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Step {}

impl Hash for Step {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Step(name='{}', version='{}')",
            self.inner.name, self.inner.version
        )
    }
}

/// Identity half of a step, waiting for its work item.
#[derive(Debug, Clone)]
pub struct StepBuilder {
    name: String,
    version: String,
    description: String,
}

impl StepBuilder {
    pub fn run<F, T>(self, work: F) -> Step
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Step::new(self.name, self.version, self.description, work)
    }
}

/// Declares a step by its identity; finish it with [`StepBuilder::run`].
///
/// ```
/// let fetch = tinypipeline::step("fetch", "1.0.0", "Download sources").run(|| Ok(()));
/// assert_eq!(fetch.name(), "fetch");
/// ```
pub fn step(
    name: impl Into<String>,
    version: impl Into<String>,
    description: impl Into<String>,
) -> StepBuilder {
    StepBuilder {
        name: name.into(),
        version: version.into(),
        description: description.into(),
    }
}
