use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tinypipeline::{ErrorKind, PipelineError, Step, StepGraph, Steps, pipeline, step};

type CallLog = Arc<Mutex<Vec<&'static str>>>;

fn recording(name: &'static str, log: &CallLog) -> Step {
    let log = log.clone();
    step(name, "1.0.0", format!("Step {name}")).run(move || {
        log.lock().unwrap().push(name);
        Ok(())
    })
}

fn counting(name: &'static str, calls: &Arc<AtomicUsize>) -> Step {
    let calls = calls.clone();
    step(name, "1.0.0", "").run(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[test]
fn sequential_pipeline_runs_each_step_once_in_order() {
    let log = CallLog::default();
    let steps = vec![
        recording("step_one", &log),
        recording("step_two", &log),
        recording("step_three", &log),
    ];

    let pipe = pipeline("test_pipeline", "1.0.0", "Test pipeline").build(move || steps);
    pipe.run().unwrap();

    assert_eq!(pipe.steps().unwrap().len(), 3);
    assert_eq!(*log.lock().unwrap(), ["step_one", "step_two", "step_three"]);
}

#[test]
fn steps_declared_with_builder_outside_factory() {
    let log = CallLog::default();
    let step_one = recording("step_one", &log);
    let step_two = recording("step_two", &log);
    let step_three = recording("step_three", &log);

    let make = pipeline("test_pipeline", "1.0.0", "Test pipeline").wrap(move || {
        vec![step_one.clone(), step_two.clone(), step_three.clone()]
    });
    make().run().unwrap();

    assert_eq!(*log.lock().unwrap(), ["step_one", "step_two", "step_three"]);
}

#[test]
fn dependency_mapping_resolves_documented_chain() {
    let log = CallLog::default();
    let step_one = recording("step_one", &log);
    let step_two = recording("step_two", &log);
    let step_three = recording("step_three", &log);
    let step_four = recording("step_four", &log);
    let step_five = recording("step_five", &log);

    let pipe = pipeline("graph_pipeline", "1.0.0", "").build(move || {
        StepGraph::new()
            .step(&step_five, &[&step_two])
            .step(&step_two, &[&step_three])
            .step(&step_three, &[&step_four, &step_one])
            .step(&step_four, &[&step_one])
    });

    let order: Vec<_> = pipe
        .order()
        .unwrap()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(
        order,
        ["step_five", "step_two", "step_three", "step_four", "step_one"]
    );

    pipe.run().unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        ["step_five", "step_two", "step_three", "step_four", "step_one"]
    );
}

#[test]
fn every_key_runs_before_the_steps_it_lists() {
    let log = CallLog::default();
    let names = ["deploy", "test", "build", "lint", "fetch"];
    let steps: Vec<Step> = names.into_iter().map(|n| recording(n, &log)).collect();
    let [deploy, test, build, lint, fetch] = <[Step; 5]>::try_from(steps).unwrap();

    let mut mapping = IndexMap::new();
    mapping.insert(deploy.clone(), vec![test.clone(), lint.clone()]);
    mapping.insert(test.clone(), vec![build.clone()]);
    mapping.insert(lint.clone(), vec![fetch.clone()]);
    mapping.insert(build.clone(), vec![fetch.clone()]);
    let edges = mapping.clone();

    let pipe = pipeline("ci", "1.0.0", "").build(move || mapping);
    pipe.run().unwrap();

    let ran = log.lock().unwrap().clone();
    assert_eq!(ran.len(), 5);
    let position = |step: &Step| ran.iter().position(|n| *n == step.name()).unwrap();
    for (key, listed) in &edges {
        for other in listed {
            assert!(
                position(key) < position(other),
                "{} should run before {}",
                key.name(),
                other.name()
            );
        }
    }
}

#[test]
fn cycle_fails_without_running_any_step() {
    let calls = Arc::new(AtomicUsize::new(0));
    let a = counting("a", &calls);
    let b = counting("b", &calls);

    let pipe = pipeline("cyclic", "1.0.0", "")
        .build(move || StepGraph::new().step(&a, &[&b]).step(&b, &[&a]));

    let err = pipe.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CyclicDependency);
    assert!(matches!(err, PipelineError::CyclicDependency { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_collection_names_the_pipeline() {
    let pipe = pipeline("test_pipeline", "1.0.0", "").build(Vec::<Step>::new);
    let err = pipe.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PipelineEmpty);
    assert_eq!(err.to_string(), "Pipeline test_pipeline has no steps to run.");

    let graph = pipeline("empty_graph", "1.0.0", "").build(|| Steps::Graph(IndexMap::new()));
    assert_eq!(graph.run().unwrap_err().kind(), ErrorKind::PipelineEmpty);
}

#[test]
fn failing_middle_step_halts_and_surfaces_original_error() {
    let first = Arc::new(AtomicUsize::new(0));
    let third = Arc::new(AtomicUsize::new(0));
    let step_one = counting("step_one", &first);
    let step_two = step("step_two", "1.0.0", "").run(|| -> anyhow::Result<()> {
        anyhow::bail!("Something went wrong")
    });
    let step_three = counting("step_three", &third);

    let pipe = pipeline("test_pipeline", "1.0.0", "")
        .build(move || vec![step_one, step_two, step_three]);
    let err = pipe.run().unwrap_err();

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(third.load(Ordering::SeqCst), 0);
    assert_eq!(err.to_string(), "Something went wrong");
    assert_eq!(err.failed_step(), Some("step_two"));
    assert_eq!(err.into_step_source().to_string(), "Something went wrong");
}

#[test]
fn factory_is_invoked_at_most_once() {
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let pipe = pipeline("memo", "1.0.0", "").build(move || {
        counter.set(counter.get() + 1);
        vec![step("only", "1.0.0", "").run(|| Ok(()))]
    });

    for _ in 0..3 {
        pipe.steps().unwrap();
        pipe.run().unwrap();
    }
    assert_eq!(calls.get(), 1);
}

#[test]
fn pipeline_can_be_materialized_without_running() {
    let calls = Arc::new(AtomicUsize::new(0));
    let only = counting("only", &calls);
    let pipe = pipeline("lazy", "1.0.0", "").build(move || vec![only]);

    assert!(!pipe.is_materialized());
    assert_eq!(pipe.steps().unwrap().len(), 1);
    assert!(pipe.is_materialized());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn same_step_may_appear_in_several_pipelines() {
    let calls = Arc::new(AtomicUsize::new(0));
    let shared = counting("shared", &calls);
    let first = shared.clone();
    let second = shared.clone();

    pipeline("one", "1.0.0", "").build(move || vec![first]).run().unwrap();
    pipeline("two", "1.0.0", "").build(move || vec![second]).run().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
