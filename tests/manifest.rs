use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;
use tinypipeline::validation::validate_manifest;
use tinypipeline::{ErrorKind, PipelineManifest, StepOrdering, StepRegistry, step};

fn names(manifest: PipelineManifest, registry: &StepRegistry) -> Vec<String> {
    manifest
        .into_pipeline(registry)
        .order()
        .unwrap()
        .iter()
        .map(|s| s.name().to_string())
        .collect()
}

#[test]
fn bundled_manifests_are_valid() {
    for path in ["manifests/release.yaml", "manifests/ci.yaml"] {
        let manifest = PipelineManifest::load(Path::new(path)).expect("manifest should load");
        let report = validate_manifest(&manifest, &StepRegistry::new());
        assert!(report.is_ok(), "{path} should pass validation: {:?}", report.errors);
    }
}

#[test]
fn ci_manifest_orders_keys_before_listed_steps() {
    let manifest = PipelineManifest::load(Path::new("manifests/ci.yaml")).unwrap();
    assert_eq!(
        names(manifest, &StepRegistry::new()),
        ["fmt", "build", "test", "clippy", "report"]
    );
}

#[test]
fn load_reports_path_on_parse_failure() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("broken.yaml");
    fs::write(&path, "name: [unterminated\n").unwrap();

    let err = PipelineManifest::load(&path).unwrap_err();
    assert!(err.to_string().contains("broken.yaml"));
}

#[test]
fn registered_steps_run_from_manifest() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let mut registry = StepRegistry::new();
    for name in ["extract", "transform", "load"] {
        let log = log.clone();
        registry.register(step(name, "1.0.0", "").run(move || {
            log.lock().unwrap().push(name);
            Ok(())
        }));
    }

    let manifest = PipelineManifest::parse(
        "name: etl\nversion: 2.0.0\nsteps:\n  extract: [transform]\n  transform: [load]\n",
    )
    .unwrap();
    let pipeline = manifest.into_pipeline(&registry);
    assert_eq!(pipeline.version(), "2.0.0");
    assert_eq!(pipeline.ordering().unwrap(), StepOrdering::Nonlinear);

    pipeline.run().unwrap();
    assert_eq!(*log.lock().unwrap(), ["extract", "transform", "load"]);
}

#[test]
fn unknown_step_fails_before_anything_runs() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let mut registry = StepRegistry::new();
    let sink = log.clone();
    registry.register(step("known", "1.0.0", "").run(move || {
        sink.lock().unwrap().push("known");
        Ok(())
    }));

    let manifest = PipelineManifest::parse("name: p\nsteps: [known, \"step_one\"]\n").unwrap();
    let err = manifest.into_pipeline(&registry).run().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(err.to_string().starts_with("Not a valid step: 'step_one'"));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn scalar_steps_fail_with_invalid_argument() {
    let manifest = PipelineManifest::parse("name: p\nsteps: step_one\n").unwrap();
    let pipeline = manifest.into_pipeline(&StepRegistry::new());

    let err = pipeline.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(
        err.to_string(),
        "steps must be a sequence or a dependency mapping, found string"
    );
    assert_eq!(pipeline.steps().unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[test]
fn cyclic_manifest_fails_with_cycle_error() {
    let manifest = PipelineManifest::parse(
        "name: loop\nsteps:\n  a: [b]\n  b: [a]\ndefinitions:\n  a:\n    command: [\"true\"]\n  b:\n    command: [\"true\"]\n",
    )
    .unwrap();
    let err = manifest.into_pipeline(&StepRegistry::new()).run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CyclicDependency);
}

#[cfg(unix)]
#[test]
fn command_failure_halts_manifest_pipeline() {
    let temp = tempdir().unwrap();
    let marker = temp.path().join("ran");
    let yaml = format!(
        "name: halt\nsteps: [ok, fail, touch]\ndefinitions:\n  ok:\n    command: [\"true\"]\n  fail:\n    command: [\"false\"]\n  touch:\n    command: [\"touch\", \"{}\"]\n",
        marker.display()
    );

    let err = PipelineManifest::parse(&yaml)
        .unwrap()
        .into_pipeline(&StepRegistry::new())
        .run()
        .unwrap_err();

    assert_eq!(err.failed_step(), Some("fail"));
    assert_eq!(err.to_string(), "Command `false` exited with status 1");
    assert!(!marker.exists());
}
