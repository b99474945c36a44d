//! Builder validation: every violation is reported before any trial runs

use rescalk::{
    Error, KernelMethod, ParallelBackend, Rescalk, RescalkBuilder, RescalkConfig, ResourceWarning, Resources,
};

fn builder() -> RescalkBuilder {
    Rescalk::builder()
        .save_output(false)
        .resources(Resources { cpus: 4, devices: 0 })
}

fn violations(err: Error) -> Vec<String> {
    match err {
        Error::Configuration(v) => v,
        other => panic!("expected a configuration error, got {other}"),
    }
}

#[test]
fn test_all_violations_reported_at_once() {
    let err = builder()
        .n_perturbs(0)
        .n_iters(0)
        .epsilon(-0.1)
        .n_nodes(3)
        .kernel_method(KernelMethod::Func)
        .build()
        .unwrap_err();
    let v = violations(err);
    assert_eq!(v.len(), 5, "{v:?}");
    assert!(v.iter().any(|m| m.contains("n_perturbs")));
    assert!(v.iter().any(|m| m.contains("n_iters")));
    assert!(v.iter().any(|m| m.contains("epsilon")));
    assert!(v.iter().any(|m| m.contains("transport")));
    assert!(v.iter().any(|m| m.contains("requires a kernel")));
}

#[test]
fn test_n_jobs_zero_rejected() {
    let v = violations(builder().n_jobs(0).build().unwrap_err());
    assert_eq!(v, vec!["n_jobs must not be 0".to_string()]);
}

#[test]
fn test_negative_n_jobs_counts_back_from_cpus() {
    let model = builder().n_perturbs(20).n_jobs(-2).build().unwrap();
    assert_eq!(model.settings().n_jobs, 3);

    let v = violations(builder().n_jobs(-5).build().unwrap_err());
    assert!(v[0].contains("must be 1 or more"), "{v:?}");
}

#[test]
fn test_over_request_clamped_with_warning() {
    let model = builder().n_perturbs(20).n_jobs(16).build().unwrap();
    assert_eq!(model.settings().n_jobs, 4);
    assert_eq!(
        model.settings().warnings,
        vec![ResourceWarning::CpusClamped {
            requested: 16,
            available: 4
        }]
    );
}

#[test]
fn test_workers_never_exceed_perturbations() {
    let model = builder().n_perturbs(2).n_jobs(4).build().unwrap();
    assert_eq!(model.settings().n_jobs, 2);
    assert!(model.settings().warnings.is_empty());
}

#[test]
fn test_gpu_request_without_devices_falls_back() {
    let model = builder().n_perturbs(20).use_gpu(true).n_jobs(-1).build().unwrap();
    assert!(!model.settings().use_gpu);
    assert_eq!(model.settings().n_jobs, 4);
    assert_eq!(model.settings().warnings, vec![ResourceWarning::NoDevices]);
}

#[test]
fn test_missing_save_path_rejected() {
    let root = tempfile::tempdir().unwrap();
    let v = violations(
        Rescalk::builder()
            .save_output(true)
            .save_path(root.path().join("absent"))
            .build()
            .unwrap_err(),
    );
    assert!(v[0].contains("save_path"));
}

#[test]
fn test_builder_from_loaded_config() {
    let config = RescalkConfig::from_json_str(
        r#"{"n_perturbs": 6, "n_iters": 30, "save_output": false, "parallel_backend": "scoped", "n_jobs": 2}"#,
    )
    .unwrap();
    let model = RescalkBuilder::from_config(config)
        .resources(Resources { cpus: 8, devices: 0 })
        .build()
        .unwrap();
    assert_eq!(model.config().n_perturbs, 6);
    assert_eq!(model.config().parallel_backend, ParallelBackend::Scoped);
    assert_eq!(model.settings().n_jobs, 2);
}

#[test]
fn test_sill_thresh_bounds() {
    let v = violations(builder().sill_thresh(1.5).build().unwrap_err());
    assert!(v[0].contains("sill_thresh"));
}
