//! Tests for error types

use rescalk::Error;

#[test]
fn test_configuration_error_lists_every_violation() {
    let error = Error::Configuration(vec!["n_perturbs must be at least 1".into(), "n_iters must be at least 1".into()]);
    let error_str = format!("{error}");
    assert!(error_str.contains("Configuration error"));
    assert!(error_str.contains("n_perturbs must be at least 1; n_iters must be at least 1"));
    assert!(error.is_configuration());
}

#[test]
fn test_config_helper_wraps_single_message() {
    let error = Error::config("bad value");
    assert!(matches!(&error, Error::Configuration(v) if v == &vec!["bad value".to_string()]));
}

#[test]
fn test_invalid_epsilon_error() {
    let error = Error::InvalidEpsilon(1.5);
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid epsilon 1.5"));
    assert!(error_str.contains("[0, 1)"));
    assert!(!error.is_configuration());
}

#[test]
fn test_kernel_error_carries_rank_and_seed() {
    let error = Error::Kernel {
        k: 4,
        seed: 7,
        source: "diverged".into(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("k=4"));
    assert!(error_str.contains("seed 7"));
    assert!(error_str.contains("diverged"));
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_device_unavailable_error() {
    let error = Error::DeviceUnavailable(2);
    let error_str = format!("{error}");
    assert!(error_str.contains("Device 2 unavailable"));
    assert!(error_str.contains("--features gpu"));
}

#[test]
fn test_transport_and_clustering_errors() {
    assert!(format!("{}", Error::Transport("peer gone".into())).contains("Transport error: peer gone"));
    assert!(format!("{}", Error::Clustering("collapsed".into())).contains("Clustering failed: collapsed"));
    assert!(format!("{}", Error::Compression("bad frame".into())).contains("Compression error"));
    assert!(format!("{}", Error::InvalidDataset("empty".into())).contains("Invalid dataset"));
    assert!(format!("{}", Error::GpuInitFailed("no adapter".into())).contains("GPU initialization failed"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_error_debug_format() {
    let error = Error::Transport("test".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Transport"));
}
