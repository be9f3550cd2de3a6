//! Integration tests for phasegrid-config.
//!
//! These tests verify file round trips and that resolved settings drive the
//! analysis components.

use phasegrid_analysis::{ParallelVoxelEvaluator, PhaseProjector};
use phasegrid_config::{ConfigError, PipelineConfig};
use tempfile::TempDir;

/// Test saving into a nested directory and loading back.
#[test]
fn test_save_and_load_nested_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("runs").join("sub01").join("phasegrid.toml");

    let mut config = PipelineConfig::default();
    config.cardiac.forced_hr = Some(58.0);
    config.projection.bin_count = 20;
    config.external.column = Some("2".to_string());
    config.save(&path).expect("save should create parent directories");

    let loaded = PipelineConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

/// Test loading a missing file reports the path.
#[test]
fn test_missing_file_is_read_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let err = PipelineConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

/// Test a malformed file is a parse error rather than a silent default.
#[test]
fn test_malformed_file_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[projection]\nbin_count = \"many\"\n").unwrap();
    assert!(matches!(
        PipelineConfig::load(&path),
        Err(ConfigError::TomlParse(_))
    ));
}

/// Test a file written by hand resolves into a working projector.
#[test]
fn test_file_to_projector() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.toml");
    std::fs::write(
        &path,
        r#"
[projection]
bin_count = 16
kernel = "old"
centric = false
smooth = false

[processing]
workers = 2
"#,
    )
    .unwrap();

    let resolved = PipelineConfig::load(&path).unwrap().validate().unwrap();
    let projector = PhaseProjector::new(
        resolved.projection,
        ParallelVoxelEvaluator::new(resolved.source.processing.workers),
    )
    .unwrap();
    assert_eq!(projector.kernel().bin_count(), 16);
}

/// Test the printed defaults parse back to the defaults.
#[test]
fn test_default_toml_is_stable() {
    let text = PipelineConfig::default().to_toml().unwrap();
    for section in [
        "[cardiac]",
        "[badpoints]",
        "[projection]",
        "[regression]",
        "[external]",
        "[processing]",
        "[output]",
    ] {
        assert!(text.contains(section), "missing {section}");
    }
    let parsed = PipelineConfig::from_toml(&text).unwrap();
    assert_eq!(parsed, PipelineConfig::default());
    assert!(parsed.validate().is_ok());
}
