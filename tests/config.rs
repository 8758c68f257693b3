use std::fs;

use assert_matches::assert_matches;

use erddap_ingest::config::{ConfigLoader, IngestConfig};
use erddap_ingest::domain::Protocol;
use erddap_ingest::error::IngestError;

#[test]
fn resolve_config_from_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("erddap-ingest.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "ingest": {"chunk_size": 100000, "moving_window_days": 3},
            "datasets": [
                "https://erddap.gcoos.org/erddap/tabledap/gcoos_42G01",
                {"server": "https://gliders.ioos.us/erddap/", "dataset_id": "ru29-20240101", "trajectory": true},
                {"server": "https://coastwatch.pfeg.noaa.gov/erddap", "dataset_id": "jplMURSST41", "protocol": "griddap"}
            ]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.settings.chunk_size, 100_000);
    assert_eq!(resolved.settings.moving_window_days, 3);
    assert_eq!(resolved.settings.max_attempts, 3);
    assert_eq!(resolved.settings.nrt_workers, 4);

    assert_eq!(resolved.datasets.len(), 3);
    assert_eq!(resolved.datasets[0].id.as_str(), "gcoos_42G01");
    assert!(resolved.datasets[1].is_trajectory);
    assert_eq!(
        resolved.datasets[1].server.base_url(),
        "https://gliders.ioos.us/erddap"
    );
    assert_eq!(resolved.datasets[2].protocol, Protocol::Griddap);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, IngestError::ConfigRead(_));
}

#[test]
fn invalid_entries_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("bad.json");
    fs::write(&path, r#"{"datasets": ["not a url"]}"#).unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, IngestError::InvalidDatasetUrl(_));

    fs::write(&path, r#"{"ingest": {"max_attempts": 0}}"#).unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, IngestError::InvalidConfig(_));

    fs::write(&path, "{").unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, IngestError::ConfigParse(_));
}

#[test]
fn defaults_match_documented_values() {
    let config = IngestConfig::default();
    assert_eq!(config.chunk_size, 45_000);
    assert_eq!(config.moving_window_days, 7);
    assert!(!config.include_all);
    assert!(!config.chunk_unknown_size);
    assert!(config.validate().is_ok());
}
