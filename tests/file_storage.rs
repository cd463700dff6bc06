//! Full run written to disk through the CSV artifact sink.

#![cfg(feature = "storage_csv")]

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{pmt_hardware, pmt_parameters, RecordingSequence};
use pulse_scan::experiment::Experiment;
use pulse_scan::hardware::mock::CallLog;
use pulse_scan::scan::{Scannable, ScanSpec, SequenceScan};
use pulse_scan::sink::FileResultSink;
use tempfile::tempdir;

fn only_subdir(dir: &Path) -> PathBuf {
    let dirs: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(dirs.len(), 1, "expected one directory in {:?}", dir);
    dirs.into_iter().next().unwrap()
}

#[tokio::test]
async fn test_artifact_written_in_batches() {
    let root = tempdir().unwrap();
    let log = CallLog::new();
    let spec = ScanSpec::new().sequence(
        "Spectrum",
        SequenceScan::new("Spectrum").axis(
            "Spectrum.detuning",
            Scannable::range(-3e3, 3e3, 7),
        ),
    );

    let mut engine = Experiment::new(
        "Spectrum",
        spec,
        pmt_hardware(&log, vec![2, 8]),
        RecordingSequence::default(),
    )
    .with_sink(FileResultSink::new(root.path()))
    .prepare(&pmt_parameters("pmt", 2.0))
    .await
    .unwrap();
    engine.run_scan().await.unwrap();
    let stats = engine.analyze().await.unwrap();
    assert_eq!(stats.failed, 0);

    let date_dir = only_subdir(root.path());
    let scan_list = fs::read_to_string(date_dir.join("scan_list")).unwrap();
    assert_eq!(scan_list.lines().count(), 1);
    assert!(scan_list.contains(",Spectrum,"));

    let artifact = only_subdir(&date_dir.join("Spectrum"));
    assert!(artifact.join("header.json").exists());

    let time = fs::read_to_string(artifact.join("time.csv")).unwrap();
    let mut lines = time.lines();
    assert_eq!(lines.next(), Some("index,time"));
    assert_eq!(lines.count(), 7);

    let detuning = fs::read_to_string(artifact.join("Spectrum.detuning.csv")).unwrap();
    assert!(detuning.lines().nth(1).unwrap().ends_with(",-3000"));

    let dark = fs::read_to_string(artifact.join("dark_ions_0.csv")).unwrap();
    assert!(dark.lines().skip(1).all(|l| l.ends_with(",0.5")));
}
