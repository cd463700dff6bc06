//! Readout paths, line triggering and the CW restore sequence.

mod common;

use std::sync::Arc;

use common::{
    base_hardware, camera_parameters, fast_settings, pmt_hardware, pmt_parameters, restore_count,
    RecordingSequence,
};
use pulse_scan::experiment::{Experiment, RunOutcome};
use pulse_scan::hardware::mock::{
    CallLog, DeviceCall, MockCamera, MockCore, MockCpld, MockDds, MockIonDetector,
    MockLineTrigger, MockPmt,
};
use pulse_scan::hardware::Hardware;
use pulse_scan::readout::IonStateEstimate;
use pulse_scan::scan::{Scannable, ScanSpec, SequenceScan};
use pulse_scan::sink::MemoryResultSink;
use pulse_scan::{DeviceError, ScanError};

fn spec(npoints: usize) -> ScanSpec {
    let values = (0..npoints).map(|i| i as f64).collect();
    ScanSpec::new().sequence(
        "A",
        SequenceScan::new("Scan").axis("A.x", Scannable::explicit(values)),
    )
}

fn camera_hardware(log: &CallLog, camera: MockCamera) -> Hardware {
    base_hardware(log).with_camera(Box::new(camera))
}

fn detector(probabilities: Vec<f64>) -> Arc<MockIonDetector> {
    Arc::new(MockIonDetector::fixed(IonStateEstimate {
        probabilities,
        confidences: vec![0.9, 0.7],
    }))
}

#[tokio::test]
async fn test_pmt_parity_series() {
    let log = CallLog::new();

    let mut engine = Experiment::new(
        "Exp",
        spec(2),
        pmt_hardware(&log, vec![0, 10]),
        RecordingSequence::default(),
    )
    .prepare(&pmt_parameters("pmt_parity", 2.0))
    .await
    .unwrap();
    engine.run_scan().await.unwrap();

    let data = &engine.results()["A"];
    assert_eq!(data.series_names(), &["dark_ions:0", "dark_ions:1", "parity"]);
    assert_eq!(data.series("parity").unwrap(), &[0.0, 0.0]);
    assert_eq!(log.count(|c| matches!(c, DeviceCall::PmtCount)).await, 4);
}

#[tokio::test]
async fn test_camera_states_run() {
    let log = CallLog::new();
    let sink = MemoryResultSink::new();
    let hardware = camera_hardware(&log, MockCamera::new(8, 4, log.clone()).with_readout_delay(1));

    let mut engine = Experiment::new("Exp", spec(3), hardware, RecordingSequence::default())
        .with_detector(detector(vec![0.1, 0.2, 0.3, 0.4]))
        .with_sink(sink.clone())
        .with_settings(&fast_settings())
        .prepare(&camera_parameters("camera_states", 4.0, 2.0))
        .await
        .unwrap();
    let outcome = engine.run_scan().await.unwrap();
    engine.analyze().await.unwrap();

    assert_eq!(outcome, RunOutcome::Complete);
    let data = &engine.results()["A"];
    assert_eq!(data.series_names(), &["SS", "DS", "SD", "DD"]);
    assert_eq!(data.series("DD").unwrap(), &[0.4, 0.4, 0.4]);
    let confidence = data.confidence().unwrap();
    assert!(confidence.iter().all(|c| (c - 0.8).abs() < 1e-12));

    assert_eq!(log.count(|c| matches!(c, DeviceCall::CameraConfigure)).await, 1);
    assert_eq!(log.count(|c| *c == DeviceCall::CameraPrepare(4)).await, 3);
    assert_eq!(log.count(|c| matches!(c, DeviceCall::CameraTrigger)).await, 12);
    assert_eq!(log.count(|c| *c == DeviceCall::CameraRead(4)).await, 3);
    assert_eq!(log.count(|c| matches!(c, DeviceCall::CameraRestore)).await, 1);

    let store = sink.snapshot().await;
    assert_eq!(store.dataset("A", "confidence").len(), 3);
    assert!(store.raw.is_empty());
}

#[tokio::test]
async fn test_camera_parity_takes_detector_parity() {
    let log = CallLog::new();
    let hardware = camera_hardware(&log, MockCamera::new(4, 4, log.clone()));

    let mut engine = Experiment::new("Exp", spec(1), hardware, RecordingSequence::default())
        .with_detector(detector(vec![0.25, 0.25, 0.25, 0.25, -0.5]))
        .with_settings(&fast_settings())
        .prepare(&camera_parameters("camera_parity", 2.0, 2.0))
        .await
        .unwrap();
    engine.run_scan().await.unwrap();

    assert_eq!(engine.results()["A"].series("parity").unwrap(), &[-0.5]);
}

#[tokio::test]
async fn test_camera_ndim_rejected_before_hardware() {
    let log = CallLog::new();
    let hardware = camera_hardware(&log, MockCamera::new(4, 4, log.clone()));
    let spec = ScanSpec::new().sequence(
        "A",
        SequenceScan::new("Grid")
            .axis("A.a", Scannable::explicit(vec![1.0, 2.0]))
            .axis("A.b", Scannable::explicit(vec![3.0]))
            .ndim(),
    );

    let result = Experiment::new("Exp", spec, hardware, RecordingSequence::default())
        .with_detector(detector(vec![0.5, 0.5]))
        .prepare(&camera_parameters("camera", 1.0, 2.0))
        .await;

    assert!(matches!(result, Err(ScanError::Configuration(_))));
    assert!(log.calls().await.is_empty());
}

#[tokio::test]
async fn test_camera_mode_requires_detector() {
    let log = CallLog::new();
    let hardware = camera_hardware(&log, MockCamera::new(4, 4, log.clone()));

    let result = Experiment::new("Exp", spec(1), hardware, RecordingSequence::default())
        .prepare(&camera_parameters("camera", 1.0, 1.0))
        .await;

    assert!(matches!(result, Err(ScanError::Configuration(_))));
    assert!(log.calls().await.is_empty());
}

#[tokio::test]
async fn test_stalled_camera_times_out_and_restores() {
    let log = CallLog::new();
    let hardware = camera_hardware(&log, MockCamera::new(4, 4, log.clone()).stalled());

    let mut engine = Experiment::new("Exp", spec(2), hardware, RecordingSequence::default())
        .with_detector(detector(vec![0.5, 0.5]))
        .with_settings(&fast_settings())
        .prepare(&camera_parameters("camera", 1.0, 2.0))
        .await
        .unwrap();
    let err = engine.run_scan().await.unwrap_err();

    assert!(matches!(err, ScanError::Device(DeviceError::Timeout(_))));
    assert_eq!(log.count(|c| matches!(c, DeviceCall::CameraWait)).await, 3);
    assert_eq!(log.count(|c| matches!(c, DeviceCall::CameraAbort)).await, 1);
    assert_eq!(restore_count(&log).await, 1);
}

#[tokio::test]
async fn test_line_trigger_aligns_every_shot() {
    let log = CallLog::new();
    let hardware = pmt_hardware(&log, vec![1])
        .with_line_trigger(Box::new(MockLineTrigger::new(2, log.clone())));
    let params = pmt_parameters("pmt", 3.0)
        .with("line_trigger_settings.enabled", true)
        .with_units("line_trigger_settings.offset_duration", 100.0, "us");

    let mut engine = Experiment::new("Exp", spec(2), hardware, RecordingSequence::default())
        .with_settings(&fast_settings())
        .prepare(&params)
        .await
        .unwrap();
    engine.run_scan().await.unwrap();

    assert_eq!(log.count(|c| matches!(c, DeviceCall::AtMu(_))).await, 6);
    assert_eq!(log.count(|c| matches!(c, DeviceCall::LineGate)).await, 18);
    // only the restore barrier; shots are timed by the trigger
    assert_eq!(log.count(|c| matches!(c, DeviceCall::BreakRealtime)).await, 1);
}

#[tokio::test]
async fn test_dead_line_trigger_is_bounded() {
    let log = CallLog::new();
    let hardware =
        pmt_hardware(&log, vec![1]).with_line_trigger(Box::new(MockLineTrigger::dead(log.clone())));
    let params = pmt_parameters("pmt", 1.0).with("line_trigger_settings.enabled", true);

    let mut engine = Experiment::new("Exp", spec(2), hardware, RecordingSequence::default())
        .with_settings(&fast_settings())
        .prepare(&params)
        .await
        .unwrap();
    let err = engine.run_scan().await.unwrap_err();

    assert!(matches!(err, ScanError::Device(DeviceError::Timeout(_))));
    assert_eq!(log.count(|c| matches!(c, DeviceCall::LineGate)).await, 4);
    assert_eq!(restore_count(&log).await, 1);
}

#[tokio::test]
async fn test_line_trigger_device_required() {
    let log = CallLog::new();
    let params = pmt_parameters("pmt", 1.0).with("line_trigger_settings.enabled", true);

    let result = Experiment::new(
        "Exp",
        spec(1),
        pmt_hardware(&log, vec![1]),
        RecordingSequence::default(),
    )
    .prepare(&params)
    .await;

    assert!(matches!(
        result,
        Err(ScanError::Device(DeviceError::NotConfigured(ref name))) if name == "line_trigger"
    ));
}

#[tokio::test]
async fn test_restore_sequence_order() {
    let log = CallLog::new();

    let mut engine = Experiment::new(
        "Exp",
        spec(1),
        pmt_hardware(&log, vec![1]),
        RecordingSequence::default(),
    )
    .prepare(&pmt_parameters("pmt", 1.0))
    .await
    .unwrap();
    engine.run_scan().await.unwrap();

    let calls = log.calls().await;
    let tail = &calls[calls.len() - 11..];
    assert_eq!(
        tail,
        &[
            DeviceCall::CoreReset,
            DeviceCall::CpldInit("urukul0_cpld".into()),
            DeviceCall::BreakRealtime,
            DeviceCall::DdsInit("dds_397".into()),
            DeviceCall::DdsSet {
                name: "dds_397".into(),
                frequency_hz: 78e6,
                amplitude: 0.5,
            },
            DeviceCall::DdsSetAtt {
                name: "dds_397".into(),
                attenuation_db: 10.0,
            },
            DeviceCall::DdsSwitch {
                name: "dds_397".into(),
                on: true,
            },
            DeviceCall::DdsInit("dds_729G".into()),
            DeviceCall::DdsSet {
                name: "dds_729G".into(),
                frequency_hz: 220e6,
                amplitude: 1.0,
            },
            DeviceCall::DdsSetAtt {
                name: "dds_729G".into(),
                attenuation_db: 5.0,
            },
            DeviceCall::DdsSwitch {
                name: "dds_729G".into(),
                on: false,
            },
        ]
    );
}

#[tokio::test]
async fn test_restore_retries_underflow_once() {
    let log = CallLog::new();
    let hardware = Hardware::new(Box::new(MockCore::new(log.clone())))
        .with_cpld(Box::new(MockCpld::new("urukul0_cpld", log.clone())))
        .with_dds(Box::new(
            MockDds::new("dds_729G", log.clone()).with_init_underflows(1),
        ))
        .with_dds(Box::new(MockDds::new("dds_397", log.clone())))
        .with_pmt(Box::new(MockPmt::scripted(vec![1], log.clone())));

    let mut engine = Experiment::new("Exp", spec(1), hardware, RecordingSequence::default())
        .prepare(&pmt_parameters("pmt", 1.0))
        .await
        .unwrap();
    engine.run_scan().await.unwrap();

    assert_eq!(
        log.count(|c| *c == DeviceCall::DdsInit("dds_729G".into())).await,
        2
    );
    assert_eq!(log.count(|c| matches!(c, DeviceCall::BreakRealtime)).await, 3);
}

#[tokio::test]
async fn test_restore_fault_is_reported() {
    let log = CallLog::new();
    let hardware = Hardware::new(Box::new(MockCore::new(log.clone())))
        .with_dds(Box::new(
            MockDds::new("dds_729G", log.clone()).with_init_fault("bus error"),
        ))
        .with_dds(Box::new(MockDds::new("dds_397", log.clone())))
        .with_pmt(Box::new(MockPmt::scripted(vec![1], log.clone())));

    let mut engine = Experiment::new("Exp", spec(1), hardware, RecordingSequence::default())
        .prepare(&pmt_parameters("pmt", 1.0))
        .await
        .unwrap();
    let err = engine.run_scan().await.unwrap_err();

    assert!(matches!(err, ScanError::Device(DeviceError::Fault { .. })));
    assert_eq!(restore_count(&log).await, 1);
}

#[tokio::test]
async fn test_missing_cw_channel_rejected() {
    let log = CallLog::new();
    let hardware = Hardware::new(Box::new(MockCore::new(log.clone())))
        .with_dds(Box::new(MockDds::new("dds_729G", log.clone())))
        .with_pmt(Box::new(MockPmt::scripted(vec![1], log.clone())));

    let result = Experiment::new("Exp", spec(1), hardware, RecordingSequence::default())
        .prepare(&pmt_parameters("pmt", 1.0))
        .await;

    assert!(matches!(
        result,
        Err(ScanError::Device(DeviceError::NotConfigured(ref name))) if name == "dds_397"
    ));
    assert!(log.calls().await.is_empty());
}
