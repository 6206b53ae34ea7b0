/*
 * Integration tests for Flexline
 *
 * These drive a station end to end against the simulated line and check
 * what lands in the fault history and on the relay.
 */

use std::time::Duration;

use fl_core::constants::relay::{OFF_FRAME, ON_FRAME};
use fl_core::sim::{AutoFrames, DetectionFixture, SimBackend, SimCamera};
use fl_core::{
    AcquisitionManager, BoundingBox, DetectorClass, FaultQuery, FaultStore, FaultType, FlexlineError,
    InspectionSettings, ModelRegistry, PixelFormat, RelayController, SlotId, Station,
};
use flexline::cli::FaultFilterArgs;
use flexline::runtime::{drive, simulated_line_with};
use serial_test::serial;
use tempfile::TempDir;

fn fast_settings(tmp: &TempDir) -> InspectionSettings {
    let mut settings = InspectionSettings::default();
    settings.storage.database_path = tmp.path().join("faults.db");
    settings.camera.nail_camera_resolution = (16, 16);
    settings.camera.nail_camera_interval_ms = 25;
    settings.camera.board_camera_timeout_ms = 100;
    settings.relay.trigger_duration_s = 0.0;
    settings
}

fn board_camera(serial: &str) -> SimCamera {
    SimCamera::new(serial).with_auto_frames(AutoFrames {
        width: 64,
        height: 48,
        format: PixelFormat::BayerRG8,
        period: Some(Duration::from_millis(20)),
    })
}

#[tokio::test]
#[serial]
async fn test_board_misalignment_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let mut settings = fast_settings(&tmp);
    settings.measurement.target_measurement_mm = 10.0;
    settings.assignments.board[1] = Some("B-1".into());

    let camera = board_camera("B-1");
    let mut line = simulated_line_with(
        settings,
        SimBackend::new(vec![camera.clone()]),
        vec![camera.clone()],
        &DetectionFixture::aligned_board(),
    )
    .unwrap();

    let counters = drive(
        &mut line.station,
        &mut line.events,
        tokio::time::sleep(Duration::from_millis(400)),
    )
    .await;

    assert!(counters.board_defects > 0);
    assert_eq!(counters.nail_defects, 0);

    let records = line.station.store().all().unwrap();
    assert_eq!(records.len(), counters.board_defects);
    for record in &records {
        assert_eq!(record.fault_type, FaultType::BoardAlignment);
        assert_eq!(record.image_index, 2);
        assert!((record.measurement_mm.unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(record.details, "Measurement 20.0mm outside tolerance of 10mm ±5mm");
    }

    // Every pulse is an ON frame followed by an OFF frame
    let frames = line.relay_link.frames();
    assert_eq!(frames.len(), records.len() * 2);
    for pair in frames.chunks(2) {
        assert_eq!(pair[0], ON_FRAME.to_vec());
        assert_eq!(pair[1], OFF_FRAME.to_vec());
    }

    // Shutdown returned the device and closed it
    assert!(!line.station.manager().is_in_use("B-1"));
    assert!(!camera.stats().open);
}

#[tokio::test]
#[serial]
async fn test_aligned_board_is_clean() {
    let tmp = TempDir::new().unwrap();
    let mut settings = fast_settings(&tmp);
    settings.measurement.target_measurement_mm = 20.0;
    settings.assignments.board[0] = Some("B-0".into());

    let camera = board_camera("B-0");
    let mut line = simulated_line_with(
        settings,
        SimBackend::new(vec![camera.clone()]),
        vec![camera],
        &DetectionFixture::aligned_board(),
    )
    .unwrap();

    let counters = drive(
        &mut line.station,
        &mut line.events,
        tokio::time::sleep(Duration::from_millis(300)),
    )
    .await;

    assert!(counters.detections > 0);
    assert_eq!(counters.board_defects, 0);
    assert!(line.station.store().all().unwrap().is_empty());
    assert!(line.relay_link.frames().is_empty());
    assert!(line.station.run_stats().unwrap().completed() >= 1);
}

#[tokio::test]
#[serial]
async fn test_nail_and_board_together() {
    let tmp = TempDir::new().unwrap();
    let mut settings = fast_settings(&tmp);
    settings.measurement.target_measurement_mm = 20.0;
    settings.assignments.board[0] = Some("B-0".into());
    settings.assignments.nail[0] = Some("N-0".into());

    let nail = SimCamera::new("N-0").with_auto_frames(AutoFrames {
        width: 32,
        height: 32,
        format: PixelFormat::BayerRG8,
        period: None,
    });
    let cameras = vec![board_camera("B-0"), nail];
    let fixture = DetectionFixture {
        nail: vec![BoundingBox::new(2, 2, 6, 6, 0.8, "nail")],
        ..DetectionFixture::aligned_board()
    };
    let mut line = simulated_line_with(settings, SimBackend::new(cameras.clone()), cameras, &fixture).unwrap();

    let counters = drive(
        &mut line.station,
        &mut line.events,
        tokio::time::sleep(Duration::from_millis(300)),
    )
    .await;

    assert!(counters.nail_defects > 0);
    assert_eq!(counters.board_defects, 0);
    let stats = FaultStore::statistics(&line.station.store().all().unwrap());
    assert_eq!(stats.board(), 0);
    assert_eq!(stats.nail(), counters.nail_defects);
}

#[test]
fn test_device_claimed_by_one_slot_only() {
    let tmp = TempDir::new().unwrap();
    let settings = fast_settings(&tmp);
    let camera = SimCamera::new("SHARED");

    let mut manager = AcquisitionManager::new(Box::new(SimBackend::new(vec![camera.clone()])));
    manager.initialize().unwrap();
    let store = FaultStore::open(&settings.storage.database_path).unwrap();
    let relay = RelayController::new(settings.relay.port.clone(), settings.relay.baudrate);
    let (mut station, _events) = Station::new(settings, manager, ModelRegistry::new(), store, Box::new(relay));

    let nail = SlotId::new(DetectorClass::Nail, 0);
    let board = SlotId::new(DetectorClass::Board, 0);
    station.start_slot(nail, "SHARED").unwrap();

    let err = station.start_slot(board, "SHARED").unwrap_err();
    assert!(matches!(err, FlexlineError::DeviceInUse(_)));
    assert_eq!(station.active_slots(), vec![nail]);

    // Once released, the device can move to the other slot
    assert!(station.stop_slot(nail));
    station.start_slot(board, "SHARED").unwrap();
    assert_eq!(station.active_slots(), vec![board]);
    station.shutdown();
    assert!(!camera.stats().open);
}

#[test]
fn test_fault_history_filter_and_export() {
    let tmp = TempDir::new().unwrap();
    let store = FaultStore::open(&tmp.path().join("faults.db")).unwrap();

    store.log_fault(FaultType::Nail, 1, "Detected 2 nails", None).unwrap();
    store
        .log_fault(
            FaultType::BoardAlignment,
            2,
            "Measurement 31.0mm outside tolerance of 20mm ±5mm",
            Some(31.0),
        )
        .unwrap();

    let nails_only = FaultFilterArgs {
        fault_type: "Nail".into(),
        ..FaultFilterArgs::default()
    };
    let records = store.query(&nails_only.to_query().unwrap()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].details, "Detected 2 nails");

    let all = store.query(&FaultQuery::default()).unwrap();
    assert_eq!(all.len(), 2);

    let csv_path = tmp.path().join("export.csv");
    FaultStore::export_csv(&csv_path, &all).unwrap();
    let text = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "Timestamp,Type,Image,Details,Measurement");
    assert_eq!(lines.len(), 3);
    assert!(text.contains("Board Alignment,2,"));
    assert!(text.contains(",31"));

    let removed = store.delete(&records[0].timestamp, FaultType::Nail, 1).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.all().unwrap().len(), 1);
}

#[test]
fn test_fault_history_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("faults.db");
    {
        let store = FaultStore::open(&path).unwrap();
        store.log_fault(FaultType::Nail, 2, "Detected 1 nails", None).unwrap();
    }
    let store = FaultStore::open(&path).unwrap();
    let records = store.all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].image_index, 2);
}
