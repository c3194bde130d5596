//! Worker loop behavior against the in-memory instrument simulator.

use std::time::Duration;

use spectro::protocol::opcodes;
use spectro::transport::mock::MockTransport;
use spectro::{worker, Command, ConfigurationRecord, DriverSettings, WorkerEvent, WorkerHandle};

fn test_record() -> ConfigurationRecord {
    ConfigurationRecord {
        model: "SIM-785".into(),
        serial_number: "SIM-0042".into(),
        has_laser: true,
        has_cooling: true,
        active_pixels_horizontal: 64,
        actual_pixels_horizontal: 64,
        active_pixels_vertical: 70,
        startup_integration_time_ms: 10,
        min_integration_time_ms: 1,
        max_integration_time_ms: 60_000,
        adc_to_degc_coeffs: vec![-50.0, 0.04, 0.0],
        degc_to_dac_coeffs: vec![2000.0, -50.0, 0.0],
        min_temp_degc: -10,
        max_temp_degc: 25,
        laser_power_coeffs: vec![1.0, 0.2, 0.0, 0.0],
        max_laser_power_mw: 450.0,
        min_laser_power_mw: 10.0,
        ..ConfigurationRecord::default()
    }
}

fn test_settings() -> DriverSettings {
    let _ = env_logger::builder().is_test(true).try_init();
    DriverSettings {
        poll_interval_ms: 1,
        settling_delay_ms: 0,
        acquire_timeout_ms: 1_000,
        ..DriverSettings::default()
    }
}

async fn next_event(handle: &mut WorkerHandle) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(10), handle.events.recv())
        .await
        .expect("timed out waiting for worker event")
        .expect("worker event channel closed")
}

#[tokio::test]
async fn snapshot_and_readings_flow_end_to_end() {
    let transport = MockTransport::new(&test_record());
    let mut handle = worker::spawn(Box::new(transport), test_settings());

    let record = handle
        .configuration()
        .await
        .expect("worker failed to connect");
    assert_eq!(record.serial_number, "SIM-0042");
    assert_eq!(record.pixels(), 64);

    let mut last_count = 0;
    for _ in 0..3 {
        match next_event(&mut handle).await {
            WorkerEvent::Reading(reading) => {
                assert_eq!(reading.spectrum.len(), 64);
                assert!(reading.session_count > last_count, "counts must increase");
                last_count = reading.session_count;
                assert_eq!(reading.integration_time_ms, 10);
                assert!(reading.detector_temperature_degc.is_some());
                assert!(reading.laser_temperature_degc.is_some());
                assert!(reading.failure.is_none());
            }
            other => panic!("expected a reading, got {other:?}"),
        }
    }

    handle.request_shutdown();
    handle.join().await;
}

#[tokio::test]
async fn laser_is_disabled_before_poison_terminates_worker() {
    let transport = MockTransport::new(&test_record());
    let state = transport.state();
    let handle = worker::spawn(Box::new(transport), test_settings());

    // the poison is the literal next command, yet the laser must still be
    // enabled first and then forced off during shutdown
    assert!(handle.send(Command::SetLaserEnable(true)));
    assert!(handle.send(Command::Poison));
    handle.join().await;

    let state = state.lock().unwrap();
    assert!(!state.laser_enabled, "laser must be off after shutdown");
    assert!(state.closed, "transport must be released");

    let laser_writes: Vec<u16> = state
        .writes
        .iter()
        .filter(|(op, _, _)| *op == opcodes::SET_LASER_ENABLE)
        .map(|(_, value, _)| *value)
        .collect();
    assert_eq!(laser_writes, vec![1, 0], "enable, then safety disable");
}

#[tokio::test]
async fn queued_commands_are_deduplicated_per_setting() {
    let transport = MockTransport::new(&test_record());
    let state = transport.state();
    let handle = worker::spawn(Box::new(transport), test_settings());

    assert!(handle.send(Command::SetIntegrationTimeMs(20)));
    assert!(handle.send(Command::SetScansToAverage(2)));
    assert!(handle.send(Command::SetIntegrationTimeMs(30)));
    assert!(handle.send(Command::SetIntegrationTimeMs(40)));
    assert!(handle.send(Command::Poison));
    handle.join().await;

    let state = state.lock().unwrap();
    let integration_writes: Vec<u16> = state
        .writes
        .iter()
        .filter(|(op, _, _)| *op == opcodes::SET_INTEGRATION_TIME)
        .map(|(_, value, _)| *value)
        .collect();
    // the startup write from connect, then only the last queued value
    assert_eq!(integration_writes, vec![10, 40]);
}

#[tokio::test]
async fn transient_transport_failure_is_published_not_fatal() {
    let transport = MockTransport::new(&test_record());
    let state = transport.state();
    state.lock().unwrap().fail_next_bulk = true;
    let mut handle = worker::spawn(Box::new(transport), test_settings());

    match next_event(&mut handle).await {
        WorkerEvent::Error(message) => {
            assert!(!message.is_empty());
        }
        other => panic!("expected an error marker, got {other:?}"),
    }
    // polling continues after the error
    match next_event(&mut handle).await {
        WorkerEvent::Reading(reading) => assert_eq!(reading.spectrum.len(), 64),
        other => panic!("expected a reading, got {other:?}"),
    }

    handle.request_shutdown();
    handle.join().await;
}

#[tokio::test]
async fn scan_averaging_flags_the_completing_reading() {
    let transport = MockTransport::new(&test_record());
    let mut handle = worker::spawn(Box::new(transport), test_settings());
    assert!(handle.send(Command::SetScansToAverage(2)));

    let mut saw_averaged = false;
    for _ in 0..4 {
        if let WorkerEvent::Reading(reading) = next_event(&mut handle).await {
            if reading.averaged {
                assert_eq!(reading.sum_count, 2);
                saw_averaged = true;
                break;
            }
        }
    }
    assert!(saw_averaged, "no reading completed the averaging cycle");

    handle.request_shutdown();
    handle.join().await;
}

#[tokio::test]
async fn editable_config_update_writes_back_through_command_channel() {
    let record = test_record();
    let transport = MockTransport::new(&record);
    let state = transport.state();
    let handle = worker::spawn(Box::new(transport), test_settings());

    let mut edited = record.clone();
    edited.user_text = "bench 7 relabel".into();
    edited.serial_number = "HACKED".into(); // not editable; must not stick

    assert!(handle.send(Command::UpdateEditableConfig(Box::new(edited))));
    assert!(handle.send(Command::WriteConfig));
    assert!(handle.send(Command::Poison));
    handle.join().await;

    let state = state.lock().unwrap();
    let written = ConfigurationRecord::decode(&state.pages).expect("written pages decode");
    assert_eq!(written.user_text, "bench 7 relabel");
    assert_eq!(written.serial_number, "SIM-0042");
}

#[tokio::test]
async fn auto_exposure_command_publishes_a_result() {
    let record = test_record();
    let transport = MockTransport::with_model(&record, 40.0, 1_000.0);
    let mut handle = worker::spawn(Box::new(transport), test_settings());

    let request = spectro::AutoExposureRequest {
        max_total_ms: 4_000,
        ..spectro::AutoExposureRequest::default()
    };
    assert!(handle.send(Command::RunAutoExposure(Box::new(request))));

    let result = loop {
        match next_event(&mut handle).await {
            WorkerEvent::AutoExposure(result) => break result,
            WorkerEvent::Reading(_) | WorkerEvent::KeepAlive => continue,
            other => panic!("unexpected event {other:?}"),
        }
    };
    assert!(result.converged, "linear model must reach the window");
    assert!(result.averaged_count >= 1);
    assert_eq!(result.spectrum.len(), 64);
    // dark-subtracted signal sits inside the window minus the dark floor
    let peak = result.spectrum.iter().cloned().fold(f64::MIN, f64::max);
    assert!(peak > 35_000.0 && peak < 50_000.0, "peak was {peak}");

    handle.request_shutdown();
    handle.join().await;
}
