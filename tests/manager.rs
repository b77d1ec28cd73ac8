mod common;

use avs4000::{DeviceControllerState, DeviceManager};
use common::{init_tracing, MockDaemon};
use serde_json::json;

#[test]
fn test_enumerate() {
    init_tracing();
    let daemon = MockDaemon::builder()
        .devices(json!({
            "dm": {"version": "2.4.1"},
            "1000200": {"dn": 2, "addr": "1-1.4", "sn": "1000200", "model": "AVS4000", "type": "usb"},
            "1000100": {"dn": 1, "addr": "1-1.3", "sn": "1000100", "model": "AVS4000", "type": "usb"},
        }))
        .start();
    let manager = DeviceManager::new("127.0.0.1", daemon.control_port);

    let devices = manager.enumerate().unwrap();

    assert_eq!(daemon.requests(), vec![json!(["get"])]);
    assert_eq!(
        devices.iter().map(|d| d.device_number).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(devices[0].serial_number, "1000100");
    assert_eq!(devices[1].address, "1-1.4");
}

#[test]
fn test_enumerate_rejected_is_empty() {
    init_tracing();
    let daemon = MockDaemon::builder().reject(|_| true).start();
    let manager = DeviceManager::new("127.0.0.1", daemon.control_port);

    assert!(manager.enumerate().unwrap().is_empty());
}

#[test]
fn test_controllers() {
    init_tracing();
    let daemon = MockDaemon::builder()
        .devices(json!({
            "1000100": {"dn": 1},
            "1000300": {"dn": 3},
        }))
        .start();
    let manager = DeviceManager::new("127.0.0.1", daemon.control_port);

    let controllers = manager.controllers().unwrap();

    assert_eq!(controllers.len(), 2);
    assert_eq!(controllers[1].device_number(), 3);
    assert_eq!(controllers[1].data_port(), 12703);
    assert_eq!(controllers[1].stream_id(), "avs4000_003_000");
    assert!(controllers
        .iter()
        .all(|c| c.state() == DeviceControllerState::Uninitialized));
}

#[test]
fn test_enumerate_no_daemon() {
    init_tracing();
    // bind and drop to find a port nobody listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    assert!(matches!(
        DeviceManager::new("127.0.0.1", port).enumerate(),
        Err(avs4000::Error::Transport(_))
    ));
}
