//! Open/close lifecycle of the selected adapter.

use ble_adapter_console_lib::config::driver_config::{
    DriverLogLevel, FlowControl, OpenOptions, Parity,
};
use ble_adapter_console_lib::core::bluetooth::{BleError, DriverError, Notification};

use crate::mock_driver::{Console, DriverCall, wait_until};

fn is_subscribe(port: &str) -> impl Fn(&DriverCall) -> bool + '_ {
    move |call| matches!(call, DriverCall::Subscribe { port: p } if p == port)
}

fn is_open(port: &str) -> impl Fn(&DriverCall) -> bool + '_ {
    move |call| matches!(call, DriverCall::Open { port: p, .. } if p == port)
}

fn is_close(port: &str) -> impl Fn(&DriverCall) -> bool + '_ {
    move |call| matches!(call, DriverCall::Close { port: p } if p == port)
}

#[tokio::test]
async fn open_uses_fixed_driver_configuration() {
    let mut console = Console::new(&["COM3"]);
    console.manager.discover_adapters().await.unwrap();
    console.drain();

    let state = console.manager.open_adapter("COM3").await.unwrap();
    assert!(state.available);
    assert_eq!(console.kinds(), ["ADAPTER_OPENING", "ADAPTER_OPENED"]);
    assert_eq!(console.manager.selected_adapter().unwrap().port, "COM3");

    let options = console
        .driver
        .log
        .calls()
        .into_iter()
        .find_map(|call| match call {
            DriverCall::Open { options, .. } => Some(options),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        options,
        OpenOptions {
            baud_rate: 115_200,
            parity: Parity::None,
            flow_control: FlowControl::None,
            event_interval: 100,
            log_level: DriverLogLevel::Trace,
        }
    );
}

#[tokio::test]
async fn listeners_are_registered_before_open_is_issued() {
    let console = Console::with_open(&["COM3"], "COM3").await;

    let log = &console.driver.log;
    let subscribed = log.position(is_subscribe("COM3")).unwrap();
    let opened = log.position(is_open("COM3")).unwrap();
    assert!(subscribed < opened, "{:?}", log.calls());
}

#[tokio::test]
async fn opening_another_adapter_closes_the_current_one_first() {
    let mut console = Console::with_open(&["COM3", "COM4"], "COM4").await;

    console.manager.open_adapter("COM3").await.unwrap();

    let log = &console.driver.log;
    let closed = log.position(is_close("COM4")).unwrap();
    let opened = log.position(is_open("COM3")).unwrap();
    assert!(closed < opened);
    assert_eq!(
        console.kinds(),
        ["ADAPTER_CLOSED", "ADAPTER_OPENING", "ADAPTER_OPENED"]
    );
    assert_eq!(console.manager.selected_adapter().unwrap().port, "COM3");
}

#[tokio::test]
async fn failed_close_does_not_block_the_swap() {
    let mut console = Console::with_open(&["COM3", "COM4"], "COM4").await;
    console.driver.adapter("COM4").fail_close("device busy");

    console.manager.open_adapter("COM3").await.unwrap();

    let log = &console.driver.log;
    assert!(log.position(is_close("COM4")).unwrap() < log.position(is_open("COM3")).unwrap());
    assert_eq!(
        console.kinds(),
        ["ADAPTER_ERROR", "ADAPTER_OPENING", "ADAPTER_OPENED"]
    );
    assert_eq!(console.manager.selected_adapter().unwrap().port, "COM3");
}

#[tokio::test]
async fn reopening_the_same_adapter_cycles_it() {
    let mut console = Console::with_open(&["COM3"], "COM3").await;

    console.manager.open_adapter("COM3").await.unwrap();

    assert_eq!(console.driver.log.count(is_close("COM3")), 1);
    assert_eq!(console.driver.log.count(is_open("COM3")), 2);
    assert_eq!(
        console.kinds(),
        ["ADAPTER_CLOSED", "ADAPTER_OPENING", "ADAPTER_OPENED"]
    );
}

#[tokio::test]
async fn opening_an_unknown_adapter_fails() {
    let mut console = Console::new(&["COM3"]);
    console.manager.discover_adapters().await.unwrap();
    console.drain();

    let result = console.manager.open_adapter("COM9").await;

    let expected = BleError::AdapterNotFound {
        port: "COM9".into(),
    };
    assert_eq!(result, Err(expected.clone()));
    assert_eq!(
        console.drain(),
        [Notification::AdapterError {
            adapter: None,
            error: expected,
        }]
    );
    assert_eq!(console.driver.log.position(is_open("COM9")), None);
    assert!(console.manager.selected_adapter().is_none());
}

#[tokio::test]
async fn failed_open_leaves_nothing_selected() {
    let mut console = Console::new(&["COM3"]);
    console.manager.discover_adapters().await.unwrap();
    console.drain();
    console.driver.adapter("COM3").fail_open("NRF_ERROR_TIMEOUT");

    let result = console.manager.open_adapter("COM3").await;

    assert_eq!(
        result,
        Err(BleError::AdapterOpen {
            port: "COM3".into(),
            source: DriverError::new("NRF_ERROR_TIMEOUT"),
        })
    );
    assert_eq!(console.kinds(), ["ADAPTER_OPENING", "ADAPTER_ERROR"]);
    assert!(console.manager.selected_adapter().is_none());
}

#[tokio::test]
async fn close_emits_closed_and_deselects() {
    let mut console = Console::with_open(&["COM3"], "COM3").await;

    console.manager.close_adapter("COM3").await.unwrap();

    assert_eq!(console.kinds(), ["ADAPTER_CLOSED"]);
    assert!(console.manager.selected_adapter().is_none());
    assert!(!console.manager.adapters()[0].available);
}

#[tokio::test]
async fn closing_an_adapter_that_is_not_open_skips_the_driver() {
    let mut console = Console::new(&["COM3"]);
    console.manager.discover_adapters().await.unwrap();
    console.drain();

    console.manager.close_adapter("COM3").await.unwrap();
    console.manager.close_adapter("COM3").await.unwrap();

    assert_eq!(console.kinds(), ["ADAPTER_CLOSED", "ADAPTER_CLOSED"]);
    assert_eq!(console.driver.log.position(is_close("COM3")), None);
}

#[tokio::test]
async fn closing_an_unknown_adapter_fails() {
    let mut console = Console::new(&["COM3"]);
    console.manager.discover_adapters().await.unwrap();
    console.drain();

    let result = console.manager.close_adapter("COM9").await;

    let expected = BleError::AdapterNotFound {
        port: "COM9".into(),
    };
    assert_eq!(result, Err(expected.clone()));
    assert_eq!(
        console.drain(),
        [Notification::AdapterError {
            adapter: None,
            error: expected,
        }]
    );
    assert_eq!(console.driver.log.position(is_close("COM9")), None);
    let ports: Vec<_> = console.manager.adapters().into_iter().map(|a| a.port).collect();
    assert_eq!(ports, ["COM3"]);
}

#[tokio::test]
async fn failed_close_still_deselects() {
    let mut console = Console::with_open(&["COM3"], "COM3").await;
    console.driver.adapter("COM3").fail_close("device busy");

    let result = console.manager.close_adapter("COM3").await;

    assert!(matches!(result, Err(BleError::AdapterClose { .. })));
    assert_eq!(console.kinds(), ["ADAPTER_ERROR"]);
    assert!(console.manager.selected_adapter().is_none());
}

#[tokio::test]
async fn hardware_events_are_relayed_while_open() {
    let mut console = Console::with_open(&["COM3"], "COM3").await;
    let adapter = console.driver.adapter("COM3");

    adapter.hardware_error("NRF_ERROR_INTERNAL");
    match console.next().await {
        Notification::AdapterError { adapter, error } => {
            assert_eq!(adapter.unwrap().port, "COM3");
            assert_eq!(
                error,
                BleError::AdapterHardware {
                    port: "COM3".into(),
                    source: DriverError::with_code(3, "NRF_ERROR_INTERNAL"),
                }
            );
        }
        other => panic!("expected ADAPTER_ERROR, got {}", other.kind()),
    }

    adapter.change_state(|state| state.scanning = true);
    match console.next().await {
        Notification::AdapterStateChanged { adapter } => assert!(adapter.scanning),
        other => panic!("expected ADAPTER_STATE_CHANGED, got {}", other.kind()),
    }
    assert!(console.manager.adapters()[0].scanning);
}

#[tokio::test]
async fn relaying_stops_after_close() {
    let mut console = Console::with_open(&["COM3"], "COM3").await;
    console.manager.close_adapter("COM3").await.unwrap();
    console.drain();

    let adapter = console.driver.adapter("COM3");
    adapter.hardware_error("late error");
    adapter.change_state(|state| state.advertising = true);

    assert!(console.settle().await.is_empty());
}

#[tokio::test]
async fn unplugging_the_open_adapter_deselects_it() {
    let mut console = Console::with_open(&["COM3"], "COM3").await;

    console.driver.unplug("COM3");

    assert_eq!(console.next().await.kind(), "ADAPTER_REMOVED");
    let manager = console.manager.clone();
    wait_until(|| manager.selected_adapter().is_none()).await;
}

#[tokio::test]
async fn unplugging_while_opening_leaves_nothing_selected() {
    let mut console = Console::new(&["COM3"]);
    console.manager.discover_adapters().await.unwrap();
    console.drain();
    let gate = console.driver.adapter("COM3").hold_open();

    let manager = console.manager.clone();
    let opening = tokio::spawn(async move { manager.open_adapter("COM3").await });
    let log = console.driver.log.clone();
    wait_until(move || log.count(is_open("COM3")) == 1).await;

    console.driver.unplug("COM3");
    let manager = console.manager.clone();
    wait_until(move || manager.adapters().is_empty()).await;
    gate.notify_one();

    assert_eq!(
        opening.await.unwrap(),
        Err(BleError::AdapterNotFound {
            port: "COM3".into(),
        })
    );
    assert!(console.manager.selected_adapter().is_none());
    assert_eq!(
        console.kinds(),
        ["ADAPTER_OPENING", "ADAPTER_REMOVED", "ADAPTER_ERROR"]
    );
}
