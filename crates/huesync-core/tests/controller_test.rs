// End-to-end controller runs against a mocked bridge.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{body_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use huesync_core::{
    BridgeConfig, ChannelValue, Command, CommandResult, ConnectionState, Controller, CoreError,
    SinkEvent, SyncTuning,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn fast_tuning() -> SyncTuning {
    SyncTuning {
        initial_sync_delay: Duration::from_millis(10),
        snapshot_stagger: Duration::from_millis(5),
        button_snapshot_delay: Duration::from_millis(5),
        snapshot_retry_step: Duration::from_millis(10),
        resync_debounce: Duration::from_millis(20),
        core_failure_backoff_initial: Duration::from_millis(50),
        core_failure_backoff_max: Duration::from_millis(200),
        rename_verify_delay: Duration::from_millis(20),
        poll_interval_stream_down: Duration::from_secs(5),
        ..SyncTuning::default()
    }
}

fn config(server: &MockServer) -> BridgeConfig {
    let mut config = BridgeConfig::new(
        Url::parse(&server.uri()).unwrap(),
        SecretString::from("test-key".to_owned()),
    );
    config.event_stream_enabled = false;
    config.tuning = fast_tuning();
    config
}

fn envelope(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"errors": [], "data": data}))
}

async fn mount_collection(server: &MockServer, resource: &str, data: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/clip/v2/resource/{resource}")))
        .respond_with(envelope(data))
        .mount(server)
        .await;
}

/// A bridge with one dimmable lamp; every other collection is empty.
async fn lamp_bridge() -> MockServer {
    let server = MockServer::start().await;
    mount_collection(
        &server,
        "device",
        json!([{
            "id": "d1",
            "type": "device",
            "metadata": {"name": "Lamp", "archetype": "classic_bulb"},
            "product_data": {"model_id": "LCA001", "manufacturer_name": "Signify",
                             "software_version": "1.104.2"},
            "services": [{"rid": "l1", "rtype": "light"}]
        }]),
    )
    .await;
    mount_collection(
        &server,
        "light",
        json!([{
            "id": "l1",
            "type": "light",
            "owner": {"rid": "d1", "rtype": "device"},
            "on": {"on": true},
            "dimming": {"brightness": 42.0}
        }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/clip/v2/resource/[a-z_]+$"))
        .respond_with(envelope(json!([])))
        .with_priority(10)
        .mount(&server)
        .await;
    server
}

async fn synced(server: &MockServer) -> Controller {
    let controller = Controller::new(config(server));
    controller.connect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), controller.wait_for_full_sync())
        .await
        .unwrap()
        .unwrap();
    controller
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_sync_populates_store() {
    let server = lamp_bridge().await;
    let controller = synced(&server).await;

    let devices = controller.devices_snapshot();
    assert_eq!(devices.len(), 1);
    let entry = &devices[0];
    assert_eq!(entry.device.name, "Lamp");
    assert_eq!(entry.device.manufacturer, "Signify");
    let ids: Vec<&str> = entry.channels.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["on", "bri"]);

    let store = controller.store();
    assert!(store.is_connected());
    let on = store
        .value_of(&huesync_core::ChannelKey::new("d1", "on"))
        .unwrap();
    assert_eq!(on.value, ChannelValue::Bool(true));
    assert_eq!(
        *controller.connection_state().borrow(),
        ConnectionState::Connected
    );

    controller.disconnect().await;
}

#[tokio::test]
async fn test_channel_write_puts_and_echoes() {
    let server = lamp_bridge().await;
    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/light/l1"))
        .and(body_json(json!({"dimming": {"brightness": 100.0}})))
        .respond_with(envelope(json!([{"rid": "l1", "rtype": "light"}])))
        .expect(1)
        .mount(&server)
        .await;

    let controller = synced(&server).await;
    let result = controller
        .execute(Command::ChannelWrite {
            device_id: "d1".into(),
            channel_id: "bri".into(),
            value: json!(250),
        })
        .await
        .unwrap();
    assert_eq!(
        result,
        CommandResult::Written {
            value: Some(ChannelValue::Float(100.0))
        }
    );

    controller.disconnect().await;
}

#[tokio::test]
async fn test_bridge_rejection_is_verbatim() {
    let server = lamp_bridge().await;
    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/light/l1"))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!({
            "errors": [{"description": "device (light) is \"soft off\""}],
            "data": []
        })))
        .mount(&server)
        .await;

    let controller = synced(&server).await;
    let err = controller
        .execute(Command::ChannelWrite {
            device_id: "d1".into(),
            channel_id: "on".into(),
            value: json!(false),
        })
        .await
        .unwrap_err();
    match err {
        CoreError::Rejected { message } => assert!(message.contains("soft off")),
        other => panic!("unexpected {other:?}"),
    }

    controller.disconnect().await;
}

#[tokio::test]
async fn test_rename_is_verified() {
    let server = lamp_bridge().await;
    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/device/d1"))
        .and(body_json(json!({"metadata": {"name": "Desk"}})))
        .respond_with(envelope(json!([{"rid": "d1", "rtype": "device"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/clip/v2/resource/device/d1"))
        .respond_with(envelope(json!([{
            "id": "d1",
            "type": "device",
            "metadata": {"name": "Desk", "archetype": "classic_bulb"},
            "services": [{"rid": "l1", "rtype": "light"}]
        }])))
        .mount(&server)
        .await;

    let controller = synced(&server).await;
    let mut events = controller.events();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        controller.execute(Command::DeviceRename {
            device_id: "d1".into(),
            name: "  Desk ".into(),
        }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(result, CommandResult::Ok);

    let event = events.recv().await.unwrap();
    assert!(matches!(
        &*event,
        SinkEvent::DeviceUpsert { device, .. } if device.name == "Desk"
    ));

    controller.disconnect().await;
}

#[tokio::test]
async fn test_core_failure_surfaces_before_first_sync() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clip/v2/resource/device"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let controller = Controller::new(config(&server));
    controller.connect().await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), controller.wait_for_full_sync())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, CoreError::CoreResourceFailure { .. }));
    assert!(!controller.store().is_connected());

    controller.disconnect().await;
}

#[tokio::test]
async fn test_commands_fail_after_disconnect() {
    let server = lamp_bridge().await;
    let controller = synced(&server).await;
    controller.disconnect().await;

    let err = controller
        .execute(Command::ChannelWrite {
            device_id: "d1".into(),
            channel_id: "on".into(),
            value: json!(true),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Disconnected));
}
