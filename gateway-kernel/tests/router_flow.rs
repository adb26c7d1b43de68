use gateway_devkit::{ReadingBuilder, TestHarness};
use gateway_kernel::models::{
    CommandCode, DataMessage, HUMIDIFIER_ACTUATOR_NAME, HUMIDITY_SENSOR_TYPE,
};
use gateway_kernel::mqtt::PubSubClient;
use gateway_kernel::resource::ResourceName;
use std::sync::Arc;

const SENSOR_TOPIC: &str = "PIOT/ConstrainedDevice/SensorMsg";
const COMMAND_TOPIC: &str = "PIOT/ConstrainedDevice/ActuatorCmd";

async fn started() -> TestHarness {
    let harness = TestHarness::new();
    harness.start().await.unwrap();
    harness
}

#[tokio::test]
async fn test_start_subscribes_inbound_topics() {
    let harness = started().await;
    let subscriptions = harness.mqtt_client.get_subscriptions();
    for resource in ResourceName::INBOUND {
        assert!(subscriptions.contains(&resource.resource_name()), "missing {resource}");
    }
    assert!(harness.cloud.is_connected());
    assert!(harness.router.is_running());
    harness.stop().await;
}

#[tokio::test]
async fn test_sustained_low_humidity_turns_humidifier_on_once() {
    let harness = started().await;
    let timeline = ReadingBuilder::humidity();

    harness.send_reading(&timeline.at(0, 20.0)).unwrap();
    harness.send_reading(&timeline.at(5, 21.0)).unwrap();
    assert!(harness.published_commands().unwrap().is_empty());

    harness.send_reading(&timeline.at(10, 20.0)).unwrap();
    // Further low readings while ON are ignored.
    harness.send_reading(&timeline.at(30, 19.0)).unwrap();

    let commands = harness.published_commands().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].command, CommandCode::On);
    assert_eq!(commands[0].name, HUMIDIFIER_ACTUATOR_NAME);
    assert_eq!(harness.actuator.commands(), vec![CommandCode::On]);
    assert!(harness.mqtt_client.find_messages_by_topic(COMMAND_TOPIC).len() == 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_humidifier_turns_off_at_nominal() {
    let harness = started().await;
    let timeline = ReadingBuilder::humidity();

    harness.send_reading(&timeline.at(0, 20.0)).unwrap();
    harness.send_reading(&timeline.at(10, 20.0)).unwrap();
    // Back in band but below nominal: stays ON.
    harness.send_reading(&timeline.at(20, 35.0)).unwrap();
    assert_eq!(harness.actuator.commands(), vec![CommandCode::On]);

    assert_eq!(harness.router.pending_count(), 1);

    harness.send_reading(&timeline.at(30, 40.0)).unwrap();
    let commands: Vec<CommandCode> = harness
        .published_commands()
        .unwrap()
        .iter()
        .map(|c| c.command)
        .collect();
    assert_eq!(commands, vec![CommandCode::On, CommandCode::Off]);
    assert_eq!(harness.router.pending_count(), 0);
    assert!(harness.router.pending_command(HUMIDITY_SENSOR_TYPE).is_none());

    harness.stop().await;
}

#[tokio::test]
async fn test_sustained_high_humidity_turns_humidifier_off() {
    let harness = started().await;
    let timeline = ReadingBuilder::humidity();

    harness.send_reading(&timeline.at(0, 60.0)).unwrap();
    harness.send_reading(&timeline.at(12, 58.0)).unwrap();

    let commands = harness.published_commands().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].command, CommandCode::Off);
    harness.stop().await;
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let harness = started().await;

    assert!(!harness.send_raw(SENSOR_TOPIC, b"{\"name\": \"Humidity\", \"value\": "));
    assert!(!harness.send_raw(SENSOR_TOPIC, b"[]"));

    assert_eq!(harness.persistence.total(), 0);
    assert!(harness.cloud.sent().is_empty());
    assert_eq!(harness.router.pending_count(), 0);

    // The router keeps working afterwards.
    assert!(harness.send_reading(&ReadingBuilder::humidity().at(0, 35.0)).unwrap());
    assert_eq!(harness.persistence.stored(SENSOR_TOPIC).len(), 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_actuator_response_clears_pending_command() {
    let harness = started().await;
    let timeline = ReadingBuilder::humidity();

    harness.send_reading(&timeline.at(0, 20.0)).unwrap();
    harness.send_reading(&timeline.at(10, 20.0)).unwrap();
    assert!(harness.router.pending_command(HUMIDITY_SENSOR_TYPE).is_some());

    assert!(harness.send_actuator_response(CommandCode::On));
    assert!(harness.router.pending_command(HUMIDITY_SENSOR_TYPE).is_none());

    let latest = harness.router.latest_response().unwrap();
    assert!(latest.is_response);
    assert_eq!(latest.command, CommandCode::On);

    let stored = harness.persistence.stored("PIOT/ConstrainedDevice/ActuatorResponse");
    assert!(matches!(stored.as_slice(), [DataMessage::Actuator(_)]));
    harness.stop().await;
}

#[tokio::test]
async fn test_connection_loss_does_not_block_local_actuation() {
    let harness = started().await;
    let timeline = ReadingBuilder::humidity();
    harness.mqtt_client.simulate_connection_loss();

    harness.send_reading(&timeline.at(0, 20.0)).unwrap();
    harness.send_reading(&timeline.at(10, 20.0)).unwrap();

    assert_eq!(harness.actuator.commands(), vec![CommandCode::On]);
    assert!(harness.published_commands().unwrap().is_empty());

    harness.mqtt_client.simulate_reconnect();
    assert_eq!(harness.router.status().mqtt_reconnects, 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_persistence_failure_does_not_block_policy() {
    let harness = started().await;
    harness.persistence.set_failing(true);
    let timeline = ReadingBuilder::humidity();

    harness.send_reading(&timeline.at(0, 20.0)).unwrap();
    harness.send_reading(&timeline.at(10, 20.0)).unwrap();

    assert_eq!(harness.published_commands().unwrap().len(), 1);
    assert_eq!(harness.persistence.total(), 0);
    harness.stop().await;
}

#[tokio::test]
async fn test_management_command_is_accepted() {
    let harness = started().await;
    assert!(harness.send_raw("PIOT/GatewayDevice/MgmtStatusCmd", b"report"));
    assert!(!harness.send_raw("PIOT/GatewayDevice/MgmtStatusCmd", b"   "));
    harness.stop().await;
}

#[tokio::test]
async fn test_status_publisher_reports_connection() {
    let mut config = TestHarness::default_config();
    config.features.enable_status_publisher = true;
    config.status.interval_secs = 1;
    let harness = TestHarness::with_config(config);
    harness.start().await.unwrap();

    let status = harness
        .wait_for_message("PIOT/GatewayDevice/MgmtStatusMsg", 2000)
        .await
        .unwrap()
        .expect("status message");
    assert_eq!(status["mqtt_connected"], true);
    harness
        .assert_field_equals(
            "PIOT/GatewayDevice/MgmtStatusMsg",
            "pending_commands",
            &serde_json::json!(0),
        )
        .unwrap();
    harness.stop().await;
}

#[tokio::test]
async fn test_stop_waits_for_background_tasks() {
    let mut config = TestHarness::default_config();
    config.features.enable_status_publisher = true;
    config.status.interval_secs = 1;
    let harness = TestHarness::with_config(config);
    let baseline = Arc::strong_count(&harness.mqtt_client);

    harness.start().await.unwrap();
    harness
        .wait_for_message("PIOT/GatewayDevice/MgmtStatusMsg", 2000)
        .await
        .unwrap()
        .expect("status message");
    // The status task holds its own handle on the client.
    assert!(Arc::strong_count(&harness.mqtt_client) > baseline);

    harness.stop().await;
    assert_eq!(Arc::strong_count(&harness.mqtt_client), baseline);

    harness.mqtt_client.clear();
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    assert!(harness.mqtt_client.get_published_messages().is_empty());
}

#[tokio::test]
async fn test_stop_detaches_router() {
    let harness = started().await;
    harness.stop().await;

    assert!(!harness.router.is_running());
    assert!(!harness.mqtt_client.has_listener());
    assert!(!harness.mqtt_client.is_connected());
    assert!(harness.mqtt_client.get_subscriptions().is_empty());
    assert!(!harness.cloud.is_connected());
    assert!(!harness.send_reading(&ReadingBuilder::humidity().at(0, 20.0)).unwrap());
}
