/*!
# Gateway DevKit - test doubles for the gateway kernel

- In-memory pub/sub client standing in for the MQTT transport
- Recording persistence, cloud and actuator collaborators
- Wire entity builders with explicit timestamps
- A harness wiring all of the above into a `GatewayRouter`
*/

pub mod fixtures;
pub mod mqtt_stub;
pub mod test_utils;

pub use fixtures::{
    CommandBuilder, ReadingBuilder, RecordingActuatorListener, RecordingCloudClient,
    RecordingPersistence,
};
pub use mqtt_stub::{MockMessage, MockPubSubClient};
pub use test_utils::TestHarness;
