//! Resource handlers the gateway serves to constrained devices.

use super::message::ResponseType;
use super::tree::{GetHandler, ObservableHandler, Observers, Outcome, PutHandler};
use crate::codec;
use crate::listener::{ActuatorDataListener, DataMessageListener};
use crate::models::{ActuatorCommand, DataMessage};
use crate::resource::ResourceName;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// PUT endpoint decoding telemetry and handing it to the data message listener.
pub struct TelemetryUpdateResource {
    resource: ResourceName,
    listener: RwLock<Option<Weak<dyn DataMessageListener>>>,
}

impl TelemetryUpdateResource {
    pub fn new(resource: ResourceName) -> Self {
        Self {
            resource,
            listener: RwLock::new(None),
        }
    }

    pub fn sensor_msg() -> Self {
        Self::new(ResourceName::CdaSensorMsg)
    }

    pub fn system_perf_msg() -> Self {
        Self::new(ResourceName::CdaSystemPerfMsg)
    }

    pub fn resource(&self) -> ResourceName {
        self.resource
    }

    pub fn set_data_message_listener(&self, listener: Weak<dyn DataMessageListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn clear_data_message_listener(&self) {
        self.listener.write().take();
    }

    fn listener(&self) -> Option<Arc<dyn DataMessageListener>> {
        self.listener.read().as_ref().and_then(Weak::upgrade)
    }
}

impl PutHandler for TelemetryUpdateResource {
    fn put(&self, payload: &[u8]) -> Outcome {
        let message = match codec::decode_payload(self.resource.payload_kind(), payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(resource = %self.resource, "rejecting PUT: {e}");
                return Outcome::with_payload(ResponseType::BadRequest, e.to_string());
            }
        };

        let Some(listener) = self.listener() else {
            debug!(resource = %self.resource, "no listener for PUT, ignoring");
            return Outcome::new(ResponseType::Continue);
        };

        let accepted = match message {
            DataMessage::Sensor(reading) => listener.on_sensor_reading(self.resource, reading),
            DataMessage::Metrics(snapshot) => listener.on_metrics_snapshot(self.resource, snapshot),
            DataMessage::Actuator(command) => listener.on_actuator_ack(self.resource, command),
        };

        if accepted {
            Outcome::new(ResponseType::Changed)
        } else {
            Outcome::new(ResponseType::NotAcceptable)
        }
    }
}

/// Observable actuator command endpoint. Holds the latest command issued for
/// the co-located actuator and pushes every update to its watchers.
pub struct ActuatorCommandResource {
    current: Mutex<ActuatorCommand>,
    observers: Observers,
}

impl ActuatorCommandResource {
    pub fn new(initial: ActuatorCommand) -> Self {
        Self {
            current: Mutex::new(initial),
            observers: Observers::default(),
        }
    }

    pub fn current(&self) -> ActuatorCommand {
        self.current.lock().clone()
    }
}

impl ActuatorDataListener for ActuatorCommandResource {
    fn on_actuator_update(&self, command: &ActuatorCommand) -> bool {
        let json = match codec::actuator_command_to_json(command) {
            Ok(json) => json,
            Err(e) => {
                warn!(actuator = %command.name, "cannot encode actuator update: {e}");
                return false;
            }
        };
        *self.current.lock() = command.clone();
        let watchers = self.observers.notify(json.as_bytes());
        debug!(
            actuator = %command.name,
            command = %command.command,
            watchers,
            "actuator command updated"
        );
        true
    }
}

impl GetHandler for ActuatorCommandResource {
    fn get(&self) -> Outcome {
        match codec::actuator_command_to_json(&self.current.lock()) {
            Ok(json) => Outcome::with_payload(ResponseType::Content, json),
            Err(e) => Outcome::with_payload(ResponseType::InternalServerError, e.to_string()),
        }
    }
}

impl ObservableHandler for ActuatorCommandResource {
    fn observers(&self) -> &Observers {
        &self.observers
    }
}
