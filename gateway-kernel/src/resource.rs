//! Resource naming shared by the pub/sub topics and the constrained-protocol URIs.
//!
//! A resource is a chain of path segments such as `PIOT/ConstrainedDevice/SensorMsg`.
//! The same chain is used verbatim as an MQTT topic and, split into segments,
//! as the CoAP Uri-Path of the matching resource.

use std::fmt;
use std::str::FromStr;

pub const PRODUCT_NAME: &str = "PIOT";
pub const CONSTRAINED_DEVICE: &str = "ConstrainedDevice";
pub const GATEWAY_DEVICE: &str = "GatewayDevice";

/// Ordered path segments identifying a protocol resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// New path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::new(segments)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl FromStr for ResourcePath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.split('/')))
    }
}

impl From<&str> for ResourcePath {
    fn from(s: &str) -> Self {
        Self::new(s.split('/'))
    }
}

/// Well-known resources exchanged between the gateway and constrained devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceName {
    CdaActuatorCmd,
    CdaActuatorResponse,
    CdaMgmtStatusMsg,
    CdaSensorMsg,
    CdaSystemPerfMsg,
    GdaMgmtStatusMsg,
    GdaMgmtStatusCmd,
    GdaSystemPerfMsg,
}

/// Payload carried by a resource, used to pick the decoder for inbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Sensor,
    Actuator,
    Metrics,
    Text,
}

impl ResourceName {
    pub const ALL: [ResourceName; 8] = [
        ResourceName::CdaActuatorCmd,
        ResourceName::CdaActuatorResponse,
        ResourceName::CdaMgmtStatusMsg,
        ResourceName::CdaSensorMsg,
        ResourceName::CdaSystemPerfMsg,
        ResourceName::GdaMgmtStatusMsg,
        ResourceName::GdaMgmtStatusCmd,
        ResourceName::GdaSystemPerfMsg,
    ];

    /// Topics the gateway listens on for device traffic.
    pub const INBOUND: [ResourceName; 4] = [
        ResourceName::GdaMgmtStatusCmd,
        ResourceName::CdaActuatorResponse,
        ResourceName::CdaSensorMsg,
        ResourceName::CdaSystemPerfMsg,
    ];

    fn parts(self) -> (&'static str, &'static str) {
        match self {
            ResourceName::CdaActuatorCmd => (CONSTRAINED_DEVICE, "ActuatorCmd"),
            ResourceName::CdaActuatorResponse => (CONSTRAINED_DEVICE, "ActuatorResponse"),
            ResourceName::CdaMgmtStatusMsg => (CONSTRAINED_DEVICE, "MgmtStatusMsg"),
            ResourceName::CdaSensorMsg => (CONSTRAINED_DEVICE, "SensorMsg"),
            ResourceName::CdaSystemPerfMsg => (CONSTRAINED_DEVICE, "SystemPerfMsg"),
            ResourceName::GdaMgmtStatusMsg => (GATEWAY_DEVICE, "MgmtStatusMsg"),
            ResourceName::GdaMgmtStatusCmd => (GATEWAY_DEVICE, "MgmtStatusCmd"),
            ResourceName::GdaSystemPerfMsg => (GATEWAY_DEVICE, "SystemPerfMsg"),
        }
    }

    pub fn device_name(self) -> &'static str {
        self.parts().0
    }

    pub fn resource_type(self) -> &'static str {
        self.parts().1
    }

    /// Full name, e.g. `PIOT/ConstrainedDevice/SensorMsg`.
    pub fn resource_name(self) -> String {
        format!("{PRODUCT_NAME}/{}/{}", self.device_name(), self.resource_type())
    }

    pub fn path(self) -> ResourcePath {
        ResourcePath::new([PRODUCT_NAME, self.device_name(), self.resource_type()])
    }

    pub fn payload_kind(self) -> PayloadKind {
        match self {
            ResourceName::CdaSensorMsg => PayloadKind::Sensor,
            ResourceName::CdaActuatorCmd | ResourceName::CdaActuatorResponse => {
                PayloadKind::Actuator
            }
            ResourceName::CdaSystemPerfMsg | ResourceName::GdaSystemPerfMsg => PayloadKind::Metrics,
            _ => PayloadKind::Text,
        }
    }

    /// Resolve a topic back to a well-known resource (exact match).
    pub fn from_topic(topic: &str) -> Option<ResourceName> {
        Self::ALL.into_iter().find(|r| r.resource_name() == topic)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource_name())
    }
}

/// Make a topic prefix end with exactly one `/`; an empty prefix becomes `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// `prefix + deviceName + "/" + resourceType[ "-" + itemName]`, lower-cased.
pub fn topic_name(
    prefix: &str,
    device_name: &str,
    resource_type: &str,
    item_name: Option<&str>,
) -> String {
    let mut topic = format!("{}{}/{}", normalize_prefix(prefix), device_name, resource_type);
    if let Some(item) = item_name.filter(|i| !i.is_empty()) {
        topic.push('-');
        topic.push_str(item);
    }
    topic.to_lowercase()
}
