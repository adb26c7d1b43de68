//! Hysteresis / debounce actuation policy for one monitored quantity.
//!
//! The engine turns readings into actuator commands:
//! - a value outside `[low, high]` opens an exception window;
//! - another out-of-range value at least `debounce` seconds later (measured on
//!   the readings' own timestamps) triggers ON for low, OFF for high;
//! - once ON, the actuator is only turned OFF when a reading reaches the
//!   nominal set-point, not merely when it re-enters the band.
//!
//! There is no sleeping or wall-clock waiting here; `now` is only used to stamp
//! commands and to stand in for unparsable reading timestamps.

use crate::config::PolicyConf;
use crate::models::{format_timestamp, ActuatorCommand, CommandCode, SensorReading};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Thresholds and the actuator they drive. Taken as given; bounds clamping is
/// done by the configuration layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdPolicyConfig {
    pub sensor_type: i32,
    pub actuator_name: String,
    pub actuator_type: i32,
    pub nominal: f32,
    pub low: f32,
    pub high: f32,
    pub debounce: Duration,
}

impl From<&PolicyConf> for ThresholdPolicyConfig {
    fn from(conf: &PolicyConf) -> Self {
        Self {
            sensor_type: conf.sensor_type,
            actuator_name: conf.actuator_name.clone(),
            actuator_type: conf.actuator_type,
            nominal: conf.nominal,
            low: conf.low,
            high: conf.high,
            debounce: Duration::from_secs(conf.debounce_secs),
        }
    }
}

/// What the engine decided for a reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Actuation {
    /// Out-of-range condition persisted past the debounce window.
    Triggered(ActuatorCommand),
    /// Value reached nominal while the actuator was ON.
    Restored(ActuatorCommand),
}

impl Actuation {
    pub fn command(&self) -> &ActuatorCommand {
        match self {
            Actuation::Triggered(c) | Actuation::Restored(c) => c,
        }
    }

    pub fn into_command(self) -> ActuatorCommand {
        match self {
            Actuation::Triggered(c) | Actuation::Restored(c) => c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ExceptionWindow {
    value: f32,
    started: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    config: ThresholdPolicyConfig,
    window: Option<ExceptionWindow>,
    last_command: CommandCode,
}

impl ThresholdPolicy {
    pub fn new(config: ThresholdPolicyConfig) -> Self {
        Self {
            config,
            window: None,
            last_command: CommandCode::Off,
        }
    }

    pub fn config(&self) -> &ThresholdPolicyConfig {
        &self.config
    }

    pub fn last_command(&self) -> CommandCode {
        self.last_command
    }

    pub fn is_window_open(&self) -> bool {
        self.window.is_some()
    }

    /// Evaluate one reading. `now` stamps emitted commands and replaces an
    /// unparsable reading timestamp.
    pub fn evaluate(&mut self, reading: &SensorReading, now: OffsetDateTime) -> Option<Actuation> {
        let value = reading.value;
        let is_low = value < self.config.low;
        let is_high = value > self.config.high;

        if is_low || is_high {
            if is_low && self.last_command == CommandCode::On {
                debug!(value, "actuator already ON, ignoring low reading");
                return None;
            }

            let ts = reading_time(reading, now);
            let Some(window) = self.window else {
                info!(
                    value,
                    debounce_secs = self.config.debounce.as_secs(),
                    "value out of range, starting exception window"
                );
                self.window = Some(ExceptionWindow { value, started: ts });
                return None;
            };

            let elapsed = (ts - window.started).whole_seconds().unsigned_abs();
            debug!(elapsed, first_value = window.value, value, "exception window check");
            if elapsed < self.config.debounce.as_secs() {
                return None;
            }

            let code = if is_low { CommandCode::On } else { CommandCode::Off };
            let command = self.command_for(reading, code, now);
            info!(value, elapsed, command = %code, "out-of-range condition persisted, actuating");
            self.last_command = code;
            self.window = None;
            Some(Actuation::Triggered(command))
        } else if self.last_command == CommandCode::On {
            if value >= self.config.nominal {
                let command = self.command_for(reading, CommandCode::Off, now);
                info!(
                    value,
                    nominal = self.config.nominal,
                    "nominal value reached, turning actuator OFF"
                );
                self.last_command = CommandCode::Off;
                self.window = None;
                Some(Actuation::Restored(command))
            } else {
                debug!(value, "actuator still ON, not yet at nominal");
                None
            }
        } else {
            None
        }
    }

    fn command_for(
        &self,
        reading: &SensorReading,
        code: CommandCode,
        now: OffsetDateTime,
    ) -> ActuatorCommand {
        let mut command = ActuatorCommand::new(
            self.config.actuator_name.clone(),
            self.config.actuator_type,
            code,
            self.config.nominal,
        );
        command.location_id = reading.location_id.clone();
        command.time_stamp = format_timestamp(now);
        command
    }
}

fn reading_time(reading: &SensorReading, now: OffsetDateTime) -> OffsetDateTime {
    reading.parsed_timestamp().unwrap_or_else(|| {
        warn!(
            timestamp = %reading.time_stamp,
            "failed to parse ISO 8601 reading timestamp, using current time"
        );
        now
    })
}
