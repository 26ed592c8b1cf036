// src/hardware/mod.rs - Heater hardware: thermocouple input and heater switch output
pub mod sensor;
pub mod switch;

pub use sensor::{open_sensor, ThermocoupleSensor};
pub use switch::{open_switch, DeviceSwitch};

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Failed to open device {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Sensor read failed: {0}")]
    ReadFault(std::io::Error),
    #[error("Sensor returned undecodable reading {raw:?}")]
    Decode { raw: String },
    #[error("Actuator write failed: {0}")]
    WriteFault(std::io::Error),
}

impl HardwareError {
    /// True for failures that leave the loop without a trustworthy measurement.
    pub fn is_read_fault(&self) -> bool {
        matches!(self, HardwareError::ReadFault(_) | HardwareError::Decode { .. })
    }
}

/// A source of calibrated temperature samples.
#[async_trait]
pub trait TemperatureSensor: Send + 'static {
    async fn read(&mut self) -> Result<f64, HardwareError>;
}

/// A binary heater output.
///
/// Implementations are owned by exactly one task at a time; the control loop
/// hands the switch to a pulse task and takes it back before the next write.
#[async_trait]
pub trait Switch: Send + 'static {
    async fn turn_on(&mut self) -> Result<(), HardwareError>;

    async fn turn_off(&mut self) -> Result<(), HardwareError>;

    /// Whether the last successful write switched the output on.
    fn is_on(&self) -> bool;

    /// Turn on, then turn off after `duration` unless `cancel` fires first.
    ///
    /// A cancelled pulse returns without writing: the output is left on and
    /// the caller decides the final state. A dropped `cancel` sender counts
    /// as a cancellation.
    async fn pulse(
        &mut self,
        duration: Duration,
        cancel: oneshot::Receiver<()>,
    ) -> Result<(), HardwareError> {
        self.turn_on().await?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = cancel => {
                tracing::debug!("Pulse cancelled before {:?} elapsed", duration);
                return Ok(());
            }
        }
        self.turn_off().await
    }
}
