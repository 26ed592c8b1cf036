// src/hardware/sensor.rs - Thermocouple device file reader
use super::{HardwareError, TemperatureSensor};
use crate::config::CalibrationConfig;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Bytes read from the device per sample.
const READ_LEN: usize = 6;

/// Reads ASCII readings from a thermocouple device and calibrates them.
///
/// The device is rewound before every read so sysfs-style attribute files
/// report a fresh value each time.
#[derive(Debug)]
pub struct ThermocoupleSensor<R = File> {
    device: R,
    calibration: CalibrationConfig,
    buf: [u8; READ_LEN],
}

impl<R> ThermocoupleSensor<R>
where
    R: AsyncRead + AsyncSeek + Unpin + Send + 'static,
{
    pub fn new(device: R, calibration: CalibrationConfig) -> Self {
        Self {
            device,
            calibration,
            buf: [0; READ_LEN],
        }
    }

    async fn read_raw(&mut self) -> Result<f64, HardwareError> {
        if let Err(e) = self.device.seek(SeekFrom::Start(0)).await {
            tracing::trace!("Thermocouple device is not seekable: {}", e);
        }
        let n = self
            .device
            .read(&mut self.buf)
            .await
            .map_err(HardwareError::ReadFault)?;
        decode_reading(&self.buf[..n])
    }
}

#[async_trait]
impl<R> TemperatureSensor for ThermocoupleSensor<R>
where
    R: AsyncRead + AsyncSeek + Unpin + Send + 'static,
{
    async fn read(&mut self) -> Result<f64, HardwareError> {
        let raw = self.read_raw().await?;
        let temperature = calibrate(raw, &self.calibration);
        tracing::debug!("Thermocouple raw {} -> {:.2}", raw, temperature);
        Ok(temperature)
    }
}

/// Parse the numeric prefix of a device reading, ignoring trailing
/// newlines, NULs and any other non-digit bytes.
pub fn decode_reading(bytes: &[u8]) -> Result<f64, HardwareError> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_end_matches(|c: char| !c.is_numeric());
    trimmed.trim_start().parse::<f64>().map_err(|_| HardwareError::Decode {
        raw: text.into_owned(),
    })
}

/// Device-specific linear calibration: `scale * raw + offset`.
pub fn calibrate(raw: f64, calibration: &CalibrationConfig) -> f64 {
    calibration.scale * raw + calibration.offset
}

/// Open the thermocouple device read-only.
pub async fn open_sensor(
    path: impl AsRef<Path>,
    calibration: CalibrationConfig,
) -> Result<ThermocoupleSensor<File>, HardwareError> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .await
        .map_err(|source| HardwareError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::info!("Opened thermocouple device {}", path.display());
    Ok(ThermocoupleSensor::new(file, calibration))
}
