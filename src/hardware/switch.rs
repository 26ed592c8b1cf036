// src/hardware/switch.rs - Heater switch device file writer
use super::{HardwareError, Switch};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};

const ON: &[u8] = b"1";
const OFF: &[u8] = b"0";

/// Drives the heater by writing `"1"` / `"0"` to a device file.
#[derive(Debug)]
pub struct DeviceSwitch<W = File> {
    device: W,
    on: bool,
}

impl<W> DeviceSwitch<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(device: W) -> Self {
        Self { device, on: false }
    }

    async fn write_state(&mut self, state: &[u8]) -> Result<(), HardwareError> {
        self.device.write_all(state).await.map_err(HardwareError::WriteFault)?;
        self.device.flush().await.map_err(HardwareError::WriteFault)?;
        Ok(())
    }
}

#[async_trait]
impl<W> Switch for DeviceSwitch<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn turn_on(&mut self) -> Result<(), HardwareError> {
        self.write_state(ON).await?;
        self.on = true;
        Ok(())
    }

    async fn turn_off(&mut self) -> Result<(), HardwareError> {
        self.write_state(OFF).await?;
        self.on = false;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

/// Open the heater status device for writing.
pub async fn open_switch(path: impl AsRef<Path>) -> Result<DeviceSwitch<File>, HardwareError> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .await
        .map_err(|source| HardwareError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::info!("Opened heater switch device {}", path.display());
    Ok(DeviceSwitch::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::oneshot;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_on_off_writes_ascii_bytes() {
        let mock = Builder::new().write(b"1").write(b"0").build();
        let mut switch = DeviceSwitch::new(mock);
        switch.turn_on().await.unwrap();
        assert!(switch.is_on());
        switch.turn_off().await.unwrap();
        assert!(!switch.is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_runs_to_completion() {
        let mock = Builder::new().write(b"1").write(b"0").build();
        let mut switch = DeviceSwitch::new(mock);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let started = tokio::time::Instant::now();
        switch.pulse(Duration::from_millis(400), cancel_rx).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400) && elapsed < Duration::from_millis(410));
        assert!(!switch.is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_pulse_leaves_output_to_caller() {
        let mock = Builder::new().write(b"1").build();
        let mut switch = DeviceSwitch::new(mock);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = cancel_tx.send(());
        });
        let started = tokio::time::Instant::now();
        switch.pulse(Duration::from_millis(900), cancel_rx).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(110));
        assert!(switch.is_on());
    }

    #[tokio::test]
    async fn test_write_failure_is_write_fault() {
        let mock = Builder::new()
            .write_error(std::io::Error::other("gpio gone"))
            .build();
        let mut switch = DeviceSwitch::new(mock);
        let err = switch.turn_on().await.unwrap_err();
        assert!(matches!(err, HardwareError::WriteFault(_)));
        assert!(!switch.is_on());
    }

    #[tokio::test]
    async fn test_read_only_device_fails_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, b"0").unwrap();
        let file = File::open(&path).await.unwrap();
        let mut switch = DeviceSwitch::new(file);
        assert!(matches!(switch.turn_off().await, Err(HardwareError::WriteFault(_))));
    }

    #[tokio::test]
    async fn test_open_switch_writes_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, b"").unwrap();
        let mut switch = open_switch(&path).await.unwrap();
        switch.turn_on().await.unwrap();
        switch.turn_off().await.unwrap();
        drop(switch);
        assert_eq!(std::fs::read(&path).unwrap(), b"10");
    }
}
