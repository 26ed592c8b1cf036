// Shared fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use pi_heater::config::ControlConfig;
use pi_heater::control::{ControlHandle, ControlLoop};
use pi_heater::frame::Frame;
use pi_heater::frame_bus::FrameReceiver;
use pi_heater::hardware::{HardwareError, Switch, TemperatureSensor};
use pi_heater::pid::PidController;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Replays a fixed list of readings, then fails every read.
pub struct ScriptedSensor {
    readings: VecDeque<f64>,
}

impl ScriptedSensor {
    pub fn new(readings: &[f64]) -> Self {
        Self {
            readings: readings.iter().copied().collect(),
        }
    }
}

#[async_trait]
impl TemperatureSensor for ScriptedSensor {
    async fn read(&mut self) -> Result<f64, HardwareError> {
        self.readings.pop_front().ok_or_else(|| {
            HardwareError::ReadFault(io::Error::new(io::ErrorKind::UnexpectedEof, "no more readings"))
        })
    }
}

/// Records every successful write; optionally fails writes from the n-th on.
#[derive(Clone, Default)]
pub struct RecordingSwitch {
    pub writes: Arc<Mutex<Vec<&'static str>>>,
    attempts: Arc<Mutex<usize>>,
    fail_from: Option<usize>,
    on: bool,
}

impl RecordingSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_from(attempt: usize) -> Self {
        Self {
            fail_from: Some(attempt),
            ..Self::default()
        }
    }

    pub fn writes(&self) -> Vec<&'static str> {
        self.writes.lock().unwrap().clone()
    }

    fn write(&mut self, value: &'static str) -> Result<(), HardwareError> {
        let mut attempts = self.attempts.lock().unwrap();
        let attempt = *attempts;
        *attempts += 1;
        if self.fail_from.is_some_and(|n| attempt >= n) {
            return Err(HardwareError::WriteFault(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device gone",
            )));
        }
        self.writes.lock().unwrap().push(value);
        Ok(())
    }
}

#[async_trait]
impl Switch for RecordingSwitch {
    async fn turn_on(&mut self) -> Result<(), HardwareError> {
        self.write("1")?;
        self.on = true;
        Ok(())
    }

    async fn turn_off(&mut self) -> Result<(), HardwareError> {
        self.write("0")?;
        self.on = false;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

pub fn control_config(start_target: f64) -> ControlConfig {
    ControlConfig {
        start_target,
        ..ControlConfig::default()
    }
}

/// Spawn a loop with a pure proportional controller.
pub fn spawn_loop(
    kp: f64,
    start_target: f64,
    readings: &[f64],
    switch: RecordingSwitch,
) -> (ControlHandle, JoinHandle<Vec<Frame>>) {
    let control_loop = ControlLoop::new(
        &control_config(start_target),
        PidController::new(kp, 0.0, 0.0),
        ScriptedSensor::new(readings),
        switch,
    )
    .unwrap();
    let collector = tokio::spawn(collect_frames(control_loop.frames()));
    (control_loop.spawn(), collector)
}

/// Gather every frame until the bus closes.
pub async fn collect_frames(mut frames: FrameReceiver) -> Vec<Frame> {
    let mut collected = Vec::new();
    while let Some(frame) = frames.next().await {
        collected.push(frame);
    }
    collected
}
