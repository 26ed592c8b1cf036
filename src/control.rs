//! Time-proportioning control loop.
//!
//! Once per window the loop samples the thermocouple, asks the PID
//! controller for an on-time, pulses the heater for that long and publishes
//! a [`Frame`]. All loop state lives in a single task; callers talk to it
//! through a cloneable [`ControlHandle`] and observe it through immutable
//! [`ControlStatus`] snapshots.

use crate::config::ControlConfig;
use crate::frame::Frame;
use crate::frame_bus::{FrameBus, FrameReceiver};
use crate::hardware::{HardwareError, Switch, TemperatureSensor};
use crate::pid::{PidController, PidError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};

const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Implausible temperature jump from {previous:.2} to {current:.2}, thermocouple disconnected?")]
    ImplausibleJump { previous: f64, current: f64 },
    #[error("Invalid target temperature: {0}")]
    InvalidTarget(f64),
    #[error("Control window of {window_ms} ms must exceed the {safety_margin_ms} ms safety margin")]
    InvalidWindow { window_ms: u64, safety_margin_ms: u64 },
    #[error("Heater switch unavailable")]
    SwitchUnavailable,
    #[error("PID error: {0}")]
    Pid(#[from] PidError),
    #[error("Control loop has stopped")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopPhase {
    Idle,
    Running,
    Stopped,
}

/// Snapshot of the loop state, republished after every event.
#[derive(Debug, Clone, Serialize)]
pub struct ControlStatus {
    pub phase: LoopPhase,
    /// Whether the heater output is currently switched on.
    pub firing: bool,
    pub target: f64,
    pub last_measurement: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Reason for a fault stop.
    pub fault: Option<String>,
}

impl ControlStatus {
    fn new(target: f64) -> Self {
        Self {
            phase: LoopPhase::Idle,
            firing: false,
            target,
            last_measurement: None,
            last_updated: None,
            fault: None,
        }
    }
}

/// Commands accepted by the running loop.
#[derive(Debug)]
pub enum ControlCommand {
    SetTarget(f64),
    Stop {
        respond_to: oneshot::Sender<()>,
    },
}

struct InFlightPulse<A> {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<A>,
}

/// The control loop in its `Idle` state. [`ControlLoop::spawn`] consumes it.
pub struct ControlLoop<S, A> {
    sensor: S,
    // `None` while a pulse task owns the switch.
    switch: Option<A>,
    pulse: Option<InFlightPulse<A>>,
    pid: PidController,
    window: Duration,
    max_fire_ms: u64,
    fault_threshold: f64,
    bus: FrameBus,
    faults_tx: mpsc::Sender<HardwareError>,
    faults: mpsc::Receiver<HardwareError>,
    state: ControlStatus,
    status: watch::Sender<ControlStatus>,
    last_sample: Option<Instant>,
}

impl<S, A> ControlLoop<S, A>
where
    S: TemperatureSensor,
    A: Switch,
{
    /// Build an idle loop around already-opened hardware.
    pub fn new(
        config: &ControlConfig,
        mut pid: PidController,
        sensor: S,
        switch: A,
    ) -> Result<Self, ControlError> {
        if config.window_ms <= config.safety_margin_ms {
            return Err(ControlError::InvalidWindow {
                window_ms: config.window_ms,
                safety_margin_ms: config.safety_margin_ms,
            });
        }
        let max_fire_ms = config.max_fire_ms();
        pid.set_output_limits(0.0, max_fire_ms as f64)?;
        pid.set_target(config.start_target);
        let state = ControlStatus::new(config.start_target);
        let (status, _) = watch::channel(state.clone());
        let (faults_tx, faults) = mpsc::channel(1);
        Ok(Self {
            sensor,
            switch: Some(switch),
            pulse: None,
            pid,
            window: config.window(),
            max_fire_ms,
            fault_threshold: config.fault_threshold,
            bus: FrameBus::new(),
            faults_tx,
            faults,
            state,
            status,
            last_sample: None,
        })
    }

    /// A receiver for the frames this loop will publish.
    pub fn frames(&self) -> FrameReceiver {
        self.bus.subscribe()
    }

    /// Start the loop on its own task.
    pub fn spawn(self) -> ControlHandle {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let handle = ControlHandle {
            commands: commands_tx,
            status: self.status.subscribe(),
            frames: self.bus.subscribe(),
        };
        tokio::spawn(self.run(commands));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<ControlCommand>) {
        tracing::info!(
            "Starting control loop: window {} ms, max fire time {} ms",
            self.window.as_millis(),
            self.max_fire_ms
        );
        self.state.phase = LoopPhase::Running;
        self.publish_status();

        let mut ticker = time::interval_at(Instant::now() + self.window, self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut waiters = Vec::new();

        let fault = loop {
            tokio::select! {
                biased;
                Some(fault) = self.faults.recv() => {
                    break Some(ControlError::from(fault));
                }
                finished = pulse_finished(&mut self.pulse) => {
                    self.pulse = None;
                    self.return_switch(finished);
                    self.publish_status();
                }
                command = commands.recv() => match command {
                    Some(ControlCommand::SetTarget(target)) => self.set_target(target),
                    Some(ControlCommand::Stop { respond_to }) => {
                        waiters.push(respond_to);
                        break None;
                    }
                    None => {
                        tracing::warn!("All control handles dropped, stopping control loop");
                        break None;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(fault) = self.on_tick().await {
                        break Some(fault);
                    }
                }
            }
        };

        // Refuse new commands while shutting down.
        commands.close();
        self.shutdown(fault).await;
        while let Ok(command) = commands.try_recv() {
            if let ControlCommand::Stop { respond_to } = command {
                waiters.push(respond_to);
            }
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
        tracing::info!("Stopped control loop");
    }

    async fn on_tick(&mut self) -> Result<(), ControlError> {
        let window_start = Utc::now();
        let measurement = self.sensor.read().await?;
        if !measurement.is_finite() {
            return Err(HardwareError::Decode {
                raw: measurement.to_string(),
            }
            .into());
        }
        let now = Instant::now();
        let previous = self.state.last_measurement.replace(measurement);
        self.state.last_updated = Some(window_start);

        // A jump this large is a disconnected thermocouple, not a real temperature change.
        if let Some(previous) = previous {
            if (measurement - previous).abs() >= self.fault_threshold {
                return Err(ControlError::ImplausibleJump {
                    previous,
                    current: measurement,
                });
            }
        }

        let elapsed = self
            .last_sample
            .map(|prev| now.duration_since(prev))
            .unwrap_or(Duration::ZERO);
        self.last_sample = Some(now);
        let output = self.pid.update_elapsed(measurement, elapsed);
        let fire_time_ms = (output as u64).min(self.max_fire_ms);
        tracing::debug!(
            "Temperature {:.2}, target {:.2}, pulsing heater for {} ms",
            measurement,
            self.pid.target(),
            fire_time_ms
        );

        self.fire(Duration::from_millis(fire_time_ms)).await?;

        self.bus.publish(Frame {
            temperature: measurement,
            target: self.pid.target(),
            window_start,
            window_duration_ms: self.window.as_millis() as u64,
            fire_time_ms,
        });
        self.publish_status();
        Ok(())
    }

    /// Start this window's pulse once the previous one has been reclaimed.
    async fn fire(&mut self, duration: Duration) -> Result<(), ControlError> {
        self.reclaim_switch().await;
        if let Ok(fault) = self.faults.try_recv() {
            return Err(fault.into());
        }
        let mut switch = self.switch.take().ok_or(ControlError::SwitchUnavailable)?;

        if duration.is_zero() {
            let result = if switch.is_on() { switch.turn_off().await } else { Ok(()) };
            self.state.firing = switch.is_on();
            self.switch = Some(switch);
            return result.map_err(ControlError::from);
        }

        let (cancel, cancel_rx) = oneshot::channel();
        let faults = self.faults_tx.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = switch.pulse(duration, cancel_rx).await {
                tracing::error!("Error while pulsing heater: {}", e);
                let _ = faults.try_send(e);
            }
            switch
        });
        self.pulse = Some(InFlightPulse { cancel, task });
        self.state.firing = true;
        Ok(())
    }

    /// Cancel and await the in-flight pulse, taking the switch back.
    async fn reclaim_switch(&mut self) {
        let Some(pulse) = self.pulse.take() else {
            return;
        };
        // Fails harmlessly if the pulse already finished.
        let _ = pulse.cancel.send(());
        let finished = pulse.task.await;
        self.return_switch(finished);
    }

    fn return_switch(&mut self, finished: Result<A, JoinError>) {
        match finished {
            Ok(switch) => {
                // A cancelled pulse leaves the output on until the next write.
                self.state.firing = switch.is_on();
                self.switch = Some(switch);
            }
            Err(e) => {
                tracing::error!("Pulse task failed, heater switch lost: {}", e);
                self.state.firing = false;
            }
        }
    }

    fn set_target(&mut self, target: f64) {
        self.pid.set_target(target);
        self.state.target = target;
        self.publish_status();
        tracing::info!("Set new target for heater temperature: {:.2}", target);
    }

    async fn shutdown(&mut self, fault: Option<ControlError>) {
        if let Some(fault) = &fault {
            tracing::error!("Control loop fault, shutting heater down: {}", fault);
            self.state.fault = Some(fault.to_string());
        }
        self.pid.set_target(0.0);
        self.state.target = 0.0;

        self.reclaim_switch().await;
        match self.switch.as_mut() {
            Some(switch) => {
                if let Err(e) = switch.turn_off().await {
                    tracing::error!("Error while shutting off heater: {}", e);
                    self.state.fault.get_or_insert_with(|| e.to_string());
                }
            }
            None => tracing::error!("Heater switch unavailable at shutdown, output state unknown"),
        }

        self.state.firing = self.switch.as_ref().is_some_and(|switch| switch.is_on());
        self.state.phase = LoopPhase::Stopped;
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status.send_replace(self.state.clone());
    }
}

/// Resolves when the in-flight pulse task ends; never resolves without one.
async fn pulse_finished<A>(pulse: &mut Option<InFlightPulse<A>>) -> Result<A, JoinError> {
    match pulse {
        Some(pulse) => (&mut pulse.task).await,
        None => std::future::pending().await,
    }
}

/// Command and query surface of a running control loop.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    commands: mpsc::Sender<ControlCommand>,
    status: watch::Receiver<ControlStatus>,
    frames: FrameReceiver,
}

impl ControlHandle {
    pub async fn set_target(&self, target: f64) -> Result<(), ControlError> {
        if !target.is_finite() {
            return Err(ControlError::InvalidTarget(target));
        }
        self.commands
            .send(ControlCommand::SetTarget(target))
            .await
            .map_err(|_| ControlError::Stopped)
    }

    /// Stop the loop and wait until the heater is off. Safe to call repeatedly.
    pub async fn stop(&self) {
        let (respond_to, stopped) = oneshot::channel();
        if self
            .commands
            .send(ControlCommand::Stop { respond_to })
            .await
            .is_ok()
        {
            let _ = stopped.await;
        }
        self.wait().await;
    }

    /// Resolve once the loop has reached `Stopped`, for whatever reason.
    pub async fn wait(&self) {
        let mut status = self.status.clone();
        let _ = status.wait_for(|s| s.phase == LoopPhase::Stopped).await;
    }

    pub fn status(&self) -> ControlStatus {
        self.status.borrow().clone()
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.frames.latest()
    }

    pub fn frames(&self) -> FrameReceiver {
        self.frames.clone()
    }
}
