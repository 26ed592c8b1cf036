//! Simulated heater plant for running without hardware.
//!
//! A single heated mass: constant heat gain while the switch is on, loss
//! proportional to the difference from ambient. The state is integrated
//! lazily whenever the sensor or switch touches it, so it follows tokio's
//! clock (including paused time in tests).

use crate::hardware::{HardwareError, Switch, TemperatureSensor};
use async_trait::async_trait;
use rand::Rng;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct PlantParams {
    pub ambient: f64,
    /// Degrees per second gained while the heater is on.
    pub heat_rate: f64,
    /// Fraction of the ambient difference lost per second.
    pub loss_rate: f64,
    /// Amplitude of the uniform sensor noise.
    pub noise: f64,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            ambient: 70.0,
            heat_rate: 5.0,
            loss_rate: 0.01,
            noise: 0.0,
        }
    }
}

#[derive(Debug)]
struct PlantState {
    temperature: f64,
    heating: bool,
    last_update: Instant,
}

#[derive(Debug, Clone)]
pub struct SimulatedPlant {
    params: Arc<PlantParams>,
    state: Arc<Mutex<PlantState>>,
}

impl SimulatedPlant {
    pub fn new(params: PlantParams) -> Self {
        let state = PlantState {
            temperature: params.ambient,
            heating: false,
            last_update: Instant::now(),
        };
        Self {
            params: Arc::new(params),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        Arc::make_mut(&mut self.params).noise = noise;
        self
    }

    /// Sensor and switch sharing this plant.
    pub fn split(&self) -> (SimSensor, SimSwitch) {
        (
            SimSensor { plant: self.clone() },
            SimSwitch {
                plant: self.clone(),
                on: false,
            },
        )
    }

    /// Noise-free plant temperature at the current instant.
    pub fn temperature(&self) -> f64 {
        self.advance(|state| state.temperature)
    }

    pub fn is_heating(&self) -> bool {
        self.advance(|state| state.heating)
    }

    fn set_heating(&self, heating: bool) {
        self.advance(|state| state.heating = heating);
    }

    fn advance<T>(&self, f: impl FnOnce(&mut PlantState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let dt = now.duration_since(state.last_update).as_secs_f64();
        state.last_update = now;
        if dt > 0.0 {
            let p = &self.params;
            if state.heating {
                state.temperature += p.heat_rate * dt;
            }
            let loss = (p.loss_rate * dt).min(1.0) * (state.temperature - p.ambient);
            state.temperature -= loss;
        }
        f(&mut state)
    }
}

impl Default for SimulatedPlant {
    fn default() -> Self {
        Self::new(PlantParams::default())
    }
}

pub struct SimSensor {
    plant: SimulatedPlant,
}

#[async_trait]
impl TemperatureSensor for SimSensor {
    async fn read(&mut self) -> Result<f64, HardwareError> {
        let temperature = self.plant.temperature();
        let noise = self.plant.params.noise;
        if noise > 0.0 {
            return Ok(temperature + rand::rng().random_range(-noise..=noise));
        }
        Ok(temperature)
    }
}

pub struct SimSwitch {
    plant: SimulatedPlant,
    on: bool,
}

#[async_trait]
impl Switch for SimSwitch {
    async fn turn_on(&mut self) -> Result<(), HardwareError> {
        self.plant.set_heating(true);
        self.on = true;
        Ok(())
    }

    async fn turn_off(&mut self) -> Result<(), HardwareError> {
        self.plant.set_heating(false);
        self.on = false;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}
