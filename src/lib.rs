//! Time-proportioning PID heater controller.
//!
//! A [`control::ControlLoop`] samples a thermocouple once per window, drives
//! the heater switch for the PID-computed on-time and publishes a
//! [`frame::Frame`]. The [`hub::BroadcastHub`] fans frames out to WebSocket
//! subscribers and [`web`] exposes the command and status surface over HTTP.

pub mod config;
pub mod control;
pub mod frame;
pub mod frame_bus;
pub mod hardware;
pub mod hub;
pub mod pid;
pub mod sim;
pub mod web;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeaterError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Hardware error: {0}")]
    Hardware(#[from] hardware::HardwareError),
    #[error("Control error: {0}")]
    Control(#[from] control::ControlError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
