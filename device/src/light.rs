//! Simulated Smart Light
//!
//! Holds the on/off state of the light wired to an output pin and builds the
//! state message reported after every change.

use serde_json::json;
use smartlight_shared::{actions, MessageIn};
use std::fmt;
use tracing::{debug, info};

/// Physical pin the LED is wired to
pub const DEFAULT_PIN: u8 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightState {
    #[default]
    Off,
    On,
}

impl LightState {
    /// Value reported in `data.state`
    pub fn as_value(self) -> u8 {
        match self {
            LightState::Off => 0,
            LightState::On => 1,
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LightState::Off => write!(f, "off"),
            LightState::On => write!(f, "on"),
        }
    }
}

/// Map an action name to the state it requests, ignoring case
pub fn parse_action(name: &str) -> Option<LightState> {
    if name.eq_ignore_ascii_case(actions::SET_ON) {
        Some(LightState::On)
    } else if name.eq_ignore_ascii_case(actions::SET_OFF) {
        Some(LightState::Off)
    } else {
        None
    }
}

#[derive(Debug)]
pub struct SmartLight {
    state: LightState,
    pin: u8,
}

impl Default for SmartLight {
    fn default() -> Self {
        Self::new(DEFAULT_PIN)
    }
}

impl SmartLight {
    /// A light starts switched off
    pub fn new(pin: u8) -> Self {
        debug!("Pin {} set up as output", pin);
        Self {
            state: LightState::Off,
            pin,
        }
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Apply a named action; unknown actions leave the light untouched
    pub fn apply(&mut self, action: &str) -> Option<LightState> {
        let Some(state) = parse_action(action) else {
            info!("Ignoring unrecognized action {}", action);
            return None;
        };
        self.write(state);
        Some(state)
    }

    pub fn switch_off(&mut self) {
        self.write(LightState::Off);
    }

    fn write(&mut self, state: LightState) {
        self.state = state;
        info!("Wrote {} to pin #{}", state.as_value(), self.pin);
    }

    /// State report for the broker
    pub fn state_message(&self, device_id: &str, ts: u64) -> MessageIn {
        MessageIn::new(
            device_id,
            ts,
            json!({ "state": self.state.as_value() }),
            ts.to_string(),
        )
    }
}
