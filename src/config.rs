//! Controller configuration from `smartlight.toml` plus environment overrides

use crate::auth::OAuthConfig;
use crate::session::{self, ReconnectPolicy, SessionConfig};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use smartlight_shared::{endpoints, DeviceIdentity};
use std::path::Path;
use tracing::{debug, info};

/// Default config file name
pub const CONFIG_FILENAME: &str = "smartlight.toml";

pub const ENV_DEVICE_ID: &str = "SMARTLIGHT_DEVICE_ID";
pub const ENV_DEVICE_TOKEN: &str = "SMARTLIGHT_DEVICE_TOKEN";
pub const ENV_CLIENT_ID: &str = "SMARTLIGHT_CLIENT_ID";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub id: String,
    pub token: String,
    /// Display name, only used in console output
    pub name: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id: "<YOUR DEVICE ID>".into(),
            token: "<YOUR DEVICE TOKEN>".into(),
            name: "Smart Light".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointsSection {
    pub firehose_url: String,
    pub control_url: String,
}

impl Default for EndpointsSection {
    fn default() -> Self {
        Self {
            firehose_url: endpoints::FIREHOSE_URL.into(),
            control_url: endpoints::DEVICE_CHANNEL_URL.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub command_capacity: usize,
    pub event_capacity: usize,
    pub notification_capacity: usize,
    pub outbound_capacity: usize,
    pub reconnect_policy: ReconnectPolicy,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            command_capacity: session::DEFAULT_COMMAND_CAPACITY,
            event_capacity: session::DEFAULT_EVENT_CAPACITY,
            notification_capacity: session::DEFAULT_NOTIFICATION_CAPACITY,
            outbound_capacity: session::DEFAULT_OUTBOUND_CAPACITY,
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub device: DeviceSection,
    pub endpoints: EndpointsSection,
    pub oauth: OAuthConfig,
    pub session: SessionSection,
}

impl ControllerConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SMARTLIGHT_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; unset or blank values are ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(id) = get(ENV_DEVICE_ID) {
            self.device.id = id;
        }
        if let Some(token) = get(ENV_DEVICE_TOKEN) {
            self.device.token = token;
        }
        if let Some(client_id) = get(ENV_CLIENT_ID) {
            self.oauth.client_id = client_id;
        }
    }

    /// Check what the channels need
    pub fn validate(&self) -> Result<()> {
        require("device.id", &self.device.id)?;
        require("device.token", &self.device.token)?;
        require("endpoints.firehose_url", &self.endpoints.firehose_url)?;
        require("endpoints.control_url", &self.endpoints.control_url)?;
        if self.session.command_capacity == 0 || self.session.event_capacity == 0 {
            bail!("session capacities must be greater than zero");
        }
        Ok(())
    }

    /// Check what the login flow needs
    pub fn validate_oauth(&self) -> Result<()> {
        require("oauth.client_id", &self.oauth.client_id)?;
        require("oauth.authorize_url", &self.oauth.authorize_url)?;
        require("oauth.redirect_uri", &self.oauth.redirect_uri)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            identity: DeviceIdentity::new(self.device.id.trim(), self.device.token.trim()),
            firehose_url: self.endpoints.firehose_url.clone(),
            control_url: self.endpoints.control_url.clone(),
            oauth: self.oauth.clone(),
            command_capacity: self.session.command_capacity,
            event_capacity: self.session.event_capacity,
            notification_capacity: self.session.notification_capacity,
            outbound_capacity: self.session.outbound_capacity,
            reconnect_policy: self.session.reconnect_policy,
        }
    }
}

/// Reject empty values and unfilled `<YOUR ...>` placeholders
fn require(field: &str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        bail!("{} is not set", field);
    }
    if value.starts_with("<YOUR") {
        bail!("{} still holds the placeholder {}", field, value);
    }
    Ok(())
}
