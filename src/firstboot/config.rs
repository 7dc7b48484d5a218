//! First boot configuration.
//!
//! Values are collected into a [`ConfigBuilder`], either all at once from
//! the inline `--config` JSON or field by field from prompts, and turned
//! into an immutable [`ProvisioningConfig`] exactly once by
//! [`ConfigBuilder::build`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};

use crate::error::{parse_json, BoundaryError};
use crate::process::{Cmd, Runner};

pub const DEFAULT_SET_PASSWORD: bool = true;
pub const DEFAULT_ADD_TO_SUDOERS: bool = true;
pub const DEFAULT_ENABLE_SYSTEMD_LINGER: bool = true;
pub const DEFAULT_ENABLE_SOUND: bool = false;

/// Fully resolved first boot settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub first_user: String,
    pub set_password: bool,
    pub add_to_sudoers: bool,
    pub enable_systemd_linger: bool,
    pub enable_sound: bool,
}

/// Wire format of `--config`. Every field may be omitted, but a present
/// field must carry its declared type; `null` is not a value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ConfigInput {
    #[serde(default, deserialize_with = "present")]
    skip: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    first_user: Option<String>,
    #[serde(default, deserialize_with = "present")]
    set_password: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    add_to_sudoers: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    enable_systemd_linger: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    enable_sound: Option<bool>,
}

/// Only called for keys that appear in the payload.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Accumulates confirmed fields; unset fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigBuilder {
    skip: Option<bool>,
    first_user: Option<String>,
    set_password: Option<bool>,
    add_to_sudoers: Option<bool>,
    enable_systemd_linger: Option<bool>,
    enable_sound: Option<bool>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an inline JSON object against the config schema.
    pub fn from_json(text: &str) -> Result<Self, BoundaryError> {
        let input: ConfigInput = parse_json("--config", text)?;
        Ok(Self {
            skip: input.skip,
            first_user: input.first_user,
            set_password: input.set_password,
            add_to_sudoers: input.add_to_sudoers,
            enable_systemd_linger: input.enable_systemd_linger,
            enable_sound: input.enable_sound,
        })
    }

    /// Whether the config asks to skip provisioning entirely.
    pub fn skips(&self) -> bool {
        self.skip.unwrap_or(false)
    }

    pub fn first_user(mut self, name: impl Into<String>) -> Self {
        self.first_user = Some(name.into());
        self
    }

    pub fn set_password(mut self, value: bool) -> Self {
        self.set_password = Some(value);
        self
    }

    pub fn add_to_sudoers(mut self, value: bool) -> Self {
        self.add_to_sudoers = Some(value);
        self
    }

    pub fn enable_systemd_linger(mut self, value: bool) -> Self {
        self.enable_systemd_linger = Some(value);
        self
    }

    pub fn enable_sound(mut self, value: bool) -> Self {
        self.enable_sound = Some(value);
        self
    }

    /// Produce the final config. `default_user` is only called when no
    /// user name was supplied.
    pub fn build(self, default_user: impl FnOnce() -> Result<String>) -> Result<ProvisioningConfig> {
        let first_user = match self.first_user {
            Some(name) => name,
            None => default_user().context("resolving default user name")?,
        };
        validate_user_name(&first_user)?;

        Ok(ProvisioningConfig {
            first_user,
            set_password: self.set_password.unwrap_or(DEFAULT_SET_PASSWORD),
            add_to_sudoers: self.add_to_sudoers.unwrap_or(DEFAULT_ADD_TO_SUDOERS),
            enable_systemd_linger: self
                .enable_systemd_linger
                .unwrap_or(DEFAULT_ENABLE_SYSTEMD_LINGER),
            enable_sound: self.enable_sound.unwrap_or(DEFAULT_ENABLE_SOUND),
        })
    }
}

/// The user name ends up in `wsl.conf` and on command lines.
fn validate_user_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("first user name must not be empty");
    }
    if name.starts_with('-') {
        bail!("invalid first user name '{name}': must not start with '-'");
    }
    if let Some(bad) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || matches!(c, ':' | '"' | '/'))
    {
        bail!("invalid first user name '{name}': contains {bad:?}");
    }
    Ok(())
}

/// The Windows account name, via `wslvar USERNAME`.
pub fn host_username(runner: &dyn Runner) -> Result<String> {
    let output = Cmd::new("wslvar")
        .arg("USERNAME")
        .run(runner)
        .context("querying the Windows user name with wslvar")?;
    let name = output.stdout.trim().to_string();
    if name.is_empty() {
        bail!("wslvar USERNAME returned nothing");
    }
    Ok(name)
}
