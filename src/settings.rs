/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Run configuration.
//!
//! Values come from three layers, lowest precedence first: the built-in
//! defaults below, the TOML config file, and command-line flags. The
//! result is a [`Context`] that is handed to every component instead of
//! process-wide globals.

use std::{path::PathBuf, time::Duration};

use log::debug;
use serde::Deserialize;

use crate::{util::file::load_file, Error, Result};

/// Default location of the config file.
pub const CONFIG_FILE: &str = "/etc/edgeboot/edgebootd.toml";

/// Version of the negotiation protocol reported to the controller.
pub const PROTOCOL_VERSION: &str = "3";

/// Settings read from the config file. Every field is optional in the
/// file and falls back to [`Settings::default`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding counters, keys and the remembered controller
    pub state_dir: PathBuf,
    /// Domain under which per-node bootstrap and recovery names live
    pub base_domain: String,
    /// Pinned CA certificate for the controller (PEM)
    pub ca_cert: PathBuf,
    /// System trust store used when no CA is pinned (PEM bundle)
    pub trust_store: PathBuf,
    /// Durable log file
    pub log_file: PathBuf,
    /// Mirror log lines to the local syslog socket
    pub syslog: bool,

    /// Seconds between negotiation attempts
    pub loop_interval: u64,
    /// Loop iterations after which an applied config is fetched again
    pub refetch_after: u64,
    /// Consecutive unconnected runs after which an unkeyed recovery
    /// document is applied anyway
    pub recovery_threshold: u64,
    /// Seconds allowed for the recovery download
    pub recovery_timeout: u64,
    /// Seconds allowed for a negotiation request
    pub negotiate_timeout: u64,
    /// Give up after this many loop iterations (unbounded if unset)
    pub max_attempts: Option<u64>,
    /// Give up after this many seconds (unbounded if unset)
    pub max_duration: Option<u64>,

    /// Linux route table used to find the default interface
    pub route_table: PathBuf,
    /// Directory with one subdirectory per network interface
    pub net_class_dir: PathBuf,
    /// Interface used when no default route shows up
    pub fallback_interface: String,
    /// How many times the route table is polled at startup
    pub interface_poll_attempts: u32,
    /// Upper bound on followed CNAME records
    pub cname_max_depth: usize,

    /// Name of the management tunnel interface
    pub tunnel_interface: String,
    /// Directory where wg-quick looks for `<interface>.conf`
    pub tunnel_config_dir: PathBuf,
    /// Address only reachable through the management tunnel
    pub probe_address: String,
    /// Seconds to wait for the probe reply
    pub probe_timeout: u64,

    /// Canonical location of the agent binary
    pub install_path: PathBuf,
    /// Where to fetch the latest published agent build from
    pub release_url: Option<String>,
    /// Name of the boot service
    pub service_name: String,
    /// OS identification file
    pub os_release: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/edgeboot"),
            base_domain: "edge.dark.fi".to_string(),
            ca_cert: PathBuf::from("/etc/edgeboot/controller-ca.pem"),
            trust_store: PathBuf::from("/etc/ssl/certs/ca-certificates.crt"),
            log_file: PathBuf::from("/var/log/edgeboot.log"),
            syslog: false,

            loop_interval: 15,
            refetch_after: 240,
            recovery_threshold: 5,
            recovery_timeout: 5,
            negotiate_timeout: 30,
            max_attempts: None,
            max_duration: None,

            route_table: PathBuf::from("/proc/net/route"),
            net_class_dir: PathBuf::from("/sys/class/net"),
            fallback_interface: "eth0".to_string(),
            interface_poll_attempts: 60,
            cname_max_depth: 16,

            tunnel_interface: "wgmgmt".to_string(),
            tunnel_config_dir: PathBuf::from("/etc/wireguard"),
            probe_address: "fe80::1".to_string(),
            probe_timeout: 2,

            install_path: PathBuf::from("/usr/local/sbin/edgebootd"),
            release_url: None,
            service_name: "edgebootd".to_string(),
            os_release: PathBuf::from("/etc/os-release"),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(data: &str) -> Result<Self> {
        let settings: Self = toml::from_str(data)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `path`, or the defaults if the file is absent.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            debug!(target: "edgeboot::settings", "No config at {}, using defaults", path.display());
            return Ok(Self::default())
        }

        Self::from_toml(&load_file(path)?)
    }

    fn validate(&self) -> Result<()> {
        if self.base_domain.is_empty() {
            return Err(Error::ConfigInvalid("base_domain must not be empty".to_string()))
        }

        if self.tunnel_interface.is_empty() || self.tunnel_interface.contains('/') {
            return Err(Error::ConfigInvalid(format!(
                "invalid tunnel_interface \"{}\"",
                self.tunnel_interface
            )))
        }

        if self.interface_poll_attempts == 0 {
            return Err(Error::ConfigInvalid("interface_poll_attempts must be > 0".to_string()))
        }

        Ok(())
    }

    /// Path of the rendered tunnel configuration.
    pub fn tunnel_config_path(&self) -> PathBuf {
        self.tunnel_config_dir.join(format!("{}.conf", self.tunnel_interface))
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }
}

/// Everything a run needs, threaded through each component.
#[derive(Clone, Debug)]
pub struct Context {
    pub settings: Settings,
    /// Controller requested on the command line or by a recovery action
    pub controller_override: Option<String>,
    /// Set by recovery to fetch the bootstrap document even if a tunnel
    /// config is already applied
    pub force_refetch: bool,
}

impl Context {
    pub fn new(settings: Settings, controller_override: Option<String>) -> Self {
        Self { settings, controller_override, force_refetch: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_defaults() {
        let data = r#"
            base_domain = "mgmt.example.org"
            loop_interval = 5
            max_attempts = 10
        "#;

        let settings = Settings::from_toml(data).unwrap();
        assert_eq!(settings.base_domain, "mgmt.example.org");
        assert_eq!(settings.loop_interval, 5);
        assert_eq!(settings.max_attempts, Some(10));
        // Untouched values keep their defaults
        assert_eq!(settings.refetch_after, 240);
        assert_eq!(settings.recovery_threshold, 5);
        assert_eq!(
            settings.tunnel_config_path(),
            PathBuf::from("/etc/wireguard/wgmgmt.conf")
        );
    }

    #[test]
    fn unknown_and_invalid_fields_are_rejected() {
        assert!(Settings::from_toml("no_such_field = 1").is_err());
        assert!(Settings::from_toml("base_domain = \"\"").is_err());
        assert!(Settings::from_toml("tunnel_interface = \"../x\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load(std::path::Path::new("/nonexistent/edgeboot.toml")).unwrap();
        assert_eq!(settings.loop_interval, 15);
        assert!(settings.max_attempts.is_none());
    }
}
