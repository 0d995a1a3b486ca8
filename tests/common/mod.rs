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

//! In-memory stand-ins for the controller, the tunnel and DNS.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use edgeboot::{
    controller::{ControllerApi, NegotiationRequest, NegotiationStatus},
    dns::CnameLookup,
    identity::NodeIdentity,
    settings::Settings,
    tunnel::TunnelDriver,
    Error, Result,
};

pub const PEER_KEY: &str = "hSDwCYkwp1R0i33ctD73Wg2/Og0mOBr066SpjqqbTmo=";

pub fn identity() -> NodeIdentity {
    NodeIdentity {
        interface: "eth0".to_string(),
        mac: "52:54:00:ab:cd:ef".to_string(),
        hostname: "edge-17".to_string(),
    }
}

pub fn settings(dir: &Path) -> Settings {
    Settings {
        state_dir: dir.join("state"),
        tunnel_config_dir: dir.join("wireguard"),
        ca_cert: dir.join("ca/controller-ca.pem"),
        log_file: dir.join("edgeboot.log"),
        loop_interval: 0,
        ..Settings::default()
    }
}

/// Bootstrap document echoing `config_key`.
pub fn bootstrap_document(config_key: &str, controller: Option<&str>) -> String {
    let controller = controller.map(|c| format!("controller = \"{}\"\n", c)).unwrap_or_default();
    format!(
        r#"config_key = "{config_key}"
{controller}
[interface]
name = "wgmgmt"
address = ["fe80::2/64"]

[[peer]]
public_key = "{PEER_KEY}"
endpoint = "ctl.example.net:51820"
allowed_ips = ["fe80::1/128"]
persistent_keepalive = 25
# EOF
"#
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Answer {
    Unreachable,
    NotProvisioned,
    /// Complete document carrying the node's config key
    Document,
    /// Complete document pointing the node at another controller
    Redirect(String),
    /// Document missing its terminator
    Truncated,
    /// Complete document carrying some other key
    WrongKey,
}

pub struct FakeController {
    pub answer: Mutex<Answer>,
    pub recovery: Mutex<Option<String>>,
    /// Controller and request of every negotiation
    pub calls: Mutex<Vec<(String, NegotiationRequest)>>,
    pub recovery_hosts: Mutex<Vec<String>>,
}

impl FakeController {
    pub fn new(answer: Answer) -> Self {
        Self {
            answer: Mutex::new(answer),
            recovery: Mutex::new(None),
            calls: Mutex::new(vec![]),
            recovery_hosts: Mutex::new(vec![]),
        }
    }

    pub fn with_recovery(self, body: &str) -> Self {
        *self.recovery.lock().unwrap() = Some(body.to_string());
        self
    }

    pub fn set_answer(&self, answer: Answer) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn negotiations(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ControllerApi for FakeController {
    async fn negotiate(
        &self,
        controller: &str,
        request: &NegotiationRequest,
    ) -> Result<NegotiationStatus> {
        self.calls.lock().unwrap().push((controller.to_string(), request.clone()));

        let answer = self.answer.lock().unwrap().clone();
        let key = request.config_key.as_str();
        Ok(match answer {
            Answer::Unreachable => return Err(Error::ConnectFailed(controller.to_string())),
            Answer::NotProvisioned => NegotiationStatus::NotProvisioned,
            Answer::Document => NegotiationStatus::Downloaded(bootstrap_document(key, None)),
            Answer::Redirect(to) => {
                NegotiationStatus::Downloaded(bootstrap_document(key, Some(&to)))
            }
            Answer::Truncated => {
                let doc = bootstrap_document(key, None);
                NegotiationStatus::Downloaded(doc.replace("# EOF\n", ""))
            }
            Answer::WrongKey => {
                NegotiationStatus::Downloaded(bootstrap_document(PEER_KEY, None))
            }
        })
    }

    async fn fetch_recovery(&self, host: &str) -> Result<Option<String>> {
        self.recovery_hosts.lock().unwrap().push(host.to_string());
        Ok(self.recovery.lock().unwrap().clone())
    }
}

/// Tunnel that comes up whenever its config file exists.
pub struct FakeTunnel {
    pub config: PathBuf,
    pub reachable: AtomicBool,
    up: AtomicBool,
}

impl FakeTunnel {
    pub fn new(settings: &Settings, reachable: bool) -> Self {
        Self {
            config: settings.tunnel_config_path(),
            reachable: AtomicBool::new(reachable),
            up: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TunnelDriver for FakeTunnel {
    async fn down(&self, _interface: &str) -> Result<()> {
        self.up.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn up(&self, interface: &str) -> Result<()> {
        if !self.config.exists() {
            return Err(Error::CommandFailed("wg-quick up".to_string(), interface.to_string()))
        }
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn probe(&self, _address: &str, _interface: &str, _timeout: Duration) -> bool {
        self.up.load(Ordering::SeqCst) &&
            self.config.exists() &&
            self.reachable.load(Ordering::SeqCst)
    }
}

/// Fixed CNAME records.
pub struct StaticLookup(pub HashMap<String, String>);

impl StaticLookup {
    pub fn new(records: &[(&str, &str)]) -> Self {
        Self(records.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect())
    }
}

#[async_trait]
impl CnameLookup for StaticLookup {
    async fn cname(&self, name: &str) -> Result<Option<String>> {
        Ok(self.0.get(name).cloned())
    }
}
