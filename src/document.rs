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

//! Documents downloaded from the controller.
//!
//! Both the bootstrap and the recovery channel deliver TOML documents
//! whose last line is the terminator `# EOF`. Documents are data only:
//! they are checked, parsed and then applied by local code. Nothing
//! fetched from the network is ever executed.

use log::warn;
use serde::Deserialize;

use crate::{keys::Key, net::http::pem_roots, Error, Result};

/// Last line of every complete document.
pub const TERMINATOR: &str = "# EOF";

/// Whether the last line of `body` is exactly the terminator. A single
/// trailing newline is allowed.
pub fn is_complete(body: &str) -> bool {
    let body = body.strip_suffix('\n').unwrap_or(body);
    let last = body.rsplit('\n').next().unwrap_or("");
    last.strip_suffix('\r').unwrap_or(last) == TERMINATOR
}

/// Check that `body` was fully downloaded and, if `key` is known, that
/// it carries that key.
pub fn check(body: &str, key: Option<&Key>) -> Result<()> {
    if !is_complete(body) {
        return Err(Error::MissingTerminator)
    }

    if let Some(key) = key {
        if !body.contains(key.as_str()) {
            return Err(Error::KeyMismatch)
        }
    }

    Ok(())
}

/// Reject values that would break out of a line in a rendered config.
fn single_line(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains(['\n', '\r']) {
        return Err(Error::InvalidDocument(format!("bad {}", what)))
    }
    Ok(())
}

fn wg_key(what: &str, value: &str) -> Result<()> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    match STANDARD.decode(value) {
        Ok(v) if v.len() == 32 => Ok(()),
        _ => Err(Error::InvalidDocument(format!("bad {}", what))),
    }
}

/// Tunnel parameters handed out by the controller.
#[derive(Clone, Debug, Deserialize)]
pub struct BootstrapDocument {
    /// Echo of the node's config key
    pub config_key: Option<String>,
    /// Controller the node should use from now on
    pub controller: Option<String>,
    pub interface: InterfaceSection,
    #[serde(default, rename = "peer")]
    pub peers: Vec<PeerSection>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InterfaceSection {
    pub name: Option<String>,
    #[serde(default)]
    pub address: Vec<String>,
    pub listen_port: Option<u16>,
    pub mtu: Option<u16>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PeerSection {
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    pub persistent_keepalive: Option<u16>,
}

impl BootstrapDocument {
    /// Parse and validate a document. The configuration is always
    /// rendered for the local `interface`, whatever name it carries.
    pub fn parse(body: &str, interface: &str) -> Result<Self> {
        let doc: Self = toml::from_str(body)?;

        if let Some(name) = &doc.interface.name {
            if name != interface {
                warn!(
                    target: "edgeboot::document",
                    "Document names interface {}, configuring {} instead", name, interface,
                );
            }
        }

        if let Some(controller) = &doc.controller {
            single_line("controller", controller)?;
            if controller.contains(['/', ' ']) {
                return Err(Error::InvalidDocument("bad controller".to_string()))
            }
        }

        if doc.interface.address.is_empty() {
            return Err(Error::InvalidDocument("interface has no address".to_string()))
        }
        for addr in &doc.interface.address {
            single_line("address", addr)?;
        }

        if doc.peers.is_empty() {
            return Err(Error::InvalidDocument("no peers".to_string()))
        }

        for peer in &doc.peers {
            wg_key("peer public key", &peer.public_key)?;
            if let Some(psk) = &peer.preshared_key {
                wg_key("peer preshared key", psk)?;
            }
            if let Some(endpoint) = &peer.endpoint {
                single_line("endpoint", endpoint)?;
            }
            if peer.allowed_ips.is_empty() {
                return Err(Error::InvalidDocument("peer has no allowed IPs".to_string()))
            }
            for ip in &peer.allowed_ips {
                single_line("allowed IP", ip)?;
            }
        }

        Ok(doc)
    }

    /// Render a wg-quick configuration using the local private key.
    pub fn render_wg_quick(&self, private_key: &Key) -> String {
        let mut out = String::from("[Interface]\n");
        out.push_str(&format!("PrivateKey = {}\n", private_key.as_str()));
        out.push_str(&format!("Address = {}\n", self.interface.address.join(", ")));
        if let Some(port) = self.interface.listen_port {
            out.push_str(&format!("ListenPort = {}\n", port));
        }
        if let Some(mtu) = self.interface.mtu {
            out.push_str(&format!("MTU = {}\n", mtu));
        }

        for peer in &self.peers {
            out.push_str("\n[Peer]\n");
            out.push_str(&format!("PublicKey = {}\n", peer.public_key));
            if let Some(psk) = &peer.preshared_key {
                out.push_str(&format!("PresharedKey = {}\n", psk));
            }
            if let Some(endpoint) = &peer.endpoint {
                out.push_str(&format!("Endpoint = {}\n", endpoint));
            }
            out.push_str(&format!("AllowedIPs = {}\n", peer.allowed_ips.join(", ")));
            if let Some(ka) = peer.persistent_keepalive {
                out.push_str(&format!("PersistentKeepalive = {}\n", ka));
            }
        }

        out
    }
}

/// Remediation steps the recovery channel can order.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecoveryAction {
    /// Use and remember a different controller
    SetController { address: String },
    /// Drop the remembered controller so the derived one is used
    ForgetController,
    /// Delete the applied tunnel configuration
    RemoveTunnelConfig,
    /// Zero one of the persisted counters
    ResetCounter { name: String },
    /// Pin a new controller CA certificate
    InstallCaCertificate { pem: String },
    /// Fetch the bootstrap document even if a tunnel config exists
    RefetchConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RecoveryDocument {
    /// Echo of the node's recovery key
    pub recovery_key: Option<String>,
    #[serde(default, rename = "action")]
    pub actions: Vec<RecoveryAction>,
}

impl RecoveryDocument {
    pub fn parse(body: &str) -> Result<Self> {
        let doc: Self = toml::from_str(body)?;

        for action in &doc.actions {
            match action {
                RecoveryAction::SetController { address } => {
                    single_line("controller", address)?;
                    if address.contains(['/', ' ']) {
                        return Err(Error::InvalidDocument("bad controller".to_string()))
                    }
                }
                RecoveryAction::InstallCaCertificate { pem } => {
                    if let Err(e) = pem_roots(pem.as_bytes()) {
                        return Err(Error::InvalidDocument(format!("bad CA certificate: {}", e)))
                    }
                }
                _ => {}
            }
        }

        Ok(doc)
    }
}
