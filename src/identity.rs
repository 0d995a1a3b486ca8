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

//! Node identity derived from the hardware address of the primary
//! network interface.

use std::{path::Path, time::Duration};

use log::{debug, info, warn};
use smol::Timer;

use crate::{util::file::load_file, Error, Result};

/// Stable handle for this machine. Computed once per run, never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Interface carrying the default route
    pub interface: String,
    /// Lower-case, colon separated hardware address
    pub mac: String,
    /// Hostname reported to the controller
    pub hostname: String,
}

impl NodeIdentity {
    /// MAC address with the colons stripped, as used in DNS labels.
    pub fn mac_plain(&self) -> String {
        self.mac.replace(':', "")
    }

    /// `<mac>.bootstrap.<base>`
    pub fn bootstrap_host(&self, base_domain: &str) -> String {
        format!("{}.bootstrap.{}", self.mac_plain(), base_domain)
    }

    /// `<mac>.recovery.<base>`
    pub fn recovery_host(&self, base_domain: &str) -> String {
        format!("{}.recovery.{}", self.mac_plain(), base_domain)
    }
}

/// Find the interface holding the default route in the contents of a
/// Linux route table (`/proc/net/route`).
pub fn parse_default_route(table: &str) -> Option<String> {
    // Iface  Destination  Gateway  Flags  RefCnt  Use  Metric  Mask ...
    const RTF_UP: u32 = 0x1;

    for line in table.lines().skip(1) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 8 {
            continue
        }

        let flags = u32::from_str_radix(cols[3], 16).unwrap_or(0);
        if cols[1] == "00000000" && cols[7] == "00000000" && flags & RTF_UP != 0 {
            return Some(cols[0].to_string())
        }
    }

    None
}

/// Poll the route table for the default interface.
///
/// Networking may still be coming up at boot, so the table is read up to
/// `attempts` times with `pause` in between before settling on `fallback`.
pub async fn primary_interface(
    route_table: &Path,
    attempts: u32,
    pause: Duration,
    fallback: &str,
) -> String {
    for attempt in 1..=attempts {
        match load_file(route_table) {
            Ok(table) => {
                if let Some(iface) = parse_default_route(&table) {
                    debug!(target: "edgeboot::identity", "Default route via {} (attempt {})", iface, attempt);
                    return iface
                }
            }
            Err(e) => {
                debug!(target: "edgeboot::identity", "Reading {} failed: {}", route_table.display(), e)
            }
        }

        if attempt < attempts {
            Timer::after(pause).await;
        }
    }

    warn!(target: "edgeboot::identity", "No default route found, falling back to {}", fallback);
    fallback.to_string()
}

/// Check and normalize a textual hardware address.
pub fn normalize_mac(raw: &str) -> Result<String> {
    let mac = raw.trim().to_lowercase();
    let octets: Vec<&str> = mac.split(':').collect();

    let valid = octets.len() == 6 &&
        octets.iter().all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));

    if !valid || mac == "00:00:00:00:00:00" {
        return Err(Error::InvalidMac(raw.trim().to_string()))
    }

    Ok(mac)
}

/// Read the hardware address of `interface`. Any failure here means the
/// environment is broken and is reported as fatal.
pub fn mac_address(net_class_dir: &Path, interface: &str) -> Result<String> {
    let path = net_class_dir.join(interface).join("address");
    let raw = match load_file(&path) {
        Ok(v) => v,
        Err(_) => return Err(Error::MacUnreadable(interface.to_string())),
    };

    normalize_mac(&raw).map_err(|_| Error::MacUnreadable(interface.to_string()))
}

/// Hostname to report to the controller.
pub fn local_hostname() -> String {
    if let Ok(name) = load_file(Path::new("/proc/sys/kernel/hostname")) {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string()
        }
    }

    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for `buf.len()` bytes and gethostname
    // never writes past the given length.
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if let Ok(name) = std::str::from_utf8(&buf[..end]) {
            if !name.is_empty() {
                return name.to_string()
            }
        }
    }

    "unknown".to_string()
}

/// Build the identity of this node.
pub async fn discover(
    route_table: &Path,
    net_class_dir: &Path,
    attempts: u32,
    fallback: &str,
) -> Result<NodeIdentity> {
    let interface = primary_interface(route_table, attempts, Duration::from_secs(1), fallback).await;
    let mac = mac_address(net_class_dir, &interface)?;
    let hostname = local_hostname();

    info!(target: "edgeboot::identity", "Node {} ({}) on {}", mac, hostname, interface);
    Ok(NodeIdentity { interface, mac, hostname })
}
