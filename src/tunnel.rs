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

//! Management tunnel control, delegated to `wg-quick` and `ping`.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::{system::run_command, Result};

#[async_trait]
pub trait TunnelDriver {
    /// Tear the interface down. Failing because it is already down is fine.
    async fn down(&self, interface: &str) -> Result<()>;
    /// Bring the interface up from its config file.
    async fn up(&self, interface: &str) -> Result<()>;
    /// Single ping of `address` through `interface`.
    async fn probe(&self, address: &str, interface: &str, timeout: Duration) -> bool;
}

/// Drives the kernel WireGuard implementation through `wg-quick`.
pub struct WgQuick {
    pub command_timeout: Duration,
}

impl Default for WgQuick {
    fn default() -> Self {
        Self { command_timeout: Duration::from_secs(30) }
    }
}

/// Link-local addresses need a zone to be routable.
fn scoped(address: &str, interface: &str) -> String {
    if address.to_lowercase().starts_with("fe80:") && !address.contains('%') {
        return format!("{}%{}", address, interface)
    }
    address.to_string()
}

#[async_trait]
impl TunnelDriver for WgQuick {
    async fn down(&self, interface: &str) -> Result<()> {
        run_command("wg-quick", &["down", interface], self.command_timeout).await?.check("wg-quick down")?;
        Ok(())
    }

    async fn up(&self, interface: &str) -> Result<()> {
        run_command("wg-quick", &["up", interface], self.command_timeout).await?.check("wg-quick up")?;
        Ok(())
    }

    async fn probe(&self, address: &str, interface: &str, timeout: Duration) -> bool {
        let target = scoped(address, interface);
        let wait = timeout.as_secs().max(1).to_string();

        match run_command("ping", &["-c", "1", "-W", &wait, &target], timeout + Duration::from_secs(2))
            .await
        {
            Ok(out) => out.success,
            Err(e) => {
                debug!(target: "edgeboot::tunnel", "ping {} failed: {}", target, e);
                false
            }
        }
    }
}
