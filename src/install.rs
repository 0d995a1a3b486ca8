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

//! Self-installation guard.
//!
//! Makes sure a copy of the agent lives at its canonical path and is
//! registered to start at boot. The running instance itself is never
//! touched, and an installed copy that is currently executing is never
//! replaced.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use url::Url;

use crate::{
    net::HttpsClient,
    platform::BootService,
    util::file::{ensure_dir, save_file_atomic},
    Error, Result,
};

const EXEC_MODE: u32 = 0o755;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Already running from the canonical path
    InPlace,
    /// The latest published build was installed
    Downloaded,
    /// A copy of the running executable was installed
    Copied,
}

/// Whether any process other than this one executes `path`.
pub fn is_executing(proc_dir: &Path, path: &Path) -> bool {
    let Ok(entries) = fs::read_dir(proc_dir) else { return false };
    let own_pid = std::process::id().to_string();

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str() else { continue };
        if pid == own_pid || !pid.bytes().all(|b| b.is_ascii_digit()) {
            continue
        }

        if let Ok(exe) = fs::read_link(entry.path().join("exe")) {
            if exe == path {
                return true
            }
        }
    }

    false
}

pub struct SelfInstaller<'a> {
    pub install_path: PathBuf,
    pub release_url: Option<Url>,
    pub proc_dir: PathBuf,
    pub client: &'a HttpsClient,
}

impl SelfInstaller<'_> {
    /// Ensure `current` (the running executable) is installed at the
    /// canonical path.
    pub async fn install(&self, current: &Path) -> Result<InstallOutcome> {
        let current = fs::canonicalize(current)?;
        let target = fs::canonicalize(&self.install_path).unwrap_or(self.install_path.clone());

        if current == target {
            debug!(target: "edgeboot::install", "Running from {}", target.display());
            return Ok(InstallOutcome::InPlace)
        }

        if is_executing(&self.proc_dir, &target) {
            return Err(Error::InstallRefused(target.display().to_string()))
        }

        if let Some(dir) = self.install_path.parent().filter(|d| !d.exists()) {
            ensure_dir(dir, 0o755)?;
        }

        if let Some(url) = &self.release_url {
            match self.download(url).await {
                Ok(()) => {
                    info!(target: "edgeboot::install", "Installed latest build to {}", self.install_path.display());
                    return Ok(InstallOutcome::Downloaded)
                }
                Err(e) => {
                    warn!(target: "edgeboot::install", "Fetching {} failed ({}), installing running copy", url, e)
                }
            }
        }

        let data = fs::read(&current)?;
        save_file_atomic(&self.install_path, &data, EXEC_MODE)?;
        info!(target: "edgeboot::install", "Installed {} to {}", current.display(), self.install_path.display());
        Ok(InstallOutcome::Copied)
    }

    async fn download(&self, url: &Url) -> Result<()> {
        let rep = self.client.get(url).await?;
        if rep.status != 200 {
            return Err(Error::MalformedHttpResponse(format!("status {}", rep.status)))
        }

        // Only accept something that looks like an executable
        if !(rep.body.starts_with(b"\x7fELF") || rep.body.starts_with(b"#!")) {
            return Err(Error::MalformedHttpResponse("not an executable".to_string()))
        }

        save_file_atomic(&self.install_path, &rep.body, EXEC_MODE)
    }
}

/// Install the agent and register it as a boot service.
pub async fn ensure_installed(
    installer: &SelfInstaller<'_>,
    service: &(dyn BootService + Send + Sync),
    service_name: &str,
) -> Result<InstallOutcome> {
    let current = std::env::current_exe()?;
    let outcome = installer.install(&current).await?;
    service.ensure(service_name, &installer.install_path).await?;
    Ok(outcome)
}
