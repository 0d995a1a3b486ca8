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

//! Host platform detection and boot-time service registration.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, info};

use crate::{
    system::run_command,
    util::file::{load_file, save_file_atomic},
    Error, Result,
};

const INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Releases too old to ship an in-kernel WireGuard.
const UNSUPPORTED_CODENAMES: &[&str] = &["wheezy", "jessie", "stretch", "trusty", "xenial"];

/// Fail unless running with root privileges.
pub fn require_root() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    if unsafe { libc::geteuid() } != 0 {
        return Err(Error::NotRoot)
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitSystem {
    Systemd,
    OpenRc,
}

/// Relevant fields of os-release(5).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OsInfo {
    pub id: String,
    pub id_like: Vec<String>,
    pub codename: Option<String>,
}

impl OsInfo {
    pub fn parse(data: &str) -> Self {
        let mut fields = HashMap::new();
        for line in data.lines() {
            let Some((k, v)) = line.trim().split_once('=') else { continue };
            fields.insert(k.trim(), v.trim().trim_matches('"').trim_matches('\'').to_string());
        }

        let id = fields.get("ID").cloned().unwrap_or_default().to_lowercase();
        let id_like = fields
            .get("ID_LIKE")
            .map(|v| v.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default();
        let codename = fields.get("VERSION_CODENAME").filter(|v| !v.is_empty()).cloned();

        Self { id, id_like, codename }
    }

    pub fn load(path: &Path) -> Result<Self> {
        match load_file(path) {
            Ok(data) => Ok(Self::parse(&data)),
            Err(_) => Err(Error::UnsupportedOs(format!("{} is unreadable", path.display()))),
        }
    }

    fn is(&self, family: &str) -> bool {
        self.id == family || self.id_like.iter().any(|l| l == family)
    }

    /// Choose the init system, refusing distributions we cannot serve.
    pub fn init_system(&self) -> Result<InitSystem> {
        if let Some(codename) = &self.codename {
            if UNSUPPORTED_CODENAMES.contains(&codename.as_str()) {
                return Err(Error::UnsupportedOs(format!("{} {}", self.id, codename)))
            }
        }

        if self.is("alpine") {
            return Ok(InitSystem::OpenRc)
        }

        if ["debian", "ubuntu", "raspbian", "fedora", "rhel", "centos", "arch"]
            .iter()
            .any(|f| self.is(f))
        {
            return Ok(InitSystem::Systemd)
        }

        Err(Error::UnsupportedOs(self.id.clone()))
    }
}

/// Makes sure the agent is started at boot.
#[async_trait]
pub trait BootService {
    async fn ensure(&self, name: &str, exec: &Path) -> Result<()>;
}

pub struct Systemd {
    pub unit_dir: PathBuf,
}

impl Default for Systemd {
    fn default() -> Self {
        Self { unit_dir: PathBuf::from("/etc/systemd/system") }
    }
}

impl Systemd {
    pub fn unit(exec: &Path) -> String {
        format!(
            "[Unit]\n\
             Description=Edge node management tunnel bootstrap\n\
             Wants=network-online.target\n\
             After=network-online.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             ExecStart={}\n\
             Restart=on-failure\n\
             RestartSec=60\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            exec.display()
        )
    }
}

/// Write `content` to `path` unless it is already there. Returns whether
/// anything was written.
fn install_file(path: &Path, content: &str, mode: u32) -> Result<bool> {
    if load_file(path).ok().as_deref() == Some(content) {
        return Ok(false)
    }
    save_file_atomic(path, content.as_bytes(), mode)?;
    Ok(true)
}

#[async_trait]
impl BootService for Systemd {
    async fn ensure(&self, name: &str, exec: &Path) -> Result<()> {
        let path = self.unit_dir.join(format!("{}.service", name));
        if install_file(&path, &Self::unit(exec), 0o644)? {
            info!(target: "edgeboot::platform", "Installed {}", path.display());
            run_command("systemctl", &["daemon-reload"], INIT_TIMEOUT).await?.check("systemctl daemon-reload")?;
        }

        if run_command("systemctl", &["is-enabled", "--quiet", name], INIT_TIMEOUT).await?.success {
            debug!(target: "edgeboot::platform", "{} already enabled", name);
            return Ok(())
        }

        run_command("systemctl", &["enable", name], INIT_TIMEOUT).await?.check("systemctl enable")?;
        info!(target: "edgeboot::platform", "Enabled {} at boot", name);
        Ok(())
    }
}

pub struct OpenRc {
    pub init_dir: PathBuf,
}

impl Default for OpenRc {
    fn default() -> Self {
        Self { init_dir: PathBuf::from("/etc/init.d") }
    }
}

impl OpenRc {
    pub fn script(exec: &Path) -> String {
        format!(
            "#!/sbin/openrc-run\n\
             \n\
             description=\"Edge node management tunnel bootstrap\"\n\
             command=\"{}\"\n\
             command_background=true\n\
             pidfile=\"/run/${{RC_SVCNAME}}.pid\"\n\
             \n\
             depend() {{\n\
             \tneed net\n\
             }}\n",
            exec.display()
        )
    }
}

#[async_trait]
impl BootService for OpenRc {
    async fn ensure(&self, name: &str, exec: &Path) -> Result<()> {
        let path = self.init_dir.join(name);
        if install_file(&path, &Self::script(exec), 0o755)? {
            info!(target: "edgeboot::platform", "Installed {}", path.display());
        }

        // rc-update is idempotent
        run_command("rc-update", &["add", name, "default"], INIT_TIMEOUT).await?.check("rc-update")?;
        Ok(())
    }
}

/// Boot service manager for `init`.
pub fn boot_service(init: InitSystem) -> Box<dyn BootService + Send + Sync> {
    match init {
        InitSystem::Systemd => Box::new(Systemd::default()),
        InitSystem::OpenRc => Box::new(OpenRc::default()),
    }
}
