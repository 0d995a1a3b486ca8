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

//! Persistent state store.
//!
//! A flat directory in which every entry is a single file holding one
//! scalar: counters as decimal ASCII, keys as opaque text, the
//! remembered controller as plain text. A missing file always reads as
//! the default, so new entries never need a migration.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::warn;

use crate::{
    util::file::{ensure_dir, load_file, save_file_atomic},
    Error, Result,
};

/// Counter of agent invocations
pub const INVOCATIONS: &str = "invocations";
/// Counter of consecutive runs that did not reach the controller
pub const NO_CONNECT: &str = "no-connect";
/// Last controller the node was told to use
pub const CONTROLLER: &str = "controller";

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open the store rooted at `dir`, creating it owner-only if needed.
    pub fn open(dir: &Path) -> Result<Self> {
        ensure_dir(dir, DIR_MODE)?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    /// Path of the file backing `key`.
    pub fn path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains('/') || key.contains('\0') {
            return Err(Error::InvalidStateKey(key.to_string()))
        }

        Ok(self.dir.join(key))
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path(key)?.exists())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key)?;
        if !path.exists() {
            return Ok(None)
        }

        Ok(Some(load_file(&path)?))
    }

    pub fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get(key)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        save_file_atomic(&self.path(key)?, value.as_bytes(), FILE_MODE)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Current value of a counter. Missing, empty or garbled files read as 0.
    pub fn counter(&self, key: &str) -> Result<u64> {
        let Some(raw) = self.get(key)? else { return Ok(0) };

        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(0)
        }

        match raw.parse::<u64>() {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(target: "edgeboot::store", "Counter {} holds \"{}\" ({}), treating as 0", key, raw, e);
                Ok(0)
            }
        }
    }

    /// Increment a counter and return the new value.
    pub fn increment(&self, key: &str) -> Result<u64> {
        let value = self.counter(key)?.saturating_add(1);
        self.set(key, &value.to_string())?;
        Ok(value)
    }

    pub fn reset(&self, key: &str) -> Result<()> {
        self.set(key, "0")
    }
}
