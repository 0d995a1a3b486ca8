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

//! CNAME chasing for per-node controller names.
//!
//! Per-node names are CNAMEs pointing at a controller. TLS has to be
//! validated against a name the controller certificate covers, which
//! is the most specific name still under CNAME redirection: the last
//! name in the chain that has a CNAME record, not the final A target.

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use log::{debug, warn};

use crate::{system::run_command, Result};

/// Source of CNAME records.
#[async_trait]
pub trait CnameLookup {
    /// Target of the CNAME record at `name`, or `None` if there is none.
    async fn cname(&self, name: &str) -> Result<Option<String>>;
}

/// Looks records up with `dig`.
pub struct DigLookup {
    pub timeout: Duration,
}

impl Default for DigLookup {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10) }
    }
}

#[async_trait]
impl CnameLookup for DigLookup {
    async fn cname(&self, name: &str) -> Result<Option<String>> {
        let out = run_command("dig", &["+short", "-t", "CNAME", name], self.timeout)
            .await?
            .check("dig")?;

        Ok(parse_dig_answer(&out.stdout))
    }
}

fn parse_dig_answer(stdout: &str) -> Option<String> {
    let first = stdout.lines().map(str::trim).find(|l| !l.is_empty() && !l.starts_with(';'))?;
    let name = first.trim_end_matches('.');
    if name.is_empty() {
        return None
    }

    Some(name.to_lowercase())
}

/// Follow CNAME records from `hostname` and return the last name that
/// still had one. Lookup errors end the chase. At most `max_depth`
/// records are followed and loops are cut.
pub async fn resolve_canonical(
    lookup: &(dyn CnameLookup + Send + Sync),
    hostname: &str,
    max_depth: usize,
) -> String {
    let mut current = hostname.to_string();
    let mut last_with_cname = hostname.to_string();
    let mut seen = HashSet::from([current.clone()]);

    for _ in 0..max_depth {
        let target = match lookup.cname(&current).await {
            Ok(Some(target)) => target,
            Ok(None) => return last_with_cname,
            Err(e) => {
                debug!(target: "edgeboot::dns", "CNAME lookup of {} failed: {}", current, e);
                return last_with_cname
            }
        };

        debug!(target: "edgeboot::dns", "{} is an alias for {}", current, target);
        last_with_cname = current;

        if !seen.insert(target.clone()) {
            warn!(target: "edgeboot::dns", "CNAME loop detected at {}", target);
            return last_with_cname
        }

        current = target;
    }

    warn!(target: "edgeboot::dns", "CNAME chain from {} exceeds {} records", hostname, max_depth);
    last_with_cname
}
