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

use std::time::Duration;

use log::trace;
use smol::process::Command;

use super::io_timeout;
use crate::{Error, Result};

/// Captured result of an external command.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Turn a non-zero exit into an [`Error::CommandFailed`].
    pub fn check(self, what: &str) -> Result<Self> {
        if self.success {
            return Ok(self)
        }

        Err(Error::CommandFailed(what.to_string(), self.stderr.trim().to_string()))
    }
}

/// Run `program` with `args` and capture its output. The child is
/// killed if it does not exit within `limit`.
pub async fn run_command(program: &str, args: &[&str], limit: Duration) -> Result<CommandOutput> {
    trace!(target: "edgeboot::system", "Running `{} {}`", program, args.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);

    let output = match io_timeout(limit, cmd.output()).await {
        Ok(v) => v,
        Err(e) => return Err(Error::CommandFailed(program.to_string(), e.to_string())),
    };

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_status() {
        smol::block_on(async {
            let out = run_command("sh", &["-c", "echo hello"], Duration::from_secs(5)).await.unwrap();
            assert!(out.success);
            assert_eq!(out.stdout.trim(), "hello");

            let out = run_command("sh", &["-c", "exit 3"], Duration::from_secs(5)).await.unwrap();
            assert!(!out.success);
            assert!(out.check("sh").is_err());
        });
    }

    #[test]
    fn missing_program_is_an_error() {
        smol::block_on(async {
            assert!(run_command("/nonexistent/program", &[], Duration::from_secs(1)).await.is_err());
        });
    }
}
