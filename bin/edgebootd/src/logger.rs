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

//! Log sinks for the daemon.
//!
//! Everything goes to the terminal and is appended to a durable log
//! file. The first file line of a run carries the absolute start time,
//! later lines the seconds elapsed since then. Lines can additionally be
//! mirrored to the local syslog socket.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    os::unix::{fs::OpenOptionsExt, net::UnixDatagram},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Instant,
};

use log::{Level, LevelFilter, Log, Metadata, Record};
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
};

use edgeboot::{settings::Settings, Result};

static MUTED_TARGETS: &[&str] = &["rustls", "async_io", "polling"];

const SYSLOG_SOCKET: &str = "/dev/log";
/// LOG_DAEMON
const SYSLOG_FACILITY: u8 = 3;

fn muted(metadata: &Metadata<'_>) -> bool {
    metadata.level() > Level::Warn && MUTED_TARGETS.iter().any(|t| metadata.target().starts_with(t))
}

fn syslog_severity(level: Level) -> u8 {
    match level {
        Level::Error => 3,
        Level::Warn => 4,
        Level::Info => 6,
        Level::Debug | Level::Trace => 7,
    }
}

/// Appends time-stamped lines to the durable log and the syslog mirror.
pub struct DurableLogger {
    level: LevelFilter,
    config: Config,
    file: Mutex<File>,
    syslog: Option<UnixDatagram>,
    started: Instant,
    first: AtomicBool,
}

impl DurableLogger {
    pub fn new(level: LevelFilter, config: Config, path: &Path, syslog: bool) -> Result<Box<Self>> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).mode(0o640).open(path)?;

        let syslog = if syslog {
            let sock = UnixDatagram::unbound()?;
            match sock.connect(SYSLOG_SOCKET) {
                Ok(()) => Some(sock),
                Err(e) => {
                    eprintln!("Syslog unavailable at {}: {}", SYSLOG_SOCKET, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Box::new(Self {
            level,
            config,
            file: Mutex::new(file),
            syslog,
            started: Instant::now(),
            first: AtomicBool::new(true),
        }))
    }

    fn stamp(&self) -> String {
        if self.first.swap(false, Ordering::SeqCst) {
            return chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f %z").to_string()
        }
        format!("+{}s", self.started.elapsed().as_secs())
    }
}

impl Log for DurableLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level && !muted(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return
        }

        let line = format!(
            "[{}] [{}] {}: {}",
            self.stamp(),
            record.level(),
            record.target(),
            record.args()
        );

        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}", line);
        }

        if let Some(sock) = &self.syslog {
            let pri = SYSLOG_FACILITY * 8 + syslog_severity(record.level());
            let msg = format!("<{}>edgebootd[{}]: {}", pri, std::process::id(), record.args());
            let _ = sock.send(msg.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

impl SharedLogger for DurableLogger {
    fn level(&self) -> LevelFilter {
        self.level
    }

    fn config(&self) -> Option<&Config> {
        Some(&self.config)
    }

    fn as_log(self: Box<Self>) -> Box<dyn Log> {
        Box::new(*self)
    }
}

/// Set up terminal and file logging. `verbose` is the number of `-v` flags.
pub fn setup_logging(verbose: u8, settings: &Settings) -> Result<()> {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = ConfigBuilder::new();
    builder.set_target_level(LevelFilter::Error);
    for target in MUTED_TARGETS {
        builder.add_filter_ignore_str(*target);
    }
    let cfg = builder.build();

    let term = TermLogger::new(level, cfg.clone(), TerminalMode::Mixed, ColorChoice::Auto);
    // The durable log always gets debug detail for post-mortems
    let file_level = level.max(LevelFilter::Debug);
    let file = DurableLogger::new(file_level, cfg, &settings.log_file, settings.syslog)?;

    let loggers: Vec<Box<dyn SharedLogger>> = vec![term, file];
    CombinedLogger::init(loggers)?;
    Ok(())
}
