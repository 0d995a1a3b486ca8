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

use std::{fs, path::Path, process::ExitCode, time::Duration};

use log::{debug, error, info, warn};
use structopt::{clap::AppSettings, StructOpt};
use url::Url;

use edgeboot::{
    bootstrap::{resolve_controller, Bootstrap, LoopState, NodeKeys},
    controller::HttpsController,
    dns::DigLookup,
    identity,
    install::{ensure_installed, SelfInstaller},
    net::http::{load_roots, HttpsClient},
    platform::{boot_service, require_root, InitSystem, OsInfo},
    recovery,
    settings::{Context, Settings, CONFIG_FILE, PROTOCOL_VERSION},
    store::{StateStore, INVOCATIONS, NO_CONNECT},
    tunnel::WgQuick,
    Error, Result,
};

mod logger;

const CONFIG_FILE_CONTENTS: &str = include_str!("../edgebootd_config.toml");

#[derive(Debug, StructOpt)]
#[structopt(
    name = "edgebootd",
    about = "Bring this node under management of its controller",
    global_settings = &[AppSettings::DisableVersion],
)]
struct Args {
    #[structopt(short, long, parse(from_occurrences))]
    /// Increase verbosity (-vv for trace output)
    verbose: u8,

    #[structopt(short, long)]
    /// Controller to negotiate with, remembered for later runs
    controller: Option<String>,
}

/// Write the commented default config if none exists yet.
fn spawn_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(())
    }

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, CONFIG_FILE_CONTENTS)?;
    println!("Config file created in {}", path.display());
    Ok(())
}

fn step(name: &'static str) -> impl FnOnce(Error) -> Error {
    move |e| e.in_step(name)
}

fn https_client(settings: &Settings, timeout: Duration) -> Result<HttpsClient> {
    let (roots, pinned) = load_roots(&settings.ca_cert, &settings.trust_store)?;
    if !pinned {
        debug!(target: "edgebootd", "No pinned controller CA, using {}", settings.trust_store.display());
    }
    HttpsClient::new(roots, timeout)
}

async fn self_install(settings: &Settings, init: InitSystem, client: &HttpsClient) -> Result<()> {
    let release_url = match &settings.release_url {
        Some(url) => Some(Url::parse(url)?),
        None => None,
    };

    let installer = SelfInstaller {
        install_path: settings.install_path.clone(),
        release_url,
        proc_dir: "/proc".into(),
        client,
    };

    let service = boot_service(init);
    let outcome = ensure_installed(&installer, service.as_ref(), &settings.service_name).await?;
    debug!(target: "edgebootd", "Self-installation: {:?}", outcome);
    Ok(())
}

async fn realmain(mut ctx: Context) -> Result<LoopState> {
    info!(
        target: "edgebootd",
        "edgebootd {} (protocol {}) starting", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION,
    );

    require_root().map_err(step("Privilege check"))?;

    // OS support is checked before anything touches the system
    let init = OsInfo::load(&ctx.settings.os_release)
        .and_then(|os| os.init_system())
        .map_err(step("OS detection"))?;

    let negotiate_timeout = Duration::from_secs(ctx.settings.negotiate_timeout);
    let client = https_client(&ctx.settings, negotiate_timeout).map_err(step("TLS setup"))?;

    if let Err(e) = self_install(&ctx.settings, init, &client).await {
        warn!(target: "edgebootd", "Self-installation failed: {}", e);
    }

    let store = StateStore::open(&ctx.settings.state_dir).map_err(step("State store"))?;
    let invocation = store.increment(INVOCATIONS).map_err(step("State store"))?;
    let no_connect = store.increment(NO_CONNECT).map_err(step("State store"))?;
    info!(
        target: "edgebootd",
        "Invocation #{}, {} run(s) without reaching the controller", invocation, no_connect,
    );

    let settings = &ctx.settings;
    let identity = identity::discover(
        &settings.route_table,
        &settings.net_class_dir,
        settings.interface_poll_attempts,
        &settings.fallback_interface,
    )
    .await
    .map_err(step("Identity discovery"))?;

    let recovery_timeout = Duration::from_secs(ctx.settings.recovery_timeout);
    let api = HttpsController::new(client, recovery_timeout);
    match recovery::run(&mut ctx, &store, &identity, &api).await {
        Ok(outcome) => debug!(target: "edgebootd", "Recovery: {:?}", outcome),
        Err(e) => error!(target: "edgebootd", "Recovery failed: {}", e),
    }

    // Recovery may have installed a new controller CA
    let client = https_client(&ctx.settings, negotiate_timeout).map_err(step("TLS setup"))?;
    let api = HttpsController::new(client, recovery_timeout);

    let keys = NodeKeys::load(&store).map_err(step("Key material"))?;

    let controller = resolve_controller(&ctx, &store, &identity, &DigLookup::default())
        .await
        .map_err(step("Controller resolution"))?;

    let tunnel = WgQuick::default();
    let mut bootstrap = Bootstrap::new(&ctx, &store, &identity, &api, &tunnel, keys, controller);
    Ok(bootstrap.run().await)
}

fn main() -> ExitCode {
    let args = Args::from_args();

    if let Err(e) = spawn_config(Path::new(CONFIG_FILE)) {
        eprintln!("Unable to create {}: {}", CONFIG_FILE, e);
    }

    let settings = match Settings::load(Path::new(CONFIG_FILE)) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE
        }
    };

    if let Err(e) = logger::setup_logging(args.verbose, &settings) {
        eprintln!("Logging setup failed: {}", e);
        return ExitCode::FAILURE
    }

    let ctx = Context::new(settings, args.controller);
    match smol::block_on(realmain(ctx)) {
        Ok(LoopState::Connected) => ExitCode::SUCCESS,
        Ok(state) => {
            error!(target: "edgebootd", "Bootstrap ended in state {:?}", state);
            ExitCode::FAILURE
        }
        Err(e) => {
            let kind = if e.is_fatal() { "Fatal" } else { "Unrecoverable" };
            error!(target: "edgebootd", "{} error: {}", kind, e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_matches_defaults() {
        let shipped = Settings::from_toml(CONFIG_FILE_CONTENTS).unwrap();
        let defaults = Settings::default();
        assert_eq!(shipped.loop_interval, defaults.loop_interval);
        assert_eq!(shipped.refetch_after, defaults.refetch_after);
        assert_eq!(shipped.tunnel_config_path(), defaults.tunnel_config_path());
        assert!(shipped.max_attempts.is_none());
    }

    #[test]
    fn shipped_config_options_are_known() {
        // Uncommenting any documented option must yield a valid config
        let uncommented: String = CONFIG_FILE_CONTENTS
            .lines()
            .filter(|l| l.starts_with('#') && !l.starts_with("##"))
            .map(|l| format!("{}\n", &l[1..]))
            .collect();
        let settings = Settings::from_toml(&uncommented).unwrap();
        assert_eq!(settings.max_attempts, Some(300));
        assert_eq!(settings.release_url.as_deref(), Some("https://releases.edge.dark.fi/edgebootd"));
    }
}
