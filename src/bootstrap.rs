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

//! Bootstrap negotiation loop.
//!
//! Each iteration optionally downloads a bootstrap document, applies it,
//! (re)starts the management tunnel and probes the controller through
//! it. The loop ends in [`LoopState::Connected`] once the probe answers,
//! or in [`LoopState::Exhausted`] when a configured bound is hit. Without
//! bounds it retries forever.

use std::time::Instant;

use log::{debug, error, info, warn};
use smol::Timer;

use crate::{
    controller::{ControllerApi, NegotiationRequest, NegotiationStatus},
    dns::{resolve_canonical, CnameLookup},
    document::{self, BootstrapDocument},
    identity::NodeIdentity,
    keys::{Key, KeySlot, KeyStore},
    settings::Context,
    store::{StateStore, CONTROLLER, NO_CONNECT},
    tunnel::TunnelDriver,
    util::file::{ensure_dir, save_file_atomic},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// Still trying to reach the controller
    Negotiating,
    /// The management tunnel answers. Terminal.
    Connected,
    /// `max_attempts` or `max_duration` ran out. Terminal.
    Exhausted,
}

/// Pick the controller for this run: an explicit override wins over the
/// remembered controller, which wins over the name derived from the MAC.
/// Only explicit overrides are remembered.
pub async fn resolve_controller(
    ctx: &Context,
    store: &StateStore,
    identity: &NodeIdentity,
    lookup: &(dyn CnameLookup + Send + Sync),
) -> Result<String> {
    if let Some(controller) = &ctx.controller_override {
        if store.get(CONTROLLER)?.as_deref() != Some(controller.as_str()) {
            info!(target: "edgeboot::bootstrap", "Remembering controller {}", controller);
            store.set(CONTROLLER, controller)?;
        }
        return Ok(controller.clone())
    }

    if let Some(controller) = store.get(CONTROLLER)? {
        let controller = controller.trim();
        if !controller.is_empty() {
            debug!(target: "edgeboot::bootstrap", "Using remembered controller {}", controller);
            return Ok(controller.to_string())
        }
    }

    let derived = identity.bootstrap_host(&ctx.settings.base_domain);
    Ok(resolve_canonical(lookup, &derived, ctx.settings.cname_max_depth).await)
}

/// Key material offered to the controller.
pub struct NodeKeys {
    pub config: Key,
    pub recovery: Key,
    pub tunnel: Key,
}

impl NodeKeys {
    /// Load every slot, generating tentative keys where none exist.
    pub fn load(store: &StateStore) -> Result<Self> {
        let keys = KeyStore::new(store);
        Ok(Self {
            config: keys.load_or_generate(KeySlot::Config)?,
            recovery: keys.load_or_generate(KeySlot::Recovery)?,
            tunnel: keys.load_or_generate(KeySlot::TunnelPrivate)?,
        })
    }
}

pub struct Bootstrap<'a> {
    ctx: &'a Context,
    store: &'a StateStore,
    identity: &'a NodeIdentity,
    api: &'a (dyn ControllerApi + Send + Sync),
    tunnel: &'a (dyn TunnelDriver + Send + Sync),
    keys: NodeKeys,
    controller: String,
    /// Iterations since the last applied document
    counter: u64,
    /// Iterations in this run
    attempts: u64,
    force_refetch: bool,
    state: LoopState,
}

impl<'a> Bootstrap<'a> {
    pub fn new(
        ctx: &'a Context,
        store: &'a StateStore,
        identity: &'a NodeIdentity,
        api: &'a (dyn ControllerApi + Send + Sync),
        tunnel: &'a (dyn TunnelDriver + Send + Sync),
        keys: NodeKeys,
        controller: String,
    ) -> Self {
        Self {
            ctx,
            store,
            identity,
            api,
            tunnel,
            keys,
            controller,
            counter: 0,
            attempts: 0,
            force_refetch: ctx.force_refetch,
            state: LoopState::Negotiating,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// Iterate until a terminal state is reached.
    pub async fn run(&mut self) -> LoopState {
        let started = Instant::now();
        let ctx = self.ctx;
        let settings = &ctx.settings;
        info!(target: "edgeboot::bootstrap", "Negotiating with controller {}", self.controller);

        loop {
            self.state = self.iterate().await;
            if self.state == LoopState::Connected {
                return self.state
            }

            if let Some(max) = settings.max_attempts {
                if self.attempts >= max {
                    warn!(target: "edgeboot::bootstrap", "Giving up after {} attempts", self.attempts);
                    self.state = LoopState::Exhausted;
                    return self.state
                }
            }

            if let Some(max) = settings.max_duration {
                if started.elapsed().as_secs() >= max {
                    warn!(target: "edgeboot::bootstrap", "Giving up after {}s", max);
                    self.state = LoopState::Exhausted;
                    return self.state
                }
            }

            Timer::after(settings.loop_interval()).await;
        }
    }

    /// One pass of the loop. Never fails: every problem is logged and
    /// left for the next pass.
    pub async fn iterate(&mut self) -> LoopState {
        let ctx = self.ctx;
        let settings = &ctx.settings;
        let config_path = settings.tunnel_config_path();
        let interface = settings.tunnel_interface.as_str();
        self.attempts += 1;

        if !config_path.exists() || self.counter > settings.refetch_after || self.force_refetch {
            self.force_refetch = false;
            self.negotiate().await;
        }

        if config_path.exists() {
            if let Err(e) = self.tunnel.down(interface).await {
                debug!(target: "edgeboot::bootstrap", "Tearing down {}: {}", interface, e);
            }
            if let Err(e) = self.tunnel.up(interface).await {
                warn!(target: "edgeboot::bootstrap", "Bringing up {} failed: {}", interface, e);
            }
        }

        let connected =
            self.tunnel.probe(&settings.probe_address, interface, settings.probe_timeout()).await;
        self.counter += 1;

        if !connected {
            debug!(
                target: "edgeboot::bootstrap",
                "Controller not reachable through {} (attempt {})", interface, self.attempts,
            );
            return LoopState::Negotiating
        }

        info!(target: "edgeboot::bootstrap", "Management tunnel is up, controller reachable");
        if let Err(e) = self.store.reset(NO_CONNECT) {
            error!(target: "edgeboot::bootstrap", "Resetting {} counter failed: {}", NO_CONNECT, e);
        }
        LoopState::Connected
    }

    fn request(&self) -> NegotiationRequest {
        NegotiationRequest {
            mac: self.identity.mac.clone(),
            hostname: self.identity.hostname.clone(),
            recovery_key: self.keys.recovery.as_str().to_string(),
            config_key: self.keys.config.as_str().to_string(),
            wg_public: self.keys.tunnel.public_key(),
        }
    }

    async fn negotiate(&mut self) {
        let request = self.request();

        let body = match self.api.negotiate(&self.controller, &request).await {
            Ok(NegotiationStatus::Downloaded(body)) => body,
            Ok(NegotiationStatus::NotProvisioned) => {
                debug!(target: "edgeboot::bootstrap", "Controller has no configuration for us yet");
                return
            }
            Ok(NegotiationStatus::Unexpected(code)) => {
                info!(target: "edgeboot::bootstrap", "Controller {} answered {}", self.controller, code);
                return
            }
            Err(e) => {
                info!(target: "edgeboot::bootstrap", "Negotiation with {} failed: {}", self.controller, e);
                return
            }
        };

        if let Err(e) = self.apply(&body) {
            warn!(target: "edgeboot::bootstrap", "Discarding bootstrap document: {}", e);
        }
    }

    /// Check and apply a downloaded bootstrap document.
    fn apply(&mut self, body: &str) -> Result<()> {
        let ctx = self.ctx;
        let settings = &ctx.settings;
        let keys = KeyStore::new(self.store);

        document::check(body, keys.committed(KeySlot::Config)?.as_ref())?;
        let doc = BootstrapDocument::parse(body, &settings.tunnel_interface)?;

        // The config file marks the document as applied, so it goes last
        if let Some(controller) = &doc.controller {
            if *controller != self.controller {
                info!(target: "edgeboot::bootstrap", "Controller moved to {}", controller);
                self.store.set(CONTROLLER, controller)?;
                self.controller = controller.clone();
            }
        }

        if !settings.tunnel_config_dir.exists() {
            ensure_dir(&settings.tunnel_config_dir, 0o700)?;
        }
        let rendered = doc.render_wg_quick(&self.keys.tunnel);
        save_file_atomic(&settings.tunnel_config_path(), rendered.as_bytes(), 0o600)?;
        info!(
            target: "edgeboot::bootstrap",
            "Applied tunnel configuration to {}", settings.tunnel_config_path().display(),
        );

        self.counter = 0;
        keys.promote_all()?;
        Ok(())
    }
}
