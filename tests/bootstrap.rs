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

use std::fs;

use tempdir::TempDir;

use edgeboot::{
    bootstrap::{resolve_controller, Bootstrap, LoopState, NodeKeys},
    controller::ControllerApi,
    dns::CnameLookup,
    keys::{KeySlot, KeyStore},
    recovery,
    settings::{Context, Settings},
    store::{StateStore, CONTROLLER, INVOCATIONS, NO_CONNECT},
    tunnel::TunnelDriver,
    Result,
};

mod common;
use common::{Answer, FakeController, FakeTunnel, StaticLookup};

const DERIVED: &str = "525400abcdef.bootstrap.edge.dark.fi";

/// One agent invocation, as the daemon performs it after the privileged
/// startup steps.
async fn invoke(
    ctx: &mut Context,
    api: &(dyn ControllerApi + Send + Sync),
    tunnel: &(dyn TunnelDriver + Send + Sync),
    lookup: &(dyn CnameLookup + Send + Sync),
) -> Result<(LoopState, String)> {
    let store = StateStore::open(&ctx.settings.state_dir)?;
    store.increment(INVOCATIONS)?;
    store.increment(NO_CONNECT)?;

    let identity = common::identity();
    recovery::run(ctx, &store, &identity, api).await?;
    let keys = NodeKeys::load(&store)?;

    let controller = resolve_controller(ctx, &store, &identity, lookup).await?;
    let mut bootstrap = Bootstrap::new(ctx, &store, &identity, api, tunnel, keys, controller);
    let state = bootstrap.run().await;
    Ok((state, bootstrap.controller().to_string()))
}

fn bounded(dir: &TempDir, max_attempts: u64) -> Settings {
    Settings { max_attempts: Some(max_attempts), ..common::settings(dir.path()) }
}

#[test]
fn fresh_node_is_provisioned() -> Result<()> {
    let dir = TempDir::new("edgeboot-fresh").unwrap();
    let mut ctx = Context::new(bounded(&dir, 10), None);
    let api = FakeController::new(Answer::Document);
    let tunnel = FakeTunnel::new(&ctx.settings, true);
    let lookup = StaticLookup::new(&[(DERIVED, "nodes.edge.dark.fi")]);

    let (state, controller) = smol::block_on(invoke(&mut ctx, &api, &tunnel, &lookup))?;
    assert_eq!(state, LoopState::Connected);
    assert_eq!(controller, DERIVED);
    assert_eq!(api.negotiations(), 1);

    let conf = fs::read_to_string(ctx.settings.tunnel_config_path()).unwrap();
    assert!(conf.starts_with("[Interface]\nPrivateKey = "));
    assert!(conf.contains(&format!("PublicKey = {}", common::PEER_KEY)));

    let store = StateStore::open(&ctx.settings.state_dir)?;
    assert_eq!(store.counter(NO_CONNECT)?, 0);
    assert_eq!(store.counter(INVOCATIONS)?, 1);

    let keys = KeyStore::new(&store);
    for slot in KeySlot::ALL {
        assert!(keys.is_committed(slot)?, "{} not committed", slot);
        assert!(!store.exists(&format!("{}.new", slot))?);
    }

    // The offered keys are the ones now committed
    let calls = api.calls.lock().unwrap();
    let request = &calls[0].1;
    assert_eq!(request.mac, "52:54:00:ab:cd:ef");
    assert_eq!(request.hostname, "edge-17");
    assert_eq!(Some(request.config_key.clone()), store.get(KeySlot::Config.name())?);
    let tunnel_key = keys.committed(KeySlot::TunnelPrivate)?.unwrap();
    assert_eq!(request.wg_public, tunnel_key.public_key());
    Ok(())
}

#[test]
fn second_run_is_idempotent() -> Result<()> {
    let dir = TempDir::new("edgeboot-idempotent").unwrap();
    let mut ctx = Context::new(bounded(&dir, 10), Some("ctl-a.example.net".to_string()));
    let api = FakeController::new(Answer::Document);
    let tunnel = FakeTunnel::new(&ctx.settings, true);
    let lookup = StaticLookup::new(&[]);

    let (state, _) = smol::block_on(invoke(&mut ctx, &api, &tunnel, &lookup))?;
    assert_eq!(state, LoopState::Connected);

    let store = StateStore::open(&ctx.settings.state_dir)?;
    let before: Vec<_> =
        KeySlot::ALL.iter().map(|s| store.get(s.name()).unwrap()).collect();

    // Without an override the remembered controller is used and kept
    let mut ctx = Context::new(ctx.settings.clone(), None);
    let (state, controller) = smol::block_on(invoke(&mut ctx, &api, &tunnel, &lookup))?;
    assert_eq!(state, LoopState::Connected);
    assert_eq!(controller, "ctl-a.example.net");
    assert_eq!(store.get(CONTROLLER)?.as_deref(), Some("ctl-a.example.net"));

    let after: Vec<_> = KeySlot::ALL.iter().map(|s| store.get(s.name()).unwrap()).collect();
    assert_eq!(before, after);
    assert_eq!(store.counter(INVOCATIONS)?, 2);

    // The config already exists, so the second run did not negotiate
    assert_eq!(api.negotiations(), 1);
    Ok(())
}

#[test]
fn stale_config_is_refetched_periodically() -> Result<()> {
    let dir = TempDir::new("edgeboot-stale").unwrap();
    let ctx = Context::new(bounded(&dir, 300), None);
    fs::create_dir_all(&ctx.settings.tunnel_config_dir).unwrap();
    fs::write(ctx.settings.tunnel_config_path(), "[Interface]\n").unwrap();

    let store = StateStore::open(&ctx.settings.state_dir)?;
    let identity = common::identity();
    let api = FakeController::new(Answer::Unreachable);
    let tunnel = FakeTunnel::new(&ctx.settings, false);

    let keys = NodeKeys::load(&store)?;
    let mut bootstrap =
        Bootstrap::new(&ctx, &store, &identity, &api, &tunnel, keys, DERIVED.to_string());

    let mut fetched_at = vec![];
    for attempt in 1..=300u64 {
        let before = api.negotiations();
        assert_eq!(smol::block_on(bootstrap.iterate()), LoopState::Negotiating);
        if api.negotiations() > before {
            fetched_at.push(attempt);
        }
    }

    assert_eq!(fetched_at.len(), 59);
    assert_eq!(fetched_at[0], 242);
    assert_eq!(*fetched_at.last().unwrap(), 300);
    Ok(())
}

#[test]
fn bounded_loop_is_exhausted() -> Result<()> {
    let dir = TempDir::new("edgeboot-exhausted").unwrap();
    let mut ctx = Context::new(bounded(&dir, 300), None);
    fs::create_dir_all(&ctx.settings.tunnel_config_dir).unwrap();
    fs::write(ctx.settings.tunnel_config_path(), "[Interface]\n").unwrap();

    let api = FakeController::new(Answer::Unreachable);
    let tunnel = FakeTunnel::new(&ctx.settings, false);
    let lookup = StaticLookup::new(&[]);

    let (state, _) = smol::block_on(invoke(&mut ctx, &api, &tunnel, &lookup))?;
    assert_eq!(state, LoopState::Exhausted);
    assert_eq!(api.negotiations(), 59);

    let store = StateStore::open(&ctx.settings.state_dir)?;
    assert_eq!(store.counter(NO_CONNECT)?, 1);
    assert!(!KeyStore::new(&store).is_committed(KeySlot::Config)?);
    Ok(())
}

#[test]
fn truncated_document_is_never_applied() -> Result<()> {
    let dir = TempDir::new("edgeboot-truncated").unwrap();
    let mut ctx = Context::new(bounded(&dir, 3), None);
    let api = FakeController::new(Answer::Truncated);
    let tunnel = FakeTunnel::new(&ctx.settings, true);
    let lookup = StaticLookup::new(&[]);

    let (state, _) = smol::block_on(invoke(&mut ctx, &api, &tunnel, &lookup))?;
    assert_eq!(state, LoopState::Exhausted);
    assert_eq!(api.negotiations(), 3);
    assert!(!ctx.settings.tunnel_config_path().exists());

    let store = StateStore::open(&ctx.settings.state_dir)?;
    assert!(!KeyStore::new(&store).is_committed(KeySlot::Config)?);
    Ok(())
}

#[test]
fn document_with_foreign_config_key_is_rejected() -> Result<()> {
    let dir = TempDir::new("edgeboot-foreign").unwrap();
    let mut ctx = Context::new(bounded(&dir, 3), None);
    let api = FakeController::new(Answer::Document);
    let tunnel = FakeTunnel::new(&ctx.settings, true);
    let lookup = StaticLookup::new(&[]);

    // Commit keys with a genuine first exchange
    smol::block_on(invoke(&mut ctx, &api, &tunnel, &lookup))?;
    let conf_path = ctx.settings.tunnel_config_path();
    let genuine = fs::read_to_string(&conf_path).unwrap();

    // Many unconnected runs do not relax the bootstrap key check
    let store = StateStore::open(&ctx.settings.state_dir)?;
    for _ in 0..6 {
        store.increment(NO_CONNECT)?;
    }
    fs::remove_file(&conf_path).unwrap();
    api.set_answer(Answer::WrongKey);

    let mut ctx = Context::new(ctx.settings.clone(), None);
    let (state, _) = smol::block_on(invoke(&mut ctx, &api, &tunnel, &lookup))?;
    assert_eq!(state, LoopState::Exhausted);
    assert!(!conf_path.exists());
    assert!(store.counter(NO_CONNECT)? >= 5);

    // Restoring the genuine answer lets the node back in
    api.set_answer(Answer::Document);
    let (state, _) = smol::block_on(invoke(&mut ctx, &api, &tunnel, &lookup))?;
    assert_eq!(state, LoopState::Connected);
    assert_eq!(fs::read_to_string(&conf_path).unwrap(), genuine);
    Ok(())
}

#[test]
fn controller_precedence() -> Result<()> {
    let dir = TempDir::new("edgeboot-precedence").unwrap();
    let settings = common::settings(dir.path());
    let store = StateStore::open(&settings.state_dir)?;
    let identity = common::identity();
    let lookup = StaticLookup::new(&[
        (DERIVED, "node-17.pool.edge.dark.fi"),
        ("node-17.pool.edge.dark.fi", "lb.edge.dark.fi"),
    ]);

    // Derived name, chased to the last alias
    let ctx = Context::new(settings.clone(), None);
    let controller = smol::block_on(resolve_controller(&ctx, &store, &identity, &lookup))?;
    assert_eq!(controller, "node-17.pool.edge.dark.fi");
    assert!(store.get(CONTROLLER)?.is_none());

    // Remembered beats derived
    store.set(CONTROLLER, "remembered.example.net")?;
    let controller = smol::block_on(resolve_controller(&ctx, &store, &identity, &lookup))?;
    assert_eq!(controller, "remembered.example.net");

    // Explicit beats remembered, and is remembered itself
    let ctx = Context::new(settings, Some("explicit.example.net".to_string()));
    let controller = smol::block_on(resolve_controller(&ctx, &store, &identity, &lookup))?;
    assert_eq!(controller, "explicit.example.net");
    assert_eq!(store.get(CONTROLLER)?.as_deref(), Some("explicit.example.net"));
    Ok(())
}

#[test]
fn document_can_move_the_controller() -> Result<()> {
    let dir = TempDir::new("edgeboot-redirect").unwrap();
    let mut ctx = Context::new(bounded(&dir, 3), None);
    let api = FakeController::new(Answer::Redirect("ctl-b.example.net".to_string()));
    let tunnel = FakeTunnel::new(&ctx.settings, true);
    let lookup = StaticLookup::new(&[]);

    let (state, controller) = smol::block_on(invoke(&mut ctx, &api, &tunnel, &lookup))?;
    assert_eq!(state, LoopState::Connected);
    assert_eq!(controller, "ctl-b.example.net");

    let store = StateStore::open(&ctx.settings.state_dir)?;
    assert_eq!(store.get(CONTROLLER)?.as_deref(), Some("ctl-b.example.net"));
    Ok(())
}

#[test]
fn failed_controller_update_leaves_no_config() -> Result<()> {
    let dir = TempDir::new("edgeboot-partial").unwrap();
    let ctx = Context::new(bounded(&dir, 3), None);
    let store = StateStore::open(&ctx.settings.state_dir)?;
    let identity = common::identity();
    let api = FakeController::new(Answer::Redirect("ctl-b.example.net".to_string()));
    let tunnel = FakeTunnel::new(&ctx.settings, true);

    let keys = NodeKeys::load(&store)?;
    let mut bootstrap =
        Bootstrap::new(&ctx, &store, &identity, &api, &tunnel, keys, DERIVED.to_string());

    // Remembering the new controller fails once the store is gone
    fs::remove_dir_all(&ctx.settings.state_dir).unwrap();
    assert_eq!(smol::block_on(bootstrap.iterate()), LoopState::Negotiating);
    assert!(!ctx.settings.tunnel_config_path().exists());
    assert_eq!(bootstrap.controller(), DERIVED);

    // With the store back the next iteration fetches again and applies
    StateStore::open(&ctx.settings.state_dir)?;
    assert_eq!(smol::block_on(bootstrap.iterate()), LoopState::Connected);
    assert_eq!(api.negotiations(), 2);
    assert_eq!(bootstrap.controller(), "ctl-b.example.net");
    Ok(())
}
