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

//! Recovery channel.
//!
//! Every run starts by asking the per-node recovery endpoint for a
//! remediation document. Documents have to be complete and, once a
//! recovery key has been committed, have to carry it. After enough
//! consecutive runs without reaching the controller, an unkeyed document
//! is applied anyway.

use std::fs;

use log::{debug, info, warn};

use crate::{
    controller::ControllerApi,
    document::{self, RecoveryAction, RecoveryDocument},
    identity::NodeIdentity,
    keys::{KeySlot, KeyStore},
    settings::Context,
    store::{StateStore, CONTROLLER, INVOCATIONS, NO_CONNECT},
    util::file::{ensure_dir, save_file_atomic},
    Error, Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing could be downloaded
    Unavailable,
    /// The document was cut short
    Incomplete,
    /// The document lacked the recovery key
    Rejected,
    /// The document was applied
    Applied { actions: usize, verified: bool },
}

/// Fetch, check and apply the recovery document for this node.
///
/// Download problems are not errors. A document that passed the checks
/// but fails to parse or apply is returned as `Err`.
pub async fn run(
    ctx: &mut Context,
    store: &StateStore,
    identity: &NodeIdentity,
    api: &(dyn ControllerApi + Send + Sync),
) -> Result<RecoveryOutcome> {
    let host = identity.recovery_host(&ctx.settings.base_domain);

    let body = match api.fetch_recovery(&host).await {
        Ok(Some(body)) => body,
        Ok(None) => {
            debug!(target: "edgeboot::recovery", "No recovery document at {}", host);
            return Ok(RecoveryOutcome::Unavailable)
        }
        Err(e) => {
            info!(target: "edgeboot::recovery", "Recovery endpoint {} unreachable: {}", host, e);
            return Ok(RecoveryOutcome::Unavailable)
        }
    };

    // An unreadable recovery key is handled like a document lacking it
    let checked = match KeyStore::new(store).committed(KeySlot::Recovery) {
        Ok(key) => document::check(&body, key.as_ref()),
        Err(e) => {
            warn!(target: "edgeboot::recovery", "Committed recovery key is unreadable: {}", e);
            document::check(&body, None).and(Err(Error::KeyMismatch))
        }
    };

    let verified = match checked {
        Ok(()) => true,
        Err(Error::MissingTerminator) => {
            info!(target: "edgeboot::recovery", "Recovery document incomplete, skipping");
            return Ok(RecoveryOutcome::Incomplete)
        }
        Err(Error::KeyMismatch) => {
            let no_connect = store.counter(NO_CONNECT)?;
            if no_connect < ctx.settings.recovery_threshold {
                warn!(
                    target: "edgeboot::recovery",
                    "Recovery document lacks the recovery key, rejecting ({} unconnected runs)",
                    no_connect,
                );
                return Ok(RecoveryOutcome::Rejected)
            }

            warn!(
                target: "edgeboot::recovery",
                "Recovery document lacks the recovery key, applying anyway after {} unconnected runs",
                no_connect,
            );
            false
        }
        Err(e) => return Err(e),
    };

    let doc = RecoveryDocument::parse(&body)?;
    for action in &doc.actions {
        apply(ctx, store, action)?;
    }

    info!(target: "edgeboot::recovery", "Applied {} recovery action(s)", doc.actions.len());
    Ok(RecoveryOutcome::Applied { actions: doc.actions.len(), verified })
}

fn apply(ctx: &mut Context, store: &StateStore, action: &RecoveryAction) -> Result<()> {
    info!(target: "edgeboot::recovery", "Recovery action: {:?}", action);

    match action {
        RecoveryAction::SetController { address } => {
            store.set(CONTROLLER, address)?;
            ctx.controller_override = Some(address.clone());
        }

        RecoveryAction::ForgetController => store.remove(CONTROLLER)?,

        RecoveryAction::RemoveTunnelConfig => {
            let path = ctx.settings.tunnel_config_path();
            if path.exists() {
                fs::remove_file(path)?;
            }
        }

        RecoveryAction::ResetCounter { name } => {
            if name != INVOCATIONS && name != NO_CONNECT {
                return Err(Error::InvalidDocument(format!("unknown counter {}", name)))
            }
            store.reset(name)?;
        }

        RecoveryAction::InstallCaCertificate { pem } => {
            let path = &ctx.settings.ca_cert;
            if let Some(dir) = path.parent().filter(|d| !d.exists()) {
                ensure_dir(dir, 0o755)?;
            }
            save_file_atomic(path, pem.as_bytes(), 0o644)?;
        }

        RecoveryAction::RefetchConfig => ctx.force_refetch = true,
    }

    Ok(())
}
