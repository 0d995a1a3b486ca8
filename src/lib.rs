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

//! Self-bootstrapping provisioning agent for headless edge nodes.
//!
//! The agent installs itself as a boot service, applies keyed recovery
//! documents, negotiates tunnel configuration with a controller and
//! keeps retrying until the management tunnel answers. Every persisted
//! step is atomic, so the process can be killed and restarted at any
//! point.

pub mod error;
pub use error::{Error, Result};

/// Async helpers
pub mod system;

/// Filesystem utilities
pub mod util;

/// Outbound HTTP(S)
pub mod net;

/// Run configuration and context
pub mod settings;

/// Persistent key-value state
pub mod store;

/// Node identity
pub mod identity;

/// Two-phase key material
pub mod keys;

/// CNAME chasing
pub mod dns;

/// Downloaded document formats
pub mod document;

/// Controller wire protocol
pub mod controller;

/// Management tunnel control
pub mod tunnel;

/// Recovery channel
pub mod recovery;

/// Negotiation state machine
pub mod bootstrap;

/// OS detection and boot services
pub mod platform;

/// Self-installation guard
pub mod install;
