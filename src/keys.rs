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

//! Two-phase key material.
//!
//! A key is first written to a tentative slot (`<slot>.new`). Only after
//! it has been accepted by the controller is it promoted to the committed
//! slot by an atomic rename. A key is generated at most once: a crash at
//! any point leaves either no key, a tentative key that is reused on the
//! next run, or a committed key that never changes again.

use std::{fmt, fs};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, info, warn};
use rand::{rngs::OsRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{store::StateStore, util::file::save_file_atomic, Error, Result};

const KEY_MODE: u32 = 0o600;
const KEY_LEN: usize = 32;

/// Storage slots for long-lived key material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySlot {
    /// Pre-shared key authenticating bootstrap documents
    Config,
    /// Pre-shared key authenticating recovery documents
    Recovery,
    /// Private key of the management tunnel
    TunnelPrivate,
}

impl KeySlot {
    pub const ALL: [KeySlot; 3] = [KeySlot::Config, KeySlot::Recovery, KeySlot::TunnelPrivate];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Config => "config-key",
            Self::Recovery => "recovery-key",
            Self::TunnelPrivate => "wg-private",
        }
    }

    fn tentative_name(&self) -> String {
        format!("{}.new", self.name())
    }

    /// Produce fresh key material for this slot.
    fn generate(&self) -> Key {
        match self {
            Self::Config | Self::Recovery => {
                let mut psk = [0u8; KEY_LEN];
                OsRng.fill_bytes(&mut psk);
                Key(BASE64.encode(psk))
            }
            Self::TunnelPrivate => {
                let secret = StaticSecret::random_from_rng(OsRng);
                Key(BASE64.encode(secret.to_bytes()))
            }
        }
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Base64 encoded 32-byte key, in the format `wg` uses.
#[derive(Clone, PartialEq, Eq)]
pub struct Key(String);

impl Key {
    /// Parse and check stored key text.
    pub fn parse(slot: KeySlot, text: &str) -> Result<Self> {
        let text = text.trim();
        match BASE64.decode(text) {
            Ok(bytes) if bytes.len() == KEY_LEN => Ok(Self(text.to_string())),
            _ => Err(Error::InvalidKey(slot.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn bytes(&self) -> [u8; KEY_LEN] {
        let mut out = [0u8; KEY_LEN];
        // Length was checked in `parse`/`generate`
        if let Ok(bytes) = BASE64.decode(&self.0) {
            out.copy_from_slice(&bytes[..KEY_LEN]);
        }
        out
    }

    /// X25519 public key matching this private key, as `wg pubkey`
    /// would print it.
    pub fn public_key(&self) -> String {
        let secret = StaticSecret::from(self.bytes());
        BASE64.encode(PublicKey::from(&secret).as_bytes())
    }
}

// Keys never end up in logs by accident
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(..)")
    }
}

/// Key material kept inside the state store directory.
pub struct KeyStore<'a> {
    store: &'a StateStore,
}

impl<'a> KeyStore<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    /// Return the key for `slot`, generating a tentative one if the slot
    /// has never been populated. The committed key wins over a tentative
    /// one when both exist.
    pub fn load_or_generate(&self, slot: KeySlot) -> Result<Key> {
        let committed = self.store.path(slot.name())?;
        let tentative = self.store.path(&slot.tentative_name())?;

        if !committed.exists() && !tentative.exists() {
            let key = slot.generate();
            save_file_atomic(&tentative, key.as_str().as_bytes(), KEY_MODE)?;
            info!(target: "edgeboot::keys", "Generated new tentative {}", slot);
        }

        let source = if committed.exists() { committed } else { tentative };
        let text = fs::read_to_string(&source)?;
        Key::parse(slot, &text)
    }

    /// The committed key of `slot`, if any.
    pub fn committed(&self, slot: KeySlot) -> Result<Option<Key>> {
        match self.store.get(slot.name())? {
            Some(text) => Ok(Some(Key::parse(slot, &text)?)),
            None => Ok(None),
        }
    }

    pub fn is_committed(&self, slot: KeySlot) -> Result<bool> {
        self.store.exists(slot.name())
    }

    /// Commit the tentative key of `slot`. Committed keys are immutable,
    /// so a leftover tentative key next to a committed one is discarded.
    pub fn promote(&self, slot: KeySlot) -> Result<()> {
        let committed = self.store.path(slot.name())?;
        let tentative = self.store.path(&slot.tentative_name())?;

        if !tentative.exists() {
            return Ok(())
        }

        if committed.exists() {
            warn!(target: "edgeboot::keys", "Discarding stray tentative {}", slot);
            fs::remove_file(&tentative)?;
            return Ok(())
        }

        fs::rename(&tentative, &committed)?;
        if let Some(dir) = committed.parent() {
            if let Ok(dir) = fs::File::open(dir) {
                let _ = dir.sync_all();
            }
        }

        debug!(target: "edgeboot::keys", "Committed {}", slot);
        Ok(())
    }

    pub fn promote_all(&self) -> Result<()> {
        for slot in KeySlot::ALL {
            self.promote(slot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempdir::TempDir;

    #[test]
    fn tentative_key_survives_restart() {
        let dir = TempDir::new("edgeboot-keys").unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let first = KeyStore::new(&store).load_or_generate(KeySlot::Config).unwrap();
        // Simulated crash before promotion: a fresh key store over the
        // same directory must hand back the same key.
        let store = StateStore::open(dir.path()).unwrap();
        let keys = KeyStore::new(&store);
        assert_eq!(keys.load_or_generate(KeySlot::Config).unwrap(), first);
        assert!(!keys.is_committed(KeySlot::Config).unwrap());
        assert!(keys.committed(KeySlot::Config).unwrap().is_none());

        let mode = fs::metadata(dir.path().join("config-key.new")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn promotion_is_final() {
        let dir = TempDir::new("edgeboot-keys").unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let keys = KeyStore::new(&store);

        let key = keys.load_or_generate(KeySlot::Recovery).unwrap();
        keys.promote(KeySlot::Recovery).unwrap();
        assert!(!dir.path().join("recovery-key.new").exists());
        assert_eq!(keys.committed(KeySlot::Recovery).unwrap(), Some(key.clone()));

        // Promoting again is a no-op and loading never regenerates
        keys.promote(KeySlot::Recovery).unwrap();
        assert_eq!(keys.load_or_generate(KeySlot::Recovery).unwrap(), key);

        let mode = fs::metadata(dir.path().join("recovery-key")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn stray_tentative_key_does_not_replace_committed() {
        let dir = TempDir::new("edgeboot-keys").unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let keys = KeyStore::new(&store);

        let key = keys.load_or_generate(KeySlot::Config).unwrap();
        keys.promote(KeySlot::Config).unwrap();

        let other = KeySlot::Config.generate();
        fs::write(dir.path().join("config-key.new"), other.as_str()).unwrap();

        assert_eq!(keys.load_or_generate(KeySlot::Config).unwrap(), key);
        keys.promote(KeySlot::Config).unwrap();
        assert_eq!(keys.committed(KeySlot::Config).unwrap(), Some(key));
        assert!(!dir.path().join("config-key.new").exists());
    }

    #[test]
    fn tunnel_public_key_is_derived() {
        // RFC 7748 section 6.1 test vector (Alice)
        let private = BASE64.encode([
            0x77, 0x07, 0x6d, 0x0a, 0x73, 0x18, 0xa5, 0x7d, 0x3c, 0x16, 0xc1, 0x72, 0x51, 0xb2,
            0x66, 0x45, 0xdf, 0x4c, 0x2f, 0x87, 0xeb, 0xc0, 0x99, 0x2a, 0xb1, 0x77, 0xfb, 0xa5,
            0x1d, 0xb9, 0x2c, 0x2a,
        ]);
        let public = BASE64.encode([
            0x85, 0x20, 0xf0, 0x09, 0x89, 0x30, 0xa7, 0x54, 0x74, 0x8b, 0x7d, 0xdc, 0xb4, 0x3e,
            0xf7, 0x5a, 0x0d, 0xbf, 0x3a, 0x0d, 0x26, 0x38, 0x1a, 0xf4, 0xeb, 0xa4, 0xa9, 0x8e,
            0xaa, 0x9b, 0x4e, 0x6a,
        ]);

        let key = Key::parse(KeySlot::TunnelPrivate, &private).unwrap();
        assert_eq!(key.public_key(), public);
    }

    #[test]
    fn garbage_is_not_a_key() {
        assert!(Key::parse(KeySlot::Config, "not base64!").is_err());
        assert!(Key::parse(KeySlot::Config, &BASE64.encode([1u8; 16])).is_err());
    }
}
