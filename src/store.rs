//! Key stores: where recipient secrets and sender public keys come from.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KeyError, StoreError};
use crate::jwk::Jwk;
use crate::key::{EnvelopeKey, LocalKey};

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Key lookup consumed by [`unpack`](crate::packer::unpack).
///
/// Implement this for your infrastructure:
/// - InMemoryKeyStore (testing, embedding)
/// - FileKeyStore (CLI, development)
/// - Your wallet (production)
#[async_trait]
pub trait KeyStore: Send + Sync {
    type Key: EnvelopeKey;

    /// The subset of `kids` this agent holds private keys for.
    async fn fetch_local_keys(&self, kids: &[String]) -> Result<Vec<(String, Self::Key)>, StoreError>;

    /// Public key for a (usually remote) `kid`.
    async fn fetch_public_key(&self, kid: &str) -> Result<Option<Self::Key>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Keys {
    local: HashMap<String, LocalKey>,
    public: HashMap<String, LocalKey>,
}

impl Keys {
    fn local_matches(&self, kids: &[String]) -> Vec<(String, LocalKey)> {
        kids.iter()
            .filter_map(|kid| self.local.get(kid).map(|k| (kid.clone(), k.clone())))
            .collect()
    }

    fn public_key(&self, kid: &str) -> Result<Option<LocalKey>, StoreError> {
        if let Some(key) = self.public.get(kid) {
            return Ok(Some(key.clone()));
        }
        self.local
            .get(kid)
            .map(|k| {
                k.to_public().map_err(|source| StoreError::InvalidKey {
                    kid: kid.to_string(),
                    source,
                })
            })
            .transpose()
    }
}

/// In-memory key store.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<Keys>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a private key this agent can decrypt with.
    pub fn insert_local(&self, kid: impl Into<String>, key: LocalKey) -> Result<(), StoreError> {
        let kid = kid.into();
        if !key.has_secret() {
            return Err(StoreError::InvalidKey {
                kid,
                source: KeyError::InvalidKey,
            });
        }
        let mut keys = self.keys.write().map_err(|_| StoreError::Poisoned)?;
        keys.local.insert(kid, key);
        Ok(())
    }

    /// Register a peer's public key.
    pub fn insert_public(&self, kid: impl Into<String>, key: LocalKey) -> Result<(), StoreError> {
        let kid = kid.into();
        let key = key.to_public().map_err(|source| StoreError::InvalidKey {
            kid: kid.clone(),
            source,
        })?;
        let mut keys = self.keys.write().map_err(|_| StoreError::Poisoned)?;
        keys.public.insert(kid, key);
        Ok(())
    }

    pub fn remove(&self, kid: &str) -> Result<bool, StoreError> {
        let mut keys = self.keys.write().map_err(|_| StoreError::Poisoned)?;
        let local = keys.local.remove(kid).is_some();
        let public = keys.public.remove(kid).is_some();
        Ok(local || public)
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    type Key = LocalKey;

    async fn fetch_local_keys(&self, kids: &[String]) -> Result<Vec<(String, LocalKey)>, StoreError> {
        let keys = self.keys.read().map_err(|_| StoreError::Poisoned)?;
        Ok(keys.local_matches(kids))
    }

    async fn fetch_public_key(&self, kid: &str) -> Result<Option<LocalKey>, StoreError> {
        let keys = self.keys.read().map_err(|_| StoreError::Poisoned)?;
        keys.public_key(kid)
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// On-disk keyring: private JWKs (with `d`) and peer public JWKs.
///
/// ```text
/// { "local":  { "<kid>": { "kty", "crv", "x", "y"?, "d" } },
///   "public": { "<kid>": { "kty", "crv", "x", "y"? } } }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Keyring {
    #[serde(default)]
    pub local: BTreeMap<String, Jwk>,
    #[serde(default)]
    pub public: BTreeMap<String, Jwk>,
}

/// Keyring file, loaded once and written back atomically on change.
pub struct FileKeyStore {
    path: PathBuf,
    keys: RwLock<Keys>,
    ring: RwLock<Keyring>,
}

impl FileKeyStore {
    /// Open `path`, or start an empty keyring if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let ring = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Keyring::default()
        };
        let keys = load_keys(&ring)?;
        debug!(
            path = %path.display(),
            local = keys.local.len(),
            public = keys.public.len(),
            "keyring opened"
        );
        Ok(Self {
            path,
            keys: RwLock::new(keys),
            ring: RwLock::new(ring),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert_local(&self, kid: &str, key: &LocalKey) -> Result<(), StoreError> {
        let jwk = key.to_jwk_secret().map_err(|source| StoreError::InvalidKey {
            kid: kid.to_string(),
            source,
        })?;
        self.update(kid, |ring| {
            ring.local.insert(kid.to_string(), jwk);
        })?;
        let mut keys = self.keys.write().map_err(|_| StoreError::Poisoned)?;
        keys.local.insert(kid.to_string(), key.clone());
        Ok(())
    }

    pub fn insert_public(&self, kid: &str, key: &LocalKey) -> Result<(), StoreError> {
        let invalid = |source| StoreError::InvalidKey {
            kid: kid.to_string(),
            source,
        };
        let jwk = key.to_jwk_public().map_err(invalid)?;
        let key = key.to_public().map_err(invalid)?;
        self.update(kid, |ring| {
            ring.public.insert(kid.to_string(), jwk);
        })?;
        let mut keys = self.keys.write().map_err(|_| StoreError::Poisoned)?;
        keys.public.insert(kid.to_string(), key);
        Ok(())
    }

    /// Public JWK for `kid`, from either section.
    pub fn export_public(&self, kid: &str) -> Result<Jwk, StoreError> {
        let ring = self.ring.read().map_err(|_| StoreError::Poisoned)?;
        ring.local
            .get(kid)
            .or_else(|| ring.public.get(kid))
            .map(Jwk::to_public)
            .ok_or_else(|| StoreError::KeyNotFound(kid.to_string()))
    }

    /// All kids, local first.
    pub fn kids(&self) -> Result<Vec<(String, bool)>, StoreError> {
        let ring = self.ring.read().map_err(|_| StoreError::Poisoned)?;
        Ok(ring
            .local
            .keys()
            .map(|k| (k.clone(), true))
            .chain(ring.public.keys().map(|k| (k.clone(), false)))
            .collect())
    }

    /// Add a new kid via `insert`, then persist the whole keyring.
    ///
    /// The in-memory keyring only changes once the file is in place.
    fn update(&self, kid: &str, insert: impl FnOnce(&mut Keyring)) -> Result<(), StoreError> {
        let mut ring = self.ring.write().map_err(|_| StoreError::Poisoned)?;
        if ring.local.contains_key(kid) || ring.public.contains_key(kid) {
            return Err(StoreError::DuplicateKey(kid.to_string()));
        }
        let mut next = ring.clone();
        insert(&mut next);
        let json = serde_json::to_string_pretty(&next)?;
        // Atomic write: write to temp, then rename
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        *ring = next;
        Ok(())
    }
}

fn load_keys(ring: &Keyring) -> Result<Keys, StoreError> {
    let parse = |kid: &String, jwk: &Jwk| {
        LocalKey::from_jwk(jwk)
            .map(|key| (kid.clone(), key))
            .map_err(|source| StoreError::InvalidKey {
                kid: kid.clone(),
                source,
            })
    };
    let local = ring
        .local
        .iter()
        .map(|(kid, jwk)| parse(kid, jwk))
        .collect::<Result<HashMap<_, _>, _>>()?;
    if let Some((kid, _)) = local.iter().find(|(_, key)| !key.has_secret()) {
        return Err(StoreError::InvalidKey {
            kid: kid.clone(),
            source: KeyError::InvalidKey,
        });
    }
    let public = ring
        .public
        .iter()
        .map(|(kid, jwk)| parse(kid, &jwk.to_public()))
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(Keys { local, public })
}

#[async_trait]
impl KeyStore for FileKeyStore {
    type Key = LocalKey;

    async fn fetch_local_keys(&self, kids: &[String]) -> Result<Vec<(String, LocalKey)>, StoreError> {
        let keys = self.keys.read().map_err(|_| StoreError::Poisoned)?;
        Ok(keys.local_matches(kids))
    }

    async fn fetch_public_key(&self, kid: &str) -> Result<Option<LocalKey>, StoreError> {
        let keys = self.keys.read().map_err(|_| StoreError::Poisoned)?;
        keys.public_key(kid)
    }
}
