use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strata_types::EntityId;

use crate::error::LogResult;
use crate::message::SealedPayload;

/// Roles allowed to read and to write an entity.
///
/// An empty role set places no restriction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub read_roles: BTreeSet<String>,
    pub write_roles: BTreeSet<String>,
}

impl Permissions {
    /// Permissions that let anyone read and write.
    pub fn public() -> Self {
        Self::default()
    }

    pub fn new<R, W>(read_roles: R, write_roles: W) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        W: IntoIterator,
        W::Item: Into<String>,
    {
        Self {
            read_roles: read_roles.into_iter().map(Into::into).collect(),
            write_roles: write_roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn can_read(&self, keys: &BTreeSet<String>) -> bool {
        allows(&self.read_roles, keys)
    }

    pub fn can_write(&self, keys: &BTreeSet<String>) -> bool {
        allows(&self.write_roles, keys)
    }
}

fn allows(roles: &BTreeSet<String>, keys: &BTreeSet<String>) -> bool {
    roles.is_empty() || !roles.is_disjoint(keys)
}

/// Encrypts payloads for a set of readers and derives entity permissions.
///
/// The repository never sees key material, only role names: a session holds
/// a set of keys and may open any payload sealed for one of them.
pub trait PayloadSealer: Send + Sync {
    /// Seal `plaintext` so only holders of one of `readers` can open it.
    fn seal(&self, plaintext: &[u8], readers: &BTreeSet<String>) -> LogResult<SealedPayload>;

    /// Open a payload with the session's keys. Returns `None` if none of
    /// the keys is a reader.
    fn open(&self, sealed: &SealedPayload, keys: &BTreeSet<String>) -> Option<Bytes>;

    /// Effective permissions for an entity, given its chain of ancestors
    /// from the entity itself up to its root.
    fn derive_permissions(&self, chain: &[EntityId]) -> Permissions;
}

/// Sealer that stores payloads unencrypted but still enforces reader sets.
///
/// Permissions come from explicit grants: the nearest granted ancestor in an
/// entity's chain wins, falling back to the default.
#[derive(Debug, Default)]
pub struct PlaintextSealer {
    default: Permissions,
    grants: RwLock<HashMap<EntityId, Permissions>>,
}

impl PlaintextSealer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `permissions` for every entity without an explicit grant.
    pub fn with_default(permissions: Permissions) -> Self {
        Self {
            default: permissions,
            grants: RwLock::new(HashMap::new()),
        }
    }

    /// Set the permissions of an entity and everything beneath it.
    pub fn grant(&self, id: EntityId, permissions: Permissions) {
        self.grants
            .write()
            .expect("lock poisoned")
            .insert(id, permissions);
    }
}

impl PayloadSealer for PlaintextSealer {
    fn seal(&self, plaintext: &[u8], readers: &BTreeSet<String>) -> LogResult<SealedPayload> {
        Ok(SealedPayload {
            readers: readers.clone(),
            data: Bytes::copy_from_slice(plaintext),
        })
    }

    fn open(&self, sealed: &SealedPayload, keys: &BTreeSet<String>) -> Option<Bytes> {
        allows(&sealed.readers, keys).then(|| sealed.data.clone())
    }

    fn derive_permissions(&self, chain: &[EntityId]) -> Permissions {
        let grants = self.grants.read().expect("lock poisoned");
        chain
            .iter()
            .find_map(|id| grants.get(id))
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}
