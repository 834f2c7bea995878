//! Decryption keys and the session key store.
//!
//! Keys arrive from JSON Web Key Sets and are filed under their key id. A key
//! id can be held by several sessions at once; lookups return the most
//! recently inserted key regardless of which session inserted it.
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of an AES-128 content key in bytes.
pub const DECRYPTION_KEY_SIZE: usize = 16;

/// A raw AES-128 content key.
///
/// Key bytes are zeroized on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DecryptionKey {
    secret: [u8; DECRYPTION_KEY_SIZE],
}

impl DecryptionKey {
    /// Create a key, rejecting anything that is not exactly 16 bytes.
    pub fn new(secret: &[u8]) -> Result<Self> {
        let secret: [u8; DECRYPTION_KEY_SIZE] =
            secret.try_into().map_err(|_| Error::InvalidKeyLength {
                expected: DECRYPTION_KEY_SIZE,
                actual: secret.len(),
            })?;
        Ok(Self { secret })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DECRYPTION_KEY_SIZE] {
        &self.secret
    }
}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecryptionKey(..)")
    }
}

/// Keys held for one key id, most recent first, at most one per session.
#[derive(Debug, Default)]
struct SessionKeyList {
    entries: VecDeque<(String, Arc<DecryptionKey>)>,
}

impl SessionKeyList {
    fn insert(&mut self, session_id: &str, key: Arc<DecryptionKey>) {
        self.remove(session_id);
        self.entries.push_front((session_id.to_string(), key));
    }

    fn remove(&mut self, session_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(owner, _)| owner != session_id);
        self.entries.len() != before
    }

    fn contains(&self, session_id: &str) -> bool {
        self.entries.iter().any(|(owner, _)| owner == session_id)
    }

    fn latest(&self) -> Option<&Arc<DecryptionKey>> {
        self.entries.front().map(|(_, key)| key)
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Two-level key map: key id -> per-session key list.
///
/// All access goes through an internal mutex so the store can be shared
/// between the session controller and a decrypting thread.
#[derive(Debug, Default)]
pub struct SessionKeyStore {
    keys: Mutex<HashMap<Vec<u8>, SessionKeyList>>,
}

impl SessionKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `session_id`'s key for `key_id` and make it the
    /// latest key for that key id.
    pub fn insert(&self, session_id: &str, key_id: &[u8], key: DecryptionKey) {
        self.lock()
            .entry(key_id.to_vec())
            .or_default()
            .insert(session_id, Arc::new(key));
    }

    /// Remove every key owned by `session_id`.
    ///
    /// Returns the key ids that lost a key. Key ids left with no keys are
    /// dropped from the store.
    pub fn remove_session(&self, session_id: &str) -> Vec<Vec<u8>> {
        let mut keys = self.lock();
        let mut removed = Vec::new();
        keys.retain(|key_id, list| {
            if list.remove(session_id) {
                removed.push(key_id.clone());
            }
            !list.is_empty()
        });
        removed
    }

    /// Latest key inserted for `key_id`, from any session.
    pub fn lookup(&self, key_id: &[u8]) -> Option<Arc<DecryptionKey>> {
        self.lock().get(key_id).and_then(|list| list.latest().cloned())
    }

    /// True when no session holds a key for `key_id`.
    pub fn is_empty(&self, key_id: &[u8]) -> bool {
        self.lock().get(key_id).map_or(true, SessionKeyList::is_empty)
    }

    /// Key ids for which `session_id` currently holds a key, sorted.
    pub fn key_ids_for_session(&self, session_id: &str) -> Vec<Vec<u8>> {
        let mut ids: Vec<Vec<u8>> = self
            .lock()
            .iter()
            .filter(|(_, list)| list.contains(session_id))
            .map(|(key_id, _)| key_id.clone())
            .collect();
        ids.sort();
        ids
    }

    // Every mutation completes under the lock, so a poisoned map is still
    // consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<Vec<u8>, SessionKeyList>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
