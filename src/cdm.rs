//! Core ClearKey CDM implementation.
//!
//! This module handles session lifecycle, JSON Web Key Set ingestion, key
//! status events, and sample decryption. [`ClearKeyCdm`] implements both
//! capability traits: [`SessionManager`] on the owning thread and
//! [`Decryptor`] for the media pipeline. [`ClearKeyDecryptor`] is a cloneable
//! handle onto the same key store for decrypting from another thread.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::buffer::{DecoderBuffer, DecryptConfig, EncryptedBuffer};
use crate::cipher::AesCtrCipher;
use crate::config::CdmConfig;
use crate::error::{CdmException, ExceptionKind, Result};
use crate::init_data::{self, InitDataType};
use crate::jwk;
use crate::key::{DecryptionKey, SessionKeyStore};
use crate::promise::{CdmPromise, PromiseAdapter, PromiseId, PromiseValue};
use crate::session::{Session, SessionState, SessionType};
use crate::subsample;

/// Media stream a decrypt request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Audio,
    Video,
}

/// Outcome class of a decrypt request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptStatus {
    Success,
    /// No key for the buffer's key id yet; retry after a new key arrives.
    NoKey,
    /// Never produced by this decryptor.
    NeedMoreData,
    Error,
}

/// Result of [`Decryptor::decrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptResult {
    Success(DecoderBuffer),
    NoKey,
    NeedMoreData,
    Error,
}

impl DecryptResult {
    pub fn status(&self) -> DecryptStatus {
        match self {
            DecryptResult::Success(_) => DecryptStatus::Success,
            DecryptResult::NoKey => DecryptStatus::NoKey,
            DecryptResult::NeedMoreData => DecryptStatus::NeedMoreData,
            DecryptResult::Error => DecryptStatus::Error,
        }
    }

    pub fn into_buffer(self) -> Option<DecoderBuffer> {
        match self {
            DecryptResult::Success(buffer) => Some(buffer),
            _ => None,
        }
    }
}

/// Status of one key as reported in key change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Usable,
    Released,
}

/// One entry of a key change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdmKeyInformation {
    pub key_id: Vec<u8>,
    pub status: KeyStatus,
    pub system_code: u32,
}

impl CdmKeyInformation {
    fn new(key_id: Vec<u8>, status: KeyStatus) -> Self {
        Self {
            key_id,
            status,
            system_code: 0,
        }
    }
}

/// Receiver of session events, implemented by the embedding layer.
pub trait SessionEventHandler: Send {
    /// A message (license request) should be delivered to the license server.
    fn on_session_message(&self, session_id: &str, message: &[u8]);

    /// The set of keys held by a session changed.
    ///
    /// `has_additional_usable_key` is true when new keys became usable.
    fn on_session_keys_change(
        &self,
        session_id: &str,
        has_additional_usable_key: bool,
        keys_info: &[CdmKeyInformation],
    );

    /// The session was closed and its keys dropped.
    fn on_session_closed(&self, session_id: &str);

    /// A session-level error outside any promise.
    ///
    /// This CDM reports every failure through promise rejection, so the
    /// default does nothing.
    fn on_session_error(&self, _session_id: &str, _exception: &CdmException) {}
}

/// Session operations. Every operation settles its promise exactly once and
/// returns the id the promise was tracked under.
pub trait SessionManager {
    fn set_server_certificate(&mut self, certificate: &[u8], promise: CdmPromise) -> PromiseId;

    /// Create a session; the request payload is echoed as its first message.
    fn create_session(
        &mut self,
        session_type: SessionType,
        request: &[u8],
        promise: CdmPromise,
    ) -> PromiseId;

    /// Create a session whose first message is a license request for the key
    /// ids found in `init_data`.
    fn create_session_and_generate_request(
        &mut self,
        session_type: SessionType,
        init_data_type: InitDataType,
        init_data: &[u8],
        promise: CdmPromise,
    ) -> PromiseId;

    fn load_session(
        &mut self,
        session_type: SessionType,
        session_id: &str,
        promise: CdmPromise,
    ) -> PromiseId;

    /// Apply a JSON Web Key Set to a session.
    fn update_session(&mut self, session_id: &str, response: &[u8], promise: CdmPromise)
        -> PromiseId;

    /// Close a session and drop its keys.
    fn release_session(&mut self, session_id: &str, promise: CdmPromise) -> PromiseId;

    /// Drop a session's keys but keep the session open.
    fn remove_session(&mut self, session_id: &str, promise: CdmPromise) -> PromiseId;
}

/// Callback run when new keys become available.
pub type NewKeyCb = Box<dyn Fn() + Send + Sync>;

/// Sample decryption.
pub trait Decryptor {
    /// Register (or replace) the new-key callback for a stream type.
    fn register_new_key_cb(&self, stream_type: StreamType, new_key_cb: NewKeyCb);

    /// Decrypt one sample. Completes synchronously.
    fn decrypt(&self, stream_type: StreamType, encrypted: &EncryptedBuffer) -> DecryptResult;
}

#[derive(Default)]
struct DecryptorState {
    keys: SessionKeyStore,
    new_key_cbs: Mutex<HashMap<StreamType, Arc<dyn Fn() + Send + Sync>>>,
}

/// Thread-safe decrypt handle sharing a CDM's key store.
#[derive(Clone, Default)]
pub struct ClearKeyDecryptor {
    state: Arc<DecryptorState>,
}

impl ClearKeyDecryptor {
    fn keys(&self) -> &SessionKeyStore {
        &self.state.keys
    }

    fn notify_new_key(&self) {
        // Run callbacks outside the lock so they may re-register.
        let callbacks: Vec<_> = self
            .state
            .new_key_cbs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

impl Decryptor for ClearKeyDecryptor {
    fn register_new_key_cb(&self, stream_type: StreamType, new_key_cb: NewKeyCb) {
        self.state
            .new_key_cbs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stream_type, Arc::from(new_key_cb));
    }

    fn decrypt(&self, stream_type: StreamType, encrypted: &EncryptedBuffer) -> DecryptResult {
        let passthrough = || {
            DecryptResult::Success(DecoderBuffer {
                data: encrypted.data.clone(),
                timestamp: encrypted.timestamp,
                end_of_stream: encrypted.end_of_stream,
            })
        };

        if encrypted.end_of_stream {
            return passthrough();
        }
        let config = match &encrypted.decrypt_config {
            Some(config) if config.is_encrypted() => config,
            _ => return passthrough(),
        };

        let Some(key) = self.keys().lookup(&config.key_id) else {
            trace!(
                "No key for key id {} ({:?})",
                hex::encode(&config.key_id),
                stream_type
            );
            return DecryptResult::NoKey;
        };

        match decrypt_data(&key, config, &encrypted.data) {
            Ok(data) => DecryptResult::Success(DecoderBuffer {
                data,
                timestamp: encrypted.timestamp,
                end_of_stream: false,
            }),
            Err(e) => {
                warn!("Failed to decrypt {:?} buffer: {}", stream_type, e);
                DecryptResult::Error
            }
        }
    }
}

/// Decrypt `data` with `key` according to `config`.
///
/// Cipher runs are decrypted as one continuous AES-CTR stream starting at the
/// IV. Buffers with no cipher bytes are copied unchanged.
pub fn decrypt_data(key: &DecryptionKey, config: &DecryptConfig, data: &[u8]) -> Result<Vec<u8>> {
    let mut cipher = AesCtrCipher::new(key.as_bytes(), &config.iv)?;
    let cipher_len = subsample::validate(&config.subsamples, data.len())?;
    if cipher_len == 0 {
        return Ok(data.to_vec());
    }

    if config.subsamples.is_empty() {
        let mut out = data.to_vec();
        cipher.apply(&mut out);
        return Ok(out);
    }

    let mut stream = subsample::extract_cipher_regions(data, &config.subsamples)?;
    cipher.apply(&mut stream);
    subsample::scatter_cipher_regions(data, &config.subsamples, &stream)
}

/// ClearKey Content Decryption Module.
///
/// Session ids are decimal counters starting at `"1"`, unique per instance.
/// Dropping the CDM closes every open session and rejects pending promises.
pub struct ClearKeyCdm {
    config: CdmConfig,
    sessions: HashMap<String, Session>,
    next_session_number: u32,
    promises: PromiseAdapter,
    events: Box<dyn SessionEventHandler>,
    decryptor: ClearKeyDecryptor,
}

impl ClearKeyCdm {
    /// Create a CDM with the default config.
    pub fn new(events: impl SessionEventHandler + 'static) -> Self {
        Self::with_config(CdmConfig::default(), events)
    }

    pub fn with_config(config: CdmConfig, events: impl SessionEventHandler + 'static) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            next_session_number: 1,
            promises: PromiseAdapter::new(),
            events: Box::new(events),
            decryptor: ClearKeyDecryptor::default(),
        }
    }

    pub fn config(&self) -> &CdmConfig {
        &self.config
    }

    /// A decrypt handle that can be moved to the media thread.
    pub fn decryptor(&self) -> ClearKeyDecryptor {
        self.decryptor.clone()
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    /// Number of sessions tracked, open or not yet initialized.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of sessions in the `Active` state.
    pub fn open_session_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    /// Promises saved but not yet settled.
    pub fn pending_promise_count(&self) -> usize {
        self.promises.len()
    }

    /// Close every open session, dropping keys and firing `closed` for each.
    pub fn close_all_sessions(&mut self) {
        let mut open: Vec<(u32, String)> = self
            .sessions
            .values()
            .filter(|s| s.is_active())
            .map(|s| (s.number, s.id.clone()))
            .collect();
        open.sort();

        for (_, session_id) in open {
            debug!("Force-closing session {}", session_id);
            self.close_session(&session_id);
            self.events.on_session_closed(&session_id);
        }
    }

    /// Track `promise`, run `op`, then settle the promise with its outcome.
    fn settle<F>(&mut self, promise: CdmPromise, op: F) -> PromiseId
    where
        F: FnOnce(&mut Self) -> std::result::Result<PromiseValue, CdmException>,
    {
        let id = self.promises.save(promise);
        match op(self) {
            Ok(value) => {
                self.promises.resolve_with(id, value);
            }
            Err(exception) => {
                warn!("Promise {} rejected: {}", id, exception);
                self.promises.reject(
                    id,
                    exception.kind,
                    exception.system_code,
                    exception.message,
                );
            }
        }
        id
    }

    fn active_session(&self, session_id: &str) -> std::result::Result<&Session, CdmException> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| CdmException::invalid_access("Session does not exist."))?;
        match session.state {
            SessionState::Active => Ok(session),
            SessionState::Uninitialized => Err(CdmException::invalid_state(
                "Session is not initialized.",
            )),
            SessionState::Closed => Err(CdmException::invalid_state("Session is closed.")),
        }
    }

    fn open_session(
        &mut self,
        session_type: SessionType,
    ) -> std::result::Result<String, CdmException> {
        if session_type == SessionType::PersistentLicense && !self.config.allow_persistent_sessions
        {
            return Err(CdmException::not_supported(
                "Persistent sessions are disabled.",
            ));
        }
        if let Some(max) = self.config.max_sessions {
            if self.open_session_count() >= max {
                return Err(CdmException::new(
                    ExceptionKind::QuotaExceeded,
                    0,
                    format!("Too many sessions open (max {}).", max),
                ));
            }
        }

        let mut session = Session::new(self.next_session_number, session_type);
        self.next_session_number += 1;
        session.activate();

        let session_id = session.id.clone();
        debug!("Created {} session {}", session_type, session_id);
        self.sessions.insert(session_id.clone(), session);
        Ok(session_id)
    }

    fn close_session(&mut self, session_id: &str) {
        let removed = self.decryptor.keys().remove_session(session_id);
        self.sessions.remove(session_id);
        debug!(
            "Closed session {} ({} key ids released)",
            session_id,
            removed.len()
        );
    }

    fn apply_key_set(
        &mut self,
        session_id: &str,
        response: &[u8],
    ) -> std::result::Result<PromiseValue, CdmException> {
        let session_type = self.active_session(session_id)?.session_type;

        let key_set = jwk::parse_key_set(response).map_err(|e| {
            CdmException::invalid_access(format!(
                "Response is not a valid JSON Web Key Set: {}",
                e
            ))
        })?;
        if key_set.keys.is_empty() {
            return Err(CdmException::invalid_access(
                "Response does not contain any keys.",
            ));
        }
        if key_set.session_type != session_type {
            return Err(CdmException::invalid_access(format!(
                "Key set type {} does not match session type {}.",
                key_set.session_type, session_type
            )));
        }

        // Validate every key before touching the store.
        let keys = key_set
            .keys
            .into_iter()
            .map(|(key_id, secret)| DecryptionKey::new(&secret).map(|key| (key_id, key)))
            .collect::<Result<Vec<_>>>()
            .map_err(CdmException::from)?;

        let store = self.decryptor.keys();
        for (key_id, key) in keys.iter() {
            store.insert(session_id, key_id, key.clone());
        }
        debug!("Added {} key(s) to session {}", keys.len(), session_id);
        Ok(PromiseValue::Void)
    }

    fn keys_info(&self, session_id: &str, status: KeyStatus) -> Vec<CdmKeyInformation> {
        self.decryptor
            .keys()
            .key_ids_for_session(session_id)
            .into_iter()
            .map(|key_id| CdmKeyInformation::new(key_id, status))
            .collect()
    }
}

impl SessionManager for ClearKeyCdm {
    fn set_server_certificate(&mut self, _certificate: &[u8], promise: CdmPromise) -> PromiseId {
        self.settle(promise, |_| {
            Err(CdmException::not_supported(
                "Server certificates are not supported.",
            ))
        })
    }

    fn create_session(
        &mut self,
        session_type: SessionType,
        request: &[u8],
        promise: CdmPromise,
    ) -> PromiseId {
        let mut created = None;
        let id = self.settle(promise, |cdm| {
            let session_id = cdm.open_session(session_type)?;
            created = Some(session_id.clone());
            Ok(PromiseValue::SessionId(session_id))
        });

        if let Some(session_id) = created {
            self.events.on_session_message(&session_id, request);
        }
        id
    }

    fn create_session_and_generate_request(
        &mut self,
        session_type: SessionType,
        init_data_type: InitDataType,
        init_data: &[u8],
        promise: CdmPromise,
    ) -> PromiseId {
        let mut created = None;
        let id = self.settle(promise, |cdm| {
            let key_ids = init_data::extract_key_ids(init_data_type, init_data, &cdm.config)
                .map_err(CdmException::from)?;
            let session_id = cdm.open_session(session_type)?;
            created = Some((session_id.clone(), key_ids));
            Ok(PromiseValue::SessionId(session_id))
        });

        if let Some((session_id, key_ids)) = created {
            let request = jwk::create_license_request(&key_ids, session_type);
            self.events.on_session_message(&session_id, &request);
        }
        id
    }

    fn load_session(
        &mut self,
        _session_type: SessionType,
        _session_id: &str,
        promise: CdmPromise,
    ) -> PromiseId {
        self.settle(promise, |_| {
            Err(CdmException::not_supported(
                "Loading persistent sessions is not supported.",
            ))
        })
    }

    fn update_session(
        &mut self,
        session_id: &str,
        response: &[u8],
        promise: CdmPromise,
    ) -> PromiseId {
        let mut applied = false;
        let id = self.settle(promise, |cdm| {
            let value = cdm.apply_key_set(session_id, response)?;
            // Subscribers hear about the new keys before the promise settles.
            cdm.decryptor.notify_new_key();
            applied = true;
            Ok(value)
        });

        if applied {
            let keys_info = self.keys_info(session_id, KeyStatus::Usable);
            self.events
                .on_session_keys_change(session_id, true, &keys_info);
        }
        id
    }

    fn release_session(&mut self, session_id: &str, promise: CdmPromise) -> PromiseId {
        let mut closed = false;
        let id = self.settle(promise, |cdm| {
            if !cdm.sessions.get(session_id).is_some_and(Session::is_active) {
                return Err(CdmException::invalid_access(
                    "Session does not exist or is already closed.",
                ));
            }
            cdm.close_session(session_id);
            closed = true;
            Ok(PromiseValue::Void)
        });

        if closed {
            self.events.on_session_closed(session_id);
        }
        id
    }

    fn remove_session(&mut self, session_id: &str, promise: CdmPromise) -> PromiseId {
        let mut released = None;
        let id = self.settle(promise, |cdm| {
            cdm.active_session(session_id)?;
            let removed = cdm.decryptor.keys().remove_session(session_id);
            released = Some(removed);
            Ok(PromiseValue::Void)
        });

        if let Some(removed) = released {
            let keys_info: Vec<_> = removed
                .into_iter()
                .map(|key_id| CdmKeyInformation::new(key_id, KeyStatus::Released))
                .collect();
            self.events
                .on_session_keys_change(session_id, false, &keys_info);
        }
        id
    }
}

impl Decryptor for ClearKeyCdm {
    fn register_new_key_cb(&self, stream_type: StreamType, new_key_cb: NewKeyCb) {
        self.decryptor.register_new_key_cb(stream_type, new_key_cb);
    }

    fn decrypt(&self, stream_type: StreamType, encrypted: &EncryptedBuffer) -> DecryptResult {
        self.decryptor.decrypt(stream_type, encrypted)
    }
}

impl Drop for ClearKeyCdm {
    fn drop(&mut self) {
        self.close_all_sessions();
        self.promises.clear();
    }
}
