//! Ownership of every binary buffer the pipeline touches.
//!
//! A buffer enters through [`BufferStore::register`] and is reachable only
//! through the returned [`Handle`]. Each handle is revoked exactly once:
//! explicitly via [`BufferStore::revoke`] / [`BufferStore::replace`], or by
//! being dropped together with the asset or artifact that owns it. While a
//! preview holds a [`PreviewLease`] the release is deferred until the lease
//! goes away.

use base64::Engine as _;
use bytes::Bytes;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

use crate::error::{Result, TransformError};

const URL_PREFIX: &str = "blob:media-transform/";

struct Entry {
    bytes: Bytes,
    leases: usize,
    revoke_pending: bool,
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<Uuid, Entry>,
    registered: u64,
    revoked: u64,
}

impl StoreInner {
    fn release(&mut self, id: &Uuid) {
        if self.entries.remove(id).is_some() {
            self.revoked += 1;
            debug!("released buffer {}", id);
        }
    }

    fn revoke(&mut self, id: &Uuid) {
        let deferred = match self.entries.get_mut(id) {
            Some(entry) if entry.leases > 0 => {
                entry.revoke_pending = true;
                true
            }
            Some(_) => false,
            None => return,
        };
        if !deferred {
            self.release(id);
        }
    }
}

fn lock(inner: &Mutex<StoreInner>) -> MutexGuard<'_, StoreInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Counters for leak tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub registered: u64,
    pub revoked: u64,
    pub live: usize,
    pub live_bytes: usize,
}

#[derive(Clone, Default)]
pub struct BufferStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, buffer: impl Into<Bytes>) -> Handle {
        let bytes = buffer.into();
        let id = Uuid::new_v4();
        let mut inner = lock(&self.inner);
        debug!("registered buffer {} ({} bytes)", id, bytes.len());
        inner.entries.insert(
            id,
            Entry {
                bytes,
                leases: 0,
                revoke_pending: false,
            },
        );
        inner.registered += 1;
        Handle {
            id,
            store: Arc::downgrade(&self.inner),
            live: true,
        }
    }

    pub fn revoke(&self, mut handle: Handle) {
        handle.live = false;
        lock(&self.inner).revoke(&handle.id);
    }

    /// Revoke `old` and register `buffer` in its place.
    pub fn replace(&self, old: Handle, buffer: impl Into<Bytes>) -> Handle {
        self.revoke(old);
        self.register(buffer)
    }

    /// Shared view of the buffer. No bytes are copied.
    pub fn get(&self, handle: &Handle) -> Result<Bytes> {
        self.lookup(&handle.id)
    }

    /// Resolve a display URL produced by [`Handle::url`].
    pub fn resolve_url(&self, url: &str) -> Result<Bytes> {
        let id = url
            .strip_prefix(URL_PREFIX)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| TransformError::UnknownHandle(url.to_string()))?;
        self.lookup(&id)
    }

    /// Inline `data:` URL. Copies the whole buffer, so only meant for small previews.
    pub fn data_url(&self, handle: &Handle, mime: &str) -> Result<String> {
        let bytes = self.get(handle)?;
        Ok(format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        ))
    }

    /// Keep the buffer resolvable while a preview element shows it.
    pub fn lease(&self, handle: &Handle) -> Result<PreviewLease> {
        let mut inner = lock(&self.inner);
        let entry = inner
            .entries
            .get_mut(&handle.id)
            .ok_or_else(|| TransformError::UnknownHandle(handle.url()))?;
        entry.leases += 1;
        Ok(PreviewLease {
            id: handle.id,
            store: Arc::downgrade(&self.inner),
        })
    }

    pub fn stats(&self) -> StoreStats {
        let inner = lock(&self.inner);
        StoreStats {
            registered: inner.registered,
            revoked: inner.revoked,
            live: inner.entries.len(),
            live_bytes: inner.entries.values().map(|e| e.bytes.len()).sum(),
        }
    }

    fn lookup(&self, id: &Uuid) -> Result<Bytes> {
        lock(&self.inner)
            .entries
            .get(id)
            .filter(|entry| !entry.revoke_pending || entry.leases > 0)
            .map(|entry| entry.bytes.clone())
            .ok_or_else(|| TransformError::UnknownHandle(format!("{}{}", URL_PREFIX, id)))
    }
}

/// Revocable reference to a registered buffer.
pub struct Handle {
    id: Uuid,
    store: Weak<Mutex<StoreInner>>,
    live: bool,
}

impl Handle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> String {
        format!("{}{}", URL_PREFIX, self.id)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handle").field(&self.id).finish()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            lock(&store).revoke(&self.id);
        }
    }
}

pub struct PreviewLease {
    id: Uuid,
    store: Weak<Mutex<StoreInner>>,
}

impl Drop for PreviewLease {
    fn drop(&mut self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let mut inner = lock(&store);
        let release = match inner.entries.get_mut(&self.id) {
            Some(entry) => {
                entry.leases = entry.leases.saturating_sub(1);
                entry.leases == 0 && entry.revoke_pending
            }
            None => false,
        };
        if release {
            inner.release(&self.id);
        }
    }
}
