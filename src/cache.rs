//! An asynchronous, expiry-aware, single-flight cache
//!
//! The cache hands out futures for every lookup while guaranteeing that at
//! most one loader invocation is in flight per key. Callers that arrive
//! while a load is pending are attached to the entry's awaiter list and all
//! resolve, in attachment order, with the outcome of that single load.
//! Successful values are cached until the expiry they report; failures are
//! broadcast but never cached, so the next lookup retries.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tokio::sync::oneshot;

/// A value with an absolute expiry
///
/// Implemented by cacheable values so the cache can compute an entry's
/// lifetime from the value itself.
pub trait Expires {
    /// The time at which the value should be discarded, in milliseconds
    /// since the Unix epoch
    fn expires_at_ms(&self) -> u64;
}

impl<T: Expires + ?Sized> Expires for Arc<T> {
    fn expires_at_ms(&self) -> u64 {
        (**self).expires_at_ms()
    }
}

/// The in-flight load backing a cache entry was abandoned before resolving
#[derive(Debug, Error)]
#[error("cache loader was aborted")]
pub struct LoaderAborted {
    _p: (),
}

const fn loader_aborted() -> LoaderAborted {
    LoaderAborted { _p: () }
}

pub(crate) fn epoch_ms() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("times before Unix epoch are not expected");
    elapsed.as_millis() as u64
}

enum Entry<V, E> {
    Pending {
        waiters: Vec<oneshot::Sender<Result<V, E>>>,
    },
    Ready {
        value: V,
        expires_at_ms: u64,
    },
}

/// A deduplicated, expiry-aware cache of lazily computed results
pub struct AsyncCache<K, V, E> {
    entries: Arc<Mutex<HashMap<K, Entry<V, E>>>>,
}

impl<K, V, E> Clone for AsyncCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V, E> Default for AsyncCache<K, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> AsyncCache<K, V, E> {
    /// Constructs an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V, E> fmt::Debug for AsyncCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AsyncCache")
            .field("len", &lock(&self.entries).len())
            .finish()
    }
}

fn lock<'a, K, V, E>(
    entries: &'a Mutex<HashMap<K, Entry<V, E>>>,
) -> MutexGuard<'a, HashMap<K, Entry<V, E>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Claim<V, E> {
    Hit(V),
    Wait(oneshot::Receiver<Result<V, E>>),
    Load(oneshot::Receiver<Result<V, E>>),
}

impl<K, V, E> AsyncCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Expires + Send + 'static,
    E: Clone + From<LoaderAborted> + Send + 'static,
{
    /// Whether the backing map holds an entry for `key`
    ///
    /// Pending and expired entries count; this mirrors the backing map, not
    /// the set of currently servable values.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        lock(&self.entries).contains_key(key)
    }

    /// Inserts `value` as an already-completed entry
    ///
    /// The entry expires at the time the value reports. A pending entry is
    /// left untouched: its in-flight loader remains the source of truth for
    /// the awaiters already attached to it.
    pub fn put(&self, key: K, value: V) {
        let expires_at_ms = value.expires_at_ms();
        let mut entries = lock(&self.entries);
        if let Some(Entry::Pending { .. }) = entries.get(&key) {
            return;
        }
        entries.insert(
            key,
            Entry::Ready {
                value,
                expires_at_ms,
            },
        );
    }

    /// Gets the value for `key`, invoking `loader` on a miss
    ///
    /// If an unexpired value is cached it is returned immediately. If a load
    /// is already pending the caller is attached to it and resolves with
    /// that load's outcome. Otherwise `loader` is invoked exactly once and
    /// its future is detached onto the runtime, so the load completes (and
    /// resolves every awaiter) even if this caller stops polling.
    ///
    /// # Errors
    ///
    /// Returns the loader's error. A failed load fails every awaiter that
    /// attached before completion and leaves nothing cached.
    pub async fn get<F, Fut>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let now = epoch_ms();

        let claim = {
            let mut entries = lock(&self.entries);
            match entries.get_mut(&key) {
                Some(Entry::Ready {
                    value,
                    expires_at_ms,
                }) if *expires_at_ms > now => Claim::Hit(value.clone()),
                Some(Entry::Pending { waiters }) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Claim::Wait(rx)
                }
                _ => {
                    let (tx, rx) = oneshot::channel();
                    entries.insert(key.clone(), Entry::Pending { waiters: vec![tx] });
                    Claim::Load(rx)
                }
            }
        };

        let rx = match claim {
            Claim::Hit(value) => return Ok(value),
            Claim::Wait(rx) => rx,
            Claim::Load(rx) => {
                let fut = loader();
                let entries = Arc::clone(&self.entries);
                tokio::spawn(async move {
                    let result = fut.await;
                    resolve(&entries, &key, result);
                });
                rx
            }
        };

        rx.await.unwrap_or_else(|_| Err(E::from(loader_aborted())))
    }
}

fn resolve<K, V, E>(
    entries: &Mutex<HashMap<K, Entry<V, E>>>,
    key: &K,
    result: Result<V, E>,
) where
    K: Eq + Hash + Clone,
    V: Clone + Expires,
    E: Clone,
{
    let waiters = {
        let mut entries = lock(entries);
        let waiters = match entries.remove(key) {
            Some(Entry::Pending { waiters }) => waiters,
            Some(ready) => {
                // A `put` raced this load in; keep it and notify no one.
                entries.insert(key.clone(), ready);
                Vec::new()
            }
            None => Vec::new(),
        };

        if let Ok(value) = &result {
            entries.insert(
                key.clone(),
                Entry::Ready {
                    value: value.clone(),
                    expires_at_ms: value.expires_at_ms(),
                },
            );
        }

        waiters
    };

    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}
