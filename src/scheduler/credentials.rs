//! Fair, bounded pool of judge-model API credentials.
//!
//! Each credential is held by at most one task at a time. Borrowers queue in
//! FIFO order on a fair [`Semaphore`] with one permit per credential, so no
//! waiter is starved. A borrowed credential is a [`CredentialLease`]; dropping
//! the lease returns the credential on every exit path, including panics and
//! cancelled futures. [`CredentialPool::release`] is the explicit return path
//! and is where protocol violations surface.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error};

use crate::error::PoolError;
use crate::llm::mask_key;

/// Where credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// One key.
    Single(String),
    /// Comma- or newline-separated keys.
    List(String),
    /// A file with one key per line; blank lines and `#` comments are ignored.
    File(PathBuf),
}

impl CredentialSource {
    /// Normalizes the source into a de-duplicated, order-preserving key list.
    pub fn keys(&self) -> Result<Vec<String>, PoolError> {
        let raw: Vec<String> = match self {
            CredentialSource::Single(key) => vec![key.clone()],
            CredentialSource::List(list) => list
                .split(|c| c == ',' || c == '\n')
                .map(str::to_string)
                .collect(),
            CredentialSource::File(path) => {
                let content = fs::read_to_string(path).map_err(|e| {
                    PoolError::InvalidSource(format!("{}: {}", path.display(), e))
                })?;
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.starts_with('#'))
                    .map(str::to_string)
                    .collect()
            }
        };

        let mut seen = HashSet::new();
        let keys: Vec<String> = raw
            .into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .filter(|key| seen.insert(key.clone()))
            .collect();

        if keys.is_empty() {
            return Err(PoolError::EmptyPool);
        }
        Ok(keys)
    }
}

/// An opaque API key with a stable position in its pool.
#[derive(Clone)]
pub struct Credential {
    id: usize,
    token: String,
}

impl Credential {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("token", &mask_key(&self.token))
            .finish()
    }
}

struct PoolInner {
    credentials: Vec<Credential>,
    in_use: Mutex<Vec<bool>>,
    semaphore: Arc<Semaphore>,
    peak: AtomicUsize,
}

impl PoolInner {
    fn slots(&self) -> MutexGuard<'_, Vec<bool>> {
        // A panic while the lock is held cannot leave the flags half-written.
        self.in_use.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn checkout(&self) -> Result<usize, PoolError> {
        let mut slots = self.slots();
        let id = slots.iter().position(|busy| !busy).ok_or_else(|| {
            PoolError::Protocol("permit granted while every credential is in use".to_string())
        })?;
        slots[id] = true;
        let in_use = slots.iter().filter(|busy| **busy).count();
        self.peak.fetch_max(in_use, Ordering::SeqCst);
        Ok(id)
    }

    fn checkin(&self, id: usize) -> Result<(), PoolError> {
        let mut slots = self.slots();
        match slots.get_mut(id) {
            Some(busy) if *busy => {
                *busy = false;
                Ok(())
            }
            Some(_) => Err(PoolError::Protocol(format!(
                "credential {} released while not borrowed",
                id
            ))),
            None => Err(PoolError::Protocol(format!(
                "credential {} does not belong to this pool",
                id
            ))),
        }
    }
}

/// Bounded set of interchangeable credentials.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct CredentialPool {
    inner: Arc<PoolInner>,
}

impl CredentialPool {
    /// Builds a pool from `keys`, which must be non-empty.
    pub fn new(keys: Vec<String>) -> Result<Self, PoolError> {
        if keys.is_empty() {
            return Err(PoolError::EmptyPool);
        }
        let credentials: Vec<Credential> = keys
            .into_iter()
            .enumerate()
            .map(|(id, token)| Credential { id, token })
            .collect();
        let size = credentials.len();
        Ok(Self {
            inner: Arc::new(PoolInner {
                credentials,
                in_use: Mutex::new(vec![false; size]),
                semaphore: Arc::new(Semaphore::new(size)),
                peak: AtomicUsize::new(0),
            }),
        })
    }

    pub fn from_source(source: &CredentialSource) -> Result<Self, PoolError> {
        Self::new(source.keys()?)
    }

    /// Borrows a credential, waiting in FIFO order while all are in use.
    pub async fn acquire(&self) -> Result<CredentialLease, PoolError> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        let id = self.inner.checkout()?;
        let credential = self.inner.credentials[id].clone();
        debug!(
            credential_id = id,
            key = %mask_key(credential.token()),
            "Credential acquired"
        );
        Ok(CredentialLease {
            pool: Arc::clone(&self.inner),
            credential,
            permit: Some(permit),
        })
    }

    /// Returns `lease` to the pool.
    ///
    /// Fails with [`PoolError::Protocol`] when the lease was issued by a
    /// different pool or the credential is not currently borrowed. A foreign
    /// lease still goes back to the pool that issued it.
    pub fn release(&self, mut lease: CredentialLease) -> Result<(), PoolError> {
        if !Arc::ptr_eq(&lease.pool, &self.inner) {
            return Err(PoolError::Protocol(format!(
                "credential {} released to a pool that did not lend it",
                lease.credential.id
            )));
        }
        lease.give_back()
    }

    /// Number of credentials.
    pub fn size(&self) -> usize {
        self.inner.credentials.len()
    }

    /// Credentials currently borrowed.
    pub fn in_use(&self) -> usize {
        self.inner.slots().iter().filter(|busy| **busy).count()
    }

    /// Credentials free to borrow right now.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Highest number of simultaneously borrowed credentials so far.
    pub fn peak_in_use(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Rejects further acquisitions; waiting borrowers get [`PoolError::Closed`].
    pub fn close(&self) {
        self.inner.semaphore.close();
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("size", &self.size())
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// Exclusive use of one credential until released or dropped.
pub struct CredentialLease {
    pool: Arc<PoolInner>,
    credential: Credential,
    permit: Option<OwnedSemaphorePermit>,
}

impl CredentialLease {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn id(&self) -> usize {
        self.credential.id
    }

    pub fn token(&self) -> &str {
        self.credential.token()
    }

    /// Frees the slot before the permit so the next waiter finds it free.
    fn give_back(&mut self) -> Result<(), PoolError> {
        let Some(permit) = self.permit.take() else {
            return Err(PoolError::Protocol(format!(
                "credential {} released twice",
                self.credential.id
            )));
        };
        let result = self.pool.checkin(self.credential.id);
        drop(permit);
        if result.is_ok() {
            debug!(credential_id = self.credential.id, "Credential released");
        }
        result
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        if self.permit.is_some() {
            if let Err(e) = self.give_back() {
                error!(error = %e, "Credential lease dropped in an inconsistent state");
            }
        }
    }
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("credential", &self.credential)
            .field("released", &self.permit.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn pool(size: usize) -> CredentialPool {
        CredentialPool::new((0..size).map(|i| format!("sk-test-key-{:04}", i)).collect())
            .expect("non-empty pool")
    }

    #[test]
    fn test_source_normalization() {
        let keys = CredentialSource::List(" a, b,,a\nc ".to_string())
            .keys()
            .expect("keys");
        assert_eq!(keys, vec!["a", "b", "c"]);

        assert!(matches!(
            CredentialSource::Single("   ".to_string()).keys(),
            Err(PoolError::EmptyPool)
        ));
    }

    #[test]
    fn test_source_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "# primary org\nsk-one\n\n  sk-two  \nsk-one\n#sk-disabled").expect("write");

        let keys = CredentialSource::File(file.path().to_path_buf())
            .keys()
            .expect("keys");
        assert_eq!(keys, vec!["sk-one", "sk-two"]);

        let missing = CredentialSource::File(PathBuf::from("/nonexistent/keys.txt")).keys();
        assert!(matches!(missing, Err(PoolError::InvalidSource(_))));
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(CredentialPool::new(vec![]), Err(PoolError::EmptyPool)));
    }

    #[test]
    fn test_debug_masks_tokens() {
        let pool = pool(1);
        let rendered = format!("{:?}", pool.inner.credentials[0]);
        assert!(!rendered.contains("sk-test-key-0000"));
    }

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let pool = pool(2);
        let a = pool.acquire().await.expect("acquire");
        let b = pool.acquire().await.expect("acquire");
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.in_use(), 2);
        assert_eq!(pool.available(), 0);

        pool.release(a).expect("release");
        assert_eq!(pool.in_use(), 1);
        drop(b);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.peak_in_use(), 2);
    }

    #[tokio::test]
    async fn test_release_to_foreign_pool_is_protocol_error() {
        let lender = pool(1);
        let other = pool(1);
        let lease = lender.acquire().await.expect("acquire");

        let err = other.release(lease).unwrap_err();
        assert!(matches!(err, PoolError::Protocol(_)));
        assert_eq!(lender.in_use(), 0);
        assert_eq!(other.in_use(), 0);
    }

    #[tokio::test]
    async fn test_checkin_of_unborrowed_credential_is_protocol_error() {
        let pool = pool(2);
        assert!(matches!(pool.inner.checkin(1), Err(PoolError::Protocol(_))));
        assert!(matches!(pool.inner.checkin(7), Err(PoolError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_fifo_order() {
        let pool = pool(1);
        let held = pool.acquire().await.expect("acquire");
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let pool = pool.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let lease = pool.acquire().await.expect("acquire");
                order.lock().expect("lock not poisoned").push(i);
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.release(lease).expect("release");
            }));
            // Let each waiter enqueue before the next one is spawned.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.release(held).expect("release");
        for handle in handles {
            handle.await.expect("task completes");
        }
        assert_eq!(*order.lock().expect("lock not poisoned"), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dropped_lease_releases_on_cancellation() {
        let pool = pool(1);
        let task_pool = pool.clone();
        let handle = tokio::spawn(async move {
            let _lease = task_pool.acquire().await.expect("acquire");
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.in_use(), 1);
        handle.abort();
        let _ = handle.await;

        let lease = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("credential returned")
            .expect("acquire");
        assert_eq!(pool.in_use(), 1);
        drop(lease);
    }

    #[tokio::test]
    async fn test_closed_pool() {
        let pool = pool(1);
        pool.close();
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}
