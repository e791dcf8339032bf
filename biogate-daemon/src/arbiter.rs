//! Exclusive access to the single capture device.
//!
//! At most one [`DeviceLease`] is outstanding per [`DeviceArbiter`]. The lease
//! releases the device when dropped, so a session task that errors out, is
//! aborted, or panics cannot keep the scanner locked.

use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use biogate_core::SessionId;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Identifier of one granted lease. Unique per arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

/// Error type for arbiter operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArbiterError {
    #[error("capture device is held by session {holder}")]
    Busy { holder: SessionId },
}

struct Holder {
    lease: LeaseId,
    owner: SessionId,
    since: Instant,
}

struct Shared {
    holder: Mutex<Option<Holder>>,
    released: Notify,
    next_lease: AtomicU64,
}

impl Shared {
    fn try_acquire(&self, owner: &SessionId) -> Result<LeaseId, SessionId> {
        let mut holder = self.holder.lock();
        if let Some(current) = holder.as_ref() {
            return Err(current.owner.clone());
        }
        let lease = LeaseId(self.next_lease.fetch_add(1, Ordering::Relaxed) + 1);
        *holder = Some(Holder {
            lease,
            owner: owner.clone(),
            since: Instant::now(),
        });
        Ok(lease)
    }

    fn release(&self, lease: LeaseId) -> bool {
        let mut holder = self.holder.lock();
        let Some(current) = holder.take_if(|current| current.lease == lease) else {
            return false;
        };
        drop(holder);

        tracing::info!(
            lease = %lease,
            session = %current.owner,
            held_ms = current.since.elapsed().as_millis() as u64,
            "Device lease released"
        );
        self.released.notify_waiters();
        true
    }
}

/// Grants and revokes the device lease.
///
/// Cheap to clone; all clones arbitrate the same device.
#[derive(Clone)]
pub struct DeviceArbiter {
    shared: Arc<Shared>,
}

impl DeviceArbiter {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                holder: Mutex::new(None),
                released: Notify::new(),
                next_lease: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire the device for `owner`.
    ///
    /// With `wait == 0` this is a single non-blocking attempt. Otherwise the
    /// call waits up to `wait` for the current holder to release.
    pub async fn acquire(
        &self,
        owner: SessionId,
        wait: Duration,
    ) -> Result<DeviceLease, ArbiterError> {
        let deadline = Instant::now() + wait;

        loop {
            // Register for the release notification before checking, so a
            // release between the check and the await is not missed.
            let mut released = pin!(self.shared.released.notified());
            released.as_mut().enable();

            match self.shared.try_acquire(&owner) {
                Ok(id) => {
                    tracing::info!(lease = %id, session = %owner, "Device lease acquired");
                    return Ok(DeviceLease {
                        id,
                        owner,
                        arbiter: Arc::downgrade(&self.shared),
                    });
                }
                Err(holder) => {
                    if wait.is_zero() || Instant::now() >= deadline {
                        tracing::debug!(session = %owner, holder = %holder, "Device busy");
                        return Err(ArbiterError::Busy { holder });
                    }
                    // On timeout the loop makes one last attempt and then
                    // reports Busy.
                    let _ = tokio::time::timeout_at(deadline, released).await;
                }
            }
        }
    }

    /// Release `lease` explicitly.
    ///
    /// Returns true only if this call freed the device. Releasing twice, a
    /// stale lease, or a lease from another arbiter returns false and leaves
    /// the current holder untouched.
    pub fn release(&self, lease: &DeviceLease) -> bool {
        if !std::ptr::eq(lease.arbiter.as_ptr(), Arc::as_ptr(&self.shared)) {
            return false;
        }
        self.shared.release(lease.id)
    }

    /// Session currently holding the device, if any.
    pub fn holder(&self) -> Option<SessionId> {
        self.shared
            .holder
            .lock()
            .as_ref()
            .map(|current| current.owner.clone())
    }

    pub fn is_free(&self) -> bool {
        self.shared.holder.lock().is_none()
    }
}

impl Default for DeviceArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArbiter")
            .field("holder", &self.holder())
            .finish()
    }
}

/// Move-only token proving exclusive use of the device.
///
/// Dropping the lease releases the device if it is still the current one.
#[derive(Debug)]
pub struct DeviceLease {
    id: LeaseId,
    owner: SessionId,
    arbiter: Weak<Shared>,
}

impl DeviceLease {
    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn owner(&self) -> &SessionId {
        &self.owner
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Some(shared) = self.arbiter.upgrade() {
            shared.release(self.id);
        }
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared").finish_non_exhaustive()
    }
}
