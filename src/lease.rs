use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Internal entry representing a held lease.
#[derive(Debug, Clone)]
struct LeaseEntry {
    owner: Uuid,
    expires_at: Instant,
}

impl LeaseEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Advisory per-post lease preventing two mutating operations from
/// interleaving on the same identity.
///
/// Acquisition fails fast with a conflict instead of blocking; expiry is
/// lazy, evicted on the next acquire attempt for the same id. Operations on
/// different ids never contend.
#[derive(Debug, Clone)]
pub struct IdentityLeases {
    leases: Arc<DashMap<Uuid, LeaseEntry>>,
    ttl: Duration,
}

impl IdentityLeases {
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Try to claim `id`; returns a guard that releases the lease on drop.
    pub fn try_acquire(&self, id: &Uuid) -> Result<LeaseGuard> {
        // Remove expired entries lazily.
        self.leases.remove_if(id, |_, entry| entry.is_expired());

        let owner = Uuid::new_v4();
        match self.leases.entry(*id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "Outra operação está em andamento para o post {}",
                id
            ))),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(LeaseEntry {
                    owner,
                    expires_at: Instant::now() + self.ttl,
                });
                Ok(LeaseGuard {
                    leases: Arc::clone(&self.leases),
                    id: *id,
                    owner,
                })
            }
        }
    }
}

impl Default for IdentityLeases {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

/// Guard for a lease acquired via [`IdentityLeases`].
#[derive(Debug)]
pub struct LeaseGuard {
    leases: Arc<DashMap<Uuid, LeaseEntry>>,
    id: Uuid,
    owner: Uuid,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        // Only remove if we are still the owner; a lease that expired and was
        // re-acquired by someone else must stay put.
        self.leases
            .remove_if(&self.id, |_, entry| entry.owner == self.owner);
    }
}
