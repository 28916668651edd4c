use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::LedgerError;
use crate::models::users::UserId;

/// Per-user async mutexes serializing the operations that move a user's balance.
#[derive(Clone)]
pub struct UserLocks {
    locks: Arc<LockMap>,
    timeout: Duration,
}

type LockMap = DashMap<UserId, Arc<Mutex<()>>>;

/// Held for the duration of a balance-changing operation; releases on drop.
///
/// Releasing also forgets locks nobody else holds or waits on, so the map
/// only tracks users with work in flight.
pub struct UserGuard {
    guards: Vec<(UserId, OwnedMutexGuard<()>)>,
    locks: Arc<LockMap>,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        for (id, guard) in self.guards.drain(..) {
            drop(guard);
            // Holders and waiters each keep a clone; only the map's is left.
            self.locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

impl UserLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Locks every given user, always in ascending id order so two callers
    /// with overlapping sets cannot deadlock.
    pub async fn acquire(&self, users: &[UserId]) -> Result<UserGuard, LedgerError> {
        let mut ids = users.to_vec();
        ids.sort_unstable();
        ids.dedup();

        // Built up front so a timeout part way through releases what was taken.
        let mut held = UserGuard {
            guards: Vec::with_capacity(ids.len()),
            locks: self.locks.clone(),
        };
        for id in ids {
            let lock = self
                .locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();

            let guard = tokio::time::timeout(self.timeout, lock.lock_owned())
                .await
                .map_err(|_| {
                    log::warn!("Timed out waiting for the lock on user {}.", id);
                    LedgerError::StoreUnavailable(format!("user {} is busy, try again", id))
                })?;
            held.guards.push((id, guard));
        }

        Ok(held)
    }

    /// Number of users that currently have a lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}
