// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-user mutual exclusion.
//!
//! The [`UserLockRegistry`] hands out one [`parking_lot::Mutex`] per user id.
//! Operations on the same user queue behind each other; operations on
//! different users never share a lock, so they never wait for each other.
//!
//! # Lifetime of an entry
//!
//! Entries are created lazily through the [`DashMap`] entry API, so concurrent
//! first-time acquirers for one user always end up on the same mutex. Each
//! entry is an `Arc`: the map holds one reference and every outstanding
//! [`UserLockGuard`] (or waiter) holds another. An entry is only removed while
//! holding its shard's write lock and only when the map's reference is the
//! last one, which means no guard and no waiter can still be pointing at it.
//!
//! # Example
//!
//! ```
//! use point_ledger::{UserId, UserLockRegistry};
//!
//! let registry = UserLockRegistry::new();
//! {
//!     let _guard = registry.acquire(UserId(1));
//!     assert_eq!(registry.len(), 1);
//! }
//! // The idle entry was reclaimed when the guard dropped.
//! assert!(registry.is_empty());
//! ```

use crate::base::UserId;
use crate::config::LedgerConfig;
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

type UserMutex = Arc<Mutex<()>>;

/// Registry of lazily created per-user locks.
#[derive(Debug)]
pub struct UserLockRegistry {
    locks: DashMap<UserId, UserMutex>,
    /// Hand the lock directly to the longest waiter on release.
    fair_unlock: bool,
    /// Drop a user's entry as soon as its last guard is released.
    reclaim_on_release: bool,
}

impl UserLockRegistry {
    pub fn new() -> Self {
        Self::with_config(&LedgerConfig::default())
    }

    pub fn with_config(config: &LedgerConfig) -> Self {
        Self {
            locks: DashMap::new(),
            fair_unlock: config.fair_unlock,
            reclaim_on_release: config.reclaim_on_release,
        }
    }

    /// Blocks until the caller holds `user_id`'s lock.
    ///
    /// Only callers for the same user are blocked. The lock is released when
    /// the returned guard is dropped.
    pub fn acquire(&self, user_id: UserId) -> UserLockGuard<'_> {
        let lock = self.handle(user_id);
        UserLockGuard {
            registry: self,
            user_id,
            guard: Some(lock.lock_arc()),
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    ///
    /// Returns `None` if the lock could not be taken in time. Nothing was
    /// acquired in that case.
    pub fn try_acquire_for(&self, user_id: UserId, timeout: Duration) -> Option<UserLockGuard<'_>> {
        let lock = self.handle(user_id);
        let acquired = lock.try_lock_arc_for(timeout);
        match acquired {
            Some(guard) => Some(UserLockGuard {
                registry: self,
                user_id,
                guard: Some(guard),
            }),
            None => {
                trace!(%user_id, ?timeout, "gave up waiting for user lock");
                drop(lock);
                if self.reclaim_on_release {
                    self.reclaim(user_id);
                }
                None
            }
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Returns `true` if the registry currently holds an entry for `user_id`.
    pub fn contains(&self, user_id: UserId) -> bool {
        self.locks.contains_key(&user_id)
    }

    /// Removes every entry that no guard or waiter references.
    ///
    /// Returns the number of entries removed.
    pub fn reclaim_idle(&self) -> usize {
        let mut removed = 0;
        self.locks.retain(|_, lock| {
            let idle = Arc::strong_count(lock) == 1;
            if idle {
                removed += 1;
            }
            !idle
        });
        if removed > 0 {
            trace!(removed, "reclaimed idle user locks");
        }
        removed
    }

    /// Returns a reference to the user's mutex, creating it if needed.
    ///
    /// The shard guard taken by `entry` is released before this returns, so
    /// callers never block on a user mutex while holding a map shard.
    fn handle(&self, user_id: UserId) -> UserMutex {
        Arc::clone(
            self.locks
                .entry(user_id)
                .or_insert_with(|| {
                    trace!(%user_id, "created user lock");
                    Arc::new(Mutex::new(()))
                })
                .value(),
        )
    }

    fn reclaim(&self, user_id: UserId) {
        let removed = self
            .locks
            .remove_if(&user_id, |_, lock| Arc::strong_count(lock) == 1);
        if removed.is_some() {
            trace!(%user_id, "reclaimed user lock");
        }
    }
}

impl Default for UserLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive hold on one user's lock.
///
/// Dropping the guard releases the lock on every path, including early
/// returns and panics unwinding through the critical section.
#[must_use = "the user lock is released as soon as the guard is dropped"]
pub struct UserLockGuard<'a> {
    registry: &'a UserLockRegistry,
    user_id: UserId,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl UserLockGuard<'_> {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            if self.registry.fair_unlock {
                ArcMutexGuard::unlock_fair(guard);
            } else {
                drop(guard);
            }
        }
        // The mutex Arc inside the guard is gone by now, so the entry is idle
        // unless someone else is holding or waiting on it.
        if self.registry.reclaim_on_release {
            self.registry.reclaim(self.user_id);
        }
    }
}
