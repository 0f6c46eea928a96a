//! Scheme-scoped locks
//!
//! Every guarded scheme action owns one lock per scheme. Edits take the lock
//! of their own action; migrations take all of them ([`SchemeLockService::lock_all`])
//! so they wait for every in-flight edit of the scheme to finish.
//!
//! Guards release on drop, so a lock is freed on every exit path of the
//! holder: normal return, early `?` return, or panic unwinding.

use crate::ids::SchemeId;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Scheme actions guarded by their own lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchemeAction {
    DeleteScheme,
    UpdateScheme,
    UpdateDraftScheme,
}

impl SchemeAction {
    /// Every action, in lock acquisition order
    pub const ALL: [SchemeAction; 3] = [
        SchemeAction::DeleteScheme,
        SchemeAction::UpdateScheme,
        SchemeAction::UpdateDraftScheme,
    ];

    /// Human-readable lock name, e.g. `UpdateScheme_12`
    #[must_use]
    pub fn lock_name(self, scheme: SchemeId) -> String {
        format!("{self:?}_{scheme}")
    }
}

/// Holds one or more scheme action locks until dropped
#[derive(Debug)]
pub struct SchemeGuard {
    scheme: SchemeId,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl SchemeGuard {
    /// Scheme whose locks are held
    #[inline]
    #[must_use]
    pub fn scheme(&self) -> SchemeId {
        self.scheme
    }

    /// Number of action locks held
    #[inline]
    #[must_use]
    pub fn held(&self) -> usize {
        self.guards.len()
    }
}

impl Drop for SchemeGuard {
    fn drop(&mut self) {
        // release in reverse acquisition order
        while self.guards.pop().is_some() {}
        tracing::trace!(scheme = %self.scheme, "released scheme locks");
    }
}

/// Registry of per-(action, scheme) async mutexes
#[derive(Debug, Default)]
pub struct SchemeLockService {
    locks: DashMap<(SchemeAction, SchemeId), Arc<Mutex<()>>>,
}

impl SchemeLockService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex(&self, action: SchemeAction, scheme: SchemeId) -> Arc<Mutex<()>> {
        // clone out of the map so no shard lock is held across an await
        self.locks.entry((action, scheme)).or_default().value().clone()
    }

    /// Wait for the lock of one action on `scheme`
    pub async fn lock(&self, action: SchemeAction, scheme: SchemeId) -> SchemeGuard {
        tracing::trace!(lock = %action.lock_name(scheme), "acquiring scheme lock");
        let guard = self.mutex(action, scheme).lock_owned().await;
        SchemeGuard {
            scheme,
            guards: vec![guard],
        }
    }

    /// Wait for every action lock on `scheme`, in [`SchemeAction::ALL`] order
    pub async fn lock_all(&self, scheme: SchemeId) -> SchemeGuard {
        let mut guards = Vec::with_capacity(SchemeAction::ALL.len());
        for action in SchemeAction::ALL {
            tracing::trace!(lock = %action.lock_name(scheme), "acquiring scheme lock");
            guards.push(self.mutex(action, scheme).lock_owned().await);
        }
        SchemeGuard { scheme, guards }
    }

    /// Take one action lock without waiting
    #[must_use]
    pub fn try_lock(&self, action: SchemeAction, scheme: SchemeId) -> Option<SchemeGuard> {
        let guard = self.mutex(action, scheme).try_lock_owned().ok()?;
        Some(SchemeGuard {
            scheme,
            guards: vec![guard],
        })
    }

    /// Take every action lock without waiting; all or nothing
    #[must_use]
    pub fn try_lock_all(&self, scheme: SchemeId) -> Option<SchemeGuard> {
        let mut guards = Vec::with_capacity(SchemeAction::ALL.len());
        for action in SchemeAction::ALL {
            guards.push(self.mutex(action, scheme).try_lock_owned().ok()?);
        }
        Some(SchemeGuard { scheme, guards })
    }

    /// Run `task` while holding every action lock on `scheme`
    pub async fn with_all_locks<F, T>(&self, scheme: SchemeId, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.lock_all(scheme).await;
        task.await
    }

    /// Run `task` while holding the lock of one action on `scheme`
    pub async fn with_lock<F, T>(&self, action: SchemeAction, scheme: SchemeId, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.lock(action, scheme).await;
        task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::time::Duration;

    #[tokio::test]
    async fn lock_all_excludes_single_action() {
        let service = SchemeLockService::new();
        let guard = service.lock_all(SchemeId(1)).await;
        assert_eq!(guard.held(), 3);

        assert!(service.try_lock(SchemeAction::UpdateScheme, SchemeId(1)).is_none());
        // other schemes are unaffected
        assert!(service.try_lock(SchemeAction::UpdateScheme, SchemeId(2)).is_some());

        drop(guard);
        assert!(service.try_lock(SchemeAction::UpdateScheme, SchemeId(1)).is_some());
    }

    #[tokio::test]
    async fn failing_task_releases_locks() {
        let service = SchemeLockService::new();

        let result: Result<(), &str> = service
            .with_all_locks(SchemeId(5), async { Err("boom") })
            .await;
        assert!(result.is_err());

        assert!(service.try_lock_all(SchemeId(5)).is_some());
    }

    #[tokio::test]
    async fn panicking_task_releases_locks() {
        let service = SchemeLockService::new();

        let outcome = AssertUnwindSafe(service.with_all_locks(SchemeId(5), async {
            panic!("task blew up");
        }))
        .catch_unwind()
        .await;
        assert!(outcome.is_err());

        assert!(service.try_lock_all(SchemeId(5)).is_some());
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let service = Arc::new(SchemeLockService::new());
        let guard = service.lock(SchemeAction::UpdateScheme, SchemeId(9)).await;

        let waiter = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.lock_all(SchemeId(9)).await.held() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        let held = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire after release")
            .unwrap();
        assert_eq!(held, 3);
    }

    #[test]
    fn lock_names_are_scoped() {
        assert_eq!(SchemeAction::UpdateDraftScheme.lock_name(SchemeId(3)), "UpdateDraftScheme_3");
    }
}
