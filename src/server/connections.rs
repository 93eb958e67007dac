//! Connection registry
//!
//! Every live stream has exactly one entry here, and every entry owns the
//! cancel handle of exactly one scheduled push task. Arming (insert + start
//! task) and disarming (cancel + remove) each happen under the entry's shard
//! lock, so no observer can see a task without an entry or the reverse.
//!
//! Once [`ConnectionRegistry::close_all`] has run the registry is closed:
//! later arms start their task already cancelled and leave no entry.

use crate::auth::Claims;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// What the registry knows about a live stream
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub claims: Claims,
    /// Resolved channel id
    pub channel: String,
    pub created_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn new(claims: Claims, channel: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            claims,
            channel: channel.into(),
            created_at: Utc::now(),
        }
    }
}

/// Receiving side of a connection's cancel handle, held by its push task
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// Resolves once the connection is disarmed. Dropping the registry entry
    /// counts as cancellation too.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }
}

struct Slot {
    info: ConnectionInfo,
    cancel: watch::Sender<bool>,
}

impl Slot {
    fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

/// Tracks all live streams
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, Slot>>,
    closed: Arc<AtomicBool>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and start its scheduled task as one unit.
    ///
    /// `start` receives the task's [`CancelSignal`] and must only spawn; it
    /// runs while the entry is locked and must not call back into the registry.
    /// On a closed registry the signal is already cancelled and nothing is
    /// inserted.
    pub fn arm<T>(&self, info: ConnectionInfo, start: impl FnOnce(CancelSignal) -> T) -> T {
        let (cancel, signal) = watch::channel(false);

        let entry = self.connections.entry(info.id);
        if self.closed.load(Ordering::SeqCst) {
            drop(entry);
            drop(cancel);
            return start(CancelSignal(signal));
        }

        let task = start(CancelSignal(signal));
        entry.insert(Slot { info, cancel });

        task
    }

    /// Cancel a connection's scheduled task and remove its entry as one unit.
    ///
    /// Idempotent: returns `None` if the connection was already disarmed.
    pub fn disarm(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        match self.connections.entry(id) {
            Entry::Occupied(slot) => {
                slot.get().cancel();
                Some(slot.remove().info)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Close the registry and disarm every connection (server shutdown).
    /// Returns how many were live.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.disarm(id)).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|slot| slot.info.clone())
    }

    /// Get total connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live streams on one channel
    pub fn count_on(&self, channel: &str) -> usize {
        self.connections
            .iter()
            .filter(|slot| slot.info.channel == channel)
            .count()
    }

    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.connections.iter().map(|slot| slot.info.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn claims() -> Claims {
        Claims {
            sub: "u-1".into(),
            username: "admin".into(),
            role: "admin".into(),
            iat: 0,
            exp: i64::MAX,
        }
    }

    #[test]
    fn test_arm_disarm() {
        let registry = ConnectionRegistry::new();
        let info = ConnectionInfo::new(claims(), "vulnerability-score");
        let id = info.id;

        let signal = registry.arm(info, |signal| signal);
        assert!(registry.contains(id));
        assert_eq!(registry.count_on("vulnerability-score"), 1);
        assert!(!signal.is_cancelled());

        let removed = registry.disarm(id).unwrap();
        assert_eq!(removed.id, id);
        assert!(!registry.contains(id));
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_disarm_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let info = ConnectionInfo::new(claims(), "pulse");
        let id = info.id;

        let _signal = registry.arm(info, |signal| signal);
        assert!(registry.disarm(id).is_some());
        assert!(registry.disarm(id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_disarm() {
        let registry = ConnectionRegistry::new();
        let info = ConnectionInfo::new(claims(), "pulse");
        let id = info.id;

        let task = registry.arm(info, |mut signal| {
            tokio::spawn(async move {
                signal.cancelled().await;
            })
        });

        registry.disarm(id);
        timeout(Duration::from_secs(1), task)
            .await
            .expect("task should observe cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ConnectionRegistry::new();
        let mut tasks = vec![];

        for i in 0..10 {
            let info = ConnectionInfo::new(claims(), format!("feed-{}", i % 2));
            tasks.push(registry.arm(info, |mut signal| {
                tokio::spawn(async move { signal.cancelled().await })
            }));
        }
        assert_eq!(registry.count_on("feed-0"), 5);

        assert_eq!(registry.close_all(), 10);
        assert_eq!(registry.count(), 0);
        for task in tasks {
            timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_arm_after_close_all_is_cancelled() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.close_all(), 0);
        assert!(registry.is_closed());

        // An upgrade that lands after shutdown must not leave a live stream
        let info = ConnectionInfo::new(claims(), "pulse");
        let id = info.id;
        let task = registry.arm(info, |mut signal| {
            tokio::spawn(async move { signal.cancelled().await })
        });

        assert!(!registry.contains(id));
        assert_eq!(registry.count(), 0);
        timeout(Duration::from_secs(1), task)
            .await
            .expect("late task should start cancelled")
            .unwrap();
    }
}
