//! Lazily-initialized shared connection.
//!
//! The slot moves `Uninitialized → Rebuilding → Ready`. Only the first caller runs the
//! initializer; callers arriving while it runs wait for the outcome instead of starting
//! a second initialization. A failed or cancelled initialization returns the slot to
//! `Uninitialized`, so the next caller retries.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

/// Observable state of a [`ConnectionSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Uninitialized,
    Rebuilding,
    Ready,
}

enum SlotState<T> {
    Uninitialized,
    Rebuilding,
    Ready(Arc<T>),
}

pub struct ConnectionSlot<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
}

impl<T> std::fmt::Debug for ConnectionSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("status", &self.status())
            .finish()
    }
}

impl<T> Default for ConnectionSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the slot to `Uninitialized` unless the rebuild completed.
struct RebuildGuard<'a, T> {
    slot: &'a ConnectionSlot<T>,
    completed: bool,
}

impl<T> Drop for RebuildGuard<'_, T> {
    fn drop(&mut self) {
        if !self.completed {
            *self.slot.lock() = SlotState::Uninitialized;
            self.slot.notify.notify_waiters();
        }
    }
}

impl<T> ConnectionSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Uninitialized),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A slot that starts out ready with `conn`.
    pub fn ready(conn: T) -> Self {
        Self {
            state: Mutex::new(SlotState::Ready(Arc::new(conn))),
            notify: Notify::new(),
        }
    }

    pub fn status(&self) -> SlotStatus {
        match &*self.lock() {
            SlotState::Uninitialized => SlotStatus::Uninitialized,
            SlotState::Rebuilding => SlotStatus::Rebuilding,
            SlotState::Ready(_) => SlotStatus::Ready,
        }
    }

    /// The ready connection, if any.
    pub fn get(&self) -> Option<Arc<T>> {
        match &*self.lock() {
            SlotState::Ready(conn) => Some(Arc::clone(conn)),
            _ => None,
        }
    }

    /// Returns the connection, running `init` if no caller has initialized it yet.
    pub async fn get_or_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            // Registered before the state check so a wakeup between check and await is kept.
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                match &*state {
                    SlotState::Ready(conn) => return Ok(Arc::clone(conn)),
                    SlotState::Rebuilding => {}
                    SlotState::Uninitialized => {
                        *state = SlotState::Rebuilding;
                        break;
                    }
                }
            }
            debug!("connection is rebuilding, waiting");
            notified.await;
        }

        let mut guard = RebuildGuard {
            slot: self,
            completed: false,
        };
        let conn = Arc::new(init().await?);
        *self.lock() = SlotState::Ready(Arc::clone(&conn));
        guard.completed = true;
        self.notify.notify_waiters();
        debug!("connection ready");
        Ok(conn)
    }

    /// Drops the ready connection so the next caller rebuilds it.
    pub fn reset(&self) {
        let mut state = self.lock();
        if matches!(&*state, SlotState::Ready(_)) {
            *state = SlotState::Uninitialized;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_initializes_once_under_concurrency() {
        let slot = Arc::new(ConnectionSlot::<String>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                slot.get_or_init(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, String>("conn".to_string())
                })
                .await
            }));
        }

        for handle in handles {
            let conn = handle.await.unwrap().unwrap();
            assert_eq!(conn.as_str(), "conn");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(slot.status(), SlotStatus::Ready);
    }

    #[tokio::test]
    async fn test_failed_init_returns_to_uninitialized() {
        let slot = ConnectionSlot::<u32>::new();
        let result = slot
            .get_or_init(|| async { Err::<u32, _>("refused") })
            .await;
        assert_eq!(result.err(), Some("refused"));
        assert_eq!(slot.status(), SlotStatus::Uninitialized);

        let conn = slot.get_or_init(|| async { Ok::<_, &str>(7) }).await.unwrap();
        assert_eq!(*conn, 7);
    }

    #[tokio::test]
    async fn test_reset() {
        let slot = ConnectionSlot::<u32>::new();
        slot.get_or_init(|| async { Ok::<_, ()>(1) }).await.unwrap();
        assert!(slot.get().is_some());
        slot.reset();
        assert_eq!(slot.status(), SlotStatus::Uninitialized);
        assert!(slot.get().is_none());
    }
}
