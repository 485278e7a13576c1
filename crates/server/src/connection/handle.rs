//! Cross-thread access to a connection.
//!
//! The reactor owns every connection and never waits on a lock. Work
//! finished on other threads reaches a connection through a [`ConnHandle`]:
//! the worker takes the handle's lock without blocking, queues a
//! [`Deferred`] item and wakes the connection task, which applies the item
//! on the reactor thread. The reactor side only ever try-locks the outbox;
//! when a worker holds it the wakeup is re-armed and the items are picked
//! up on a later turn.
//!
//! The shared block is reference counted. The connection holds one
//! reference and every in-flight exchange (a `Responder` or `WsSender` on
//! a worker thread) holds another, so the block outlives whichever side
//! finishes last.

use crate::error::TryLockError;
use crate::http::ResponsePart;
use bytes::Bytes;
use micro_ws::FrameFlags;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use triomphe::Arc;
use uuid::Uuid;

/// Output produced off the reactor thread, applied by the owning protocol.
#[derive(Debug)]
pub enum Deferred {
    /// part of the response to the HTTP request in `slot`
    Http { slot: u64, part: ResponsePart },
    WsSend { flags: FrameFlags, payload: Bytes },
    WsClose { code: u16 },
}

/// How often [`ConnHandle::post`] retries a contended lock before giving up.
const POST_ATTEMPTS: usize = 64;

#[derive(Debug)]
struct Shared {
    id: Uuid,
    closing: AtomicBool,
    outbox: Mutex<Vec<Deferred>>,
    wakeup: Notify,
}

/// A cloneable, `Send + Sync` reference to one connection.
#[derive(Clone)]
pub struct ConnHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle").field("id", &self.shared.id).finish_non_exhaustive()
    }
}

impl ConnHandle {
    pub(crate) fn new(id: Uuid) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                closing: AtomicBool::new(false),
                outbox: Mutex::new(Vec::new()),
                wakeup: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Takes the connection lock without blocking.
    ///
    /// # Errors
    ///
    /// [`TryLockError::WouldBlock`] if another thread holds the lock and
    /// [`TryLockError::Gone`] once the connection is closing; in that case
    /// nothing queued would ever be sent.
    pub fn try_lock(&self) -> Result<ConnGuard<'_>, TryLockError> {
        if self.is_closing() {
            return Err(TryLockError::Gone);
        }
        let guard = self.shared.outbox.try_lock().ok_or(TryLockError::WouldBlock)?;
        Ok(ConnGuard { guard, wakeup: &self.shared.wakeup })
    }

    /// Queues `item` and wakes the connection. A contended lock is retried
    /// a bounded number of times, yielding the thread in between.
    ///
    /// # Errors
    ///
    /// [`TryLockError::Gone`] when the connection is closing and
    /// [`TryLockError::WouldBlock`] if the lock stayed contended.
    pub fn post(&self, item: Deferred) -> Result<(), TryLockError> {
        for _ in 0..POST_ATTEMPTS {
            match self.try_lock() {
                Ok(mut guard) => {
                    guard.push(item);
                    return Ok(());
                }
                Err(TryLockError::WouldBlock) => std::thread::yield_now(),
                Err(TryLockError::Gone) => return Err(TryLockError::Gone),
            }
        }
        Err(TryLockError::WouldBlock)
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    /// Refuses further items and drops queued ones. Items a worker is
    /// pushing right now are freed with the shared block.
    pub(crate) fn mark_closing(&self) {
        self.shared.closing.store(true, Ordering::Release);
        if let Some(mut items) = self.shared.outbox.try_lock() {
            items.clear();
        }
    }

    /// Takes the queued items without waiting. `None` means a worker holds
    /// the lock; the wakeup is re-armed so the items are taken later.
    pub(crate) fn take_outbox(&self) -> Option<Vec<Deferred>> {
        match self.shared.outbox.try_lock() {
            Some(mut items) => Some(std::mem::take(&mut *items)),
            None => {
                self.shared.wakeup.notify_one();
                None
            }
        }
    }

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.shared.wakeup.notified()
    }
}

/// Proof of holding a connection's lock.
pub struct ConnGuard<'a> {
    guard: MutexGuard<'a, Vec<Deferred>>,
    wakeup: &'a Notify,
}

impl fmt::Debug for ConnGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnGuard").field("queued", &self.guard.len()).finish()
    }
}

impl ConnGuard<'_> {
    /// Queues `item` and wakes the reactor side of the connection.
    pub fn push(&mut self, item: Deferred) {
        self.guard.push(item);
        self.wakeup.notify_one();
    }

    pub fn queued(&self) -> usize {
        self.guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use micro_ws::Opcode;
    use std::time::Duration;

    fn ws_text(text: &'static str) -> Deferred {
        Deferred::WsSend { flags: FrameFlags::new(true, Opcode::Text), payload: Bytes::from_static(text.as_bytes()) }
    }

    #[test]
    fn try_lock_fails_fast_when_contended() {
        let handle = ConnHandle::new(Uuid::now_v7());
        let held = handle.try_lock().unwrap();
        assert_eq!(handle.try_lock().unwrap_err(), TryLockError::WouldBlock);
        drop(held);
        assert!(handle.try_lock().is_ok());
    }

    #[test]
    fn closing_connection_is_gone() {
        let handle = ConnHandle::new(Uuid::now_v7());
        handle.post(ws_text("queued")).unwrap();
        handle.mark_closing();

        assert!(handle.is_closing());
        assert_eq!(handle.try_lock().unwrap_err(), TryLockError::Gone);
        assert_eq!(handle.post(ws_text("late")).unwrap_err(), TryLockError::Gone);
        assert!(handle.take_outbox().unwrap().is_empty());
    }

    #[test]
    fn posts_from_worker_threads_arrive_in_order() {
        let handle = ConnHandle::new(Uuid::now_v7());
        let worker = handle.clone();
        std::thread::spawn(move || {
            for code in [1000, 1001, 1002] {
                worker.post(Deferred::WsClose { code }).unwrap();
            }
        })
        .join()
        .unwrap();

        let codes: Vec<u16> = handle
            .take_outbox()
            .unwrap()
            .into_iter()
            .map(|item| match item {
                Deferred::WsClose { code } => code,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(codes, [1000, 1001, 1002]);
        assert!(handle.take_outbox().unwrap().is_empty());
    }

    #[tokio::test]
    async fn post_wakes_the_connection() {
        let handle = ConnHandle::new(Uuid::now_v7());
        let worker = handle.clone();
        std::thread::spawn(move || worker.post(ws_text("hi")).unwrap());

        tokio::time::timeout(Duration::from_secs(5), handle.notified()).await.unwrap();
        assert_eq!(handle.take_outbox().unwrap().len(), 1);
    }

    #[test]
    fn reactor_side_never_waits_for_a_held_guard() {
        let handle = ConnHandle::new(Uuid::now_v7());
        let worker = handle.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let mut guard = worker.try_lock().unwrap();
            guard.push(ws_text("held"));
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });
        locked_rx.recv().unwrap();
        {
            // permit from the push
            let pushed = handle.notified();
            tokio::pin!(pushed);
            assert!(pushed.as_mut().enable());
        }

        let start = std::time::Instant::now();
        assert!(handle.take_outbox().is_none());
        assert!(!handle.is_closing());
        assert!(start.elapsed() < Duration::from_millis(100));
        holder.join().unwrap();

        // the contended take re-armed the wakeup
        let notified = handle.notified();
        tokio::pin!(notified);
        assert!(notified.as_mut().enable());
        assert_eq!(handle.take_outbox().unwrap().len(), 1);
    }

    #[test]
    fn closing_while_a_guard_is_held_does_not_wait() {
        let handle = ConnHandle::new(Uuid::now_v7());
        let guard = handle.try_lock().unwrap();

        let start = std::time::Instant::now();
        handle.mark_closing();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(handle.is_closing());
        drop(guard);
        assert_eq!(handle.try_lock().unwrap_err(), TryLockError::Gone);
    }

    #[test]
    fn post_gives_up_on_a_lock_that_stays_contended() {
        let handle = ConnHandle::new(Uuid::now_v7());
        let _held = handle.try_lock().unwrap();
        assert_eq!(handle.post(ws_text("late")).unwrap_err(), TryLockError::WouldBlock);
    }

    #[test]
    fn handle_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConnHandle>();
    }
}
