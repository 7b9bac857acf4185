//! Cross-thread wake-queue.
//!
//! Multi-producer / single-consumer job queue feeding one event loop. Any
//! thread may push; only the owning loop drains. Pushing never blocks: the
//! channel is unbounded and the poller is woken at most once per drain cycle.

use crate::error::{CoreError, Result};
use mio::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Create a wake-queue bound to the poller owning `waker`.
#[must_use]
pub fn wake_queue<T>(waker: Arc<Waker>) -> (WakeSender<T>, WakeQueue<T>) {
    let (tx, rx) = flume::unbounded();
    let pending = Arc::new(AtomicBool::new(false));
    (
        WakeSender {
            tx,
            pending: Arc::clone(&pending),
            waker,
        },
        WakeQueue { rx, pending },
    )
}

/// Producer half; cheap to clone and safe to share across threads.
pub struct WakeSender<T> {
    tx: flume::Sender<T>,
    pending: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl<T> Clone for WakeSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
            waker: Arc::clone(&self.waker),
        }
    }
}

impl<T> std::fmt::Debug for WakeSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeSender")
            .field("queued", &self.tx.len())
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> WakeSender<T> {
    /// Enqueue a job and wake the owning loop.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueueClosed`] when the loop has stopped, or an IO
    /// error if the waker could not be signalled.
    pub fn push(&self, job: T) -> Result<()> {
        self.tx.send(job).map_err(|_| CoreError::QueueClosed)?;
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.waker.wake()?;
        }
        Ok(())
    }

    /// Wake the owning loop without enqueueing anything.
    pub fn notify(&self) -> Result<()> {
        self.waker.wake()?;
        Ok(())
    }

    /// Whether the consumer half has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_disconnected()
    }
}

/// Consumer half, owned by the loop thread.
pub struct WakeQueue<T> {
    rx: flume::Receiver<T>,
    pending: Arc<AtomicBool>,
}

impl<T> WakeQueue<T> {
    /// Apply every job present when the drain starts, in FIFO order.
    ///
    /// Jobs pushed while draining stay queued for the next drain; their
    /// producers re-arm the waker. Returns the number of jobs applied.
    pub fn drain<F: FnMut(T)>(&self, mut f: F) -> usize {
        self.pending.store(false, Ordering::Release);

        let batch = self.rx.len();
        let mut applied = 0;
        while applied < batch {
            match self.rx.try_recv() {
                Ok(job) => {
                    f(job);
                    applied += 1;
                }
                Err(_) => break,
            }
        }
        applied
    }
}
