//! Debounced persistence.
//!
//! A [`PersistenceTrigger`] coalesces bursts of mutations into a single
//! delayed flush. It moves through three states:
//!
//! ```text
//!   arm()            delay elapsed          flush done
//! Idle ─────▶ Armed ───────────────▶ Flushing ─────────▶ Idle
//!              ▲ arm(): no-op          │ arm(): remember
//!              └───────────────────────┘ re-arm on completion
//! ```
//!
//! A mutation that lands while a flush is running is never lost: the trigger
//! re-arms as soon as that flush completes.

use crate::error::PersistError;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Delay between the first unsaved change and the flush.
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_secs(30);

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const FLUSHING: u8 = 2;

type FlushFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), PersistError>> + Send + Sync>;

/// Observable state of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Armed,
    Flushing,
}

/// Cheap, cloneable handle to the process-wide save latch.
#[derive(Clone)]
pub struct PersistenceTrigger {
    inner: Arc<TriggerInner>,
}

struct TriggerInner {
    state: AtomicU8,
    rearm: AtomicBool,
    // Bumped on every Idle -> Armed transition so a stale timer can tell it
    // no longer owns the armed state.
    epoch: AtomicU64,
    flushes: AtomicU64,
    delay: Duration,
    flush: RwLock<Option<FlushFn>>,
}

impl std::fmt::Debug for PersistenceTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceTrigger")
            .field("state", &self.state())
            .field("delay", &self.inner.delay)
            .field("flushes", &self.flush_count())
            .finish()
    }
}

impl PersistenceTrigger {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Arc::new(TriggerInner {
                state: AtomicU8::new(IDLE),
                rearm: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
                delay,
                flush: RwLock::new(None),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Install the action run when the trigger fires.
    pub fn set_flush<F, Fut>(&self, flush: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PersistError>> + Send + 'static,
    {
        let flush: FlushFn = Arc::new(move || Box::pin(flush()));
        *self.inner.flush.write() = Some(flush);
    }

    pub fn state(&self) -> TriggerState {
        match self.inner.state.load(Ordering::Acquire) {
            ARMED => TriggerState::Armed,
            FLUSHING => TriggerState::Flushing,
            _ => TriggerState::Idle,
        }
    }

    /// Number of flush attempts completed so far, failed ones included.
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.load(Ordering::Acquire)
    }

    /// Request a flush after the delay. Returns immediately; calling it while
    /// already armed is a no-op.
    pub fn arm(&self) {
        let inner = &self.inner;
        loop {
            match inner
                .state
                .compare_exchange(IDLE, ARMED, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    inner.rearm.store(false, Ordering::Release);
                    let epoch = inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;
                    self.schedule(epoch);
                    return;
                }
                Err(ARMED) => return,
                Err(_) => {
                    inner.rearm.store(true, Ordering::Release);
                    if inner.state.load(Ordering::Acquire) == FLUSHING {
                        return;
                    }
                    // The flush completed before it could see the flag.
                }
            }
        }
    }

    /// Flush immediately, whatever the current state. Used on shutdown.
    pub async fn flush_now(&self) {
        loop {
            let current = self.inner.state.load(Ordering::Acquire);
            if current == FLUSHING {
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
            if self
                .inner
                .state
                .compare_exchange(current, FLUSHING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
        self.inner.rearm.store(false, Ordering::Release);
        self.run_flush().await;
        self.finish();
    }

    fn schedule(&self, epoch: u64) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available, save request dropped");
                self.inner.state.store(IDLE, Ordering::Release);
                return;
            }
        };
        let trigger = self.clone();
        debug!(delay = ?self.inner.delay, "Save scheduled");
        handle.spawn(async move {
            tokio::time::sleep(trigger.inner.delay).await;
            trigger.fire(epoch).await;
        });
    }

    async fn fire(&self, epoch: u64) {
        if self.inner.epoch.load(Ordering::Acquire) != epoch {
            return;
        }
        if self
            .inner
            .state
            .compare_exchange(ARMED, FLUSHING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // Everything armed up to here is covered by this flush.
        self.inner.rearm.store(false, Ordering::Release);
        self.run_flush().await;
        self.finish();
    }

    async fn run_flush(&self) {
        let flush = self.inner.flush.read().clone();
        match flush {
            Some(flush) => match flush().await {
                Ok(()) => info!("Configuration snapshot saved"),
                Err(e) => error!(error = %e, "Failed to save configuration snapshot"),
            },
            None => debug!("No flush action installed"),
        }
        self.inner.flushes.fetch_add(1, Ordering::AcqRel);
    }

    fn finish(&self) {
        self.inner.state.store(IDLE, Ordering::Release);
        if self.inner.rearm.swap(false, Ordering::AcqRel) {
            debug!("Changes arrived during flush, re-arming");
            self.arm();
        }
    }
}
