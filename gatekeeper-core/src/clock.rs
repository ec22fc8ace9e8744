use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Monotonic-ish cached wall clock, updated by a single writer every 100ms.
///
/// Readers load the cached value atomically instead of calling into the OS on
/// every request, so request-path epoch-bucket arithmetic never pays a syscall
/// and stays coherent with the rest of the gate's background tasks.
#[derive(Debug)]
pub struct Clock {
    unix_time: AtomicU64,
}

impl Clock {
    /// Build a clock seeded with the current wall-clock time.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            unix_time: AtomicU64::new(now_unix_secs()),
        })
    }

    /// Whole seconds since the epoch, possibly stale by up to ~100ms.
    #[inline]
    pub fn now(&self) -> u64 {
        self.unix_time.load(Ordering::Relaxed)
    }

    fn tick(&self) {
        self.unix_time.store(now_unix_secs(), Ordering::Relaxed);
    }

    /// Spawn the single writer task that ticks this clock every 100ms.
    ///
    /// Runs for process lifetime; never returns under normal operation.
    pub fn spawn_updater(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let clock = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(100));
            loop {
                interval.tick().await;
                clock.tick();
            }
        })
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
