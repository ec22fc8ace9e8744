use crate::challenge::Collection;
use crate::clock::Clock;
use crate::config::GateConfig;
use arc_swap::{ArcSwap, Guard};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Process-wide immutable-after-startup context shared by every request
/// handler and background task: the three generation pointers plus the clock
/// and config they're built from.
///
/// Mirrors the "bundle process-wide mutable singletons into an
/// immutable-after-startup context" guidance (spec.md §9): `GateState` itself
/// never changes shape after `bootstrap`, only the `ArcSwap` slots inside it do.
pub struct GateState {
    pub config: GateConfig,
    pub clock: Arc<Clock>,
    prev: ArcSwap<Collection>,
    current: ArcSwap<Collection>,
    next: ArcSwap<Collection>,
}

impl GateState {
    /// Synchronously build the first collection for the current bucket and
    /// publish it into all three slots, so request handlers always see valid
    /// pointers (`initPow` in the original gate).
    pub fn bootstrap(config: GateConfig, clock: Arc<Clock>) -> Arc<Self> {
        let now = clock.now();
        let barrier = now >> config.regen_interval_bits;
        info!(barrier, "building initial proof-of-work collection");
        let initial = Arc::new(Collection::build(
            barrier,
            now,
            config.no_challenges,
            config.pow_secret.as_bytes(),
            config.pbkdf2_iterations,
            true,
        ));

        Arc::new(Self {
            config,
            clock,
            prev: ArcSwap::from(initial.clone()),
            current: ArcSwap::from(initial.clone()),
            next: ArcSwap::from(initial),
        })
    }

    pub fn current(&self) -> Guard<Arc<Collection>> {
        self.current.load()
    }

    pub fn prev(&self) -> Guard<Arc<Collection>> {
        self.prev.load()
    }
}

/// Drive rotation forever on a 100ms tick: promote `next -> current -> prev` at
/// bucket boundaries, eagerly generate the following bucket's collection.
///
/// This is the sole writer of the three pointers (spec.md §4.4 invariant);
/// request handlers only ever call the read accessors above.
pub async fn run_rotation(state: Arc<GateState>) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    let mut last_delta_t: f64 = 0.0;

    loop {
        interval.tick().await;

        let now = state.clock.now();
        let barrier = now >> state.config.regen_interval_bits;
        let current_barrier = state.current.load().barrier;

        if current_barrier < barrier {
            info!(barrier, "activating proof-of-work challenges");
            let promoted_current = state.current.load_full();
            state.prev.store(promoted_current);
            let promoted_next = state.next.load_full();
            state.current.store(promoted_next);

            let time_to_next_boundary = (((barrier + 1) << state.config.regen_interval_bits)
                .saturating_sub(now)) as f64;
            if last_delta_t * 1.05 > time_to_next_boundary {
                let sleep_for = time_to_next_boundary * 1.05;
                warn!(
                    last_delta_t,
                    sleep_for, "generation ran long, resynchronizing to the next bucket boundary"
                );
                tokio::time::sleep(Duration::from_secs_f64(sleep_for.max(0.0))).await;
                continue;
            }
        }

        let next_barrier = state.next.load().barrier;
        if next_barrier <= barrier {
            let target = barrier + 1;
            let cfg = &state.config;
            let created = now;
            let (collection, delta_t) = crate::challenge::time_build(|| {
                Collection::build(
                    target,
                    created,
                    cfg.no_challenges,
                    cfg.pow_secret.as_bytes(),
                    cfg.pbkdf2_iterations,
                    false,
                )
            });
            info!(barrier = target, delta_t, "generated next proof-of-work collection");
            state.next.store(Arc::new(collection));
            last_delta_t = delta_t;

            let interval_secs = (1u64 << state.config.regen_interval_bits) as f64;
            if delta_t >= interval_secs {
                warn!(
                    delta_t,
                    interval_secs, "generation is slower than the regen interval"
                );
            }
        }
    }
}
