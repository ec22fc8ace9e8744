use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::sync::OnceLock;
use std::time::Instant;

type HmacSha256 = Hmac<Sha256>;

/// One PoW puzzle: a public `secret` disclosed to the client and the private
/// `proof` the server expects back.
///
/// `proof` is filled in exactly once by a solver worker during `Collection`
/// construction; `OnceLock` gives us "immutable after publication" for free
/// instead of relying on discipline, matching spec.md's Challenge invariant.
#[derive(Debug)]
pub struct Challenge {
    pub idx: u32,
    pub secret: [u8; 32],
    proof: OnceLock<String>,
}

impl Challenge {
    /// Input is `LE64(barrier) || byte(idx)` — the corrected 9-byte layout
    /// (spec.md §9 open question 2), not the original's overwritten buffer.
    fn new(barrier: u64, idx: u32, pow_secret: &[u8]) -> Self {
        let mut input = [0u8; 9];
        input[..8].copy_from_slice(&barrier.to_le_bytes());
        input[8] = idx as u8;

        let mut mac = HmacSha256::new_from_slice(pow_secret).expect("HMAC accepts any key length");
        mac.update(&input);
        let digest = mac.finalize().into_bytes();
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&digest);

        Self {
            idx,
            secret,
            proof: OnceLock::new(),
        }
    }

    fn solve(&self, iterations: u32) {
        let mut out = [0u8; 32];
        pbkdf2_hmac::<Sha256>(&self.secret, b"", iterations, &mut out);
        let _ = self.proof.set(hex::encode(out));
    }

    /// The solved PBKDF2 proof. Panics if called before the collection that
    /// owns this challenge finished solving — a programmer error, since
    /// collections are only published after every challenge is solved.
    pub fn proof(&self) -> &str {
        self.proof
            .get()
            .expect("Challenge::proof read before the collection finished solving")
    }

    /// Base64(standard)-encoded public secret, served to the client.
    pub fn secret_b64(&self) -> String {
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, self.secret)
    }
}

/// The full set of `N` challenges valid for one epoch bucket.
#[derive(Debug)]
pub struct Collection {
    pub barrier: u64,
    pub created: u64,
    pub challenges: Vec<Challenge>,
}

impl Collection {
    /// Build and fully solve a collection for `barrier`, parallelized across a
    /// worker pool sized `max(1, NCPU/2)`, doubled when `cold_start` is true
    /// (process bootstrap, before any `current` collection exists) to cut
    /// startup latency.
    ///
    /// Grounded on the scheduler/worker-pool split in
    /// `other_examples::zolagonano-rspow::kpow::solve_parallel`: puzzles are
    /// handed out through a bounded channel instead of index-stealing atomics,
    /// matching spec.md §4.3's "bounded channel" requirement.
    pub fn build(barrier: u64, created: u64, no_challenges: u32, pow_secret: &[u8], pbkdf2_iterations: u32, cold_start: bool) -> Self {
        let challenges: Vec<Challenge> = (0..no_challenges)
            .map(|idx| Challenge::new(barrier, idx, pow_secret))
            .collect();

        solve_all(&challenges, pbkdf2_iterations, cold_start);

        Self {
            barrier,
            created,
            challenges,
        }
    }
}

fn worker_count(cold_start: bool) -> usize {
    let base = (num_cpus::get() / 2).max(1);
    if cold_start {
        base * 2
    } else {
        base
    }
}

/// Solve every challenge in `challenges`, distributing work over a bounded
/// channel to a pool of `worker_count` threads. Returns once every challenge
/// has a proof.
fn solve_all(challenges: &[Challenge], pbkdf2_iterations: u32, cold_start: bool) {
    let workers = worker_count(cold_start);
    let (tx, rx) = crossbeam_channel::bounded::<&Challenge>(workers * 2);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let rx = rx.clone();
            scope.spawn(move || {
                for challenge in rx {
                    challenge.solve(pbkdf2_iterations);
                }
            });
        }

        for challenge in challenges {
            // Channel only ever has live receivers for the duration of this scope.
            tx.send(challenge).expect("solver workers outlive the send loop");
        }
        drop(tx);
    });
}

/// Wall-clock timer for generation, used by the rotation scheduler to detect
/// capacity overruns (spec.md §4.4).
pub fn time_build<T>(f: impl FnOnce() -> T) -> (T, f64) {
    let start = Instant::now();
    let value = f();
    (value, start.elapsed().as_secs_f64())
}
