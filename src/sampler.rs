use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;

// SAMPLER (C2)
//
// Probabilistic 1-in-N admission filter. `sampling_active` is exposed per
// shard so C8/C9 (side channels, which may run on a different execution
// context than the packet that triggered them) can tell whether the
// current window is being sampled out — the spec treats the resulting race
// as acceptable loss (§9 open question 2), so this is a plain relaxed
// AtomicBool, not something requiring synchronization with the admit
// decision itself.
//
//   Sampler::new(sampling, shards) - one flag per shard
//   Sampler.admit(shard) -> bool - the 1-in-N coin flip, records the result
//   Sampler.sampling_active(shard) -> bool

pub struct Sampler {
    sampling: u32,
    active: Vec<AtomicBool>,
}

impl Sampler {
    pub fn new(sampling: u32, shards: usize) -> Sampler {
        let mut active = Vec::with_capacity(shards);
        active.resize_with(shards, || AtomicBool::new(false));
        Sampler { sampling, active }
    }

    pub fn admit(&self, shard: usize) -> bool {
        let admitted = self.sampling <= 1 || rand::thread_rng().gen::<u32>() % self.sampling == 0;
        self.active[shard].store(!admitted, Ordering::Relaxed);
        admitted
    }

    pub fn sampling_active(&self, shard: usize) -> bool {
        self.active[shard].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod selftest {
    use super::*;

    #[test]
    fn sampling_zero_or_one_admits_everything() {
        let s = Sampler::new(0, 1);
        for _ in 0..100 {
            assert!(s.admit(0));
        }
        let s = Sampler::new(1, 1);
        for _ in 0..100 {
            assert!(s.admit(0));
        }
    }

    #[test]
    fn sampling_n_admits_roughly_one_in_n() {
        let s = Sampler::new(10, 1);
        let admitted = (0..10_000).filter(|_| s.admit(0)).count();
        assert!(admitted > 500 && admitted < 1_500, "admitted={}", admitted);
    }
}
