use serde::{Deserialize, Serialize};

/// Tiny deterministic RNG used by the simulator.
///
/// Reproducible across platforms so a failing seed replays identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    /// Next pseudo-random `u64`.
    pub const fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        // High bits of an LCG are the well-mixed ones.
        self.state ^ (self.state >> 29)
    }

    /// Next value in `[0, upper_exclusive)`; `0` when the bound is `0`.
    pub const fn next_bounded(&mut self, upper_exclusive: u64) -> u64 {
        if upper_exclusive == 0 {
            return 0;
        }
        self.next_u64() % upper_exclusive
    }

    /// Index in `[0, len)`; `0` for an empty range.
    pub fn next_index(&mut self, len: usize) -> usize {
        let bound = u64::try_from(len).unwrap_or(u64::MAX);
        usize::try_from(self.next_bounded(bound)).unwrap_or(0)
    }

    /// Bernoulli trial with integer percent.
    pub fn hit_rate_percent(&mut self, percent: u8) -> bool {
        if percent == 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.next_bounded(100) < u64::from(percent)
    }

    /// Uniformly pick one element.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            items.get(self.next_index(items.len()))
        }
    }

    /// Fisher-Yates shuffle in place.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_index(i + 1);
            items.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = DeterministicRng::new(9);
        let mut b = DeterministicRng::new(9);
        for _ in 0..32 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        assert_ne!(DeterministicRng::new(1).next_u64(), DeterministicRng::new(2).next_u64());
    }

    #[test]
    fn bounded_draws_stay_in_range() {
        let mut rng = DeterministicRng::new(3);
        for _ in 0..1_000 {
            assert!(rng.next_bounded(7) < 7);
            assert!(rng.next_index(3) < 3);
        }
        assert_eq!(rng.next_bounded(0), 0);
        assert_eq!(rng.next_index(0), 0);
    }

    #[test]
    fn percent_extremes_are_exact() {
        let mut rng = DeterministicRng::new(5);
        assert!((0..100).all(|_| !rng.hit_rate_percent(0)));
        assert!((0..100).all(|_| rng.hit_rate_percent(100)));
    }

    #[test]
    fn choose_and_shuffle_cover_inputs() {
        let mut rng = DeterministicRng::new(11);
        let empty: [u8; 0] = [];
        assert_eq!(rng.choose(&empty), None);
        assert_eq!(rng.choose(&[4]), Some(&4));

        let mut items: Vec<u32> = (0..50).collect();
        rng.shuffle(&mut items);
        assert_ne!(items, (0..50).collect::<Vec<_>>());
        items.sort_unstable();
        assert_eq!(items, (0..50).collect::<Vec<_>>());
    }
}
