//! # Pointer chase
//!
//! Builds a cyclic chain of `assoc` buckets spaced `stride` bytes apart inside a word buffer and
//! times how long it takes to follow it. Every hop depends on the value loaded by the previous
//! one, so the CPU cannot overlap the loads and the time per hop reflects where the buckets live
//! in the memory hierarchy. Once `assoc` exceeds the number of ways of the cache set the buckets
//! map to, they start evicting each other and the time per hop jumps.
//!
//! The bucket order is shuffled with a fresh permutation before every trial so the chain never
//! settles into a fixed pattern a prefetcher could learn.
use crate::WORD_SIZE;
use crate::buffer::ProbeBuffer;
use crate::clock::Clock;
use rand::Rng;
use rand::seq::SliceRandom;
use std::hint::black_box;

/// Source of "time per access" samples for a (stride, associativity) pair
pub trait WayProbe {
    /// One sample in nanoseconds per access for buckets `stride` bytes apart, `assoc` of them
    fn sample(&mut self, stride: usize, assoc: usize) -> u64;
}

impl<F> WayProbe for F
where
    F: FnMut(usize, usize) -> u64,
{
    fn sample(&mut self, stride: usize, assoc: usize) -> u64 {
        self(stride, assoc)
    }
}

/// Rewrite `buffer` so that following links from cell 0 cycles through `assoc` buckets, `step`
/// words apart, in a random order.
pub fn shuffle_chain<R: Rng + ?Sized>(buffer: &mut [usize], step: usize, assoc: usize, rng: &mut R) {
    let bufsize = buffer.len();
    debug_assert!(assoc >= 1 && assoc <= bufsize);
    debug_assert!(assoc * step < bufsize || step == 0);

    let mut order: Vec<usize> = (0..assoc).collect();
    order.shuffle(rng);

    for (i, &bucket) in order.iter().enumerate() {
        let next = order[(i + 1) % assoc];
        buffer[bucket * step % bufsize] = next * step % bufsize;
    }
}

/// Follow the chain: `assoc` warm-up hops, then `buffer.len()` hops, both from cell 0. Returns a
/// value derived from both end positions so neither walk can be optimized out.
#[inline(never)]
pub fn walk_chain(buffer: &[usize], assoc: usize) -> usize {
    let mut at = 0;
    for _ in 0..assoc {
        at = buffer[at];
    }
    let warm = at;

    at = 0;
    for _ in 0..buffer.len() {
        at = buffer[at];
    }

    warm.wrapping_add(at)
}

/// Pointer-chase timer over an owned buffer
pub struct ChaseTimer<R, C> {
    buffer: ProbeBuffer<usize>,
    rng: R,
    clock: C,
    /// Timed walks per shuffled layout, averaged into one sample
    repeats: usize,
}

impl<R: Rng, C: Clock> ChaseTimer<R, C> {
    pub fn new(buffer: ProbeBuffer<usize>, rng: R, clock: C, repeats: usize) -> Self {
        ChaseTimer {
            buffer,
            rng,
            clock,
            repeats: repeats.max(1),
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

impl<R: Rng, C: Clock> WayProbe for ChaseTimer<R, C> {
    fn sample(&mut self, stride: usize, assoc: usize) -> u64 {
        let step = stride / WORD_SIZE;
        let bufsize = self.buffer.len() as u64;

        shuffle_chain(&mut self.buffer, step, assoc, &mut self.rng);

        let mut total = 0u64;
        for _ in 0..self.repeats {
            let start = self.clock.now_ns();
            let end = walk_chain(&self.buffer, assoc);
            let elapsed = self.clock.now_ns().saturating_sub(start);
            black_box(end);

            total += elapsed / bufsize;
        }

        total / self.repeats as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PageSize;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    /// Clock that advances by a fixed amount on every reading
    struct TickClock {
        now: u64,
        tick: u64,
    }

    impl Clock for TickClock {
        fn now_ns(&mut self) -> u64 {
            self.now += self.tick;
            self.now
        }
    }

    fn assert_single_cycle(buffer: &[usize], step: usize, assoc: usize) {
        let mut seen = HashSet::new();
        let mut at = 0;
        for _ in 0..assoc {
            assert!(seen.insert(at), "offset {} visited twice before the cycle closed", at);
            assert_eq!(at % step.max(1), 0);
            at = buffer[at];
        }
        assert_eq!(at, 0, "chain did not return to its start after {} hops", assoc);
        assert_eq!(seen.len(), assoc);
    }

    #[test]
    fn chain_cycles_through_every_bucket() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut buffer = vec![0usize; 4096];

        for assoc in [1, 2, 3, 8, 16, 31] {
            let step = 4096 / (assoc + 1);
            shuffle_chain(&mut buffer, step, assoc, &mut rng);
            assert_single_cycle(&buffer, step, assoc);
        }
    }

    #[test]
    fn reshuffling_keeps_the_cycle_property() {
        let mut rng = ChaCha8Rng::seed_from_u64(1234);
        let mut buffer = vec![0usize; 1 << 16];
        let step = 4096 / WORD_SIZE;

        for _ in 0..20 {
            shuffle_chain(&mut buffer, step, 12, &mut rng);
            assert_single_cycle(&buffer, step, 12);
        }
    }

    #[test]
    fn shuffles_explore_different_orders() {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut buffer = vec![0usize; 1024];

        let mut layouts = HashSet::new();
        for _ in 0..10 {
            shuffle_chain(&mut buffer, 32, 16, &mut rng);
            layouts.insert(buffer.clone());
        }
        assert!(layouts.len() > 1);
    }

    #[test]
    fn same_seed_gives_same_layout() {
        let mut a = vec![0usize; 1024];
        let mut b = vec![0usize; 1024];
        shuffle_chain(&mut a, 16, 10, &mut ChaCha8Rng::seed_from_u64(5));
        shuffle_chain(&mut b, 16, 10, &mut ChaCha8Rng::seed_from_u64(5));
        assert_eq!(a, b);
    }

    #[test]
    fn walk_ends_back_at_start_when_length_is_multiple_of_cycle() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut buffer = vec![0usize; 1024];
        shuffle_chain(&mut buffer, 8, 8, &mut rng);

        // both walks are whole multiples of the 8 hop cycle
        assert_eq!(walk_chain(&buffer, 8), 0);
    }

    #[test]
    fn timer_normalizes_per_element() {
        let page = PageSize::new(4096).unwrap();
        let buffer = ProbeBuffer::zeroed(page, 1024).unwrap();
        let clock = TickClock { now: 0, tick: 10_240 };
        let mut timer = ChaseTimer::new(buffer, ChaCha8Rng::seed_from_u64(0), clock, 3);

        // every walk spans one tick: 10240 ns over 1024 cells
        assert_eq!(timer.sample(512, 4), 10);
        assert_eq!(timer.buffer_len(), 1024);
    }

    #[test]
    fn closures_are_way_probes() {
        let mut probe = |stride: usize, assoc: usize| (stride * assoc) as u64;
        assert_eq!(probe.sample(1024, 4), 4096);
    }
}
