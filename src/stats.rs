//! # Stats
//!
//! Noise suppression for timing samples. Scheduler jitter and interrupts produce heavy-tailed
//! outliers, so samples are reduced with the median rather than the mean, and sweep outcomes
//! from independent rounds are combined by majority vote.
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Sample types that can report the midpoint of two values
pub trait Midpoint: Copy + PartialOrd + Default {
    fn average(a: Self, b: Self) -> Self;
}

macro_rules! impl_midpoint_unsigned {
    ($($ty:ty),*) => {
        $(
            impl Midpoint for $ty {
                fn average(a: Self, b: Self) -> Self {
                    // floor((a + b) / 2) without overflowing
                    (a & b) + ((a ^ b) >> 1)
                }
            }
        )*
    };
}

impl_midpoint_unsigned!(u32, u64, usize);

impl Midpoint for f64 {
    fn average(a: Self, b: Self) -> Self {
        (a + b) / 2.0
    }
}

/// Median of `samples`, sorting them in place. Even lengths average the two middle values, an
/// empty slice yields the default value.
pub fn median<T: Midpoint>(samples: &mut [T]) -> T {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mid = samples.len() / 2;
    match samples.len() {
        0 => T::default(),
        n if n % 2 == 1 => samples[mid],
        _ => T::average(samples[mid - 1], samples[mid]),
    }
}

/// Vote counts per candidate value, ordered by candidate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    votes: BTreeMap<usize, usize>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vote(&mut self, candidate: usize) {
        *self.votes.entry(candidate).or_insert(0) += 1;
    }

    pub fn count(&self, candidate: usize) -> usize {
        self.votes.get(&candidate).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.votes.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// (candidate, votes) pairs in ascending candidate order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.votes.iter().map(|(&candidate, &votes)| (candidate, votes))
    }

    /// Candidate with the most votes. Ties go to the smallest candidate.
    pub fn mode(&self) -> Option<(usize, usize)> {
        self.iter().fold(None, |best, (candidate, votes)| match best {
            Some((_, best_votes)) if best_votes >= votes => best,
            _ => Some((candidate, votes)),
        })
    }

    /// Winning candidate, or zero when nothing was ever voted for
    pub fn winner(&self) -> usize {
        self.mode().map(|(candidate, _)| candidate).unwrap_or(0)
    }
}
