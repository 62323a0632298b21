//! # Associativity and size sweep
//!
//! For every stride, grows the number of chased buckets two at a time and watches for the time
//! per access to rise sharply. The last bucket count before the rise is a candidate
//! associativity, and that count times the stride a candidate cache size. The whole search is
//! repeated for several rounds and each quantity is settled by majority vote.
use crate::calibration::{JumpPolicy, WayCalibration};
use crate::chase::WayProbe;
use crate::stats::{FrequencyTable, median};
use log::{debug, info};

/// A (stride, associativity) pair that fit right before the timing jumped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub stride: usize,
    pub assoc: usize,
}

impl Hit {
    pub fn cache_size(&self) -> usize {
        self.stride * self.assoc
    }
}

/// Votes collected across rounds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeometryVotes {
    pub sizes: FrequencyTable,
    pub associativities: FrequencyTable,
}

impl GeometryVotes {
    pub fn record(&mut self, hits: &[Hit]) {
        for hit in hits {
            self.associativities.vote(hit.assoc);
            self.sizes.vote(hit.cache_size());
        }
    }

    /// Most voted size and associativity, picked independently of each other
    pub fn resolve(&self) -> GeometryReport {
        GeometryReport {
            cache_size: self.sizes.winner(),
            associativity: self.associativities.winner(),
            votes: self.clone(),
        }
    }
}

/// Outcome of the associativity and size sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryReport {
    /// Cache size in bytes, zero when undetected
    pub cache_size: usize,
    /// Number of ways, zero when undetected
    pub associativity: usize,
    pub votes: GeometryVotes,
}

/// Median chase time for one (stride, associativity) pair
fn measure<P: WayProbe>(probe: &mut P, stride: usize, assoc: usize, trials: usize) -> u64 {
    let mut samples: Vec<u64> = (0..trials).map(|_| probe.sample(stride, assoc)).collect();
    median(&mut samples)
}

/// Scan the associativity candidates for one stride and return every jump found
pub fn scan_stride<P: WayProbe>(probe: &mut P, stride: usize, cal: &WayCalibration) -> Vec<Hit> {
    let mut hits = Vec::new();
    let mut previous: Option<(usize, u64)> = None;

    for assoc in cal.associativities() {
        let time = measure(probe, stride, assoc, cal.trials);
        debug!("Stride {} B, {} ways: {} ns per access", stride, assoc, time);

        if let Some((previous_assoc, previous_time)) = previous {
            if previous_time > 0 && (previous_time as f64) * cal.threshold < time as f64 {
                hits.push(Hit {
                    stride,
                    assoc: previous_assoc,
                });
                if cal.policy == JumpPolicy::FirstOnly {
                    break;
                }
            }
        }
        previous = Some((assoc, time));
    }

    hits
}

/// One full pass over every stride
pub fn sweep_round<P: WayProbe>(probe: &mut P, cal: &WayCalibration) -> Vec<Hit> {
    let mut hits = Vec::new();
    for stride in cal.strides() {
        hits.extend(scan_stride(probe, stride, cal));
    }
    hits
}

/// Run every round, vote, and pick the most frequent size and associativity
pub fn sweep<P: WayProbe>(probe: &mut P, cal: &WayCalibration) -> GeometryReport {
    let mut votes = GeometryVotes::default();

    for round in 1..=cal.rounds {
        println!("Round {}/{} started", round, cal.rounds);
        let hits = sweep_round(probe, cal);
        debug!("Round {} found {} jumps: {:?}", round, hits.len(), hits);
        votes.record(&hits);
        println!("Round {}/{} finished\n", round, cal.rounds);
    }

    votes.resolve()
}

/// Log the full vote distribution of both tables
pub fn log_votes(report: &GeometryReport) {
    for (size, count) in report.votes.sizes.iter() {
        info!("Cache size candidate {:>8} B: {} votes", size, count);
    }
    for (assoc, count) in report.votes.associativities.iter() {
        info!("Associativity candidate {:>3} ways: {} votes", assoc, count);
    }
}
