//! # Line-size sweep
//!
//! Runs the sequential-stride timer for every candidate stride and looks for the first stride at
//! which the pass time falls sharply compared to the previous one. The previous candidate is
//! the last one still touching two addresses within one line, and the line size is taken as half
//! of it. No drop means the line size is unknown and is reported as zero.
use crate::calibration::LineCalibration;
use crate::format_size_fixed_int;
use crate::stats::median;
use crate::stride::LineProbe;
use log::{debug, info};
use std::collections::BTreeMap;

/// Timing of one candidate next to its predecessor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub previous_line: usize,
    pub line: usize,
    pub previous_time: u64,
    pub time: u64,
}

impl Transition {
    /// How many times faster this candidate ran than the previous one
    pub fn ratio(&self) -> f64 {
        self.previous_time as f64 / self.time as f64
    }

    pub fn is_drop(&self, threshold: f64) -> bool {
        (self.time as f64) * threshold < self.previous_time as f64
    }
}

/// Outcome of a line-size sweep
#[derive(Debug, Clone, PartialEq)]
pub struct LineSizeReport {
    /// Detected line size in bytes, zero when undetected
    pub line_size: usize,
    /// Median pass time per candidate line size
    pub timings: BTreeMap<usize, u64>,
}

impl LineSizeReport {
    pub fn is_detected(&self) -> bool {
        self.line_size != 0
    }

    /// Neighbouring pairs of the timing table, in candidate order
    pub fn transitions(&self) -> Vec<Transition> {
        transitions(&self.timings)
    }
}

fn transitions(timings: &BTreeMap<usize, u64>) -> Vec<Transition> {
    timings
        .iter()
        .zip(timings.iter().skip(1))
        .map(|((&previous_line, &previous_time), (&line, &time))| Transition {
            previous_line,
            line,
            previous_time,
            time,
        })
        .collect()
}

/// Median pass time for every candidate line size
pub fn measure_timings<P: LineProbe>(probe: &mut P, cal: &LineCalibration) -> BTreeMap<usize, u64> {
    let mut timings = BTreeMap::new();
    for line in cal.candidates() {
        let mut samples: Vec<u64> = (0..cal.trials).map(|_| probe.sample(line)).collect();
        let time = median(&mut samples);
        debug!("Stride {} B: {} ns per pass", line, time);
        timings.insert(line, time);
    }
    timings
}

/// Line size implied by the first sharp drop in `timings`, or zero if there is none
pub fn detect_line_size(timings: &BTreeMap<usize, u64>, threshold: f64) -> usize {
    transitions(timings)
        .into_iter()
        .find(|transition| transition.is_drop(threshold))
        .map(|transition| transition.previous_line / 2)
        .unwrap_or(0)
}

/// Measure and evaluate every candidate line size
pub fn sweep<P: LineProbe>(probe: &mut P, cal: &LineCalibration) -> LineSizeReport {
    let timings = measure_timings(probe, cal);
    let line_size = detect_line_size(&timings, cal.threshold);

    LineSizeReport { line_size, timings }
}

/// Log each neighbouring pair of timings with its ratio, marking the detected transition
pub fn log_diagnostics(report: &LineSizeReport, threshold: f64) {
    let mut marked = false;
    for transition in report.transitions() {
        let hit = !marked && report.is_detected() && transition.is_drop(threshold);
        marked |= hit;
        info!(
            "{} -> {}: {:>10} ns {:>10} ns  ratio {:>6.2}{}",
            format_size_fixed_int(transition.previous_line as u64),
            format_size_fixed_int(transition.line as u64),
            transition.previous_time,
            transition.time,
            transition.ratio(),
            if hit { " ←" } else { "" }
        );
    }
}
