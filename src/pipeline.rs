//! # Pipeline
//!
//! Runs the line-size sweep and then the associativity and size sweep. Each sweep asks its
//! [`ProbeSource`] for a fresh probe and drops it as soon as the sweep is over, so the two probe
//! buffers never live at the same time.
use crate::buffer::{PageSize, ProbeBuffer};
use crate::calibration::{Calibration, LineCalibration, WayCalibration};
use crate::chase::{ChaseTimer, WayProbe};
use crate::clock::MonotonicClock;
use crate::error::ProbeError;
use crate::stride::{LineProbe, StrideTimer};
use crate::{geometry, line_size};
use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fmt;

/// The three measured properties of the L1 data cache. Zero means undetected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    /// Line size in bytes
    pub line_size: usize,
    /// Capacity in bytes
    pub cache_size: usize,
    /// Number of ways per set
    pub associativity: usize,
}

impl fmt::Display for CacheGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "L1 cache line size: {} B", self.line_size)?;
        writeln!(f, "L1 cache size: {} B", self.cache_size)?;
        write!(f, "L1 cache associativity: {}", self.associativity)
    }
}

/// Hands out the probes each sweep times against
pub trait ProbeSource {
    type Line: LineProbe;
    type Ways: WayProbe;

    /// Probe for the line-size sweep, dropped when that sweep ends
    fn line_probe(&mut self, cal: &LineCalibration) -> Result<Self::Line, ProbeError>;

    /// Probe for the associativity and size sweep, dropped when that sweep ends
    fn way_probe(&mut self, cal: &WayCalibration) -> Result<Self::Ways, ProbeError>;
}

/// Real timers over freshly allocated page-aligned buffers
pub struct HardwareProbes {
    page_size: PageSize,
}

impl HardwareProbes {
    pub fn new(page_size: PageSize) -> Self {
        HardwareProbes { page_size }
    }
}

impl ProbeSource for HardwareProbes {
    type Line = StrideTimer<MonotonicClock>;
    type Ways = ChaseTimer<ChaCha8Rng, MonotonicClock>;

    fn line_probe(&mut self, cal: &LineCalibration) -> Result<Self::Line, ProbeError> {
        let buffer = ProbeBuffer::zeroed_bytes(self.page_size, cal.buffer_bytes)?;
        Ok(StrideTimer::new(
            buffer,
            MonotonicClock::new(),
            cal.warmup,
            cal.repeats,
        ))
    }

    fn way_probe(&mut self, cal: &WayCalibration) -> Result<Self::Ways, ProbeError> {
        let buffer = ProbeBuffer::zeroed(self.page_size, cal.buffer_cells())?;
        let rng = ChaCha8Rng::from_rng(&mut rand::rng());
        Ok(ChaseTimer::new(
            buffer,
            rng,
            MonotonicClock::new(),
            cal.repeats,
        ))
    }
}

/// Run both sweeps in order and collect the results
pub fn run<S: ProbeSource>(source: &mut S, cal: &Calibration) -> Result<CacheGeometry, ProbeError> {
    cal.validate()?;

    println!("L1 cache line size determining...");
    let line_report = {
        let mut probe = source.line_probe(&cal.line)?;
        line_size::sweep(&mut probe, &cal.line)
    };
    line_size::log_diagnostics(&line_report, cal.line.threshold);
    println!("L1 cache line size determined\n");

    println!("L1 cache size and associativity determining...");
    let geometry_report = {
        let mut probe = source.way_probe(&cal.ways)?;
        geometry::sweep(&mut probe, &cal.ways)
    };
    geometry::log_votes(&geometry_report);
    println!("L1 cache size and associativity determined\n");

    let result = CacheGeometry {
        line_size: line_report.line_size,
        cache_size: geometry_report.cache_size,
        associativity: geometry_report.associativity,
    };
    info!("Measurement finished: {:?}", result);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_has_three_lines() {
        let geometry = CacheGeometry {
            line_size: 64,
            cache_size: 49152,
            associativity: 12,
        };
        assert_eq!(
            geometry.to_string(),
            "L1 cache line size: 64 B\nL1 cache size: 49152 B\nL1 cache associativity: 12"
        );
    }

    #[test]
    fn undetected_values_print_as_zero() {
        let geometry = CacheGeometry {
            line_size: 0,
            cache_size: 0,
            associativity: 0,
        };
        assert!(geometry.to_string().contains("L1 cache line size: 0 B"));
    }

    #[test]
    fn hardware_probes_allocate_requested_buffers() {
        let mut source = HardwareProbes::new(PageSize::new(4096).unwrap());
        let ways = WayCalibration {
            buffer_bytes: 64 * 1024,
            ..WayCalibration::default()
        };
        let line = LineCalibration {
            buffer_bytes: 64 * 1024,
            ..LineCalibration::default()
        };

        let chase = source.way_probe(&ways).unwrap();
        assert_eq!(chase.buffer_len(), 64 * 1024 / crate::WORD_SIZE);

        let stride = source.line_probe(&line).unwrap();
        assert_eq!(stride.records().len(), 64 * 1024 / (2 * crate::WORD_SIZE));
    }

    #[test]
    fn invalid_calibration_stops_before_measuring() {
        let mut source = HardwareProbes::new(PageSize::new(4096).unwrap());
        let mut cal = Calibration::default();
        cal.ways.rounds = 0;

        assert!(matches!(run(&mut source, &cal), Err(ProbeError::Calibration(_))));
    }
}
