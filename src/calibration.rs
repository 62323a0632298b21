//! # Calibration
//!
//! Tunable constants of the measurement. None of them has a derivation; they are empirical
//! sensitivity knobs, so they live in one place with compiled-in defaults and are handed
//! explicitly to every sweep.
use crate::WORD_SIZE;
use crate::buffer::WordPair;
use crate::error::ProbeError;

/// What to do after the first timing jump within one stride of the associativity sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpPolicy {
    /// Keep scanning and vote for every jump found in the stride
    RecordAll,
    /// Vote only for the first jump, then move to the next stride
    FirstOnly,
}

/// All calibration parameters of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    pub line: LineCalibration,
    pub ways: WayCalibration,
}

/// Line-size sweep parameters
#[derive(Debug, Clone, PartialEq)]
pub struct LineCalibration {
    /// Bytes swept by each sequential pass (default: 8 MiB)
    pub buffer_bytes: usize,
    /// Smallest candidate line size in bytes (default: two machine words)
    pub min_line: usize,
    /// Largest candidate line size in bytes (default: 512)
    pub max_line: usize,
    /// Ratio by which the pass time must drop to mark a transition (default: 1.4)
    pub threshold: f64,
    /// Samples aggregated by median per candidate (default: 5)
    pub trials: usize,
    /// Timed passes averaged into one sample (default: 5)
    pub repeats: usize,
    /// Untimed passes before each timed pass (default: 5)
    pub warmup: usize,
}

/// Associativity and size sweep parameters
#[derive(Debug, Clone, PartialEq)]
pub struct WayCalibration {
    /// Bytes of the pointer-chase buffer (default: 4 MiB)
    pub buffer_bytes: usize,
    /// First stride in bytes (default: 1 KiB)
    pub min_stride: usize,
    /// Strides double while strictly below this (default: 64 KiB)
    pub stride_limit: usize,
    /// Largest associativity tried (default: 32)
    pub max_assoc: usize,
    /// Ratio by which the chase time must rise to mark a transition (default: 1.4)
    pub threshold: f64,
    /// Samples aggregated by median per candidate (default: 5)
    pub trials: usize,
    /// Timed chases averaged into one sample (default: 5)
    pub repeats: usize,
    /// Independent voting rounds (default: 10)
    pub rounds: usize,
    pub policy: JumpPolicy,
}

/// Associativity candidates advance by this many ways
pub const ASSOC_STEP: usize = 2;

impl Default for LineCalibration {
    fn default() -> Self {
        LineCalibration {
            buffer_bytes: 8 * 1024 * 1024, // 8MiB
            min_line: 2 * WORD_SIZE,
            max_line: 512,
            threshold: 1.4,
            trials: 5,
            repeats: 5,
            warmup: 5,
        }
    }
}

impl Default for WayCalibration {
    fn default() -> Self {
        WayCalibration {
            buffer_bytes: 4 * 1024 * 1024, // 4MiB
            min_stride: 1024,
            stride_limit: 64 * 1024,
            max_assoc: 32,
            threshold: 1.4,
            trials: 5,
            repeats: 5,
            rounds: 10,
            policy: JumpPolicy::RecordAll,
        }
    }
}

impl LineCalibration {
    /// Candidate line sizes, doubling from `min_line` up to and including `max_line`
    pub fn candidates(&self) -> impl Iterator<Item = usize> {
        let max_line = self.max_line;
        std::iter::successors(Some(self.min_line), |line| line.checked_mul(2))
            .take_while(move |&line| line <= max_line)
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        let record = std::mem::size_of::<WordPair>();
        check_threshold("line", self.threshold)?;
        check_nonzero("line trials", self.trials)?;
        check_nonzero("line repeats", self.repeats)?;
        if self.min_line < record || !self.min_line.is_power_of_two() {
            return Err(ProbeError::Calibration(format!(
                "minimum line size {} must be a power of two of at least {} bytes",
                self.min_line, record
            )));
        }
        if self.max_line < self.min_line {
            return Err(ProbeError::Calibration(format!(
                "maximum line size {} is below the minimum {}",
                self.max_line, self.min_line
            )));
        }
        if self.buffer_bytes < self.max_line {
            return Err(ProbeError::Calibration(format!(
                "line buffer of {} bytes cannot hold a {} byte stride",
                self.buffer_bytes, self.max_line
            )));
        }
        Ok(())
    }
}

impl WayCalibration {
    /// Candidate strides in bytes, doubling from `min_stride` while below `stride_limit`
    pub fn strides(&self) -> impl Iterator<Item = usize> {
        let limit = self.stride_limit;
        std::iter::successors(Some(self.min_stride), |stride| stride.checked_mul(2))
            .take_while(move |&stride| stride < limit)
    }

    /// Candidate associativities: 2, 4, ... up to `max_assoc`
    pub fn associativities(&self) -> impl Iterator<Item = usize> {
        (ASSOC_STEP..=self.max_assoc).step_by(ASSOC_STEP)
    }

    /// Number of machine words in the chase buffer
    pub fn buffer_cells(&self) -> usize {
        self.buffer_bytes / WORD_SIZE
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        check_threshold("associativity", self.threshold)?;
        check_nonzero("associativity trials", self.trials)?;
        check_nonzero("associativity repeats", self.repeats)?;
        check_nonzero("rounds", self.rounds)?;
        if self.min_stride < WORD_SIZE || self.min_stride % WORD_SIZE != 0 {
            return Err(ProbeError::Calibration(format!(
                "minimum stride {} must be a positive multiple of the {} byte word",
                self.min_stride, WORD_SIZE
            )));
        }
        if self.max_assoc < ASSOC_STEP {
            return Err(ProbeError::Calibration(format!(
                "maximum associativity {} is below {}",
                self.max_assoc, ASSOC_STEP
            )));
        }
        let widest = self.strides().last().ok_or_else(|| {
            ProbeError::Calibration(format!(
                "stride range {}..{} is empty",
                self.min_stride, self.stride_limit
            ))
        })?;
        // every bucket of the widest probe must land on a distinct cell
        let span = widest.checked_mul(self.max_assoc).unwrap_or(usize::MAX);
        if span >= self.buffer_bytes {
            return Err(ProbeError::Calibration(format!(
                "chase buffer of {} bytes cannot hold {} ways at a {} byte stride",
                self.buffer_bytes, self.max_assoc, widest
            )));
        }
        Ok(())
    }
}

impl Calibration {
    pub fn validate(&self) -> Result<(), ProbeError> {
        self.line.validate()?;
        self.ways.validate()
    }
}

fn check_threshold(which: &str, threshold: f64) -> Result<(), ProbeError> {
    if threshold.is_finite() && threshold > 1.0 {
        Ok(())
    } else {
        Err(ProbeError::Calibration(format!(
            "{} threshold {} must be a finite ratio above 1",
            which, threshold
        )))
    }
}

fn check_nonzero(what: &str, value: usize) -> Result<(), ProbeError> {
    if value == 0 {
        Err(ProbeError::Calibration(format!("{} must be at least 1", what)))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(Calibration::default().validate(), Ok(()));
    }

    #[test]
    fn default_line_candidates_double_up_to_512() {
        let candidates: Vec<usize> = LineCalibration::default().candidates().collect();
        assert_eq!(candidates.first(), Some(&(2 * WORD_SIZE)));
        assert_eq!(candidates.last(), Some(&512));
        assert!(candidates.windows(2).all(|pair| pair[1] == 2 * pair[0]));
    }

    #[test]
    fn default_strides_and_ways() {
        let ways = WayCalibration::default();
        let strides: Vec<usize> = ways.strides().collect();
        assert_eq!(strides, vec![1024, 2048, 4096, 8192, 16384, 32768]);

        let assocs: Vec<usize> = ways.associativities().collect();
        assert_eq!(assocs.len(), 16);
        assert_eq!(assocs[0], 2);
        assert_eq!(assocs[15], 32);
    }

    #[test]
    fn threshold_must_exceed_one() {
        let mut cal = Calibration::default();
        cal.line.threshold = 1.0;
        assert!(matches!(cal.validate(), Err(ProbeError::Calibration(_))));

        let mut cal = Calibration::default();
        cal.ways.threshold = f64::NAN;
        assert!(matches!(cal.validate(), Err(ProbeError::Calibration(_))));
    }

    #[test]
    fn zero_rounds_rejected() {
        let mut cal = Calibration::default();
        cal.ways.rounds = 0;
        assert!(matches!(cal.validate(), Err(ProbeError::Calibration(_))));
    }

    #[test]
    fn chase_buffer_must_fit_widest_probe() {
        let mut cal = Calibration::default();
        cal.ways.buffer_bytes = 32 * 32 * 1024;
        assert!(matches!(cal.validate(), Err(ProbeError::Calibration(_))));
    }

    #[test]
    fn empty_stride_range_rejected() {
        let mut cal = Calibration::default();
        cal.ways.stride_limit = cal.ways.min_stride;
        assert!(matches!(cal.validate(), Err(ProbeError::Calibration(_))));
    }

    #[test]
    fn line_ceiling_below_floor_rejected() {
        let mut cal = Calibration::default();
        cal.line.max_line = WORD_SIZE;
        assert!(matches!(cal.validate(), Err(ProbeError::Calibration(_))));
    }
}
