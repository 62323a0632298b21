use thiserror::Error;

/// Failures that stop a measurement run. An undetected change point is not one of them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe buffer must hold at least one cell")]
    EmptyBuffer,

    #[error("invalid buffer layout: {bytes} bytes aligned to {align}")]
    Layout { bytes: usize, align: usize },

    #[error("out of memory allocating {bytes} byte probe buffer (alignment {align})")]
    Allocation { bytes: usize, align: usize },

    #[error("page size {0} is not a power of two")]
    PageSize(usize),

    #[error("invalid calibration: {0}")]
    Calibration(String),
}
