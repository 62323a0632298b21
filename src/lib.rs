pub mod buffer;
pub mod calibration;
pub mod chase;
pub mod clock;
pub mod error;
pub mod geometry;
pub mod line_size;
pub mod pipeline;
pub mod stats;
pub mod stride;

pub use calibration::{Calibration, JumpPolicy, LineCalibration, WayCalibration};
pub use error::ProbeError;
pub use pipeline::{CacheGeometry, HardwareProbes, ProbeSource};

/// Size of a machine word in bytes
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Convert number of bytes to formatted string
pub fn format_size(bytes: f32) -> String {
    const GB: f32 = 1024.0 * 1024.0 * 1024.0;
    const MB: f32 = 1024.0 * 1024.0;
    const KB: f32 = 1024.0;

    if bytes >= GB {
        format!("{:.2} GiB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes / KB)
    } else {
        format!("{:.2} B", bytes)
    }
}

/// Convert number of bytes to formatted string for fixed-width integer string
pub fn format_size_fixed_int(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:>4} GiB", bytes / GB)
    } else if bytes >= MB {
        format!("{:>4} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:>4} KiB", bytes / KB)
    } else {
        format!("{:>4} B", bytes)
    }
}
