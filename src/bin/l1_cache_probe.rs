//! L1 Data Cache Geometry Probe
//!
//! Infers the line size, capacity and associativity of the first-level data cache by timing
//! memory access patterns from user space. Sequential strided passes expose the line size, and a
//! randomized pointer chase over buckets one stride apart exposes the number of ways and the
//! capacity.
use l1_cache_probe::buffer::PageSize;
use l1_cache_probe::{Calibration, HardwareProbes, pipeline};
use log::{error, info, warn};

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Keep the measuring thread on one core at the highest priority we are allowed, so migrations
/// and preemption disturb the timings as little as possible.
fn settle_thread() {
    match core_affinity::get_core_ids().and_then(|ids| ids.into_iter().next()) {
        Some(core) => {
            if core_affinity::set_for_current(core) {
                info!("Pinned measurement thread to CPU core {}", core.id);
            } else {
                warn!("Couldn't pin measurement thread to CPU core {} (NOTE: this is expected on macOS)", core.id);
            }
        }
        None => warn!("Couldn't enumerate CPU cores, measurement thread is not pinned"),
    }

    if thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max).is_err() {
        warn!("Couldn't set measurement thread to maximum thread priority");
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    settle_thread();

    let page_size = PageSize::detect();
    info!("Page size: {} B", page_size.bytes());

    let cal = Calibration::default();
    let mut probes = HardwareProbes::new(page_size);

    match pipeline::run(&mut probes, &cal) {
        Ok(geometry) => println!("{}", geometry),
        Err(e) => {
            error!("Cache measurement aborted: {}", e);
            std::process::exit(1);
        }
    }
}
