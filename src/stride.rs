//! # Sequential stride
//!
//! Linear read-modify-write passes over a large buffer of [`WordPair`] records, touching one
//! record every `stride` bytes. Only the last pass of each cycle is timed; the preceding warm-up
//! passes pay for page faults and TLB fills so they stay out of the sample.
use crate::buffer::{ProbeBuffer, WordPair};
use crate::clock::Clock;
use std::hint::black_box;

/// Source of "time per pass" samples for a byte stride
pub trait LineProbe {
    /// One sample in nanoseconds for a full pass touching a record every `stride` bytes
    fn sample(&mut self, stride: usize) -> u64;
}

impl<F> LineProbe for F
where
    F: FnMut(usize) -> u64,
{
    fn sample(&mut self, stride: usize) -> u64 {
        self(stride)
    }
}

/// Records between two touched records for a byte stride (never below one)
pub fn record_step(stride: usize) -> usize {
    (stride / std::mem::size_of::<WordPair>()).max(1)
}

/// Touch every `step`-th record, multiplying its value by its index and folding the result into
/// the neighbouring word.
#[inline(never)]
pub fn touch_pass(records: &mut [WordPair], step: usize) {
    for (k, record) in records.iter_mut().enumerate().step_by(step) {
        record.value = record.value.wrapping_mul(k);
        record.scratch = record.scratch.wrapping_add(record.value);
    }
}

/// Sequential-stride timer over an owned buffer
pub struct StrideTimer<C> {
    buffer: ProbeBuffer<WordPair>,
    clock: C,
    /// Untimed passes before every timed one
    warmup: usize,
    /// Timed passes averaged into one sample
    repeats: usize,
}

impl<C: Clock> StrideTimer<C> {
    pub fn new(buffer: ProbeBuffer<WordPair>, clock: C, warmup: usize, repeats: usize) -> Self {
        StrideTimer {
            buffer,
            clock,
            warmup,
            repeats: repeats.max(1),
        }
    }

    pub fn records(&self) -> &[WordPair] {
        &self.buffer
    }
}

impl<C: Clock> LineProbe for StrideTimer<C> {
    fn sample(&mut self, stride: usize) -> u64 {
        let step = record_step(stride);

        let mut total = 0u64;
        for _ in 0..self.repeats {
            for _ in 0..self.warmup {
                touch_pass(&mut self.buffer, step);
            }

            let start = self.clock.now_ns();
            touch_pass(&mut self.buffer, step);
            total += self.clock.now_ns().saturating_sub(start);
        }
        black_box(self.buffer.first().map(|record| record.scratch));

        total / self.repeats as u64
    }
}
