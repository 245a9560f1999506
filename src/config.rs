//! Driver configuration.

use std::time::Duration;

/// Tunables for one SMAP instance.
///
/// The defaults match the hardware's documented behavior; most users only
/// toggle [`dma`](Config::dma) or the logging switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Try to use the coprocessor for FIFO transfers. When `false`, or when
    /// binding the coprocessor fails, all transfers use programmed I/O.
    pub dma: bool,
    /// Iterations for bounded register polls (soft reset, FIFO reset,
    /// MAC idle, MII completion).
    pub loop_count: u32,
    /// Attempts to bind each coprocessor endpoint at attach.
    pub bind_retries: u32,
    /// Pause between bind attempts.
    pub bind_backoff: Duration,
    /// Attempts to issue a DMA stop call while the RPC channel is busy.
    pub break_retries: u32,
    /// Log every hardware error cause, not just the counters.
    pub verbose: bool,
    /// Log each frame as it moves through the FIFO.
    pub trace_frames: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dma: true,
            loop_count: 10_000,
            bind_retries: 100,
            bind_backoff: Duration::from_micros(50),
            break_retries: 100,
            verbose: false,
            trace_frames: false,
        }
    }
}
