use std::sync::atomic::AtomicBool;

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::model::{CaptureStatistics, DecodedSegment};

/// Abstraction over the thing that hands raw TCP segments to the
/// Reassembler. In production this wraps a libpcap handle; tests implement
/// it with a canned sequence of segments so the Lifecycle Controller and
/// the reassembly/parsing pipeline can be exercised without capture
/// privileges or a real interface.
pub trait CaptureSource: Send {
    /// Open the capture handle and install the BPF filter derived from
    /// `config.ports`. Called once, synchronously, from `start()`.
    fn open(&mut self, config: &CaptureConfig) -> Result<(), CaptureError>;

    /// Run the blocking frame-delivery loop, invoking `on_segment` for every
    /// decoded TCP segment, until `stop` is observed true or a fatal error
    /// occurs. Returns `Ok(())` on a clean (stop-requested) exit.
    fn run(
        &mut self,
        stop: &AtomicBool,
        on_segment: &mut dyn FnMut(DecodedSegment),
    ) -> Result<(), CaptureError>;

    /// Capture-interface counters, if the backend exposes them. Queried
    /// after `run` returns.
    fn stats(&self) -> Option<CaptureStatistics>;

    /// Release the capture handle. Called once from `stop()`.
    fn close(&mut self);
}
