//! `pcap`-backed [`CaptureSource`] (spec.md §4.4): opens a live handle on
//! the configured interface, installs a BPF filter derived from the
//! configured ports, and runs the blocking frame-delivery loop.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};

use pcap::{Active, Capture, Device};
use sniffer_core::capture::CaptureSource;
use sniffer_core::config::CaptureConfig;
use sniffer_core::error::CaptureError;
use sniffer_core::model::{CaptureStatistics, DecodedSegment};
use tracing::{info, warn};

use crate::decoder;

/// The capture library is polled on a bounded timeout so the run loop wakes
/// periodically to check `stop` without a separate interrupt primitive.
const READ_TIMEOUT_MS: i32 = 1_000;
const SNAPLEN: i32 = 262_144;

/// `stats()` takes `&self` on the `CaptureSource` trait but `&mut self` on
/// the underlying `pcap::Capture`; the handle is only ever touched
/// sequentially from a single thread (open/close from the controller, run
/// from the capture thread), so a `RefCell` is enough — no real aliasing.
#[derive(Default)]
pub struct PcapCaptureSource {
    handle: RefCell<Option<Capture<Active>>>,
}

impl PcapCaptureSource {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `tcp port P1 or tcp port P2 ...`, built deterministically in the order
/// `ports` was given (spec.md §6).
pub fn build_bpf_filter(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| format!("tcp port {p}"))
        .collect::<Vec<_>>()
        .join(" or ")
}

impl CaptureSource for PcapCaptureSource {
    fn open(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        let device = resolve_device(&config.interface)?;

        let inactive = Capture::from_device(device)
            .map_err(|e| CaptureError::invalid_interface(e.to_string()))?;
        let mut active = inactive
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .map_err(|e| CaptureError::open_failed(e.to_string()))?;

        let filter = build_bpf_filter(&config.ports);
        active
            .filter(&filter, true)
            .map_err(|e| CaptureError::open_failed(e.to_string()))?;

        info!(interface = %config.interface, ports = ?config.ports, filter = %filter, "capture started");
        *self.handle.borrow_mut() = Some(active);
        Ok(())
    }

    fn run(
        &mut self,
        stop: &AtomicBool,
        on_segment: &mut dyn FnMut(DecodedSegment),
    ) -> Result<(), CaptureError> {
        let mut guard = self.handle.borrow_mut();
        let handle = guard
            .as_mut()
            .ok_or_else(|| CaptureError::unrecoverable("run() called before a successful open()"))?;

        while !stop.load(Ordering::Acquire) {
            match handle.next_packet() {
                Ok(packet) => {
                    if let Some(segment) = decoder::decode(packet.data) {
                        on_segment(segment);
                    }
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => break,
                Err(e) => {
                    return Err(CaptureError::unrecoverable(e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn stats(&self) -> Option<CaptureStatistics> {
        let mut guard = self.handle.borrow_mut();
        let handle = guard.as_mut()?;
        let stat = handle.stats().ok()?;
        Some(CaptureStatistics {
            packets_received: Some(stat.received as u64),
            packets_dropped: Some(stat.dropped as u64),
            packets_if_dropped: Some(stat.if_dropped as u64),
        })
    }

    fn close(&mut self) {
        *self.handle.borrow_mut() = None;
    }
}

fn resolve_device(interface: &str) -> Result<Device, CaptureError> {
    if interface.is_empty() {
        return Device::lookup()
            .map_err(|e| CaptureError::invalid_interface(e.to_string()))?
            .ok_or_else(|| CaptureError::invalid_interface("no default capture device found"));
    }

    let devices =
        Device::list().map_err(|e| CaptureError::invalid_interface(e.to_string()))?;
    devices
        .into_iter()
        .find(|d| d.name == interface)
        .ok_or_else(|| {
            warn!(interface, "configured interface not found among capture devices");
            CaptureError::invalid_interface(format!("no such interface: {interface}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpf_filter_joins_ports_in_order_with_or() {
        assert_eq!(build_bpf_filter(&[80, 443, 8080]), "tcp port 80 or tcp port 443 or tcp port 8080");
    }

    #[test]
    fn bpf_filter_single_port() {
        assert_eq!(build_bpf_filter(&[80]), "tcp port 80");
    }
}
