//! Packet decode, TCP reassembly, HTTP/1.x parsing, capture source,
//! delivery bridge, and lifecycle control — the capture-to-message
//! pipeline described in spec.md §2.

pub mod bridge;
pub mod clock;
pub mod decoder;
pub mod http_parser;
pub mod lifecycle;
pub mod pcap_source;
pub mod reassembler;
pub mod sampling;

pub use lifecycle::LifecycleController;
pub use pcap_source::PcapCaptureSource;
