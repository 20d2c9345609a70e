use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One side of a TCP connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// `ip:port`, used as the building block of a canonical connection id.
    pub fn as_key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A directional pair of endpoints, as seen on the wire for one segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourTuple {
    pub src: Endpoint,
    pub dst: Endpoint,
}

/// A direction-independent key identifying a TCP connection, built by
/// sorting the two endpoint keys lexically and joining them. See
/// `Reassembler::canonical_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn from_tuple(tuple: &FourTuple) -> Self {
        Self::from_endpoints(&tuple.src, &tuple.dst)
    }

    pub fn from_endpoints(a: &Endpoint, b: &Endpoint) -> Self {
        let (a_key, b_key) = (a.as_key(), b.as_key());
        if a_key <= b_key {
            Self(format!("{a_key}|{b_key}"))
        } else {
            Self(format!("{b_key}|{a_key}"))
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The TCP control bits the Reassembler cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentFlags {
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
}

/// The output of the Packet Decoder: one TCP segment pulled out of a
/// captured link-layer frame. Transient — not retained past Reassembler
/// admission.
#[derive(Debug, Clone)]
pub struct DecodedSegment {
    pub tuple: FourTuple,
    pub seq: u32,
    pub ack: u32,
    pub flags: SegmentFlags,
    pub payload: Bytes,
}

/// Which side of an HTTP exchange a completed message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Request,
    Response,
}

/// How a message body was stored: as text, or as an opaque binary blob
/// because it failed UTF-8 validation (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Binary,
}

/// A complete HTTP/1.x message, stamped with the connection it came from.
/// This is the delivery product of the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpMessageRecord {
    pub receiver: Endpoint,
    pub destination: Endpoint,
    pub direction: MessageDirection,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub body: Vec<u8>,
    pub body_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<BodyEncoding>,
    pub timestamp: String,
}

/// Capture-interface counters, reported once on stop when the capture
/// library exposes them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CaptureStatistics {
    pub packets_received: Option<u64>,
    pub packets_dropped: Option<u64>,
    pub packets_if_dropped: Option<u64>,
}

/// A periodic snapshot of the ambient pipeline counters SPEC_FULL.md
/// §2.10/§4.10 calls for, beyond the individual `Message`/`FatalError`
/// events: cumulative counts of what the capture thread has observed,
/// plus one point-in-time gauge (`active_connections`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub packets_decoded: u64,
    pub active_connections: u64,
    pub requests_emitted: u64,
    pub responses_emitted: u64,
    pub evictions: u64,
    pub gaps: u64,
    pub non_http_streams: u64,
    pub sink_overflows: u64,
}

/// The event kinds the Delivery Bridge carries, per spec.md §4.5.
/// `Stats` is ambient telemetry (SPEC_FULL.md §4.10) and, like the other
/// control events, travels the bridge's unbounded control channel so a
/// dashboard never misses a counter update.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Message(HttpMessageRecord),
    FatalError { code: String, message: String },
    CaptureStopped { stats: Option<CaptureStatistics> },
    Stats(PipelineStats),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_is_direction_independent() {
        let a = Endpoint::new("10.0.0.1", 443);
        let b = Endpoint::new("10.0.0.2", 51000);
        let forward = ConnectionId::from_endpoints(&a, &b);
        let reverse = ConnectionId::from_endpoints(&b, &a);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn connection_id_puts_lexically_smaller_endpoint_first() {
        let a = Endpoint::new("10.0.0.1", 443);
        let b = Endpoint::new("10.0.0.2", 51000);
        let id = ConnectionId::from_endpoints(&b, &a);
        assert_eq!(id.0, "10.0.0.1:443|10.0.0.2:51000");
    }

    #[test]
    fn endpoint_display_matches_key() {
        let e = Endpoint::new("192.168.1.5", 8080);
        assert_eq!(e.to_string(), e.as_key());
    }
}
