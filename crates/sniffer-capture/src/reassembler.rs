//! Stateful per-connection TCP reassembly (spec.md §4.2).
//!
//! Runs entirely on the capture thread; no locking. Connection state is an
//! indexed arena keyed by [`ConnectionId`] — each entry owns both directions'
//! [`StreamState`] (see spec.md §9's "Connection table as indexed arena").

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;
use sniffer_core::model::{ConnectionId, DecodedSegment, Endpoint, FourTuple};
use tracing::{info, warn};

use crate::sampling::is_sampled;

/// One ordered payload chunk for a single (connection, direction).
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub connection_id: ConnectionId,
    pub receiver: Endpoint,
    pub destination: Endpoint,
    pub client_to_server: bool,
    pub data: Bytes,
}

#[derive(Default)]
struct StreamState {
    next_seq: u32,
    initial_seq_set: bool,
    pending: BTreeMap<u32, Bytes>,
    gap_logged: bool,
}

struct ConnectionState {
    receiver: Endpoint,
    destination: Endpoint,
    created_at_ms: u64,
    last_activity_ms: u64,
    sampled: bool,
    client_to_server: StreamState,
    server_to_client: StreamState,
}

pub struct Reassembler {
    ports: HashSet<u16>,
    max_concurrent_connections: u32,
    connection_idle_timeout_ms: u64,
    sample_rate: f64,
    connections: HashMap<ConnectionId, ConnectionState>,
    gap_count: u64,
    eviction_count: u64,
}

impl Reassembler {
    pub fn new(
        ports: &[u16],
        max_concurrent_connections: u32,
        connection_idle_timeout_ms: u64,
        sample_rate: f64,
    ) -> Self {
        Self {
            ports: ports.iter().copied().collect(),
            max_concurrent_connections,
            connection_idle_timeout_ms,
            sample_rate,
            connections: HashMap::new(),
            gap_count: 0,
            eviction_count: 0,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Cumulative reassembly gaps detected across every connection's
    /// lifetime, for the live status view (SPEC_FULL.md §2.10).
    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }

    /// Cumulative connection evictions, idle or cap-exceeded combined.
    pub fn eviction_count(&self) -> u64 {
        self.eviction_count
    }

    /// Admit one segment. Emits zero or more [`StreamChunk`]s through
    /// `on_chunk` and returns the ids of any connections the cap enforcement
    /// evicted as a side effect of this admission (at most one, in
    /// practice, since the cap is only ever exceeded by a single entry).
    pub fn push_segment(
        &mut self,
        segment: DecodedSegment,
        now_ms: u64,
        mut on_chunk: impl FnMut(StreamChunk),
    ) -> Vec<ConnectionId> {
        let id = ConnectionId::from_tuple(&segment.tuple);

        if !self.connections.contains_key(&id) {
            let (receiver, destination) = classify_receiver(&segment.tuple, &self.ports);
            let sampled = is_sampled(&id, self.sample_rate);
            self.connections.insert(
                id.clone(),
                ConnectionState {
                    receiver,
                    destination,
                    created_at_ms: now_ms,
                    last_activity_ms: now_ms,
                    sampled,
                    client_to_server: StreamState::default(),
                    server_to_client: StreamState::default(),
                },
            );
        }

        {
            let conn = self
                .connections
                .get_mut(&id)
                .expect("just inserted or already present");
            conn.last_activity_ms = now_ms;

            let client_to_server = segment.tuple.src == conn.destination;
            let receiver = conn.receiver.clone();
            let destination = conn.destination.clone();
            let sampled = conn.sampled;
            let stream = if client_to_server {
                &mut conn.client_to_server
            } else {
                &mut conn.server_to_client
            };

            if segment.payload.is_empty() {
                if segment.flags.syn && !stream.initial_seq_set {
                    stream.next_seq = segment.seq.wrapping_add(1);
                    stream.initial_seq_set = true;
                }
            } else {
                if !stream.initial_seq_set {
                    stream.next_seq = segment.seq;
                    stream.initial_seq_set = true;
                }
                let result = admit(stream, segment.seq, segment.payload);
                if result.gap_detected && !stream.gap_logged {
                    stream.gap_logged = true;
                    self.gap_count += 1;
                    warn!(
                        connection_id = %id,
                        direction = if client_to_server { "client_to_server" } else { "server_to_client" },
                        "reassembly gap"
                    );
                }
                if sampled {
                    for data in result.emitted {
                        on_chunk(StreamChunk {
                            connection_id: id.clone(),
                            receiver: receiver.clone(),
                            destination: destination.clone(),
                            client_to_server,
                            data,
                        });
                    }
                }
            }
        }

        self.enforce_cap()
    }

    /// Remove connections idle for longer than the configured timeout, then
    /// enforce the cap. Returns every evicted id (idle evictions first).
    pub fn evict_idle(&mut self, now_ms: u64) -> Vec<ConnectionId> {
        let timeout = self.connection_idle_timeout_ms;
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| now_ms.saturating_sub(conn.last_activity_ms) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.connections.remove(id);
            self.eviction_count += 1;
            info!(connection_id = %id, reason = "idle_timeout", "connection evicted");
        }

        let mut evicted = stale;
        evicted.extend(self.enforce_cap());
        evicted
    }

    /// While over the cap, evict the oldest connection by `created_at_ms`
    /// (FIFO admission order).
    fn enforce_cap(&mut self) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        while self.connections.len() as u32 > self.max_concurrent_connections {
            let oldest = self
                .connections
                .iter()
                .min_by_key(|(_, conn)| conn.created_at_ms)
                .map(|(id, _)| id.clone());
            let Some(id) = oldest else { break };
            self.connections.remove(&id);
            self.eviction_count += 1;
            info!(connection_id = %id, reason = "cap_exceeded", "connection evicted");
            evicted.push(id);
        }
        evicted
    }
}

/// Classify which endpoint of `tuple` is the "receiver" (the side whose
/// port is in `ports`). If both sides match, source wins (spec.md §9's
/// resolved open question). If neither matches — the BPF filter should
/// have excluded this segment — classify by destination.
fn classify_receiver(tuple: &FourTuple, ports: &HashSet<u16>) -> (Endpoint, Endpoint) {
    if ports.contains(&tuple.src.port) {
        (tuple.src.clone(), tuple.dst.clone())
    } else {
        (tuple.dst.clone(), tuple.src.clone())
    }
}

struct AdmitResult {
    emitted: Vec<Bytes>,
    gap_detected: bool,
}

fn seq_cmp(a: u32, b: u32) -> Ordering {
    (a.wrapping_sub(b) as i32).cmp(&0)
}

/// Admit one in-order-or-not payload into `stream`, returning every chunk
/// now ready for delivery (in stream order) and whether a gap is blocking
/// further progress.
fn admit(stream: &mut StreamState, seq: u32, payload: Bytes) -> AdmitResult {
    let mut emitted = Vec::new();
    let mut gap_detected = false;

    match seq_cmp(seq, stream.next_seq) {
        Ordering::Equal => {
            stream.next_seq = stream.next_seq.wrapping_add(payload.len() as u32);
            emitted.push(payload);

            loop {
                let Some((&smallest, _)) = stream.pending.iter().next() else {
                    break;
                };
                match seq_cmp(smallest, stream.next_seq) {
                    Ordering::Equal => {
                        let data = stream.pending.remove(&smallest).expect("just peeked");
                        stream.next_seq = stream.next_seq.wrapping_add(data.len() as u32);
                        emitted.push(data);
                    }
                    Ordering::Greater => {
                        gap_detected = true;
                        break;
                    }
                    Ordering::Less => {
                        stream.pending.remove(&smallest);
                    }
                }
            }
        }
        Ordering::Greater => {
            stream.pending.entry(seq).or_insert(payload);
        }
        Ordering::Less => {
            // Retransmit within the already-acked window: drop.
        }
    }

    AdmitResult {
        emitted,
        gap_detected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sniffer_core::model::SegmentFlags;

    fn segment(
        src_ip: &str,
        src_port: u16,
        dst_ip: &str,
        dst_port: u16,
        seq: u32,
        payload: &[u8],
    ) -> DecodedSegment {
        DecodedSegment {
            tuple: FourTuple {
                src: Endpoint::new(src_ip, src_port),
                dst: Endpoint::new(dst_ip, dst_port),
            },
            seq,
            ack: 0,
            flags: SegmentFlags::default(),
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn syn(src_ip: &str, src_port: u16, dst_ip: &str, dst_port: u16, seq: u32) -> DecodedSegment {
        let mut s = segment(src_ip, src_port, dst_ip, dst_port, seq, &[]);
        s.flags.syn = true;
        s
    }

    #[test]
    fn in_order_delivery_emits_immediately() {
        let mut r = Reassembler::new(&[80], 10, 300_000, 1.0);
        let mut chunks = Vec::new();
        r.push_segment(
            syn("10.0.0.1", 51000, "10.0.0.2", 80, 999),
            0,
            |c| chunks.push(c),
        );
        r.push_segment(
            segment("10.0.0.1", 51000, "10.0.0.2", 80, 1000, b"GET /"),
            1,
            |c| chunks.push(c),
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0].data[..], b"GET /");
        assert!(chunks[0].client_to_server);
    }

    #[test]
    fn retransmit_and_reorder_emit_each_chunk_once() {
        // Mirrors spec.md §8 scenario 3.
        let mut r = Reassembler::new(&[80], 10, 300_000, 1.0);
        let mut chunks = Vec::new();
        let seg_ab = segment("10.0.0.1", 51000, "10.0.0.2", 80, 1000, b"AB");
        let seg_cd = segment("10.0.0.1", 51000, "10.0.0.2", 80, 1002, b"CD");

        r.push_segment(seg_cd.clone(), 0, |c| chunks.push(c));
        r.push_segment(seg_ab.clone(), 1, |c| chunks.push(c));
        r.push_segment(seg_ab, 2, |c| chunks.push(c));
        r.push_segment(seg_cd, 3, |c| chunks.push(c));

        let data: Vec<Vec<u8>> = chunks.iter().map(|c| c.data.to_vec()).collect();
        assert_eq!(data, vec![b"AB".to_vec(), b"CD".to_vec()]);
    }

    #[test]
    fn out_of_order_without_gap_fill_never_emits() {
        let mut r = Reassembler::new(&[80], 10, 300_000, 1.0);
        let mut chunks = Vec::new();
        // next_seq starts at 1000 implicitly on first payload; seq 1010 is
        // a gap — nothing before it ever arrives.
        let seg = segment("10.0.0.1", 51000, "10.0.0.2", 80, 1010, b"late");
        r.push_segment(seg, 0, |c| chunks.push(c));
        assert!(chunks.is_empty());
    }

    #[test]
    fn cap_evicts_oldest_connection_first() {
        // Mirrors spec.md §8 scenario 5.
        let mut r = Reassembler::new(&[80], 2, 300_000, 1.0);
        let mut chunks = Vec::new();

        let a = segment("10.0.0.1", 1, "10.0.0.9", 80, 1, b"a");
        let b = segment("10.0.0.2", 1, "10.0.0.9", 80, 1, b"b");
        let c = segment("10.0.0.3", 1, "10.0.0.9", 80, 1, b"c");

        let id_a = ConnectionId::from_tuple(&a.tuple);

        r.push_segment(a, 0, |c| chunks.push(c));
        r.push_segment(b, 1, |c| chunks.push(c));
        assert_eq!(r.connection_count(), 2);

        let evicted = r.push_segment(c, 2, |c| chunks.push(c));
        assert_eq!(evicted, vec![id_a]);
        assert_eq!(r.connection_count(), 2);
    }

    #[test]
    fn idle_eviction_removes_stale_connections() {
        let mut r = Reassembler::new(&[80], 10, 1_000, 1.0);
        let seg = segment("10.0.0.1", 1, "10.0.0.9", 80, 1, b"x");
        r.push_segment(seg, 0, |_| {});
        assert_eq!(r.connection_count(), 1);

        let evicted = r.evict_idle(5_000);
        assert_eq!(evicted.len(), 1);
        assert_eq!(r.connection_count(), 0);
    }

    #[test]
    fn gap_and_eviction_counters_track_detected_events() {
        let mut r = Reassembler::new(&[80], 2, 1_000, 1.0);
        assert_eq!(r.gap_count(), 0);
        assert_eq!(r.eviction_count(), 0);

        let seg = segment("10.0.0.1", 51000, "10.0.0.2", 80, 1010, b"late");
        r.push_segment(seg, 0, |_| {});
        assert_eq!(r.gap_count(), 1);

        let a = segment("10.0.0.1", 1, "10.0.0.9", 80, 1, b"a");
        let b = segment("10.0.0.2", 1, "10.0.0.9", 80, 1, b"b");
        let c = segment("10.0.0.3", 1, "10.0.0.9", 80, 1, b"c");
        r.push_segment(a, 0, |_| {});
        r.push_segment(b, 1, |_| {});
        r.push_segment(c, 2, |_| {});
        assert_eq!(r.eviction_count(), 1);

        let evicted = r.evict_idle(5_000);
        assert_eq!(r.eviction_count() as usize, 1 + evicted.len());
    }

    #[test]
    fn both_endpoints_matching_port_prefers_source_as_receiver() {
        let mut r = Reassembler::new(&[80], 10, 300_000, 1.0);
        let mut chunks = Vec::new();
        let seg = segment("10.0.0.1", 80, "10.0.0.2", 80, 1, b"x");
        r.push_segment(seg, 0, |c| chunks.push(c));
        assert_eq!(chunks[0].receiver, Endpoint::new("10.0.0.1", 80));
        assert_eq!(chunks[0].destination, Endpoint::new("10.0.0.2", 80));
    }
}
