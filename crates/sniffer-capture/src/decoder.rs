//! Stateless link-layer frame → TCP segment decoder (spec.md §4.1).
//!
//! Only Ethernet II frames carrying IPv4-in-TCP are understood. Anything
//! else — unsupported EtherType, non-TCP IP protocol, truncated or
//! malformed headers — is silently discarded: there is no per-frame
//! logging, by design (§4.1 "Failure semantics").

use bytes::Bytes;
use sniffer_core::model::{DecodedSegment, Endpoint, FourTuple, SegmentFlags};

const ETHERNET_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTOCOL_TCP: u8 = 6;

/// Decode one captured frame into a TCP segment, or return `None` if it
/// isn't an IPv4/TCP packet we understand.
pub fn decode(frame: &[u8]) -> Option<DecodedSegment> {
    let eth = parse_ethernet(frame)?;
    if eth.ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    let ip = parse_ipv4(eth.payload)?;
    if ip.protocol != IP_PROTOCOL_TCP {
        return None;
    }
    let tcp = parse_tcp(ip.payload)?;

    let tuple = FourTuple {
        src: Endpoint::new(ip.src, tcp.src_port),
        dst: Endpoint::new(ip.dst, tcp.dst_port),
    };

    Some(DecodedSegment {
        tuple,
        seq: tcp.seq,
        ack: tcp.ack,
        flags: tcp.flags,
        payload: Bytes::copy_from_slice(tcp.payload),
    })
}

struct EthernetFrame<'a> {
    ethertype: u16,
    payload: &'a [u8],
}

fn parse_ethernet(data: &[u8]) -> Option<EthernetFrame<'_>> {
    if data.len() < ETHERNET_HEADER_LEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([data[12], data[13]]);
    Some(EthernetFrame {
        ethertype,
        payload: &data[ETHERNET_HEADER_LEN..],
    })
}

struct Ipv4Packet<'a> {
    protocol: u8,
    src: String,
    dst: String,
    payload: &'a [u8],
}

fn parse_ipv4(data: &[u8]) -> Option<Ipv4Packet<'_>> {
    if data.len() < 20 {
        return None;
    }
    let version = data[0] >> 4;
    if version != 4 {
        return None;
    }
    let ihl = (data[0] & 0x0f) as usize * 4;
    if ihl < 20 || data.len() < ihl {
        return None;
    }
    // total_len is not validated against data.len(): a truncated capture
    // snaplen can make it exceed what's actually present, and the TCP
    // parse below rejects anything too short to be a real header anyway.
    let protocol = data[9];
    let src = dotted_quad(&data[12..16]);
    let dst = dotted_quad(&data[16..20]);

    Some(Ipv4Packet {
        protocol,
        src,
        dst,
        payload: &data[ihl..],
    })
}

fn dotted_quad(bytes: &[u8]) -> String {
    format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])
}

struct TcpSegment<'a> {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: SegmentFlags,
    payload: &'a [u8],
}

fn parse_tcp(data: &[u8]) -> Option<TcpSegment<'_>> {
    if data.len() < 20 {
        return None;
    }
    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let seq = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ack = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let data_offset = (data[12] >> 4) as usize * 4;
    if data_offset < 20 || data.len() < data_offset {
        return None;
    }
    let flag_byte = data[13];
    let flags = SegmentFlags {
        fin: flag_byte & 0x01 != 0,
        syn: flag_byte & 0x02 != 0,
        rst: flag_byte & 0x04 != 0,
    };

    Some(TcpSegment {
        src_port,
        dst_port,
        seq,
        ack,
        flags,
        payload: &data[data_offset..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal Ethernet II + IPv4 + TCP frame carrying `payload`,
    /// with the given flags and sequence number. No IP/TCP options.
    fn build_frame(
        src_ip: [u8; 4],
        dst_ip: [u8; 4],
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut frame = Vec::new();
        // Ethernet header: dst mac, src mac, ethertype.
        frame.extend_from_slice(&[0u8; 6]);
        frame.extend_from_slice(&[0u8; 6]);
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        let tcp_len = 20 + payload.len();
        let total_len = 20 + tcp_len;

        // IPv4 header.
        frame.push(0x45); // version 4, IHL 5
        frame.push(0); // DSCP/ECN
        frame.extend_from_slice(&(total_len as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0]); // identification
        frame.extend_from_slice(&[0, 0]); // flags/fragment offset
        frame.push(64); // TTL
        frame.push(IP_PROTOCOL_TCP);
        frame.extend_from_slice(&[0, 0]); // checksum (unchecked)
        frame.extend_from_slice(&src_ip);
        frame.extend_from_slice(&dst_ip);

        // TCP header.
        frame.extend_from_slice(&src_port.to_be_bytes());
        frame.extend_from_slice(&dst_port.to_be_bytes());
        frame.extend_from_slice(&seq.to_be_bytes());
        frame.extend_from_slice(&ack.to_be_bytes());
        frame.push(5 << 4); // data offset 5, reserved bits 0
        frame.push(flags);
        frame.extend_from_slice(&[0xff, 0xff]); // window
        frame.extend_from_slice(&[0, 0]); // checksum (unchecked)
        frame.extend_from_slice(&[0, 0]); // urgent pointer
        frame.extend_from_slice(payload);

        frame
    }

    #[test]
    fn decodes_a_simple_syn() {
        let frame = build_frame(
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            51000,
            80,
            1000,
            0,
            0x02,
            &[],
        );
        let seg = decode(&frame).expect("should decode");
        assert_eq!(seg.tuple.src, Endpoint::new("10.0.0.1", 51000));
        assert_eq!(seg.tuple.dst, Endpoint::new("10.0.0.2", 80));
        assert_eq!(seg.seq, 1000);
        assert!(seg.flags.syn);
        assert!(!seg.flags.fin);
        assert!(seg.payload.is_empty());
    }

    #[test]
    fn decodes_payload_bearing_segment() {
        let frame = build_frame(
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            51000,
            80,
            1000,
            1,
            0x18, // PSH/ACK (only ACK-adjacent bits we don't model; payload still decodes)
            b"GET / HTTP/1.1\r\n\r\n",
        );
        let seg = decode(&frame).expect("should decode");
        assert_eq!(&seg.payload[..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn rejects_non_ipv4_ethertype() {
        let mut frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2, 0, 0, 0, &[]);
        frame[12] = 0x86;
        frame[13] = 0xdd; // IPv6 ethertype
        assert!(decode(&frame).is_none());
    }

    #[test]
    fn rejects_non_tcp_protocol() {
        let mut frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2, 0, 0, 0, &[]);
        frame[14 + 9] = 17; // UDP
        assert!(decode(&frame).is_none());
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 1, 2, 0, 0, 0, &[]);
        assert!(decode(&frame[..10]).is_none());
    }
}
