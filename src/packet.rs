//! Packet record storage and the L2/L3/L4 header parser.
//!
//! Parsing is a pure function of an owned byte buffer: it never allocates beyond the
//! record itself and never fails loudly — a frame too short for a given layer simply
//! stops being parsed at that layer, leaving later layers `None`.

use std::time::SystemTime;

/// One captured frame, owned from the moment it leaves the capture source until a
/// worker consumes and drops it. Never shared between threads.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    data: Vec<u8>,
    pub packet_length: u32,
    pub wall_clock: SystemTime,
    pub capture_ts_ns: u64,
}

impl PacketRecord {
    /// Copies `data` into an owned buffer and stamps both the wall-clock and monotonic
    /// capture timestamps. `capture_ts_ns` must come from the same monotonic clock
    /// workers use to compute latency.
    pub fn new(data: &[u8], capture_ts_ns: u64) -> Self {
        PacketRecord {
            data: data.to_vec(),
            packet_length: data.len() as u32,
            wall_clock: SystemTime::now(),
            capture_ts_ns,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Parses this record's buffer. Returns `None` only when the buffer is too short
    /// to contain an ethernet header — the sole condition that increments `parse_errors`.
    pub fn parse(&self) -> Option<ParsedPacket<'_>> {
        parse(&self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub ethertype: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub ihl_bytes: usize,
    pub total_length: u16,
    pub protocol: u8,
    pub checksum: u16,
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub data_offset_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
}

/// Result of parsing one frame. Any field may be `None` if the frame was too short
/// for that layer, or if the layer above it indicated a different protocol.
#[derive(Debug, Clone)]
pub struct ParsedPacket<'a> {
    pub ethernet: EthernetHeader,
    pub ipv4: Option<Ipv4Header>,
    pub ipv4_checksum_valid: Option<bool>,
    pub ipv6_next_header: Option<u8>,
    pub tcp: Option<TcpHeader>,
    pub udp: Option<UdpHeader>,
    pub payload: &'a [u8],
}

const ETHERNET_HEADER_LEN: usize = 14;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const ETHERTYPE_ARP: u16 = 0x0806;

pub const IP_PROTO_ICMP: u8 = 1;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;
pub const IPV6_NEXT_HEADER_ICMPV6: u8 = 58;

fn parse(data: &[u8]) -> Option<ParsedPacket<'_>> {
    if data.len() < ETHERNET_HEADER_LEN {
        return None;
    }

    let mut dst_mac = [0u8; 6];
    let mut src_mac = [0u8; 6];
    dst_mac.copy_from_slice(&data[0..6]);
    src_mac.copy_from_slice(&data[6..12]);
    let ethertype = u16::from_be_bytes([data[12], data[13]]);
    let ethernet = EthernetHeader {
        dst_mac,
        src_mac,
        ethertype,
    };

    let mut ipv4 = None;
    let mut ipv4_checksum_valid = None;
    let mut ipv6_next_header = None;
    let mut tcp = None;
    let mut udp = None;
    let mut payload_offset = ETHERNET_HEADER_LEN;

    if ethertype == ETHERTYPE_IPV4 && data.len() - ETHERNET_HEADER_LEN >= IPV4_MIN_HEADER_LEN {
        let base = ETHERNET_HEADER_LEN;
        let ihl_words = data[base] & 0x0F;
        let ihl_bytes = (ihl_words as usize) * 4;
        if ihl_bytes >= IPV4_MIN_HEADER_LEN && base + ihl_bytes <= data.len() {
            let total_length = u16::from_be_bytes([data[base + 2], data[base + 3]]);
            let protocol = data[base + 9];
            let checksum = u16::from_be_bytes([data[base + 10], data[base + 11]]);
            let mut src = [0u8; 4];
            let mut dst = [0u8; 4];
            src.copy_from_slice(&data[base + 12..base + 16]);
            dst.copy_from_slice(&data[base + 16..base + 20]);

            ipv4_checksum_valid = Some(validate_ipv4_checksum(&data[base..base + ihl_bytes]));
            ipv4 = Some(Ipv4Header {
                ihl_bytes,
                total_length,
                protocol,
                checksum,
                src,
                dst,
            });
            payload_offset = base + ihl_bytes;

            if protocol == IP_PROTO_TCP && data.len() - payload_offset >= TCP_MIN_HEADER_LEN {
                let t = payload_offset;
                let src_port = u16::from_be_bytes([data[t], data[t + 1]]);
                let dst_port = u16::from_be_bytes([data[t + 2], data[t + 3]]);
                let data_offset_words = (data[t + 12] >> 4) & 0x0F;
                let data_offset_bytes = (data_offset_words as usize) * 4;
                tcp = Some(TcpHeader {
                    src_port,
                    dst_port,
                    data_offset_bytes,
                });
                if data_offset_bytes >= TCP_MIN_HEADER_LEN {
                    payload_offset += data_offset_bytes;
                }
            } else if protocol == IP_PROTO_UDP && data.len() - payload_offset >= UDP_HEADER_LEN {
                let u = payload_offset;
                let src_port = u16::from_be_bytes([data[u], data[u + 1]]);
                let dst_port = u16::from_be_bytes([data[u + 2], data[u + 3]]);
                let length = u16::from_be_bytes([data[u + 4], data[u + 5]]);
                udp = Some(UdpHeader {
                    src_port,
                    dst_port,
                    length,
                });
                payload_offset += UDP_HEADER_LEN;
            }
        }
    } else if ethertype == ETHERTYPE_IPV6 && data.len() - ETHERNET_HEADER_LEN >= IPV6_HEADER_LEN {
        let base = ETHERNET_HEADER_LEN;
        ipv6_next_header = Some(data[base + 6]);
        payload_offset = base + IPV6_HEADER_LEN;
    }

    let payload = if payload_offset <= data.len() {
        &data[payload_offset..]
    } else {
        &[]
    };

    Some(ParsedPacket {
        ethernet,
        ipv4,
        ipv4_checksum_valid,
        ipv6_next_header,
        tcp,
        udp,
        payload,
    })
}

/// Folds every 16-bit word of an IPv4 header, skipping the checksum word itself,
/// reduces carries, and compares the one's complement to the stored checksum.
fn validate_ipv4_checksum(header: &[u8]) -> bool {
    if header.len() < IPV4_MIN_HEADER_LEN || header.len() % 2 != 0 {
        return false;
    }
    let mut sum: u32 = 0;
    for (i, chunk) in header.chunks_exact(2).enumerate() {
        if i == 5 {
            continue; // checksum word
        }
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    let computed = !(sum as u16);
    let stored = u16::from_be_bytes([header[10], header[11]]);
    computed == stored
}

/// Classification of the ethertype field, for metrics tallying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherClass {
    Ipv4,
    Ipv6,
    Arp,
    Other,
}

pub fn classify_ethertype(ethertype: u16) -> EtherClass {
    match ethertype {
        ETHERTYPE_IPV4 => EtherClass::Ipv4,
        ETHERTYPE_IPV6 => EtherClass::Ipv6,
        ETHERTYPE_ARP => EtherClass::Arp,
        _ => EtherClass::Other,
    }
}

/// Classification of an L4 protocol byte (IPv4 protocol field or IPv6 next-header byte),
/// for metrics tallying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Class {
    Tcp,
    Udp,
    Icmp,
    Other,
}

pub fn classify_ip_protocol(proto: u8) -> L4Class {
    match proto {
        IP_PROTO_TCP => L4Class::Tcp,
        IP_PROTO_UDP => L4Class::Udp,
        IP_PROTO_ICMP => L4Class::Icmp,
        IPV6_NEXT_HEADER_ICMPV6 => L4Class::Icmp,
        _ => L4Class::Other,
    }
}

/// Renders a human-readable summary plus a capped hex/ASCII dump of the payload.
/// Gated behind `--debug`; never called on the hot path otherwise.
pub fn format_packet_dump(parsed: &ParsedPacket, packet_length: u32) -> String {
    let mut out = format!(
        "frame: {} bytes, ethertype=0x{:04x}",
        packet_length, parsed.ethernet.ethertype
    );
    if let Some(ip) = &parsed.ipv4 {
        out.push_str(&format!(
            ", ipv4 {}.{}.{}.{} -> {}.{}.{}.{} proto={}",
            ip.src[0],
            ip.src[1],
            ip.src[2],
            ip.src[3],
            ip.dst[0],
            ip.dst[1],
            ip.dst[2],
            ip.dst[3],
            ip.protocol
        ));
    }
    if let Some(tcp) = &parsed.tcp {
        out.push_str(&format!(", tcp {}->{}", tcp.src_port, tcp.dst_port));
    }
    if let Some(udp) = &parsed.udp {
        out.push_str(&format!(", udp {}->{}", udp.src_port, udp.dst_port));
    }

    let dump_len = parsed.payload.len().min(64);
    if dump_len > 0 {
        out.push_str("\n  payload: ");
        for byte in &parsed.payload[..dump_len] {
            out.push_str(&format!("{:02x} ", byte));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal ethernet+IPv4+TCP frame with a correct header checksum.
    fn build_ipv4_tcp_frame(src_port: u16, dst_port: u16, payload_len: usize) -> Vec<u8> {
        let mut pkt = vec![0u8; ETHERNET_HEADER_LEN + IPV4_MIN_HEADER_LEN + TCP_MIN_HEADER_LEN + payload_len];
        pkt[12] = 0x08;
        pkt[13] = 0x00; // ethertype IPv4

        let ip_base = ETHERNET_HEADER_LEN;
        pkt[ip_base] = 0x45; // version 4, IHL 5
        let total_len = (IPV4_MIN_HEADER_LEN + TCP_MIN_HEADER_LEN + payload_len) as u16;
        pkt[ip_base + 2] = (total_len >> 8) as u8;
        pkt[ip_base + 3] = (total_len & 0xFF) as u8;
        pkt[ip_base + 9] = IP_PROTO_TCP;
        pkt[ip_base + 12..ip_base + 16].copy_from_slice(&[10, 0, 0, 1]);
        pkt[ip_base + 16..ip_base + 20].copy_from_slice(&[10, 0, 0, 2]);
        let checksum = compute_ipv4_checksum(&pkt[ip_base..ip_base + IPV4_MIN_HEADER_LEN]);
        pkt[ip_base + 10] = (checksum >> 8) as u8;
        pkt[ip_base + 11] = (checksum & 0xFF) as u8;

        let tcp_base = ip_base + IPV4_MIN_HEADER_LEN;
        pkt[tcp_base] = (src_port >> 8) as u8;
        pkt[tcp_base + 1] = (src_port & 0xFF) as u8;
        pkt[tcp_base + 2] = (dst_port >> 8) as u8;
        pkt[tcp_base + 3] = (dst_port & 0xFF) as u8;
        pkt[tcp_base + 12] = 5 << 4; // data offset = 5 words = 20 bytes

        pkt
    }

    fn compute_ipv4_checksum(header: &[u8]) -> u16 {
        let mut sum: u32 = 0;
        for (i, chunk) in header.chunks_exact(2).enumerate() {
            if i == 5 {
                continue;
            }
            sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }

    fn build_ipv6_icmpv6_frame() -> Vec<u8> {
        let mut pkt = vec![0u8; ETHERNET_HEADER_LEN + IPV6_HEADER_LEN + 8];
        pkt[12] = 0x86;
        pkt[13] = 0xDD;
        let base = ETHERNET_HEADER_LEN;
        pkt[base] = 0x60; // version 6
        pkt[base + 6] = IPV6_NEXT_HEADER_ICMPV6;
        pkt
    }

    #[test]
    fn test_frame_too_short_for_ethernet_is_parse_error() {
        let short = vec![0u8; 13];
        assert!(parse(&short).is_none());
    }

    #[test]
    fn test_parse_valid_tcp_ipv4_with_correct_checksum() {
        let pkt = build_ipv4_tcp_frame(12345, 80, 4);
        let parsed = parse(&pkt).unwrap();
        assert_eq!(parsed.ethernet.ethertype, ETHERTYPE_IPV4);
        let ip = parsed.ipv4.unwrap();
        assert_eq!(ip.protocol, IP_PROTO_TCP);
        assert_eq!(parsed.ipv4_checksum_valid, Some(true));
        let tcp = parsed.tcp.unwrap();
        assert_eq!(tcp.src_port, 12345);
        assert_eq!(tcp.dst_port, 80);
        assert_eq!(parsed.payload.len(), 4);
    }

    #[test]
    fn test_corrupted_checksum_does_not_suppress_later_layers() {
        let mut pkt = build_ipv4_tcp_frame(1, 2, 0);
        pkt[ETHERNET_HEADER_LEN + 10] ^= 0xFF; // flip checksum bytes
        let parsed = parse(&pkt).unwrap();
        assert_eq!(parsed.ipv4_checksum_valid, Some(false));
        assert!(parsed.tcp.is_some());
    }

    #[test]
    fn test_ipv4_short_payload_no_l4_parsed() {
        let mut pkt = vec![0u8; ETHERNET_HEADER_LEN + IPV4_MIN_HEADER_LEN];
        pkt[12] = 0x08;
        pkt[13] = 0x00;
        pkt[ETHERNET_HEADER_LEN] = 0x45;
        pkt[ETHERNET_HEADER_LEN + 9] = IP_PROTO_TCP;
        let parsed = parse(&pkt).unwrap();
        assert!(parsed.ipv4.is_some());
        assert!(parsed.tcp.is_none());
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn test_ipv6_next_header_read_at_offset_20() {
        let pkt = build_ipv6_icmpv6_frame();
        let parsed = parse(&pkt).unwrap();
        assert_eq!(parsed.ipv6_next_header, Some(IPV6_NEXT_HEADER_ICMPV6));
        assert_eq!(classify_ip_protocol(parsed.ipv6_next_header.unwrap()), L4Class::Icmp);
    }

    #[test]
    fn test_classify_ethertype_maps_known_values() {
        assert_eq!(classify_ethertype(ETHERTYPE_IPV4), EtherClass::Ipv4);
        assert_eq!(classify_ethertype(ETHERTYPE_IPV6), EtherClass::Ipv6);
        assert_eq!(classify_ethertype(ETHERTYPE_ARP), EtherClass::Arp);
        assert_eq!(classify_ethertype(0x1234), EtherClass::Other);
    }

    #[test]
    fn test_packet_record_round_trips_bytes_and_length() {
        let frame = build_ipv4_tcp_frame(1, 2, 10);
        let record = PacketRecord::new(&frame, 42);
        assert_eq!(record.packet_length as usize, frame.len());
        assert_eq!(record.raw(), &frame[..]);
        assert_eq!(record.capture_ts_ns, 42);
        assert!(record.parse().is_some());
    }
}
