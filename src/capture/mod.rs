//! Capture-source abstraction and its concrete backends.
//!
//! The run loop is backend-agnostic: it only depends on the `CaptureSource` trait. The
//! Linux `AF_PACKET` backend is the production path; the synthetic backend manufactures
//! realistic frames for portable operation, CI, and the test suite.

#[cfg(target_os = "linux")]
pub mod socket;
pub mod synthetic;

use crate::error::AppError;

/// Link-layer filter applied by the capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Forward every frame.
    None,
    /// Forward only ICMPv4 and ICMPv6 frames, at link layer.
    Icmp,
}

impl Filter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Filter::None => "none",
            Filter::Icmp => "icmp",
        }
    }
}

/// Outcome of one non-blocking read attempt.
pub enum CaptureRead {
    /// A frame of `usize` bytes was written into the caller's buffer.
    Packet(usize),
    /// No packet currently available; the run loop should back off briefly.
    NoPacket,
    /// A transient error occurred; the run loop logs and retries.
    TransientError(String),
}

/// Construction, filter configuration, and non-blocking reads from a link-layer source.
/// Implementors release OS resources in `Drop`.
pub trait CaptureSource: Send {
    fn set_filter(&mut self, filter: Filter) -> Result<(), AppError>;
    fn read_frame(&mut self, buf: &mut [u8]) -> CaptureRead;
}

/// Returns whether the given ethernet frame's IP payload is ICMPv4 or ICMPv6, used by
/// backends that apply the `icmp` filter themselves rather than delegating to an OS-level
/// BPF program.
pub(crate) fn frame_is_icmp(data: &[u8]) -> bool {
    match crate::packet::PacketRecord::new(data, 0).parse() {
        Some(parsed) => {
            if let Some(ipv4) = parsed.ipv4 {
                ipv4.protocol == crate::packet::IP_PROTO_ICMP
            } else {
                parsed.ipv6_next_header == Some(crate::packet::IPV6_NEXT_HEADER_ICMPV6)
            }
        }
        None => false,
    }
}
