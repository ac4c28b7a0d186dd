//! Linux `AF_PACKET` raw-socket capture source.
//!
//! Opening this socket requires elevated privileges (`CAP_NET_RAW` or root), matching the
//! operator expectations in SPEC_FULL.md §1. Binding fails cleanly with a descriptive
//! `AppError::Capture` when the interface name is unknown or privileges are missing.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};

use socket2::Socket;

use super::{frame_is_icmp, CaptureRead, CaptureSource, Filter};
use crate::config::CAPTURE_RECV_BUFFER_BYTES;
use crate::error::AppError;

pub struct LinuxPacketSocket {
    fd: RawFd,
    filter: Filter,
}

impl LinuxPacketSocket {
    pub fn new(interface: &str) -> Result<Self, AppError> {
        let protocol = (libc::ETH_P_ALL as u16).to_be();

        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW | libc::SOCK_NONBLOCK, protocol as i32) };
        if fd < 0 {
            return Err(AppError::Capture(format!(
                "socket(AF_PACKET) failed: {}",
                io::Error::last_os_error()
            )));
        }

        let if_index = match if_nametoindex(interface) {
            Ok(idx) => idx,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = if_index as i32;

        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(AppError::Capture(format!(
                "bind to interface '{interface}' failed: {err}"
            )));
        }

        // Widen the kernel receive buffer via socket2's safe setsockopt wrapper; the fd is
        // handed back unchanged so our own Drop impl remains the sole owner.
        let socket = unsafe { Socket::from_raw_fd(fd) };
        if let Err(e) = socket.set_recv_buffer_size(CAPTURE_RECV_BUFFER_BYTES) {
            tracing::warn!("failed to set receive buffer size: {e}");
        }
        let fd = socket.into_raw_fd();

        tracing::info!("opened AF_PACKET capture socket on {interface}");
        Ok(LinuxPacketSocket {
            fd,
            filter: Filter::None,
        })
    }
}

fn if_nametoindex(name: &str) -> Result<u32, AppError> {
    let cname = CString::new(name)
        .map_err(|_| AppError::Config(format!("interface name '{name}' contains a NUL byte")))?;
    let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if idx == 0 {
        Err(AppError::Capture(format!("unknown interface '{name}'")))
    } else {
        Ok(idx)
    }
}

impl CaptureSource for LinuxPacketSocket {
    fn set_filter(&mut self, filter: Filter) -> Result<(), AppError> {
        self.filter = filter;
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> CaptureRead {
        let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        if n > 0 {
            let len = n as usize;
            if self.filter == Filter::Icmp && !frame_is_icmp(&buf[..len]) {
                return CaptureRead::NoPacket;
            }
            CaptureRead::Packet(len)
        } else if n == 0 {
            CaptureRead::NoPacket
        } else {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                CaptureRead::NoPacket
            } else {
                CaptureRead::TransientError(err.to_string())
            }
        }
    }
}

impl Drop for LinuxPacketSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
