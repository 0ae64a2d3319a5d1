//! Received TTL/hop-limit and ToS/traffic-class of incoming datagrams.
//!
//! The kernel hands these over as control messages on `recvmsg`, which
//! socket2 does not parse, so this module talks to libc directly. Only
//! Linux and Android are wired up; elsewhere [`enable`] reports the
//! capability as missing and callers fall back to a plain `recv`.

use std::io;

use socket2::Socket;

/// Per-datagram metadata, `None` when the kernel did not provide it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ancillary {
    pub ttl: Option<u8>,
    pub tos: Option<u8>,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod imp {
    use std::{io, mem, os::unix::io::AsRawFd, ptr};

    use libc::c_int;
    use socket2::Socket;

    use super::Ancillary;

    // Control buffer, aligned for cmsghdr
    #[repr(C, align(8))]
    struct ControlBuf([u8; 128]);

    pub(super) fn set_int_opt(
        socket: &Socket,
        level: c_int,
        name: c_int,
        value: c_int,
    ) -> io::Result<()> {
        // Safety: value outlives the call and the length matches its type
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                level,
                name,
                &value as *const c_int as *const libc::c_void,
                mem::size_of::<c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn enable(socket: &Socket, ipv6: bool) -> io::Result<bool> {
        if ipv6 {
            set_int_opt(
                socket,
                libc::IPPROTO_IPV6,
                libc::IPV6_RECVHOPLIMIT,
                1,
            )?;
            set_int_opt(socket, libc::IPPROTO_IPV6, libc::IPV6_RECVTCLASS, 1)?;
        } else {
            set_int_opt(socket, libc::IPPROTO_IP, libc::IP_RECVTTL, 1)?;
            set_int_opt(socket, libc::IPPROTO_IP, libc::IP_RECVTOS, 1)?;
        }
        Ok(true)
    }

    pub(super) fn recv(
        socket: &Socket,
        buf: &mut [u8],
    ) -> io::Result<(usize, Ancillary)> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let mut control = ControlBuf([0u8; 128]);
        // Safety: an all-zero msghdr is a valid empty header
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1 as _;
        msg.msg_control = control.0.as_mut_ptr().cast();
        msg.msg_controllen = control.0.len() as _;

        // Safety: iov and control point at live buffers for the whole call
        let n = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut meta = Ancillary::default();
        // Safety: msg was filled in by recvmsg and control is still alive;
        // the CMSG_* helpers never walk past msg_controllen.
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                let hdr = &*cmsg;
                let data = libc::CMSG_DATA(cmsg);
                match (hdr.cmsg_level, hdr.cmsg_type) {
                    (libc::IPPROTO_IP, libc::IP_TTL) => {
                        meta.ttl = Some(read_int(data) as u8);
                    }
                    // IP_TOS is delivered as a single byte
                    (libc::IPPROTO_IP, libc::IP_TOS) => {
                        meta.tos = Some(*data);
                    }
                    (libc::IPPROTO_IPV6, libc::IPV6_HOPLIMIT) => {
                        meta.ttl = Some(read_int(data) as u8);
                    }
                    (libc::IPPROTO_IPV6, libc::IPV6_TCLASS) => {
                        meta.tos = Some(read_int(data) as u8);
                    }
                    _ => {}
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }
        Ok((n as usize, meta))
    }

    unsafe fn read_int(data: *const u8) -> c_int {
        ptr::read_unaligned(data as *const c_int)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod imp {
    use std::io;

    use socket2::Socket;

    use super::Ancillary;

    pub(super) fn enable(_socket: &Socket, _ipv6: bool) -> io::Result<bool> {
        Ok(false)
    }

    pub(super) fn recv(
        socket: &Socket,
        buf: &mut [u8],
    ) -> io::Result<(usize, Ancillary)> {
        let n = io::Read::read(&mut &*socket, buf)?;
        Ok((n, Ancillary::default()))
    }
}

/// Ask the kernel to attach TTL and ToS to every received datagram.
/// Returns `false` where the platform cannot do that.
pub(crate) fn enable(socket: &Socket, ipv6: bool) -> io::Result<bool> {
    imp::enable(socket, ipv6)
}

pub(crate) fn recv(
    socket: &Socket,
    buf: &mut [u8],
) -> io::Result<(usize, Ancillary)> {
    imp::recv(socket, buf)
}

/// socket2 has no setter for the IPv6 traffic class.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn set_traffic_class(socket: &Socket, tclass: u8) -> io::Result<()> {
    imp::set_int_opt(socket, libc::IPPROTO_IPV6, libc::IPV6_TCLASS, tclass as _)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn set_traffic_class(
    socket: &Socket,
    _tclass: u8,
) -> io::Result<()> {
    let _ = socket;
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "setting the IPv6 traffic class is not supported on this platform",
    ))
}
