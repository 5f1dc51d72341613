//! Local network interface lookup and the MANET multicast socket setup
//! the daemon binds per mesh interface.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, UdpSocket};

use thiserror::Error;

/// The well-known link-local multicast groups of MANET routers.
pub const MANET_MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 109);
pub const MANET_MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x6d);

#[derive(Debug, Error)]
pub enum IfsError {
    #[error("unknown interface '{0}'")]
    UnknownInterface(String),

    #[error("socket setup failed: {0}")]
    Io(#[from] io::Error),
}

/// Resolve an interface name to its kernel index.
#[cfg(target_os = "linux")]
pub fn if_index_by_name(name: &str) -> Result<u32, IfsError> {
    use std::ffi::CString;

    let cname =
        CString::new(name).map_err(|_| IfsError::UnknownInterface(name.to_string()))?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(IfsError::UnknownInterface(name.to_string()));
    }
    Ok(index)
}

#[cfg(not(target_os = "linux"))]
pub fn if_index_by_name(name: &str) -> Result<u32, IfsError> {
    Err(IfsError::UnknownInterface(name.to_string()))
}

/// Open the IPv4 mesh socket of one interface: bound to the MANET port
/// on the wildcard address, pinned to the device, joined to the
/// manet-routers group, multicast loop off, non-blocking.
#[cfg(target_os = "linux")]
pub fn open_v4(if_name: &str, if_index: u32, port: u16) -> Result<UdpSocket, IfsError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    bind_to_device(&socket, if_name)?;

    let mreqn = libc::ip_mreqn {
        imr_multiaddr: libc::in_addr {
            s_addr: u32::from_ne_bytes(MANET_MULTICAST_V4.octets()),
        },
        imr_address: libc::in_addr { s_addr: 0 },
        imr_ifindex: if_index as libc::c_int,
    };
    setsockopt(
        &socket,
        libc::IPPROTO_IP,
        libc::IP_ADD_MEMBERSHIP,
        &mreqn,
    )?;
    setsockopt(&socket, libc::IPPROTO_IP, libc::IP_MULTICAST_IF, &mreqn)?;
    setsockopt(
        &socket,
        libc::IPPROTO_IP,
        libc::IP_MULTICAST_LOOP,
        &(0 as libc::c_int),
    )?;

    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Open the IPv6 mesh socket of one interface, mirror of [`open_v4`].
#[cfg(target_os = "linux")]
pub fn open_v6(if_name: &str, if_index: u32, port: u16) -> Result<UdpSocket, IfsError> {
    let socket = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, port))?;
    bind_to_device(&socket, if_name)?;

    let mreq = libc::ipv6_mreq {
        ipv6mr_multiaddr: libc::in6_addr {
            s6_addr: MANET_MULTICAST_V6.octets(),
        },
        ipv6mr_interface: if_index,
    };
    setsockopt(
        &socket,
        libc::IPPROTO_IPV6,
        libc::IPV6_ADD_MEMBERSHIP,
        &mreq,
    )?;
    setsockopt(
        &socket,
        libc::IPPROTO_IPV6,
        libc::IPV6_MULTICAST_IF,
        &(if_index as libc::c_int),
    )?;
    setsockopt(
        &socket,
        libc::IPPROTO_IPV6,
        libc::IPV6_MULTICAST_LOOP,
        &(0 as libc::c_int),
    )?;

    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(not(target_os = "linux"))]
pub fn open_v4(_if_name: &str, _if_index: u32, port: u16) -> Result<UdpSocket, IfsError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(not(target_os = "linux"))]
pub fn open_v6(_if_name: &str, _if_index: u32, port: u16) -> Result<UdpSocket, IfsError> {
    let socket = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, port))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(target_os = "linux")]
fn bind_to_device(socket: &UdpSocket, if_name: &str) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            if_name.as_ptr() as *const libc::c_void,
            if_name.len() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn setsockopt<T>(
    socket: &UdpSocket,
    level: libc::c_int,
    name: libc::c_int,
    value: &T,
) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn loopback_has_an_index() {
        assert!(if_index_by_name("lo").unwrap() > 0);
        assert!(if_index_by_name("definitely-not-an-interface").is_err());
    }
}
