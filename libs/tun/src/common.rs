use std::ffi::c_uchar;
use std::io;

use crate::TunError;

pub(crate) const IFNAMSIZE: usize = 16;

pub(crate) fn name_bytes(name: &str) -> Result<[c_uchar; IFNAMSIZE], TunError> {
    if name.len() >= IFNAMSIZE {
        return Err(TunError::NameTooLong(name.to_string()));
    }
    let mut buf = [0u8; IFNAMSIZE];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    Ok(buf)
}

/// Runs a single ioctl on a throwaway `AF_INET`/`SOCK_DGRAM` socket. Every
/// interface-configuration ioctl (flags, MTU, IPv4 address) goes through a
/// fresh socket rather than the TUN device's own file descriptor.
pub(crate) unsafe fn ioctl_on_fresh_socket(
    cmd: libc::c_ulong,
    ptr: *mut libc::c_void,
) -> io::Result<()> {
    let sock = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
    if sock < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = libc::ioctl(sock, cmd as _, ptr);
    let err = io::Error::last_os_error();
    libc::close(sock);
    if ret < 0 {
        return Err(err);
    }
    Ok(())
}

/// Lists every interface name currently known to the kernel, the way
/// `net.Interfaces()` does for the original's device-name scan.
pub(crate) fn list_interface_names() -> io::Result<Vec<String>> {
    let head = unsafe { libc::if_nameindex() };
    if head.is_null() {
        return Err(io::Error::last_os_error());
    }

    let mut names = Vec::new();
    unsafe {
        let mut p = head;
        while (*p).if_index != 0 {
            names.push(
                std::ffi::CStr::from_ptr((*p).if_name)
                    .to_string_lossy()
                    .into_owned(),
            );
            p = p.add(1);
        }
        libc::if_freenameindex(head);
    }
    Ok(names)
}
