use std::ffi::{c_int, c_short, c_uchar};
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;

use crate::common::{self, IFNAMSIZE};
use crate::{AddrKind, TunDevice, TunError};

const TUN_FILE: &[u8] = b"/dev/net/tun\0";
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TUN: c_short = 0x0001;
const IFF_NO_PI: c_short = 0x1000;
const IFF_UP: c_short = 0x1;

#[repr(C)]
union IfrIfru {
    flags: c_short,
    mtu: c_int,
    addr_v4: libc::sockaddr_in,
}

#[repr(C)]
struct IfReq {
    name: [c_uchar; IFNAMSIZE],
    ifru: IfrIfru,
}

impl IfReq {
    fn named(name: &str) -> Result<Self, TunError> {
        Ok(Self {
            name: common::name_bytes(name)?,
            ifru: IfrIfru { flags: 0 },
        })
    }
}

pub struct LinuxTun {
    name: String,
    fd: RawFd,
}

impl LinuxTun {
    pub(crate) const NAME_PREFIX: &'static str = "tun";

    pub fn create(name: &str) -> Result<Self, TunError> {
        let fd = unsafe { libc::open(TUN_FILE.as_ptr() as *const _, libc::O_RDWR) };
        if fd < 0 {
            return Err(TunError::Io(io::Error::last_os_error()));
        }

        let mut req = IfReq::named(name)?;
        req.ifru = IfrIfru {
            flags: IFF_TUN | IFF_NO_PI,
        };

        if unsafe { libc::ioctl(fd, TUNSETIFF as _, &req) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TunError::Io(err));
        }

        Ok(Self {
            name: name.to_string(),
            fd,
        })
    }

    fn get_flags(&self) -> Result<c_short, TunError> {
        let mut req = IfReq::named(&self.name)?;
        unsafe {
            common::ioctl_on_fresh_socket(libc::SIOCGIFFLAGS as _, &mut req as *mut _ as *mut _)
        }?;
        Ok(unsafe { req.ifru.flags })
    }

    fn set_flags(&self, flags: c_short) -> Result<(), TunError> {
        let mut req = IfReq::named(&self.name)?;
        req.ifru = IfrIfru { flags };
        unsafe {
            common::ioctl_on_fresh_socket(libc::SIOCSIFFLAGS as _, &mut req as *mut _ as *mut _)
        }?;
        Ok(())
    }

    fn ioctl_cmd_for(kind: AddrKind, get: bool) -> libc::c_ulong {
        match (kind, get) {
            (AddrKind::Address, true) => libc::SIOCGIFADDR as _,
            (AddrKind::Address, false) => libc::SIOCSIFADDR as _,
            (AddrKind::DstAddress, true) => libc::SIOCGIFDSTADDR as _,
            (AddrKind::DstAddress, false) => libc::SIOCSIFDSTADDR as _,
            (AddrKind::Netmask, true) => libc::SIOCGIFNETMASK as _,
            (AddrKind::Netmask, false) => libc::SIOCSIFNETMASK as _,
        }
    }
}

impl TunDevice for LinuxTun {
    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> Result<i32, TunError> {
        let mut req = IfReq::named(&self.name)?;
        unsafe {
            common::ioctl_on_fresh_socket(libc::SIOCGIFMTU as _, &mut req as *mut _ as *mut _)
        }?;
        Ok(unsafe { req.ifru.mtu })
    }

    fn set_mtu(&self, mtu: i32) -> Result<(), TunError> {
        let mut req = IfReq::named(&self.name)?;
        req.ifru = IfrIfru { mtu };
        unsafe {
            common::ioctl_on_fresh_socket(libc::SIOCSIFMTU as _, &mut req as *mut _ as *mut _)
        }?;
        Ok(())
    }

    fn ipv4(&self, kind: AddrKind) -> Result<Ipv4Addr, TunError> {
        let mut req = IfReq::named(&self.name)?;
        req.ifru = IfrIfru {
            addr_v4: libc::sockaddr_in {
                sin_family: libc::AF_INET as _,
                sin_port: 0,
                sin_addr: libc::in_addr { s_addr: 0 },
                sin_zero: [0; 8],
            },
        };
        unsafe {
            common::ioctl_on_fresh_socket(
                Self::ioctl_cmd_for(kind, true),
                &mut req as *mut _ as *mut _,
            )
        }?;
        let bits = unsafe { req.ifru.addr_v4.sin_addr.s_addr };
        Ok(Ipv4Addr::from(u32::from_be(bits)))
    }

    fn set_ipv4(&self, kind: AddrKind, addr: Ipv4Addr) -> Result<(), TunError> {
        let mut req = IfReq::named(&self.name)?;
        req.ifru = IfrIfru {
            addr_v4: libc::sockaddr_in {
                sin_family: libc::AF_INET as _,
                sin_port: 0,
                sin_addr: libc::in_addr {
                    s_addr: u32::from(addr).to_be(),
                },
                sin_zero: [0; 8],
            },
        };
        unsafe {
            common::ioctl_on_fresh_socket(
                Self::ioctl_cmd_for(kind, false),
                &mut req as *mut _ as *mut _,
            )
        }?;

        if kind == AddrKind::Netmask {
            // Re-applying the address after the netmask avoids a stale
            // ADDRESS ioctl result on drivers that clear it when the
            // netmask changes; see DarwinTun::create for the platform this
            // was originally worked around on.
            if let Ok(addr) = self.ipv4(AddrKind::Address) {
                let _ = self.set_ipv4(AddrKind::Address, addr);
            }
        }
        Ok(())
    }

    fn up(&self) -> Result<(), TunError> {
        let flags = self.get_flags()?;
        self.set_flags(flags | IFF_UP)
    }

    fn down(&self) -> Result<(), TunError> {
        let flags = self.get_flags()?;
        self.set_flags(flags & !IFF_UP)
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut _, buf.len()) } {
            -1 => Err(io::Error::last_os_error()),
            n => Ok(n as usize),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        match unsafe { libc::write(self.fd, buf.as_ptr() as *const _, buf.len()) } {
            -1 => Err(io::Error::last_os_error()),
            n => Ok(n as usize),
        }
    }
}

impl Drop for LinuxTun {
    fn drop(&mut self) {
        let _ = self.down();
        unsafe { libc::close(self.fd) };
    }
}
