use std::ffi::{c_int, c_short, c_uchar};
use std::io;
use std::mem::size_of;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;

use crate::common::{self, IFNAMSIZE};
use crate::{AddrKind, TunDevice, TunError};

const CTL_NAME: &[u8] = b"com.apple.net.utun_control";

// These BSD sockio ioctls aren't exposed by the `libc` crate for this
// target (only `SIOCGIFMTU` is, oddly); the numeric values are the
// standard `sys/sockio.h` constants.
const SIOCGIFFLAGS: libc::c_ulong = 0xc020_6911;
const SIOCSIFFLAGS: libc::c_ulong = 0x8020_6910;
const SIOCGIFMTU: libc::c_ulong = 0xc020_6933;
const SIOCSIFMTU: libc::c_ulong = 0x8020_6934;
const SIOCGIFADDR: libc::c_ulong = 0xc020_6921;
const SIOCSIFADDR: libc::c_ulong = 0x8020_690c;
const SIOCGIFDSTADDR: libc::c_ulong = 0xc020_6922;
const SIOCSIFDSTADDR: libc::c_ulong = 0x8020_690e;
const SIOCGIFNETMASK: libc::c_ulong = 0xc020_6925;
const SIOCSIFNETMASK: libc::c_ulong = 0x8020_6916;
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

pub struct DarwinTun {
    name: String,
    fd: RawFd,
}

impl DarwinTun {
    pub(crate) const NAME_PREFIX: &'static str = "utun";

    pub fn create(name: &str) -> Result<Self, TunError> {
        let unit = parse_utun_unit(name)?;

        let fd =
            unsafe { libc::socket(libc::PF_SYSTEM, libc::SOCK_DGRAM, libc::SYSPROTO_CONTROL) };
        if fd < 0 {
            return Err(TunError::Io(io::Error::last_os_error()));
        }

        let mut info = libc::ctl_info {
            ctl_id: 0,
            ctl_name: [0; 96],
        };
        // SAFETY: copying raw bytes between two byte-sized integer types
        // (`c_char` is `i8` on this target); we only care about the bit
        // pattern, not the signedness.
        info.ctl_name[..CTL_NAME.len()]
            .copy_from_slice(unsafe { &*(CTL_NAME as *const [u8] as *const [i8]) });

        if unsafe { libc::ioctl(fd, libc::CTLIOCGINFO, &mut info) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TunError::Io(err));
        }

        let addr = libc::sockaddr_ctl {
            sc_len: size_of::<libc::sockaddr_ctl>() as u8,
            sc_family: libc::AF_SYSTEM as u8,
            ss_sysaddr: libc::AF_SYS_CONTROL as u16,
            sc_id: info.ctl_id,
            sc_unit: unit,
            sc_reserved: Default::default(),
        };

        let ret = unsafe {
            libc::connect(
                fd,
                &addr as *const libc::sockaddr_ctl as *const libc::sockaddr,
                size_of::<libc::sockaddr_ctl>() as u32,
            )
        };
        if ret != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TunError::Io(err));
        }

        let this = Self {
            name: name.to_string(),
            fd,
        };

        // Setting the netmask before the address panics the kernel on
        // macOS; seed all three in ADDRESS / DST_ADDRESS / NETMASK order.
        this.set_ipv4(AddrKind::Address, Ipv4Addr::UNSPECIFIED)?;
        this.set_ipv4(AddrKind::DstAddress, Ipv4Addr::UNSPECIFIED)?;
        this.set_ipv4(AddrKind::Netmask, Ipv4Addr::new(255, 255, 255, 255))?;

        Ok(this)
    }

    fn get_flags(&self) -> Result<c_short, TunError> {
        let mut req = IfReq::named(&self.name)?;
        unsafe { common::ioctl_on_fresh_socket(SIOCGIFFLAGS, &mut req as *mut _ as *mut _) }?;
        Ok(unsafe { req.ifru.flags })
    }

    fn set_flags(&self, flags: c_short) -> Result<(), TunError> {
        let mut req = IfReq::named(&self.name)?;
        req.ifru = IfrIfru { flags };
        unsafe { common::ioctl_on_fresh_socket(SIOCSIFFLAGS, &mut req as *mut _ as *mut _) }?;
        Ok(())
    }

    fn ioctl_cmd_for(kind: AddrKind, get: bool) -> libc::c_ulong {
        match (kind, get) {
            (AddrKind::Address, true) => SIOCGIFADDR,
            (AddrKind::Address, false) => SIOCSIFADDR,
            (AddrKind::DstAddress, true) => SIOCGIFDSTADDR,
            (AddrKind::DstAddress, false) => SIOCSIFDSTADDR,
            (AddrKind::Netmask, true) => SIOCGIFNETMASK,
            (AddrKind::Netmask, false) => SIOCSIFNETMASK,
        }
    }
}

impl TunDevice for DarwinTun {
    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> Result<i32, TunError> {
        let mut req = IfReq::named(&self.name)?;
        unsafe { common::ioctl_on_fresh_socket(SIOCGIFMTU, &mut req as *mut _ as *mut _) }?;
        Ok(unsafe { req.ifru.mtu })
    }

    fn set_mtu(&self, mtu: i32) -> Result<(), TunError> {
        let mut req = IfReq::named(&self.name)?;
        req.ifru = IfrIfru { mtu };
        unsafe { common::ioctl_on_fresh_socket(SIOCSIFMTU, &mut req as *mut _ as *mut _) }?;
        Ok(())
    }

    fn ipv4(&self, kind: AddrKind) -> Result<Ipv4Addr, TunError> {
        let mut req = IfReq::named(&self.name)?;
        req.ifru = IfrIfru {
            addr_v4: libc::sockaddr_in {
                sin_len: size_of::<libc::sockaddr_in>() as u8,
                sin_family: libc::AF_INET as u8,
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
                sin_len: size_of::<libc::sockaddr_in>() as u8,
                sin_family: libc::AF_INET as u8,
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
        let mut hdr = [0u8; 4];
        let mut iov = [
            libc::iovec {
                iov_base: hdr.as_mut_ptr() as *mut _,
                iov_len: hdr.len(),
            },
            libc::iovec {
                iov_base: buf.as_mut_ptr() as *mut _,
                iov_len: buf.len(),
            },
        ];

        match unsafe { libc::readv(self.fd, iov.as_mut_ptr(), 2) } {
            -1 => Err(io::Error::last_os_error()),
            n if n <= 4 => Ok(0),
            n => Ok((n - 4) as usize),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let af: u32 = if buf[0] >> 4 == 6 {
            libc::AF_INET6 as u32
        } else {
            libc::AF_INET as u32
        };
        let mut hdr = af.to_be_bytes();

        // `writev` never mutates its input; the `iovec` type just doesn't
        // distinguish `readv`'s and `writev`'s pointer mutability.
        let mut iov = [
            libc::iovec {
                iov_base: hdr.as_mut_ptr() as *mut _,
                iov_len: hdr.len(),
            },
            libc::iovec {
                iov_base: buf.as_ptr() as *mut _,
                iov_len: buf.len(),
            },
        ];

        match unsafe { libc::writev(self.fd, iov.as_mut_ptr(), 2) } {
            -1 => Err(io::Error::last_os_error()),
            n => Ok((n as usize).saturating_sub(4)),
        }
    }
}

impl Drop for DarwinTun {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

fn parse_utun_unit(name: &str) -> Result<u32, TunError> {
    let digits = name.trim_start_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() {
        return Err(TunError::InvalidUtunName(name.to_string()));
    }
    let id: u32 = digits
        .parse()
        .map_err(|_| TunError::InvalidUtunName(name.to_string()))?;
    Ok(id + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unit_from_utun_name() {
        assert_eq!(parse_utun_unit("utun3").unwrap(), 4);
        assert_eq!(parse_utun_unit("utun0").unwrap(), 1);
    }

    #[test]
    fn rejects_name_without_digits() {
        assert!(parse_utun_unit("utun").is_err());
    }
}
