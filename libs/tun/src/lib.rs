//! TUN device handling: opens a kernel tunnel interface, brings it up, and
//! configures its IPv4 address/destination/netmask directly through ioctls
//! rather than going through a netlink client — this crate talks to the
//! same `/dev/net/tun` and `utunN` control-socket primitives the original
//! VPN's platform-specific TUN drivers used.

mod common;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;

use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

#[cfg(target_os = "linux")]
pub use linux::LinuxTun as PlatformTun;
#[cfg(target_os = "macos")]
pub use macos::DarwinTun as PlatformTun;

#[derive(Debug, Error)]
pub enum TunError {
    #[error("interface name {0:?} does not fit in IFNAMSIZ")]
    NameTooLong(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("no free {prefix}N device name available")]
    NoFreeName { prefix: &'static str },
    #[error("invalid utun interface name {0:?}")]
    InvalidUtunName(String),
}

/// Which of a TUN interface's three IPv4 properties an operation targets.
/// Mirrors the ADDRESS / DST_ADDRESS / NETMASK trio the original TUN layer
/// addresses through the same three ioctls on every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrKind {
    Address,
    DstAddress,
    Netmask,
}

/// A kernel TUN interface: point-to-point IPv4 framing, no link-layer
/// header, raw `AF_INET`-addressed packets in and out.
pub trait TunDevice: Send + Sync {
    fn name(&self) -> &str;

    fn mtu(&self) -> Result<i32, TunError>;
    fn set_mtu(&self, mtu: i32) -> Result<(), TunError>;

    fn ipv4(&self, kind: AddrKind) -> Result<Ipv4Addr, TunError>;
    fn set_ipv4(&self, kind: AddrKind, addr: Ipv4Addr) -> Result<(), TunError>;

    fn up(&self) -> Result<(), TunError>;
    fn down(&self) -> Result<(), TunError>;

    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&self, buf: &[u8]) -> io::Result<usize>;
}

/// Finds the lowest-numbered `{prefix}N` not already claimed by an existing
/// interface, the way the original's device allocator scans every interface
/// name on the host before picking a free `tunN` (Linux) or `utunN`
/// (Darwin) index.
pub fn allocate_device_name(prefix: &'static str) -> Result<String, TunError> {
    let existing = common::list_interface_names()?;

    for i in 0..4096 {
        let candidate = format!("{prefix}{i}");
        if !existing.iter().any(|n| n.contains(&candidate)) {
            return Ok(candidate);
        }
    }

    Err(TunError::NoFreeName { prefix })
}

/// Allocates a free device name for this platform, opens it, and brings the
/// interface up.
pub fn open_new() -> Result<PlatformTun, TunError> {
    let name = allocate_device_name(PlatformTun::NAME_PREFIX)?;
    tracing::info!(name, "allocating TUN interface");

    let tun = PlatformTun::create(&name)?;
    tun.up()?;
    Ok(tun)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_device_name_finds_a_free_index() {
        let name = allocate_device_name("tun-test-unlikely-prefix-").unwrap();
        assert!(name.starts_with("tun-test-unlikely-prefix-0"));
    }
}
