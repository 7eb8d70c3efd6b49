//! Fallback for Unix systems without a NUMA interface (macOS, the BSDs).
//!
//! Free memory comes from `sysctl` on macOS and FreeBSD.
//!
//! Pages come from anonymous `mmap`. Placement, affinity and memory-policy
//! calls report [`io::ErrorKind::Unsupported`].

use std::io;
use std::ptr::{self, NonNull};

use libc::c_void;

use crate::error::{Error, Result};
use crate::mask::CpuMask;
use crate::platform::{PolicyMode, ThreadTarget};
use crate::topology::NodeId;
use crate::utils::alignment::page_size;

fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "NUMA placement is not supported on this platform")
}

pub fn num_cpus() -> usize {
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if count < 1 {
        1
    } else {
        count as usize
    }
}

pub fn total_memory() -> Result<u64> {
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    if pages < 0 {
        return Err(Error::SystemCallFailed(io::Error::last_os_error()));
    }
    Ok(pages as u64 * page_size() as u64)
}

/// Sysctl holding the free page count, as a 32-bit integer.
#[cfg(any(target_os = "macos", target_os = "ios"))]
const FREE_PAGES_SYSCTL: &[u8] = b"vm.page_free_count\0";
#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
const FREE_PAGES_SYSCTL: &[u8] = b"vm.stats.vm.v_free_count\0";

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "dragonfly"))]
pub fn free_memory() -> Result<u64> {
    let mut pages: u32 = 0;
    let mut len = std::mem::size_of::<u32>();
    let ret = unsafe {
        libc::sysctlbyname(
            FREE_PAGES_SYSCTL.as_ptr() as *const libc::c_char,
            &mut pages as *mut u32 as *mut c_void,
            &mut len,
            ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        return Err(Error::SystemCallFailed(io::Error::last_os_error()));
    }
    Ok(pages as u64 * page_size() as u64)
}

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "dragonfly")))]
pub fn free_memory() -> Result<u64> {
    Err(Error::SystemCallFailed(io::Error::new(
        io::ErrorKind::Unsupported,
        "free memory is not reported on this platform",
    )))
}

pub fn map_pages(len: usize, _populate: bool) -> io::Result<NonNull<u8>> {
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr as *mut u8).ok_or_else(|| io::Error::from_raw_os_error(libc::ENOMEM))
}

pub unsafe fn unmap_pages(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    if libc::munmap(ptr.as_ptr() as *mut c_void, len) == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub unsafe fn bind_pages(
    _addr: *mut u8,
    _len: usize,
    _mode: PolicyMode,
    _nodes: &[NodeId],
    _move_pages: bool,
) -> io::Result<()> {
    Err(unsupported())
}

pub fn set_thread_policy(_mode: PolicyMode, _nodes: &[NodeId]) -> io::Result<()> {
    Err(unsupported())
}

pub fn thread_policy() -> io::Result<(PolicyMode, Vec<NodeId>)> {
    Err(unsupported())
}

pub fn address_node(_addr: *const u8) -> io::Result<NodeId> {
    Err(unsupported())
}

pub fn get_affinity(_target: ThreadTarget, _mask: &mut CpuMask, _num_cpus: usize) -> io::Result<()> {
    Err(unsupported())
}

pub fn set_affinity(_target: ThreadTarget, _mask: &CpuMask, _num_cpus: usize) -> io::Result<()> {
    Err(unsupported())
}

pub fn current_cpu() -> io::Result<usize> {
    Err(unsupported())
}
