//! Linux NUMA and affinity system calls.
//!
//! The memory-policy calls have no glibc wrappers outside libnuma, so they are
//! issued through `syscall(2)` directly.

use std::io;
use std::ptr::{self, NonNull};

use libc::{c_int, c_long, c_uint, c_ulong, c_void};

use crate::error::{Error, Result};
use crate::mask::CpuMask;
use crate::platform::{PolicyMode, ThreadTarget};
use crate::topology::NodeId;
use crate::utils::alignment::page_size;

/// Bits in every node mask handed to the kernel. Matches the largest
/// `CONFIG_NODES_SHIFT` the kernel allows.
const NODE_MASK_BITS: usize = 1024;

const NATIVE_BITS: usize = c_ulong::BITS as usize;
const NODE_MASK_WORDS: usize = NODE_MASK_BITS / NATIVE_BITS;

/// Smallest CPU mask the kernel is asked to fill, glibc's `CPU_SETSIZE`.
const MIN_AFFINITY_BITS: usize = 1024;

/// Largest CPU mask tried before giving up on `EINVAL`.
const MAX_AFFINITY_BITS: usize = 1 << 16;

const MPOL_MF_MOVE: c_uint = 1 << 1;

const MPOL_F_NODE: c_ulong = 1 << 0;
const MPOL_F_ADDR: c_ulong = 1 << 1;

type NodeMask = [c_ulong; NODE_MASK_WORDS];

fn node_mask(nodes: &[NodeId]) -> NodeMask {
    let set = CpuMask::from_cpus(NODE_MASK_BITS, nodes.iter().map(|&node| node as usize));
    let mut native: NodeMask = [0; NODE_MASK_WORDS];
    set.to_native(NODE_MASK_BITS, &mut native[..]);
    native
}

fn mask_nodes(native: &NodeMask) -> Vec<NodeId> {
    let mut set = CpuMask::new(NODE_MASK_BITS);
    set.load_native(&native[..], NODE_MASK_BITS);
    set.iter().map(|node| node as NodeId).collect()
}

/// Report a missing or seccomp-blocked policy syscall as unsupported.
fn policy_error() -> io::Error {
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ENOSYS) | Some(libc::EPERM) => io::Error::new(io::ErrorKind::Unsupported, err),
        _ => err,
    }
}

pub fn num_cpus() -> usize {
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if count < 1 {
        1
    } else {
        count as usize
    }
}

fn sysconf_pages(name: c_int) -> Result<u64> {
    let pages = unsafe { libc::sysconf(name) };
    if pages < 0 {
        return Err(Error::SystemCallFailed(io::Error::last_os_error()));
    }
    Ok(pages as u64 * page_size() as u64)
}

pub fn total_memory() -> Result<u64> {
    sysconf_pages(libc::_SC_PHYS_PAGES)
}

pub fn free_memory() -> Result<u64> {
    sysconf_pages(libc::_SC_AVPHYS_PAGES)
}

pub fn map_pages(len: usize, populate: bool) -> io::Result<NonNull<u8>> {
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    if populate {
        flags |= libc::MAP_POPULATE;
    }

    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
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
    addr: *mut u8,
    len: usize,
    mode: PolicyMode,
    nodes: &[NodeId],
    move_pages: bool,
) -> io::Result<()> {
    let mask = node_mask(nodes);
    let flags: c_uint = if move_pages { MPOL_MF_MOVE } else { 0 };
    // The kernel drops the last bit of maxnode, hence the +1.
    let ret = libc::syscall(
        libc::SYS_mbind,
        addr as *mut c_void,
        len as c_ulong,
        mode as c_int,
        mask.as_ptr(),
        (NODE_MASK_BITS + 1) as c_ulong,
        flags,
    );
    if ret == 0 {
        Ok(())
    } else {
        Err(policy_error())
    }
}

pub fn set_thread_policy(mode: PolicyMode, nodes: &[NodeId]) -> io::Result<()> {
    let mask = node_mask(nodes);
    let ret = unsafe {
        libc::syscall(
            libc::SYS_set_mempolicy,
            mode as c_int,
            mask.as_ptr(),
            (NODE_MASK_BITS + 1) as c_ulong,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(policy_error())
    }
}

pub fn thread_policy() -> io::Result<(PolicyMode, Vec<NodeId>)> {
    let mut mode: c_int = 0;
    let mut mask: NodeMask = [0; NODE_MASK_WORDS];
    let ret = unsafe {
        libc::syscall(
            libc::SYS_get_mempolicy,
            &mut mode as *mut c_int,
            mask.as_mut_ptr(),
            (NODE_MASK_BITS + 1) as c_ulong,
            ptr::null_mut::<c_void>(),
            0 as c_ulong,
        )
    };
    if ret != 0 {
        return Err(policy_error());
    }
    // Mode flags such as MPOL_F_STATIC_NODES live in the high bits.
    let mode = PolicyMode::from_raw(mode & 0xff).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, format!("unknown memory policy {}", mode))
    })?;
    Ok((mode, mask_nodes(&mask)))
}

pub fn address_node(addr: *const u8) -> io::Result<NodeId> {
    let mut node: c_int = 0;
    let ret = unsafe {
        libc::syscall(
            libc::SYS_get_mempolicy,
            &mut node as *mut c_int,
            ptr::null_mut::<c_ulong>(),
            0 as c_ulong,
            addr as *mut c_void,
            MPOL_F_NODE | MPOL_F_ADDR,
        )
    };
    if ret != 0 {
        return Err(policy_error());
    }
    Ok(node as NodeId)
}

pub fn get_affinity(target: ThreadTarget, mask: &mut CpuMask, num_cpus: usize) -> io::Result<()> {
    let mut bits = MIN_AFFINITY_BITS.max(num_cpus);
    loop {
        let mut native: Vec<c_ulong> = vec![0; (bits + NATIVE_BITS - 1) / NATIVE_BITS];
        let size = native.len() * std::mem::size_of::<c_ulong>();
        let ret: c_long = unsafe {
            libc::syscall(
                libc::SYS_sched_getaffinity,
                target.raw() as libc::pid_t,
                size,
                native.as_mut_ptr(),
            )
        };
        if ret >= 0 {
            mask.load_native(&native[..], num_cpus);
            return Ok(());
        }

        // EINVAL means the kernel's CPU mask is wider than the buffer.
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINVAL) || bits >= MAX_AFFINITY_BITS {
            return Err(err);
        }
        bits *= 2;
    }
}

pub fn set_affinity(target: ThreadTarget, mask: &CpuMask, num_cpus: usize) -> io::Result<()> {
    let mut native: Vec<c_ulong> = vec![0; ((num_cpus + NATIVE_BITS - 1) / NATIVE_BITS).max(1)];
    mask.to_native(num_cpus, &mut native[..]);
    let size = native.len() * std::mem::size_of::<c_ulong>();
    let ret = unsafe {
        libc::syscall(
            libc::SYS_sched_setaffinity,
            target.raw() as libc::pid_t,
            size,
            native.as_ptr(),
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub fn current_cpu() -> io::Result<usize> {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(cpu as usize)
    }
}
