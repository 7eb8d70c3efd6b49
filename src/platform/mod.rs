//! Platform-specific system calls.
//!
//! Linux gets the full NUMA interface (`mbind`, `set_mempolicy`,
//! `get_mempolicy`, `sched_{get,set}affinity`). Windows and other targets
//! provide plain page allocation and host memory figures; their placement
//! and affinity calls fail with [`std::io::ErrorKind::Unsupported`].

use std::io;
use std::ptr::NonNull;

use crate::error::Result;
use crate::mask::CpuMask;
use crate::topology::NodeId;

/// Kernel memory-policy modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PolicyMode {
    /// Fall back to the process or system default.
    Default = 0,

    /// Prefer one node, falling back to others.
    Preferred = 1,

    /// Allocate strictly from the given nodes.
    Bind = 2,

    /// Spread pages round-robin over the given nodes.
    Interleave = 3,

    /// Allocate on the node of the CPU that faults the page.
    Local = 4,

    /// Prefer any of the given nodes.
    PreferredMany = 5,

    /// Interleave over the given nodes, weighted per node.
    WeightedInterleave = 6,
}

impl PolicyMode {
    pub(crate) fn from_raw(mode: i32) -> Option<PolicyMode> {
        match mode {
            0 => Some(PolicyMode::Default),
            1 => Some(PolicyMode::Preferred),
            2 => Some(PolicyMode::Bind),
            3 => Some(PolicyMode::Interleave),
            4 => Some(PolicyMode::Local),
            5 => Some(PolicyMode::PreferredMany),
            6 => Some(PolicyMode::WeightedInterleave),
            _ => None,
        }
    }
}

/// Thread selector for affinity calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadTarget {
    /// The calling thread.
    #[default]
    Current,

    /// A thread by kernel thread ID.
    Tid(i32),
}

impl ThreadTarget {
    #[inline]
    pub(crate) fn raw(self) -> i32 {
        match self {
            ThreadTarget::Current => 0,
            ThreadTarget::Tid(tid) => tid,
        }
    }
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use self::linux as imp;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use self::windows as imp;

#[cfg(not(any(target_os = "linux", windows)))]
mod unsupported;
#[cfg(not(any(target_os = "linux", windows)))]
use self::unsupported as imp;

/// Number of configured logical CPUs. At least 1.
#[inline]
pub fn num_cpus() -> usize {
    imp::num_cpus()
}

/// Physical memory of the host in bytes.
#[inline]
pub fn total_memory() -> Result<u64> {
    imp::total_memory()
}

/// Free physical memory of the host in bytes.
#[inline]
pub fn free_memory() -> Result<u64> {
    imp::free_memory()
}

/// Map `len` bytes of zeroed, private, read-write memory.
///
/// `len` must be non-zero.
#[inline]
pub fn map_pages(len: usize, populate: bool) -> io::Result<NonNull<u8>> {
    imp::map_pages(len, populate)
}

/// Release pages obtained from [`map_pages`].
///
/// # Safety
///
/// `ptr` and `len` must describe a live mapping returned by [`map_pages`]
/// that nothing references any more.
#[inline]
pub unsafe fn unmap_pages(ptr: NonNull<u8>, len: usize) -> io::Result<()> {
    imp::unmap_pages(ptr, len)
}

/// Apply a memory policy to a page-aligned address range.
///
/// # Safety
///
/// `addr` must be page aligned and `addr..addr + len` must lie inside
/// mappings owned by the caller.
#[inline]
pub unsafe fn bind_pages(
    addr: *mut u8,
    len: usize,
    mode: PolicyMode,
    nodes: &[NodeId],
    move_pages: bool,
) -> io::Result<()> {
    imp::bind_pages(addr, len, mode, nodes, move_pages)
}

/// Set the calling thread's memory policy.
#[inline]
pub fn set_thread_policy(mode: PolicyMode, nodes: &[NodeId]) -> io::Result<()> {
    imp::set_thread_policy(mode, nodes)
}

/// The calling thread's memory policy and its node set.
#[inline]
pub fn thread_policy() -> io::Result<(PolicyMode, Vec<NodeId>)> {
    imp::thread_policy()
}

/// Whether the memory-policy calls are usable.
#[inline]
pub fn memory_policy_supported() -> bool {
    thread_policy().is_ok()
}

/// Node holding the page that contains `addr`, faulting it in if needed.
///
/// An unmapped address fails with `EFAULT`; nothing is dereferenced here.
#[inline]
pub fn address_node(addr: *const u8) -> io::Result<NodeId> {
    imp::address_node(addr)
}

/// Read a thread's allowed CPUs below `num_cpus` into `mask`.
#[inline]
pub fn get_affinity(target: ThreadTarget, mask: &mut CpuMask, num_cpus: usize) -> io::Result<()> {
    imp::get_affinity(target, mask, num_cpus)
}

/// Restrict a thread to the CPUs of `mask` below `num_cpus`.
#[inline]
pub fn set_affinity(target: ThreadTarget, mask: &CpuMask, num_cpus: usize) -> io::Result<()> {
    imp::set_affinity(target, mask, num_cpus)
}

/// CPU the calling thread is running on.
#[inline]
pub fn current_cpu() -> io::Result<usize> {
    imp::current_cpu()
}
