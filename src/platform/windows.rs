//! Windows fallback: plain virtual memory and host-wide memory figures.
//!
//! Node placement and thread affinity are not exposed on Windows; those calls
//! report [`io::ErrorKind::Unsupported`].

use std::io;
use std::mem;
use std::ptr::{self, NonNull};

use winapi::shared::minwindef::LPVOID;
use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
use winapi::um::sysinfoapi::{GetSystemInfo, GlobalMemoryStatusEx, MEMORYSTATUSEX, SYSTEM_INFO};
use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

use crate::error::{Error, Result};
use crate::mask::CpuMask;
use crate::platform::{PolicyMode, ThreadTarget};
use crate::topology::NodeId;

fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "NUMA placement is not supported on Windows")
}

fn memory_status() -> Result<MEMORYSTATUSEX> {
    unsafe {
        let mut status: MEMORYSTATUSEX = mem::zeroed();
        status.dwLength = mem::size_of::<MEMORYSTATUSEX>() as u32;
        if GlobalMemoryStatusEx(&mut status) == 0 {
            return Err(Error::SystemCallFailed(io::Error::last_os_error()));
        }
        Ok(status)
    }
}

pub fn num_cpus() -> usize {
    let info = unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        info
    };
    (info.dwNumberOfProcessors as usize).max(1)
}

pub fn total_memory() -> Result<u64> {
    memory_status().map(|status| status.ullTotalPhys)
}

pub fn free_memory() -> Result<u64> {
    memory_status().map(|status| status.ullAvailPhys)
}

pub fn map_pages(len: usize, _populate: bool) -> io::Result<NonNull<u8>> {
    let addr = unsafe { VirtualAlloc(ptr::null_mut(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
    NonNull::new(addr as *mut u8).ok_or_else(io::Error::last_os_error)
}

pub unsafe fn unmap_pages(ptr: NonNull<u8>, _len: usize) -> io::Result<()> {
    if VirtualFree(ptr.as_ptr() as LPVOID, 0, MEM_RELEASE) != 0 {
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
