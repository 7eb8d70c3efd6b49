//! Thread CPU affinity.
//!
//! Affinity is per-thread OS state. Calls that take a [`ThreadTarget`] can
//! address another thread by TID; the rest act on the calling thread. New
//! threads inherit their creator's mask, so a pinned thread that spawns
//! workers should reset its affinity first if the workers are meant to float.

use crate::error::{Error, Result};
use crate::mask::CpuMask;
use crate::platform;
use crate::topology::{self, NodeId, Topology};
use crate::utils::metrics::{self, Operation};

pub use crate::platform::ThreadTarget;

/// CPU the calling thread is running on.
///
/// The scheduler may migrate the thread at any time, so the answer can be
/// stale as soon as it is returned.
pub fn current_cpu() -> Result<usize> {
    platform::current_cpu().map_err(|err| Error::from_os(err, Error::SystemCallFailed))
}

/// Read the allowed CPUs of `target` into `mask`.
///
/// Only CPUs below `num_cpus` are reported. `mask` must hold at least
/// `CpuMask::words_for(num_cpus)` words.
pub fn get_affinity(target: ThreadTarget, mask: &mut CpuMask, num_cpus: usize) -> Result<()> {
    mask.ensure_fits(num_cpus)?;
    platform::get_affinity(target, mask, num_cpus).map_err(|err| Error::from_os(err, Error::AffinityQueryFailed))
}

/// Restrict `target` to the CPUs in `mask` below `num_cpus`.
///
/// # Arguments
///
/// * `target` - The thread to restrict.
/// * `mask` - The allowed CPUs, at least `CpuMask::words_for(num_cpus)` words long.
/// * `num_cpus` - How many CPU bits of `mask` are meaningful. Higher bits are ignored.
///
/// # Returns
///
/// `Ok(())` once the OS has applied the mask. A short mask fails with
/// [`Error::MaskTooSmall`] before the OS is asked. An empty set, or one
/// naming no usable CPU, is rejected with [`Error::InvalidAffinityMask`].
pub fn set_affinity(target: ThreadTarget, mask: &CpuMask, num_cpus: usize) -> Result<()> {
    mask.ensure_fits(num_cpus)?;
    platform::set_affinity(target, mask, num_cpus).map_err(|err| Error::from_os(err, Error::InvalidAffinityMask))?;
    metrics::record_operation(Operation::Affinity, 0);
    tracing::debug!(?target, cpus = %mask, "set CPU affinity");
    Ok(())
}

/// The calling thread's allowed CPUs in a freshly sized mask.
pub fn affinity() -> Result<CpuMask> {
    let num_cpus = topology::num_cpus();
    let mut mask = CpuMask::new(num_cpus);
    get_affinity(ThreadTarget::Current, &mut mask, num_cpus)?;
    Ok(mask)
}

/// Pin the calling thread to a single CPU.
pub fn set_affinity_cpu(cpu: usize) -> Result<()> {
    let num_cpus = topology::num_cpus();
    if cpu >= num_cpus {
        return Err(Error::InvalidArgument(format!("CPU {} does not exist", cpu)));
    }
    set_affinity(ThreadTarget::Current, &CpuMask::for_cpu(cpu, num_cpus), num_cpus)
}

/// Let the calling thread run on every CPU again.
pub fn reset_affinity() -> Result<()> {
    let num_cpus = topology::num_cpus();
    set_affinity(ThreadTarget::Current, &CpuMask::all(num_cpus), num_cpus)
}

/// Restrict `target` to the CPUs of `node`.
pub fn run_thread_on_node(topo: &Topology, target: ThreadTarget, node: NodeId) -> Result<()> {
    let num_cpus = topology::num_cpus();
    let mut mask = CpuMask::new(num_cpus);
    topo.node_to_cpus(node, &mut mask)?;
    platform::set_affinity(target, &mask, num_cpus).map_err(|err| Error::from_os(err, Error::SchedulingFailed))?;
    metrics::record_operation(Operation::Affinity, 0);
    tracing::debug!(?target, node, cpus = %mask, "bound thread to node");
    Ok(())
}

/// Restrict the calling thread to the CPUs of `node`.
#[inline]
pub fn run_on_node(node: NodeId) -> Result<()> {
    run_thread_on_node(Topology::system(), ThreadTarget::Current, node)
}

/// Let the calling thread run on the CPUs of every node.
pub fn run_on_any_node() -> Result<()> {
    let num_cpus = topology::num_cpus();
    platform::set_affinity(ThreadTarget::Current, &CpuMask::all(num_cpus), num_cpus)
        .map_err(|err| Error::from_os(err, Error::SchedulingFailed))?;
    metrics::record_operation(Operation::Affinity, 0);
    tracing::debug!("unbound thread from nodes");
    Ok(())
}
