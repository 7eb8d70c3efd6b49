//! Per-thread memory allocation policy.
//!
//! These calls only affect the calling thread; the kernel offers no way to
//! change another thread's memory policy.

use crate::affinity;
use crate::error::{Error, Result};
use crate::platform::{self, PolicyMode};
use crate::topology::{NodeId, Topology};
use crate::utils::metrics::{self, Operation};

/// A thread memory policy as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemPolicy {
    /// No thread policy; the system default applies.
    Default,

    /// Prefer a node. `None` means the local node.
    Preferred(Option<NodeId>),

    /// Allocate only from these nodes.
    Bind(Vec<NodeId>),

    /// Interleave pages across these nodes.
    Interleave(Vec<NodeId>),

    /// Allocate on the node of the faulting CPU.
    Local,

    /// Prefer any of these nodes.
    PreferredMany(Vec<NodeId>),

    /// Interleave across these nodes with per-node weights.
    WeightedInterleave(Vec<NodeId>),
}

impl MemPolicy {
    fn from_kernel(mode: PolicyMode, nodes: Vec<NodeId>) -> MemPolicy {
        match mode {
            PolicyMode::Default => MemPolicy::Default,
            PolicyMode::Preferred => MemPolicy::Preferred(nodes.first().copied()),
            PolicyMode::Bind => MemPolicy::Bind(nodes),
            PolicyMode::Interleave => MemPolicy::Interleave(nodes),
            PolicyMode::Local => MemPolicy::Local,
            PolicyMode::PreferredMany => MemPolicy::PreferredMany(nodes),
            PolicyMode::WeightedInterleave => MemPolicy::WeightedInterleave(nodes),
        }
    }

    /// The node this policy favours, if it names one.
    pub fn first_node(&self) -> Option<NodeId> {
        match self {
            MemPolicy::Preferred(node) => *node,
            MemPolicy::Bind(nodes) | MemPolicy::PreferredMany(nodes) => nodes.first().copied(),
            _ => None,
        }
    }
}

/// The calling thread's memory policy.
pub fn current_policy() -> Result<MemPolicy> {
    let (mode, nodes) = platform::thread_policy().map_err(|err| Error::from_os(err, Error::SystemCallFailed))?;
    Ok(MemPolicy::from_kernel(mode, nodes))
}

/// Node the calling thread's allocations currently favour.
///
/// Without a preferred or bound node, or without NUMA support, this is the
/// node of the CPU the thread is running on.
pub fn preferred_node() -> Result<NodeId> {
    let topology = Topology::system();
    if topology.is_available() {
        if let Some(node) = current_policy()?.first_node() {
            return Ok(node);
        }
    }
    topology.node_of_cpu(affinity::current_cpu()?)
}

/// Prefer `node` for the calling thread's future allocations.
pub fn set_preferred(node: NodeId) -> Result<()> {
    if !Topology::system().node_exists(node) {
        return Err(Error::InvalidNode(node));
    }
    if !Topology::system().is_available() {
        return Err(Error::NumaUnavailable);
    }
    platform::set_thread_policy(PolicyMode::Preferred, &[node])
        .map_err(|err| Error::from_os(err, Error::SystemCallFailed))?;
    metrics::record_operation(Operation::Bind, 0);
    tracing::debug!(node, "set preferred node");
    Ok(())
}

/// Reset the calling thread to local allocation.
pub fn set_local_alloc() -> Result<()> {
    if !Topology::system().is_available() {
        return Err(Error::NumaUnavailable);
    }
    platform::set_thread_policy(PolicyMode::Default, &[])
        .map_err(|err| Error::from_os(err, Error::SystemCallFailed))?;
    metrics::record_operation(Operation::Bind, 0);
    tracing::debug!("reset to local allocation");
    Ok(())
}
