//! # numabind
//!
//! `numabind` places memory and threads on NUMA nodes. It reads the machine
//! topology, maps native memory regions under explicit placement policies,
//! and pins threads to the CPUs of a node.
//!
//! ## Features
//!
//! - Topology queries: nodes, node memory, distances, node CPUs
//! - Native regions allocated with default, local, single-node or interleaved placement
//! - Migration of existing buffers onto a node
//! - Per-thread preferred node and local allocation policy
//! - CPU affinity with a fixed 64-bit word mask layout
//! - Degrades to a single synthetic node on hosts without NUMA
//!
//! ## Example
//!
//! ```
//! use numabind::{CpuMask, RegionOptions, Topology};
//!
//! # fn main() -> numabind::Result<()> {
//! let topology = Topology::system();
//! for node in topology.nodes() {
//!     let mut cpus = CpuMask::system();
//!     topology.node_to_cpus(node, &mut cpus)?;
//!     println!("node {}: {} bytes, cpus {}", node, topology.node_size(node)?, cpus);
//! }
//!
//! let options = RegionOptions::new().fallback(true);
//! let mut region = options.alloc_on_node(1 << 20, 0)?;
//! region.as_mut_slice().fill(0xAB);
//! numabind::free(region)?;
//! # Ok(())
//! # }
//! ```

pub mod affinity;
pub mod error;
pub mod mask;
pub mod platform;
pub mod policy;
pub mod region;
pub mod topology;
pub mod utils;

pub use affinity::{
    affinity, current_cpu, get_affinity, reset_affinity, run_on_any_node, run_on_node, run_thread_on_node,
    set_affinity, set_affinity_cpu, ThreadTarget,
};
pub use error::{Error, Result};
pub use mask::{CpuMask, NativeWord, WORD_BITS};
pub use platform::PolicyMode;
pub use policy::{current_policy, preferred_node, set_local_alloc, set_preferred, MemPolicy};
pub use region::{
    alloc_default, alloc_interleaved, alloc_local, alloc_on_node, free, node_of_address, to_node_memory, DefaultPolicy,
    Interleaved, Local, OnNode, OwnedRegion, Placement, Region, RegionOptions,
};
pub use topology::{
    distance, free_size, is_available, max_node, node_size, node_to_cpus, num_cpus, num_nodes, NodeId, Topology,
    LOCAL_DISTANCE,
};
pub use utils::metrics::{get_stats, RegionStats};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
