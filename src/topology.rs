//! NUMA topology queries.
//!
//! Topology is read from the kernel's sysfs tree (`<root>/node/nodeN/...`,
//! default root `/sys/devices/system`). A host without that tree is presented
//! as a single node 0 that owns all memory and every CPU.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::mask::{self, CpuMask};
use crate::platform;

/// Identifier of a NUMA node.
pub type NodeId = u32;

/// Distance between a node and itself.
pub const LOCAL_DISTANCE: u32 = 10;

const DEFAULT_SYSFS_ROOT: &str = "/sys/devices/system";

static SYSTEM: OnceLock<Topology> = OnceLock::new();

/// View of the NUMA topology rooted at a sysfs directory.
#[derive(Debug)]
pub struct Topology {
    root: PathBuf,
    max_node: OnceLock<NodeId>,
    available: OnceLock<bool>,
}

impl Default for Topology {
    fn default() -> Topology {
        Topology::with_root(DEFAULT_SYSFS_ROOT)
    }
}

impl Topology {
    /// Topology of the running system.
    #[inline]
    pub fn new() -> Topology {
        Topology::default()
    }

    /// Topology described by the sysfs tree at `root`.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Topology {
        Topology {
            root: root.as_ref().to_path_buf(),
            max_node: OnceLock::new(),
            available: OnceLock::new(),
        }
    }

    /// Process-wide topology of the running system.
    pub fn system() -> &'static Topology {
        SYSTEM.get_or_init(Topology::new)
    }

    /// The sysfs root this topology reads.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the NUMA memory-policy interface can be used.
    ///
    /// Requires at least one node in sysfs, whatever its ID, and a kernel that
    /// answers the memory-policy query. Checked once per topology.
    pub fn is_available(&self) -> bool {
        *self.available.get_or_init(|| {
            let available = !self.is_flat() && platform::memory_policy_supported();
            tracing::debug!(root = %self.root.display(), available, "checked NUMA support");
            available
        })
    }

    /// Present nodes in ascending order. Never empty.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes = self.nodes_on_disk();
        if nodes.is_empty() {
            nodes.push(0);
        }
        nodes
    }

    /// Highest node ID on this system.
    pub fn max_node(&self) -> NodeId {
        *self.max_node.get_or_init(|| {
            let max = self.nodes().last().copied().unwrap_or(0);
            tracing::debug!(root = %self.root.display(), max_node = max, "discovered NUMA nodes");
            max
        })
    }

    /// Number of node IDs, counting absent ones below the maximum.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.max_node() as usize + 1
    }

    /// Whether `node` is present.
    pub fn node_exists(&self, node: NodeId) -> bool {
        if self.is_flat() {
            node == 0
        } else {
            self.node_dir(node).is_dir()
        }
    }

    /// Total memory of `node` in bytes.
    pub fn node_size(&self, node: NodeId) -> Result<u64> {
        self.check_node(node)?;
        if self.is_flat() {
            return platform::total_memory();
        }
        self.meminfo_field(node, "MemTotal")
    }

    /// Free memory of `node` in bytes.
    pub fn free_size(&self, node: NodeId) -> Result<u64> {
        self.check_node(node)?;
        if self.is_flat() {
            return platform::free_memory();
        }
        self.meminfo_field(node, "MemFree")
    }

    /// Relative access cost from node `a` to memory on node `b`.
    ///
    /// # Arguments
    ///
    /// * `a` - The node issuing the access.
    /// * `b` - The node holding the memory.
    ///
    /// # Returns
    ///
    /// The firmware-reported distance, where [`LOCAL_DISTANCE`] is the cost of
    /// local access. Fails with [`Error::InvalidNode`] if either node is absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use numabind::{Topology, LOCAL_DISTANCE};
    ///
    /// let topology = Topology::system();
    /// let node = topology.nodes()[0];
    /// assert_eq!(topology.distance(node, node).unwrap(), LOCAL_DISTANCE);
    /// ```
    pub fn distance(&self, a: NodeId, b: NodeId) -> Result<u32> {
        self.check_node(a)?;
        self.check_node(b)?;
        if self.is_flat() {
            return Ok(LOCAL_DISTANCE);
        }

        // Columns follow the present nodes in order, not raw node IDs.
        let column = self
            .nodes()
            .iter()
            .position(|&node| node == b)
            .ok_or(Error::InvalidNode(b))?;
        let contents = self.read_node_file(a, "distance")?;
        contents
            .split_whitespace()
            .nth(column)
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| invalid_data(format!("node{} distance has no entry for node {}", a, b)))
    }

    /// Fill `mask` with the CPUs of `node` and return how many were stored.
    ///
    /// The mask is cleared first. CPUs that do not fit in the mask are skipped.
    pub fn node_to_cpus(&self, node: NodeId, mask: &mut CpuMask) -> Result<usize> {
        self.check_node(node)?;
        mask.clear();
        let cpus = if self.is_flat() {
            (0..num_cpus()).collect()
        } else {
            let list = self.read_node_file(node, "cpulist")?;
            mask::parse_cpu_list(&list)?
        };
        Ok(cpus.into_iter().filter(|&cpu| mask.insert(cpu)).count())
    }

    /// Node that owns `cpu`.
    pub fn node_of_cpu(&self, cpu: usize) -> Result<NodeId> {
        if self.is_flat() {
            return if cpu < num_cpus() {
                Ok(0)
            } else {
                Err(Error::InvalidArgument(format!("CPU {} does not exist", cpu)))
            };
        }
        for node in self.nodes() {
            let list = self.read_node_file(node, "cpulist")?;
            if mask::parse_cpu_list(&list)?.contains(&cpu) {
                return Ok(node);
            }
        }
        Err(Error::InvalidArgument(format!("CPU {} belongs to no node", cpu)))
    }

    fn check_node(&self, node: NodeId) -> Result<()> {
        if self.node_exists(node) {
            Ok(())
        } else {
            Err(Error::InvalidNode(node))
        }
    }

    fn is_flat(&self) -> bool {
        self.nodes_on_disk().is_empty()
    }

    fn nodes_on_disk(&self) -> Vec<NodeId> {
        let entries = match fs::read_dir(self.root.join("node")) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut nodes: Vec<NodeId> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("node"))
                    .and_then(|id| id.parse().ok())
            })
            .collect();
        nodes.sort_unstable();
        nodes
    }

    fn node_dir(&self, node: NodeId) -> PathBuf {
        self.root.join("node").join(format!("node{}", node))
    }

    fn read_node_file(&self, node: NodeId, name: &str) -> Result<String> {
        fs::read_to_string(self.node_dir(node).join(name)).map_err(Error::SystemCallFailed)
    }

    fn meminfo_field(&self, node: NodeId, field: &str) -> Result<u64> {
        let contents = self.read_node_file(node, "meminfo")?;
        parse_meminfo_field(&contents, field)
            .ok_or_else(|| invalid_data(format!("node{} meminfo has no {}", node, field)))
    }
}

/// Extract a field from a per-node meminfo file, in bytes.
///
/// Lines look like `Node 0 MemTotal:       16318132 kB`.
fn parse_meminfo_field(contents: &str, field: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let mut tokens = line.split_whitespace().skip_while(|token| {
            token.strip_suffix(':') != Some(field)
        });
        tokens.next()?;
        let value: u64 = tokens.next()?.parse().ok()?;
        match tokens.next() {
            Some("kB") => value.checked_mul(1024),
            _ => Some(value),
        }
    })
}

fn invalid_data(message: String) -> Error {
    Error::SystemCallFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, message))
}

/// Number of configured logical CPUs.
#[inline]
pub fn num_cpus() -> usize {
    platform::num_cpus()
}

/// Whether NUMA placement can be used on this system.
#[inline]
pub fn is_available() -> bool {
    Topology::system().is_available()
}

/// Highest node ID on this system.
#[inline]
pub fn max_node() -> NodeId {
    Topology::system().max_node()
}

/// Number of node IDs on this system.
#[inline]
pub fn num_nodes() -> usize {
    Topology::system().num_nodes()
}

/// Total memory of `node` in bytes.
#[inline]
pub fn node_size(node: NodeId) -> Result<u64> {
    Topology::system().node_size(node)
}

/// Free memory of `node` in bytes.
#[inline]
pub fn free_size(node: NodeId) -> Result<u64> {
    Topology::system().free_size(node)
}

/// Relative access cost between two nodes.
#[inline]
pub fn distance(a: NodeId, b: NodeId) -> Result<u32> {
    Topology::system().distance(a, b)
}

/// Fill `mask` with the CPUs of `node`.
#[inline]
pub fn node_to_cpus(node: NodeId, mask: &mut CpuMask) -> Result<usize> {
    Topology::system().node_to_cpus(node, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_node(root: &Path, node: NodeId, total_kb: u64, free_kb: u64, distance: &str, cpus: &str) {
        let dir = root.join("node").join(format!("node{}", node));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("meminfo"),
            format!(
                "Node {n} MemTotal:       {t} kB\nNode {n} MemFree:        {f} kB\nNode {n} MemUsed:        {u} kB\n",
                n = node,
                t = total_kb,
                f = free_kb,
                u = total_kb - free_kb
            ),
        )
        .unwrap();
        fs::write(dir.join("distance"), format!("{}\n", distance)).unwrap();
        fs::write(dir.join("cpulist"), format!("{}\n", cpus)).unwrap();
    }

    /// Two nodes with a gap at ID 1.
    fn sparse_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_node(dir.path(), 0, 4096, 1024, "10 21", "0-1");
        write_node(dir.path(), 2, 8192, 8000, "21 10", "2-3");
        fs::write(dir.path().join("node").join("possible"), "0-2\n").unwrap();
        dir
    }

    #[test]
    fn nodes_skip_gaps_and_files() {
        let dir = sparse_tree();
        let topology = Topology::with_root(dir.path());
        assert_eq!(topology.nodes(), vec![0, 2]);
        assert_eq!(topology.max_node(), 2);
        assert_eq!(topology.num_nodes(), 3);
        assert!(topology.node_exists(2));
        assert!(!topology.node_exists(1));
    }

    #[test]
    fn absent_nodes_are_reported_not_zeroed() {
        let dir = sparse_tree();
        let topology = Topology::with_root(dir.path());
        assert!(matches!(topology.node_size(1), Err(Error::InvalidNode(1))));
        assert!(matches!(topology.free_size(9), Err(Error::InvalidNode(9))));
        assert!(matches!(topology.distance(0, 1), Err(Error::InvalidNode(1))));
        let mut mask = CpuMask::new(8);
        assert!(matches!(topology.node_to_cpus(1, &mut mask), Err(Error::InvalidNode(1))));
    }

    #[test]
    fn sizes_are_reported_in_bytes() {
        let dir = sparse_tree();
        let topology = Topology::with_root(dir.path());
        assert_eq!(topology.node_size(0).unwrap(), 4096 * 1024);
        assert_eq!(topology.free_size(0).unwrap(), 1024 * 1024);
        for node in topology.nodes() {
            assert!(topology.free_size(node).unwrap() <= topology.node_size(node).unwrap());
        }
    }

    #[test]
    fn distance_columns_follow_present_nodes() {
        let dir = sparse_tree();
        let topology = Topology::with_root(dir.path());
        assert_eq!(topology.distance(0, 0).unwrap(), LOCAL_DISTANCE);
        assert_eq!(topology.distance(2, 2).unwrap(), LOCAL_DISTANCE);
        assert_eq!(topology.distance(0, 2).unwrap(), 21);
        assert_eq!(topology.distance(0, 2).unwrap(), topology.distance(2, 0).unwrap());
    }

    #[test]
    fn node_cpus_are_disjoint() {
        let dir = sparse_tree();
        let topology = Topology::with_root(dir.path());
        let mut first = CpuMask::new(64);
        let mut second = CpuMask::new(64);
        assert_eq!(topology.node_to_cpus(0, &mut first).unwrap(), 2);
        assert_eq!(topology.node_to_cpus(2, &mut second).unwrap(), 2);
        assert_eq!(first.to_string(), "0-1");
        assert!(first.is_disjoint(&second));
        assert_eq!(topology.node_of_cpu(3).unwrap(), 2);
        assert!(topology.node_of_cpu(40).is_err());
    }

    #[test]
    fn node_cpus_that_do_not_fit_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_node(dir.path(), 0, 64, 32, "10", "0-1,64-65");
        let topology = Topology::with_root(dir.path());
        let mut mask = CpuMask::from_words(vec![!0]);
        assert_eq!(topology.node_to_cpus(0, &mut mask).unwrap(), 2);
        assert_eq!(mask.words(), &[0b11]);
    }

    #[test]
    fn missing_tree_is_a_single_flat_node() {
        let dir = tempfile::tempdir().unwrap();
        let topology = Topology::with_root(dir.path());
        assert_eq!(topology.nodes(), vec![0]);
        assert_eq!(topology.max_node(), 0);
        assert!(!topology.is_available());
        assert_eq!(topology.distance(0, 0).unwrap(), LOCAL_DISTANCE);
        assert!(matches!(topology.node_size(1), Err(Error::InvalidNode(1))));

        let mut mask = CpuMask::new(num_cpus());
        assert_eq!(topology.node_to_cpus(0, &mut mask).unwrap(), num_cpus());
        assert_eq!(topology.node_of_cpu(0).unwrap(), 0);
    }

    #[test]
    fn availability_does_not_depend_on_node_zero() {
        let dir = tempfile::tempdir().unwrap();
        write_node(dir.path(), 1, 4096, 2048, "10", "0");
        let topology = Topology::with_root(dir.path());
        assert_eq!(topology.nodes(), vec![1]);
        assert!(!topology.node_exists(0));
        assert_eq!(topology.is_available(), platform::memory_policy_supported());
    }

    #[test]
    fn truncated_distance_file_is_an_error() {
        let dir = sparse_tree();
        fs::write(dir.path().join("node/node0/distance"), "10\n").unwrap();
        let topology = Topology::with_root(dir.path());
        assert!(matches!(topology.distance(0, 2), Err(Error::SystemCallFailed(_))));
    }

    #[test]
    fn meminfo_fields_parse() {
        let contents = "Node 1 MemTotal:  100 kB\nNode 1 MemFree:   40 kB\nNode 1 HugePages_Total:     0\n";
        assert_eq!(parse_meminfo_field(contents, "MemTotal"), Some(100 * 1024));
        assert_eq!(parse_meminfo_field(contents, "MemFree"), Some(40 * 1024));
        assert_eq!(parse_meminfo_field(contents, "HugePages_Total"), Some(0));
        assert_eq!(parse_meminfo_field(contents, "MemUsed"), None);
    }
}
