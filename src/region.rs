//! Native memory regions and their placement policies.
//!
//! A [`Region`] is memory mapped directly from the OS. No allocator or
//! collector tracks it: it stays valid until it is handed to [`free`], which
//! consumes the handle. Dropping a `Region` without freeing it leaks the pages.
//! Wrap it with [`Region::into_owned`] to get an [`OwnedRegion`] that frees
//! itself on drop.
//!
//! The type parameter records the placement policy the region was created
//! with. It is a zero-sized marker, fixed at compile time; nothing about the
//! policy is stored in the handle.
//!
//! # Example
//!
//! ```
//! use numabind::region::{self, RegionOptions};
//!
//! # fn main() -> numabind::Result<()> {
//! let mut region = region::alloc_default(4096)?;
//! region.as_mut_slice()[0] = 42;
//! region::free(region)?;
//!
//! // Falls back to default placement on hosts without NUMA.
//! let scoped = RegionOptions::new().fallback(true).alloc_local(1 << 16)?.into_owned();
//! assert_eq!(scoped.len(), 1 << 16);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::platform::{self, PolicyMode};
use crate::topology::{NodeId, Topology};
use crate::utils::alignment;
use crate::utils::metrics::{self, Operation};

mod sealed {
    pub trait Sealed {}
}

/// Placement policy markers for [`Region`].
pub trait Placement: sealed::Sealed + 'static {}

/// The system's default policy; no pinning.
#[derive(Debug)]
pub enum DefaultPolicy {}

/// The node local to the allocating thread.
#[derive(Debug)]
pub enum Local {}

/// A single, explicitly chosen node.
#[derive(Debug)]
pub enum OnNode {}

/// Pages spread round-robin across all nodes.
#[derive(Debug)]
pub enum Interleaved {}

impl sealed::Sealed for DefaultPolicy {}
impl sealed::Sealed for Local {}
impl sealed::Sealed for OnNode {}
impl sealed::Sealed for Interleaved {}
impl Placement for DefaultPolicy {}
impl Placement for Local {}
impl Placement for OnNode {}
impl Placement for Interleaved {}

/// A contiguous block of OS-mapped memory, released by [`free`].
#[must_use = "a region leaks unless passed to `free` or wrapped with `into_owned`"]
pub struct Region<P: Placement = DefaultPolicy> {
    ptr: NonNull<u8>,
    len: usize,
    _placement: PhantomData<fn() -> P>,
}

// A region is exclusive ownership of its pages, like `Box<[u8]>`.
unsafe impl<P: Placement> Send for Region<P> {}
unsafe impl<P: Placement> Sync for Region<P> {}

impl<P: Placement> Region<P> {
    #[inline]
    fn from_parts(ptr: NonNull<u8>, len: usize) -> Region<P> {
        Region {
            ptr,
            len,
            _placement: PhantomData,
        }
    }

    /// A zero-length region. It owns no pages.
    #[inline]
    pub fn empty() -> Region<P> {
        Region::from_parts(NonNull::dangling(), 0)
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length regions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address. Dangling for zero-length regions.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Mutable base address. Dangling for zero-length regions.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// The region's bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The region's bytes, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Take the handle apart, e.g. to pass it across an FFI boundary.
    ///
    /// The pages stay allocated. Rebuild the handle with
    /// [`Region::from_raw_parts`] to release them.
    #[inline]
    pub fn into_raw_parts(self) -> (NonNull<u8>, usize) {
        (self.ptr, self.len)
    }

    /// Rebuild a handle from [`Region::into_raw_parts`].
    ///
    /// # Safety
    ///
    /// `ptr` and `len` must come from `into_raw_parts` on a region produced by
    /// this crate, and no other handle to the same pages may exist. Freeing
    /// the same pages twice, or pages not produced here, is undefined
    /// behavior.
    #[inline]
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Region<P> {
        Region::from_parts(ptr, len)
    }

    /// Move the region into a wrapper that frees it on drop.
    #[inline]
    pub fn into_owned(self) -> OwnedRegion<P> {
        OwnedRegion { region: self }
    }
}

impl<P: Placement> fmt::Debug for Region<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Release a region.
///
/// Zero-length regions are a no-op. The handle is consumed, so a region
/// obtained from this crate cannot be freed twice through safe code.
pub fn free<P: Placement>(region: Region<P>) -> Result<()> {
    let (ptr, len) = region.into_raw_parts();
    if len == 0 {
        return Ok(());
    }
    unsafe { platform::unmap_pages(ptr, len) }.map_err(Error::SystemCallFailed)?;
    metrics::record_operation(Operation::Free, len);
    tracing::debug!(addr = ?ptr, len, "freed region");
    Ok(())
}

/// A [`Region`] that is freed when dropped.
pub struct OwnedRegion<P: Placement = DefaultPolicy> {
    region: Region<P>,
}

impl<P: Placement> OwnedRegion<P> {
    /// Give up automatic release and return the raw region.
    pub fn into_inner(self) -> Region<P> {
        let region = Region::from_parts(self.region.ptr, self.region.len);
        mem::forget(self);
        region
    }
}

impl<P: Placement> Drop for OwnedRegion<P> {
    fn drop(&mut self) {
        let region = Region::<P>::from_parts(self.region.ptr, self.region.len);
        if let Err(err) = free(region) {
            tracing::warn!(len = self.region.len, error = %err, "failed to free region");
        }
    }
}

impl<P: Placement> Deref for OwnedRegion<P> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.region.as_slice()
    }
}

impl<P: Placement> DerefMut for OwnedRegion<P> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.region.as_mut_slice()
    }
}

impl<P: Placement> AsRef<[u8]> for OwnedRegion<P> {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl<P: Placement> AsMut<[u8]> for OwnedRegion<P> {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl<P: Placement> fmt::Debug for OwnedRegion<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedRegion").field(&self.region).finish()
    }
}

/// Configuration for allocating and placing regions.
#[derive(Debug, Clone, Default)]
pub struct RegionOptions {
    /// Prefault every page at allocation time.
    pub populate: bool,

    /// Let [`RegionOptions::to_node_memory`] migrate pages that are already
    /// faulted in, not only future faults.
    pub move_pages: bool,

    /// Degrade to the default policy instead of failing with
    /// [`Error::NumaUnavailable`] when NUMA cannot be used.
    pub fallback: bool,

    /// Topology used for node checks. Defaults to [`Topology::system`].
    topology: Option<Arc<Topology>>,
}

/// Whether to apply a policy, skip it, or fail.
enum Gate {
    Place,
    Skip,
}

impl RegionOptions {
    /// Create a new set of options.
    #[inline]
    pub fn new() -> RegionOptions {
        RegionOptions::default()
    }

    /// Prefault pages at allocation time.
    #[inline]
    pub fn populate(mut self, populate: bool) -> RegionOptions {
        self.populate = populate;
        self
    }

    /// Migrate already-faulted pages in [`RegionOptions::to_node_memory`].
    #[inline]
    pub fn move_pages(mut self, move_pages: bool) -> RegionOptions {
        self.move_pages = move_pages;
        self
    }

    /// Fall back to default placement when NUMA is unavailable.
    #[inline]
    pub fn fallback(mut self, fallback: bool) -> RegionOptions {
        self.fallback = fallback;
        self
    }

    /// Check nodes against `topology` instead of the running system.
    #[inline]
    pub fn topology(mut self, topology: Arc<Topology>) -> RegionOptions {
        self.topology = Some(topology);
        self
    }

    fn topo(&self) -> &Topology {
        self.topology.as_deref().unwrap_or_else(|| Topology::system())
    }

    fn gate(&self) -> Result<Gate> {
        if self.topo().is_available() {
            Ok(Gate::Place)
        } else if self.fallback {
            Ok(Gate::Skip)
        } else {
            Err(Error::NumaUnavailable)
        }
    }

    fn check_node(&self, node: NodeId) -> Result<()> {
        if self.topo().node_exists(node) {
            Ok(())
        } else {
            Err(Error::InvalidNode(node))
        }
    }

    /// Allocate with the system's default policy.
    pub fn alloc_default(&self, size: usize) -> Result<Region<DefaultPolicy>> {
        self.allocate(size, None)
    }

    /// Allocate on the node local to the calling thread.
    pub fn alloc_local(&self, size: usize) -> Result<Region<Local>> {
        if size == 0 {
            return Ok(Region::empty());
        }
        // Preferred with an empty node set means "the faulting CPU's node".
        let nodes: &[NodeId] = &[];
        match self.gate()? {
            Gate::Place => self.allocate(size, Some((PolicyMode::Preferred, nodes))),
            Gate::Skip => self.allocate(size, None),
        }
    }

    /// Allocate pinned to `node`.
    ///
    /// # Arguments
    ///
    /// * `size` - Length of the region in bytes. Zero yields an empty region.
    /// * `node` - The node whose memory backs every page.
    ///
    /// # Returns
    ///
    /// A region whose pages can only be faulted in from `node`, or
    /// [`Error::InvalidNode`] if `node` is absent, [`Error::OutOfMemory`] if
    /// the mapping fails and [`Error::NumaUnavailable`] without NUMA support
    /// unless fallback is enabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use numabind::RegionOptions;
    ///
    /// # fn main() -> numabind::Result<()> {
    /// let options = RegionOptions::new().fallback(true);
    /// let region = options.alloc_on_node(8192, 0)?;
    /// assert_eq!(region.len(), 8192);
    /// numabind::free(region)?;
    ///
    /// assert!(options.alloc_on_node(8192, numabind::max_node() + 1).is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub fn alloc_on_node(&self, size: usize, node: NodeId) -> Result<Region<OnNode>> {
        self.check_node(node)?;
        if size == 0 {
            return Ok(Region::empty());
        }
        let nodes: &[NodeId] = &[node];
        match self.gate()? {
            Gate::Place => self.allocate(size, Some((PolicyMode::Bind, nodes))),
            Gate::Skip => self.allocate(size, None),
        }
    }

    /// Allocate with pages interleaved across every node.
    pub fn alloc_interleaved(&self, size: usize) -> Result<Region<Interleaved>> {
        if size == 0 {
            return Ok(Region::empty());
        }
        match self.gate()? {
            Gate::Place => {
                let nodes = self.topo().nodes();
                self.allocate(size, Some((PolicyMode::Interleave, nodes.as_slice())))
            }
            Gate::Skip => self.allocate(size, None),
        }
    }

    /// Bind the pages backing `buffer` to `node`.
    ///
    /// This is a placement hint: pages already faulted in stay put unless
    /// [`RegionOptions::move_pages`] is set. The policy covers every page the
    /// buffer touches, including bytes of those pages outside the buffer.
    pub fn to_node_memory(&self, buffer: &mut [u8], node: NodeId) -> Result<()> {
        self.check_node(node)?;
        if buffer.is_empty() {
            return Ok(());
        }
        if let Gate::Skip = self.gate()? {
            return Ok(());
        }

        let (start, len) = alignment::page_span(buffer.as_ptr() as usize, buffer.len(), alignment::page_size())
            .ok_or_else(|| Error::InvalidArgument("buffer wraps the address space".into()))?;
        unsafe { platform::bind_pages(start as *mut u8, len, PolicyMode::Bind, &[node], self.move_pages) }
            .map_err(|err| Error::from_os(err, Error::SystemCallFailed))?;
        metrics::record_operation(Operation::Bind, len);
        tracing::debug!(addr = start, len, node, moved = self.move_pages, "bound memory to node");
        Ok(())
    }

    fn allocate<P: Placement>(&self, size: usize, policy: Option<(PolicyMode, &[NodeId])>) -> Result<Region<P>> {
        if size == 0 {
            return Ok(Region::empty());
        }

        let ptr = platform::map_pages(size, self.populate).map_err(|source| Error::OutOfMemory { size, source })?;

        if let Some((mode, nodes)) = policy {
            if let Err(err) = unsafe { platform::bind_pages(ptr.as_ptr(), size, mode, nodes, false) } {
                if let Err(unmap_err) = unsafe { platform::unmap_pages(ptr, size) } {
                    tracing::warn!(size, error = %unmap_err, "failed to release unplaced region");
                }
                return Err(Error::from_os(err, Error::SystemCallFailed));
            }
            metrics::record_operation(Operation::Bind, size);
        }

        metrics::record_operation(Operation::Alloc, size);
        tracing::debug!(addr = ?ptr, size, policy = ?policy.map(|(mode, _)| mode), "allocated region");
        Ok(Region::from_parts(ptr, size))
    }
}

/// Node whose memory backs the page containing `addr`.
///
/// A page that is not resident yet is faulted in first. Unmapped addresses
/// fail with [`Error::SystemCallFailed`] carrying `EFAULT`.
pub fn node_of_address(addr: *const u8) -> Result<NodeId> {
    platform::address_node(addr).map_err(|err| Error::from_os(err, Error::SystemCallFailed))
}

/// Allocate `size` bytes with the system's default policy.
#[inline]
pub fn alloc_default(size: usize) -> Result<Region<DefaultPolicy>> {
    RegionOptions::new().alloc_default(size)
}

/// Allocate `size` bytes on the calling thread's local node.
#[inline]
pub fn alloc_local(size: usize) -> Result<Region<Local>> {
    RegionOptions::new().alloc_local(size)
}

/// Allocate `size` bytes pinned to `node`.
#[inline]
pub fn alloc_on_node(size: usize, node: NodeId) -> Result<Region<OnNode>> {
    RegionOptions::new().alloc_on_node(size, node)
}

/// Allocate `size` bytes interleaved across all nodes.
#[inline]
pub fn alloc_interleaved(size: usize) -> Result<Region<Interleaved>> {
    RegionOptions::new().alloc_interleaved(size)
}

/// Bind the pages backing `buffer` to `node`.
#[inline]
pub fn to_node_memory(buffer: &mut [u8], node: NodeId) -> Result<()> {
    RegionOptions::new().to_node_memory(buffer, node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_options() -> (tempfile::TempDir, RegionOptions) {
        let dir = tempfile::tempdir().unwrap();
        let options = RegionOptions::new().topology(Arc::new(Topology::with_root(dir.path())));
        (dir, options)
    }

    #[test]
    fn empty_regions_own_nothing() {
        let region = Region::<OnNode>::empty();
        assert!(region.is_empty());
        assert!(region.as_slice().is_empty());
        free(region).unwrap();
    }

    #[test]
    fn default_regions_are_zeroed_and_writable() {
        let mut region = alloc_default(10_000).unwrap();
        assert_eq!(region.len(), 10_000);
        assert!(region.as_slice().iter().all(|&b| b == 0));
        region.as_mut_slice()[9_999] = 7;
        assert_eq!(region.as_slice()[9_999], 7);
        free(region).unwrap();
    }

    #[test]
    fn raw_parts_round_trip() {
        let region = alloc_default(64).unwrap();
        let (ptr, len) = region.into_raw_parts();
        let region: Region = unsafe { Region::from_raw_parts(ptr, len) };
        assert_eq!(region.as_ptr(), ptr.as_ptr() as *const u8);
        free(region).unwrap();
    }

    #[test]
    fn owned_regions_deref_and_release() {
        let mut owned = alloc_default(128).unwrap().into_owned();
        owned[5] = 9;
        assert_eq!(owned.as_ref()[5], 9);
        let region = owned.into_inner();
        assert_eq!(region.as_slice()[5], 9);
        free(region).unwrap();
    }

    #[test]
    fn unknown_nodes_are_rejected_before_allocating() {
        let (_dir, options) = flat_options();
        assert!(matches!(options.alloc_on_node(4096, 1), Err(Error::InvalidNode(1))));
        assert!(matches!(options.alloc_on_node(0, 1), Err(Error::InvalidNode(1))));
        let mut buffer = vec![0u8; 16];
        assert!(matches!(options.to_node_memory(&mut buffer, 3), Err(Error::InvalidNode(3))));
    }

    #[test]
    fn placement_without_numa_fails_unless_fallback() {
        let (_dir, options) = flat_options();
        assert!(matches!(options.alloc_local(4096), Err(Error::NumaUnavailable)));
        assert!(matches!(options.alloc_interleaved(4096), Err(Error::NumaUnavailable)));
        assert!(matches!(options.alloc_on_node(4096, 0), Err(Error::NumaUnavailable)));

        let options = options.fallback(true);
        free(options.alloc_local(4096).unwrap()).unwrap();
        free(options.alloc_interleaved(4096).unwrap()).unwrap();
        free(options.alloc_on_node(4096, 0).unwrap()).unwrap();
        let mut buffer = vec![1u8; 16];
        options.to_node_memory(&mut buffer, 0).unwrap();
        assert!(buffer.iter().all(|&b| b == 1));
    }

    #[test]
    fn zero_sized_placement_never_fails() {
        let (_dir, options) = flat_options();
        assert!(options.alloc_local(0).unwrap().is_empty());
        assert!(options.alloc_interleaved(0).unwrap().is_empty());
        assert!(options.alloc_on_node(0, 0).unwrap().is_empty());
    }
}
