//! Client facade over a FAM service.
//!
//! [`FamClient`] is the per-PE handle through which all region/data item
//! lifecycle and data movement operations are issued. It mirrors the
//! consumed service contract: blocking operations return once the transfer
//! completed, non-blocking operations return immediately and are completed
//! collectively by [`FamClient::quiet`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{FamError, FamResult};
use crate::fabric::{Fabric, FabricComm, FabricCounters};

/// Default permission mode for regions and data items.
pub const DEFAULT_PERMISSIONS: u32 = 0o777;

/// Redundancy policy of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redundancy {
    None,
    Raid1,
}

/// Handle to a named span of FAM address space, created once by one PE and
/// looked up by all others.
#[derive(Debug, Clone)]
pub struct RegionDescriptor {
    pub(crate) name: String,
    pub(crate) size: usize,
}

impl RegionDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Handle to a named allocation inside a region. Owned by the allocating PE
/// for deallocation purposes, remotely accessible by any PE holding it.
#[derive(Debug, Clone)]
pub struct ItemDescriptor {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) size: usize,
    pub(crate) owner_pe: usize,
    pub(crate) memserver_id: usize,
}

impl ItemDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn owner_pe(&self) -> usize {
        self.owner_pe
    }
    /// The memory server this item resolved to when it was allocated.
    pub fn memserver_id(&self) -> usize {
        self.memserver_id
    }
}

/// A local staging buffer for puts and gets.
///
/// Cloning is shallow; a non-blocking operation holds a clone until the
/// deferred transfer completes, so the caller never races the fabric on a
/// raw slice.
#[derive(Debug, Clone)]
pub struct LocalBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl LocalBuffer {
    /// A zero-initialized buffer of `len` bytes.
    pub fn new(len: usize) -> LocalBuffer {
        LocalBuffer {
            data: Arc::new(Mutex::new(vec![0u8; len])),
        }
    }

    pub fn from_vec(data: Vec<u8>) -> LocalBuffer {
        LocalBuffer {
            data: Arc::new(Mutex::new(data)),
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    pub fn fill(&self, byte: u8) {
        self.data.lock().fill(byte);
    }

    pub fn copy_from_slice(&self, src: &[u8]) {
        let mut data = self.data.lock();
        data[..src.len()].copy_from_slice(src);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock())
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.lock())
    }
}

/// Per-PE connection to a FAM service.
pub struct FamClient {
    fabric: Fabric,
    my_pe: usize,
}

impl FamClient {
    /// Attach to the fabric; the fabric assigns this client the next free PE
    /// slot. Fatal if the fabric is fully attached.
    pub fn connect(fabric: Fabric, cluster_name: &str) -> FamResult<FamClient> {
        let my_pe = fabric.attach()?;
        debug!(cluster_name, my_pe, "attached to fam fabric");
        Ok(FamClient { fabric, my_pe })
    }

    /// Query a runtime option by name; `None` for unknown options.
    pub fn get_option(&self, name: &str) -> Option<String> {
        match name {
            "PE_ID" => Some(self.my_pe.to_string()),
            "PE_COUNT" => Some(self.fabric.num_pes().to_string()),
            "NUM_MEMSERVERS" => Some(self.fabric.num_servers().to_string()),
            _ => None,
        }
    }

    pub fn my_pe(&self) -> usize {
        self.my_pe
    }

    pub fn num_pes(&self) -> usize {
        self.fabric.num_pes()
    }

    /// Allocate a local staging buffer of `len` bytes.
    pub fn alloc_local(&self, len: usize) -> LocalBuffer {
        LocalBuffer::new(len)
    }

    pub fn create_region(
        &self,
        name: &str,
        size: usize,
        perm: u32,
        redundancy: Redundancy,
    ) -> FamResult<RegionDescriptor> {
        if redundancy == Redundancy::None {
            return Err(FamError::UnsupportedRedundancy(redundancy));
        }
        self.fabric.create_region(name, size, perm, redundancy)
    }

    pub fn lookup_region(&self, name: &str) -> FamResult<RegionDescriptor> {
        self.fabric.lookup_region(name)
    }

    /// Destroy a region; fails while the region still holds data items.
    pub fn destroy_region(&self, region: &RegionDescriptor) -> FamResult<()> {
        self.fabric.destroy_region(region)
    }

    pub fn allocate(
        &self,
        name: &str,
        size: usize,
        perm: u32,
        region: &RegionDescriptor,
    ) -> FamResult<ItemDescriptor> {
        self.fabric
            .allocate(self.my_pe, name, size, perm, region)
    }

    pub fn deallocate(&self, item: &ItemDescriptor) -> FamResult<()> {
        self.fabric.deallocate(item)
    }

    pub fn put_blocking(
        &self,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()> {
        self.fabric.put(self.my_pe, src, item, offset, len)
    }

    pub fn get_blocking(
        &self,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()> {
        self.fabric.get(self.my_pe, dst, item, offset, len)
    }

    pub fn put_nonblocking(
        &self,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()> {
        self.fabric
            .put_nonblocking(self.my_pe, src, item, offset, len)
    }

    pub fn get_nonblocking(
        &self,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()> {
        self.fabric
            .get_nonblocking(self.my_pe, dst, item, offset, len)
    }

    /// Write one `elem_size`-byte element from `src` to each remote element
    /// position listed in `indices`.
    pub fn scatter_blocking(
        &self,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()> {
        self.fabric
            .scatter(self.my_pe, src, item, indices, elem_size)
    }

    pub fn gather_blocking(
        &self,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()> {
        self.fabric
            .gather(self.my_pe, dst, item, indices, elem_size)
    }

    pub fn scatter_nonblocking(
        &self,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()> {
        self.fabric
            .scatter_nonblocking(self.my_pe, src, item, indices, elem_size)
    }

    pub fn gather_nonblocking(
        &self,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()> {
        self.fabric
            .gather_nonblocking(self.my_pe, dst, item, indices, elem_size)
    }

    /// Block until every non-blocking operation issued by this PE completed.
    pub fn quiet(&self) -> FamResult<()> {
        self.fabric.quiet(self.my_pe)
    }

    /// Collective rendezvous; returns once every PE has arrived.
    pub fn barrier_all(&self) {
        self.fabric.barrier_all(self.my_pe);
    }

    /// Reset the fabric profiling counters so warm-up traffic is excluded
    /// from measurement.
    pub fn reset_profile(&self) {
        self.fabric.reset_profile();
    }

    /// Snapshot of the fabric profiling counters.
    pub fn profile(&self) -> FabricCounters {
        self.fabric.profile()
    }

    /// Detach from the fabric.
    pub fn finalize(self) -> FamResult<()> {
        debug!(my_pe = self.my_pe, "detaching from fam fabric");
        self.fabric.detach(self.my_pe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::local::LocalFabric;

    fn client() -> FamClient {
        let fabric = Fabric::Local(LocalFabric::new(1, 4));
        FamClient::connect(fabric, "default").unwrap()
    }

    #[test]
    fn options_report_identity_and_counts() {
        let client = client();
        assert_eq!(client.get_option("PE_ID").unwrap(), "0");
        assert_eq!(client.get_option("PE_COUNT").unwrap(), "1");
        assert_eq!(client.get_option("NUM_MEMSERVERS").unwrap(), "4");
        assert!(client.get_option("GRPC_PORT").is_none());
    }

    #[test]
    fn attach_beyond_pe_count_is_fatal() {
        let fabric = Fabric::Local(LocalFabric::new(1, 1));
        let _first = FamClient::connect(fabric.clone(), "default").unwrap();
        assert!(FamClient::connect(fabric, "default").is_err());
    }

    #[test]
    fn raid_none_is_rejected() {
        let client = client();
        let err = client
            .create_region("r", 1024, DEFAULT_PERMISSIONS, Redundancy::None)
            .unwrap_err();
        assert!(matches!(err, FamError::UnsupportedRedundancy(_)));
    }
}
