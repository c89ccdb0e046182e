//! Fabric backends.
//!
//! A fabric provides the actual data movement between PEs and memory
//! servers. Backends are dispatched through the [`Fabric`] enum; currently
//! one backend exists, [`local::LocalFabric`], which emulates a cluster of
//! memory servers in-process (PEs attach from separate threads) and is used
//! for single node development and for the test suite.

pub mod local;

use std::sync::atomic::{AtomicU64, Ordering};

use enum_dispatch::enum_dispatch;

use crate::error::FamResult;
use crate::fam::{ItemDescriptor, LocalBuffer, Redundancy, RegionDescriptor};
use local::LocalFabric;

/// Operations every fabric backend provides. Mirrors the consumed FAM
/// service contract; `pe` is the issuing PE's id.
#[enum_dispatch]
pub trait FabricComm {
    fn num_pes(&self) -> usize;
    fn num_servers(&self) -> usize;

    /// Claim the next free PE slot.
    fn attach(&self) -> FamResult<usize>;
    fn detach(&self, pe: usize) -> FamResult<()>;

    fn create_region(
        &self,
        name: &str,
        size: usize,
        perm: u32,
        redundancy: Redundancy,
    ) -> FamResult<RegionDescriptor>;
    fn lookup_region(&self, name: &str) -> FamResult<RegionDescriptor>;
    fn destroy_region(&self, region: &RegionDescriptor) -> FamResult<()>;

    fn allocate(
        &self,
        pe: usize,
        name: &str,
        size: usize,
        perm: u32,
        region: &RegionDescriptor,
    ) -> FamResult<ItemDescriptor>;
    fn deallocate(&self, item: &ItemDescriptor) -> FamResult<()>;

    fn put(
        &self,
        pe: usize,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()>;
    fn get(
        &self,
        pe: usize,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()>;
    fn put_nonblocking(
        &self,
        pe: usize,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()>;
    fn get_nonblocking(
        &self,
        pe: usize,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()>;

    fn scatter(
        &self,
        pe: usize,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()>;
    fn gather(
        &self,
        pe: usize,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()>;
    fn scatter_nonblocking(
        &self,
        pe: usize,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()>;
    fn gather_nonblocking(
        &self,
        pe: usize,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()>;

    /// Wait for every outstanding non-blocking operation issued by `pe`.
    fn quiet(&self, pe: usize) -> FamResult<()>;
    /// Collective rendezvous across all PEs.
    fn barrier_all(&self, pe: usize);

    fn reset_profile(&self);
    fn profile(&self) -> FabricCounters;
}

#[enum_dispatch(FabricComm)]
#[derive(Clone, Debug)]
pub enum Fabric {
    Local(LocalFabric),
}

/// Fabric backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Local,
}

impl Backend {
    pub fn from_config(value: &str) -> Backend {
        match value {
            "local" => Backend::Local,
            other => panic!("unknown fambench backend: {}", other),
        }
    }
}

/// Construct a fabric for `num_pes` PEs over `num_servers` memory servers.
pub fn create_fabric(backend: Backend, num_pes: usize, num_servers: usize) -> Fabric {
    match backend {
        Backend::Local => Fabric::Local(LocalFabric::new(num_pes, num_servers)),
    }
}

/// Snapshot of the fabric profiling counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FabricCounters {
    pub puts: u64,
    pub gets: u64,
    pub bytes_put: u64,
    pub bytes_get: u64,
}

/// Resettable counter cells shared by fabric backends.
#[derive(Debug, Default)]
pub(crate) struct CounterCells {
    puts: AtomicU64,
    gets: AtomicU64,
    bytes_put: AtomicU64,
    bytes_get: AtomicU64,
}

impl CounterCells {
    pub(crate) fn record_put(&self, bytes: usize) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.bytes_put.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_get(&self, bytes: usize) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.bytes_get.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.puts.store(0, Ordering::Relaxed);
        self.gets.store(0, Ordering::Relaxed);
        self.bytes_put.store(0, Ordering::Relaxed);
        self.bytes_get.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> FabricCounters {
        FabricCounters {
            puts: self.puts.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            bytes_put: self.bytes_put.load(Ordering::Relaxed),
            bytes_get: self.bytes_get.load(Ordering::Relaxed),
        }
    }
}
