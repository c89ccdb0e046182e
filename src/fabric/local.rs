//! In-process fabric backend.
//!
//! Emulates a cluster of `num_servers` memory servers shared by `num_pes`
//! PEs running as threads of one process. Data items live in process memory,
//! keyed by the same name hash a real FAM service resolves placement with,
//! so placement tests observe the servers they targeted.
//!
//! Non-blocking operations are handed to a progress thread over a channel
//! and complete asynchronously; [`FabricComm::quiet`] blocks until the
//! issuing PE's outstanding count drains to zero.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{FamError, FamResult};
use crate::fabric::{CounterCells, FabricComm, FabricCounters};
use crate::fam::{ItemDescriptor, LocalBuffer, Redundancy, RegionDescriptor};
use crate::placement::dataitem_hash;

enum Command {
    Put {
        pe: usize,
        item: u64,
        offset: usize,
        data: Vec<u8>,
    },
    Get {
        pe: usize,
        item: u64,
        offset: usize,
        len: usize,
        dst: LocalBuffer,
    },
    Scatter {
        pe: usize,
        item: u64,
        indices: Vec<u64>,
        elem_size: usize,
        data: Vec<u8>,
    },
    Gather {
        pe: usize,
        item: u64,
        indices: Vec<u64>,
        elem_size: usize,
        dst: LocalBuffer,
    },
}

struct RegionState {
    size: usize,
    used: usize,
    _perm: u32,
    _redundancy: Redundancy,
    items: HashMap<String, u64>,
}

struct ItemState {
    name: String,
    region: String,
    size: usize,
    data: Vec<u8>,
}

#[derive(Default)]
struct Mem {
    regions: HashMap<String, RegionState>,
    items: HashMap<u64, ItemState>,
    next_item_id: u64,
}

#[derive(Default)]
struct BarrierEpoch {
    arrived: usize,
    generation: u64,
}

struct Shared {
    num_pes: usize,
    num_servers: usize,
    next_pe: AtomicUsize,
    mem: Mutex<Mem>,
    pending: Mutex<Vec<usize>>,
    pending_cv: Condvar,
    barrier: Mutex<BarrierEpoch>,
    barrier_cv: Condvar,
    counters: CounterCells,
}

impl Shared {
    fn exec(&self, cmd: Command) {
        let pe = match cmd {
            Command::Put {
                pe,
                item,
                offset,
                data,
            } => {
                let mut mem = self.mem.lock();
                match mem.items.get_mut(&item) {
                    Some(state) => {
                        state.data[offset..offset + data.len()].copy_from_slice(&data);
                        self.counters.record_put(data.len());
                    }
                    None => warn!(item, "data item deallocated before deferred put completed"),
                }
                pe
            }
            Command::Get {
                pe,
                item,
                offset,
                len,
                dst,
            } => {
                let mem = self.mem.lock();
                match mem.items.get(&item) {
                    Some(state) => {
                        dst.with_mut(|d| d[..len].copy_from_slice(&state.data[offset..offset + len]));
                        self.counters.record_get(len);
                    }
                    None => warn!(item, "data item deallocated before deferred get completed"),
                }
                pe
            }
            Command::Scatter {
                pe,
                item,
                indices,
                elem_size,
                data,
            } => {
                let mut mem = self.mem.lock();
                match mem.items.get_mut(&item) {
                    Some(state) => {
                        for (e, idx) in indices.iter().enumerate() {
                            let remote = *idx as usize * elem_size;
                            state.data[remote..remote + elem_size]
                                .copy_from_slice(&data[e * elem_size..(e + 1) * elem_size]);
                        }
                        self.counters.record_put(indices.len() * elem_size);
                    }
                    None => warn!(item, "data item deallocated before deferred scatter completed"),
                }
                pe
            }
            Command::Gather {
                pe,
                item,
                indices,
                elem_size,
                dst,
            } => {
                let mem = self.mem.lock();
                match mem.items.get(&item) {
                    Some(state) => {
                        dst.with_mut(|d| {
                            for (e, idx) in indices.iter().enumerate() {
                                let remote = *idx as usize * elem_size;
                                d[e * elem_size..(e + 1) * elem_size]
                                    .copy_from_slice(&state.data[remote..remote + elem_size]);
                            }
                        });
                        self.counters.record_get(indices.len() * elem_size);
                    }
                    None => warn!(item, "data item deallocated before deferred gather completed"),
                }
                pe
            }
        };
        let mut pending = self.pending.lock();
        pending[pe] -= 1;
        if pending[pe] == 0 {
            self.pending_cv.notify_all();
        }
    }

    fn check_item_range(
        &self,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()> {
        if offset + len > item.size {
            return Err(FamError::OutOfRange {
                item: item.name.clone(),
                offset,
                len,
                size: item.size,
            });
        }
        Ok(())
    }

    fn check_index_range(
        &self,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()> {
        for idx in indices {
            let offset = *idx as usize * elem_size;
            self.check_item_range(item, offset, elem_size)?;
        }
        Ok(())
    }
}

struct Progress {
    tx: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Progress {
    fn drop(&mut self) {
        // closing the channel stops the worker loop
        self.tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

#[derive(Clone)]
pub struct LocalFabric {
    shared: Arc<Shared>,
    progress: Arc<Progress>,
}

impl std::fmt::Debug for LocalFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LocalFabric({} pes, {} servers)",
            self.shared.num_pes, self.shared.num_servers
        )
    }
}

impl LocalFabric {
    pub fn new(num_pes: usize, num_servers: usize) -> LocalFabric {
        assert!(num_pes > 0, "a fabric needs at least one pe");
        assert!(num_servers > 0, "a fabric needs at least one memory server");
        let shared = Arc::new(Shared {
            num_pes,
            num_servers,
            next_pe: AtomicUsize::new(0),
            mem: Mutex::new(Mem::default()),
            pending: Mutex::new(vec![0; num_pes]),
            pending_cv: Condvar::new(),
            barrier: Mutex::new(BarrierEpoch::default()),
            barrier_cv: Condvar::new(),
            counters: CounterCells::default(),
        });
        let (tx, rx): (Sender<Command>, Receiver<Command>) = unbounded();
        let worker_shared = shared.clone();
        let worker = std::thread::spawn(move || {
            for cmd in rx.iter() {
                worker_shared.exec(cmd);
            }
        });
        debug!(num_pes, num_servers, "local fabric up");
        LocalFabric {
            shared,
            progress: Arc::new(Progress {
                tx: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    fn issue(&self, pe: usize, cmd: Command) {
        {
            let mut pending = self.shared.pending.lock();
            pending[pe] += 1;
        }
        let tx = self.progress.tx.lock();
        tx.as_ref()
            .expect("progress thread already shut down")
            .send(cmd)
            .expect("progress thread hung up");
    }
}

impl FabricComm for LocalFabric {
    fn num_pes(&self) -> usize {
        self.shared.num_pes
    }

    fn num_servers(&self) -> usize {
        self.shared.num_servers
    }

    fn attach(&self) -> FamResult<usize> {
        let pe = self.shared.next_pe.fetch_add(1, Ordering::SeqCst);
        if pe >= self.shared.num_pes {
            return Err(FamError::AttachError(self.shared.num_pes));
        }
        Ok(pe)
    }

    fn detach(&self, pe: usize) -> FamResult<()> {
        if pe >= self.shared.next_pe.load(Ordering::SeqCst) {
            return Err(FamError::NotAttached);
        }
        Ok(())
    }

    fn create_region(
        &self,
        name: &str,
        size: usize,
        perm: u32,
        redundancy: Redundancy,
    ) -> FamResult<RegionDescriptor> {
        let mut mem = self.shared.mem.lock();
        if mem.regions.contains_key(name) {
            return Err(FamError::RegionExists(name.to_owned()));
        }
        mem.regions.insert(
            name.to_owned(),
            RegionState {
                size,
                used: 0,
                _perm: perm,
                _redundancy: redundancy,
                items: HashMap::new(),
            },
        );
        debug!(name, size, "created region");
        Ok(RegionDescriptor {
            name: name.to_owned(),
            size,
        })
    }

    fn lookup_region(&self, name: &str) -> FamResult<RegionDescriptor> {
        let mem = self.shared.mem.lock();
        let region = mem
            .regions
            .get(name)
            .ok_or_else(|| FamError::RegionNotFound(name.to_owned()))?;
        Ok(RegionDescriptor {
            name: name.to_owned(),
            size: region.size,
        })
    }

    fn destroy_region(&self, region: &RegionDescriptor) -> FamResult<()> {
        let mut mem = self.shared.mem.lock();
        let state = mem
            .regions
            .get(&region.name)
            .ok_or_else(|| FamError::RegionNotFound(region.name.clone()))?;
        if !state.items.is_empty() {
            return Err(FamError::RegionBusy(region.name.clone(), state.items.len()));
        }
        mem.regions.remove(&region.name);
        debug!(name = %region.name, "destroyed region");
        Ok(())
    }

    fn allocate(
        &self,
        pe: usize,
        name: &str,
        size: usize,
        _perm: u32,
        region: &RegionDescriptor,
    ) -> FamResult<ItemDescriptor> {
        let memserver_id = (dataitem_hash(name) % self.shared.num_servers as u64) as usize;
        let mut mem = self.shared.mem.lock();
        let id = mem.next_item_id;
        let state = mem
            .regions
            .get_mut(&region.name)
            .ok_or_else(|| FamError::RegionNotFound(region.name.clone()))?;
        if state.items.contains_key(name) {
            return Err(FamError::ItemExists(name.to_owned()));
        }
        if state.used + size > state.size {
            return Err(FamError::RegionFull {
                region: region.name.clone(),
                requested: size,
                available: state.size - state.used,
            });
        }
        state.used += size;
        state.items.insert(name.to_owned(), id);
        mem.next_item_id += 1;
        mem.items.insert(
            id,
            ItemState {
                name: name.to_owned(),
                region: region.name.clone(),
                size,
                data: vec![0u8; size],
            },
        );
        Ok(ItemDescriptor {
            id,
            name: name.to_owned(),
            size,
            owner_pe: pe,
            memserver_id,
        })
    }

    fn deallocate(&self, item: &ItemDescriptor) -> FamResult<()> {
        let mut mem = self.shared.mem.lock();
        let state = mem
            .items
            .remove(&item.id)
            .ok_or_else(|| FamError::ItemNotFound(item.name.clone()))?;
        if let Some(region) = mem.regions.get_mut(&state.region) {
            region.used -= state.size;
            region.items.remove(&state.name);
        }
        Ok(())
    }

    fn put(
        &self,
        _pe: usize,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()> {
        self.shared.check_item_range(item, offset, len)?;
        let mut mem = self.shared.mem.lock();
        let state = mem
            .items
            .get_mut(&item.id)
            .ok_or_else(|| FamError::ItemNotFound(item.name.clone()))?;
        src.with(|s| state.data[offset..offset + len].copy_from_slice(&s[..len]));
        self.shared.counters.record_put(len);
        Ok(())
    }

    fn get(
        &self,
        _pe: usize,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()> {
        self.shared.check_item_range(item, offset, len)?;
        let mem = self.shared.mem.lock();
        let state = mem
            .items
            .get(&item.id)
            .ok_or_else(|| FamError::ItemNotFound(item.name.clone()))?;
        dst.with_mut(|d| d[..len].copy_from_slice(&state.data[offset..offset + len]));
        self.shared.counters.record_get(len);
        Ok(())
    }

    fn put_nonblocking(
        &self,
        pe: usize,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()> {
        self.shared.check_item_range(item, offset, len)?;
        let data = src.with(|s| s[..len].to_vec());
        self.issue(
            pe,
            Command::Put {
                pe,
                item: item.id,
                offset,
                data,
            },
        );
        Ok(())
    }

    fn get_nonblocking(
        &self,
        pe: usize,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        offset: usize,
        len: usize,
    ) -> FamResult<()> {
        self.shared.check_item_range(item, offset, len)?;
        self.issue(
            pe,
            Command::Get {
                pe,
                item: item.id,
                offset,
                len,
                dst: dst.clone(),
            },
        );
        Ok(())
    }

    fn scatter(
        &self,
        _pe: usize,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()> {
        self.shared.check_index_range(item, indices, elem_size)?;
        let mut mem = self.shared.mem.lock();
        let state = mem
            .items
            .get_mut(&item.id)
            .ok_or_else(|| FamError::ItemNotFound(item.name.clone()))?;
        src.with(|s| {
            for (e, idx) in indices.iter().enumerate() {
                let remote = *idx as usize * elem_size;
                state.data[remote..remote + elem_size]
                    .copy_from_slice(&s[e * elem_size..(e + 1) * elem_size]);
            }
        });
        self.shared.counters.record_put(indices.len() * elem_size);
        Ok(())
    }

    fn gather(
        &self,
        _pe: usize,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()> {
        self.shared.check_index_range(item, indices, elem_size)?;
        let mem = self.shared.mem.lock();
        let state = mem
            .items
            .get(&item.id)
            .ok_or_else(|| FamError::ItemNotFound(item.name.clone()))?;
        dst.with_mut(|d| {
            for (e, idx) in indices.iter().enumerate() {
                let remote = *idx as usize * elem_size;
                d[e * elem_size..(e + 1) * elem_size]
                    .copy_from_slice(&state.data[remote..remote + elem_size]);
            }
        });
        self.shared.counters.record_get(indices.len() * elem_size);
        Ok(())
    }

    fn scatter_nonblocking(
        &self,
        pe: usize,
        src: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()> {
        self.shared.check_index_range(item, indices, elem_size)?;
        let data = src.with(|s| s[..indices.len() * elem_size].to_vec());
        self.issue(
            pe,
            Command::Scatter {
                pe,
                item: item.id,
                indices: indices.to_vec(),
                elem_size,
                data,
            },
        );
        Ok(())
    }

    fn gather_nonblocking(
        &self,
        pe: usize,
        dst: &LocalBuffer,
        item: &ItemDescriptor,
        indices: &[u64],
        elem_size: usize,
    ) -> FamResult<()> {
        self.shared.check_index_range(item, indices, elem_size)?;
        self.issue(
            pe,
            Command::Gather {
                pe,
                item: item.id,
                indices: indices.to_vec(),
                elem_size,
                dst: dst.clone(),
            },
        );
        Ok(())
    }

    fn quiet(&self, pe: usize) -> FamResult<()> {
        let mut pending = self.shared.pending.lock();
        while pending[pe] > 0 {
            self.shared.pending_cv.wait(&mut pending);
        }
        Ok(())
    }

    fn barrier_all(&self, _pe: usize) {
        let mut epoch = self.shared.barrier.lock();
        let generation = epoch.generation;
        epoch.arrived += 1;
        if epoch.arrived == self.shared.num_pes {
            epoch.arrived = 0;
            epoch.generation += 1;
            self.shared.barrier_cv.notify_all();
        } else {
            while epoch.generation == generation {
                self.shared.barrier_cv.wait(&mut epoch);
            }
        }
    }

    fn reset_profile(&self) {
        self.shared.counters.reset();
    }

    fn profile(&self) -> FabricCounters {
        self.shared.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fam::DEFAULT_PERMISSIONS;

    fn fabric() -> LocalFabric {
        LocalFabric::new(1, 2)
    }

    fn region(fabric: &LocalFabric, size: usize) -> RegionDescriptor {
        fabric
            .create_region("r", size, DEFAULT_PERMISSIONS, Redundancy::Raid1)
            .unwrap()
    }

    #[test]
    fn blocking_put_get_round_trip() {
        let fabric = fabric();
        let region = region(&fabric, 4096);
        let item = fabric
            .allocate(0, "abc", 64, DEFAULT_PERMISSIONS, &region)
            .unwrap();

        let src = LocalBuffer::from_vec((0..64).collect());
        fabric.put(0, &src, &item, 0, 64).unwrap();
        let dst = LocalBuffer::new(64);
        fabric.get(0, &dst, &item, 0, 64).unwrap();
        assert_eq!(src.to_vec(), dst.to_vec());
    }

    #[test]
    fn item_resolves_to_name_hash_server() {
        let fabric = LocalFabric::new(1, 4);
        let region = region(&fabric, 4096);
        let item = fabric
            .allocate(0, "abcd", 16, DEFAULT_PERMISSIONS, &region)
            .unwrap();
        assert_eq!(
            item.memserver_id(),
            (dataitem_hash("abcd") % 4) as usize
        );
    }

    #[test]
    fn transfers_beyond_item_size_are_rejected() {
        let fabric = fabric();
        let region = region(&fabric, 4096);
        let item = fabric
            .allocate(0, "abc", 64, DEFAULT_PERMISSIONS, &region)
            .unwrap();
        let buf = LocalBuffer::new(128);
        assert!(matches!(
            fabric.put(0, &buf, &item, 32, 64),
            Err(FamError::OutOfRange { .. })
        ));
        assert!(matches!(
            fabric.gather(0, &buf, &item, &[0, 1, 2, 3], 32),
            Err(FamError::OutOfRange { .. })
        ));
    }

    #[test]
    fn region_capacity_is_enforced() {
        let fabric = fabric();
        let region = region(&fabric, 100);
        fabric
            .allocate(0, "abc", 80, DEFAULT_PERMISSIONS, &region)
            .unwrap();
        assert!(matches!(
            fabric.allocate(0, "abd", 40, DEFAULT_PERMISSIONS, &region),
            Err(FamError::RegionFull { .. })
        ));
    }

    #[test]
    fn destroy_requires_empty_region() {
        let fabric = fabric();
        let region = region(&fabric, 4096);
        let item = fabric
            .allocate(0, "abc", 64, DEFAULT_PERMISSIONS, &region)
            .unwrap();
        assert!(matches!(
            fabric.destroy_region(&region),
            Err(FamError::RegionBusy(..))
        ));
        fabric.deallocate(&item).unwrap();
        fabric.destroy_region(&region).unwrap();
        assert!(fabric.lookup_region("r").is_err());
    }

    #[test]
    fn quiet_drains_nonblocking_ops() {
        let fabric = fabric();
        let region = region(&fabric, 4096);
        let item = fabric
            .allocate(0, "abc", 8, DEFAULT_PERMISSIONS, &region)
            .unwrap();
        for i in 0..100u8 {
            let src = LocalBuffer::from_vec(vec![i; 8]);
            fabric.put_nonblocking(0, &src, &item, 0, 8).unwrap();
        }
        fabric.quiet(0).unwrap();
        assert_eq!(*fabric.shared.pending.lock(), vec![0]);
        let dst = LocalBuffer::new(8);
        fabric.get(0, &dst, &item, 0, 8).unwrap();
        assert_eq!(dst.to_vec(), vec![99; 8]);
    }

    #[test]
    fn barrier_releases_all_pes_together() {
        let fabric = LocalFabric::new(4, 1);
        let arrived = Arc::new(AtomicUsize::new(0));
        std::thread::scope(|s| {
            for pe in 0..4 {
                let fabric = fabric.clone();
                let arrived = arrived.clone();
                s.spawn(move || {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    fabric.barrier_all(pe);
                    assert_eq!(arrived.load(Ordering::SeqCst), 4);
                });
            }
        });
    }

    #[test]
    fn profile_counters_reset() {
        let fabric = fabric();
        let region = region(&fabric, 4096);
        let item = fabric
            .allocate(0, "abc", 64, DEFAULT_PERMISSIONS, &region)
            .unwrap();
        let buf = LocalBuffer::new(64);
        fabric.put(0, &buf, &item, 0, 64).unwrap();
        fabric.get(0, &buf, &item, 0, 64).unwrap();
        let counters = fabric.profile();
        assert_eq!(counters.puts, 1);
        assert_eq!(counters.gets, 1);
        assert_eq!(counters.bytes_put, 64);
        fabric.reset_profile();
        assert_eq!(fabric.profile(), FabricCounters::default());
    }
}
