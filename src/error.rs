//! Error types surfaced by the FAM client contract and the placement layer.
//!
//! Every remote-service failure is surfaced immediately to the caller, no
//! retries are performed anywhere in this crate.

use crate::fam::Redundancy;

#[derive(Debug, Clone)]
pub enum FamError {
    AttachError(usize),
    NotAttached,
    OptionNotFound(String),
    RegionExists(String),
    RegionNotFound(String),
    RegionBusy(String, usize),
    RegionFull {
        region: String,
        requested: usize,
        available: usize,
    },
    ItemExists(String),
    ItemNotFound(String),
    OutOfRange {
        item: String,
        offset: usize,
        len: usize,
        size: usize,
    },
    UnsupportedRedundancy(Redundancy),
}

impl std::fmt::Display for FamError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FamError::AttachError(num_pes) => {
                write!(f, "all {} PE slots of this fabric are already attached", num_pes)
            }
            FamError::NotAttached => {
                write!(f, "client is not attached to the fabric")
            }
            FamError::OptionNotFound(name) => {
                write!(f, "no such fam option: {}", name)
            }
            FamError::RegionExists(name) => {
                write!(f, "region {} already exists", name)
            }
            FamError::RegionNotFound(name) => {
                write!(f, "region {} not found", name)
            }
            FamError::RegionBusy(name, items) => {
                write!(f, "region {} still holds {} data items", name, items)
            }
            FamError::RegionFull {
                region,
                requested,
                available,
            } => {
                write!(
                    f,
                    "region {} cannot hold {} more bytes ({} available)",
                    region, requested, available
                )
            }
            FamError::ItemExists(name) => {
                write!(f, "data item {} already exists in this region", name)
            }
            FamError::ItemNotFound(name) => {
                write!(f, "data item {} not found", name)
            }
            FamError::OutOfRange {
                item,
                offset,
                len,
                size,
            } => {
                write!(
                    f,
                    "transfer of {} bytes at offset {} exceeds data item {} of size {}",
                    len, offset, item, size
                )
            }
            FamError::UnsupportedRedundancy(redundancy) => {
                write!(f, "unsupported redundancy policy {:?}", redundancy)
            }
        }
    }
}

impl std::error::Error for FamError {}

pub type FamResult<T> = Result<T, FamError>;

#[derive(Debug, Clone)]
pub enum PlacementError {
    Exhausted {
        modulus: u64,
        attempts: usize,
    },
    EmptyAffinity {
        pe_id: usize,
        server_count: usize,
        nodes_per_pe: usize,
    },
}

impl std::fmt::Display for PlacementError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PlacementError::Exhausted { modulus, attempts } => {
                write!(
                    f,
                    "no qualifying data item name found after {} attempts (hash modulus {})",
                    attempts, modulus
                )
            }
            PlacementError::EmptyAffinity {
                pe_id,
                server_count,
                nodes_per_pe,
            } => {
                write!(
                    f,
                    "pe {} has an empty server affinity set ({} memory servers, {} nodes per pe)",
                    pe_id, server_count, nodes_per_pe
                )
            }
        }
    }
}

impl std::error::Error for PlacementError {}

pub type PlacementResult<T> = Result<T, PlacementError>;
