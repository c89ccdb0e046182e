//! fambench is a correctness and performance exerciser for fabric attached
//! memory (FAM) services: a pool of addressable memory regions accessible by
//! many processing elements (PEs) over a network fabric, with data spread
//! across multiple memory servers.
//!
//! It solves two problems. First, deterministic data placement: a FAM
//! service resolves the backing memory server of a data item from a hash of
//! its name, so [placement] rejection-samples seeded random names until one
//! hashes to the server (or server set) the benchmark wants, relative to the
//! requesting PE's position in the cluster [topology]. Second, a multi PE
//! benchmark [driver] that coordinates region setup, per PE data item
//! allocation, warm-up, barrier-aligned timed batteries of blocking and
//! non-blocking put/get/scatter/gather operations, and teardown.
//!
//! The FAM service itself is consumed through the [fam] client contract;
//! [fabric] provides the backend dispatch, currently a single in-process
//! backend used for single node development and testing.
//!
//! EXAMPLE
//! -------
//!
//! ```
//! use fambench::driver::{self, RunConfig};
//! use fambench::fabric::{create_fabric, Backend};
//! use fambench::placement::DistributionMode;
//!
//! fn main() {
//!     let cfg = RunConfig {
//!         mode: DistributionMode::Even,
//!         num_servers: 4,
//!         min_region_size: 1 << 20,
//!         ..RunConfig::default()
//!     };
//!     let fabric = create_fabric(Backend::Local, 1, cfg.num_servers);
//!     let report = driver::run(fabric, cfg).unwrap();
//!     assert!(report.all_passed());
//! }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod fabric;
pub mod fam;
pub mod placement;
pub mod topology;

pub use driver::{CaseResult, RunConfig, RunReport};
pub use error::{FamError, FamResult, PlacementError, PlacementResult};
pub use fabric::{create_fabric, Backend, Fabric, FabricComm, FabricCounters};
pub use fam::{FamClient, ItemDescriptor, LocalBuffer, Redundancy, RegionDescriptor};
pub use placement::{DistributionMode, NameGenerator, PlacementPlanner};
