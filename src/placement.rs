//! Deterministic data item placement.
//!
//! A FAM service resolves the backing memory server of a data item from a
//! hash of its name. Placement therefore works backwards: rejection-sample
//! random names until one hashes to the wanted server (or set of servers)
//! under the run's modulus. The sampler is seeded, so a fixed seed and
//! parameter set reproduces the exact sequence of accepted names.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::error::{PlacementError, PlacementResult};
use crate::topology;

/// Length of every generated data item name.
pub const DATAITEM_NAME_LEN: usize = 20;

/// Retry bound for the rejection sampler. Expected acceptance needs about
/// `modulus` attempts, so hitting this bound indicates a degenerate
/// hash/modulus combination (e.g. a target outside the modulus range).
pub const MAX_NAME_ATTEMPTS: usize = 1_000_000;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// The order-independent name hash the fabric resolves placement with.
///
/// Must be stable across platforms and processes: every PE and every memory
/// server has to agree on where a name lands.
pub fn dataitem_hash(name: &str) -> u64 {
    name.bytes().map(|b| b as u64).sum()
}

/// How data items are distributed over the memory servers for one run.
///
/// Selected once at startup and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionMode {
    /// Each PE cycles round-robin through its server affinity set.
    Even,
    /// Each PE deterministically targets one fixed memory server.
    Specific,
    /// Each PE targets an uncontrolled member of its affinity set.
    Random,
}

impl DistributionMode {
    /// An unrecognized configuration value falls back to `Random`; this
    /// fallback is part of the contract, not a validation error.
    pub fn from_config(value: &str) -> DistributionMode {
        match value {
            "even" => DistributionMode::Even,
            "specific" => DistributionMode::Specific,
            _ => DistributionMode::Random,
        }
    }
}

impl std::fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DistributionMode::Even => write!(f, "even"),
            DistributionMode::Specific => write!(f, "specific"),
            DistributionMode::Random => write!(f, "random"),
        }
    }
}

/// Seeded generator of candidate data item names.
pub struct NameGenerator {
    rng: StdRng,
}

impl NameGenerator {
    pub fn new(seed: u64) -> NameGenerator {
        NameGenerator {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn candidate(&mut self) -> String {
        (0..DATAITEM_NAME_LEN)
            .map(|_| ALPHABET[self.rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }

    /// Sample names until `accept(hash % modulus)` holds, up to
    /// [`MAX_NAME_ATTEMPTS`].
    pub fn name_matching<F>(&mut self, modulus: u64, accept: F) -> PlacementResult<String>
    where
        F: Fn(u64) -> bool,
    {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = self.candidate();
            if accept(dataitem_hash(&name) % modulus) {
                trace!(%name, attempt, "accepted data item name");
                return Ok(name);
            }
        }
        Err(PlacementError::Exhausted {
            modulus,
            attempts: MAX_NAME_ATTEMPTS,
        })
    }
}

/// Decides which memory server a data item must land on and drives the
/// [`NameGenerator`] until a qualifying name is found.
pub struct PlacementPlanner {
    names: NameGenerator,
    server_count: usize,
}

impl PlacementPlanner {
    pub fn new(server_count: usize, seed: u64) -> PlacementPlanner {
        PlacementPlanner {
            names: NameGenerator::new(seed),
            server_count,
        }
    }

    /// A name resolving to exactly `server` under the server count modulus.
    pub fn name_for_server(&mut self, server: usize) -> PlacementResult<String> {
        let target = server as u64;
        self.names
            .name_matching(self.server_count as u64, |hash| hash == target)
    }

    /// A name resolving to any member of `servers`; which member is not
    /// controlled item to item.
    pub fn name_for_server_set(&mut self, servers: &[usize]) -> PlacementResult<String> {
        self.names.name_matching(self.server_count as u64, |hash| {
            servers.iter().any(|s| *s as u64 == hash)
        })
    }

    /// A name resolving, modulo the total PE count, to the topology-derived
    /// scalar target of `pe_id` (the `specific` distribution mode).
    pub fn name_for_pe(&mut self, pe_id: usize, total_pes: usize) -> PlacementResult<String> {
        let target = topology::pe_target(pe_id, self.server_count);
        self.names
            .name_matching(total_pes as u64, |hash| hash == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_hash_to_requested_server() {
        for server_count in [1, 2, 4, 8, 16] {
            let mut planner = PlacementPlanner::new(server_count, 7);
            for server in 0..server_count {
                let name = planner.name_for_server(server).unwrap();
                assert_eq!(name.len(), DATAITEM_NAME_LEN);
                assert_eq!(dataitem_hash(&name) % server_count as u64, server as u64);
            }
        }
    }

    #[test]
    fn names_hash_into_requested_set() {
        let mut planner = PlacementPlanner::new(8, 13);
        let servers = [1, 3, 5];
        for _ in 0..16 {
            let name = planner.name_for_server_set(&servers).unwrap();
            let resolved = dataitem_hash(&name) % 8;
            assert!(servers.iter().any(|s| *s as u64 == resolved));
        }
    }

    #[test]
    fn per_pe_names_hash_to_topology_target() {
        let total_pes = 8;
        for pe_id in 0..total_pes {
            let mut planner = PlacementPlanner::new(4, 21 + pe_id as u64);
            let name = planner.name_for_pe(pe_id, total_pes).unwrap();
            assert_eq!(
                dataitem_hash(&name) % total_pes as u64,
                topology::pe_target(pe_id, 4)
            );
        }
    }

    #[test]
    fn same_seed_reproduces_name_sequence() {
        let run = |seed: u64| {
            let mut planner = PlacementPlanner::new(4, seed);
            (0..8)
                .map(|server| planner.name_for_server(server % 4).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(99), run(99));
        assert_ne!(run(99), run(100));
    }

    #[test]
    fn unreachable_target_is_bounded() {
        let mut names = NameGenerator::new(3);
        let err = names.name_matching(4, |_| false).unwrap_err();
        match err {
            PlacementError::Exhausted { attempts, .. } => {
                assert_eq!(attempts, MAX_NAME_ATTEMPTS);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn unknown_config_value_falls_back_to_random() {
        assert_eq!(DistributionMode::from_config("even"), DistributionMode::Even);
        assert_eq!(
            DistributionMode::from_config("specific"),
            DistributionMode::Specific
        );
        assert_eq!(
            DistributionMode::from_config("random"),
            DistributionMode::Random
        );
        assert_eq!(
            DistributionMode::from_config("scattered"),
            DistributionMode::Random
        );
    }
}
