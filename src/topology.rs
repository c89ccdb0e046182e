//! Cluster topology rules mapping a PE to the memory servers "close" to it.
//!
//! The model is a two-level network: PEs are grouped into switches of
//! [`SWITCH_SIZE`] and the memory servers are split into two halves, one per
//! switch group. A PE preferentially targets the half behind its own switch.

/// Number of PEs attached to one switch.
pub const SWITCH_SIZE: usize = 8;

/// Compute the set of memory server indices a PE should target.
///
/// Only defined for `nodes_per_pe == 1`; any other value yields an empty set,
/// which is a limitation of the supported run configurations rather than an
/// error (callers that require a non-empty set report it as one).
pub fn server_affinity(pe_id: usize, server_count: usize, nodes_per_pe: usize) -> Vec<usize> {
    if nodes_per_pe != 1 {
        return Vec::new();
    }
    match server_count {
        1 => vec![0],
        2 => vec![pe_id / SWITCH_SIZE],
        4 | 8 | 16 => {
            let half = server_count / 2;
            if pe_id < SWITCH_SIZE {
                (0..half).collect()
            } else {
                (half..server_count).collect()
            }
        }
        _ => Vec::new(),
    }
}

/// The scalar hash target used by the `specific` distribution mode.
///
/// Each PE deterministically targets one fixed memory server, derived from
/// its id and the switch grouping above; the accepted data item name must
/// hash to this value modulo the total PE count.
pub fn pe_target(pe_id: usize, server_count: usize) -> u64 {
    let half = (server_count / 2) as u64;
    match server_count {
        1 => pe_id as u64,
        2 => (pe_id / SWITCH_SIZE) as u64,
        4 => {
            if pe_id < SWITCH_SIZE {
                (pe_id % 2) as u64
            } else {
                half + (pe_id % 2) as u64
            }
        }
        8 => {
            if pe_id < SWITCH_SIZE {
                (pe_id / SWITCH_SIZE + pe_id % 4) as u64
            } else {
                half + (pe_id % 4) as u64
            }
        }
        16 => pe_id as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_server_affinity_is_zero() {
        for pe_id in 0..32 {
            assert_eq!(server_affinity(pe_id, 1, 1), vec![0]);
        }
    }

    #[test]
    fn two_servers_follow_switch_group() {
        assert_eq!(server_affinity(0, 2, 1), vec![0]);
        assert_eq!(server_affinity(7, 2, 1), vec![0]);
        assert_eq!(server_affinity(8, 2, 1), vec![1]);
        assert_eq!(server_affinity(15, 2, 1), vec![1]);
    }

    #[test]
    fn switch_groups_map_to_disjoint_halves() {
        for server_count in [4, 8, 16] {
            let lower = server_affinity(3, server_count, 1);
            let upper = server_affinity(11, server_count, 1);
            assert_eq!(lower.len(), server_count / 2);
            assert_eq!(upper.len(), server_count / 2);
            assert!(lower.iter().all(|s| !upper.contains(s)));
            assert!(lower.iter().chain(upper.iter()).all(|s| *s < server_count));
        }
    }

    #[test]
    fn multi_node_pes_have_no_affinity() {
        assert!(server_affinity(0, 8, 2).is_empty());
        assert!(server_affinity(4, 16, 4).is_empty());
    }

    #[test]
    fn pe_targets_respect_switch_halves() {
        for pe_id in 0..8 {
            assert!(pe_target(pe_id, 4) < 2);
            assert!(pe_target(pe_id + 8, 4) >= 2);
            assert!(pe_target(pe_id, 8) < 4);
            assert!(pe_target(pe_id + 8, 8) >= 4);
        }
    }
}
