//! End-to-end benchmark orchestration.
//!
//! One [`run`] call is the life of one PE: attach, elect PE 0 to create the
//! shared region, allocate data items according to the distribution mode,
//! execute the timed operation battery, then tear everything down. Barriers
//! separate every synchronization-sensitive step so all PEs move through the
//! run in lock-step epochs.

pub(crate) mod battery;

use std::time::Duration;

use anyhow::{ensure, Context};
use tracing::info;

use crate::error::PlacementError;
use crate::fabric::Fabric;
use crate::fam::{FamClient, ItemDescriptor, Redundancy, RegionDescriptor, DEFAULT_PERMISSIONS};
use crate::placement::{DistributionMode, PlacementPlanner};
use crate::topology;

/// Parameters of one benchmark run; immutable once the run starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: DistributionMode,
    /// Data items allocated by each PE.
    pub num_dataitems: usize,
    /// I/O iterations per data item in every timed loop.
    pub num_io_iters: usize,
    /// Size of each data item in bytes.
    pub data_size: usize,
    /// Memory servers backing the region.
    pub num_servers: usize,
    pub nodes_per_pe: usize,
    pub region_name: String,
    /// Lower bound on the region size; the region must span more than one
    /// memory server regardless of how small the workload is.
    pub min_region_size: usize,
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> RunConfig {
        RunConfig {
            mode: DistributionMode::Specific,
            num_dataitems: 1,
            num_io_iters: 1,
            data_size: 1_048_576,
            num_servers: 1,
            nodes_per_pe: 1,
            region_name: "spanning".to_owned(),
            min_region_size: 21_474_836_480 * 4,
            seed: 1,
        }
    }
}

pub(crate) fn region_size(cfg: &RunConfig, total_pes: usize) -> usize {
    std::cmp::max(
        cfg.min_region_size,
        cfg.data_size * cfg.num_dataitems * total_pes,
    )
}

/// Outcome of one timed battery case on one PE.
#[derive(Debug, Clone)]
pub struct CaseResult {
    pub name: &'static str,
    pub duration: Duration,
    pub error: Option<String>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything one PE produced during a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pe: usize,
    /// Names of the data items this PE allocated, in allocation order.
    pub item_names: Vec<String>,
    /// Memory server each item resolved to, parallel to `item_names`.
    pub item_servers: Vec<usize>,
    pub cases: Vec<CaseResult>,
}

impl RunReport {
    pub fn all_passed(&self) -> bool {
        self.cases.iter().all(|c| c.passed())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseResult> {
        self.cases.iter().filter(|c| !c.passed())
    }
}

pub(crate) struct RunContext {
    pub(crate) client: FamClient,
    pub(crate) cfg: RunConfig,
    pub(crate) items: Vec<ItemDescriptor>,
}

/// Execute a full benchmark run as one PE of the given fabric.
///
/// Setup failures abort immediately; failures inside the timed battery are
/// recorded in the report and the run continues with the remaining cases.
pub fn run(fabric: Fabric, cfg: RunConfig) -> anyhow::Result<RunReport> {
    let client = FamClient::connect(fabric, "default")?;
    let my_pe: usize = client
        .get_option("PE_ID")
        .context("fam runtime did not report PE_ID")?
        .parse()?;
    let num_pes: usize = client
        .get_option("PE_COUNT")
        .context("fam runtime did not report PE_COUNT")?
        .parse()?;
    let num_servers: usize = client
        .get_option("NUM_MEMSERVERS")
        .context("fam runtime did not report NUM_MEMSERVERS")?
        .parse()?;
    ensure!(
        num_servers == cfg.num_servers,
        "fabric has {} memory servers but the run was configured for {}",
        num_servers,
        cfg.num_servers
    );
    client.barrier_all();

    let region = if my_pe == 0 {
        let size = region_size(&cfg, num_pes);
        info!(
            name = %cfg.region_name,
            size,
            mode = %cfg.mode,
            num_pes,
            "creating spanning region"
        );
        let region = client
            .create_region(&cfg.region_name, size, DEFAULT_PERMISSIONS, Redundancy::Raid1)
            .context("region creation failed")?;
        client.barrier_all();
        region
    } else {
        client.barrier_all();
        client
            .lookup_region(&cfg.region_name)
            .context("region lookup failed")?
    };
    client.barrier_all();

    let items = allocate_items(&client, &cfg, my_pe, num_pes, &region)?;
    client.barrier_all();

    let ctx = RunContext { client, cfg, items };
    let cases = battery::run(&ctx);
    ctx.client.barrier_all();

    let RunContext { client, items, .. } = ctx;
    let item_names = items.iter().map(|i| i.name().to_owned()).collect();
    let item_servers = items.iter().map(|i| i.memserver_id()).collect();
    for item in &items {
        client.deallocate(item).context("deallocation failed")?;
    }
    client.barrier_all();
    if my_pe == 0 {
        client
            .destroy_region(&region)
            .context("region destruction failed")?;
    }
    client.barrier_all();
    client.finalize()?;

    Ok(RunReport {
        pe: my_pe,
        item_names,
        item_servers,
        cases,
    })
}

fn allocate_items(
    client: &FamClient,
    cfg: &RunConfig,
    my_pe: usize,
    num_pes: usize,
    region: &RegionDescriptor,
) -> anyhow::Result<Vec<ItemDescriptor>> {
    let affinity = topology::server_affinity(my_pe, cfg.num_servers, cfg.nodes_per_pe);
    let needs_affinity = matches!(cfg.mode, DistributionMode::Even | DistributionMode::Random);
    if needs_affinity && affinity.is_empty() {
        return Err(PlacementError::EmptyAffinity {
            pe_id: my_pe,
            server_count: cfg.num_servers,
            nodes_per_pe: cfg.nodes_per_pe,
        }
        .into());
    }
    let mut planner = PlacementPlanner::new(cfg.num_servers, cfg.seed.wrapping_add(my_pe as u64));
    let mut items = Vec::with_capacity(cfg.num_dataitems);
    for i in 0..cfg.num_dataitems {
        let name = match cfg.mode {
            DistributionMode::Even => {
                planner.name_for_server(affinity[(my_pe + i) % affinity.len()])?
            }
            DistributionMode::Specific => planner.name_for_pe(my_pe, num_pes)?,
            DistributionMode::Random => planner.name_for_server_set(&affinity)?,
        };
        let item = client
            .allocate(&name, cfg.data_size, DEFAULT_PERMISSIONS, region)
            .context("data item allocation failed")?;
        info!(
            pe = my_pe,
            name = %item.name(),
            memserver = item.memserver_id(),
            "allocated data item"
        );
        items.push(item);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_minimum_dominates_small_workloads() {
        let cfg = RunConfig {
            data_size: 1,
            num_dataitems: 1,
            min_region_size: 4096,
            ..RunConfig::default()
        };
        assert_eq!(region_size(&cfg, 1), 4096);
    }

    #[test]
    fn large_workloads_grow_the_region() {
        let cfg = RunConfig {
            data_size: 1024,
            num_dataitems: 8,
            min_region_size: 4096,
            ..RunConfig::default()
        };
        assert_eq!(region_size(&cfg, 16), 1024 * 8 * 16);
    }
}
