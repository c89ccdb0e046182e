use fambench::driver::{self, RunConfig, RunReport};
use fambench::fabric::{create_fabric, Backend};
use fambench::fam::{FamClient, Redundancy, DEFAULT_PERMISSIONS};
use fambench::placement::{dataitem_hash, DistributionMode};
use fambench::topology;

fn run_all_pes(num_pes: usize, cfg: &RunConfig) -> Vec<RunReport> {
    let fabric = create_fabric(Backend::Local, num_pes, cfg.num_servers);
    let mut reports: Vec<RunReport> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..num_pes)
            .map(|_| {
                let fabric = fabric.clone();
                let cfg = cfg.clone();
                scope.spawn(move || driver::run(fabric, cfg).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("pe thread panicked"))
            .collect()
    });
    reports.sort_by_key(|r| r.pe);
    reports
}

fn small_run_config() -> RunConfig {
    RunConfig {
        num_dataitems: 2,
        num_io_iters: 2,
        data_size: 4096,
        min_region_size: 1 << 20,
        ..RunConfig::default()
    }
}

fn single_pe_client(num_servers: usize) -> FamClient {
    let fabric = create_fabric(Backend::Local, 1, num_servers);
    FamClient::connect(fabric, "default").unwrap()
}

#[test]
fn blocking_put_get_round_trips_one_mebibyte() {
    let client = single_pe_client(1);
    let region = client
        .create_region("scenario_a", 4 << 20, DEFAULT_PERMISSIONS, Redundancy::Raid1)
        .unwrap();
    let item = client
        .allocate("singleitem", 1 << 20, DEFAULT_PERMISSIONS, &region)
        .unwrap();

    let pattern: Vec<u8> = (0..1usize << 20).map(|i| (i % 251) as u8).collect();
    let src = client.alloc_local(1 << 20);
    src.copy_from_slice(&pattern);
    client.put_blocking(&src, &item, 0, 1 << 20).unwrap();

    let dst = client.alloc_local(1 << 20);
    client.get_blocking(&dst, &item, 0, 1 << 20).unwrap();
    assert_eq!(dst.to_vec(), pattern);

    client.deallocate(&item).unwrap();
    client.destroy_region(&region).unwrap();
}

#[test]
fn specific_mode_names_hash_to_per_pe_targets() {
    let cfg = RunConfig {
        mode: DistributionMode::Specific,
        num_servers: 4,
        ..small_run_config()
    };
    let reports = run_all_pes(8, &cfg);
    for report in &reports {
        assert!(report.all_passed(), "pe {} had failures", report.pe);
        for name in &report.item_names {
            assert_eq!(
                dataitem_hash(name) % 8,
                topology::pe_target(report.pe, 4),
                "pe {} item {} missed its target",
                report.pe,
                name
            );
        }
    }
}

#[test]
fn quiesce_drains_a_nonblocking_put_loop() {
    let client = single_pe_client(1);
    let region = client
        .create_region("scenario_c", 1 << 20, DEFAULT_PERMISSIONS, Redundancy::Raid1)
        .unwrap();
    let item = client
        .allocate("pingtarget", 64, DEFAULT_PERMISSIONS, &region)
        .unwrap();

    let src = client.alloc_local(64);
    for i in 0..100u8 {
        src.fill(i);
        client.put_nonblocking(&src, &item, 0, 64).unwrap();
        // each issue snapshots the buffer, so refilling src is safe
    }
    client.quiet().unwrap();

    let dst = client.alloc_local(64);
    client.get_blocking(&dst, &item, 0, 64).unwrap();
    assert_eq!(dst.to_vec(), vec![99u8; 64]);
}

#[test]
fn scatter_then_gather_reproduces_the_buffer() {
    let client = single_pe_client(2);
    let region = client
        .create_region("scenario_d", 1 << 20, DEFAULT_PERMISSIONS, Redundancy::Raid1)
        .unwrap();
    let item = client
        .allocate("sgtarget", 4096, DEFAULT_PERMISSIONS, &region)
        .unwrap();

    let indices = [0u64, 1, 2, 3];
    let elem_size = 1024;
    let pattern: Vec<u8> = (0..4096usize).map(|i| (i / elem_size) as u8 + 1).collect();
    let src = client.alloc_local(4096);
    src.copy_from_slice(&pattern);
    client
        .scatter_blocking(&src, &item, &indices, elem_size)
        .unwrap();

    let dst = client.alloc_local(4096);
    client
        .gather_blocking(&dst, &item, &indices, elem_size)
        .unwrap();
    assert_eq!(dst.to_vec(), pattern);
}

#[test]
fn even_mode_cycles_through_the_affinity_set() {
    let cfg = RunConfig {
        mode: DistributionMode::Even,
        num_dataitems: 4,
        num_servers: 4,
        ..small_run_config()
    };
    let reports = run_all_pes(4, &cfg);
    for report in &reports {
        assert!(report.all_passed(), "pe {} had failures", report.pe);
        let affinity = topology::server_affinity(report.pe, 4, 1);
        for (i, server) in report.item_servers.iter().enumerate() {
            assert_eq!(*server, affinity[(report.pe + i) % affinity.len()]);
        }
    }
}

#[test]
fn random_mode_stays_within_the_affinity_set() {
    let cfg = RunConfig {
        mode: DistributionMode::Random,
        num_servers: 8,
        ..small_run_config()
    };
    let reports = run_all_pes(2, &cfg);
    for report in &reports {
        assert!(report.all_passed(), "pe {} had failures", report.pe);
        let affinity = topology::server_affinity(report.pe, 8, 1);
        for server in &report.item_servers {
            assert!(affinity.contains(server));
        }
    }
}

#[test]
fn whole_battery_passes_on_a_single_pe() {
    let cfg = RunConfig {
        num_servers: 1,
        ..small_run_config()
    };
    let reports = run_all_pes(1, &cfg);
    assert_eq!(reports[0].cases.len(), 16);
    assert!(reports[0].all_passed());
}

#[test]
fn repeated_runs_generate_the_same_names() {
    let cfg = RunConfig {
        mode: DistributionMode::Even,
        num_servers: 4,
        ..small_run_config()
    };
    let first = run_all_pes(2, &cfg);
    let second = run_all_pes(2, &cfg);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.item_names, b.item_names);
        assert_eq!(a.item_servers, b.item_servers);
    }
}

#[test]
fn multi_node_pes_cannot_allocate_affinity_placed_items() {
    let cfg = RunConfig {
        mode: DistributionMode::Even,
        nodes_per_pe: 2,
        num_servers: 4,
        ..small_run_config()
    };
    let fabric = create_fabric(Backend::Local, 1, cfg.num_servers);
    let err = driver::run(fabric, cfg).unwrap_err();
    assert!(err.to_string().contains("empty server affinity set"));
}
