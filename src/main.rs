use std::str::FromStr;

use anyhow::Context;
use tracing::error;

use fambench::config::config;
use fambench::driver::{self, RunConfig, RunReport};
use fambench::fabric::{create_fabric, Backend};
use fambench::placement::DistributionMode;

const USAGE: &str = "\
usage: fambench [config_type] [num_dataitems] [num_io_iters] [data_size] [num_msrv] [nodesperPE]

  config_type:   even/specific/random depending on how we want the data item distribution to happen
  num_dataitems: number of data items to be allocated by PE
  num_io_iters:  number of I/O iterations to be done on each data item
  data_size:     data item size in bytes
  num_msrv:      number of memory servers
  nodesperPE:    number of nodes per PE

environment: FAMBENCH_NUM_PES, FAMBENCH_SEED, FAMBENCH_BACKEND, FAMBENCH_MIN_REGION_SIZE";

fn main() {
    std::process::exit(match try_main() {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            1
        }
    });
}

fn try_main() -> anyhow::Result<i32> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("-h") | Some("--help")) {
        eprintln!("{}", USAGE);
        return Ok(2);
    }
    let cfg = run_config_from_args(&args)?;
    let num_pes = config().num_pes;
    let backend = Backend::from_config(&config().backend);
    let fabric = create_fabric(backend, num_pes, cfg.num_servers);

    let results: Vec<anyhow::Result<RunReport>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..num_pes)
            .map(|_| {
                let fabric = fabric.clone();
                let cfg = cfg.clone();
                scope.spawn(move || driver::run(fabric, cfg))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("pe thread panicked"))
            .collect()
    });

    Ok(summarize(&results))
}

fn run_config_from_args(args: &[String]) -> anyhow::Result<RunConfig> {
    let defaults = RunConfig::default();
    Ok(RunConfig {
        mode: args
            .first()
            .map(|v| DistributionMode::from_config(v))
            .unwrap_or(defaults.mode),
        num_dataitems: positional(args, 1, defaults.num_dataitems)?,
        num_io_iters: positional(args, 2, defaults.num_io_iters)?,
        data_size: positional(args, 3, defaults.data_size)?,
        num_servers: positional(args, 4, defaults.num_servers)?,
        nodes_per_pe: positional(args, 5, defaults.nodes_per_pe)?,
        min_region_size: config().min_region_size,
        seed: config().seed,
        ..defaults
    })
}

fn positional<T>(args: &[String], idx: usize, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match args.get(idx) {
        Some(value) => value
            .parse()
            .with_context(|| format!("invalid value for argument {}: {}", idx + 1, value)),
        None => Ok(default),
    }
}

fn summarize(results: &[anyhow::Result<RunReport>]) -> i32 {
    let mut passed = 0usize;
    let mut failed = 0usize;
    for result in results {
        match result {
            Ok(report) => {
                for case in &report.cases {
                    match &case.error {
                        None => {
                            passed += 1;
                            if report.pe == 0 {
                                println!("{} ... ok ({:?})", case.name, case.duration);
                            }
                        }
                        Some(err) => {
                            failed += 1;
                            println!("PE{} {} ... FAILED: {}", report.pe, case.name, err);
                        }
                    }
                }
            }
            Err(err) => {
                failed += 1;
                println!("PE setup ... FAILED: {:#}", err);
            }
        }
    }
    println!(
        "fambench result: {}. {} passed; {} failed",
        if failed == 0 { "ok" } else { "FAILED" },
        passed,
        failed
    );
    i32::from(failed > 0)
}
