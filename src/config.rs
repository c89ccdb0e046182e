use std::sync::OnceLock;

use serde::Deserialize;

fn default_seed() -> u64 {
    1
}

fn default_num_pes() -> usize {
    1
}

fn default_backend() -> String {
    "local".to_owned()
}

// Large enough that a region of this size is guaranteed to span more than one
// memory server on the clusters the benchmark targets.
fn default_min_region_size() -> usize {
    21_474_836_480 * 4
}

#[derive(Deserialize, Debug)]
pub struct Config {
    /// Base seed for the data item name sampler, offset by PE id, default: 1
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of PEs to launch on the local fabric backend, default: 1
    #[serde(default = "default_num_pes")]
    pub num_pes: usize,

    /// The fabric backend to use
    /// local -- in-process multi pe execution emulating the memory servers
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Lower bound for the region size regardless of the requested workload, default: 80 GiB
    #[serde(default = "default_min_region_size")]
    pub min_region_size: usize,
}

/// Get the current environment variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("FAMBENCH_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}
