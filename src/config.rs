use std::{fs, path::Path};

use serde::Deserialize;

use crate::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// number of async worker threads, range [1, 32768), defaults to 16
    pub async_worker_thread_number: u16,
    /// max nodes executing at the same time within one run, defaults to 4
    pub max_concurrency: usize,
    /// max passes of one loop region per entry, defaults to 100
    pub max_loop_iterations: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_worker_thread_number: 16,
            max_concurrency: 4,
            max_loop_iterations: 100,
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let mut config = toml::from_str::<Config>(toml_str)?;
        config.max_concurrency = config.max_concurrency.max(1);
        Ok(config)
    }
}
