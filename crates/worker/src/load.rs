//! CPU load sampling.

use std::path::PathBuf;

/// Source of the load value reported to the registry.
pub trait LoadSampler: Send + Sync {
    fn sample(&self) -> u64;
}

/// Reads the `user` tick counter of the aggregate `cpu` line in
/// `/proc/stat`. Reports 0 where the file is missing or unreadable.
#[derive(Debug, Clone)]
pub struct ProcStatSampler {
    path: PathBuf,
}

impl Default for ProcStatSampler {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/stat"),
        }
    }
}

impl ProcStatSampler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LoadSampler for ProcStatSampler {
    fn sample(&self) -> u64 {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => parse_user_ticks(&content).unwrap_or(0),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "load unavailable");
                0
            }
        }
    }
}

/// Constant load, for tests and for hosts without `/proc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLoad(pub u64);

impl LoadSampler for FixedLoad {
    fn sample(&self) -> u64 {
        self.0
    }
}

fn parse_user_ticks(content: &str) -> Option<u64> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    line.split_whitespace().nth(1)?.parse().ok()
}
