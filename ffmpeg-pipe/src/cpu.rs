//! Host CPU utilization from `/proc/stat`.

use std::path::PathBuf;

pub const PROC_STAT: &str = "/proc/stat";

pub trait CpuSampler {
    /// Busy percentage since the previous call. The first call has nothing
    /// to compare against and returns 0.
    fn sample(&mut self) -> anyhow::Result<f64>;
}

/// The first four counters of the aggregate `cpu` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
}

impl CpuTimes {
    pub fn parse(stat: &str) -> anyhow::Result<Self> {
        let line = stat
            .lines()
            .find(|line| line.split_whitespace().next() == Some("cpu"))
            .ok_or_else(|| anyhow::anyhow!("no aggregate cpu line"))?;
        let fields = line
            .split_whitespace()
            .skip(1)
            .take(4)
            .map(|field| field.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()?;
        if fields.len() < 4 {
            anyhow::bail!("short cpu line: {}", line);
        }

        Ok(Self {
            user: fields[0],
            nice: fields[1],
            system: fields[2],
            idle: fields[3],
        })
    }

    fn busy(&self) -> u64 {
        self.user + self.nice + self.system
    }

    fn total(&self) -> u64 {
        self.busy() + self.idle
    }

    pub fn usage_since(&self, previous: &CpuTimes) -> f64 {
        let total = self.total().saturating_sub(previous.total());
        if total == 0 {
            return 0.0;
        }
        let busy = self.busy().saturating_sub(previous.busy());
        busy as f64 * 100.0 / total as f64
    }
}

pub struct ProcStatSampler {
    path: PathBuf,
    previous: Option<CpuTimes>,
}

impl ProcStatSampler {
    pub fn new() -> Self {
        Self::with_path(PROC_STAT)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            previous: None,
        }
    }
}

impl Default for ProcStatSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler for ProcStatSampler {
    fn sample(&mut self) -> anyhow::Result<f64> {
        let stat = std::fs::read_to_string(&self.path)?;
        let current = CpuTimes::parse(&stat)?;
        let usage = self
            .previous
            .map(|previous| current.usage_since(&previous))
            .unwrap_or(0.0);
        self.previous = Some(current);
        Ok(usage)
    }
}
