//! # Host Stats
//!
//! A point-in-time view of the machine the relay runs on: CPU utilisation,
//! load averages and memory. PoW is CPU-bound, so operators watch these to
//! decide when a relay is saturated.
//!
//! The Linux collector reads procfs directly. CPU utilisation needs two
//! samples of `/proc/stat` since the counters are cumulative since boot; the
//! collector blocks for the sample interval between them, so callers on an
//! async runtime should run it on a blocking thread.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::DEFAULT_STATS_SAMPLE_INTERVAL;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    pub cpu: CpuStats,
    pub load: LoadStats,
    pub memory: MemoryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    /// Busy share of all CPUs over the sample interval, 0-100.
    pub avg_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStats {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub used_percent: f64,
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Source of [`HostStats`]. Implementations are read-only and synchronous.
pub trait StatsCollector: Send + Sync {
    fn snapshot(&self) -> Result<HostStats, CollectorError>;
}

// ---------------------------------------------------------------------------
// procfs
// ---------------------------------------------------------------------------

/// Reads `stat`, `loadavg` and `meminfo` under a procfs root.
#[derive(Debug, Clone)]
pub struct ProcStatsCollector {
    root: PathBuf,
    sample_interval: Duration,
}

impl Default for ProcStatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcStatsCollector {
    pub fn new() -> Self {
        Self::with_root("/proc", DEFAULT_STATS_SAMPLE_INTERVAL)
    }

    pub fn with_root(root: impl Into<PathBuf>, sample_interval: Duration) -> Self {
        Self {
            root: root.into(),
            sample_interval,
        }
    }

    fn read(&self, name: &str) -> Result<(String, String), CollectorError> {
        let path = self.root.join(name);
        let display = path.display().to_string();
        let content = fs::read_to_string(&path).map_err(|source| CollectorError::Io {
            path: display.clone(),
            source,
        })?;
        Ok((display, content))
    }

    fn parsed<T>(&self, name: &str, parse: fn(&str) -> Result<T, String>) -> Result<T, CollectorError> {
        let (path, content) = self.read(name)?;
        parse(&content).map_err(|reason| CollectorError::Parse { path, reason })
    }
}

impl StatsCollector for ProcStatsCollector {
    fn snapshot(&self) -> Result<HostStats, CollectorError> {
        let before = self.parsed("stat", parse_cpu_times)?;
        std::thread::sleep(self.sample_interval);
        let after = self.parsed("stat", parse_cpu_times)?;

        Ok(HostStats {
            cpu: CpuStats {
                avg_percent: before.busy_percent_until(&after),
            },
            load: self.parsed("loadavg", parse_loadavg)?,
            memory: self.parsed("meminfo", parse_meminfo)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Aggregate CPU counters from the `cpu` line of `/proc/stat`, in jiffies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Busy share between two samples. Zero if no time passed.
    pub fn busy_percent_until(&self, later: &CpuTimes) -> f64 {
        let total = later.total.saturating_sub(self.total);
        if total == 0 {
            return 0.0;
        }
        let busy = later.busy.saturating_sub(self.busy);
        (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// `cpu  user nice system idle iowait irq softirq steal guest guest_nice`.
/// Guest time is already counted in user, so only the first eight count.
pub fn parse_cpu_times(content: &str) -> Result<CpuTimes, String> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or("no aggregate cpu line")?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|f| f.parse::<u64>().map_err(|e| format!("bad cpu field {f:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    if fields.len() < 4 {
        return Err(format!("expected at least 4 cpu fields, got {}", fields.len()));
    }

    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total: u64 = fields.iter().sum();
    Ok(CpuTimes {
        busy: total - idle,
        total,
    })
}

pub fn parse_loadavg(content: &str) -> Result<LoadStats, String> {
    let mut fields = content.split_whitespace().map(|f| {
        f.parse::<f64>()
            .map_err(|e| format!("bad load field {f:?}: {e}"))
    });
    let mut next = || fields.next().unwrap_or_else(|| Err("missing load field".to_string()));
    Ok(LoadStats {
        load1: next()?,
        load5: next()?,
        load15: next()?,
    })
}

/// Value of a `Key:  1234 kB` line, in bytes.
fn meminfo_bytes(content: &str, key: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Used memory is `MemTotal - MemAvailable`. Kernels older than 3.14 lack
/// `MemAvailable`; there it is approximated by free + buffers + cached.
pub fn parse_meminfo(content: &str) -> Result<MemoryStats, String> {
    let total = meminfo_bytes(content, "MemTotal").ok_or("missing MemTotal")?;
    let available = match meminfo_bytes(content, "MemAvailable") {
        Some(available) => available,
        None => {
            let free = meminfo_bytes(content, "MemFree").ok_or("missing MemAvailable and MemFree")?;
            free + meminfo_bytes(content, "Buffers").unwrap_or(0)
                + meminfo_bytes(content, "Cached").unwrap_or(0)
        }
    };

    let used = total.saturating_sub(available);
    let used_percent = if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    };

    Ok(MemoryStats {
        total_bytes: total,
        used_bytes: used,
        used_percent,
    })
}
