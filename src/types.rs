use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether a method's previous executions may stand in for new ones.
///
/// - `Deterministic`: reuse freely; a re-execution must reproduce the
///   recorded output checksums exactly or it counts as an integrity failure.
/// - `Reusable`: reuse freely; a re-execution that produces different output
///   is recorded as a fresh execution instead of failing.
/// - `NonReusable`: always execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reusability {
    #[default]
    Deterministic,
    Reusable,
    NonReusable,
}

impl FromStr for Reusability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deterministic" => Ok(Reusability::Deterministic),
            "reusable" => Ok(Reusability::Reusable),
            "non_reusable" | "non-reusable" => Ok(Reusability::NonReusable),
            other => Err(format!(
                "invalid reusability: {other} (expected \"deterministic\", \"reusable\" or \"non_reusable\")"
            )),
        }
    }
}

/// Which batch scheduler the manager talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Drive a Slurm cluster through `sbatch` / `scancel` / `sacct` / `scontrol`.
    Slurm,
    /// Run jobs as local processes through the in-process scheduler.
    #[default]
    Local,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Slurm => write!(f, "slurm"),
            SchedulerKind::Local => write!(f, "local"),
        }
    }
}

/// Identity under which scheduler jobs run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobIdentity {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}
