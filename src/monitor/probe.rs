use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// One foreground observation. Ephemeral; produced once per poll and
/// discarded after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundSample {
    pub package_id: String,
    pub sampled_at: DateTime<Utc>,
}

/// Thin wrapper over whatever the platform can tell us about the app
/// currently in front of the user. `Ok(None)` means no usable sample this
/// poll (permission denied, empty query result); the monitor skips the tick
/// and retries. Implementations must answer quickly; the monitor enforces a
/// hard timeout around each call.
pub trait ForegroundProbe: Send + Sync {
    fn sample(&self, window: Duration) -> Result<Option<ForegroundSample>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcessCandidate {
    pub name: String,
    pub started_at: u64,
    pub pid: u32,
}

/// Most-recent wins; ties on the start timestamp break to the highest pid so
/// the same process table always yields the same answer.
pub(crate) fn pick_most_recent(candidates: Vec<ProcessCandidate>) -> Option<ProcessCandidate> {
    candidates
        .into_iter()
        .max_by_key(|candidate| (candidate.started_at, candidate.pid))
}

/// Process-table approximation of foreground detection, for hosts without a
/// usage-stats API. Treats the most recently started process as the
/// foreground app, comparable in spirit to querying recent usage records and
/// taking the latest, and just as approximate. The `window` argument is
/// unused here: the process table carries no per-window usage, only start
/// times.
pub struct RecentProcessProbe {
    system: Mutex<System>,
}

impl RecentProcessProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for RecentProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ForegroundProbe for RecentProcessProbe {
    fn sample(&self, _window: Duration) -> Result<Option<ForegroundSample>> {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        system.refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::new());

        let candidates = system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessCandidate {
                name: process.name().to_string_lossy().into_owned(),
                started_at: process.start_time(),
                pid: pid.as_u32(),
            })
            .filter(|candidate| !candidate.name.is_empty())
            .collect();

        Ok(pick_most_recent(candidates).map(|candidate| ForegroundSample {
            package_id: candidate.name,
            sampled_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, started_at: u64, pid: u32) -> ProcessCandidate {
        ProcessCandidate {
            name: name.to_string(),
            started_at,
            pid,
        }
    }

    #[test]
    fn latest_start_time_wins() {
        let picked = pick_most_recent(vec![
            candidate("old", 100, 7),
            candidate("new", 300, 3),
            candidate("mid", 200, 9),
        ])
        .unwrap();
        assert_eq!(picked.name, "new");
    }

    #[test]
    fn ties_break_to_the_highest_pid() {
        let picked = pick_most_recent(vec![
            candidate("a", 300, 10),
            candidate("b", 300, 42),
            candidate("c", 300, 17),
        ])
        .unwrap();
        assert_eq!(picked.name, "b");
    }

    #[test]
    fn tie_break_ignores_input_order() {
        let forward = pick_most_recent(vec![candidate("a", 5, 1), candidate("b", 5, 2)]);
        let reversed = pick_most_recent(vec![candidate("b", 5, 2), candidate("a", 5, 1)]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn empty_table_yields_no_sample() {
        assert!(pick_most_recent(Vec::new()).is_none());
    }
}
