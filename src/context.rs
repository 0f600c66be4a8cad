use std::{
    collections::BTreeMap,
    fmt,
    mem,
    path::{Path, PathBuf},
    process::ExitStatus,
    time::Duration,
};

use anyhow::Result;
use tokio::process::{Child, ChildStdout};
use tracing::{debug, warn};

use crate::{
    config::{self, DEFAULT_EXECUTABLE, STARTUP_BANNER},
    error::ScenarioError,
    process,
    scenario::Scenario,
};

/// Identifies one launched process within a [`RunContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScenarioId(u64);

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What happened to a process when the harness let go of it.
#[derive(Clone, Debug)]
pub struct Termination {
    pub id: ScenarioId,
    pub pid: Option<u32>,
    /// `None` when the kill itself failed.
    pub status: Option<ExitStatus>,
}

/// State shared by every scenario of one test run.
///
/// Owns every process launched during the run. Scenarios terminate their own process when
/// they finish; [`RunContext::teardown`] kills whatever is still registered. Dropping a
/// context without a teardown still sends a kill to each remaining process.
pub struct RunContext {
    root: PathBuf,
    next_id: u64,
    processes: BTreeMap<ScenarioId, Child>,
    terminated: Vec<Termination>,
}

impl RunContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RunContext {
            root: root.into(),
            next_id: 0,
            processes: BTreeMap::new(),
            terminated: Vec::new(),
        }
    }

    /// Builds a context rooted at `$ROOT`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(config::root_from_env()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/bin/run` run from `<root>`, expecting the startup banner.
    pub fn startup_scenario(&self, timeout: Duration) -> Scenario {
        Scenario::banner(
            self.root.join(DEFAULT_EXECUTABLE),
            &self.root,
            STARTUP_BANNER,
            timeout,
        )
    }

    /// Number of launched processes that have not been terminated yet.
    pub fn running(&self) -> usize {
        self.processes.len()
    }

    pub fn terminations(&self) -> &[Termination] {
        &self.terminated
    }

    /// Pids of the processes still registered, in launch order.
    pub fn pids(&self) -> Vec<u32> {
        self.processes.values().filter_map(Child::id).collect()
    }

    pub(crate) fn launch(&mut self, scenario: &Scenario) -> Result<ScenarioId, ScenarioError> {
        let child = process::spawn(scenario)?;
        let id = ScenarioId(self.next_id);
        self.next_id += 1;
        debug!(scenario = %scenario.name, %id, pid = ?child.id(), "launched target");
        self.processes.insert(id, child);
        Ok(id)
    }

    pub(crate) fn take_stdout(&mut self, id: ScenarioId) -> Option<ChildStdout> {
        self.processes.get_mut(&id).and_then(|child| child.stdout.take())
    }

    /// Kills the process registered under `id`. Calling it twice is a no-op.
    pub async fn terminate(&mut self, id: ScenarioId) -> Option<Termination> {
        let child = self.processes.remove(&id)?;
        let termination = kill(id, child).await;
        self.terminated.push(termination.clone());
        Some(termination)
    }

    /// Kills every process still registered, exactly once, and returns the full record of
    /// terminations for the run.
    pub async fn teardown(mut self) -> Vec<Termination> {
        let remaining = mem::take(&mut self.processes);
        for (id, child) in remaining {
            let termination = kill(id, child).await;
            self.terminated.push(termination);
        }
        mem::take(&mut self.terminated)
    }
}

async fn kill(id: ScenarioId, mut child: Child) -> Termination {
    let pid = child.id();
    let status = match process::terminate(&mut child).await {
        Ok(status) => {
            debug!(%id, ?pid, %status, "terminated target");
            Some(status)
        }
        Err(err) => {
            warn!(%id, ?pid, error = %err, "failed to terminate target");
            None
        }
    };
    Termination { id, pid, status }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        for (id, child) in self.processes.iter_mut() {
            if let Err(err) = child.start_kill() {
                warn!(%id, error = %err, "failed to kill target on drop");
            }
        }
    }
}
