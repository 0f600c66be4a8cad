use std::{io, process::ExitStatus, process::Stdio};

use tokio::process::{Child, Command};

use crate::{error::ScenarioError, scenario::Scenario};

/// Starts the scenario's executable with stdout piped back to the harness.
///
/// stdin and stderr are detached so the target cannot block on a terminal. The child is
/// killed if its handle is ever dropped without an explicit [`terminate`].
pub(crate) fn spawn(scenario: &Scenario) -> Result<Child, ScenarioError> {
    let mut command = Command::new(&scenario.executable);
    command
        .current_dir(&scenario.working_dir)
        .args(&scenario.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    for (key, value) in &scenario.env {
        command.env(key, value);
    }

    command.spawn().map_err(|source| ScenarioError::LaunchFailed {
        path: scenario.executable.clone(),
        source,
    })
}

/// Forcibly kills `child` and reaps it. A child that already exited is only reaped.
pub(crate) async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }
    child.start_kill()?;
    child.wait().await
}
