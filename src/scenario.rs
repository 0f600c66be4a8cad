use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use regex::bytes::Regex;
use tokio::process::ChildStdout;
use tracing::{debug, info};

use crate::{
    capture::{self, ReaderTask},
    config::DEFAULT_TIMEOUT_MS,
    context::{RunContext, ScenarioId},
    error::ScenarioError,
    verify,
};

/// What the target's output has to look like for the scenario to pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expectation {
    /// The first line (or the snapshot) starts with this text.
    Banner(String),
    /// The text shows up somewhere in the output within the timeout.
    Contains(String),
    /// The text does not show up within the timeout.
    Absent(String),
    /// A regular expression matches somewhere in the output within the timeout.
    Pattern(String),
    /// Lines mentioning the first text and lines mentioning the second each follow the
    /// other at least once within the timeout.
    Alternating(String, String),
}

/// How a [`Expectation::Banner`] scenario captures output. The other expectations always
/// scan the stream for the whole timeout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureStrategy {
    /// Read one line on a background task, racing the scenario timeout.
    #[default]
    Streaming,
    /// Buffer everything, sleep for `wait`, then look at the buffer.
    Snapshot { wait: Duration },
}

#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: String,
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub expectation: Expectation,
    pub strategy: CaptureStrategy,
    pub timeout: Duration,
    /// Failures are reported but do not fail the run.
    pub allow_failure: bool,
}

impl Scenario {
    pub fn new(
        name: impl Into<String>,
        executable: impl Into<PathBuf>,
        working_dir: impl AsRef<Path>,
        expectation: Expectation,
    ) -> Self {
        Scenario {
            name: name.into(),
            executable: executable.into(),
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
            env: Vec::new(),
            expectation,
            strategy: CaptureStrategy::default(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            allow_failure: false,
        }
    }

    /// Launch `executable` in `working_dir` and expect its first line to start with `banner`
    /// within `timeout`.
    pub fn banner(
        executable: impl Into<PathBuf>,
        working_dir: impl AsRef<Path>,
        banner: &str,
        timeout: Duration,
    ) -> Self {
        let executable = executable.into();
        let name = format!("{} prints banner", executable.display());
        Scenario::new(name, executable, working_dir, Expectation::Banner(banner.into()))
            .timeout(timeout)
    }

    pub fn strategy(mut self, strategy: CaptureStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn allow_failure(mut self, allow: bool) -> Self {
        self.allow_failure = allow;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Launching,
    AwaitingOutput,
    Matched,
    Mismatched,
    TimedOut,
    ReadFailed,
    LaunchFailed,
    Terminated,
}

fn advance(scenario: &Scenario, from: Phase, to: Phase) -> Phase {
    debug!(scenario = %scenario.name, ?from, ?to, "phase");
    to
}

/// Where an observation that produced `outcome` leaves the scenario.
fn settle(outcome: &Result<(), ScenarioError>) -> Phase {
    match outcome {
        Ok(()) => Phase::Matched,
        Err(ScenarioError::TimedOut { .. }) => Phase::TimedOut,
        Err(ScenarioError::ReadFailed(_)) => Phase::ReadFailed,
        Err(_) => Phase::Mismatched,
    }
}

/// The expectation with its pattern compiled, ready to run against a stream.
enum Check<'a> {
    Banner(&'a str),
    Contains(&'a str),
    Absent(&'a str),
    Pattern(&'a str, Regex),
    Alternating(&'a str, &'a str),
}

impl<'a> Check<'a> {
    fn prepare(expectation: &'a Expectation) -> Result<Self, ScenarioError> {
        Ok(match expectation {
            Expectation::Banner(banner) => Check::Banner(banner),
            Expectation::Contains(needle) => Check::Contains(needle),
            Expectation::Absent(needle) => Check::Absent(needle),
            Expectation::Pattern(pattern) => {
                Check::Pattern(pattern, verify::compile_pattern(pattern)?)
            }
            Expectation::Alternating(first, second) => Check::Alternating(first, second),
        })
    }
}

/// Launches the scenario's target, checks its output and kills it.
///
/// The process is terminated on every path once it exists. Failing to kill it is logged and
/// never replaces the outcome that is returned.
pub async fn run_scenario(ctx: &mut RunContext, scenario: &Scenario) -> Result<(), ScenarioError> {
    let check = Check::prepare(&scenario.expectation)?;

    let phase = advance(scenario, Phase::NotStarted, Phase::Launching);
    let id = match ctx.launch(scenario) {
        Ok(id) => id,
        Err(err) => {
            advance(scenario, phase, Phase::LaunchFailed);
            let outcome = Err(err);
            log_outcome(scenario, &outcome);
            return outcome;
        }
    };
    let phase = advance(scenario, phase, Phase::AwaitingOutput);

    let (outcome, reader) = observe(ctx, id, scenario, &check).await;
    let phase = advance(scenario, phase, settle(&outcome));

    ctx.terminate(id).await;
    drop(reader);
    advance(scenario, phase, Phase::Terminated);

    log_outcome(scenario, &outcome);
    outcome
}

fn log_outcome(scenario: &Scenario, outcome: &Result<(), ScenarioError>) {
    match outcome {
        Ok(()) => info!(scenario = %scenario.name, "scenario passed"),
        Err(err) => {
            info!(scenario = %scenario.name, kind = err.kind(), error = %err, "scenario failed")
        }
    }
}

async fn observe(
    ctx: &mut RunContext,
    id: ScenarioId,
    scenario: &Scenario,
    check: &Check<'_>,
) -> (Result<(), ScenarioError>, Option<ReaderTask>) {
    let Some(stdout) = ctx.take_stdout(id) else {
        let err = io::Error::other("target stdout was not captured");
        return (Err(ScenarioError::ReadFailed(err)), None);
    };

    let window = scenario.timeout;
    match check {
        Check::Banner(banner) => {
            let (captured, reader) = match scenario.strategy {
                CaptureStrategy::Streaming => capture::first_line(stdout, window).await,
                CaptureStrategy::Snapshot { wait } => capture::snapshot(stdout, wait).await,
            };
            let outcome = captured.and_then(|bytes| verify::banner_prefix(&bytes, banner));
            (outcome, Some(reader))
        }
        Check::Contains(needle) => {
            let outcome = expect_seen(stdout, window, needle, |out| {
                verify::contains(out, needle.as_bytes())
            })
            .await;
            (outcome, None)
        }
        Check::Pattern(source, regex) => {
            let outcome = expect_seen(stdout, window, source, |out| regex.is_match(out)).await;
            (outcome, None)
        }
        Check::Absent(needle) => {
            let outcome = capture::scan(stdout, window, |out| {
                verify::contains(out, needle.as_bytes())
            })
            .await
            .and_then(|scan| {
                if scan.seen {
                    Err(ScenarioError::UnexpectedlySeen {
                        needle: needle.to_string(),
                        output: String::from_utf8_lossy(&scan.output).into_owned(),
                    })
                } else {
                    Ok(())
                }
            });
            (outcome, None)
        }
        Check::Alternating(first, second) => {
            let mut alternation = verify::Alternation::new(first, second);
            let outcome = capture::scan(stdout, window, |out| alternation.feed(out))
                .await
                .and_then(|scan| {
                    if scan.seen {
                        Ok(())
                    } else {
                        Err(ScenarioError::NotAlternating {
                            first: first.to_string(),
                            second: second.to_string(),
                            output: String::from_utf8_lossy(&scan.output).into_owned(),
                        })
                    }
                });
            (outcome, None)
        }
    }
}

async fn expect_seen<F>(
    stdout: ChildStdout,
    window: Duration,
    needle: &str,
    seen: F,
) -> Result<(), ScenarioError>
where
    F: FnMut(&[u8]) -> bool,
{
    let scan = capture::scan(stdout, window, seen).await?;
    if scan.seen {
        Ok(())
    } else {
        Err(ScenarioError::NotSeen {
            needle: needle.to_string(),
            output: String::from_utf8_lossy(&scan.output).into_owned(),
        })
    }
}
